//! # Alias Hashing
//!
//! Aliases (email addresses, usernames) are stored only as tenant-salted
//! hashes so they can be looked up but not enumerated.
//!
//! ## Schemes
//! - current: `base64(SHA-256(tenant || alias))`
//! - legacy: `base64(PBKDF2-HMAC-SHA256(alias, SHA-256(tenant || env_salt), 10000, 32))`
//!
//! The legacy scheme is only consulted as a fallback during sign-in and the
//! matching record is rewritten with the current scheme. It is never used for
//! new writes.
//!
//! Tenant names are restricted to `[a-z0-9]`, so concatenation without a
//! separator cannot make two `(tenant, alias)` pairs produce the same input.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

pub const LEGACY_ITERATIONS: u32 = 10_000;
pub const LEGACY_OUTPUT_LEN: usize = 32;

/// Current alias hash.
pub fn hash_alias(tenant: &str, alias: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant.as_bytes());
    hasher.update(alias.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Legacy alias hash, kept for look-ups of records written before migration.
pub fn legacy_hash_alias(tenant: &str, alias: &str, env_salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant.as_bytes());
    hasher.update(env_salt.as_bytes());
    let salt = hasher.finalize();

    let mut out = [0u8; LEGACY_OUTPUT_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(alias.as_bytes(), &salt, LEGACY_ITERATIONS, &mut out);
    STANDARD.encode(out)
}

/// Tenant-bound alias hasher.
#[derive(Debug, Clone)]
pub struct AliasHasher {
    tenant: String,
    legacy_salt: Option<String>,
}

impl AliasHasher {
    /// Without a legacy salt the legacy fallback is disabled.
    pub fn new(tenant: impl Into<String>, legacy_salt: Option<String>) -> Self {
        Self {
            tenant: tenant.into(),
            legacy_salt,
        }
    }

    pub fn hash(&self, alias: &str) -> String {
        hash_alias(&self.tenant, alias)
    }

    pub fn legacy_hash(&self, alias: &str) -> Option<String> {
        self.legacy_salt
            .as_deref()
            .map(|salt| legacy_hash_alias(&self.tenant, alias, salt))
    }
}
