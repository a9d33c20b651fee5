//! # Storage Models
//!
//! The records the core reads from and writes to tenant storage.
//!
//! ## Key Concepts
//! - **Credential**: a registered passkey. Only the verifier's record (public
//!   key, algorithm, registration policy) is stored; the private key never
//!   leaves the authenticator.
//! - **Token key**: raw material for one generation of token signing keys.
//! - **Alias**: a hashed, user-facing identifier pointing at a user id.
//! - **Policy**: tenant-level allow/deny lists and per-purpose sign-in rules.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::fido2::model::{CredentialDescriptor, CredentialHint, UserVerification};

/// A registered passkey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential {
    /// Credential id, type and transports, as handed back to browsers in
    /// `excludeCredentials` / `allowCredentials`.
    pub descriptor: CredentialDescriptor,
    /// The `webauthn-rs` credential record (COSE public key, algorithm,
    /// attestation) as JSON. Its counter is stale; `signature_counter` is
    /// authoritative.
    pub public_key: Vec<u8>,
    /// WebAuthn user handle (the UTF-8 bytes of `user_id`).
    pub user_handle: Vec<u8>,
    pub user_id: String,
    /// Last accepted signature counter.
    pub signature_counter: u32,
    pub attestation_fmt: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub rp_id: String,
    pub origin: String,
    pub country: String,
    pub device: String,
    pub nickname: Option<String>,
    /// Authenticator model; nil when the authenticator did not disclose it.
    pub aaguid: Uuid,
    pub backup_state: bool,
    pub is_backup_eligible: bool,
    /// `None` when the browser did not report `credProps`.
    pub is_discoverable: Option<bool>,
}

impl StoredCredential {
    pub fn credential_id(&self) -> &[u8] {
        self.descriptor.id.as_slice()
    }
}

/// Raw token signing key as persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenKey {
    /// Random, unique per tenant.
    pub key_id: i32,
    /// 32 random bytes, base64.
    pub key_material: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenKey")
            .field("key_id", &self.key_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// One alias to store for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRecord {
    pub hashed_alias: String,
    /// Kept only when the caller opted out of alias hashing.
    pub plaintext: Option<String>,
}

/// Tenant allow/deny lists of authenticator models.
///
/// An empty allow list means "no allow list configured".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticatorPolicy {
    pub allow: Vec<Uuid>,
    pub deny: Vec<Uuid>,
}

impl AuthenticatorPolicy {
    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

/// Tenant-configured sign-in policy for one purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationConfiguration {
    pub purpose: String,
    pub user_verification: UserVerification,
    /// Lifetime of the verification token issued on success.
    pub time_to_live: Duration,
    pub hints: Vec<CredentialHint>,
    pub last_used_at: Option<DateTime<Utc>>,
}
