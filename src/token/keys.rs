//! # Key Manager
//!
//! Per-tenant lifecycle of the keys that sign token envelopes.
//!
//! ## Schedule
//! - A new key is created when the tenant has none, or when the newest one is
//!   older than [`ROTATION_DAYS`]. The newest key signs new tokens.
//! - Keys stay valid for decoding until they are older than
//!   [`RETIREMENT_DAYS`], then they are deleted. This bounds the
//!   lifetime of any token to 30 days regardless of its own expiry.
//!
//! ## Derivation
//! Stored key material is never used directly. Each raw key goes through
//! HKDF-SHA256 with the server-wide salt and an info string naming the
//! protocol version and the tenant, so the same raw bytes give unrelated MAC
//! keys for different tenants or protocol versions.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::db::models::TokenKey;
use crate::db::{StorageError, TenantStorage};
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Newest key age, in days, after which a new key is created.
pub const ROTATION_DAYS: i64 = 7;
/// Key age, in days, after which a key is no longer accepted and gets deleted.
pub const RETIREMENT_DAYS: i64 = 30;
/// Raw key length in bytes.
pub const KEY_LEN: usize = 32;

const INFO_PREFIX: &str = "passkey-token-v1:";

/// Server-wide secret salt mixed into every derived key.
#[derive(Clone)]
pub struct TokenSecrets {
    salt: Arc<Vec<u8>>,
}

impl TokenSecrets {
    /// A missing salt is a configuration fault, not a per-request failure.
    pub fn new(salt: Vec<u8>) -> Result<Self> {
        if salt.is_empty() {
            return Err(Error::Configuration("token salt must not be empty".into()));
        }
        Ok(Self {
            salt: Arc::new(salt),
        })
    }

    /// Build from the base64 value found in configuration.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let salt = STANDARD
            .decode(encoded.trim())
            .map_err(|_| Error::Configuration("token salt is not valid base64".into()))?;
        Self::new(salt)
    }
}

impl fmt::Debug for TokenSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSecrets").finish_non_exhaustive()
    }
}

/// A derived MAC key ready to sign or verify envelopes.
#[derive(Clone)]
pub struct SigningKey {
    key_id: i32,
    created_at: DateTime<Utc>,
    mac: HmacSha256,
}

impl SigningKey {
    /// Derive the MAC key for one stored key of `tenant`.
    ///
    /// ## Flow
    /// 1. HKDF-SHA256 over `raw`, salted with the server-wide salt
    /// 2. Info is `passkey-token-v1:<tenant>`, so the output is tenant-bound
    /// 3. The 32 output bytes key an HMAC-SHA256
    ///
    /// ## Errors
    /// - `Internal`: HKDF refused the output length (cannot happen for
    ///   [`KEY_LEN`])
    pub fn derive(
        secrets: &TokenSecrets,
        tenant: &str,
        key_id: i32,
        raw: &[u8],
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let info = format!("{INFO_PREFIX}{tenant}");
        let mut okm = [0u8; KEY_LEN];
        Hkdf::<Sha256>::new(Some(secrets.salt.as_slice()), raw)
            .expand(info.as_bytes(), &mut okm)
            .map_err(|_| Error::Internal("key derivation failed".into()))?;
        let mac = HmacSha256::new_from_slice(&okm)
            .map_err(|_| Error::Internal("invalid MAC key length".into()))?;

        Ok(Self {
            key_id,
            created_at,
            mac,
        })
    }

    /// Id written into every envelope signed with this key.
    pub fn key_id(&self) -> i32 {
        self.key_id
    }

    /// When the raw key was stored; drives rotation and retirement.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// MAC over `key_id (big-endian) || token`.
    pub(crate) fn sign(&self, token: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(&self.key_id.to_be_bytes());
        mac.update(token);
        mac.finalize().into_bytes().to_vec()
    }

    /// Constant-time comparison of `tag` with the expected MAC.
    pub(crate) fn verify(&self, token: &[u8], tag: &[u8]) -> bool {
        let mut mac = self.mac.clone();
        mac.update(&self.key_id.to_be_bytes());
        mac.update(token);
        mac.verify_slice(tag).is_ok()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Immutable, request-scoped view of a tenant's active keys, newest first.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: Vec<SigningKey>,
}

impl KeyRing {
    pub fn new(mut keys: Vec<SigningKey>) -> Self {
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Self { keys }
    }

    /// The key used for new encodings: the newest one.
    ///
    /// `None` only for an empty ring, which encoding reports as a
    /// configuration error.
    pub fn current(&self) -> Option<&SigningKey> {
        self.keys.first()
    }

    /// Look up the key named by an envelope's key id.
    ///
    /// Retired keys are not in the ring, so tokens signed with them find
    /// nothing here and fail to decode.
    pub fn get(&self, key_id: i32) -> Option<&SigningKey> {
        self.keys.iter().find(|k| k.key_id == key_id)
    }

    /// Number of keys still accepted for decoding.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when the tenant has no usable key.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Rotation and retirement of one tenant's signing keys.
#[derive(Clone)]
pub struct KeyManager {
    tenant: String,
    storage: Arc<dyn TenantStorage>,
    secrets: TokenSecrets,
}

impl KeyManager {
    pub fn new(
        tenant: impl Into<String>,
        storage: Arc<dyn TenantStorage>,
        secrets: &TokenSecrets,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            storage,
            secrets: secrets.clone(),
        }
    }

    /// Keys not older than [`RETIREMENT_DAYS`], newest first.
    pub async fn active_keys(&self, now: DateTime<Utc>) -> Result<Vec<TokenKey>> {
        let keys = self.storage.get_token_keys().await?;
        Ok(active(keys, now))
    }

    /// Make sure a key younger than [`ROTATION_DAYS`] exists.
    ///
    /// Returns the active key set after any rotation. When another instance
    /// stores a key concurrently, storage reports a conflict and the set is
    /// read again instead of failing.
    pub async fn ensure_fresh_key(&self, now: DateTime<Utc>) -> Result<Vec<TokenKey>> {
        let stored = self.storage.get_token_keys().await?;
        let taken: Vec<i32> = stored.iter().map(|k| k.key_id).collect();
        let mut keys = active(stored, now);

        let needs_rotation = keys
            .first()
            .map_or(true, |newest| now - newest.created_at > Duration::days(ROTATION_DAYS));
        if !needs_rotation {
            return Ok(keys);
        }

        let key = generate_key(&taken, now);
        match self.storage.add_token_key(&key).await {
            Ok(()) => {
                tracing::info!(tenant = %self.tenant, "Created new token signing key");
                keys.insert(0, key);
                Ok(keys)
            }
            Err(StorageError::Conflict(_)) => {
                tracing::debug!(tenant = %self.tenant, "Key rotation raced, re-reading keys");
                self.active_keys(now).await
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Delete keys older than [`RETIREMENT_DAYS`]. Returns how many were removed.
    pub async fn remove_expired_keys(&self, now: DateTime<Utc>) -> Result<usize> {
        let keys = self.storage.get_token_keys().await?;
        let mut removed = 0;
        for key in keys.iter().filter(|k| now - k.created_at > Duration::days(RETIREMENT_DAYS)) {
            self.storage.remove_token_key(key.key_id).await?;
            removed += 1;
        }
        if removed > 0 {
            tracing::info!(tenant = %self.tenant, removed, "Retired token signing keys");
        }
        Ok(removed)
    }

    /// Derive the MAC keys for a set of stored keys.
    pub fn ring(&self, keys: &[TokenKey]) -> Result<KeyRing> {
        let derived = keys
            .iter()
            .map(|key| {
                let raw = STANDARD.decode(&key.key_material).map_err(|_| {
                    StorageError::Corrupt(format!("key material of key {}", key.key_id))
                })?;
                SigningKey::derive(&self.secrets, &self.tenant, key.key_id, &raw, key.created_at)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(KeyRing::new(derived))
    }

    /// Rotate if needed and return the ring for this request.
    pub async fn load_ring(&self, now: DateTime<Utc>) -> Result<KeyRing> {
        let keys = self.ensure_fresh_key(now).await?;
        self.ring(&keys)
    }
}

fn active(mut keys: Vec<TokenKey>, now: DateTime<Utc>) -> Vec<TokenKey> {
    keys.retain(|k| now - k.created_at <= Duration::days(RETIREMENT_DAYS));
    keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    keys
}

fn generate_key(taken: &[i32], now: DateTime<Utc>) -> TokenKey {
    let mut material = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut material);

    let key_id = loop {
        let candidate = OsRng.next_u32() as i32;
        if !taken.contains(&candidate) {
            break candidate;
        }
    };

    TokenKey {
        key_id,
        key_material: STANDARD.encode(material),
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStorage;

    fn secrets() -> TokenSecrets {
        TokenSecrets::new(b"salt".to_vec()).unwrap()
    }

    fn stored_key(key_id: i32, age: Duration, now: DateTime<Utc>) -> TokenKey {
        TokenKey {
            key_id,
            key_material: STANDARD.encode([key_id as u8; KEY_LEN]),
            created_at: now - age,
        }
    }

    #[test]
    fn test_empty_salt_is_a_configuration_error() {
        assert!(matches!(
            TokenSecrets::new(Vec::new()),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            TokenSecrets::from_base64("***"),
            Err(Error::Configuration(_))
        ));
        assert!(TokenSecrets::from_base64("c2FsdA==").is_ok());
    }

    #[tokio::test]
    async fn test_first_use_creates_a_key() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = KeyManager::new("acme", storage.clone(), &secrets());
        let now = Utc::now();

        let keys = manager.ensure_fresh_key(now).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(storage.get_token_keys().await.unwrap().len(), 1);

        // Idempotent while the key is fresh.
        let again = manager.ensure_fresh_key(now).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].key_id, keys[0].key_id);
    }

    #[tokio::test]
    async fn test_rotation_after_seven_days_keeps_old_key() {
        let storage = Arc::new(MemoryStorage::new());
        let now = Utc::now();
        storage
            .add_token_key(&stored_key(1, Duration::days(8), now))
            .await
            .unwrap();

        let manager = KeyManager::new("acme", storage.clone(), &secrets());
        let keys = manager.ensure_fresh_key(now).await.unwrap();
        assert_eq!(keys.len(), 2);
        assert_ne!(keys[0].key_id, 1);
        assert_eq!(keys[1].key_id, 1);

        let ring = manager.ring(&keys).unwrap();
        assert_eq!(ring.current().unwrap().key_id(), keys[0].key_id);
        assert!(ring.get(1).is_some());
    }

    #[tokio::test]
    async fn test_retirement_after_thirty_days() {
        let storage = Arc::new(MemoryStorage::new());
        let now = Utc::now();
        storage
            .add_token_key(&stored_key(1, Duration::days(31), now))
            .await
            .unwrap();
        storage
            .add_token_key(&stored_key(2, Duration::days(3), now))
            .await
            .unwrap();

        let manager = KeyManager::new("acme", storage.clone(), &secrets());
        let active = manager.active_keys(now).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].key_id, 2);

        assert_eq!(manager.remove_expired_keys(now).await.unwrap(), 1);
        let remaining = storage.get_token_keys().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key_id, 2);
    }

    #[tokio::test]
    async fn test_corrupt_material_is_a_storage_error() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = KeyManager::new("acme", storage, &secrets());
        let bad = TokenKey {
            key_id: 9,
            key_material: "%%%".into(),
            created_at: Utc::now(),
        };
        assert!(matches!(
            manager.ring(&[bad]),
            Err(Error::Storage(StorageError::Corrupt(_)))
        ));
    }

    #[test]
    fn test_generated_ids_avoid_taken_ones() {
        let now = Utc::now();
        let key = generate_key(&[1, 2, 3], now);
        assert!(![1, 2, 3].contains(&key.key_id));
        assert_eq!(STANDARD.decode(key.key_material).unwrap().len(), KEY_LEN);
    }
}
