//! # Token Service
//!
//! Tenant-scoped encoding and decoding of prefixed, MAC-protected tokens.
//!
//! ## Submodules
//! - `envelope`: the binary envelope and its MAC
//! - `keys`: signing key rotation, retirement and derivation
//! - `types`: the payloads that can be carried
//!
//! ## Token string
//! ```text
//! <prefix><base64url envelope>      e.g. "verify_g6NtYWPEIM..."
//! ```
//! The prefix names the token type so it can be identified without decoding.
//! Decoding checks it case-insensitively before touching the envelope.
//!
//! ## Expiry
//! The codec does not look at payload contents. [`TokenService::decode`]
//! returns a structurally valid payload even when it has expired;
//! [`TokenService::open`] additionally rejects expired payloads.

pub mod envelope;
pub mod keys;
pub mod types;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::TenantStorage;
use crate::error::{Error, Result};
use envelope::{EnvelopeError, Mode};
use keys::{KeyManager, KeyRing, TokenSecrets};
use types::TokenPayload;

/// Encodes and decodes tokens for one tenant with a fixed key ring.
#[derive(Debug, Clone)]
pub struct TokenService {
    tenant: String,
    ring: KeyRing,
}

impl TokenService {
    /// Load the tenant's keys, rotating first when the newest key is stale.
    ///
    /// Retirement of old keys runs in the background; a failure there is
    /// logged and never fails the request.
    pub async fn load(
        tenant: &str,
        storage: Arc<dyn TenantStorage>,
        secrets: &TokenSecrets,
    ) -> Result<Self> {
        let manager = KeyManager::new(tenant, storage, secrets);
        let now = Utc::now();
        let ring = manager.load_ring(now).await?;

        let tenant_name = tenant.to_string();
        tokio::spawn(async move {
            if let Err(err) = manager.remove_expired_keys(now).await {
                tracing::warn!(tenant = %tenant_name, "Failed to retire token keys: {}", err);
            }
        });

        Ok(Self::from_ring(tenant, ring))
    }

    pub fn from_ring(tenant: &str, ring: KeyRing) -> Self {
        Self {
            tenant: tenant.to_string(),
            ring,
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Encode any serializable payload under `prefix`.
    pub fn encode_token<T: Serialize>(
        &self,
        payload: &T,
        prefix: &'static str,
        mode: Mode,
    ) -> Result<String> {
        let body = envelope::encode(&self.ring, payload, mode).map_err(|err| match err {
            EnvelopeError::NoActiveKey => {
                Error::Configuration(format!("no signing key for tenant '{}'", self.tenant))
            }
            other => Error::Internal(other.to_string()),
        })?;
        Ok(format!("{prefix}{body}"))
    }

    /// Check the prefix, then open the envelope and deserialize the payload.
    pub fn decode_token<T: DeserializeOwned>(
        &self,
        token: &str,
        prefix: &'static str,
        mode: Mode,
    ) -> Result<T> {
        let body = strip_prefix(token, prefix).ok_or(Error::WrongTokenType { expected: prefix })?;
        envelope::decode(&self.ring, body, mode).map_err(|err| {
            tracing::debug!(tenant = %self.tenant, prefix, "Token rejected: {}", err);
            Error::from(err)
        })
    }

    pub fn encode<T: TokenPayload>(&self, payload: &T) -> Result<String> {
        self.encode_token(payload, T::PREFIX, T::MODE)
    }

    /// Structural decode; expiry is not checked.
    pub fn decode<T: TokenPayload>(&self, token: &str) -> Result<T> {
        self.decode_token(token, T::PREFIX, T::MODE)
    }

    /// Decode and reject the payload if it expired before `now`.
    pub fn open<T: TokenPayload>(&self, token: &str, now: DateTime<Utc>) -> Result<T> {
        let payload: T = self.decode(token)?;
        ensure_not_expired(payload.expires_at(), now)?;
        Ok(payload)
    }
}

pub fn ensure_not_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    if expires_at < now {
        return Err(Error::Expired);
    }
    Ok(())
}

fn strip_prefix<'a>(token: &'a str, prefix: &str) -> Option<&'a str> {
    let head = token.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&token[prefix.len()..])
    } else {
        None
    }
}
