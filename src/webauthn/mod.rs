//! # Ceremony Engine
//!
//! Passkey registration and sign-in for one tenant, built on the primitives
//! in [`crate::fido2`] and the encoded tokens of [`crate::token`].
//!
//! ## Submodules
//! - `types`: Request/response DTOs
//! - `policy`: Sign-in policy per purpose
//! - `registration`: Register token, begin and complete
//! - `authentication`: Sign-in begin, complete and verify
//!
//! ## Registration
//! 1. Application backend mints a register token → `create_register_token()`
//! 2. Browser exchanges it for creation options and a session token → `register_begin()`
//! 3. Authenticator creates the credential
//! 4. Browser sends the response with the session token → `register_complete()`
//! 5. Server verifies, stores the public key and returns a verification token
//!
//! ## Sign-in
//! 1. Browser asks for assertion options → `sign_in_begin()`
//! 2. Authenticator signs the challenge
//! 3. Browser sends the assertion with the session token → `sign_in_complete()`
//! 4. Application backend redeems the verification token → `sign_in_verify()`
//!
//! No ceremony state lives on the server between steps. The `webauthn-rs`
//! registration and authentication states are serialisable; they travel
//! inside the MAC-protected session tokens and expire with them.

pub mod authentication;
pub mod policy;
pub mod registration;
pub mod types;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;
use webauthn_rs_core::proto::Credential;

use crate::alias::AliasHasher;
use crate::db::models::{AliasRecord, StoredCredential};
use crate::db::{StorageError, TenantStorage};
use crate::error::{Error, Result};
use crate::events::EventLogger;
use crate::features::FeatureProvider;
use crate::token::keys::TokenSecrets;
use crate::token::TokenService;

/// Largest accepted user id, in bytes (WebAuthn `user.id` limit).
pub const MAX_USER_ID_BYTES: usize = 64;
pub const MAX_ALIASES: usize = 10;
pub const MAX_ALIAS_CHARS: usize = 250;
pub const MAX_HINTS: usize = 3;

/// Session tokens expire this long after begin.
pub const SESSION_LIFETIME_SECONDS: i64 = 300;

/// Ceremony engine scoped to one tenant.
///
/// Cheap to build per request: everything it holds is either shared
/// (`Arc`) or a small request-scoped view such as the token key ring.
#[derive(Clone)]
pub struct Fido2Service {
    tenant: String,
    storage: Arc<dyn TenantStorage>,
    tokens: TokenService,
    aliases: AliasHasher,
    features: Arc<dyn FeatureProvider>,
    events: Arc<dyn EventLogger>,
}

impl Fido2Service {
    pub fn new(
        storage: Arc<dyn TenantStorage>,
        tokens: TokenService,
        aliases: AliasHasher,
        features: Arc<dyn FeatureProvider>,
        events: Arc<dyn EventLogger>,
    ) -> Self {
        Self {
            tenant: tokens.tenant().to_string(),
            storage,
            tokens,
            aliases,
            features,
            events,
        }
    }

    /// Load the tenant's signing keys (rotating if needed) and build the
    /// service around them.
    pub async fn load(
        tenant: &str,
        storage: Arc<dyn TenantStorage>,
        secrets: &TokenSecrets,
        legacy_alias_salt: Option<String>,
        features: Arc<dyn FeatureProvider>,
        events: Arc<dyn EventLogger>,
    ) -> Result<Self> {
        let tokens = TokenService::load(tenant, storage.clone(), secrets).await?;
        let aliases = AliasHasher::new(tenant, legacy_alias_salt);
        Ok(Self::new(storage, tokens, aliases, features, events))
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Hash `aliases` and store them as the user's complete alias set.
    ///
    /// A hash owned by another user surfaces as [`Error::AliasConflict`] and
    /// leaves that user's mapping untouched.
    async fn store_aliases(&self, user_id: &str, aliases: &[String], hashing: bool) -> Result<()> {
        let records: Vec<AliasRecord> = aliases
            .iter()
            .map(|alias| AliasRecord {
                hashed_alias: self.aliases.hash(alias),
                plaintext: if hashing { None } else { Some(alias.clone()) },
            })
            .collect();

        self.storage
            .store_alias(user_id, &records)
            .await
            .map_err(|err| match err {
                StorageError::Conflict(_) => Error::AliasConflict,
                other => Error::Storage(other),
            })
    }
}

/// Serialize verifier state or a verifier credential for a token or a row.
pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|err| Error::Internal(format!("serialize: {err}")))
}

/// Read back verifier state from an opened session token.
///
/// The token's MAC already passed, so a failure here is a server fault.
pub(crate) fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|err| Error::Internal(format!("deserialize: {err}")))
}

/// The verifier's view of a stored credential, at the counter in storage.
pub(crate) fn verifier_credential(stored: &StoredCredential) -> Result<Credential> {
    let mut credential: Credential = serde_json::from_slice(&stored.public_key)
        .map_err(|err| StorageError::Corrupt(format!("credential record: {err}")))?;
    credential.counter = stored.signature_counter;
    Ok(credential)
}

/// Check a user id as sent by callers.
pub(crate) fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(Error::MissingUserId);
    }
    if user_id.len() > MAX_USER_ID_BYTES {
        return Err(Error::InvalidArgument(format!(
            "'userId' must be at most {MAX_USER_ID_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Check alias count and lengths, returning the set without duplicates.
pub(crate) fn validate_aliases(aliases: &[String]) -> Result<Vec<String>> {
    if aliases.len() > MAX_ALIASES {
        return Err(Error::InvalidArgument(format!(
            "At most {MAX_ALIASES} aliases are allowed"
        )));
    }

    let mut unique: Vec<String> = Vec::with_capacity(aliases.len());
    for alias in aliases {
        let chars = alias.chars().count();
        if chars == 0 || chars > MAX_ALIAS_CHARS {
            return Err(Error::InvalidArgument(format!(
                "Aliases must be between 1 and {MAX_ALIAS_CHARS} characters"
            )));
        }
        if !unique.contains(alias) {
            unique.push(alias.clone());
        }
    }
    Ok(unique)
}

/// Check that hints are unique and within the limit.
pub(crate) fn validate_hints<T: PartialEq>(hints: &[T]) -> Result<()> {
    if hints.len() > MAX_HINTS {
        return Err(Error::InvalidArgument(format!(
            "At most {MAX_HINTS} hints are allowed"
        )));
    }
    for (index, hint) in hints.iter().enumerate() {
        if hints[..index].contains(hint) {
            return Err(Error::InvalidArgument("Hints must be unique".to_string()));
        }
    }
    Ok(())
}

/// Check that `origin` may run ceremonies for `rp_id`.
///
/// The origin must be `https` (or `http` on localhost) and its host must be
/// the RP id or a subdomain of it. Returns the origin without a trailing
/// slash, as browsers report it in client data.
pub(crate) fn validate_relying_party(rp_id: &str, origin: &str) -> Result<String> {
    let rp_id = rp_id.trim();
    if rp_id.is_empty() {
        return Err(Error::InvalidArgument("'RPID' is required".to_string()));
    }

    let url = Url::parse(origin)
        .map_err(|_| Error::InvalidArgument(format!("'{origin}' is not a valid origin")))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::InvalidArgument(format!("'{origin}' has no host")))?;

    match url.scheme() {
        "https" => {}
        "http" if host == "localhost" => {}
        scheme => {
            return Err(Error::InvalidArgument(format!(
                "Origin scheme '{scheme}' is not allowed"
            )))
        }
    }

    let host = host.to_ascii_lowercase();
    let rp_id = rp_id.to_ascii_lowercase();
    let is_subdomain = host
        .strip_suffix(rp_id.as_str())
        .is_some_and(|rest| rest.ends_with('.'));
    if host != rp_id && !is_subdomain {
        return Err(Error::InvalidArgument(format!(
            "Origin '{origin}' does not belong to relying party '{rp_id}'"
        )));
    }

    Ok(origin.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fido2::model::CredentialHint;

    #[test]
    fn test_origin_must_belong_to_rp() {
        assert_eq!(
            validate_relying_party("example.com", "https://example.com/").unwrap(),
            "https://example.com"
        );
        assert!(validate_relying_party("example.com", "https://login.example.com").is_ok());
        assert!(validate_relying_party("localhost", "http://localhost:3000").is_ok());

        for (rp_id, origin) in [
            ("example.com", "https://badexample.com"),
            ("example.com", "https://example.com.evil.io"),
            ("example.com", "http://example.com"),
            ("example.com", "not a url"),
            ("", "https://example.com"),
        ] {
            let err = validate_relying_party(rp_id, origin).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{rp_id} {origin}");
        }
    }

    #[test]
    fn test_user_id_limits() {
        assert!(matches!(validate_user_id("  "), Err(Error::MissingUserId)));
        assert!(validate_user_id(&"a".repeat(64)).is_ok());
        assert!(matches!(
            validate_user_id(&"a".repeat(65)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_alias_limits() {
        let deduped = validate_aliases(&["a".into(), "b".into(), "a".into()]).unwrap();
        assert_eq!(deduped, vec!["a".to_string(), "b".to_string()]);

        assert!(validate_aliases(&[String::new()]).is_err());
        assert!(validate_aliases(&["x".repeat(251)]).is_err());
        // limit counts characters, not bytes
        assert!(validate_aliases(&["é".repeat(250)]).is_ok());

        let too_many: Vec<String> = (0..11).map(|i| format!("alias{i}")).collect();
        assert!(validate_aliases(&too_many).is_err());
    }

    #[test]
    fn test_hint_limits() {
        assert!(validate_hints(&[CredentialHint::SecurityKey, CredentialHint::Hybrid]).is_ok());
        assert!(validate_hints(&[CredentialHint::Hybrid, CredentialHint::Hybrid]).is_err());
    }
}
