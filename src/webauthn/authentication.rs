//! # Passkey Sign-in
//!
//! Sign-in is begin and complete, followed by the application backend
//! redeeming the verification token with [`Fido2Service::sign_in_verify`].
//!
//! ## Candidate credentials
//! Begin narrows the ceremony to known credentials when it can:
//! 1. By user id
//! 2. By alias, hashed with the current scheme
//! 3. By alias, hashed with the legacy scheme; a hit migrates the alias
//! 4. Otherwise no allow list (discoverable credentials)
//!
//! ## Clone detection
//! The verifier compares the presented counter with the one in storage, and
//! the stored counter is then advanced with a compare-and-set, so two
//! concurrent completions carrying the same counter cannot both succeed.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;
use webauthn_rs_core::proto::AuthenticationState;

use super::policy::{self, PURPOSE_SIGN_IN};
use super::types::{
    DeviceContext, SignInBeginRequest, SignInBeginResponse, SignInCompleteRequest,
    SignInVerifyRequest, TokenResponse,
};
use super::{
    from_json, to_json, validate_relying_party, verifier_credential, Fido2Service,
    SESSION_LIFETIME_SECONDS,
};
use crate::db::models::StoredCredential;
use crate::db::StorageError;
use crate::error::{Error, Result};
use crate::events::AuthEvent;
use crate::fido2::model::Base64UrlBytes;
use crate::fido2::verifier::counter_advanced;
use crate::fido2::{VerificationError, Verifier};
use crate::token::types::{AuthenticationSession, VerifySignInToken, TYPE_PASSKEY_SIGNIN};

impl Fido2Service {
    /// Build assertion options for the candidate credentials and wrap the
    /// verifier state, with the purpose, into a session token.
    ///
    /// ## Errors
    /// - `InvalidArgument`: origin does not belong to the RP id
    /// - `Storage`: a candidate's stored record cannot be read
    pub async fn sign_in_begin(
        &self,
        request: &SignInBeginRequest,
        now: DateTime<Utc>,
    ) -> Result<SignInBeginResponse> {
        let origin = validate_relying_party(&request.rp_id, &request.origin)?;
        let rp_id = request.rp_id.trim().to_ascii_lowercase();
        let purpose = request
            .purpose
            .as_deref()
            .map(str::trim)
            .filter(|purpose| !purpose.is_empty())
            .unwrap_or(PURPOSE_SIGN_IN)
            .to_string();

        let candidates = self.resolve_candidates(request).await?;
        let policy = policy::resolve(self.storage.as_ref(), &purpose).await?;

        let mut allowed_credentials = Vec::with_capacity(candidates.len());
        let mut credentials = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            credentials.push(verifier_credential(candidate)?);
            allowed_credentials.push(candidate.descriptor.id.clone());
        }

        let (options, state) = Verifier::new(&rp_id, &rp_id, &origin)
            .and_then(|verifier| {
                verifier.start_authentication(credentials, policy.user_verification, &policy.hints)
            })
            .map_err(|err| Error::InvalidArgument(err.to_string()))?;

        let session = AuthenticationSession {
            rp_id,
            origin,
            state: to_json(&state)?,
            allowed_credentials,
            purpose,
            expires_at: now + Duration::seconds(SESSION_LIFETIME_SECONDS),
        };

        Ok(SignInBeginResponse {
            data: options,
            session: self.tokens.encode(&session)?,
        })
    }

    /// Verify the assertion, advance the credential's counter and issue a
    /// `passkey_signin` verification token.
    ///
    /// ## Flow
    /// 1. Open the session token and load the presented credential
    /// 2. Check it against the allow list from begin and its owner's handle
    /// 3. Verify the assertion at the counter currently in storage
    /// 4. Compare-and-set the counter
    /// 5. Touch the purpose's configuration and issue the token
    ///
    /// ## Errors
    /// - Token errors (`WrongTokenType`, `InvalidToken`, `Expired`)
    /// - `UnknownCredential`: the credential id is not registered
    /// - `InvalidSignIn`: verification failed, or the counter did not advance
    pub async fn sign_in_complete(
        &self,
        request: &SignInCompleteRequest,
        device: &DeviceContext,
        now: DateTime<Utc>,
    ) -> Result<TokenResponse> {
        let session: AuthenticationSession = self.tokens.open(&request.session, now)?;

        let credential_id = request.response.get_credential_id().to_vec();
        let credential = self
            .storage
            .get_credential(&credential_id)
            .await?
            .ok_or(Error::UnknownCredential)?;

        check_claimed_owner(
            &session.allowed_credentials,
            &credential,
            request.response.get_user_unique_id(),
        )
        .map_err(Error::InvalidSignIn)?;

        let verifier = Verifier::new(&session.rp_id, &session.rp_id, &session.origin)
            .map_err(Error::InvalidSignIn)?;
        let state: AuthenticationState = from_json(&session.state)?;
        let result = verifier
            .finish_authentication(&request.response, state, verifier_credential(&credential)?)
            .map_err(Error::InvalidSignIn)?;

        let sign_count = result.counter();
        if !counter_advanced(credential.signature_counter, sign_count) {
            tracing::warn!(
                tenant = %self.tenant,
                user_id = %credential.user_id,
                "Signature counter did not increase"
            );
            return Err(Error::InvalidSignIn(VerificationError::CounterRegression));
        }

        let applied = self
            .storage
            .update_credential_counter(
                &credential_id,
                sign_count,
                &device.country,
                &device.device,
                now,
            )
            .await?;
        if !applied {
            tracing::warn!(
                tenant = %self.tenant,
                user_id = %credential.user_id,
                "Signature counter was advanced concurrently"
            );
            return Err(Error::InvalidSignIn(VerificationError::CounterRegression));
        }

        let policy = policy::resolve(self.storage.as_ref(), &session.purpose).await?;
        if policy.configured {
            self.storage
                .update_configuration_last_used(&session.purpose, now)
                .await?;
        }

        let credential_id = Base64UrlBytes(credential_id);
        let verify = VerifySignInToken {
            user_id: credential.user_id.clone(),
            timestamp: now,
            rp_id: session.rp_id,
            origin: session.origin,
            success: true,
            device: device.device.clone(),
            country: device.country.clone(),
            nickname: credential.nickname,
            credential_id: credential_id.clone(),
            expires_at: now + policy.time_to_live,
            token_id: Uuid::new_v4().to_string(),
            kind: TYPE_PASSKEY_SIGNIN.to_string(),
            purpose: Some(session.purpose.clone()),
            authenticator_display_name: None,
        };
        let token = self.tokens.encode(&verify)?;

        self.events.log(
            &self.tenant,
            AuthEvent::SignInCompleted {
                user_id: credential.user_id,
                credential_id: credential_id.to_base64url(),
                purpose: session.purpose,
            },
        );

        Ok(TokenResponse { token })
    }

    /// Redeem a verification token.
    ///
    /// A pure read: the same token verifies again until it expires.
    pub async fn sign_in_verify(
        &self,
        request: &SignInVerifyRequest,
        now: DateTime<Utc>,
    ) -> Result<VerifySignInToken> {
        let token: VerifySignInToken = self.tokens.open(&request.token, now)?;

        self.events.log(
            &self.tenant,
            AuthEvent::TokenVerified {
                user_id: token.user_id.clone(),
                kind: token.kind.clone(),
            },
        );

        Ok(token)
    }

    async fn resolve_candidates(
        &self,
        request: &SignInBeginRequest,
    ) -> Result<Vec<StoredCredential>> {
        if let Some(user_id) = request.user_id.as_deref().filter(|id| !id.trim().is_empty()) {
            return Ok(self.storage.get_credentials_by_user_id(user_id).await?);
        }
        if let Some(alias) = request.alias.as_deref().filter(|alias| !alias.is_empty()) {
            return self.credentials_by_alias(alias).await;
        }
        Ok(Vec::new())
    }

    async fn credentials_by_alias(&self, alias: &str) -> Result<Vec<StoredCredential>> {
        let hashed = self.aliases.hash(alias);
        let credentials = self.storage.get_credentials_by_alias(&hashed).await?;
        if !credentials.is_empty() {
            return Ok(credentials);
        }

        let Some(legacy) = self.aliases.legacy_hash(alias) else {
            return Ok(credentials);
        };
        let credentials = self.storage.get_credentials_by_alias(&legacy).await?;

        if let Some(owner) = credentials.first().map(|credential| credential.user_id.clone()) {
            match self.storage.migrate_alias(&owner, &legacy, &hashed).await {
                Ok(()) => {
                    tracing::info!(tenant = %self.tenant, user_id = %owner, "Migrated legacy alias")
                }
                // The sign-in itself can still go ahead on the legacy match.
                Err(StorageError::Conflict(reason)) => {
                    tracing::warn!(tenant = %self.tenant, "Legacy alias not migrated: {}", reason)
                }
                Err(other) => return Err(other.into()),
            }
        }

        Ok(credentials)
    }
}

/// The presented credential must be one offered at begin, and a user handle,
/// when the authenticator returns one, must name the credential's owner.
///
/// Discoverable sign-ins offer nothing at begin, so there the user handle is
/// the only claim of identity and must be present.
fn check_claimed_owner(
    allowed: &[Base64UrlBytes],
    credential: &StoredCredential,
    user_handle: Option<&[u8]>,
) -> std::result::Result<(), VerificationError> {
    if !allowed.is_empty() && !allowed.contains(&credential.descriptor.id) {
        return Err(VerificationError::CredentialNotAllowed);
    }
    match user_handle {
        Some(handle) if handle != credential.user_handle.as_slice() => {
            Err(VerificationError::UserHandleMismatch)
        }
        None if allowed.is_empty() => Err(VerificationError::MissingUserHandle),
        _ => Ok(()),
    }
}
