//! # Passkey Registration
//!
//! Registration is three calls: the application backend mints a register
//! token, the browser exchanges it for creation options, and the browser
//! returns the authenticator's response.
//!
//! ## Security Concepts
//! - **Register token**: MAC-protected authorization to register for one
//!   user id; the browser cannot change who it registers as
//! - **Challenge**: random bytes the authenticator signs over, kept in the
//!   `webauthn-rs` registration state inside the session token
//! - **Attestation**: optional proof of the authenticator model, only
//!   requested when the tenant's plan allows it; every statement format
//!   `webauthn-rs` knows is verified
//! - **Allow/deny lists**: tenant policy on authenticator models (AAGUIDs)

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;
use webauthn_rs_core::proto::RegistrationState;

use super::types::{
    DeviceContext, RegisterBeginRequest, RegisterBeginResponse, RegisterCompleteRequest,
    RegisterTokenRequest, SetAliasRequest, TokenResponse,
};
use super::{
    from_json, to_json, validate_aliases, validate_hints, validate_relying_party,
    validate_user_id, Fido2Service, SESSION_LIFETIME_SECONDS,
};
use crate::db::models::{AuthenticatorPolicy, StoredCredential};
use crate::db::StorageError;
use crate::error::{Error, Result};
use crate::events::AuthEvent;
use crate::fido2::attestation::FMT_NONE;
use crate::fido2::model::{AttestationConveyance, Base64UrlBytes, CredentialDescriptor};
use crate::fido2::verifier::RegistrationParams;
use crate::fido2::{VerificationError, Verifier};
use crate::token::types::{
    RegisterSession, RegisterToken, VerifySignInToken, TYPE_PASSKEY_REGISTER, TYPE_REGISTER,
};

/// Default register token lifetime when the caller sets none.
const REGISTER_TOKEN_TTL_SECONDS: i64 = 120;
/// Lifetime of the verification token issued after registration.
const REGISTER_VERIFY_TTL_SECONDS: i64 = 120;

impl Fido2Service {
    /// Mint a register token for `request.user_id`.
    ///
    /// ## Checks
    /// 1. User id and username are present, limits on aliases and hints
    /// 2. Requested attestation is known and allowed on the tenant's plan
    /// 3. A user without credentials does not exceed the user quota
    /// 4. No alias is owned by a different user
    ///
    /// ## Errors
    /// - `MissingUserId` / `MissingUsername` / `InvalidArgument`
    /// - `AttestationNotSupportedOnPlan`
    /// - `MaxUsersReached`
    /// - `AliasConflict`
    pub async fn create_register_token(
        &self,
        request: RegisterTokenRequest,
        now: DateTime<Utc>,
    ) -> Result<TokenResponse> {
        validate_user_id(&request.user_id)?;
        if request.username.trim().is_empty() {
            return Err(Error::MissingUsername);
        }
        let aliases = validate_aliases(&request.aliases)?;
        validate_hints(&request.hints)?;

        let attestation = parse_attestation(request.attestation.as_deref())?;
        let features = self.features.features(&self.tenant).await?;
        if !features.allows(attestation) {
            return Err(Error::AttestationNotSupportedOnPlan(
                attestation.as_str().to_string(),
            ));
        }

        // Existing users are already counted.
        if let Some(max_users) = features.max_users {
            let existing = self
                .storage
                .get_credentials_by_user_id(&request.user_id)
                .await?;
            if existing.is_empty() && self.storage.get_users_count().await? >= max_users {
                return Err(Error::MaxUsersReached);
            }
        }

        for alias in &aliases {
            let owner = self.storage.get_alias_owner(&self.aliases.hash(alias)).await?;
            if owner.is_some_and(|owner| owner != request.user_id) {
                return Err(Error::AliasConflict);
            }
        }

        let token = RegisterToken {
            token_id: Uuid::new_v4().to_string(),
            expires_at: request
                .expires_at
                .unwrap_or_else(|| now + Duration::seconds(REGISTER_TOKEN_TTL_SECONDS)),
            kind: TYPE_REGISTER.to_string(),
            display_name: request.display_name.unwrap_or_default(),
            username: request.username,
            attestation,
            authenticator_type: request.authenticator_type,
            discoverable: request.discoverable.unwrap_or(true),
            user_verification: request.user_verification,
            aliases,
            alias_hashing: request.alias_hashing.unwrap_or(true),
            hints: request.hints,
            user_id: request.user_id,
        };

        tracing::debug!(tenant = %self.tenant, user_id = %token.user_id, "Register token created");

        Ok(TokenResponse {
            token: self.tokens.encode(&token)?,
        })
    }

    /// Exchange a register token for credential creation options.
    ///
    /// The verifier state and the aliases from the register token are
    /// wrapped into a session token that must come back with the browser's
    /// response.
    ///
    /// ## Errors
    /// - Token errors (`WrongTokenType`, `InvalidToken`, `Expired`)
    /// - `MissingUserId`
    /// - `InvalidArgument`: origin does not belong to the RP id, or the
    ///   verifier rejected the options
    pub async fn register_begin(
        &self,
        request: &RegisterBeginRequest,
        server_name: &str,
        now: DateTime<Utc>,
    ) -> Result<RegisterBeginResponse> {
        let origin = validate_relying_party(&request.rp_id, &request.origin)?;
        let rp_id = request.rp_id.trim().to_ascii_lowercase();
        let token: RegisterToken = self.tokens.open(&request.token, now)?;
        if token.user_id.trim().is_empty() {
            return Err(Error::MissingUserId);
        }

        // Keep the user from registering the same authenticator twice.
        let exclude = self
            .storage
            .get_credentials_by_user_id(&token.user_id)
            .await?
            .into_iter()
            .map(|credential| credential.descriptor.id.0)
            .collect();

        let display_name = if token.display_name.trim().is_empty() {
            token.username.as_str()
        } else {
            token.display_name.as_str()
        };
        let (options, state) = Verifier::new(server_name, &rp_id, &origin)
            .and_then(|verifier| {
                verifier.start_registration(RegistrationParams {
                    user_id: token.user_id.as_bytes(),
                    username: &token.username,
                    display_name,
                    exclude,
                    attestation: token.attestation,
                    authenticator_type: token.authenticator_type,
                    discoverable: token.discoverable,
                    user_verification: token.user_verification.unwrap_or_default(),
                    hints: &token.hints,
                })
            })
            .map_err(|err| Error::InvalidArgument(err.to_string()))?;

        let session = RegisterSession {
            user_id: token.user_id.clone(),
            rp_id,
            origin,
            state: to_json(&state)?,
            aliases: token.aliases,
            alias_hashing: token.alias_hashing,
            expires_at: now + Duration::seconds(SESSION_LIFETIME_SECONDS),
        };
        let session = self.tokens.encode(&session)?;

        self.events.log(
            &self.tenant,
            AuthEvent::RegistrationBegan {
                user_id: token.user_id,
            },
        );

        Ok(RegisterBeginResponse {
            data: options,
            session,
        })
    }

    /// Verify the browser's attestation and store the new credential.
    ///
    /// ## Flow
    /// 1. Open the session token
    /// 2. Verify the attestation against the session's verifier state
    /// 3. Reject credential ids that are already registered
    /// 4. Apply the tenant's authenticator allow/deny lists
    /// 5. Store the aliases captured in the register token
    /// 6. Store the credential
    /// 7. Issue a `passkey_register` verification token
    ///
    /// ## Errors
    /// - Token errors (`WrongTokenType`, `InvalidToken`, `Expired`)
    /// - `InvalidRegistration`: verification failed or duplicate credential
    /// - `AuthenticatorNotAllowed` / `AttestationRequired`
    /// - `AliasConflict`
    pub async fn register_complete(
        &self,
        request: &RegisterCompleteRequest,
        device: &DeviceContext,
        now: DateTime<Utc>,
    ) -> Result<TokenResponse> {
        let session: RegisterSession = self.tokens.open(&request.session, now)?;

        let verifier = Verifier::new(&session.rp_id, &session.rp_id, &session.origin)
            .map_err(Error::InvalidRegistration)?;
        let state: RegistrationState = from_json(&session.state)?;
        let verified = verifier
            .finish_registration(&request.response, &state)
            .map_err(Error::InvalidRegistration)?;
        let credential_id = verified.credential_id();

        if self.storage.credential_id_exists(&credential_id).await? {
            return Err(Error::InvalidRegistration(
                VerificationError::CredentialAlreadyRegistered,
            ));
        }

        let policy = self.storage.get_authenticator_allow_deny_list().await?;
        check_authenticator_policy(
            &policy,
            verified.attestation.aaguid,
            &verified.attestation.fmt,
        )?;

        let user_id = session.user_id;
        if !session.aliases.is_empty() {
            self.store_aliases(&user_id, &session.aliases, session.alias_hashing)
                .await?;
        }

        let credential = StoredCredential {
            descriptor: CredentialDescriptor::new(credential_id.clone(), verified.transports),
            public_key: to_json(&verified.credential)?,
            user_handle: user_id.as_bytes().to_vec(),
            user_id: user_id.clone(),
            signature_counter: verified.credential.counter,
            attestation_fmt: verified.attestation.fmt,
            created_at: now,
            last_used_at: now,
            rp_id: session.rp_id.clone(),
            origin: session.origin.clone(),
            country: device.country.clone(),
            device: device.device.clone(),
            nickname: request.nickname.clone(),
            aaguid: verified.attestation.aaguid,
            backup_state: verified.credential.backup_state,
            is_backup_eligible: verified.credential.backup_eligible,
            is_discoverable: verified.is_discoverable,
        };
        self.storage
            .add_credential(&credential)
            .await
            .map_err(|err| match err {
                StorageError::Conflict(_) => {
                    Error::InvalidRegistration(VerificationError::CredentialAlreadyRegistered)
                }
                other => Error::Storage(other),
            })?;

        let credential_id = Base64UrlBytes(credential_id);
        tracing::info!(
            tenant = %self.tenant,
            user_id = %user_id,
            credential_id = %credential_id.to_base64url(),
            "Passkey registered"
        );

        let verify = VerifySignInToken {
            user_id: user_id.clone(),
            timestamp: now,
            rp_id: session.rp_id,
            origin: session.origin,
            success: true,
            device: device.device.clone(),
            country: device.country.clone(),
            nickname: request.nickname.clone(),
            credential_id: credential_id.clone(),
            expires_at: now + Duration::seconds(REGISTER_VERIFY_TTL_SECONDS),
            token_id: Uuid::new_v4().to_string(),
            kind: TYPE_PASSKEY_REGISTER.to_string(),
            purpose: None,
            authenticator_display_name: None,
        };
        let token = self.tokens.encode(&verify)?;

        self.events.log(
            &self.tenant,
            AuthEvent::RegistrationCompleted {
                user_id,
                credential_id: credential_id.to_base64url(),
            },
        );

        Ok(TokenResponse { token })
    }

    /// Replace the aliases of `request.user_id`.
    ///
    /// An empty list removes every alias of the user.
    pub async fn set_aliases(&self, request: &SetAliasRequest) -> Result<()> {
        validate_user_id(&request.user_id)?;
        let aliases = validate_aliases(&request.aliases)?;
        self.store_aliases(&request.user_id, &aliases, request.hashing.unwrap_or(true))
            .await?;

        tracing::debug!(
            tenant = %self.tenant,
            user_id = %request.user_id,
            count = aliases.len(),
            "Aliases replaced"
        );
        Ok(())
    }
}

fn parse_attestation(value: Option<&str>) -> Result<AttestationConveyance> {
    let value = value.map(|v| v.trim().to_ascii_lowercase());
    match value.as_deref() {
        None | Some("") | Some("none") => Ok(AttestationConveyance::None),
        Some("indirect") => Ok(AttestationConveyance::Indirect),
        Some("direct") => Ok(AttestationConveyance::Direct),
        Some(other) => Err(Error::InvalidArgument(format!(
            "Attestation type '{other}' is not supported"
        ))),
    }
}

/// Deny list first, then allow list.
///
/// Without attestation the AAGUID cannot be trusted, so an allow-list miss on
/// a `none` statement asks for attestation instead of rejecting the model.
fn check_authenticator_policy(
    policy: &AuthenticatorPolicy,
    aaguid: Uuid,
    attestation_fmt: &str,
) -> Result<()> {
    if policy.deny.contains(&aaguid) {
        return Err(Error::AuthenticatorNotAllowed);
    }
    if !policy.allow.is_empty() && !policy.allow.contains(&aaguid) {
        if attestation_fmt == FMT_NONE {
            return Err(Error::AttestationRequired);
        }
        return Err(Error::AuthenticatorNotAllowed);
    }
    Ok(())
}
