//! # Ceremony Verifier
//!
//! Wraps [`WebauthnCore`] for one relying party id and origin. The ceremony
//! engine builds one per request from the values the caller (or the session
//! token) names, since every tenant serves its own relying parties.
//!
//! ## What `webauthn-rs` covers
//! - Challenge generation and the creation/request options
//! - Client data (type, challenge, origin), RP id hash, user presence and
//!   user verification
//! - Attestation statements (`none`, `packed`, `tpm`, `android-key`,
//!   `android-safetynet`, `fido-u2f`, `apple`)
//! - Assertion signatures for ES256, EdDSA and RS256 credentials
//!
//! ## What stays with the engine
//! - Whether the credential id is already taken, and who owns a user handle
//! - Tenant allow/deny lists by AAGUID
//! - The signature counter compare-and-set in storage

use std::time::Duration;

use serde::Serialize;
use url::Url;
use webauthn_rs_core::error::WebauthnError;
use webauthn_rs_core::proto::{
    AuthenticationResult, AuthenticationState, CreationChallengeResponse, Credential,
    CredentialID, PublicKeyCredential, PublicKeyCredentialHints, RegisterPublicKeyCredential,
    RegistrationState, RequestChallengeResponse, RequestRegistrationExtensions,
};
use webauthn_rs_core::WebauthnCore;

use super::attestation::AttestationSummary;
use super::error::VerificationError;
use super::model::{
    AttestationConveyance, AuthenticatorTransport, AuthenticatorType, CredentialHint,
    UserVerification, CREDENTIAL_ALGORITHMS,
};

/// How long the browser is told to wait for the authenticator.
pub const CEREMONY_TIMEOUT: Duration = Duration::from_millis(60_000);

/// What register begin asks the authenticator for.
#[derive(Debug, Clone)]
pub struct RegistrationParams<'a> {
    /// WebAuthn user handle.
    pub user_id: &'a [u8],
    pub username: &'a str,
    pub display_name: &'a str,
    /// Credential ids the user already holds.
    pub exclude: Vec<Vec<u8>>,
    pub attestation: AttestationConveyance,
    pub authenticator_type: Option<AuthenticatorType>,
    pub discoverable: bool,
    pub user_verification: UserVerification,
    pub hints: &'a [CredentialHint],
}

/// A credential that passed attestation verification, ready to be stored.
#[derive(Debug, Clone)]
pub struct VerifiedRegistration {
    pub credential: Credential,
    pub attestation: AttestationSummary,
    pub transports: Option<Vec<AuthenticatorTransport>>,
    /// From the `credProps` client extension, when the browser reported it.
    pub is_discoverable: Option<bool>,
}

impl VerifiedRegistration {
    pub fn credential_id(&self) -> Vec<u8> {
        let id: &[u8] = self.credential.cred_id.as_ref();
        id.to_vec()
    }
}

pub struct Verifier {
    core: WebauthnCore,
}

impl Verifier {
    /// Build a verifier for `rp_id`, accepting exactly `origin`.
    ///
    /// ## Errors
    /// - `InvalidOptions`: `origin` is not a URL
    pub fn new(rp_name: &str, rp_id: &str, origin: &str) -> Result<Self, VerificationError> {
        let origin = Url::parse(origin).map_err(|_| VerificationError::InvalidOptions)?;
        let core = WebauthnCore::new_unsafe_experts_only(
            rp_name,
            rp_id,
            vec![origin],
            CEREMONY_TIMEOUT,
            Some(false),
            Some(false),
        );
        Ok(Self { core })
    }

    /// Creation options for `params` and the state needed to verify the
    /// answer.
    pub fn start_registration(
        &self,
        params: RegistrationParams<'_>,
    ) -> Result<(CreationChallengeResponse, RegistrationState), VerificationError> {
        let exclude: Vec<CredentialID> = params
            .exclude
            .into_iter()
            .map(CredentialID::from)
            .collect();

        let builder = self
            .core
            .new_challenge_register_builder(
                params.user_id,
                params.username,
                params.display_name,
            )
            .map_err(options_rejected)?
            .attestation(params.attestation.into())
            .user_verification_policy(params.user_verification.into())
            .exclude_credentials(Some(exclude))
            .credential_algorithms(CREDENTIAL_ALGORITHMS.to_vec())
            .require_resident_key(params.discoverable)
            .authenticator_attachment(
                params
                    .authenticator_type
                    .and_then(AuthenticatorType::attachment),
            )
            .extensions(cred_props_request())
            .hints(proto_hints(params.hints));

        self.core
            .generate_challenge_register(builder)
            .map_err(options_rejected)
    }

    /// Verify `response` against the state issued at begin.
    ///
    /// Certificate-chain statements are verified for their format but not
    /// chained to a trust root; the AAGUID is what tenant policy checks.
    pub fn finish_registration(
        &self,
        response: &RegisterPublicKeyCredential,
        state: &RegistrationState,
    ) -> Result<VerifiedRegistration, VerificationError> {
        let credential = self
            .core
            .register_credential(response, state, None)
            .map_err(rejected)?;

        let attestation_object: &[u8] = response.response.attestation_object.as_ref();
        let attestation = AttestationSummary::parse(attestation_object)?;

        Ok(VerifiedRegistration {
            transports: transports(&response.response.transports),
            is_discoverable: reported_discoverable(&response.extensions),
            attestation,
            credential,
        })
    }

    /// Request options allowing `credentials` (empty for discoverable
    /// credentials) and the state needed to verify the answer.
    pub fn start_authentication(
        &self,
        credentials: Vec<Credential>,
        user_verification: UserVerification,
        hints: &[CredentialHint],
    ) -> Result<(RequestChallengeResponse, AuthenticationState), VerificationError> {
        let builder = self
            .core
            .new_challenge_authenticate_builder(credentials, Some(user_verification.into()))
            .map_err(options_rejected)?
            .hints(proto_hints(hints));

        self.core
            .generate_challenge_authenticate(builder)
            .map_err(options_rejected)
    }

    /// Verify `response` as produced by `credential`.
    ///
    /// `credential` must carry the counter currently in storage; the state
    /// from begin is narrowed to it, so discoverable sign-ins verify the same
    /// way as ones with an allow list.
    pub fn finish_authentication(
        &self,
        response: &PublicKeyCredential,
        mut state: AuthenticationState,
        credential: Credential,
    ) -> Result<AuthenticationResult, VerificationError> {
        state.set_allowed_credentials(vec![credential]);
        self.core
            .authenticate_credential(response, &state)
            .map_err(rejected)
    }
}

/// The clone-detection rule: the counter must grow, unless the authenticator
/// keeps none (zero on both sides).
pub fn counter_advanced(stored: u32, presented: u32) -> bool {
    (stored == 0 && presented == 0) || presented > stored
}

fn rejected(err: WebauthnError) -> VerificationError {
    tracing::debug!(error = ?err, "WebAuthn response rejected");
    err.into()
}

fn options_rejected(err: WebauthnError) -> VerificationError {
    tracing::debug!(error = ?err, "WebAuthn options rejected");
    VerificationError::InvalidOptions
}

// Both sides use the WebAuthn JSON spellings, so values cross over through
// serde instead of a variant-by-variant match.

fn proto_hints(hints: &[CredentialHint]) -> Option<Vec<PublicKeyCredentialHints>> {
    if hints.is_empty() {
        return None;
    }
    serde_json::to_value(hints)
        .and_then(serde_json::from_value)
        .ok()
}

fn cred_props_request() -> Option<RequestRegistrationExtensions> {
    serde_json::from_value(serde_json::json!({ "credProps": true })).ok()
}

/// Transports the browser reported, dropping ones this service has no name
/// for.
fn transports<T: Serialize>(reported: &T) -> Option<Vec<AuthenticatorTransport>> {
    let serde_json::Value::Array(items) = serde_json::to_value(reported).ok()? else {
        return None;
    };
    Some(
        items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
    )
}

fn reported_discoverable<T: Serialize>(extensions: &T) -> Option<bool> {
    serde_json::to_value(extensions)
        .ok()?
        .pointer("/credProps/rk")
        .and_then(serde_json::Value::as_bool)
}
