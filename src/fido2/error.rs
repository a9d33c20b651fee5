//! Reasons a WebAuthn response can be rejected.

use thiserror::Error;
use webauthn_rs_core::error::WebauthnError;

/// Every way attestation or assertion verification can fail.
///
/// Messages are short descriptions safe to pass back to API callers; none of
/// them embed request bytes or library internals.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("challenge does not match")]
    ChallengeMismatch,

    #[error("origin does not match")]
    OriginMismatch,

    #[error("attestation object is malformed")]
    MalformedAttestationObject,

    #[error("authenticator data is malformed")]
    MalformedAuthenticatorData,

    #[error("user presence was not asserted")]
    UserNotPresent,

    #[error("user verification was required but not performed")]
    UserNotVerified,

    #[error("credential is not in the allowed list")]
    CredentialNotAllowed,

    #[error("user handle is missing")]
    MissingUserHandle,

    #[error("user handle does not match the credential owner")]
    UserHandleMismatch,

    #[error("signature counter did not increase; the authenticator may be cloned")]
    CounterRegression,

    #[error("credential is already registered")]
    CredentialAlreadyRegistered,

    #[error("stored credential cannot be used for verification")]
    UnusableCredential,

    #[error("ceremony options were rejected")]
    InvalidOptions,

    /// Any other failure reported by the verifier: bad signature, bad
    /// attestation statement, unsupported algorithm and so on.
    #[error("response failed verification")]
    Rejected,
}

impl From<WebauthnError> for VerificationError {
    fn from(err: WebauthnError) -> Self {
        match err {
            WebauthnError::MismatchedChallenge => VerificationError::ChallengeMismatch,
            WebauthnError::InvalidRPOrigin => VerificationError::OriginMismatch,
            WebauthnError::UserNotPresent => VerificationError::UserNotPresent,
            WebauthnError::UserNotVerified => VerificationError::UserNotVerified,
            WebauthnError::CredentialPossibleCompromise => VerificationError::CounterRegression,
            _ => VerificationError::Rejected,
        }
    }
}
