//! # Error Handling
//!
//! This module defines the error type shared by every component of the core
//! and the mapping from those errors to HTTP responses.
//!
//! ## Error Kinds
//! Every error belongs to exactly one [`ErrorKind`]. The endpoint layer only
//! looks at the kind to choose a status code, and at [`Error::code`] for the
//! stable machine-readable code returned to the caller. Nothing inside the
//! core knows about HTTP.
//!
//! ## What is never returned to callers
//! - raw storage errors (logged, replaced by a generic message)
//! - which signing key a token referenced, or the raw token bytes
//! - internal verification details beyond a short description

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::db::StorageError;
use crate::fido2::VerificationError;
use crate::token::envelope::EnvelopeError;

/// Broad classification of an [`Error`].
///
/// Callers branch on the kind; the variants below decide retry and logging
/// policy at the edge of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad caller input: missing or malformed fields, length or count limits.
    Validation,
    /// Missing or mismatching credentials for the API itself.
    Authorization,
    /// A unique value (alias) is owned by someone else.
    Conflict,
    /// Bad MAC, malformed envelope, wrong token prefix or expired token.
    Integrity,
    /// The browser response was rejected by WebAuthn verification or policy.
    UpstreamVerification,
    /// The service is misconfigured and cannot serve traffic.
    Configuration,
    /// A collaborator (storage) failed.
    Dependency,
}

/// Errors produced by the passkey core.
#[derive(Error, Debug)]
pub enum Error {
    #[error("A non-empty 'userId' is required")]
    MissingUserId,

    #[error("A non-empty 'username' is required")]
    MissingUsername,

    /// A parameter was rejected while building or validating a ceremony.
    #[error("{0}")]
    InvalidArgument(String),

    #[error("The maximum number of users allowed for this application has been reached")]
    MaxUsersReached,

    #[error("Attestation type '{0}' is not supported on your plan")]
    AttestationNotSupportedOnPlan(String),

    #[error("The alias is already in use by another user")]
    AliasConflict,

    #[error("The token is not a '{expected}' token")]
    WrongTokenType { expected: &'static str },

    /// Envelope decoding failed. The source is kept for logging only.
    #[error("The token could not be read")]
    InvalidToken(#[source] EnvelopeError),

    #[error("The token has expired")]
    Expired,

    #[error("The credential is not registered with this application")]
    UnknownCredential,

    #[error("The authenticator is not allowed by this application's policy")]
    AuthenticatorNotAllowed,

    #[error("Attestation is required to identify the authenticator model")]
    AttestationRequired,

    #[error("Registration failed: {0}")]
    InvalidRegistration(VerificationError),

    #[error("Sign-in failed: {0}")]
    InvalidSignIn(VerificationError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Fatal misconfiguration (e.g. no server-wide token salt).
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingUserId
            | Error::MissingUsername
            | Error::InvalidArgument(_)
            | Error::MaxUsersReached
            | Error::AttestationNotSupportedOnPlan(_) => ErrorKind::Validation,
            Error::Unauthorized(_) => ErrorKind::Authorization,
            Error::AliasConflict => ErrorKind::Conflict,
            Error::WrongTokenType { .. } | Error::InvalidToken(_) | Error::Expired => {
                ErrorKind::Integrity
            }
            Error::UnknownCredential
            | Error::AuthenticatorNotAllowed
            | Error::AttestationRequired
            | Error::InvalidRegistration(_)
            | Error::InvalidSignIn(_) => ErrorKind::UpstreamVerification,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Storage(_) | Error::Internal(_) => ErrorKind::Dependency,
        }
    }

    /// Stable machine-readable code returned to API callers.
    pub fn code(&self) -> &'static str {
        match self {
            Error::MissingUserId => "missing_userid",
            Error::MissingUsername => "missing_username",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::MaxUsersReached => "max_users_reached",
            Error::AttestationNotSupportedOnPlan(_) => "attestation_not_supported_on_plan",
            Error::AliasConflict => "alias_conflict",
            Error::WrongTokenType { .. } => "invalid_token_type",
            Error::InvalidToken(_) => "invalid_token",
            Error::Expired => "expired_token",
            Error::UnknownCredential => "unknown_credential",
            Error::AuthenticatorNotAllowed => "authenticator_not_allowed",
            Error::AttestationRequired => "attestation_required",
            Error::InvalidRegistration(_) => "invalid_registration",
            Error::InvalidSignIn(_) => "invalid_signin",
            Error::Unauthorized(_) => "unauthorized",
            Error::Configuration(_) => "configuration_error",
            Error::Storage(_) => "storage_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl From<EnvelopeError> for Error {
    fn from(err: EnvelopeError) -> Self {
        Error::InvalidToken(err)
    }
}

/// Convert an [`Error`] into an HTTP response
///
/// ## How it works
/// 1. Pick the status code from the error kind
/// 2. Log according to the kind (server faults at error, abuse signals at
///    warn/info, plain validation at debug)
/// 3. Render `{ "errorCode": ..., "title": ... }`, replacing the message with
///    a generic one for server-side faults
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = match kind {
            ErrorKind::Validation | ErrorKind::Integrity | ErrorKind::UpstreamVerification => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::Authorization => StatusCode::UNAUTHORIZED,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Configuration | ErrorKind::Dependency => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let title = match kind {
            ErrorKind::Configuration | ErrorKind::Dependency => {
                tracing::error!("Request failed: {:?}", self);
                "An internal error occurred".to_string()
            }
            ErrorKind::Integrity | ErrorKind::Authorization => {
                tracing::warn!(code = self.code(), "Rejected request: {}", self);
                self.to_string()
            }
            ErrorKind::UpstreamVerification => {
                tracing::info!(code = self.code(), "Ceremony rejected: {}", self);
                self.to_string()
            }
            ErrorKind::Validation | ErrorKind::Conflict => {
                tracing::debug!(code = self.code(), "Client error: {}", self);
                self.to_string()
            }
        };

        let body = Json(json!({
            "errorCode": self.code(),
            "title": title,
        }));

        (status, body).into_response()
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
