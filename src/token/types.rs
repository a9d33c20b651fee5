//! # Token Payloads
//!
//! The closed set of payloads that travel inside envelopes. Each payload
//! declares its prefix and serialization mode through [`TokenPayload`], which
//! cannot be implemented outside this module.
//!
//! | payload                  | prefix      | mode         |
//! |--------------------------|-------------|--------------|
//! | [`RegisterToken`]        | `register_` | strict       |
//! | [`RegisterSession`]      | `session_`  | contractless |
//! | [`AuthenticationSession`]| `session_`  | contractless |
//! | [`VerifySignInToken`]    | `verify_`   | strict       |
//!
//! Strict payloads are encoded positionally. Their fields must not use
//! `skip_serializing_if` or `flatten`, and new fields may only be appended.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::envelope::Mode;
use crate::fido2::model::{
    AttestationConveyance, AuthenticatorType, Base64UrlBytes, CredentialHint, UserVerification,
};

pub const REGISTER_PREFIX: &str = "register_";
pub const SESSION_PREFIX: &str = "session_";
pub const VERIFY_PREFIX: &str = "verify_";

/// `type` of a [`RegisterToken`].
pub const TYPE_REGISTER: &str = "register";
/// `type` of a [`VerifySignInToken`] issued after registration.
pub const TYPE_PASSKEY_REGISTER: &str = "passkey_register";
/// `type` of a [`VerifySignInToken`] issued after sign-in.
pub const TYPE_PASSKEY_SIGNIN: &str = "passkey_signin";

mod sealed {
    pub trait Sealed {}
}

/// A payload the token service knows how to carry.
pub trait TokenPayload: Serialize + DeserializeOwned + sealed::Sealed {
    const PREFIX: &'static str;
    const MODE: Mode;

    /// Absolute instant after which the token is rejected.
    fn expires_at(&self) -> DateTime<Utc>;
}

/// Authorization to register a passkey for one user, minted by the
/// application backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterToken {
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: String,
    pub display_name: String,
    pub username: String,
    pub attestation: AttestationConveyance,
    pub authenticator_type: Option<AuthenticatorType>,
    pub discoverable: bool,
    pub user_verification: Option<UserVerification>,
    pub aliases: Vec<String>,
    pub alias_hashing: bool,
    pub hints: Vec<CredentialHint>,
}

/// Registration ceremony state carried between begin and complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSession {
    pub user_id: String,
    pub rp_id: String,
    pub origin: String,
    /// `webauthn-rs` registration state (challenge, policy, algorithms) as
    /// JSON.
    #[serde(with = "serde_bytes")]
    pub state: Vec<u8>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_true")]
    pub alias_hashing: bool,
    pub expires_at: DateTime<Utc>,
}

/// Sign-in ceremony state carried between begin and complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationSession {
    pub rp_id: String,
    pub origin: String,
    /// `webauthn-rs` authentication state as JSON.
    #[serde(with = "serde_bytes")]
    pub state: Vec<u8>,
    /// Credential ids offered at begin; empty for discoverable sign-in.
    #[serde(default)]
    pub allowed_credentials: Vec<Base64UrlBytes>,
    /// Policy purpose (`sign-in`, `step-up`, ...).
    pub purpose: String,
    pub expires_at: DateTime<Utc>,
}

/// Proof of a completed ceremony, redeemed by the application backend.
///
/// Also the JSON body returned by sign-in verify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySignInToken {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub rp_id: String,
    pub origin: String,
    pub success: bool,
    pub device: String,
    pub country: String,
    pub nickname: Option<String>,
    pub credential_id: Base64UrlBytes,
    pub expires_at: DateTime<Utc>,
    pub token_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub purpose: Option<String>,
    pub authenticator_display_name: Option<String>,
}

fn default_true() -> bool {
    true
}

impl sealed::Sealed for RegisterToken {}
impl sealed::Sealed for RegisterSession {}
impl sealed::Sealed for AuthenticationSession {}
impl sealed::Sealed for VerifySignInToken {}

impl TokenPayload for RegisterToken {
    const PREFIX: &'static str = REGISTER_PREFIX;
    const MODE: Mode = Mode::Strict;

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl TokenPayload for RegisterSession {
    const PREFIX: &'static str = SESSION_PREFIX;
    const MODE: Mode = Mode::Contractless;

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl TokenPayload for AuthenticationSession {
    const PREFIX: &'static str = SESSION_PREFIX;
    const MODE: Mode = Mode::Contractless;

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl TokenPayload for VerifySignInToken {
    const PREFIX: &'static str = VERIFY_PREFIX;
    const MODE: Mode = Mode::Strict;

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}
