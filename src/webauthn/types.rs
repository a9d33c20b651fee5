//! # Ceremony API Types
//!
//! Request and response DTOs of the ceremony engine. They are plain data
//! with no HTTP concepts; the endpoint layer deserializes them from JSON
//! bodies as-is.
//!
//! ## API Flow
//! Each ceremony has two steps: begin and complete.
//! - Begin: the server returns options for the browser plus a session token
//! - Complete: the client returns the browser response with the session token
//!   and receives a verification token

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use webauthn_rs_core::proto::{
    CreationChallengeResponse, PublicKeyCredential, RegisterPublicKeyCredential,
    RequestChallengeResponse,
};

use crate::fido2::model::{AuthenticatorType, CredentialHint, UserVerification};

/// Request to mint a register token, sent by the application backend.
///
/// ## Example JSON
/// ```json
/// {
///   "userId": "107fb578-9559-4540-a0e2-f82ad78852f7",
///   "username": "alice@example.com",
///   "displayName": "Alice",
///   "aliases": ["alice@example.com"]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTokenRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// `none`, `indirect` or `direct`; defaults to `none`.
    #[serde(default)]
    pub attestation: Option<String>,
    #[serde(default)]
    pub authenticator_type: Option<AuthenticatorType>,
    /// Defaults to `true`.
    #[serde(default)]
    pub discoverable: Option<bool>,
    #[serde(default)]
    pub user_verification: Option<UserVerification>,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Defaults to `true`. When `false` the plaintext alias is stored too.
    #[serde(default)]
    pub alias_hashing: Option<bool>,
    #[serde(default)]
    pub hints: Vec<CredentialHint>,
    /// Defaults to two minutes from now.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A freshly encoded token (register, verify).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Request to start registration, sent by the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBeginRequest {
    pub token: String,
    /// Relying party id (a registrable domain such as `example.com`).
    #[serde(rename = "RPID", alias = "rpId")]
    pub rp_id: String,
    pub origin: String,
}

/// Creation options plus the session token to send back on complete.
///
/// `data` is `{ "publicKey": { ... } }`, ready for
/// `navigator.credentials.create()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterBeginResponse {
    pub data: CreationChallengeResponse,
    pub session: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCompleteRequest {
    pub session: String,
    /// The `PublicKeyCredential` from `create()`, JSON-encoded by the client.
    pub response: RegisterPublicKeyCredential,
    #[serde(default)]
    pub nickname: Option<String>,
}

/// Request to start sign-in, sent by the browser.
///
/// With neither `userId` nor `alias` the ceremony is discoverable: the
/// browser offers every passkey it holds for the relying party.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInBeginRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(rename = "RPID", alias = "rpId")]
    pub rp_id: String,
    pub origin: String,
    /// Policy purpose; defaults to `sign-in`.
    #[serde(default)]
    pub purpose: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInBeginResponse {
    pub data: RequestChallengeResponse,
    pub session: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInCompleteRequest {
    pub session: String,
    pub response: PublicKeyCredential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInVerifyRequest {
    pub token: String,
}

/// Replace a user's aliases, sent by the application backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAliasRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Defaults to `true`.
    #[serde(default)]
    pub hashing: Option<bool>,
}

/// Where a ceremony completion came from, recorded on the credential and in
/// the verification token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceContext {
    /// Client description, usually the user agent.
    pub device: String,
    /// ISO country code reported by the edge, empty when unknown.
    pub country: String,
}
