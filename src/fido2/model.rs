//! # WebAuthn Wire Enums
//!
//! The caller-facing spellings of WebAuthn options, as accepted in register
//! tokens and sign-in configurations, and their `webauthn-rs` counterparts.
//!
//! These values are also embedded in tokens, which are MessagePack rather
//! than JSON. [`Base64UrlBytes`] switches representation on
//! `is_human_readable()` so binary fields are base64url strings in JSON and
//! raw `bin` values in MessagePack.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use webauthn_rs_core::proto::{
    AttestationConveyancePreference, AuthenticatorAttachment, COSEAlgorithm,
    UserVerificationPolicy,
};

/// Algorithms offered at register begin, in order of preference.
pub const CREDENTIAL_ALGORITHMS: [COSEAlgorithm; 3] =
    [COSEAlgorithm::ES256, COSEAlgorithm::EDDSA, COSEAlgorithm::RS256];

/// The only credential type WebAuthn defines.
pub const PUBLIC_KEY_TYPE: &str = "public-key";

/// Binary data that travels as base64url in JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Base64UrlBytes(pub Vec<u8>);

impl Base64UrlBytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64url(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }
}

impl From<Vec<u8>> for Base64UrlBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Base64UrlBytes {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Serialize for Base64UrlBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_base64url())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Base64UrlBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let encoded = String::deserialize(deserializer)?;
            decode_base64url(&encoded)
                .map(Self)
                .map_err(|_| serde::de::Error::custom("invalid base64url data"))
        } else {
            let bytes = serde_bytes::ByteBuf::deserialize(deserializer)?;
            Ok(Self(bytes.into_vec()))
        }
    }
}

/// Decode base64url, tolerating trailing padding some clients still send.
pub fn decode_base64url(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('='))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationConveyance {
    #[default]
    None,
    Indirect,
    Direct,
}

impl AttestationConveyance {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttestationConveyance::None => "none",
            AttestationConveyance::Indirect => "indirect",
            AttestationConveyance::Direct => "direct",
        }
    }
}

impl From<AttestationConveyance> for AttestationConveyancePreference {
    fn from(value: AttestationConveyance) -> Self {
        match value {
            AttestationConveyance::None => AttestationConveyancePreference::None,
            AttestationConveyance::Indirect => AttestationConveyancePreference::Indirect,
            AttestationConveyance::Direct => AttestationConveyancePreference::Direct,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerification {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

impl From<UserVerification> for UserVerificationPolicy {
    fn from(value: UserVerification) -> Self {
        match value {
            UserVerification::Required => UserVerificationPolicy::Required,
            UserVerification::Preferred => UserVerificationPolicy::Preferred,
            UserVerification::Discouraged => UserVerificationPolicy::Discouraged_DO_NOT_USE,
        }
    }
}

/// Authenticator filter requested by the caller of "create token".
///
/// `Any` means no filter and is dropped when options are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticatorType {
    Any,
    Platform,
    CrossPlatform,
}

impl AuthenticatorType {
    pub fn attachment(self) -> Option<AuthenticatorAttachment> {
        match self {
            AuthenticatorType::Any => None,
            AuthenticatorType::Platform => Some(AuthenticatorAttachment::Platform),
            AuthenticatorType::CrossPlatform => Some(AuthenticatorAttachment::CrossPlatform),
        }
    }
}

/// Ordered UI hints (WebAuthn Level 3 `hints`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialHint {
    SecurityKey,
    ClientDevice,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticatorTransport {
    Usb,
    Nfc,
    Ble,
    SmartCard,
    Hybrid,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: Base64UrlBytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transports: Option<Vec<AuthenticatorTransport>>,
}

impl CredentialDescriptor {
    pub fn new(id: Vec<u8>, transports: Option<Vec<AuthenticatorTransport>>) -> Self {
        Self {
            kind: PUBLIC_KEY_TYPE.to_string(),
            id: Base64UrlBytes(id),
            transports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64url_is_a_string_in_json() {
        let value = Base64UrlBytes(vec![0xfb, 0xff, 0x00]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, "\"-_8A\"");
        let back: Base64UrlBytes = serde_json::from_str("\"-_8A==\"").unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_base64url_is_binary_in_msgpack() {
        let value = Base64UrlBytes(vec![1, 2, 3]);
        let packed = rmp_serde::to_vec(&value).unwrap();
        // bin8 marker, length 3
        assert_eq!(packed, vec![0xc4, 3, 1, 2, 3]);
        let back: Base64UrlBytes = rmp_serde::from_slice(&packed).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_enum_spellings() {
        assert_eq!(
            serde_json::to_string(&AuthenticatorType::CrossPlatform).unwrap(),
            "\"cross-platform\""
        );
        assert_eq!(
            serde_json::to_string(&CredentialHint::SecurityKey).unwrap(),
            "\"security-key\""
        );
        assert_eq!(
            serde_json::to_string(&AuthenticatorTransport::SmartCard).unwrap(),
            "\"smart-card\""
        );
        assert!(serde_json::from_str::<AttestationConveyance>("\"enterprise\"").is_err());
    }

    #[test]
    fn test_verifier_counterparts() {
        assert_eq!(AuthenticatorType::Any.attachment(), None);
        assert_eq!(
            AuthenticatorType::Platform.attachment(),
            Some(AuthenticatorAttachment::Platform)
        );
        assert_eq!(
            UserVerificationPolicy::from(UserVerification::Required),
            UserVerificationPolicy::Required
        );
        assert!(matches!(
            AttestationConveyancePreference::from(AttestationConveyance::Direct),
            AttestationConveyancePreference::Direct
        ));
        assert!(CREDENTIAL_ALGORITHMS.contains(&COSEAlgorithm::RS256));
    }
}
