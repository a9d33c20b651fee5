//! # Envelope Codec
//!
//! Tamper-evident transport for serialized payloads.
//!
//! ## Wire format
//! ```text
//! base64url( msgpack_map { "mac": bin, "token": bin, "keyId": int32 } )
//! ```
//! `token` holds the MessagePack encoding of the payload itself and `mac` is
//! HMAC-SHA256 over `keyId (big-endian) || token` with the derived key that
//! `keyId` names.
//!
//! ## Modes
//! - [`Mode::Strict`]: positional encoding (a MessagePack array). Compact, but
//!   the field order is the schema.
//! - [`Mode::Contractless`]: named encoding (a MessagePack map). Tolerates
//!   reordered, added and removed fields, so ceremony state can evolve.
//!
//! The mode is part of the contract: a payload encoded in one mode is rejected
//! as malformed when decoded in the other.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::keys::KeyRing;

/// Serialization mode of the inner payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Strict,
    Contractless,
}

/// Why an envelope could not be produced or opened.
///
/// None of the messages mention key ids or payload bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope is malformed")]
    Malformed,

    #[error("envelope was signed with a key that is not active")]
    UnknownKey,

    #[error("envelope integrity check failed")]
    BadMac,

    #[error("payload could not be serialized: {0}")]
    Serialize(String),

    #[error("no signing key is available")]
    NoActiveKey,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(with = "serde_bytes")]
    mac: Vec<u8>,
    #[serde(with = "serde_bytes")]
    token: Vec<u8>,
    #[serde(rename = "keyId")]
    key_id: i32,
}

/// Serialize `payload`, sign it with the ring's current key and wrap it.
pub fn encode<T: Serialize>(ring: &KeyRing, payload: &T, mode: Mode) -> Result<String, EnvelopeError> {
    let key = ring.current().ok_or(EnvelopeError::NoActiveKey)?;

    let token = match mode {
        Mode::Strict => rmp_serde::to_vec(payload),
        Mode::Contractless => rmp_serde::to_vec_named(payload),
    }
    .map_err(|e| EnvelopeError::Serialize(e.to_string()))?;

    let envelope = Envelope {
        mac: key.sign(&token),
        token,
        key_id: key.key_id(),
    };
    let bytes =
        rmp_serde::to_vec_named(&envelope).map_err(|e| EnvelopeError::Serialize(e.to_string()))?;

    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Unwrap, authenticate and deserialize an envelope.
///
/// The signing key is selected by the embedded key id, so envelopes produced
/// with an older key keep working while that key is in the ring.
pub fn decode<T: DeserializeOwned>(
    ring: &KeyRing,
    encoded: &str,
    mode: Mode,
) -> Result<T, EnvelopeError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| EnvelopeError::Malformed)?;
    let envelope: Envelope =
        rmp_serde::from_slice(&bytes).map_err(|_| EnvelopeError::Malformed)?;

    let key = ring.get(envelope.key_id).ok_or(EnvelopeError::UnknownKey)?;
    if !key.verify(&envelope.token, &envelope.mac) {
        return Err(EnvelopeError::BadMac);
    }

    if !container_matches(&envelope.token, mode) {
        return Err(EnvelopeError::Malformed);
    }
    rmp_serde::from_slice(&envelope.token).map_err(|_| EnvelopeError::Malformed)
}

/// Check the outer MessagePack container marker against the mode.
fn container_matches(token: &[u8], mode: Mode) -> bool {
    let Some(&marker) = token.first() else {
        return false;
    };
    match mode {
        // fixarray, array16, array32
        Mode::Strict => matches!(marker, 0x90..=0x9f | 0xdc | 0xdd),
        // fixmap, map16, map32
        Mode::Contractless => matches!(marker, 0x80..=0x8f | 0xde | 0xdf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::keys::{SigningKey, TokenSecrets};
    use chrono::{Duration, Utc};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
        #[serde(default)]
        tags: Vec<String>,
    }

    #[derive(Debug, Deserialize)]
    struct SampleV2 {
        count: u32,
        name: String,
        #[serde(default)]
        extra: Option<String>,
    }

    fn ring_with(ids: &[i32]) -> KeyRing {
        let secrets = TokenSecrets::new(b"server-salt".to_vec()).unwrap();
        let now = Utc::now();
        let keys = ids
            .iter()
            .enumerate()
            .map(|(age, id)| {
                SigningKey::derive(
                    &secrets,
                    "acme",
                    *id,
                    &[*id as u8; 32],
                    now - Duration::days(age as i64),
                )
                .unwrap()
            })
            .collect();
        KeyRing::new(keys)
    }

    fn sample() -> Sample {
        Sample {
            name: "alice".into(),
            count: 3,
            tags: vec!["a".into()],
        }
    }

    #[test]
    fn test_roundtrip_both_modes() {
        let ring = ring_with(&[7]);
        for mode in [Mode::Strict, Mode::Contractless] {
            let encoded = encode(&ring, &sample(), mode).unwrap();
            assert!(!encoded.contains('='));
            let decoded: Sample = decode(&ring, &encoded, mode).unwrap();
            assert_eq!(decoded, sample());
        }
    }

    #[test]
    fn test_contractless_tolerates_schema_changes() {
        let ring = ring_with(&[7]);
        let encoded = encode(&ring, &sample(), Mode::Contractless).unwrap();
        let decoded: SampleV2 = decode(&ring, &encoded, Mode::Contractless).unwrap();
        assert_eq!(decoded.name, "alice");
        assert_eq!(decoded.count, 3);
        assert!(decoded.extra.is_none());
    }

    #[test]
    fn test_mode_mismatch_is_malformed() {
        let ring = ring_with(&[7]);
        let strict = encode(&ring, &sample(), Mode::Strict).unwrap();
        let named = encode(&ring, &sample(), Mode::Contractless).unwrap();
        assert_eq!(
            decode::<Sample>(&ring, &strict, Mode::Contractless).unwrap_err(),
            EnvelopeError::Malformed
        );
        assert_eq!(
            decode::<Sample>(&ring, &named, Mode::Strict).unwrap_err(),
            EnvelopeError::Malformed
        );
    }

    #[test]
    fn test_every_flipped_byte_is_detected() {
        let ring = ring_with(&[7]);
        let encoded = encode(&ring, &sample(), Mode::Strict).unwrap();
        let raw = URL_SAFE_NO_PAD.decode(&encoded).unwrap();

        for i in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[i] ^= 0x01;
            let result = decode::<Sample>(&ring, &URL_SAFE_NO_PAD.encode(&tampered), Mode::Strict);
            assert!(result.is_err(), "flipping byte {i} went unnoticed");
        }
    }

    #[test]
    fn test_older_key_still_decodes() {
        let old_ring = ring_with(&[1]);
        let encoded = encode(&old_ring, &sample(), Mode::Strict).unwrap();

        let rotated = ring_with(&[2, 1]);
        assert_eq!(rotated.current().unwrap().key_id(), 2);
        let decoded: Sample = decode(&rotated, &encoded, Mode::Strict).unwrap();
        assert_eq!(decoded, sample());

        let retired = ring_with(&[2]);
        assert_eq!(
            decode::<Sample>(&retired, &encoded, Mode::Strict).unwrap_err(),
            EnvelopeError::UnknownKey
        );
    }

    #[test]
    fn test_other_tenant_cannot_open() {
        let secrets = TokenSecrets::new(b"server-salt".to_vec()).unwrap();
        let now = Utc::now();
        let acme = KeyRing::new(vec![SigningKey::derive(&secrets, "acme", 5, &[1; 32], now).unwrap()]);
        let globex =
            KeyRing::new(vec![SigningKey::derive(&secrets, "globex", 5, &[1; 32], now).unwrap()]);

        let encoded = encode(&acme, &sample(), Mode::Strict).unwrap();
        assert_eq!(
            decode::<Sample>(&globex, &encoded, Mode::Strict).unwrap_err(),
            EnvelopeError::BadMac
        );
    }

    #[test]
    fn test_garbage_and_empty_ring() {
        let ring = ring_with(&[7]);
        assert_eq!(
            decode::<Sample>(&ring, "not base64!", Mode::Strict).unwrap_err(),
            EnvelopeError::Malformed
        );
        assert_eq!(
            encode(&KeyRing::default(), &sample(), Mode::Strict).unwrap_err(),
            EnvelopeError::NoActiveKey
        );
    }
}
