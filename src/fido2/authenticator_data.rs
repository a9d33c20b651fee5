//! Authenticator data parsing.
//!
//! Layout: `rpIdHash(32) || flags(1) || signCount(4, BE) ||
//! [aaguid(16) || credIdLen(2, BE) || credId || COSE_Key] || [extensions]`.
//!
//! Signatures and the RP id hash are checked by the verifier; this parser only
//! exposes the fields tenant policy looks at.

use ciborium::value::Value;
use uuid::Uuid;

use super::error::VerificationError;

const FLAG_AT: u8 = 0x40;

const MIN_LEN: usize = 37;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: Uuid,
    pub credential_id: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredentialData>,
}

impl AuthenticatorData {
    pub fn parse(bytes: &[u8]) -> Result<Self, VerificationError> {
        if bytes.len() < MIN_LEN {
            return Err(VerificationError::MalformedAuthenticatorData);
        }

        let flags = bytes[32];
        let sign_count = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);

        let attested_credential = if flags & FLAG_AT != 0 {
            Some(parse_attested_credential(&bytes[MIN_LEN..])?)
        } else {
            None
        };

        Ok(Self {
            flags,
            sign_count,
            attested_credential,
        })
    }
}

fn parse_attested_credential(bytes: &[u8]) -> Result<AttestedCredentialData, VerificationError> {
    if bytes.len() < 18 {
        return Err(VerificationError::MalformedAuthenticatorData);
    }

    let aaguid = Uuid::from_slice(&bytes[..16])
        .map_err(|_| VerificationError::MalformedAuthenticatorData)?;
    let id_len = u16::from_be_bytes([bytes[16], bytes[17]]) as usize;
    let rest = &bytes[18..];
    if rest.len() < id_len {
        return Err(VerificationError::MalformedAuthenticatorData);
    }
    let credential_id = rest[..id_len].to_vec();

    // The COSE key has no length prefix; it must at least decode as one
    // CBOR item. Extensions may follow it.
    let mut key_bytes = &rest[id_len..];
    let _: Value = ciborium::from_reader(&mut key_bytes)
        .map_err(|_| VerificationError::MalformedAuthenticatorData)?;

    Ok(AttestedCredentialData {
        aaguid,
        credential_id,
    })
}
