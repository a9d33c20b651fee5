//! # Attestation Summary
//!
//! The verifier checks the attestation statement (`packed`, `tpm`,
//! `android-key`, `fido-u2f`, ...) but tenant policy still needs two plain
//! facts from the attestation object: the statement format and the
//! authenticator model (AAGUID). Both are read here, after verification
//! succeeded, from the same bytes the verifier accepted.

use ciborium::value::Value;
use uuid::Uuid;

use super::authenticator_data::AuthenticatorData;
use super::error::VerificationError;

/// Statement format of authenticators that provide no attestation.
pub const FMT_NONE: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationSummary {
    pub fmt: String,
    pub aaguid: Uuid,
}

impl AttestationSummary {
    /// Read `fmt` and the attested AAGUID from a CBOR attestation object.
    pub fn parse(bytes: &[u8]) -> Result<Self, VerificationError> {
        let value: Value = ciborium::from_reader(bytes)
            .map_err(|_| VerificationError::MalformedAttestationObject)?;
        let Value::Map(entries) = value else {
            return Err(VerificationError::MalformedAttestationObject);
        };

        let mut fmt = None;
        let mut auth_data = None;
        for (key, value) in entries {
            match (key, value) {
                (Value::Text(k), Value::Text(v)) if k == "fmt" => fmt = Some(v),
                (Value::Text(k), Value::Bytes(v)) if k == "authData" => auth_data = Some(v),
                _ => {}
            }
        }

        let (Some(fmt), Some(auth_data)) = (fmt, auth_data) else {
            return Err(VerificationError::MalformedAttestationObject);
        };
        let attested = AuthenticatorData::parse(&auth_data)?
            .attested_credential
            .ok_or(VerificationError::MalformedAttestationObject)?;

        Ok(Self {
            fmt,
            aaguid: attested.aaguid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(fmt: &str, auth_data: Option<Vec<u8>>) -> Vec<u8> {
        let mut entries = vec![
            (Value::Text("fmt".into()), Value::Text(fmt.into())),
            (Value::Text("attStmt".into()), Value::Map(Vec::new())),
        ];
        if let Some(auth_data) = auth_data {
            entries.push((Value::Text("authData".into()), Value::Bytes(auth_data)));
        }
        let mut buf = Vec::new();
        ciborium::into_writer(&Value::Map(entries), &mut buf).unwrap();
        buf
    }

    fn auth_data(aaguid: Uuid) -> Vec<u8> {
        let mut data = vec![0u8; 32];
        data.push(0x41);
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(aaguid.as_bytes());
        data.extend_from_slice(&2u16.to_be_bytes());
        data.extend_from_slice(&[7, 7]);
        // empty COSE map
        data.push(0xa0);
        data
    }

    #[test]
    fn test_reads_format_and_model() {
        let aaguid = Uuid::from_u128(0xcb69481e_8ff7_4039_93ec_0a2729a154a8);
        let summary = AttestationSummary::parse(&object("packed", Some(auth_data(aaguid)))).unwrap();
        assert_eq!(summary.fmt, "packed");
        assert_eq!(summary.aaguid, aaguid);
    }

    #[test]
    fn test_incomplete_object_is_rejected() {
        assert_eq!(
            AttestationSummary::parse(&object(FMT_NONE, None)),
            Err(VerificationError::MalformedAttestationObject)
        );
        assert_eq!(
            AttestationSummary::parse(b"not cbor"),
            Err(VerificationError::MalformedAttestationObject)
        );

        // authenticator data without an attested credential
        let mut bare = vec![0u8; 32];
        bare.push(0x01);
        bare.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(
            AttestationSummary::parse(&object(FMT_NONE, Some(bare))),
            Err(VerificationError::MalformedAttestationObject)
        );
    }
}
