//! Shared helpers for the integration tests: a software authenticator that
//! produces real WebAuthn responses, and a tenant-scoped service over
//! in-memory storage.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use ciborium::Value;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509Builder, X509NameBuilder};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use serde_json::{json, Value as Json};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use webauthn_rs_core::proto::{PublicKeyCredential, RegisterPublicKeyCredential};

use passkey_core::db::memory::MemoryStorage;
use passkey_core::events::{AuthEvent, EventLogger};
use passkey_core::features::{Features, StaticFeatures};
use passkey_core::token::keys::TokenSecrets;
use passkey_core::webauthn::types::{
    DeviceContext, RegisterBeginRequest, RegisterCompleteRequest, RegisterTokenRequest,
    SignInBeginRequest, SignInCompleteRequest, TokenResponse,
};
use passkey_core::webauthn::Fido2Service;

pub const TENANT: &str = "acme";
pub const RP_ID: &str = "example.com";
pub const ORIGIN: &str = "https://example.com";
pub const SERVER_NAME: &str = "Acme";

const FLAG_UP: u8 = 0x01;
const FLAG_UV: u8 = 0x04;
const FLAG_AT: u8 = 0x40;

const COSE_ALG_ES256: i64 = -7;
const COSE_ALG_RS256: i64 = -257;

/// Attestation statement the authenticator produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attestation {
    None,
    /// `packed` self-attestation, signed with the credential key.
    PackedSelf,
    /// `packed` with an `x5c` chain: signed by a separate attestation key
    /// whose certificate names the authenticator model.
    PackedCertificate,
}

enum CredentialKey {
    Es256(SigningKey),
    Rs256(PKey<Private>),
}

impl CredentialKey {
    fn alg(&self) -> i64 {
        match self {
            CredentialKey::Es256(_) => COSE_ALG_ES256,
            CredentialKey::Rs256(_) => COSE_ALG_RS256,
        }
    }

    fn cose(&self) -> Value {
        let int = |value: i64| Value::Integer(value.into());
        match self {
            CredentialKey::Es256(key) => {
                let point = key.verifying_key().to_encoded_point(false);
                Value::Map(vec![
                    (int(1), int(2)),
                    (int(3), int(COSE_ALG_ES256)),
                    (int(-1), int(1)),
                    (int(-2), Value::Bytes(point.x().expect("x coordinate").to_vec())),
                    (int(-3), Value::Bytes(point.y().expect("y coordinate").to_vec())),
                ])
            }
            CredentialKey::Rs256(key) => {
                let rsa = key.rsa().expect("rsa key");
                Value::Map(vec![
                    (int(1), int(3)),
                    (int(3), int(COSE_ALG_RS256)),
                    (int(-1), Value::Bytes(rsa.n().to_vec())),
                    (int(-2), Value::Bytes(rsa.e().to_vec())),
                ])
            }
        }
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            CredentialKey::Es256(key) => {
                let signature: Signature = key.sign(message);
                signature.to_der().as_bytes().to_vec()
            }
            CredentialKey::Rs256(key) => openssl_sign(key, message),
        }
    }
}

fn openssl_sign(key: &PKey<Private>, message: &[u8]) -> Vec<u8> {
    let mut signer = openssl::sign::Signer::new(MessageDigest::sha256(), key).expect("signer");
    signer.update(message).expect("sign");
    signer.sign_to_vec().expect("sign")
}

/// A P-256 attestation key and its certificate, as a batch of
/// authenticators of one model would share.
struct AttestationCertificate {
    key: PKey<Private>,
    der: Vec<u8>,
}

impl AttestationCertificate {
    fn generate() -> Self {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).expect("curve");
        let key = PKey::from_ec_key(EcKey::generate(&group).expect("ec key")).expect("pkey");

        let mut name = X509NameBuilder::new().expect("name");
        name.append_entry_by_text("C", "SE").expect("C");
        name.append_entry_by_text("O", "Acme Authenticators").expect("O");
        name.append_entry_by_text("OU", "Authenticator Attestation")
            .expect("OU");
        name.append_entry_by_text("CN", "Acme Key Batch 1").expect("CN");
        let name = name.build();

        let mut builder = X509Builder::new().expect("builder");
        builder.set_version(2).expect("version");
        let serial = BigNum::from_u32(1)
            .and_then(|serial| serial.to_asn1_integer())
            .expect("serial");
        builder.set_serial_number(&serial).expect("serial");
        builder.set_subject_name(&name).expect("subject");
        builder.set_issuer_name(&name).expect("issuer");
        builder.set_pubkey(&key).expect("pubkey");
        builder
            .set_not_before(&Asn1Time::days_from_now(0).expect("time"))
            .expect("not before");
        builder
            .set_not_after(&Asn1Time::days_from_now(365).expect("time"))
            .expect("not after");
        builder
            .append_extension(BasicConstraints::new().critical().build().expect("bc"))
            .expect("extension");
        builder.sign(&key, MessageDigest::sha256()).expect("self-sign");

        Self {
            der: builder.build().to_der().expect("der"),
            key,
        }
    }
}

/// An authenticator holding a single credential.
pub struct SoftAuthenticator {
    key: CredentialKey,
    credential_id: Vec<u8>,
    aaguid: Uuid,
    counter: u32,
    user_verifying: bool,
    user_handle: Vec<u8>,
}

impl SoftAuthenticator {
    pub fn new() -> Self {
        Self::with_aaguid(Uuid::nil())
    }

    pub fn with_aaguid(aaguid: Uuid) -> Self {
        Self::with_key(CredentialKey::Es256(SigningKey::random(&mut OsRng)), aaguid)
    }

    /// Authenticator with an RSA (RS256) credential key.
    pub fn rs256() -> Self {
        let rsa = Rsa::generate(2048).expect("rsa key");
        Self::with_key(
            CredentialKey::Rs256(PKey::from_rsa(rsa).expect("pkey")),
            Uuid::nil(),
        )
    }

    fn with_key(key: CredentialKey, aaguid: Uuid) -> Self {
        let mut credential_id = vec![0u8; 16];
        OsRng.fill_bytes(&mut credential_id);
        Self {
            key,
            credential_id,
            aaguid,
            counter: 0,
            user_verifying: true,
            user_handle: Vec::new(),
        }
    }

    /// Authenticator without a PIN or biometric.
    pub fn without_user_verification(mut self) -> Self {
        self.user_verifying = false;
        self
    }

    pub fn credential_id(&self) -> &[u8] {
        &self.credential_id
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Make the authenticator claim another account's user handle.
    pub fn set_user_handle(&mut self, user_handle: &[u8]) {
        self.user_handle = user_handle.to_vec();
    }

    fn flags(&self) -> u8 {
        if self.user_verifying {
            FLAG_UP | FLAG_UV
        } else {
            FLAG_UP
        }
    }

    fn signed_message(auth_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
        let mut message = auth_data.to_vec();
        message.extend_from_slice(&Sha256::digest(client_data_json));
        message
    }

    /// Answer `navigator.credentials.create()` for `options` on `origin`.
    pub fn register<T: Serialize>(
        &mut self,
        options: &T,
        origin: &str,
        attestation: Attestation,
    ) -> RegisterPublicKeyCredential {
        let options = public_key_options(options);
        self.user_handle = decode(&options["user"]["id"]);
        let rp_id = options["rp"]["id"].as_str().expect("rp id");
        let client_data_json =
            client_data("webauthn.create", &decode(&options["challenge"]), origin);

        let mut cose_key = Vec::new();
        ciborium::into_writer(&self.key.cose(), &mut cose_key).expect("cbor");

        let mut auth_data = Sha256::digest(rp_id.as_bytes()).to_vec();
        auth_data.push(self.flags() | FLAG_AT);
        auth_data.extend_from_slice(&self.counter.to_be_bytes());
        auth_data.extend_from_slice(self.aaguid.as_bytes());
        auth_data.extend_from_slice(&(self.credential_id.len() as u16).to_be_bytes());
        auth_data.extend_from_slice(&self.credential_id);
        auth_data.extend_from_slice(&cose_key);

        let message = Self::signed_message(&auth_data, &client_data_json);
        let (fmt, statement) = match attestation {
            Attestation::None => ("none", Vec::new()),
            Attestation::PackedSelf => (
                "packed",
                vec![
                    (
                        Value::Text("alg".into()),
                        Value::Integer(self.key.alg().into()),
                    ),
                    (Value::Text("sig".into()), Value::Bytes(self.key.sign(&message))),
                ],
            ),
            Attestation::PackedCertificate => {
                let certificate = AttestationCertificate::generate();
                (
                    "packed",
                    vec![
                        (
                            Value::Text("alg".into()),
                            Value::Integer(COSE_ALG_ES256.into()),
                        ),
                        (
                            Value::Text("sig".into()),
                            Value::Bytes(openssl_sign(&certificate.key, &message)),
                        ),
                        (
                            Value::Text("x5c".into()),
                            Value::Array(vec![Value::Bytes(certificate.der)]),
                        ),
                    ],
                )
            }
        };
        let object = Value::Map(vec![
            (Value::Text("fmt".into()), Value::Text(fmt.into())),
            (Value::Text("attStmt".into()), Value::Map(statement)),
            (Value::Text("authData".into()), Value::Bytes(auth_data)),
        ]);
        let mut attestation_object = Vec::new();
        ciborium::into_writer(&object, &mut attestation_object).expect("cbor");

        serde_json::from_value(json!({
            "id": encode(&self.credential_id),
            "rawId": encode(&self.credential_id),
            "type": "public-key",
            "response": {
                "attestationObject": encode(&attestation_object),
                "clientDataJSON": encode(&client_data_json),
                "transports": ["internal"],
            },
            "extensions": {},
        }))
        .expect("registration response")
    }

    /// Answer `navigator.credentials.get()`, advancing the counter.
    pub fn assert<T: Serialize>(&mut self, options: &T, origin: &str) -> PublicKeyCredential {
        let options = public_key_options(options);
        let rp_id = options["rpId"].as_str().expect("rp id");
        self.counter += 1;
        let client_data_json = client_data("webauthn.get", &decode(&options["challenge"]), origin);

        let mut auth_data = Sha256::digest(rp_id.as_bytes()).to_vec();
        auth_data.push(self.flags());
        auth_data.extend_from_slice(&self.counter.to_be_bytes());

        let signature = self
            .key
            .sign(&Self::signed_message(&auth_data, &client_data_json));
        serde_json::from_value(json!({
            "id": encode(&self.credential_id),
            "rawId": encode(&self.credential_id),
            "type": "public-key",
            "response": {
                "authenticatorData": encode(&auth_data),
                "clientDataJSON": encode(&client_data_json),
                "signature": encode(&signature),
                "userHandle": encode(&self.user_handle),
            },
            "extensions": {},
        }))
        .expect("assertion response")
    }
}

/// The `publicKey` member of begin's `data`, as the browser reads it.
pub fn public_key_options<T: Serialize>(options: &T) -> Json {
    let mut value = serde_json::to_value(options).expect("options json");
    value["publicKey"].take()
}

/// Ids listed in `allowCredentials` of sign-in options.
pub fn allowed_ids<T: Serialize>(options: &T) -> Vec<Vec<u8>> {
    public_key_options(options)["allowCredentials"]
        .as_array()
        .map(|allowed| allowed.iter().map(|entry| decode(&entry["id"])).collect())
        .unwrap_or_default()
}

fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn decode(value: &Json) -> Vec<u8> {
    let text = value.as_str().expect("base64 string");
    URL_SAFE_NO_PAD
        .decode(text.trim_end_matches('='))
        .or_else(|_| STANDARD.decode(text))
        .expect("base64")
}

fn client_data(kind: &str, challenge: &[u8], origin: &str) -> Vec<u8> {
    format!(
        r#"{{"type":"{}","challenge":"{}","origin":"{}","crossOrigin":false}}"#,
        kind,
        URL_SAFE_NO_PAD.encode(challenge),
        origin
    )
    .into_bytes()
}

/// Collects events instead of logging them.
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<AuthEvent>>,
}

impl RecordingEvents {
    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(AuthEvent::name)
            .collect()
    }
}

impl EventLogger for RecordingEvents {
    fn log(&self, _tenant: &str, event: AuthEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn secrets() -> TokenSecrets {
    TokenSecrets::new(b"integration-test-salt".to_vec()).unwrap()
}

pub fn device() -> DeviceContext {
    DeviceContext {
        device: "Mozilla/5.0 (test)".into(),
        country: "SE".into(),
    }
}

pub struct Harness {
    pub storage: Arc<MemoryStorage>,
    pub events: Arc<RecordingEvents>,
    pub service: Fido2Service,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(Features::default(), None).await
    }

    pub async fn with(features: Features, legacy_alias_salt: Option<String>) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let events = Arc::new(RecordingEvents::default());
        let service = Fido2Service::load(
            TENANT,
            storage.clone(),
            &secrets(),
            legacy_alias_salt,
            Arc::new(StaticFeatures(features)),
            events.clone(),
        )
        .await
        .unwrap();
        Self {
            storage,
            events,
            service,
        }
    }

    /// Mint a register token with the given aliases.
    pub async fn register_token(&self, user_id: &str, aliases: &[&str]) -> String {
        let request = RegisterTokenRequest {
            user_id: user_id.into(),
            username: format!("{user_id}@example.com"),
            aliases: aliases.iter().map(|alias| alias.to_string()).collect(),
            ..Default::default()
        };
        self.service
            .create_register_token(request, Utc::now())
            .await
            .unwrap()
            .token
    }

    /// Run begin and complete for `token` at `now`.
    pub async fn register_with(
        &self,
        authenticator: &mut SoftAuthenticator,
        token: &str,
        attestation: Attestation,
        now: DateTime<Utc>,
    ) -> passkey_core::Result<TokenResponse> {
        let begin = self
            .service
            .register_begin(
                &RegisterBeginRequest {
                    token: token.into(),
                    rp_id: RP_ID.into(),
                    origin: ORIGIN.into(),
                },
                SERVER_NAME,
                now,
            )
            .await?;
        let response = authenticator.register(&begin.data, ORIGIN, attestation);
        self.service
            .register_complete(
                &RegisterCompleteRequest {
                    session: begin.session,
                    response,
                    nickname: Some("Laptop".into()),
                },
                &device(),
                now,
            )
            .await
    }

    /// Full registration of a new authenticator for `user_id`.
    pub async fn register(&self, user_id: &str, aliases: &[&str]) -> SoftAuthenticator {
        let token = self.register_token(user_id, aliases).await;
        let mut authenticator = SoftAuthenticator::new();
        self.register_with(&mut authenticator, &token, Attestation::None, Utc::now())
            .await
            .unwrap();
        authenticator
    }

    pub fn sign_in_request(&self, user_id: Option<&str>, alias: Option<&str>) -> SignInBeginRequest {
        SignInBeginRequest {
            user_id: user_id.map(str::to_string),
            alias: alias.map(str::to_string),
            rp_id: RP_ID.into(),
            origin: ORIGIN.into(),
            purpose: None,
        }
    }

    /// Begin a sign-in and let `authenticator` answer it, without completing.
    pub async fn prepare_sign_in(
        &self,
        authenticator: &mut SoftAuthenticator,
        request: &SignInBeginRequest,
    ) -> SignInCompleteRequest {
        let begin = self
            .service
            .sign_in_begin(request, Utc::now())
            .await
            .unwrap();
        SignInCompleteRequest {
            response: authenticator.assert(&begin.data, ORIGIN),
            session: begin.session,
        }
    }
}
