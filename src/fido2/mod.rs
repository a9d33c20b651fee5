//! # FIDO2 Adapter
//!
//! Thin layer between the ceremony engine and `webauthn-rs-core`, which
//! generates the challenges and verifies the browser's responses.
//!
//! ## Submodules
//! - `model`: wire enums and binary helpers shared with tokens and storage
//! - `verifier`: per-relying-party wrapper around [`WebauthnCore`]
//! - `attestation`: reads the statement format and AAGUID for tenant policy
//! - `authenticator_data`: authenticator data layout, for the AAGUID
//!
//! Ceremony state (`RegistrationState`, `AuthenticationState`) is
//! serialisable; the engine carries it inside the session tokens instead of
//! keeping it on the server.
//!
//! [`WebauthnCore`]: webauthn_rs_core::WebauthnCore

pub mod attestation;
pub mod authenticator_data;
pub mod error;
pub mod model;
pub mod verifier;

pub use error::VerificationError;
pub use verifier::Verifier;
