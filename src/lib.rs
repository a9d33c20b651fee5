//! # Passkey Core
//!
//! Multi-tenant passwordless authentication backend built around the
//! WebAuthn/FIDO2 ceremony engine.
//!
//! ## Key Concepts
//! - **Ceremony**: the two-phase begin/complete registration or sign-in exchange
//! - **Session token**: ceremony state carried by the client between the two
//!   calls, MAC-protected and bound to the tenant; nothing is stored server-side
//! - **Verification token**: the short-lived proof handed back after a
//!   successful ceremony, redeemed by the application backend
//!
//! ## Modules
//! - `token`: envelope codec, per-tenant signing keys, typed token service
//! - `fido2`: WebAuthn wire types and response verification
//! - `webauthn`: the ceremony engine (registration, sign-in, verification)
//! - `alias`: tenant-salted alias hashing
//! - `db`: tenant storage trait with in-memory and SQLite implementations

pub mod alias;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod features;
pub mod fido2;
pub mod handlers;
pub mod middleware;
pub mod state;
pub mod token;
pub mod webauthn;

pub use error::{Error, ErrorKind, Result};
