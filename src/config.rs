//! # Configuration Management
//!
//! This module handles loading configuration from environment variables.
//! It uses the "12-factor app" methodology where configuration comes from the environment.
//!
//! ## Environment Variables
//! - `HOST`: Server bind address (default: 127.0.0.1)
//! - `PORT`: Server port (default: 8080)
//! - `DATABASE_URL`: SQLite database connection string
//! - `SERVER_NAME`: Relying party display name shown during passkey creation
//! - `TOKEN_SALT`: Server-wide salt for deriving token signing keys (required, base64)
//! - `LEGACY_ALIAS_SALT`: Environment salt of the legacy alias hash (optional)
//! - `MAX_USERS`: Maximum number of users per tenant (optional)
//! - `ALLOW_ATTESTATION`: Allow attestation other than `none` (default: false)
//! - `API_SECRET`: Master secret for backend calls (optional; backend routes are
//!   not served without it)

use anyhow::{Context, Result};
use std::env;
use std::fmt;

use crate::features::Features;

/// Application configuration
///
/// Secrets are redacted from the `Debug` output so the configuration can be
/// logged at startup.
#[derive(Clone)]
pub struct Config {
    /// Server host/IP address to bind to
    pub host: String,

    /// Server port number
    pub port: u16,

    /// SQLite database connection URL
    /// Format: "sqlite:filename.db?mode=rwc"
    pub database_url: String,

    /// Relying party name shown to users during passkey creation.
    /// The relying party id itself comes with each request.
    pub server_name: String,

    /// Base64 salt for HKDF key derivation. Without it no token can be
    /// signed, so startup fails.
    pub token_salt: String,

    /// Legacy alias lookup is disabled when unset.
    pub legacy_alias_salt: Option<String>,

    /// Tenant API secrets are derived from it. Without it the backend-only
    /// routes are not mounted.
    pub api_secret: Option<String>,

    /// Applied to every tenant.
    pub features: Features,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads variables from .env file (if present) using dotenvy
    /// 2. Reads each configuration value from environment
    /// 3. Falls back to defaults for optional values
    /// 4. Returns an error if `TOKEN_SALT` is missing or a value fails to parse
    ///
    /// ## Example .env file
    /// ```text
    /// HOST=127.0.0.1
    /// PORT=8080
    /// DATABASE_URL=sqlite:passkey.db?mode=rwc
    /// SERVER_NAME=Passkey Demo
    /// TOKEN_SALT=c2VydmVyLXdpZGUtc2FsdA==
    /// MAX_USERS=1000
    /// API_SECRET=change-me
    /// ```
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let max_users = match env::var("MAX_USERS") {
            Ok(value) if !value.trim().is_empty() => {
                Some(value.trim().parse().context("MAX_USERS must be a number")?)
            }
            _ => None,
        };

        let allow_attestation = match env::var("ALLOW_ATTESTATION") {
            Ok(value) => parse_bool(&value).context("ALLOW_ATTESTATION must be true or false")?,
            Err(_) => false,
        };

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),

            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid port number")?,

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:passkey.db?mode=rwc".to_string()),

            server_name: env::var("SERVER_NAME").unwrap_or_else(|_| "Passkey Demo".to_string()),

            token_salt: env::var("TOKEN_SALT")
                .ok()
                .filter(|salt| !salt.trim().is_empty())
                .context("TOKEN_SALT must be set")?,

            legacy_alias_salt: env::var("LEGACY_ALIAS_SALT")
                .ok()
                .filter(|salt| !salt.is_empty()),

            api_secret: env::var("API_SECRET")
                .ok()
                .filter(|secret| !secret.is_empty()),

            features: Features {
                max_users,
                allow_attestation,
            },
        })
    }

    /// Get the socket address to bind the server to
    ///
    /// Example: "127.0.0.1:8080"
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("server_name", &self.server_name)
            .field("token_salt", &"<redacted>")
            .field(
                "legacy_alias_salt",
                &self.legacy_alias_salt.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "api_secret",
                &self.api_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("features", &self.features)
            .finish()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" | "" => Some(false),
        _ => None,
    }
}
