//! # Application State
//!
//! This module defines the shared state that's accessible to all request handlers.
//!
//! ## The State Pattern
//! Shared resources are created once at startup and stored in `AppState`:
//! 1. Storage provider (wrapping the database connection pool)
//! 2. Token secrets, feature provider and event logger
//! 3. Axum clones the state for each request (cheap because everything is `Arc`)
//!
//! Tenant-scoped pieces are not cached here. Each request builds a fresh
//! [`Fido2Service`] from storage, so a key rotated by another instance is
//! picked up on the next request.

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::db::sqlite::{self, SqliteStorageProvider};
use crate::db::StorageProvider;
use crate::events::{EventLogger, TracingEventLogger};
use crate::features::{FeatureProvider, StaticFeatures};
use crate::middleware::api_secret::ApiSecrets;
use crate::token::keys::TokenSecrets;
use crate::webauthn::Fido2Service;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageProvider>,
    pub secrets: TokenSecrets,
    pub features: Arc<dyn FeatureProvider>,
    pub events: Arc<dyn EventLogger>,
    pub legacy_alias_salt: Option<String>,
    /// Relying party display name.
    pub server_name: String,
    /// `None` leaves the backend-only routes unmounted.
    pub api_secrets: Option<ApiSecrets>,
}

impl AppState {
    /// Initialize application state
    ///
    /// This function:
    /// 1. Decodes the token salt (a bad salt stops startup)
    ///    and takes the API secret, if any
    /// 2. Connects to the SQLite database and runs migrations
    /// 3. Wires the static feature provider and the tracing event logger
    pub async fn new(config: &Config) -> Result<Self> {
        let secrets = TokenSecrets::from_base64(&config.token_salt)?;
        let api_secrets = config
            .api_secret
            .as_deref()
            .map(ApiSecrets::new)
            .transpose()?;
        let pool = sqlite::connect(&config.database_url).await?;

        Ok(Self {
            storage: Arc::new(SqliteStorageProvider::new(pool)),
            secrets,
            features: Arc::new(StaticFeatures(config.features.clone())),
            events: Arc::new(TracingEventLogger),
            legacy_alias_salt: config.legacy_alias_salt.clone(),
            server_name: config.server_name.clone(),
            api_secrets,
        })
    }

    /// Build the ceremony engine for `tenant`.
    pub async fn fido2(&self, tenant: &str) -> crate::Result<Fido2Service> {
        Fido2Service::load(
            tenant,
            self.storage.tenant(tenant),
            &self.secrets,
            self.legacy_alias_salt.clone(),
            self.features.clone(),
            self.events.clone(),
        )
        .await
    }
}
