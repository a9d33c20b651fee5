//! # SQLite Storage
//!
//! [`TenantStorage`] on a shared `SqlitePool`. All tenants live in the same
//! tables and are separated by the `tenant` column; the handle for a request
//! only carries the pool (cheap to clone) and the tenant name.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use super::models::{
    AliasRecord, AuthenticationConfiguration, AuthenticatorPolicy, StoredCredential, TokenKey,
};
use super::{aliases, credentials, settings, token_keys};
use super::{StorageProvider, StorageResult, TenantStorage};

/// Connect and bring the schema up to date.
///
/// Migrations are embedded from `./migrations` at compile time.
pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let pool = SqlitePool::connect(database_url).await?;
    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Storage handle for one tenant.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    tenant: String,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool, tenant: impl Into<String>) -> Self {
        Self {
            pool,
            tenant: tenant.into(),
        }
    }

    pub async fn set_authenticator_policy(&self, policy: &AuthenticatorPolicy) -> StorageResult<()> {
        settings::set_policy(&self.pool, &self.tenant, policy).await
    }

    pub async fn set_authentication_configuration(
        &self,
        configuration: &AuthenticationConfiguration,
    ) -> StorageResult<()> {
        settings::upsert_configuration(&self.pool, &self.tenant, configuration).await
    }
}

#[async_trait]
impl TenantStorage for SqliteStorage {
    async fn get_credentials_by_user_id(
        &self,
        user_id: &str,
    ) -> StorageResult<Vec<StoredCredential>> {
        credentials::find_by_user_id(&self.pool, &self.tenant, user_id).await
    }

    async fn get_credential(&self, credential_id: &[u8]) -> StorageResult<Option<StoredCredential>> {
        credentials::find_by_id(&self.pool, &self.tenant, credential_id).await
    }

    async fn get_credentials_by_alias(
        &self,
        hashed_alias: &str,
    ) -> StorageResult<Vec<StoredCredential>> {
        credentials::find_by_alias(&self.pool, &self.tenant, hashed_alias).await
    }

    async fn get_alias_owner(&self, hashed_alias: &str) -> StorageResult<Option<String>> {
        aliases::find_owner(&self.pool, &self.tenant, hashed_alias).await
    }

    async fn add_credential(&self, credential: &StoredCredential) -> StorageResult<()> {
        credentials::insert(&self.pool, &self.tenant, credential).await
    }

    async fn update_credential_counter(
        &self,
        credential_id: &[u8],
        counter: u32,
        country: &str,
        device: &str,
        used_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        credentials::update_counter(
            &self.pool,
            &self.tenant,
            credential_id,
            counter,
            country,
            device,
            used_at,
        )
        .await
    }

    async fn credential_id_exists(&self, credential_id: &[u8]) -> StorageResult<bool> {
        credentials::exists(&self.pool, &self.tenant, credential_id).await
    }

    async fn get_token_keys(&self) -> StorageResult<Vec<TokenKey>> {
        token_keys::list(&self.pool, &self.tenant).await
    }

    async fn add_token_key(&self, key: &TokenKey) -> StorageResult<()> {
        token_keys::insert(&self.pool, &self.tenant, key).await
    }

    async fn remove_token_key(&self, key_id: i32) -> StorageResult<()> {
        token_keys::delete(&self.pool, &self.tenant, key_id).await
    }

    async fn store_alias(&self, user_id: &str, records: &[AliasRecord]) -> StorageResult<()> {
        aliases::replace(&self.pool, &self.tenant, user_id, records).await
    }

    async fn migrate_alias(
        &self,
        user_id: &str,
        legacy_hash: &str,
        new_hash: &str,
    ) -> StorageResult<()> {
        aliases::migrate(&self.pool, &self.tenant, user_id, legacy_hash, new_hash).await
    }

    async fn get_users_count(&self) -> StorageResult<u64> {
        credentials::count_users(&self.pool, &self.tenant).await
    }

    async fn get_authenticator_allow_deny_list(&self) -> StorageResult<AuthenticatorPolicy> {
        settings::get_policy(&self.pool, &self.tenant).await
    }

    async fn get_authentication_configuration(
        &self,
        purpose: &str,
    ) -> StorageResult<Option<AuthenticationConfiguration>> {
        settings::get_configuration(&self.pool, &self.tenant, purpose).await
    }

    async fn update_configuration_last_used(
        &self,
        purpose: &str,
        used_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        settings::touch_configuration(&self.pool, &self.tenant, purpose, used_at).await
    }
}

/// Hands out [`SqliteStorage`] handles sharing one pool.
#[derive(Debug, Clone)]
pub struct SqliteStorageProvider {
    pool: SqlitePool,
}

impl SqliteStorageProvider {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl StorageProvider for SqliteStorageProvider {
    fn tenant(&self, tenant: &str) -> Arc<dyn TenantStorage> {
        Arc::new(SqliteStorage::new(self.pool.clone(), tenant))
    }
}
