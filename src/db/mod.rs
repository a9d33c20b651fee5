//! # Tenant Storage
//!
//! The persistence boundary of the core. Every method is scoped to one tenant;
//! [`StorageProvider`] hands out the tenant-bound handle for a request.
//!
//! ## Submodules
//! - `models`: records read and written by the core
//! - `memory`: in-process implementation (tests, single-node demos)
//! - `sqlite`: `sqlx` implementation, built on the query modules
//!   `credentials`, `aliases`, `token_keys` and `settings`
//!
//! ## Guarantees implementations must give
//! - credential ids, alias hashes and token key ids are unique per tenant;
//!   a duplicate insert is reported as [`StorageError::Conflict`]
//! - [`TenantStorage::update_credential_counter`] is compare-and-set
//! - [`TenantStorage::store_alias`] is all-or-nothing

pub mod aliases;
pub mod credentials;
pub mod memory;
pub mod models;
pub mod settings;
pub mod sqlite;
pub mod token_keys;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use models::{
    AliasRecord, AuthenticationConfiguration, AuthenticatorPolicy, StoredCredential, TokenKey,
};

#[derive(Error, Debug)]
pub enum StorageError {
    /// A unique value is already taken.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be interpreted.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Storage operations for a single tenant.
///
/// Every handle is bound to one tenant by its [`StorageProvider`]; no method
/// takes a tenant and none can see another tenant's rows.
#[async_trait]
pub trait TenantStorage: Send + Sync {
    /// All credentials registered to `user_id`, in no particular order.
    async fn get_credentials_by_user_id(&self, user_id: &str)
        -> StorageResult<Vec<StoredCredential>>;

    /// The credential with this raw id, if registered.
    async fn get_credential(&self, credential_id: &[u8])
        -> StorageResult<Option<StoredCredential>>;

    /// Credentials of the user that owns `hashed_alias`.
    async fn get_credentials_by_alias(&self, hashed_alias: &str)
        -> StorageResult<Vec<StoredCredential>>;

    /// User id holding `hashed_alias`.
    async fn get_alias_owner(&self, hashed_alias: &str) -> StorageResult<Option<String>>;

    /// Insert a newly registered credential.
    ///
    /// ## Errors
    /// - `Conflict`: the credential id is already registered
    async fn add_credential(&self, credential: &StoredCredential) -> StorageResult<()>;

    /// Record a successful assertion.
    ///
    /// Applies only if `counter` still advances the stored one (or both are
    /// zero); returns `false` when a concurrent sign-in got there first.
    async fn update_credential_counter(
        &self,
        credential_id: &[u8],
        counter: u32,
        country: &str,
        device: &str,
        used_at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    async fn credential_id_exists(&self, credential_id: &[u8]) -> StorageResult<bool>;

    /// Every stored signing key, retired ones included.
    async fn get_token_keys(&self) -> StorageResult<Vec<TokenKey>>;

    /// ## Errors
    /// - `Conflict`: the key id is taken, usually by a concurrent rotation
    async fn add_token_key(&self, key: &TokenKey) -> StorageResult<()>;

    /// Delete a key; removing an unknown id is not an error.
    async fn remove_token_key(&self, key_id: i32) -> StorageResult<()>;

    /// Replace the alias set of `user_id`.
    ///
    /// Fails with [`StorageError::Conflict`] without modifying anything when
    /// one of the hashes belongs to another user.
    async fn store_alias(&self, user_id: &str, aliases: &[AliasRecord]) -> StorageResult<()>;

    /// Rewrite one legacy alias hash of `user_id` under the current scheme.
    ///
    /// ## Errors
    /// - `Conflict`: `new_hash` already belongs to another user
    async fn migrate_alias(&self, user_id: &str, legacy_hash: &str, new_hash: &str)
        -> StorageResult<()>;

    /// Number of distinct users with at least one credential.
    async fn get_users_count(&self) -> StorageResult<u64>;

    /// The tenant's AAGUID allow and deny lists; empty lists when unset.
    async fn get_authenticator_allow_deny_list(&self) -> StorageResult<AuthenticatorPolicy>;

    /// Sign-in settings stored for `purpose`, if the tenant configured any.
    async fn get_authentication_configuration(
        &self,
        purpose: &str,
    ) -> StorageResult<Option<AuthenticationConfiguration>>;

    /// Stamp `purpose`'s configuration as used; a no-op when it has none.
    async fn update_configuration_last_used(
        &self,
        purpose: &str,
        used_at: DateTime<Utc>,
    ) -> StorageResult<()>;
}

/// Hands out tenant-bound storage handles.
pub trait StorageProvider: Send + Sync {
    fn tenant(&self, tenant: &str) -> Arc<dyn TenantStorage>;
}

/// Map unique-constraint violations to [`StorageError::Conflict`].
pub(crate) fn conflict_on_unique(err: sqlx::Error, what: &str) -> StorageError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::Conflict(what.to_string())
        }
        _ => StorageError::Database(err),
    }
}
