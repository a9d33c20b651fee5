//! In-memory tenant storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::models::{
    AliasRecord, AuthenticationConfiguration, AuthenticatorPolicy, StoredCredential, TokenKey,
};
use super::{StorageError, StorageProvider, StorageResult, TenantStorage};
use crate::fido2::verifier::counter_advanced;

#[derive(Debug, Clone)]
struct AliasEntry {
    user_id: String,
    plaintext: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    credentials: Vec<StoredCredential>,
    aliases: HashMap<String, AliasEntry>,
    keys: Vec<TokenKey>,
    policy: AuthenticatorPolicy,
    configurations: HashMap<String, AuthenticationConfiguration>,
}

/// One tenant's data held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_authenticator_policy(&self, policy: AuthenticatorPolicy) {
        self.inner.write().await.policy = policy;
    }

    pub async fn set_authentication_configuration(&self, configuration: AuthenticationConfiguration) {
        self.inner
            .write()
            .await
            .configurations
            .insert(configuration.purpose.clone(), configuration);
    }

    /// Plaintext stored next to an alias hash, if any.
    pub async fn alias_plaintext(&self, hashed_alias: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .aliases
            .get(hashed_alias)
            .and_then(|entry| entry.plaintext.clone())
    }

    /// Insert an alias hash directly, bypassing the ownership rules.
    pub async fn insert_alias_record(&self, user_id: &str, record: AliasRecord) {
        self.inner.write().await.aliases.insert(
            record.hashed_alias,
            AliasEntry {
                user_id: user_id.to_string(),
                plaintext: record.plaintext,
            },
        );
    }
}

#[async_trait]
impl TenantStorage for MemoryStorage {
    async fn get_credentials_by_user_id(
        &self,
        user_id: &str,
    ) -> StorageResult<Vec<StoredCredential>> {
        let inner = self.inner.read().await;
        Ok(inner
            .credentials
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_credential(&self, credential_id: &[u8]) -> StorageResult<Option<StoredCredential>> {
        let inner = self.inner.read().await;
        Ok(inner
            .credentials
            .iter()
            .find(|c| c.credential_id() == credential_id)
            .cloned())
    }

    async fn get_credentials_by_alias(
        &self,
        hashed_alias: &str,
    ) -> StorageResult<Vec<StoredCredential>> {
        let owner = match self.get_alias_owner(hashed_alias).await? {
            Some(owner) => owner,
            None => return Ok(Vec::new()),
        };
        self.get_credentials_by_user_id(&owner).await
    }

    async fn get_alias_owner(&self, hashed_alias: &str) -> StorageResult<Option<String>> {
        let inner = self.inner.read().await;
        Ok(inner.aliases.get(hashed_alias).map(|e| e.user_id.clone()))
    }

    async fn add_credential(&self, credential: &StoredCredential) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if inner
            .credentials
            .iter()
            .any(|c| c.credential_id() == credential.credential_id())
        {
            return Err(StorageError::Conflict("credential id".into()));
        }
        inner.credentials.push(credential.clone());
        Ok(())
    }

    async fn update_credential_counter(
        &self,
        credential_id: &[u8],
        counter: u32,
        country: &str,
        device: &str,
        used_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(credential) = inner
            .credentials
            .iter_mut()
            .find(|c| c.credential_id() == credential_id)
        else {
            return Ok(false);
        };

        if !counter_advanced(credential.signature_counter, counter) {
            return Ok(false);
        }
        credential.signature_counter = counter;
        credential.country = country.to_string();
        credential.device = device.to_string();
        credential.last_used_at = used_at;
        Ok(true)
    }

    async fn credential_id_exists(&self, credential_id: &[u8]) -> StorageResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .credentials
            .iter()
            .any(|c| c.credential_id() == credential_id))
    }

    async fn get_token_keys(&self) -> StorageResult<Vec<TokenKey>> {
        Ok(self.inner.read().await.keys.clone())
    }

    async fn add_token_key(&self, key: &TokenKey) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if inner.keys.iter().any(|k| k.key_id == key.key_id) {
            return Err(StorageError::Conflict("token key id".into()));
        }
        inner.keys.push(key.clone());
        Ok(())
    }

    async fn remove_token_key(&self, key_id: i32) -> StorageResult<()> {
        self.inner.write().await.keys.retain(|k| k.key_id != key_id);
        Ok(())
    }

    async fn store_alias(&self, user_id: &str, aliases: &[AliasRecord]) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        let taken = aliases.iter().any(|record| {
            inner
                .aliases
                .get(&record.hashed_alias)
                .is_some_and(|entry| entry.user_id != user_id)
        });
        if taken {
            return Err(StorageError::Conflict("alias".into()));
        }

        inner.aliases.retain(|_, entry| entry.user_id != user_id);
        for record in aliases {
            inner.aliases.insert(
                record.hashed_alias.clone(),
                AliasEntry {
                    user_id: user_id.to_string(),
                    plaintext: record.plaintext.clone(),
                },
            );
        }
        Ok(())
    }

    async fn migrate_alias(
        &self,
        user_id: &str,
        legacy_hash: &str,
        new_hash: &str,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if inner
            .aliases
            .get(new_hash)
            .is_some_and(|entry| entry.user_id != user_id)
        {
            return Err(StorageError::Conflict("alias".into()));
        }

        let plaintext = match inner.aliases.get(legacy_hash) {
            Some(entry) if entry.user_id == user_id => entry.plaintext.clone(),
            _ => None,
        };
        inner.aliases.remove(legacy_hash);
        inner.aliases.insert(
            new_hash.to_string(),
            AliasEntry {
                user_id: user_id.to_string(),
                plaintext,
            },
        );
        Ok(())
    }

    async fn get_users_count(&self) -> StorageResult<u64> {
        let inner = self.inner.read().await;
        let mut users: Vec<&str> = inner.credentials.iter().map(|c| c.user_id.as_str()).collect();
        users.sort_unstable();
        users.dedup();
        Ok(users.len() as u64)
    }

    async fn get_authenticator_allow_deny_list(&self) -> StorageResult<AuthenticatorPolicy> {
        Ok(self.inner.read().await.policy.clone())
    }

    async fn get_authentication_configuration(
        &self,
        purpose: &str,
    ) -> StorageResult<Option<AuthenticationConfiguration>> {
        Ok(self.inner.read().await.configurations.get(purpose).cloned())
    }

    async fn update_configuration_last_used(
        &self,
        purpose: &str,
        used_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        if let Some(configuration) = self.inner.write().await.configurations.get_mut(purpose) {
            configuration.last_used_at = Some(used_at);
        }
        Ok(())
    }
}

/// Keeps one [`MemoryStorage`] per tenant for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryStorageProvider {
    tenants: Mutex<HashMap<String, Arc<MemoryStorage>>>,
}

impl MemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete handle, for seeding test data.
    pub fn memory(&self, tenant: &str) -> Arc<MemoryStorage> {
        let mut tenants = self
            .tenants
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tenants
            .entry(tenant.to_string())
            .or_insert_with(|| Arc::new(MemoryStorage::new()))
            .clone()
    }
}

impl StorageProvider for MemoryStorageProvider {
    fn tenant(&self, tenant: &str) -> Arc<dyn TenantStorage> {
        self.memory(tenant)
    }
}
