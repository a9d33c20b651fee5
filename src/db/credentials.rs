//! # Credential Queries
//!
//! SQLite operations on the `credentials` table. Every query is scoped by the
//! `tenant` column.
//!
//! ## Storage format
//! - ids, user handles and public keys are BLOBs
//! - transports are a JSON array of strings
//! - timestamps are RFC 3339 text
//! - the AAGUID is its hyphenated string form

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::models::StoredCredential;
use super::{conflict_on_unique, StorageError, StorageResult};
use crate::fido2::model::{AuthenticatorTransport, CredentialDescriptor};

const COLUMNS: &str = "c.credential_id, c.user_id, c.user_handle, c.public_key, \
     c.signature_counter, c.transports, c.attestation_fmt, c.aaguid, c.rp_id, c.origin, \
     c.country, c.device, c.nickname, c.backup_state, c.is_backup_eligible, c.is_discoverable, \
     c.created_at, c.last_used_at";

/// Row shape of the `credentials` table.
#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    credential_id: Vec<u8>,
    user_id: String,
    user_handle: Vec<u8>,
    public_key: Vec<u8>,
    signature_counter: i64,
    transports: Option<String>,
    attestation_fmt: String,
    aaguid: String,
    rp_id: String,
    origin: String,
    country: String,
    device: String,
    nickname: Option<String>,
    backup_state: bool,
    is_backup_eligible: bool,
    is_discoverable: Option<bool>,
    created_at: String,
    last_used_at: String,
}

impl TryFrom<CredentialRow> for StoredCredential {
    type Error = StorageError;

    fn try_from(row: CredentialRow) -> StorageResult<Self> {
        let transports = row
            .transports
            .as_deref()
            .map(serde_json::from_str::<Vec<AuthenticatorTransport>>)
            .transpose()
            .map_err(|_| StorageError::Corrupt("credential transports".into()))?;
        let aaguid = Uuid::parse_str(&row.aaguid)
            .map_err(|_| StorageError::Corrupt("credential aaguid".into()))?;
        let signature_counter = u32::try_from(row.signature_counter)
            .map_err(|_| StorageError::Corrupt("signature counter".into()))?;

        Ok(StoredCredential {
            descriptor: CredentialDescriptor::new(row.credential_id, transports),
            public_key: row.public_key,
            user_handle: row.user_handle,
            user_id: row.user_id,
            signature_counter,
            attestation_fmt: row.attestation_fmt,
            created_at: parse_timestamp(&row.created_at)?,
            last_used_at: parse_timestamp(&row.last_used_at)?,
            rp_id: row.rp_id,
            origin: row.origin,
            country: row.country,
            device: row.device,
            nickname: row.nickname,
            aaguid,
            backup_state: row.backup_state,
            is_backup_eligible: row.is_backup_eligible,
            is_discoverable: row.is_discoverable,
        })
    }
}

pub(crate) fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StorageError::Corrupt(format!("timestamp '{value}'")))
}

fn into_credentials(rows: Vec<CredentialRow>) -> StorageResult<Vec<StoredCredential>> {
    rows.into_iter().map(StoredCredential::try_from).collect()
}

/// Save a new credential.
///
/// A credential id that is already registered for the tenant is a conflict.
pub async fn insert(
    pool: &SqlitePool,
    tenant: &str,
    credential: &StoredCredential,
) -> StorageResult<()> {
    let transports = credential
        .descriptor
        .transports
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StorageError::Corrupt(e.to_string()))?;

    sqlx::query(
        "INSERT INTO credentials
         (tenant, credential_id, user_id, user_handle, public_key, signature_counter, transports,
          attestation_fmt, aaguid, rp_id, origin, country, device, nickname, backup_state,
          is_backup_eligible, is_discoverable, created_at, last_used_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(tenant)
    .bind(credential.credential_id())
    .bind(&credential.user_id)
    .bind(&credential.user_handle)
    .bind(&credential.public_key)
    .bind(i64::from(credential.signature_counter))
    .bind(transports)
    .bind(&credential.attestation_fmt)
    .bind(credential.aaguid.to_string())
    .bind(&credential.rp_id)
    .bind(&credential.origin)
    .bind(&credential.country)
    .bind(&credential.device)
    .bind(&credential.nickname)
    .bind(credential.backup_state)
    .bind(credential.is_backup_eligible)
    .bind(credential.is_discoverable)
    .bind(credential.created_at.to_rfc3339())
    .bind(credential.last_used_at.to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| conflict_on_unique(e, "credential id"))?;

    Ok(())
}

pub async fn find_by_user_id(
    pool: &SqlitePool,
    tenant: &str,
    user_id: &str,
) -> StorageResult<Vec<StoredCredential>> {
    let rows = sqlx::query_as::<_, CredentialRow>(&format!(
        "SELECT {COLUMNS} FROM credentials c
         WHERE c.tenant = ? AND c.user_id = ?
         ORDER BY c.created_at"
    ))
    .bind(tenant)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    into_credentials(rows)
}

pub async fn find_by_id(
    pool: &SqlitePool,
    tenant: &str,
    credential_id: &[u8],
) -> StorageResult<Option<StoredCredential>> {
    let row = sqlx::query_as::<_, CredentialRow>(&format!(
        "SELECT {COLUMNS} FROM credentials c WHERE c.tenant = ? AND c.credential_id = ?"
    ))
    .bind(tenant)
    .bind(credential_id)
    .fetch_optional(pool)
    .await?;

    row.map(StoredCredential::try_from).transpose()
}

/// Credentials of whoever owns `hashed_alias`.
pub async fn find_by_alias(
    pool: &SqlitePool,
    tenant: &str,
    hashed_alias: &str,
) -> StorageResult<Vec<StoredCredential>> {
    let rows = sqlx::query_as::<_, CredentialRow>(&format!(
        "SELECT {COLUMNS} FROM credentials c
         JOIN aliases a ON a.tenant = c.tenant AND a.user_id = c.user_id
         WHERE a.tenant = ? AND a.hashed_alias = ?
         ORDER BY c.created_at"
    ))
    .bind(tenant)
    .bind(hashed_alias)
    .fetch_all(pool)
    .await?;

    into_credentials(rows)
}

pub async fn exists(pool: &SqlitePool, tenant: &str, credential_id: &[u8]) -> StorageResult<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM credentials WHERE tenant = ? AND credential_id = ?",
    )
    .bind(tenant)
    .bind(credential_id)
    .fetch_optional(pool)
    .await?;

    Ok(found.is_some())
}

/// Compare-and-set update after a successful assertion.
///
/// The `WHERE` clause repeats the anti-cloning rule so two sign-ins racing
/// with the same counter cannot both succeed.
pub async fn update_counter(
    pool: &SqlitePool,
    tenant: &str,
    credential_id: &[u8],
    counter: u32,
    country: &str,
    device: &str,
    used_at: DateTime<Utc>,
) -> StorageResult<bool> {
    let counter = i64::from(counter);
    let result = sqlx::query(
        "UPDATE credentials
         SET signature_counter = ?, country = ?, device = ?, last_used_at = ?
         WHERE tenant = ? AND credential_id = ?
           AND ((signature_counter = 0 AND ? = 0) OR ? > signature_counter)",
    )
    .bind(counter)
    .bind(country)
    .bind(device)
    .bind(used_at.to_rfc3339())
    .bind(tenant)
    .bind(credential_id)
    .bind(counter)
    .bind(counter)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn count_users(pool: &SqlitePool, tenant: &str) -> StorageResult<u64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(DISTINCT user_id) FROM credentials WHERE tenant = ?")
            .bind(tenant)
            .fetch_one(pool)
            .await?;

    Ok(count.max(0) as u64)
}
