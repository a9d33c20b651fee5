//! Token signing key queries.

use sqlx::SqlitePool;

use super::credentials::parse_timestamp;
use super::models::TokenKey;
use super::{conflict_on_unique, StorageResult};

#[derive(Debug, sqlx::FromRow)]
struct TokenKeyRow {
    key_id: i64,
    key_material: String,
    created_at: String,
}

pub async fn list(pool: &SqlitePool, tenant: &str) -> StorageResult<Vec<TokenKey>> {
    let rows = sqlx::query_as::<_, TokenKeyRow>(
        "SELECT key_id, key_material, created_at FROM token_keys WHERE tenant = ?",
    )
    .bind(tenant)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(TokenKey {
                key_id: i32::try_from(row.key_id).map_err(|_| {
                    super::StorageError::Corrupt(format!("token key id {}", row.key_id))
                })?,
                key_material: row.key_material,
                created_at: parse_timestamp(&row.created_at)?,
            })
        })
        .collect()
}

/// Insert a key; a key id already present for the tenant is a conflict.
pub async fn insert(pool: &SqlitePool, tenant: &str, key: &TokenKey) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO token_keys (tenant, key_id, key_material, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(tenant)
    .bind(key.key_id)
    .bind(&key.key_material)
    .bind(key.created_at.to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| conflict_on_unique(e, "token key id"))?;

    Ok(())
}

pub async fn delete(pool: &SqlitePool, tenant: &str, key_id: i32) -> StorageResult<()> {
    sqlx::query("DELETE FROM token_keys WHERE tenant = ? AND key_id = ?")
        .bind(tenant)
        .bind(key_id)
        .execute(pool)
        .await?;

    Ok(())
}
