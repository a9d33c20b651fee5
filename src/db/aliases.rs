//! # Alias Queries
//!
//! `(tenant, hashed_alias)` is unique in the `aliases` table, so an
//! alias can belong to one user only.

use chrono::Utc;
use sqlx::SqlitePool;

use super::models::AliasRecord;
use super::{conflict_on_unique, StorageError, StorageResult};

pub async fn find_owner(
    pool: &SqlitePool,
    tenant: &str,
    hashed_alias: &str,
) -> StorageResult<Option<String>> {
    let owner = sqlx::query_scalar("SELECT user_id FROM aliases WHERE tenant = ? AND hashed_alias = ?")
        .bind(tenant)
        .bind(hashed_alias)
        .fetch_optional(pool)
        .await?;

    Ok(owner)
}

/// Replace the aliases of `user_id` in one transaction.
///
/// ## Flow
/// 1. Check that no hash belongs to someone else (conflict → roll back)
/// 2. Delete the user's current aliases
/// 3. Insert the new set
pub async fn replace(
    pool: &SqlitePool,
    tenant: &str,
    user_id: &str,
    aliases: &[AliasRecord],
) -> StorageResult<()> {
    let mut tx = pool.begin().await?;

    for record in aliases {
        let owner: Option<String> =
            sqlx::query_scalar("SELECT user_id FROM aliases WHERE tenant = ? AND hashed_alias = ?")
                .bind(tenant)
                .bind(&record.hashed_alias)
                .fetch_optional(&mut *tx)
                .await?;
        if owner.is_some_and(|owner| owner != user_id) {
            return Err(StorageError::Conflict("alias".into()));
        }
    }

    sqlx::query("DELETE FROM aliases WHERE tenant = ? AND user_id = ?")
        .bind(tenant)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    let now = Utc::now().to_rfc3339();
    for record in aliases {
        sqlx::query(
            "INSERT INTO aliases (tenant, hashed_alias, user_id, plaintext, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(tenant)
        .bind(&record.hashed_alias)
        .bind(user_id)
        .bind(&record.plaintext)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, "alias"))?;
    }

    tx.commit().await?;
    Ok(())
}

/// Rewrite a legacy hash of `user_id` in place, keeping its plaintext.
///
/// When the user already owns the new hash the legacy row is just dropped.
pub async fn migrate(
    pool: &SqlitePool,
    tenant: &str,
    user_id: &str,
    legacy_hash: &str,
    new_hash: &str,
) -> StorageResult<()> {
    let mut tx = pool.begin().await?;

    let owner: Option<String> =
        sqlx::query_scalar("SELECT user_id FROM aliases WHERE tenant = ? AND hashed_alias = ?")
            .bind(tenant)
            .bind(new_hash)
            .fetch_optional(&mut *tx)
            .await?;

    match owner {
        Some(owner) if owner != user_id => return Err(StorageError::Conflict("alias".into())),
        Some(_) => {
            sqlx::query("DELETE FROM aliases WHERE tenant = ? AND user_id = ? AND hashed_alias = ?")
                .bind(tenant)
                .bind(user_id)
                .bind(legacy_hash)
                .execute(&mut *tx)
                .await?;
        }
        None => {
            sqlx::query(
                "UPDATE aliases SET hashed_alias = ?
                 WHERE tenant = ? AND user_id = ? AND hashed_alias = ?",
            )
            .bind(new_hash)
            .bind(tenant)
            .bind(user_id)
            .bind(legacy_hash)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_on_unique(e, "alias"))?;
        }
    }

    tx.commit().await?;
    Ok(())
}
