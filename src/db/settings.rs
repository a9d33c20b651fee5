//! # Tenant Settings Queries
//!
//! Authenticator allow/deny lists and per-purpose sign-in configuration.
//! The core only reads these (and touches `last_used_at`); the setters exist
//! for administration tooling and tests.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::credentials::parse_timestamp;
use super::models::{AuthenticationConfiguration, AuthenticatorPolicy};
use super::{StorageError, StorageResult};
use crate::fido2::model::{CredentialHint, UserVerification};

#[derive(Debug, sqlx::FromRow)]
struct PolicyRow {
    aaguid: String,
    allowed: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct ConfigurationRow {
    purpose: String,
    user_verification: String,
    time_to_live_seconds: i64,
    hints: String,
    last_used_at: Option<String>,
}

impl TryFrom<ConfigurationRow> for AuthenticationConfiguration {
    type Error = StorageError;

    fn try_from(row: ConfigurationRow) -> StorageResult<Self> {
        let user_verification: UserVerification =
            serde_json::from_value(serde_json::Value::String(row.user_verification))
                .map_err(|_| StorageError::Corrupt("user verification".into()))?;
        let hints: Vec<CredentialHint> = serde_json::from_str(&row.hints)
            .map_err(|_| StorageError::Corrupt("configuration hints".into()))?;

        Ok(AuthenticationConfiguration {
            purpose: row.purpose,
            user_verification,
            time_to_live: Duration::seconds(row.time_to_live_seconds),
            hints,
            last_used_at: row.last_used_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

pub async fn get_policy(pool: &SqlitePool, tenant: &str) -> StorageResult<AuthenticatorPolicy> {
    let rows = sqlx::query_as::<_, PolicyRow>(
        "SELECT aaguid, allowed FROM authenticator_policy WHERE tenant = ?",
    )
    .bind(tenant)
    .fetch_all(pool)
    .await?;

    let mut policy = AuthenticatorPolicy::default();
    for row in rows {
        let aaguid = Uuid::parse_str(&row.aaguid)
            .map_err(|_| StorageError::Corrupt(format!("policy aaguid '{}'", row.aaguid)))?;
        if row.allowed {
            policy.allow.push(aaguid);
        } else {
            policy.deny.push(aaguid);
        }
    }
    Ok(policy)
}

/// Replace the tenant's allow/deny lists.
pub async fn set_policy(
    pool: &SqlitePool,
    tenant: &str,
    policy: &AuthenticatorPolicy,
) -> StorageResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM authenticator_policy WHERE tenant = ?")
        .bind(tenant)
        .execute(&mut *tx)
        .await?;

    let entries = policy
        .allow
        .iter()
        .map(|a| (a, true))
        .chain(policy.deny.iter().map(|a| (a, false)));
    for (aaguid, allowed) in entries {
        sqlx::query("INSERT INTO authenticator_policy (tenant, aaguid, allowed) VALUES (?, ?, ?)")
            .bind(tenant)
            .bind(aaguid.to_string())
            .bind(allowed)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn get_configuration(
    pool: &SqlitePool,
    tenant: &str,
    purpose: &str,
) -> StorageResult<Option<AuthenticationConfiguration>> {
    let row = sqlx::query_as::<_, ConfigurationRow>(
        "SELECT purpose, user_verification, time_to_live_seconds, hints, last_used_at
         FROM authentication_configurations WHERE tenant = ? AND purpose = ?",
    )
    .bind(tenant)
    .bind(purpose)
    .fetch_optional(pool)
    .await?;

    row.map(AuthenticationConfiguration::try_from).transpose()
}

/// Insert or replace the configuration for `configuration.purpose`.
pub async fn upsert_configuration(
    pool: &SqlitePool,
    tenant: &str,
    configuration: &AuthenticationConfiguration,
) -> StorageResult<()> {
    let user_verification = serde_json::to_value(configuration.user_verification)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| StorageError::Corrupt("user verification".into()))?;
    let hints = serde_json::to_string(&configuration.hints)
        .map_err(|e| StorageError::Corrupt(e.to_string()))?;

    sqlx::query(
        "INSERT INTO authentication_configurations
         (tenant, purpose, user_verification, time_to_live_seconds, hints, last_used_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (tenant, purpose) DO UPDATE SET
           user_verification = excluded.user_verification,
           time_to_live_seconds = excluded.time_to_live_seconds,
           hints = excluded.hints",
    )
    .bind(tenant)
    .bind(&configuration.purpose)
    .bind(user_verification)
    .bind(configuration.time_to_live.num_seconds())
    .bind(hints)
    .bind(configuration.last_used_at.map(|t| t.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn touch_configuration(
    pool: &SqlitePool,
    tenant: &str,
    purpose: &str,
    used_at: DateTime<Utc>,
) -> StorageResult<()> {
    sqlx::query(
        "UPDATE authentication_configurations SET last_used_at = ?
         WHERE tenant = ? AND purpose = ?",
    )
    .bind(used_at.to_rfc3339())
    .bind(tenant)
    .bind(purpose)
    .execute(pool)
    .await?;

    Ok(())
}
