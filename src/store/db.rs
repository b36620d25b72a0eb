//! PostgreSQL-backed token store.
//!
//! Table `hubspot_tokens`: one row per session, at most one per portal.
//! `expires_at` is TEXT so rows written by older deployments (ISO strings
//! without a zone) survive and are normalized on read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::{TokenRecord, TokenStore};
use crate::error::AppError;

const SELECT_COLUMNS: &str =
    "user_id, portal_id, access_token, refresh_token, expires_at, updated_at";

/// Token store backed by PostgreSQL.
pub struct PostgresTokenStore {
    pool: PgPool,
}

impl PostgresTokenStore {
    pub async fn new(db_url: &str) -> Result<Self, AppError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(db_url)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to PostgreSQL: {e}")))?;

        Ok(Self { pool })
    }

    /// Create the table if this is a fresh database.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hubspot_tokens (
                user_id         TEXT PRIMARY KEY,
                portal_id       TEXT UNIQUE,
                access_token    TEXT NOT NULL,
                refresh_token   TEXT,
                expires_at      TEXT NOT NULL,
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_hubspot_tokens_authorized ON hubspot_tokens(updated_at DESC) WHERE refresh_token IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn record_from_row(row: &PgRow) -> Result<TokenRecord, AppError> {
    Ok(TokenRecord {
        user_id: row.try_get("user_id")?,
        portal_id: row.try_get("portal_id")?,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        expires_at: row.try_get("expires_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl TokenStore for PostgresTokenStore {
    async fn upsert(&self, record: TokenRecord) -> Result<TokenRecord, AppError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO hubspot_tokens
                (user_id, portal_id, access_token, refresh_token, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id)
            DO UPDATE SET
                portal_id = EXCLUDED.portal_id,
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                updated_at = EXCLUDED.updated_at
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(&record.user_id)
        .bind(&record.portal_id)
        .bind(&record.access_token)
        .bind(&record.refresh_token)
        .bind(&record.expires_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await?;

        record_from_row(&row)
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Option<TokenRecord>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM hubspot_tokens WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_by_portal(&self, portal_id: &str) -> Result<Option<TokenRecord>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM hubspot_tokens WHERE portal_id = $1"
        ))
        .bind(portal_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM hubspot_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn authorized_user_ids(&self) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id
            FROM hubspot_tokens
            WHERE refresh_token IS NOT NULL
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
    }
}
