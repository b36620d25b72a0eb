//! Token store: persistence for per-portal HubSpot OAuth tokens.
//!
//! The store is a plain keyed table. All lifecycle rules (portal
//! reconciliation, expiry, refresh) live in [`crate::tokens`].

pub mod db;
pub mod mem;

pub use db::PostgresTokenStore;
pub use mem::MemoryTokenStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;

/// One row of `hubspot_tokens`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    /// Local session identifier. Primary key.
    pub user_id: String,
    /// HubSpot portal (tenant) id, unique when present.
    pub portal_id: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// ISO-8601 expiry of `access_token`. Written with a `Z` suffix; legacy
    /// rows may lack a timezone marker.
    pub expires_at: String,
    pub updated_at: DateTime<Utc>,
}

/// Keyed persistent table of token records.
///
/// `user_id` is unique and the upsert conflict target; `portal_id` is
/// expected to be unique as well and implementations reject a write that
/// would bind one portal to two users.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert or replace the record keyed by `record.user_id`.
    async fn upsert(&self, record: TokenRecord) -> Result<TokenRecord, AppError>;

    async fn find_by_user(&self, user_id: &str) -> Result<Option<TokenRecord>, AppError>;

    async fn find_by_portal(&self, portal_id: &str) -> Result<Option<TokenRecord>, AppError>;

    /// Delete the record for `user_id`. Deleting a missing record is not an error.
    async fn delete_by_user(&self, user_id: &str) -> Result<(), AppError>;

    /// `user_id`s whose refresh token is not null, most recently updated first.
    async fn authorized_user_ids(&self) -> Result<Vec<String>, AppError>;
}
