//! OAuth token lifecycle for HubSpot portals.
//!
//! [`TokenManager`] owns the mapping from a local session id to a portal's
//! token pair: it writes with portal reconciliation, reads with timestamp
//! normalization, and hands out access tokens that are refreshed first when
//! they are within [`EXPIRY_SKEW_SECS`] of expiring.

pub mod expiry;


pub use expiry::{is_token_expired, Expiry, EXPIRY_SKEW_SECS};

use chrono::TimeDelta;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::clock::{default_clock, Clock};
use crate::error::AppError;
use crate::providers::OAuthProvider;
use crate::store::{TokenRecord, TokenStore};

/// Lifetime assumed when the token endpoint gives none (or a non-positive one).
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Reads, writes and refreshes per-portal tokens.
///
/// No in-process lock serializes writers: two concurrent writes for the same
/// session race at the store and the last upsert wins.
#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    provider: Arc<dyn OAuthProvider>,
    clock: Arc<dyn Clock>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn TokenStore>, provider: Arc<dyn OAuthProvider>) -> Self {
        Self::with_clock(store, provider, default_clock())
    }

    pub fn with_clock(
        store: Arc<dyn TokenStore>,
        provider: Arc<dyn OAuthProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            provider,
            clock,
        }
    }

    /// Upsert a token pair for `user_id`, reconciling on `portal_id`.
    ///
    /// When `portal_id` is already bound to a different session, that session
    /// keeps the binding and receives the new tokens; the record under the
    /// incoming `user_id` (if any) is deleted afterwards. Without a
    /// `portal_id`, any existing binding is carried over.
    pub async fn store_tokens(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_in: Option<i64>,
        portal_id: Option<&str>,
    ) -> Result<TokenRecord, AppError> {
        let expires_in = expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let now = self.clock.now();
        let expires_at = TimeDelta::try_seconds(expires_in)
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or_else(|| {
                warn!("expires_in {expires_in}s out of range for {user_id}, using {DEFAULT_EXPIRES_IN_SECS}s");
                now + TimeDelta::seconds(DEFAULT_EXPIRES_IN_SECS)
            });

        let mut target_user_id = user_id.to_string();
        let mut existing = self.get_tokens(user_id).await;
        let mut orphaned_user_id = None;

        if let Some(portal_id) = portal_id {
            if let Some(by_portal) = self.get_tokens_by_portal(portal_id).await {
                if by_portal.user_id != user_id {
                    if existing.is_some() {
                        orphaned_user_id = Some(user_id.to_string());
                    }
                    info!(
                        "Portal {portal_id} already bound to {}, redirecting write from {user_id}",
                        by_portal.user_id
                    );
                    target_user_id = by_portal.user_id.clone();
                    existing = Some(by_portal);
                }
            }
        }

        let portal_id = portal_id
            .map(String::from)
            .or_else(|| existing.and_then(|r| r.portal_id));

        let record = TokenRecord {
            user_id: target_user_id.clone(),
            portal_id,
            access_token: access_token.to_string(),
            refresh_token: Some(refresh_token.to_string()),
            expires_at: expiry::format_timestamp(expires_at),
            updated_at: now,
        };

        let stored = self.store.upsert(record).await.map_err(|e| {
            error!("Failed to store tokens for {target_user_id}: {e}");
            e
        })?;

        if let Some(orphan) = orphaned_user_id.filter(|o| *o != target_user_id) {
            if let Err(e) = self.store.delete_by_user(&orphan).await {
                warn!("Failed to delete orphaned token for {orphan}: {e}");
            } else {
                info!("Removed orphaned token record {orphan} (portal owned by {target_user_id})");
            }
        }

        Ok(stored)
    }

    /// Fetch the record for `user_id`, or `None` when missing or unreadable.
    pub async fn get_tokens(&self, user_id: &str) -> Option<TokenRecord> {
        match self.store.find_by_user(user_id).await {
            Ok(record) => record.map(normalize),
            Err(e) => {
                error!("Failed to retrieve tokens for {user_id}: {e}");
                None
            }
        }
    }

    /// Fetch the record bound to `portal_id`, or `None` when missing or unreadable.
    pub async fn get_tokens_by_portal(&self, portal_id: &str) -> Option<TokenRecord> {
        if portal_id.is_empty() {
            return None;
        }
        match self.store.find_by_portal(portal_id).await {
            Ok(record) => record.map(normalize),
            Err(e) => {
                error!("Failed to retrieve tokens by portal {portal_id}: {e}");
                None
            }
        }
    }

    /// See [`expiry::is_token_expired`]; evaluated against this manager's clock.
    pub fn is_token_expired<'a>(&self, expires_at: impl Into<Expiry<'a>>) -> bool {
        is_token_expired(expires_at, self.clock.now())
    }

    /// A usable access token for `user_id`, refreshing first if needed.
    ///
    /// `Ok(None)` means the session has never authorized the app.
    pub async fn get_access_token(&self, user_id: &str) -> Result<Option<String>, AppError> {
        let Some(record) = self.get_tokens(user_id).await else {
            return Ok(None);
        };

        if self.is_token_expired(&record.expires_at) {
            info!("Access token for {user_id} expired at {}, refreshing", record.expires_at);
            return self.refresh_access_token(user_id).await.map(Some);
        }

        Ok(Some(record.access_token))
    }

    /// Trade the stored refresh token for a new pair and persist it.
    pub async fn refresh_access_token(&self, user_id: &str) -> Result<String, AppError> {
        let refresh_token = self
            .get_tokens(user_id)
            .await
            .and_then(|r| r.refresh_token)
            .filter(|rt| !rt.is_empty())
            .ok_or_else(|| AppError::MissingCredentials(user_id.to_string()))?;

        let tokens = self.provider.refresh_token(&refresh_token).await.map_err(|e| {
            error!("Error refreshing {} access token for {user_id}: {e}", self.provider.id());
            e
        })?;

        let next_refresh = tokens.refresh_token.unwrap_or(refresh_token);
        self.store_tokens(
            user_id,
            &tokens.access_token,
            &next_refresh,
            tokens.expires_in,
            None,
        )
        .await?;

        Ok(tokens.access_token)
    }

    /// Authorization-code grant: store the resulting pair for `user_id`.
    pub async fn exchange_for_tokens(&self, user_id: &str, code: &str) -> Result<String, AppError> {
        let tokens = self.provider.exchange_code(code).await?;

        let refresh_token = tokens
            .refresh_token
            .filter(|rt| !rt.is_empty())
            .ok_or_else(|| AppError::exchange("token response did not include a refresh token"))?;

        self.store_tokens(
            user_id,
            &tokens.access_token,
            &refresh_token,
            tokens.expires_in,
            None,
        )
        .await?;

        Ok(tokens.access_token)
    }

    /// Attach `portal_id` to the session's record, keeping its remaining lifetime.
    ///
    /// Returns the session id that owns the portal afterwards, which differs
    /// from `user_id` when the portal was already installed from another
    /// session.
    pub async fn bind_portal(&self, user_id: &str, portal_id: &str) -> Result<Option<String>, AppError> {
        let Some(record) = self.get_tokens(user_id).await else {
            return Ok(None);
        };
        let Some(refresh_token) = record.refresh_token.clone() else {
            return Err(AppError::MissingCredentials(user_id.to_string()));
        };

        let remaining = expiry::parse_timestamp(&record.expires_at)
            .map(|t| (t - self.clock.now()).num_seconds());

        let stored = self
            .store_tokens(
                user_id,
                &record.access_token,
                &refresh_token,
                remaining,
                Some(portal_id),
            )
            .await?;

        Ok(Some(stored.user_id))
    }

    /// Delete the record for `user_id`.
    pub async fn delete_tokens(&self, user_id: &str) -> Result<(), AppError> {
        self.store.delete_by_user(user_id).await.map_err(|e| {
            error!("Failed to delete tokens for {user_id}: {e}");
            e
        })
    }

    /// Whether `user_id` has a record with a refresh token. Fails closed.
    pub async fn is_authorized(&self, user_id: &str) -> bool {
        self.get_tokens(user_id)
            .await
            .and_then(|r| r.refresh_token)
            .is_some_and(|rt| !rt.is_empty())
    }

    /// Sessions holding a refresh token, most recently updated first.
    pub async fn authorized_users(&self) -> Vec<String> {
        match self.store.authorized_user_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to retrieve authorized users: {e}");
                Vec::new()
            }
        }
    }

    /// The session to act for on an inbound HubSpot callback.
    ///
    /// Prefers the session bound to `portal_id`. A portal with no binding
    /// falls back only to authorized sessions that are not bound to any
    /// portal; without a portal, the most recently updated authorized
    /// session is used.
    pub async fn resolve_tenant(&self, portal_id: Option<&str>) -> Option<String> {
        let Some(portal_id) = portal_id else {
            return self.authorized_users().await.into_iter().next();
        };

        if let Some(record) = self.get_tokens_by_portal(portal_id).await {
            return Some(record.user_id);
        }

        for user_id in self.authorized_users().await {
            if let Some(record) = self.get_tokens(&user_id).await {
                if record.portal_id.is_none() {
                    info!("Portal {portal_id} has no binding, acting as unbound session {user_id}");
                    return Some(user_id);
                }
            }
        }
        warn!("No session for portal {portal_id}");
        None
    }
}

fn normalize(mut record: TokenRecord) -> TokenRecord {
    record.expires_at = expiry::normalize_timestamp(&record.expires_at);
    record
}
