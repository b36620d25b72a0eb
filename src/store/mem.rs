use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{TokenRecord, TokenStore};
use crate::error::AppError;

/// In-memory token store for development and tests.
///
/// Mirrors the table's uniqueness rules: `user_id` is the key and a
/// `portal_id` may belong to a single user only. Not durable.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<String, TokenRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn upsert(&self, record: TokenRecord) -> Result<TokenRecord, AppError> {
        let mut tokens = self.tokens.write().await;

        if let Some(portal_id) = &record.portal_id {
            let taken = tokens
                .values()
                .any(|r| r.user_id != record.user_id && r.portal_id.as_ref() == Some(portal_id));
            if taken {
                return Err(AppError::Database(format!(
                    "duplicate key value violates unique constraint on portal_id ({portal_id})"
                )));
            }
        }

        tokens.insert(record.user_id.clone(), record.clone());
        Ok(record)
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Option<TokenRecord>, AppError> {
        Ok(self.tokens.read().await.get(user_id).cloned())
    }

    async fn find_by_portal(&self, portal_id: &str) -> Result<Option<TokenRecord>, AppError> {
        Ok(self
            .tokens
            .read()
            .await
            .values()
            .find(|r| r.portal_id.as_deref() == Some(portal_id))
            .cloned())
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<(), AppError> {
        self.tokens.write().await.remove(user_id);
        Ok(())
    }

    async fn authorized_user_ids(&self) -> Result<Vec<String>, AppError> {
        let tokens = self.tokens.read().await;
        let mut authorized: Vec<&TokenRecord> =
            tokens.values().filter(|r| r.refresh_token.is_some()).collect();
        authorized.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(authorized.into_iter().map(|r| r.user_id.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};

    fn record(user_id: &str, portal_id: Option<&str>) -> TokenRecord {
        TokenRecord {
            user_id: user_id.into(),
            portal_id: portal_id.map(String::from),
            access_token: format!("access-{user_id}"),
            refresh_token: Some(format!("refresh-{user_id}")),
            expires_at: "2030-01-01T00:00:00.000Z".into(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_user_id() {
        let store = MemoryTokenStore::new();
        store.upsert(record("u1", None)).await.unwrap();

        let mut updated = record("u1", Some("p1"));
        updated.access_token = "newer".into();
        store.upsert(updated).await.unwrap();

        assert_eq!(store.len().await, 1);
        let found = store.find_by_user("u1").await.unwrap().unwrap();
        assert_eq!(found.access_token, "newer");
        assert_eq!(found.portal_id.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn test_portal_id_is_unique() {
        let store = MemoryTokenStore::new();
        store.upsert(record("u1", Some("p1"))).await.unwrap();

        let err = store.upsert(record("u2", Some("p1"))).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
        assert!(store.find_by_user("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_portal() {
        let store = MemoryTokenStore::new();
        store.upsert(record("u1", Some("p1"))).await.unwrap();
        store.upsert(record("u2", None)).await.unwrap();

        let found = store.find_by_portal("p1").await.unwrap().unwrap();
        assert_eq!(found.user_id, "u1");
        assert!(store.find_by_portal("p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let store = MemoryTokenStore::new();
        store.delete_by_user("nobody").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_authorized_user_ids_newest_first_and_skips_null_refresh() {
        let store = MemoryTokenStore::new();
        let now = Utc::now();

        let mut old = record("old", None);
        old.updated_at = now - TimeDelta::hours(1);
        let mut fresh = record("fresh", None);
        fresh.updated_at = now;
        let mut revoked = record("revoked", None);
        revoked.refresh_token = None;

        store.upsert(old).await.unwrap();
        store.upsert(fresh).await.unwrap();
        store.upsert(revoked).await.unwrap();

        assert_eq!(store.authorized_user_ids().await.unwrap(), vec!["fresh", "old"]);
    }
}
