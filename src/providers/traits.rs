use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AppError;

/// A set of tokens returned from the token endpoint after code exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds. Anything that is not a JSON number reads as `None`.
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<i64>,
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))))
}

/// The remote OAuth token exchange.
///
/// Implementations own the client credentials and redirect URI, so callers
/// only hand over the grant material.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Provider identifier used in logs (e.g. "hubspot").
    fn id(&self) -> &str;

    /// Build the authorization URL the installing user is redirected to.
    fn auth_url(&self) -> String;

    /// Exchange an authorization code for an access/refresh token pair.
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, AppError>;

    /// Trade a refresh token for a new access/refresh token pair.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_set_non_numeric_expiry_reads_as_none() {
        let set: TokenSet = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","expires_in":"soon"}"#,
        )
        .unwrap();
        assert_eq!(set.expires_in, None);

        let set: TokenSet =
            serde_json::from_str(r#"{"access_token":"a","refresh_token":"r"}"#).unwrap();
        assert_eq!(set.expires_in, None);

        let set: TokenSet = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","expires_in":1800}"#,
        )
        .unwrap();
        assert_eq!(set.expires_in, Some(1800));
    }
}
