use async_trait::async_trait;
use serde_json::Value;

use super::traits::{OAuthProvider, TokenSet};
use crate::config::Config;
use crate::error::AppError;

/// HubSpot OAuth 2.0 provider.
///
/// Quirks:
/// - The token endpoint lives on the API host (`/oauth/v1/token`), the
///   authorize page on the app host.
/// - `redirect_uri` is sent on refresh as well as on code exchange.
/// - Access tokens live 30 minutes; every refresh returns a refresh token.
pub struct HubSpotProvider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: Vec<String>,
    api_base: String,
    app_base: String,
    http: reqwest::Client,
}

impl HubSpotProvider {
    pub fn new(
        client_id: String,
        client_secret: String,
        redirect_uri: String,
        scopes: Vec<String>,
        api_base: String,
        app_base: String,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            scopes,
            api_base,
            app_base,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.client_id.clone(),
            config.client_secret.clone(),
            config.redirect_uri.clone(),
            config.scopes.clone(),
            config.hubspot_api_base.clone(),
            config.hubspot_app_base.clone(),
        )
    }

    async fn request_tokens(&self, grant: (&str, &str), grant_type: &str) -> Result<TokenSet, AppError> {
        let resp = self
            .http
            .post(format!("{}/oauth/v1/token", self.api_base))
            .form(&[
                ("grant_type", grant_type),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                grant,
            ])
            .send()
            .await
            .map_err(|e| AppError::exchange(format!("Token request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!("Error exchanging {grant_type} for access token: {status} {body}");
            let payload = serde_json::from_str::<Value>(&body).ok();
            let message = payload
                .as_ref()
                .and_then(|p| p.get("message"))
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| format!("HubSpot token endpoint returned {status}"));
            return Err(AppError::Exchange { message, payload });
        }

        resp.json()
            .await
            .map_err(|e| AppError::exchange(format!("Failed to parse token response: {e}")))
    }
}

#[async_trait]
impl OAuthProvider for HubSpotProvider {
    fn id(&self) -> &str {
        "hubspot"
    }

    fn auth_url(&self) -> String {
        format!(
            "{app_base}/oauth/authorize?\
             client_id={client_id}\
             &scope={scope}\
             &redirect_uri={redirect_uri}",
            app_base = self.app_base,
            client_id = urlencoding(&self.client_id),
            scope = urlencoding(&self.scopes.join(" ")),
            redirect_uri = urlencoding(&self.redirect_uri),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, AppError> {
        self.request_tokens(("code", code), "authorization_code").await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AppError> {
        self.request_tokens(("refresh_token", refresh_token), "refresh_token")
            .await
    }
}

fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
