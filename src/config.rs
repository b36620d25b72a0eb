use anyhow::{bail, Context, Result};
use rand::RngCore;

const DEFAULT_SCOPES: &[&str] = &[
    "oauth",
    "crm.objects.contacts.read",
    "crm.objects.contacts.write",
    "crm.objects.companies.read",
    "crm.objects.deals.read",
    "tickets",
    "crm.objects.companies.write",
    "crm.objects.deals.write",
];

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,

    // ── HubSpot app credentials ─────────────────────────────────────────
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,

    // ── Sessions ────────────────────────────────────────────────────────
    /// HMAC key for the `sid` cookie. Random per process when unset, which
    /// logs every browser out on restart.
    pub session_secret: Vec<u8>,

    // ── Database ────────────────────────────────────────────────────────
    /// PostgreSQL connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,

    // ── Upstream hosts ──────────────────────────────────────────────────
    pub hubspot_api_base: String,
    pub hubspot_app_base: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let (Some(client_id), Some(client_secret)) = (var("CLIENT_ID"), var("CLIENT_SECRET")) else {
            bail!("CLIENT_ID and CLIENT_SECRET are required (HubSpot app credentials)");
        };

        let port: u16 = var("PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("Invalid PORT")?;

        let session_secret = match var("SESSION_SECRET") {
            Some(secret) => secret.into_bytes(),
            None => {
                let mut key = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut key);
                key
            }
        };

        Ok(Config {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            redirect_uri: var("REDIRECT_URI")
                .unwrap_or_else(|| format!("http://localhost:{port}/oauth-callback")),
            scopes: var("SCOPE")
                .map(|s| parse_scopes(&s))
                .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()),
            client_id,
            client_secret,
            session_secret,
            database_url: var("DATABASE_URL"),
            hubspot_api_base: var("HUBSPOT_API_BASE")
                .unwrap_or_else(|| "https://api.hubapi.com".into())
                .trim_end_matches('/')
                .to_string(),
            hubspot_app_base: var("HUBSPOT_APP_BASE")
                .unwrap_or_else(|| "https://app.hubspot.com".into())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

/// Split a `SCOPE` value on spaces, commas (optionally followed by a space)
/// or literal `%20`.
pub fn parse_scopes(raw: &str) -> Vec<String> {
    raw.replace("%20", " ")
        .split([' ', ','])
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            Config::from_lookup(lookup(&[("CLIENT_ID", "id"), ("CLIENT_SECRET", "secret")])).unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.redirect_uri, "http://localhost:3000/oauth-callback");
        assert_eq!(config.scopes.len(), 8);
        assert_eq!(config.scopes[0], "oauth");
        assert_eq!(config.session_secret.len(), 32);
        assert_eq!(config.database_url, None);
        assert_eq!(config.hubspot_api_base, "https://api.hubapi.com");
        assert_eq!(config.hubspot_app_base, "https://app.hubspot.com");
    }

    #[test]
    fn test_redirect_follows_port() {
        let config = Config::from_lookup(lookup(&[
            ("CLIENT_ID", "id"),
            ("CLIENT_SECRET", "secret"),
            ("PORT", "8080"),
        ]))
        .unwrap();
        assert_eq!(config.redirect_uri, "http://localhost:8080/oauth-callback");
    }

    #[test]
    fn test_missing_credentials_fail() {
        assert!(Config::from_lookup(lookup(&[("CLIENT_ID", "id")])).is_err());
        assert!(Config::from_lookup(lookup(&[("CLIENT_ID", "id"), ("CLIENT_SECRET", "  ")])).is_err());
    }

    #[test]
    fn test_invalid_port() {
        let result = Config::from_lookup(lookup(&[
            ("CLIENT_ID", "id"),
            ("CLIENT_SECRET", "secret"),
            ("PORT", "http"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("CLIENT_ID", "id"),
            ("CLIENT_SECRET", "secret"),
            ("SESSION_SECRET", "fixed"),
            ("DATABASE_URL", "postgres://localhost/hs"),
            ("HUBSPOT_API_BASE", "http://127.0.0.1:9999/"),
        ]))
        .unwrap();
        assert_eq!(config.session_secret, b"fixed");
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/hs"));
        assert_eq!(config.hubspot_api_base, "http://127.0.0.1:9999");
    }

    #[test]
    fn test_scope_separators() {
        assert_eq!(
            parse_scopes("oauth crm.objects.contacts.read,tickets, crm.objects.deals.read%20e-commerce"),
            vec![
                "oauth",
                "crm.objects.contacts.read",
                "tickets",
                "crm.objects.deals.read",
                "e-commerce"
            ]
        );
    }
}
