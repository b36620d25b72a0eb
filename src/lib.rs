pub mod api;
pub mod clock;
pub mod config;
pub mod crm;
pub mod datecalc;
pub mod error;
pub mod providers;
pub mod session;
pub mod store;
pub mod tokens;
pub mod webhooks;

pub use config::Config;
pub use error::AppError;

use std::sync::Arc;

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub tokens: tokens::TokenManager,
    pub provider: Arc<dyn providers::OAuthProvider>,
    pub crm: crm::CrmClient,
    pub sessions: session::SessionSigner,
    pub clock: Arc<dyn clock::Clock>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the HubSpot provider, token manager and CRM client around `store`.
    pub fn new(config: Config, store: Arc<dyn store::TokenStore>) -> Self {
        let provider: Arc<dyn providers::OAuthProvider> =
            Arc::new(providers::HubSpotProvider::from_config(&config));
        Self::with_parts(config, store, provider, clock::default_clock())
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn store::TokenStore>,
        provider: Arc<dyn providers::OAuthProvider>,
        clock: Arc<dyn clock::Clock>,
    ) -> Self {
        Self {
            tokens: tokens::TokenManager::with_clock(store, provider.clone(), clock.clone()),
            crm: crm::CrmClient::new(config.hubspot_api_base.clone()),
            sessions: session::SessionSigner::new(config.session_secret.clone()),
            provider,
            clock,
            config,
        }
    }
}
