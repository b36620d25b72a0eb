use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use hubspot_dateshift::store::{MemoryTokenStore, PostgresTokenStore, TokenStore};
use hubspot_dateshift::{api, AppState, Config, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hubspot_dateshift=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("hubspot-dateshift v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);
    info!("OAuth redirect URI: {}", config.redirect_uri);

    let store: Arc<dyn TokenStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresTokenStore::new(url).await?;
            store.migrate().await?;
            info!("Database connected and migrated ✓");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, tokens are kept in memory and lost on restart");
            Arc::new(MemoryTokenStore::new())
        }
    };

    let addr = format!("{}:{}", config.host, config.port);
    let state: SharedState = Arc::new(AppState::new(config, store));
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server ready ✓");
    axum::serve(listener, app).await?;

    Ok(())
}
