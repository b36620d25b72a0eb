//! HTTP surface of the dateshift service.
//!
//! - `/`, `/install`, `/oauth-callback`, `/error`: browser install flow
//! - `/api/*`: endpoints HubSpot calls from workflows and CRM cards
//! - `/status`: health check

pub mod routes;


use crate::SharedState;
use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::router(state))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("ngrok-skip-browser-warning"),
            HeaderValue::from_static("true"),
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
