use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

/// Unified error type for the dateshift service.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ── Auth Errors ─────────────────────────────────────────────────────
    #[error("App not installed or no usable access token")]
    Unauthenticated,

    #[error("Invalid HubSpot signature")]
    InvalidSignature,

    #[error("No refresh token found for user {0}")]
    MissingCredentials(String),

    // ── Request Errors ──────────────────────────────────────────────────
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Date calculation failed: {0}")]
    DateCalc(String),

    // ── Remote Errors ───────────────────────────────────────────────────
    #[error("Token exchange failed: {message}")]
    Exchange {
        message: String,
        /// JSON error body returned by the token endpoint, when it sent one.
        payload: Option<Value>,
    },

    #[error("HubSpot API returned {status}")]
    Crm { status: u16, body: Value },

    #[error("HTTP request failed: {0}")]
    Http(String),

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn exchange(message: impl Into<String>) -> Self {
        AppError::Exchange {
            message: message.into(),
            payload: None,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        AppError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Http(e.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            AppError::InvalidSignature => (StatusCode::UNAUTHORIZED, "invalid_signature"),
            AppError::MissingCredentials(_) => (StatusCode::UNAUTHORIZED, "missing_credentials"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::DateCalc(_) => (StatusCode::BAD_REQUEST, "date_calc_error"),
            AppError::Exchange { .. } => (StatusCode::BAD_GATEWAY, "exchange_failed"),
            AppError::Crm { status, .. } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                "hubspot_error",
            ),
            AppError::Http(_) => (StatusCode::BAD_GATEWAY, "http_error"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
