//! Route handlers.
//!
//! Browser routes key tokens by the `sid` session cookie. The `/api/*`
//! routes are called by HubSpot itself and act for the portal named in the
//! payload, falling back to the most recently authorized session.

use askama::Template;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::crm::{self, PropertyOption};
use crate::datecalc::{self, TimeUnit};
use crate::error::AppError;
use crate::session::Session;
use crate::webhooks::signature::{self, SignedRequest};
use crate::SharedState;

const NOT_INSTALLED: &str =
    "App not installed. Please install the app first by visiting /install endpoint.";

pub fn router(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/status", get(status))
        // ── Browser install flow ─────────────────────────────────────────
        .route("/", get(index))
        .route("/install", get(install))
        .route("/oauth-callback", get(oauth_callback))
        .route("/error", get(error_page))
        // ── HubSpot callbacks ────────────────────────────────────────────
        .route(
            "/api/contacts/{contact_id}/update-property",
            post(update_contact_property),
        )
        .route("/api/get-properties", post(get_properties))
        .route("/api/workflow-date-calculator", post(workflow_date_calculator))
        .route("/api/get-object-properties", post(get_object_properties))
        .with_state(state)
}

// =============================================================================
// Helpers
// =============================================================================

/// 302 to `location`, matching what HubSpot's install flow expects.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Attach `Set-Cookie` when the session was minted for this request.
fn with_session(state: &SharedState, session: &Session, mut resp: Response) -> Response {
    if session.is_new {
        match state.sessions.cookie(session) {
            Ok(cookie) => {
                resp.headers_mut().append(header::SET_COOKIE, cookie);
            }
            Err(e) => error!("Failed to build session cookie: {e}"),
        }
    }
    resp
}

fn render(template: &impl Template) -> Response {
    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => AppError::Internal(format!("Template render failed: {e}")).into_response(),
    }
}

/// Text form of a scalar JSON value (HubSpot sends ids as numbers or strings).
fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Portal id of an inbound HubSpot callback: `origin.portalId` for workflow
/// actions, `portalId` for option fetches.
pub fn payload_portal_id(body: &Value) -> Option<String> {
    scalar_text(body.pointer("/origin/portalId")).or_else(|| scalar_text(body.get("portalId")))
}

/// Show only the edges of a token on the landing page.
fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

fn not_installed() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "options": [],
            "after": "",
            "searchable": false,
            "error": NOT_INSTALLED,
            "installUrl": "/install",
        })),
    )
        .into_response()
}

/// Tenant session and a usable access token for an inbound callback.
async fn tenant_token(state: &SharedState, body: &Value) -> Result<(String, String), AppError> {
    let portal_id = payload_portal_id(body);
    let user_id = state
        .tokens
        .resolve_tenant(portal_id.as_deref())
        .await
        .ok_or(AppError::Unauthenticated)?;

    match state.tokens.get_access_token(&user_id).await {
        Ok(Some(token)) => Ok((user_id, token)),
        Ok(None) => Err(AppError::Unauthenticated),
        Err(e) => {
            error!("Error getting access token for {user_id}: {e}");
            Err(e)
        }
    }
}

// =============================================================================
// Health
// =============================================================================

async fn status() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "hubspot-dateshift",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// Browser Install Flow
// =============================================================================

enum ContactLine {
    Name(String),
    Missing,
    Error(String),
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    authorized: bool,
    access_token: Option<String>,
    contact: ContactLine,
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate {
    message: String,
}

/// GET /
async fn index(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let session = state.sessions.resolve(&headers);
    let authorized = state.tokens.is_authorized(&session.id).await;

    let mut page = IndexTemplate {
        authorized,
        access_token: None,
        contact: ContactLine::Missing,
    };

    if authorized {
        let token = match state.tokens.get_access_token(&session.id).await {
            Ok(token) => token,
            Err(e) => {
                error!("Error getting access token for {}: {e}", session.id);
                None
            }
        };

        if let Some(token) = token {
            page.contact = match state.crm.first_contact(&token).await {
                Ok(Some(c)) => ContactLine::Name(
                    [c.firstname, c.lastname]
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>()
                        .join(" "),
                ),
                Ok(None) => ContactLine::Missing,
                Err(e) => {
                    warn!("Unable to retrieve contact: {e}");
                    ContactLine::Error(e.to_string())
                }
            };
            page.access_token = Some(mask_token(&token));
        }
    }

    with_session(&state, &session, render(&page))
}

/// GET /install
async fn install(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let session = state.sessions.resolve(&headers);
    info!("Starting install for session {}", session.id);
    with_session(&state, &session, found(&state.provider.auth_url()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OAuthCallbackQuery {
    code: Option<String>,
    return_url: Option<String>,
}

/// GET /oauth-callback
async fn oauth_callback(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(q): Query<OAuthCallbackQuery>,
) -> Response {
    let session = state.sessions.resolve(&headers);
    let return_url = q.return_url.filter(|u| !u.is_empty());
    let apps_url = format!("{}/apps", state.config.hubspot_app_base);

    let Some(code) = q.code.filter(|c| !c.is_empty()) else {
        return with_session(&state, &session, found(return_url.as_deref().unwrap_or(&apps_url)));
    };

    let access_token = match state.tokens.exchange_for_tokens(&session.id, &code).await {
        Ok(token) => token,
        Err(e) => {
            let message = match e {
                AppError::Exchange { message, .. } => message,
                other => other.to_string(),
            };
            error!("Error exchanging tokens: {message}");
            let target = return_url.unwrap_or_else(|| {
                let msg: String = url::form_urlencoded::byte_serialize(message.as_bytes()).collect();
                format!("/error?msg={msg}")
            });
            return with_session(&state, &session, found(&target));
        }
    };

    let portal_id = match state.crm.portal_id(&access_token).await {
        Ok(portal_id) => {
            match state.tokens.bind_portal(&session.id, &portal_id).await {
                Ok(Some(owner)) if owner != session.id => {
                    info!("Portal {portal_id} reinstalled from {}, tokens kept under {owner}", session.id)
                }
                Ok(_) => info!("Portal {portal_id} bound to session {}", session.id),
                Err(e) => warn!("Could not bind portal {portal_id}: {e}"),
            }
            Some(portal_id)
        }
        Err(e) => {
            warn!("Could not retrieve portal ID: {e}");
            None
        }
    };

    let target = match (return_url, portal_id) {
        (Some(url), _) => url,
        (None, Some(portal_id)) => format!(
            "{}/connected-apps/{portal_id}/installed",
            state.config.hubspot_app_base
        ),
        (None, None) => apps_url,
    };
    with_session(&state, &session, found(&target))
}

#[derive(Deserialize)]
struct ErrorQuery {
    msg: Option<String>,
}

/// GET /error
async fn error_page(Query(q): Query<ErrorQuery>) -> Response {
    render(&ErrorTemplate {
        message: q.msg.unwrap_or_default(),
    })
}

// =============================================================================
// CRM Card / Custom Code Callbacks
// =============================================================================

/// POST /api/contacts/{contact_id}/update-property
async fn update_contact_property(
    State(state): State<SharedState>,
    Path(contact_id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    if signature::has_signature(&headers) {
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(|h| h.split(':').next().unwrap_or(h))
            .unwrap_or_default();
        let request = SignedRequest {
            method: &method,
            host,
            path_and_query: uri.path_and_query().map(|p| p.as_str()).unwrap_or("/"),
            body: &body,
        };
        signature::verify_v3(
            &request,
            &headers,
            &state.config.client_secret,
            state.clock.now().timestamp_millis(),
        )?;
    }

    let payload: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {e}")))?
    };

    let property_name = payload
        .get("propertyName")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    let property_value = payload.get("propertyValue");
    let (Some(property_name), Some(property_value)) = (property_name, property_value) else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Missing required fields",
                "required": ["propertyName", "propertyValue"],
            })),
        )
            .into_response());
    };

    let access_token = match tenant_token(&state, &payload).await {
        Ok((_, token)) => token,
        Err(AppError::Unauthenticated) => {
            return Ok((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "No authorized users found. Please install the app first." })),
            )
                .into_response())
        }
        Err(_) => {
            return Ok((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Unable to get access token" })),
            )
                .into_response())
        }
    };

    match state
        .crm
        .update_property(&access_token, "contacts", &contact_id, property_name, property_value)
        .await
    {
        Ok(data) => Ok(Json(json!({
            "success": true,
            "message": "Contact property updated successfully",
            "data": data,
        }))
        .into_response()),
        Err(AppError::Crm { status, body }) => {
            error!("Error updating contact property: HubSpot returned {status}");
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            Ok((
                status,
                Json(json!({ "error": "Failed to update contact property", "details": body })),
            )
                .into_response())
        }
        Err(e) => {
            error!("Error updating contact property: {e}");
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error", "message": e.to_string() })),
            )
                .into_response())
        }
    }
}

// =============================================================================
// Workflow Action Callbacks
// =============================================================================

/// Object types selected in a field-options request.
fn option_targets(body: &Value) -> Vec<String> {
    let Some(field) = body.pointer("/inputFields/widgetName") else {
        return Vec::new();
    };

    match field.get("type").and_then(Value::as_str) {
        Some("STATIC_VALUE") => match field.get("value") {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        },
        Some("OBJECT_PROPERTY") => field
            .get("propertyName")
            .and_then(Value::as_str)
            .map(|s| vec![s.to_string()])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// POST /api/get-properties
async fn get_properties(State(state): State<SharedState>, Json(body): Json<Value>) -> Response {
    let mut targets = option_targets(&body);
    if targets.is_empty() {
        targets = crm::DEFAULT_OPTION_OBJECTS.iter().map(|s| s.to_string()).collect();
    }

    let access_token = match tenant_token(&state, &body).await {
        Ok((_, token)) => token,
        Err(AppError::Unauthenticated) => return not_installed(),
        Err(_) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "options": [],
                    "after": "",
                    "searchable": false,
                    "error": "Authentication failed",
                })),
            )
                .into_response()
        }
    };

    let query = body
        .pointer("/fetchOptions/q")
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .filter(|q| !q.is_empty());

    let mut options: Vec<PropertyOption> = Vec::new();
    for target in targets.iter().filter(|t| crm::is_known_object(t)) {
        match state.crm.list_properties(&access_token, target).await {
            Ok(props) => options.extend(
                props
                    .iter()
                    .filter(|p| p.is_date())
                    .filter(|p| match &query {
                        Some(q) => p.display_label().to_lowercase().contains(q.as_str()),
                        None => true,
                    })
                    .map(PropertyOption::from),
            ),
            Err(e) => error!("Error fetching properties for {target}: {e}"),
        }
    }

    options.sort_by(|a, b| {
        a.label
            .to_lowercase()
            .cmp(&b.label.to_lowercase())
            .then_with(|| a.label.cmp(&b.label))
    });

    Json(json!({
        "options": options,
        "after": "",
        "searchable": true,
    }))
    .into_response()
}

/// Read, shift and write back one date property; returns the output fields.
async fn run_date_action(state: &SharedState, body: &Value) -> Result<Value, AppError> {
    let object_id = scalar_text(body.pointer("/object/objectId"))
        .ok_or_else(|| AppError::BadRequest("object.objectId is required".into()))?;
    let object_type = body
        .pointer("/object/objectType")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::BadRequest("object.objectType is required".into()))?;

    let fields = body
        .get("inputFields")
        .ok_or_else(|| AppError::BadRequest("inputFields is required".into()))?;
    let property_to_read = fields
        .get("property_to_read_dynamic")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::BadRequest("property_to_read_dynamic is required".into()))?;
    let property_to_set: String = fields
        .get("property_to_set")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::BadRequest("property_to_set is required".into()))?
        .to_lowercase()
        .split_whitespace()
        .collect();
    let amount = scalar_text(fields.get("amount"))
        .ok_or_else(|| AppError::DateCalc("Amount must be a number".into()))
        .and_then(|a| datecalc::parse_amount(&a))?;
    let unit: TimeUnit = fields
        .get("unit")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .parse()?;

    let (user_id, access_token) = tenant_token(state, body).await?;

    let current = state
        .crm
        .fetch_property(&access_token, object_type, &object_id, property_to_read)
        .await?;
    let new_date = datecalc::calculate_new_date(current.as_deref(), amount, unit)?;

    state
        .crm
        .update_property(
            &access_token,
            object_type,
            &object_id,
            &property_to_set,
            &Value::String(new_date.clone()),
        )
        .await?;

    info!(
        "Shifted {object_type} {object_id} {property_to_read} by {amount} {unit} into {property_to_set}={new_date} for {user_id}"
    );

    let mut output = Map::new();
    output.insert(property_to_set, Value::String(new_date));
    Ok(json!({ "outputFields": output }))
}

/// POST /api/workflow-date-calculator
async fn workflow_date_calculator(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Response {
    match run_date_action(&state, &body).await {
        Ok(output) => Json(output).into_response(),
        Err(AppError::Unauthenticated) => not_installed(),
        Err(e) => {
            error!("Workflow action error: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": "Error processing workflow action" })),
            )
                .into_response()
        }
    }
}

/// POST /api/get-object-properties
async fn get_object_properties(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Response {
    let object_type = body
        .pointer("/inputFields/target_object/value")
        .or_else(|| body.pointer("/inputFields/target object/value"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    let Some(object_type) = object_type else {
        return Json(json!({ "options": [] })).into_response();
    };

    let access_token = match tenant_token(&state, &body).await {
        Ok((_, token)) => token,
        Err(AppError::Unauthenticated) => return not_installed(),
        Err(e) => return Json(json!({ "options": [], "error": e.to_string() })).into_response(),
    };

    match state.crm.list_properties(&access_token, object_type).await {
        Ok(props) => {
            let options: Vec<PropertyOption> = props
                .iter()
                .filter(|p| p.is_date() && p.is_writable())
                .map(PropertyOption::from)
                .collect();
            Json(json!({ "options": options })).into_response()
        }
        Err(e) => {
            error!("Error fetching properties for {object_type}: {e}");
            Json(json!({ "options": [], "error": e.to_string() })).into_response()
        }
    }
}
