pub mod agents;
pub mod events;
pub mod listeners;
pub mod plugins;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use teamserver_shared::TeamserverError;

use crate::validation::{validate_request, LoginRequest};
use crate::{AppError, AppResult, Teamserver};

pub const TOKEN_HEADER: &str = "x-teamserver-token";

/// Resolves the bearer token to its operator.
pub(crate) fn check_auth(core: &Teamserver, headers: &HeaderMap) -> AppResult<String> {
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| TeamserverError::Unauthorized("missing token".into()))?;
    Ok(core.operators.authorize(token)?)
}

pub(crate) fn validated<T: validator::Validate>(req: &T) -> AppResult<()> {
    validate_request(req).map_err(AppError::Validation)
}

pub(crate) fn success(mut body: serde_json::Value) -> Json<serde_json::Value> {
    if let Some(map) = body.as_object_mut() {
        map.insert("status".into(), "success".into());
    }
    Json(body)
}

pub fn router(core: Arc<Teamserver>) -> Router {
    Router::new()
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/version", get(version_handler))
        .route("/api/event", get(events::event_socket))
        .route("/api/agent/list", post(agents::list))
        .route("/api/agent/execute", post(agents::execute))
        .route("/api/agent/note", post(agents::note))
        .route("/api/agent/remove", post(agents::remove))
        .route("/api/agent/build", post(agents::build))
        .route("/api/agent/console", post(agents::console))
        .route("/api/listener/list", post(listeners::list))
        .route("/api/listener/start", post(listeners::start))
        .route("/api/listener/stop", post(listeners::stop))
        .route("/api/listener/restart", post(listeners::restart))
        .route("/api/listener/remove", post(listeners::remove))
        .route("/api/listener/edit", post(listeners::edit))
        .route("/api/listener/event", post(listeners::event))
        .route("/api/listener/config", post(listeners::config))
        .route("/api/plugin/list", post(plugins::list))
        .route("/api/plugin/resource", post(plugins::resource))
        .layer(DefaultBodyLimit::max(16 * 1024 * 1024))
        .with_state(core)
}

/// Exchange operator credentials for a session token.
///
/// **Route:** `POST /api/login`
///
/// The token authorizes API calls right away and must be presented as the
/// first frame on `/api/event` to join the event stream.
///
/// # Response
/// - **200 OK:** `{ "status": "success", "token": "..." }`
/// - **401 Unauthorized:** Unknown user or wrong password
/// - **409 Conflict:** Operator already connected
pub async fn login(
    State(core): State<Arc<Teamserver>>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<serde_json::Value>> {
    validated(&req)?;
    let token = core.operators.login(&req.username, &req.password)?;
    Ok(success(serde_json::json!({ "token": token })))
}

/// **Route:** `POST /api/logout`
pub async fn logout(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    check_auth(&core, &headers)?;
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    core.operators.logout(token)?;
    Ok(success(serde_json::json!({})))
}

/// **Route:** `GET /api/version`
pub async fn version_handler(State(core): State<Arc<Teamserver>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "version": core.version() }))
}
