use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::info;

use crate::validation::{
    ListenerEditRequest, ListenerEventRequest, ListenerRequest, ListenerStartRequest,
};
use crate::{AppResult, Teamserver};

use super::{check_auth, success, validated};

/// **Route:** `POST /api/listener/list`
pub async fn list(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    check_auth(&core, &headers)?;
    Ok(success(serde_json::json!({ "listeners": core.listeners.list() })))
}

/// Start a listener, or restart a stopped one when `options` is omitted.
///
/// **Route:** `POST /api/listener/start`
///
/// # Response
/// - **200 OK:** `{ "status": "success" }`
/// - **404 Not Found:** No plugin serves `protocol`
/// - **409 Conflict:** A listener with that name already exists
/// - **502 Bad Gateway:** The plugin failed to start it
pub async fn start(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
    Json(req): Json<ListenerStartRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let operator = check_auth(&core, &headers)?;
    validated(&req)?;
    core.listeners
        .start(&req.name, &req.protocol, req.options)
        .await?;
    info!(operator = %operator, listener = %req.name, "📡 Listener start requested");
    Ok(success(serde_json::json!({})))
}

/// **Route:** `POST /api/listener/stop`
pub async fn stop(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
    Json(req): Json<ListenerRequest>,
) -> AppResult<Json<serde_json::Value>> {
    check_auth(&core, &headers)?;
    validated(&req)?;
    core.listeners.stop(&req.name).await?;
    Ok(success(serde_json::json!({})))
}

/// **Route:** `POST /api/listener/restart`
pub async fn restart(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
    Json(req): Json<ListenerRequest>,
) -> AppResult<Json<serde_json::Value>> {
    check_auth(&core, &headers)?;
    validated(&req)?;
    core.listeners.restart(&req.name).await?;
    Ok(success(serde_json::json!({})))
}

/// **Route:** `POST /api/listener/remove`
pub async fn remove(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
    Json(req): Json<ListenerRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let operator = check_auth(&core, &headers)?;
    validated(&req)?;
    core.listeners.remove(&req.name).await?;
    info!(operator = %operator, listener = %req.name, "🗑️ Listener removed");
    Ok(success(serde_json::json!({})))
}

/// **Route:** `POST /api/listener/edit`
pub async fn edit(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
    Json(req): Json<ListenerEditRequest>,
) -> AppResult<Json<serde_json::Value>> {
    check_auth(&core, &headers)?;
    validated(&req)?;
    core.listeners.edit(&req.name, req.config).await?;
    Ok(success(serde_json::json!({})))
}

/// Forward an operator-defined event to the listener's plugin.
///
/// **Route:** `POST /api/listener/event`
pub async fn event(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
    Json(req): Json<ListenerEventRequest>,
) -> AppResult<Json<serde_json::Value>> {
    check_auth(&core, &headers)?;
    validated(&req)?;
    let result = core.listeners.event(&req.name, req.payload).await?;
    Ok(success(serde_json::json!({ "result": result })))
}

/// **Route:** `POST /api/listener/config`
pub async fn config(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
    Json(req): Json<ListenerRequest>,
) -> AppResult<Json<serde_json::Value>> {
    check_auth(&core, &headers)?;
    validated(&req)?;
    let config = core.listeners.config(&req.name).await?;
    Ok(success(serde_json::json!({ "config": config })))
}
