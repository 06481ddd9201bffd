use axum::{extract::State, http::HeaderMap, Json};
use base64::Engine;
use std::sync::Arc;

use crate::validation::PluginResourceRequest;
use crate::{AppResult, Teamserver};

use super::{check_auth, success, validated};

/// List loaded plugins with their registration data.
///
/// **Route:** `POST /api/plugin/list`
pub async fn list(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    check_auth(&core, &headers)?;
    Ok(success(serde_json::json!({ "plugins": core.plugins.list() })))
}

/// Fetch a file the plugin ships. Only names listed in the plugin's
/// declared resources are readable.
///
/// **Route:** `POST /api/plugin/resource`
///
/// # Response
/// - **200 OK:** `{ "status": "success", "resource": "<base64>" }`
/// - **404 Not Found:** Unknown plugin or undeclared file
pub async fn resource(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
    Json(req): Json<PluginResourceRequest>,
) -> AppResult<Json<serde_json::Value>> {
    check_auth(&core, &headers)?;
    validated(&req)?;
    let bytes = core.plugin_resource(&req.name, &req.file).await?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(success(serde_json::json!({ "resource": encoded })))
}
