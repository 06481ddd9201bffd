use axum::{extract::State, http::HeaderMap, Json};
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use teamserver_shared::BuildContext;
use tracing::info;

use crate::validation::{AgentBuildRequest, AgentExecuteRequest, AgentNoteRequest, AgentRequest};
use crate::{AppResult, Teamserver};

use super::{check_auth, success, validated};

/// List active agent sessions.
///
/// **Route:** `POST /api/agent/list`
///
/// **200 OK:**
/// ```json
/// { "status": "success", "agents": [{ "uuid": "u1", "type": "demo", "parent": null, "status": "+alive", "note": "" }] }
/// ```
pub async fn list(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    check_auth(&core, &headers)?;
    Ok(success(serde_json::json!({ "agents": core.agents.list() })))
}

/// Hand a command to the agent's plugin.
///
/// **Route:** `POST /api/agent/execute`
///
/// With `wait: true` the call blocks until the plugin answers or
/// `EXECUTE_TIMEOUT_SECS` passes (504).
pub async fn execute(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
    Json(req): Json<AgentExecuteRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let operator = check_auth(&core, &headers)?;
    validated(&req)?;

    info!(operator = %operator, uuid = %req.uuid, wait = req.wait, "⌨️ Agent command");
    let result = if req.wait {
        let limit = Duration::from_secs(core.config.execute_timeout_secs);
        core.agents
            .execute_timeout(&req.uuid, req.command, limit)
            .await?
    } else {
        core.agents.execute(&req.uuid, req.command, false).await?
    };
    Ok(success(serde_json::json!({ "result": result })))
}

/// **Route:** `POST /api/agent/note`
pub async fn note(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
    Json(req): Json<AgentNoteRequest>,
) -> AppResult<Json<serde_json::Value>> {
    check_auth(&core, &headers)?;
    validated(&req)?;
    core.agents.set_note(&req.uuid, &req.note).await?;
    Ok(success(serde_json::json!({})))
}

/// Tear down an agent session.
///
/// **Route:** `POST /api/agent/remove`
///
/// # Response
/// - **200 OK:** `{ "status": "success" }`
/// - **404 Not Found:** Unknown uuid
/// - **502 Bad Gateway:** The plugin refused; the session is kept
pub async fn remove(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
    Json(req): Json<AgentRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let operator = check_auth(&core, &headers)?;
    validated(&req)?;
    core.agents.remove(&req.uuid).await?;
    info!(operator = %operator, uuid = %req.uuid, "🗑️ Agent removed");
    Ok(success(serde_json::json!({})))
}

/// Build a payload for an agent type. Build logs stream to the requesting
/// operator only.
///
/// **Route:** `POST /api/agent/build`
///
/// **200 OK:**
/// ```json
/// { "status": "success", "filename": "demo.bin", "binary": "<base64>", "context": {} }
/// ```
pub async fn build(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
    Json(req): Json<AgentBuildRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let operator = check_auth(&core, &headers)?;
    validated(&req)?;

    let context = BuildContext {
        agent_type: req.agent,
        user: operator,
    };
    let payload = core.agents.generate(context, req.config).await?;
    let binary = base64::engine::general_purpose::STANDARD.encode(&payload.binary);
    Ok(success(serde_json::json!({
        "filename": payload.filename,
        "binary": binary,
        "context": payload.context,
    })))
}

/// **Route:** `POST /api/agent/console`
pub async fn console(
    State(core): State<Arc<Teamserver>>,
    headers: HeaderMap,
    Json(req): Json<AgentRequest>,
) -> AppResult<Json<serde_json::Value>> {
    check_auth(&core, &headers)?;
    validated(&req)?;
    let console = core.agents.console_history(&req.uuid).await?;
    Ok(success(serde_json::json!({ "console": console })))
}
