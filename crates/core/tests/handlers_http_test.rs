mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::loaded_teamserver;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use teamserver_core::handlers::{router, TOKEN_HEADER};
use teamserver_core::Teamserver;
use tower::ServiceExt;

async fn call(core: &Arc<Teamserver>, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(TOKEN_HEADER, token);
    }
    let response = router(core.clone())
        .oneshot(
            request
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn login(core: &Arc<Teamserver>) -> String {
    let (status, body) = call(
        core,
        "/api/login",
        None,
        json!({ "username": "neo", "password": "password1234" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_version_is_public() {
    let dir = tempfile::tempdir().unwrap();
    let (core, _, _) = loaded_teamserver(dir.path()).await;

    let response = router(core)
        .oneshot(
            Request::builder()
                .uri("/api/version")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["version"], teamserver_core::VERSION);
}

#[tokio::test]
async fn test_calls_require_a_token() {
    let dir = tempfile::tempdir().unwrap();
    let (core, _, _) = loaded_teamserver(dir.path()).await;

    let (status, body) = call(&core, "/api/agent/list", None, json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["type"], "Unauthorized");

    let (status, _) = call(&core, "/api/agent/list", Some("0123456789abcdef0123456789abcdef"), json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(
        &core,
        "/api/login",
        None,
        json!({ "username": "neo", "password": "guess" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_agent_routes() {
    let dir = tempfile::tempdir().unwrap();
    let (core, demo, _) = loaded_teamserver(dir.path()).await;
    let token = login(&core).await;
    demo.check_in("u1").await.unwrap();

    let (status, body) = call(&core, "/api/agent/list", Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["agents"][0]["uuid"], "u1");
    assert_eq!(body["agents"][0]["type"], "demo");

    let (status, _) = call(
        &core,
        "/api/agent/note",
        Some(&token),
        json!({ "uuid": "u1", "note": "jump box" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(core.agents.note("u1").unwrap(), "jump box");

    let (status, body) = call(
        &core,
        "/api/agent/execute",
        Some(&token),
        json!({ "uuid": "u1", "command": { "cmd": "ps" }, "wait": true }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["command"]["cmd"], "ps");

    let (status, body) = call(
        &core,
        "/api/agent/execute",
        Some(&token),
        json!({ "uuid": "nope", "command": {} }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "NotFound");

    demo.fail_remove.store(true, Ordering::SeqCst);
    let (status, body) = call(&core, "/api/agent/remove", Some(&token), json!({ "uuid": "u1" })).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["type"], "DelegateFailure");
    assert!(core.agents.exists("u1"));
}

#[tokio::test]
async fn test_build_returns_base64_payload() {
    let dir = tempfile::tempdir().unwrap();
    let (core, _, _) = loaded_teamserver(dir.path()).await;
    let token = login(&core).await;

    let (status, body) = call(
        &core,
        "/api/agent/build",
        Some(&token),
        json!({ "agent": "demo", "config": { "sleep": 10 } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filename"], "demo.bin");
    assert_eq!(body["binary"], "TVqQAA==");
    assert_eq!(body["context"]["sleep"], 10);
}

#[tokio::test]
async fn test_listener_routes() {
    let dir = tempfile::tempdir().unwrap();
    let (core, _, _) = loaded_teamserver(dir.path()).await;
    let token = login(&core).await;

    let (status, body) = call(
        &core,
        "/api/listener/start",
        Some(&token),
        json!({ "name": "pipe", "protocol": "smb", "options": {} }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "NotFound");

    let (status, _) = call(
        &core,
        "/api/listener/start",
        Some(&token),
        json!({ "name": "beacon", "protocol": "http", "options": { "port": 8080 } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &core,
        "/api/listener/start",
        Some(&token),
        json!({ "name": "beacon", "protocol": "http", "options": { "port": 8081 } }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(&core, "/api/listener/list", Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["listeners"][0]["name"], "beacon");
    assert_eq!(body["listeners"][0]["port"], 8080);

    let (status, body) = call(&core, "/api/listener/config", Some(&token), json!({ "name": "beacon" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["port"], 8080);

    let (status, _) = call(&core, "/api/listener/stop", Some(&token), json!({ "name": "beacon" })).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&core, "/api/listener/remove", Some(&token), json!({ "name": "beacon" })).await;
    assert_eq!(status, StatusCode::OK);
    assert!(core.listeners.list().is_empty());
}

#[tokio::test]
async fn test_validation_errors_are_bad_requests() {
    let dir = tempfile::tempdir().unwrap();
    let (core, _, _) = loaded_teamserver(dir.path()).await;
    let token = login(&core).await;

    let (status, body) = call(
        &core,
        "/api/agent/note",
        Some(&token),
        json!({ "uuid": "", "note": "x" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "InvalidArgument");
}

#[tokio::test]
async fn test_plugin_routes() {
    let dir = tempfile::tempdir().unwrap();
    let (core, _, _) = loaded_teamserver(dir.path()).await;
    let token = login(&core).await;

    let plugin_dir = dir.path().join("plugins").join("demo");
    std::fs::create_dir_all(&plugin_dir).unwrap();
    std::fs::write(plugin_dir.join("readme.txt"), b"hello").unwrap();

    let (status, body) = call(&core, "/api/plugin/list", Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plugins"].as_array().unwrap().len(), 2);

    let (status, body) = call(
        &core,
        "/api/plugin/resource",
        Some(&token),
        json!({ "name": "demo", "file": "readme.txt" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resource"], "aGVsbG8=");

    let (status, _) = call(
        &core,
        "/api/plugin/resource",
        Some(&token),
        json!({ "name": "demo", "file": "../../teamserver.db" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_logout_revokes_token() {
    let dir = tempfile::tempdir().unwrap();
    let (core, _, _) = loaded_teamserver(dir.path()).await;
    let token = login(&core).await;

    let (status, _) = call(&core, "/api/logout", Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&core, "/api/agent/list", Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
