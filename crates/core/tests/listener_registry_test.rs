mod common;

use common::{drain, loaded_teamserver};
use serde_json::json;
use std::sync::atomic::Ordering;
use teamserver_shared::{CoreHandle, EventData, EventKind, TeamserverError};

#[tokio::test]
async fn test_unknown_protocol_leaves_registry_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let (core, _, _) = loaded_teamserver(dir.path()).await;
    core.listeners
        .start("beacon", "http", Some(json!({ "port": 8080 })))
        .await
        .unwrap();
    let before = core.listeners.list();
    let mut watcher = core.events.subscribe("watcher");

    for options in [Some(json!({ "port": 445 })), None] {
        let err = core
            .listeners
            .start("pipe", "smb", options)
            .await
            .unwrap_err();
        assert!(matches!(err, TeamserverError::ProtocolNotFound(ref p) if p == "smb"));
        assert_eq!(err.to_string(), "listener protocol \"smb\" has not been registered");
    }

    assert_eq!(core.listeners.list(), before);
    assert!(!dir.path().join("listeners").join("pipe").exists());
    assert!(drain(&mut watcher).is_empty());
}

#[tokio::test]
async fn test_beacon_restart_path() {
    let dir = tempfile::tempdir().unwrap();
    let (core, _, http) = loaded_teamserver(dir.path()).await;

    core.listeners
        .start("beacon", "http", Some(json!({ "port": 8443 })))
        .await
        .unwrap();
    let started = core.listeners.list();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].status, "online");
    assert_eq!(started[0].port, Some(8443));
    assert!(dir.path().join("listeners").join("beacon").is_dir());

    assert!(matches!(
        core.listeners
            .start("beacon", "http", Some(json!({ "port": 9000 })))
            .await,
        Err(TeamserverError::AlreadyExists(_))
    ));

    let mut watcher = core.events.subscribe("watcher");
    core.listeners.start("beacon", "http", None).await.unwrap();

    let after = core.listeners.list();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].status, "restarted");
    assert_eq!(after[0].name, started[0].name);
    assert_eq!(after[0].protocol, started[0].protocol);
    assert_eq!(after[0].host, started[0].host);
    assert_eq!(after[0].port, started[0].port);

    let events = drain(&mut watcher);
    assert_eq!(events.len(), 1);
    match &events[0].data {
        EventData::ListenerStart {
            name,
            protocol,
            status,
            ..
        } => {
            assert_eq!(name, "beacon");
            assert_eq!(protocol, &None);
            assert_eq!(status, "restarted");
        }
        other => panic!("unexpected {other:?}"),
    }

    let starts = http.starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[1], ("beacon".to_string(), None));
}

#[tokio::test]
async fn test_restart_path_rejects_other_protocol() {
    let dir = tempfile::tempdir().unwrap();
    let provider = teamserver_core::managers::StaticProvider::new()
        .with_extension("http", std::sync::Arc::new(common::HttpListener::new("http-listener", "http")))
        .with_extension("dns", std::sync::Arc::new(common::HttpListener::new("dns-listener", "dns")));
    let core = teamserver_core::test_utils::create_test_teamserver(
        dir.path(),
        std::sync::Arc::new(provider),
    )
    .await;
    core.load_plugins().await;

    core.listeners
        .start("beacon", "http", Some(json!({})))
        .await
        .unwrap();
    assert!(matches!(
        core.listeners.start("beacon", "dns", None).await,
        Err(TeamserverError::InvalidArgument(_))
    ));
    assert_eq!(core.listeners.protocol("beacon").unwrap(), "http");
}

#[tokio::test]
async fn test_lifecycle_events_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (core, _, _) = loaded_teamserver(dir.path()).await;
    let mut watcher = core.events.subscribe("watcher");

    core.listeners
        .start("beacon", "http", Some(json!({ "port": 80 })))
        .await
        .unwrap();
    core.listeners.stop("beacon").await.unwrap();
    assert_eq!(core.listeners.list()[0].status, "offline");
    core.listeners.restart("beacon").await.unwrap();
    assert_eq!(core.listeners.list()[0].status, "online");
    core.listeners
        .edit("beacon", json!({ "port": 81 }))
        .await
        .unwrap();
    assert_eq!(core.listeners.config("beacon").await.unwrap()["port"], 81);
    core.listeners.remove("beacon").await.unwrap();
    assert!(core.listeners.list().is_empty());

    let kinds: Vec<EventKind> = drain(&mut watcher).iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::ListenerStart,
            EventKind::ListenerStop,
            EventKind::ListenerStatus,
            EventKind::ListenerRemove,
        ]
    );
}

#[tokio::test]
async fn test_failed_start_and_remove_change_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (core, _, http) = loaded_teamserver(dir.path()).await;

    http.fail_start.store(true, Ordering::SeqCst);
    assert!(matches!(
        core.listeners.start("beacon", "http", Some(json!({}))).await,
        Err(TeamserverError::DelegateFailure { .. })
    ));
    assert!(core.listeners.list().is_empty());

    http.fail_start.store(false, Ordering::SeqCst);
    core.listeners
        .start("beacon", "http", Some(json!({})))
        .await
        .unwrap();
    http.fail_remove.store(true, Ordering::SeqCst);
    let mut watcher = core.events.subscribe("watcher");
    assert!(matches!(
        core.listeners.remove("beacon").await,
        Err(TeamserverError::DelegateFailure { .. })
    ));
    assert!(core.listeners.exists("beacon"));
    assert!(drain(&mut watcher).is_empty());
}

#[tokio::test]
async fn test_missing_listener_operations() {
    let dir = tempfile::tempdir().unwrap();
    let (core, _, _) = loaded_teamserver(dir.path()).await;

    assert!(matches!(
        core.listeners.stop("ghost").await,
        Err(TeamserverError::ListenerNotFound(_))
    ));
    assert!(matches!(
        core.listeners.restart("ghost").await,
        Err(TeamserverError::ListenerNotFound(_))
    ));
    assert!(matches!(
        core.listeners.remove("ghost").await,
        Err(TeamserverError::ListenerNotFound(_))
    ));
    assert!(matches!(
        core.listeners.config("ghost").await,
        Err(TeamserverError::ListenerNotFound(_))
    ));
    assert!(matches!(
        core.listeners.start("../escape", "http", Some(json!({}))).await,
        Err(TeamserverError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_plugin_reaches_back_through_its_handle() {
    let dir = tempfile::tempdir().unwrap();
    let (core, _, http) = loaded_teamserver(dir.path()).await;
    core.listeners
        .start("beacon", "http", Some(json!({})))
        .await
        .unwrap();
    let mut watcher = core.events.subscribe("watcher");

    let answer = core
        .listeners
        .event("beacon", json!({ "rotate": "certs" }))
        .await
        .unwrap();
    assert_eq!(answer["protocol"], "http");
    assert_eq!(answer["echo"]["rotate"], "certs");

    http.handle().listener_log("beacon", "client 10.0.0.5 connected");
    let events = drain(&mut watcher);
    assert!(matches!(
        &events[0].data,
        EventData::ListenerLog { name, log } if name == "beacon" && log.contains("10.0.0.5")
    ));
    assert_eq!(
        core.listeners.config_path("beacon"),
        dir.path().join("listeners").join("beacon")
    );
}

#[tokio::test]
async fn test_listener_rows_follow_status() {
    let dir = tempfile::tempdir().unwrap();
    let (core, _, _) = loaded_teamserver(dir.path()).await;
    core.listeners
        .start("beacon", "http", Some(json!({ "port": 8080 })))
        .await
        .unwrap();

    let rows = core.store.listener_list().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "online");
    let config: serde_json::Value = serde_json::from_slice(&rows[0].config).unwrap();
    assert_eq!(config["port"], 8080);

    core.listeners.stop("beacon").await.unwrap();
    let rows = core.store.listener_list().await.unwrap();
    assert_eq!(rows[0].status, "offline");

    core.listeners.remove("beacon").await.unwrap();
    assert!(core.store.listener_list().await.unwrap().is_empty());
}
