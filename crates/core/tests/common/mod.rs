#![allow(dead_code)]

pub mod mock_plugin;

pub use mock_plugin::*;

use std::path::Path;
use std::sync::Arc;

use teamserver_core::managers::StaticProvider;
use teamserver_core::test_utils::create_test_teamserver;
use teamserver_core::Teamserver;

/// A core with the `demo` agent plugin and the `http` listener plugin loaded.
pub async fn loaded_teamserver(dir: &Path) -> (Arc<Teamserver>, Arc<DemoAgent>, Arc<HttpListener>) {
    let agent = Arc::new(DemoAgent::new("demo"));
    let listener = Arc::new(HttpListener::new("http-listener", "http"));
    let provider = StaticProvider::new()
        .with_extension("demo", agent.clone())
        .with_extension("http-listener", listener.clone());

    let core = create_test_teamserver(dir, Arc::new(provider)).await;
    core.load_plugin("demo").await.unwrap();
    core.load_plugin("http-listener").await.unwrap();
    (core, agent, listener)
}

/// Everything queued for a subscriber right now.
pub fn drain(sub: &mut teamserver_core::events::Subscription) -> Vec<Arc<teamserver_shared::Event>> {
    let mut out = Vec::new();
    while let Ok(event) = sub.events.try_recv() {
        out.push(event);
    }
    out
}
