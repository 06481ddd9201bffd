use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use teamserver_core::db::{AgentRow, ListenerRow, Persistence};
use teamserver_shared::{
    AgentCapability, AgentSnapshot, AgentTypeInfo, BuildContext, CoreHandle, Extension,
    GeneratedPayload, ListenerCapability, ListenerStartResult, ListenerTypeInfo, NewAgent,
    PluginCast, PluginDescriptor, PluginKind,
};

fn descriptor(name: &str, kind: PluginKind) -> PluginDescriptor {
    PluginDescriptor {
        name: name.to_string(),
        kind,
        version: "0.0.0".to_string(),
        author: "tests".to_string(),
        resources: vec!["readme.txt".to_string()],
    }
}

/// Agent plugin that records what the core asks of it.
pub struct DemoAgent {
    pub name: String,
    pub core: Mutex<Option<Arc<dyn CoreHandle>>>,
    pub fail_remove: AtomicBool,
    pub fail_update: AtomicBool,
    /// agent_remove marks the agent exited through the handle first
    pub exit_on_remove: AtomicBool,
    /// agent_update writes the status back through the handle
    pub status_on_update: AtomicBool,
    pub refuse_restore: Mutex<HashSet<String>>,
    pub restored: Mutex<Vec<AgentSnapshot>>,
    pub updates: AtomicUsize,
    pub execute_delay: Mutex<Duration>,
}

impl DemoAgent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            core: Mutex::new(None),
            fail_remove: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
            exit_on_remove: AtomicBool::new(false),
            status_on_update: AtomicBool::new(false),
            refuse_restore: Mutex::new(HashSet::new()),
            restored: Mutex::new(Vec::new()),
            updates: AtomicUsize::new(0),
            execute_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn handle(&self) -> Arc<dyn CoreHandle> {
        self.core.lock().unwrap().clone().expect("plugin not registered")
    }

    /// What a listener does when a new implant checks in.
    pub async fn check_in(&self, uuid: &str) -> teamserver_shared::TeamserverResult<()> {
        self.handle()
            .agent_initialize(NewAgent {
                uuid: uuid.to_string(),
                agent_type: self.name.clone(),
                parent: None,
                status: "+alive".to_string(),
                note: String::new(),
                meta: json!({ "hostname": "ws01", "pid": 4242 }),
            })
            .await
    }
}

impl PluginCast for DemoAgent {
    fn as_agent(self: Arc<Self>) -> Option<Arc<dyn AgentCapability>> {
        Some(self)
    }
}

impl Extension for DemoAgent {
    fn register(&self, core: Arc<dyn CoreHandle>) -> PluginDescriptor {
        *self.core.lock().unwrap() = Some(core);
        descriptor(&self.name, PluginKind::Agent)
    }
}

#[async_trait]
impl AgentCapability for DemoAgent {
    async fn agent_register(&self) -> Result<AgentTypeInfo> {
        Ok(AgentTypeInfo {
            display_name: Some(format!("{} agent", self.name)),
            ..Default::default()
        })
    }

    async fn agent_generate(&self, context: BuildContext, config: Value) -> Result<GeneratedPayload> {
        self.handle().agent_build_log(&context, "compiling");
        Ok(GeneratedPayload {
            filename: format!("{}.bin", context.agent_type),
            binary: b"MZ\x90\x00".to_vec(),
            context: config,
        })
    }

    async fn agent_restore(&self, snapshot: AgentSnapshot) -> Result<()> {
        if self.refuse_restore.lock().unwrap().contains(&snapshot.uuid) {
            bail!("implant {} is gone", snapshot.uuid);
        }
        self.restored.lock().unwrap().push(snapshot);
        Ok(())
    }

    async fn agent_execute(&self, uuid: &str, command: Value, wait: bool) -> Result<Value> {
        let delay = *self.execute_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        Ok(json!({ "uuid": uuid, "command": command, "waited": wait }))
    }

    async fn agent_process(&self, context: Value, request: Vec<u8>) -> Result<Vec<u8>> {
        let mut reply = request;
        reply.reverse();
        if context.get("reject").is_some() {
            bail!("bad check-in");
        }
        Ok(reply)
    }

    async fn agent_get(&self, uuid: &str) -> Result<Value> {
        Ok(json!({ "uuid": uuid, "source": self.name }))
    }

    async fn agent_update(&self, uuid: &str) -> Result<Option<Value>> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_update.load(Ordering::SeqCst) {
            bail!("shadow copy for {} is stale", uuid);
        }
        if self.status_on_update.load(Ordering::SeqCst) {
            self.handle().agent_set_status(uuid, "+synced").await?;
        }
        Ok(Some(json!({ "uuid": uuid, "synced": true })))
    }

    async fn agent_remove(&self, uuid: &str) -> Result<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            bail!("implant {} did not acknowledge exit", uuid);
        }
        if self.exit_on_remove.load(Ordering::SeqCst) {
            self.handle().agent_set_status(uuid, "-exited").await?;
        }
        Ok(())
    }
}

/// Listener plugin serving one protocol.
pub struct HttpListener {
    pub name: String,
    pub protocol: String,
    pub core: Mutex<Option<Arc<dyn CoreHandle>>>,
    pub configs: Mutex<HashMap<String, Value>>,
    pub starts: Mutex<Vec<(String, Option<Value>)>>,
    pub fail_start: AtomicBool,
    pub fail_remove: AtomicBool,
}

impl HttpListener {
    pub fn new(name: &str, protocol: &str) -> Self {
        Self {
            name: name.to_string(),
            protocol: protocol.to_string(),
            core: Mutex::new(None),
            configs: Mutex::new(HashMap::new()),
            starts: Mutex::new(Vec::new()),
            fail_start: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> Arc<dyn CoreHandle> {
        self.core.lock().unwrap().clone().expect("plugin not registered")
    }
}

impl PluginCast for HttpListener {
    fn as_listener(self: Arc<Self>) -> Option<Arc<dyn ListenerCapability>> {
        Some(self)
    }
}

impl Extension for HttpListener {
    fn register(&self, core: Arc<dyn CoreHandle>) -> PluginDescriptor {
        *self.core.lock().unwrap() = Some(core);
        descriptor(&self.name, PluginKind::Listener)
    }
}

#[async_trait]
impl ListenerCapability for HttpListener {
    async fn listener_register(&self) -> Result<ListenerTypeInfo> {
        let mut info = ListenerTypeInfo {
            protocol: self.protocol.clone(),
            ..Default::default()
        };
        info.extra.insert("secure".into(), json!(false));
        Ok(info)
    }

    async fn listener_start(&self, name: &str, options: Option<Value>) -> Result<ListenerStartResult> {
        if self.fail_start.load(Ordering::SeqCst) {
            bail!("address already in use");
        }
        self.starts
            .lock()
            .unwrap()
            .push((name.to_string(), options.clone()));

        let status = if options.is_some() { "online" } else { "restarted" };
        let port = options
            .as_ref()
            .and_then(|o| o.get("port"))
            .and_then(Value::as_u64)
            .map(|p| p as u16);
        if let Some(options) = options {
            self.configs.lock().unwrap().insert(name.to_string(), options);
        }
        Ok(ListenerStartResult {
            status: status.to_string(),
            host: Some("0.0.0.0".to_string()),
            port,
        })
    }

    async fn listener_restore(&self, name: &str, status: &str, config: Value) -> Result<ListenerStartResult> {
        self.configs.lock().unwrap().insert(name.to_string(), config);
        Ok(ListenerStartResult {
            status: status.to_string(),
            host: Some("0.0.0.0".to_string()),
            port: None,
        })
    }

    async fn listener_edit(&self, name: &str, config: Value) -> Result<()> {
        self.configs.lock().unwrap().insert(name.to_string(), config);
        Ok(())
    }

    async fn listener_stop(&self, _name: &str) -> Result<String> {
        Ok("offline".to_string())
    }

    async fn listener_restart(&self, _name: &str) -> Result<String> {
        Ok("online".to_string())
    }

    async fn listener_remove(&self, name: &str) -> Result<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            bail!("listener {} is still draining", name);
        }
        self.configs.lock().unwrap().remove(name);
        Ok(())
    }

    async fn listener_event(&self, name: &str, event: Value) -> Result<Value> {
        let protocol = self.handle().listener_protocol(name)?;
        Ok(json!({ "listener": name, "protocol": protocol, "echo": event }))
    }

    async fn listener_config(&self, name: &str) -> Result<Value> {
        Ok(self
            .configs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// Declares itself an agent plugin but never hands out the capability.
pub struct HollowAgent;

impl PluginCast for HollowAgent {}

impl Extension for HollowAgent {
    fn register(&self, _core: Arc<dyn CoreHandle>) -> PluginDescriptor {
        descriptor("hollow", PluginKind::Agent)
    }
}

/// Storage that rejects every write and read.
pub struct BrokenStore;

#[async_trait]
impl Persistence for BrokenStore {
    async fn agent_list(&self) -> Result<Vec<AgentRow>> {
        bail!("database is locked")
    }
    async fn agent_insert(&self, _row: &AgentRow) -> Result<()> {
        bail!("database is locked")
    }
    async fn agent_update(&self, _uuid: &str, _metadata: &[u8]) -> Result<()> {
        bail!("database is locked")
    }
    async fn agent_remove(&self, _uuid: &str) -> Result<()> {
        bail!("database is locked")
    }
    async fn agent_set_status(&self, _uuid: &str, _status: &str) -> Result<()> {
        bail!("database is locked")
    }
    async fn agent_set_note(&self, _uuid: &str, _note: &str) -> Result<()> {
        bail!("database is locked")
    }
    async fn agent_console_insert(&self, _uuid: &str, _entry: &[u8]) -> Result<()> {
        bail!("database is locked")
    }
    async fn agent_console(&self, _uuid: &str) -> Result<Vec<Vec<u8>>> {
        bail!("database is locked")
    }
    async fn listener_list(&self) -> Result<Vec<ListenerRow>> {
        bail!("database is locked")
    }
    async fn listener_insert(&self, _row: &ListenerRow) -> Result<()> {
        bail!("database is locked")
    }
    async fn listener_update(&self, _name: &str, _status: &str, _config: &[u8]) -> Result<()> {
        bail!("database is locked")
    }
    async fn listener_remove(&self, _name: &str) -> Result<()> {
        bail!("database is locked")
    }
}
