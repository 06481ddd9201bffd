use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use teamserver_shared::{
    AgentTypeInfo, BuildContext, CoreHandle, EventData, Extension, ListenerTypeInfo, NewAgent,
    PluginFactory, PluginKind, TeamserverError, TeamserverResult,
};

use super::registry::{Capability, Plugin};
use crate::Teamserver;

/// Plugin names must match `^[A-Za-z0-9_.-]+$`.
pub fn validate_plugin_name(name: &str) -> TeamserverResult<()> {
    if name.is_empty() {
        return Err(TeamserverError::InvalidArgument(
            "plugin descriptor has an empty name".into(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
    {
        return Err(TeamserverError::InvalidArgument(format!(
            "plugin name '{}' may only contain [A-Za-z0-9_.-]",
            name
        )));
    }
    Ok(())
}

/// Where extensions come from. `path` is whatever the provider understands:
/// a registered name, a file, a command line.
#[async_trait]
pub trait ExtensionProvider: Send + Sync {
    async fn open(&self, path: &str) -> TeamserverResult<Arc<dyn Extension>>;

    /// Every path this provider can open, for "load everything" startups.
    fn available(&self) -> Vec<String>;
}

/// Extensions linked into the binary and collected through `inventory`.
pub struct InventoryProvider {
    factories: BTreeMap<String, Arc<dyn PluginFactory>>,
}

impl InventoryProvider {
    #[must_use]
    pub fn discover() -> Self {
        info!("🔍 Scanning for plugins via inventory...");

        let mut factories = BTreeMap::new();
        for registrar in teamserver_shared::inventory::iter::<teamserver_shared::PluginRegistrar> {
            let factory = (registrar.factory)();
            info!(plugin = %factory.name(), kind = %factory.kind(), "📦 Discovered plugin factory");
            factories.insert(factory.name().to_string(), factory);
        }

        if factories.is_empty() {
            warn!("⚠️ No plugin factories discovered: link plugin crates into the teamserver binary.");
        } else {
            info!("✅ Discovered {} plugin factories", factories.len());
        }
        Self { factories }
    }
}

#[async_trait]
impl ExtensionProvider for InventoryProvider {
    async fn open(&self, path: &str) -> TeamserverResult<Arc<dyn Extension>> {
        let factory = self.factories.get(path).ok_or_else(|| {
            TeamserverError::LoadError(format!("no extension registered as '{}'", path))
        })?;
        factory
            .create()
            .await
            .map_err(|e| TeamserverError::LoadError(format!("{}: {:#}", path, e)))
    }

    fn available(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

/// An explicit in-process list, for embedders and tests.
#[derive(Default)]
pub struct StaticProvider {
    extensions: Vec<(String, Arc<dyn Extension>)>,
}

impl StaticProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_extension(mut self, path: impl Into<String>, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push((path.into(), extension));
        self
    }
}

#[async_trait]
impl ExtensionProvider for StaticProvider {
    async fn open(&self, path: &str) -> TeamserverResult<Arc<dyn Extension>> {
        self.extensions
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, ext)| ext.clone())
            .ok_or_else(|| TeamserverError::LoadError(format!("no extension at '{}'", path)))
    }

    fn available(&self) -> Vec<String> {
        self.extensions.iter().map(|(p, _)| p.clone()).collect()
    }
}

enum Advertised {
    Agent(AgentTypeInfo),
    Listener(ListenerTypeInfo),
}

/// Loads extensions into the plugin registry.
///
/// One load runs at a time. A plugin only becomes visible once every step
/// has passed: open, describe, name check, uniqueness, capability check,
/// self-registration. Its catalog type is announced after that.
pub struct PluginLoader {
    provider: Arc<dyn ExtensionProvider>,
    load_lock: Mutex<()>,
}

impl PluginLoader {
    pub fn new(provider: Arc<dyn ExtensionProvider>) -> Self {
        Self {
            provider,
            load_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn available(&self) -> Vec<String> {
        self.provider.available()
    }

    pub async fn load(&self, core: &Arc<Teamserver>, path: &str) -> TeamserverResult<Arc<Plugin>> {
        let _guard = self.load_lock.lock().await;

        let extension = self.provider.open(path).await?;
        debug!(extension = %path, "Extension opened");

        let handle: Arc<dyn CoreHandle> = Arc::new(PluginHandle::new(Arc::downgrade(core), path));
        let descriptor = extension.register(handle);

        validate_plugin_name(&descriptor.name)?;

        if core.plugins.contains(&descriptor.name) {
            return Err(TeamserverError::AlreadyRegistered(descriptor.name));
        }

        let capability = match descriptor.kind {
            PluginKind::Agent => extension.clone().as_agent().map(Capability::Agent),
            PluginKind::Listener => extension.clone().as_listener().map(Capability::Listener),
            PluginKind::Management => extension.clone().as_management().map(Capability::Management),
        }
        .ok_or_else(|| TeamserverError::InterfaceIncomplete {
            plugin: descriptor.name.clone(),
            missing: descriptor.kind.capability_name().to_string(),
        })?;

        let advertised = match &capability {
            Capability::Agent(agent) => {
                let info = agent
                    .agent_register()
                    .await
                    .map_err(|e| TeamserverError::delegate(&descriptor.name, e))?;
                core.catalog.check_agent_type(&descriptor.name)?;
                Some(Advertised::Agent(info))
            }
            Capability::Listener(listener) => {
                let info = listener
                    .listener_register()
                    .await
                    .map_err(|e| TeamserverError::delegate(&descriptor.name, e))?;
                core.catalog.check_listener_type(&descriptor.name, &info)?;
                Some(Advertised::Listener(info))
            }
            Capability::Management(_) => None,
        };
        let data = match &advertised {
            Some(Advertised::Agent(info)) => serde_json::to_value(info).unwrap_or(Value::Null),
            Some(Advertised::Listener(info)) => serde_json::to_value(info).unwrap_or(Value::Null),
            None => Value::Null,
        };

        // registry before catalog: an advertised type always resolves
        let plugin = Arc::new(Plugin::new(descriptor, data, capability));
        core.plugins.insert_once(plugin.clone())?;

        let announced = match advertised {
            Some(Advertised::Agent(info)) => core.catalog.register_agent_type(plugin.name(), info),
            Some(Advertised::Listener(info)) => {
                core.catalog.register_listener_type(plugin.name(), info)
            }
            None => Ok(()),
        };
        if let Err(e) = announced {
            // a handle registered the same type while this load was running
            core.plugins.withdraw(plugin.name());
            warn!(plugin = %plugin.name(), error = %e, "⚠️ Plugin type taken during load, plugin withdrawn");
            return Err(e);
        }

        info!(
            plugin = %plugin.name(),
            kind = %plugin.kind(),
            version = %plugin.descriptor().version,
            "🔌 Plugin loaded"
        );
        Ok(plugin)
    }

    /// Loads `paths` in order, or everything available when `paths` is empty.
    /// Failures are logged and announced, never fatal.
    pub async fn load_all(&self, core: &Arc<Teamserver>, paths: &[String]) -> Vec<Arc<Plugin>> {
        let paths = if paths.is_empty() {
            self.provider.available()
        } else {
            paths.to_vec()
        };

        let mut loaded = Vec::with_capacity(paths.len());
        for path in &paths {
            match self.load(core, path).await {
                Ok(plugin) => loaded.push(plugin),
                Err(e) => {
                    error!(extension = %path, error = %e, "❌ Failed to load plugin");
                    core.events.emit(EventData::Log {
                        text: format!("failed to load plugin {}: {}", path, e),
                    });
                }
            }
        }
        loaded
    }
}

/// The restricted handle given to each extension.
///
/// Holds the core weakly: plugins live inside the core, and a strong
/// reference would keep it alive forever.
pub struct PluginHandle {
    core: Weak<Teamserver>,
    extension: String,
}

impl PluginHandle {
    pub fn new(core: Weak<Teamserver>, extension: &str) -> Self {
        Self {
            core,
            extension: extension.to_string(),
        }
    }

    fn core(&self) -> TeamserverResult<Arc<Teamserver>> {
        self.core.upgrade().ok_or(TeamserverError::ShuttingDown)
    }
}

#[async_trait]
impl CoreHandle for PluginHandle {
    fn log_info(&self, message: &str) {
        info!(extension = %self.extension, "{}", message);
    }

    fn log_warn(&self, message: &str) {
        warn!(extension = %self.extension, "{}", message);
    }

    fn log_error(&self, message: &str) {
        error!(extension = %self.extension, "{}", message);
    }

    fn log_debug(&self, message: &str) {
        debug!(extension = %self.extension, "{}", message);
    }

    fn version(&self) -> String {
        crate::VERSION.to_string()
    }

    async fn agent_register_type(&self, name: &str, info: AgentTypeInfo) -> TeamserverResult<()> {
        self.core()?.catalog.register_agent_type(name, info)
    }

    async fn listener_register_type(
        &self,
        name: &str,
        info: ListenerTypeInfo,
    ) -> TeamserverResult<()> {
        self.core()?.catalog.register_listener_type(name, info)
    }

    fn listener_protocol(&self, name: &str) -> TeamserverResult<String> {
        self.core()?.listeners.protocol(name)
    }

    fn listener_log(&self, name: &str, log: &str) {
        if let Ok(core) = self.core() {
            core.listeners.log(name, log);
        }
    }

    fn agent_exists(&self, uuid: &str) -> bool {
        self.core().map(|c| c.agents.exists(uuid)).unwrap_or(false)
    }

    async fn agent_initialize(&self, agent: NewAgent) -> TeamserverResult<()> {
        self.core()?.agents.initialize(agent).await
    }

    async fn agent_set_status(&self, uuid: &str, status: &str) -> TeamserverResult<()> {
        self.core()?.agents.set_status(uuid, status).await
    }

    async fn agent_execute(&self, uuid: &str, command: Value, wait: bool) -> TeamserverResult<Value> {
        self.core()?.agents.execute(uuid, command, wait).await
    }

    fn agent_callback(&self, uuid: &str, data: Value) {
        if let Ok(core) = self.core() {
            core.agents.callback(uuid, data);
        }
    }

    async fn agent_console(&self, uuid: &str, data: Value) {
        if let Ok(core) = self.core() {
            core.agents.console(uuid, data).await;
        }
    }

    fn agent_heartbeat(&self, uuid: &str, time: &str) {
        if let Ok(core) = self.core() {
            core.agents.heartbeat(uuid, time);
        }
    }

    fn agent_build_log(&self, context: &BuildContext, log: &str) {
        if let Ok(core) = self.core() {
            core.agents.build_log(context, log);
        }
    }

    async fn agent_process(
        &self,
        agent_type: &str,
        context: Value,
        request: Vec<u8>,
    ) -> TeamserverResult<Vec<u8>> {
        self.core()?.agents.process(agent_type, context, request).await
    }
}
