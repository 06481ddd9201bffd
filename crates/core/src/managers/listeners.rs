use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{info, warn};

use teamserver_shared::{EventData, ListenerCapability, TeamserverError, TeamserverResult};

use super::catalog::TypeCatalog;
use super::registry::PluginRegistry;
use crate::db::{ListenerRow, Persistence};
use crate::events::EventBus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerInstance {
    pub name: String,
    pub protocol: String,
    pub host: String,
    pub port: Option<u16>,
    pub status: String,
    #[serde(skip)]
    pub config_dir: PathBuf,
}

/// Running listeners, in start order.
///
/// `ops` serializes every command so removal and status changes never
/// interleave. `list` is only held for short reads and writes, which keeps
/// plugin callbacks such as `protocol` usable while a command is in flight.
pub struct ListenerRegistry {
    ops: Mutex<()>,
    list: RwLock<Vec<ListenerInstance>>,
    plugins: Arc<PluginRegistry>,
    catalog: Arc<TypeCatalog>,
    events: Arc<EventBus>,
    store: Arc<dyn Persistence>,
    listeners_dir: PathBuf,
}

/// Listener names become directory names, so they must stay one path component.
fn validate_name(name: &str) -> TeamserverResult<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.len() > 128
    {
        return Err(TeamserverError::InvalidArgument(format!(
            "invalid listener name '{}'",
            name
        )));
    }
    Ok(())
}

impl ListenerRegistry {
    pub fn new(
        plugins: Arc<PluginRegistry>,
        catalog: Arc<TypeCatalog>,
        events: Arc<EventBus>,
        store: Arc<dyn Persistence>,
        listeners_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ops: Mutex::new(()),
            list: RwLock::new(Vec::new()),
            plugins,
            catalog,
            events,
            store,
            listeners_dir: listeners_dir.into(),
        }
    }

    fn find(&self, name: &str) -> Option<ListenerInstance> {
        self.list
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|l| l.name == name)
            .cloned()
    }

    fn instance(&self, name: &str) -> TeamserverResult<ListenerInstance> {
        self.find(name)
            .ok_or_else(|| TeamserverError::ListenerNotFound(name.to_string()))
    }

    fn update_status(&self, name: &str, status: &str) {
        let mut list = self.list.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(listener) = list.iter_mut().find(|l| l.name == name) {
            listener.status = status.to_string();
        }
    }

    /// Plugin that serves `protocol`, with its name for error reporting.
    fn owner(&self, protocol: &str) -> TeamserverResult<(String, Arc<dyn ListenerCapability>)> {
        let owner = self
            .catalog
            .protocol_owner(protocol)
            .ok_or_else(|| TeamserverError::ProtocolNotFound(protocol.to_string()))?;
        let plugin = self.plugins.listener(&owner)?;
        Ok((owner, plugin))
    }

    #[must_use]
    pub fn config_path(&self, name: &str) -> PathBuf {
        self.listeners_dir.join(name)
    }

    async fn ensure_dir(path: &Path) -> TeamserverResult<()> {
        tokio::fs::create_dir_all(path).await.map_err(|e| {
            TeamserverError::Persistence(format!(
                "failed to create listener config path {}: {}",
                path.display(),
                e
            ))
        })
    }

    #[must_use]
    pub fn list(&self) -> Vec<ListenerInstance> {
        self.list
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn protocol(&self, name: &str) -> TeamserverResult<String> {
        Ok(self.instance(name)?.protocol)
    }

    /// Starts a new listener, or restarts an existing one when `options` is `None`.
    pub async fn start(
        &self,
        name: &str,
        protocol: &str,
        options: Option<Value>,
    ) -> TeamserverResult<()> {
        validate_name(name)?;
        let _ops = self.ops.lock().await;

        let (owner, plugin) = self.owner(protocol)?;

        if let Some(existing) = self.find(name) {
            if options.is_some() {
                return Err(TeamserverError::AlreadyExists(format!("listener {}", name)));
            }
            if existing.protocol != protocol {
                return Err(TeamserverError::InvalidArgument(format!(
                    "listener {} runs protocol {}, not {}",
                    name, existing.protocol, protocol
                )));
            }

            let result = plugin
                .listener_start(name, None)
                .await
                .map_err(|e| TeamserverError::delegate(&owner, e))?;

            self.update_status(name, &result.status);
            self.persist_status(name, &result.status, plugin.as_ref()).await;
            info!(listener = %name, status = %result.status, "🔁 Listener restarted through start");
            self.events.emit(EventData::ListenerStart {
                name: name.to_string(),
                protocol: None,
                host: None,
                port: None,
                status: result.status,
            });
            return Ok(());
        }

        let config_dir = self.config_path(name);
        Self::ensure_dir(&config_dir).await?;

        let result = plugin
            .listener_start(name, options.clone())
            .await
            .map_err(|e| TeamserverError::delegate(&owner, e))?;

        let instance = ListenerInstance {
            name: name.to_string(),
            protocol: protocol.to_string(),
            host: result.host.clone().unwrap_or_default(),
            port: result.port,
            status: result.status.clone(),
            config_dir,
        };
        self.list
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(instance.clone());

        let row = ListenerRow {
            name: name.to_string(),
            protocol: protocol.to_string(),
            status: result.status.clone(),
            config: serde_json::to_vec(&options.unwrap_or(Value::Null)).unwrap_or_default(),
        };
        if let Err(e) = self.store.listener_insert(&row).await {
            // the listener is up; storage falling behind is not fatal
            warn!(listener = %name, error = %e, "⚠️ Failed to persist listener");
        }

        info!(listener = %name, protocol = %protocol, host = %instance.host, port = ?instance.port, "📡 Listener started");
        self.events.emit(EventData::ListenerStart {
            name: instance.name,
            protocol: Some(instance.protocol),
            host: Some(instance.host),
            port: instance.port,
            status: instance.status,
        });
        Ok(())
    }

    // Best-effort: writes the status and the plugin's current config.
    async fn persist_status(&self, name: &str, status: &str, plugin: &dyn ListenerCapability) {
        let config = match plugin.listener_config(name).await {
            Ok(config) => config,
            Err(e) => {
                warn!(listener = %name, error = %format!("{:#}", e), "⚠️ Failed to read listener config");
                return;
            }
        };
        let blob = serde_json::to_vec(&config).unwrap_or_default();
        if let Err(e) = self.store.listener_update(name, status, &blob).await {
            warn!(listener = %name, error = %e, "⚠️ Failed to persist listener status");
        }
    }

    pub async fn stop(&self, name: &str) -> TeamserverResult<()> {
        let _ops = self.ops.lock().await;
        let instance = self.instance(name)?;
        let (owner, plugin) = self.owner(&instance.protocol)?;

        let status = plugin
            .listener_stop(name)
            .await
            .map_err(|e| TeamserverError::delegate(&owner, e))?;

        self.update_status(name, &status);
        self.persist_status(name, &status, plugin.as_ref()).await;
        info!(listener = %name, status = %status, "🛑 Listener stopped");
        self.events.emit(EventData::ListenerStop {
            name: name.to_string(),
            status,
        });
        Ok(())
    }

    pub async fn restart(&self, name: &str) -> TeamserverResult<()> {
        let _ops = self.ops.lock().await;
        let instance = self.instance(name)?;
        let (owner, plugin) = self.owner(&instance.protocol)?;

        let status = plugin
            .listener_restart(name)
            .await
            .map_err(|e| TeamserverError::delegate(&owner, e))?;

        self.update_status(name, &status);
        self.persist_status(name, &status, plugin.as_ref()).await;
        info!(listener = %name, status = %status, "🔁 Listener restarted");
        self.events.emit(EventData::ListenerStatus {
            name: name.to_string(),
            status,
        });
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> TeamserverResult<()> {
        let _ops = self.ops.lock().await;
        let instance = self.instance(name)?;
        let (owner, plugin) = self.owner(&instance.protocol)?;

        plugin
            .listener_remove(name)
            .await
            .map_err(|e| TeamserverError::delegate(&owner, e))?;

        self.list
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|l| l.name != name);

        if let Err(e) = self.store.listener_remove(name).await {
            warn!(listener = %name, error = %e, "⚠️ Failed to delete persisted listener");
        }
        info!(listener = %name, "🗑️ Listener removed");
        self.events.emit(EventData::ListenerRemove {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Hands `config` to the plugin untouched, then persists it.
    pub async fn edit(&self, name: &str, config: Value) -> TeamserverResult<()> {
        let _ops = self.ops.lock().await;
        let instance = self.instance(name)?;
        let (owner, plugin) = self.owner(&instance.protocol)?;

        let blob = serde_json::to_vec(&config).unwrap_or_default();
        plugin
            .listener_edit(name, config)
            .await
            .map_err(|e| TeamserverError::delegate(&owner, e))?;

        let status = self.instance(name).map(|l| l.status).unwrap_or(instance.status);
        if let Err(e) = self.store.listener_update(name, &status, &blob).await {
            warn!(listener = %name, error = %e, "⚠️ Failed to persist listener config");
        }
        Ok(())
    }

    pub async fn config(&self, name: &str) -> TeamserverResult<Value> {
        let instance = self.instance(name)?;
        let (owner, plugin) = self.owner(&instance.protocol)?;
        plugin
            .listener_config(name)
            .await
            .map_err(|e| TeamserverError::delegate(&owner, e))
    }

    /// Custom control message for the listener's plugin.
    pub async fn event(&self, name: &str, payload: Value) -> TeamserverResult<Value> {
        let instance = self.instance(name)?;
        let (owner, plugin) = self.owner(&instance.protocol)?;
        plugin
            .listener_event(name, payload)
            .await
            .map_err(|e| TeamserverError::delegate(&owner, e))
    }

    pub fn log(&self, name: &str, log: &str) {
        self.events.emit(EventData::ListenerLog {
            name: name.to_string(),
            log: log.to_string(),
        });
    }

    /// Startup only: resumes a persisted listener through its plugin.
    /// Emits nothing and writes nothing back.
    pub async fn restore(&self, row: ListenerRow) -> TeamserverResult<ListenerInstance> {
        validate_name(&row.name)?;
        let config: Value = serde_json::from_slice(&row.config).map_err(|e| {
            TeamserverError::InvalidArgument(format!("listener {} config: {}", row.name, e))
        })?;

        let _ops = self.ops.lock().await;
        let (owner, plugin) = self.owner(&row.protocol)?;
        if self.find(&row.name).is_some() {
            return Err(TeamserverError::AlreadyExists(format!("listener {}", row.name)));
        }

        let config_dir = self.config_path(&row.name);
        Self::ensure_dir(&config_dir).await?;

        let result = plugin
            .listener_restore(&row.name, &row.status, config)
            .await
            .map_err(|e| TeamserverError::delegate(&owner, e))?;

        let instance = ListenerInstance {
            name: row.name,
            protocol: row.protocol,
            host: result.host.unwrap_or_default(),
            port: result.port,
            status: result.status,
            config_dir,
        };
        self.list
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(instance.clone());
        Ok(instance)
    }
}
