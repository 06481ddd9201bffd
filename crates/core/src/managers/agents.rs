use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use teamserver_shared::{
    AgentCapability, AgentSnapshot, BuildContext, EventData, GeneratedPayload, NewAgent,
    TeamserverError, TeamserverResult,
};

use super::catalog::TypeCatalog;
use super::registry::PluginRegistry;
use crate::db::{AgentRow, Persistence};
use crate::events::EventBus;

tokio::task_local! {
    // uuids whose lock the current task holds across a plugin call
    static HELD: HashSet<String>;
}

fn held_by_current_task(uuid: &str) -> bool {
    HELD.try_with(|held| held.contains(uuid)).unwrap_or(false)
}

/// Runs a plugin call while `uuid` counts as held by this task, so the
/// plugin calling back on the same agent does not wait on its own caller.
async fn while_held<F: Future>(uuid: &str, call: F) -> F::Output {
    let mut held = HELD.try_with(|held| held.clone()).unwrap_or_default();
    held.insert(uuid.to_string());
    HELD.scope(held, call).await
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentSummary {
    pub uuid: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub parent: Option<String>,
    pub status: String,
    pub note: String,
}

struct AgentState {
    parent: Option<String>,
    status: String,
    note: String,
    removed: bool,
}

struct AgentEntry {
    agent_type: String,
    state: RwLock<AgentState>,
    // serializes mutations of this one agent
    op: Arc<Mutex<()>>,
}

impl AgentEntry {
    fn new(agent_type: &str, parent: Option<String>, status: String, note: String) -> Self {
        Self {
            agent_type: agent_type.to_string(),
            state: RwLock::new(AgentState {
                parent,
                status,
                note,
                removed: false,
            }),
            op: Arc::new(Mutex::new(())),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&AgentState) -> T) -> T {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut AgentState) -> T) -> T {
        f(&mut self.state.write().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Live agent sessions, keyed by uuid.
///
/// The registry is a liveness index: command history and implant detail
/// stay behind the owning plugin. Mutations on one uuid are serialized by
/// that entry's lock; different uuids never contend.
pub struct AgentRegistry {
    sessions: DashMap<String, Arc<AgentEntry>>,
    plugins: Arc<PluginRegistry>,
    catalog: Arc<TypeCatalog>,
    events: Arc<EventBus>,
    store: Arc<dyn Persistence>,
}

impl AgentRegistry {
    pub fn new(
        plugins: Arc<PluginRegistry>,
        catalog: Arc<TypeCatalog>,
        events: Arc<EventBus>,
        store: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            plugins,
            catalog,
            events,
            store,
        }
    }

    fn entry(&self, uuid: &str) -> TeamserverResult<Arc<AgentEntry>> {
        self.sessions
            .get(uuid)
            .map(|e| e.value().clone())
            .ok_or_else(|| TeamserverError::AgentNotFound(uuid.to_string()))
    }

    /// Takes the per-agent lock. Fails if the agent vanished while waiting.
    ///
    /// A plugin calling back on an agent whose operation is still running on
    /// the same task gets no guard: the outer operation already holds it.
    async fn lock(
        &self,
        uuid: &str,
    ) -> TeamserverResult<(Arc<AgentEntry>, Option<OwnedMutexGuard<()>>)> {
        let entry = self.entry(uuid)?;
        let guard = if held_by_current_task(uuid) {
            None
        } else {
            Some(entry.op.clone().lock_owned().await)
        };
        if entry.read(|s| s.removed) {
            return Err(TeamserverError::AgentNotFound(uuid.to_string()));
        }
        Ok((entry, guard))
    }

    fn capability(&self, agent_type: &str) -> TeamserverResult<Arc<dyn AgentCapability>> {
        self.plugins.agent(agent_type)
    }

    pub async fn initialize(&self, agent: NewAgent) -> TeamserverResult<()> {
        if agent.uuid.is_empty() {
            return Err(TeamserverError::InvalidArgument("agent uuid is empty".into()));
        }
        if self.sessions.contains_key(&agent.uuid) {
            return Err(TeamserverError::AlreadyExists(format!("agent {}", agent.uuid)));
        }
        self.capability(&agent.agent_type)
            .map_err(|_| TeamserverError::TypeNotFound(agent.agent_type.clone()))?;

        let entry = Arc::new(AgentEntry::new(
            &agent.agent_type,
            agent.parent.clone(),
            agent.status.clone(),
            agent.note.clone(),
        ));
        // nobody else can see the entry yet, so this never waits
        let _op = entry.op.clone().lock_owned().await;

        match self.sessions.entry(agent.uuid.clone()) {
            Entry::Occupied(_) => {
                return Err(TeamserverError::AlreadyExists(format!("agent {}", agent.uuid)))
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }

        info!(uuid = %agent.uuid, agent_type = %agent.agent_type, "🛰️ Agent initialized");
        self.events.emit(EventData::AgentInitialize {
            uuid: agent.uuid.clone(),
            agent_type: agent.agent_type.clone(),
            meta: agent.meta.clone(),
        });

        let row = AgentRow {
            uuid: agent.uuid.clone(),
            agent_type: agent.agent_type,
            parent: agent.parent,
            status: agent.status,
            note: agent.note,
            metadata: serde_json::to_vec(&agent.meta).unwrap_or_default(),
        };
        if let Err(e) = self.store.agent_insert(&row).await {
            warn!(uuid = %row.uuid, error = %e, "⚠️ Failed to persist new agent");
        }
        Ok(())
    }

    #[must_use]
    pub fn exists(&self, uuid: &str) -> bool {
        self.sessions.contains_key(uuid)
    }

    /// Live detail from the owning plugin.
    pub async fn data(&self, uuid: &str) -> TeamserverResult<Value> {
        let entry = self.entry(uuid)?;
        let plugin = self.capability(&entry.agent_type)?;
        plugin
            .agent_get(uuid)
            .await
            .map_err(|e| TeamserverError::delegate(&entry.agent_type, e))
    }

    pub fn agent_type(&self, uuid: &str) -> TeamserverResult<String> {
        Ok(self.entry(uuid)?.agent_type.clone())
    }

    pub fn note(&self, uuid: &str) -> TeamserverResult<String> {
        Ok(self.entry(uuid)?.read(|s| s.note.clone()))
    }

    pub fn status(&self, uuid: &str) -> TeamserverResult<String> {
        Ok(self.entry(uuid)?.read(|s| s.status.clone()))
    }

    pub fn summary(&self, uuid: &str) -> TeamserverResult<AgentSummary> {
        let entry = self.entry(uuid)?;
        Ok(Self::summarize(uuid, &entry))
    }

    fn summarize(uuid: &str, entry: &AgentEntry) -> AgentSummary {
        entry.read(|s| AgentSummary {
            uuid: uuid.to_string(),
            agent_type: entry.agent_type.clone(),
            parent: s.parent.clone(),
            status: s.status.clone(),
            note: s.note.clone(),
        })
    }

    /// Every live agent, sorted by uuid.
    #[must_use]
    pub fn list(&self) -> Vec<AgentSummary> {
        let mut list: Vec<AgentSummary> = self
            .sessions
            .iter()
            .map(|e| Self::summarize(e.key(), e.value()))
            .collect();
        list.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        list
    }

    pub async fn set_note(&self, uuid: &str, note: &str) -> TeamserverResult<()> {
        let (entry, op) = self.lock(uuid).await?;
        entry.write(|s| s.note = note.to_string());

        if let Err(e) = self.store.agent_set_note(uuid, note).await {
            warn!(uuid = %uuid, error = %e, "⚠️ Failed to persist agent note");
        }
        self.events.emit(EventData::AgentNote {
            uuid: uuid.to_string(),
            note: note.to_string(),
        });
        // a nested change is already inside a plugin call for this agent
        if op.is_some() {
            self.notify_update(uuid, &entry.agent_type).await;
        }
        Ok(())
    }

    pub async fn set_status(&self, uuid: &str, status: &str) -> TeamserverResult<()> {
        let (entry, op) = self.lock(uuid).await?;
        entry.write(|s| s.status = status.to_string());

        if let Err(e) = self.store.agent_set_status(uuid, status).await {
            warn!(uuid = %uuid, error = %e, "⚠️ Failed to persist agent status");
        }
        self.events.emit(EventData::AgentStatus {
            uuid: uuid.to_string(),
            status: status.to_string(),
        });
        if op.is_some() {
            self.notify_update(uuid, &entry.agent_type).await;
        }
        Ok(())
    }

    // Best-effort: the plugin's shadow copy may fall behind the registry.
    async fn notify_update(&self, uuid: &str, agent_type: &str) {
        let plugin = match self.capability(agent_type) {
            Ok(plugin) => plugin,
            Err(e) => {
                warn!(uuid = %uuid, error = %e, "⚠️ Agent update notification skipped");
                return;
            }
        };

        match while_held(uuid, plugin.agent_update(uuid)).await {
            Ok(Some(metadata)) => {
                let blob = serde_json::to_vec(&metadata).unwrap_or_default();
                if let Err(e) = self.store.agent_update(uuid, &blob).await {
                    warn!(uuid = %uuid, error = %e, "⚠️ Failed to persist agent metadata");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(uuid = %uuid, plugin = %agent_type, error = %format!("{:#}", e), "⚠️ Plugin failed to process agent update");
            }
        }
    }

    /// Asks the plugin to tear the agent down; only then forgets it.
    pub async fn remove(&self, uuid: &str) -> TeamserverResult<()> {
        if held_by_current_task(uuid) {
            return Err(TeamserverError::InvalidArgument(format!(
                "agent {} cannot be removed from inside its own plugin call",
                uuid
            )));
        }
        let (entry, _op) = self.lock(uuid).await?;
        let plugin = self.capability(&entry.agent_type)?;

        while_held(uuid, plugin.agent_remove(uuid))
            .await
            .map_err(|e| TeamserverError::delegate(&entry.agent_type, e))?;

        entry.write(|s| s.removed = true);
        self.sessions.remove(uuid);
        info!(uuid = %uuid, "🗑️ Agent removed");

        if let Err(e) = self.store.agent_remove(uuid).await {
            warn!(uuid = %uuid, error = %e, "⚠️ Failed to delete persisted agent");
        }
        self.events.emit(EventData::AgentRemove {
            uuid: uuid.to_string(),
        });
        Ok(())
    }

    pub async fn execute(&self, uuid: &str, command: Value, wait: bool) -> TeamserverResult<Value> {
        let entry = self.entry(uuid)?;
        let plugin = self.capability(&entry.agent_type)?;
        plugin
            .agent_execute(uuid, command, wait)
            .await
            .map_err(|e| TeamserverError::delegate(&entry.agent_type, e))
    }

    /// `execute(wait = true)` with a deadline. Giving up does not cancel the
    /// plugin call: it keeps running on its own task.
    pub async fn execute_timeout(
        &self,
        uuid: &str,
        command: Value,
        limit: Duration,
    ) -> TeamserverResult<Value> {
        let entry = self.entry(uuid)?;
        let plugin = self.capability(&entry.agent_type)?;
        let agent_type = entry.agent_type.clone();
        let task_uuid = uuid.to_string();

        let task =
            tokio::spawn(async move { plugin.agent_execute(&task_uuid, command, true).await });

        match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result.map_err(|e| TeamserverError::delegate(&agent_type, e)),
            Ok(Err(join)) => Err(TeamserverError::DelegateFailure {
                plugin: agent_type,
                message: format!("execute task aborted: {}", join),
            }),
            Err(_) => {
                debug!(uuid = %uuid, "⏱️ Gave up waiting on agent execute");
                Err(TeamserverError::Timeout(format!(
                    "agent {} did not answer within {}s",
                    uuid,
                    limit.as_secs()
                )))
            }
        }
    }

    /// Inbound check-in path: raw bytes from a listener, routed by claimed type.
    pub async fn process(
        &self,
        agent_type: &str,
        context: Value,
        request: Vec<u8>,
    ) -> TeamserverResult<Vec<u8>> {
        if !self.catalog.agent_type_exists(agent_type) {
            return Err(TeamserverError::TypeNotFound(agent_type.to_string()));
        }
        let plugin = self.capability(agent_type)?;
        plugin
            .agent_process(context, request)
            .await
            .map_err(|e| TeamserverError::delegate(agent_type, e))
    }

    pub async fn generate(
        &self,
        context: BuildContext,
        config: Value,
    ) -> TeamserverResult<GeneratedPayload> {
        if !self.catalog.agent_type_exists(&context.agent_type) {
            return Err(TeamserverError::TypeNotFound(context.agent_type.clone()));
        }
        let agent_type = context.agent_type.clone();
        let plugin = self.capability(&agent_type)?;
        info!(agent_type = %agent_type, user = %context.user, "🔨 Payload build requested");
        plugin
            .agent_generate(context, config)
            .await
            .map_err(|e| TeamserverError::delegate(&agent_type, e))
    }

    /// Startup only: rebuilds the entry and lets the plugin rehydrate from
    /// the persisted blob. Emits nothing and writes nothing back.
    pub async fn restore(&self, row: AgentRow) -> TeamserverResult<()> {
        let metadata: Value = serde_json::from_slice(&row.metadata).map_err(|e| {
            TeamserverError::InvalidArgument(format!("agent {} metadata: {}", row.uuid, e))
        })?;
        let plugin = self.capability(&row.agent_type)?;

        let entry = Arc::new(AgentEntry::new(
            &row.agent_type,
            row.parent.clone(),
            row.status.clone(),
            row.note.clone(),
        ));
        match self.sessions.entry(row.uuid.clone()) {
            Entry::Occupied(_) => {
                return Err(TeamserverError::AlreadyExists(format!("agent {}", row.uuid)))
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }

        let snapshot = AgentSnapshot {
            uuid: row.uuid.clone(),
            parent: row.parent,
            status: row.status,
            note: row.note,
            metadata,
        };
        if let Err(e) = plugin.agent_restore(snapshot).await {
            self.sessions.remove(&row.uuid);
            return Err(TeamserverError::delegate(&row.agent_type, e));
        }
        Ok(())
    }

    pub fn callback(&self, uuid: &str, data: Value) {
        self.events.emit(EventData::AgentCallback {
            uuid: uuid.to_string(),
            data,
        });
    }

    /// Console output: appended to the persisted history, then broadcast.
    pub async fn console(&self, uuid: &str, data: Value) {
        match serde_json::to_vec(&data) {
            Ok(entry) => {
                if let Err(e) = self.store.agent_console_insert(uuid, &entry).await {
                    warn!(uuid = %uuid, error = %e, "⚠️ Failed to persist console entry");
                }
            }
            Err(e) => warn!(uuid = %uuid, error = %e, "⚠️ Failed to encode console entry"),
        }

        self.events.emit(EventData::AgentConsole {
            uuid: uuid.to_string(),
            data,
        });
    }

    pub fn heartbeat(&self, uuid: &str, time: &str) {
        self.events.emit(EventData::AgentHeartbeat {
            uuid: uuid.to_string(),
            time: time.to_string(),
        });
    }

    /// Build output goes to the requesting operator only.
    pub fn build_log(&self, context: &BuildContext, log: &str) {
        let event = EventBus::create(EventData::AgentBuildLog {
            log: log.to_string(),
        });
        if let Err(e) = self.events.send(&context.user, event) {
            debug!(user = %context.user, error = %e, "Failed to deliver build log");
        }
    }

    /// Persisted console history, oldest first.
    pub async fn console_history(&self, uuid: &str) -> TeamserverResult<Vec<Value>> {
        let entries = self
            .store
            .agent_console(uuid)
            .await
            .map_err(|e| TeamserverError::Persistence(e.to_string()))?;

        Ok(entries
            .iter()
            .filter_map(|raw| match serde_json::from_slice(raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(uuid = %uuid, error = %e, "⚠️ Skipping unreadable console entry");
                    None
                }
            })
            .collect())
    }
}
