use std::sync::{Arc, PoisonError, RwLock};

use teamserver_shared::{
    AgentTypeInfo, EventData, ListenerTypeInfo, TeamserverError, TeamserverResult,
    TypeDescriptor,
};
use tracing::info;

use crate::events::EventBus;

pub type AgentType = TypeDescriptor<AgentTypeInfo>;
pub type ListenerType = TypeDescriptor<ListenerTypeInfo>;

/// Advertised agent types and listener protocols.
///
/// Append-only. Readers clone an `Arc` snapshot and never wait on a
/// registration in progress.
pub struct TypeCatalog {
    agents: RwLock<Arc<Vec<AgentType>>>,
    listeners: RwLock<Arc<Vec<ListenerType>>>,
    events: Arc<EventBus>,
}

impl TypeCatalog {
    #[must_use]
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            agents: RwLock::new(Arc::new(Vec::new())),
            listeners: RwLock::new(Arc::new(Vec::new())),
            events,
        }
    }

    fn agent_type_free(agents: &[AgentType], name: &str) -> TeamserverResult<()> {
        if agents.iter().any(|t| t.name == name) {
            return Err(TeamserverError::AlreadyExists(format!("agent type {}", name)));
        }
        Ok(())
    }

    fn listener_type_free(
        listeners: &[ListenerType],
        name: &str,
        info: &ListenerTypeInfo,
    ) -> TeamserverResult<()> {
        if info.protocol.trim().is_empty() {
            return Err(TeamserverError::InvalidArgument(format!(
                "listener type {} declares an empty protocol",
                name
            )));
        }
        if listeners.iter().any(|t| t.name == name) {
            return Err(TeamserverError::AlreadyExists(format!("listener type {}", name)));
        }
        if listeners.iter().any(|t| t.metadata.protocol == info.protocol) {
            return Err(TeamserverError::AlreadyExists(format!("protocol {}", info.protocol)));
        }
        Ok(())
    }

    /// Whether `register_agent_type(name, ..)` would be accepted right now.
    pub fn check_agent_type(&self, name: &str) -> TeamserverResult<()> {
        Self::agent_type_free(&self.agent_types(), name)
    }

    /// Whether `register_listener_type(name, info)` would be accepted right now.
    pub fn check_listener_type(&self, name: &str, info: &ListenerTypeInfo) -> TeamserverResult<()> {
        Self::listener_type_free(&self.listener_types(), name, info)
    }

    pub fn register_agent_type(&self, name: &str, info: AgentTypeInfo) -> TeamserverResult<()> {
        let descriptor = TypeDescriptor {
            name: name.to_string(),
            metadata: info,
        };

        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        Self::agent_type_free(&agents, name)?;
        let mut next = agents.as_ref().clone();
        next.push(descriptor.clone());
        *agents = Arc::new(next);

        // broadcast under the lock so catalog order and event order agree
        self.events.emit(EventData::AgentRegisterType(descriptor));
        info!(agent_type = %name, "🧬 Agent type registered");
        Ok(())
    }

    pub fn register_listener_type(
        &self,
        name: &str,
        info: ListenerTypeInfo,
    ) -> TeamserverResult<()> {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        Self::listener_type_free(&listeners, name, &info)?;

        let protocol = info.protocol.clone();
        let descriptor = TypeDescriptor {
            name: name.to_string(),
            metadata: info,
        };
        let mut next = listeners.as_ref().clone();
        next.push(descriptor.clone());
        *listeners = Arc::new(next);

        self.events.emit(EventData::ListenerRegisterType(descriptor));
        info!(listener_type = %name, protocol = %protocol, "📡 Listener protocol registered");
        Ok(())
    }

    #[must_use]
    pub fn agent_type_exists(&self, name: &str) -> bool {
        self.agent_types().iter().any(|t| t.name == name)
    }

    #[must_use]
    pub fn protocol_exists(&self, protocol: &str) -> bool {
        self.protocol_owner(protocol).is_some()
    }

    /// Name of the plugin that registered `protocol`.
    #[must_use]
    pub fn protocol_owner(&self, protocol: &str) -> Option<String> {
        self.listener_types()
            .iter()
            .find(|t| t.metadata.protocol == protocol)
            .map(|t| t.name.clone())
    }

    #[must_use]
    pub fn agent_types(&self) -> Arc<Vec<AgentType>> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn listener_types(&self) -> Arc<Vec<ListenerType>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
