use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use teamserver_shared::{
    AgentCapability, ListenerCapability, ManagementCapability, PluginDescriptor, PluginKind,
    TeamserverError, TeamserverResult,
};

/// The capability object a loaded plugin exposes, fixed by its kind.
#[derive(Clone)]
pub enum Capability {
    Agent(Arc<dyn AgentCapability>),
    Listener(Arc<dyn ListenerCapability>),
    Management(Arc<dyn ManagementCapability>),
}

impl Capability {
    #[must_use]
    pub fn kind(&self) -> PluginKind {
        match self {
            Self::Agent(_) => PluginKind::Agent,
            Self::Listener(_) => PluginKind::Listener,
            Self::Management(_) => PluginKind::Management,
        }
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Capability").field(&self.kind()).finish()
    }
}

/// A fully registered plugin. Never mutated once it is in the registry.
#[derive(Debug)]
pub struct Plugin {
    descriptor: PluginDescriptor,
    data: Value,
    capability: Capability,
}

impl Plugin {
    #[must_use]
    pub fn new(descriptor: PluginDescriptor, data: Value, capability: Capability) -> Self {
        Self {
            descriptor,
            data,
            capability,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    #[must_use]
    pub fn kind(&self) -> PluginKind {
        self.capability.kind()
    }

    #[must_use]
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// What the plugin's own registration call returned.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    #[must_use]
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    #[must_use]
    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.descriptor.name.clone(),
            kind: self.kind(),
            version: self.descriptor.version.clone(),
            author: self.descriptor.author.clone(),
            resources: self.descriptor.resources.clone(),
            data: self.data.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub kind: PluginKind,
    pub version: String,
    pub author: String,
    pub resources: Vec<String>,
    pub data: Value,
}

/// Insert-once map of loaded plugins, read on every agent callback.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: DashMap<String, Arc<Plugin>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Plugin>> {
        self.plugins.get(name).map(|p| p.value().clone())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Snapshot sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<PluginInfo> {
        let mut list: Vec<PluginInfo> = self.plugins.iter().map(|p| p.info()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn insert_once(&self, plugin: Arc<Plugin>) -> TeamserverResult<()> {
        match self.plugins.entry(plugin.name().to_string()) {
            Entry::Occupied(e) => Err(TeamserverError::AlreadyRegistered(e.key().clone())),
            Entry::Vacant(e) => {
                e.insert(plugin);
                Ok(())
            }
        }
    }

    /// Takes back a plugin whose load failed after it was inserted.
    pub(crate) fn withdraw(&self, name: &str) -> Option<Arc<Plugin>> {
        self.plugins.remove(name).map(|(_, plugin)| plugin)
    }

    /// The agent capability of `name`.
    pub fn agent(&self, name: &str) -> TeamserverResult<Arc<dyn AgentCapability>> {
        match self.get(name).map(|p| p.capability().clone()) {
            Some(Capability::Agent(agent)) => Ok(agent),
            _ => Err(TeamserverError::PluginNotFound(name.to_string())),
        }
    }

    /// The listener capability of `name`.
    pub fn listener(&self, name: &str) -> TeamserverResult<Arc<dyn ListenerCapability>> {
        match self.get(name).map(|p| p.capability().clone()) {
            Some(Capability::Listener(listener)) => Ok(listener),
            _ => Err(TeamserverError::PluginNotFound(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl ManagementCapability for Noop {}

    fn plugin(name: &str) -> Arc<Plugin> {
        Arc::new(Plugin::new(
            PluginDescriptor {
                name: name.to_string(),
                kind: PluginKind::Management,
                version: "1.0.0".to_string(),
                author: "ops".to_string(),
                resources: vec![],
            },
            Value::Null,
            Capability::Management(Arc::new(Noop)),
        ))
    }

    #[test]
    fn test_insert_once_rejects_duplicates() {
        let registry = PluginRegistry::new();
        registry.insert_once(plugin("mgmt")).unwrap();
        let err = registry.insert_once(plugin("mgmt")).unwrap_err();
        assert!(matches!(err, TeamserverError::AlreadyRegistered(name) if name == "mgmt"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_list_is_sorted() {
        let registry = PluginRegistry::new();
        registry.insert_once(plugin("zeta")).unwrap();
        registry.insert_once(plugin("alpha")).unwrap();
        let names: Vec<_> = registry.list().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_kind_mismatch_is_not_found() {
        let registry = PluginRegistry::new();
        registry.insert_once(plugin("mgmt")).unwrap();
        assert!(matches!(
            registry.agent("mgmt"),
            Err(TeamserverError::PluginNotFound(_))
        ));
        assert!(matches!(
            registry.listener("missing"),
            Err(TeamserverError::PluginNotFound(_))
        ));
    }
}
