use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

mod capability;
mod error;
mod event;
mod handle;

pub use capability::{
    AgentCapability, AgentSnapshot, AgentTypeInfo, BuildContext, GeneratedPayload,
    ListenerCapability, ListenerStartResult, ListenerTypeInfo, ManagementCapability, NewAgent,
};
pub use error::{ErrorKind, TeamserverError, TeamserverResult};
pub use event::{Event, EventData, EventKind, TypeDescriptor};
pub use handle::CoreHandle;

pub use inventory;
pub use teamserver_macros::teamserver_plugin;

/// SDK version reported by plugins built with the attribute macro.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginKind {
    Agent,
    Listener,
    Management,
}

impl PluginKind {
    /// Name of the capability trait a plugin of this kind must provide.
    pub fn capability_name(self) -> &'static str {
        match self {
            Self::Agent => "AgentCapability",
            Self::Listener => "ListenerCapability",
            Self::Management => "ManagementCapability",
        }
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// What an extension reports about itself from `register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub kind: PluginKind,
    pub version: String,
    pub author: String,
    /// Bundled files, readable by operators through the plugin resource call.
    #[serde(default)]
    pub resources: Vec<String>,
}

/// Downcasts from an extension to the capability its kind promises.
pub trait PluginCast {
    fn as_agent(self: Arc<Self>) -> Option<Arc<dyn AgentCapability>> {
        None
    }
    fn as_listener(self: Arc<Self>) -> Option<Arc<dyn ListenerCapability>> {
        None
    }
    fn as_management(self: Arc<Self>) -> Option<Arc<dyn ManagementCapability>> {
        None
    }
}

/// Entry point of a loadable extension.
pub trait Extension: PluginCast + Send + Sync {
    /// Called once at load time. Plugins keep `core` for later callbacks.
    fn register(&self, core: Arc<dyn CoreHandle>) -> PluginDescriptor;
}

#[async_trait]
pub trait PluginFactory: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> PluginKind;
    async fn create(&self) -> anyhow::Result<Arc<dyn Extension>>;
}

pub struct PluginRegistrar {
    pub factory: fn() -> Arc<dyn PluginFactory>,
}

inventory::collect!(PluginRegistrar);
