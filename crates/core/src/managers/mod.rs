pub mod agents;
pub mod catalog;
pub mod listeners;
pub mod plugin;
pub mod registry;

pub use agents::{AgentRegistry, AgentSummary};
pub use catalog::{AgentType, ListenerType, TypeCatalog};
pub use listeners::{ListenerInstance, ListenerRegistry};
pub use plugin::{
    validate_plugin_name, ExtensionProvider, InventoryProvider, PluginHandle, PluginLoader,
    StaticProvider,
};
pub use registry::{Capability, Plugin, PluginInfo, PluginRegistry};
