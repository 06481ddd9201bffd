use async_trait::async_trait;
use serde_json::Value;

use crate::{AgentTypeInfo, BuildContext, ListenerTypeInfo, NewAgent, TeamserverResult};

/// The narrow view of the teamserver a plugin receives at registration.
///
/// Plugins never see the registries themselves: everything they may change
/// goes through this handle, and each call lands on the same code path an
/// operator request would.
#[async_trait]
pub trait CoreHandle: Send + Sync {
    fn log_info(&self, message: &str);
    fn log_warn(&self, message: &str);
    fn log_error(&self, message: &str);
    fn log_debug(&self, message: &str);

    /// Teamserver version string.
    fn version(&self) -> String;

    async fn agent_register_type(&self, name: &str, info: AgentTypeInfo) -> TeamserverResult<()>;
    async fn listener_register_type(
        &self,
        name: &str,
        info: ListenerTypeInfo,
    ) -> TeamserverResult<()>;

    /// Protocol of a running listener.
    fn listener_protocol(&self, name: &str) -> TeamserverResult<String>;
    fn listener_log(&self, name: &str, log: &str);

    fn agent_exists(&self, uuid: &str) -> bool;
    async fn agent_initialize(&self, agent: NewAgent) -> TeamserverResult<()>;
    async fn agent_set_status(&self, uuid: &str, status: &str) -> TeamserverResult<()>;
    /// Tasks an agent through its owning plugin, as an operator would.
    async fn agent_execute(&self, uuid: &str, command: Value, wait: bool) -> TeamserverResult<Value>;
    fn agent_callback(&self, uuid: &str, data: Value);
    async fn agent_console(&self, uuid: &str, data: Value);
    fn agent_heartbeat(&self, uuid: &str, time: &str);
    fn agent_build_log(&self, context: &BuildContext, log: &str);

    /// Routes raw check-in bytes to the plugin owning `agent_type`.
    async fn agent_process(
        &self,
        agent_type: &str,
        context: Value,
        request: Vec<u8>,
    ) -> TeamserverResult<Vec<u8>>;
}
