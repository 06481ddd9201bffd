use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata an agent plugin advertises for its payload type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentTypeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata a listener plugin advertises for its protocol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListenerTypeInfo {
    pub protocol: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What a listener plugin reports after starting or restoring a listener.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerStartResult {
    pub status: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Who asked for a payload build, and which agent type builds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    #[serde(rename = "name")]
    pub agent_type: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedPayload {
    pub filename: String,
    pub binary: Vec<u8>,
    #[serde(default)]
    pub context: Value,
}

/// A freshly checked-in agent, as reported by its plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAgent {
    pub uuid: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub meta: Value,
}

/// Persisted agent state handed back to the owning plugin at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub uuid: String,
    pub parent: Option<String>,
    pub status: String,
    pub note: String,
    pub metadata: Value,
}

/// Behaviour of an agent (implant) type: payload builds, tasking and
/// the inbound check-in path.
///
/// No method has a default body, so a plugin that forgets one does not
/// compile.
#[async_trait]
pub trait AgentCapability: Send + Sync {
    async fn agent_register(&self) -> anyhow::Result<AgentTypeInfo>;

    async fn agent_generate(
        &self,
        context: BuildContext,
        config: Value,
    ) -> anyhow::Result<GeneratedPayload>;

    async fn agent_restore(&self, snapshot: AgentSnapshot) -> anyhow::Result<()>;

    /// `wait` asks for a synchronous result; bounding that wait is up to the plugin.
    async fn agent_execute(&self, uuid: &str, command: Value, wait: bool) -> anyhow::Result<Value>;

    async fn agent_process(&self, context: Value, request: Vec<u8>) -> anyhow::Result<Vec<u8>>;

    async fn agent_get(&self, uuid: &str) -> anyhow::Result<Value>;

    /// Notified after a note or status change. May hand back fresh metadata to persist.
    async fn agent_update(&self, uuid: &str) -> anyhow::Result<Option<Value>>;

    async fn agent_remove(&self, uuid: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ListenerCapability: Send + Sync {
    async fn listener_register(&self) -> anyhow::Result<ListenerTypeInfo>;

    async fn listener_start(
        &self,
        name: &str,
        options: Option<Value>,
    ) -> anyhow::Result<ListenerStartResult>;

    async fn listener_restore(
        &self,
        name: &str,
        status: &str,
        config: Value,
    ) -> anyhow::Result<ListenerStartResult>;

    async fn listener_edit(&self, name: &str, config: Value) -> anyhow::Result<()>;

    async fn listener_stop(&self, name: &str) -> anyhow::Result<String>;

    async fn listener_restart(&self, name: &str) -> anyhow::Result<String>;

    async fn listener_remove(&self, name: &str) -> anyhow::Result<()>;

    async fn listener_event(&self, name: &str, event: Value) -> anyhow::Result<Value>;

    async fn listener_config(&self, name: &str) -> anyhow::Result<Value>;
}

/// Management plugins carry no behaviour yet.
pub trait ManagementCapability: Send + Sync {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listener_type_info_keeps_unknown_fields() {
        let info: ListenerTypeInfo = serde_json::from_value(json!({
            "protocol": "http",
            "secure": true,
            "default_port": 443
        }))
        .unwrap();
        assert_eq!(info.protocol, "http");
        assert_eq!(info.extra["default_port"], 443);

        let back = serde_json::to_value(&info).unwrap();
        assert_eq!(back["secure"], true);
    }

    #[test]
    fn build_context_uses_wire_names() {
        let ctx: BuildContext =
            serde_json::from_value(json!({"name": "demo", "user": "neo"})).unwrap();
        assert_eq!(ctx.agent_type, "demo");
    }

    #[test]
    fn start_result_tolerates_missing_endpoint() {
        let res: ListenerStartResult = serde_json::from_value(json!({"status": "online"})).unwrap();
        assert_eq!(res.host, None);
        assert_eq!(res.port, None);
    }
}
