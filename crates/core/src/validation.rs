use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 64, message = "Username must be 1-64 characters"))]
    pub username: String,

    #[validate(length(min = 1, max = 256, message = "Password must be 1-256 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AgentRequest {
    #[validate(length(min = 1, max = 128, message = "Agent uuid must be 1-128 characters"))]
    pub uuid: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AgentExecuteRequest {
    #[validate(length(min = 1, max = 128, message = "Agent uuid must be 1-128 characters"))]
    pub uuid: String,

    pub command: Value,

    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AgentNoteRequest {
    #[validate(length(min = 1, max = 128, message = "Agent uuid must be 1-128 characters"))]
    pub uuid: String,

    #[validate(length(max = 4096, message = "Note must be at most 4096 characters"))]
    pub note: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AgentBuildRequest {
    #[validate(length(min = 1, max = 128, message = "Agent type must be 1-128 characters"))]
    pub agent: String,

    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListenerStartRequest {
    #[validate(length(min = 1, max = 128, message = "Listener name must be 1-128 characters"))]
    pub name: String,

    #[validate(length(min = 1, max = 64, message = "Protocol must be 1-64 characters"))]
    pub protocol: String,

    /// Absent options restart an existing listener.
    pub options: Option<Value>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListenerRequest {
    #[validate(length(min = 1, max = 128, message = "Listener name must be 1-128 characters"))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListenerEditRequest {
    #[validate(length(min = 1, max = 128, message = "Listener name must be 1-128 characters"))]
    pub name: String,

    pub config: Value,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListenerEventRequest {
    #[validate(length(min = 1, max = 128, message = "Listener name must be 1-128 characters"))]
    pub name: String,

    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PluginResourceRequest {
    #[validate(length(min = 1, max = 64, message = "Plugin name must be 1-64 characters"))]
    pub name: String,

    #[validate(length(min = 1, max = 255, message = "Resource name must be 1-255 characters"))]
    pub file: String,
}

/// Validation helper function
pub fn validate_request<T: Validate>(req: &T) -> Result<(), String> {
    req.validate()
        .map_err(|e| format!("Validation error: {}", e))
}
