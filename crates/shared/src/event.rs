use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{AgentTypeInfo, ListenerTypeInfo};

/// Catalog entry advertising an agent type or a listener protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor<M> {
    pub name: String,
    pub metadata: M,
}

/// An immutable notification pushed to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub data: EventData,
}

impl Event {
    pub fn new(data: EventData) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventData {
    AgentInitialize {
        uuid: String,
        #[serde(rename = "type")]
        agent_type: String,
        meta: Value,
    },
    AgentStatus {
        uuid: String,
        status: String,
    },
    AgentNote {
        uuid: String,
        note: String,
    },
    AgentRemove {
        uuid: String,
    },
    AgentCallback {
        uuid: String,
        data: Value,
    },
    AgentConsole {
        uuid: String,
        data: Value,
    },
    AgentHeartbeat {
        uuid: String,
        time: String,
    },
    /// Sent only to the operator who requested the build.
    AgentBuildLog {
        log: String,
    },
    AgentRegisterType(TypeDescriptor<AgentTypeInfo>),
    ListenerRegisterType(TypeDescriptor<ListenerTypeInfo>),
    ListenerStart {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        protocol: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        status: String,
    },
    ListenerStop {
        name: String,
        status: String,
    },
    ListenerStatus {
        name: String,
        status: String,
    },
    ListenerRemove {
        name: String,
    },
    ListenerLog {
        name: String,
        log: String,
    },
    UserLogin {
        username: String,
    },
    UserLogout {
        username: String,
    },
    Log {
        text: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    AgentInitialize,
    AgentStatus,
    AgentNote,
    AgentRemove,
    AgentCallback,
    AgentConsole,
    AgentHeartbeat,
    AgentBuildLog,
    AgentRegisterType,
    ListenerRegisterType,
    ListenerStart,
    ListenerStop,
    ListenerStatus,
    ListenerRemove,
    ListenerLog,
    UserLogin,
    UserLogout,
    Log,
}

impl EventKind {
    /// Durable events are replayed to operators that connect later.
    pub fn is_durable(self) -> bool {
        matches!(self, Self::AgentRegisterType | Self::ListenerRegisterType)
    }
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::AgentInitialize { .. } => EventKind::AgentInitialize,
            Self::AgentStatus { .. } => EventKind::AgentStatus,
            Self::AgentNote { .. } => EventKind::AgentNote,
            Self::AgentRemove { .. } => EventKind::AgentRemove,
            Self::AgentCallback { .. } => EventKind::AgentCallback,
            Self::AgentConsole { .. } => EventKind::AgentConsole,
            Self::AgentHeartbeat { .. } => EventKind::AgentHeartbeat,
            Self::AgentBuildLog { .. } => EventKind::AgentBuildLog,
            Self::AgentRegisterType(_) => EventKind::AgentRegisterType,
            Self::ListenerRegisterType(_) => EventKind::ListenerRegisterType,
            Self::ListenerStart { .. } => EventKind::ListenerStart,
            Self::ListenerStop { .. } => EventKind::ListenerStop,
            Self::ListenerStatus { .. } => EventKind::ListenerStatus,
            Self::ListenerRemove { .. } => EventKind::ListenerRemove,
            Self::ListenerLog { .. } => EventKind::ListenerLog,
            Self::UserLogin { .. } => EventKind::UserLogin,
            Self::UserLogout { .. } => EventKind::UserLogout,
            Self::Log { .. } => EventKind::Log,
        }
    }
}
