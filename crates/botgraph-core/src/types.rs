use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one top-level invocation of a graph.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct InvocationId(pub String);

impl InvocationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique debug session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request to store a variable beyond the lifetime of one invocation.
/// The engine only collects these; the host decides how to persist them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistIntent {
    pub key: String,
    pub value: serde_json::Value,
    /// Node that issued the intent.
    pub node_id: String,
}

/// Lifecycle of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Stopped,
}

/// Outbound debug channel notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebugEvent {
    /// An invocation halted at a breakpoint.
    Paused {
        session_id: SessionId,
        graph_id: String,
        invocation_id: InvocationId,
        node_id: String,
        snapshot: serde_json::Value,
    },
    /// A paused invocation continued.
    Resumed {
        session_id: SessionId,
        graph_id: String,
    },
    /// A debugged invocation ran to completion.
    Completed {
        session_id: SessionId,
        graph_id: String,
    },
    /// A debugged invocation was aborted by a stop command.
    Stopped {
        session_id: SessionId,
        graph_id: String,
    },
    /// A debugged invocation failed.
    Error {
        session_id: SessionId,
        graph_id: String,
        message: String,
    },
}

impl DebugEvent {
    pub fn graph_id(&self) -> &str {
        match self {
            Self::Paused { graph_id, .. }
            | Self::Resumed { graph_id, .. }
            | Self::Completed { graph_id, .. }
            | Self::Stopped { graph_id, .. }
            | Self::Error { graph_id, .. } => graph_id,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Paused { session_id, .. }
            | Self::Resumed { session_id, .. }
            | Self::Completed { session_id, .. }
            | Self::Stopped { session_id, .. }
            | Self::Error { session_id, .. } => session_id,
        }
    }

    /// Short event name, as used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Paused { .. } => "paused",
            Self::Resumed { .. } => "resumed",
            Self::Completed { .. } => "completed",
            Self::Stopped { .. } => "stopped",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_event_tagging() {
        let event = DebugEvent::Resumed {
            session_id: SessionId::from_str("s1"),
            graph_id: "g1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "resumed");
        assert_eq!(json["session_id"], "s1");
        assert_eq!(event.kind(), "resumed");
        assert_eq!(event.graph_id(), "g1");
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(InvocationId::new(), InvocationId::new());
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
