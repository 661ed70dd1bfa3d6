use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BotgraphError {
    // Configuration faults (raised while loading a graph)
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Invalid wiring: {0}")]
    InvalidWiring(String),

    // Evaluation faults
    #[error("Evaluation failed at node {node}: {message}")]
    Evaluation { node: String, message: String },

    #[error("Required input {pin} on node {node} is not connected and has no value")]
    MissingInput { node: String, pin: String },

    #[error("Cyclic data dependency at node {node}: {path}")]
    CyclicDependency { node: String, path: String },

    #[error("Break signal raised by node {node} outside of any loop")]
    BreakOutsideLoop { node: String },

    // Debugger
    #[error("Invocation stopped by debugger (session {session})")]
    Stopped { session: String },

    #[error("Debug error: {0}")]
    Debug(String),

    // Trace store
    #[error("Trace store error: {0}")]
    TraceStore(String),

    // Settings
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl BotgraphError {
    pub fn evaluation(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluation {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Faults detected before execution starts.
    pub fn is_configuration_fault(&self) -> bool {
        matches!(self, Self::UnknownNodeType(_) | Self::InvalidWiring(_))
    }

    /// Faults that abort an invocation once it is running. An escaped break
    /// signal is classified here as well.
    pub fn is_evaluation_fault(&self) -> bool {
        matches!(
            self,
            Self::Evaluation { .. } | Self::MissingInput { .. } | Self::BreakOutsideLoop { .. }
        )
    }

    /// Node id the fault is attributed to, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::Evaluation { node, .. }
            | Self::MissingInput { node, .. }
            | Self::CyclicDependency { node, .. }
            | Self::BreakOutsideLoop { node } => Some(node),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BotgraphError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for BotgraphError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BotgraphError>;
