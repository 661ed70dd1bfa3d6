//! Recorded step history of one invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::InvocationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// A node executor ran.
    Execution,
    /// A node evaluator produced a data value.
    Evaluation,
    /// An exec edge was followed.
    Traversal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Running,
    Completed,
    Error,
}

/// One recorded step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    /// Monotonic, starting at 0. Assigned when the step begins.
    pub sequence: u64,
    pub node_id: String,
    pub kind: StepKind,
    /// Output pin for evaluations, exec pin for traversals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    pub inputs: serde_json::Value,
    pub outputs: serde_json::Value,
    pub duration_us: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Free-form diagnostic attached to a trace (e.g. loop ceiling reached).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceNote {
    /// Sequence number of the last step begun before the note.
    pub after_sequence: Option<u64>,
    pub node_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,
    pub graph_id: String,
    pub invocation_id: InvocationId,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: TraceStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub steps: Vec<TraceStep>,
    #[serde(default)]
    pub notes: Vec<TraceNote>,
}

impl Trace {
    /// Ordered `(node, kind)` pairs, the shape compared when replaying.
    pub fn sequence(&self) -> Vec<(String, StepKind)> {
        self.steps
            .iter()
            .map(|s| (s.node_id.clone(), s.kind))
            .collect()
    }

    pub fn is_finalized(&self) -> bool {
        self.status != TraceStatus::Running
    }

    /// Steps of one kind for one node.
    pub fn steps_for(&self, node_id: &str, kind: StepKind) -> impl Iterator<Item = &TraceStep> {
        let node_id = node_id.to_string();
        self.steps
            .iter()
            .filter(move |s| s.node_id == node_id && s.kind == kind)
    }
}
