use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use botgraph_core::error::BotgraphError;
use botgraph_core::graph::PinRef;
use botgraph_core::trace::{StepKind, Trace, TraceNote, TraceStatus, TraceStep};
use botgraph_core::types::InvocationId;

use crate::snapshot;

/// Open step returned by [`TraceRecorder::begin`].
#[derive(Debug)]
pub struct StepHandle {
    sequence: u64,
    started: Instant,
}

impl StepHandle {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Appends steps to the trace of one invocation.
///
/// Sequence numbers are handed out when a step begins, so a node executor
/// precedes the evaluations it triggers.
pub struct TraceRecorder {
    trace: Trace,
    max_bytes: usize,
}

impl TraceRecorder {
    pub fn new(graph_id: &str, invocation_id: &InvocationId, max_bytes: usize) -> Self {
        Self {
            trace: Trace {
                id: Uuid::new_v4().to_string(),
                graph_id: graph_id.to_string(),
                invocation_id: invocation_id.clone(),
                started_at: Utc::now(),
                finished_at: None,
                status: TraceStatus::Running,
                error: None,
                steps: Vec::new(),
                notes: Vec::new(),
            },
            max_bytes,
        }
    }

    pub fn id(&self) -> &str {
        &self.trace.id
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.trace.steps
    }

    pub fn begin(
        &mut self,
        node_id: &str,
        kind: StepKind,
        pin: Option<&str>,
        inputs: &Value,
    ) -> StepHandle {
        let sequence = self.trace.steps.len() as u64;
        self.trace.steps.push(TraceStep {
            sequence,
            node_id: node_id.to_string(),
            kind,
            pin: pin.map(str::to_string),
            inputs: snapshot::bounded(inputs, self.max_bytes),
            outputs: Value::Null,
            duration_us: 0,
            error: None,
        });
        StepHandle {
            sequence,
            started: Instant::now(),
        }
    }

    pub fn finish(&mut self, handle: StepHandle, outputs: &Value, error: Option<&BotgraphError>) {
        let max_bytes = self.max_bytes;
        if let Some(step) = self.trace.steps.get_mut(handle.sequence as usize) {
            step.outputs = snapshot::bounded(outputs, max_bytes);
            step.duration_us = handle.started.elapsed().as_micros() as u64;
            step.error = error.map(|e| e.to_string());
        }
    }

    /// Attach a resolved input value to a step that is still running.
    /// Values land under `inputs.pins.<pin>`.
    pub fn record_input(&mut self, sequence: u64, pin: &str, value: &Value) {
        let value = snapshot::bounded(value, self.max_bytes);
        let Some(step) = self.trace.steps.get_mut(sequence as usize) else {
            return;
        };
        if !step.inputs.is_object() {
            step.inputs = json!({});
        }
        if let Value::Object(inputs) = &mut step.inputs {
            let pins = inputs.entry("pins").or_insert_with(|| json!({}));
            if let Value::Object(pins) = pins {
                pins.insert(pin.to_string(), value);
            }
        }
    }

    /// Record an exec edge being followed. Traversals have no duration.
    pub fn record_traversal(&mut self, node_id: &str, pin: &str, target: &PinRef) {
        let handle = self.begin(node_id, StepKind::Traversal, Some(pin), &Value::Null);
        self.finish(handle, &json!({ "target": target.to_string() }), None);
    }

    pub fn note(&mut self, node_id: &str, message: impl Into<String>) {
        let after_sequence = self.trace.steps.last().map(|s| s.sequence);
        self.trace.notes.push(TraceNote {
            after_sequence,
            node_id: node_id.to_string(),
            message: message.into(),
        });
    }

    /// Close the trace. On error, the faulting step is marked; if no step
    /// carries the error yet, the last one does.
    pub fn finalize(mut self, error: Option<&BotgraphError>) -> Trace {
        self.trace.finished_at = Some(Utc::now());
        match error {
            None => self.trace.status = TraceStatus::Completed,
            Some(err) => {
                let message = err.to_string();
                self.trace.status = TraceStatus::Error;
                self.trace.error = Some(message.clone());
                if !self.trace.steps.iter().any(|s| s.error.is_some()) {
                    if let Some(last) = self.trace.steps.last_mut() {
                        last.error = Some(message);
                    }
                }
            }
        }
        debug!(
            trace_id = %self.trace.id,
            steps = self.trace.steps.len(),
            status = ?self.trace.status,
            "Trace finalized"
        );
        self.trace
    }
}
