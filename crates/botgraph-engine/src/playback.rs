//! Read-only navigation over a finalized trace.

use botgraph_core::trace::{StepKind, Trace, TraceStep};

/// Step-indexed cursor over a recorded trace. Only recorded snapshots are
/// returned; no node logic ever runs.
pub struct TracePlayer {
    trace: Trace,
    position: usize,
}

impl TracePlayer {
    pub fn new(trace: Trace) -> Self {
        Self { trace, position: 0 }
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn len(&self) -> usize {
        self.trace.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trace.steps.is_empty()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Step under the cursor, `None` for an empty trace.
    pub fn current(&self) -> Option<&TraceStep> {
        self.trace.steps.get(self.position)
    }

    /// Advance one step. Stays put (returning `None`) at the end.
    pub fn step_forward(&mut self) -> Option<&TraceStep> {
        if self.position + 1 >= self.len() {
            return None;
        }
        self.position += 1;
        self.current()
    }

    pub fn step_backward(&mut self) -> Option<&TraceStep> {
        if self.position == 0 {
            return None;
        }
        self.position -= 1;
        self.current()
    }

    /// Jump to step `index`; out of range leaves the cursor unchanged.
    pub fn seek(&mut self, index: usize) -> Option<&TraceStep> {
        if index >= self.len() {
            return None;
        }
        self.position = index;
        self.current()
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }

    pub fn sequence(&self) -> Vec<(String, StepKind)> {
        self.trace.sequence()
    }

    pub fn into_trace(self) -> Trace {
        self.trace
    }
}
