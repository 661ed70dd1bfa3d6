//! Loop controller shared by the looping node kinds.
//!
//! `Idle -> Iterating -> {Completed, BrokenOut}`. A break signal raised
//! anywhere in the body is consumed here; the `completed` pin fires exactly
//! once either way.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use botgraph_core::error::Result;

use crate::registry::Signal;
use crate::walker::Walker;

pub const BODY_PIN: &str = "loop_body";
pub const COMPLETED_PIN: &str = "completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Iterating,
    Completed,
    BrokenOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub state: LoopState,
    pub iterations: usize,
    /// The while-loop ceiling ended the loop.
    pub hit_ceiling: bool,
    /// Signal returned by the `completed` traversal.
    pub after: Signal,
}

impl LoopOutcome {
    fn idle() -> Self {
        Self {
            state: LoopState::Idle,
            iterations: 0,
            hit_ceiling: false,
            after: Signal::Done,
        }
    }

    /// Consume a body signal. Returns true when iteration must stop.
    fn absorb(&mut self, node_id: &str, signal: Signal) -> bool {
        match signal {
            Signal::Done => false,
            Signal::Break { origin } => {
                debug!(node_id, origin = %origin, iterations = self.iterations, "Loop broken out");
                self.state = LoopState::BrokenOut;
                true
            }
        }
    }

    async fn complete(mut self, walker: &mut Walker, node_id: &str) -> Result<Self> {
        if self.state != LoopState::BrokenOut {
            self.state = LoopState::Completed;
        }
        self.after = walker.traverse(node_id, COMPLETED_PIN).await?;
        Ok(self)
    }
}

/// Run the body once per item, in order. Each iteration sees `element` and
/// `index` on the loop node's outputs.
pub async fn for_each(walker: &mut Walker, node_id: &str, items: Vec<Value>) -> Result<LoopOutcome> {
    let mut outcome = LoopOutcome::idle();
    outcome.state = LoopState::Iterating;

    for (index, element) in items.into_iter().enumerate() {
        walker.invalidate_loop_body(node_id, BODY_PIN);
        walker
            .memo_mut()
            .store_many(node_id, [("element", element), ("index", json!(index))]);
        outcome.iterations += 1;

        let signal = walker.traverse(node_id, BODY_PIN).await?;
        if outcome.absorb(node_id, signal) {
            break;
        }
    }

    outcome.complete(walker, node_id).await
}

/// Run the body while `condition` holds, re-evaluating it before every
/// iteration. Stops as Completed after `ceiling` iterations.
pub async fn while_loop(walker: &mut Walker, node_id: &str, ceiling: usize) -> Result<LoopOutcome> {
    let mut outcome = LoopOutcome::idle();
    outcome.state = LoopState::Iterating;

    loop {
        if outcome.iterations >= ceiling {
            outcome.hit_ceiling = true;
            walker.note(
                node_id,
                format!("while loop reached its iteration ceiling of {}", ceiling),
            );
            break;
        }

        walker.refresh_loop_data(node_id, BODY_PIN);
        let condition = walker.input(node_id, "condition").await?;
        if !crate::builtin::truthy(&condition) {
            break;
        }
        walker.invalidate_loop_body(node_id, BODY_PIN);
        walker
            .memo_mut()
            .store(node_id, "iteration", json!(outcome.iterations));
        outcome.iterations += 1;

        let signal = walker.traverse(node_id, BODY_PIN).await?;
        if outcome.absorb(node_id, signal) {
            break;
        }
    }

    outcome.complete(walker, node_id).await
}
