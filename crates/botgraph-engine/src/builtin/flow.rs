use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use botgraph_core::error::{BotgraphError, Result};
use botgraph_core::graph::{NodeInstance, PinSchema, PinSpec, PinType};

use super::{truthy, EXEC_IN, THEN};
use crate::loops::{self, BODY_PIN, COMPLETED_PIN};
use crate::registry::{Flow, NodeKind, Signal};
use crate::walker::Walker;

const MAX_SEQUENCE_OUTPUTS: u64 = 64;

// ── OnEventNode ─────────────────────────────────────────────────

/// Entry point. Exposes the invocation arguments and event tag.
///
/// With an `event` config entry the node only fires for that tag.
pub struct OnEventNode;

impl NodeKind for OnEventNode {
    fn id(&self) -> &str {
        "on_event"
    }
    fn description(&self) -> &str {
        "Entry point of an invocation; outputs its arguments and event tag."
    }
    fn pins(&self, _config: &Map<String, Value>) -> Result<PinSchema> {
        Ok(PinSchema::new(
            vec![],
            vec![
                PinSpec::exec_out(THEN),
                PinSpec::output("args", PinType::Wildcard),
                PinSpec::output("event", PinType::String),
            ],
        ))
    }
    fn evaluate<'a>(
        &'a self,
        node: &'a NodeInstance,
        pin: &'a str,
        walker: &'a mut Walker,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match pin {
                "args" => Ok(walker.context().args().clone()),
                "event" => Ok(walker
                    .context()
                    .event()
                    .map(|e| Value::String(e.to_string()))
                    .unwrap_or(Value::Null)),
                other => Err(BotgraphError::evaluation(
                    &node.id,
                    format!("no data output '{}'", other),
                )),
            }
        })
    }
    fn execute<'a>(&'a self, node: &'a NodeInstance, walker: &'a mut Walker) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            if let Some(wanted) = node.config_str("event") {
                if walker.context().event() != Some(wanted) {
                    debug!(node_id = %node.id, wanted, "Event filter did not match");
                    return Ok(Flow::End);
                }
            }
            Ok(Flow::Next(THEN.to_string()))
        })
    }
}

// ── BranchNode ──────────────────────────────────────────────────

pub struct BranchNode;

impl NodeKind for BranchNode {
    fn id(&self) -> &str {
        "branch"
    }
    fn description(&self) -> &str {
        "Continue on `true` or `false` depending on the condition."
    }
    fn pins(&self, _config: &Map<String, Value>) -> Result<PinSchema> {
        Ok(PinSchema::new(
            vec![
                PinSpec::exec_in(EXEC_IN),
                PinSpec::input("condition", PinType::Boolean).with_default(Value::Bool(false)),
            ],
            vec![PinSpec::exec_out("true"), PinSpec::exec_out("false")],
        ))
    }
    fn execute<'a>(&'a self, node: &'a NodeInstance, walker: &'a mut Walker) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let condition = walker.input(&node.id, "condition").await?;
            let pin = if truthy(&condition) { "true" } else { "false" };
            Ok(Flow::Next(pin.to_string()))
        })
    }
}

// ── SequenceNode ────────────────────────────────────────────────

/// Fires `then_0`, `then_1`, ... in order. The count comes from config.
pub struct SequenceNode;

fn sequence_count(config: &Map<String, Value>) -> Result<u64> {
    let count = match config.get("count") {
        None | Some(Value::Null) => 2,
        Some(v) => v.as_u64().ok_or_else(|| {
            BotgraphError::InvalidWiring(format!("sequence count must be a positive integer, got {}", v))
        })?,
    };
    if count == 0 || count > MAX_SEQUENCE_OUTPUTS {
        return Err(BotgraphError::InvalidWiring(format!(
            "sequence count must be between 1 and {}, got {}",
            MAX_SEQUENCE_OUTPUTS, count
        )));
    }
    Ok(count)
}

impl NodeKind for SequenceNode {
    fn id(&self) -> &str {
        "sequence"
    }
    fn description(&self) -> &str {
        "Fire several exec outputs one after another."
    }
    fn pins(&self, config: &Map<String, Value>) -> Result<PinSchema> {
        let count = sequence_count(config)?;
        Ok(PinSchema::new(
            vec![PinSpec::exec_in(EXEC_IN)],
            (0..count).map(|i| PinSpec::exec_out(format!("then_{}", i))).collect(),
        ))
    }
    fn execute<'a>(&'a self, node: &'a NodeInstance, walker: &'a mut Walker) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let count = sequence_count(&node.config)?;
            for i in 0..count {
                let pin = format!("then_{}", i);
                let signal = walker.traverse(&node.id, &pin).await?;
                if signal.is_break() {
                    return Ok(Flow::Forward(signal));
                }
            }
            Ok(Flow::Forward(Signal::Done))
        })
    }
}

// ── ForEachNode ─────────────────────────────────────────────────

pub struct ForEachNode;

impl NodeKind for ForEachNode {
    fn id(&self) -> &str {
        "for_each"
    }
    fn description(&self) -> &str {
        "Run the loop body once per array element, then `completed`."
    }
    fn pins(&self, _config: &Map<String, Value>) -> Result<PinSchema> {
        Ok(PinSchema::new(
            vec![
                PinSpec::exec_in(EXEC_IN),
                PinSpec::input("array", PinType::Array).with_default(Value::Array(vec![])),
            ],
            vec![
                PinSpec::exec_out(BODY_PIN),
                PinSpec::output("element", PinType::Wildcard),
                PinSpec::output("index", PinType::Number),
                PinSpec::exec_out(COMPLETED_PIN),
            ],
        ))
    }
    fn evaluate<'a>(
        &'a self,
        node: &'a NodeInstance,
        pin: &'a str,
        _walker: &'a mut Walker,
    ) -> BoxFuture<'a, Result<Value>> {
        // element/index are written to the memo by the loop itself.
        Box::pin(async move {
            Err(BotgraphError::evaluation(
                &node.id,
                format!("'{}' is only available inside the loop body", pin),
            ))
        })
    }
    fn execute<'a>(&'a self, node: &'a NodeInstance, walker: &'a mut Walker) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let items = match walker.input(&node.id, "array").await? {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => {
                    return Err(BotgraphError::evaluation(
                        &node.id,
                        format!("expected an array, got {}", other),
                    ))
                }
            };
            let outcome = loops::for_each(walker, &node.id, items).await?;
            debug!(node_id = %node.id, iterations = outcome.iterations, state = ?outcome.state, "for_each finished");
            Ok(Flow::Forward(outcome.after))
        })
    }
}

// ── WhileNode ───────────────────────────────────────────────────

/// Loop while `condition` holds. `max_iterations` in config lowers the
/// engine-wide ceiling for this node.
pub struct WhileNode;

impl NodeKind for WhileNode {
    fn id(&self) -> &str {
        "while_loop"
    }
    fn description(&self) -> &str {
        "Run the loop body while the condition holds, bounded by an iteration ceiling."
    }
    fn pins(&self, _config: &Map<String, Value>) -> Result<PinSchema> {
        Ok(PinSchema::new(
            vec![
                PinSpec::exec_in(EXEC_IN),
                PinSpec::input("condition", PinType::Boolean).with_default(Value::Bool(false)),
            ],
            vec![
                PinSpec::exec_out(BODY_PIN),
                PinSpec::output("iteration", PinType::Number),
                PinSpec::exec_out(COMPLETED_PIN),
            ],
        ))
    }
    fn evaluate<'a>(
        &'a self,
        node: &'a NodeInstance,
        pin: &'a str,
        _walker: &'a mut Walker,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            Err(BotgraphError::evaluation(
                &node.id,
                format!("'{}' is only available inside the loop body", pin),
            ))
        })
    }
    fn execute<'a>(&'a self, node: &'a NodeInstance, walker: &'a mut Walker) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let engine_max = walker.max_loop_iterations();
            let ceiling = node
                .config_u64("max_iterations")
                .map(|n| (n as usize).min(engine_max))
                .unwrap_or(engine_max);
            let outcome = loops::while_loop(walker, &node.id, ceiling).await?;
            debug!(
                node_id = %node.id,
                iterations = outcome.iterations,
                hit_ceiling = outcome.hit_ceiling,
                "while_loop finished"
            );
            Ok(Flow::Forward(outcome.after))
        })
    }
}

// ── BreakNode ───────────────────────────────────────────────────

/// Ends the nearest enclosing loop.
pub struct BreakNode;

impl NodeKind for BreakNode {
    fn id(&self) -> &str {
        "break_loop"
    }
    fn description(&self) -> &str {
        "Stop the nearest enclosing loop."
    }
    fn pins(&self, _config: &Map<String, Value>) -> Result<PinSchema> {
        Ok(PinSchema::new(vec![PinSpec::exec_in(EXEC_IN)], vec![]))
    }
    fn execute<'a>(&'a self, _node: &'a NodeInstance, _walker: &'a mut Walker) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move { Ok(Flow::Break) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sequence_pins_follow_count() {
        let mut config = Map::new();
        config.insert("count".into(), json!(3));
        let schema = SequenceNode.pins(&config).unwrap();
        let outs: Vec<&str> = schema.exec_outputs().map(|p| p.id.as_str()).collect();
        assert_eq!(outs, vec!["then_0", "then_1", "then_2"]);
    }

    #[test]
    fn test_sequence_rejects_bad_count() {
        let mut config = Map::new();
        config.insert("count".into(), json!(0));
        assert!(SequenceNode.pins(&config).unwrap_err().is_configuration_fault());
        config.insert("count".into(), json!("many"));
        assert!(SequenceNode.pins(&config).is_err());
    }

    #[test]
    fn test_break_has_no_exec_outputs() {
        let schema = BreakNode.pins(&Map::new()).unwrap();
        assert_eq!(schema.exec_outputs().count(), 0);
    }
}
