use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use botgraph_core::error::{BotgraphError, Result};
use botgraph_core::graph::{NodeInstance, PinSchema, PinSpec, PinType};

use super::{display, EXEC_IN, THEN};
use crate::registry::{Flow, NodeKind};
use crate::walker::Walker;

// ── AgentActionNode ─────────────────────────────────────────────

/// Calls the invocation's capability handle.
///
/// A failed action is data, not a fault: it fills `error` and continues on
/// `failure`. `result` and `error` are written together when the node runs.
pub struct AgentActionNode;

impl NodeKind for AgentActionNode {
    fn id(&self) -> &str {
        "agent_action"
    }
    fn description(&self) -> &str {
        "Perform an agent action through the capability handle."
    }
    fn pins(&self, _config: &Map<String, Value>) -> Result<PinSchema> {
        Ok(PinSchema::new(
            vec![
                PinSpec::exec_in(EXEC_IN),
                PinSpec::input("action", PinType::String).required(),
                PinSpec::input("payload", PinType::Wildcard),
            ],
            vec![
                PinSpec::exec_out("success"),
                PinSpec::exec_out("failure"),
                PinSpec::output("result", PinType::Wildcard),
                PinSpec::output("error", PinType::String),
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
                format!("'{}' is produced when the action runs", pin),
            ))
        })
    }
    fn execute<'a>(&'a self, node: &'a NodeInstance, walker: &'a mut Walker) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let action = match walker.input(&node.id, "action").await? {
                Value::String(s) => s,
                other => {
                    return Err(BotgraphError::evaluation(
                        &node.id,
                        format!("action must be a string, got {}", other),
                    ))
                }
            };
            let payload = walker.input(&node.id, "payload").await?;

            let capability = walker.capability();
            debug!(node_id = %node.id, action = %action, capability = capability.name(), "Invoking capability");
            let (result, error, pin) = match capability.invoke(&action, payload).await {
                Ok(result) => (result, Value::Null, "success"),
                Err(e) => {
                    warn!(node_id = %node.id, action = %action, error = %e, "Capability action failed");
                    (Value::Null, Value::String(e.to_string()), "failure")
                }
            };
            walker
                .memo_mut()
                .store_many(&node.id, [("result", result), ("error", error)]);
            Ok(Flow::Next(pin.to_string()))
        })
    }
}

// ── LogNode ─────────────────────────────────────────────────────

pub struct LogNode;

impl NodeKind for LogNode {
    fn id(&self) -> &str {
        "log"
    }
    fn description(&self) -> &str {
        "Write a message to the log and the invocation's log lines."
    }
    fn pins(&self, _config: &Map<String, Value>) -> Result<PinSchema> {
        Ok(PinSchema::new(
            vec![
                PinSpec::exec_in(EXEC_IN),
                PinSpec::input("message", PinType::Wildcard).with_default(Value::String(String::new())),
            ],
            vec![PinSpec::exec_out(THEN)],
        ))
    }
    fn execute<'a>(&'a self, node: &'a NodeInstance, walker: &'a mut Walker) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let message = display(&walker.input(&node.id, "message").await?);
            match node.config_str("level") {
                Some("warn") => warn!(node_id = %node.id, graph_id = walker.graph().id(), "{}", message),
                Some("debug") => debug!(node_id = %node.id, graph_id = walker.graph().id(), "{}", message),
                _ => info!(node_id = %node.id, graph_id = walker.graph().id(), "{}", message),
            }
            walker.push_log(message);
            Ok(Flow::Next(THEN.to_string()))
        })
    }
}
