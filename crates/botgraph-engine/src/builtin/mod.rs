//! Built-in node kinds.

pub mod action;
pub mod data;
pub mod flow;

use serde_json::Value;

use crate::registry::NodeTypeRegistry;

pub use action::{AgentActionNode, LogNode};
pub use data::{
    CompareNode, ConstantNode, GetVariableNode, MakeArrayNode, MathNode, PersistVariableNode,
    SetVariableNode,
};
pub use flow::{BranchNode, BreakNode, ForEachNode, OnEventNode, SequenceNode, WhileNode};

/// Exec input shared by every executable built-in.
pub(crate) const EXEC_IN: &str = "exec";
/// Default exec output of statement-like nodes.
pub(crate) const THEN: &str = "then";

pub fn register_builtins(registry: &mut NodeTypeRegistry) {
    registry.register(OnEventNode);
    registry.register(BranchNode);
    registry.register(SequenceNode);
    registry.register(ForEachNode);
    registry.register(WhileNode);
    registry.register(BreakNode);
    registry.register(ConstantNode);
    registry.register(GetVariableNode);
    registry.register(SetVariableNode);
    registry.register(PersistVariableNode);
    registry.register(MathNode);
    registry.register(CompareNode);
    registry.register(MakeArrayNode);
    registry.register(AgentActionNode);
    registry.register(LogNode);
}

/// Loose truthiness for condition pins: null, false, 0, "" and empty
/// collections are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Numeric view of a value. Numeric strings count.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Render a value for log output: strings as-is, everything else as JSON.
pub fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
