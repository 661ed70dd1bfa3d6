use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tracing::debug;

use botgraph_core::error::{BotgraphError, Result};
use botgraph_core::graph::{NodeInstance, PinSchema, PinSpec, PinType};

use super::{as_f64, EXEC_IN, THEN};
use crate::condition::CompareOp;
use crate::registry::{Flow, NodeKind};
use crate::walker::Walker;

const MAX_ARITY: u64 = 16;

fn required_name<'c>(config: &'c Map<String, Value>, key: &str, kind: &str) -> Result<&'c str> {
    config
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BotgraphError::InvalidWiring(format!("{} needs a '{}' string in its config", kind, key)))
}

fn arity(config: &Map<String, Value>, kind: &str) -> Result<u64> {
    let arity = match config.get("arity") {
        None | Some(Value::Null) => 2,
        Some(v) => v
            .as_u64()
            .ok_or_else(|| BotgraphError::InvalidWiring(format!("{} arity must be an integer, got {}", kind, v)))?,
    };
    if !(1..=MAX_ARITY).contains(&arity) {
        return Err(BotgraphError::InvalidWiring(format!(
            "{} arity must be between 1 and {}, got {}",
            kind, MAX_ARITY, arity
        )));
    }
    Ok(arity)
}

fn unknown_output(node: &NodeInstance, pin: &str) -> BotgraphError {
    BotgraphError::evaluation(&node.id, format!("no data output '{}'", pin))
}

// ── ConstantNode ────────────────────────────────────────────────

pub struct ConstantNode;

impl NodeKind for ConstantNode {
    fn id(&self) -> &str {
        "constant"
    }
    fn description(&self) -> &str {
        "Outputs the literal `value` from its config."
    }
    fn pins(&self, _config: &Map<String, Value>) -> Result<PinSchema> {
        Ok(PinSchema::new(vec![], vec![PinSpec::output("value", PinType::Wildcard)]))
    }
    fn evaluate<'a>(
        &'a self,
        node: &'a NodeInstance,
        _pin: &'a str,
        _walker: &'a mut Walker,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move { Ok(node.config.get("value").cloned().unwrap_or(Value::Null)) })
    }
}

// ── GetVariableNode ─────────────────────────────────────────────

/// Reads a context variable by (dotted) name. Falls back to `default`.
pub struct GetVariableNode;

impl NodeKind for GetVariableNode {
    fn id(&self) -> &str {
        "get_variable"
    }
    fn description(&self) -> &str {
        "Read a context variable."
    }
    fn pins(&self, config: &Map<String, Value>) -> Result<PinSchema> {
        required_name(config, "name", "get_variable")?;
        Ok(PinSchema::new(
            vec![PinSpec::input("default", PinType::Wildcard)],
            vec![PinSpec::output("value", PinType::Wildcard)],
        ))
    }
    fn volatile(&self) -> bool {
        true
    }
    fn evaluate<'a>(
        &'a self,
        node: &'a NodeInstance,
        pin: &'a str,
        walker: &'a mut Walker,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            if pin != "value" {
                return Err(unknown_output(node, pin));
            }
            let name = required_name(&node.config, "name", "get_variable")?;
            if let Some(value) = walker.context().variable(name).cloned() {
                return Ok(value);
            }
            walker.input(&node.id, "default").await
        })
    }
}

// ── SetVariableNode ─────────────────────────────────────────────

pub struct SetVariableNode;

impl NodeKind for SetVariableNode {
    fn id(&self) -> &str {
        "set_variable"
    }
    fn description(&self) -> &str {
        "Write a context variable for the rest of the invocation."
    }
    fn pins(&self, config: &Map<String, Value>) -> Result<PinSchema> {
        required_name(config, "name", "set_variable")?;
        Ok(PinSchema::new(
            vec![PinSpec::exec_in(EXEC_IN), PinSpec::input("value", PinType::Wildcard)],
            vec![PinSpec::exec_out(THEN)],
        ))
    }
    fn execute<'a>(&'a self, node: &'a NodeInstance, walker: &'a mut Walker) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let name = required_name(&node.config, "name", "set_variable")?;
            let value = walker.input(&node.id, "value").await?;
            debug!(node_id = %node.id, variable = name, "Setting variable");
            walker.set_variable(name, value);
            Ok(Flow::Next(THEN.to_string()))
        })
    }
}

// ── PersistVariableNode ─────────────────────────────────────────

/// Records a persistence intent. Storage is up to the host.
pub struct PersistVariableNode;

impl NodeKind for PersistVariableNode {
    fn id(&self) -> &str {
        "persist_variable"
    }
    fn description(&self) -> &str {
        "Ask the host to persist a value beyond this invocation."
    }
    fn pins(&self, config: &Map<String, Value>) -> Result<PinSchema> {
        required_name(config, "key", "persist_variable")?;
        Ok(PinSchema::new(
            vec![PinSpec::exec_in(EXEC_IN), PinSpec::input("value", PinType::Wildcard)],
            vec![PinSpec::exec_out(THEN)],
        ))
    }
    fn execute<'a>(&'a self, node: &'a NodeInstance, walker: &'a mut Walker) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let key = required_name(&node.config, "key", "persist_variable")?;
            let value = walker.input(&node.id, "value").await?;
            walker.persist(&node.id, key, value);
            Ok(Flow::Next(THEN.to_string()))
        })
    }
}

// ── MathNode ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

impl MathOp {
    fn from_config(config: &Map<String, Value>) -> Result<Self> {
        let op = config.get("operator").and_then(|v| v.as_str()).unwrap_or("add");
        Ok(match op {
            "add" | "+" => Self::Add,
            "sub" | "-" => Self::Sub,
            "mul" | "*" => Self::Mul,
            "div" | "/" => Self::Div,
            "min" => Self::Min,
            "max" => Self::Max,
            other => {
                return Err(BotgraphError::InvalidWiring(format!(
                    "unknown math operator '{}'",
                    other
                )))
            }
        })
    }
}

/// Folds `a0..a{arity-1}` left to right with the configured operator.
pub struct MathNode;

impl NodeKind for MathNode {
    fn id(&self) -> &str {
        "math"
    }
    fn description(&self) -> &str {
        "Arithmetic over a configurable number of operands."
    }
    fn pins(&self, config: &Map<String, Value>) -> Result<PinSchema> {
        MathOp::from_config(config)?;
        let n = arity(config, "math")?;
        Ok(PinSchema::new(
            (0..n)
                .map(|i| PinSpec::input(format!("a{}", i), PinType::Number).with_default(json!(0)))
                .collect(),
            vec![PinSpec::output("result", PinType::Number)],
        ))
    }
    fn evaluate<'a>(
        &'a self,
        node: &'a NodeInstance,
        pin: &'a str,
        walker: &'a mut Walker,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            if pin != "result" {
                return Err(unknown_output(node, pin));
            }
            let op = MathOp::from_config(&node.config)?;
            let n = arity(&node.config, "math")?;

            let mut acc: Option<f64> = None;
            for i in 0..n {
                let pin = format!("a{}", i);
                let raw = walker.input(&node.id, &pin).await?;
                let x = as_f64(&raw).ok_or_else(|| {
                    BotgraphError::evaluation(&node.id, format!("operand {} is not a number: {}", pin, raw))
                })?;
                acc = Some(match acc {
                    None => x,
                    Some(a) => match op {
                        MathOp::Add => a + x,
                        MathOp::Sub => a - x,
                        MathOp::Mul => a * x,
                        MathOp::Div if x == 0.0 => {
                            return Err(BotgraphError::evaluation(&node.id, "division by zero"))
                        }
                        MathOp::Div => a / x,
                        MathOp::Min => a.min(x),
                        MathOp::Max => a.max(x),
                    },
                });
            }
            number(&node.id, acc.unwrap_or(0.0))
        })
    }
}

/// Integral results come out as JSON integers.
fn number(node_id: &str, x: f64) -> Result<Value> {
    if x.fract() == 0.0 && x.abs() < i64::MAX as f64 {
        return Ok(json!(x as i64));
    }
    serde_json::Number::from_f64(x)
        .map(Value::Number)
        .ok_or_else(|| BotgraphError::evaluation(node_id, format!("result {} is not a finite number", x)))
}

// ── CompareNode ─────────────────────────────────────────────────

pub struct CompareNode;

fn compare_op(config: &Map<String, Value>) -> Result<CompareOp> {
    let op = config.get("operator").and_then(|v| v.as_str()).unwrap_or("==");
    CompareOp::parse(op)
        .ok_or_else(|| BotgraphError::InvalidWiring(format!("unknown compare operator '{}'", op)))
}

impl NodeKind for CompareNode {
    fn id(&self) -> &str {
        "compare"
    }
    fn description(&self) -> &str {
        "Compare two values: == != > >= < <= contains."
    }
    fn pins(&self, config: &Map<String, Value>) -> Result<PinSchema> {
        compare_op(config)?;
        Ok(PinSchema::new(
            vec![
                PinSpec::input("a", PinType::Wildcard),
                PinSpec::input("b", PinType::Wildcard),
            ],
            vec![PinSpec::output("result", PinType::Boolean)],
        ))
    }
    fn evaluate<'a>(
        &'a self,
        node: &'a NodeInstance,
        pin: &'a str,
        walker: &'a mut Walker,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            if pin != "result" {
                return Err(unknown_output(node, pin));
            }
            let op = compare_op(&node.config)?;
            let a = walker.input(&node.id, "a").await?;
            let b = walker.input(&node.id, "b").await?;
            Ok(Value::Bool(op.apply(&a, &b)))
        })
    }
}

// ── MakeArrayNode ───────────────────────────────────────────────

pub struct MakeArrayNode;

impl NodeKind for MakeArrayNode {
    fn id(&self) -> &str {
        "make_array"
    }
    fn description(&self) -> &str {
        "Collect `item_0..item_{arity-1}` into an array."
    }
    fn pins(&self, config: &Map<String, Value>) -> Result<PinSchema> {
        let n = arity(config, "make_array")?;
        Ok(PinSchema::new(
            (0..n)
                .map(|i| PinSpec::input(format!("item_{}", i), PinType::Wildcard))
                .collect(),
            vec![PinSpec::output("array", PinType::Array)],
        ))
    }
    fn evaluate<'a>(
        &'a self,
        node: &'a NodeInstance,
        pin: &'a str,
        walker: &'a mut Walker,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            if pin != "array" {
                return Err(unknown_output(node, pin));
            }
            let n = arity(&node.config, "make_array")?;
            let mut items = Vec::with_capacity(n as usize);
            for i in 0..n {
                items.push(walker.input(&node.id, &format!("item_{}", i)).await?);
            }
            Ok(Value::Array(items))
        })
    }
}
