//! Breakpoint conditions: `path OP literal`, evaluated against variables.
//!
//! Supported operators: `==`, `!=`, `>`, `>=`, `<`, `<=`, `contains`.
//! The literal is JSON (`3`, `"bob"`, `true`, `null`); anything that does
//! not parse as JSON is taken as a bare string.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use botgraph_core::error::{BotgraphError, Result};

use crate::context::lookup_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

impl CompareOp {
    pub fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "==" | "eq" => Self::Eq,
            "!=" | "ne" => Self::Ne,
            ">" | "gt" => Self::Gt,
            ">=" | "ge" => Self::Ge,
            "<" | "lt" => Self::Lt,
            "<=" | "le" => Self::Le,
            "contains" => Self::Contains,
            _ => return None,
        })
    }

    /// Apply the operator. Ordering works on numbers and on strings;
    /// mismatched types compare false.
    pub fn apply(self, left: &Value, right: &Value) -> bool {
        match self {
            Self::Eq => loose_eq(left, right),
            Self::Ne => !loose_eq(left, right),
            Self::Contains => match (left, right) {
                (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
                (Value::Array(items), needle) => items.iter().any(|i| loose_eq(i, needle)),
                (Value::Object(map), Value::String(key)) => map.contains_key(key),
                _ => false,
            },
            ordering => {
                let cmp = match (left, right) {
                    (Value::Number(a), Value::Number(b)) => a
                        .as_f64()
                        .zip(b.as_f64())
                        .and_then(|(a, b)| a.partial_cmp(&b)),
                    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                    _ => None,
                };
                let Some(cmp) = cmp else { return false };
                match ordering {
                    Self::Gt => cmp.is_gt(),
                    Self::Ge => cmp.is_ge(),
                    Self::Lt => cmp.is_lt(),
                    Self::Le => cmp.is_le(),
                    _ => false,
                }
            }
        }
    }
}

/// Equality that treats `1` and `1.0` as equal.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// A parsed breakpoint condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub source: String,
    pub path: String,
    pub op: CompareOp,
    pub literal: Value,
}

fn condition_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z_][\w.]*)\s*(==|!=|>=|<=|>|<|\bcontains\b)\s*(.+?)\s*$")
            .expect("condition regex is valid")
    })
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self> {
        let caps = condition_regex().captures(source).ok_or_else(|| {
            BotgraphError::Debug(format!("unparseable breakpoint condition: {}", source))
        })?;
        let op = CompareOp::parse(&caps[2]).ok_or_else(|| {
            BotgraphError::Debug(format!("unknown operator in condition: {}", source))
        })?;
        let raw = &caps[3];
        let literal =
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        Ok(Self {
            source: source.to_string(),
            path: caps[1].to_string(),
            op,
            literal,
        })
    }

    /// A missing variable makes the condition false, except for `!=`.
    pub fn holds(&self, variables: &Map<String, Value>) -> bool {
        match lookup_path(variables, &self.path) {
            Some(value) => self.op.apply(value, &self.literal),
            None => self.op == CompareOp::Ne,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("count".into(), json!(3));
        m.insert("name".into(), json!("bob builder"));
        m.insert("player".into(), json!({"hp": 7.5, "tags": ["a", "b"]}));
        m
    }

    #[test]
    fn test_numeric_conditions() {
        let v = vars();
        assert!(Condition::parse("count > 2").unwrap().holds(&v));
        assert!(Condition::parse("count >= 3").unwrap().holds(&v));
        assert!(!Condition::parse("count < 3").unwrap().holds(&v));
        assert!(Condition::parse("count == 3.0").unwrap().holds(&v));
        assert!(Condition::parse("player.hp <= 7.5").unwrap().holds(&v));
    }

    #[test]
    fn test_string_conditions() {
        let v = vars();
        assert!(Condition::parse(r#"name == "bob builder""#).unwrap().holds(&v));
        assert!(Condition::parse("name contains bob").unwrap().holds(&v));
        assert!(Condition::parse(r#"player.tags contains "b""#).unwrap().holds(&v));
        assert!(!Condition::parse(r#"name != "bob builder""#).unwrap().holds(&v));
    }

    #[test]
    fn test_missing_variable() {
        let v = vars();
        assert!(!Condition::parse("ghost == 1").unwrap().holds(&v));
        assert!(Condition::parse("ghost != 1").unwrap().holds(&v));
    }

    #[test]
    fn test_type_mismatch_is_false() {
        let v = vars();
        assert!(!Condition::parse(r#"count > "a""#).unwrap().holds(&v));
    }

    #[test]
    fn test_unparseable() {
        assert!(Condition::parse("this is not valid").is_err());
        assert!(Condition::parse("== 3").is_err());
    }
}
