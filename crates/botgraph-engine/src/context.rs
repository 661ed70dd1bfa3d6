use std::sync::Arc;

use serde_json::{json, Map, Value};

use botgraph_core::traits::Capability;
use botgraph_core::types::PersistIntent;

use crate::memo::Memo;
use crate::snapshot;

/// Per-invocation execution state. Never shared between invocations.
pub struct ExecutionContext {
    variables: Map<String, Value>,
    args: Value,
    event: Option<String>,
    capability: Arc<dyn Capability>,
    intents: Vec<PersistIntent>,
    log: Vec<String>,
}

impl ExecutionContext {
    pub fn new(args: Value, event: Option<String>, capability: Arc<dyn Capability>) -> Self {
        Self {
            variables: Map::new(),
            args,
            event,
            capability,
            intents: Vec::new(),
            log: Vec::new(),
        }
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Read a variable by dotted path (`player.hp`).
    pub fn variable(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.variables, path)
    }

    /// Read-only invocation arguments.
    pub fn args(&self) -> &Value {
        &self.args
    }

    /// Tag of the event that triggered the invocation.
    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    pub fn capability(&self) -> Arc<dyn Capability> {
        Arc::clone(&self.capability)
    }

    pub fn persist_intents(&self) -> &[PersistIntent] {
        &self.intents
    }

    pub fn log_lines(&self) -> &[String] {
        &self.log
    }

    // Writes go through the walker so memoized readers can be invalidated.
    // Names are dotted paths, the same form `variable` reads.
    pub(crate) fn set_variable(&mut self, path: &str, value: Value) {
        assign_path(&mut self.variables, path, value);
    }

    pub(crate) fn persist(&mut self, intent: PersistIntent) {
        self.intents.push(intent);
    }

    pub(crate) fn push_log(&mut self, line: String) {
        self.log.push(line);
    }

    /// Bounded JSON view of the context for debug pauses.
    pub fn snapshot(&self, memo: &Memo, max_bytes: usize) -> Value {
        json!({
            "variables": snapshot::bounded(&self.variables, max_bytes),
            "args": snapshot::bounded(&self.args, max_bytes),
            "event": self.event,
            "persist_intents": snapshot::bounded(&self.intents, max_bytes),
            "memo": snapshot::bounded(&memo.to_json(), max_bytes),
        })
    }

    pub(crate) fn into_parts(self) -> (Map<String, Value>, Vec<PersistIntent>, Vec<String>) {
        (self.variables, self.intents, self.log)
    }
}

/// Follow a dotted path through nested objects. Numeric segments index arrays.
pub fn lookup_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = root.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Assign at a dotted path, creating (or replacing non-object) intermediates.
pub fn assign_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return,
    };
    let mut current = root;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use botgraph_core::traits::NoCapability;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(json!({"who": "bob"}), Some("chat".into()), Arc::new(NoCapability))
    }

    #[test]
    fn test_lookup_path() {
        let mut vars = Map::new();
        vars.insert("player".into(), json!({"hp": 10, "bag": ["axe", "rope"]}));
        assert_eq!(lookup_path(&vars, "player.hp"), Some(&json!(10)));
        assert_eq!(lookup_path(&vars, "player.bag.1"), Some(&json!("rope")));
        assert_eq!(lookup_path(&vars, "player.mp"), None);
        assert_eq!(lookup_path(&vars, "player.hp.x"), None);
    }

    #[test]
    fn test_assign_path_creates_intermediates() {
        let mut vars = Map::new();
        assign_path(&mut vars, "a.b.c", json!(1));
        assert_eq!(Value::Object(vars.clone()), json!({"a": {"b": {"c": 1}}}));
        assign_path(&mut vars, "a.b", json!(5));
        assert_eq!(Value::Object(vars.clone()), json!({"a": {"b": 5}}));
        assign_path(&mut vars, "a.b.d", json!(2));
        assert_eq!(Value::Object(vars), json!({"a": {"b": {"d": 2}}}));
    }

    #[test]
    fn test_context_accessors() {
        let mut c = ctx();
        assert_eq!(c.args()["who"], "bob");
        assert_eq!(c.event(), Some("chat"));
        c.set_variable("hp", json!(3));
        c.set_variable("pos.x", json!(7));
        assert_eq!(c.variable("hp"), Some(&json!(3)));
        assert_eq!(c.variable("pos.x"), Some(&json!(7)));
        assert_eq!(c.variables()["pos"], json!({"x": 7}));
    }

    #[test]
    fn test_snapshot_shape() {
        let mut c = ctx();
        c.set_variable("v", json!(1));
        let mut memo = Memo::new();
        memo.store("n", "out", json!(2));
        let snap = c.snapshot(&memo, 4096);
        assert_eq!(snap["variables"]["v"], 1);
        assert_eq!(snap["memo"]["n.out"], 2);
        assert_eq!(snap["event"], "chat");
    }
}
