//! Pass-scoped memoization of resolved data outputs.
//!
//! Keys are uniformly `(node id, output pin)`. A node that computes several
//! outputs in one go may store them together with [`Memo::store_many`].

use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoKey {
    pub node: String,
    pub pin: String,
}

impl MemoKey {
    pub fn new(node: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            pin: pin.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Memo {
    entries: HashMap<MemoKey, serde_json::Value>,
    hits: u64,
    misses: u64,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a memoized value, counting the hit or miss.
    pub fn lookup(&mut self, node: &str, pin: &str) -> Option<serde_json::Value> {
        match self.entries.get(&MemoKey::new(node, pin)) {
            Some(v) => {
                self.hits += 1;
                Some(v.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Peek without touching the counters.
    pub fn get(&self, node: &str, pin: &str) -> Option<&serde_json::Value> {
        self.entries.get(&MemoKey::new(node, pin))
    }

    pub fn contains(&self, node: &str, pin: &str) -> bool {
        self.entries.contains_key(&MemoKey::new(node, pin))
    }

    pub fn store(&mut self, node: &str, pin: &str, value: serde_json::Value) {
        self.entries.insert(MemoKey::new(node, pin), value);
    }

    /// Store several outputs of one node computed together.
    pub fn store_many<I, K>(&mut self, node: &str, values: I)
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        for (pin, value) in values {
            self.entries.insert(MemoKey::new(node, pin), value);
        }
    }

    /// Drop every entry belonging to one of `nodes`. Returns how many went.
    pub fn invalidate_nodes(&mut self, nodes: &HashSet<String>) -> usize {
        if nodes.is_empty() {
            return 0;
        }
        let before = self.entries.len();
        self.entries.retain(|key, _| !nodes.contains(&key.node));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Entries as a `"node.pin" -> value` object, sorted by key.
    pub fn to_json(&self) -> serde_json::Value {
        let sorted: BTreeMap<String, &serde_json::Value> = self
            .entries
            .iter()
            .map(|(k, v)| (format!("{}.{}", k.node, k.pin), v))
            .collect();
        serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_store_and_lookup() {
        let mut memo = Memo::new();
        assert!(memo.lookup("a", "out").is_none());
        memo.store("a", "out", json!(1));
        assert_eq!(memo.lookup("a", "out"), Some(json!(1)));
        assert_eq!(memo.hits(), 1);
        assert_eq!(memo.misses(), 1);
    }

    #[test]
    fn test_store_many() {
        let mut memo = Memo::new();
        memo.store_many("act", [("result", json!("ok")), ("error", json!(null))]);
        assert_eq!(memo.get("act", "result"), Some(&json!("ok")));
        assert!(memo.contains("act", "error"));
        assert_eq!(memo.len(), 2);
    }

    #[test]
    fn test_invalidate_nodes() {
        let mut memo = Memo::new();
        memo.store("a", "x", json!(1));
        memo.store("a", "y", json!(2));
        memo.store("b", "x", json!(3));
        let nodes: HashSet<String> = ["a".to_string()].into_iter().collect();
        assert_eq!(memo.invalidate_nodes(&nodes), 2);
        assert!(!memo.contains("a", "x"));
        assert!(memo.contains("b", "x"));
    }

    #[test]
    fn test_to_json() {
        let mut memo = Memo::new();
        memo.store("b", "x", json!(3));
        memo.store("a", "x", json!(1));
        assert_eq!(memo.to_json(), json!({"a.x": 1, "b.x": 3}));
    }
}
