use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use botgraph_core::error::{BotgraphError, Result};
use botgraph_core::graph::{NodeInstance, PinSchema};

use crate::walker::Walker;

/// What a node executor wants to happen next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Traverse this exec output of the node.
    Next(String),
    /// Nothing further. Terminal nodes, or nodes that drove their own outputs.
    End,
    /// Raise a break signal for the nearest enclosing loop.
    Break,
    /// Pass on the signal of a traversal the node performed itself.
    Forward(Signal),
}

/// Result of a traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Done,
    /// A break node fired somewhere below and no loop has consumed it yet.
    Break { origin: String },
}

impl Signal {
    pub fn is_break(&self) -> bool {
        matches!(self, Signal::Break { .. })
    }
}

/// A pluggable unit of node behavior.
///
/// Data pins are served by [`NodeKind::evaluate`], control pins by
/// [`NodeKind::execute`]. Both receive the [`Walker`] to pull inputs,
/// traverse exec outputs and reach the memo.
pub trait NodeKind: Send + Sync + 'static {
    /// Kind id referenced by `NodeInstance::kind`.
    fn id(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str {
        ""
    }

    /// Pin schema for one instance. Must be a pure function of `config`;
    /// it runs once per node when the graph is loaded.
    fn pins(&self, config: &serde_json::Map<String, serde_json::Value>) -> Result<PinSchema>;

    /// Whether outputs depend on mutable context (variables). Volatile
    /// outputs are dropped from the memo whenever a variable is written.
    fn volatile(&self) -> bool {
        false
    }

    /// Produce the value of a data output pin.
    fn evaluate<'a>(
        &'a self,
        node: &'a NodeInstance,
        pin: &'a str,
        walker: &'a mut Walker,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        let _ = walker;
        let err = BotgraphError::evaluation(
            &node.id,
            format!("node kind '{}' has no data output '{}'", self.id(), pin),
        );
        Box::pin(async move { Err(err) })
    }

    /// Run the node's effect when control reaches it.
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        walker: &'a mut Walker,
    ) -> BoxFuture<'a, Result<Flow>> {
        let _ = walker;
        let err = BotgraphError::evaluation(
            &node.id,
            format!("node kind '{}' cannot be executed", self.id()),
        );
        Box::pin(async move { Err(err) })
    }
}

/// Registry of available node kinds.
pub struct NodeTypeRegistry {
    kinds: HashMap<String, Arc<dyn NodeKind>>,
}

impl NodeTypeRegistry {
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Register a node kind. A later registration for the same id replaces
    /// the earlier one.
    pub fn register(&mut self, kind: impl NodeKind) {
        self.register_arc(Arc::new(kind));
    }

    pub fn register_arc(&mut self, kind: Arc<dyn NodeKind>) {
        let id = kind.id().to_string();
        if self.kinds.insert(id.clone(), kind).is_some() {
            warn!(kind = %id, "Node kind registered twice, replacing earlier registration");
        } else {
            debug!(kind = %id, "Node kind registered");
        }
    }

    /// Unregister a node kind by id.
    pub fn unregister(&mut self, id: &str) -> bool {
        self.kinds.remove(id).is_some()
    }

    /// Look up a kind, failing with a configuration fault if unknown.
    pub fn lookup(&self, id: &str) -> Result<Arc<dyn NodeKind>> {
        self.kinds
            .get(id)
            .cloned()
            .ok_or_else(|| BotgraphError::UnknownNodeType(id.to_string()))
    }

    /// List all registered kind ids, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.kinds.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Create a registry with all built-in kinds registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtin::register_builtins(&mut registry);
        registry
    }
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botgraph_core::graph::{PinSpec, PinType};

    struct Fixed(&'static str, PinType);

    impl NodeKind for Fixed {
        fn id(&self) -> &str {
            self.0
        }
        fn pins(&self, _config: &serde_json::Map<String, serde_json::Value>) -> Result<PinSchema> {
            Ok(PinSchema::new(vec![], vec![PinSpec::output("value", self.1)]))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = NodeTypeRegistry::new();
        registry.register(Fixed("a", PinType::Number));
        assert!(registry.lookup("a").is_ok());
        assert_eq!(registry.list(), vec!["a"]);
    }

    #[test]
    fn test_unknown_kind_is_configuration_fault() {
        let registry = NodeTypeRegistry::new();
        let err = registry.lookup("missing").err().unwrap();
        assert!(err.is_configuration_fault());
    }

    #[test]
    fn test_later_registration_wins() {
        let mut registry = NodeTypeRegistry::new();
        registry.register(Fixed("a", PinType::Number));
        registry.register(Fixed("a", PinType::String));
        let kind = registry.lookup("a").unwrap();
        let schema = kind.pins(&serde_json::Map::new()).unwrap();
        assert_eq!(schema.outputs[0].pin_type, PinType::String);
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_unregister() {
        let mut registry = NodeTypeRegistry::new();
        registry.register(Fixed("a", PinType::Number));
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
    }

    #[test]
    fn test_builtins_present() {
        let registry = NodeTypeRegistry::with_builtins();
        for id in [
            "on_event",
            "branch",
            "sequence",
            "for_each",
            "while_loop",
            "break_loop",
            "constant",
            "get_variable",
            "set_variable",
            "persist_variable",
            "math",
            "compare",
            "make_array",
            "agent_action",
            "log",
        ] {
            assert!(registry.lookup(id).is_ok(), "missing builtin {}", id);
        }
    }
}
