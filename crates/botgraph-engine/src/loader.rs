//! Graph loading: pin schema computation, wiring validation and indexes.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use botgraph_core::error::{BotgraphError, Result};
use botgraph_core::graph::{GraphDefinition, NodeInstance, PinDirection, PinRef, PinSchema};

use crate::registry::{NodeKind, NodeTypeRegistry};

/// A node instance bound to its kind and computed pin schema.
pub struct LoadedNode {
    pub instance: NodeInstance,
    pub kind: Arc<dyn NodeKind>,
    pub pins: PinSchema,
}

impl std::fmt::Debug for LoadedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedNode")
            .field("id", &self.instance.id)
            .field("kind", &self.instance.kind)
            .field("pins", &self.pins)
            .finish()
    }
}

type PinKey = (String, String);

/// Immutable, validated graph ready for execution.
#[derive(Debug)]
pub struct LoadedGraph {
    id: String,
    name: String,
    nodes: HashMap<String, LoadedNode>,
    /// Node ids in authored order.
    order: Vec<String>,
    /// (target node, input pin) -> producing output.
    data_in: HashMap<PinKey, PinRef>,
    /// (source node, exec output) -> destination exec input.
    exec_out: HashMap<PinKey, PinRef>,
    /// node -> nodes that read one of its data outputs.
    dependents: HashMap<String, BTreeSet<String>>,
    /// Volatile nodes plus everything that transitively reads them.
    volatile_scope: Arc<HashSet<String>>,
}

impl LoadedGraph {
    /// Validate `def` against the registry and build the execution indexes.
    /// Every problem found here is a configuration fault.
    pub fn load(def: &GraphDefinition, registry: &NodeTypeRegistry) -> Result<Self> {
        let mut nodes = HashMap::with_capacity(def.nodes.len());
        let mut order = Vec::with_capacity(def.nodes.len());

        for instance in &def.nodes {
            if nodes.contains_key(&instance.id) {
                return Err(BotgraphError::InvalidWiring(format!(
                    "duplicate node id '{}'",
                    instance.id
                )));
            }
            let kind = registry.lookup(&instance.kind)?;
            let pins = kind.pins(&instance.config).map_err(|e| match e {
                e if e.is_configuration_fault() => e,
                other => BotgraphError::InvalidWiring(format!(
                    "node '{}': {}",
                    instance.id, other
                )),
            })?;
            order.push(instance.id.clone());
            nodes.insert(
                instance.id.clone(),
                LoadedNode {
                    instance: instance.clone(),
                    kind,
                    pins,
                },
            );
        }

        let mut data_in: HashMap<PinKey, PinRef> = HashMap::new();
        let mut exec_out: HashMap<PinKey, PinRef> = HashMap::new();
        let mut dependents: HashMap<String, BTreeSet<String>> = HashMap::new();

        for edge in &def.edges {
            let source = nodes.get(&edge.source.node).ok_or_else(|| {
                BotgraphError::InvalidWiring(format!(
                    "edge source node '{}' does not exist",
                    edge.source.node
                ))
            })?;
            let target = nodes.get(&edge.target.node).ok_or_else(|| {
                BotgraphError::InvalidWiring(format!(
                    "edge target node '{}' does not exist",
                    edge.target.node
                ))
            })?;

            let out_pin = source.pins.output(&edge.source.pin).ok_or_else(|| {
                BotgraphError::InvalidWiring(format!("no output pin {}", edge.source))
            })?;
            let in_pin = target.pins.input(&edge.target.pin).ok_or_else(|| {
                BotgraphError::InvalidWiring(format!("no input pin {}", edge.target))
            })?;
            debug_assert_eq!(out_pin.direction, PinDirection::Output);
            debug_assert_eq!(in_pin.direction, PinDirection::Input);

            if !out_pin.pin_type.connects_to(in_pin.pin_type) {
                return Err(BotgraphError::InvalidWiring(format!(
                    "{} ({}) cannot feed {} ({})",
                    edge.source, out_pin.pin_type, edge.target, in_pin.pin_type
                )));
            }

            let source_key = (edge.source.node.clone(), edge.source.pin.clone());
            let target_key = (edge.target.node.clone(), edge.target.pin.clone());

            if out_pin.pin_type.is_exec() {
                // Exec inputs may have many incoming edges, exec outputs one.
                if exec_out.insert(source_key, edge.target.clone()).is_some() {
                    return Err(BotgraphError::InvalidWiring(format!(
                        "exec output {} is wired more than once",
                        edge.source
                    )));
                }
            } else {
                if data_in.insert(target_key, edge.source.clone()).is_some() {
                    return Err(BotgraphError::InvalidWiring(format!(
                        "data input {} has more than one incoming edge",
                        edge.target
                    )));
                }
                dependents
                    .entry(edge.source.node.clone())
                    .or_default()
                    .insert(edge.target.node.clone());
            }
        }

        let volatile: Vec<String> = order
            .iter()
            .filter(|id| nodes.get(*id).is_some_and(|n| n.kind.volatile()))
            .cloned()
            .collect();
        let volatile_scope = Arc::new(dependents_closure(&dependents, volatile));

        debug!(
            graph_id = %def.id,
            nodes = nodes.len(),
            edges = def.edges.len(),
            volatile = volatile_scope.len(),
            "Graph loaded"
        );

        Ok(Self {
            id: def.id.clone(),
            name: def.name.clone(),
            nodes,
            order,
            data_in,
            exec_out,
            dependents,
            volatile_scope,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn node(&self, node_id: &str) -> Result<&LoadedNode> {
        self.nodes.get(node_id).ok_or_else(|| {
            BotgraphError::InvalidWiring(format!("node '{}' not in graph '{}'", node_id, self.id))
        })
    }

    /// Nodes in authored order.
    pub fn nodes(&self) -> impl Iterator<Item = &LoadedNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// The output feeding a data input, if wired.
    pub fn incoming(&self, node_id: &str, pin: &str) -> Option<&PinRef> {
        self.data_in.get(&(node_id.to_string(), pin.to_string()))
    }

    /// The exec input an exec output leads to, if wired.
    pub fn exec_target(&self, node_id: &str, pin: &str) -> Option<&PinRef> {
        self.exec_out.get(&(node_id.to_string(), pin.to_string()))
    }

    pub fn edge_count(&self) -> usize {
        self.data_in.len() + self.exec_out.len()
    }

    pub fn volatile_scope(&self) -> Arc<HashSet<String>> {
        Arc::clone(&self.volatile_scope)
    }

    /// Nodes whose memoized outputs go stale when a loop re-enters its body:
    /// everything exec-reachable from `body_pin`, and every node that
    /// transitively reads data from the loop node or from those body nodes.
    /// The loop node itself is excluded.
    pub fn loop_scope(&self, loop_node: &str, body_pin: &str) -> LoopScope {
        let mut reached: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        if let Some(start) = self.exec_target(loop_node, body_pin) {
            queue.push_back(start.node.clone());
        }
        while let Some(id) = queue.pop_front() {
            if id == loop_node || !reached.insert(id.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                for pin in node.pins.exec_outputs() {
                    if let Some(next) = self.exec_target(&id, &pin.id) {
                        queue.push_back(next.node.clone());
                    }
                }
            }
        }

        let mut seeds: Vec<String> = reached.iter().cloned().collect();
        seeds.push(loop_node.to_string());
        let mut derived = dependents_closure(&self.dependents, seeds);
        derived.remove(loop_node);
        derived.retain(|id| !reached.contains(id));
        LoopScope {
            executed: reached,
            derived,
        }
    }
}

/// Memo scope of one loop body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopScope {
    /// Body nodes reached over exec edges. Their outputs are rewritten only
    /// when they run again.
    pub executed: HashSet<String>,
    /// Data nodes reading from the loop node or the body. Recomputed on demand.
    pub derived: HashSet<String>,
}

impl LoopScope {
    pub fn contains(&self, node_id: &str) -> bool {
        self.executed.contains(node_id) || self.derived.contains(node_id)
    }
}

/// `seeds` plus every node transitively reading data from them.
fn dependents_closure(
    dependents: &HashMap<String, BTreeSet<String>>,
    seeds: Vec<String>,
) -> HashSet<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = seeds.into();
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(readers) = dependents.get(&id) {
            queue.extend(readers.iter().cloned());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use botgraph_core::graph::GraphDefinition;
    use serde_json::json;

    fn registry() -> NodeTypeRegistry {
        NodeTypeRegistry::with_builtins()
    }

    #[test]
    fn test_load_simple_graph() {
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(NodeInstance::new("say", "log").with("message", json!("hi")))
            .wire("start", "then", "say", "exec");
        let graph = LoadedGraph::load(&def, &registry()).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.exec_target("start", "then").unwrap().node, "say");
        assert!(graph.exec_target("say", "then").is_none());
    }

    #[test]
    fn test_unknown_kind() {
        let def = GraphDefinition::new("g").node(NodeInstance::new("x", "teleport"));
        let err = LoadedGraph::load(&def, &registry()).unwrap_err();
        assert!(matches!(err, BotgraphError::UnknownNodeType(ref k) if k == "teleport"));
    }

    #[test]
    fn test_duplicate_node_id() {
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("a", "on_event"))
            .node(NodeInstance::new("a", "log"));
        assert!(LoadedGraph::load(&def, &registry())
            .unwrap_err()
            .is_configuration_fault());
    }

    #[test]
    fn test_missing_pin_rejected() {
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(NodeInstance::new("say", "log"))
            .wire("start", "nope", "say", "exec");
        let err = LoadedGraph::load(&def, &registry()).unwrap_err();
        assert!(err.to_string().contains("start.nope"));
    }

    #[test]
    fn test_exec_to_data_rejected() {
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(NodeInstance::new("say", "log"))
            .wire("start", "then", "say", "message");
        assert!(LoadedGraph::load(&def, &registry())
            .unwrap_err()
            .is_configuration_fault());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("n", "math"))
            .node(NodeInstance::new("b", "branch"))
            .wire("n", "result", "b", "condition");
        let err = LoadedGraph::load(&def, &registry()).unwrap_err();
        assert!(err.to_string().contains("cannot feed"));
    }

    #[test]
    fn test_data_input_single_edge() {
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("c1", "constant").with("value", json!(1)))
            .node(NodeInstance::new("c2", "constant").with("value", json!(2)))
            .node(NodeInstance::new("say", "log"))
            .wire("c1", "value", "say", "message")
            .wire("c2", "value", "say", "message");
        let err = LoadedGraph::load(&def, &registry()).unwrap_err();
        assert!(err.to_string().contains("more than one incoming edge"));
    }

    #[test]
    fn test_exec_output_single_destination() {
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(NodeInstance::new("a", "log"))
            .node(NodeInstance::new("b", "log"))
            .wire("start", "then", "a", "exec")
            .wire("start", "then", "b", "exec");
        let err = LoadedGraph::load(&def, &registry()).unwrap_err();
        assert!(err.to_string().contains("wired more than once"));
    }

    #[test]
    fn test_exec_input_many_sources() {
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(NodeInstance::new("br", "branch"))
            .node(NodeInstance::new("join", "log"))
            .wire("start", "then", "br", "exec")
            .wire("br", "true", "join", "exec")
            .wire("br", "false", "join", "exec");
        assert!(LoadedGraph::load(&def, &registry()).is_ok());
    }

    #[test]
    fn test_dynamic_pin_config_error_is_configuration_fault() {
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("m", "math").with("operator", json!("pow")));
        assert!(LoadedGraph::load(&def, &registry())
            .unwrap_err()
            .is_configuration_fault());
    }

    #[test]
    fn test_loop_scope() {
        // loop.element -> add.a0 ; body: loop -> set -> say ; say reads add ;
        // outside: k constant feeding nothing in the loop.
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(NodeInstance::new("loop", "for_each"))
            .node(NodeInstance::new("add", "math"))
            .node(NodeInstance::new("set", "set_variable").with("name", json!("x")))
            .node(NodeInstance::new("say", "log"))
            .node(NodeInstance::new("k", "constant").with("value", json!([1, 2])))
            .node(NodeInstance::new("after", "log"))
            .wire("start", "then", "loop", "exec")
            .wire("k", "value", "loop", "array")
            .wire("loop", "element", "add", "a0")
            .wire("loop", "loop_body", "set", "exec")
            .wire("set", "then", "say", "exec")
            .wire("add", "result", "say", "message")
            .wire("loop", "completed", "after", "exec");
        let graph = LoadedGraph::load(&def, &registry()).unwrap();
        let scope = graph.loop_scope("loop", "loop_body");
        assert!(scope.derived.contains("add"));
        assert!(scope.executed.contains("set"));
        assert!(scope.executed.contains("say"));
        assert!(!scope.derived.contains("say"));
        assert!(!scope.contains("loop"));
        assert!(!scope.contains("k"));
        assert!(!scope.contains("after"));
    }

    #[test]
    fn test_volatile_scope() {
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("get", "get_variable").with("name", json!("x")))
            .node(NodeInstance::new("cmp", "compare"))
            .node(NodeInstance::new("k", "constant").with("value", json!(3)))
            .wire("get", "value", "cmp", "a")
            .wire("k", "value", "cmp", "b");
        let graph = LoadedGraph::load(&def, &registry()).unwrap();
        let scope = graph.volatile_scope();
        assert!(scope.contains("get"));
        assert!(scope.contains("cmp"));
        assert!(!scope.contains("k"));
    }
}
