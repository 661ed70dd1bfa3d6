//! Authored graph data model.
//!
//! A graph is a set of [`NodeInstance`]s wired together by [`Edge`]s between
//! named pins. The model here is the stored, engine-agnostic form; the engine
//! validates it and builds lookup indexes at load time.

use serde::{Deserialize, Serialize};

use crate::error::{BotgraphError, Result};

/// Type tag carried by a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinType {
    /// Control flow. Carries no data.
    Exec,
    String,
    Number,
    Boolean,
    Object,
    Array,
    /// Matches any data type.
    Wildcard,
}

impl PinType {
    /// Whether an output of type `self` may feed an input of type `target`.
    pub fn connects_to(self, target: PinType) -> bool {
        match (self, target) {
            (PinType::Exec, PinType::Exec) => true,
            (PinType::Exec, _) | (_, PinType::Exec) => false,
            (PinType::Wildcard, _) | (_, PinType::Wildcard) => true,
            (a, b) => a == b,
        }
    }

    pub fn is_exec(self) -> bool {
        self == PinType::Exec
    }
}

impl std::fmt::Display for PinType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PinType::Exec => "exec",
            PinType::String => "string",
            PinType::Number => "number",
            PinType::Boolean => "boolean",
            PinType::Object => "object",
            PinType::Array => "array",
            PinType::Wildcard => "wildcard",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinDirection {
    Input,
    Output,
}

/// Declaration of one pin on a node kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinSpec {
    pub id: String,
    pub pin_type: PinType,
    pub direction: PinDirection,
    #[serde(default)]
    pub required: bool,
    /// Value used when the pin is neither wired nor set in the node config.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

impl PinSpec {
    pub fn input(id: impl Into<String>, pin_type: PinType) -> Self {
        Self {
            id: id.into(),
            pin_type,
            direction: PinDirection::Input,
            required: false,
            default: None,
        }
    }

    pub fn output(id: impl Into<String>, pin_type: PinType) -> Self {
        Self {
            id: id.into(),
            pin_type,
            direction: PinDirection::Output,
            required: false,
            default: None,
        }
    }

    pub fn exec_in(id: impl Into<String>) -> Self {
        Self::input(id, PinType::Exec)
    }

    pub fn exec_out(id: impl Into<String>) -> Self {
        Self::output(id, PinType::Exec)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// The complete set of pins of one node instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PinSchema {
    pub inputs: Vec<PinSpec>,
    pub outputs: Vec<PinSpec>,
}

impl PinSchema {
    pub fn new(inputs: Vec<PinSpec>, outputs: Vec<PinSpec>) -> Self {
        Self { inputs, outputs }
    }

    pub fn input(&self, id: &str) -> Option<&PinSpec> {
        self.inputs.iter().find(|p| p.id == id)
    }

    pub fn output(&self, id: &str) -> Option<&PinSpec> {
        self.outputs.iter().find(|p| p.id == id)
    }

    /// Exec-typed outputs in declaration order.
    pub fn exec_outputs(&self) -> impl Iterator<Item = &PinSpec> {
        self.outputs.iter().filter(|p| p.pin_type.is_exec())
    }

    /// Data-typed inputs in declaration order.
    pub fn data_inputs(&self) -> impl Iterator<Item = &PinSpec> {
        self.inputs.iter().filter(|p| !p.pin_type.is_exec())
    }
}

/// A placed node in an authored graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInstance {
    pub id: String,
    /// Registered node kind id.
    pub kind: String,
    /// Static per-instance configuration, including literal pin values.
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    /// Editor position. Ignored by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<[f64; 2]>,
}

impl NodeInstance {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            config: serde_json::Map::new(),
            position: None,
        }
    }

    /// Set a config entry.
    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(|v| v.as_u64())
    }
}

/// One end of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PinRef {
    pub node: String,
    pub pin: String,
}

impl PinRef {
    pub fn new(node: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            pin: pin.into(),
        }
    }
}

impl std::fmt::Display for PinRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.node, self.pin)
    }
}

/// A wire from an output pin to an input pin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: PinRef,
    pub target: PinRef,
}

impl Edge {
    pub fn new(
        source_node: impl Into<String>,
        source_pin: impl Into<String>,
        target_node: impl Into<String>,
        target_pin: impl Into<String>,
    ) -> Self {
        Self {
            source: PinRef::new(source_node, source_pin),
            target: PinRef::new(target_node, target_pin),
        }
    }
}

/// A stored graph, as authored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeInstance>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl GraphDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Parse a graph from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| BotgraphError::InvalidWiring(e.to_string()))
    }

    pub fn node(mut self, node: NodeInstance) -> Self {
        self.nodes.push(node);
        self
    }

    /// Wire `source.pin -> target.pin`.
    pub fn wire(mut self, source: &str, source_pin: &str, target: &str, target_pin: &str) -> Self {
        self.edges
            .push(Edge::new(source, source_pin, target, target_pin));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_compatibility() {
        assert!(PinType::Exec.connects_to(PinType::Exec));
        assert!(!PinType::Exec.connects_to(PinType::Wildcard));
        assert!(!PinType::Wildcard.connects_to(PinType::Exec));
        assert!(PinType::Number.connects_to(PinType::Wildcard));
        assert!(PinType::Wildcard.connects_to(PinType::String));
        assert!(PinType::Number.connects_to(PinType::Number));
        assert!(!PinType::Number.connects_to(PinType::String));
    }

    #[test]
    fn test_schema_lookup() {
        let schema = PinSchema::new(
            vec![PinSpec::exec_in("exec"), PinSpec::input("x", PinType::Number).required()],
            vec![PinSpec::exec_out("then"), PinSpec::output("y", PinType::Number)],
        );
        assert!(schema.input("x").unwrap().required);
        assert!(schema.output("x").is_none());
        assert_eq!(schema.exec_outputs().count(), 1);
        assert_eq!(schema.data_inputs().count(), 1);
    }

    #[test]
    fn test_graph_json_form() {
        let json = r#"{
            "id": "g1",
            "nodes": [
                {"id": "start", "kind": "on_event"},
                {"id": "say", "kind": "log", "config": {"message": "hi"}, "position": [10.0, 20.0]}
            ],
            "edges": [
                {"source": {"node": "start", "pin": "then"}, "target": {"node": "say", "pin": "exec"}}
            ]
        }"#;
        let graph = GraphDefinition::from_json(json).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.nodes[1].config_str("message"), Some("hi"));
        assert_eq!(graph.edges[0].source, PinRef::new("start", "then"));
    }

    #[test]
    fn test_malformed_json_is_wiring_fault() {
        let err = GraphDefinition::from_json("{").unwrap_err();
        assert!(err.is_configuration_fault());
    }
}
