use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use botgraph_core::config::EngineConfig;
use botgraph_core::error::{BotgraphError, Result};
use botgraph_core::graph::GraphDefinition;
use botgraph_core::trace::Trace;
use botgraph_core::traits::{Capability, NoCapability, TraceStore};
use botgraph_core::types::{InvocationId, PersistIntent};

use crate::context::ExecutionContext;
use crate::debugger::Debugger;
use crate::loader::LoadedGraph;
use crate::recorder::TraceRecorder;
use crate::registry::{NodeTypeRegistry, Signal};
use crate::walker::Walker;

/// One request to run a graph from an entry node.
pub struct InvocationRequest {
    pub entry_node: String,
    pub args: Value,
    pub event: Option<String>,
    pub capability: Arc<dyn Capability>,
    /// `None` follows `trace_by_default`.
    pub trace: Option<bool>,
    pub cancel: CancellationToken,
}

impl InvocationRequest {
    pub fn new(entry_node: impl Into<String>) -> Self {
        Self {
            entry_node: entry_node.into(),
            args: Value::Object(Map::new()),
            event: None,
            capability: Arc::new(NoCapability),
            trace: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_capability(mut self, capability: Arc<dyn Capability>) -> Self {
        self.capability = capability;
        self
    }

    pub fn traced(mut self, trace: bool) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Token the host can cancel to stop this invocation.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    Completed,
    Failed,
    Stopped,
}

/// Result of one invocation.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub invocation_id: InvocationId,
    pub status: InvocationStatus,
    pub error: Option<BotgraphError>,
    pub variables: Map<String, Value>,
    pub persist_intents: Vec<PersistIntent>,
    pub log: Vec<String>,
    pub trace: Option<Trace>,
}

impl InvocationOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == InvocationStatus::Completed
    }
}

/// The execution service. Cheap to share behind an `Arc`; every invocation
/// gets its own context, memo and trace.
pub struct Engine {
    registry: Arc<NodeTypeRegistry>,
    debugger: Arc<Debugger>,
    config: EngineConfig,
    trace_store: Option<Arc<dyn TraceStore>>,
}

impl Engine {
    pub fn new(registry: Arc<NodeTypeRegistry>, debugger: Arc<Debugger>, config: EngineConfig) -> Self {
        Self {
            registry,
            debugger,
            config,
            trace_store: None,
        }
    }

    pub fn with_trace_store(mut self, store: Arc<dyn TraceStore>) -> Self {
        self.trace_store = Some(store);
        self
    }

    pub fn registry(&self) -> &NodeTypeRegistry {
        &self.registry
    }

    pub fn debugger(&self) -> Arc<Debugger> {
        Arc::clone(&self.debugger)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate a definition and build its indexes.
    pub fn load(&self, definition: &GraphDefinition) -> Result<Arc<LoadedGraph>> {
        Ok(Arc::new(LoadedGraph::load(definition, &self.registry)?))
    }

    /// Run `graph` from the request's entry node.
    ///
    /// Configuration faults (unknown entry) are returned as `Err` before any
    /// node runs. Everything that goes wrong during execution is reported in
    /// the outcome.
    pub async fn invoke(&self, graph: Arc<LoadedGraph>, request: InvocationRequest) -> Result<InvocationOutcome> {
        if !graph.contains(&request.entry_node) {
            return Err(BotgraphError::InvalidWiring(format!(
                "entry node '{}' not in graph '{}'",
                request.entry_node,
                graph.id()
            )));
        }

        let invocation_id = InvocationId::new();
        let traced = request.trace.unwrap_or(self.config.trace_by_default);
        let start = Instant::now();
        info!(
            graph_id = graph.id(),
            invocation_id = %invocation_id,
            entry = %request.entry_node,
            traced,
            "Invocation started"
        );

        let context = ExecutionContext::new(request.args, request.event, request.capability);
        let mut walker = Walker::new(
            Arc::clone(&graph),
            self.config.clone(),
            invocation_id.clone(),
            context,
            Arc::clone(&self.debugger),
            request.cancel,
        );
        if traced {
            walker = walker.with_recorder(TraceRecorder::new(
                graph.id(),
                &invocation_id,
                self.config.max_snapshot_bytes,
            ));
        }

        let result = match walker.run_node(&request.entry_node).await {
            Ok(Signal::Done) => Ok(()),
            Ok(Signal::Break { origin }) => Err(BotgraphError::BreakOutsideLoop { node: origin }),
            Err(e) => Err(e),
        };

        let (context, recorder, session) = walker.into_parts();
        if let Some(session) = session {
            self.debugger.close_session(&session, &result);
        }

        let trace = match recorder {
            Some(recorder) => {
                let trace = recorder.finalize(result.as_ref().err());
                self.persist_trace(&trace).await;
                Some(trace)
            }
            None => None,
        };

        let status = match &result {
            Ok(()) => InvocationStatus::Completed,
            Err(BotgraphError::Stopped { .. }) => InvocationStatus::Stopped,
            Err(_) => InvocationStatus::Failed,
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(graph_id = graph.id(), invocation_id = %invocation_id, duration_ms, "Invocation completed"),
            Err(BotgraphError::Stopped { .. }) => {
                info!(graph_id = graph.id(), invocation_id = %invocation_id, duration_ms, "Invocation stopped")
            }
            Err(e) => error!(
                graph_id = graph.id(),
                invocation_id = %invocation_id,
                node_id = e.node().unwrap_or("-"),
                error = %e,
                "Invocation failed"
            ),
        }

        let (variables, persist_intents, log) = context.into_parts();
        Ok(InvocationOutcome {
            invocation_id,
            status,
            error: result.err(),
            variables,
            persist_intents,
            log,
            trace,
        })
    }

    async fn persist_trace(&self, trace: &Trace) {
        let Some(store) = &self.trace_store else {
            return;
        };
        match store.persist_trace(trace).await {
            Ok(()) => debug!(trace_id = %trace.id, steps = trace.steps.len(), "Trace persisted"),
            Err(e) => warn!(trace_id = %trace.id, error = %e, "Failed to persist trace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botgraph_core::graph::NodeInstance;
    use botgraph_core::trace::{StepKind, TraceStatus};
    use futures::future::BoxFuture;
    use serde_json::json;

    fn engine() -> Engine {
        Engine::new(
            Arc::new(NodeTypeRegistry::with_builtins()),
            Arc::new(Debugger::default()),
            EngineConfig::default(),
        )
    }

    struct Echo;

    impl Capability for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn invoke(&self, action: &str, payload: Value) -> BoxFuture<'_, Result<Value>> {
            let action = action.to_string();
            Box::pin(async move {
                if action == "fail" {
                    return Err(BotgraphError::evaluation("echo", "refused"));
                }
                Ok(json!({ "action": action, "payload": payload }))
            })
        }
    }

    #[tokio::test]
    async fn test_unknown_entry_is_error() {
        let engine = engine();
        let graph = engine
            .load(&GraphDefinition::new("g").node(NodeInstance::new("start", "on_event")))
            .unwrap();
        let err = engine
            .invoke(graph, InvocationRequest::new("nope"))
            .await
            .unwrap_err();
        assert!(err.is_configuration_fault());
    }

    #[tokio::test]
    async fn test_set_and_log() {
        let engine = engine();
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(NodeInstance::new("set", "set_variable").with("name", json!("greeting")))
            .node(NodeInstance::new("get", "get_variable").with("name", json!("greeting")))
            .node(NodeInstance::new("say", "log"))
            .wire("start", "then", "set", "exec")
            .wire("start", "args", "set", "value")
            .wire("set", "then", "say", "exec")
            .wire("get", "value", "say", "message");
        let graph = engine.load(&def).unwrap();
        let outcome = engine
            .invoke(graph, InvocationRequest::new("start").with_args(json!("hello")))
            .await
            .unwrap();
        assert!(outcome.is_completed());
        assert_eq!(outcome.variables["greeting"], "hello");
        assert_eq!(outcome.log, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_capability_failure_is_data() {
        let engine = engine();
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(NodeInstance::new("act", "agent_action").with("action", json!("fail")))
            .node(NodeInstance::new("ok", "log").with("message", json!("ok")))
            .node(NodeInstance::new("bad", "log"))
            .wire("start", "then", "act", "exec")
            .wire("act", "success", "ok", "exec")
            .wire("act", "failure", "bad", "exec")
            .wire("act", "error", "bad", "message");
        let graph = engine.load(&def).unwrap();
        let outcome = engine
            .invoke(
                graph,
                InvocationRequest::new("start").with_capability(Arc::new(Echo)),
            )
            .await
            .unwrap();
        assert!(outcome.is_completed());
        assert_eq!(outcome.log.len(), 1);
        assert!(outcome.log[0].contains("refused"));
    }

    #[tokio::test]
    async fn test_capability_success_result() {
        let engine = engine();
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(
                NodeInstance::new("act", "agent_action")
                    .with("action", json!("move_to"))
                    .with("payload", json!({"x": 1})),
            )
            .node(NodeInstance::new("keep", "set_variable").with("name", json!("last")))
            .wire("start", "then", "act", "exec")
            .wire("act", "success", "keep", "exec")
            .wire("act", "result", "keep", "value");
        let graph = engine.load(&def).unwrap();
        let outcome = engine
            .invoke(graph, InvocationRequest::new("start").with_capability(Arc::new(Echo)))
            .await
            .unwrap();
        assert_eq!(outcome.variables["last"]["action"], "move_to");
        assert_eq!(outcome.variables["last"]["payload"]["x"], 1);
    }

    #[tokio::test]
    async fn test_dotted_variable_names_round_trip() {
        let engine = engine();
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(
                NodeInstance::new("set", "set_variable")
                    .with("name", json!("player.hp"))
                    .with("value", json!(5)),
            )
            .node(NodeInstance::new("get", "get_variable").with("name", json!("player.hp")))
            .node(NodeInstance::new("say", "log"))
            .wire("start", "then", "set", "exec")
            .wire("set", "then", "say", "exec")
            .wire("get", "value", "say", "message");
        let graph = engine.load(&def).unwrap();
        let outcome = engine
            .invoke(graph, InvocationRequest::new("start"))
            .await
            .unwrap();
        assert!(outcome.is_completed());
        assert_eq!(outcome.log, vec!["5".to_string()]);
        assert_eq!(outcome.variables["player"], json!({"hp": 5}));
    }

    #[tokio::test]
    async fn test_while_completed_reads_body_outputs() {
        // while done == false { act; done = true } then log act.result
        let engine = engine();
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(
                NodeInstance::new("init", "set_variable")
                    .with("name", json!("done"))
                    .with("value", json!(false)),
            )
            .node(NodeInstance::new("loop", "while_loop"))
            .node(NodeInstance::new("get", "get_variable").with("name", json!("done")))
            .node(
                NodeInstance::new("pending", "compare")
                    .with("operator", json!("=="))
                    .with("b", json!(false)),
            )
            .node(NodeInstance::new("act", "agent_action").with("action", json!("touch")))
            .node(
                NodeInstance::new("finish", "set_variable")
                    .with("name", json!("done"))
                    .with("value", json!(true)),
            )
            .node(NodeInstance::new("say", "log"))
            .wire("start", "then", "init", "exec")
            .wire("init", "then", "loop", "exec")
            .wire("get", "value", "pending", "a")
            .wire("pending", "result", "loop", "condition")
            .wire("loop", "loop_body", "act", "exec")
            .wire("act", "success", "finish", "exec")
            .wire("loop", "completed", "say", "exec")
            .wire("act", "result", "say", "message");
        let graph = engine.load(&def).unwrap();
        let outcome = engine
            .invoke(
                graph,
                InvocationRequest::new("start")
                    .with_capability(Arc::new(Echo))
                    .traced(true),
            )
            .await
            .unwrap();
        assert!(outcome.is_completed(), "{:?}", outcome.error);
        assert_eq!(outcome.log.len(), 1);
        assert!(outcome.log[0].contains("touch"));
        let trace = outcome.trace.unwrap();
        assert_eq!(trace.steps_for("act", StepKind::Execution).count(), 1);
    }

    #[tokio::test]
    async fn test_break_outside_loop_fails() {
        let engine = engine();
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(NodeInstance::new("brk", "break_loop"))
            .wire("start", "then", "brk", "exec");
        let graph = engine.load(&def).unwrap();
        let outcome = engine
            .invoke(graph, InvocationRequest::new("start").traced(true))
            .await
            .unwrap();
        assert_eq!(outcome.status, InvocationStatus::Failed);
        let err = outcome.error.unwrap();
        assert!(matches!(err, BotgraphError::BreakOutsideLoop { ref node } if node == "brk"));
        assert!(err.is_evaluation_fault());
        let trace = outcome.trace.unwrap();
        assert_eq!(trace.status, TraceStatus::Error);
        assert!(trace.steps.last().unwrap().error.is_some());
    }

    #[tokio::test]
    async fn test_missing_required_input() {
        let engine = engine();
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(NodeInstance::new("act", "agent_action"))
            .wire("start", "then", "act", "exec");
        let graph = engine.load(&def).unwrap();
        let outcome = engine.invoke(graph, InvocationRequest::new("start")).await.unwrap();
        assert!(matches!(
            outcome.error,
            Some(BotgraphError::MissingInput { ref pin, .. }) if pin == "action"
        ));
    }

    #[tokio::test]
    async fn test_branch_and_sequence() {
        let engine = engine();
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(NodeInstance::new("seq", "sequence").with("count", json!(2)))
            .node(NodeInstance::new("cmp", "compare").with("operator", json!(">")).with("b", json!(10)))
            .node(NodeInstance::new("br", "branch"))
            .node(NodeInstance::new("big", "log").with("message", json!("big")))
            .node(NodeInstance::new("small", "log").with("message", json!("small")))
            .node(NodeInstance::new("done", "log").with("message", json!("done")))
            .wire("start", "then", "seq", "exec")
            .wire("start", "args", "cmp", "a")
            .wire("cmp", "result", "br", "condition")
            .wire("seq", "then_0", "br", "exec")
            .wire("br", "true", "big", "exec")
            .wire("br", "false", "small", "exec")
            .wire("seq", "then_1", "done", "exec");
        let graph = engine.load(&def).unwrap();
        let outcome = engine
            .invoke(Arc::clone(&graph), InvocationRequest::new("start").with_args(json!(42)))
            .await
            .unwrap();
        assert_eq!(outcome.log, vec!["big", "done"]);
        let outcome = engine
            .invoke(graph, InvocationRequest::new("start").with_args(json!(3)))
            .await
            .unwrap();
        assert_eq!(outcome.log, vec!["small", "done"]);
    }

    #[tokio::test]
    async fn test_event_filter() {
        let engine = engine();
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event").with("event", json!("chat")))
            .node(NodeInstance::new("say", "log").with("message", json!("hi")))
            .wire("start", "then", "say", "exec");
        let graph = engine.load(&def).unwrap();
        let outcome = engine
            .invoke(Arc::clone(&graph), InvocationRequest::new("start").with_event("tick"))
            .await
            .unwrap();
        assert!(outcome.log.is_empty());
        let outcome = engine
            .invoke(graph, InvocationRequest::new("start").with_event("chat"))
            .await
            .unwrap();
        assert_eq!(outcome.log, vec!["hi"]);
    }

    #[tokio::test]
    async fn test_persist_intents_collected() {
        let engine = engine();
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(
                NodeInstance::new("save", "persist_variable")
                    .with("key", json!("score"))
                    .with("value", json!(7)),
            )
            .wire("start", "then", "save", "exec");
        let graph = engine.load(&def).unwrap();
        let outcome = engine.invoke(graph, InvocationRequest::new("start")).await.unwrap();
        assert_eq!(outcome.persist_intents.len(), 1);
        assert_eq!(outcome.persist_intents[0].key, "score");
        assert_eq!(outcome.persist_intents[0].value, json!(7));
        assert_eq!(outcome.persist_intents[0].node_id, "save");
        assert!(outcome.variables.is_empty());
    }

    #[tokio::test]
    async fn test_trace_records_steps_in_order() {
        let engine = engine();
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(NodeInstance::new("k", "constant").with("value", json!("x")))
            .node(NodeInstance::new("say", "log"))
            .wire("start", "then", "say", "exec")
            .wire("k", "value", "say", "message");
        let graph = engine.load(&def).unwrap();
        let outcome = engine
            .invoke(graph, InvocationRequest::new("start").traced(true))
            .await
            .unwrap();
        let trace = outcome.trace.unwrap();
        assert_eq!(trace.status, TraceStatus::Completed);
        assert_eq!(
            trace.sequence(),
            vec![
                ("start".to_string(), StepKind::Execution),
                ("start".to_string(), StepKind::Traversal),
                ("say".to_string(), StepKind::Execution),
                ("k".to_string(), StepKind::Evaluation),
            ]
        );
    }

    #[tokio::test]
    async fn test_trace_captures_resolved_inputs() {
        let engine = engine();
        let def = GraphDefinition::new("g")
            .node(NodeInstance::new("start", "on_event"))
            .node(NodeInstance::new("two", "constant").with("value", json!(2)))
            .node(NodeInstance::new("sum", "math").with("a1", json!(3)))
            .node(NodeInstance::new("say", "log"))
            .wire("start", "then", "say", "exec")
            .wire("two", "value", "sum", "a0")
            .wire("sum", "result", "say", "message");
        let graph = engine.load(&def).unwrap();
        let outcome = engine
            .invoke(graph, InvocationRequest::new("start").traced(true))
            .await
            .unwrap();
        let trace = outcome.trace.unwrap();

        let sum = trace.steps_for("sum", StepKind::Evaluation).next().unwrap();
        assert_eq!(sum.inputs["pins"], json!({"a0": 2, "a1": 3}));
        assert_eq!(sum.inputs["config"]["a1"], json!(3));
        assert_eq!(sum.outputs, json!(5));

        let say = trace.steps_for("say", StepKind::Execution).next().unwrap();
        assert_eq!(say.inputs["pins"]["message"], json!(5));
    }

    #[tokio::test]
    async fn test_untraced_by_default() {
        let engine = engine();
        let graph = engine
            .load(&GraphDefinition::new("g").node(NodeInstance::new("start", "on_event")))
            .unwrap();
        let outcome = engine.invoke(graph, InvocationRequest::new("start")).await.unwrap();
        assert!(outcome.trace.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let engine = engine();
        let graph = engine
            .load(&GraphDefinition::new("g").node(NodeInstance::new("start", "on_event")))
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = engine
            .invoke(graph, InvocationRequest::new("start").with_cancel(cancel))
            .await
            .unwrap();
        assert_eq!(outcome.status, InvocationStatus::Stopped);
    }
}
