//! Pin resolver and flow traverser for one invocation.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use botgraph_core::config::EngineConfig;
use botgraph_core::error::{BotgraphError, Result};
use botgraph_core::graph::PinRef;
use botgraph_core::trace::StepKind;
use botgraph_core::traits::Capability;
use botgraph_core::types::{InvocationId, PersistIntent, SessionId};

use crate::context::ExecutionContext;
use crate::debugger::{DebugCommand, Debugger};
use crate::loader::{LoadedGraph, LoopScope};
use crate::memo::Memo;
use crate::recorder::TraceRecorder;
use crate::registry::{Flow, Signal};

/// Depth-first walker over a loaded graph.
///
/// Owns everything private to one invocation: the execution context, the
/// pass memo, the trace recorder and the debug session. Node kinds receive
/// it as their helper handle.
pub struct Walker {
    graph: Arc<LoadedGraph>,
    config: EngineConfig,
    invocation_id: InvocationId,
    context: ExecutionContext,
    memo: Memo,
    /// Nodes whose evaluation is in progress, outermost first.
    resolving: Vec<String>,
    loop_scopes: HashMap<(String, String), Arc<LoopScope>>,
    recorder: Option<TraceRecorder>,
    /// Trace steps still running, as (node, sequence), innermost last.
    open_steps: Vec<(String, u64)>,
    debugger: Arc<Debugger>,
    session: Option<SessionId>,
    cancel: CancellationToken,
}

impl Walker {
    pub(crate) fn new(
        graph: Arc<LoadedGraph>,
        config: EngineConfig,
        invocation_id: InvocationId,
        context: ExecutionContext,
        debugger: Arc<Debugger>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            graph,
            config,
            invocation_id,
            context,
            memo: Memo::new(),
            resolving: Vec::new(),
            loop_scopes: HashMap::new(),
            recorder: None,
            open_steps: Vec::new(),
            debugger,
            session: None,
            cancel,
        }
    }

    pub(crate) fn with_recorder(mut self, recorder: TraceRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn graph(&self) -> &LoadedGraph {
        &self.graph
    }

    pub fn invocation_id(&self) -> &InvocationId {
        &self.invocation_id
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn memo(&self) -> &Memo {
        &self.memo
    }

    pub fn memo_mut(&mut self) -> &mut Memo {
        &mut self.memo
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    pub fn max_loop_iterations(&self) -> usize {
        self.config.max_loop_iterations
    }

    pub fn capability(&self) -> Arc<dyn Capability> {
        self.context.capability()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ── Pin resolution ──────────────────────────────────────────

    /// Value of a data input of `node_id`.
    ///
    /// Unwired inputs fall back to the node's config entry of the same name,
    /// then to the pin's declared default. A required input that is still
    /// null is a [`BotgraphError::MissingInput`].
    pub fn input<'a>(&'a mut self, node_id: &'a str, pin: &'a str) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let graph = Arc::clone(&self.graph);
            let node = graph.node(node_id)?;
            let spec = node.pins.input(pin).ok_or_else(|| {
                BotgraphError::evaluation(node_id, format!("no input pin '{}'", pin))
            })?;
            let default = spec.default.clone().unwrap_or(Value::Null);
            let value = self.resolve(node_id, pin, default).await?;
            if value.is_null() && spec.required {
                return Err(BotgraphError::MissingInput {
                    node: node_id.to_string(),
                    pin: pin.to_string(),
                });
            }
            Ok(value)
        })
    }

    /// Resolve a data input with an explicit default.
    pub fn resolve<'a>(
        &'a mut self,
        node_id: &'a str,
        pin: &'a str,
        default: Value,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let source = match self.graph.incoming(node_id, pin) {
                Some(source) => source.clone(),
                None => {
                    let configured = self
                        .graph
                        .node(node_id)?
                        .instance
                        .config
                        .get(pin)
                        .filter(|v| !v.is_null())
                        .cloned();
                    let value = configured.unwrap_or(default);
                    self.record_input(node_id, pin, &value);
                    return Ok(value);
                }
            };
            let value = self.output(&source).await?;
            self.record_input(node_id, pin, &value);
            Ok(value)
        })
    }

    fn record_input(&mut self, node_id: &str, pin: &str, value: &Value) {
        let Some(rec) = self.recorder.as_mut() else {
            return;
        };
        if let Some((_, sequence)) = self.open_steps.iter().rev().find(|(n, _)| n == node_id) {
            rec.record_input(*sequence, pin, value);
        }
    }

    /// Value of a data output, memoized for the rest of the pass.
    pub fn output<'a>(&'a mut self, source: &'a PinRef) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            if let Some(value) = self.memo.lookup(&source.node, &source.pin) {
                return Ok(value);
            }
            if let Some(start) = self.resolving.iter().position(|n| n == &source.node) {
                let mut path: Vec<&str> = self.resolving[start..].iter().map(String::as_str).collect();
                path.push(&source.node);
                return Err(BotgraphError::CyclicDependency {
                    node: source.node.clone(),
                    path: path.join(" -> "),
                });
            }
            self.check_cancelled()?;

            let graph = Arc::clone(&self.graph);
            let node = graph.node(&source.node)?;
            let handle = self.recorder.as_mut().map(|rec| {
                rec.begin(
                    &source.node,
                    StepKind::Evaluation,
                    Some(&source.pin),
                    &json!({ "config": node.instance.config }),
                )
            });
            if let Some(handle) = &handle {
                self.open_steps.push((source.node.clone(), handle.sequence()));
            }

            self.resolving.push(source.node.clone());
            let result = node.kind.evaluate(&node.instance, &source.pin, self).await;
            self.resolving.pop();
            if handle.is_some() {
                self.open_steps.pop();
            }

            if let (Some(rec), Some(handle)) = (self.recorder.as_mut(), handle) {
                match &result {
                    Ok(value) => rec.finish(handle, value, None),
                    Err(e) => rec.finish(handle, &Value::Null, Some(e)),
                }
            }
            let value = result?;
            debug!(node_id = %source.node, pin = %source.pin, "Evaluated output");
            self.memo.store(&source.node, &source.pin, value.clone());
            Ok(value)
        })
    }

    // ── Flow traversal ──────────────────────────────────────────

    /// Follow the edge leaving `(node_id, exec_pin)`. An unwired pin ends
    /// the path.
    pub fn traverse<'a>(&'a mut self, node_id: &'a str, exec_pin: &'a str) -> BoxFuture<'a, Result<Signal>> {
        Box::pin(async move {
            let Some(target) = self.graph.exec_target(node_id, exec_pin).cloned() else {
                debug!(node_id, pin = exec_pin, "Exec pin unwired, path ends");
                return Ok(Signal::Done);
            };
            if let Some(rec) = self.recorder.as_mut() {
                rec.record_traversal(node_id, exec_pin, &target);
            }
            self.run_node(&target.node).await
        })
    }

    /// Run a node's executor, then follow whatever it asks for.
    pub fn run_node<'a>(&'a mut self, node_id: &'a str) -> BoxFuture<'a, Result<Signal>> {
        Box::pin(async move {
            self.check_cancelled()?;
            let graph = Arc::clone(&self.graph);
            let node = graph.node(node_id)?;

            self.checkpoint(node_id).await?;
            self.check_cancelled()?;

            let handle = if self.recorder.is_some() {
                let before = json!({ "variables": self.context.variables() });
                self.recorder
                    .as_mut()
                    .map(|rec| rec.begin(node_id, StepKind::Execution, None, &before))
            } else {
                None
            };

            if let Some(handle) = &handle {
                self.open_steps.push((node_id.to_string(), handle.sequence()));
            }
            debug!(node_id, kind = node.kind.id(), "Executing node");
            let result = node.kind.execute(&node.instance, self).await;
            if handle.is_some() {
                self.open_steps.pop();
            }

            if let Some(handle) = handle {
                let after = json!({ "variables": self.context.variables() });
                if let Some(rec) = self.recorder.as_mut() {
                    match &result {
                        Ok(_) => rec.finish(handle, &after, None),
                        Err(e) => rec.finish(handle, &after, Some(e)),
                    }
                }
            }

            match result? {
                Flow::Next(pin) => {
                    if !node.pins.exec_outputs().any(|p| p.id == pin) {
                        return Err(BotgraphError::evaluation(
                            node_id,
                            format!("no exec output pin '{}'", pin),
                        ));
                    }
                    self.traverse(node_id, &pin).await
                }
                Flow::End => Ok(Signal::Done),
                Flow::Break => Ok(Signal::Break {
                    origin: node_id.to_string(),
                }),
                Flow::Forward(signal) => Ok(signal),
            }
        })
    }

    /// Pause here if an enabled breakpoint on `node_id` matches.
    async fn checkpoint(&mut self, node_id: &str) -> Result<()> {
        let graph_id = self.graph.id().to_string();
        let Some(hits) = self.debugger.hit(&graph_id, node_id, self.context.variables()) else {
            return Ok(());
        };

        let session = match &self.session {
            Some(session) => session.clone(),
            None => {
                let session =
                    self.debugger
                        .open_session(&graph_id, &self.invocation_id, self.cancel.clone());
                self.session = Some(session.clone());
                session
            }
        };

        let mut snapshot = self.context.snapshot(&self.memo, self.config.max_snapshot_bytes);
        snapshot["node_id"] = json!(node_id);
        snapshot["hit_count"] = json!(hits);

        let debugger = Arc::clone(&self.debugger);
        match debugger.pause(&session, node_id, snapshot).await {
            DebugCommand::Resume { overrides } => {
                for (path, value) in overrides {
                    debug!(node_id, path = %path, "Applying resume override");
                    self.set_variable(&path, value);
                }
                Ok(())
            }
            DebugCommand::Stop => Err(BotgraphError::Stopped {
                session: session.0.clone(),
            }),
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if !self.cancel.is_cancelled() {
            return Ok(());
        }
        let session = self
            .session
            .as_ref()
            .map(|s| s.0.clone())
            .unwrap_or_else(|| self.invocation_id.0.clone());
        Err(BotgraphError::Stopped { session })
    }

    // ── Context writes ──────────────────────────────────────────

    /// Write a context variable and drop stale volatile readers from the memo.
    /// Write a variable at a dotted path (`player.hp`).
    pub fn set_variable(&mut self, path: &str, value: Value) {
        self.context.set_variable(path, value);
        self.invalidate_volatile();
    }

    fn invalidate_volatile(&mut self) {
        let scope = self.graph.volatile_scope();
        let dropped = self.memo.invalidate_nodes(&scope);
        if dropped > 0 {
            debug!(dropped, "Invalidated volatile memo entries");
        }
    }

    /// Drop memo entries that a new iteration of `loop_node` must recompute.
    pub fn invalidate_loop_body(&mut self, loop_node: &str, body_pin: &str) {
        let scope = self.loop_scope(loop_node, body_pin);
        self.memo.invalidate_nodes(&scope.executed);
        self.memo.invalidate_nodes(&scope.derived);
    }

    /// Drop only the derived data in a loop's scope. Outputs of body nodes
    /// that already ran stay readable.
    pub fn refresh_loop_data(&mut self, loop_node: &str, body_pin: &str) {
        let scope = self.loop_scope(loop_node, body_pin);
        self.memo.invalidate_nodes(&scope.derived);
    }

    fn loop_scope(&mut self, loop_node: &str, body_pin: &str) -> Arc<LoopScope> {
        let key = (loop_node.to_string(), body_pin.to_string());
        if let Some(scope) = self.loop_scopes.get(&key) {
            return Arc::clone(scope);
        }
        let scope = Arc::new(self.graph.loop_scope(loop_node, body_pin));
        self.loop_scopes.insert(key, Arc::clone(&scope));
        scope
    }

    pub fn persist(&mut self, node_id: &str, key: &str, value: Value) {
        self.context.persist(PersistIntent {
            key: key.to_string(),
            value,
            node_id: node_id.to_string(),
        });
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        self.context.push_log(line.into());
    }

    /// Diagnostic that doesn't fail the invocation. Lands in the trace.
    pub fn note(&mut self, node_id: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(node_id, "{}", message);
        if let Some(rec) = self.recorder.as_mut() {
            rec.note(node_id, message);
        }
    }

    pub(crate) fn into_parts(self) -> (ExecutionContext, Option<TraceRecorder>, Option<SessionId>) {
        (self.context, self.recorder, self.session)
    }
}
