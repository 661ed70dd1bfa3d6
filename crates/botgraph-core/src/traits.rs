use futures::future::BoxFuture;

use crate::error::Result;
use crate::trace::Trace;

/// Opaque handle giving node kinds access to agent actions and queries.
/// The engine only threads it through; it never implements capabilities.
pub trait Capability: Send + Sync + 'static {
    /// Capability provider name (used in logs).
    fn name(&self) -> &str;

    /// Perform an action (`move_to`, `send_message`, ...) with a JSON payload.
    fn invoke(
        &self,
        action: &str,
        payload: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Capability handle for invocations that have no agent attached.
/// Every action fails, which surfaces on the calling node's failure pins.
pub struct NoCapability;

impl Capability for NoCapability {
    fn name(&self) -> &str {
        "none"
    }

    fn invoke(
        &self,
        action: &str,
        _payload: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        let message = format!("no capability available for action '{}'", action);
        Box::pin(async move { Err(crate::error::BotgraphError::evaluation("capability", message)) })
    }
}

/// Persistence backend for finalized traces.
pub trait TraceStore: Send + Sync + 'static {
    fn persist_trace<'a>(&'a self, trace: &'a Trace) -> BoxFuture<'a, Result<()>>;

    fn load_trace<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Trace>>>;

    /// Most recent trace ids for a graph, newest first.
    fn list_traces<'a>(&'a self, graph_id: &'a str, limit: usize)
        -> BoxFuture<'a, Result<Vec<String>>>;
}
