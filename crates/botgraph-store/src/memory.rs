use std::sync::{PoisonError, RwLock};

use futures::future::BoxFuture;

use botgraph_core::error::Result;
use botgraph_core::trace::Trace;
use botgraph_core::traits::TraceStore;

/// Process-local trace store. Traces are kept in insertion order.
#[derive(Default)]
pub struct InMemoryTraceStore {
    traces: RwLock<Vec<Trace>>,
}

impl InMemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.traces.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TraceStore for InMemoryTraceStore {
    fn persist_trace<'a>(&'a self, trace: &'a Trace) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
            match traces.iter_mut().find(|t| t.id == trace.id) {
                Some(existing) => *existing = trace.clone(),
                None => traces.push(trace.clone()),
            }
            Ok(())
        })
    }

    fn load_trace<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Trace>>> {
        Box::pin(async move {
            let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
            Ok(traces.iter().find(|t| t.id == id).cloned())
        })
    }

    fn list_traces<'a>(&'a self, graph_id: &'a str, limit: usize) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
            Ok(traces
                .iter()
                .rev()
                .filter(|t| t.graph_id == graph_id)
                .take(limit)
                .map(|t| t.id.clone())
                .collect())
        })
    }
}
