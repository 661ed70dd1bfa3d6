//! Breakpoint controller and debug sessions.
//!
//! Breakpoints are graph-scoped configuration shared by every invocation of
//! that graph. A debug session is opened for an invocation the first time it
//! hits a breakpoint; while paused, only that invocation waits on a oneshot
//! channel for a resume or stop command. Sibling invocations keep running.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use botgraph_core::config::DebugConfig;
use botgraph_core::error::{BotgraphError, Result};
use botgraph_core::event::EventBus;
use botgraph_core::types::{DebugEvent, InvocationId, SessionId, SessionStatus};

use crate::condition::Condition;

/// A pause point bound to a node id.
#[derive(Debug, Clone, Serialize)]
pub struct Breakpoint {
    pub node_id: String,
    pub enabled: bool,
    pub condition: Option<Condition>,
    pub hit_count: u64,
}

/// Command delivered to a paused invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugCommand {
    /// Continue, first applying `path -> value` overrides to the variables.
    Resume {
        overrides: Vec<(String, serde_json::Value)>,
    },
    Stop,
}

/// Public view of a debug session.
#[derive(Debug, Clone, Serialize)]
pub struct DebugSession {
    pub id: SessionId,
    pub graph_id: String,
    pub invocation_id: InvocationId,
    pub status: SessionStatus,
    pub paused_node: Option<String>,
    pub snapshot: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
}

struct SessionEntry {
    info: DebugSession,
    pending: Option<oneshot::Sender<DebugCommand>>,
    cancel: CancellationToken,
}

/// Manages breakpoints and paused sessions.
pub struct Debugger {
    breakpoints: RwLock<HashMap<String, HashMap<String, Breakpoint>>>,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    event_bus: Arc<EventBus>,
    pause_timeout: Option<Duration>,
}

impl Debugger {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            breakpoints: RwLock::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            event_bus,
            pause_timeout: None,
        }
    }

    pub fn from_config(config: &DebugConfig) -> Self {
        let mut debugger = Self::new(Arc::new(EventBus::new(config.event_capacity)));
        debugger.pause_timeout = config.pause_timeout_secs.map(Duration::from_secs);
        debugger
    }

    /// Stop paused sessions that get no command within `timeout`.
    pub fn with_pause_timeout(mut self, timeout: Duration) -> Self {
        self.pause_timeout = Some(timeout);
        self
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    // ── Inbound debug channel ───────────────────────────────────

    /// Subscribe to the events of one graph.
    pub fn attach(&self, graph_id: &str) -> DebugSubscription {
        DebugSubscription {
            graph_id: graph_id.to_string(),
            rx: self.event_bus.subscribe(),
        }
    }

    /// Set (or replace) a breakpoint. The condition is validated here.
    pub fn set_breakpoint(&self, graph_id: &str, node_id: &str, condition: Option<&str>) -> Result<()> {
        let condition = condition.map(Condition::parse).transpose()?;
        let mut all = self.breakpoints.write().unwrap_or_else(PoisonError::into_inner);
        all.entry(graph_id.to_string()).or_default().insert(
            node_id.to_string(),
            Breakpoint {
                node_id: node_id.to_string(),
                enabled: true,
                condition,
                hit_count: 0,
            },
        );
        info!(graph_id, node_id, "Breakpoint set");
        Ok(())
    }

    /// Returns true if a breakpoint was removed.
    pub fn remove_breakpoint(&self, graph_id: &str, node_id: &str) -> bool {
        let mut all = self.breakpoints.write().unwrap_or_else(PoisonError::into_inner);
        let removed = all
            .get_mut(graph_id)
            .is_some_and(|bps| bps.remove(node_id).is_some());
        if removed {
            info!(graph_id, node_id, "Breakpoint removed");
        }
        removed
    }

    /// Enable or disable without losing the hit count.
    pub fn set_enabled(&self, graph_id: &str, node_id: &str, enabled: bool) -> bool {
        let mut all = self.breakpoints.write().unwrap_or_else(PoisonError::into_inner);
        match all.get_mut(graph_id).and_then(|bps| bps.get_mut(node_id)) {
            Some(bp) => {
                bp.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Breakpoints of a graph, sorted by node id.
    pub fn list_breakpoints(&self, graph_id: &str) -> Vec<Breakpoint> {
        let all = self.breakpoints.read().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<Breakpoint> = all
            .get(graph_id)
            .map(|bps| bps.values().cloned().collect())
            .unwrap_or_default();
        list.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        list
    }

    /// Resume a paused session.
    pub fn resume(&self, session_id: &SessionId, overrides: Vec<(String, serde_json::Value)>) -> Result<()> {
        let (tx, graph_id) = {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = sessions
                .get_mut(session_id)
                .ok_or_else(|| BotgraphError::Debug(format!("no session {}", session_id)))?;
            let tx = entry.pending.take().ok_or_else(|| {
                BotgraphError::Debug(format!("session {} is not paused", session_id))
            })?;
            entry.info.status = SessionStatus::Running;
            entry.info.paused_node = None;
            (tx, entry.info.graph_id.clone())
        };

        if tx.send(DebugCommand::Resume { overrides }).is_err() {
            // Receiver gone: the pause already timed out.
            return Err(BotgraphError::Debug(format!(
                "session {} is no longer waiting",
                session_id
            )));
        }
        self.event_bus.publish(DebugEvent::Resumed {
            session_id: session_id.clone(),
            graph_id,
        });
        Ok(())
    }

    /// Abort the session's invocation. Works whether it is paused or running.
    pub fn stop(&self, session_id: &SessionId) -> Result<()> {
        let (pending, cancel) = {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = sessions
                .get_mut(session_id)
                .ok_or_else(|| BotgraphError::Debug(format!("no session {}", session_id)))?;
            entry.info.status = SessionStatus::Stopped;
            (entry.pending.take(), entry.cancel.clone())
        };
        cancel.cancel();
        if let Some(tx) = pending {
            let _ = tx.send(DebugCommand::Stop);
        }
        info!(session_id = %session_id, "Debug session stop requested");
        Ok(())
    }

    /// List live sessions.
    pub fn sessions(&self) -> Vec<DebugSession> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|e| e.info.clone())
            .collect()
    }

    pub fn session(&self, session_id: &SessionId) -> Option<DebugSession> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map(|e| e.info.clone())
    }

    pub fn session_status(&self, session_id: &SessionId) -> Option<SessionStatus> {
        self.session(session_id).map(|s| s.status)
    }

    /// Find a session by prefix match on the id.
    pub fn find_by_prefix(&self, prefix: &str) -> Option<SessionId> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.keys().find(|k| k.0.starts_with(prefix)).cloned()
    }

    // ── Engine side ─────────────────────────────────────────────

    /// Check for an enabled breakpoint on `node_id` whose condition holds.
    /// On a hit the counter is incremented and the new count returned.
    pub(crate) fn hit(
        &self,
        graph_id: &str,
        node_id: &str,
        variables: &serde_json::Map<String, serde_json::Value>,
    ) -> Option<u64> {
        // Cheap shared check first; most nodes have no breakpoint.
        {
            let all = self.breakpoints.read().unwrap_or_else(PoisonError::into_inner);
            let bp = all.get(graph_id)?.get(node_id)?;
            if !bp.enabled {
                return None;
            }
        }
        let mut all = self.breakpoints.write().unwrap_or_else(PoisonError::into_inner);
        // Re-check: it may have been removed or disabled in between.
        let bp = all.get_mut(graph_id)?.get_mut(node_id)?;
        if !bp.enabled {
            return None;
        }
        if let Some(condition) = &bp.condition {
            if !condition.holds(variables) {
                debug!(graph_id, node_id, condition = %condition.source, "Breakpoint condition false");
                return None;
            }
        }
        bp.hit_count += 1;
        Some(bp.hit_count)
    }

    /// Register a session for an invocation; `cancel` aborts that invocation.
    pub(crate) fn open_session(
        &self,
        graph_id: &str,
        invocation_id: &InvocationId,
        cancel: CancellationToken,
    ) -> SessionId {
        let id = SessionId::new();
        let entry = SessionEntry {
            info: DebugSession {
                id: id.clone(),
                graph_id: graph_id.to_string(),
                invocation_id: invocation_id.clone(),
                status: SessionStatus::Running,
                paused_node: None,
                snapshot: None,
                started_at: Utc::now(),
            },
            pending: None,
            cancel,
        };
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), entry);
        debug!(session_id = %id, graph_id, invocation_id = %invocation_id, "Debug session opened");
        id
    }

    /// Park the invocation until a command arrives. A lost channel or an
    /// expired pause timeout counts as stop.
    pub(crate) async fn pause(
        &self,
        session_id: &SessionId,
        node_id: &str,
        snapshot: serde_json::Value,
    ) -> DebugCommand {
        let (tx, rx) = oneshot::channel();
        let (graph_id, invocation_id, cancel) = {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = sessions.get_mut(session_id) else {
                warn!(session_id = %session_id, "Pause requested for unknown session");
                return DebugCommand::Stop;
            };
            if entry.info.status == SessionStatus::Stopped {
                return DebugCommand::Stop;
            }
            entry.pending = Some(tx);
            entry.info.status = SessionStatus::Paused;
            entry.info.paused_node = Some(node_id.to_string());
            entry.info.snapshot = Some(snapshot.clone());
            (
                entry.info.graph_id.clone(),
                entry.info.invocation_id.clone(),
                entry.cancel.clone(),
            )
        };

        let watchers = self.event_bus.publish(DebugEvent::Paused {
            session_id: session_id.clone(),
            graph_id: graph_id.clone(),
            invocation_id,
            node_id: node_id.to_string(),
            snapshot,
        });
        info!(session_id = %session_id, node_id, watchers, "Invocation paused at breakpoint");

        let command = match self.pause_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(command)) => command,
                Ok(Err(_)) => DebugCommand::Stop,
                Err(_) => {
                    warn!(session_id = %session_id, node_id, "Pause timed out, stopping invocation");
                    self.event_bus.publish(DebugEvent::Error {
                        session_id: session_id.clone(),
                        graph_id,
                        message: format!("paused at {} for longer than {:?}", node_id, timeout),
                    });
                    DebugCommand::Stop
                }
            },
            None => rx.await.unwrap_or(DebugCommand::Stop),
        };

        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.pending = None;
            entry.info.paused_node = None;
            entry.info.snapshot = None;
            entry.info.status = match command {
                DebugCommand::Resume { .. } => SessionStatus::Running,
                DebugCommand::Stop => SessionStatus::Stopped,
            };
        }
        if command == DebugCommand::Stop {
            cancel.cancel();
        }
        command
    }

    /// Close a session at the end of its invocation and notify observers.
    pub(crate) fn close_session(&self, session_id: &SessionId, outcome: &Result<()>) {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        let Some(entry) = removed else {
            return;
        };
        let graph_id = entry.info.graph_id;
        let event = match outcome {
            Ok(()) => DebugEvent::Completed {
                session_id: session_id.clone(),
                graph_id,
            },
            Err(BotgraphError::Stopped { .. }) => DebugEvent::Stopped {
                session_id: session_id.clone(),
                graph_id,
            },
            Err(e) => DebugEvent::Error {
                session_id: session_id.clone(),
                graph_id,
                message: e.to_string(),
            },
        };
        debug!(session_id = %session_id, event = event.kind(), "Debug session closed");
        self.event_bus.publish(event);
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new(Arc::new(EventBus::default()))
    }
}

/// Event stream of one graph.
pub struct DebugSubscription {
    graph_id: String,
    rx: broadcast::Receiver<DebugEvent>,
}

impl DebugSubscription {
    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    /// Next event for this graph; `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<DebugEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.graph_id() == self.graph_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(graph_id = %self.graph_id, skipped = n, "Debug subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn vars(count: i64) -> Map<String, serde_json::Value> {
        let mut m = Map::new();
        m.insert("count".into(), json!(count));
        m
    }

    #[test]
    fn test_breakpoint_hit_counts() {
        let dbg = Debugger::default();
        dbg.set_breakpoint("g", "n1", None).unwrap();
        assert_eq!(dbg.hit("g", "n1", &vars(0)), Some(1));
        assert_eq!(dbg.hit("g", "n1", &vars(0)), Some(2));
        assert_eq!(dbg.hit("g", "n2", &vars(0)), None);
        assert_eq!(dbg.hit("other", "n1", &vars(0)), None);
        assert_eq!(dbg.list_breakpoints("g")[0].hit_count, 2);
    }

    #[test]
    fn test_conditional_breakpoint() {
        let dbg = Debugger::default();
        dbg.set_breakpoint("g", "n1", Some("count > 2")).unwrap();
        assert_eq!(dbg.hit("g", "n1", &vars(1)), None);
        assert_eq!(dbg.hit("g", "n1", &vars(3)), Some(1));
    }

    #[test]
    fn test_invalid_condition_rejected() {
        let dbg = Debugger::default();
        assert!(dbg.set_breakpoint("g", "n1", Some("garbage")).is_err());
        assert!(dbg.list_breakpoints("g").is_empty());
    }

    #[test]
    fn test_disable_and_remove() {
        let dbg = Debugger::default();
        dbg.set_breakpoint("g", "n1", None).unwrap();
        assert!(dbg.set_enabled("g", "n1", false));
        assert_eq!(dbg.hit("g", "n1", &vars(0)), None);
        assert!(dbg.remove_breakpoint("g", "n1"));
        assert!(!dbg.remove_breakpoint("g", "n1"));
        assert!(!dbg.set_enabled("g", "n1", true));
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let dbg = Arc::new(Debugger::default());
        let mut sub = dbg.attach("g");
        let sid = dbg.open_session("g", &InvocationId::new(), CancellationToken::new());

        let waiter = {
            let dbg = Arc::clone(&dbg);
            let sid = sid.clone();
            tokio::spawn(async move { dbg.pause(&sid, "n1", json!({"x": 1})).await })
        };

        match sub.recv().await.unwrap() {
            DebugEvent::Paused { node_id, snapshot, .. } => {
                assert_eq!(node_id, "n1");
                assert_eq!(snapshot["x"], 1);
            }
            other => panic!("expected Paused, got {:?}", other),
        }
        assert_eq!(dbg.session(&sid).unwrap().status, SessionStatus::Paused);

        dbg.resume(&sid, vec![("v".into(), json!(5))]).unwrap();
        let command = waiter.await.unwrap();
        assert_eq!(
            command,
            DebugCommand::Resume {
                overrides: vec![("v".into(), json!(5))]
            }
        );
        assert!(matches!(sub.recv().await.unwrap(), DebugEvent::Resumed { .. }));
        assert_eq!(dbg.session(&sid).unwrap().status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn test_stop_cancels_token() {
        let dbg = Arc::new(Debugger::default());
        let token = CancellationToken::new();
        let sid = dbg.open_session("g", &InvocationId::new(), token.clone());
        let mut sub = dbg.attach("g");

        let waiter = {
            let dbg = Arc::clone(&dbg);
            let sid = sid.clone();
            tokio::spawn(async move { dbg.pause(&sid, "n1", json!({})).await })
        };
        assert!(matches!(sub.recv().await.unwrap(), DebugEvent::Paused { .. }));

        dbg.stop(&sid).unwrap();
        assert_eq!(waiter.await.unwrap(), DebugCommand::Stop);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_resume_unknown_or_running_session() {
        let dbg = Debugger::default();
        assert!(dbg.resume(&SessionId::new(), vec![]).is_err());
        let sid = dbg.open_session("g", &InvocationId::new(), CancellationToken::new());
        assert!(dbg.resume(&sid, vec![]).is_err());
    }

    #[tokio::test]
    async fn test_pause_timeout_stops() {
        let dbg = Debugger::default().with_pause_timeout(Duration::from_millis(10));
        let sid = dbg.open_session("g", &InvocationId::new(), CancellationToken::new());
        let mut sub = dbg.attach("g");
        let command = dbg.pause(&sid, "n1", json!({})).await;
        assert_eq!(command, DebugCommand::Stop);
        assert!(matches!(sub.recv().await.unwrap(), DebugEvent::Paused { .. }));
        assert!(matches!(sub.recv().await.unwrap(), DebugEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_close_session_emits_outcome() {
        let dbg = Debugger::default();
        let mut sub = dbg.attach("g");
        let sid = dbg.open_session("g", &InvocationId::new(), CancellationToken::new());
        dbg.close_session(&sid, &Ok(()));
        assert!(matches!(sub.recv().await.unwrap(), DebugEvent::Completed { .. }));
        assert!(dbg.session(&sid).is_none());

        let sid = dbg.open_session("g", &InvocationId::new(), CancellationToken::new());
        dbg.close_session(&sid, &Err(BotgraphError::Stopped { session: sid.0.clone() }));
        assert!(matches!(sub.recv().await.unwrap(), DebugEvent::Stopped { .. }));
    }

    #[tokio::test]
    async fn test_subscription_filters_graph() {
        let dbg = Debugger::default();
        let mut sub = dbg.attach("mine");
        let other = dbg.open_session("theirs", &InvocationId::new(), CancellationToken::new());
        dbg.close_session(&other, &Ok(()));
        let mine = dbg.open_session("mine", &InvocationId::new(), CancellationToken::new());
        dbg.close_session(&mine, &Ok(()));
        let event = sub.recv().await.unwrap();
        assert_eq!(event.graph_id(), "mine");
        assert_eq!(event.session_id(), &mine);
    }
}
