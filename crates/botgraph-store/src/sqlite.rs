use std::path::Path;
use std::sync::Mutex;

use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use botgraph_core::error::{BotgraphError, Result};
use botgraph_core::trace::Trace;
use botgraph_core::traits::TraceStore;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS traces (
        id TEXT PRIMARY KEY,
        graph_id TEXT NOT NULL,
        invocation_id TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        step_count INTEGER NOT NULL,
        trace_json TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_traces_graph
        ON traces(graph_id, started_at DESC);";

/// SQLite-backed trace store. One row per trace, the full trace as JSON.
pub struct SqliteTraceStore {
    conn: Mutex<Connection>,
}

impl SqliteTraceStore {
    /// Open or create the trace database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                BotgraphError::TraceStore(format!("Failed to create trace directory: {}", e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| BotgraphError::TraceStore(format!("Failed to open trace store: {}", e)))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| BotgraphError::TraceStore(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| BotgraphError::TraceStore(format!("Failed to initialize trace schema: {}", e)))?;

        debug!(path = %path.display(), "Trace store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| BotgraphError::TraceStore(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| BotgraphError::TraceStore(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Delete a trace. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| BotgraphError::TraceStore(e.to_string()))?;
        let deleted = conn
            .execute("DELETE FROM traces WHERE id = ?1", params![id])
            .map_err(|e| BotgraphError::TraceStore(e.to_string()))?;
        Ok(deleted > 0)
    }
}

impl TraceStore for SqliteTraceStore {
    fn persist_trace<'a>(&'a self, trace: &'a Trace) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let json = serde_json::to_string(trace)
                .map_err(|e| BotgraphError::TraceStore(format!("Failed to serialize trace: {}", e)))?;
            let status = serde_json::to_value(trace.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();

            let conn = self.conn.lock().map_err(|e| BotgraphError::TraceStore(e.to_string()))?;
            conn.execute(
                "INSERT OR REPLACE INTO traces
                     (id, graph_id, invocation_id, status, started_at, step_count, trace_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    trace.id,
                    trace.graph_id,
                    trace.invocation_id.0,
                    status,
                    trace.started_at.to_rfc3339(),
                    trace.steps.len() as i64,
                    json,
                ],
            )
            .map_err(|e| BotgraphError::TraceStore(format!("Failed to save trace: {}", e)))?;
            debug!(trace_id = %trace.id, graph_id = %trace.graph_id, "Trace saved");
            Ok(())
        })
    }

    fn load_trace<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Trace>>> {
        Box::pin(async move {
            let json: Option<String> = {
                let conn = self.conn.lock().map_err(|e| BotgraphError::TraceStore(e.to_string()))?;
                conn.query_row(
                    "SELECT trace_json FROM traces WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| BotgraphError::TraceStore(e.to_string()))?
            };
            match json {
                Some(json) => serde_json::from_str(&json)
                    .map(Some)
                    .map_err(|e| BotgraphError::TraceStore(format!("Corrupt trace {}: {}", id, e))),
                None => Ok(None),
            }
        })
    }

    fn list_traces<'a>(&'a self, graph_id: &'a str, limit: usize) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let conn = self.conn.lock().map_err(|e| BotgraphError::TraceStore(e.to_string()))?;
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM traces
                     WHERE graph_id = ?1
                     ORDER BY started_at DESC, rowid DESC
                     LIMIT ?2",
                )
                .map_err(|e| BotgraphError::TraceStore(e.to_string()))?;
            let rows = stmt
                .query_map(params![graph_id, limit as i64], |row| row.get::<_, String>(0))
                .map_err(|e| BotgraphError::TraceStore(e.to_string()))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row.map_err(|e| BotgraphError::TraceStore(e.to_string()))?);
            }
            Ok(ids)
        })
    }
}
