use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use botgraph_core::types::DebugEvent;

use crate::debugger::DebugSubscription;
use crate::snapshot;

/// JSONL debug event log.
///
/// Follows one graph's debug events and appends them to
/// `{log_dir}/{graph_id}/{timestamp}.jsonl`, one object per line, flushed
/// after every entry.
pub struct DebugEventLog {
    log_dir: PathBuf,
    /// Include pause snapshots (bounded by `snapshot_bytes`).
    include_snapshots: bool,
    snapshot_bytes: usize,
}

#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    session_id: String,
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl DebugEventLog {
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            include_snapshots: false,
            snapshot_bytes: 4096,
        }
    }

    pub fn with_snapshots(mut self, max_bytes: usize) -> Self {
        self.include_snapshots = true;
        self.snapshot_bytes = max_bytes;
        self
    }

    /// Directory a graph's log files go to.
    pub fn graph_dir(&self, graph_id: &str) -> PathBuf {
        self.log_dir.join(sanitize(graph_id))
    }

    /// Write events until cancelled or the bus closes.
    pub async fn run(self, mut subscription: DebugSubscription, cancel: CancellationToken) {
        let dir = self.graph_dir(subscription.graph_id());
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            error!(error = %e, path = %dir.display(), "Failed to create debug log directory");
            return;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = dir.join(format!("{}.jsonl", timestamp));
        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open debug log");
                return;
            }
        };

        info!(path = %log_path.display(), "Debug event log started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Debug event log cancelled");
                    break;
                }
                event = subscription.recv() => {
                    let Some(event) = event else {
                        debug!("Event bus closed, debug event log stopping");
                        break;
                    };
                    let entry = self.entry(&event);
                    match serde_json::to_string(&entry) {
                        Ok(json) => {
                            let line = format!("{}\n", json);
                            if let Err(e) = writer.write_all(line.as_bytes()).await {
                                error!(error = %e, "Failed to write debug log entry");
                                break;
                            }
                            if let Err(e) = writer.flush().await {
                                error!(error = %e, "Failed to flush debug log");
                            }
                        }
                        Err(e) => debug!(error = %e, "Skipping unserializable debug event"),
                    }
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "Debug event log finished");
    }

    fn entry(&self, event: &DebugEvent) -> LogEntry {
        let (node_id, detail) = match event {
            DebugEvent::Paused {
                node_id,
                snapshot: snap,
                invocation_id,
                ..
            } => {
                let mut detail = serde_json::json!({ "invocation_id": invocation_id });
                if self.include_snapshots {
                    detail["snapshot"] = snapshot::bounded(snap, self.snapshot_bytes);
                }
                (Some(node_id.clone()), Some(detail))
            }
            DebugEvent::Error { message, .. } => (None, Some(serde_json::json!({ "message": message }))),
            DebugEvent::Resumed { .. } | DebugEvent::Completed { .. } | DebugEvent::Stopped { .. } => {
                (None, None)
            }
        };
        LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            session_id: event.session_id().0.clone(),
            event_type: event.kind(),
            node_id,
            detail,
        }
    }
}

/// Graph ids become directory names.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Files of a graph's log directory, oldest first.
pub async fn list_logs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "jsonl") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
