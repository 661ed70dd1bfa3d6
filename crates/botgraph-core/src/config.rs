use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BotgraphError, Result};

/// Top-level botgraph configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub debug: DebugConfig,
    #[serde(default)]
    pub trace: TraceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard ceiling on iterations of a single while loop.
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: usize,
    /// Snapshot values larger than this (serialized) are replaced by a marker.
    #[serde(default = "default_max_snapshot_bytes")]
    pub max_snapshot_bytes: usize,
    /// Record a trace for invocations that don't say otherwise.
    #[serde(default)]
    pub trace_by_default: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: default_max_loop_iterations(),
            max_snapshot_bytes: default_max_snapshot_bytes(),
            trace_by_default: false,
        }
    }
}

fn default_max_loop_iterations() -> usize {
    1000
}

fn default_max_snapshot_bytes() -> usize {
    16 * 1024
}

/// Breakpoint / debug channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Capacity of the outbound debug event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Stop a paused session that receives no command within this many seconds.
    /// Unset means wait forever.
    #[serde(default)]
    pub pause_timeout_secs: Option<u64>,
    /// Directory for JSONL debug event logs. Unset disables the log.
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            pause_timeout_secs: None,
            log_dir: None,
        }
    }
}

fn default_event_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    #[serde(default)]
    pub store: TraceBackend,
    /// SQLite database path, used when `store = "sqlite"`.
    #[serde(default = "default_trace_db")]
    pub db_path: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            store: TraceBackend::default(),
            db_path: default_trace_db(),
        }
    }
}

fn default_trace_db() -> String {
    "botgraph-traces.db".to_string()
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| BotgraphError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| BotgraphError::Config(e.to_string()))?;
        debug!(path = %path.display(), store = ?config.trace.store, "Loaded config");
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Resolve the trace database path (expand ~).
    pub fn trace_db_path(&self) -> PathBuf {
        expand_home(&self.trace.db_path)
    }

    /// Resolve the debug event log directory (expand ~).
    pub fn debug_log_dir(&self) -> Option<PathBuf> {
        self.debug.log_dir.as_deref().map(expand_home)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_BOTGRAPH_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_BOTGRAPH_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${BOTGRAPH_SURELY_UNSET_VAR}\"");
        assert_eq!(result, "key = \"${BOTGRAPH_SURELY_UNSET_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine.max_loop_iterations, 1000);
        assert_eq!(config.engine.max_snapshot_bytes, 16 * 1024);
        assert!(!config.engine.trace_by_default);
        assert_eq!(config.debug.event_capacity, 256);
        assert!(config.debug.pause_timeout_secs.is_none());
        assert_eq!(config.trace.store, TraceBackend::Memory);
    }

    #[test]
    fn test_partial_sections() {
        let config: AppConfig = toml::from_str(
            r#"
[engine]
max_loop_iterations = 50

[trace]
store = "sqlite"
"#,
        )
        .unwrap();
        assert_eq!(config.engine.max_loop_iterations, 50);
        assert_eq!(config.engine.max_snapshot_bytes, 16 * 1024);
        assert_eq!(config.trace.store, TraceBackend::Sqlite);
        assert_eq!(config.trace.db_path, "botgraph-traces.db");
    }
}
