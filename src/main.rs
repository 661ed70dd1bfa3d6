mod console;
mod replay;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use botgraph_core::config::{AppConfig, TraceBackend};
use botgraph_core::graph::GraphDefinition;
use botgraph_core::traits::TraceStore;
use botgraph_engine::{
    DebugEventLog, Debugger, Engine, InvocationOutcome, InvocationRequest, NodeTypeRegistry,
};
use botgraph_store::{InMemoryTraceStore, SqliteTraceStore};

#[derive(Parser)]
#[command(name = "botgraph", version, about = "Run, debug and replay bot behavior graphs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "botgraph.toml", env = "BOTGRAPH_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a graph and check its wiring
    Validate {
        /// Graph definition (JSON)
        graph: PathBuf,
    },
    /// Run a graph once
    Run {
        /// Graph definition (JSON)
        graph: PathBuf,
        /// Entry node id
        #[arg(long, short)]
        entry: String,
        /// Invocation arguments as JSON
        #[arg(long)]
        args: Option<String>,
        /// Event tag that triggered the run
        #[arg(long)]
        event: Option<String>,
        /// Record a trace
        #[arg(long)]
        trace: bool,
        /// Breakpoint, `node` or `node:condition`. Repeatable; opens the debug console.
        #[arg(long = "break", short = 'b')]
        breakpoints: Vec<String>,
    },
    /// Step through a recorded trace
    Replay {
        /// Trace id
        trace_id: String,
    },
    /// List recorded traces of a graph, newest first
    Traces {
        graph_id: String,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("botgraph=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "botgraph", &mut std::io::stdout());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let registry = Arc::new(NodeTypeRegistry::with_builtins());
    let debugger = Arc::new(Debugger::from_config(&config.debug));
    let store = open_trace_store(&config)?;
    let engine = Arc::new(
        Engine::new(registry, Arc::clone(&debugger), config.engine.clone())
            .with_trace_store(Arc::clone(&store)),
    );

    match cli.command {
        Commands::Validate { graph } => {
            let definition = read_graph(&graph)?;
            let loaded = engine.load(&definition)?;
            println!(
                "{}: {} nodes, {} edges, ok",
                loaded.id(),
                loaded.len(),
                loaded.edge_count()
            );
        }
        Commands::Run {
            graph,
            entry,
            args,
            event,
            trace,
            breakpoints,
        } => {
            let definition = read_graph(&graph)?;
            let loaded = engine.load(&definition)?;

            let args = match args {
                Some(raw) => serde_json::from_str(&raw).context("--args is not valid JSON")?,
                None => serde_json::json!({}),
            };
            let mut request = InvocationRequest::new(entry).with_args(args);
            if let Some(event) = event {
                request = request.with_event(event);
            }
            if trace {
                request = request.traced(true);
            }

            for spec in &breakpoints {
                let (node, condition) = match spec.split_once(':') {
                    Some((node, condition)) => (node, Some(condition)),
                    None => (spec.as_str(), None),
                };
                if !loaded.contains(node) {
                    warn!(node_id = node, "Breakpoint on a node that is not in the graph");
                }
                debugger.set_breakpoint(loaded.id(), node, condition)?;
            }

            let log_cancel = CancellationToken::new();
            let log_task = config.debug_log_dir().map(|dir| {
                let log = DebugEventLog::new(dir).with_snapshots(config.engine.max_snapshot_bytes);
                tokio::spawn(log.run(debugger.attach(loaded.id()), log_cancel.clone()))
            });

            let outcome = if breakpoints.is_empty() {
                engine.invoke(loaded, request).await?
            } else {
                console::debug_run(Arc::clone(&engine), loaded, request).await?
            };

            log_cancel.cancel();
            if let Some(task) = log_task {
                task.await.ok();
            }
            print_outcome(&outcome);
            if !outcome.is_completed() {
                std::process::exit(1);
            }
        }
        Commands::Replay { trace_id } => {
            let trace = store
                .load_trace(&trace_id)
                .await?
                .with_context(|| match config.trace.store {
                    TraceBackend::Memory => format!(
                        "trace {} not found (the memory store keeps nothing between runs; set [trace] store = \"sqlite\")",
                        trace_id
                    ),
                    TraceBackend::Sqlite => format!("trace {} not found", trace_id),
                })?;
            replay::replay(trace).await?;
        }
        Commands::Traces { graph_id, limit } => {
            for id in store.list_traces(&graph_id, limit).await? {
                println!("{}", id);
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

fn open_trace_store(config: &AppConfig) -> anyhow::Result<Arc<dyn TraceStore>> {
    Ok(match config.trace.store {
        TraceBackend::Memory => Arc::new(InMemoryTraceStore::new()),
        TraceBackend::Sqlite => {
            let path = config.trace_db_path();
            info!(path = %path.display(), "Using SQLite trace store");
            Arc::new(SqliteTraceStore::open(&path)?)
        }
    })
}

fn read_graph(path: &Path) -> anyhow::Result<GraphDefinition> {
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(GraphDefinition::from_json(&json)?)
}

fn print_outcome(outcome: &InvocationOutcome) {
    println!("invocation {}: {:?}", outcome.invocation_id, outcome.status);
    if let Some(error) = &outcome.error {
        println!("error: {}", error);
    }
    for line in &outcome.log {
        println!("log: {}", line);
    }
    if !outcome.variables.is_empty() {
        println!(
            "variables: {}",
            serde_json::to_string_pretty(&outcome.variables).unwrap_or_default()
        );
    }
    for intent in &outcome.persist_intents {
        println!("persist: {} = {} (from {})", intent.key, intent.value, intent.node_id);
    }
    if let Some(trace) = &outcome.trace {
        println!("trace: {} ({} steps)", trace.id, trace.steps.len());
    }
}
