use std::io::{self, BufRead, Write};
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use botgraph_core::types::{DebugEvent, SessionId};
use botgraph_engine::{Debugger, Engine, InvocationOutcome, InvocationRequest, LoadedGraph};

/// A line typed at the debug prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Resume(Vec<(String, Value)>),
    Stop,
    Break { node: String, condition: Option<String> },
    Clear(String),
    List,
    Vars,
    Help,
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    match head {
        "resume" | "r" | "c" => {
            let mut overrides = Vec::new();
            for token in rest.split_whitespace() {
                let (path, raw) = token
                    .split_once('=')
                    .ok_or_else(|| format!("expected path=value, got '{}'", token))?;
                if path.is_empty() {
                    return Err(format!("empty path in '{}'", token));
                }
                let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
                overrides.push((path.to_string(), value));
            }
            Ok(ConsoleCommand::Resume(overrides))
        }
        "stop" | "s" => Ok(ConsoleCommand::Stop),
        "break" | "b" => {
            let (node, condition) = match rest.split_once(char::is_whitespace) {
                Some((node, cond)) => (node, Some(cond.trim().to_string())),
                None => (rest, None),
            };
            if node.is_empty() {
                return Err("usage: break <node> [condition]".into());
            }
            Ok(ConsoleCommand::Break {
                node: node.to_string(),
                condition: condition.filter(|c| !c.is_empty()),
            })
        }
        "clear" => {
            if rest.is_empty() {
                return Err("usage: clear <node>".into());
            }
            Ok(ConsoleCommand::Clear(rest.to_string()))
        }
        "list" | "l" => Ok(ConsoleCommand::List),
        "vars" | "v" => Ok(ConsoleCommand::Vars),
        "help" | "h" | "?" => Ok(ConsoleCommand::Help),
        other => Err(format!("unknown command '{}', try 'help'", other)),
    }
}

const HELP: &str = "\
  resume [path=json ...]   continue, optionally overriding variables
  stop                     abort this invocation
  break <node> [condition] set a breakpoint (condition: path OP literal)
  clear <node>             remove a breakpoint
  list                     show breakpoints
  vars                     show the paused context
";

/// Run one invocation with an interactive prompt at every pause.
pub async fn debug_run(
    engine: Arc<Engine>,
    graph: Arc<LoadedGraph>,
    request: InvocationRequest,
) -> anyhow::Result<InvocationOutcome> {
    let debugger = engine.debugger();
    let mut subscription = debugger.attach(graph.id());

    let mut task = {
        let engine = Arc::clone(&engine);
        let graph = Arc::clone(&graph);
        tokio::spawn(async move { engine.invoke(graph, request).await })
    };

    loop {
        tokio::select! {
            result = &mut task => return Ok(result??),
            event = subscription.recv() => {
                let Some(event) = event else { continue };
                match event {
                    DebugEvent::Paused { session_id, node_id, snapshot, .. } => {
                        let hits = snapshot.get("hit_count").cloned().unwrap_or(Value::Null);
                        eprintln!("\n[paused at {} (hit {})] session {}", node_id, hits, session_id);
                        prompt(&debugger, graph.id(), &session_id, &snapshot).await?;
                    }
                    DebugEvent::Resumed { .. } => eprintln!("[resumed]"),
                    DebugEvent::Completed { .. } => eprintln!("[completed]"),
                    DebugEvent::Stopped { .. } => eprintln!("[stopped]"),
                    DebugEvent::Error { message, .. } => eprintln!("[error: {}]", message),
                }
            }
        }
    }
}

async fn prompt(
    debugger: &Debugger,
    graph_id: &str,
    session_id: &SessionId,
    snapshot: &Value,
) -> anyhow::Result<()> {
    loop {
        let Some(line) = read_line("debug> ").await? else {
            // EOF on stdin: nobody can resume us.
            debugger.stop(session_id)?;
            return Ok(());
        };
        if line.is_empty() {
            continue;
        }
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };
        match command {
            ConsoleCommand::Resume(overrides) => {
                debugger.resume(session_id, overrides)?;
                return Ok(());
            }
            ConsoleCommand::Stop => {
                debugger.stop(session_id)?;
                return Ok(());
            }
            ConsoleCommand::Break { node, condition } => {
                match debugger.set_breakpoint(graph_id, &node, condition.as_deref()) {
                    Ok(()) => eprintln!("breakpoint set on {}", node),
                    Err(e) => eprintln!("{}", e),
                }
            }
            ConsoleCommand::Clear(node) => {
                if !debugger.remove_breakpoint(graph_id, &node) {
                    eprintln!("no breakpoint on {}", node);
                }
            }
            ConsoleCommand::List => {
                for bp in debugger.list_breakpoints(graph_id) {
                    let condition = bp.condition.as_ref().map(|c| c.source.as_str()).unwrap_or("-");
                    eprintln!(
                        "  {} enabled={} hits={} if {}",
                        bp.node_id, bp.enabled, bp.hit_count, condition
                    );
                }
            }
            ConsoleCommand::Vars => match serde_json::to_string_pretty(snapshot) {
                Ok(text) => eprintln!("{}", text),
                Err(e) => warn!(error = %e, "Could not render snapshot"),
            },
            ConsoleCommand::Help => eprint!("{}", HELP),
        }
    }
}

/// Read one trimmed line from stdin without blocking the runtime.
/// `None` on EOF.
pub async fn read_line(prompt: &str) -> anyhow::Result<Option<String>> {
    let prompt = prompt.to_string();
    let line = tokio::task::spawn_blocking(move || -> io::Result<Option<String>> {
        let mut stdout = io::stdout();
        print!("{}", prompt);
        stdout.flush()?;
        let mut input = String::new();
        if io::stdin().lock().read_line(&mut input)? == 0 {
            return Ok(None);
        }
        Ok(Some(input.trim().to_string()))
    })
    .await??;
    Ok(line)
}
