use botgraph_core::trace::{StepKind, Trace, TraceStep};
use botgraph_engine::TracePlayer;

use crate::console::read_line;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayCommand {
    Next,
    Prev,
    Seek(usize),
    Quit,
}

pub fn parse_command(line: &str) -> Result<ReplayCommand, String> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        None | Some("n") | Some("next") => Ok(ReplayCommand::Next),
        Some("p") | Some("prev") => Ok(ReplayCommand::Prev),
        Some("q") | Some("quit") => Ok(ReplayCommand::Quit),
        Some("seek") | Some("s") => parts
            .next()
            .and_then(|n| n.parse().ok())
            .map(ReplayCommand::Seek)
            .ok_or_else(|| "usage: seek <step>".to_string()),
        Some(other) => Err(format!("unknown command '{}' (n, p, seek N, q)", other)),
    }
}

pub fn format_step(step: &TraceStep) -> String {
    let kind = match step.kind {
        StepKind::Execution => "exec",
        StepKind::Evaluation => "eval",
        StepKind::Traversal => "next",
    };
    let mut out = match &step.pin {
        Some(pin) => format!("#{} {} {}.{}", step.sequence, kind, step.node_id, pin),
        None => format!("#{} {} {}", step.sequence, kind, step.node_id),
    };
    if step.kind != StepKind::Traversal {
        out.push_str(&format!(" ({}us)", step.duration_us));
    }
    if let Some(error) = &step.error {
        out.push_str(&format!(" ERROR: {}", error));
    }
    out.push_str(&format!("\n  in:  {}\n  out: {}", step.inputs, step.outputs));
    out
}

/// Step through a recorded trace on stdin. Read-only.
pub async fn replay(trace: Trace) -> anyhow::Result<()> {
    println!(
        "Trace {} of graph {} ({} steps, {:?})",
        trace.id,
        trace.graph_id,
        trace.steps.len(),
        trace.status
    );
    if let Some(error) = &trace.error {
        println!("Error: {}", error);
    }
    for note in &trace.notes {
        let after = note
            .after_sequence
            .map(|s| format!("#{}", s))
            .unwrap_or_else(|| "start".into());
        println!("Note after {}: [{}] {}", after, note.node_id, note.message);
    }

    let mut player = TracePlayer::new(trace);
    match player.current() {
        Some(step) => println!("{}", format_step(step)),
        None => return Ok(()),
    }

    while let Some(line) = read_line("replay> ").await? {
        let step = match parse_command(&line) {
            Ok(ReplayCommand::Quit) => break,
            Ok(ReplayCommand::Next) => player.step_forward(),
            Ok(ReplayCommand::Prev) => player.step_backward(),
            Ok(ReplayCommand::Seek(n)) => player.seek(n),
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };
        match step {
            Some(step) => println!("{}", format_step(step)),
            None => eprintln!("(no step there; at #{} of {})", player.position(), player.len()),
        }
    }
    Ok(())
}
