//! Graph execution engine.
//!
//! A stored graph of typed nodes is loaded once per invocation into a
//! [`LoadedGraph`], then walked by a [`Walker`]: control follows Exec pins
//! from node executor to node executor, while data pins are pulled lazily
//! through node evaluators and memoized for the rest of the pass.
//!
//! The [`Engine`] owns the shared services (node registry, breakpoint
//! [`Debugger`], trace store) and hands every invocation a private context,
//! memo and optional [`TraceRecorder`].

pub mod builtin;
pub mod condition;
pub mod context;
pub mod debugger;
pub mod engine;
pub mod event_log;
pub mod loader;
pub mod loops;
pub mod memo;
pub mod playback;
pub mod recorder;
pub mod registry;
pub mod snapshot;
pub mod walker;

pub use context::ExecutionContext;
pub use debugger::{Breakpoint, DebugCommand, DebugSession, DebugSubscription, Debugger};
pub use engine::{Engine, InvocationOutcome, InvocationRequest, InvocationStatus};
pub use event_log::DebugEventLog;
pub use loader::{LoadedGraph, LoadedNode, LoopScope};
pub use loops::{LoopOutcome, LoopState};
pub use memo::Memo;
pub use playback::TracePlayer;
pub use recorder::TraceRecorder;
pub use registry::{Flow, NodeKind, NodeTypeRegistry, Signal};
pub use walker::Walker;
