pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod trace;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{BotgraphError, Result};
pub use event::EventBus;
pub use types::*;
