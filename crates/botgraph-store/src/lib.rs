pub mod memory;
pub mod sqlite;

pub use memory::InMemoryTraceStore;
pub use sqlite::SqliteTraceStore;
