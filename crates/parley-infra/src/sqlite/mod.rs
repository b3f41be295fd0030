//! SQLite storage layer.
//!
//! The conversation event log backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod events;
pub mod pool;

pub use events::SqliteEventBackend;
pub use pool::DatabasePool;
