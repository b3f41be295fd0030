//! PostgreSQL storage layer.
//!
//! The same `conversation_events` table as the SQLite backend, for
//! deployments that share one database between several processes.

pub mod events;

pub use events::PostgresEventBackend;
