//! Event backend trait definition (port).
//!
//! The durable append/read primitive behind the `EventStore`. Implementations
//! (JSONL file, SQLite) live in parley-infra; an in-memory implementation
//! lives here for tests and embedders.

pub mod box_backend;
pub mod memory;

use parley_types::error::StoreError;
use parley_types::event::{Event, EventDraft};

pub use box_backend::BoxEventBackend;
pub use memory::InMemoryBackend;

/// Durable, append-only storage of conversation events.
///
/// Contract shared by every implementation:
/// - `append` assigns `event_id = max(existing) + 1` for the conversation,
///   starting at 0, and settles a timestamp that never goes backwards.
/// - `read` returns the conversation's events in strictly increasing
///   `event_id` order.
/// - I/O and connection failures are `StoreError::BackendUnavailable`; a failed
///   append is fully absent from later reads.
/// - Appends for the same conversation are serialized by the backend itself,
///   even when callers bypass the dispatcher.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait EventBackend: Send + Sync {
    /// Short backend name for logs (e.g. "jsonl", "sqlite").
    fn name(&self) -> &str;

    /// Append a draft to a conversation and return the persisted event.
    fn append(
        &self,
        conv_id: &str,
        draft: EventDraft,
    ) -> impl std::future::Future<Output = Result<Event, StoreError>> + Send;

    /// Read a conversation's full history in `event_id` order.
    fn read(
        &self,
        conv_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Event>, StoreError>> + Send;

    /// List the ids of all conversations with at least one event.
    fn conversations(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<String>, StoreError>> + Send;
}
