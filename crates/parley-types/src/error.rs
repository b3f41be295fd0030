use std::fmt;

use thiserror::Error;

/// Errors from event backends and the event store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O or connection failure. Never retried inside the store.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A stored record could not be decoded. Readers skip these with a warning.
    #[error("malformed event: {0}")]
    MalformedEvent(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::BackendUnavailable(e.to_string())
    }
}

/// The step of the dispatch pipeline an inbound event has reached.
///
/// `Failed` is not a stage of its own: a dispatch error records the stage it
/// failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    Received,
    Persisted,
    Tracking,
    HandlersRunning,
    Flushing,
    Done,
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchStage::Received => write!(f, "received"),
            DispatchStage::Persisted => write!(f, "persisted"),
            DispatchStage::Tracking => write!(f, "tracking"),
            DispatchStage::HandlersRunning => write!(f, "handlers_running"),
            DispatchStage::Flushing => write!(f, "flushing"),
            DispatchStage::Done => write!(f, "done"),
        }
    }
}
