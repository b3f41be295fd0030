//! BoxEventBackend -- object-safe dynamic dispatch wrapper for EventBackend.
//!
//! 1. Define an object-safe `EventBackendDyn` trait with boxed futures
//! 2. Blanket-impl `EventBackendDyn` for all `T: EventBackend`
//! 3. `BoxEventBackend` wraps `Box<dyn EventBackendDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use parley_types::error::StoreError;
use parley_types::event::{Event, EventDraft};

use super::EventBackend;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`EventBackend`] with boxed futures.
pub trait EventBackendDyn: Send + Sync {
    fn name(&self) -> &str;

    fn append_boxed<'a>(
        &'a self,
        conv_id: &'a str,
        draft: EventDraft,
    ) -> BoxFuture<'a, Result<Event, StoreError>>;

    fn read_boxed<'a>(&'a self, conv_id: &'a str) -> BoxFuture<'a, Result<Vec<Event>, StoreError>>;

    fn conversations_boxed(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>>;
}

impl<T: EventBackend> EventBackendDyn for T {
    fn name(&self) -> &str {
        EventBackend::name(self)
    }

    fn append_boxed<'a>(
        &'a self,
        conv_id: &'a str,
        draft: EventDraft,
    ) -> BoxFuture<'a, Result<Event, StoreError>> {
        Box::pin(self.append(conv_id, draft))
    }

    fn read_boxed<'a>(&'a self, conv_id: &'a str) -> BoxFuture<'a, Result<Vec<Event>, StoreError>> {
        Box::pin(self.read(conv_id))
    }

    fn conversations_boxed(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        Box::pin(self.conversations())
    }
}

/// Type-erased event backend for selecting storage once at startup.
///
/// Since `EventBackend` uses RPITIT, it cannot be used as a trait object
/// directly. `BoxEventBackend` provides equivalent methods that delegate to
/// the inner `EventBackendDyn` trait object.
pub struct BoxEventBackend {
    inner: Box<dyn EventBackendDyn + Send + Sync>,
}

impl BoxEventBackend {
    /// Wrap a concrete `EventBackend` in a type-erased box.
    pub fn new<T: EventBackend + 'static>(backend: T) -> Self {
        Self {
            inner: Box::new(backend),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn append(&self, conv_id: &str, draft: EventDraft) -> Result<Event, StoreError> {
        self.inner.append_boxed(conv_id, draft).await
    }

    pub async fn read(&self, conv_id: &str) -> Result<Vec<Event>, StoreError> {
        self.inner.read_boxed(conv_id).await
    }

    pub async fn conversations(&self) -> Result<Vec<String>, StoreError> {
        self.inner.conversations_boxed().await
    }
}

impl std::fmt::Debug for BoxEventBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxEventBackend")
            .field("name", &self.name())
            .finish()
    }
}
