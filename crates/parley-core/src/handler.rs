//! Handlers and the ordered registry the dispatcher runs them from.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parley_types::event::{Event, EventKind};
use tracing::debug;

use crate::tracker::ConversationTracker;

/// What the dispatcher should do after a handler succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerOutcome {
    /// Run the next matching handler.
    #[default]
    Continue,
    /// Skip the remaining handlers; buffered events are still flushed.
    Stop,
}

/// A unit of bot logic.
///
/// Implemented for any `Fn(ConversationTracker) -> impl Future<Output =
/// anyhow::Result<HandlerOutcome>>`, so plain async closures and functions
/// can be registered directly.
pub trait Handler: Send + Sync + 'static {
    fn handle(
        &self,
        tracker: ConversationTracker,
    ) -> impl Future<Output = anyhow::Result<HandlerOutcome>> + Send;
}

impl<F, Fut> Handler for F
where
    F: Fn(ConversationTracker) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<HandlerOutcome>> + Send,
{
    fn handle(
        &self,
        tracker: ConversationTracker,
    ) -> impl Future<Output = anyhow::Result<HandlerOutcome>> + Send {
        self(tracker)
    }
}

type HandlerFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<HandlerOutcome>> + Send + 'a>>;

/// Object-safe form of [`Handler`].
trait HandlerDyn: Send + Sync {
    fn handle_boxed(&self, tracker: ConversationTracker) -> HandlerFuture<'_>;
}

impl<T: Handler> HandlerDyn for T {
    fn handle_boxed(&self, tracker: ConversationTracker) -> HandlerFuture<'_> {
        Box::pin(self.handle(tracker))
    }
}

/// Decides from the inbound event whether a handler runs.
pub type Predicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Stock predicates.
pub mod predicates {
    use super::*;

    pub fn always() -> impl Fn(&Event) -> bool + Send + Sync + 'static {
        |_: &Event| true
    }

    pub fn text_equals(expected: impl Into<String>) -> impl Fn(&Event) -> bool + Send + Sync + 'static {
        let expected = expected.into();
        move |event: &Event| event.text.as_deref() == Some(expected.as_str())
    }

    pub fn text_starts_with(prefix: impl Into<String>) -> impl Fn(&Event) -> bool + Send + Sync + 'static {
        let prefix = prefix.into();
        move |event: &Event| {
            event
                .text
                .as_deref()
                .is_some_and(|text| text.starts_with(prefix.as_str()))
        }
    }

    pub fn channel_is(channel: impl Into<String>) -> impl Fn(&Event) -> bool + Send + Sync + 'static {
        let channel = channel.into();
        move |event: &Event| event.channel == channel
    }

    pub fn kind_is(kind: EventKind) -> impl Fn(&Event) -> bool + Send + Sync + 'static {
        move |event: &Event| event.kind == kind
    }
}

/// A handler together with its name and optional predicate.
pub struct RegisteredHandler {
    name: String,
    predicate: Option<Predicate>,
    handler: Box<dyn HandlerDyn>,
}

impl RegisteredHandler {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handler should run for `event`. No predicate means always.
    pub fn matches(&self, event: &Event) -> bool {
        self.predicate.as_ref().is_none_or(|p| p(event))
    }

    pub(crate) fn invoke(&self, tracker: ConversationTracker) -> HandlerFuture<'_> {
        self.handler.handle_boxed(tracker)
    }
}

impl fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("name", &self.name)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Ordered set of handlers. Built before the dispatcher, immutable after.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: Vec<RegisteredHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler that runs for every inbound event.
    pub fn register<H: Handler>(&mut self, name: impl Into<String>, handler: H) -> &mut Self {
        self.insert(name.into(), None, handler)
    }

    /// Register a handler that runs only when `predicate` accepts the inbound event.
    pub fn register_when<H, P>(&mut self, name: impl Into<String>, predicate: P, handler: H) -> &mut Self
    where
        H: Handler,
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.insert(name.into(), Some(Arc::new(predicate)), handler)
    }

    fn insert<H: Handler>(&mut self, name: String, predicate: Option<Predicate>, handler: H) -> &mut Self {
        if self.contains(&name) {
            debug!(handler = %name, "handler already registered, skipping");
            return self;
        }
        self.handlers.push(RegisteredHandler {
            name,
            predicate,
            handler: Box::new(handler),
        });
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.iter().any(|h| h.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handlers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredHandler> {
        self.handlers.iter()
    }
}
