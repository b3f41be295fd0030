//! Event store, session windowing, and dispatch engine for Parley.
//!
//! This crate defines the `EventBackend` port that the infrastructure layer
//! implements, and everything built on top of it: the `EventStore`, derived
//! sessions, the per-invocation `ConversationTracker`, the `HandlerRegistry`,
//! and the `Dispatcher`. It never depends on `parley-infra` or any
//! database/IO crate.

pub mod backend;
pub mod dispatcher;
pub mod handler;
pub mod locks;
pub mod session;
pub mod store;
pub mod tracker;
