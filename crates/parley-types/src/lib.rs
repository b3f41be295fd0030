//! Shared domain types for Parley.
//!
//! This crate contains the types every other Parley crate speaks: the
//! persisted conversation `Event`, derived `Session`s, the canonical inbound
//! event handed over by channel adapters, configuration, and error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod session;
