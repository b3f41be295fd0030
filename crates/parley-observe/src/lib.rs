//! Observability setup for Parley: structured logging and optional trace export.

pub mod tracing_setup;
