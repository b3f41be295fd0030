//! Infrastructure for Parley: the durable event backends and config loading.
//!
//! Implements the `EventBackend` port from `parley-core` over an append-only
//! JSONL file, SQLite and PostgreSQL, and selects one of them from
//! `StorageConfig`.

pub mod backend;
pub mod config;
pub mod jsonl;
pub mod postgres;
mod row;
pub mod sqlite;
