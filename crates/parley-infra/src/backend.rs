//! Backend selection.
//!
//! The one place that branches on the configured storage kind. Everything
//! downstream sees a type-erased `BoxEventBackend`.

use parley_core::backend::{BoxEventBackend, InMemoryBackend};
use parley_types::config::StorageConfig;
use parley_types::error::StoreError;

use crate::jsonl::JsonlBackend;
use crate::postgres::PostgresEventBackend;
use crate::sqlite::SqliteEventBackend;

/// Open the backend described by `config`.
pub async fn open_backend(config: &StorageConfig) -> Result<BoxEventBackend, StoreError> {
    let backend = match config {
        StorageConfig::Jsonl { path } => BoxEventBackend::new(JsonlBackend::open(path).await?),
        StorageConfig::Sqlite { url } => BoxEventBackend::new(SqliteEventBackend::connect(url).await?),
        StorageConfig::Postgres { url } => BoxEventBackend::new(PostgresEventBackend::connect(url).await?),
        StorageConfig::Memory => BoxEventBackend::new(InMemoryBackend::new()),
    };
    tracing::info!(backend = backend.name(), "event backend opened");
    Ok(backend)
}
