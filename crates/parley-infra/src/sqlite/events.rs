//! SQLite event backend.
//!
//! Implements `EventBackend` from `parley-core` over the
//! `conversation_events` table keyed by `(conv_id, event_id)`.

use chrono::{DateTime, Utc};
use parley_core::backend::EventBackend;
use parley_core::locks::ConversationLocks;
use parley_types::error::StoreError;
use parley_types::event::{settle_timestamp, Event, EventDraft};
use sqlx::{Row, SqliteConnection};

use super::pool::DatabasePool;
use crate::row::{decode_rows, format_datetime, latest_valid_timestamp, parse_datetime};

/// SQLite-backed implementation of `EventBackend`.
pub struct SqliteEventBackend {
    pool: DatabasePool,
    locks: ConversationLocks,
}

impl SqliteEventBackend {
    /// Create a new backend over the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            pool,
            locks: ConversationLocks::new(),
        }
    }

    /// Connect to `database_url`, running migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = DatabasePool::new(database_url).await.map_err(unavailable)?;
        Ok(Self::new(pool))
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::BackendUnavailable(e.to_string())
}

/// Last `event_id` and the newest decodable timestamp of a conversation.
async fn last_event(
    conn: &mut SqliteConnection,
    conv_id: &str,
) -> Result<Option<(i64, Option<DateTime<Utc>>)>, StoreError> {
    let last = sqlx::query(
        "SELECT event_id, timestamp FROM conversation_events
         WHERE conv_id = ? ORDER BY event_id DESC LIMIT 1",
    )
    .bind(conv_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(unavailable)?;

    let Some(row) = last else {
        return Ok(None);
    };
    let id: i64 = row.try_get("event_id").map_err(unavailable)?;
    let ts: String = row.try_get("timestamp").map_err(unavailable)?;
    if let Ok(ts) = parse_datetime(&ts) {
        return Ok(Some((id, Some(ts))));
    }

    let stamps: Vec<String> = sqlx::query_scalar(
        "SELECT timestamp FROM conversation_events WHERE conv_id = ? ORDER BY event_id DESC",
    )
    .bind(conv_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(unavailable)?;
    Ok(Some((id, latest_valid_timestamp(conv_id, stamps))))
}

impl EventBackend for SqliteEventBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, conv_id: &str, draft: EventDraft) -> Result<Event, StoreError> {
        let _guard = self.locks.acquire(conv_id).await;
        let mut tx = self.pool.writer.begin().await.map_err(unavailable)?;

        let (event_id, last_ts) = match last_event(&mut *tx, conv_id).await? {
            Some((id, ts)) => (id + 1, ts),
            None => (0, None),
        };
        let timestamp = settle_timestamp(draft.timestamp, last_ts);
        let event = draft.into_event(conv_id, event_id as u64, timestamp);

        let metadata_json = serde_json::to_string(&event.metadata)
            .map_err(|e| StoreError::MalformedEvent(e.to_string()))?;

        sqlx::query(
            "INSERT INTO conversation_events (conv_id, event_id, kind, timestamp, text, channel, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.conv_id)
        .bind(event_id)
        .bind(event.kind.as_str())
        .bind(format_datetime(&event.timestamp))
        .bind(&event.text)
        .bind(&event.channel)
        .bind(&metadata_json)
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)?;
        Ok(event)
    }

    async fn read(&self, conv_id: &str) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM conversation_events WHERE conv_id = ? ORDER BY event_id ASC",
        )
        .bind(conv_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(unavailable)?;

        Ok(decode_rows(conv_id, &rows))
    }

    async fn conversations(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT conv_id FROM conversation_events ORDER BY conv_id")
                .fetch_all(&self.pool.reader)
                .await
                .map_err(unavailable)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
