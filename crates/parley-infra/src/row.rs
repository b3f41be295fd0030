//! Row mapping shared by the SQL event backends.
//!
//! SQLite and PostgreSQL store events in the same `conversation_events`
//! table with timestamps as RFC3339 text and metadata as JSON text.

use chrono::{DateTime, Utc};
use parley_types::error::StoreError;
use parley_types::event::{Event, EventKind, Metadata};

/// Internal row type for mapping SQL rows to a domain Event.
#[derive(sqlx::FromRow)]
pub(crate) struct EventRow {
    conv_id: String,
    event_id: i64,
    kind: String,
    timestamp: String,
    text: Option<String>,
    channel: String,
    metadata: String,
}

impl EventRow {
    pub(crate) fn into_event(self) -> Result<Event, StoreError> {
        let event_id = u64::try_from(self.event_id)
            .map_err(|e| StoreError::MalformedEvent(format!("invalid event id: {e}")))?;
        let metadata: Metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| StoreError::MalformedEvent(format!("invalid metadata JSON: {e}")))?;

        Ok(Event {
            conv_id: self.conv_id,
            event_id,
            kind: EventKind::from(self.kind),
            timestamp: parse_datetime(&self.timestamp)?,
            text: self.text,
            channel: self.channel,
            metadata,
        })
    }
}

/// Decode `rows`, skipping the ones that do not map to an event.
pub(crate) fn decode_rows<R>(conv_id: &str, rows: &[R]) -> Vec<Event>
where
    R: sqlx::Row,
    for<'r> EventRow: sqlx::FromRow<'r, R>,
{
    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        let decoded = <EventRow as sqlx::FromRow<'_, R>>::from_row(row)
            .map_err(|e| StoreError::MalformedEvent(e.to_string()))
            .and_then(EventRow::into_event);
        match decoded {
            Ok(event) => events.push(event),
            Err(err) => tracing::warn!(conv_id, %err, "skipping malformed event row"),
        }
    }
    events
}

/// The newest decodable timestamp among `stamps`, given newest first.
///
/// A corrupt row must not wedge the conversation, so undecodable stamps are
/// logged and passed over.
pub(crate) fn latest_valid_timestamp<I>(conv_id: &str, stamps: I) -> Option<DateTime<Utc>>
where
    I: IntoIterator<Item = String>,
{
    stamps.into_iter().find_map(|stamp| match parse_datetime(&stamp) {
        Ok(ts) => Some(ts),
        Err(err) => {
            tracing::warn!(conv_id, %err, "ignoring undecodable timestamp");
            None
        }
    })
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::MalformedEvent(format!("invalid datetime: {e}")))
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}
