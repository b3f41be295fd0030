//! Conversation events: the atomic, append-only facts of a conversation.
//!
//! An `Event` is created exactly once, by a backend append, and never changes
//! afterwards. Callers describe what they want appended with an `EventDraft`;
//! the backend assigns `event_id` and settles the final `timestamp`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Opaque channel-specific key/value data carried by an event.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// What kind of fact an event records.
///
/// Serialized as a lowercase string (`"user"`, `"bot"`, `"session_start"`,
/// `"slot"`); any other string round-trips as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// A message sent by the user on some channel.
    User,
    /// A message produced by a handler for delivery to the user.
    Bot,
    /// Synthetic marker inserted by the store when a new session begins.
    SessionStart,
    /// A slot assignment; the metadata holds `{key: value}`.
    Slot,
    /// Channel-specific metadata event.
    Custom(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::User => "user",
            EventKind::Bot => "bot",
            EventKind::SessionStart => "session_start",
            EventKind::Slot => "slot",
            EventKind::Custom(name) => name,
        }
    }

    /// Whether the event carries a conversational message (user or bot).
    pub fn is_message(&self) -> bool {
        matches!(self, EventKind::User | EventKind::Bot)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "user" => EventKind::User,
            "bot" => EventKind::Bot,
            "session_start" => EventKind::SessionStart,
            "slot" => EventKind::Slot,
            other => EventKind::Custom(other.to_string()),
        })
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A persisted conversation event.
///
/// Events within one conversation are totally ordered by `event_id`, which
/// starts at 0 and grows by exactly 1 per append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub conv_id: String,
    pub event_id: u64,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub text: Option<String>,
    pub channel: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// An event that has not been appended yet.
///
/// `timestamp` is optional: when absent the backend stamps the event with the
/// current time. Either way the backend clamps it so timestamps never go
/// backwards within a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub kind: EventKind,
    pub text: Option<String>,
    pub channel: String,
    pub metadata: Metadata,
    pub timestamp: Option<DateTime<Utc>>,
}

impl EventDraft {
    /// Draft of a user message.
    pub fn user(text: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::message(EventKind::User, text, channel)
    }

    /// Draft of a bot message.
    pub fn bot(text: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::message(EventKind::Bot, text, channel)
    }

    /// Draft of a synthetic session start marker.
    pub fn session_start(channel: impl Into<String>) -> Self {
        Self {
            kind: EventKind::SessionStart,
            text: None,
            channel: channel.into(),
            metadata: Metadata::new(),
            timestamp: None,
        }
    }

    /// Draft of a slot assignment.
    pub fn slot(key: impl Into<String>, value: serde_json::Value, channel: impl Into<String>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(key.into(), value);
        Self {
            kind: EventKind::Slot,
            text: None,
            channel: channel.into(),
            metadata,
            timestamp: None,
        }
    }

    fn message(kind: EventKind, text: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            kind,
            text: Some(text.into()),
            channel: channel.into(),
            metadata: Metadata::new(),
            timestamp: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Turn the draft into an event with the id and timestamp a backend settled on.
    pub fn into_event(self, conv_id: &str, event_id: u64, timestamp: DateTime<Utc>) -> Event {
        Event {
            conv_id: conv_id.to_string(),
            event_id,
            kind: self.kind,
            timestamp,
            text: self.text,
            channel: self.channel,
            metadata: self.metadata,
        }
    }
}

/// Settle the timestamp of a new event given the conversation's last one.
///
/// Out-of-order timestamps are normalized up to the previous event's instant
/// instead of reordering history.
pub fn settle_timestamp(
    requested: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    let requested = requested.unwrap_or_else(Utc::now);
    match last {
        Some(last) if requested < last => last,
        _ => requested,
    }
}

/// Canonical inbound event produced by a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub conv_id: String,
    pub channel: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    /// When the adapter received the message. Defaults to append time.
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

impl InboundEvent {
    pub fn new(conv_id: impl Into<String>, channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            conv_id: conv_id.into(),
            channel: channel.into(),
            text: Some(text.into()),
            metadata: Metadata::new(),
            received_at: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = Some(at);
        self
    }
}

/// Generate a fresh conversation id for channels that do not supply one.
pub fn new_conversation_id() -> String {
    Uuid::now_v7().to_string()
}
