//! Derived conversation sessions.
//!
//! A session is a maximal run of events with no inter-event gap above some
//! inactivity threshold. Sessions are never persisted; they are recomputed
//! from history on every read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventKind};

/// A contiguous slice of a conversation's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Zero-based position of this session within the conversation.
    pub index: usize,
    pub events: Vec<Event>,
}

impl Session {
    /// Timestamp of the first event in the session.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.events.first().map(|e| e.timestamp)
    }

    /// Timestamp of the last event in the session.
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.events.last().map(|e| e.timestamp)
    }

    /// Id of the first event in the session.
    pub fn first_event_id(&self) -> Option<u64> {
        self.events.first().map(|e| e.event_id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of user and bot messages in the session.
    pub fn message_count(&self) -> usize {
        self.events.iter().filter(|e| e.kind.is_message()).count()
    }

    /// Events of the given kind, in order.
    pub fn events_of<'a>(&'a self, kind: &'a EventKind) -> impl Iterator<Item = &'a Event> + 'a {
        self.events.iter().filter(move |e| &e.kind == kind)
    }
}
