//! Process-local event backend.

use dashmap::DashMap;
use parley_types::error::StoreError;
use parley_types::event::{settle_timestamp, Event, EventDraft};

use super::EventBackend;
use crate::locks::ConversationLocks;

/// Keeps every conversation in a `DashMap`. History is lost when dropped.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    conversations: DashMap<String, Vec<Event>>,
    locks: ConversationLocks,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, conv_id: &str, draft: EventDraft) -> Result<Event, StoreError> {
        let _guard = self.locks.acquire(conv_id).await;
        let mut events = self.conversations.entry(conv_id.to_string()).or_default();

        let (event_id, last_ts) = match events.last() {
            Some(last) => (last.event_id + 1, Some(last.timestamp)),
            None => (0, None),
        };
        let timestamp = settle_timestamp(draft.timestamp, last_ts);
        let event = draft.into_event(conv_id, event_id, timestamp);
        events.push(event.clone());
        Ok(event)
    }

    async fn read(&self, conv_id: &str) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .conversations
            .get(conv_id)
            .map(|events| events.value().clone())
            .unwrap_or_default())
    }

    async fn conversations(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self
            .conversations
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
