//! Per-invocation view of one conversation handed to handlers.
//!
//! A tracker is a read-only snapshot of history plus a write buffer. Nothing
//! a handler does through it touches the store; buffered drafts are persisted
//! by the dispatcher after every handler has succeeded.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use parley_types::event::{Event, EventDraft, EventKind, Metadata};
use parley_types::session::Session;
use serde_json::Value;

use crate::session::{current_session, split_sessions};

/// Handle on the conversation being dispatched. Clones share the pending buffer.
#[derive(Debug, Clone)]
pub struct ConversationTracker {
    inbound: Arc<Event>,
    history: Arc<Vec<Event>>,
    session_gap: Duration,
    pending: Arc<Mutex<Vec<EventDraft>>>,
}

impl ConversationTracker {
    /// Build a tracker for `inbound`, which must already be part of `history`.
    pub fn new(inbound: Event, history: Vec<Event>, session_gap: Duration) -> Self {
        Self {
            inbound: Arc::new(inbound),
            history: Arc::new(history),
            session_gap,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn conv_id(&self) -> &str {
        &self.inbound.conv_id
    }

    /// Channel the triggering message arrived on; replies go back out on it.
    pub fn channel(&self) -> &str {
        &self.inbound.channel
    }

    /// The event that triggered this dispatch.
    pub fn inbound(&self) -> &Event {
        &self.inbound
    }

    pub fn last_user_message(&self) -> Option<&Event> {
        self.history.iter().rev().find(|e| e.kind == EventKind::User)
    }

    /// Text of the triggering message, or `""` when it has none.
    pub fn text(&self) -> &str {
        self.inbound.text.as_deref().unwrap_or_default()
    }

    pub fn current_session(&self) -> Session {
        current_session(&self.history, self.session_gap)
    }

    pub fn all_messages(&self) -> &[Event] {
        &self.history
    }

    pub fn sessions(&self) -> Vec<Session> {
        split_sessions(&self.history, self.session_gap)
    }

    /// Queue a bot reply. Replies are persisted in call order.
    pub fn send_bot_message(&self, text: impl Into<String>, metadata: Option<Metadata>) {
        let draft = EventDraft::bot(text, self.channel()).with_metadata(metadata.unwrap_or_default());
        self.push(draft);
    }

    /// Queue a slot assignment.
    pub fn set_slot(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.push(EventDraft::slot(key, value.into(), self.channel()));
    }

    /// Latest value of a slot in the current session, including values set
    /// earlier in this dispatch.
    pub fn slot(&self, key: &str) -> Option<Value> {
        let buffered = self
            .lock_pending()
            .iter()
            .rev()
            .filter(|d| d.kind == EventKind::Slot)
            .find_map(|d| d.metadata.get(key).cloned());
        if buffered.is_some() {
            return buffered;
        }
        self.current_session()
            .events
            .iter()
            .rev()
            .filter(|e| e.kind == EventKind::Slot)
            .find_map(|e| e.metadata.get(key).cloned())
    }

    /// Every slot of the current session, later assignments winning.
    pub fn slots(&self) -> Metadata {
        let mut slots = Metadata::new();
        for event in self.current_session().events.iter().filter(|e| e.kind == EventKind::Slot) {
            slots.extend(event.metadata.clone());
        }
        for draft in self.lock_pending().iter().filter(|d| d.kind == EventKind::Slot) {
            slots.extend(draft.metadata.clone());
        }
        slots
    }

    /// Snapshot of the drafts queued so far.
    pub fn pending(&self) -> Vec<EventDraft> {
        self.lock_pending().clone()
    }

    /// Drain the buffer for flushing.
    pub(crate) fn take_pending(&self) -> Vec<EventDraft> {
        std::mem::take(&mut *self.lock_pending())
    }

    fn push(&self, draft: EventDraft) {
        self.lock_pending().push(draft);
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<EventDraft>> {
        // The buffer is only ever pushed to or drained, so a poisoned lock
        // still holds a consistent Vec.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
