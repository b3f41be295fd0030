//! The event store: the only write path into conversation history.
//!
//! `EventStore` wraps a type-erased backend chosen at startup and adds the
//! conveniences the dispatcher and channel adapters need. It is cheap to
//! clone; clones share the backend.

use std::sync::Arc;
use std::time::Duration;

use parley_types::error::StoreError;
use parley_types::event::{Event, EventDraft, EventKind, InboundEvent, Metadata};
use parley_types::session::Session;
use tracing::{debug, instrument};

use crate::backend::BoxEventBackend;
use crate::session::split_sessions;

/// Store behavior that is not a property of the backend.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Insert a `SessionStart` event before a user message that opens a new session.
    pub session_markers: bool,
    /// Gap used to decide whether a user message opens a new session.
    pub session_gap: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            session_markers: false,
            session_gap: Duration::from_secs(1800),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventStore {
    backend: Arc<BoxEventBackend>,
    options: StoreOptions,
}

impl EventStore {
    pub fn new(backend: BoxEventBackend) -> Self {
        Self::with_options(backend, StoreOptions::default())
    }

    pub fn with_options(backend: BoxEventBackend, options: StoreOptions) -> Self {
        Self {
            backend: Arc::new(backend),
            options,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Append any draft to a conversation.
    #[instrument(skip(self, draft), fields(kind = %draft.kind))]
    pub async fn append(&self, conv_id: &str, draft: EventDraft) -> Result<Event, StoreError> {
        let event = self.backend.append(conv_id, draft).await?;
        debug!(event_id = event.event_id, "event appended");
        Ok(event)
    }

    pub async fn append_user_message(
        &self,
        conv_id: &str,
        text: impl Into<String>,
        channel: &str,
        metadata: Metadata,
    ) -> Result<Event, StoreError> {
        let draft = EventDraft::user(text, channel).with_metadata(metadata);
        self.append_user_draft(conv_id, draft).await
    }

    pub async fn append_bot_message(
        &self,
        conv_id: &str,
        text: impl Into<String>,
        channel: &str,
        metadata: Metadata,
    ) -> Result<Event, StoreError> {
        self.append(conv_id, EventDraft::bot(text, channel).with_metadata(metadata))
            .await
    }

    /// Persist a channel's inbound message as a user event.
    ///
    /// Unlike `append_user_message` this keeps an absent text absent and
    /// honors the adapter's receive time.
    pub async fn record_inbound(&self, inbound: &InboundEvent) -> Result<Event, StoreError> {
        let draft = EventDraft {
            kind: EventKind::User,
            text: inbound.text.clone(),
            channel: inbound.channel.clone(),
            metadata: inbound.metadata.clone(),
            timestamp: inbound.received_at,
        };
        self.append_user_draft(&inbound.conv_id, draft).await
    }

    async fn append_user_draft(&self, conv_id: &str, draft: EventDraft) -> Result<Event, StoreError> {
        if self.options.session_markers && self.opens_session(conv_id, &draft).await? {
            let mut marker = EventDraft::session_start(draft.channel.clone());
            marker.timestamp = draft.timestamp;
            self.append(conv_id, marker).await?;
        }
        self.append(conv_id, draft).await
    }

    async fn opens_session(&self, conv_id: &str, draft: &EventDraft) -> Result<bool, StoreError> {
        let history = self.backend.read(conv_id).await?;
        let Some(last) = history.last() else {
            return Ok(true);
        };
        let at = draft.timestamp.unwrap_or_else(chrono::Utc::now);
        let gap = chrono::TimeDelta::from_std(self.options.session_gap)
            .unwrap_or(chrono::TimeDelta::MAX);
        Ok(at - last.timestamp > gap)
    }

    /// Full ordered history of a conversation. Empty for unknown ids.
    pub async fn history(&self, conv_id: &str) -> Result<Vec<Event>, StoreError> {
        self.backend.read(conv_id).await
    }

    pub async fn sessions(&self, conv_id: &str, gap_threshold: Duration) -> Result<Vec<Session>, StoreError> {
        let history = self.history(conv_id).await?;
        Ok(split_sessions(&history, gap_threshold))
    }

    pub async fn conversations(&self) -> Result<Vec<String>, StoreError> {
        self.backend.conversations().await
    }
}
