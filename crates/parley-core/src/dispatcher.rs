//! The dispatch pipeline: persist, track, run handlers, flush.
//!
//! Each inbound event moves through
//! `Received -> Persisted -> Tracking -> HandlersRunning -> Flushing -> Done`.
//! Everything after `Received` runs while holding the conversation's lock, so
//! events for one conversation are processed one at a time in arrival order
//! and every handler sees the replies produced for earlier messages. Events
//! for different conversations proceed independently.

use std::time::Duration;

use parley_types::error::{DispatchStage, StoreError};
use parley_types::event::{Event, EventKind, InboundEvent};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::handler::{HandlerOutcome, HandlerRegistry, RegisteredHandler};
use crate::locks::ConversationLocks;
use crate::store::EventStore;
use crate::tracker::ConversationTracker;

/// Why a dispatch did not reach `Done`.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("store failure while {stage}: {source}")]
    Store {
        stage: DispatchStage,
        #[source]
        source: StoreError,
    },

    #[error("handler '{handler}' failed: {error:#}")]
    Handler { handler: String, error: anyhow::Error },

    #[error("handler '{handler}' timed out after {after:?}")]
    Timeout { handler: String, after: Duration },
}

impl DispatchError {
    /// The stage the dispatch failed in.
    pub fn stage(&self) -> DispatchStage {
        match self {
            DispatchError::Store { stage, .. } => *stage,
            DispatchError::Handler { .. } | DispatchError::Timeout { .. } => {
                DispatchStage::HandlersRunning
            }
        }
    }

    fn store(stage: DispatchStage) -> impl FnOnce(StoreError) -> Self {
        move |source| DispatchError::Store { stage, source }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Gap used for the sessions trackers expose.
    pub session_gap: Duration,
    /// Upper bound on a single handler run. `None` waits forever.
    pub handler_timeout: Option<Duration>,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            session_gap: Duration::from_secs(1800),
            handler_timeout: None,
        }
    }
}

/// Routes inbound events through the store and the handler registry.
#[derive(Debug)]
pub struct Dispatcher {
    store: EventStore,
    registry: HandlerRegistry,
    locks: ConversationLocks,
    options: DispatcherOptions,
}

impl Dispatcher {
    pub fn new(store: EventStore, registry: HandlerRegistry) -> Self {
        Self::with_options(store, registry, DispatcherOptions::default())
    }

    pub fn with_options(store: EventStore, registry: HandlerRegistry, options: DispatcherOptions) -> Self {
        Self {
            store,
            registry,
            locks: ConversationLocks::new(),
            options,
        }
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn options(&self) -> &DispatcherOptions {
        &self.options
    }

    /// Process one inbound event and return the bot events to deliver, in order.
    ///
    /// On a handler failure or timeout nothing that invocation buffered is
    /// persisted; the user's message stays in history.
    #[instrument(skip(self, inbound), fields(conv_id = %inbound.conv_id, channel = %inbound.channel))]
    pub async fn handle(&self, inbound: InboundEvent) -> Result<Vec<Event>, DispatchError> {
        let _guard = self.locks.acquire(&inbound.conv_id).await;

        let recorded = self
            .store
            .record_inbound(&inbound)
            .await
            .map_err(DispatchError::store(DispatchStage::Persisted))?;
        debug!(event_id = recorded.event_id, stage = %DispatchStage::Persisted, "inbound persisted");

        let history = self
            .store
            .history(&inbound.conv_id)
            .await
            .map_err(DispatchError::store(DispatchStage::Tracking))?;
        let tracker = ConversationTracker::new(recorded, history, self.options.session_gap);

        self.run_handlers(&tracker).await?;

        let pending = tracker.take_pending();
        let mut outbound = Vec::new();
        for draft in pending {
            let event = self
                .store
                .append(&inbound.conv_id, draft)
                .await
                .map_err(DispatchError::store(DispatchStage::Flushing))?;
            if event.kind == EventKind::Bot {
                outbound.push(event);
            }
        }

        info!(replies = outbound.len(), stage = %DispatchStage::Done, "dispatch complete");
        Ok(outbound)
    }

    async fn run_handlers(&self, tracker: &ConversationTracker) -> Result<(), DispatchError> {
        for entry in self.registry.iter() {
            if !entry.matches(tracker.inbound()) {
                continue;
            }
            debug!(handler = entry.name(), stage = %DispatchStage::HandlersRunning, "running handler");

            match self.run_one(entry, tracker.clone()).await? {
                HandlerOutcome::Continue => {}
                HandlerOutcome::Stop => {
                    debug!(handler = entry.name(), "handler stopped propagation");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn run_one(
        &self,
        entry: &RegisteredHandler,
        tracker: ConversationTracker,
    ) -> Result<HandlerOutcome, DispatchError> {
        let run = entry.invoke(tracker);
        let result = match self.options.handler_timeout {
            Some(after) => match tokio::time::timeout(after, run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(handler = entry.name(), ?after, "handler timed out");
                    return Err(DispatchError::Timeout {
                        handler: entry.name().to_string(),
                        after,
                    });
                }
            },
            None => run.await,
        };

        result.map_err(|e| {
            error!(handler = entry.name(), error = %format!("{e:#}"), "handler failed");
            DispatchError::Handler {
                handler: entry.name().to_string(),
                error: e,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BoxEventBackend, EventBackend, InMemoryBackend};
    use crate::handler::predicates;
    use parley_types::event::{EventDraft, Metadata};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn memory_store() -> EventStore {
        EventStore::new(BoxEventBackend::new(InMemoryBackend::new()))
    }

    fn greeter() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register_when(
            "hello",
            predicates::text_equals("hello"),
            |t: ConversationTracker| async move {
                t.send_bot_message("Hi there!", None);
                Ok(HandlerOutcome::Continue)
            },
        );
        registry.register("echo", |t: ConversationTracker| async move {
            let reply = format!("Echo: {}", t.text());
            t.send_bot_message(reply, None);
            Ok(HandlerOutcome::Continue)
        });
        registry
    }

    fn texts(events: &[Event]) -> Vec<(EventKind, String)> {
        events
            .iter()
            .map(|e| (e.kind.clone(), e.text.clone().unwrap_or_default()))
            .collect()
    }

    /// Backend that can be switched off to simulate an outage.
    #[derive(Default)]
    struct FlakyBackend {
        inner: InMemoryBackend,
        down: AtomicBool,
        fail_after: Option<usize>,
        appends: AtomicUsize,
    }

    impl EventBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn append(&self, conv_id: &str, draft: EventDraft) -> Result<Event, StoreError> {
            let n = self.appends.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) || self.fail_after.is_some_and(|limit| n >= limit) {
                return Err(StoreError::BackendUnavailable("offline".to_string()));
            }
            self.inner.append(conv_id, draft).await
        }

        async fn read(&self, conv_id: &str) -> Result<Vec<Event>, StoreError> {
            self.inner.read(conv_id).await
        }

        async fn conversations(&self) -> Result<Vec<String>, StoreError> {
            self.inner.conversations().await
        }
    }

    #[tokio::test]
    async fn test_hello_scenario() {
        let dispatcher = Dispatcher::new(memory_store(), greeter());

        let out = dispatcher.handle(InboundEvent::new("c1", "cli", "hello")).await.unwrap();
        assert_eq!(
            texts(&out),
            vec![
                (EventKind::Bot, "Hi there!".to_string()),
                (EventKind::Bot, "Echo: hello".to_string()),
            ]
        );

        let history = dispatcher.store().history("c1").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(
            texts(&history),
            vec![
                (EventKind::User, "hello".to_string()),
                (EventKind::Bot, "Hi there!".to_string()),
                (EventKind::Bot, "Echo: hello".to_string()),
            ]
        );
        assert!(history.iter().all(|e| e.channel == "cli"));
        assert_eq!(out, history[1..].to_vec());
    }

    #[tokio::test]
    async fn test_no_matching_handlers_only_records_inbound() {
        let dispatcher = Dispatcher::new(memory_store(), HandlerRegistry::new());
        let out = dispatcher.handle(InboundEvent::new("c1", "cli", "anyone?")).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(dispatcher.store().history("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_handler_error_discards_buffer_and_skips_rest() {
        let later_ran = Arc::new(AtomicBool::new(false));
        let flag = later_ran.clone();

        let mut registry = HandlerRegistry::new();
        registry.register("buffers", |t: ConversationTracker| async move {
            t.send_bot_message("should vanish", None);
            Ok(HandlerOutcome::Continue)
        });
        registry.register("fails", |_t: ConversationTracker| async move {
            Err::<HandlerOutcome, _>(anyhow::anyhow!("boom"))
        });
        registry.register("later", move |_t: ConversationTracker| {
            let flag = flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(HandlerOutcome::Continue)
            }
        });
        let dispatcher = Dispatcher::new(memory_store(), registry);

        let err = dispatcher.handle(InboundEvent::new("c1", "cli", "hi")).await.unwrap_err();
        assert!(matches!(&err, DispatchError::Handler { handler, .. } if handler == "fails"));
        assert_eq!(err.stage(), DispatchStage::HandlersRunning);
        assert!(err.to_string().contains("boom"));
        assert!(!later_ran.load(Ordering::SeqCst));

        let history = dispatcher.store().history("c1").await.unwrap();
        assert_eq!(texts(&history), vec![(EventKind::User, "hi".to_string())]);
    }

    #[tokio::test]
    async fn test_stop_skips_remaining_but_flushes() {
        let mut registry = HandlerRegistry::new();
        registry.register("first", |t: ConversationTracker| async move {
            t.send_bot_message("only me", None);
            Ok(HandlerOutcome::Stop)
        });
        registry.register("second", |t: ConversationTracker| async move {
            t.send_bot_message("never", None);
            Ok(HandlerOutcome::Continue)
        });
        let dispatcher = Dispatcher::new(memory_store(), registry);

        let out = dispatcher.handle(InboundEvent::new("c1", "cli", "hi")).await.unwrap();
        assert_eq!(texts(&out), vec![(EventKind::Bot, "only me".to_string())]);
    }

    #[tokio::test]
    async fn test_handler_timeout() {
        let mut registry = HandlerRegistry::new();
        registry.register("slow", |t: ConversationTracker| async move {
            t.send_bot_message("too late", None);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(HandlerOutcome::Continue)
        });
        let options = DispatcherOptions {
            handler_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let dispatcher = Dispatcher::with_options(memory_store(), registry, options);

        let err = dispatcher.handle(InboundEvent::new("c1", "cli", "hi")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { ref handler, .. } if handler == "slow"));
        assert_eq!(dispatcher.store().history("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persist_failure_runs_no_handlers() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let mut registry = HandlerRegistry::new();
        registry.register("any", move |_t: ConversationTracker| {
            let flag = flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(HandlerOutcome::Continue)
            }
        });

        let backend = FlakyBackend {
            down: AtomicBool::new(true),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(EventStore::new(BoxEventBackend::new(backend)), registry);

        let err = dispatcher.handle(InboundEvent::new("c1", "cli", "hi")).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Store {
                stage: DispatchStage::Persisted,
                source: StoreError::BackendUnavailable(_)
            }
        ));
        assert!(!ran.load(Ordering::SeqCst));
        assert!(dispatcher.store().history("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_failure_reports_flushing_stage() {
        let backend = FlakyBackend {
            fail_after: Some(1),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(EventStore::new(BoxEventBackend::new(backend)), greeter());

        let err = dispatcher.handle(InboundEvent::new("c1", "cli", "hello")).await.unwrap_err();
        assert_eq!(err.stage(), DispatchStage::Flushing);
    }

    #[tokio::test]
    async fn test_slots_are_persisted_but_not_delivered() {
        let mut registry = HandlerRegistry::new();
        registry.register("greet", |t: ConversationTracker| async move {
            if t.slot("greeted").is_none() {
                t.set_slot("greeted", true);
                t.send_bot_message("Hi!", None);
            } else {
                t.send_bot_message("You have already greeted me.", None);
            }
            Ok(HandlerOutcome::Continue)
        });
        let dispatcher = Dispatcher::new(memory_store(), registry);

        let first = dispatcher.handle(InboundEvent::new("c1", "cli", "hi")).await.unwrap();
        assert_eq!(texts(&first), vec![(EventKind::Bot, "Hi!".to_string())]);
        let second = dispatcher.handle(InboundEvent::new("c1", "cli", "hi")).await.unwrap();
        assert_eq!(
            texts(&second),
            vec![(EventKind::Bot, "You have already greeted me.".to_string())]
        );

        let kinds: Vec<EventKind> = dispatcher
            .store()
            .history("c1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![EventKind::User, EventKind::Slot, EventKind::Bot, EventKind::User, EventKind::Bot]
        );
    }

    #[tokio::test]
    async fn test_same_conversation_is_serialized() {
        let mut registry = HandlerRegistry::new();
        registry.register("slow_echo", |t: ConversationTracker| async move {
            // Prior replies must already be visible.
            let seen = t.all_messages().len();
            tokio::time::sleep(Duration::from_millis(20)).await;
            t.send_bot_message(format!("{}:{seen}", t.text()), None);
            Ok(HandlerOutcome::Continue)
        });
        let dispatcher = Arc::new(Dispatcher::new(memory_store(), registry));

        let mut tasks = Vec::new();
        for i in 0..4 {
            let dispatcher = dispatcher.clone();
            tasks.push(tokio::spawn(async move {
                dispatcher
                    .handle(InboundEvent::new("c1", "cli", format!("m{i}")))
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let history = dispatcher.store().history("c1").await.unwrap();
        assert_eq!(history.len(), 8);
        for (n, pair) in history.chunks(2).enumerate() {
            let user = pair[0].text.clone().unwrap();
            assert_eq!(pair[0].kind, EventKind::User);
            assert_eq!(pair[1].kind, EventKind::Bot);
            // Each reply directly follows its message and saw every earlier pair.
            assert_eq!(pair[1].text.clone().unwrap(), format!("{user}:{}", n * 2 + 1));
        }
        let ids: Vec<u64> = history.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_other_conversations_are_not_blocked() {
        let release = Arc::new(Notify::new());
        let entered = Arc::new(Notify::new());

        let mut registry = HandlerRegistry::new();
        {
            let release = release.clone();
            let entered = entered.clone();
            registry.register_when(
                "blocker",
                predicates::text_equals("block"),
                move |_t: ConversationTracker| {
                    let release = release.clone();
                    let entered = entered.clone();
                    async move {
                        entered.notify_one();
                        release.notified().await;
                        Ok(HandlerOutcome::Continue)
                    }
                },
            );
        }
        registry.register_when("hello", predicates::text_equals("hello"), |t: ConversationTracker| async move {
            t.send_bot_message("Hi there!", None);
            Ok(HandlerOutcome::Continue)
        });
        let dispatcher = Arc::new(Dispatcher::new(memory_store(), registry));

        let blocked = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.handle(InboundEvent::new("slow", "cli", "block")).await })
        };
        entered.notified().await;

        let fast = tokio::time::timeout(
            Duration::from_secs(2),
            dispatcher.handle(InboundEvent::new("fast", "cli", "hello")),
        )
        .await
        .expect("other conversation must not wait")
        .unwrap();
        assert_eq!(texts(&fast), vec![(EventKind::Bot, "Hi there!".to_string())]);

        release.notify_one();
        assert!(blocked.await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_metadata_and_receive_time_are_kept() {
        let dispatcher = Dispatcher::new(memory_store(), HandlerRegistry::new());
        let mut metadata = Metadata::new();
        metadata.insert("lang".to_string(), serde_json::json!("en"));
        let at = chrono::Utc::now() - chrono::TimeDelta::seconds(30);

        dispatcher
            .handle(
                InboundEvent::new("c1", "webhook", "hey")
                    .with_metadata(metadata.clone())
                    .received_at(at),
            )
            .await
            .unwrap();

        let history = dispatcher.store().history("c1").await.unwrap();
        assert_eq!(history[0].metadata, metadata);
        assert_eq!(history[0].timestamp, at);
    }
}
