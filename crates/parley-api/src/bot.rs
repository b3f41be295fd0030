//! Demo bots shipped with the `parley` binary.
//!
//! `minimal` answers "hello" with a greeting and echoes everything else.
//! `counter` remembers whether the user already greeted it (a session slot)
//! and counts out loud on "count N".

use std::time::Duration;

use clap::ValueEnum;
use parley_core::handler::{predicates, HandlerOutcome, HandlerRegistry};
use parley_core::tracker::ConversationTracker;
use parley_types::event::Metadata;
use serde_json::json;

/// Which demo handler set to register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum DemoBot {
    /// Reply "Hi there!" to "hello", echo everything else.
    #[default]
    Minimal,
    /// Greeting with memory plus a slow counter.
    Counter,
}

/// Pause between counter replies.
const COUNT_STEP: Duration = Duration::from_secs(1);

pub fn registry(bot: DemoBot) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    match bot {
        DemoBot::Minimal => {
            registry.register("hello_or_echo", hello_or_echo);
        }
        DemoBot::Counter => {
            registry
                .register("greet", greet)
                .register_when("counter", predicates::text_starts_with("count"), counter);
        }
    }
    registry
}

async fn hello_or_echo(tracker: ConversationTracker) -> anyhow::Result<HandlerOutcome> {
    let text = tracker
        .last_user_message()
        .and_then(|e| e.text.clone())
        .unwrap_or_default();
    if text.eq_ignore_ascii_case("hello") {
        tracker.send_bot_message("Hi there!", None);
    } else {
        tracker.send_bot_message(format!("Echo: {text}"), None);
    }
    Ok(HandlerOutcome::Continue)
}

fn is_greeting(text: &str) -> bool {
    ["hello", "hi", "hey"]
        .iter()
        .any(|g| text.eq_ignore_ascii_case(g))
}

async fn greet(tracker: ConversationTracker) -> anyhow::Result<HandlerOutcome> {
    if !is_greeting(tracker.text()) {
        return Ok(HandlerOutcome::Continue);
    }

    let already = tracker
        .slot("greeted")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if already {
        tracker.send_bot_message("You have already greeted me.", None);
    } else {
        let mut metadata = Metadata::new();
        metadata.insert("first_greeting".to_string(), json!(true));
        tracker.send_bot_message("Hi!", Some(metadata));
    }
    tracker.set_slot("greeted", true);
    Ok(HandlerOutcome::Continue)
}

async fn counter(tracker: ConversationTracker) -> anyhow::Result<HandlerOutcome> {
    let lowered = tracker.text().to_lowercase();
    let Some(arg) = lowered.strip_prefix("count ") else {
        return Ok(HandlerOutcome::Continue);
    };

    let Ok(count) = arg.split_whitespace().next().unwrap_or_default().parse::<u32>() else {
        tracker.send_bot_message("Please provide a valid number after 'count'.", None);
        return Ok(HandlerOutcome::Continue);
    };

    for i in 1..=count {
        tracker.send_bot_message(format!("Counting: {i}"), None);
        if i != count {
            tokio::time::sleep(COUNT_STEP).await;
        }
    }
    Ok(HandlerOutcome::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::backend::{BoxEventBackend, InMemoryBackend};
    use parley_core::dispatcher::Dispatcher;
    use parley_core::store::EventStore;
    use parley_types::event::{Event, EventKind, InboundEvent};

    fn dispatcher(bot: DemoBot) -> Dispatcher {
        let store = EventStore::new(BoxEventBackend::new(InMemoryBackend::new()));
        Dispatcher::new(store, registry(bot))
    }

    fn texts(events: &[Event]) -> Vec<String> {
        events.iter().filter_map(|e| e.text.clone()).collect()
    }

    #[tokio::test]
    async fn test_minimal_bot() {
        let d = dispatcher(DemoBot::Minimal);
        let out = d.handle(InboundEvent::new("c1", "shell", "hello")).await.unwrap();
        assert_eq!(texts(&out), vec!["Hi there!"]);

        let history = d.store().history("c1").await.unwrap();
        let recorded: Vec<(EventKind, Option<&str>)> = history
            .iter()
            .map(|e| (e.kind.clone(), e.text.as_deref()))
            .collect();
        assert_eq!(
            recorded,
            vec![
                (EventKind::User, Some("hello")),
                (EventKind::Bot, Some("Hi there!")),
            ]
        );
        assert_eq!(history[1], out[0]);

        let out = d.handle(InboundEvent::new("c1", "shell", "how are you")).await.unwrap();
        assert_eq!(texts(&out), vec!["Echo: how are you"]);
    }

    #[tokio::test]
    async fn test_counter_bot_greets_once_per_session() {
        let d = dispatcher(DemoBot::Counter);
        let first = d.handle(InboundEvent::new("c1", "shell", "Hi")).await.unwrap();
        assert_eq!(texts(&first), vec!["Hi!"]);
        assert_eq!(first[0].metadata.get("first_greeting"), Some(&json!(true)));

        let second = d.handle(InboundEvent::new("c1", "shell", "hey")).await.unwrap();
        assert_eq!(texts(&second), vec!["You have already greeted me."]);

        let other = d.handle(InboundEvent::new("c2", "shell", "hello")).await.unwrap();
        assert_eq!(texts(&other), vec!["Hi!"]);
    }

    #[tokio::test]
    async fn test_counter_counts() {
        let d = dispatcher(DemoBot::Counter);
        let out = d.handle(InboundEvent::new("c1", "shell", "count 2")).await.unwrap();
        assert_eq!(texts(&out), vec!["Counting: 1", "Counting: 2"]);
    }

    #[tokio::test]
    async fn test_counter_rejects_bad_number() {
        let d = dispatcher(DemoBot::Counter);
        let out = d.handle(InboundEvent::new("c1", "shell", "count many")).await.unwrap();
        assert_eq!(texts(&out), vec!["Please provide a valid number after 'count'."]);
    }

    #[tokio::test]
    async fn test_counter_ignores_other_text() {
        let d = dispatcher(DemoBot::Counter);
        let out = d.handle(InboundEvent::new("c1", "shell", "what's up")).await.unwrap();
        assert!(out.is_empty());
    }
}
