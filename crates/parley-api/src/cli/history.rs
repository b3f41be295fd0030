//! Read-only history commands: `history`, `sessions`, `conversations`.

use std::time::Duration;

use console::style;
use parley_core::store::EventStore;
use parley_types::event::{Event, EventKind};
use parley_types::session::Session;

/// Print every event of a conversation.
pub async fn show_history(store: &EventStore, conv_id: &str, json: bool) -> anyhow::Result<()> {
    let events = store.history(conv_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("\n  No events for conversation {}\n", style(conv_id).cyan());
        return Ok(());
    }

    println!();
    for event in &events {
        println!("  {}", format_event(event));
    }
    println!();
    Ok(())
}

/// Print the sessions of a conversation.
pub async fn show_sessions(store: &EventStore, conv_id: &str, gap: Duration, json: bool) -> anyhow::Result<()> {
    let sessions = store.sessions(conv_id, gap).await?;

    if json {
        let summary: Vec<serde_json::Value> = sessions.iter().map(session_json).collect();
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("\n  No sessions for conversation {}\n", style(conv_id).cyan());
        return Ok(());
    }

    println!();
    for session in &sessions {
        println!("  {}", format_session(session));
    }
    println!();
    Ok(())
}

/// Print all known conversation ids.
pub async fn list_conversations(store: &EventStore, json: bool) -> anyhow::Result<()> {
    let ids = store.conversations().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ids)?);
        return Ok(());
    }

    if ids.is_empty() {
        println!("\n  No conversations yet.\n");
        return Ok(());
    }

    println!();
    for id in &ids {
        println!("  {}", id);
    }
    println!();
    Ok(())
}

/// One styled line per event: `#id time kind: text`.
pub fn format_event(event: &Event) -> String {
    let who = match &event.kind {
        EventKind::User => style("You").green().bold().to_string(),
        EventKind::Bot => style("Bot").cyan().bold().to_string(),
        other => style(other.as_str()).dim().to_string(),
    };
    let body = match (&event.kind, &event.text) {
        (_, Some(text)) => text.clone(),
        (EventKind::Slot, None) => serde_json::Value::Object(event.metadata.clone()).to_string(),
        _ => String::new(),
    };
    format!(
        "{} {} {} {}",
        style(format!("#{}", event.event_id)).dim(),
        style(event.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
        who,
        body
    )
}

fn format_session(session: &Session) -> String {
    let span = match (session.started_at(), session.ended_at()) {
        (Some(start), Some(end)) => format!(
            "{} -> {}",
            start.format("%Y-%m-%d %H:%M:%S"),
            end.format("%H:%M:%S")
        ),
        _ => "-".to_string(),
    };
    format!(
        "{} {}  {} events, {} messages",
        style(format!("Session {}", session.index)).bold(),
        style(span).dim(),
        session.len(),
        session.message_count()
    )
}

fn session_json(session: &Session) -> serde_json::Value {
    serde_json::json!({
        "index": session.index,
        "first_event_id": session.first_event_id(),
        "started_at": session.started_at(),
        "ended_at": session.ended_at(),
        "events": session.len(),
        "messages": session.message_count(),
    })
}
