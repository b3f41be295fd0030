//! Session windowing over a conversation's history.
//!
//! A new session begins at the first event, and at every event whose
//! timestamp exceeds the previous event's by strictly more than the gap.
//! Sessions are derived on demand and never stored.

use std::time::Duration;

use chrono::TimeDelta;
use parley_types::event::Event;
use parley_types::session::Session;

/// Convert a std gap to chrono, saturating instead of failing on overflow.
fn gap_delta(gap: Duration) -> TimeDelta {
    TimeDelta::from_std(gap).unwrap_or(TimeDelta::MAX)
}

fn starts_session(prev: &Event, next: &Event, gap: TimeDelta) -> bool {
    next.timestamp - prev.timestamp > gap
}

/// Split an ordered history into sessions.
///
/// The concatenation of the returned sessions' events equals `events`.
pub fn split_sessions(events: &[Event], gap: Duration) -> Vec<Session> {
    let gap = gap_delta(gap);
    let mut sessions: Vec<Session> = Vec::new();
    let mut current: Vec<Event> = Vec::new();

    for event in events {
        if let Some(prev) = current.last() {
            if starts_session(prev, event, gap) {
                sessions.push(Session {
                    index: sessions.len(),
                    events: std::mem::take(&mut current),
                });
            }
        }
        current.push(event.clone());
    }

    if !current.is_empty() {
        sessions.push(Session {
            index: sessions.len(),
            events: current,
        });
    }
    sessions
}

/// The last session of `events`, or an empty session for an empty history.
pub fn current_session(events: &[Event], gap: Duration) -> Session {
    let delta = gap_delta(gap);
    let boundaries: Vec<usize> = events
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| starts_session(&pair[0], &pair[1], delta))
        .map(|(i, _)| i + 1)
        .collect();

    let start = boundaries.last().copied().unwrap_or(0);
    Session {
        index: boundaries.len(),
        events: events[start..].to_vec(),
    }
}
