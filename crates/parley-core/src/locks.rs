//! Per-conversation mutual exclusion.
//!
//! `ConversationLocks` hands out one async mutex per conversation id. Work on
//! different conversations never contends; work on the same conversation is
//! admitted in FIFO order (tokio's mutex is fair). Idle entries are dropped as
//! soon as the last guard or waiter for a conversation goes away, so the map
//! stays proportional to the number of conversations currently in flight.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-conversation locks. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct ConversationLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `conv_id`.
    pub async fn acquire(&self, conv_id: &str) -> ConversationGuard {
        let lock = self
            .inner
            .entry(conv_id.to_string())
            .or_default()
            .value()
            .clone();
        let guard = lock.lock_owned().await;
        ConversationGuard {
            guard: Some(guard),
            conv_id: conv_id.to_string(),
            locks: Arc::clone(&self.inner),
        }
    }

    /// Number of conversations with a live lock entry.
    pub fn active(&self) -> usize {
        self.inner.len()
    }

    /// Drop entries nobody holds or waits on.
    ///
    /// Guards clean up after themselves; this only matters when an `acquire`
    /// future was cancelled while waiting.
    pub fn reap_idle(&self) {
        self.inner.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// Exclusive access to one conversation, released on drop.
#[derive(Debug)]
pub struct ConversationGuard {
    guard: Option<OwnedMutexGuard<()>>,
    conv_id: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationGuard {
    pub fn conv_id(&self) -> &str {
        &self.conv_id
    }
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        // Release first so the map's Arc is the only one left when idle.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.conv_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks = ConversationLocks::new();
        {
            let guard = locks.acquire("c1").await;
            assert_eq!(guard.conv_id(), "c1");
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_different_conversations_do_not_block() {
        let locks = ConversationLocks::new();
        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(200), locks.acquire("b")).await;
        assert!(b.is_ok(), "lock on 'b' must not wait for 'a'");
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn test_same_conversation_is_exclusive() {
        let locks = ConversationLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire("shared").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_reaped() {
        let locks = ConversationLocks::new();
        let held = locks.acquire("c1").await;

        let waited = tokio::time::timeout(Duration::from_millis(20), locks.acquire("c1")).await;
        assert!(waited.is_err());

        drop(held);
        locks.reap_idle();
        assert_eq!(locks.active(), 0);
    }
}
