//! Append-only JSONL event backend.
//!
//! Every conversation shares one file; each line is one serialized `Event`.
//! Appends are written, flushed, and `fdatasync`ed before they are reported
//! as persisted. A write that fails part-way is truncated away, and a partial
//! trailing line left by a crash is truncated when the file is opened, so a
//! reader never sees half an event.
//!
//! An append runs on its own task. Dropping the caller's future does not stop
//! it half way, so the file and the index always agree on what was written.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parley_core::backend::EventBackend;
use parley_core::locks::ConversationLocks;
use parley_types::error::StoreError;
use parley_types::event::{settle_timestamp, Event, EventDraft};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// The shared file handle and its committed length.
struct LogFile {
    file: File,
    len: u64,
}

impl LogFile {
    /// Drop any bytes past the committed length.
    ///
    /// They can only come from an append whose rollback itself failed.
    async fn discard_uncommitted(&mut self, path: &Path) -> Result<(), StoreError> {
        let on_disk = self.file.metadata().await?.len();
        if on_disk > self.len {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = on_disk - self.len,
                "discarding uncommitted bytes at end of log"
            );
            self.file.set_len(self.len).await?;
        } else if on_disk < self.len {
            return Err(StoreError::BackendUnavailable(format!(
                "{} shrank from {} to {on_disk} bytes",
                path.display(),
                self.len
            )));
        }
        Ok(())
    }
}

/// Event backend over a single JSONL file.
pub struct JsonlBackend {
    log: Arc<JsonlLog>,
}

struct JsonlLog {
    path: PathBuf,
    file: Mutex<LogFile>,
    /// Last `(event_id, timestamp)` per conversation.
    index: DashMap<String, (u64, DateTime<Utc>)>,
    locks: ConversationLocks,
}

impl JsonlBackend {
    /// Open (creating if needed) the log at `path` and index its contents.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await?;

        let bytes = tokio::fs::read(&path).await?;
        let committed = committed_len(&bytes);
        if committed < bytes.len() {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = bytes.len() - committed,
                "truncating partial trailing line"
            );
            file.set_len(committed as u64).await?;
        }

        let index: DashMap<String, (u64, DateTime<Utc>)> = DashMap::new();
        for event in parse_lines(&bytes[..committed], &path) {
            let newer = index
                .get(&event.conv_id)
                .map_or(true, |entry| entry.value().0 < event.event_id);
            if newer {
                index.insert(event.conv_id.clone(), (event.event_id, event.timestamp));
            }
        }
        tracing::debug!(path = %path.display(), conversations = index.len(), "jsonl log opened");

        Ok(Self {
            log: Arc::new(JsonlLog {
                path,
                file: Mutex::new(LogFile {
                    file,
                    len: committed as u64,
                }),
                index,
                locks: ConversationLocks::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.log.path
    }
}

impl JsonlLog {
    async fn append(&self, conv_id: &str, draft: EventDraft) -> Result<Event, StoreError> {
        let _guard = self.locks.acquire(conv_id).await;

        let last = self.index.get(conv_id).map(|entry| *entry.value());
        let event_id = last.map(|(id, _)| id + 1).unwrap_or(0);
        let timestamp = settle_timestamp(draft.timestamp, last.map(|(_, ts)| ts));
        let event = draft.into_event(conv_id, event_id, timestamp);

        let mut line = serde_json::to_vec(&event)
            .map_err(|e| StoreError::MalformedEvent(format!("cannot encode event: {e}")))?;
        line.push(b'\n');

        let mut log = self.file.lock().await;
        log.discard_uncommitted(&self.path).await?;
        let start = log.len;
        let written = async {
            log.file.write_all(&line).await?;
            log.file.flush().await?;
            log.file.sync_data().await
        }
        .await;

        if let Err(err) = written {
            tracing::error!(conv_id, event_id, %err, "jsonl append failed, rolling back");
            if let Err(truncate_err) = log.file.set_len(start).await {
                tracing::error!(%truncate_err, "failed to roll back partial append");
            }
            return Err(err.into());
        }

        log.len = start + line.len() as u64;
        self.index.insert(conv_id.to_string(), (event_id, timestamp));
        Ok(event)
    }

    async fn read_committed(&self) -> Result<Vec<u8>, StoreError> {
        // Holding the log lock keeps a half-written or rolled-back append out of view.
        let log = self.file.lock().await;
        let mut bytes = tokio::fs::read(&self.path).await?;
        bytes.truncate(log.len as usize);
        Ok(bytes)
    }
}

/// Length of `bytes` up to and including the last newline.
fn committed_len(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0)
}

/// Decode complete lines, skipping blank and malformed ones.
fn parse_lines(bytes: &[u8], path: &Path) -> Vec<Event> {
    let mut events = Vec::new();
    for (lineno, line) in bytes.split(|b| *b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match decode_line(line) {
            Ok(event) => events.push(event),
            Err(err) => {
                tracing::warn!(path = %path.display(), line = lineno + 1, %err, "skipping malformed event");
            }
        }
    }
    events
}

fn decode_line(line: &[u8]) -> Result<Event, StoreError> {
    serde_json::from_slice(line).map_err(|e| StoreError::MalformedEvent(e.to_string()))
}

impl EventBackend for JsonlBackend {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn append(&self, conv_id: &str, draft: EventDraft) -> Result<Event, StoreError> {
        let log = Arc::clone(&self.log);
        let conv_id = conv_id.to_string();
        tokio::spawn(async move { log.append(&conv_id, draft).await })
            .await
            .map_err(|e| StoreError::BackendUnavailable(format!("append task failed: {e}")))?
    }

    async fn read(&self, conv_id: &str) -> Result<Vec<Event>, StoreError> {
        if !self.log.index.contains_key(conv_id) {
            return Ok(Vec::new());
        }
        let bytes = self.log.read_committed().await?;
        let mut events: Vec<Event> = parse_lines(&bytes, &self.log.path)
            .into_iter()
            .filter(|e| e.conv_id == conv_id)
            .collect();
        events.sort_by_key(|e| e.event_id);
        Ok(events)
    }

    async fn conversations(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.log.index.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::event::EventKind;
    use std::future::Future;
    use std::task::{Context, Waker};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn open_in(dir: &TempDir) -> JsonlBackend {
        JsonlBackend::open(dir.path().join("events.jsonl")).await.unwrap()
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let backend = open_in(&dir).await;

        let a = backend.append("c1", EventDraft::user("hello", "cli")).await.unwrap();
        let b = backend.append("c1", EventDraft::bot("hi", "cli")).await.unwrap();
        backend.append("c2", EventDraft::user("other", "cli")).await.unwrap();

        assert_eq!((a.event_id, b.event_id), (0, 1));
        assert_eq!(backend.read("c1").await.unwrap(), vec![a, b]);
        assert_eq!(backend.conversations().await.unwrap(), vec!["c1", "c2"]);
        assert!(backend.read("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let written = {
            let backend = open_in(&dir).await;
            backend.append("c1", EventDraft::user("one", "cli")).await.unwrap();
            backend.append("c1", EventDraft::bot("two", "cli")).await.unwrap()
        };

        let backend = open_in(&dir).await;
        let history = backend.read("c1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1], written);

        let next = backend.append("c1", EventDraft::user("three", "cli")).await.unwrap();
        assert_eq!(next.event_id, 2);
        assert!(next.timestamp >= written.timestamp);
    }

    #[tokio::test]
    async fn test_partial_trailing_line_is_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        {
            let backend = JsonlBackend::open(&path).await.unwrap();
            backend.append("c1", EventDraft::user("kept", "cli")).await.unwrap();
        }
        let intact = tokio::fs::read(&path).await.unwrap();

        // Simulate a crash mid-write.
        let mut torn = intact.clone();
        torn.extend_from_slice(br#"{"conv_id":"c1","event_id":1,"kind":"bo"#);
        tokio::fs::write(&path, &torn).await.unwrap();

        let backend = JsonlBackend::open(&path).await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), intact);
        let history = backend.read("c1").await.unwrap();
        assert_eq!(history.len(), 1);

        let next = backend.append("c1", EventDraft::bot("after", "cli")).await.unwrap();
        assert_eq!(next.event_id, 1);
        assert_eq!(backend.read("c1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        {
            let backend = JsonlBackend::open(&path).await.unwrap();
            backend.append("c1", EventDraft::user("good", "cli")).await.unwrap();
        }
        let mut bytes = tokio::fs::read(&path).await.unwrap();
        bytes.extend_from_slice(b"not json at all\n\n");
        tokio::fs::write(&path, &bytes).await.unwrap();

        let backend = JsonlBackend::open(&path).await.unwrap();
        let history = backend.read("c1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, EventKind::User);
        assert_eq!(history[0].text.as_deref(), Some("good"));
    }

    #[tokio::test]
    async fn test_lines_are_plain_json_objects() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let backend = JsonlBackend::open(&path).await.unwrap();
        backend.append("c1", EventDraft::user("hello", "webhook")).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(content.trim_end()).unwrap();
        assert_eq!(value["conv_id"], "c1");
        assert_eq!(value["event_id"], 0);
        assert_eq!(value["kind"], "user");
        assert_eq!(value["text"], "hello");
        assert_eq!(value["channel"], "webhook");
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_ids_dense() {
        let dir = TempDir::new().unwrap();
        let backend = std::sync::Arc::new(open_in(&dir).await);

        let mut tasks = Vec::new();
        for i in 0..10 {
            let backend = backend.clone();
            let conv = if i % 2 == 0 { "even" } else { "odd" };
            tasks.push(tokio::spawn(async move {
                backend.append(conv, EventDraft::user(format!("m{i}"), "cli")).await.unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for conv in ["even", "odd"] {
            let ids: Vec<u64> = backend.read(conv).await.unwrap().iter().map(|e| e.event_id).collect();
            assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        }
    }

    #[tokio::test]
    async fn test_dropped_append_keeps_log_consistent() {
        let dir = TempDir::new().unwrap();
        let backend = open_in(&dir).await;
        backend.append("c1", EventDraft::user("first", "cli")).await.unwrap();

        // Start an append, then walk away from it like a disconnected client.
        {
            let mut abandoned = std::pin::pin!(backend.append("c1", EventDraft::user("abandoned", "cli")));
            let _ = abandoned.as_mut().poll(&mut Context::from_waker(Waker::noop()));
        }

        let committed = backend.append("c1", EventDraft::bot("committed", "cli")).await.unwrap();

        let mut history = backend.read("c1").await.unwrap();
        for _ in 0..100 {
            if history.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            history = backend.read("c1").await.unwrap();
        }

        let ids: Vec<u64> = history.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(history.contains(&committed));
        let texts: Vec<&str> = history.iter().filter_map(|e| e.text.as_deref()).collect();
        assert!(texts.contains(&"abandoned"));

        drop(backend);
        let reopened = open_in(&dir).await;
        assert_eq!(reopened.read("c1").await.unwrap(), history);
    }

    #[tokio::test]
    async fn test_uncommitted_tail_is_discarded_before_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let backend = JsonlBackend::open(&path).await.unwrap();
        backend.append("c1", EventDraft::user("first", "cli")).await.unwrap();

        // Bytes the backend never acknowledged, e.g. left by a failed rollback.
        let ghost = EventDraft::user("ghost", "cli").into_event("c1", 1, Utc::now());
        let mut stray = serde_json::to_vec(&ghost).unwrap();
        stray.push(b'\n');
        let mut file = OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(&stray).await.unwrap();
        file.sync_all().await.unwrap();
        drop(file);

        let real = backend.append("c1", EventDraft::bot("real", "cli")).await.unwrap();
        assert_eq!(real.event_id, 1);

        let history = backend.read("c1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1], real);

        drop(backend);
        let reopened = JsonlBackend::open(&path).await.unwrap();
        assert_eq!(reopened.read("c1").await.unwrap(), history);
    }

    #[test]
    fn test_committed_len() {
        assert_eq!(committed_len(b""), 0);
        assert_eq!(committed_len(b"abc"), 0);
        assert_eq!(committed_len(b"abc\n"), 4);
        assert_eq!(committed_len(b"abc\nde"), 4);
    }
}
