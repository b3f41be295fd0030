//! Configuration types for Parley.
//!
//! `ParleyConfig` represents the top-level `parley.toml` that selects the
//! storage backend, tunes the dispatcher, and declares channel adapters.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Channel adapters served by `parley serve`.
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl ParleyConfig {
    /// Look up a channel by name.
    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.name == name)
    }
}

/// Storage backend selection. Fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Line-oriented append-only JSON file shared by all conversations.
    Jsonl {
        #[serde(default = "default_jsonl_path")]
        path: PathBuf,
    },
    /// SQLite database accessed through sqlx.
    Sqlite {
        #[serde(default = "default_sqlite_url")]
        url: String,
    },
    /// PostgreSQL database accessed through sqlx.
    Postgres {
        #[serde(default = "default_postgres_url")]
        url: String,
    },
    /// Process-local storage; history is lost on exit.
    Memory,
}

fn default_jsonl_path() -> PathBuf {
    PathBuf::from("./conversation_events.jsonl")
}

fn default_sqlite_url() -> String {
    "sqlite://./conversation_events.db?mode=rwc".to_string()
}

fn default_postgres_url() -> String {
    "postgres://localhost/parley".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Jsonl {
            path: default_jsonl_path(),
        }
    }
}

/// Dispatcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Inactivity gap (seconds) after which a new session starts.
    #[serde(default = "default_session_gap_secs")]
    pub session_gap_secs: u64,

    /// Per-handler timeout in seconds. `None` disables the timeout.
    #[serde(default)]
    pub handler_timeout_secs: Option<u64>,

    /// Insert a synthetic `session_start` event when a new session begins.
    #[serde(default)]
    pub session_markers: bool,
}

fn default_session_gap_secs() -> u64 {
    1800
}

impl DispatchConfig {
    pub fn session_gap(&self) -> Duration {
        Duration::from_secs(self.session_gap_secs)
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            session_gap_secs: default_session_gap_secs(),
            handler_timeout_secs: None,
            session_markers: false,
        }
    }
}

/// A channel adapter declaration.
///
/// At least one of `type` and `name` is required; a missing one takes the
/// value of the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawChannelConfig")]
pub struct ChannelConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    /// Bearer token inbound requests must present.
    pub token: Option<String>,
    /// URL outbound bot events are POSTed to.
    pub url: Option<String>,
}

#[derive(Deserialize)]
struct RawChannelConfig {
    #[serde(rename = "type")]
    kind: Option<String>,
    name: Option<String>,
    token: Option<String>,
    url: Option<String>,
}

impl TryFrom<RawChannelConfig> for ChannelConfig {
    type Error = String;

    fn try_from(raw: RawChannelConfig) -> Result<Self, Self::Error> {
        let (kind, name) = match (raw.kind, raw.name) {
            (Some(kind), Some(name)) => (kind, name),
            (Some(kind), None) => (kind.clone(), kind),
            (None, Some(name)) => (name.clone(), name),
            (None, None) => {
                return Err("at least one of 'name' and 'type' is required".to_string());
            }
        };
        Ok(Self {
            kind,
            name,
            token: raw.token,
            url: raw.url,
        })
    }
}
