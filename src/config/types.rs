use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub tail: TailConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// How accepted records reach the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Ingest publishes to the durable queue; the batch writer persists.
    #[default]
    Buffered,
    /// Ingest writes each record to the store before answering.
    Unified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Reject requests that carry no credential.
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub api_keys: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            required: true,
            api_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Memory,
    Spool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
    /// Bound of the in-memory queue.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    /// Spool file, required by the spool backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// How often an idle spool consumer re-checks for rows.
    #[serde(default = "default_queue_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

fn default_queue_capacity() -> usize {
    10000
}

fn default_queue_poll_interval() -> Duration {
    Duration::from_millis(100)
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            capacity: default_queue_capacity(),
            path: None,
            poll_interval: default_queue_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Duckdb,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("~/.local/share/logstream/logs.duckdb")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,
    /// Pause after a failed queue receive.
    #[serde(default = "default_receive_backoff", with = "humantime_serde")]
    pub receive_backoff: Duration,
}

fn default_batch_size() -> usize {
    1000
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_receive_backoff() -> Duration {
    Duration::from_secs(1)
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval: default_flush_interval(),
            receive_backoff: default_receive_backoff(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TailMode {
    /// Accepted records are pushed straight to watchers.
    #[default]
    Push,
    /// Watchers are fed by periodically re-querying the store.
    Poll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailConfig {
    #[serde(default)]
    pub mode: TailMode,
    #[serde(default = "default_tail_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// How far back the poll cursor starts.
    #[serde(default = "default_poll_lookback", with = "humantime_serde")]
    pub poll_lookback: Duration,
    #[serde(default = "default_poll_limit")]
    pub poll_limit: usize,
    /// Pending batches per watcher before it is disconnected.
    #[serde(default = "default_watcher_buffer")]
    pub watcher_buffer: usize,
    /// Records waiting for the push dispatcher.
    #[serde(default = "default_dispatch_buffer")]
    pub dispatch_buffer: usize,
    /// Most records sent to watchers in one message.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

fn default_tail_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_poll_lookback() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_limit() -> usize {
    100
}

fn default_watcher_buffer() -> usize {
    256
}

fn default_dispatch_buffer() -> usize {
    1024
}

fn default_max_batch() -> usize {
    100
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            mode: TailMode::default(),
            poll_interval: default_tail_poll_interval(),
            poll_lookback: default_poll_lookback(),
            poll_limit: default_poll_limit(),
            watcher_buffer: default_watcher_buffer(),
            dispatch_buffer: default_dispatch_buffer(),
            max_batch: default_max_batch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_query_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

fn default_query_limit() -> usize {
    100
}

fn default_max_limit() -> usize {
    5000
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_query_limit(),
            max_limit: default_max_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace_period", with = "humantime_serde")]
    pub grace_period: Duration,
}

fn default_grace_period() -> Duration {
    Duration::from_secs(5)
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
        }
    }
}
