use crate::record::{LogRecord, Query, StatBucket};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Store of persisted log records.
///
/// Backends are interchangeable: they all honour the same filter, ordering
/// and bucketing rules.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn init_schema(&self) -> Result<(), StorageError>;

    /// Persist `records` in order, all or nothing.
    async fn insert_batch(&self, records: &[LogRecord]) -> Result<(), StorageError>;

    /// Matching records, newest first, at most `query.limit`.
    async fn query(&self, query: &Query) -> Result<Vec<LogRecord>, StorageError>;

    /// Per-minute counts of matching records, oldest minute first.
    /// Minutes without records are not emitted.
    async fn aggregate(&self, query: &Query) -> Result<Vec<StatBucket>, StorageError>;

    /// Records strictly newer than `after`, oldest first, at most `limit`.
    async fn records_after(
        &self,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LogRecord>, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StorageError::Database(format!("Task join error: {}", e))
    }
}
