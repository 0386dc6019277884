use crate::record::LogRecord;
use async_trait::async_trait;

/// A record delivered by a queue, tagged with its position so the consumer
/// can acknowledge it once the record is persisted.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub offset: u64,
    pub record: LogRecord,
}

/// Transport that decouples ingestion latency from storage latency.
///
/// Delivery is at-least-once: messages that were received but never
/// committed may be delivered again by durable backends after a restart.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Enqueue one record. Bounded backends apply back-pressure here.
    async fn publish(&self, record: LogRecord) -> Result<(), QueueError>;

    /// Wait for the next message. Returns `Ok(None)` once the queue is closed.
    ///
    /// Must be cancel-safe: dropping the future never loses a message.
    async fn receive(&self) -> Result<Option<QueueMessage>, QueueError>;

    /// Return the next message if one is immediately available.
    async fn try_receive(&self) -> Result<Option<QueueMessage>, QueueError>;

    /// Acknowledge every message up to and including `offset`.
    async fn commit(&self, offset: u64) -> Result<(), QueueError>;

    /// Refuse further publishes. Messages already queued can still be
    /// received, after which `receive` returns `Ok(None)`.
    async fn close(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("queue closed")]
    Closed,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        QueueError::Unavailable(e.to_string())
    }
}
