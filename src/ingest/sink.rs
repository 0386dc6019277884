use super::gateway::IngestError;
use crate::queue::DurableQueue;
use crate::record::LogRecord;
use crate::storage::Storage;
use std::sync::Arc;

/// Where accepted records go. Chosen once at startup.
#[derive(Clone)]
pub enum IngestSink {
    /// Buffered mode: publish to the durable queue and return.
    Enqueue(Arc<dyn DurableQueue>),
    /// Unified mode: write synchronously to the store.
    DirectWrite(Arc<dyn Storage>),
}

impl IngestSink {
    pub fn name(&self) -> &'static str {
        match self {
            IngestSink::Enqueue(_) => "enqueue",
            IngestSink::DirectWrite(_) => "direct_write",
        }
    }

    pub(crate) async fn deliver(&self, record: &LogRecord) -> Result<(), IngestError> {
        match self {
            IngestSink::Enqueue(queue) => queue.publish(record.clone()).await?,
            IngestSink::DirectWrite(storage) => {
                storage.insert_batch(std::slice::from_ref(record)).await?
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for IngestSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
