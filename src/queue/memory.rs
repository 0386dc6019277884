use super::traits::{DurableQueue, QueueError, QueueMessage};
use crate::record::LogRecord;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, Mutex, RwLock};

/// In-process bounded queue.
///
/// Not durable across restarts; `commit` is a no-op. A full queue makes
/// `publish` wait, which pushes back on the ingest handlers.
pub struct MemoryQueue {
    sender: RwLock<Option<mpsc::Sender<QueueMessage>>>,
    receiver: Mutex<mpsc::Receiver<QueueMessage>>,
    next_offset: AtomicU64,
}

impl MemoryQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            sender: RwLock::new(Some(tx)),
            receiver: Mutex::new(rx),
            next_offset: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn publish(&self, record: LogRecord) -> Result<(), QueueError> {
        let sender = self
            .sender
            .read()
            .await
            .clone()
            .ok_or(QueueError::Closed)?;

        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed);
        sender
            .send(QueueMessage { offset, record })
            .await
            .map_err(|_| QueueError::Closed)
    }

    async fn receive(&self) -> Result<Option<QueueMessage>, QueueError> {
        let mut receiver = self.receiver.lock().await;
        Ok(receiver.recv().await)
    }

    async fn try_receive(&self) -> Result<Option<QueueMessage>, QueueError> {
        let mut receiver = self.receiver.lock().await;
        match receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Ok(None),
        }
    }

    async fn commit(&self, _offset: u64) -> Result<(), QueueError> {
        Ok(())
    }

    async fn close(&self) {
        self.sender.write().await.take();
    }
}
