use crate::record::LogRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

pub type WatcherId = Uuid;

/// Records delivered to watchers as one message, oldest first.
pub type TailBatch = Arc<Vec<LogRecord>>;

/// A registered watcher's end of the tail.
///
/// The receiver yields `None` once the registry dropped this watcher, either
/// because it fell behind or because the service is shutting down.
pub struct Watcher {
    pub id: WatcherId,
    pub receiver: mpsc::Receiver<TailBatch>,
}

struct WatcherSlot {
    sender: mpsc::Sender<TailBatch>,
    /// First acceptance sequence number this watcher may see.
    first_sequence: u64,
}

/// The set of connected watchers.
///
/// Shared by whatever feeds the tail and by the connection handlers that
/// register and deregister themselves.
#[derive(Clone)]
pub struct WatcherRegistry {
    watchers: Arc<RwLock<HashMap<WatcherId, WatcherSlot>>>,
    /// Next acceptance sequence number handed out to the push path.
    sequence: Arc<AtomicU64>,
    buffer: usize,
}

impl WatcherRegistry {
    /// `buffer` is how many undelivered batches a watcher may hold before
    /// it is dropped.
    pub fn new(buffer: usize) -> Self {
        Self {
            watchers: Arc::new(RwLock::new(HashMap::new())),
            sequence: Arc::new(AtomicU64::new(0)),
            buffer: buffer.max(1),
        }
    }

    /// Stamp one accepted record. Watchers registered later never see it.
    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn register(&self) -> Watcher {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        let count = {
            let mut watchers = self.watchers.write().await;
            let first_sequence = self.sequence.load(Ordering::SeqCst);
            watchers.insert(
                id,
                WatcherSlot {
                    sender,
                    first_sequence,
                },
            );
            watchers.len()
        };
        debug!(watcher = %id, watchers = count, "Watcher registered");
        Watcher { id, receiver }
    }

    pub async fn deregister(&self, id: WatcherId) -> bool {
        let removed = self.watchers.write().await.remove(&id).is_some();
        if removed {
            debug!(watcher = %id, "Watcher deregistered");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.watchers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.watchers.read().await.is_empty()
    }

    /// Deliver `records` to every watcher without waiting on any of them.
    ///
    /// A watcher whose buffer is full or whose connection is gone is removed,
    /// so a watcher that stays registered has seen every batch in order.
    /// Returns the number of watchers the batch was delivered to.
    pub async fn broadcast(&self, records: TailBatch) -> usize {
        if records.is_empty() {
            return 0;
        }
        self.deliver(|_| Some(records.clone())).await
    }

    /// Deliver records stamped by [`next_sequence`](Self::next_sequence).
    /// Each watcher only gets the records stamped after it registered.
    pub(crate) async fn broadcast_sequenced(&self, stamped: Vec<(u64, LogRecord)>) -> usize {
        let Some(oldest) = stamped.iter().map(|(sequence, _)| *sequence).min() else {
            return 0;
        };
        let (sequences, records): (Vec<u64>, Vec<LogRecord>) = stamped.into_iter().unzip();
        let shared: TailBatch = Arc::new(records);

        self.deliver(|first_sequence| {
            if oldest >= first_sequence {
                return Some(shared.clone());
            }
            let visible: Vec<LogRecord> = sequences
                .iter()
                .zip(shared.iter())
                .filter(|(sequence, _)| **sequence >= first_sequence)
                .map(|(_, record)| record.clone())
                .collect();
            (!visible.is_empty()).then(|| Arc::new(visible))
        })
        .await
    }

    async fn deliver<F>(&self, batch_for: F) -> usize
    where
        F: Fn(u64) -> Option<TailBatch>,
    {
        let mut dropped = Vec::new();
        let mut delivered = 0;
        {
            let watchers = self.watchers.read().await;
            for (id, slot) in watchers.iter() {
                let Some(batch) = batch_for(slot.first_sequence) else {
                    continue;
                };
                match slot.sender.try_send(batch) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(watcher = %id, "Watcher fell behind, disconnecting");
                        dropped.push(*id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!(watcher = %id, "Watcher connection gone");
                        dropped.push(*id);
                    }
                }
            }
        }

        if !dropped.is_empty() {
            let mut watchers = self.watchers.write().await;
            for id in &dropped {
                watchers.remove(id);
            }
        }

        delivered
    }

    /// Drop every watcher. Their receivers drain and then end.
    pub async fn close_all(&self) {
        let mut watchers = self.watchers.write().await;
        let count = watchers.len();
        watchers.clear();
        if count > 0 {
            debug!(count, "Closed all watchers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_batch(messages: &[&str]) -> TailBatch {
        Arc::new(
            messages
                .iter()
                .map(|m| LogRecord {
                    timestamp: Utc::now(),
                    service: "svc".to_string(),
                    level: "info".to_string(),
                    message: m.to_string(),
                    metadata: Default::default(),
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_watcher() {
        let registry = WatcherRegistry::new(8);
        let mut a = registry.register().await;
        let mut b = registry.register().await;

        assert_eq!(registry.broadcast(make_batch(&["one"])).await, 2);

        assert_eq!(a.receiver.recv().await.unwrap()[0].message, "one");
        assert_eq!(b.receiver.recv().await.unwrap()[0].message, "one");
    }

    #[tokio::test]
    async fn test_slow_watcher_is_dropped_without_blocking_others() {
        let registry = WatcherRegistry::new(1);
        let mut slow = registry.register().await;
        let mut fast = registry.register().await;

        registry.broadcast(make_batch(&["first"])).await;
        assert_eq!(fast.receiver.recv().await.unwrap()[0].message, "first");

        // `slow` still holds "first", so the second batch overflows it.
        assert_eq!(registry.broadcast(make_batch(&["second"])).await, 1);
        assert_eq!(registry.len().await, 1);
        assert_eq!(fast.receiver.recv().await.unwrap()[0].message, "second");

        // The slow watcher sees what it was given and then the end.
        assert_eq!(slow.receiver.recv().await.unwrap()[0].message, "first");
        assert!(slow.receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_watcher_is_removed() {
        let registry = WatcherRegistry::new(4);
        let watcher = registry.register().await;
        drop(watcher);

        assert_eq!(registry.broadcast(make_batch(&["x"])).await, 0);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_watcher_only_sees_records_stamped_after_registering() {
        let registry = WatcherRegistry::new(8);
        let mut early = registry.register().await;

        let before = registry.next_sequence();
        let mut late = registry.register().await;
        let after = registry.next_sequence();

        let records = make_batch(&["before", "after"]);
        let stamped = vec![(before, records[0].clone()), (after, records[1].clone())];
        assert_eq!(registry.broadcast_sequenced(stamped).await, 2);

        let early_batch = early.receiver.recv().await.unwrap();
        assert_eq!(early_batch.len(), 2);
        let late_batch = late.receiver.recv().await.unwrap();
        assert_eq!(late_batch.len(), 1);
        assert_eq!(late_batch[0].message, "after");

        // Nothing visible to the late watcher: it is skipped, not dropped.
        let stale = vec![(before, records[0].clone())];
        assert_eq!(registry.broadcast_sequenced(stale).await, 1);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_deregister_and_close_all() {
        let registry = WatcherRegistry::new(4);
        let a = registry.register().await;
        let mut b = registry.register().await;

        assert!(registry.deregister(a.id).await);
        assert!(!registry.deregister(a.id).await);

        registry.close_all().await;
        assert!(registry.is_empty().await);
        assert!(b.receiver.recv().await.is_none());
    }
}
