use super::registry::WatcherRegistry;
use crate::record::LogRecord;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An accepted record stamped with its acceptance sequence number.
pub struct OfferedRecord {
    pub(crate) sequence: u64,
    pub(crate) record: LogRecord,
}

/// Handle the ingest path uses to offer accepted records to the tail.
#[derive(Clone)]
pub struct TailPublisher {
    sender: mpsc::Sender<OfferedRecord>,
    registry: WatcherRegistry,
}

impl TailPublisher {
    /// Hand a record to the dispatcher. Never waits: when the dispatch
    /// buffer is full the record is not streamed.
    pub fn offer(&self, record: LogRecord) {
        let sequence = self.registry.next_sequence();
        match self.sender.try_send(OfferedRecord { sequence, record }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Tail dispatch buffer full, record not streamed");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Tail dispatcher stopped, record not streamed");
            }
        }
    }
}

/// Create the publisher and the receiving end for [`run_dispatcher`].
///
/// Records are stamped against `registry`, so a watcher registering while
/// records wait in the buffer does not receive them.
pub fn tail_channel(
    buffer: usize,
    registry: &WatcherRegistry,
) -> (TailPublisher, mpsc::Receiver<OfferedRecord>) {
    let (sender, receiver) = mpsc::channel(buffer.max(1));
    let publisher = TailPublisher {
        sender,
        registry: registry.clone(),
    };
    (publisher, receiver)
}

/// Forward offered records to every registered watcher, in the order they
/// were offered, up to `max_batch` records per message.
pub async fn run_dispatcher(
    mut receiver: mpsc::Receiver<OfferedRecord>,
    registry: WatcherRegistry,
    max_batch: usize,
    cancel: CancellationToken,
) {
    let max_batch = max_batch.max(1);
    let mut pending = Vec::with_capacity(max_batch);
    let mut dispatched: u64 = 0;

    info!(max_batch, "Tail dispatcher started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            received = receiver.recv_many(&mut pending, max_batch) => {
                if received == 0 {
                    break;
                }

                // Nobody connected: these records are simply not streamed.
                if registry.is_empty().await {
                    pending.clear();
                    continue;
                }

                let stamped: Vec<(u64, LogRecord)> = pending
                    .drain(..)
                    .map(|offered| (offered.sequence, offered.record))
                    .collect();
                dispatched += stamped.len() as u64;
                registry.broadcast_sequenced(stamped).await;
            }
        }
    }

    info!(dispatched, "Tail dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn make_record(i: usize) -> LogRecord {
        LogRecord {
            timestamp: Utc::now(),
            service: "svc".to_string(),
            level: "info".to_string(),
            message: format!("record {}", i),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_watcher_receives_records_in_offer_order() {
        let registry = WatcherRegistry::new(1024);
        let (publisher, receiver) = tail_channel(1024, &registry);
        let cancel = CancellationToken::new();
        let mut watcher = registry.register().await;

        let handle = tokio::spawn(run_dispatcher(receiver, registry.clone(), 7, cancel.clone()));

        for i in 0..50 {
            publisher.offer(make_record(i));
        }

        let mut seen = Vec::new();
        while seen.len() < 50 {
            let batch = tokio::time::timeout(Duration::from_secs(2), watcher.receiver.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(batch.len() <= 7);
            seen.extend(batch.iter().map(|r| r.message.clone()));
        }

        let expected: Vec<String> = (0..50).map(|i| format!("record {}", i)).collect();
        assert_eq!(seen, expected);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_buffered_records_skip_late_watcher() {
        let registry = WatcherRegistry::new(16);
        let (publisher, receiver) = tail_channel(16, &registry);
        let cancel = CancellationToken::new();

        // Accepted before anyone connects, still waiting in the buffer.
        for i in 0..5 {
            publisher.offer(make_record(i));
        }
        let mut watcher = registry.register().await;
        publisher.offer(make_record(5));

        let handle = tokio::spawn(run_dispatcher(receiver, registry.clone(), 100, cancel.clone()));

        let batch = tokio::time::timeout(Duration::from_secs(2), watcher.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        let messages: Vec<&str> = batch.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["record 5"]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_offer_never_blocks_when_full() {
        let registry = WatcherRegistry::new(1);
        let (publisher, _receiver) = tail_channel(2, &registry);
        for i in 0..10 {
            publisher.offer(make_record(i));
        }
    }
}
