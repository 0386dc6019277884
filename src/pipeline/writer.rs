use crate::config::types::WriterConfig;
use crate::queue::{DurableQueue, QueueMessage};
use crate::record::Batch;
use crate::storage::Storage;
use std::fmt;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of the writer loop, reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    Accumulating,
    Flushing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Interval,
    Shutdown,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Interval => "interval",
            FlushTrigger::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Counters returned when the writer exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub records_received: u64,
    pub records_flushed: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
}

/// State owned by the single writer task. Nothing else ever touches the
/// batch, so appends and flush-clears cannot interleave.
struct BatchState {
    batch: Batch,
    /// Highest queue offset contained in `batch`.
    last_offset: Option<u64>,
    /// A flush failed; wait for the interval before trying again.
    retry_pending: bool,
    state: WriterState,
    stats: WriterStats,
}

impl BatchState {
    fn new(capacity: usize) -> Self {
        Self {
            batch: Vec::with_capacity(capacity),
            last_offset: None,
            retry_pending: false,
            state: WriterState::Idle,
            stats: WriterStats::default(),
        }
    }

    fn accept(&mut self, message: QueueMessage) {
        self.last_offset = Some(
            self.last_offset
                .map_or(message.offset, |o| o.max(message.offset)),
        );
        self.batch.push(message.record);
        self.stats.records_received += 1;
        self.state = WriterState::Accumulating;
    }

    fn size_trigger_reached(&self, batch_size: usize) -> bool {
        !self.retry_pending && self.batch.len() >= batch_size
    }

    /// Hand the whole batch to storage. On failure the batch is kept as is.
    async fn flush(
        &mut self,
        storage: &dyn Storage,
        queue: &dyn DurableQueue,
        trigger: FlushTrigger,
    ) -> bool {
        if self.batch.is_empty() {
            return true;
        }

        let count = self.batch.len();
        self.state = WriterState::Flushing;
        debug!(count, %trigger, "Flushing log batch");

        match storage.insert_batch(&self.batch).await {
            Ok(()) => {
                self.batch.clear();
                self.retry_pending = false;
                self.state = WriterState::Idle;
                self.stats.flushes += 1;
                self.stats.records_flushed += count as u64;
                debug!(count, %trigger, "Flushed log batch");

                if let Some(offset) = self.last_offset.take() {
                    if let Err(e) = queue.commit(offset).await {
                        // Records are persisted; an uncommitted offset only
                        // means they may be delivered again.
                        warn!(offset, error = %e, "Failed to commit queue offset");
                    }
                }
                true
            }
            Err(e) => {
                self.retry_pending = true;
                self.state = WriterState::Accumulating;
                self.stats.failed_flushes += 1;
                error!(count, %trigger, error = %e, "Failed to flush log batch, keeping it for retry");
                false
            }
        }
    }
}

/// Run the batch writer until the queue closes or `cancel` fires.
///
/// Pulls records one at a time from `queue` and persists them in batches,
/// flushing when the batch reaches `batch_size` or when `flush_interval`
/// elapses. Flushes are awaited inline, so at most one is ever in flight
/// and records arriving meanwhile wait in the queue.
///
/// On cancellation the queue is drained of whatever is immediately
/// available and a final flush is attempted.
pub async fn run_batch_writer(
    queue: Arc<dyn DurableQueue>,
    storage: Arc<dyn Storage>,
    config: WriterConfig,
    cancel: CancellationToken,
) -> WriterStats {
    let batch_size = config.batch_size.max(1);
    let mut state = BatchState::new(batch_size);

    let mut flush_interval = tokio::time::interval(config.flush_interval);
    flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    flush_interval.tick().await;

    info!(
        batch_size,
        flush_interval = ?config.flush_interval,
        "Batch writer started"
    );

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("Batch writer received shutdown signal");
                break;
            }

            _ = flush_interval.tick() => {
                state.flush(storage.as_ref(), queue.as_ref(), FlushTrigger::Interval).await;
            }

            received = queue.receive() => {
                match received {
                    Ok(Some(message)) => {
                        state.accept(message);
                        if state.size_trigger_reached(batch_size)
                            && state.flush(storage.as_ref(), queue.as_ref(), FlushTrigger::Size).await
                        {
                            // The interval counts from the last flush.
                            flush_interval.reset();
                        }
                    }
                    Ok(None) => {
                        info!("Queue closed, flushing remaining records");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to receive from queue");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(config.receive_backoff) => {}
                        }
                    }
                }
            }
        }
    }

    drain(&mut state, queue.as_ref(), storage.as_ref(), batch_size).await;

    if !state.batch.is_empty()
        && !state
            .flush(storage.as_ref(), queue.as_ref(), FlushTrigger::Shutdown)
            .await
    {
        error!(
            count = state.batch.len(),
            "Final flush failed, records not persisted"
        );
    }

    info!(
        received = state.stats.records_received,
        flushed = state.stats.records_flushed,
        flushes = state.stats.flushes,
        failed_flushes = state.stats.failed_flushes,
        final_state = ?state.state,
        "Batch writer shutdown complete"
    );

    state.stats
}

/// Pull everything the queue can hand over without waiting.
async fn drain(
    state: &mut BatchState,
    queue: &dyn DurableQueue,
    storage: &dyn Storage,
    batch_size: usize,
) {
    loop {
        match queue.try_receive().await {
            Ok(Some(message)) => {
                state.accept(message);
                if state.batch.len() >= batch_size
                    && !state.flush(storage, queue, FlushTrigger::Shutdown).await
                {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Failed to drain queue during shutdown");
                return;
            }
        }
    }
}
