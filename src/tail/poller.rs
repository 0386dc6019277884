use super::registry::WatcherRegistry;
use crate::config::TailConfig;
use crate::storage::{Storage, StorageError};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Feed watchers by re-querying the store for records newer than a cursor.
///
/// The cursor starts `poll_lookback` in the past and, after each poll that
/// found records, moves to the newest timestamp plus one microsecond. While
/// no watcher is connected the store is not queried and the cursor follows
/// the clock, so a new watcher does not receive a backlog.
pub async fn run_poller(
    storage: Arc<dyn Storage>,
    registry: WatcherRegistry,
    config: TailConfig,
    cancel: CancellationToken,
) {
    let lookback = TimeDelta::from_std(config.poll_lookback).unwrap_or(TimeDelta::zero());
    let mut cursor = Utc::now() - lookback;

    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval = ?config.poll_interval, "Tail poller started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = ticker.tick() => {
                if registry.is_empty().await {
                    cursor = Utc::now() - lookback;
                    continue;
                }

                match poll_once(storage.as_ref(), &registry, cursor, config.poll_limit).await {
                    Ok(Some(next)) => cursor = next,
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Tail poll failed, keeping cursor"),
                }
            }
        }
    }

    info!("Tail poller stopped");
}

/// One poll. Returns the next cursor if anything was delivered.
pub(crate) async fn poll_once(
    storage: &dyn Storage,
    registry: &WatcherRegistry,
    cursor: DateTime<Utc>,
    limit: usize,
) -> Result<Option<DateTime<Utc>>, StorageError> {
    let records = storage.records_after(cursor, limit).await?;
    let Some(newest) = records.last().map(|r| r.timestamp) else {
        return Ok(None);
    };

    debug!(count = records.len(), "Streaming polled records");
    registry.broadcast(Arc::new(records)).await;
    Ok(Some(newest + TimeDelta::microseconds(1)))
}
