use super::traits::{DurableQueue, QueueError, QueueMessage};
use crate::record::LogRecord;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// Durable queue backed by a SQLite spool file.
///
/// Published records are rows in the `spool` table. They are removed only
/// when the consumer commits them, so anything received but not yet
/// persisted downstream is delivered again after a restart.
pub struct SpoolQueue {
    conn: Arc<Mutex<Connection>>,
    /// Sequence number of the last row handed to a consumer.
    cursor: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
    poll_interval: Duration,
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, QueueError> {
    conn.lock()
        .map_err(|_| QueueError::Unavailable("spool connection lock poisoned".to_string()))
}

fn join_error(e: tokio::task::JoinError) -> QueueError {
    QueueError::Unavailable(format!("Task join error: {}", e))
}

impl SpoolQueue {
    /// Open (or create) a spool at `path`.
    pub fn open<P: AsRef<Path>>(path: P, poll_interval: Duration) -> Result<Self, QueueError> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::from_connection(conn, poll_interval)
    }

    /// Create a spool that lives only in memory (for testing).
    pub fn in_memory() -> Result<Self, QueueError> {
        Self::from_connection(Connection::open_in_memory()?, Duration::from_millis(20))
    }

    fn from_connection(conn: Connection, poll_interval: Duration) -> Result<Self, QueueError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS spool (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL
            )",
            [],
        )?;

        let pending: i64 = conn.query_row("SELECT COUNT(*) FROM spool", [], |row| row.get(0))?;
        if pending > 0 {
            tracing::info!(pending, "Spool contains uncommitted records, redelivering");
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            cursor: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
            poll_interval,
        })
    }

    /// Number of rows not yet committed.
    pub async fn pending(&self) -> Result<u64, QueueError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM spool", [], |row| row.get(0))?;
            Ok::<u64, QueueError>(count as u64)
        })
        .await
        .map_err(join_error)?
    }

    /// Next decodable row after the cursor. Rows whose payload cannot be
    /// decoded are logged and skipped; a later commit deletes them.
    async fn fetch_next(&self) -> Result<Option<QueueMessage>, QueueError> {
        loop {
            let conn = self.conn.clone();
            let after = self.cursor.load(Ordering::Acquire) as i64;

            let row = tokio::task::spawn_blocking(move || {
                let conn = lock(&conn)?;
                let row = conn
                    .query_row(
                        "SELECT seq, payload FROM spool WHERE seq > ? ORDER BY seq LIMIT 1",
                        params![after],
                        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                    )
                    .optional()?;
                Ok::<_, QueueError>(row)
            })
            .await
            .map_err(join_error)??;

            let Some((seq, payload)) = row else {
                return Ok(None);
            };

            // Advance only after the row is in hand so a dropped future
            // leaves the row eligible for the next receive.
            self.cursor.fetch_max(seq as u64, Ordering::AcqRel);

            match serde_json::from_str::<LogRecord>(&payload) {
                Ok(record) => {
                    return Ok(Some(QueueMessage {
                        offset: seq as u64,
                        record,
                    }))
                }
                Err(e) => {
                    tracing::error!(seq, error = %e, "Skipping undecodable spool row");
                }
            }
        }
    }
}

#[async_trait]
impl DurableQueue for SpoolQueue {
    async fn publish(&self, record: LogRecord) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let payload = serde_json::to_string(&record)?;
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT INTO spool (payload, enqueued_at) VALUES (?, ?)",
                params![payload, Utc::now().timestamp_micros()],
            )?;
            Ok::<(), QueueError>(())
        })
        .await
        .map_err(join_error)??;

        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self) -> Result<Option<QueueMessage>, QueueError> {
        loop {
            if let Some(message) = self.fetch_next().await? {
                return Ok(Some(message));
            }
            if self.closed.load(Ordering::Acquire) {
                return Ok(None);
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn try_receive(&self) -> Result<Option<QueueMessage>, QueueError> {
        self.fetch_next().await
    }

    async fn commit(&self, offset: u64) -> Result<(), QueueError> {
        let conn = self.conn.clone();

        let removed = tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let removed = conn.execute("DELETE FROM spool WHERE seq <= ?", params![offset as i64])?;
            Ok::<usize, QueueError>(removed)
        })
        .await
        .map_err(join_error)??;

        tracing::debug!(offset, removed, "Committed spool records");
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}
