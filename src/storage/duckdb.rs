use super::sql::{self, RawLog};
use super::traits::{Storage, StorageError};
use crate::record::{LogRecord, Query, StatBucket};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Check if a process with the given PID is still running
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use std::process::Command;
        Command::new("ps")
            .arg("-p")
            .arg(pid.to_string())
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Extract PID from DuckDB lock error message, e.g. "... (PID 12345) ..."
fn extract_pid_from_lock_error(error_msg: &str) -> Option<u32> {
    let start = error_msg.find("(PID ")? + 5;
    let end = error_msg[start..].find(')')?;
    error_msg[start..start + end].parse().ok()
}

/// Remove the WAL and lock files a crashed process left behind.
fn remove_lock_files(db_path: &Path) -> std::io::Result<()> {
    for suffix in ["wal", "lock"] {
        let stale = PathBuf::from(format!("{}.{}", db_path.display(), suffix));
        if stale.exists() {
            std::fs::remove_file(&stale)?;
            tracing::info!("Removed stale {} file: {}", suffix, stale.display());
        }
    }
    Ok(())
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Unavailable("duckdb connection lock poisoned".to_string()))
}

/// Analytical store on DuckDB, tuned for batch inserts and range scans.
pub struct DuckDbStorage {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStorage {
    /// Open (or create) a database file.
    ///
    /// A lock held by a process that no longer exists is cleared and the
    /// open is retried once.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();

        let err = match Connection::open(path) {
            Ok(conn) => return Ok(Self::from_connection(conn)),
            Err(e) => e,
        };

        let error_msg = err.to_string();
        if !error_msg.contains("Could not set lock") {
            return Err(err.into());
        }

        tracing::warn!("Database lock detected: {}", error_msg);
        let Some(pid) = extract_pid_from_lock_error(&error_msg) else {
            return Err(err.into());
        };

        if is_process_running(pid) {
            tracing::error!("Process {} is still running, cannot acquire lock", pid);
            return Err(err.into());
        }

        tracing::warn!("Process {} is not running, removing stale lock files", pid);
        if let Err(io_err) = remove_lock_files(path) {
            tracing::error!("Failed to remove lock files: {}", io_err);
            return Err(err.into());
        }

        tracing::info!("Retrying database connection after removing stale locks");
        Ok(Self::from_connection(Connection::open(path)?))
    }

    /// Create an in-memory DuckDB storage instance (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn select_records(
        conn: &Connection,
        stmt: &sql::Statement,
    ) -> Result<Vec<LogRecord>, StorageError> {
        let mut prepared = conn.prepare(&stmt.sql)?;
        let rows = prepared.query_map(duckdb::params_from_iter(stmt.args.iter()), |row| {
            Ok::<RawLog, duckdb::Error>((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(sql::record_from_raw(row?)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl Storage for DuckDbStorage {
    async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS logs (
                    timestamp_us BIGINT NOT NULL,
                    service VARCHAR NOT NULL,
                    level VARCHAR NOT NULL,
                    message VARCHAR NOT NULL,
                    metadata VARCHAR
                )",
                [],
            )?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp_us)",
                [],
            )?;

            Ok::<(), StorageError>(())
        })
        .await?
    }

    async fn insert_batch(&self, records: &[LogRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let conn = self.conn.clone();
        let records = records.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(sql::INSERT_LOG)?;
                for record in &records {
                    stmt.execute(duckdb::params![
                        record.timestamp.timestamp_micros(),
                        record.service,
                        record.level,
                        record.message,
                        sql::encode_metadata(&record.metadata)?,
                    ])?;
                }
            }
            tx.commit()?;

            Ok::<(), StorageError>(())
        })
        .await?
    }

    async fn query(&self, query: &Query) -> Result<Vec<LogRecord>, StorageError> {
        let conn = self.conn.clone();
        let stmt = sql::select_logs(query);

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            Self::select_records(&conn, &stmt)
        })
        .await?
    }

    async fn aggregate(&self, query: &Query) -> Result<Vec<StatBucket>, StorageError> {
        let conn = self.conn.clone();
        let stmt = sql::select_stats(query);

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut prepared = conn.prepare(&stmt.sql)?;
            let rows = prepared.query_map(duckdb::params_from_iter(stmt.args.iter()), |row| {
                Ok::<(i64, i64), duckdb::Error>((row.get(0)?, row.get(1)?))
            })?;

            let mut buckets = Vec::new();
            for row in rows {
                let (minute_us, count) = row?;
                buckets.push(sql::bucket_from_raw(minute_us, count)?);
            }
            Ok(buckets)
        })
        .await?
    }

    async fn records_after(
        &self,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LogRecord>, StorageError> {
        let conn = self.conn.clone();
        let stmt = sql::Statement {
            sql: sql::SELECT_AFTER.to_string(),
            args: vec![
                sql::SqlValue::Int(after.timestamp_micros()),
                sql::SqlValue::Int(i64::try_from(limit).unwrap_or(i64::MAX)),
            ],
        };

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            Self::select_records(&conn, &stmt)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    async fn setup_storage() -> DuckDbStorage {
        let storage = DuckDbStorage::in_memory().unwrap();
        storage.init_schema().await.unwrap();
        storage
    }

    fn make_record(timestamp: &str, service: &str, message: &str) -> LogRecord {
        LogRecord {
            timestamp: timestamp.parse().unwrap(),
            service: service.to_string(),
            level: "info".to_string(),
            message: message.to_string(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_schema_initialization_is_idempotent() {
        let storage = setup_storage().await;
        storage.init_schema().await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_and_query_roundtrip() {
        let storage = setup_storage().await;
        let mut record = make_record("2025-03-01T10:00:00.000123Z", "api", "hello");
        record.metadata.insert("request_id".to_string(), "r-1".to_string());

        storage.insert_batch(&[record.clone()]).await.unwrap();

        let start = "2025-03-01T09:00:00Z".parse().unwrap();
        let end = "2025-03-01T11:00:00Z".parse().unwrap();
        let results = storage.query(&Query::between(start, end, 10)).await.unwrap();

        assert_eq!(results, vec![record]);
    }

    #[tokio::test]
    async fn test_query_orders_newest_first_and_limits() {
        let storage = setup_storage().await;
        let records: Vec<LogRecord> = (0..5)
            .map(|i| make_record(&format!("2025-03-01T10:0{}:00Z", i), "api", &format!("log {}", i)))
            .collect();
        storage.insert_batch(&records).await.unwrap();

        let start = "2025-03-01T09:00:00Z".parse().unwrap();
        let end = "2025-03-01T11:00:00Z".parse().unwrap();
        let results = storage.query(&Query::between(start, end, 2)).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].message, "log 4");
        assert_eq!(results[1].message, "log 3");
    }

    #[tokio::test]
    async fn test_records_after_is_exclusive() {
        let storage = setup_storage().await;
        storage
            .insert_batch(&[
                make_record("2025-03-01T10:00:00Z", "api", "boundary"),
                make_record("2025-03-01T10:00:01Z", "api", "newer"),
            ])
            .await
            .unwrap();

        let results = storage
            .records_after("2025-03-01T10:00:00Z".parse().unwrap(), 10)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message, "newer");
    }

    #[test]
    fn test_extract_pid_from_lock_error() {
        let error_msg = "IO Error: Could not set lock on file \"/path/to/db.duckdb\": Conflicting lock is held in /path/to/binary (deleted) (PID 12345). See also https://duckdb.org/docs/stable/connect/concurrency";
        assert_eq!(extract_pid_from_lock_error(error_msg), Some(12345));
        assert_eq!(extract_pid_from_lock_error("Some other error"), None);
        assert_eq!(extract_pid_from_lock_error("Error (PID abc)"), None);
    }
}
