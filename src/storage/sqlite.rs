use super::sql::{self, RawLog};
use super::traits::{Storage, StorageError};
use crate::record::{LogRecord, Query, StatBucket};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Unavailable("sqlite connection lock poisoned".to_string()))
}

/// Replace the built-in ASCII-only `lower()` with full Unicode case folding,
/// matching DuckDB and the lowercased search needle.
fn register_unicode_lower(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )
}

/// Transactional relational store on SQLite.
///
/// Every insert commits before returning, so a written record is visible to
/// the very next read. Used by unified mode, where there is no queue in
/// front of the store.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    /// Create an in-memory SQLite storage instance (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        register_unicode_lower(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn select_records(
        conn: &Connection,
        stmt: &sql::Statement,
    ) -> Result<Vec<LogRecord>, StorageError> {
        let mut prepared = conn.prepare(&stmt.sql)?;
        let rows = prepared.query_map(rusqlite::params_from_iter(stmt.args.iter()), |row| {
            Ok::<RawLog, rusqlite::Error>((
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
impl Storage for SqliteStorage {
    async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp_us INTEGER NOT NULL,
                    service TEXT NOT NULL,
                    level TEXT NOT NULL,
                    message TEXT NOT NULL,
                    metadata TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp_us);
                CREATE INDEX IF NOT EXISTS idx_logs_service ON logs(service, timestamp_us);",
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
                let mut stmt = tx.prepare_cached(sql::INSERT_LOG)?;
                for record in &records {
                    stmt.execute(rusqlite::params![
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
            let rows = prepared.query_map(rusqlite::params_from_iter(stmt.args.iter()), |row| {
                Ok::<(i64, i64), rusqlite::Error>((row.get(0)?, row.get(1)?))
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
    use tempfile::TempDir;

    fn make_record(timestamp: &str, message: &str) -> LogRecord {
        LogRecord {
            timestamp: timestamp.parse().unwrap(),
            service: "billing".to_string(),
            level: "warn".to_string(),
            message: message.to_string(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_write_is_visible_to_next_read() {
        let dir = TempDir::new().unwrap();
        let storage = SqliteStorage::new(dir.path().join("logs.db")).unwrap();
        storage.init_schema().await.unwrap();

        let record = make_record("2025-03-01T10:00:00Z", "card declined");
        storage.insert_batch(&[record.clone()]).await.unwrap();

        let results = storage
            .records_after("2025-03-01T09:59:59Z".parse().unwrap(), 10)
            .await
            .unwrap();
        assert_eq!(results, vec![record]);
    }

    #[tokio::test]
    async fn test_insert_into_missing_table_fails() {
        let storage = SqliteStorage::in_memory().unwrap();
        let result = storage
            .insert_batch(&[make_record("2025-03-01T10:00:00Z", "no schema")])
            .await;
        assert!(matches!(result, Err(StorageError::Database(_))));
    }
}
