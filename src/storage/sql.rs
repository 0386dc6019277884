//! SQL shared by the DuckDB and SQLite backends.
//!
//! Both backends keep `timestamp_us` as microseconds since the Unix epoch,
//! which keeps ordering, range filters and minute bucketing identical.

use super::traits::StorageError;
use crate::record::{LogRecord, Query, StatBucket};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub(crate) const MICROS_PER_MINUTE: i64 = 60_000_000;

pub(crate) const INSERT_LOG: &str =
    "INSERT INTO logs (timestamp_us, service, level, message, metadata) VALUES (?, ?, ?, ?, ?)";

pub(crate) const SELECT_AFTER: &str =
    "SELECT timestamp_us, service, level, message, metadata FROM logs
     WHERE timestamp_us > ?
     ORDER BY timestamp_us ASC
     LIMIT ?";

/// Positional parameter bound into a statement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlValue {
    Int(i64),
    Text(String),
}

impl duckdb::ToSql for SqlValue {
    fn to_sql(&self) -> duckdb::Result<duckdb::types::ToSqlOutput<'_>> {
        use duckdb::types::{ToSqlOutput, Value};
        Ok(match self {
            SqlValue::Int(v) => ToSqlOutput::Owned(Value::BigInt(*v)),
            SqlValue::Text(v) => ToSqlOutput::Owned(Value::Text(v.clone())),
        })
    }
}

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, ValueRef};
        Ok(match self {
            SqlValue::Int(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

/// A statement plus the values for its placeholders.
#[derive(Debug, Clone)]
pub(crate) struct Statement {
    pub sql: String,
    pub args: Vec<SqlValue>,
}

fn where_clause(query: &Query) -> (String, Vec<SqlValue>) {
    let mut clause = String::from("timestamp_us >= ? AND timestamp_us <= ?");
    let mut args = vec![
        SqlValue::Int(query.start_time.timestamp_micros()),
        SqlValue::Int(query.end_time.timestamp_micros()),
    ];

    if let Some(service) = &query.service {
        clause.push_str(" AND service = ?");
        args.push(SqlValue::Text(service.clone()));
    }
    if let Some(level) = &query.level {
        clause.push_str(" AND level = ?");
        args.push(SqlValue::Text(level.clone()));
    }
    if let Some(search) = &query.search {
        // instr() avoids having to escape LIKE wildcards in user input
        clause.push_str(" AND instr(lower(message), ?) > 0");
        args.push(SqlValue::Text(search.to_lowercase()));
    }

    (clause, args)
}

pub(crate) fn select_logs(query: &Query) -> Statement {
    let (clause, mut args) = where_clause(query);
    args.push(SqlValue::Int(i64::try_from(query.limit).unwrap_or(i64::MAX)));

    Statement {
        sql: format!(
            "SELECT timestamp_us, service, level, message, metadata FROM logs
             WHERE {}
             ORDER BY timestamp_us DESC
             LIMIT ?",
            clause
        ),
        args,
    }
}

pub(crate) fn select_stats(query: &Query) -> Statement {
    let (clause, args) = where_clause(query);

    Statement {
        sql: format!(
            "SELECT timestamp_us - (timestamp_us % {m}) AS minute_us, COUNT(*) AS count
             FROM logs
             WHERE {clause}
             GROUP BY minute_us
             ORDER BY minute_us ASC",
            m = MICROS_PER_MINUTE,
            clause = clause
        ),
        args,
    }
}

/// Columns of one `logs` row, before conversion.
pub(crate) type RawLog = (i64, String, String, String, Option<String>);

pub(crate) fn encode_metadata(
    metadata: &HashMap<String, String>,
) -> Result<Option<String>, StorageError> {
    if metadata.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(metadata)?))
    }
}

fn timestamp_from_micros(micros: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StorageError::Database(format!("invalid timestamp: {}", micros)))
}

pub(crate) fn record_from_raw(raw: RawLog) -> Result<LogRecord, StorageError> {
    let (timestamp_us, service, level, message, metadata) = raw;
    let metadata = match metadata.as_deref() {
        None | Some("") => HashMap::new(),
        Some(json) => serde_json::from_str(json)?,
    };

    Ok(LogRecord {
        timestamp: timestamp_from_micros(timestamp_us)?,
        service,
        level,
        message,
        metadata,
    })
}

pub(crate) fn bucket_from_raw(minute_us: i64, count: i64) -> Result<StatBucket, StorageError> {
    Ok(StatBucket {
        timestamp: timestamp_from_micros(minute_us)?,
        count: count.max(0) as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_logs_without_filters() {
        let start: DateTime<Utc> = "2025-03-01T10:00:00Z".parse().unwrap();
        let end: DateTime<Utc> = "2025-03-01T11:00:00Z".parse().unwrap();
        let stmt = select_logs(&Query::between(start, end, 100));

        assert!(stmt.sql.contains("ORDER BY timestamp_us DESC"));
        assert!(!stmt.sql.contains("service = ?"));
        assert_eq!(
            stmt.args,
            vec![
                SqlValue::Int(start.timestamp_micros()),
                SqlValue::Int(end.timestamp_micros()),
                SqlValue::Int(100),
            ]
        );
    }

    #[test]
    fn test_filters_bind_in_clause_order() {
        let now = Utc::now();
        let query = Query::between(now, now, 5)
            .with_service("api")
            .with_level("error")
            .with_search("TimeOut");
        let stmt = select_logs(&query);

        assert_eq!(stmt.sql.matches('?').count(), stmt.args.len());
        assert_eq!(stmt.args[2], SqlValue::Text("api".to_string()));
        assert_eq!(stmt.args[3], SqlValue::Text("error".to_string()));
        assert_eq!(stmt.args[4], SqlValue::Text("timeout".to_string()));
    }

    #[test]
    fn test_stats_has_no_limit() {
        let now = Utc::now();
        let stmt = select_stats(&Query::between(now, now, 5).with_service("api"));
        assert!(!stmt.sql.contains("LIMIT"));
        assert_eq!(stmt.sql.matches('?').count(), stmt.args.len());
    }

    #[test]
    fn test_record_from_raw_with_metadata() {
        let record = record_from_raw((
            1_700_000_000_000_000,
            "api".to_string(),
            "info".to_string(),
            "hello".to_string(),
            Some(r#"{"region":"eu"}"#.to_string()),
        ))
        .unwrap();

        assert_eq!(record.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(record.metadata["region"], "eu");
    }
}
