use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A structured log record as stored and served.
///
/// Records are values: they are cloned and forwarded, never mutated once
/// they leave the ingest gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub level: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Wire shape accepted by the ingest endpoint. Identical to [`LogRecord`]
/// except that the timestamp may be omitted by the producer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncomingRecord {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

impl IncomingRecord {
    /// Turn the incoming payload into a canonical record.
    ///
    /// A missing timestamp becomes `now`. Timestamps are truncated to
    /// microseconds, the resolution both store backends persist.
    pub fn normalize(self, now: DateTime<Utc>) -> LogRecord {
        let timestamp = self.timestamp.unwrap_or(now);
        LogRecord {
            timestamp: truncate_to_micros(timestamp),
            service: self.service,
            level: self.level,
            message: self.message,
            metadata: self.metadata.unwrap_or_default(),
        }
    }
}

/// Filter for record listing and aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub service: Option<String>,
    pub level: Option<String>,
    /// Case-insensitive substring of `message`.
    pub search: Option<String>,
    /// Inclusive lower bound.
    pub start_time: DateTime<Utc>,
    /// Inclusive upper bound.
    pub end_time: DateTime<Utc>,
    pub limit: usize,
}

impl Query {
    /// A query over `[start_time, end_time]` with no field filters.
    pub fn between(start_time: DateTime<Utc>, end_time: DateTime<Utc>, limit: usize) -> Self {
        Self {
            service: None,
            level: None,
            search: None,
            start_time,
            end_time,
            limit,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = non_empty(service.into());
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = non_empty(level.into());
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = non_empty(search.into());
        self
    }
}

/// Number of matching records within one minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatBucket {
    /// Start of the minute.
    pub timestamp: DateTime<Utc>,
    pub count: u64,
}

/// Records accumulated by the batch writer between flushes.
pub type Batch = Vec<LogRecord>;

pub(crate) fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_normalize_fills_missing_timestamp() {
        let now = ts("2025-03-01T12:00:00Z");
        let incoming: IncomingRecord =
            serde_json::from_str(r#"{"service":"api","level":"info","message":"hi"}"#).unwrap();

        let record = incoming.normalize(now);
        assert_eq!(record.timestamp, now);
        assert_eq!(record.service, "api");
        assert!(record.metadata.is_empty());
    }

    #[test]
    fn test_normalize_keeps_supplied_timestamp() {
        let now = ts("2025-03-01T12:00:00Z");
        let incoming: IncomingRecord = serde_json::from_str(
            r#"{"timestamp":"2025-02-01T08:30:00.123456789Z","service":"api","level":"warn","message":"slow"}"#,
        )
        .unwrap();

        let record = incoming.normalize(now);
        assert_eq!(record.timestamp, ts("2025-02-01T08:30:00.123456Z"));
    }

    #[test]
    fn test_empty_metadata_is_omitted() {
        let record = LogRecord {
            timestamp: ts("2025-03-01T12:00:00Z"),
            service: "api".to_string(),
            level: "info".to_string(),
            message: "ok".to_string(),
            metadata: HashMap::new(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("metadata").is_none());
        assert_eq!(json["timestamp"], "2025-03-01T12:00:00Z");
    }

    #[test]
    fn test_empty_filters_are_ignored() {
        let query = Query::between(Utc::now(), Utc::now(), 10)
            .with_service("")
            .with_level("")
            .with_search("");
        assert_eq!(query.service, None);
        assert_eq!(query.level, None);
        assert_eq!(query.search, None);
    }
}
