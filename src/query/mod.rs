use crate::config::types::QueryConfig;
use crate::error::ErrorKind;
use crate::record::{LogRecord, Query, StatBucket};
use crate::storage::{Storage, StorageError};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// Window used when the caller gives no start time.
pub fn default_window() -> TimeDelta {
    TimeDelta::hours(1)
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("{0}")]
    BadRequest(String),

    #[error("query failed: {0}")]
    Store(#[from] StorageError),
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::BadRequest(_) => ErrorKind::BadRequest,
            QueryError::Store(_) => ErrorKind::StoreUnavailable,
        }
    }
}

/// Raw query-string parameters of `/logs` and `/stats`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryParams {
    pub service: Option<String>,
    pub level: Option<String>,
    pub search: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub limit: Option<String>,
}

/// Read side of the store: record listing and per-minute counts.
#[derive(Clone)]
pub struct QueryService {
    storage: Arc<dyn Storage>,
    config: QueryConfig,
}

impl QueryService {
    pub fn new(storage: Arc<dyn Storage>, config: QueryConfig) -> Self {
        Self { storage, config }
    }

    /// Build a [`Query`] from request parameters.
    ///
    /// Missing bounds default to the hour before `now`; times are RFC 3339.
    /// The limit is clamped to `1..=max_limit`.
    pub fn parse(&self, params: &QueryParams, now: DateTime<Utc>) -> Result<Query, QueryError> {
        let end_time = match present(&params.end_time) {
            Some(raw) => parse_time("end_time", raw)?,
            None => now,
        };
        let start_time = match present(&params.start_time) {
            Some(raw) => parse_time("start_time", raw)?,
            None => now - default_window(),
        };

        let limit = match present(&params.limit) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                QueryError::BadRequest(format!("limit: '{}' is not an integer", raw))
            })?,
            None => self.config.default_limit as i64,
        };
        let max_limit = self.config.max_limit.max(1);
        let limit = limit.clamp(1, max_limit as i64) as usize;

        let mut query = Query::between(start_time, end_time, limit);
        if let Some(service) = &params.service {
            query = query.with_service(service.as_str());
        }
        if let Some(level) = &params.level {
            query = query.with_level(level.as_str());
        }
        if let Some(search) = &params.search {
            query = query.with_search(search.as_str());
        }
        Ok(query)
    }

    /// Matching records, newest first.
    pub async fn list(&self, query: &Query) -> Result<Vec<LogRecord>, QueryError> {
        Ok(self.storage.query(query).await?)
    }

    /// Matching record counts per minute, oldest first.
    pub async fn stats(&self, query: &Query) -> Result<Vec<StatBucket>, QueryError> {
        Ok(self.storage.aggregate(query).await?)
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_time(name: &str, raw: &str) -> Result<DateTime<Utc>, QueryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| QueryError::BadRequest(format!("{}: '{}' is not RFC 3339 ({})", name, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DuckDbStorage;

    fn make_service() -> QueryService {
        let storage = Arc::new(DuckDbStorage::in_memory().unwrap());
        QueryService::new(storage, QueryConfig::default())
    }

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        let mut p = QueryParams::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "service" => p.service = value,
                "level" => p.level = value,
                "search" => p.search = value,
                "start_time" => p.start_time = value,
                "end_time" => p.end_time = value,
                "limit" => p.limit = value,
                other => panic!("unknown param {}", other),
            }
        }
        p
    }

    #[test]
    fn test_defaults() {
        let service = make_service();
        let now: DateTime<Utc> = "2025-03-01T12:00:00Z".parse().unwrap();
        let query = service.parse(&QueryParams::default(), now).unwrap();

        assert_eq!(query.end_time, now);
        assert_eq!(query.start_time, "2025-03-01T11:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(query.limit, 100);
        assert_eq!(query.service, None);
        assert_eq!(query.search, None);
    }

    #[test]
    fn test_explicit_values() {
        let service = make_service();
        let query = service
            .parse(
                &params(&[
                    ("service", "api"),
                    ("level", ""),
                    ("search", "Timeout"),
                    ("start_time", "2025-03-01T10:00:00+02:00"),
                    ("end_time", "2025-03-01T10:30:00Z"),
                    ("limit", "25"),
                ]),
                Utc::now(),
            )
            .unwrap();

        assert_eq!(query.service.as_deref(), Some("api"));
        assert_eq!(query.level, None);
        assert_eq!(query.search.as_deref(), Some("Timeout"));
        assert_eq!(query.start_time, "2025-03-01T08:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(query.limit, 25);
    }

    #[test]
    fn test_limit_is_clamped() {
        let service = make_service();
        let now = Utc::now();
        assert_eq!(service.parse(&params(&[("limit", "0")]), now).unwrap().limit, 1);
        assert_eq!(service.parse(&params(&[("limit", "-4")]), now).unwrap().limit, 1);
        assert_eq!(
            service.parse(&params(&[("limit", "100000")]), now).unwrap().limit,
            5000
        );
    }

    #[test]
    fn test_malformed_values_are_bad_requests() {
        let service = make_service();
        let now = Utc::now();
        for bad in [
            params(&[("limit", "ten")]),
            params(&[("start_time", "yesterday")]),
            params(&[("end_time", "2025-03-01 10:00:00")]),
        ] {
            let err = service.parse(&bad, now).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadRequest);
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_store_error() {
        // Schema never created.
        let service = make_service();
        let query = service.parse(&QueryParams::default(), Utc::now()).unwrap();
        let err = service.list(&query).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    }
}
