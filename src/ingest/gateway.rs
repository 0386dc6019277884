use super::auth::{credential_key, Authorizer};
use super::sink::IngestSink;
use crate::error::ErrorKind;
use crate::queue::QueueError;
use crate::record::{IncomingRecord, LogRecord};
use crate::storage::StorageError;
use crate::tail::TailPublisher;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("missing or invalid credential")]
    Unauthorized,

    #[error("invalid log record: {0}")]
    BadRequest(String),

    #[error("failed to enqueue record: {0}")]
    Queue(#[from] QueueError),

    #[error("failed to store record: {0}")]
    Store(#[from] StorageError),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Unauthorized => ErrorKind::Unauthorized,
            IngestError::BadRequest(_) => ErrorKind::BadRequest,
            IngestError::Queue(_) => ErrorKind::QueueUnavailable,
            IngestError::Store(_) => ErrorKind::StoreUnavailable,
        }
    }
}

/// A record the gateway took responsibility for.
///
/// In buffered mode this only means the record is on the queue.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub record: LogRecord,
}

/// Validates, normalizes and routes incoming records.
pub struct IngestGateway {
    authorizer: Arc<dyn Authorizer>,
    auth_required: bool,
    sink: IngestSink,
    tail: Option<TailPublisher>,
}

impl IngestGateway {
    pub fn new(authorizer: Arc<dyn Authorizer>, auth_required: bool, sink: IngestSink) -> Self {
        Self {
            authorizer,
            auth_required,
            sink,
            tail: None,
        }
    }

    /// Offer every accepted record to the live tail.
    pub fn with_tail(mut self, tail: TailPublisher) -> Self {
        self.tail = Some(tail);
        self
    }

    /// Accept one JSON-encoded record.
    ///
    /// `credential` is the raw credential header value, if any. A supplied
    /// credential is always checked, even when credentials are optional.
    pub async fn submit(
        &self,
        credential: Option<&str>,
        body: &[u8],
    ) -> Result<Accepted, IngestError> {
        self.check_credential(credential).await?;

        let incoming: IncomingRecord = serde_json::from_slice(body).map_err(|e| {
            debug!(error = %e, "Rejected undecodable log record");
            IngestError::BadRequest(e.to_string())
        })?;
        let record = incoming.normalize(Utc::now());

        if let Err(e) = self.sink.deliver(&record).await {
            error!(
                sink = self.sink.name(),
                service = %record.service,
                error = %e,
                "Failed to accept log record"
            );
            return Err(e);
        }

        if let Some(tail) = &self.tail {
            tail.offer(record.clone());
        }

        Ok(Accepted { record })
    }

    async fn check_credential(&self, credential: Option<&str>) -> Result<(), IngestError> {
        match credential.map(credential_key) {
            None | Some("") if !self.auth_required => Ok(()),
            None | Some("") => {
                warn!("Rejected ingest request without credential");
                Err(IngestError::Unauthorized)
            }
            Some(key) => {
                if self.authorizer.authorize(key).await {
                    Ok(())
                } else {
                    warn!("Rejected ingest request with invalid credential");
                    Err(IngestError::Unauthorized)
                }
            }
        }
    }
}
