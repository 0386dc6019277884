use crate::error::ErrorKind;
use crate::ingest::{IngestError, IngestGateway};
use crate::query::{QueryError, QueryParams, QueryService};
use crate::record::{LogRecord, StatBucket};
use crate::tail::WatcherRegistry;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<IngestGateway>,
    pub queries: QueryService,
    pub registry: WatcherRegistry,
    /// Fires when the service shuts down; open tails close on it.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
}

/// POST /ingest
pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    // A credential that is present but unreadable is a bad credential.
    let credential = match headers.get(header::AUTHORIZATION) {
        Some(value) => Some(value.to_str().map_err(|_| {
            warn!("Rejected ingest request with non-UTF-8 credential");
            ApiError::from(IngestError::Unauthorized)
        })?),
        None => None,
    };

    state.gateway.submit(credential, &body).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse { status: "accepted" }),
    ))
}

/// GET /logs?service=&level=&search=&start_time=&end_time=&limit=
pub async fn list_logs(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Vec<LogRecord>>, ApiError> {
    let query = state.queries.parse(&params, Utc::now())?;
    let records = state.queries.list(&query).await.map_err(|e| {
        error!(error = %e, "Failed to list logs");
        e
    })?;
    Ok(Json(records))
}

/// GET /stats, same parameters as /logs (limit ignored)
pub async fn get_stats(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Vec<StatBucket>>, ApiError> {
    let query = state.queries.parse(&params, Utc::now())?;
    let buckets = state.queries.stats(&query).await.map_err(|e| {
        error!(error = %e, "Failed to aggregate logs");
        e
    })?;
    Ok(Json(buckets))
}

/// GET /ws
pub async fn live_tail(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_tail(socket, state))
}

/// Push tail batches to one websocket until either side goes away.
async fn stream_tail(socket: WebSocket, state: AppState) {
    let mut watcher = state.registry.register().await;
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            batch = watcher.receiver.recv() => {
                let Some(batch) = batch else {
                    // Dropped by the registry: fell behind or shutting down.
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };

                let text = match serde_json::to_string(batch.as_ref()) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode tail batch");
                        continue;
                    }
                };

                if let Err(e) = sender.send(Message::Text(text)).await {
                    debug!(watcher = %watcher.id, error = %e, "Websocket write failed");
                    break;
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(watcher = %watcher.id, error = %e, "Websocket read failed");
                        break;
                    }
                    // Pings are answered by the transport; client text is ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.registry.deregister(watcher.id).await;
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// Any unsupported method on a known path.
pub async fn method_not_allowed() -> ApiError {
    ApiError::new(ErrorKind::MethodNotAllowed, "method not allowed")
}

// Error handling
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind: kind.surfaced(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::StoreUnavailable
            | ErrorKind::QueueUnavailable
            | ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        ApiError::new(e.kind(), e.to_string())
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        ApiError::new(e.kind(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.message,
        }));

        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ErrorKind::Unauthorized, StatusCode::UNAUTHORIZED),
            (ErrorKind::BadRequest, StatusCode::BAD_REQUEST),
            (ErrorKind::MethodNotAllowed, StatusCode::METHOD_NOT_ALLOWED),
            (ErrorKind::StoreUnavailable, StatusCode::INTERNAL_SERVER_ERROR),
            (ErrorKind::QueueUnavailable, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (kind, status) in cases {
            assert_eq!(ApiError::new(kind, "x").status(), status);
        }
        assert_eq!(
            ApiError::new(ErrorKind::StoreUnavailable, "x").kind(),
            ErrorKind::InternalError
        );
    }
}
