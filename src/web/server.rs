use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use super::api::{
    get_stats, health_check, ingest, list_logs, live_tail, method_not_allowed, AppState,
};

/// Build the router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ingest", post(ingest).fallback(method_not_allowed))
        .route("/logs", get(list_logs).fallback(method_not_allowed))
        .route("/stats", get(get_stats).fallback(method_not_allowed))
        .route("/ws", get(live_tail))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on an already bound listener until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = create_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await
}
