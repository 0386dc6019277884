use crate::config::parse::{load_config, ConfigError};
use crate::config::types::{Config, Mode, QueueBackend, StorageBackend, StorageConfig, TailMode};
use crate::ingest::{IngestGateway, IngestSink, StaticKeyAuthorizer};
use crate::pipeline::{run_batch_writer, WriterStats};
use crate::query::QueryService;
use crate::queue::{DurableQueue, MemoryQueue, QueueError, SpoolQueue};
use crate::storage::{DuckDbStorage, SqliteStorage, Storage, StorageError};
use crate::tail::{run_dispatcher, run_poller, tail_channel, WatcherRegistry};
use crate::web::{serve, AppState};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("failed to bind {listen}: {source}")]
    Bind {
        listen: String,
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(config_path) = config_path else {
        return Err("config not found\n\
             Searched locations:\n  \
             ~/.config/logstream/config.yml\n  \
             /etc/logstream/config.yml\n\
             \n\
             Use --config <path> to specify a config file, or run 'logstream config init' to generate one."
            .into());
    };

    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(&config_path)?;

    let listener = TcpListener::bind(&config.web.listen)
        .await
        .map_err(|source| RunError::Bind {
            listen: config.web.listen.clone(),
            source,
        })?;

    let service = start(&config, listener).await?;
    info!("Service started, press Ctrl+C to shutdown");

    tokio::select! {
        _ = wait_for_signal() => info!("Shutdown signal received"),
        _ = service.cancelled() => warn!("Service stopped unexpectedly"),
    }

    service.shutdown().await;
    Ok(())
}

/// The running tasks of one service instance.
pub struct RunningService {
    /// Stops the web server and open tails.
    web_shutdown: CancellationToken,
    /// Stops the writer and the tail feed, once ingest has stopped.
    shutdown: CancellationToken,
    grace_period: Duration,
    queue: Option<Arc<dyn DurableQueue>>,
    registry: WatcherRegistry,
    local_addr: SocketAddr,
    web: JoinHandle<()>,
    writer: Option<JoinHandle<WriterStats>>,
    tail: JoinHandle<()>,
}

/// Open the store (and queue, in buffered mode), then start every task and
/// serve HTTP on `listener`.
pub async fn start(config: &Config, listener: TcpListener) -> Result<RunningService, RunError> {
    let web_shutdown = CancellationToken::new();
    let shutdown = CancellationToken::new();
    let local_addr = listener.local_addr()?;

    let storage = open_storage(&config.storage).await?;

    let (sink, queue, writer) = match config.mode {
        Mode::Buffered => {
            let queue = open_queue(config)?;
            info!(
                batch_size = config.writer.batch_size,
                flush_interval = ?config.writer.flush_interval,
                "Starting batch writer"
            );
            let writer = tokio::spawn(run_batch_writer(
                queue.clone(),
                storage.clone(),
                config.writer.clone(),
                shutdown.clone(),
            ));
            (IngestSink::Enqueue(queue.clone()), Some(queue), Some(writer))
        }
        Mode::Unified => (IngestSink::DirectWrite(storage.clone()), None, None),
    };

    let authorizer = Arc::new(StaticKeyAuthorizer::new(config.auth.api_keys.clone()));
    let mut gateway = IngestGateway::new(authorizer, config.auth.required, sink);

    let registry = WatcherRegistry::new(config.tail.watcher_buffer);
    let tail = match config.tail.mode {
        TailMode::Push => {
            let (publisher, receiver) = tail_channel(config.tail.dispatch_buffer, &registry);
            gateway = gateway.with_tail(publisher);
            tokio::spawn(run_dispatcher(
                receiver,
                registry.clone(),
                config.tail.max_batch,
                shutdown.clone(),
            ))
        }
        TailMode::Poll => tokio::spawn(run_poller(
            storage.clone(),
            registry.clone(),
            config.tail.clone(),
            shutdown.clone(),
        )),
    };

    let state = AppState {
        gateway: Arc::new(gateway),
        queries: QueryService::new(storage, config.query.clone()),
        registry: registry.clone(),
        shutdown: web_shutdown.clone(),
    };

    info!(
        mode = ?config.mode,
        tail = ?config.tail.mode,
        "Web server listening on {}",
        local_addr
    );
    let web = {
        let web_shutdown = web_shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(listener, state, web_shutdown.clone()).await {
                error!(error = %e, "Web server error");
                web_shutdown.cancel();
            }
        })
    };

    Ok(RunningService {
        web_shutdown,
        shutdown,
        grace_period: config.shutdown.grace_period,
        queue,
        registry,
        local_addr,
        web,
        writer,
        tail,
    })
}

impl RunningService {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolves once shutdown has begun, for whatever reason.
    pub async fn cancelled(&self) {
        self.web_shutdown.cancelled().await
    }

    /// Stop ingest, then let the writer drain and flush, then close watchers.
    ///
    /// The web server finishes its in-flight requests and the queue is
    /// closed before the writer is told to stop, so every record that got
    /// an accepted response is in the writer's final drain. Tasks still
    /// running after the grace period are aborted.
    pub async fn shutdown(self) -> Option<WriterStats> {
        info!("Shutting down");
        self.web_shutdown.cancel();

        let mut abort_handles: Vec<AbortHandle> =
            vec![self.web.abort_handle(), self.tail.abort_handle()];
        if let Some(writer) = &self.writer {
            abort_handles.push(writer.abort_handle());
        }

        let registry = self.registry.clone();
        let shutdown = self.shutdown.clone();
        let (web, writer, tail, queue) = (self.web, self.writer, self.tail, self.queue);
        let drain = async move {
            if let Err(e) = web.await {
                error!(error = %e, "Web server task join error");
            }
            if let Some(queue) = &queue {
                queue.close().await;
            }
            shutdown.cancel();

            let stats = match writer {
                Some(writer) => match writer.await {
                    Ok(stats) => {
                        info!(
                            flushed = stats.records_flushed,
                            failed_flushes = stats.failed_flushes,
                            "Writer task completed"
                        );
                        Some(stats)
                    }
                    Err(e) => {
                        error!(error = %e, "Writer task join error");
                        None
                    }
                },
                None => None,
            };

            registry.close_all().await;

            if let Err(e) = tail.await {
                error!(error = %e, "Tail task join error");
            }
            stats
        };

        match tokio::time::timeout(self.grace_period, drain).await {
            Ok(stats) => {
                info!("Shutdown complete");
                stats
            }
            Err(_) => {
                warn!(
                    grace_period = ?self.grace_period,
                    "Shutdown grace period elapsed, abandoning remaining tasks"
                );
                self.shutdown.cancel();
                for handle in abort_handles {
                    handle.abort();
                }
                None
            }
        }
    }
}

async fn open_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>, RunError> {
    ensure_parent_dir(&config.path)?;
    info!(backend = ?config.backend, path = %config.path.display(), "Initializing storage");

    let storage: Arc<dyn Storage> = match config.backend {
        StorageBackend::Duckdb => Arc::new(DuckDbStorage::new(&config.path)?),
        StorageBackend::Sqlite => Arc::new(SqliteStorage::new(&config.path)?),
    };
    storage.init_schema().await?;
    Ok(storage)
}

fn open_queue(config: &Config) -> Result<Arc<dyn DurableQueue>, RunError> {
    let queue: Arc<dyn DurableQueue> = match config.queue.backend {
        QueueBackend::Memory => {
            info!(capacity = config.queue.capacity, "Using in-memory queue");
            Arc::new(MemoryQueue::new(config.queue.capacity))
        }
        QueueBackend::Spool => {
            let path = config.queue.path.as_ref().ok_or_else(|| {
                ConfigError::Validation("queue.path is required for the spool backend".to_string())
            })?;
            ensure_parent_dir(path)?;
            info!(path = %path.display(), "Opening spool queue");
            Arc::new(SpoolQueue::open(path, config.queue.poll_interval)?)
        }
    };
    Ok(queue)
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
