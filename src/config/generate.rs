pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGSTREAM CONFIGURATION
# =============================================================================
# Producers POST structured log records to /ingest. Records are buffered and
# written to the store in batches, queried through /logs and /stats, and
# streamed live to websocket clients on /ws.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logstream/config.yml
#   3. /etc/logstream/config.yml
#
# Values of the form $env{NAME} are replaced with environment variables.

# 'buffered': ingest enqueues, the batch writer persists in the background
# 'unified':  ingest writes each record to the store before answering
mode: buffered

# =============================================================================
# WEB SERVER SETTINGS
# =============================================================================

web:
  listen: 127.0.0.1:8080
  # Set to 0.0.0.0:8080 to allow external connections

# =============================================================================
# AUTHENTICATION
# =============================================================================
# Producers send one of these keys in the Authorization header, optionally
# prefixed with "Bearer ".

auth:
  required: true
  api_keys:
    - $env{LOGSTREAM_API_KEY}

# =============================================================================
# QUEUE SETTINGS (buffered mode)
# =============================================================================

queue:
  # 'memory': bounded in-process queue, lost on restart
  # 'spool':  SQLite spool file, uncommitted records survive a restart
  backend: spool
  path: ~/.local/share/logstream/spool.db
  capacity: 10000
  poll_interval: 100ms

# =============================================================================
# STORAGE SETTINGS
# =============================================================================

storage:
  # 'duckdb' (analytical) or 'sqlite' (transactional)
  backend: duckdb
  path: ~/.local/share/logstream/logs.duckdb

# =============================================================================
# BATCH WRITER SETTINGS (buffered mode)
# =============================================================================

writer:
  # Records per batch insert
  batch_size: 1000
  # Max time before flushing (or retrying) an incomplete batch
  flush_interval: 2s
  # Pause after a failed queue read
  receive_backoff: 1s

# =============================================================================
# LIVE TAIL SETTINGS
# =============================================================================

tail:
  # 'push': accepted records go straight to watchers
  # 'poll': watchers are fed by re-querying the store
  mode: push
  poll_interval: 2s
  poll_lookback: 5s
  poll_limit: 100
  # A watcher with this many undelivered messages is disconnected
  watcher_buffer: 256
  dispatch_buffer: 1024
  max_batch: 100

# =============================================================================
# QUERY SETTINGS
# =============================================================================

query:
  default_limit: 100
  max_limit: 5000

shutdown:
  grace_period: 5s
"#
    .to_string()
}
