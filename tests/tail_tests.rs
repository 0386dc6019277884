use futures::StreamExt;
use logstream::cli::run::{start, RunningService};
use logstream::config::types::{Config, Mode, StorageBackend, StorageConfig, TailMode};
use logstream::record::LogRecord;
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const API_KEY: &str = "tail-key";

fn test_config(dir: &TempDir, tail: TailMode) -> Config {
    let mut config = Config::default();
    config.mode = Mode::Unified;
    config.auth.api_keys = vec![API_KEY.to_string()];
    config.storage = StorageConfig {
        backend: StorageBackend::Sqlite,
        path: dir.path().join("logs.db"),
    };
    config.tail.mode = tail;
    config.tail.poll_interval = Duration::from_millis(100);
    config
}

async fn start_service(config: &Config) -> (RunningService, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let service = start(config, listener).await.unwrap();
    let addr = service.local_addr().to_string();
    (service, addr)
}

async fn ingest(client: &reqwest::Client, addr: &str, message: &str) {
    let status = client
        .post(format!("http://{}/ingest", addr))
        .header("Authorization", API_KEY)
        .json(&json!({"service": "api", "level": "info", "message": message}))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, 202);
}

/// Read websocket text frames until `count` records arrived.
async fn collect_records<S>(stream: &mut S, count: usize) -> Vec<LogRecord>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut records = Vec::new();
    while records.len() < count {
        let frame = timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for tail")
            .expect("websocket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            let batch: Vec<LogRecord> = serde_json::from_str(&text).unwrap();
            records.extend(batch);
        }
    }
    records
}

#[tokio::test]
async fn test_push_tail_preserves_acceptance_order() {
    let dir = TempDir::new().unwrap();
    let (service, addr) = start_service(&test_config(&dir, TailMode::Push)).await;
    let client = reqwest::Client::new();

    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    // Let the server register the watcher.
    sleep(Duration::from_millis(100)).await;

    for i in 0..30 {
        ingest(&client, &addr, &format!("event {}", i)).await;
    }

    let records = collect_records(&mut socket, 30).await;
    let messages: Vec<String> = records.into_iter().map(|r| r.message).collect();
    let expected: Vec<String> = (0..30).map(|i| format!("event {}", i)).collect();
    assert_eq!(messages, expected);

    service.shutdown().await;
}

#[tokio::test]
async fn test_late_watcher_does_not_see_earlier_records() {
    let dir = TempDir::new().unwrap();
    let (service, addr) = start_service(&test_config(&dir, TailMode::Push)).await;
    let client = reqwest::Client::new();

    ingest(&client, &addr, "before").await;

    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    ingest(&client, &addr, "after").await;

    let records = collect_records(&mut socket, 1).await;
    assert_eq!(records[0].message, "after");

    service.shutdown().await;
}

#[tokio::test]
async fn test_poll_tail_streams_new_records() {
    let dir = TempDir::new().unwrap();
    let (service, addr) = start_service(&test_config(&dir, TailMode::Poll)).await;
    let client = reqwest::Client::new();

    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    ingest(&client, &addr, "polled one").await;
    ingest(&client, &addr, "polled two").await;

    let records = collect_records(&mut socket, 2).await;
    let messages: Vec<&str> = records.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(messages, vec!["polled one", "polled two"]);

    service.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_watchers() {
    let dir = TempDir::new().unwrap();
    let (service, addr) = start_service(&test_config(&dir, TailMode::Push)).await;

    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    service.shutdown().await;

    let end = timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(end.is_ok());
}
