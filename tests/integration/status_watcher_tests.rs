//! Integration tests for the reader-side status watcher against a real
//! directory.

use std::time::Duration;

use session_warden::config::StatusConfig;
use session_warden::models::server::{ServerStatus, ServerStatusEntry};
use session_warden::models::status::StatusFile;
use session_warden::status::file::StatusWriter;
use session_warden::status::watcher::StatusWatcher;
use tokio::sync::mpsc;

fn fast_config() -> StatusConfig {
    StatusConfig {
        debounce_ms: 20,
        poll_interval_ms: 100,
        ..StatusConfig::default()
    }
}

fn doc_with_session(session_id: u32) -> StatusFile {
    StatusFile {
        servers: vec![ServerStatusEntry {
            session_id,
            status: ServerStatus::Running,
            port: Some(3000),
            url: Some("http://localhost:3000".into()),
            pid: Some(4242),
            started_at: None,
            uptime: Some(1),
        }],
        ..StatusFile::empty()
    }
}

async fn next_doc(rx: &mut mpsc::Receiver<StatusFile>) -> StatusFile {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("document before timeout")
        .expect("watcher still running")
}

#[tokio::test]
async fn existing_document_is_delivered_first() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("status.json");
    let doc = doc_with_session(1);
    StatusWriter::new(&path).write(&doc).unwrap();

    let (watcher, mut rx) = StatusWatcher::spawn(path, &fast_config());
    assert_eq!(next_doc(&mut rx).await, doc);

    watcher.shutdown().await;
}

#[tokio::test]
async fn every_rewrite_is_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("status.json");
    let writer = StatusWriter::new(&path);

    let (watcher, mut rx) = StatusWatcher::spawn(path, &fast_config());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let first = doc_with_session(1);
    writer.write(&first).unwrap();
    assert_eq!(next_doc(&mut rx).await, first);

    let second = doc_with_session(2);
    writer.write(&second).unwrap();
    assert_eq!(next_doc(&mut rx).await, second);

    watcher.shutdown().await;
}

#[tokio::test]
async fn missing_directory_is_picked_up_by_polling() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("later").join("status.json");

    let (watcher, mut rx) = StatusWatcher::spawn(path.clone(), &fast_config());
    tokio::time::sleep(Duration::from_millis(150)).await;

    let doc = doc_with_session(3);
    StatusWriter::new(&path).write(&doc).unwrap();
    assert_eq!(next_doc(&mut rx).await, doc);

    watcher.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_the_channel() {
    let dir = tempfile::tempdir().unwrap();
    let (watcher, mut rx) = StatusWatcher::spawn(dir.path().join("status.json"), &fast_config());

    watcher.shutdown().await;
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn burst_of_writes_is_read_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("status.json");
    let writer = StatusWriter::new(&path);
    // Long poll interval so only change notifications trigger reads.
    let config = StatusConfig {
        debounce_ms: 300,
        poll_interval_ms: 60_000,
        ..StatusConfig::default()
    };

    let (watcher, mut rx) = StatusWatcher::spawn(path, &config);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let burst: Vec<StatusFile> = (1..=5).map(doc_with_session).collect();
    for doc in &burst {
        writer.write(doc).unwrap();
    }

    assert_eq!(next_doc(&mut rx).await, burst[4]);
    let extra = tokio::time::timeout(Duration::from_millis(700), rx.recv()).await;
    assert!(extra.is_err(), "burst produced more than one document: {extra:?}");

    watcher.shutdown().await;
}

#[tokio::test]
async fn unparseable_file_is_retried_until_valid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("status.json");
    let config = StatusConfig {
        read_attempts: 2,
        read_backoff_ms: 5,
        ..fast_config()
    };

    let (watcher, mut rx) = StatusWatcher::spawn(path.clone(), &config);
    tokio::time::sleep(Duration::from_millis(100)).await;

    std::fs::write(&path, "{\"servers\": [").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(rx.try_recv().is_err());

    // Completed in place, as a writer without rename would leave it.
    let doc = doc_with_session(9);
    std::fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();
    assert_eq!(next_doc(&mut rx).await, doc);

    watcher.shutdown().await;
}
