//! Unit tests for the status document format and file round-trip.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use session_warden::models::process::SystemProcess;
use session_warden::models::server::{ServerStatus, ServerStatusEntry};
use session_warden::models::status::StatusFile;
use session_warden::status::file::{read_status, read_status_with_retry, StatusWriter};
use session_warden::AppError;

fn sample() -> StatusFile {
    StatusFile {
        servers: vec![ServerStatusEntry {
            session_id: 7,
            status: ServerStatus::Running,
            pid: Some(4242),
            port: Some(3000),
            url: Some("http://localhost:3000".into()),
            started_at: Some(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()),
            uptime: Some(12),
        }],
        system_processes: vec![SystemProcess {
            pid: 812,
            command: "postgres".into(),
            port: 5432,
            address: "localhost".into(),
            user: "_pg".into(),
            managed: false,
        }],
        updated_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 17).unwrap(),
        scanner_degraded: false,
    }
}

#[test]
fn write_then_read_is_equal() {
    let dir = tempfile::tempdir().unwrap();
    let writer = StatusWriter::new(dir.path().join("nested").join("status.json"));

    writer.write(&sample()).unwrap();
    let read = read_status(writer.path()).unwrap();

    assert_eq!(read, Some(sample()));
}

#[test]
fn rewrite_replaces_whole_document() {
    let dir = tempfile::tempdir().unwrap();
    let writer = StatusWriter::new(dir.path().join("status.json"));

    writer.write(&sample()).unwrap();
    let mut next = sample();
    next.servers.clear();
    writer.write(&next).unwrap();

    assert_eq!(read_status(writer.path()).unwrap(), Some(next));
    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 1);
}

#[test]
fn keys_are_camel_case() {
    let json = serde_json::to_value(sample()).unwrap();

    assert!(json.get("systemProcesses").is_some());
    assert!(json.get("updatedAt").is_some());
    assert_eq!(json["scannerDegraded"], false);
    let server = &json["servers"][0];
    assert_eq!(server["sessionId"], 7);
    assert_eq!(server["status"], "running");
    assert!(server.get("startedAt").is_some());
}

#[test]
fn degraded_flag_defaults_when_absent() {
    let raw = r#"{"servers":[],"systemProcesses":[],"updatedAt":"2026-01-02T03:04:05Z"}"#;
    let doc: StatusFile = serde_json::from_str(raw).unwrap();
    assert!(!doc.scanner_degraded);
}

#[test]
fn stopped_server_has_null_live_fields() {
    let raw = r#"{"sessionId":3,"status":"stopped","pid":null,"port":null,"url":null,"startedAt":null,"uptime":null}"#;
    let entry: ServerStatusEntry = serde_json::from_str(raw).unwrap();
    assert_eq!(entry.status, ServerStatus::Stopped);
    assert_eq!(entry.uptime, None);
}

#[test]
fn missing_file_reads_as_none() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(read_status(&dir.path().join("status.json")).unwrap(), None);
}

#[tokio::test]
async fn torn_file_fails_after_retries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("status.json");
    std::fs::write(&path, "{\"servers\": [").unwrap();

    let result = read_status_with_retry(&path, 3, Duration::from_millis(5)).await;
    assert!(matches!(result, Err(AppError::StatusFile(_))));
}

#[tokio::test]
async fn retry_recovers_once_writer_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("status.json");
    std::fs::write(&path, "{\"servers\": [").unwrap();

    let writer = StatusWriter::new(&path);
    let fixer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        writer.write(&sample()).unwrap();
    });

    let result = read_status_with_retry(&path, 10, Duration::from_millis(20)).await;
    fixer.await.unwrap();
    assert_eq!(result.unwrap(), Some(sample()));
}
