//! Unit tests for bounded per-session log capture.

use session_warden::log_manager::{LogManager, LogQuery, RenderOptions};
use session_warden::models::log::LogStream;

fn lines(manager: &LogManager, session: u32, query: LogQuery) -> Vec<String> {
    manager
        .get_logs(session, query)
        .into_iter()
        .map(|e| e.line)
        .collect()
}

#[test]
fn chunks_split_into_lines_dropping_blanks() {
    let logs = LogManager::new(100);
    logs.append(1, LogStream::Stdout, "one\r\ntwo\n\nthree\n");

    assert_eq!(lines(&logs, 1, LogQuery::default()), ["one", "two", "three"]);
    assert_eq!(logs.len(1), 3);
}

#[test]
fn oldest_lines_are_evicted_at_capacity() {
    let logs = LogManager::new(3);
    for i in 0..5 {
        logs.append(1, LogStream::Stdout, &format!("line {i}"));
    }

    assert_eq!(logs.len(1), 3);
    assert_eq!(
        lines(&logs, 1, LogQuery::default()),
        ["line 2", "line 3", "line 4"]
    );
}

#[test]
fn query_returns_most_recent_lines_in_order() {
    let logs = LogManager::new(100);
    logs.append(1, LogStream::Stdout, "a\nb\nc\nd");

    let query = LogQuery {
        lines: 2,
        stream: None,
    };
    assert_eq!(lines(&logs, 1, query), ["c", "d"]);
}

#[test]
fn query_filters_by_stream() {
    let logs = LogManager::new(100);
    logs.append(1, LogStream::Stdout, "out 1");
    logs.append(1, LogStream::Stderr, "err 1");
    logs.append(1, LogStream::Stdout, "out 2");

    let query = LogQuery {
        lines: 50,
        stream: Some(LogStream::Stderr),
    };
    assert_eq!(lines(&logs, 1, query), ["err 1"]);
}

#[test]
fn sessions_are_isolated() {
    let logs = LogManager::new(100);
    logs.append(1, LogStream::Stdout, "mine");

    assert!(logs.get_logs(2, LogQuery::default()).is_empty());
    assert!(logs.is_empty(2));
}

#[test]
fn renders_with_optional_prefixes() {
    let logs = LogManager::new(100);
    logs.append(1, LogStream::Stdout, "ready");
    logs.append(1, LogStream::Stderr, "warning");

    let plain = logs.get_logs_as_string(1, LogQuery::default(), RenderOptions::default());
    assert_eq!(plain, "ready\nwarning\n");

    let tagged = logs.get_logs_as_string(
        1,
        LogQuery::default(),
        RenderOptions {
            timestamps: false,
            stream_tags: true,
        },
    );
    assert_eq!(tagged, "[out] ready\n[err] warning\n");

    let stamped = logs.get_logs_as_string(
        1,
        LogQuery::default(),
        RenderOptions {
            timestamps: true,
            stream_tags: false,
        },
    );
    for (line, expected) in stamped.lines().zip(["ready", "warning"]) {
        let (stamp, rest) = line.split_once(' ').unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok(), "bad stamp in {line}");
        assert_eq!(rest, expected);
    }
}

#[test]
fn clear_drops_session_lines() {
    let logs = LogManager::new(100);
    logs.append(7, LogStream::Stdout, "hello");
    logs.clear(7);

    assert_eq!(logs.len(7), 0);
    assert!(logs.get_logs(7, LogQuery::default()).is_empty());
}
