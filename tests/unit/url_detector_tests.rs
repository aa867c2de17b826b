//! Unit tests for ready-URL detection.

use session_warden::orchestrator::url_detector::{detect_url, fallback_url};

#[test]
fn vite_local_line() {
    assert_eq!(
        detect_url("  ➜  Local:   http://localhost:5173/").as_deref(),
        Some("http://localhost:5173/")
    );
}

#[test]
fn framework_phrasings() {
    let cases = [
        ("ready on http://localhost:3000", "http://localhost:3000"),
        ("Server listening on http://0.0.0.0:8080", "http://0.0.0.0:8080"),
        ("Server running at http://127.0.0.1:4000/", "http://127.0.0.1:4000/"),
        ("- Local:        http://localhost:3001", "http://localhost:3001"),
    ];
    for (line, expected) in cases {
        assert_eq!(detect_url(line).as_deref(), Some(expected), "line: {line}");
    }
}

#[test]
fn generic_loopback_url_anywhere_in_line() {
    assert_eq!(
        detect_url("ready - started server on 0.0.0.0:3000, url: http://localhost:3000").as_deref(),
        Some("http://localhost:3000")
    );
}

#[test]
fn local_phrasing_wins_over_network_url() {
    let line = "Local: http://localhost:5173/  Network: http://192.168.1.20:5173/";
    assert_eq!(detect_url(line).as_deref(), Some("http://localhost:5173/"));
}

#[test]
fn lines_without_local_urls_are_ignored() {
    assert_eq!(detect_url("compiled successfully in 1.2s"), None);
    assert_eq!(detect_url("see https://nextjs.org/docs for details"), None);
}

#[test]
fn fallback_targets_localhost() {
    assert_eq!(fallback_url(3000), "http://localhost:3000");
}
