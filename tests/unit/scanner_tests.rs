//! Unit tests for listening-socket scanning and change detection.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use session_warden::config::{PortConfig, ScannerConfig};
use session_warden::models::process::SystemProcess;
use session_warden::ports::scanner::{ListenerSource, PortScanner, PresentationFilter};
use session_warden::{AppError, Result};

/// Scripted scan results; `None` simulates a failing introspection tool.
#[derive(Default)]
struct ScriptedSource {
    scans: Mutex<VecDeque<Option<Vec<SystemProcess>>>>,
}

impl ScriptedSource {
    fn push(&self, rows: Option<Vec<SystemProcess>>) {
        self.scans.lock().unwrap().push_back(rows);
    }
}

impl ListenerSource for ScriptedSource {
    fn list_listeners(&self) -> Pin<Box<dyn Future<Output = Result<Vec<SystemProcess>>> + Send + '_>> {
        let next = self.scans.lock().unwrap().pop_front();
        Box::pin(async move {
            match next {
                Some(Some(rows)) => Ok(rows),
                Some(None) => Err(AppError::Scanner("lsof: permission denied".into())),
                None => Ok(Vec::new()),
            }
        })
    }
}

fn row(port: u16, pid: u32) -> SystemProcess {
    SystemProcess {
        pid,
        command: "node".into(),
        port,
        address: "*".into(),
        user: "dev".into(),
        managed: false,
    }
}

fn scanner(source: &Arc<ScriptedSource>) -> PortScanner {
    PortScanner::new(
        Arc::clone(source) as Arc<dyn ListenerSource>,
        PresentationFilter::from_config(&PortConfig::default(), &ScannerConfig::default()),
        Duration::from_secs(3),
    )
}

fn counting_callback(scanner: &PortScanner) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&count);
    scanner.set_on_change(Arc::new(move |_: &[SystemProcess]| {
        hits.fetch_add(1, Ordering::SeqCst);
    }));
    count
}

#[tokio::test]
async fn callback_fires_once_when_pid_behind_port_changes() {
    let source = Arc::new(ScriptedSource::default());
    source.push(Some(vec![row(3000, 111)]));
    source.push(Some(vec![row(3000, 222)]));
    source.push(Some(vec![row(3000, 222)]));
    let scanner = scanner(&source);

    assert!(scanner.scan_once().await.unwrap());
    let count = counting_callback(&scanner);

    assert!(scanner.scan_once().await.unwrap());
    assert_eq!(count.load(Ordering::SeqCst), 1);

    assert!(!scanner.scan_once().await.unwrap());
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(scanner.all()[0].pid, 222);
}

#[tokio::test]
async fn identical_rescan_never_fires() {
    let source = Arc::new(ScriptedSource::default());
    source.push(Some(vec![row(3000, 1), row(5432, 2)]));
    source.push(Some(vec![row(5432, 2), row(3000, 1)]));
    let scanner = scanner(&source);

    scanner.scan_once().await.unwrap();
    let count = counting_callback(&scanner);
    scanner.scan_once().await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn duplicate_ports_keep_first_row() {
    let source = Arc::new(ScriptedSource::default());
    source.push(Some(vec![row(3000, 1), row(3000, 2), row(3001, 3)]));
    let scanner = scanner(&source);

    scanner.scan_once().await.unwrap();
    let all = scanner.all();

    assert_eq!(all.len(), 2);
    assert_eq!(all[0].pid, 1);
}

#[tokio::test]
async fn failure_keeps_last_snapshot_and_flags_degraded() {
    let source = Arc::new(ScriptedSource::default());
    source.push(Some(vec![row(3000, 1)]));
    source.push(None);
    source.push(Some(vec![row(3000, 1)]));
    let scanner = scanner(&source);

    scanner.scan_once().await.unwrap();
    assert!(!scanner.is_degraded());

    let err = scanner.scan_once().await.unwrap_err();
    assert!(matches!(err, AppError::Scanner(_)));
    assert!(scanner.is_degraded());
    assert_eq!(scanner.all().len(), 1);

    scanner.scan_once().await.unwrap();
    assert!(!scanner.is_degraded());
}

#[tokio::test]
async fn managed_pids_are_tagged_and_always_shown() {
    let source = Arc::new(ScriptedSource::default());
    source.push(Some(vec![
        row(3000, 1),
        row(5432, 2),
        row(9999, 3),
        row(9998, 4),
        row(8080, 5),
    ]));
    let scanner = scanner(&source);
    scanner.register_managed_pid(3);
    scanner.scan_once().await.unwrap();

    let shown: Vec<(u16, bool)> = scanner.filtered().iter().map(|r| (r.port, r.managed)).collect();
    assert_eq!(
        shown,
        vec![(3000, false), (5432, false), (8080, false), (9999, true)]
    );
    assert_eq!(scanner.all().len(), 5);

    scanner.unregister_managed_pid(3);
    assert!(scanner.filtered().iter().all(|r| r.port != 9999));
}
