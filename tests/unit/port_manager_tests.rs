//! Unit tests for per-session port assignment.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use session_warden::ports::manager::{PortManager, PortProbe};
use session_warden::AppError;

/// Probe that counts calls and reports configured ports as bound.
#[derive(Default)]
struct CountingProbe {
    calls: AtomicUsize,
    bound: Mutex<HashSet<u16>>,
}

impl CountingProbe {
    fn with_bound(ports: &[u16]) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            bound: Mutex::new(ports.iter().copied().collect()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PortProbe for CountingProbe {
    fn is_free(&self, port: u16) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        !self.bound.lock().unwrap().contains(&port)
    }
}

fn manager(range: std::ops::RangeInclusive<u16>, probe: &Arc<CountingProbe>) -> PortManager {
    PortManager::with_probe(range, Arc::clone(probe) as Arc<dyn PortProbe>)
}

#[test]
fn assignment_is_idempotent_without_reprobing() {
    let probe = Arc::new(CountingProbe::default());
    let ports = manager(3000..=3099, &probe);

    let first = ports.assign_port(1, None).unwrap();
    let calls = probe.calls();
    let second = ports.assign_port(1, Some(3050)).unwrap();

    assert_eq!(first, 3000);
    assert_eq!(first, second);
    assert_eq!(probe.calls(), calls);
}

#[test]
fn free_preferred_port_wins() {
    let probe = Arc::new(CountingProbe::default());
    let ports = manager(3000..=3099, &probe);

    assert_eq!(ports.assign_port(1, Some(3042)).unwrap(), 3042);
}

#[test]
fn preferred_port_held_by_other_session_falls_back_to_scan() {
    let probe = Arc::new(CountingProbe::default());
    let ports = manager(3000..=3099, &probe);

    assert_eq!(ports.assign_port(1, Some(3000)).unwrap(), 3000);
    assert_eq!(ports.assign_port(2, Some(3000)).unwrap(), 3001);
}

#[test]
fn bound_ports_are_skipped() {
    let probe = Arc::new(CountingProbe::with_bound(&[3000, 3001, 3005]));
    let ports = manager(3000..=3099, &probe);

    assert_eq!(ports.assign_port(1, Some(3005)).unwrap(), 3002);
}

#[test]
fn exhaustion_is_a_named_error() {
    let probe = Arc::new(CountingProbe::default());
    let ports = manager(3000..=3001, &probe);

    ports.assign_port(1, None).unwrap();
    ports.assign_port(2, None).unwrap();
    let err = ports.assign_port(3, None).unwrap_err();

    assert!(matches!(err, AppError::PortsExhausted(_)));
    assert!(err.to_string().starts_with("no ports available"));
}

#[test]
fn released_port_is_reassignable() {
    let probe = Arc::new(CountingProbe::default());
    let ports = manager(3000..=3000, &probe);

    assert_eq!(ports.assign_port(1, None).unwrap(), 3000);
    ports.release_port(1);
    ports.release_port(1);
    assert_eq!(ports.port_for(1), None);
    assert_eq!(ports.assign_port(2, None).unwrap(), 3000);
}

#[test]
fn assignments_are_sorted_by_session() {
    let probe = Arc::new(CountingProbe::default());
    let ports = manager(3000..=3099, &probe);

    ports.assign_port(9, None).unwrap();
    ports.assign_port(2, None).unwrap();

    assert_eq!(ports.assignments(), vec![(2, 3001), (9, 3000)]);
    assert_eq!(ports.range(), 3000..=3099);
}

#[test]
fn concurrent_assignments_over_full_range_are_distinct() {
    const N: u16 = 16;
    let probe = Arc::new(CountingProbe::default());
    let ports = manager(5000..=5000 + N - 1, &probe);

    let assigned: Vec<u16> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..u32::from(N))
            .map(|session| {
                let ports = &ports;
                scope.spawn(move || ports.assign_port(session, None).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let distinct: HashSet<u16> = assigned.iter().copied().collect();
    assert_eq!(distinct.len(), usize::from(N));
    assert!(assigned.iter().all(|p| (5000..5000 + N).contains(p)));
}
