use greenlight::{
    ClientRegistry, Decision, DynamicConfig, ManualClock, RateLimitGate, RateLimitSettings,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn gate(clock: &ManualClock, burst: u32, rate: f64, idle: Duration) -> RateLimitGate {
    let settings =
        DynamicConfig::new(RateLimitSettings { enabled: true, refill_per_second: rate, burst });
    RateLimitGate::new(Arc::new(ClientRegistry::new(settings, idle).with_clock(clock.clone())))
}

fn allowed(gate: &RateLimitGate, client: &str) -> bool {
    gate.check(Some(client)).unwrap().is_allowed()
}

#[test]
fn burst_then_refill_sequence() {
    let clock = ManualClock::new();
    let gate = gate(&clock, 4, 2.0, Duration::from_secs(180));

    for _ in 0..4 {
        assert!(allowed(&gate, "192.0.2.1"));
    }
    assert!(!allowed(&gate, "192.0.2.1"));

    clock.advance(Duration::from_millis(500));
    assert!(allowed(&gate, "192.0.2.1"));
    assert!(!allowed(&gate, "192.0.2.1"));
}

#[test]
fn denial_reports_time_to_next_token() {
    let clock = ManualClock::new();
    let gate = gate(&clock, 1, 2.0, Duration::from_secs(180));
    assert!(allowed(&gate, "a"));
    match gate.check(Some("a")).unwrap() {
        Decision::Denied { wait } => assert_eq!(wait, Duration::from_millis(500)),
        other => panic!("expected denial, got {other:?}"),
    }
}

#[test]
fn clients_do_not_share_buckets() {
    let clock = ManualClock::new();
    let gate = gate(&clock, 2, 1.0, Duration::from_secs(180));
    assert!(allowed(&gate, "a"));
    assert!(allowed(&gate, "a"));
    assert!(!allowed(&gate, "a"));
    assert!(allowed(&gate, "b"));
    assert_eq!(gate.registry().len(), 2);
}

#[test]
fn evicted_client_comes_back_with_a_full_bucket() {
    let clock = ManualClock::new();
    let gate = gate(&clock, 3, 0.001, Duration::from_secs(180));
    for _ in 0..3 {
        assert!(allowed(&gate, "sleepy"));
    }
    assert!(!allowed(&gate, "sleepy"));

    clock.advance(Duration::from_secs(181));
    assert_eq!(gate.registry().sweep(), 1);
    assert!(!gate.registry().contains("sleepy"));

    for _ in 0..3 {
        assert!(allowed(&gate, "sleepy"));
    }
}

#[test]
fn recently_seen_client_survives_the_sweep() {
    let clock = ManualClock::new();
    let gate = gate(&clock, 1, 1.0, Duration::from_secs(180));
    assert!(allowed(&gate, "busy"));
    clock.advance(Duration::from_secs(179));
    assert!(allowed(&gate, "busy"));
    clock.advance(Duration::from_secs(179));
    assert_eq!(gate.registry().sweep(), 0);
    assert!(gate.registry().contains("busy"));
}

#[test]
fn concurrent_checks_never_admit_more_than_capacity() {
    const THREADS: usize = 16;
    const PER_THREAD: usize = 50;
    const BURST: u32 = 10;

    // Frozen clock: no refill happens during the run.
    let clock = ManualClock::new();
    let gate = gate(&clock, BURST, 1.0, Duration::from_secs(180));
    let admitted = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let gate = gate.clone();
            let admitted = admitted.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                for _ in 0..PER_THREAD {
                    if allowed(&gate, "shared") {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), BURST as usize);
}

#[test]
fn disabled_gate_allows_everything_without_state() {
    let clock = ManualClock::new();
    let gate = gate(&clock, 1, 1.0, Duration::from_secs(180));
    gate.set_enabled(false).unwrap();

    for _ in 0..100 {
        assert_eq!(gate.check(Some("anyone")).unwrap(), Decision::Bypassed);
    }
    assert_eq!(gate.check(None).unwrap(), Decision::Bypassed);
    assert!(gate.registry().is_empty());

    gate.set_enabled(true).unwrap();
    assert!(allowed(&gate, "anyone"));
    assert!(!allowed(&gate, "anyone"));
}

#[test]
fn missing_identity_is_an_error_when_enabled() {
    let clock = ManualClock::new();
    let gate = gate(&clock, 1, 1.0, Duration::from_secs(180));
    assert!(gate.check(None).is_err());
    assert!(gate.check(Some("")).is_err());
    assert!(gate.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn background_sweeper_evicts_idle_clients() {
    let clock = ManualClock::new();
    let gate = gate(&clock, 1, 1.0, Duration::from_secs(3));
    assert!(allowed(&gate, "idle"));

    let sweeper = gate.registry().spawn_sweeper(Duration::from_secs(1));
    clock.advance(Duration::from_secs(4));
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(gate.registry().is_empty());
    sweeper.abort();
}
