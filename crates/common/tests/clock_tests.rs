//! Clock Service Integration Tests
//!
//! # Test Scenarios
//! - Concurrent monotonic queries coalesce into few counter reads
//! - Callers served by one read observe identical timestamps
//! - Bounded waits are retried, never surfaced
//! - Shutdown is bounded, terminal and idempotent
//! - Callers queued at shutdown are released
//! - Worker spawn and counter read failures
//!
//! Run with: `cargo test -p common --test clock_tests`

use api::{ClockId, Timestamp};
use common::{ClockService, ClockSettings, Error, PerformanceCounter, StdSpawner, WorkerSpawner};
use common::{WorkerTask, clock::WORKER_NAME};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 1 MHz counter that advances one millisecond per read and takes
/// `read_delay` to answer
struct SlowCounter {
    reads: AtomicU64,
    read_delay: Duration,
    reading: AtomicBool,
}

impl SlowCounter {
    fn new(read_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reads: AtomicU64::new(0),
            read_delay,
            reading: AtomicBool::new(false),
        })
    }

    fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl PerformanceCounter for SlowCounter {
    fn frequency(&self) -> Option<u64> {
        Some(1_000_000)
    }

    fn counter(&self) -> Option<u64> {
        self.reading.store(true, Ordering::SeqCst);
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        thread::sleep(self.read_delay);
        Some(n * 1_000)
    }
}

/// Counter with a frequency but whose reads always fail
struct BrokenCounter;

impl PerformanceCounter for BrokenCounter {
    fn frequency(&self) -> Option<u64> {
        Some(1_000_000)
    }

    fn counter(&self) -> Option<u64> {
        None
    }
}

struct FailingSpawner;

impl WorkerSpawner for FailingSpawner {
    fn spawn(&self, _name: &str, _task: WorkerTask) -> std::io::Result<JoinHandle<()>> {
        Err(std::io::Error::other("thread limit reached"))
    }
}

fn settings(request_timeout_ms: u64, join_timeout_ms: u64) -> ClockSettings {
    ClockSettings {
        request_timeout_ms,
        join_timeout_ms,
        ..ClockSettings::default()
    }
}

fn query_concurrently(service: &Arc<ClockService>, threads: usize) -> Vec<Timestamp> {
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let service = Arc::clone(service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                service.now(ClockId::Monotonic).unwrap()
            })
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

// ============================================================================
// Coalescing
// ============================================================================

#[test]
fn test_overlapping_queries_share_counter_reads() {
    let counter = SlowCounter::new(Duration::from_millis(20));
    let service = Arc::new(
        ClockService::start(counter.clone(), &ClockSettings::default(), &StdSpawner).unwrap(),
    );

    let samples = query_concurrently(&service, 16);
    assert_eq!(samples.len(), 16);

    let reads = counter.reads();
    assert!(reads < 16, "expected coalescing, got {} reads", reads);

    // Every read produced a distinct value and was handed to at least one caller
    let mut distinct = samples.clone();
    distinct.sort();
    distinct.dedup();
    assert_eq!(distinct.len() as u64, reads);

    service.shutdown();
    let stats = service.stats();
    assert_eq!(stats.hardware_reads, reads);
    assert_eq!(stats.requests_served, 16);
}

#[test]
fn test_batch_members_see_identical_timestamps() {
    let counter = SlowCounter::new(Duration::from_millis(30));
    let service = Arc::new(
        ClockService::start(counter.clone(), &ClockSettings::default(), &StdSpawner).unwrap(),
    );

    let samples = query_concurrently(&service, 12);

    let mut groups: HashMap<Timestamp, usize> = HashMap::new();
    for sample in &samples {
        *groups.entry(*sample).or_default() += 1;
    }

    assert_eq!(groups.values().sum::<usize>(), 12);
    assert!(
        groups.values().any(|size| *size > 1),
        "no two callers shared a sample: {:?}",
        groups
    );
}

#[test]
fn test_sequential_queries_are_monotonic() {
    let counter = SlowCounter::new(Duration::ZERO);
    let service = ClockService::start(counter.clone(), &ClockSettings::default(), &StdSpawner)
        .unwrap();

    let mut previous = Timestamp::default();
    for _ in 0..50 {
        let now = service.now(ClockId::Monotonic).unwrap();
        assert!(now > previous);
        previous = now;
    }
    assert_eq!(counter.reads(), 50);
    assert_eq!(service.last_sample(), Some(previous));
}

#[test]
fn test_short_request_timeout_is_retried() {
    let counter = SlowCounter::new(Duration::from_millis(150));
    let service = ClockService::start(counter, &settings(5, 1000), &StdSpawner).unwrap();

    // The worker needs far longer than one wait; the caller keeps waiting
    let sample = service.now(ClockId::Monotonic).unwrap();
    assert_eq!(sample, Timestamp::new(0, 1_000_000));
}

#[test]
fn test_failed_counter_read_falls_back_to_realtime() {
    let service =
        ClockService::start(Arc::new(BrokenCounter), &ClockSettings::default(), &StdSpawner)
            .unwrap();

    assert!(service.has_monotonic_source());
    let sample = service.now(ClockId::Monotonic).unwrap();
    assert!(sample.seconds > 1_600_000_000);
    assert_eq!(service.stats().hardware_reads, 0);
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn test_shutdown_twice_is_harmless() {
    let counter = SlowCounter::new(Duration::ZERO);
    let service =
        ClockService::start(counter, &ClockSettings::default(), &StdSpawner).unwrap();
    service.now(ClockId::Monotonic).unwrap();

    service.shutdown();
    assert!(service.is_stopped());
    service.shutdown();
    assert!(service.is_stopped());

    assert!(matches!(
        service.now(ClockId::Monotonic),
        Err(Error::ClockStopped)
    ));
    // Realtime does not depend on the worker
    assert!(service.now(ClockId::Realtime).is_ok());
}

#[test]
fn test_shutdown_wait_is_bounded() {
    let counter = SlowCounter::new(Duration::from_millis(500));
    let service = Arc::new(
        ClockService::start(counter.clone(), &settings(100, 20), &StdSpawner).unwrap(),
    );

    let caller = {
        let service = Arc::clone(&service);
        thread::spawn(move || service.now(ClockId::Monotonic))
    };

    while !counter.reading.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }

    let started = Instant::now();
    service.shutdown();
    assert!(started.elapsed() < Duration::from_millis(400));

    // The in-flight read still completes and answers its caller
    assert!(caller.join().unwrap().is_ok());
}

#[test]
fn test_shutdown_releases_queued_callers() {
    let counter = SlowCounter::new(Duration::from_millis(300));
    let service = Arc::new(
        ClockService::start(counter.clone(), &settings(20, 2000), &StdSpawner).unwrap(),
    );

    let spawn_caller = |service: &Arc<ClockService>| {
        let service = Arc::clone(service);
        thread::spawn(move || service.now(ClockId::Monotonic))
    };

    let first = spawn_caller(&service);
    while !counter.reading.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }

    // Queue behind the read in progress
    let queued: Vec<_> = (0..3).map(|_| spawn_caller(&service)).collect();
    thread::sleep(Duration::from_millis(50));

    service.shutdown();
    assert!(service.is_stopped());

    assert!(first.join().unwrap().is_ok());
    for caller in queued {
        // Either answered before the close or told the clock stopped
        match caller.join().unwrap() {
            Ok(_) | Err(Error::ClockStopped) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(counter.reads(), 1);
}

#[test]
fn test_detached_worker_is_not_reported_stopped() {
    let counter = SlowCounter::new(Duration::from_millis(300));
    let service = Arc::new(
        ClockService::start(counter.clone(), &settings(100, 10), &StdSpawner).unwrap(),
    );

    let caller = {
        let service = Arc::clone(&service);
        thread::spawn(move || service.now(ClockId::Monotonic))
    };
    while !counter.reading.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }

    service.shutdown();
    assert!(!service.is_stopped());

    assert!(caller.join().unwrap().is_ok());
    let deadline = Instant::now() + Duration::from_secs(2);
    while !service.is_stopped() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(service.is_stopped());

    // A second shutdown does not wait on the detached worker again
    service.shutdown();
}

#[test]
fn test_idle_worker_exits_promptly() {
    let counter = SlowCounter::new(Duration::ZERO);
    let service =
        ClockService::start(counter, &ClockSettings::default(), &StdSpawner).unwrap();
    assert!(!service.is_stopped());

    let started = Instant::now();
    drop(service);
    assert!(started.elapsed() < Duration::from_millis(500));
}

// ============================================================================
// Startup failures
// ============================================================================

#[test]
fn test_spawn_failure_is_reported() {
    let counter = SlowCounter::new(Duration::ZERO);
    let result = ClockService::start(counter, &ClockSettings::default(), &FailingSpawner);
    assert!(matches!(result, Err(Error::Worker(_))));
}

#[test]
fn test_zero_queue_capacity_is_reported() {
    let counter = SlowCounter::new(Duration::ZERO);
    let settings = ClockSettings {
        queue_capacity: 0,
        ..ClockSettings::default()
    };
    let result = ClockService::start(counter, &settings, &StdSpawner);
    assert!(matches!(result, Err(Error::Channel(_))));
}

#[test]
fn test_worker_thread_is_named() {
    struct NameCheckingSpawner(Arc<std::sync::Mutex<Option<String>>>);

    impl WorkerSpawner for NameCheckingSpawner {
        fn spawn(&self, name: &str, task: WorkerTask) -> std::io::Result<JoinHandle<()>> {
            *self.0.lock().unwrap() = Some(name.to_string());
            StdSpawner.spawn(name, task)
        }
    }

    let seen = Arc::new(std::sync::Mutex::new(None));
    let counter = SlowCounter::new(Duration::ZERO);
    let _service = ClockService::start(
        counter,
        &ClockSettings::default(),
        &NameCheckingSpawner(seen.clone()),
    )
    .unwrap();

    assert_eq!(seen.lock().unwrap().as_deref(), Some(WORKER_NAME));
}
