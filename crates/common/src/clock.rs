//! Clock synchronization service
//!
//! Only one designated thread is trusted to query the hardware performance
//! counter. This module runs that thread and lets any other thread obtain a
//! monotonic timestamp from it:
//!
//! - callers queue a request and wait for the reply with a bounded timeout,
//!   retrying the wait when it expires
//! - the worker answers every request queued at wake time with a single
//!   counter read, so callers served together see identical timestamps
//! - when the platform has no performance counter, monotonic queries fall
//!   back to the realtime clock and no worker is started

use crate::channel::{ClockRequest, ClockRequester, ClockResponder, create_clock_channel};
use crate::config::ClockSettings;
use api::{ClockId, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

/// Name given to the worker thread
pub const WORKER_NAME: &str = "clock-worker";

const PICOS_PER_SECOND: u64 = 1_000_000_000_000;
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Hardware performance counter
///
/// `counter` is only ever called from the worker thread.
pub trait PerformanceCounter: Send + Sync {
    /// Counter frequency in Hz, or None if there is no counter
    fn frequency(&self) -> Option<u64>;

    /// Current counter value, or None if the read failed
    fn counter(&self) -> Option<u64>;
}

/// Performance counter backed by [`Instant`], ticking in nanoseconds
#[derive(Debug, Clone, Copy)]
pub struct SystemCounter {
    origin: Instant,
}

impl SystemCounter {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceCounter for SystemCounter {
    fn frequency(&self) -> Option<u64> {
        Some(1_000_000_000)
    }

    fn counter(&self) -> Option<u64> {
        u64::try_from(self.origin.elapsed().as_nanos()).ok()
    }
}

/// Work run on the spawned worker thread
pub type WorkerTask = Box<dyn FnOnce() + Send + 'static>;

/// Starts the clock worker thread
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, name: &str, task: WorkerTask) -> std::io::Result<JoinHandle<()>>;
}

/// Spawns workers as plain OS threads
#[derive(Debug, Clone, Copy, Default)]
pub struct StdSpawner;

impl WorkerSpawner for StdSpawner {
    fn spawn(&self, name: &str, task: WorkerTask) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new().name(name.to_string()).spawn(task)
    }
}

/// Worker activity counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockStats {
    /// Performance counter reads performed by the worker
    pub hardware_reads: u64,
    /// Requests answered by the worker
    pub requests_served: u64,
}

/// Calendar time since the Unix epoch
///
/// Not guaranteed monotonic. Needs no thread hand-off.
pub fn realtime_now() -> Timestamp {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Timestamp::new(
        i64::try_from(since_epoch.as_secs()).unwrap_or(i64::MAX),
        since_epoch.subsec_nanos(),
    )
}

/// Convert a counter reading to a timestamp
///
/// `ticks_to_ps` is the length of one tick in picoseconds.
pub fn ticks_to_timestamp(ticks: u64, frequency: u64, ticks_to_ps: u64) -> Timestamp {
    let seconds = ticks / frequency;
    let remainder = u128::from(ticks % frequency);
    let nanoseconds = remainder * u128::from(ticks_to_ps) / 1000;

    Timestamp::new(
        i64::try_from(seconds).unwrap_or(i64::MAX),
        u32::try_from(nanoseconds).unwrap_or(999_999_999),
    )
}

/// State shared between the service and its worker
struct ClockState {
    frequency: u64,
    ticks_to_ps: u64,
    last_sample: Mutex<Timestamp>,
    hardware_reads: AtomicU64,
    requests_served: AtomicU64,
}

impl ClockState {
    fn new(frequency: u64) -> Self {
        Self {
            frequency,
            ticks_to_ps: PICOS_PER_SECOND / frequency,
            last_sample: Mutex::new(Timestamp::default()),
            hardware_reads: AtomicU64::new(0),
            requests_served: AtomicU64::new(0),
        }
    }

    /// Take one sample and record it as the last sample
    fn sample(&self, counter: &dyn PerformanceCounter) -> Timestamp {
        let mut last = self
            .last_sample
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let sample = match counter.counter() {
            Some(ticks) => {
                self.hardware_reads.fetch_add(1, Ordering::Relaxed);
                ticks_to_timestamp(ticks, self.frequency, self.ticks_to_ps)
            }
            None => {
                debug!("performance counter read failed, using realtime clock");
                realtime_now()
            }
        };

        *last = sample;
        sample
    }

    fn last_sample(&self) -> Timestamp {
        *self
            .last_sample
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

enum Worker {
    Running(JoinHandle<()>),
    /// Missed the join deadline; kept only to tell whether it has exited
    Detached(JoinHandle<()>),
    Joined,
}

struct HiresSource {
    requester: ClockRequester,
    state: Arc<ClockState>,
    worker: Mutex<Worker>,
}

enum MonotonicSource {
    /// No performance counter: monotonic reads use the realtime clock
    Realtime,
    Hires(HiresSource),
}

/// Thread-safe, request-coalescing clock
pub struct ClockService {
    source: MonotonicSource,
    settings: ClockSettings,
}

impl ClockService {
    /// Probe the performance counter and start the worker if there is one
    pub fn start(
        counter: Arc<dyn PerformanceCounter>,
        settings: &ClockSettings,
        spawner: &dyn WorkerSpawner,
    ) -> crate::Result<Self> {
        let Some(frequency) = counter.frequency().filter(|f| *f > 0) else {
            debug!("no hires timer available on this platform");
            return Ok(Self {
                source: MonotonicSource::Realtime,
                settings: settings.clone(),
            });
        };
        debug!("hires timer available (frequency: {} Hz)", frequency);

        let (requester, responder) = create_clock_channel(settings.queue_capacity)?;
        let state = Arc::new(ClockState::new(frequency));

        let worker_state = Arc::clone(&state);
        let handle = spawner
            .spawn(
                WORKER_NAME,
                Box::new(move || run_worker(responder, worker_state, counter)),
            )
            .map_err(|e| crate::Error::Worker(format!("unable to create clock worker: {}", e)))?;

        Ok(Self {
            source: MonotonicSource::Hires(HiresSource {
                requester,
                state,
                worker: Mutex::new(Worker::Running(handle)),
            }),
            settings: settings.clone(),
        })
    }

    /// Whether monotonic reads come from the performance counter
    pub fn has_monotonic_source(&self) -> bool {
        matches!(self.source, MonotonicSource::Hires(_))
    }

    /// Performance counter frequency, if there is a counter
    pub fn frequency(&self) -> Option<u64> {
        match &self.source {
            MonotonicSource::Hires(hires) => Some(hires.state.frequency),
            MonotonicSource::Realtime => None,
        }
    }

    /// Read the given clock
    pub fn now(&self, clock: ClockId) -> crate::Result<Timestamp> {
        match (clock, &self.source) {
            (ClockId::Monotonic, MonotonicSource::Hires(hires)) => self.request_sample(hires),
            (ClockId::Monotonic, MonotonicSource::Realtime) | (ClockId::Realtime, _) => {
                Ok(realtime_now())
            }
        }
    }

    /// Most recent sample taken by the worker
    pub fn last_sample(&self) -> Option<Timestamp> {
        match &self.source {
            MonotonicSource::Hires(hires) => Some(hires.state.last_sample()),
            MonotonicSource::Realtime => None,
        }
    }

    /// Worker activity so far
    pub fn stats(&self) -> ClockStats {
        match &self.source {
            MonotonicSource::Hires(hires) => ClockStats {
                hardware_reads: hires.state.hardware_reads.load(Ordering::Relaxed),
                requests_served: hires.state.requests_served.load(Ordering::Relaxed),
            },
            MonotonicSource::Realtime => ClockStats::default(),
        }
    }

    /// Whether the worker thread has exited
    ///
    /// A detached worker counts as stopped only once its thread has finished.
    pub fn is_stopped(&self) -> bool {
        let MonotonicSource::Hires(hires) = &self.source else {
            return true;
        };

        match &*hires.worker.lock().unwrap_or_else(PoisonError::into_inner) {
            Worker::Running(handle) | Worker::Detached(handle) => handle.is_finished(),
            Worker::Joined => true,
        }
    }

    /// Stop the worker and wait (bounded) for it to exit
    ///
    /// Safe to call more than once. A worker that does not exit within the
    /// join timeout is detached.
    pub fn shutdown(&self) {
        let MonotonicSource::Hires(hires) = &self.source else {
            return;
        };

        if hires.requester.close() {
            debug!("clock worker shutdown requested");
        }

        let mut worker = hires.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let Worker::Running(handle) = std::mem::replace(&mut *worker, Worker::Joined) else {
            return;
        };

        let join_timeout = self.settings.join_timeout();
        let deadline = Instant::now() + join_timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        if !handle.is_finished() {
            warn!(
                "could not wait for clock worker to quit within {:?}, detaching it",
                join_timeout
            );
            *worker = Worker::Detached(handle);
            return;
        }
        drop(worker);

        if handle.join().is_err() {
            warn!("clock worker panicked");
        }
    }

    fn request_sample(&self, hires: &HiresSource) -> crate::Result<Timestamp> {
        let (request, reply) = ClockRequest::new();
        hires.requester.send_request(request)?;

        let timeout = self.settings.request_timeout();
        loop {
            match reply.recv_timeout(timeout) {
                Ok(sample) => return Ok(sample),
                Err(RecvTimeoutError::Timeout) => {
                    debug!(
                        "could not obtain a timer value within {:?} - too much load?",
                        timeout
                    );
                }
                Err(RecvTimeoutError::Disconnected) => return Err(crate::Error::ClockStopped),
            }
        }
    }
}

impl Drop for ClockService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker loop: one counter read per wake-up, shared by all queued callers
fn run_worker(
    responder: ClockResponder,
    state: Arc<ClockState>,
    counter: Arc<dyn PerformanceCounter>,
) {
    debug!("clock worker started");

    while let Ok(first) = responder.recv_request() {
        if responder.is_closed() {
            // Unanswered callers must see their reply channel disconnect
            drop(first);
            let dropped = 1 + responder.discard_pending();
            debug!(dropped, "dropping clock requests queued at shutdown");
            break;
        }

        let queued = responder.pending();
        let mut batch = Vec::with_capacity(queued + 1);
        batch.push(first);
        batch.extend(std::iter::from_fn(|| responder.try_recv_request()).take(queued));

        let sample = state.sample(counter.as_ref());
        let served = batch.len();
        for request in batch {
            if !request.respond(sample) {
                trace!("clock caller stopped waiting before its reply");
            }
        }
        state
            .requests_served
            .fetch_add(served as u64, Ordering::Relaxed);
        trace!(served, %sample, "answered clock requests");
    }

    debug!("clock worker quitting");
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoCounter;

    impl PerformanceCounter for NoCounter {
        fn frequency(&self) -> Option<u64> {
            None
        }

        fn counter(&self) -> Option<u64> {
            None
        }
    }

    #[test]
    fn test_ticks_to_timestamp() {
        // 1 MHz counter: one tick is 1 µs
        let ts = ticks_to_timestamp(2_500_000, 1_000_000, PICOS_PER_SECOND / 1_000_000);
        assert_eq!(ts, Timestamp::new(2, 500_000_000));

        // 1 GHz counter
        let ts = ticks_to_timestamp(1_000_000_123, 1_000_000_000, 1000);
        assert_eq!(ts, Timestamp::new(1, 123));
    }

    #[test]
    fn test_ticks_to_timestamp_nanos_stay_in_range() {
        for frequency in [3, 7, 32_768, 3_579_545, 4_000_000_000] {
            let ticks_to_ps = PICOS_PER_SECOND / frequency;
            let ts = ticks_to_timestamp(frequency * 5 - 1, frequency, ticks_to_ps);
            assert_eq!(ts.seconds, 4);
            assert!(ts.nanoseconds < 1_000_000_000);
        }
    }

    #[test]
    fn test_no_counter_falls_back_to_realtime() {
        let service =
            ClockService::start(Arc::new(NoCounter), &ClockSettings::default(), &StdSpawner)
                .unwrap();

        assert!(!service.has_monotonic_source());
        assert_eq!(service.frequency(), None);
        assert!(service.is_stopped());

        let before = realtime_now();
        let mono = service.now(ClockId::Monotonic).unwrap();
        assert!(mono >= before);
        assert_eq!(service.stats(), ClockStats::default());
        service.shutdown();
    }

    #[test]
    fn test_system_counter_is_monotonic() {
        let service = ClockService::start(
            Arc::new(SystemCounter::new()),
            &ClockSettings::default(),
            &StdSpawner,
        )
        .unwrap();

        let a = service.now(ClockId::Monotonic).unwrap();
        let b = service.now(ClockId::Monotonic).unwrap();
        assert!(b >= a);
        assert_eq!(service.last_sample(), Some(b));
        assert_eq!(service.stats().hardware_reads, 2);
    }

    #[test]
    fn test_realtime_is_served_without_worker() {
        let service = ClockService::start(
            Arc::new(SystemCounter::new()),
            &ClockSettings::default(),
            &StdSpawner,
        )
        .unwrap();

        let ts = service.now(ClockId::Realtime).unwrap();
        assert!(ts.seconds > 1_600_000_000);
        assert_eq!(service.stats().requests_served, 0);
    }
}
