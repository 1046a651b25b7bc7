//! Fixed-cadence driver for the dispatch engine.
//!
//! The driver loop runs on its own task. On each tick it tries to claim an
//! in-flight flag; if a scan is still running the tick is skipped, so scans
//! never overlap. Each scan runs on a separate task so a panic is contained.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::engine::Scan;

/// Counters describing the driver's activity so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Ticks observed.
    pub ticks: u64,
    /// Scans started.
    pub scans_started: u64,
    /// Scans that ran to completion without panicking.
    pub scans_completed: u64,
    /// Ticks skipped because a scan was still running.
    pub ticks_skipped: u64,
}

#[derive(Debug, Default)]
struct DriverState {
    in_flight: AtomicBool,
    ticks: AtomicU64,
    scans_started: AtomicU64,
    scans_completed: AtomicU64,
    ticks_skipped: AtomicU64,
}

impl DriverState {
    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            scans_started: self.scans_started.load(Ordering::Relaxed),
            scans_completed: self.scans_completed.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
        }
    }

    fn try_claim(self: &Arc<Self>) -> Option<InFlight> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(Arc::clone(self)))
    }
}

/// Releases the in-flight flag when dropped, including during a panic unwind.
struct InFlight(Arc<DriverState>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}

/// Runs a [`Scan`] once per interval.
pub struct Scheduler<S> {
    job: Arc<S>,
    interval: Duration,
}

impl<S> std::fmt::Debug for Scheduler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl<S: Scan> Scheduler<S> {
    /// Creates a scheduler for `job`. The first scan starts immediately.
    #[must_use]
    pub const fn new(job: Arc<S>, interval: Duration) -> Self {
        Self { job, interval }
    }

    /// Spawns the driver loop on the current tokio runtime.
    ///
    /// Dropping the returned handle stops the loop like [`SchedulerHandle::stop`].
    #[must_use]
    pub fn start(self) -> SchedulerHandle {
        let state = Arc::new(DriverState::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        info!("Scheduler started, scanning every {:?}", self.interval);
        let task = tokio::spawn(drive(self.job, self.interval, Arc::clone(&state), stop_rx));
        SchedulerHandle {
            stop: stop_tx,
            task,
            state,
        }
    }
}

/// Controls a running [`Scheduler`].
#[derive(Debug)]
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    state: Arc<DriverState>,
}

impl SchedulerHandle {
    /// Prevents further ticks. An in-flight scan is not interrupted.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Waits for the driver loop and any in-flight scan to finish and
    /// returns the final counters.
    ///
    /// Call [`SchedulerHandle::stop`] first, otherwise this waits forever.
    pub async fn join(self) -> SchedulerStats {
        let Self { stop, task, state } = self;
        if let Err(e) = task.await {
            error!("Scheduler task ended abnormally: {e}");
        }
        drop(stop);
        state.stats()
    }

    /// Stops the loop and waits for it.
    pub async fn shutdown(self) -> SchedulerStats {
        self.stop();
        self.join().await
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.state.stats()
    }

    /// Returns true while a scan is running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.state.in_flight.load(Ordering::Acquire)
    }
}

async fn drive<S: Scan>(
    job: Arc<S>,
    interval: Duration,
    state: Arc<DriverState>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut current: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                state.ticks.fetch_add(1, Ordering::Relaxed);
                match state.try_claim() {
                    Some(guard) => {
                        state.scans_started.fetch_add(1, Ordering::Relaxed);
                        current = Some(tokio::spawn(run_one(Arc::clone(&job), Arc::clone(&state), guard)));
                    }
                    None => {
                        state.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                        warn!("Previous scan still running, skipping tick");
                    }
                }
            }
        }
    }

    if let Some(scan) = current {
        debug!("Waiting for in-flight scan before stopping");
        if let Err(e) = scan.await {
            error!("In-flight scan task ended abnormally: {e}");
        }
    }
    info!("Scheduler stopped");
}

/// Runs one scan on its own task and reports how it ended.
async fn run_one<S: Scan>(job: Arc<S>, state: Arc<DriverState>, guard: InFlight) {
    let _guard = guard;
    let outcome = tokio::spawn(async move { job.scan().await }).await;
    match outcome {
        Ok(report) => {
            state.scans_completed.fetch_add(1, Ordering::Relaxed);
            debug!("Scan completed: {report}");
        }
        Err(e) if e.is_panic() => error!("Scan panicked: {e}"),
        Err(e) => error!("Scan task failed: {e}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dispatch::ScanReport;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Sleeps for `duration` and tracks how many scans overlap.
    struct SlowScan {
        duration: Duration,
        running: AtomicUsize,
        max_running: AtomicUsize,
        finished: AtomicUsize,
    }

    impl SlowScan {
        fn new(duration: Duration) -> Arc<Self> {
            Arc::new(Self {
                duration,
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Scan for SlowScan {
        async fn scan(&self) -> ScanReport {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.duration).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
            ScanReport::default()
        }
    }

    /// Panics on the first scan, then behaves.
    struct PanicOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Scan for PanicOnce {
        async fn scan(&self) -> ScanReport {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first scan blows up");
            }
            ScanReport::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_during_a_slow_scan_are_skipped() {
        let job = SlowScan::new(Duration::from_secs(150));
        let handle = Scheduler::new(Arc::clone(&job), Duration::from_secs(60)).start();

        // Ticks at 0, 60, 120, 180, 240, 300; scans run 0..150 and 180..330
        tokio::time::sleep(Duration::from_secs(301)).await;
        let stats = handle.stats();
        assert_eq!(stats.ticks, 6);
        assert_eq!(stats.scans_started, 2);
        assert_eq!(stats.ticks_skipped, 4);
        assert_eq!(job.max_running.load(Ordering::SeqCst), 1);

        let last = handle.shutdown().await;
        assert_eq!(last.scans_completed, 2);
        assert_eq!(job.finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_scans_run_every_tick() {
        let job = SlowScan::new(Duration::from_secs(1));
        let handle = Scheduler::new(Arc::clone(&job), Duration::from_secs(10)).start();

        tokio::time::sleep(Duration::from_secs(35)).await;
        let stats = handle.stats();
        assert_eq!(stats.scans_started, 4);
        assert_eq!(stats.scans_completed, 4);
        assert_eq!(stats.ticks_skipped, 0);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_scan_and_prevents_new_ones() {
        let job = SlowScan::new(Duration::from_secs(30));
        let handle = Scheduler::new(Arc::clone(&job), Duration::from_secs(60)).start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.is_scanning());

        handle.stop();
        let stats_before = handle.stats();
        handle.join().await;

        assert_eq!(job.finished.load(Ordering::SeqCst), 1);
        assert_eq!(stats_before.scans_started, 1);

        // Time moving on starts nothing new
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(job.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_scan_does_not_stop_the_driver() {
        let job = Arc::new(PanicOnce {
            calls: AtomicUsize::new(0),
        });
        let handle = Scheduler::new(Arc::clone(&job), Duration::from_secs(60)).start();

        tokio::time::sleep(Duration::from_secs(125)).await;
        let stats = handle.stats();
        assert_eq!(stats.scans_started, 3);
        assert_eq!(stats.scans_completed, 2);
        assert!(!handle.is_scanning());
        handle.shutdown().await;
    }
}
