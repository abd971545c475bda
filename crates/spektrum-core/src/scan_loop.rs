//! # Scan Loop
//!
//! Background thread that walks the tuning plan round-robin until told to
//! stop:
//!
//! ```text
//! i = 0
//! while !stop:
//!     scan_one_segment(i)       recoverable error -> warn, skip
//!     i = (i + 1) % tune_count  fatal error       -> exit Failed
//! ```
//!
//! Cancellation is cooperative and checked once per segment, so
//! [`ScanLoop::stop`] blocks for at most one acquisition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, error, info, warn};

use crate::error::{ScanError, ScanResult};
use crate::lock;
use crate::scanner::{scan_one_segment, ScanContext};
use crate::thread::{spawn_scan_thread, ScanThreadConfig};

/// Lifecycle state of the scan thread.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LoopStatus {
    /// Never started
    #[default]
    Idle,
    Running,
    /// Exited after a stop request
    Stopped,
    /// Exited on its own after a fatal error
    Failed(ScanError),
}

impl LoopStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, LoopStatus::Failed(_))
    }
}

/// Handle to at most one scan thread.
pub struct ScanLoop {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    status: Arc<Mutex<LoopStatus>>,
    max_consecutive_failures: usize,
}

impl ScanLoop {
    /// `max_consecutive_failures` of 0 disables the bound.
    pub fn new(max_consecutive_failures: usize) -> Self {
        Self {
            handle: None,
            stop: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(LoopStatus::Idle)),
            max_consecutive_failures,
        }
    }

    /// True while a thread exists and has not exited.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn status(&self) -> LoopStatus {
        lock(&self.status).clone()
    }

    /// Shared status cell, for readers on other threads.
    pub fn status_handle(&self) -> Arc<Mutex<LoopStatus>> {
        self.status.clone()
    }

    /// Spawn the scan thread.
    ///
    /// Returns `Ok(false)` without spawning if a thread is already running.
    pub fn start(&mut self, ctx: ScanContext, config: &ScanThreadConfig) -> ScanResult<bool> {
        if self.is_running() {
            debug!("Scan loop already running");
            return Ok(false);
        }
        if ctx.plan.is_empty() {
            return Err(ScanError::NotConfigured);
        }
        self.reap();

        self.stop.store(false, Ordering::Release);
        *lock(&self.status) = LoopStatus::Running;

        let stop = self.stop.clone();
        let status = self.status.clone();
        let max_failures = self.max_consecutive_failures;

        let spawned = spawn_scan_thread(config, move || {
            let exit = run(&ctx, &stop, max_failures);
            *lock(&status) = exit;
        });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(true)
            }
            Err(e) => {
                *lock(&self.status) = LoopStatus::Failed(e.clone());
                Err(e)
            }
        }
    }

    /// Bound on back-to-back segment failures for the next start.
    pub fn set_max_consecutive_failures(&mut self, max: usize) {
        self.max_consecutive_failures = max;
    }

    pub fn max_consecutive_failures(&self) -> usize {
        self.max_consecutive_failures
    }

    /// Request a stop and join the thread.
    ///
    /// Returns `true` only if the thread was still scanning and exited
    /// because of this request. A thread that failed on its own, even
    /// while the stop was in flight, returns `false` and keeps its
    /// `Failed` status. After return no further buffer writes can happen.
    pub fn stop(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };

        self.stop.store(true, Ordering::Release);
        self.join(handle);
        self.status() == LoopStatus::Stopped
    }

    /// Join a thread that exited on its own.
    fn reap(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.join(handle);
            let status = self.status();
            if status.is_failed() {
                debug!(?status, "Reaped failed scan thread");
            }
        }
    }

    fn join(&self, handle: JoinHandle<()>) {
        if handle.join().is_err() {
            error!("Scan thread panicked");
            *lock(&self.status) =
                LoopStatus::Failed(ScanError::DeviceLost("scan thread panicked".into()));
        }
    }
}

impl Drop for ScanLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(ctx: &ScanContext, stop: &AtomicBool, max_failures: usize) -> LoopStatus {
    let tune_count = ctx.plan.len();
    info!(
        segments = tune_count,
        bins = ctx.plan.total_bins(),
        "Scan loop started"
    );
    ctx.stats.clear_consecutive_failures();

    let mut i = 0;
    while !stop.load(Ordering::Acquire) {
        match scan_one_segment(ctx, i) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                let streak = ctx.stats.record_failure() as usize;
                warn!(segment = i, streak, "Skipping segment: {}", e);
                if max_failures > 0 && streak > max_failures {
                    let err = ScanError::TooManyFailures(streak);
                    error!("Scan loop aborted: {}", err);
                    return LoopStatus::Failed(err);
                }
            }
            Err(e) => {
                error!(segment = i, "Scan loop aborted: {}", e);
                return LoopStatus::Failed(e);
            }
        }

        i += 1;
        if i == tune_count {
            i = 0;
            ctx.stats.record_cycle();
        }
    }

    info!(cycles = ctx.stats.cycles(), "Scan loop stopped");
    LoopStatus::Stopped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PowerBuffer;
    use crate::plan::{test_segment, TuningPlan};
    use crate::stats::ScanStats;
    use crate::testing::MockDevice;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn context(dev: MockDevice, usable: &[usize]) -> ScanContext {
        let plan = TuningPlan::new(usable.iter().map(|&n| test_segment(n)).collect());
        let total = plan.total_bins();
        ScanContext {
            plan: Arc::new(plan),
            device: Arc::new(Mutex::new(dev.boxed())),
            buffer: Arc::new(Mutex::new(PowerBuffer::new(total))),
            cursor: Arc::new(AtomicUsize::new(0)),
            stats: Arc::new(ScanStats::new()),
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_round_robin_order() {
        let (dev, state) = MockDevice::new();
        let ctx = context(dev, &[3, 5]);
        let stats = ctx.stats.clone();

        let mut scan_loop = ScanLoop::new(64);
        assert!(scan_loop.start(ctx, &ScanThreadConfig::default()).unwrap());
        wait_until(|| stats.cycles() >= 3);
        assert!(scan_loop.stop());
        assert_eq!(scan_loop.status(), LoopStatus::Stopped);

        let acquired = state.lock().unwrap().acquired.clone();
        assert!(acquired.len() >= 6);
        for (n, &seg) in acquired.iter().enumerate() {
            assert_eq!(seg, n % 2);
        }
    }

    #[test]
    fn test_no_writes_after_stop() {
        let (dev, state) = MockDevice::new();
        let ctx = context(dev, &[4, 4, 4]);
        let stats = ctx.stats.clone();

        let mut scan_loop = ScanLoop::new(64);
        scan_loop.start(ctx, &ScanThreadConfig::default()).unwrap();
        wait_until(|| stats.segments() >= 2);
        scan_loop.stop();

        let count = state.lock().unwrap().acquired.len();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(state.lock().unwrap().acquired.len(), count);
        assert!(!scan_loop.is_running());
    }

    #[test]
    fn test_double_start_spawns_once() {
        let (dev, _) = MockDevice::new();
        let ctx = context(dev, &[2]);

        let mut scan_loop = ScanLoop::new(64);
        assert!(scan_loop.start(ctx.clone(), &ScanThreadConfig::default()).unwrap());
        assert!(!scan_loop.start(ctx, &ScanThreadConfig::default()).unwrap());
        assert!(scan_loop.is_running());
        scan_loop.stop();
    }

    #[test]
    fn test_stop_without_thread() {
        let mut scan_loop = ScanLoop::new(64);
        assert!(!scan_loop.stop());
        assert_eq!(scan_loop.status(), LoopStatus::Idle);
    }

    #[test]
    fn test_empty_plan_rejected() {
        let (dev, _) = MockDevice::new();
        let ctx = context(dev, &[]);
        let mut scan_loop = ScanLoop::new(64);
        assert_eq!(
            scan_loop.start(ctx, &ScanThreadConfig::default()),
            Err(ScanError::NotConfigured)
        );
        assert!(!scan_loop.is_running());
    }

    #[test]
    fn test_recoverable_failures_skipped() {
        let (dev, state) = MockDevice::new();
        let ctx = context(dev.failing(&[1]), &[2, 2, 2]);
        let stats = ctx.stats.clone();

        let mut scan_loop = ScanLoop::new(64);
        scan_loop.start(ctx, &ScanThreadConfig::default()).unwrap();
        wait_until(|| stats.cycles() >= 2);
        scan_loop.stop();

        assert_eq!(scan_loop.status(), LoopStatus::Stopped);
        assert!(stats.failures() >= 2);
        assert!(!state.lock().unwrap().acquired.contains(&1));
    }

    #[test]
    fn test_fatal_error_ends_loop() {
        let (dev, _) = MockDevice::new();
        let ctx = context(dev.fatal_after(3), &[2, 2]);

        let mut scan_loop = ScanLoop::new(64);
        scan_loop.start(ctx, &ScanThreadConfig::default()).unwrap();
        wait_until(|| !scan_loop.is_running());

        assert!(matches!(
            scan_loop.status(),
            LoopStatus::Failed(ScanError::DeviceLost(_))
        ));
        assert!(!scan_loop.stop());
    }

    #[test]
    fn test_consecutive_failure_bound() {
        let (dev, _) = MockDevice::new();
        let ctx = context(dev.failing(&[0, 1]), &[2, 2]);
        let stats = ctx.stats.clone();

        let mut scan_loop = ScanLoop::new(5);
        scan_loop.start(ctx, &ScanThreadConfig::default()).unwrap();
        wait_until(|| !scan_loop.is_running());

        assert_eq!(
            scan_loop.status(),
            LoopStatus::Failed(ScanError::TooManyFailures(6))
        );
        assert_eq!(stats.failures(), 6);
    }

    #[test]
    fn test_failure_during_stop_is_not_running() {
        // The first acquisition is still sleeping when stop is requested,
        // then fails fatally.
        let (dev, _) = MockDevice::new();
        let ctx = context(dev.fatal_after(0).delay(Duration::from_millis(100)), &[2]);

        let mut scan_loop = ScanLoop::new(64);
        assert!(scan_loop.start(ctx, &ScanThreadConfig::default()).unwrap());
        assert!(!scan_loop.stop());
        assert!(matches!(
            scan_loop.status(),
            LoopStatus::Failed(ScanError::DeviceLost(_))
        ));
    }

    #[test]
    fn test_failure_bound_setter_keeps_status_cell() {
        let mut scan_loop = ScanLoop::new(64);
        let status = scan_loop.status_handle();
        scan_loop.set_max_consecutive_failures(3);
        assert_eq!(scan_loop.max_consecutive_failures(), 3);
        assert!(Arc::ptr_eq(&status, &scan_loop.status_handle()));
    }

    #[test]
    fn test_restart_after_failure() {
        let (dev, _) = MockDevice::new();
        let ctx = context(dev.fatal_after(1), &[2]);

        let mut scan_loop = ScanLoop::new(64);
        scan_loop.start(ctx.clone(), &ScanThreadConfig::default()).unwrap();
        wait_until(|| !scan_loop.is_running());
        assert!(scan_loop.status().is_failed());

        assert!(scan_loop.start(ctx, &ScanThreadConfig::default()).unwrap());
        wait_until(|| !scan_loop.is_running());
        assert!(scan_loop.status().is_failed());
    }
}
