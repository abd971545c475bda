//! # Scan Engine
//!
//! Owns the tuning plan, the power buffer and the scan loop, and keeps the
//! three consistent:
//!
//! - the plan and buffer are only replaced while the loop is stopped;
//! - every control operation that touches them follows
//!   stop, apply, restart-if-it-was-running;
//! - control operations take `&mut self`, so there is exactly one
//!   controller. Any number of [`SpectrumReader`]s can watch the buffer
//!   from other threads.
//!
//! ```rust,ignore
//! let mut engine = ScanEngine::new(RtlPowerSolver::new());
//! engine.open_device(&SimulatedDriver::default(), 0)?;
//! engine.configure_frequency_range(88_000_000, 108_000_000, 10_000)?;
//! engine.start_auto_scan()?;
//!
//! let reader = engine.reader();
//! std::thread::spawn(move || loop {
//!     let dbm = reader.dbm_buffer();
//!     // draw...
//! });
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::buffer::{PowerBuffer, RelativeMode};
use crate::config::{DeviceConfig, SpektrumConfig};
use crate::device::{DeviceDriver, DirectSampling, ScanDevice, SharedDevice};
use crate::error::{ScanError, ScanResult};
use crate::lock;
use crate::plan::{RangeSpec, SolverSettings, TuningPlan, TuningSolver};
use crate::scan_loop::{LoopStatus, ScanLoop};
use crate::scanner::ScanContext;
use crate::stats::{ScanStats, ScanStatsSnapshot};
use crate::thread::ScanThreadConfig;

/// The scan engine.
pub struct ScanEngine {
    solver: Box<dyn TuningSolver>,
    settings: SolverSettings,
    thread_config: ScanThreadConfig,
    device: Option<SharedDevice>,
    plan: Arc<TuningPlan>,
    range: Option<RangeSpec>,
    buffer: Arc<Mutex<PowerBuffer>>,
    cursor: Arc<AtomicUsize>,
    stats: Arc<ScanStats>,
    scan_loop: ScanLoop,
}

impl ScanEngine {
    /// Engine with default solver settings and no device.
    pub fn new<S: TuningSolver + 'static>(solver: S) -> Self {
        Self::with_settings(solver, SolverSettings::default())
    }

    pub fn with_settings<S: TuningSolver + 'static>(solver: S, settings: SolverSettings) -> Self {
        Self {
            solver: Box::new(solver),
            settings,
            thread_config: ScanThreadConfig::default(),
            device: None,
            plan: Arc::new(TuningPlan::default()),
            range: None,
            buffer: Arc::new(Mutex::new(PowerBuffer::new(0))),
            cursor: Arc::new(AtomicUsize::new(0)),
            stats: Arc::new(ScanStats::new()),
            scan_loop: ScanLoop::new(64),
        }
    }

    /// Engine set up from a loaded configuration.
    ///
    /// Does not open a device or configure the range; see
    /// [`open_device`](Self::open_device) and
    /// [`apply_device_config`](Self::apply_device_config).
    pub fn from_config<S: TuningSolver + 'static>(config: &SpektrumConfig, solver: S) -> Self {
        Self::with_settings(solver, config.solver_settings())
            .with_thread_config(config.scan.thread.clone())
            .with_max_consecutive_failures(config.scan.max_consecutive_failures)
    }

    pub fn with_thread_config(mut self, config: ScanThreadConfig) -> Self {
        self.thread_config = config;
        self
    }

    /// Bound on back-to-back segment failures (0 = unbounded).
    pub fn with_max_consecutive_failures(mut self, max: usize) -> Self {
        self.scan_loop.set_max_consecutive_failures(max);
        self
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Device
    // ------------------------------------------------------------------

    /// Open device `index` through `driver`, flush its sample buffer and
    /// make it the scan device.
    pub fn open_device(&mut self, driver: &dyn DeviceDriver, index: u32) -> ScanResult<()> {
        let mut device = driver.open(index)?;
        device.reset_buffer()?;
        info!(driver = driver.name(), index, device = device.name(), "Device opened");
        self.attach_device(device)
    }

    /// Replace the scan device. A running loop is restarted on the new one.
    pub fn attach_device(&mut self, device: Box<dyn ScanDevice>) -> ScanResult<()> {
        let was_running = self.stop_auto_scan();
        self.device = Some(Arc::new(Mutex::new(device)));
        self.resume(was_running)
    }

    /// Stop scanning and release the device.
    pub fn close_device(&mut self) {
        self.stop_auto_scan();
        if self.device.take().is_some() {
            info!("Device closed");
        }
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    /// Push the front-end settings of a [`DeviceConfig`] to the device.
    pub fn apply_device_config(&mut self, config: &DeviceConfig) -> ScanResult<()> {
        self.set_frequency_correction(config.ppm)?;
        self.set_offset_tuning(config.offset_tuning)?;
        self.set_direct_sampling(config.direct_sampling)?;
        self.set_gain(config.gain)
    }

    fn with_device<T>(&self, f: impl FnOnce(&mut dyn ScanDevice) -> ScanResult<T>) -> ScanResult<T> {
        let device = self.device.as_ref().ok_or(ScanError::NoDevice)?;
        let mut guard = lock(device);
        f(&mut **guard)
    }

    /// Discrete tuner gains in tenths of dB.
    pub fn get_gains(&self) -> ScanResult<Vec<i32>> {
        self.with_device(|d| d.tuner_gains())
    }

    pub fn set_offset_tuning(&mut self, enabled: bool) -> ScanResult<()> {
        self.with_device(|d| d.set_offset_tuning(enabled))
    }

    pub fn set_direct_sampling(&mut self, mode: DirectSampling) -> ScanResult<()> {
        self.with_device(|d| d.set_direct_sampling(mode))
    }

    pub fn set_frequency_correction(&mut self, ppm: i32) -> ScanResult<()> {
        self.with_device(|d| d.set_frequency_correction(ppm))
    }

    // ------------------------------------------------------------------
    // Range
    // ------------------------------------------------------------------

    /// Solve a new plan for `lower..upper` at `step` Hz and resize the
    /// buffer to match.
    ///
    /// On failure the previous plan and buffer are kept. Either way a loop
    /// that was running is restarted.
    pub fn configure_frequency_range(&mut self, lower: u64, upper: u64, step: u64) -> ScanResult<()> {
        let range = RangeSpec::new(lower, upper, step);
        let was_running = self.stop_auto_scan();

        let previous = (!self.plan.is_empty()).then(|| self.plan.as_ref());
        let plan = match self.solver.solve(&self.settings, &range, previous) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Keeping previous range: {}", e);
                if let Err(restart) = self.resume(was_running) {
                    warn!("Failed to restart scan loop: {}", restart);
                }
                return Err(e);
            }
        };

        lock(&self.buffer).reallocate(plan.total_bins());
        info!(
            lower,
            upper,
            step,
            segments = plan.len(),
            bins = plan.total_bins(),
            "Frequency range configured"
        );
        self.plan = Arc::new(plan);
        self.range = Some(range);
        self.cursor.store(0, Ordering::Release);
        self.stats.reset();

        self.resume(was_running)
    }

    /// Stop scanning and drop the plan. Idempotent.
    pub fn clear_frequency_range(&mut self) {
        self.stop_auto_scan();
        if self.plan.is_empty() {
            return;
        }
        self.plan = Arc::new(TuningPlan::default());
        self.range = None;
        lock(&self.buffer).reallocate(0);
        self.cursor.store(0, Ordering::Release);
        self.stats.reset();
        info!("Frequency range cleared");
    }

    pub fn range(&self) -> Option<RangeSpec> {
        self.range
    }

    pub fn plan(&self) -> &TuningPlan {
        &self.plan
    }

    /// Number of segments in the current plan.
    pub fn tune_count(&self) -> usize {
        self.plan.len()
    }

    /// Frequency in Hz of buffer index `index`.
    pub fn frequency_of(&self, index: usize) -> Option<f64> {
        self.plan.frequency_of(index)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the scan loop. Does nothing if it is already running.
    pub fn start_auto_scan(&mut self) -> ScanResult<()> {
        if self.scan_loop.is_running() {
            return Ok(());
        }
        if self.plan.is_empty() {
            return Err(ScanError::NotConfigured);
        }
        let device = self.device.clone().ok_or(ScanError::NoDevice)?;

        let ctx = ScanContext {
            plan: self.plan.clone(),
            device,
            buffer: self.buffer.clone(),
            cursor: self.cursor.clone(),
            stats: self.stats.clone(),
        };
        self.scan_loop.start(ctx, &self.thread_config)?;
        Ok(())
    }

    /// Stop the scan loop and wait for the in-flight segment.
    ///
    /// Returns `true` if the loop was running.
    pub fn stop_auto_scan(&mut self) -> bool {
        self.scan_loop.stop()
    }

    pub fn is_running(&self) -> bool {
        self.scan_loop.is_running()
    }

    pub fn loop_status(&self) -> LoopStatus {
        self.scan_loop.status()
    }

    fn resume(&mut self, was_running: bool) -> ScanResult<()> {
        if was_running {
            self.start_auto_scan()
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Gain
    // ------------------------------------------------------------------

    /// Set the gain used for every segment.
    ///
    /// A running loop is stopped around the update. Without a running loop
    /// only the stored settings change.
    pub fn set_gain(&mut self, gain: i32) -> ScanResult<()> {
        let was_running = self.stop_auto_scan();
        if !was_running {
            debug!(gain, "Scan loop not running, updating stored gain only");
        }

        self.settings.gain = gain;
        if !self.plan.is_empty() {
            Arc::make_mut(&mut self.plan).set_gain(gain);
        }
        info!(gain, "Gain set");

        self.resume(was_running)
    }

    pub fn gain(&self) -> i32 {
        self.settings.gain
    }

    // ------------------------------------------------------------------
    // Buffer
    // ------------------------------------------------------------------

    pub fn set_relative_mode(&mut self, mode: RelativeMode) {
        lock(&self.buffer).set_mode(mode);
    }

    pub fn relative_mode(&self) -> RelativeMode {
        lock(&self.buffer).mode()
    }

    /// Copy of the current readings (empty when no range is configured).
    pub fn dbm_buffer(&self) -> Vec<f64> {
        lock(&self.buffer).snapshot()
    }

    /// Last buffer index written.
    pub fn scan_cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ScanStatsSnapshot {
        self.stats.snapshot()
    }

    /// Read-only handle for other threads.
    pub fn reader(&self) -> SpectrumReader {
        SpectrumReader {
            buffer: self.buffer.clone(),
            cursor: self.cursor.clone(),
            stats: self.stats.clone(),
            status: self.scan_loop.status_handle(),
        }
    }
}

/// Cloneable read-only view of an engine's buffer and progress.
#[derive(Clone)]
pub struct SpectrumReader {
    buffer: Arc<Mutex<PowerBuffer>>,
    cursor: Arc<AtomicUsize>,
    stats: Arc<ScanStats>,
    status: Arc<Mutex<LoopStatus>>,
}

impl SpectrumReader {
    /// Copy of the current readings.
    pub fn dbm_buffer(&self) -> Vec<f64> {
        lock(&self.buffer).snapshot()
    }

    pub fn len(&self) -> usize {
        lock(&self.buffer).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scan_cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn relative_mode(&self) -> RelativeMode {
        lock(&self.buffer).mode()
    }

    pub fn stats(&self) -> ScanStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn loop_status(&self) -> LoopStatus {
        lock(&self.status).clone()
    }
}
