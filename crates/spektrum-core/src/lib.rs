//! # Spektrum Core
//!
//! Continuous spectrum sweeping for software-defined radios.
//!
//! A [`ScanEngine`] turns a frequency range into a [`TuningPlan`], sizes a
//! shared [`PowerBuffer`] to match, and runs a background loop that
//! retunes the device segment by segment, writing dBm readings into the
//! buffer while readers take snapshots.
//!
//! ```text
//! configure_frequency_range ──► TuningSolver ──► TuningPlan
//!                                                    │
//!                     ┌──────────── ScanLoop ◄───────┘
//!                     │  scan_one_segment(i), i = 0, 1, ... wrap
//!                     ▼
//!   ScanDevice::acquire_segment ──► PowerBuffer (mutex) ──► SpectrumReader
//! ```
//!
//! Devices live in `spektrum-sim` (simulator, RTL-SDR).

pub mod buffer;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod observe;
pub mod plan;
pub mod scan_loop;
pub mod scanner;
pub mod solver;
pub mod stats;
pub mod thread;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::{PowerBuffer, RelativeMode};
pub use config::{ConfigError, SpektrumConfig};
pub use device::{DeviceDriver, DeviceInfo, DirectSampling, DriverRegistry, ScanDevice};
pub use engine::{ScanEngine, SpectrumReader};
pub use error::{ScanError, ScanResult};
pub use plan::{RangeSpec, SolverSettings, TuningPlan, TuningSegment, TuningSolver, WindowKind, AUTO_GAIN};
pub use scan_loop::LoopStatus;
pub use solver::RtlPowerSolver;
pub use stats::ScanStatsSnapshot;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Every critical section in this crate leaves its data consistent at each
/// step, so a poisoned lock carries no torn state.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
