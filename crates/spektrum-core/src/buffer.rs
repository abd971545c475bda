//! # Power Buffer
//!
//! Flat array of dBm readings covering every usable bin of the tuning plan,
//! plus a parallel baseline array used by relative mode.
//!
//! ## Relative Mode
//!
//! ```text
//!            set(Record)               set(Relative)
//!   None ─────────────────► Record ◄──────────────────► Relative
//!    ▲   seed baseline from           flag only
//!    │   current readings
//!    └──────────────────────── set(None) from anywhere:
//!                              baseline := +inf, readings := +inf
//! ```
//!
//! While recording, each fresh reading is folded into the baseline with a
//! 0.5 weight and the baseline itself is displayed. In relative mode the
//! displayed value is the reading minus the frozen baseline.
//!
//! The buffer itself is not synchronized; the engine keeps it behind a
//! single mutex that the scanner takes once per segment.

use serde::{Deserialize, Serialize};

/// Baseline value meaning "nothing recorded for this bin yet".
///
/// Also written into readings to mean "no data yet".
pub const UNINITIALIZED: f64 = f64::INFINITY;

/// Relative display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelativeMode {
    /// Raw readings
    #[default]
    None,
    /// Accumulate a baseline and display it
    Record,
    /// Display readings relative to the recorded baseline
    Relative,
}

/// Readings and baseline for one tuning plan.
#[derive(Debug, Clone, Default)]
pub struct PowerBuffer {
    dbm: Vec<f64>,
    baseline: Vec<f64>,
    mode: RelativeMode,
}

impl PowerBuffer {
    /// Allocate a buffer of `len` bins with no data and no baseline.
    pub fn new(len: usize) -> Self {
        Self {
            dbm: vec![UNINITIALIZED; len],
            baseline: vec![UNINITIALIZED; len],
            mode: RelativeMode::None,
        }
    }

    /// Replace the storage with `len` fresh bins, keeping the mode.
    pub fn reallocate(&mut self, len: usize) {
        self.dbm = vec![UNINITIALIZED; len];
        self.baseline = vec![UNINITIALIZED; len];
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.dbm.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dbm.is_empty()
    }

    #[inline]
    pub fn mode(&self) -> RelativeMode {
        self.mode
    }

    /// Current readings.
    pub fn dbm(&self) -> &[f64] {
        &self.dbm
    }

    /// Current baseline.
    pub fn baseline(&self) -> &[f64] {
        &self.baseline
    }

    /// Deep copy of the readings.
    pub fn snapshot(&self) -> Vec<f64> {
        self.dbm.clone()
    }

    /// Switch relative mode.
    ///
    /// Returns `false` without touching anything when `target` is already
    /// active.
    pub fn set_mode(&mut self, target: RelativeMode) -> bool {
        if self.mode == target {
            return false;
        }

        match (self.mode, target) {
            (RelativeMode::None, RelativeMode::Record) => {
                self.baseline.copy_from_slice(&self.dbm);
            }
            (_, RelativeMode::None) => {
                self.baseline.fill(UNINITIALIZED);
                self.dbm.fill(UNINITIALIZED);
            }
            _ => {}
        }

        tracing::debug!(from = ?self.mode, to = ?target, "Relative mode changed");
        self.mode = target;
        true
    }

    /// Write one segment's fresh readings starting at `offset`.
    ///
    /// Panics if the slice does not fit; the scanner checks lengths first.
    pub fn write_segment(&mut self, offset: usize, readings: &[f64]) {
        let end = offset + readings.len();
        let dbm = &mut self.dbm[offset..end];
        let baseline = &mut self.baseline[offset..end];

        match self.mode {
            RelativeMode::None => dbm.copy_from_slice(readings),
            RelativeMode::Record => {
                for ((out, base), &x) in dbm.iter_mut().zip(baseline.iter_mut()).zip(readings) {
                    *base = if *base == UNINITIALIZED {
                        x
                    } else {
                        (*base + x) / 2.0
                    };
                    *out = *base;
                }
            }
            RelativeMode::Relative => {
                for ((out, base), &x) in dbm.iter_mut().zip(baseline.iter()).zip(readings) {
                    *out = x - *base;
                }
            }
        }
    }
}
