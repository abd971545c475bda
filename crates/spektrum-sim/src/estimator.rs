//! Power estimation from I/Q captures
//!
//! Turns one segment's worth of complex samples into one dB reading per
//! usable bin:
//!
//! ```text
//! samples ─► decimate (boxcar, ÷downsample) ─► frames of 2^bin_exp
//!         ─► window ─► FFT ─► |X|² averaged over frames
//!         ─► shift so bin 0 is the lowest frequency ─► crop ─► 10·log10
//! ```
//!
//! Readings are normalized so white noise of total power P reads
//! 10·log10(P) in every bin regardless of window or FFT size, plus a
//! fixed calibration offset.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use spektrum_core::plan::{TuningSegment, WindowKind};

/// Floor applied before taking the log so empty bins stay finite.
const POWER_FLOOR: f64 = 1e-20;

/// Computes per-bin power for a captured segment.
pub trait PowerEstimator: Send {
    /// Complex samples `estimate` needs for `segment`.
    fn samples_needed(&self, segment: &TuningSegment) -> usize;

    /// One dB value per usable bin of `segment`.
    ///
    /// Returns fewer values (possibly none) if `samples` is too short to
    /// fill a single frame.
    fn estimate(&mut self, samples: &[Complex64], segment: &TuningSegment) -> Vec<f64>;
}

/// Averaged-periodogram estimator backed by `rustfft`.
pub struct FftPowerEstimator {
    ffts: HashMap<usize, Arc<dyn Fft<f64>>>,
    frames: usize,
    calibration_db: f64,
    windows: HashMap<(WindowKind, usize), Arc<[f64]>>,
}

impl fmt::Debug for FftPowerEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftPowerEstimator")
            .field("frames", &self.frames)
            .field("calibration_db", &self.calibration_db)
            .finish()
    }
}

impl Default for FftPowerEstimator {
    fn default() -> Self {
        Self::new(8)
    }
}

impl FftPowerEstimator {
    /// Average `frames` FFTs per segment (at least one).
    pub fn new(frames: usize) -> Self {
        Self {
            ffts: HashMap::new(),
            frames: frames.max(1),
            calibration_db: 0.0,
            windows: HashMap::new(),
        }
    }

    /// Add a fixed offset to every reading.
    pub fn with_calibration(mut self, offset_db: f64) -> Self {
        self.calibration_db = offset_db;
        self
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    // Planners are not Send, so only the planned FFTs are kept.
    fn fft(&mut self, n: usize) -> Arc<dyn Fft<f64>> {
        self.ffts
            .entry(n)
            .or_insert_with(|| FftPlanner::new().plan_fft_forward(n))
            .clone()
    }

    fn window(&mut self, kind: WindowKind, n: usize) -> Arc<[f64]> {
        self.windows
            .entry((kind, n))
            .or_insert_with(|| window_coefficients(kind, n).into())
            .clone()
    }
}

impl PowerEstimator for FftPowerEstimator {
    fn samples_needed(&self, segment: &TuningSegment) -> usize {
        segment.bin_count() * segment.downsample.max(1) as usize * self.frames
    }

    fn estimate(&mut self, samples: &[Complex64], segment: &TuningSegment) -> Vec<f64> {
        let n = segment.bin_count();
        let decimated = decimate(samples, segment.downsample.max(1) as usize);
        let frames = decimated.len() / n;
        if frames == 0 {
            return Vec::new();
        }

        let fft = self.fft(n);
        let window = self.window(segment.window, n);
        let window_energy: f64 = window.iter().map(|w| w * w).sum();

        let mut buf = vec![Complex64::new(0.0, 0.0); n];
        let mut scratch = vec![Complex64::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        let mut power = vec![0.0; n];

        for frame in decimated.chunks_exact(n) {
            for ((b, &x), &w) in buf.iter_mut().zip(frame).zip(window.iter()) {
                *b = x * w;
            }
            fft.process_with_scratch(&mut buf, &mut scratch);
            for (p, x) in power.iter_mut().zip(&buf) {
                *p += x.norm_sqr();
            }
        }

        let scale = 1.0 / (frames as f64 * window_energy);
        (segment.crop_first..=segment.crop_last)
            .map(|j| {
                let k = (j + n / 2) % n;
                10.0 * (power[k] * scale).max(POWER_FLOOR).log10() + self.calibration_db
            })
            .collect()
    }
}

/// Average consecutive blocks of `factor` samples.
fn decimate(samples: &[Complex64], factor: usize) -> Vec<Complex64> {
    if factor <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(factor)
        .map(|block| block.iter().sum::<Complex64>() / factor as f64)
        .collect()
}

/// Window coefficients of length `n`.
pub fn window_coefficients(kind: WindowKind, n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f64;
    let cosine = |a0: f64, i: usize| {
        a0 - (1.0 - a0) * (2.0 * std::f64::consts::PI * i as f64 / denom).cos()
    };
    match kind {
        WindowKind::Rectangle => vec![1.0; n],
        WindowKind::Hann => (0..n).map(|i| cosine(0.5, i)).collect(),
        WindowKind::Hamming => (0..n).map(|i| cosine(0.54, i)).collect(),
    }
}
