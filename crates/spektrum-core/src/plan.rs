//! # Tuning Plans
//!
//! A tuning plan is the ordered list of segments a sweep visits, together
//! with the layout of each segment's usable bins inside the flat power
//! buffer.
//!
//! ```text
//!  segment:      0           1                 2
//!  usable bins: [a a a]     [b b b b b]       [c c]
//!  buffer:      [a a a  b b b b b  c c]
//!  offsets:      0      3          8
//! ```
//!
//! Plans are produced by a [`TuningSolver`] and replaced wholesale on every
//! reconfiguration. The only field the engine ever changes in place is the
//! per-segment gain.

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// Gain value selecting the tuner's automatic gain control.
///
/// Manual gains are in tenths of a dB, as reported by the tuner.
pub const AUTO_GAIN: i32 = -100;

/// Window applied to each capture before the FFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// No tapering
    #[default]
    Rectangle,
    /// Raised cosine
    Hann,
    /// Raised cosine with non-zero endpoints
    Hamming,
}

/// A requested sweep range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSpec {
    /// Lower edge in Hz
    pub lower: u64,
    /// Upper edge in Hz
    pub upper: u64,
    /// Requested bin spacing in Hz (upper bound, the solver may go finer)
    pub step: u64,
}

impl RangeSpec {
    /// Create a new range.
    pub fn new(lower: u64, upper: u64, step: u64) -> Self {
        Self { lower, upper, step }
    }

    /// Width of the range in Hz.
    pub fn span(&self) -> u64 {
        self.upper.saturating_sub(self.lower)
    }

    /// Build an `InvalidRange` error for this range.
    pub fn invalid(&self, reason: impl Into<String>) -> ScanError {
        ScanError::InvalidRange {
            lower: self.lower,
            upper: self.upper,
            step: self.step,
            reason: reason.into(),
        }
    }

    /// Check the basic shape of the range.
    pub fn validate(&self) -> ScanResult<()> {
        if self.lower >= self.upper {
            return Err(self.invalid("lower bound must be below upper bound"));
        }
        if self.step == 0 {
            return Err(self.invalid("bin step must be positive"));
        }
        Ok(())
    }
}

/// Device-independent settings the solver and DSP collaborator work from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Preferred device sample rate per hop in Hz
    pub target_rate: u32,
    /// Lowest sample rate the device supports in Hz
    pub min_rate: u32,
    /// Fraction of each hop's bins discarded at the edges (0.0 - <1.0)
    pub crop: f64,
    /// Gain applied to every segment (tenths of dB, or [`AUTO_GAIN`])
    pub gain: i32,
    /// Window handed to the DSP collaborator
    pub window: WindowKind,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            target_rate: 2_400_000,
            min_rate: 1_000_000,
            crop: 0.0,
            gain: AUTO_GAIN,
            window: WindowKind::Rectangle,
        }
    }
}

/// One hop of the sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningSegment {
    /// Tuner center frequency in Hz
    pub center_freq: u64,
    /// Device sample rate in Hz
    pub sample_rate: u32,
    /// Integer decimation applied before the FFT
    pub downsample: u32,
    /// FFT size exponent (`bin_count = 2^bin_exp`)
    pub bin_exp: u32,
    /// First usable raw bin
    pub crop_first: usize,
    /// Last usable raw bin (inclusive)
    pub crop_last: usize,
    /// Tuner gain in tenths of dB, or [`AUTO_GAIN`]
    pub gain: i32,
    /// Window for the DSP collaborator
    pub window: WindowKind,
}

impl TuningSegment {
    /// Raw FFT bins produced for this segment.
    #[inline]
    pub fn bin_count(&self) -> usize {
        1usize << self.bin_exp
    }

    /// Bins kept after cropping.
    #[inline]
    pub fn usable_bins(&self) -> usize {
        self.crop_last - self.crop_first + 1
    }

    /// Sample rate seen by the FFT after decimation.
    #[inline]
    pub fn fft_rate(&self) -> f64 {
        self.sample_rate as f64 / self.downsample.max(1) as f64
    }

    /// Width of one bin in Hz.
    #[inline]
    pub fn bin_width(&self) -> f64 {
        self.fft_rate() / self.bin_count() as f64
    }

    /// Center frequency of usable bin `j`.
    pub fn frequency_of_bin(&self, j: usize) -> f64 {
        let raw = (self.crop_first + j) as f64;
        self.center_freq as f64 - self.fft_rate() / 2.0 + raw * self.bin_width()
    }
}

/// Ordered segments plus their layout in the power buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TuningPlan {
    segments: Vec<TuningSegment>,
    offsets: Vec<usize>,
    total_bins: usize,
}

impl TuningPlan {
    /// Build a plan, deriving buffer offsets from the crop bounds.
    pub fn new(segments: Vec<TuningSegment>) -> Self {
        let mut offsets = Vec::with_capacity(segments.len());
        let mut total_bins = 0;
        for seg in &segments {
            offsets.push(total_bins);
            total_bins += seg.usable_bins();
        }
        Self {
            segments,
            offsets,
            total_bins,
        }
    }

    /// Number of segments (`tune_count`).
    #[inline]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True when the plan has no segments.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total usable bins across all segments.
    #[inline]
    pub fn total_bins(&self) -> usize {
        self.total_bins
    }

    pub fn segments(&self) -> &[TuningSegment] {
        &self.segments
    }

    pub fn segment(&self, index: usize) -> &TuningSegment {
        &self.segments[index]
    }

    /// Buffer offset of every segment.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn offset(&self, index: usize) -> usize {
        self.offsets[index]
    }

    /// Overwrite the gain of every segment.
    pub fn set_gain(&mut self, gain: i32) {
        for seg in &mut self.segments {
            seg.gain = gain;
        }
    }

    /// Segment index owning absolute buffer index `index`.
    pub fn segment_of(&self, index: usize) -> Option<usize> {
        if index >= self.total_bins {
            return None;
        }
        Some(self.offsets.partition_point(|&off| off <= index) - 1)
    }

    /// Frequency in Hz of absolute buffer index `index`.
    pub fn frequency_of(&self, index: usize) -> Option<f64> {
        let seg = self.segment_of(index)?;
        Some(self.segments[seg].frequency_of_bin(index - self.offsets[seg]))
    }
}

/// Turns a frequency range into a tuning plan.
pub trait TuningSolver: Send + Sync {
    /// Solve `range` under `settings`.
    ///
    /// `previous` is the plan being replaced, if any. Implementations must
    /// be deterministic for identical inputs.
    fn solve(
        &self,
        settings: &SolverSettings,
        range: &RangeSpec,
        previous: Option<&TuningPlan>,
    ) -> ScanResult<TuningPlan>;
}

#[cfg(test)]
pub(crate) fn test_segment(usable: usize) -> TuningSegment {
    TuningSegment {
        center_freq: 100_000_000,
        sample_rate: 2_048_000,
        downsample: 1,
        bin_exp: 10,
        crop_first: 0,
        crop_last: usable - 1,
        gain: AUTO_GAIN,
        window: WindowKind::Rectangle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_scenario() {
        let plan = TuningPlan::new(vec![test_segment(3), test_segment(5)]);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.offsets(), &[0, 3]);
        assert_eq!(plan.total_bins(), 8);
        assert_eq!(
            plan.total_bins(),
            plan.offset(1) + plan.segment(1).usable_bins()
        );
    }

    #[test]
    fn test_offset_invariant() {
        let plan = TuningPlan::new(vec![test_segment(7), test_segment(1), test_segment(4)]);
        for i in 0..plan.len() - 1 {
            let seg = plan.segment(i);
            assert_eq!(
                plan.offset(i + 1),
                plan.offset(i) + (seg.crop_last - seg.crop_first + 1)
            );
        }
    }

    #[test]
    fn test_segment_of() {
        let plan = TuningPlan::new(vec![test_segment(3), test_segment(5)]);
        assert_eq!(plan.segment_of(0), Some(0));
        assert_eq!(plan.segment_of(2), Some(0));
        assert_eq!(plan.segment_of(3), Some(1));
        assert_eq!(plan.segment_of(7), Some(1));
        assert_eq!(plan.segment_of(8), None);
    }

    #[test]
    fn test_set_gain() {
        let mut plan = TuningPlan::new(vec![test_segment(3), test_segment(5)]);
        plan.set_gain(297);
        assert!(plan.segments().iter().all(|s| s.gain == 297));
    }

    #[test]
    fn test_bin_frequencies() {
        let mut seg = test_segment(1024);
        seg.sample_rate = 1_024_000;
        assert!((seg.bin_width() - 1000.0).abs() < 1e-9);
        assert!((seg.frequency_of_bin(0) - 99_488_000.0).abs() < 1e-6);
        assert!((seg.frequency_of_bin(512) - 100_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_range_validate() {
        assert!(RangeSpec::new(88_000_000, 108_000_000, 10_000).validate().is_ok());
        assert!(matches!(
            RangeSpec::new(108_000_000, 88_000_000, 10_000).validate(),
            Err(ScanError::InvalidRange { .. })
        ));
        assert!(RangeSpec::new(1, 2, 0).validate().is_err());
    }

    #[test]
    fn test_empty_plan() {
        let plan = TuningPlan::default();
        assert!(plan.is_empty());
        assert_eq!(plan.total_bins(), 0);
        assert_eq!(plan.frequency_of(0), None);
    }
}
