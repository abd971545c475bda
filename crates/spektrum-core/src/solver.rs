//! rtl_power-style tuning solver
//!
//! Splits a range into the fewest equally sized hops whose (uncropped)
//! bandwidth fits the target sample rate, then picks the smallest
//! power-of-two FFT size whose bins are no wider than the requested step.
//!
//! ```text
//! lower                                                     upper
//!   |-----hop 0-----|-----hop 1-----|-----hop 2-----|  ...    |
//!   <--- bw_seen --->
//!  <----- bw_used = bw_seen / (1 - crop) ----->  (device sample rate)
//! ```
//!
//! Ranges narrower than the device's minimum sample rate are covered by a
//! single hop sampled faster and decimated down. Steps at or above the
//! minimum rate switch to one bin per hop.

use crate::error::ScanResult;
use crate::plan::{RangeSpec, SolverSettings, TuningPlan, TuningSegment, TuningSolver};

/// Upper bound on hops per plan.
pub const MAX_TUNES: usize = 4000;

/// Largest FFT size exponent (2^21 bins).
pub const MAX_BIN_EXP: u32 = 21;

/// Stateless solver reproducing rtl_power's hop/bin arithmetic.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtlPowerSolver;

impl RtlPowerSolver {
    pub fn new() -> Self {
        Self
    }

    fn giant_bins(settings: &SolverSettings, range: &RangeSpec) -> ScanResult<TuningPlan> {
        let hops = ((range.span() / range.step) as usize).max(1);
        if hops > MAX_TUNES {
            return Err(range.invalid(format!("needs {} hops, limit is {}", hops, MAX_TUNES)));
        }
        let rate = u32::try_from(range.step)
            .map_err(|_| range.invalid("bin step exceeds the device sample rate range"))?;

        let segments = (0..hops)
            .map(|i| TuningSegment {
                center_freq: range.lower + i as u64 * range.step + range.step / 2,
                sample_rate: rate,
                downsample: 1,
                bin_exp: 0,
                crop_first: 0,
                crop_last: 0,
                gain: settings.gain,
                window: settings.window,
            })
            .collect();
        Ok(TuningPlan::new(segments))
    }
}

impl TuningSolver for RtlPowerSolver {
    fn solve(
        &self,
        settings: &SolverSettings,
        range: &RangeSpec,
        _previous: Option<&TuningPlan>,
    ) -> ScanResult<TuningPlan> {
        range.validate()?;

        if !(0.0..1.0).contains(&settings.crop) {
            return Err(range.invalid(format!("crop {} outside [0, 1)", settings.crop)));
        }
        if settings.target_rate == 0 || settings.min_rate > settings.target_rate {
            return Err(range.invalid("target rate must be positive and above the minimum rate"));
        }

        if range.step >= settings.min_rate as u64 {
            return Self::giant_bins(settings, range);
        }

        let span = range.span() as f64;
        let keep = 1.0 - settings.crop;
        let target = settings.target_rate as f64;

        let hops = (1..=MAX_TUNES)
            .find(|&i| span / i as f64 / keep <= target)
            .ok_or_else(|| range.invalid(format!("needs more than {} hops", MAX_TUNES)))?;

        let bw_seen = span / hops as f64;
        let fft_rate = bw_seen / keep;

        let downsample = if fft_rate < settings.min_rate as f64 {
            (settings.min_rate as f64 / fft_rate).ceil() as u32
        } else {
            1
        };
        let sample_rate = (fft_rate * downsample as f64).round() as u32;

        let bin_exp = (1..=MAX_BIN_EXP)
            .find(|&e| fft_rate / (1u64 << e) as f64 <= range.step as f64)
            .ok_or_else(|| range.invalid("bin step too fine for the largest FFT size"))?;
        let bin_count = 1usize << bin_exp;
        let crop_first = (bin_count as f64 * settings.crop / 2.0).floor() as usize;
        let crop_last = bin_count - 1 - crop_first;

        let segments: Vec<TuningSegment> = (0..hops)
            .map(|i| TuningSegment {
                center_freq: (range.lower as f64 + (i as f64 + 0.5) * bw_seen).round() as u64,
                sample_rate,
                downsample,
                bin_exp,
                crop_first,
                crop_last,
                gain: settings.gain,
                window: settings.window,
            })
            .collect();

        tracing::debug!(
            hops,
            bins = bin_count,
            usable = crop_last - crop_first + 1,
            sample_rate,
            downsample,
            "Solved {}..{} Hz",
            range.lower,
            range.upper
        );

        Ok(TuningPlan::new(segments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;

    fn solve(range: RangeSpec, settings: &SolverSettings) -> ScanResult<TuningPlan> {
        RtlPowerSolver::new().solve(settings, &range, None)
    }

    #[test]
    fn test_fm_band() {
        let plan = solve(
            RangeSpec::new(88_000_000, 108_000_000, 10_000),
            &SolverSettings::default(),
        )
        .unwrap();

        assert_eq!(plan.len(), 9);
        let seg = plan.segment(0);
        assert_eq!(seg.bin_count(), 256);
        assert_eq!(seg.usable_bins(), 256);
        assert_eq!(seg.downsample, 1);
        assert!(seg.sample_rate <= 2_400_000);
        assert!(seg.bin_width() <= 10_000.0);
        assert_eq!(plan.total_bins(), 9 * 256);
        assert_eq!(seg.center_freq, 89_111_111);
    }

    #[test]
    fn test_crop_adds_hops() {
        let settings = SolverSettings {
            crop: 0.25,
            ..Default::default()
        };
        let plan = solve(RangeSpec::new(88_000_000, 108_000_000, 10_000), &settings).unwrap();

        assert_eq!(plan.len(), 12);
        let seg = plan.segment(0);
        assert_eq!(seg.bin_count(), 256);
        assert_eq!(seg.crop_first, 32);
        assert_eq!(seg.crop_last, 223);
        assert_eq!(plan.total_bins(), 12 * 192);
    }

    #[test]
    fn test_narrow_range_downsamples() {
        let plan = solve(
            RangeSpec::new(100_000_000, 100_200_000, 1_000),
            &SolverSettings::default(),
        )
        .unwrap();

        assert_eq!(plan.len(), 1);
        let seg = plan.segment(0);
        assert_eq!(seg.downsample, 5);
        assert_eq!(seg.sample_rate, 1_000_000);
        assert_eq!(seg.bin_count(), 256);
        assert!((seg.fft_rate() - 200_000.0).abs() < 1.0);
    }

    #[test]
    fn test_giant_bins() {
        let plan = solve(
            RangeSpec::new(400_000_000, 410_000_000, 2_000_000),
            &SolverSettings::default(),
        )
        .unwrap();

        assert_eq!(plan.len(), 5);
        assert_eq!(plan.total_bins(), 5);
        assert_eq!(plan.segment(0).center_freq, 401_000_000);
    }

    #[test]
    fn test_invalid_inputs() {
        let settings = SolverSettings::default();
        assert!(matches!(
            solve(RangeSpec::new(108_000_000, 88_000_000, 10_000), &settings),
            Err(ScanError::InvalidRange { .. })
        ));
        assert!(solve(RangeSpec::new(88_000_000, 108_000_000, 0), &settings).is_err());

        let bad_crop = SolverSettings {
            crop: 1.0,
            ..Default::default()
        };
        assert!(solve(RangeSpec::new(88_000_000, 108_000_000, 10_000), &bad_crop).is_err());
    }

    #[test]
    fn test_gain_and_window_propagate() {
        let settings = SolverSettings {
            gain: 297,
            window: crate::plan::WindowKind::Hann,
            ..Default::default()
        };
        let plan = solve(RangeSpec::new(88_000_000, 92_000_000, 50_000), &settings).unwrap();
        assert!(plan.segments().iter().all(|s| s.gain == 297));
        assert!(plan
            .segments()
            .iter()
            .all(|s| s.window == crate::plan::WindowKind::Hann));
    }

    #[test]
    fn test_deterministic() {
        let settings = SolverSettings::default();
        let range = RangeSpec::new(430_000_000, 440_000_000, 5_000);
        assert_eq!(solve(range, &settings).unwrap(), solve(range, &settings).unwrap());
    }

    #[test]
    fn test_hops_cover_range() {
        let range = RangeSpec::new(88_000_000, 108_000_000, 10_000);
        let plan = solve(range, &SolverSettings::default()).unwrap();
        let first = plan.frequency_of(0).unwrap();
        let last = plan.frequency_of(plan.total_bins() - 1).unwrap();
        assert!((first - range.lower as f64).abs() < 10_000.0);
        assert!((range.upper as f64 - last).abs() < 10_000.0);
    }
}
