//! Software Scan Device
//!
//! A [`ScanDevice`] that synthesizes I/Q for each segment instead of
//! reading hardware: complex Gaussian noise plus a list of continuous
//! carriers, fed through the same [`FftPowerEstimator`] the RTL-SDR
//! driver uses.
//!
//! ```text
//!  emitters ──┐
//!             ├─► tones at (f - LO) ─┐
//!  LO error ──┘                      ├─► I/Q ─► FftPowerEstimator ─► dB
//!  noise floor ──► AWGN ─────────────┘
//! ```
//!
//! The local oscillator is off by `crystal_error_ppm` until a matching
//! frequency correction is applied. Failure injection exercises the scan
//! loop's recovery paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use spektrum_core::device::{DeviceDriver, DeviceInfo, DirectSampling, ScanDevice};
use spektrum_core::error::{ScanError, ScanResult};
use spektrum_core::plan::{TuningSegment, AUTO_GAIN};

use crate::estimator::{FftPowerEstimator, PowerEstimator};

/// Gain applied in automatic gain mode, in dB.
const AUTO_GAIN_DB: f64 = 30.0;

/// Largest frequency correction accepted, in ppm.
const MAX_PPM: i32 = 1000;

/// Gain steps of an R820T tuner, tenths of dB.
pub const R820T_GAINS: [i32; 29] = [
    0, 9, 14, 27, 37, 77, 87, 125, 144, 157, 166, 197, 207, 229, 254, 280, 297, 328, 338, 364,
    372, 386, 402, 421, 434, 439, 445, 480, 496,
];

/// A continuous carrier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Emitter {
    /// Carrier frequency in Hz
    pub frequency: f64,
    /// Power at the antenna in dBm
    pub power_dbm: f64,
}

impl Emitter {
    pub fn new(frequency: f64, power_dbm: f64) -> Self {
        Self {
            frequency,
            power_dbm,
        }
    }
}

/// Simulated radio environment and device behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Noise power per bin in dBm
    pub noise_floor_dbm: f64,
    pub emitters: Vec<Emitter>,
    /// Local oscillator error in ppm
    pub crystal_error_ppm: f64,
    /// FFT frames averaged per segment
    pub frames: usize,
    /// Time spent per acquisition
    pub dwell: Duration,
    /// Fixed RNG seed; entropy-seeded when absent
    pub seed: Option<u64>,
    /// Fail every n-th acquisition with a recoverable error
    pub fail_every: Option<usize>,
    /// Report the device lost after n acquisitions
    pub lose_after: Option<usize>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            noise_floor_dbm: -90.0,
            emitters: Vec::new(),
            crystal_error_ppm: 0.0,
            frames: 8,
            dwell: Duration::ZERO,
            seed: None,
            fail_every: None,
            lose_after: None,
        }
    }
}

impl SimulatorConfig {
    pub fn with_emitter(mut self, frequency: f64, power_dbm: f64) -> Self {
        self.emitters.push(Emitter::new(frequency, power_dbm));
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Software scan device.
pub struct SimulatedDevice {
    name: String,
    config: SimulatorConfig,
    estimator: FftPowerEstimator,
    rng: StdRng,
    ppm: i32,
    offset_tuning: bool,
    direct_sampling: DirectSampling,
    acquisitions: Arc<AtomicUsize>,
}

impl SimulatedDevice {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            name: "Spektrum Simulator".to_string(),
            estimator: FftPowerEstimator::new(config.frames),
            config,
            rng,
            ppm: 0,
            offset_tuning: false,
            direct_sampling: DirectSampling::Off,
            acquisitions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Shared counter of acquisition attempts.
    pub fn acquisitions(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.acquisitions)
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn offset_tuning(&self) -> bool {
        self.offset_tuning
    }

    pub fn direct_sampling(&self) -> DirectSampling {
        self.direct_sampling
    }

    pub fn frequency_correction(&self) -> i32 {
        self.ppm
    }

    /// Frequency the oscillator actually lands on for a requested center.
    pub fn actual_lo(&self, center_freq: u64) -> f64 {
        let error = self.config.crystal_error_ppm - self.ppm as f64;
        center_freq as f64 * (1.0 + error * 1e-6)
    }

    fn gain_db(gain: i32) -> f64 {
        if gain == AUTO_GAIN {
            AUTO_GAIN_DB
        } else {
            gain as f64 / 10.0
        }
    }

    fn synthesize(&mut self, segment: &TuningSegment) -> Vec<Complex64> {
        let len = self.estimator.samples_needed(segment);
        let fs = segment.sample_rate as f64;
        let gain_db = Self::gain_db(segment.gain);
        let lo = self.actual_lo(segment.center_freq);

        let noise_std = (10f64.powf((self.config.noise_floor_dbm + gain_db) / 10.0) / 2.0).sqrt();
        let mut samples: Vec<Complex64> = (0..len)
            .map(|_| {
                let i: f64 = self.rng.sample(StandardNormal);
                let q: f64 = self.rng.sample(StandardNormal);
                Complex64::new(i, q) * noise_std
            })
            .collect();

        // Tone amplitude reads as power_dbm in its bin with a rectangular window.
        let bins = segment.bin_count() as f64;
        for emitter in &self.config.emitters {
            let offset = emitter.frequency - lo;
            if offset.abs() >= fs / 2.0 {
                continue;
            }
            let amplitude = (10f64.powf((emitter.power_dbm + gain_db) / 10.0) / bins).sqrt();
            let phase: f64 = self.rng.gen_range(0.0..std::f64::consts::TAU);
            let step = std::f64::consts::TAU * offset / fs;
            for (n, s) in samples.iter_mut().enumerate() {
                *s += Complex64::from_polar(amplitude, phase + step * n as f64);
            }
        }

        samples
    }
}

impl ScanDevice for SimulatedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset_buffer(&mut self) -> ScanResult<()> {
        debug!("{}: buffer reset", self.name);
        Ok(())
    }

    fn set_offset_tuning(&mut self, enabled: bool) -> ScanResult<()> {
        self.offset_tuning = enabled;
        Ok(())
    }

    fn set_direct_sampling(&mut self, mode: DirectSampling) -> ScanResult<()> {
        self.direct_sampling = mode;
        Ok(())
    }

    fn set_frequency_correction(&mut self, ppm: i32) -> ScanResult<()> {
        if ppm.abs() > MAX_PPM {
            return Err(ScanError::Device(format!(
                "frequency correction {} ppm outside ±{}",
                ppm, MAX_PPM
            )));
        }
        self.ppm = ppm;
        Ok(())
    }

    fn tuner_gains(&mut self) -> ScanResult<Vec<i32>> {
        Ok(R820T_GAINS.to_vec())
    }

    fn acquire_segment(&mut self, index: usize, segment: &TuningSegment) -> ScanResult<Vec<f64>> {
        let count = self.acquisitions.fetch_add(1, Ordering::Relaxed) + 1;

        if let Some(limit) = self.config.lose_after {
            if count > limit {
                return Err(ScanError::DeviceLost(format!(
                    "{} disconnected after {} acquisitions",
                    self.name, limit
                )));
            }
        }
        if let Some(every) = self.config.fail_every.filter(|&n| n > 0) {
            if count % every == 0 {
                return Err(ScanError::acquisition(index, "simulated dropped transfer"));
            }
        }

        if !self.config.dwell.is_zero() {
            std::thread::sleep(self.config.dwell);
        }

        let samples = self.synthesize(segment);
        trace!(index, samples = samples.len(), center = segment.center_freq, "Simulated capture");
        Ok(self.estimator.estimate(&samples, segment))
    }
}

/// Driver exposing a fixed number of simulated devices.
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    count: u32,
    config: SimulatorConfig,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new(1, SimulatorConfig::default())
    }
}

impl SimulatedDriver {
    /// Devices opened from this driver share `config`; a fixed seed is
    /// offset by the device index.
    pub fn new(count: u32, config: SimulatorConfig) -> Self {
        Self { count, config }
    }
}

impl DeviceDriver for SimulatedDriver {
    fn name(&self) -> &str {
        "simulator"
    }

    fn discover(&self) -> Vec<DeviceInfo> {
        (0..self.count)
            .map(|i| DeviceInfo {
                driver: self.name().to_string(),
                index: i,
                label: format!("Spektrum Simulator #{}", i),
                serial: format!("SIM{:03}", i),
            })
            .collect()
    }

    fn open(&self, index: u32) -> ScanResult<Box<dyn ScanDevice>> {
        if index >= self.count {
            return Err(ScanError::Device(format!(
                "no simulator at index {} ({} available)",
                index, self.count
            )));
        }
        let mut config = self.config.clone();
        config.seed = config.seed.map(|s| s.wrapping_add(index as u64));
        let device = SimulatedDevice::new(config).with_name(format!("Spektrum Simulator #{}", index));
        Ok(Box::new(device))
    }
}
