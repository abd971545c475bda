//! # RTL-SDR Scan Device
//!
//! Sweeps with RTL2832U dongles through runtime-loaded librtlsdr.
//!
//! ## Requirements
//!
//! - librtlsdr installed (`apt install librtlsdr-dev` or equivalent)
//! - the `rtlsdr` cargo feature
//!
//! Without the feature the driver still registers but discovers nothing
//! and refuses to open devices.
//!
//! ## Per-segment acquisition
//!
//! ```text
//! retune? ──► set center / rate / gain ──► discard settle bytes
//!    │
//!    └──► read_sync(2 × samples_needed) ──► convert ──► FftPowerEstimator
//! ```
//!
//! Consecutive segments with the same center, rate or gain skip the
//! corresponding USB round trip.

use spektrum_core::device::{DeviceDriver, DeviceInfo, ScanDevice};
use spektrum_core::error::{ScanError, ScanResult};

#[cfg(feature = "rtlsdr")]
use spektrum_core::device::DirectSampling;
#[cfg(feature = "rtlsdr")]
use spektrum_core::plan::{TuningSegment, AUTO_GAIN};

#[cfg(feature = "rtlsdr")]
use super::rtlsdr_ffi::{self, RtlSdrError, RtlSdrHandle};
#[cfg(feature = "rtlsdr")]
use crate::estimator::{FftPowerEstimator, PowerEstimator};

/// Tunable range of an R820T, Hz.
pub const RTLSDR_MIN_FREQ: u64 = 24_000_000;
pub const RTLSDR_MAX_FREQ: u64 = 1_766_000_000;

/// `read_sync` lengths must be a multiple of this.
pub const READ_ALIGN: usize = 512;

/// Bytes thrown away after retuning while the PLL settles.
pub const SETTLE_BYTES: usize = 4096;

#[cfg(feature = "rtlsdr")]
impl From<RtlSdrError> for ScanError {
    fn from(e: RtlSdrError) -> Self {
        if e.is_disconnect() {
            ScanError::DeviceLost(e.to_string())
        } else {
            ScanError::Device(e.to_string())
        }
    }
}

/// Round a byte count up to the next `read_sync` boundary.
pub fn aligned_read_len(bytes: usize) -> usize {
    bytes.div_ceil(READ_ALIGN).max(1) * READ_ALIGN
}

/// RTL-SDR driver.
pub struct RtlSdrDriver {
    available: bool,
}

impl RtlSdrDriver {
    pub fn new() -> Self {
        #[cfg(feature = "rtlsdr")]
        let available = rtlsdr_ffi::is_available();

        #[cfg(not(feature = "rtlsdr"))]
        let available = false;

        if available {
            tracing::info!("RTL-SDR driver initialized with hardware support");
        } else {
            tracing::debug!("RTL-SDR driver initialized (stub mode - no librtlsdr)");
        }

        Self { available }
    }

    /// True when librtlsdr is loaded.
    pub fn is_available(&self) -> bool {
        self.available
    }
}

impl Default for RtlSdrDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDriver for RtlSdrDriver {
    fn name(&self) -> &str {
        "rtlsdr"
    }

    fn discover(&self) -> Vec<DeviceInfo> {
        #[cfg(feature = "rtlsdr")]
        {
            if !self.available {
                return Vec::new();
            }

            (0..rtlsdr_ffi::get_device_count())
                .map(|i| {
                    let name = rtlsdr_ffi::get_device_name(i).unwrap_or_else(|| "Unknown".to_string());
                    let usb = rtlsdr_ffi::get_device_usb_strings(i).unwrap_or_default();
                    let label = if usb.product.is_empty() {
                        name
                    } else {
                        format!("{} ({})", usb.product, name)
                    };
                    tracing::debug!("Found RTL-SDR device #{}: {}", i, label);
                    DeviceInfo {
                        driver: "rtlsdr".to_string(),
                        index: i,
                        label,
                        serial: usb.serial,
                    }
                })
                .collect()
        }

        #[cfg(not(feature = "rtlsdr"))]
        {
            tracing::debug!("RTL-SDR discover: stub mode, no devices");
            Vec::new()
        }
    }

    fn open(&self, index: u32) -> ScanResult<Box<dyn ScanDevice>> {
        if !self.available {
            return Err(ScanError::Device(
                "RTL-SDR library not available. Install librtlsdr and enable the 'rtlsdr' feature."
                    .to_string(),
            ));
        }

        #[cfg(feature = "rtlsdr")]
        {
            Ok(Box::new(RtlSdrDevice::open(index)?))
        }

        #[cfg(not(feature = "rtlsdr"))]
        {
            let _ = index;
            Err(ScanError::Device(
                "RTL-SDR support not compiled in. Enable the 'rtlsdr' feature.".to_string(),
            ))
        }
    }
}

/// An open RTL-SDR dongle.
#[cfg(feature = "rtlsdr")]
pub struct RtlSdrDevice {
    name: String,
    handle: RtlSdrHandle,
    estimator: FftPowerEstimator,
    buffer: Vec<u8>,
    center_freq: Option<u64>,
    sample_rate: Option<u32>,
    gain: Option<i32>,
}

#[cfg(feature = "rtlsdr")]
impl RtlSdrDevice {
    pub fn open(index: u32) -> ScanResult<Self> {
        let handle = RtlSdrHandle::open(index)?;
        let name = rtlsdr_ffi::get_device_name(index).unwrap_or_else(|| format!("RTL-SDR #{}", index));
        Ok(Self {
            name,
            handle,
            estimator: FftPowerEstimator::default(),
            buffer: Vec::new(),
            center_freq: None,
            sample_rate: None,
            gain: None,
        })
    }

    pub fn with_estimator(mut self, estimator: FftPowerEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    fn acquisition_error(index: usize, e: RtlSdrError) -> ScanError {
        if e.is_disconnect() {
            ScanError::DeviceLost(e.to_string())
        } else {
            ScanError::acquisition(index, e.to_string())
        }
    }

    /// Apply whatever differs from the last segment. Returns true if the
    /// tuner moved.
    fn tune(&mut self, segment: &TuningSegment) -> Result<bool, RtlSdrError> {
        let mut retuned = false;

        if self.sample_rate != Some(segment.sample_rate) {
            self.sample_rate = None;
            self.handle.set_sample_rate(segment.sample_rate)?;
            self.sample_rate = Some(segment.sample_rate);
            retuned = true;
        }

        if self.gain != Some(segment.gain) {
            self.gain = None;
            if segment.gain == AUTO_GAIN {
                self.handle.set_tuner_gain_mode(false)?;
            } else {
                self.handle.set_tuner_gain_mode(true)?;
                let actual = self.handle.set_tuner_gain(segment.gain)?;
                tracing::debug!(requested = segment.gain, actual, "Tuner gain set");
            }
            self.gain = Some(segment.gain);
        }

        if self.center_freq != Some(segment.center_freq) {
            self.center_freq = None;
            // Range checked by the caller.
            self.handle.set_center_freq(segment.center_freq as u32)?;
            self.center_freq = Some(segment.center_freq);
            retuned = true;
        }

        Ok(retuned)
    }

    fn read_exact(&mut self, bytes: usize) -> Result<(), RtlSdrError> {
        let len = aligned_read_len(bytes);
        self.buffer.resize(len, 0);
        let got = self.handle.read_sync(&mut self.buffer)?;
        if got < bytes {
            return Err(RtlSdrError::ShortRead {
                expected: bytes,
                got,
            });
        }
        Ok(())
    }
}

#[cfg(feature = "rtlsdr")]
impl ScanDevice for RtlSdrDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset_buffer(&mut self) -> ScanResult<()> {
        Ok(self.handle.reset_buffer()?)
    }

    fn set_offset_tuning(&mut self, enabled: bool) -> ScanResult<()> {
        Ok(self.handle.set_offset_tuning(enabled)?)
    }

    fn set_direct_sampling(&mut self, mode: DirectSampling) -> ScanResult<()> {
        Ok(self.handle.set_direct_sampling(mode.as_raw())?)
    }

    fn set_frequency_correction(&mut self, ppm: i32) -> ScanResult<()> {
        Ok(self.handle.set_freq_correction(ppm)?)
    }

    fn tuner_gains(&mut self) -> ScanResult<Vec<i32>> {
        Ok(self.handle.gains().to_vec())
    }

    fn acquire_segment(&mut self, index: usize, segment: &TuningSegment) -> ScanResult<Vec<f64>> {
        if !(RTLSDR_MIN_FREQ..=RTLSDR_MAX_FREQ).contains(&segment.center_freq) {
            return Err(ScanError::acquisition(
                index,
                format!("center {} Hz outside the tuner range", segment.center_freq),
            ));
        }

        let retuned = self.tune(segment).map_err(|e| Self::acquisition_error(index, e))?;
        if retuned {
            self.read_exact(SETTLE_BYTES)
                .map_err(|e| Self::acquisition_error(index, e))?;
        }

        let bytes = self.estimator.samples_needed(segment) * 2;
        self.read_exact(bytes)
            .map_err(|e| Self::acquisition_error(index, e))?;

        let samples = rtlsdr_ffi::convert_samples(&self.buffer[..bytes]);
        Ok(self.estimator.estimate(&samples, segment))
    }
}
