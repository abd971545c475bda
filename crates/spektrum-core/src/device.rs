//! Scan device abstraction
//!
//! A [`ScanDevice`] is an opened receiver that can retune to a segment and
//! hand back one power reading per usable bin. Drivers enumerate and open
//! devices; the [`DriverRegistry`] picks a driver by name.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::plan::TuningSegment;

/// An opened device shared between the engine and the scan thread.
pub type SharedDevice = Arc<Mutex<Box<dyn ScanDevice>>>;

/// Direct sampling input selection (HF reception without the tuner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectSampling {
    /// Use the tuner
    #[default]
    Off,
    /// Sample the I branch directly
    I,
    /// Sample the Q branch directly
    Q,
}

impl DirectSampling {
    /// Raw value used by librtlsdr.
    pub fn as_raw(self) -> i32 {
        match self {
            DirectSampling::Off => 0,
            DirectSampling::I => 1,
            DirectSampling::Q => 2,
        }
    }

    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(DirectSampling::Off),
            1 => Some(DirectSampling::I),
            2 => Some(DirectSampling::Q),
            _ => None,
        }
    }
}

/// An opened receiver.
///
/// All calls are synchronous. The engine serializes access behind a mutex,
/// so implementations need only be `Send`.
pub trait ScanDevice: Send {
    /// Human-readable device name
    fn name(&self) -> &str;

    /// Flush any samples buffered by the driver.
    fn reset_buffer(&mut self) -> ScanResult<()>;

    fn set_offset_tuning(&mut self, enabled: bool) -> ScanResult<()>;

    fn set_direct_sampling(&mut self, mode: DirectSampling) -> ScanResult<()>;

    /// Crystal frequency correction in parts per million.
    fn set_frequency_correction(&mut self, ppm: i32) -> ScanResult<()>;

    /// Discrete manual gains supported by the tuner, in tenths of dB.
    fn tuner_gains(&mut self) -> ScanResult<Vec<i32>>;

    /// Tune to `segment`, capture, and return one dBm value per usable bin.
    ///
    /// `index` is the segment's position in the plan, used for error
    /// reporting. Transient failures should be returned as
    /// [`ScanError::Acquisition`]; anything else stops the scan loop.
    fn acquire_segment(&mut self, index: usize, segment: &TuningSegment) -> ScanResult<Vec<f64>>;
}

/// Device information for discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Driver name
    pub driver: String,
    /// Index within the driver
    pub index: u32,
    /// Device label/name
    pub label: String,
    /// Serial number, if the driver reports one
    pub serial: String,
}

/// Factory for scan devices.
pub trait DeviceDriver: Send + Sync {
    /// Driver name (e.g. "rtlsdr", "simulator").
    fn name(&self) -> &str;

    /// Discover available devices.
    fn discover(&self) -> Vec<DeviceInfo>;

    /// Number of attached devices.
    fn device_count(&self) -> usize {
        self.discover().len()
    }

    /// Labels of attached devices, in index order.
    fn device_names(&self) -> Vec<String> {
        self.discover().into_iter().map(|d| d.label).collect()
    }

    /// Open device `index`.
    fn open(&self, index: u32) -> ScanResult<Box<dyn ScanDevice>>;
}

/// Registry of available device drivers.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: Vec<Box<dyn DeviceDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Box<dyn DeviceDriver>) {
        self.drivers.push(driver);
    }

    /// Get a driver by name.
    pub fn get(&self, name: &str) -> Option<&dyn DeviceDriver> {
        self.drivers
            .iter()
            .find(|d| d.name() == name)
            .map(|d| d.as_ref())
    }

    /// Names of all registered drivers.
    pub fn list(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    /// Discover all devices across all drivers.
    pub fn discover_all(&self) -> Vec<DeviceInfo> {
        self.drivers.iter().flat_map(|d| d.discover()).collect()
    }

    /// Open `index` on the driver called `driver`.
    pub fn open(&self, driver: &str, index: u32) -> ScanResult<Box<dyn ScanDevice>> {
        self.get(driver)
            .ok_or_else(|| ScanError::Device(format!("Unknown driver: {}", driver)))?
            .open(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDevice;

    impl ScanDevice for NullDevice {
        fn name(&self) -> &str {
            "null"
        }
        fn reset_buffer(&mut self) -> ScanResult<()> {
            Ok(())
        }
        fn set_offset_tuning(&mut self, _enabled: bool) -> ScanResult<()> {
            Ok(())
        }
        fn set_direct_sampling(&mut self, _mode: DirectSampling) -> ScanResult<()> {
            Ok(())
        }
        fn set_frequency_correction(&mut self, _ppm: i32) -> ScanResult<()> {
            Ok(())
        }
        fn tuner_gains(&mut self) -> ScanResult<Vec<i32>> {
            Ok(vec![0, 90, 197])
        }
        fn acquire_segment(&mut self, _index: usize, seg: &TuningSegment) -> ScanResult<Vec<f64>> {
            Ok(vec![-90.0; seg.usable_bins()])
        }
    }

    struct NullDriver;

    impl DeviceDriver for NullDriver {
        fn name(&self) -> &str {
            "null"
        }
        fn discover(&self) -> Vec<DeviceInfo> {
            vec![DeviceInfo {
                driver: "null".into(),
                index: 0,
                label: "Null Device".into(),
                serial: "0000".into(),
            }]
        }
        fn open(&self, index: u32) -> ScanResult<Box<dyn ScanDevice>> {
            if index == 0 {
                Ok(Box::new(NullDevice))
            } else {
                Err(ScanError::Device(format!("no device {}", index)))
            }
        }
    }

    #[test]
    fn test_direct_sampling_raw() {
        for mode in [DirectSampling::Off, DirectSampling::I, DirectSampling::Q] {
            assert_eq!(DirectSampling::from_raw(mode.as_raw()), Some(mode));
        }
        assert_eq!(DirectSampling::from_raw(3), None);
    }

    #[test]
    fn test_driver_defaults() {
        let driver = NullDriver;
        assert_eq!(driver.device_count(), 1);
        assert_eq!(driver.device_names(), vec!["Null Device".to_string()]);
    }

    #[test]
    fn test_registry() {
        let mut registry = DriverRegistry::new();
        assert!(registry.list().is_empty());
        registry.register(Box::new(NullDriver));

        assert_eq!(registry.list(), vec!["null"]);
        assert_eq!(registry.discover_all().len(), 1);
        assert!(registry.open("null", 0).is_ok());
        assert!(matches!(registry.open("null", 4), Err(ScanError::Device(_))));
        assert!(matches!(registry.open("uhd", 0), Err(ScanError::Device(_))));
    }
}
