//! # Device drivers
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 ScanEngine                   │
//! ├──────────────────────────────────────────────┤
//! │     ScanDevice / DeviceDriver (core traits)  │
//! ├───────────────────┬──────────────────────────┤
//! │  SimulatedDriver  │  RtlSdrDriver            │
//! │  (software)       │  (librtlsdr, runtime)    │
//! └───────────────────┴──────────────────────────┘
//! ```
//!
//! [`create_default_registry`] registers every driver compiled in;
//! [`build_engine`] turns a [`SpektrumConfig`] into a ready engine.

pub mod rtlsdr;
#[cfg(feature = "rtlsdr")]
pub mod rtlsdr_ffi;

pub use rtlsdr::RtlSdrDriver;

use spektrum_core::config::SpektrumConfig;
use spektrum_core::device::DriverRegistry;
use spektrum_core::error::{ScanError, ScanResult};
use spektrum_core::{RtlPowerSolver, ScanEngine};

use crate::simulator::SimulatedDriver;

/// Registry with the simulator and RTL-SDR drivers.
pub fn create_default_registry() -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    registry.register(Box::new(SimulatedDriver::default()));
    registry.register(Box::new(RtlSdrDriver::new()));
    registry
}

/// Build an engine from `config`: open the configured device through
/// `registry`, push its front-end settings and configure the startup
/// range if one is set. The engine is left stopped.
pub fn build_engine(config: &SpektrumConfig, registry: &DriverRegistry) -> ScanResult<ScanEngine> {
    config.validate()?;

    let mut engine = ScanEngine::from_config(config, RtlPowerSolver::new());
    let driver = registry.get(&config.device.driver).ok_or_else(|| {
        ScanError::Device(format!(
            "unknown driver '{}' (available: {})",
            config.device.driver,
            registry.list().join(", ")
        ))
    })?;
    engine.open_device(driver, config.device.index)?;
    engine.apply_device_config(&config.device)?;

    if let Some(range) = config.solver.range {
        engine.configure_frequency_range(range.lower, range.upper, range.step)?;
    }

    tracing::info!(
        driver = %config.device.driver,
        index = config.device.index,
        tunes = engine.tune_count(),
        "Engine built from configuration"
    );
    Ok(engine)
}
