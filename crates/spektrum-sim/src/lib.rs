//! # Spektrum Sim
//!
//! Scan devices for the spektrum engine:
//!
//! - [`simulator`]: synthetic noise and carriers, no hardware needed
//! - [`hal::rtlsdr`]: RTL2832U dongles via runtime-loaded librtlsdr
//!   (`rtlsdr` feature)
//! - [`estimator`]: the FFT power estimator both devices share
//!
//! ```rust,ignore
//! use spektrum_core::SpektrumConfig;
//! use spektrum_sim::hal::{build_engine, create_default_registry};
//!
//! let config = SpektrumConfig::load()?;
//! let mut engine = build_engine(&config, &create_default_registry())?;
//! engine.start_auto_scan()?;
//! ```

pub mod estimator;
pub mod hal;
pub mod simulator;

pub use estimator::{FftPowerEstimator, PowerEstimator};
pub use hal::{build_engine, create_default_registry, RtlSdrDriver};
pub use simulator::{Emitter, SimulatedDevice, SimulatedDriver, SimulatorConfig};
