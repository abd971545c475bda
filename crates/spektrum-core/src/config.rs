//! # Configuration
//!
//! YAML configuration for the scan engine and its device.
//!
//! ## Search Path
//!
//! Configuration is loaded from the first file found:
//! 1. Path in the `SPEKTRUM_CONFIG` environment variable
//! 2. `./spektrum.yaml`
//! 3. `~/.config/spektrum/config.yaml` (platform user config dir)
//! 4. `/etc/spektrum/config.yaml`
//!
//! ## Example
//!
//! ```yaml
//! device:
//!   driver: rtlsdr
//!   index: 0
//!   ppm: 52
//!   gain: 297
//!
//! solver:
//!   crop: 0.25
//!   window: hann
//!   range:
//!     lower: 88000000
//!     upper: 108000000
//!     step: 10000
//!
//! scan:
//!   max_consecutive_failures: 16
//!   thread:
//!     priority: high
//!     cpu_affinity: [2]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DirectSampling;
use crate::error::ScanError;
use crate::observe::LogConfig;
use crate::plan::{RangeSpec, SolverSettings, WindowKind, AUTO_GAIN};
use crate::thread::ScanThreadConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "SPEKTRUM_CONFIG";

/// Error type for configuration operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for ScanError {
    fn from(e: ConfigError) -> Self {
        ScanError::Config(e.to_string())
    }
}

/// Device selection and front-end settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Driver name ("simulator", "rtlsdr")
    pub driver: String,
    /// Device index within the driver
    pub index: u32,
    /// Frequency correction in ppm
    pub ppm: i32,
    pub offset_tuning: bool,
    pub direct_sampling: DirectSampling,
    /// Tuner gain in tenths of dB, or -100 for automatic
    pub gain: i32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            driver: "simulator".to_string(),
            index: 0,
            ppm: 0,
            offset_tuning: false,
            direct_sampling: DirectSampling::Off,
            gain: AUTO_GAIN,
        }
    }
}

/// Tuning solver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Preferred sample rate per hop in Hz
    pub target_rate: u32,
    /// Lowest device sample rate in Hz
    pub min_rate: u32,
    /// Fraction of bins cropped per hop
    pub crop: f64,
    pub window: WindowKind,
    /// Range configured at startup, if any
    pub range: Option<RangeSpec>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        let settings = SolverSettings::default();
        Self {
            target_rate: settings.target_rate,
            min_rate: settings.min_rate,
            crop: settings.crop,
            window: settings.window,
            range: None,
        }
    }
}

/// Scan loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub thread: ScanThreadConfig,
    /// Back-to-back segment failures tolerated before the loop gives up
    /// (0 = unbounded)
    pub max_consecutive_failures: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            thread: ScanThreadConfig::default(),
            max_consecutive_failures: 64,
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpektrumConfig {
    pub device: DeviceConfig,
    pub solver: SolverConfig,
    pub scan: ScanConfig,
    pub logging: LogConfig,
}

impl SpektrumConfig {
    /// Load configuration from the default search path.
    ///
    /// Returns the default config if no file is found.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Self::load_from(&path);
            }
            tracing::warn!("{} points to missing file {}", CONFIG_ENV, path.display());
        }

        for path in Self::config_search_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load and validate a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;
        let config = Self::parse(&content)?;
        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))
    }

    pub fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("./spektrum.yaml")];
        if let Some(dirs) = directories::ProjectDirs::from("", "", "spektrum") {
            paths.push(dirs.config_dir().join("config.yaml"));
        }
        paths.push(PathBuf::from("/etc/spektrum/config.yaml"));
        paths
    }

    /// Solver settings with the device gain folded in.
    pub fn solver_settings(&self) -> SolverSettings {
        SolverSettings {
            target_rate: self.solver.target_rate,
            min_rate: self.solver.min_rate,
            crop: self.solver.crop,
            gain: self.device.gain,
            window: self.solver.window,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.driver.is_empty() {
            return Err(ConfigError::Invalid("device.driver must be set".into()));
        }
        if self.device.gain < 0 && self.device.gain != AUTO_GAIN {
            return Err(ConfigError::Invalid(format!(
                "device.gain must be >= 0 or {} (auto)",
                AUTO_GAIN
            )));
        }
        if !(0.0..1.0).contains(&self.solver.crop) {
            return Err(ConfigError::Invalid("solver.crop must be in [0, 1)".into()));
        }
        if self.solver.target_rate == 0 || self.solver.min_rate > self.solver.target_rate {
            return Err(ConfigError::Invalid(
                "solver.target_rate must be positive and >= solver.min_rate".into(),
            ));
        }
        if let Some(range) = self.solver.range {
            range
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("solver.range: {}", e)))?;
        }
        if self.scan.thread.name.is_empty() {
            return Err(ConfigError::Invalid("scan.thread.name must be set".into()));
        }
        Ok(())
    }

    /// Example configuration covering every section.
    pub fn example_yaml() -> String {
        let mut config = Self::default();
        config.device.driver = "rtlsdr".to_string();
        config.device.gain = 297;
        config.solver.crop = 0.25;
        config.solver.range = Some(RangeSpec::new(88_000_000, 108_000_000, 10_000));
        serde_yaml::to_string(&config).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::LogLevel;
    use crate::thread::ScanPriority;

    #[test]
    fn test_default_config() {
        let config = SpektrumConfig::default();
        assert_eq!(config.device.driver, "simulator");
        assert_eq!(config.device.gain, AUTO_GAIN);
        assert_eq!(config.scan.max_consecutive_failures, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
device:
  driver: rtlsdr
  index: 1
  ppm: 52
  offset_tuning: true
  direct_sampling: q
  gain: 297

solver:
  crop: 0.25
  window: hann
  range:
    lower: 88000000
    upper: 108000000
    step: 10000

scan:
  max_consecutive_failures: 16
  thread:
    name: sweep
    priority: high
    cpu_affinity: [2]

logging:
  level: debug
  format: compact
"#;

        let config = SpektrumConfig::parse(yaml).unwrap();
        assert_eq!(config.device.driver, "rtlsdr");
        assert_eq!(config.device.index, 1);
        assert_eq!(config.device.ppm, 52);
        assert!(config.device.offset_tuning);
        assert_eq!(config.device.direct_sampling, DirectSampling::Q);
        assert_eq!(config.solver.window, WindowKind::Hann);
        assert_eq!(
            config.solver.range,
            Some(RangeSpec::new(88_000_000, 108_000_000, 10_000))
        );
        assert_eq!(config.scan.thread.name, "sweep");
        assert_eq!(config.scan.thread.priority, ScanPriority::High);
        assert_eq!(config.scan.thread.cpu_affinity, vec![2]);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert!(config.validate().is_ok());

        let settings = config.solver_settings();
        assert_eq!(settings.gain, 297);
        assert_eq!(settings.crop, 0.25);
    }

    #[test]
    fn test_parse_partial_yaml() {
        let config = SpektrumConfig::parse("device:\n  ppm: -3\n").unwrap();
        assert_eq!(config.device.ppm, -3);
        assert_eq!(config.device.driver, "simulator");
        assert_eq!(config.solver.target_rate, 2_400_000);
        assert_eq!(config.scan.thread.name, "spektrum-scan");
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            SpektrumConfig::parse("device: [unclosed"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validation() {
        let mut config = SpektrumConfig::default();
        config.solver.crop = 1.5;
        assert!(config.validate().is_err());

        let mut config = SpektrumConfig::default();
        config.device.gain = -5;
        assert!(config.validate().is_err());

        let mut config = SpektrumConfig::default();
        config.solver.range = Some(RangeSpec::new(10, 5, 1));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_example_yaml() {
        let yaml = SpektrumConfig::example_yaml();
        assert!(yaml.contains("device:"));
        assert!(yaml.contains("solver:"));
        let parsed = SpektrumConfig::parse(&yaml).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.device.gain, 297);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("spektrum-test-{}.yaml", std::process::id()));
        let mut config = SpektrumConfig::default();
        config.device.ppm = 7;
        config.save(&path).unwrap();

        let loaded = SpektrumConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_config_error_into_scan_error() {
        let err: ScanError = ConfigError::Invalid("bad".into()).into();
        assert_eq!(err, ScanError::Config("invalid config: bad".into()));
    }

    #[test]
    fn test_config_search_paths() {
        let paths = SpektrumConfig::config_search_paths();
        assert!(paths[0].ends_with("spektrum.yaml"));
        assert!(paths.last().unwrap().starts_with("/etc/spektrum"));
    }
}
