//! TOML configuration file
//!
//! Every key is optional; missing keys keep the library defaults.
//!
//! ```toml
//! [device]
//! violation_mode = "abort"
//!
//! [device.timing]
//! sector_erase = 3000
//!
//! [controller]
//! quad = true
//! xip = false
//!
//! [driver]
//! verify = true
//! preserve = true
//! max_polls = 1000000
//! ```

use crate::error::CliError;
use qflash_core::chip::Timing;
use qflash_device::{ControllerConfig, DeviceConfig, ViolationMode};
use qflash_driver::{DriverConfig, WaitPolicy};
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub device: DeviceSection,
    pub controller: ControllerSection,
    pub driver: DriverSection,
}

/// `[device]` section
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceSection {
    pub violation_mode: Option<ViolationModeName>,
    pub timing: TimingSection,
}

/// Violation mode as spelled in the file
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationModeName {
    Report,
    Abort,
}

/// `[device.timing]` section, in device steps
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingSection {
    pub page_program: Option<u32>,
    pub subsector_erase: Option<u32>,
    pub sector_erase: Option<u32>,
    pub bulk_erase: Option<u32>,
    pub write_status: Option<u32>,
    pub write_nvconfig: Option<u32>,
    pub write_vconfig: Option<u32>,
    /// Shorthand for completing every write on the next step
    pub instant: bool,
}

/// `[controller]` section
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerSection {
    pub quad: Option<bool>,
    pub xip: Option<bool>,
    pub idle_ticks: Option<u32>,
}

/// `[driver]` section
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverSection {
    pub verify: Option<bool>,
    pub preserve: Option<bool>,
    /// Busy polls before giving up; 0 waits forever
    pub max_polls: Option<u32>,
    pub expected_id: Option<u32>,
}

impl Config {
    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let content = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| CliError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn device_config(&self) -> DeviceConfig {
        let t = &self.device.timing;
        let base = if t.instant {
            Timing::instant()
        } else {
            Timing::default()
        };
        let timing = Timing {
            page_program: t.page_program.unwrap_or(base.page_program),
            subsector_erase: t.subsector_erase.unwrap_or(base.subsector_erase),
            sector_erase: t.sector_erase.unwrap_or(base.sector_erase),
            bulk_erase: t.bulk_erase.unwrap_or(base.bulk_erase),
            write_status: t.write_status.unwrap_or(base.write_status),
            write_nvconfig: t.write_nvconfig.unwrap_or(base.write_nvconfig),
            write_vconfig: t.write_vconfig.unwrap_or(base.write_vconfig),
        };
        let violation_mode = match self.device.violation_mode {
            Some(ViolationModeName::Abort) => ViolationMode::Abort,
            Some(ViolationModeName::Report) | None => ViolationMode::Report,
        };
        DeviceConfig {
            timing,
            violation_mode,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let defaults = ControllerConfig::default();
        let c = &self.controller;
        ControllerConfig {
            quad: c.quad.unwrap_or(defaults.quad),
            xip: c.xip.unwrap_or(defaults.xip),
            idle_ticks: c.idle_ticks.unwrap_or(defaults.idle_ticks),
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        let defaults = DriverConfig::default();
        let d = &self.driver;
        let wait = match d.max_polls {
            Some(0) => WaitPolicy::unbounded(),
            Some(n) => WaitPolicy {
                max_polls: Some(n),
                ..WaitPolicy::default()
            },
            None => defaults.wait.clone(),
        };
        DriverConfig {
            verify: d.verify.unwrap_or(defaults.verify),
            preserve: d.preserve.unwrap_or(defaults.preserve),
            wait,
            expected_id: d.expected_id.unwrap_or(defaults.expected_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_keeps_defaults() {
        let config = Config::from_toml("").unwrap();
        let device = config.device_config();
        assert_eq!(device.timing, Timing::default());
        assert_eq!(device.violation_mode, ViolationMode::Report);
        assert_eq!(config.controller_config(), ControllerConfig::default());
        let driver = config.driver_config();
        assert!(driver.verify);
        assert!(driver.preserve);
        assert_eq!(driver.wait.max_polls, WaitPolicy::default().max_polls);
    }

    #[test]
    fn overrides() {
        let config = Config::from_toml(
            r#"
            [device]
            violation_mode = "abort"

            [device.timing]
            instant = true
            sector_erase = 40

            [controller]
            quad = false

            [driver]
            preserve = false
            max_polls = 0
            "#,
        )
        .unwrap();

        let device = config.device_config();
        assert_eq!(device.violation_mode, ViolationMode::Abort);
        assert_eq!(device.timing.sector_erase, 40);
        assert_eq!(device.timing.page_program, 1);
        assert!(!config.controller_config().quad);
        let driver = config.driver_config();
        assert!(!driver.preserve);
        assert!(driver.verify);
        assert_eq!(driver.wait.max_polls, None);
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(Config::from_toml("[driver]\nverfy = false\n").is_err());
        assert!(Config::from_toml("[device]\nviolation_mode = \"ignore\"\n").is_err());
    }
}
