//! Configuration using Figment
//!
//! Describes a simulated device set and the initial view for the demo binary and tests.
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. Environment variables (prefixed with `LIGHTPATH_`, nested keys split on `__`)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! LIGHTPATH_APPLICATION__LOG_LEVEL=debug
//! LIGHTPATH_VIEW__BEAMLINE=XPP
//! LIGHTPATH_VIEW__MPS_ONLY=true
//! ```
//!
//! # Example
//!
//! ```no_run
//! use lightpath::config::LightpathConfig;
//!
//! let config = LightpathConfig::load_from("config/lightpath.toml")?;
//! let controller = config.build_controller();
//! println!("Destinations: {:?}", controller.destinations());
//! # Ok::<(), lightpath::error::LightError>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::controller::LightController;
use crate::device::{Container, DeviceRef, DeviceState, MpsStatus};
use crate::error::{LightError, LightResult};
use crate::sim::SimDevice;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LightpathConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Initial view settings
    #[serde(default)]
    pub view: ViewConfig,
    /// Simulated devices
    #[serde(default)]
    pub devices: Vec<DeviceDefinition>,
    /// Display-only containers
    #[serde(default)]
    pub containers: Vec<Container>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Which part of the beamline to show first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    /// Destination beamline; the most upstream one when unset or unknown
    #[serde(default)]
    pub beamline: Option<String>,
    /// Include upstream beamlines
    #[serde(default = "default_true")]
    pub upstream: bool,
    /// Only show protection-system devices
    #[serde(default)]
    pub mps_only: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            beamline: None,
            upstream: true,
            mps_only: false,
        }
    }
}

/// Simulated device definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefinition {
    /// Unique device name
    pub name: String,
    /// Beamline the device sits on
    pub beamline: String,
    /// Position along the beam
    pub z: f64,
    /// Control-system prefix
    #[serde(default)]
    pub prefix: Option<String>,
    /// Initial reported state
    #[serde(default = "default_state")]
    pub state: DeviceState,
    /// Protection-system membership and initial status
    #[serde(default)]
    pub mps: Option<MpsStatus>,
    /// Whether the device can be inserted and removed remotely
    #[serde(default = "default_true")]
    pub actuatable: bool,
}

impl DeviceDefinition {
    /// Build the simulated device.
    pub fn build(&self) -> SimDevice {
        let mut device = SimDevice::new(&self.name, &self.beamline, self.z)
            .with_state(self.state)
            .actuatable(self.actuatable);
        if let Some(prefix) = &self.prefix {
            device = device.with_prefix(prefix);
        }
        if let Some(status) = self.mps {
            device = device.with_mps_status(status);
        }
        device
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "lightpath".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_state() -> DeviceState {
    DeviceState::Removed
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl LightpathConfig {
    /// Load configuration from a file, with `LIGHTPATH_` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`LightError::Config`] if the file cannot be read or parsed, and
    /// [`LightError::Configuration`] if validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> LightResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LIGHTPATH_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, without environment overrides.
    pub fn from_toml_str(content: &str) -> LightResult<Self> {
        let config: Self = Figment::new().merge(Toml::string(content)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Device names are unique
    ///
    /// Positions and beamline references are left to the controller, which skips and
    /// logs entries it cannot place.
    pub fn validate(&self) -> LightResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(LightError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            if !names.insert(device.name.as_str()) {
                return Err(LightError::Configuration(format!(
                    "Duplicate device name: '{}'",
                    device.name
                )));
            }
        }
        Ok(())
    }

    /// Build the simulated devices, keeping concrete handles for driving them.
    pub fn build_devices(&self) -> Vec<Arc<SimDevice>> {
        self.devices
            .iter()
            .map(|definition| Arc::new(definition.build()))
            .collect()
    }

    /// Build a controller over freshly simulated devices.
    pub fn build_controller(&self) -> LightController {
        let devices = self
            .build_devices()
            .into_iter()
            .map(|device| device as DeviceRef)
            .collect();
        LightController::new(devices, self.containers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[application]
log_level = "debug"

[view]
beamline = "XPP"

[[devices]]
name = "hxr_stopper"
beamline = "HXR"
z = 5.0
state = "inserted"
mps = { faulted = true }

[[devices]]
name = "xpp_yag"
beamline = "XPP"
z = 10.0
actuatable = false

[[containers]]
name = "hxr_rack"
beamline = "HXR"
z = 4.0
"#;

    #[test]
    fn test_parse_sample() {
        let config = LightpathConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.application.name, "lightpath");
        assert_eq!(config.view.beamline.as_deref(), Some("XPP"));
        assert!(config.view.upstream);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].state, DeviceState::Inserted);
        assert_eq!(config.devices[1].state, DeviceState::Removed);
        assert!(!config.devices[1].actuatable);
        assert_eq!(config.containers[0].z, Some(4.0));
    }

    #[test]
    fn test_build_controller_from_sample() {
        let config = LightpathConfig::from_toml_str(SAMPLE).unwrap();
        let light = config.build_controller();
        assert_eq!(light.destinations(), vec!["HXR", "XPP"]);

        let hxr = light.beamline("HXR").unwrap().path();
        assert_eq!(hxr.impediment().map(|d| d.name().to_string()).as_deref(), Some("hxr_stopper"));
        assert_eq!(hxr.tripped_devices().len(), 1);
    }

    #[test]
    fn test_invalid_log_level() {
        let err = LightpathConfig::from_toml_str("[application]\nlog_level = \"loud\"\n")
            .unwrap_err();
        assert!(matches!(err, LightError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_device_names() {
        let content = r#"
[[devices]]
name = "yag"
beamline = "HXR"
z = 1.0

[[devices]]
name = "yag"
beamline = "HXR"
z = 2.0
"#;
        let err = LightpathConfig::from_toml_str(content).unwrap_err();
        assert!(err.to_string().contains("Duplicate device name"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = LightpathConfig::from_toml_str("").unwrap();
        assert!(config.devices.is_empty());
        assert!(!config.view.mps_only);
        assert_eq!(config.application.log_level, "info");
    }

    #[test]
    fn test_missing_required_field() {
        let err = LightpathConfig::from_toml_str("[[devices]]\nname = \"yag\"\n").unwrap_err();
        assert!(matches!(err, LightError::Config(_)));
    }
}
