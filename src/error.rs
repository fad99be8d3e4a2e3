//! Custom error types for the lightpath engine.
//!
//! This module defines the primary error type, `LightError`, used by every part of the
//! crate. It is built with `thiserror` so that errors from configuration loading can be
//! folded in with `#[from]` and propagated with the `?` operator.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidTopology`**: a beam path was built from devices that do not belong to a
//!   single beamline, or whose positions cannot be ordered. Fatal to that construction
//!   call only.
//! - **`UnknownBeamline`** / **`UnknownDevice`**: a lookup named something the controller
//!   does not know about. Returned to the caller, the controller is unaffected.
//! - **`UnsupportedOperation`**: actuation was requested on a device that does not expose
//!   the actuation capability.
//! - **`AnomalousDeviceState`**: a device reports itself both inserted and removed. This is
//!   recorded and logged; processing continues treating the device as blocking.
//! - **`MalformedDevice`** / **`MalformedContainer`**: a single entry handed to the
//!   controller could not be placed. These are logged and skipped during construction.
//! - **`Config`** / **`Configuration`**: figment load failures and semantic validation
//!   failures of the configuration file.

use thiserror::Error;

/// Convenience alias for results using the lightpath error type.
pub type LightResult<T> = std::result::Result<T, LightError>;

/// Errors produced by the beam path engine and its controller.
#[derive(Error, Debug)]
pub enum LightError {
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Unknown beamline '{0}'")]
    UnknownBeamline(String),

    #[error("Unknown device '{0}'")]
    UnknownDevice(String),

    #[error("Device '{device}' does not support operation '{operation}'")]
    UnsupportedOperation { device: String, operation: String },

    #[error("Device '{0}' reports both inserted and removed")]
    AnomalousDeviceState(String),

    #[error("Malformed device '{name}': {reason}")]
    MalformedDevice { name: String, reason: String },

    #[error("Malformed container '{name}': {reason}")]
    MalformedContainer { name: String, reason: String },

    #[error("Actuation of '{device}' failed: {reason}")]
    Actuation { device: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl From<figment::Error> for LightError {
    fn from(err: figment::Error) -> Self {
        LightError::Config(Box::new(err))
    }
}

impl LightError {
    /// Whether the error only concerns a single entry and should be skipped during
    /// batch construction rather than aborting it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LightError::MalformedDevice { .. }
                | LightError::MalformedContainer { .. }
                | LightError::AnomalousDeviceState(_)
        )
    }
}
