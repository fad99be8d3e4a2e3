//! Device capability interface.
//!
//! The engine never creates devices. Whatever provisions them (a device database, a
//! simulator, a test) hands over objects implementing [`LightDevice`], and the engine
//! only reads their reported state and reacts to their change notifications.
//!
//! Optional capabilities are exposed as typed accessors instead of being probed at
//! runtime:
//!
//! - [`LightDevice::mps`] returns `Some` only for members of the machine protection
//!   system.
//! - [`LightDevice::actuator`] returns `Some` only for devices that can be inserted or
//!   removed remotely. [`LightDevice::actuate_insert`] and
//!   [`LightDevice::actuate_remove`] check it and fail with
//!   [`LightError::UnsupportedOperation`] when it is absent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{LightError, LightResult};
use crate::notify::{Handler, SubscriptionId};

/// Interpreted state of a device from its two independently reported flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Neither inserted nor removed (moving, or not reporting).
    Unknown,
    /// Inserted into the beam.
    Inserted,
    /// Removed from the beam.
    Removed,
    /// Reporting both inserted and removed.
    Error,
}

impl DeviceState {
    /// Interpret the reported `inserted`/`removed` flags.
    pub fn from_flags(inserted: bool, removed: bool) -> Self {
        match (inserted, removed) {
            (false, false) => DeviceState::Unknown,
            (true, false) => DeviceState::Inserted,
            (false, true) => DeviceState::Removed,
            (true, true) => DeviceState::Error,
        }
    }

    /// Whether the device stops the beam.
    ///
    /// A contradictory report is read as blocking.
    pub fn is_blocking(self) -> bool {
        matches!(self, DeviceState::Inserted | DeviceState::Error)
    }

    /// Label shown for the state.
    pub fn label(self) -> &'static str {
        match self {
            DeviceState::Unknown => "Unknown",
            DeviceState::Inserted => "Inserted",
            DeviceState::Removed => "Removed",
            DeviceState::Error => "Error",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Protection-system status reported by an MPS member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpsStatus {
    /// The protection system sees a fault at this device.
    #[serde(default)]
    pub faulted: bool,
    /// The fault is bypassed and ignored by the protection logic.
    #[serde(default)]
    pub bypassed: bool,
}

impl MpsStatus {
    /// A fault that participates in trip logic.
    pub fn is_active_fault(&self) -> bool {
        self.faulted && !self.bypassed
    }
}

/// Notification published by a device whenever its reported state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    /// Name of the publishing device.
    pub device: String,
    /// State after the change.
    pub state: DeviceState,
    /// Protection status after the change, for MPS members.
    pub mps: Option<MpsStatus>,
}

/// Remote insert/remove capability.
///
/// Calls are fire-and-forget: they return once the request is issued, and the resulting
/// state change arrives later through the device's own notifications.
pub trait Actuator: Send + Sync {
    /// Request insertion into the beam.
    fn insert(&self) -> LightResult<()>;

    /// Request removal from the beam.
    fn remove(&self) -> LightResult<()>;
}

/// Contract a device must satisfy to take part in a beam path.
pub trait LightDevice: Send + Sync + fmt::Debug {
    /// Unique device name.
    fn name(&self) -> &str;

    /// Control-system prefix, if any.
    fn prefix(&self) -> Option<&str> {
        None
    }

    /// Beamline this device belongs to.
    fn beamline(&self) -> &str;

    /// Position along the beam. Must not change while the device is in a beam path.
    fn z(&self) -> f64;

    /// Reported inserted flag.
    fn inserted(&self) -> bool;

    /// Reported removed flag.
    fn removed(&self) -> bool;

    /// Interpreted state from the two reported flags.
    fn state(&self) -> DeviceState {
        DeviceState::from_flags(self.inserted(), self.removed())
    }

    /// Protection status, `None` for devices outside the protection system.
    fn mps(&self) -> Option<MpsStatus> {
        None
    }

    /// Whether the device belongs to the protection system.
    fn is_mps_member(&self) -> bool {
        self.mps().is_some()
    }

    /// Remote actuation capability, `None` for devices that cannot be actuated.
    fn actuator(&self) -> Option<&dyn Actuator> {
        None
    }

    /// Whether the device can be inserted or removed remotely.
    fn can_actuate(&self) -> bool {
        self.actuator().is_some()
    }

    /// Register for state-change notifications.
    fn subscribe(&self, handler: Handler<DeviceEvent>) -> SubscriptionId;

    /// Cancel a registration. Unknown handles are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Insert the device, failing if it has no actuation capability.
    fn actuate_insert(&self) -> LightResult<()> {
        match self.actuator() {
            Some(actuator) => actuator.insert(),
            None => Err(LightError::UnsupportedOperation {
                device: self.name().to_string(),
                operation: "insert".to_string(),
            }),
        }
    }

    /// Remove the device, failing if it has no actuation capability.
    fn actuate_remove(&self) -> LightResult<()> {
        match self.actuator() {
            Some(actuator) => actuator.remove(),
            None => Err(LightError::UnsupportedOperation {
                device: self.name().to_string(),
                operation: "remove".to_string(),
            }),
        }
    }
}

/// Shared handle to a provisioned device.
pub type DeviceRef = Arc<dyn LightDevice>;

/// Display-only annotation placed along a beamline.
///
/// Containers take no part in impediment or protection logic; they are only shown
/// alongside the devices of a beamline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Container name.
    pub name: String,
    /// Beamline the container is drawn on.
    pub beamline: String,
    /// Position along the beam, when known.
    #[serde(default)]
    pub z: Option<f64>,
    /// Control-system prefix, if any.
    #[serde(default)]
    pub prefix: Option<String>,
}

impl Container {
    /// Create a container at a known position.
    pub fn new(name: impl Into<String>, beamline: impl Into<String>, z: f64) -> Self {
        Self {
            name: name.into(),
            beamline: beamline.into(),
            z: Some(z),
            prefix: None,
        }
    }

    /// Attach a control-system prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FixedDevice;

    impl LightDevice for FixedDevice {
        fn name(&self) -> &str {
            "fixed"
        }
        fn beamline(&self) -> &str {
            "HXR"
        }
        fn z(&self) -> f64 {
            1.0
        }
        fn inserted(&self) -> bool {
            true
        }
        fn removed(&self) -> bool {
            true
        }
        fn subscribe(&self, _handler: Handler<DeviceEvent>) -> SubscriptionId {
            unreachable!("not used")
        }
        fn unsubscribe(&self, _id: SubscriptionId) {}
    }

    #[test]
    fn test_state_from_flags() {
        assert_eq!(DeviceState::from_flags(false, false), DeviceState::Unknown);
        assert_eq!(DeviceState::from_flags(true, false), DeviceState::Inserted);
        assert_eq!(DeviceState::from_flags(false, true), DeviceState::Removed);
        assert_eq!(DeviceState::from_flags(true, true), DeviceState::Error);
    }

    #[test]
    fn test_blocking_states() {
        assert!(DeviceState::Inserted.is_blocking());
        assert!(DeviceState::Error.is_blocking());
        assert!(!DeviceState::Removed.is_blocking());
        assert!(!DeviceState::Unknown.is_blocking());
    }

    #[test]
    fn test_active_fault_respects_bypass() {
        let fault = MpsStatus {
            faulted: true,
            bypassed: false,
        };
        let bypassed = MpsStatus {
            faulted: true,
            bypassed: true,
        };
        assert!(fault.is_active_fault());
        assert!(!bypassed.is_active_fault());
        assert!(!MpsStatus::default().is_active_fault());
    }

    #[test]
    fn test_actuation_without_capability_is_unsupported() {
        let device = FixedDevice;
        assert!(!device.can_actuate());
        assert!(!device.is_mps_member());
        assert_eq!(device.state(), DeviceState::Error);

        match device.actuate_remove() {
            Err(LightError::UnsupportedOperation { device, operation }) => {
                assert_eq!(device, "fixed");
                assert_eq!(operation, "remove");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(device.actuate_insert().is_err());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&DeviceState::Inserted).unwrap();
        assert_eq!(json, "\"inserted\"");
    }
}
