//! Simulated Devices
//!
//! Provides an in-memory device for testing and demos without a control system.
//!
//! `SimDevice` keeps its reported flags behind a lock and publishes a
//! [`DeviceEvent`] after every change, exactly as a hardware-backed device would after
//! reading a new value. Actuation, when enabled, changes the reported state at once and
//! publishes the follow-up event on the calling thread.
//!
//! # Example
//!
//! ```rust
//! use lightpath::sim::SimDevice;
//! use lightpath::device::LightDevice;
//!
//! let stopper = SimDevice::new("dg2_stopper", "HXR", 20.0).with_mps();
//! stopper.set_inserted();
//! assert!(stopper.state().is_blocking());
//! ```

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::device::{Actuator, DeviceEvent, DeviceState, LightDevice, MpsStatus};
use crate::error::LightResult;
use crate::notify::{Handler, SubscriptionId, Subscribers};

#[derive(Debug, Clone, Copy)]
struct Reported {
    inserted: bool,
    removed: bool,
    mps: Option<MpsStatus>,
}

/// Simulated device with optional actuation and protection membership.
pub struct SimDevice {
    name: String,
    beamline: String,
    z: f64,
    prefix: Option<String>,
    actuatable: bool,
    reported: RwLock<Reported>,
    subscribers: Subscribers<DeviceEvent>,
}

impl fmt::Debug for SimDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimDevice")
            .field("name", &self.name)
            .field("beamline", &self.beamline)
            .field("z", &self.z)
            .field("state", &self.state())
            .finish()
    }
}

impl SimDevice {
    /// Create a removed, actuatable device outside the protection system.
    pub fn new(name: impl Into<String>, beamline: impl Into<String>, z: f64) -> Self {
        Self {
            name: name.into(),
            beamline: beamline.into(),
            z,
            prefix: None,
            actuatable: true,
            reported: RwLock::new(Reported {
                inserted: false,
                removed: true,
                mps: None,
            }),
            subscribers: Subscribers::new(),
        }
    }

    /// Attach a control-system prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Make the device a protection-system member with no active fault.
    pub fn with_mps(self) -> Self {
        self.with_mps_status(MpsStatus::default())
    }

    /// Make the device a protection-system member with the given status.
    pub fn with_mps_status(mut self, status: MpsStatus) -> Self {
        self.reported.get_mut().mps = Some(status);
        self
    }

    /// Enable or disable remote actuation.
    pub fn actuatable(mut self, actuatable: bool) -> Self {
        self.actuatable = actuatable;
        self
    }

    /// Set the initial state without publishing.
    pub fn with_state(mut self, state: DeviceState) -> Self {
        let (inserted, removed) = flags_for(state);
        let reported = self.reported.get_mut();
        reported.inserted = inserted;
        reported.removed = removed;
        self
    }

    /// Wrap the device for hand-off to a controller.
    pub fn into_ref(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Report new raw flags and notify subscribers.
    pub fn set_flags(&self, inserted: bool, removed: bool) {
        self.update(|reported| {
            reported.inserted = inserted;
            reported.removed = removed;
        });
    }

    /// Report the device as inserted.
    pub fn set_inserted(&self) {
        self.set_state(DeviceState::Inserted);
    }

    /// Report the device as removed.
    pub fn set_removed(&self) {
        self.set_state(DeviceState::Removed);
    }

    /// Report the given interpreted state.
    pub fn set_state(&self, state: DeviceState) {
        let (inserted, removed) = flags_for(state);
        self.set_flags(inserted, removed);
    }

    /// Raise or clear the protection fault. No effect on non-members.
    pub fn set_faulted(&self, faulted: bool) {
        self.update(|reported| {
            if let Some(mps) = reported.mps.as_mut() {
                mps.faulted = faulted;
            }
        });
    }

    /// Bypass or restore the protection fault. No effect on non-members.
    pub fn set_bypassed(&self, bypassed: bool) {
        self.update(|reported| {
            if let Some(mps) = reported.mps.as_mut() {
                mps.bypassed = bypassed;
            }
        });
    }

    /// Number of live subscriptions on this device.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn update(&self, change: impl FnOnce(&mut Reported)) {
        let event = {
            let mut reported = self.reported.write();
            change(&mut reported);
            DeviceEvent {
                device: self.name.clone(),
                state: DeviceState::from_flags(reported.inserted, reported.removed),
                mps: reported.mps,
            }
        };
        debug!(device = %self.name, state = %event.state, "Device state reported");
        self.subscribers.publish(&event);
    }
}

fn flags_for(state: DeviceState) -> (bool, bool) {
    match state {
        DeviceState::Unknown => (false, false),
        DeviceState::Inserted => (true, false),
        DeviceState::Removed => (false, true),
        DeviceState::Error => (true, true),
    }
}

impl Actuator for SimDevice {
    fn insert(&self) -> LightResult<()> {
        self.set_inserted();
        Ok(())
    }

    fn remove(&self) -> LightResult<()> {
        self.set_removed();
        Ok(())
    }
}

impl LightDevice for SimDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    fn beamline(&self) -> &str {
        &self.beamline
    }

    fn z(&self) -> f64 {
        self.z
    }

    fn inserted(&self) -> bool {
        self.reported.read().inserted
    }

    fn removed(&self) -> bool {
        self.reported.read().removed
    }

    fn state(&self) -> DeviceState {
        let reported = self.reported.read();
        DeviceState::from_flags(reported.inserted, reported.removed)
    }

    fn mps(&self) -> Option<MpsStatus> {
        self.reported.read().mps
    }

    fn actuator(&self) -> Option<&dyn Actuator> {
        if self.actuatable {
            Some(self)
        } else {
            None
        }
    }

    fn subscribe(&self, handler: Handler<DeviceEvent>) -> SubscriptionId {
        self.subscribers.subscribe(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_new_device_is_removed() {
        let device = SimDevice::new("yag1", "HXR", 5.0);
        assert_eq!(device.state(), DeviceState::Removed);
        assert!(!device.is_mps_member());
        assert!(device.can_actuate());
    }

    #[test]
    fn test_state_change_publishes_event() {
        let device = SimDevice::new("yag1", "HXR", 5.0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        device.subscribe(Arc::new(move |event: &DeviceEvent| {
            sink.lock().push(event.state);
        }));

        device.set_inserted();
        device.set_flags(true, true);

        assert_eq!(
            *seen.lock(),
            vec![DeviceState::Inserted, DeviceState::Error]
        );
    }

    #[test]
    fn test_actuation_round_trip() {
        let device = SimDevice::new("valve", "HXR", 3.0);
        device.actuate_insert().unwrap();
        assert_eq!(device.state(), DeviceState::Inserted);
        device.actuate_remove().unwrap();
        assert_eq!(device.state(), DeviceState::Removed);
    }

    #[test]
    fn test_non_actuatable_device_rejects_actuation() {
        let device = SimDevice::new("slits", "HXR", 3.0).actuatable(false);
        assert!(device.actuate_remove().is_err());
        assert_eq!(device.state(), DeviceState::Removed);
    }

    #[test]
    fn test_mps_fault_and_bypass() {
        let device = SimDevice::new("stopper", "HXR", 9.0).with_mps();
        assert_eq!(device.mps(), Some(MpsStatus::default()));

        device.set_faulted(true);
        assert!(device.mps().is_some_and(|m| m.is_active_fault()));

        device.set_bypassed(true);
        assert!(device.mps().is_some_and(|m| !m.is_active_fault()));
    }

    #[test]
    fn test_fault_ignored_for_non_members() {
        let device = SimDevice::new("yag", "HXR", 1.0);
        device.set_faulted(true);
        assert_eq!(device.mps(), None);
    }

    #[test]
    fn test_initial_state_builder() {
        let device = SimDevice::new("valve", "HXR", 3.0)
            .with_prefix("HXR:VGC:01")
            .with_state(DeviceState::Unknown);
        assert_eq!(device.state(), DeviceState::Unknown);
        assert_eq!(device.prefix(), Some("HXR:VGC:01"));
    }
}
