//! Headless row model for displays.
//!
//! Rendering is left to whatever presents the beam path. This module computes what each
//! row of such a display shows, so a presentation layer only has to draw [`PathRow`]s
//! and re-query them when a [`PathEvent`](crate::path::PathEvent) arrives.

use serde::{Deserialize, Serialize};

use crate::controller::{LightController, PoolEntry};
use crate::device::{DeviceRef, DeviceState};
use crate::error::LightResult;

/// Protection indicator of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MpsIndicator {
    /// Not part of the protection system.
    NotMember,
    /// Member with nothing to report.
    Clear,
    /// Member cutting the beam.
    Tripped,
    /// Member with a fault shadowed by an upstream trip.
    Faulted,
}

/// What a display shows for one pool entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRow {
    /// Device or container name.
    pub name: String,
    /// Control-system prefix, if any.
    pub prefix: Option<String>,
    /// Beamline of the entry.
    pub beamline: String,
    /// Position along the beam.
    pub z: f64,
    /// State label: a device state, or `Disconnected` for containers.
    pub state: String,
    /// Whether beam reaches this entry.
    pub lit: bool,
    /// Protection indicator.
    pub mps: MpsIndicator,
    /// Whether a remove action is offered.
    pub removable: bool,
    /// Display-only entry without live state.
    pub inactive: bool,
}

impl LightController {
    /// Rows for the device pool of `destination`.
    ///
    /// An entry is lit when it sits at or before the first blocking device of the pool.
    /// Protection indicators come from the path of the device's own beamline.
    pub fn rows(
        &self,
        destination: &str,
        upstream: bool,
        mps_only: bool,
    ) -> LightResult<Vec<PathRow>> {
        let pool = self.device_pool(destination, upstream, mps_only)?;
        let blocker_z = self
            .device_pool(destination, upstream, false)?
            .iter()
            .filter_map(PoolEntry::as_device)
            .find(|device| device.state().is_blocking())
            .map(|device| device.z());
        let lit = |z: f64| blocker_z.map_or(true, |end| z <= end);

        Ok(pool
            .iter()
            .map(|entry| match entry {
                PoolEntry::Device(device) => PathRow {
                    name: device.name().to_string(),
                    prefix: device.prefix().map(str::to_string),
                    beamline: device.beamline().to_string(),
                    z: device.z(),
                    state: device.state().label().to_string(),
                    lit: lit(device.z()),
                    mps: self.indicator(device),
                    removable: device.can_actuate() && device.state() != DeviceState::Removed,
                    inactive: false,
                },
                PoolEntry::Container(container) => PathRow {
                    name: container.name.clone(),
                    prefix: container.prefix.clone(),
                    beamline: container.beamline.clone(),
                    z: entry.z(),
                    state: "Disconnected".to_string(),
                    lit: lit(entry.z()),
                    mps: MpsIndicator::NotMember,
                    removable: false,
                    inactive: true,
                },
            })
            .collect())
    }

    fn indicator(&self, device: &DeviceRef) -> MpsIndicator {
        if !device.is_mps_member() {
            return MpsIndicator::NotMember;
        }
        let Some(path) = self.path_of(device) else {
            return MpsIndicator::Clear;
        };
        let snapshot = path.snapshot();
        if snapshot.tripped.iter().any(|n| n == device.name()) {
            MpsIndicator::Tripped
        } else if snapshot.faulted.iter().any(|n| n == device.name()) {
            MpsIndicator::Faulted
        } else {
            MpsIndicator::Clear
        }
    }
}
