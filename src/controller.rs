//! Beamline registry.
//!
//! [`LightController`] is built once from the full device set handed over by the
//! provisioning side. It partitions the devices by beamline, builds one [`BeamPath`] per
//! beamline and answers the queries a display needs: which beamlines exist, how they rank
//! from upstream to downstream, and which devices make up the view of a destination.
//!
//! Construction never fails as a whole. A device or container that cannot be placed is
//! logged and skipped, and the registry is built from the rest.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::device::{Container, DeviceRef};
use crate::error::{LightError, LightResult};
use crate::path::BeamPath;

/// One registered beamline.
#[derive(Debug, Clone)]
pub struct Beamline {
    name: String,
    path: BeamPath,
    range: (f64, f64),
    containers: Vec<Arc<Container>>,
}

impl Beamline {
    /// Beamline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path over the beamline's devices.
    pub fn path(&self) -> &BeamPath {
        &self.path
    }

    /// `(start, end)` positions of the beamline's devices.
    pub fn range(&self) -> (f64, f64) {
        self.range
    }

    /// Containers drawn on this beamline, in registration order.
    pub fn containers(&self) -> &[Arc<Container>] {
        &self.containers
    }
}

/// Item of a device pool: a live device or a display-only container.
#[derive(Debug, Clone)]
pub enum PoolEntry {
    /// A device taking part in the path logic.
    Device(DeviceRef),
    /// A display-only annotation.
    Container(Arc<Container>),
}

impl PoolEntry {
    /// Entry name.
    pub fn name(&self) -> &str {
        match self {
            PoolEntry::Device(device) => device.name(),
            PoolEntry::Container(container) => &container.name,
        }
    }

    /// Beamline the entry belongs to.
    pub fn beamline(&self) -> &str {
        match self {
            PoolEntry::Device(device) => device.beamline(),
            PoolEntry::Container(container) => &container.beamline,
        }
    }

    /// Position along the beam.
    pub fn z(&self) -> f64 {
        match self {
            PoolEntry::Device(device) => device.z(),
            // Only containers with a finite position are ever pooled.
            PoolEntry::Container(container) => container.z.unwrap_or(f64::INFINITY),
        }
    }

    /// The device, if this entry is one.
    pub fn as_device(&self) -> Option<&DeviceRef> {
        match self {
            PoolEntry::Device(device) => Some(device),
            PoolEntry::Container(_) => None,
        }
    }
}

/// Registry of beamlines built from a device set.
#[derive(Debug)]
pub struct LightController {
    beamlines: Vec<Beamline>,
    index: HashMap<String, usize>,
}

impl LightController {
    /// Build the registry from `devices` and display-only `containers`.
    pub fn new(devices: Vec<DeviceRef>, containers: Vec<Container>) -> Self {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<DeviceRef>> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();

        for device in devices {
            if let Err(err) = check_device(&device, &seen) {
                warn!(error = %err, "Skipping device");
                continue;
            }
            seen.insert(device.name().to_string());
            let beamline = device.beamline().to_string();
            if !groups.contains_key(&beamline) {
                order.push(beamline.clone());
            }
            groups.entry(beamline).or_default().push(device);
        }

        let mut beamlines = Vec::with_capacity(order.len());
        for name in order {
            let members = groups.remove(&name).unwrap_or_default();
            match BeamPath::new(name.clone(), members) {
                Ok(path) => {
                    let Some(range) = path.range() else { continue };
                    beamlines.push(Beamline {
                        name,
                        path,
                        range,
                        containers: Vec::new(),
                    });
                }
                Err(err) => error!(beamline = %name, error = %err, "Skipping beamline"),
            }
        }

        let index: HashMap<String, usize> = beamlines
            .iter()
            .enumerate()
            .map(|(idx, line)| (line.name.clone(), idx))
            .collect();

        for container in containers {
            match place_container(&container, &index, &beamlines) {
                Ok(Some(idx)) => beamlines[idx].containers.push(Arc::new(container)),
                Ok(None) => debug!(
                    container = %container.name,
                    beamline = %container.beamline,
                    "Container lies beyond the end of its beamline"
                ),
                Err(err) => error!(error = %err, "Skipping container"),
            }
        }

        info!(beamlines = beamlines.len(), "Light controller ready");
        Self { beamlines, index }
    }

    /// All beamlines in registration order.
    ///
    /// Together with [`LightController::beamline`] this serves as the name-keyed
    /// beamline mapping: each entry carries its name, and lookup by name goes through
    /// the controller's index.
    pub fn beamlines(&self) -> &[Beamline] {
        &self.beamlines
    }

    /// Look up a beamline by name.
    pub fn beamline(&self, name: &str) -> LightResult<&Beamline> {
        self.index
            .get(name)
            .map(|&idx| &self.beamlines[idx])
            .ok_or_else(|| LightError::UnknownBeamline(name.to_string()))
    }

    /// Beamline names from most upstream to most downstream end point.
    ///
    /// Beamlines ending at the same position keep registration order.
    pub fn destinations(&self) -> Vec<&str> {
        let mut lines: Vec<&Beamline> = self.beamlines.iter().collect();
        lines.sort_by(|a, b| a.range.1.total_cmp(&b.range.1));
        lines.into_iter().map(|line| line.name.as_str()).collect()
    }

    /// Destination to start a display with.
    ///
    /// Returns `requested` when it names a known beamline; otherwise the most upstream
    /// destination. `None` only when the registry is empty.
    pub fn default_destination(&self, requested: Option<&str>) -> Option<&str> {
        if let Some(name) = requested {
            match self.beamline(name) {
                Ok(line) => return Some(line.name()),
                Err(err) => error!(error = %err, "Falling back to most upstream beamline"),
            }
        }
        self.destinations().first().copied()
    }

    /// Devices and containers to show for `destination`, sorted by `z`.
    ///
    /// With `upstream`, beamlines ending before the destination's end are merged in.
    /// With `mps_only`, only protection-system devices are kept (containers are dropped).
    /// Ties in `z` keep beamline registration order, then device registration order.
    pub fn device_pool(
        &self,
        destination: &str,
        upstream: bool,
        mps_only: bool,
    ) -> LightResult<Vec<PoolEntry>> {
        let target = self.beamline(destination)?;
        let end = target.range.1;

        let mut pool: Vec<PoolEntry> = Vec::new();
        for line in &self.beamlines {
            let included =
                line.name == target.name || (upstream && line.range.1 < end);
            if !included {
                continue;
            }
            pool.extend(line.path.devices().iter().cloned().map(PoolEntry::Device));
            pool.extend(line.containers.iter().cloned().map(PoolEntry::Container));
        }
        pool.sort_by(|a, b| a.z().total_cmp(&b.z()));

        if mps_only {
            pool.retain(|entry| entry.as_device().is_some_and(|d| d.is_mps_member()));
        }
        debug!(destination, upstream, mps_only, count = pool.len(), "Selected devices");
        Ok(pool)
    }

    /// Look up a device by name across all beamlines.
    pub fn device(&self, name: &str) -> LightResult<&DeviceRef> {
        self.beamlines
            .iter()
            .flat_map(|line| line.path.devices())
            .find(|device| device.name() == name)
            .ok_or_else(|| LightError::UnknownDevice(name.to_string()))
    }

    /// Path of the beamline a device belongs to.
    pub fn path_of(&self, device: &DeviceRef) -> Option<&BeamPath> {
        self.index
            .get(device.beamline())
            .map(|&idx| &self.beamlines[idx].path)
            .filter(|path| path.contains(device))
    }

    /// Request insertion of a named device. Does not wait for the state change.
    pub fn insert(&self, name: &str) -> LightResult<()> {
        let device = self.device(name)?;
        info!(device = %name, "Inserting device");
        device.actuate_insert().inspect_err(|err| {
            error!(device = %name, error = %err, "Insert failed");
        })
    }

    /// Request removal of a named device. Does not wait for the state change.
    pub fn remove(&self, name: &str) -> LightResult<()> {
        let device = self.device(name)?;
        info!(device = %name, "Removing device");
        device.actuate_remove().inspect_err(|err| {
            error!(device = %name, error = %err, "Remove failed");
        })
    }
}

fn check_device(device: &DeviceRef, seen: &HashSet<String>) -> LightResult<()> {
    let malformed = |reason: String| LightError::MalformedDevice {
        name: device.name().to_string(),
        reason,
    };
    if device.name().is_empty() {
        return Err(malformed("empty name".to_string()));
    }
    if device.beamline().is_empty() {
        return Err(malformed("no beamline".to_string()));
    }
    if !device.z().is_finite() {
        return Err(malformed(format!("non-finite position {}", device.z())));
    }
    if seen.contains(device.name()) {
        return Err(malformed("duplicate name".to_string()));
    }
    Ok(())
}

/// Beamline index the container attaches to, `None` if it lies at or past the end.
fn place_container(
    container: &Container,
    index: &HashMap<String, usize>,
    beamlines: &[Beamline],
) -> LightResult<Option<usize>> {
    let malformed = |reason: String| LightError::MalformedContainer {
        name: container.name.clone(),
        reason,
    };
    let idx = *index.get(&container.beamline).ok_or_else(|| {
        malformed(format!(
            "beamline '{}' is not represented by any device",
            container.beamline
        ))
    })?;
    let z = match container.z {
        Some(z) if z.is_finite() => z,
        Some(z) => return Err(malformed(format!("non-finite position {}", z))),
        None => return Err(malformed("no position".to_string())),
    };
    Ok((z < beamlines[idx].range.1).then_some(idx))
}
