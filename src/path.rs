//! Beam path engine.
//!
//! A [`BeamPath`] owns the devices of one beamline, sorted by position, and derives from
//! their reported states:
//!
//! - the **impediment**: the first device (lowest `z`) currently blocking the beam;
//! - the **tripped** devices: the inserted protection-system member whose active fault
//!   cuts the beam, i.e. the first such device the beam reaches;
//! - the **faulted** devices: protection members with an active fault further down,
//!   whose effect is moot because the beam is already cut upstream.
//!
//! # Reach
//!
//! Classification only covers devices the beam can reach. A blocking device that is not
//! itself tripping stops the scan: the beam is parked there and nothing downstream is
//! classified. Once a trip has been claimed the scan continues, so later active faults
//! are reported as faulted. An active fault on a device that is not blocking, reached
//! before any trip, does not cut the beam and stays unclassified.
//!
//! # Notifications
//!
//! The path subscribes to every member device. Each device event triggers a
//! recomputation under a per-path lock, and the path publishes one [`PathEvent`] per
//! kind of derived value that actually changed. Observers can also follow a
//! [`PathSnapshot`] through a `tokio::sync::watch` channel.
//!
//! The lock only covers reading device states, comparing with the previous result and
//! queueing the resulting events. Observers run outside it: one thread at a time drains
//! the queue of a path, so events reach observers in computation order. An observer may
//! actuate devices on any path, its own included. Events raised that way are queued and
//! delivered once the current event has reached every observer.
//!
//! ```text
//! Device --[DeviceEvent]--> BeamPath::refresh --[PathEvent]--> observers
//!                                           \--[PathSnapshot]--> watch receivers
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::device::{DeviceEvent, DeviceRef, DeviceState};
use crate::error::{LightError, LightResult};
use crate::notify::{Handler, SubscriptionId, Subscribers};

/// Kind of derived value a [`PathEvent`] reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathEventKind {
    /// The impediment moved.
    Impediment,
    /// The tripped or faulted sets changed.
    Protection,
}

/// Consolidated change notification published by a beam path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEvent {
    /// Beamline of the publishing path.
    pub beamline: String,
    /// What changed.
    pub kind: PathEventKind,
}

/// Serializable view of the derived state of a path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathSnapshot {
    /// Beamline of the path.
    pub beamline: String,
    /// Name of the first blocking device.
    pub impediment: Option<String>,
    /// Names of tripping devices.
    pub tripped: Vec<String>,
    /// Names of faulted devices.
    pub faulted: Vec<String>,
}

/// Result of one classification pass, as indices into the sorted device list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Derived {
    impediment: Option<usize>,
    tripped: Vec<usize>,
    faulted: Vec<usize>,
    anomalous: Vec<usize>,
}

fn classify(devices: &[DeviceRef]) -> Derived {
    let mut derived = Derived::default();
    let mut claimed = false;
    let mut reachable = true;

    for (idx, device) in devices.iter().enumerate() {
        let state = device.state();
        if state == DeviceState::Error {
            derived.anomalous.push(idx);
        }
        if derived.impediment.is_none() && state.is_blocking() {
            derived.impediment = Some(idx);
        }
        if !reachable {
            continue;
        }

        let active_fault = device.mps().is_some_and(|mps| mps.is_active_fault());
        if claimed {
            if active_fault {
                derived.faulted.push(idx);
            }
        } else if state.is_blocking() {
            if active_fault {
                derived.tripped.push(idx);
                claimed = true;
            } else {
                reachable = false;
            }
        }
    }
    derived
}

#[derive(Debug, Default)]
struct PathState {
    last: Derived,
}

struct PathInner {
    beamline: String,
    devices: Vec<DeviceRef>,
    state: Mutex<PathState>,
    pending: Mutex<VecDeque<PathEvent>>,
    draining: AtomicBool,
    subscribers: Subscribers<PathEvent>,
    snapshot: watch::Sender<PathSnapshot>,
    device_subs: Vec<SubscriptionId>,
}

impl Drop for PathInner {
    fn drop(&mut self) {
        for (device, id) in self.devices.iter().zip(&self.device_subs) {
            device.unsubscribe(*id);
        }
    }
}

/// Position-ordered chain of devices for one beamline.
///
/// Cloning is cheap and every clone observes the same path.
#[derive(Clone)]
pub struct BeamPath {
    inner: Arc<PathInner>,
}

impl fmt::Debug for BeamPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeamPath")
            .field("beamline", &self.inner.beamline)
            .field("devices", &self.inner.devices.len())
            .field("subscribers", &self.inner.subscribers.len())
            .finish()
    }
}

impl BeamPath {
    /// Build a path for `beamline` from its devices.
    ///
    /// Devices are sorted by `z`; devices at equal `z` keep their given order.
    ///
    /// # Errors
    ///
    /// [`LightError::InvalidTopology`] if any device belongs to another beamline or has a
    /// position that is not a finite number.
    pub fn new(beamline: impl Into<String>, devices: Vec<DeviceRef>) -> LightResult<Self> {
        let beamline = beamline.into();
        if let Some(stray) = devices.iter().find(|d| d.beamline() != beamline) {
            return Err(LightError::InvalidTopology(format!(
                "device '{}' belongs to beamline '{}', not '{}'",
                stray.name(),
                stray.beamline(),
                beamline
            )));
        }
        if let Some(bad) = devices.iter().find(|d| !d.z().is_finite()) {
            return Err(LightError::InvalidTopology(format!(
                "device '{}' has non-finite position {}",
                bad.name(),
                bad.z()
            )));
        }

        let mut devices = devices;
        devices.sort_by(|a, b| a.z().total_cmp(&b.z()));

        let derived = classify(&devices);
        let initial = snapshot_of(&beamline, &devices, &derived);
        let (snapshot, _) = watch::channel(initial);

        let inner = Arc::new_cyclic(|weak: &Weak<PathInner>| {
            let device_subs = devices
                .iter()
                .map(|device| {
                    let weak = weak.clone();
                    let handler: Handler<DeviceEvent> = Arc::new(move |event: &DeviceEvent| {
                        if let Some(inner) = weak.upgrade() {
                            inner.on_device_event(event);
                        }
                    });
                    device.subscribe(handler)
                })
                .collect();
            PathInner {
                beamline,
                devices,
                state: Mutex::new(PathState { last: derived }),
                pending: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                subscribers: Subscribers::new(),
                snapshot,
                device_subs,
            }
        });
        let anomalous = inner.state.lock().last.anomalous.clone();
        inner.log_anomalies(&[], &anomalous);

        debug!(
            beamline = %inner.beamline,
            devices = inner.devices.len(),
            "Beam path constructed"
        );
        Ok(Self { inner })
    }

    /// Beamline this path covers.
    pub fn beamline(&self) -> &str {
        &self.inner.beamline
    }

    /// Member devices in ascending `z`.
    pub fn devices(&self) -> &[DeviceRef] {
        &self.inner.devices
    }

    /// Number of member devices.
    pub fn len(&self) -> usize {
        self.inner.devices.len()
    }

    /// Whether the path has no devices.
    pub fn is_empty(&self) -> bool {
        self.inner.devices.is_empty()
    }

    /// Whether `device` is a member of this path.
    pub fn contains(&self, device: &DeviceRef) -> bool {
        self.inner.devices.iter().any(|d| Arc::ptr_eq(d, device))
    }

    /// `(first z, last z)` of the path, `None` when empty.
    pub fn range(&self) -> Option<(f64, f64)> {
        match (self.inner.devices.first(), self.inner.devices.last()) {
            (Some(first), Some(last)) => Some((first.z(), last.z())),
            _ => None,
        }
    }

    /// First device blocking the beam, from the latest reported states.
    pub fn impediment(&self) -> Option<DeviceRef> {
        self.inner
            .devices
            .iter()
            .find(|device| device.state().is_blocking())
            .cloned()
    }

    /// Inserted devices whose active fault cuts the beam, from the latest reported states.
    pub fn tripped_devices(&self) -> Vec<DeviceRef> {
        self.inner.pick(&classify(&self.inner.devices).tripped)
    }

    /// Devices with an active fault shadowed by an upstream trip.
    pub fn faulted_devices(&self) -> Vec<DeviceRef> {
        self.inner.pick(&classify(&self.inner.devices).faulted)
    }

    /// Devices currently reporting both inserted and removed.
    pub fn anomalous_devices(&self) -> Vec<DeviceRef> {
        self.inner.pick(&classify(&self.inner.devices).anomalous)
    }

    /// Names-only view of the derived state.
    pub fn snapshot(&self) -> PathSnapshot {
        let derived = classify(&self.inner.devices);
        snapshot_of(&self.inner.beamline, &self.inner.devices, &derived)
    }

    /// Receiver that always holds the most recently published snapshot.
    pub fn watch(&self) -> watch::Receiver<PathSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Register for change notifications.
    ///
    /// With `kind` set, only events of that kind are delivered.
    pub fn subscribe(
        &self,
        handler: Handler<PathEvent>,
        kind: Option<PathEventKind>,
    ) -> SubscriptionId {
        match kind {
            None => self.inner.subscribers.subscribe(handler),
            Some(kind) => self
                .inner
                .subscribers
                .subscribe(Arc::new(move |event: &PathEvent| {
                    if event.kind == kind {
                        handler(event);
                    }
                })),
        }
    }

    /// Cancel a registration. Unknown or repeated handles are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if !self.inner.subscribers.unsubscribe(id) {
            debug!(beamline = %self.inner.beamline, subscription = %id, "Ignoring unknown subscription");
        }
    }

    /// Number of live subscriptions on this path.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Recompute the derived state and publish what changed.
    ///
    /// Called automatically on every member device event; exposed for providers that
    /// batch hardware reads and want to force a pass.
    pub fn refresh(&self) {
        self.inner.refresh();
    }
}

impl PathInner {
    fn on_device_event(&self, event: &DeviceEvent) {
        debug!(beamline = %self.beamline, device = %event.device, state = %event.state, "Device event");
        self.refresh();
    }

    fn refresh(&self) {
        self.recompute();
        self.drain();
    }

    /// Recompute under the path lock and queue one event per changed kind.
    fn recompute(&self) {
        let mut state = self.state.lock();
        let derived = classify(&self.devices);
        if derived == state.last {
            return;
        }

        let mut kinds = Vec::with_capacity(2);
        if derived.impediment != state.last.impediment {
            debug!(
                beamline = %self.beamline,
                impediment = ?derived.impediment.map(|i| self.devices[i].name()),
                "Impediment changed"
            );
            kinds.push(PathEventKind::Impediment);
        }
        if derived.tripped != state.last.tripped || derived.faulted != state.last.faulted {
            debug!(
                beamline = %self.beamline,
                tripped = derived.tripped.len(),
                faulted = derived.faulted.len(),
                "Protection classification changed"
            );
            kinds.push(PathEventKind::Protection);
        }
        self.log_anomalies(&state.last.anomalous, &derived.anomalous);

        if !kinds.is_empty() {
            self.snapshot
                .send_replace(snapshot_of(&self.beamline, &self.devices, &derived));
            let mut pending = self.pending.lock();
            pending.extend(kinds.into_iter().map(|kind| PathEvent {
                beamline: self.beamline.clone(),
                kind,
            }));
        }
        state.last = derived;
    }

    /// Deliver queued events unless another call is already doing so.
    fn drain(&self) {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            {
                let _draining = DrainGuard(&self.draining);
                loop {
                    let next = self.pending.lock().pop_front();
                    match next {
                        Some(event) => self.subscribers.publish(&event),
                        None => break,
                    }
                }
            }
            // An event queued between the last pop and the flag reset has no drainer yet.
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    fn log_anomalies(&self, before: &[usize], after: &[usize]) {
        let before: HashSet<usize> = before.iter().copied().collect();
        for idx in after.iter().filter(|idx| !before.contains(idx)) {
            let err = LightError::AnomalousDeviceState(self.devices[*idx].name().to_string());
            warn!(beamline = %self.beamline, error = %err, "Treating device as blocking");
        }
    }

    fn pick(&self, indices: &[usize]) -> Vec<DeviceRef> {
        indices.iter().map(|&i| self.devices[i].clone()).collect()
    }
}

/// Clears the drain flag even when an observer panics.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn snapshot_of(beamline: &str, devices: &[DeviceRef], derived: &Derived) -> PathSnapshot {
    let names = |indices: &[usize]| -> Vec<String> {
        indices
            .iter()
            .map(|&i| devices[i].name().to_string())
            .collect()
    };
    PathSnapshot {
        beamline: beamline.to_string(),
        impediment: derived.impediment.map(|i| devices[i].name().to_string()),
        tripped: names(&derived.tripped),
        faulted: names(&derived.faulted),
    }
}
