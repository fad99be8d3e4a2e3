//! Core library for the lightpath application.
//!
//! This library tracks how far the beam can travel along each beamline and which devices
//! are responsible for stopping it. Devices are provided from outside through the
//! [`device::LightDevice`] contract; the library orders them into [`path::BeamPath`]s,
//! keeps the derived impediment and protection classification current as device events
//! arrive, and republishes consolidated change notifications to any number of observers.
//!
//! # Data Flow
//!
//! ```text
//! Device --[DeviceEvent]--> BeamPath --[PathEvent]--> observers (displays, loggers)
//!                              ^
//!              LightController (beamline registry, device pools)
//! ```

pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod notify;
pub mod path;
pub mod sim;
pub mod view;

pub use controller::{Beamline, LightController, PoolEntry};
pub use device::{Actuator, Container, DeviceEvent, DeviceRef, DeviceState, LightDevice, MpsStatus};
pub use error::{LightError, LightResult};
pub use notify::{Handler, SubscriptionId};
pub use path::{BeamPath, PathEvent, PathEventKind, PathSnapshot};
