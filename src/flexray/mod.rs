//! FlexRay cluster configuration and coldstart
//!
//! - [`cluster`]: cluster-wide timing shared by every node, key slot ownership
//! - [`controller`]: per-node configuration and the E-Ray controller driver
//! - [`registers`]: register map, configuration image, message buffer layout
//! - [`poc`]: protocol operation control commands and states
//!
//! A device exposes one [`FlexRayController`] per E-Ray core. Controllers with
//! `start_when_going_online` set are started by
//! [`Device::go_online`](crate::device::Device::go_online), which then waits for
//! each of them to synchronize.

pub mod cluster;
pub mod controller;
pub mod poc;
pub mod registers;

pub use cluster::{ClusterConfig, FlexRayCluster, FlexRaySpeed, StrobePointPosition};
pub use controller::{
    ControllerConfig, ControllerState, ControllerTiming, FlexRayController, RegisterAccess,
};
pub use poc::{PocCommand, PocStatus};
pub use registers::{ERayRegister, MessageBuffer};
