//! Device catalog trait
//!
//! A catalog enumerates connectable units and hands out their transports. Real
//! hardware enumeration lives outside this crate; [`crate::sim::SimCatalog`]
//! provides simulated units.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::Result;
use crate::transport::Transport;

/// Identity and capabilities of a connectable unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub serial: String,
    pub product: String,
    #[serde(default)]
    pub supports_tc10: bool,
    /// Number of E-Ray cores; each drives one FlexRay network.
    #[serde(default)]
    pub flexray_controllers: usize,
    #[serde(default)]
    pub analog_outputs: usize,
}

impl DeviceDescriptor {
    pub fn new(serial: impl Into<String>, product: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            product: product.into(),
            supports_tc10: false,
            flexray_controllers: 0,
            analog_outputs: 0,
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.product, self.serial)
    }
}

#[async_trait::async_trait]
pub trait DeviceCatalog: Send + Sync + 'static {
    async fn find_all_devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Transport for `descriptor`. Opening it is left to the device session.
    async fn connect(&self, descriptor: &DeviceDescriptor) -> Result<Arc<dyn Transport>>;
}
