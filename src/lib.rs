//! Sessions with vehicle-network interface hardware.
//!
//! vnetlink talks to multi-bus interface units (CAN, Ethernet, FlexRay, SPI) and
//! turns their traffic into typed [`Message`]s routed to subscribers.
//!
//! # Features
//!
//! - **Device sessions**: open, go online, transmit, go offline, close
//! - **Message routing**: network/type filters, callbacks, streams and a capped polling queue
//! - **FlexRay**: E-Ray programming from cluster and controller configurations, and
//!   coordinated coldstart
//! - **LiveData**: handle-correlated subscriptions to unit-internal signals
//! - **Simulation**: in-memory units for tests and development
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use vnetlink::{Message, MessageFilter, NetId, Registry, sim::SimCatalog};
//!
//! #[tokio::main]
//! async fn main() -> vnetlink::Result<()> {
//!     let registry = Registry::new();
//!     registry.add_catalog(SimCatalog::with_units(["SIM001"]));
//!
//!     let device = registry.device("SIM001").await?;
//!     device.open().await?;
//!     device.go_online().await?;
//!
//!     device.subscribe_fn(MessageFilter::network(NetId::DwCan01), |message| {
//!         println!("{:?}", message.as_can());
//!     });
//!     device.transmit(Message::can(NetId::DwCan01, 0x123, vec![1, 2, 3, 4])).await;
//!
//!     device.close();
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod codec;
mod error;
pub mod filter;
pub mod message;
pub mod network;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;

// Sessions and routing
pub mod catalog;
pub mod config;
pub mod device;
mod registry;
pub mod router;
pub mod stream;
pub mod transport;
pub mod transports;

// Protocols
pub mod flexray;
pub mod livedata;

// In-memory hardware
pub mod sim;

// Core exports
pub use error::*;
pub use filter::MessageFilter;
pub use message::{Direction, Message, MessageBody, MessageType};
pub use network::{NetId, Network, NetworkType};

// Session exports
pub use catalog::{DeviceCatalog, DeviceDescriptor};
pub use config::{FlexRayProfile, NodeProfile, SessionConfig};
pub use device::{Device, DeviceState};
pub use registry::Registry;
pub use router::{MessageRouter, MessageSink, SubscriptionId};
pub use stream::MessageStream;
pub use transport::Transport;

// Protocol exports
pub use flexray::{ClusterConfig, ControllerConfig, FlexRayCluster, FlexRayController};
pub use livedata::{HandleGenerator, LiveDataHandle};
