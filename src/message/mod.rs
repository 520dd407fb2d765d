//! Message model
//!
//! Every frame that crosses a device session is a [`Message`]: common metadata
//! (network, timestamp, direction) plus a [`MessageBody`] that is one of a closed
//! set of variants. Matching on the body is exhaustive, so adding a variant is a
//! compile-time change everywhere messages are handled.
//!
//! Receive-side messages are shared with subscribers behind an `Arc` and are never
//! mutated after decode.

pub mod can;
pub mod control;
pub mod ethernet;
pub mod flexray;
pub mod livedata;
pub mod spi;

pub use can::CanMessage;
pub use control::{
    AckStatus, DeviceCommand, DeviceControlMessage, FlexRayControlMessage, FlexRayControlOp,
    Tc10Request,
};
pub use ethernet::{Duplex, EthernetMessage, EthernetStatusMessage, LinkMode, LinkSpeed, LinkState};
pub use flexray::{FlexRayChannel, FlexRayMessage};
pub use livedata::{
    LiveDataArgument, LiveDataCommandMessage, LiveDataSetValueMessage, LiveDataStatusMessage,
    LiveDataValueMessage,
};
pub use spi::{SpiDirection, SpiMessage};

use serde::{Deserialize, Serialize};

use crate::network::{NetId, Network, NetworkType};
use crate::{DeviceError, Result};

/// Whether a message was received from a bus or transmitted by this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Rx,
    Tx,
}

/// Discriminant of a [`MessageBody`], used as a filter and index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageType {
    Can,
    Ethernet,
    FlexRay,
    Spi,
    EthernetStatus,
    LiveDataCommand,
    LiveDataStatus,
    LiveDataValue,
    LiveDataSetValue,
    DeviceControl,
    FlexRayControl,
}

impl MessageType {
    pub const ALL: &'static [MessageType] = &[
        MessageType::Can,
        MessageType::Ethernet,
        MessageType::FlexRay,
        MessageType::Spi,
        MessageType::EthernetStatus,
        MessageType::LiveDataCommand,
        MessageType::LiveDataStatus,
        MessageType::LiveDataValue,
        MessageType::LiveDataSetValue,
        MessageType::DeviceControl,
        MessageType::FlexRayControl,
    ];

    /// Host/firmware plumbing that wildcard filters skip.
    pub fn is_internal(self) -> bool {
        matches!(self, MessageType::DeviceControl | MessageType::FlexRayControl)
    }

    /// Bus family a message of this type must travel on.
    pub fn network_type(self) -> NetworkType {
        match self {
            MessageType::Can => NetworkType::Can,
            MessageType::Ethernet | MessageType::EthernetStatus => NetworkType::Ethernet,
            MessageType::FlexRay => NetworkType::FlexRay,
            MessageType::Spi => NetworkType::Spi,
            MessageType::LiveDataCommand
            | MessageType::LiveDataStatus
            | MessageType::LiveDataValue
            | MessageType::LiveDataSetValue
            | MessageType::DeviceControl
            | MessageType::FlexRayControl => NetworkType::Internal,
        }
    }
}

/// Variant-specific payload of a [`Message`].
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Can(CanMessage),
    Ethernet(EthernetMessage),
    FlexRay(FlexRayMessage),
    Spi(SpiMessage),
    EthernetStatus(EthernetStatusMessage),
    LiveDataCommand(LiveDataCommandMessage),
    LiveDataStatus(LiveDataStatusMessage),
    LiveDataValue(LiveDataValueMessage),
    LiveDataSetValue(LiveDataSetValueMessage),
    DeviceControl(DeviceControlMessage),
    FlexRayControl(FlexRayControlMessage),
}

impl MessageBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::Can(_) => MessageType::Can,
            MessageBody::Ethernet(_) => MessageType::Ethernet,
            MessageBody::FlexRay(_) => MessageType::FlexRay,
            MessageBody::Spi(_) => MessageType::Spi,
            MessageBody::EthernetStatus(_) => MessageType::EthernetStatus,
            MessageBody::LiveDataCommand(_) => MessageType::LiveDataCommand,
            MessageBody::LiveDataStatus(_) => MessageType::LiveDataStatus,
            MessageBody::LiveDataValue(_) => MessageType::LiveDataValue,
            MessageBody::LiveDataSetValue(_) => MessageType::LiveDataSetValue,
            MessageBody::DeviceControl(_) => MessageType::DeviceControl,
            MessageBody::FlexRayControl(_) => MessageType::FlexRayControl,
        }
    }
}

macro_rules! impl_body_from {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for MessageBody {
                fn from(value: $ty) -> Self {
                    MessageBody::$variant(value)
                }
            }
        )*
    };
}

impl_body_from! {
    Can => CanMessage,
    Ethernet => EthernetMessage,
    FlexRay => FlexRayMessage,
    Spi => SpiMessage,
    EthernetStatus => EthernetStatusMessage,
    LiveDataCommand => LiveDataCommandMessage,
    LiveDataStatus => LiveDataStatusMessage,
    LiveDataValue => LiveDataValueMessage,
    LiveDataSetValue => LiveDataSetValueMessage,
    DeviceControl => DeviceControlMessage,
    FlexRayControl => FlexRayControlMessage,
}

/// A frame with its common metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub network: Network,
    /// Nanoseconds on the device timebase. Zero for messages built by the caller.
    pub timestamp_ns: u64,
    pub direction: Direction,
    pub body: MessageBody,
}

impl Message {
    /// Build an outbound message on `network`.
    pub fn new(network: impl Into<Network>, body: impl Into<MessageBody>) -> Self {
        Self {
            network: network.into(),
            timestamp_ns: 0,
            direction: Direction::Tx,
            body: body.into(),
        }
    }

    /// Convenience for a classic CAN frame.
    pub fn can(network: NetId, arbid: u32, data: impl Into<Vec<u8>>) -> Self {
        Self::new(network, CanMessage::new(arbid, data))
    }

    /// LiveData traffic travels on the extended command channel.
    pub fn livedata(body: impl Into<MessageBody>) -> Self {
        Self::new(NetId::ExtendedCommand, body)
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_timestamp(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    pub fn is_internal(&self) -> bool {
        self.message_type().is_internal()
    }

    /// Field-wise equality ignoring the timestamp.
    pub fn same_content(&self, other: &Message) -> bool {
        self.network == other.network
            && self.direction == other.direction
            && self.body == other.body
    }

    pub fn as_can(&self) -> Option<&CanMessage> {
        match &self.body {
            MessageBody::Can(can) => Some(can),
            _ => None,
        }
    }

    pub fn as_flexray(&self) -> Option<&FlexRayMessage> {
        match &self.body {
            MessageBody::FlexRay(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn as_livedata_value(&self) -> Option<&LiveDataValueMessage> {
        match &self.body {
            MessageBody::LiveDataValue(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_livedata_status(&self) -> Option<&LiveDataStatusMessage> {
        match &self.body {
            MessageBody::LiveDataStatus(status) => Some(status),
            _ => None,
        }
    }

    /// Check the body against its frame-layout limits and the network it is bound to.
    pub fn validate(&self) -> Result<()> {
        let expected = self.message_type().network_type();
        if expected != self.network.network_type() {
            return Err(DeviceError::transmit_failed(format!(
                "{:?} message cannot travel on {} ({:?})",
                self.message_type(),
                self.network,
                self.network.network_type()
            )));
        }

        match &self.body {
            MessageBody::Can(can) => can.validate(),
            MessageBody::Ethernet(eth) => eth.validate(),
            MessageBody::FlexRay(frame) => frame.validate(),
            MessageBody::Spi(_) | MessageBody::EthernetStatus(_) => Ok(()),
            MessageBody::LiveDataCommand(cmd) => cmd.validate(),
            MessageBody::LiveDataSetValue(set) => set.validate(),
            MessageBody::LiveDataStatus(_)
            | MessageBody::LiveDataValue(_)
            | MessageBody::DeviceControl(_)
            | MessageBody::FlexRayControl(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_helper_builds_outbound_frame() {
        let msg = Message::can(NetId::DwCan01, 0x123, vec![1, 2, 3, 4]);
        assert_eq!(msg.direction, Direction::Tx);
        assert_eq!(msg.message_type(), MessageType::Can);
        assert_eq!(msg.as_can().map(|c| c.arbid), Some(0x123));
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_mismatched_network() {
        let msg = Message::new(NetId::Ethernet01, CanMessage::new(0x10, vec![0]));
        assert!(msg.validate().is_err());
    }

    #[test]
    fn same_content_ignores_timestamp() {
        let a = Message::can(NetId::DwCan02, 0x7FF, vec![]).with_timestamp(10);
        let b = a.clone().with_timestamp(99);
        assert!(a.same_content(&b));
        assert_ne!(a, b);
        assert!(!a.same_content(&b.clone().with_direction(Direction::Rx)));
    }

    #[test]
    fn internal_types() {
        let internal: Vec<_> = MessageType::ALL.iter().filter(|t| t.is_internal()).collect();
        assert_eq!(internal, vec![&MessageType::DeviceControl, &MessageType::FlexRayControl]);
    }
}
