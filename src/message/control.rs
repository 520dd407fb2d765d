//! Internal control messages
//!
//! These carry host/firmware plumbing: going on and off the bus, IO and settings
//! access, TC10 requests and E-Ray register access. Requests carry a `request_id`
//! that the unit copies into its response. Wildcard filters skip these types.

use crate::device::{DeviceSettings, IoKind};
use crate::network::NetId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tc10Request {
    Wake,
    Sleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckStatus {
    Ok,
    Rejected,
    Unsupported,
    /// Settings write against a stale revision
    Conflict { revision: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    SetOnline,
    SetOffline,
    ReadDigitalIo { kind: IoKind, index: u8 },
    WriteDigitalIo { kind: IoKind, index: u8, value: bool },
    /// Response to a digital IO read
    DigitalIo { kind: IoKind, index: u8, value: bool },
    ReadSettings,
    WriteSettings { base_revision: u32, settings: DeviceSettings },
    /// Current settings image, in response to a read or a successful write
    Settings { revision: u32, settings: DeviceSettings },
    Tc10 { network: NetId, request: Tc10Request },
    Ack(AckStatus),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceControlMessage {
    pub request_id: u32,
    pub command: DeviceCommand,
}

impl DeviceControlMessage {
    pub fn new(request_id: u32, command: DeviceCommand) -> Self {
        Self { request_id, command }
    }

    pub fn is_response(&self) -> bool {
        matches!(
            self.command,
            DeviceCommand::DigitalIo { .. } | DeviceCommand::Settings { .. } | DeviceCommand::Ack(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlexRayControlOp {
    ReadRegister { register: u16 },
    WriteRegister { register: u16, value: u32 },
    /// Fill a configured transmit buffer
    WriteMessageBuffer { buffer: u16, data: Vec<u8> },
    RegisterValue { register: u16, value: u32 },
    Ack { accepted: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexRayControlMessage {
    pub controller: u8,
    pub request_id: u32,
    pub op: FlexRayControlOp,
}

impl FlexRayControlMessage {
    pub fn new(controller: u8, request_id: u32, op: FlexRayControlOp) -> Self {
        Self { controller, request_id, op }
    }

    pub fn is_response(&self) -> bool {
        matches!(self.op, FlexRayControlOp::RegisterValue { .. } | FlexRayControlOp::Ack { .. })
    }
}
