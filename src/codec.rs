//! Raw frame codec
//!
//! A [`Transport`](crate::transport::Transport) moves [`RawFrame`]s: a network id, a
//! device timestamp and an opaque payload. This module maps every [`Message`] variant
//! to and from that payload.
//!
//! ## Payload layout
//!
//! All multi-byte fields are little-endian.
//!
//! | Offset | Size | Field                          |
//! |--------|------|--------------------------------|
//! | 0      | 1    | message type code              |
//! | 1      | 1    | direction (0 = Rx, 1 = Tx)     |
//! | 2      | ..   | variant body                   |
//!
//! LiveData bodies start with the `{version, command, handle}` header used by the
//! firmware, and LiveData values travel as length-prefixed 32.32 fixed-point entries.
//! Decoding is strict: truncated bodies, unknown codes and trailing bytes are errors.

use tracing::trace;

use crate::device::{AnalogOutput, AnalogVoltage, DeviceSettings, IoKind};
use crate::livedata::{
    LIVE_DATA_VERSION, LiveDataCommand, LiveDataObjectType, LiveDataStatus, LiveDataValue,
    LiveDataValueType,
};
use crate::message::{
    AckStatus, CanMessage, DeviceCommand, DeviceControlMessage, Direction, Duplex,
    EthernetMessage, EthernetStatusMessage, FlexRayChannel, FlexRayControlMessage,
    FlexRayControlOp, FlexRayMessage, LinkMode, LinkSpeed, LinkState, LiveDataArgument,
    LiveDataCommandMessage, LiveDataSetValueMessage, LiveDataStatusMessage, LiveDataValueMessage,
    Message, MessageBody, MessageType, SpiDirection, SpiMessage, Tc10Request,
};
use crate::network::{NetId, Network};
use crate::{DeviceError, Result};

/// Length field value of a LiveData value entry (the i64 that follows).
const LIVE_DATA_VALUE_LEN: u16 = 8;

/// A frame as moved by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub network: NetId,
    pub timestamp_ns: u64,
    pub payload: Vec<u8>,
}

impl MessageType {
    pub fn code(self) -> u8 {
        match self {
            MessageType::Can => 0x01,
            MessageType::Ethernet => 0x02,
            MessageType::FlexRay => 0x03,
            MessageType::Spi => 0x04,
            MessageType::EthernetStatus => 0x05,
            MessageType::LiveDataCommand => 0x10,
            MessageType::LiveDataStatus => 0x11,
            MessageType::LiveDataValue => 0x12,
            MessageType::LiveDataSetValue => 0x13,
            MessageType::DeviceControl => 0x20,
            MessageType::FlexRayControl => 0x21,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        MessageType::ALL.iter().copied().find(|t| t.code() == code)
    }
}

/// Encode a message into a raw frame.
pub fn encode(message: &Message) -> Result<RawFrame> {
    let mut w = ByteWriter::with_capacity(32);
    w.u8(message.message_type().code());
    w.u8(match message.direction {
        Direction::Rx => 0,
        Direction::Tx => 1,
    });

    match &message.body {
        MessageBody::Can(can) => encode_can(&mut w, can)?,
        MessageBody::Ethernet(eth) => {
            match eth.fcs {
                Some(fcs) => {
                    w.u8(1);
                    w.u32(fcs);
                }
                None => w.u8(0),
            }
            w.bytes_u16("Ethernet data", &eth.data)?;
        }
        MessageBody::FlexRay(frame) => {
            w.u16(frame.slot_id);
            w.u8(frame.cycle);
            w.u8(frame.cycle_repetition);
            w.u8(frame.channel.code());
            w.u8((frame.startup as u8) | (frame.sync as u8) << 1 | (frame.null_frame as u8) << 2);
            w.u16(frame.header_crc);
            w.bytes_u16("FlexRay data", &frame.data)?;
        }
        MessageBody::Spi(spi) => {
            w.u8(spi.direction.code());
            w.u8(spi.mms);
            w.u16(spi.address);
            w.bytes_u16("SPI payload", &spi.payload)?;
        }
        MessageBody::EthernetStatus(status) => {
            w.u8(status.state.code());
            w.u8(status.speed.code());
            w.u8(status.duplex.code());
            w.u8(status.mode.code());
        }
        MessageBody::LiveDataCommand(cmd) => {
            livedata_header(&mut w, cmd.command, cmd.handle);
            w.u32(cmd.args.len() as u32);
            w.u32(millis_u32("update period", cmd.update_period)?);
            w.u32(millis_u32("expiration time", cmd.expiration_time)?);
            for arg in &cmd.args {
                encode_argument(&mut w, arg);
            }
        }
        MessageBody::LiveDataStatus(status) => {
            livedata_header(&mut w, LiveDataCommand::Status, status.handle);
            w.u32(status.requested_command.code());
            w.u32(status.status.code());
        }
        MessageBody::LiveDataValue(values) => {
            livedata_header(&mut w, LiveDataCommand::Response, values.handle);
            w.u32(values.values.len() as u32);
            for value in &values.values {
                encode_value(&mut w, value);
            }
        }
        MessageBody::LiveDataSetValue(set) => {
            if set.args.len() != set.values.len() {
                return Err(DeviceError::decode(
                    "LiveData set-value",
                    format!("{} arguments but {} values", set.args.len(), set.values.len()),
                ));
            }
            livedata_header(&mut w, LiveDataCommand::SetValue, set.handle);
            w.u32(set.args.len() as u32);
            for (arg, value) in set.args.iter().zip(&set.values) {
                encode_argument(&mut w, arg);
                encode_value(&mut w, value);
            }
        }
        MessageBody::DeviceControl(ctrl) => encode_device_control(&mut w, ctrl)?,
        MessageBody::FlexRayControl(ctrl) => {
            w.u8(ctrl.controller);
            w.u32(ctrl.request_id);
            match &ctrl.op {
                FlexRayControlOp::ReadRegister { register } => {
                    w.u8(0);
                    w.u16(*register);
                }
                FlexRayControlOp::WriteRegister { register, value } => {
                    w.u8(1);
                    w.u16(*register);
                    w.u32(*value);
                }
                FlexRayControlOp::WriteMessageBuffer { buffer, data } => {
                    w.u8(2);
                    w.u16(*buffer);
                    w.bytes_u16("message buffer data", data)?;
                }
                FlexRayControlOp::RegisterValue { register, value } => {
                    w.u8(3);
                    w.u16(*register);
                    w.u32(*value);
                }
                FlexRayControlOp::Ack { accepted } => {
                    w.u8(4);
                    w.u8(*accepted as u8);
                }
            }
        }
    }

    Ok(RawFrame {
        network: message.network.kind(),
        timestamp_ns: message.timestamp_ns,
        payload: w.finish(),
    })
}

/// Decode a raw frame into a message.
pub fn decode(frame: &RawFrame) -> Result<Message> {
    let mut r = ByteReader::new(&frame.payload, "message header");
    let type_code = r.u8()?;
    let message_type = MessageType::from_code(type_code).ok_or_else(|| {
        DeviceError::decode("message header", format!("unknown type code {:#04x}", type_code))
    })?;
    let direction = match r.u8()? {
        0 => Direction::Rx,
        1 => Direction::Tx,
        other => {
            let details = format!("invalid direction {}", other);
            return Err(DeviceError::decode("message header", details));
        }
    };

    r.context = context_for(message_type);
    let body = match message_type {
        MessageType::Can => MessageBody::Can(decode_can(&mut r)?),
        MessageType::Ethernet => {
            let fcs = match r.u8()? {
                0 => None,
                _ => Some(r.u32()?),
            };
            let data = r.bytes_u16()?;
            MessageBody::Ethernet(EthernetMessage { data, fcs })
        }
        MessageType::FlexRay => {
            let slot_id = r.u16()?;
            let cycle = r.u8()?;
            let cycle_repetition = r.u8()?;
            let channel = r.code(FlexRayChannel::from_code, "channel")?;
            let flags = r.u8()?;
            let header_crc = r.u16()?;
            let data = r.bytes_u16()?;
            MessageBody::FlexRay(FlexRayMessage {
                slot_id,
                cycle,
                cycle_repetition,
                channel,
                data,
                startup: flags & 0x1 != 0,
                sync: flags & 0x2 != 0,
                null_frame: flags & 0x4 != 0,
                header_crc,
            })
        }
        MessageType::Spi => {
            let direction = r.code(SpiDirection::from_code, "direction")?;
            let mms = r.u8()?;
            let address = r.u16()?;
            let payload = r.bytes_u16()?;
            MessageBody::Spi(SpiMessage { direction, mms, address, payload })
        }
        MessageType::EthernetStatus => MessageBody::EthernetStatus(EthernetStatusMessage {
            state: r.code(LinkState::from_code, "link state")?,
            speed: r.code(LinkSpeed::from_code, "link speed")?,
            duplex: r.code(Duplex::from_code, "duplex")?,
            mode: r.code(LinkMode::from_code, "link mode")?,
        }),
        MessageType::LiveDataCommand => {
            let (command, handle) = read_livedata_header(&mut r)?;
            let count = r.u32()?;
            let update_period = std::time::Duration::from_millis(r.u32()? as u64);
            let expiration_time = std::time::Duration::from_millis(r.u32()? as u64);
            let args = (0..count).map(|_| decode_argument(&mut r)).collect::<Result<Vec<_>>>()?;
            MessageBody::LiveDataCommand(LiveDataCommandMessage {
                handle,
                command,
                update_period,
                expiration_time,
                args,
            })
        }
        MessageType::LiveDataStatus => {
            let (_, handle) = read_livedata_header(&mut r)?;
            let requested_command = r.code32(LiveDataCommand::from_code, "requested command")?;
            let status = r.code32(LiveDataStatus::from_code, "status")?;
            MessageBody::LiveDataStatus(LiveDataStatusMessage { handle, requested_command, status })
        }
        MessageType::LiveDataValue => {
            let (_, handle) = read_livedata_header(&mut r)?;
            let count = r.u32()?;
            let values = (0..count).map(|_| decode_value(&mut r)).collect::<Result<Vec<_>>>()?;
            MessageBody::LiveDataValue(LiveDataValueMessage { handle, values })
        }
        MessageType::LiveDataSetValue => {
            let (_, handle) = read_livedata_header(&mut r)?;
            let count = r.u32()?;
            let mut args = Vec::new();
            let mut values = Vec::new();
            for _ in 0..count {
                args.push(decode_argument(&mut r)?);
                values.push(decode_value(&mut r)?);
            }
            MessageBody::LiveDataSetValue(LiveDataSetValueMessage { handle, args, values })
        }
        MessageType::DeviceControl => MessageBody::DeviceControl(decode_device_control(&mut r)?),
        MessageType::FlexRayControl => {
            let controller = r.u8()?;
            let request_id = r.u32()?;
            let op = match r.u8()? {
                0 => FlexRayControlOp::ReadRegister { register: r.u16()? },
                1 => FlexRayControlOp::WriteRegister { register: r.u16()?, value: r.u32()? },
                2 => {
                    FlexRayControlOp::WriteMessageBuffer { buffer: r.u16()?, data: r.bytes_u16()? }
                }
                3 => FlexRayControlOp::RegisterValue { register: r.u16()?, value: r.u32()? },
                4 => FlexRayControlOp::Ack { accepted: r.u8()? != 0 },
                other => return Err(r.invalid("opcode", other as u32)),
            };
            MessageBody::FlexRayControl(FlexRayControlMessage { controller, request_id, op })
        }
    };
    r.finish()?;

    trace!(network = %frame.network, ?message_type, len = frame.payload.len(), "Decoded frame");
    Ok(Message {
        network: Network::new(frame.network),
        timestamp_ns: frame.timestamp_ns,
        direction,
        body,
    })
}

fn context_for(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::Can => "CAN frame",
        MessageType::Ethernet => "Ethernet frame",
        MessageType::FlexRay => "FlexRay frame",
        MessageType::Spi => "SPI frame",
        MessageType::EthernetStatus => "Ethernet status",
        MessageType::LiveDataCommand => "LiveData command",
        MessageType::LiveDataStatus => "LiveData status",
        MessageType::LiveDataValue => "LiveData value",
        MessageType::LiveDataSetValue => "LiveData set-value",
        MessageType::DeviceControl => "device control",
        MessageType::FlexRayControl => "FlexRay control",
    }
}

fn encode_can(w: &mut ByteWriter, can: &CanMessage) -> Result<()> {
    if can.data.len() > 64 {
        return Err(DeviceError::decode("CAN frame", format!("{} data bytes", can.data.len())));
    }
    w.u32(can.arbid);
    w.u8(
        (can.extended as u8)
            | (can.fd as u8) << 1
            | (can.baudrate_switch as u8) << 2
            | (can.remote as u8) << 3,
    );
    w.u8(can.data.len() as u8);
    w.raw(&can.data);
    Ok(())
}

fn decode_can(r: &mut ByteReader<'_>) -> Result<CanMessage> {
    let arbid = r.u32()?;
    let flags = r.u8()?;
    let len = r.u8()? as usize;
    if len > 64 {
        return Err(r.invalid("data length", len as u32));
    }
    let data = r.take(len)?.to_vec();
    Ok(CanMessage {
        arbid,
        data,
        extended: flags & 0x1 != 0,
        fd: flags & 0x2 != 0,
        baudrate_switch: flags & 0x4 != 0,
        remote: flags & 0x8 != 0,
    })
}

fn livedata_header(w: &mut ByteWriter, command: LiveDataCommand, handle: u32) {
    w.u32(LIVE_DATA_VERSION);
    w.u32(command.code());
    w.u32(handle);
}

fn read_livedata_header(r: &mut ByteReader<'_>) -> Result<(LiveDataCommand, u32)> {
    let version = r.u32()?;
    if version != LIVE_DATA_VERSION {
        return Err(r.invalid("LiveData version", version));
    }
    let command = r.code32(LiveDataCommand::from_code, "command")?;
    let handle = r.u32()?;
    Ok((command, handle))
}

fn encode_argument(w: &mut ByteWriter, arg: &LiveDataArgument) {
    w.u16(arg.object_type.code());
    w.u32(arg.object_index);
    w.u32(arg.signal_index);
    w.u32(arg.value_type.code());
}

fn decode_argument(r: &mut ByteReader<'_>) -> Result<LiveDataArgument> {
    let object_code = r.u16()?;
    let object_type = LiveDataObjectType::from_code(object_code)
        .ok_or_else(|| r.invalid("object type", object_code as u32))?;
    let object_index = r.u32()?;
    let signal_index = r.u32()?;
    let value_type = r.code32(LiveDataValueType::from_code, "value type")?;
    Ok(LiveDataArgument { object_type, object_index, signal_index, value_type })
}

fn encode_value(w: &mut ByteWriter, value: &LiveDataValue) {
    w.u16(LIVE_DATA_VALUE_LEN);
    w.raw(&[0, 0]);
    w.i64(value.raw);
}

fn decode_value(r: &mut ByteReader<'_>) -> Result<LiveDataValue> {
    let len = r.u16()?;
    if len != LIVE_DATA_VALUE_LEN {
        return Err(r.invalid("value length", len as u32));
    }
    r.take(2)?;
    Ok(LiveDataValue::from_raw(r.i64()?))
}

fn encode_settings(w: &mut ByteWriter, settings: &DeviceSettings) -> Result<()> {
    let outputs = settings.analog_outputs.len();
    let count = u8::try_from(outputs).map_err(|_| {
        let details = format!("{} analog outputs exceed a u8 count", outputs);
        DeviceError::decode("device settings", details)
    })?;
    w.u8(count);
    for output in &settings.analog_outputs {
        w.u8(output.enabled as u8);
        w.u8(output.voltage.code());
    }
    Ok(())
}

fn decode_settings(r: &mut ByteReader<'_>) -> Result<DeviceSettings> {
    let count = r.u8()?;
    let mut analog_outputs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let enabled = r.u8()? != 0;
        let voltage = r.code(AnalogVoltage::from_code, "analog voltage")?;
        analog_outputs.push(AnalogOutput { enabled, voltage });
    }
    Ok(DeviceSettings { analog_outputs })
}

fn encode_device_control(w: &mut ByteWriter, ctrl: &DeviceControlMessage) -> Result<()> {
    w.u32(ctrl.request_id);
    match &ctrl.command {
        DeviceCommand::SetOnline => w.u8(0),
        DeviceCommand::SetOffline => w.u8(1),
        DeviceCommand::ReadDigitalIo { kind, index } => {
            w.u8(2);
            w.u8(kind.code());
            w.u8(*index);
        }
        DeviceCommand::WriteDigitalIo { kind, index, value } => {
            w.u8(3);
            w.u8(kind.code());
            w.u8(*index);
            w.u8(*value as u8);
        }
        DeviceCommand::DigitalIo { kind, index, value } => {
            w.u8(4);
            w.u8(kind.code());
            w.u8(*index);
            w.u8(*value as u8);
        }
        DeviceCommand::ReadSettings => w.u8(5),
        DeviceCommand::WriteSettings { base_revision, settings } => {
            w.u8(6);
            w.u32(*base_revision);
            encode_settings(w, settings)?;
        }
        DeviceCommand::Settings { revision, settings } => {
            w.u8(7);
            w.u32(*revision);
            encode_settings(w, settings)?;
        }
        DeviceCommand::Tc10 { network, request } => {
            w.u8(8);
            w.u16(network.code());
            w.u8(match request {
                Tc10Request::Wake => 0,
                Tc10Request::Sleep => 1,
            });
        }
        DeviceCommand::Ack(status) => {
            w.u8(9);
            match status {
                AckStatus::Ok => w.u8(0),
                AckStatus::Rejected => w.u8(1),
                AckStatus::Unsupported => w.u8(2),
                AckStatus::Conflict { revision } => {
                    w.u8(3);
                    w.u32(*revision);
                }
            }
        }
    }
    Ok(())
}

fn decode_device_control(r: &mut ByteReader<'_>) -> Result<DeviceControlMessage> {
    let request_id = r.u32()?;
    let command = match r.u8()? {
        0 => DeviceCommand::SetOnline,
        1 => DeviceCommand::SetOffline,
        2 => DeviceCommand::ReadDigitalIo {
            kind: r.code(IoKind::from_code, "IO kind")?,
            index: r.u8()?,
        },
        3 => DeviceCommand::WriteDigitalIo {
            kind: r.code(IoKind::from_code, "IO kind")?,
            index: r.u8()?,
            value: r.u8()? != 0,
        },
        4 => DeviceCommand::DigitalIo {
            kind: r.code(IoKind::from_code, "IO kind")?,
            index: r.u8()?,
            value: r.u8()? != 0,
        },
        5 => DeviceCommand::ReadSettings,
        6 => DeviceCommand::WriteSettings {
            base_revision: r.u32()?,
            settings: decode_settings(r)?,
        },
        7 => DeviceCommand::Settings { revision: r.u32()?, settings: decode_settings(r)? },
        8 => {
            let code = r.u16()?;
            let network = NetId::from_code(code).ok_or_else(|| r.invalid("network", code as u32))?;
            let request = match r.u8()? {
                0 => Tc10Request::Wake,
                1 => Tc10Request::Sleep,
                other => return Err(r.invalid("TC10 request", other as u32)),
            };
            DeviceCommand::Tc10 { network, request }
        }
        9 => DeviceCommand::Ack(match r.u8()? {
            0 => AckStatus::Ok,
            1 => AckStatus::Rejected,
            2 => AckStatus::Unsupported,
            3 => AckStatus::Conflict { revision: r.u32()? },
            other => return Err(r.invalid("ack status", other as u32)),
        }),
        other => return Err(r.invalid("command", other as u32)),
    };
    Ok(DeviceControlMessage { request_id, command })
}

fn millis_u32(what: &str, duration: std::time::Duration) -> Result<u32> {
    u32::try_from(duration.as_millis()).map_err(|_| {
        let details = format!("{} {:?} exceeds u32 milliseconds", what, duration);
        DeviceError::decode("LiveData command", details)
    })
}

/// Little-endian payload builder.
#[derive(Debug, Default)]
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    pub(crate) fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Length-prefixed (u16) byte block.
    pub(crate) fn bytes_u16(&mut self, what: &str, bytes: &[u8]) -> Result<()> {
        let len = u16::try_from(bytes.len()).map_err(|_| {
            DeviceError::decode(what, format!("{} bytes exceed a u16 length", bytes.len()))
        })?;
        self.u16(len);
        self.raw(bytes);
        Ok(())
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked little-endian payload reader.
#[derive(Debug)]
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
    pub(crate) context: &'static str,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8], context: &'static str) -> Self {
        Self { data, offset: 0, context }
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.offset.checked_add(len).filter(|end| *end <= self.data.len()).ok_or_else(|| {
            DeviceError::decode(
                self.context,
                format!("need {} bytes at offset {}, have {}", len, self.offset, self.data.len()),
            )
        })?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    pub(crate) fn bytes_u16(&mut self) -> Result<Vec<u8>> {
        let len = self.u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn code<T>(&mut self, lookup: impl Fn(u8) -> Option<T>, what: &str) -> Result<T> {
        let code = self.u8()?;
        lookup(code).ok_or_else(|| self.invalid(what, code as u32))
    }

    fn code32<T>(&mut self, lookup: impl Fn(u32) -> Option<T>, what: &str) -> Result<T> {
        let code = self.u32()?;
        lookup(code).ok_or_else(|| self.invalid(what, code))
    }

    pub(crate) fn invalid(&self, what: &str, value: u32) -> DeviceError {
        let details = format!("invalid {} {} at offset {}", what, value, self.offset);
        DeviceError::decode(self.context, details)
    }

    pub(crate) fn finish(&self) -> Result<()> {
        if self.offset != self.data.len() {
            return Err(DeviceError::decode(
                self.context,
                format!("{} trailing bytes", self.data.len() - self.offset),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::livedata::{MAX_LIVE_DATA_ENTRIES, SignalValue};
    use proptest::prelude::*;
    use std::time::Duration;

    fn round_trip(message: &Message) -> Message {
        let frame = encode(message).expect("encode");
        decode(&frame).expect("decode")
    }

    #[test]
    fn truncated_payload_is_a_decode_error() {
        let frame = encode(&Message::can(NetId::DwCan01, 0x123, vec![1, 2, 3, 4])).unwrap();
        let mut short = frame.clone();
        short.payload.truncate(frame.payload.len() - 1);
        let err = decode(&short).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Decode);
        assert!(err.to_string().contains("CAN frame"));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut frame = encode(&Message::can(NetId::DwCan01, 0x1, vec![])).unwrap();
        frame.payload.push(0);
        assert!(decode(&frame).is_err());
    }

    #[test]
    fn unknown_type_code_is_rejected() {
        let frame = RawFrame { network: NetId::DwCan01, timestamp_ns: 0, payload: vec![0xEE, 0] };
        assert!(decode(&frame).unwrap_err().to_string().contains("unknown type code"));
    }

    #[test]
    fn malformed_livedata_value_length_is_rejected() {
        let values = vec![LiveDataValue::from_raw(5)];
        let msg = Message::livedata(LiveDataValueMessage { handle: 1, values });
        let mut frame = encode(&msg).unwrap();
        // Header (2) + livedata header (12) + count (4) puts the value length at 18.
        frame.payload[18] = 4;
        assert!(decode(&frame).is_err());
    }

    #[test]
    fn livedata_status_layout() {
        let msg = Message::livedata(LiveDataStatusMessage {
            handle: 0x01020304,
            requested_command: LiveDataCommand::Subscribe,
            status: LiveDataStatus::ErrFull,
        });
        let frame = encode(&msg).unwrap();
        assert_eq!(frame.network, NetId::ExtendedCommand);
        assert_eq!(&frame.payload[2..6], &LIVE_DATA_VERSION.to_le_bytes());
        assert_eq!(&frame.payload[6..10], &LiveDataCommand::Status.code().to_le_bytes());
        assert_eq!(&frame.payload[10..14], &[4, 3, 2, 1]);
        assert!(round_trip(&msg).same_content(&msg));
    }

    #[test]
    fn set_value_round_trip() {
        let mut set = LiveDataSetValueMessage::new(77);
        set.push(LiveDataValueType::GpsLatitude, SignalValue::Double(-33.25)).unwrap();
        set.push(LiveDataValueType::DaqEnable, SignalValue::Boolean(true)).unwrap();
        let msg = Message::livedata(set);
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn control_round_trip() {
        let msg = Message::new(
            NetId::DeviceControl,
            DeviceControlMessage::new(
                12,
                DeviceCommand::WriteSettings {
                    base_revision: 3,
                    settings: DeviceSettings {
                        analog_outputs: vec![AnalogOutput {
                            enabled: true,
                            voltage: AnalogVoltage::V5,
                        }],
                    },
                },
            ),
        );
        assert_eq!(round_trip(&msg), msg);

        let ack = Message::new(
            NetId::DeviceControl,
            DeviceControlMessage::new(12, DeviceCommand::Ack(AckStatus::Conflict { revision: 4 })),
        )
        .with_direction(Direction::Rx);
        assert_eq!(round_trip(&ack), ack);
    }

    #[test]
    fn oversized_settings_are_refused() {
        let settings = DeviceSettings { analog_outputs: vec![AnalogOutput::default(); 256] };
        let write = DeviceCommand::WriteSettings { base_revision: 1, settings };
        let msg = Message::new(NetId::DeviceControl, DeviceControlMessage::new(1, write));
        let err = encode(&msg).unwrap_err();
        assert!(err.to_string().contains("256 analog outputs"), "{err}");

        let settings = DeviceSettings { analog_outputs: vec![AnalogOutput::default(); 255] };
        let msg = Message::new(
            NetId::DeviceControl,
            DeviceControlMessage::new(2, DeviceCommand::Settings { revision: 1, settings }),
        );
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn command_periods_must_fit_u32_millis() {
        let msg = Message::livedata(LiveDataCommandMessage::subscribe(
            1,
            &[LiveDataValueType::GpsSpeed],
            Duration::from_secs(u64::MAX / 1000),
            Duration::ZERO,
        ));
        assert!(encode(&msg).is_err());
    }

    fn ethernet_status() -> impl Strategy<Value = EthernetStatusMessage> {
        (
            prop::sample::select(vec![LinkState::Down, LinkState::Up]),
            prop::sample::select(vec![
                LinkSpeed::Auto,
                LinkSpeed::Speed10M,
                LinkSpeed::Speed100M,
                LinkSpeed::Speed1G,
                LinkSpeed::Speed2_5G,
                LinkSpeed::Speed5G,
                LinkSpeed::Speed10G,
            ]),
            prop::sample::select(vec![Duplex::Half, Duplex::Full]),
            prop::sample::select(vec![
                LinkMode::Auto,
                LinkMode::Master,
                LinkMode::Slave,
                LinkMode::Invalid,
                LinkMode::None,
            ]),
        )
            .prop_map(|(state, speed, duplex, mode)| EthernetStatusMessage {
                state,
                speed,
                duplex,
                mode,
            })
    }

    fn livedata_argument() -> impl Strategy<Value = LiveDataArgument> {
        (any::<u32>(), any::<u32>(), prop::sample::select(LiveDataValueType::ALL)).prop_map(
            |(object_index, signal_index, value_type)| LiveDataArgument {
                object_type: LiveDataObjectType::Misc,
                object_index,
                signal_index,
                value_type,
            },
        )
    }

    fn livedata_command() -> impl Strategy<Value = LiveDataCommandMessage> {
        (
            any::<u32>(),
            prop::sample::select(vec![
                LiveDataCommand::Subscribe,
                LiveDataCommand::Unsubscribe,
                LiveDataCommand::ClearAll,
            ]),
            any::<u32>(),
            any::<u32>(),
            prop::collection::vec(livedata_argument(), 0..=MAX_LIVE_DATA_ENTRIES),
        )
            .prop_map(|(handle, command, period_ms, expiration_ms, args)| LiveDataCommandMessage {
                handle,
                command,
                update_period: Duration::from_millis(period_ms as u64),
                expiration_time: Duration::from_millis(expiration_ms as u64),
                args,
            })
    }

    proptest! {
        #[test]
        fn ethernet_status_round_trips(status in ethernet_status(), ts in any::<u64>()) {
            let msg = Message::new(NetId::Ethernet02, status)
                .with_direction(Direction::Rx)
                .with_timestamp(ts);
            prop_assert_eq!(round_trip(&msg), msg);
        }

        #[test]
        fn livedata_commands_round_trip(command in livedata_command()) {
            let msg = Message::livedata(command);
            prop_assert_eq!(round_trip(&msg), msg);
        }

        #[test]
        fn livedata_values_round_trip(
            handle in any::<u32>(),
            raw in prop::collection::vec(any::<i64>(), 0..=MAX_LIVE_DATA_ENTRIES),
        ) {
            let values = raw.into_iter().map(LiveDataValue::from_raw).collect();
            let msg = Message::livedata(LiveDataValueMessage { handle, values })
                .with_direction(Direction::Rx);
            prop_assert_eq!(round_trip(&msg), msg);
        }

        #[test]
        fn can_frames_round_trip(
            arbid in 0u32..=0x1FFF_FFFF,
            data in proptest::collection::vec(any::<u8>(), 0..=64),
            ts in any::<u64>(),
        ) {
            let msg = Message::can(NetId::DwCan03, arbid, data).with_timestamp(ts);
            prop_assert_eq!(round_trip(&msg), msg);
        }

        #[test]
        fn flexray_frames_round_trip(
            slot in 1u16..=2047,
            cycle in 0u8..64,
            rep_shift in 0u32..7,
            data in proptest::collection::vec(any::<u8>(), 0..=254),
        ) {
            let mut frame = FlexRayMessage::new(slot, FlexRayChannel::AB, data)
                .with_cycle(cycle, 1 << rep_shift);
            frame.sync = slot % 2 == 0;
            frame.header_crc = slot;
            let msg = Message::new(NetId::FlexRay01, frame).with_direction(Direction::Rx);
            prop_assert_eq!(round_trip(&msg), msg);
        }

        #[test]
        fn decode_never_panics(payload in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode(&RawFrame { network: NetId::DwCan01, timestamp_ns: 0, payload });
        }
    }
}
