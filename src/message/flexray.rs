//! FlexRay frames

use serde::{Deserialize, Serialize};

use crate::{DeviceError, Result};

/// Highest static or dynamic slot id.
pub const MAX_SLOT_ID: u16 = 2047;
/// Highest cycle counter value.
pub const MAX_CYCLE: u8 = 63;
/// Largest FlexRay payload (127 words).
pub const MAX_PAYLOAD_BYTES: usize = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FlexRayChannel {
    #[default]
    A,
    B,
    AB,
}

impl FlexRayChannel {
    pub fn from_flags(channel_a: bool, channel_b: bool) -> Option<Self> {
        match (channel_a, channel_b) {
            (true, true) => Some(FlexRayChannel::AB),
            (true, false) => Some(FlexRayChannel::A),
            (false, true) => Some(FlexRayChannel::B),
            (false, false) => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            FlexRayChannel::A => 0,
            FlexRayChannel::B => 1,
            FlexRayChannel::AB => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FlexRayChannel::A),
            1 => Some(FlexRayChannel::B),
            2 => Some(FlexRayChannel::AB),
            _ => None,
        }
    }
}

/// A FlexRay frame.
///
/// For transmission `cycle` is the base cycle and `cycle_repetition` the repetition
/// factor; together they select the message buffer to fill. On receive `cycle` is the
/// cycle counter the frame was seen in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexRayMessage {
    pub slot_id: u16,
    pub cycle: u8,
    pub cycle_repetition: u8,
    pub channel: FlexRayChannel,
    pub data: Vec<u8>,
    pub startup: bool,
    pub sync: bool,
    pub null_frame: bool,
    pub header_crc: u16,
}

impl Default for FlexRayMessage {
    fn default() -> Self {
        Self {
            slot_id: 1,
            cycle: 0,
            cycle_repetition: 1,
            channel: FlexRayChannel::A,
            data: Vec::new(),
            startup: false,
            sync: false,
            null_frame: false,
            header_crc: 0,
        }
    }
}

impl FlexRayMessage {
    pub fn new(slot_id: u16, channel: FlexRayChannel, data: impl Into<Vec<u8>>) -> Self {
        Self { slot_id, channel, data: data.into(), ..Default::default() }
    }

    pub fn with_cycle(mut self, base: u8, repetition: u8) -> Self {
        self.cycle = base;
        self.cycle_repetition = repetition;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.slot_id == 0 || self.slot_id > MAX_SLOT_ID {
            return Err(DeviceError::transmit_failed(format!(
                "slot id {} outside 1..={}",
                self.slot_id, MAX_SLOT_ID
            )));
        }
        if self.cycle > MAX_CYCLE {
            let reason = format!("cycle {} outside 0..=63", self.cycle);
            return Err(DeviceError::transmit_failed(reason));
        }
        if !is_valid_repetition(self.cycle_repetition) {
            return Err(DeviceError::transmit_failed(format!(
                "cycle repetition {} is not a power of two up to 64",
                self.cycle_repetition
            )));
        }
        if self.data.len() > MAX_PAYLOAD_BYTES {
            return Err(DeviceError::transmit_failed(format!(
                "FlexRay payload of {} bytes exceeds {}",
                self.data.len(),
                MAX_PAYLOAD_BYTES
            )));
        }
        Ok(())
    }
}

pub(crate) fn is_valid_repetition(repetition: u8) -> bool {
    repetition.is_power_of_two() && repetition <= 64
}
