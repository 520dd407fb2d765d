//! Classic and FD CAN frames

use crate::{DeviceError, Result};

/// Largest 11-bit identifier.
pub const MAX_STANDARD_ID: u32 = 0x7FF;
/// Largest 29-bit identifier.
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

const FD_LENGTHS: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanMessage {
    pub arbid: u32,
    pub data: Vec<u8>,
    pub extended: bool,
    pub fd: bool,
    /// FD bit-rate switch
    pub baudrate_switch: bool,
    pub remote: bool,
}

impl CanMessage {
    /// Classic frame. Identifiers above 0x7FF select the extended format.
    pub fn new(arbid: u32, data: impl Into<Vec<u8>>) -> Self {
        Self { arbid, data: data.into(), extended: arbid > MAX_STANDARD_ID, ..Default::default() }
    }

    /// FD frame with bit-rate switching.
    pub fn new_fd(arbid: u32, data: impl Into<Vec<u8>>) -> Self {
        Self { fd: true, baudrate_switch: true, ..Self::new(arbid, data) }
    }

    /// Data length code for the payload.
    pub fn dlc(&self) -> u8 {
        let len = self.data.len();
        FD_LENGTHS.iter().position(|&l| l >= len).unwrap_or(FD_LENGTHS.len() - 1) as u8
    }

    pub fn validate(&self) -> Result<()> {
        let max_id = if self.extended { MAX_EXTENDED_ID } else { MAX_STANDARD_ID };
        if self.arbid > max_id {
            return Err(DeviceError::transmit_failed(format!(
                "arbitration id {:#x} exceeds {:#x}",
                self.arbid, max_id
            )));
        }

        if self.fd {
            if self.remote {
                return Err(DeviceError::transmit_failed("CAN FD has no remote frames"));
            }
            if !FD_LENGTHS.contains(&self.data.len()) {
                return Err(DeviceError::transmit_failed(format!(
                    "{} bytes is not a valid CAN FD length",
                    self.data.len()
                )));
            }
        } else if self.data.len() > 8 {
            return Err(DeviceError::transmit_failed(format!(
                "classic CAN carries at most 8 bytes, got {}",
                self.data.len()
            )));
        }

        Ok(())
    }
}
