//! Ethernet frames and link status

use serde::{Deserialize, Serialize};

use crate::{DeviceError, Result};

/// Destination MAC, source MAC and EtherType.
pub const ETHERNET_HEADER_LEN: usize = 14;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EthernetMessage {
    pub data: Vec<u8>,
    pub fcs: Option<u32>,
}

impl EthernetMessage {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into(), fcs: None }
    }

    pub fn destination_mac(&self) -> Option<[u8; 6]> {
        self.data.get(0..6)?.try_into().ok()
    }

    pub fn source_mac(&self) -> Option<[u8; 6]> {
        self.data.get(6..12)?.try_into().ok()
    }

    pub fn ether_type(&self) -> Option<u16> {
        let bytes = self.data.get(12..14)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn validate(&self) -> Result<()> {
        if self.data.len() < ETHERNET_HEADER_LEN {
            return Err(DeviceError::transmit_failed(format!(
                "Ethernet frame needs at least {} bytes, got {}",
                ETHERNET_HEADER_LEN,
                self.data.len()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinkState {
    #[default]
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinkSpeed {
    #[default]
    Auto,
    Speed10M,
    Speed100M,
    Speed1G,
    Speed2_5G,
    Speed5G,
    Speed10G,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Duplex {
    Half,
    #[default]
    Full,
}

/// Automotive Ethernet PHY role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinkMode {
    #[default]
    Auto,
    Master,
    Slave,
    Invalid,
    None,
}

macro_rules! wire_enum {
    ($ty:ident { $($variant:ident = $code:literal),* $(,)? }) => {
        impl $ty {
            pub fn code(self) -> u8 {
                match self {
                    $($ty::$variant => $code,)*
                }
            }

            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some($ty::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

wire_enum!(LinkState { Down = 0, Up = 1 });
wire_enum!(LinkSpeed {
    Auto = 0,
    Speed10M = 1,
    Speed100M = 2,
    Speed1G = 3,
    Speed2_5G = 4,
    Speed5G = 5,
    Speed10G = 6,
});
wire_enum!(Duplex { Half = 0, Full = 1 });
wire_enum!(LinkMode { Auto = 0, Master = 1, Slave = 2, Invalid = 3, None = 4 });

/// Link change notification for an Ethernet network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EthernetStatusMessage {
    pub state: LinkState,
    pub speed: LinkSpeed,
    pub duplex: Duplex,
    pub mode: LinkMode,
}
