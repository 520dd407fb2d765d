//! Network identity
//!
//! A [`Network`] names one logical bus instance on an interface unit. It is a small
//! `Copy` value that can be compared and hashed, so the router can index
//! subscriptions by it directly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Enumerated logical bus-channel identity.
///
/// The numeric codes are the ones carried in [`RawFrame`](crate::codec::RawFrame) headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum NetId {
    /// Device-level status traffic
    Device = 0,
    DwCan01 = 1,
    DwCan02 = 2,
    DwCan03 = 3,
    DwCan04 = 4,
    DwCan05 = 5,
    DwCan06 = 6,
    DwCan07 = 7,
    DwCan08 = 8,
    Lin01 = 16,
    Lin02 = 17,
    Ethernet01 = 32,
    Ethernet02 = 33,
    AutomotiveEthernet01 = 34,
    FlexRay01 = 48,
    FlexRay02 = 49,
    Spi01 = 64,
    Spi02 = 65,
    /// LiveData command/response channel
    ExtendedCommand = 0x100,
    /// Session control requests and acknowledgements
    DeviceControl = 0x101,
    /// E-Ray register access
    FlexRayControl = 0x102,
}

/// Bus family of a [`NetId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkType {
    Can,
    Lin,
    FlexRay,
    Ethernet,
    Spi,
    Internal,
}

impl NetId {
    /// Every known network id, in code order.
    pub const ALL: &'static [NetId] = &[
        NetId::Device,
        NetId::DwCan01,
        NetId::DwCan02,
        NetId::DwCan03,
        NetId::DwCan04,
        NetId::DwCan05,
        NetId::DwCan06,
        NetId::DwCan07,
        NetId::DwCan08,
        NetId::Lin01,
        NetId::Lin02,
        NetId::Ethernet01,
        NetId::Ethernet02,
        NetId::AutomotiveEthernet01,
        NetId::FlexRay01,
        NetId::FlexRay02,
        NetId::Spi01,
        NetId::Spi02,
        NetId::ExtendedCommand,
        NetId::DeviceControl,
        NetId::FlexRayControl,
    ];

    /// Numeric wire code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Look up a network id by wire code.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|id| id.code() == code)
    }

    pub fn network_type(self) -> NetworkType {
        match self {
            NetId::DwCan01
            | NetId::DwCan02
            | NetId::DwCan03
            | NetId::DwCan04
            | NetId::DwCan05
            | NetId::DwCan06
            | NetId::DwCan07
            | NetId::DwCan08 => NetworkType::Can,
            NetId::Lin01 | NetId::Lin02 => NetworkType::Lin,
            NetId::Ethernet01 | NetId::Ethernet02 | NetId::AutomotiveEthernet01 => {
                NetworkType::Ethernet
            }
            NetId::FlexRay01 | NetId::FlexRay02 => NetworkType::FlexRay,
            NetId::Spi01 | NetId::Spi02 => NetworkType::Spi,
            NetId::Device
            | NetId::ExtendedCommand
            | NetId::DeviceControl
            | NetId::FlexRayControl => NetworkType::Internal,
        }
    }

    /// FlexRay network serviced by controller `index`.
    pub fn flexray(index: usize) -> Option<Self> {
        match index {
            0 => Some(NetId::FlexRay01),
            1 => Some(NetId::FlexRay02),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NetId::Device => "DEVICE",
            NetId::DwCan01 => "DWCAN_01",
            NetId::DwCan02 => "DWCAN_02",
            NetId::DwCan03 => "DWCAN_03",
            NetId::DwCan04 => "DWCAN_04",
            NetId::DwCan05 => "DWCAN_05",
            NetId::DwCan06 => "DWCAN_06",
            NetId::DwCan07 => "DWCAN_07",
            NetId::DwCan08 => "DWCAN_08",
            NetId::Lin01 => "LIN_01",
            NetId::Lin02 => "LIN_02",
            NetId::Ethernet01 => "ETHERNET_01",
            NetId::Ethernet02 => "ETHERNET_02",
            NetId::AutomotiveEthernet01 => "AE_01",
            NetId::FlexRay01 => "FLEXRAY_01",
            NetId::FlexRay02 => "FLEXRAY_02",
            NetId::Spi01 => "SPI_01",
            NetId::Spi02 => "SPI_02",
            NetId::ExtendedCommand => "EXTENDED_COMMAND",
            NetId::DeviceControl => "DEVICE_CONTROL",
            NetId::FlexRayControl => "FLEXRAY_CONTROL",
        }
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A logical bus instance on an interface unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Network {
    kind: NetId,
}

impl Network {
    pub const fn new(kind: NetId) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> NetId {
        self.kind
    }

    pub fn network_type(&self) -> NetworkType {
        self.kind.network_type()
    }

    /// Networks used for host/firmware plumbing rather than bus traffic.
    pub fn is_internal(&self) -> bool {
        self.network_type() == NetworkType::Internal
    }
}

impl From<NetId> for Network {
    fn from(kind: NetId) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_round_trip_for_every_id() {
        for id in NetId::ALL {
            assert_eq!(NetId::from_code(id.code()), Some(*id));
        }
        assert_eq!(NetId::from_code(0xFFFF), None);
    }

    #[test]
    fn codes_are_unique() {
        let codes: HashSet<u16> = NetId::ALL.iter().map(|id| id.code()).collect();
        assert_eq!(codes.len(), NetId::ALL.len());
    }

    #[test]
    fn network_types() {
        assert_eq!(Network::new(NetId::DwCan01).network_type(), NetworkType::Can);
        assert_eq!(NetId::FlexRay02.network_type(), NetworkType::FlexRay);
        assert_eq!(NetId::AutomotiveEthernet01.network_type(), NetworkType::Ethernet);
        assert!(Network::new(NetId::FlexRayControl).is_internal());
        assert!(!Network::new(NetId::Spi01).is_internal());
    }

    #[test]
    fn networks_compare_by_value() {
        let a = Network::from(NetId::DwCan01);
        let b = Network::new(NetId::DwCan01);
        assert_eq!(a, b);
        assert_ne!(a, Network::new(NetId::DwCan02));
        assert_eq!(a.to_string(), "DWCAN_01");
    }

    #[test]
    fn flexray_networks_by_controller_index() {
        assert_eq!(NetId::flexray(0), Some(NetId::FlexRay01));
        assert_eq!(NetId::flexray(1), Some(NetId::FlexRay02));
        assert_eq!(NetId::flexray(2), None);
    }
}
