//! Digital IO and TC10 requests

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Device, unexpected_command};
use crate::message::{AckStatus, DeviceCommand, Tc10Request};
use crate::network::NetId;
use crate::{DeviceError, Result};

/// Digital IO families exposed by a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IoKind {
    EthernetActivation,
    UsbHostPower,
    BackupPowerEnabled,
    BackupPowerGood,
    Misc,
    EMisc,
}

impl IoKind {
    pub const ALL: [IoKind; 6] = [
        IoKind::EthernetActivation,
        IoKind::UsbHostPower,
        IoKind::BackupPowerEnabled,
        IoKind::BackupPowerGood,
        IoKind::Misc,
        IoKind::EMisc,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Read-only inputs.
    pub fn is_input(self) -> bool {
        self == IoKind::BackupPowerGood
    }
}

fn refused(operation: &str, status: AckStatus) -> DeviceError {
    match status {
        AckStatus::Unsupported => DeviceError::unsupported(operation),
        other => {
            DeviceError::configuration(format!("{} refused by the unit: {:?}", operation, other))
        }
    }
}

impl Device {
    /// Read one digital IO line. `index` is 1-based.
    pub async fn get_digital_io(&self, kind: IoKind, index: u8) -> Result<bool> {
        let result = async {
            let command = DeviceCommand::ReadDigitalIo { kind, index };
            match self.shared.device_request("get_digital_io", command).await? {
                DeviceCommand::DigitalIo { kind: k, index: i, value }
                    if (k, i) == (kind, index) =>
                {
                    Ok(value)
                }
                DeviceCommand::Ack(status) => Err(refused("get_digital_io", status)),
                other => Err(unexpected_command("get_digital_io", &other)),
            }
        }
        .await;
        self.shared.track(result)
    }

    /// Drive one digital IO line. `index` is 1-based.
    pub async fn set_digital_io(&self, kind: IoKind, index: u8, value: bool) -> Result<()> {
        let result = async {
            if kind.is_input() {
                let reason = format!("{:?} is an input", kind);
                return Err(DeviceError::contract("set_digital_io", reason));
            }
            let command = DeviceCommand::WriteDigitalIo { kind, index, value };
            match self.shared.device_request("set_digital_io", command).await? {
                DeviceCommand::Ack(AckStatus::Ok) => {
                    debug!(serial = %self.serial(), ?kind, index, value, "Digital IO set");
                    Ok(())
                }
                DeviceCommand::Ack(status) => Err(refused("set_digital_io", status)),
                other => Err(unexpected_command("set_digital_io", &other)),
            }
        }
        .await;
        self.shared.track(result)
    }

    pub fn supports_tc10(&self) -> bool {
        self.descriptor().supports_tc10
    }

    pub async fn request_tc10_wake(&self, network: NetId) -> Result<()> {
        self.tc10(network, Tc10Request::Wake).await
    }

    pub async fn request_tc10_sleep(&self, network: NetId) -> Result<()> {
        self.tc10(network, Tc10Request::Sleep).await
    }

    async fn tc10(&self, network: NetId, request: Tc10Request) -> Result<()> {
        let result = async {
            if !self.supports_tc10() {
                return Err(DeviceError::unsupported("TC10"));
            }
            if network.network_type() != crate::network::NetworkType::Ethernet {
                return Err(DeviceError::configuration(format!(
                    "TC10 needs an Ethernet network, got {}",
                    network
                )));
            }
            let command = DeviceCommand::Tc10 { network, request };
            match self.shared.device_request("TC10", command).await? {
                DeviceCommand::Ack(AckStatus::Ok) => Ok(()),
                DeviceCommand::Ack(status) => Err(refused("TC10", status)),
                other => Err(unexpected_command("TC10", &other)),
            }
        }
        .await;
        self.shared.track(result)
    }
}
