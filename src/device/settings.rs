//! Device settings
//!
//! Settings are read as a [`SettingsSnapshot`] stamped with the unit's revision.
//! Edits happen on the snapshot and [`Device::apply_settings`] writes them back only
//! if the unit is still at that revision; a concurrent change surfaces as
//! [`DeviceError::SettingsConflict`] instead of being silently overwritten.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Device, lock, unexpected_command};
use crate::message::{AckStatus, DeviceCommand};
use crate::{DeviceError, Result};

/// Output level of a misc IO analog pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AnalogVoltage {
    #[default]
    V0,
    V1,
    V2,
    V3,
    V4,
    V5,
}

impl AnalogVoltage {
    pub const ALL: [AnalogVoltage; 6] = [
        AnalogVoltage::V0,
        AnalogVoltage::V1,
        AnalogVoltage::V2,
        AnalogVoltage::V3,
        AnalogVoltage::V4,
        AnalogVoltage::V5,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn volts(self) -> u8 {
        self.code()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AnalogOutput {
    pub enabled: bool,
    pub voltage: AnalogVoltage,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub analog_outputs: Vec<AnalogOutput>,
}

/// Settings as read from the unit, plus the revision they were read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsSnapshot {
    pub base_revision: u32,
    pub settings: DeviceSettings,
}

impl SettingsSnapshot {
    fn output_mut(&mut self, pin: usize) -> Result<&mut AnalogOutput> {
        let count = self.settings.analog_outputs.len();
        pin.checked_sub(1)
            .and_then(|index| self.settings.analog_outputs.get_mut(index))
            .ok_or_else(|| {
                DeviceError::configuration(format!(
                    "analog output {} out of range 1..={}",
                    pin, count
                ))
            })
    }

    /// Enable or disable analog output `pin` (1-based).
    pub fn set_misc_io_analog_output_enabled(&mut self, pin: usize, enabled: bool) -> Result<()> {
        self.output_mut(pin)?.enabled = enabled;
        Ok(())
    }

    /// Set the level of analog output `pin` (1-based).
    pub fn set_misc_io_analog_output(&mut self, pin: usize, voltage: AnalogVoltage) -> Result<()> {
        self.output_mut(pin)?.voltage = voltage;
        Ok(())
    }
}

impl Device {
    /// Read the current settings from the unit.
    pub async fn refresh_settings(&self) -> Result<SettingsSnapshot> {
        let result = async {
            let command = DeviceCommand::ReadSettings;
            match self.shared.device_request("refresh_settings", command).await? {
                DeviceCommand::Settings { revision, settings } => {
                    let snapshot = SettingsSnapshot { base_revision: revision, settings };
                    *lock(&self.shared.settings) = Some(snapshot.clone());
                    Ok(snapshot)
                }
                other => Err(unexpected_command("refresh_settings", &other)),
            }
        }
        .await;
        self.shared.track(result)
    }

    /// The snapshot from the last refresh or apply, if any.
    pub fn settings(&self) -> Option<SettingsSnapshot> {
        lock(&self.shared.settings).clone()
    }

    /// Write `snapshot` back if the unit is still at its base revision.
    ///
    /// Returns the new snapshot on success. On [`DeviceError::SettingsConflict`]
    /// nothing was written; refresh and reapply the edit.
    pub async fn apply_settings(&self, snapshot: &SettingsSnapshot) -> Result<SettingsSnapshot> {
        let result = async {
            let command = DeviceCommand::WriteSettings {
                base_revision: snapshot.base_revision,
                settings: snapshot.settings.clone(),
            };
            match self.shared.device_request("apply_settings", command).await? {
                DeviceCommand::Settings { revision, settings } => {
                    info!(serial = %self.serial(), revision, "Settings applied");
                    let applied = SettingsSnapshot { base_revision: revision, settings };
                    *lock(&self.shared.settings) = Some(applied.clone());
                    Ok(applied)
                }
                DeviceCommand::Ack(AckStatus::Conflict { revision }) => {
                    let expected = snapshot.base_revision;
                    let serial = self.serial();
                    debug!(serial = %serial, expected, actual = revision, "Settings conflict");
                    Err(DeviceError::SettingsConflict { expected, actual: revision })
                }
                DeviceCommand::Ack(status) => Err(DeviceError::configuration(format!(
                    "settings rejected by the unit: {:?}",
                    status
                ))),
                other => Err(unexpected_command("apply_settings", &other)),
            }
        }
        .await;
        self.shared.track(result)
    }

    /// Refresh, enable or disable one analog output, and apply.
    pub async fn set_misc_io_analog_output_enabled(&self, pin: usize, enabled: bool) -> Result<()> {
        let mut snapshot = self.refresh_settings().await?;
        self.shared.track(snapshot.set_misc_io_analog_output_enabled(pin, enabled))?;
        self.apply_settings(&snapshot).await.map(|_| ())
    }

    /// Refresh, set one analog output level, and apply.
    pub async fn set_misc_io_analog_output(
        &self,
        pin: usize,
        voltage: AnalogVoltage,
    ) -> Result<()> {
        let mut snapshot = self.refresh_settings().await?;
        self.shared.track(snapshot.set_misc_io_analog_output(pin, voltage))?;
        self.apply_settings(&snapshot).await.map(|_| ())
    }
}
