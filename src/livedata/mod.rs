//! LiveData subscription protocol
//!
//! LiveData lets a session ask the unit to push selected internal signals (GPS fix,
//! DAQ state, manual trigger, ...) at a fixed cadence. Every request carries a
//! [`LiveDataHandle`]; the unit echoes that handle in the STATUS message confirming
//! or rejecting the request and in every VALUE message it emits afterwards.
//!
//! - [`HandleGenerator`] allocates handles (owned by the [`Registry`](crate::Registry))
//! - [`LiveDataValue`] is the 32.32 fixed-point wire value, [`SignalValue`] its typed view
//! - [`LiveDataTracker`] is the per-session gate that drops messages for unknown handles

mod handle;
mod tracker;
mod value;

pub use handle::HandleGenerator;
pub use tracker::{LiveDataTracker, MAX_PENDING_REQUESTS};
pub use value::{LiveDataValue, SignalValue, fixed_point_to_f64, f64_to_fixed_point};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlates a LiveData request with its STATUS and VALUE messages.
pub type LiveDataHandle = u32;

/// Maximum number of arguments in one SUBSCRIBE or SET_VALUE request.
pub const MAX_LIVE_DATA_ENTRIES: usize = 20;

/// Protocol version carried in every LiveData header.
pub const LIVE_DATA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiveDataCommand {
    Status,
    Subscribe,
    Unsubscribe,
    Response,
    ClearAll,
    SetValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiveDataStatus {
    Success,
    ErrUnknownCommand,
    ErrHandle,
    ErrDuplicate,
    /// Argument limit reached
    ErrFull,
}

/// Signals a unit can publish or accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiveDataValueType {
    GpsLatitude,
    GpsLongitude,
    GpsAltitude,
    GpsSpeed,
    GpsValid,
    GpsEnable,
    ManualTrigger,
    TimeSinceMsg,
    GpsAccuracy,
    GpsBearing,
    GpsTime,
    GpsTimeValid,
    DaqEnable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LiveDataObjectType {
    #[default]
    Misc,
}

/// Shape of the values a signal carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Double,
    Integer,
    Boolean,
}

impl LiveDataCommand {
    pub fn code(self) -> u32 {
        match self {
            LiveDataCommand::Status => 0,
            LiveDataCommand::Subscribe => 1,
            LiveDataCommand::Unsubscribe => 2,
            LiveDataCommand::Response => 3,
            LiveDataCommand::ClearAll => 4,
            LiveDataCommand::SetValue => 5,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(LiveDataCommand::Status),
            1 => Some(LiveDataCommand::Subscribe),
            2 => Some(LiveDataCommand::Unsubscribe),
            3 => Some(LiveDataCommand::Response),
            4 => Some(LiveDataCommand::ClearAll),
            5 => Some(LiveDataCommand::SetValue),
            _ => None,
        }
    }
}

impl fmt::Display for LiveDataCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LiveDataCommand::Status => "Status",
            LiveDataCommand::Subscribe => "Subscribe",
            LiveDataCommand::Unsubscribe => "Unsubscribe",
            LiveDataCommand::Response => "Response",
            LiveDataCommand::ClearAll => "Clear All",
            LiveDataCommand::SetValue => "Set Value",
        })
    }
}

impl LiveDataStatus {
    pub fn code(self) -> u32 {
        match self {
            LiveDataStatus::Success => 0,
            LiveDataStatus::ErrUnknownCommand => 1,
            LiveDataStatus::ErrHandle => 2,
            LiveDataStatus::ErrDuplicate => 3,
            LiveDataStatus::ErrFull => 4,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(LiveDataStatus::Success),
            1 => Some(LiveDataStatus::ErrUnknownCommand),
            2 => Some(LiveDataStatus::ErrHandle),
            3 => Some(LiveDataStatus::ErrDuplicate),
            4 => Some(LiveDataStatus::ErrFull),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        self == LiveDataStatus::Success
    }
}

impl fmt::Display for LiveDataStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LiveDataStatus::Success => "Success",
            LiveDataStatus::ErrUnknownCommand => "Error: Unknown Command",
            LiveDataStatus::ErrHandle => "Error: Handle",
            LiveDataStatus::ErrDuplicate => "Error: Duplicate",
            LiveDataStatus::ErrFull => "Error: Argument limit reached",
        })
    }
}

impl LiveDataValueType {
    pub const ALL: &'static [LiveDataValueType] = &[
        LiveDataValueType::GpsLatitude,
        LiveDataValueType::GpsLongitude,
        LiveDataValueType::GpsAltitude,
        LiveDataValueType::GpsSpeed,
        LiveDataValueType::GpsValid,
        LiveDataValueType::GpsEnable,
        LiveDataValueType::ManualTrigger,
        LiveDataValueType::TimeSinceMsg,
        LiveDataValueType::GpsAccuracy,
        LiveDataValueType::GpsBearing,
        LiveDataValueType::GpsTime,
        LiveDataValueType::GpsTimeValid,
        LiveDataValueType::DaqEnable,
    ];

    pub fn code(self) -> u32 {
        match self {
            LiveDataValueType::GpsLatitude => 2,
            LiveDataValueType::GpsLongitude => 3,
            LiveDataValueType::GpsAltitude => 4,
            LiveDataValueType::GpsSpeed => 5,
            LiveDataValueType::GpsValid => 6,
            LiveDataValueType::GpsEnable => 62,
            LiveDataValueType::ManualTrigger => 108,
            LiveDataValueType::TimeSinceMsg => 111,
            LiveDataValueType::GpsAccuracy => 120,
            LiveDataValueType::GpsBearing => 121,
            LiveDataValueType::GpsTime => 122,
            LiveDataValueType::GpsTimeValid => 123,
            LiveDataValueType::DaqEnable => 124,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }

    pub fn kind(self) -> SignalKind {
        match self {
            LiveDataValueType::GpsValid
            | LiveDataValueType::GpsEnable
            | LiveDataValueType::GpsTimeValid
            | LiveDataValueType::DaqEnable
            | LiveDataValueType::ManualTrigger => SignalKind::Boolean,
            LiveDataValueType::GpsTime => SignalKind::Integer,
            _ => SignalKind::Double,
        }
    }
}

impl fmt::Display for LiveDataValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LiveDataValueType::GpsLatitude => "GPS Latitude",
            LiveDataValueType::GpsLongitude => "GPS Longitude",
            LiveDataValueType::GpsAltitude => "GPS Altitude",
            LiveDataValueType::GpsSpeed => "GPS Speed",
            LiveDataValueType::GpsValid => "GPS Valid",
            LiveDataValueType::GpsEnable => "GPS Enabled",
            LiveDataValueType::ManualTrigger => "Manual Trigger",
            LiveDataValueType::TimeSinceMsg => "Time Since Msg",
            LiveDataValueType::GpsAccuracy => "GPS Accuracy",
            LiveDataValueType::GpsBearing => "GPS Bearing",
            LiveDataValueType::GpsTime => "GPS Time",
            LiveDataValueType::GpsTimeValid => "GPS Time Valid",
            LiveDataValueType::DaqEnable => "DAQ Enable",
        })
    }
}

impl LiveDataObjectType {
    pub fn code(self) -> u16 {
        match self {
            LiveDataObjectType::Misc => 8,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            8 => Some(LiveDataObjectType::Misc),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_codes_match_firmware_table() {
        assert_eq!(LiveDataValueType::GpsLatitude.code(), 2);
        assert_eq!(LiveDataValueType::GpsValid.code(), 6);
        assert_eq!(LiveDataValueType::GpsEnable.code(), 62);
        assert_eq!(LiveDataValueType::DaqEnable.code(), 124);
        for ty in LiveDataValueType::ALL {
            assert_eq!(LiveDataValueType::from_code(ty.code()), Some(*ty));
        }
        assert_eq!(LiveDataValueType::from_code(7), None);
    }

    #[test]
    fn command_and_status_codes() {
        for code in 0..6 {
            assert_eq!(LiveDataCommand::from_code(code).map(LiveDataCommand::code), Some(code));
        }
        for code in 0..5 {
            assert_eq!(LiveDataStatus::from_code(code).map(LiveDataStatus::code), Some(code));
        }
        assert_eq!(LiveDataStatus::from_code(5), None);
    }

    #[test]
    fn status_display() {
        assert_eq!(LiveDataStatus::ErrFull.to_string(), "Error: Argument limit reached");
        assert!(LiveDataStatus::Success.is_success());
    }

    #[test]
    fn signal_kinds() {
        assert_eq!(LiveDataValueType::GpsLatitude.kind(), SignalKind::Double);
        assert_eq!(LiveDataValueType::GpsValid.kind(), SignalKind::Boolean);
        assert_eq!(LiveDataValueType::GpsTime.kind(), SignalKind::Integer);
    }
}
