//! Protocol operation control (POC) commands and states of the E-Ray core

use std::fmt;

/// Value written to the low nibble of SUCC1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PocCommand {
    /// Read back after a write the core refused
    CommandNotAccepted = 0,
    Config = 1,
    Ready = 2,
    Wakeup = 3,
    Run = 4,
    AllSlots = 5,
    Halt = 6,
    Freeze = 7,
    SendMts = 8,
    AllowColdstart = 9,
    ResetStatusIndicators = 10,
    MonitorMode = 11,
    ClearRams = 12,
}

impl PocCommand {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::CommandNotAccepted,
            1 => Self::Config,
            2 => Self::Ready,
            3 => Self::Wakeup,
            4 => Self::Run,
            5 => Self::AllSlots,
            6 => Self::Halt,
            7 => Self::Freeze,
            8 => Self::SendMts,
            9 => Self::AllowColdstart,
            10 => Self::ResetStatusIndicators,
            11 => Self::MonitorMode,
            12 => Self::ClearRams,
            _ => return None,
        })
    }
}

/// POC state as reported in the low six bits of CCSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PocStatus {
    DefaultConfig = 0x00,
    Ready = 0x01,
    NormalActive = 0x02,
    NormalPassive = 0x03,
    Halt = 0x04,
    MonitorMode = 0x05,
    Config = 0x0F,
    WakeupStandby = 0x10,
    WakeupListen = 0x11,
    WakeupSend = 0x12,
    WakeupDetect = 0x13,
    StartupPrepare = 0x20,
    ColdstartListen = 0x21,
    ColdstartCollisionResolution = 0x22,
    ColdstartConsistencyCheck = 0x23,
    ColdstartGap = 0x24,
    ColdstartJoin = 0x25,
    IntegrationColdstartCheck = 0x26,
    IntegrationListen = 0x27,
    IntegrationConsistencyCheck = 0x28,
    InitializeSchedule = 0x29,
    AbortStartup = 0x2A,
    StartupSuccess = 0x2B,
}

impl PocStatus {
    pub const CCSV_MASK: u32 = 0x3F;

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => Self::DefaultConfig,
            0x01 => Self::Ready,
            0x02 => Self::NormalActive,
            0x03 => Self::NormalPassive,
            0x04 => Self::Halt,
            0x05 => Self::MonitorMode,
            0x0F => Self::Config,
            0x10 => Self::WakeupStandby,
            0x11 => Self::WakeupListen,
            0x12 => Self::WakeupSend,
            0x13 => Self::WakeupDetect,
            0x20 => Self::StartupPrepare,
            0x21 => Self::ColdstartListen,
            0x22 => Self::ColdstartCollisionResolution,
            0x23 => Self::ColdstartConsistencyCheck,
            0x24 => Self::ColdstartGap,
            0x25 => Self::ColdstartJoin,
            0x26 => Self::IntegrationColdstartCheck,
            0x27 => Self::IntegrationListen,
            0x28 => Self::IntegrationConsistencyCheck,
            0x29 => Self::InitializeSchedule,
            0x2A => Self::AbortStartup,
            0x2B => Self::StartupSuccess,
            _ => return None,
        })
    }

    /// Decode the status field of a CCSV register value.
    pub fn from_ccsv(ccsv: u32) -> Option<Self> {
        Self::from_code((ccsv & Self::CCSV_MASK) as u8)
    }

    /// States from which a CONFIG command is accepted without freezing first.
    pub fn accepts_config(self) -> bool {
        matches!(self, Self::DefaultConfig | Self::Config | Self::Ready | Self::Halt)
    }

    pub fn is_normal(self) -> bool {
        matches!(self, Self::NormalActive | Self::NormalPassive)
    }

    pub fn is_startup(self) -> bool {
        (self as u8) & 0x20 != 0
    }

    pub fn is_wakeup(self) -> bool {
        (0x10..=0x13).contains(&(self as u8))
    }
}

impl fmt::Display for PocStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes_round_trip() {
        for code in 0..=12 {
            assert_eq!(PocCommand::from_code(code).map(PocCommand::code), Some(code));
        }
        assert_eq!(PocCommand::from_code(13), None);
    }

    #[test]
    fn ccsv_masks_upper_bits() {
        assert_eq!(PocStatus::from_ccsv(0xFFFF_FF02), Some(PocStatus::NormalActive));
        assert_eq!(PocStatus::from_ccsv(0x0000_000F), Some(PocStatus::Config));
        assert_eq!(PocStatus::from_ccsv(0x0000_0006), None);
    }

    #[test]
    fn classification() {
        assert!(PocStatus::ColdstartListen.is_startup());
        assert!(PocStatus::IntegrationListen.is_startup());
        assert!(!PocStatus::NormalActive.is_startup());
        assert!(PocStatus::WakeupSend.is_wakeup());
        assert!(PocStatus::Halt.accepts_config());
        assert!(!PocStatus::NormalActive.accepts_config());
    }
}
