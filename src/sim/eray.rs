//! Register-level model of one E-Ray core
//!
//! Commands complete instantly, so PBSY, CRAM and IBSYH always read clear. The
//! model only tracks what the host can observe: POC state, the unlock sequence,
//! coldstart permission and the message buffers transferred through the input
//! buffer. Startup progress after RUN is decided by the bus the core sits on.

use std::collections::{BTreeMap, HashMap};

use crate::flexray::poc::{PocCommand, PocStatus};
use crate::flexray::registers::{
    DecodedHeader, ENDIANNESS_MAGIC, ERayRegister, LOCK_SEQUENCE, SUCC1_CMD_MASK,
};

const SUCC1_TXST: u32 = 1 << 8;
const SUCC1_TXSY: u32 = 1 << 9;
const SUCC1_TSM: u32 = 1 << 22;

/// A message buffer as held in the core's message RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreBuffer {
    pub frame_id: u16,
    pub cycle_filter: u16,
    pub channel_a: bool,
    pub channel_b: bool,
    pub transmit: bool,
    pub length_bytes: u8,
}

#[derive(Debug)]
pub struct ERayModel {
    registers: HashMap<u16, u32>,
    status: PocStatus,
    lock_step: usize,
    unlocked: bool,
    coldstart_allowed: bool,
    buffers: BTreeMap<u16, CoreBuffer>,
    run_count: u32,
    clear_ram_count: u32,
    wakeup_count: u32,
    mts_count: u32,
}

impl Default for ERayModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ERayModel {
    pub fn new() -> Self {
        Self {
            registers: HashMap::new(),
            status: PocStatus::DefaultConfig,
            lock_step: 0,
            unlocked: false,
            coldstart_allowed: false,
            buffers: BTreeMap::new(),
            run_count: 0,
            clear_ram_count: 0,
            wakeup_count: 0,
            mts_count: 0,
        }
    }

    fn stored(&self, register: ERayRegister) -> u32 {
        self.registers.get(&register.address()).copied().unwrap_or(0)
    }

    pub fn read(&self, address: u16) -> u32 {
        match ERayRegister::from_address(address) {
            Some(ERayRegister::Endn) => ENDIANNESS_MAGIC,
            Some(ERayRegister::Ccsv) => self.status.code() as u32,
            Some(ERayRegister::Mhds) => 0,
            Some(ERayRegister::Ibcr) => self.stored(ERayRegister::Ibcr) & 0x7F,
            _ => self.registers.get(&address).copied().unwrap_or(0),
        }
    }

    pub fn write(&mut self, address: u16, value: u32) {
        match ERayRegister::from_address(address) {
            Some(ERayRegister::Lck) => self.unlock_step(value),
            Some(ERayRegister::Succ1) => {
                let command = (value & SUCC1_CMD_MASK) as u8;
                let accepted = match PocCommand::from_code(command) {
                    Some(PocCommand::CommandNotAccepted) | None => None,
                    Some(command) => Some(self.apply(command)),
                };
                let nibble = match accepted {
                    Some(true) => command as u32,
                    _ => 0,
                };
                self.registers.insert(address, (value & !SUCC1_CMD_MASK) | nibble);
            }
            Some(ERayRegister::Ibcr) => {
                self.registers.insert(address, value);
                self.transfer_input_buffer((value & 0x7F) as u16);
            }
            Some(ERayRegister::Ccsv) | Some(ERayRegister::Endn) => {}
            _ => {
                self.registers.insert(address, value);
            }
        }
    }

    fn unlock_step(&mut self, value: u32) {
        if value == LOCK_SEQUENCE[self.lock_step] {
            self.lock_step += 1;
            if self.lock_step == LOCK_SEQUENCE.len() {
                self.unlocked = true;
                self.lock_step = 0;
            }
        } else {
            self.lock_step = 0;
        }
    }

    fn transfer_input_buffer(&mut self, index: u16) {
        let header = DecodedHeader::from_wrhs1(self.stored(ERayRegister::Wrhs1));
        let words = (self.stored(ERayRegister::Wrhs2) >> 16) & 0x7F;
        self.buffers.insert(
            index,
            CoreBuffer {
                frame_id: header.frame_id,
                cycle_filter: header.cycle_filter,
                channel_a: header.channel_a,
                channel_b: header.channel_b,
                transmit: header.transmit,
                length_bytes: (words * 2).min(u8::MAX as u32) as u8,
            },
        );
    }

    fn apply(&mut self, command: PocCommand) -> bool {
        use PocStatus as S;
        match command {
            PocCommand::CommandNotAccepted => false,
            PocCommand::Config if self.status.accepts_config() => {
                self.status = if self.status == S::Halt { S::DefaultConfig } else { S::Config };
                true
            }
            PocCommand::ClearRams if matches!(self.status, S::Config | S::DefaultConfig) => {
                self.buffers.clear();
                self.clear_ram_count += 1;
                true
            }
            PocCommand::Ready if self.status == S::Config && self.unlocked => {
                self.unlocked = false;
                self.status = S::Ready;
                true
            }
            PocCommand::Ready if self.status.is_normal() || self.status.is_startup() => {
                self.status = S::Ready;
                true
            }
            PocCommand::AllowColdstart if self.status == S::Ready || self.status.is_normal() => {
                self.coldstart_allowed = true;
                true
            }
            PocCommand::Wakeup if self.status == S::Ready => {
                self.wakeup_count += 1;
                true
            }
            PocCommand::Run if self.status == S::Ready => {
                self.run_count += 1;
                self.status = if self.is_coldstart_node() {
                    S::ColdstartListen
                } else {
                    S::IntegrationListen
                };
                true
            }
            PocCommand::Halt if !matches!(self.status, S::Config | S::DefaultConfig) => {
                self.status = S::Halt;
                true
            }
            PocCommand::Freeze => {
                self.status = S::Halt;
                true
            }
            PocCommand::SendMts if self.status == S::NormalActive => {
                self.mts_count += 1;
                true
            }
            PocCommand::AllSlots | PocCommand::ResetStatusIndicators => true,
            PocCommand::MonitorMode if self.status == S::Config => {
                self.status = S::MonitorMode;
                true
            }
            _ => false,
        }
    }

    pub fn status(&self) -> PocStatus {
        self.status
    }

    /// Set by the bus as startup progresses.
    pub fn set_status(&mut self, status: PocStatus) {
        self.status = status;
    }

    /// Running, but not yet integrated.
    pub fn is_starting(&self) -> bool {
        self.status.is_startup()
    }

    fn succ1(&self) -> u32 {
        self.stored(ERayRegister::Succ1)
    }

    pub fn is_coldstart_node(&self) -> bool {
        let succ1 = self.succ1();
        self.coldstart_allowed && succ1 & SUCC1_TXST != 0 && succ1 & SUCC1_TXSY != 0
    }

    pub fn sends_sync(&self) -> bool {
        self.succ1() & SUCC1_TXSY != 0
    }

    /// Whether buffer 0 carries a key slot frame.
    pub fn key_slot_transmits(&self) -> bool {
        self.buffers.get(&0).is_some_and(|b| b.transmit)
            && self.succ1() & (SUCC1_TXSY | SUCC1_TSM) != 0
    }

    pub fn key_slot(&self) -> Option<u16> {
        self.key_slot_transmits().then(|| self.buffers.get(&0).map(|b| b.frame_id)).flatten()
    }

    pub fn buffer(&self, index: u16) -> Option<&CoreBuffer> {
        self.buffers.get(&index)
    }

    pub fn coldstart_allowed(&self) -> bool {
        self.coldstart_allowed
    }

    pub fn run_count(&self) -> u32 {
        self.run_count
    }

    pub fn clear_ram_count(&self) -> u32 {
        self.clear_ram_count
    }

    pub fn wakeup_count(&self) -> u32 {
        self.wakeup_count
    }

    pub fn mts_count(&self) -> u32 {
        self.mts_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(core: &mut ERayModel, command: PocCommand) -> bool {
        let succ1 = core.read(ERayRegister::Succ1.address());
        let value = (succ1 & !SUCC1_CMD_MASK) | command.code() as u32;
        core.write(ERayRegister::Succ1.address(), value);
        core.read(ERayRegister::Succ1.address()) & SUCC1_CMD_MASK != 0
    }

    #[test]
    fn ready_requires_unlock_sequence() {
        let mut core = ERayModel::new();
        assert!(command(&mut core, PocCommand::Config));
        assert_eq!(core.status(), PocStatus::Config);
        assert!(!command(&mut core, PocCommand::Ready));

        core.write(ERayRegister::Lck.address(), 0xCE);
        core.write(ERayRegister::Lck.address(), 0x31);
        assert!(command(&mut core, PocCommand::Ready));
        assert_eq!(core.status(), PocStatus::Ready);
    }

    #[test]
    fn broken_unlock_sequence_keeps_config() {
        let mut core = ERayModel::new();
        command(&mut core, PocCommand::Config);
        core.write(ERayRegister::Lck.address(), 0x31);
        core.write(ERayRegister::Lck.address(), 0xCE);
        assert!(!command(&mut core, PocCommand::Ready));
    }

    #[test]
    fn halt_needs_two_config_commands() {
        let mut core = ERayModel::new();
        core.set_status(PocStatus::Halt);
        assert!(command(&mut core, PocCommand::Config));
        assert_eq!(core.status(), PocStatus::DefaultConfig);
        assert!(command(&mut core, PocCommand::Config));
        assert_eq!(core.status(), PocStatus::Config);
    }

    #[test]
    fn configuration_bits_survive_commands() {
        let mut core = ERayModel::new();
        core.write(ERayRegister::Succ1.address(), SUCC1_TXST | SUCC1_TXSY);
        command(&mut core, PocCommand::Config);
        assert!(core.sends_sync());
        assert!(!core.is_coldstart_node());
    }

    #[test]
    fn input_buffer_transfer_captures_header() {
        let mut core = ERayModel::new();
        core.write(ERayRegister::Wrhs1.address(), 5 | 1 << 16 | 1 << 24 | 1 << 26);
        core.write(ERayRegister::Wrhs2.address(), 4 << 16);
        core.write(ERayRegister::Ibcr.address(), 0);
        let buffer = core.buffer(0).unwrap();
        assert_eq!(buffer.frame_id, 5);
        assert!(buffer.transmit && buffer.channel_a && !buffer.channel_b);
        assert_eq!(buffer.length_bytes, 8);
    }

    #[test]
    fn reads_report_idle_flags() {
        let core = ERayModel::new();
        assert_eq!(core.read(ERayRegister::Endn.address()), ENDIANNESS_MAGIC);
        assert_eq!(core.read(ERayRegister::Mhds.address()), 0);
        assert_eq!(core.read(ERayRegister::Ccsv.address()), 0);
    }
}
