//! E-Ray register map and configuration image
//!
//! Converts a cluster and controller configuration into the register values the
//! communication controller expects, and lays out message buffers (header CRC,
//! cycle filter, data pointers) for the input buffer transfer sequence.

use serde::{Deserialize, Serialize};

use super::cluster::ClusterConfig;
use super::controller::ControllerConfig;
use crate::message::flexray::is_valid_repetition;

/// Maximum number of message buffers the E-Ray provides.
pub const MAX_MESSAGE_BUFFERS: usize = 128;

/// Value read from ENDN on a correctly connected core.
pub const ENDIANNESS_MAGIC: u32 = 0x8765_4321;

/// Unlock sequence written to LCK before leaving POC:config.
pub const LOCK_SEQUENCE: [u32; 2] = [0xCE, 0x31];

/// SUCC1 bit set while a POC command is being processed.
pub const SUCC1_PBSY: u32 = 1 << 7;
/// Low nibble of SUCC1 holding the POC command.
pub const SUCC1_CMD_MASK: u32 = 0xF;
/// MHDS bit set while CLEAR_RAMS is in progress.
pub const MHDS_CRAM: u32 = 1 << 7;
/// IBCR bit set while the input buffer is being transferred.
pub const IBCR_IBSYH: u32 = 1 << 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum ERayRegister {
    Endn = 0x0014,
    Lck = 0x001C,
    Succ1 = 0x0080,
    Succ2 = 0x0084,
    Succ3 = 0x0088,
    Nemc = 0x008C,
    Prtc1 = 0x0090,
    Prtc2 = 0x0094,
    Mhdc = 0x0098,
    Gtuc1 = 0x00A0,
    Gtuc2 = 0x00A4,
    Gtuc3 = 0x00A8,
    Gtuc4 = 0x00AC,
    Gtuc5 = 0x00B0,
    Gtuc6 = 0x00B4,
    Gtuc7 = 0x00B8,
    Gtuc8 = 0x00BC,
    Gtuc9 = 0x00C0,
    Gtuc10 = 0x00C4,
    Gtuc11 = 0x00C8,
    Ccsv = 0x0100,
    Mrc = 0x0300,
    Mhds = 0x0310,
    Wrhs1 = 0x0500,
    Wrhs2 = 0x0504,
    Wrhs3 = 0x0508,
    Ibcm = 0x0510,
    Ibcr = 0x0514,
}

impl ERayRegister {
    pub const ALL: [ERayRegister; 28] = [
        Self::Endn,
        Self::Lck,
        Self::Succ1,
        Self::Succ2,
        Self::Succ3,
        Self::Nemc,
        Self::Prtc1,
        Self::Prtc2,
        Self::Mhdc,
        Self::Gtuc1,
        Self::Gtuc2,
        Self::Gtuc3,
        Self::Gtuc4,
        Self::Gtuc5,
        Self::Gtuc6,
        Self::Gtuc7,
        Self::Gtuc8,
        Self::Gtuc9,
        Self::Gtuc10,
        Self::Gtuc11,
        Self::Ccsv,
        Self::Mrc,
        Self::Mhds,
        Self::Wrhs1,
        Self::Wrhs2,
        Self::Wrhs3,
        Self::Ibcm,
        Self::Ibcr,
    ];

    pub fn address(self) -> u16 {
        self as u16
    }

    pub fn from_address(address: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|register| register.address() == address)
    }
}

/// A message buffer as configured by the user or derived from the key slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageBuffer {
    pub is_dynamic: bool,
    /// Must be set whenever `is_startup` is.
    pub is_sync: bool,
    pub is_startup: bool,
    pub is_network_management_frame: bool,
    pub is_transmit: bool,
    pub frame_id: u16,
    pub channel_a: bool,
    pub channel_b: bool,
    pub frame_length_bytes: u8,
    pub base_cycle: u8,
    pub cycle_repetition: u8,
    /// Single-shot when false.
    pub continuous_mode: bool,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self {
            is_dynamic: false,
            is_sync: false,
            is_startup: false,
            is_network_management_frame: false,
            is_transmit: false,
            frame_id: 0,
            channel_a: false,
            channel_b: false,
            frame_length_bytes: 0,
            base_cycle: 0,
            cycle_repetition: 1,
            continuous_mode: false,
        }
    }
}

impl MessageBuffer {
    pub fn transmit(frame_id: u16, frame_length_bytes: u8) -> Self {
        Self { is_transmit: true, frame_id, channel_a: true, frame_length_bytes, ..Self::default() }
    }

    pub fn receive(frame_id: u16, frame_length_bytes: u8) -> Self {
        Self { frame_id, channel_a: true, frame_length_bytes, ..Self::default() }
    }

    /// Whether this buffer is scheduled in `cycle`.
    pub fn fires_in_cycle(&self, cycle: u8) -> bool {
        let repetition = self.cycle_repetition.max(1);
        cycle % repetition == self.base_cycle % repetition
    }

    pub fn header_crc(&self) -> u16 {
        header_crc(self.is_startup, self.is_sync, self.frame_id, self.frame_length_bytes)
    }

    pub fn cycle_filter(&self) -> u16 {
        cycle_filter(self.base_cycle, self.cycle_repetition)
    }

    pub fn payload_words(&self) -> u32 {
        (self.frame_length_bytes as u32).div_ceil(2)
    }
}

/// Eleven-bit FlexRay header CRC over the sync/startup indicators, frame id and
/// payload length in words.
pub fn header_crc(startup: bool, sync: bool, frame_id: u16, frame_length_bytes: u8) -> u16 {
    let mut crc: u16 = 0x1A;
    let mut feed = |bit: bool| {
        let next = bit ^ ((crc >> 10) & 1 == 1);
        crc = (crc << 1) & 0x7FE;
        if next {
            crc ^= 0x385;
        }
    };

    feed(startup);
    feed(sync);
    for i in (0..11).rev() {
        feed(frame_id & (1 << i) != 0);
    }
    let words = (frame_length_bytes as u16).div_ceil(2);
    for i in (0..7).rev() {
        feed(words & (1 << i) != 0);
    }
    crc
}

/// Cycle filter field: repetition code ORed with the base cycle.
///
/// An unsupported repetition contributes no code bit.
pub fn cycle_filter(base_cycle: u8, cycle_repetition: u8) -> u16 {
    let code = if is_valid_repetition(cycle_repetition) { cycle_repetition as u16 } else { 0 };
    code | base_cycle as u16
}

fn bit(flag: bool, shift: u32) -> u32 {
    (flag as u32) << shift
}

/// SUCC1 configuration bits, leaving the command nibble clear.
pub fn succ1(cluster: &ClusterConfig, controller: &ControllerConfig) -> u32 {
    bit(controller.key_slot_used_for_startup, 8)
        | bit(controller.key_slot_used_for_sync, 9)
        | ((cluster.cold_start_attempts as u32 & 0x1F) << 11)
        | ((controller.allow_passive_to_active_cycle_pairs as u32 & 0x1F) << 16)
        | bit(controller.wakeup_on_channel_b, 21)
        | bit(controller.key_slot_only_enabled, 22)
        | bit(controller.allow_halt_due_to_clock, 23)
        | bit(controller.mts_on_a, 24)
        | bit(controller.mts_on_b, 25)
        | bit(controller.channel_a, 26)
        | bit(controller.channel_b, 27)
}

/// Register writes applied in POC:config, in write order.
pub fn configuration_image(
    cluster: &ClusterConfig,
    controller: &ControllerConfig,
) -> Vec<(ERayRegister, u32)> {
    let mpc = cluster.macroticks_per_cycle as u32;
    vec![
        (ERayRegister::Succ1, succ1(cluster, controller)),
        (
            ERayRegister::Succ2,
            (controller.listen_timeout & 0x1F_FFFF)
                | ((cluster.listen_noise_macroticks as u32).wrapping_sub(1) & 0xF) << 24,
        ),
        (
            ERayRegister::Succ3,
            (cluster.max_without_clock_correction_passive as u32 & 0xF)
                | (cluster.max_without_clock_correction_fatal as u32 & 0xF) << 4,
        ),
        (ERayRegister::Nemc, cluster.network_management_vector_length_bytes as u32 & 0xF),
        (
            ERayRegister::Prtc1,
            (cluster.transmission_start_sequence_duration_bits as u32 & 0xF)
                | (cluster.cas_rx_low_max as u32 & 0x1F) << 4
                | 1 << 10
                | (cluster.strobe_point_position.code() & 0x3) << 12
                | (cluster.speed.code() & 0x3) << 14
                | (cluster.wakeup_rx_window_bits as u32 & 0x1FF) << 16
                | (controller.wakeup_pattern as u32 & 0x3F) << 26,
        ),
        (
            ERayRegister::Prtc2,
            (cluster.wakeup_rx_idle_bits as u32 & 0x3F)
                | (cluster.wakeup_rx_low_bits as u32 & 0x3F) << 8
                | (cluster.wakeup_tx_idle_bits as u32) << 16
                | (cluster.wakeup_tx_active_bits as u32 & 0x3F) << 24,
        ),
        (
            ERayRegister::Mhdc,
            (cluster.payload_length_of_static_slot_in_words as u32 & 0x7F)
                | (controller.latest_tx_minislot as u32 & 0x1FFF) << 16,
        ),
        (ERayRegister::Gtuc1, controller.micro_per_cycle & 0xF_FFFF),
        (ERayRegister::Gtuc2, (cluster.sync_frame_id_count_max as u32) << 16 | (mpc & 0x3FFF)),
        (
            ERayRegister::Gtuc3,
            controller.micro_initial_offset_a as u32
                | (controller.micro_initial_offset_b as u32) << 8
                | (controller.macro_initial_offset_a as u32 & 0x7F) << 16
                | (controller.macro_initial_offset_b as u32 & 0x7F) << 24,
        ),
        (
            ERayRegister::Gtuc4,
            (mpc.wrapping_sub(cluster.network_idle_time_macroticks as u32).wrapping_sub(1) & 0x3FFF)
                | ((cluster.offset_correction_start_macroticks as u32).wrapping_sub(1) & 0x3FFF)
                    << 16,
        ),
        (
            ERayRegister::Gtuc5,
            controller.delay_compensation_a_microticks as u32
                | (controller.delay_compensation_b_microticks as u32) << 8
                | (controller.cluster_drift_damping as u32 & 0x1F) << 16
                | (controller.decoding_correction_microticks as u32) << 24,
        ),
        (
            ERayRegister::Gtuc6,
            (controller.accept_startup_range_microticks as u32 & 0x7FF)
                | (controller.rate_correction_out_microticks as u32 & 0x7FF) << 16,
        ),
        (
            ERayRegister::Gtuc7,
            (cluster.static_slot_macroticks as u32 & 0x3FF)
                | (cluster.number_of_static_slots as u32 & 0x3FF) << 16,
        ),
        (
            ERayRegister::Gtuc8,
            (cluster.minislot_duration_macroticks as u32 & 0x3F)
                | (cluster.number_of_minislots as u32 & 0x1FFF) << 16,
        ),
        (
            ERayRegister::Gtuc9,
            (cluster.action_point_offset as u32 & 0x3F)
                | (cluster.minislot_action_point_offset_macroticks as u32 & 0x1F) << 8
                | (cluster.dynamic_slot_idle_phase_minislots as u32 & 0x3) << 16,
        ),
        (
            ERayRegister::Gtuc10,
            (controller.offset_correction_out_microticks as u32 & 0x3FFF)
                | (controller.rate_correction_out_microticks as u32 & 0x7FF) << 16,
        ),
        (
            ERayRegister::Gtuc11,
            (controller.extern_offset_correction_control as u32 & 0x3)
                | (controller.extern_rate_correction_control as u32 & 0x3) << 8
                | (controller.extern_offset_correction_microticks as u32 & 0x7) << 16
                | (controller.extern_rate_correction_microticks as u32 & 0x7) << 24,
        ),
    ]
}

/// Header section writes for one buffer, ready for the input buffer transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferHeader {
    pub index: u16,
    pub wrhs1: u32,
    pub wrhs2: u32,
    pub wrhs3: u32,
}

/// Message RAM layout for `buffers`, plus the MRC value.
///
/// Buffers beyond [`MAX_MESSAGE_BUFFERS`] are ignored. Buffers without a frame id
/// get a placeholder id outside the valid slot range so they never transmit.
pub fn buffer_layout(
    buffers: &[MessageBuffer],
    two_key_slot_mode: bool,
) -> (u32, Vec<BufferHeader>) {
    let buffers = &buffers[..buffers.len().min(MAX_MESSAGE_BUFFERS)];
    let total = buffers.len() as u32;
    let static_count = buffers.iter().filter(|buffer| !buffer.is_dynamic).count() as u32;
    let mrc = static_count
        | 0x80 << 8
        | (total.saturating_sub(1) & 0x7F) << 16
        | bit(two_key_slot_mode, 26);

    let mut data_pointer = (total + 1) * 4;
    let headers = buffers
        .iter()
        .enumerate()
        .map(|(index, buffer)| {
            let index = index as u16;
            let frame_id = if buffer.frame_id == 0 { index | 1 << 10 } else { buffer.frame_id };
            let header = MessageBuffer { frame_id, ..buffer.clone() };
            let wrhs1 = frame_id as u32
                | (header.cycle_filter() as u32) << 16
                | bit(header.channel_a, 24)
                | bit(header.channel_b, 25)
                | bit(header.is_transmit, 26)
                | bit(header.is_network_management_frame, 27)
                | bit(!header.continuous_mode, 28);
            let wrhs2 = header.header_crc() as u32 | header.payload_words() << 16;
            let wrhs3 = data_pointer;
            data_pointer += header.frame_length_bytes as u32 / 4;
            data_pointer += data_pointer % 4;
            BufferHeader { index, wrhs1, wrhs2, wrhs3 }
        })
        .collect();
    (mrc, headers)
}

/// Fields recovered from a WRHS1 value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedHeader {
    pub frame_id: u16,
    pub cycle_filter: u16,
    pub channel_a: bool,
    pub channel_b: bool,
    pub transmit: bool,
}

impl DecodedHeader {
    pub fn from_wrhs1(wrhs1: u32) -> Self {
        Self {
            frame_id: (wrhs1 & 0x7FF) as u16,
            cycle_filter: ((wrhs1 >> 16) & 0x7F) as u16,
            channel_a: wrhs1 & (1 << 24) != 0,
            channel_b: wrhs1 & (1 << 25) != 0,
            transmit: wrhs1 & (1 << 26) != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flexray::cluster::{FlexRaySpeed, StrobePointPosition};

    #[test]
    fn register_addresses() {
        assert_eq!(ERayRegister::Gtuc11.address(), 0x00C8);
        assert_eq!(ERayRegister::from_address(0x0514), Some(ERayRegister::Ibcr));
        assert_eq!(ERayRegister::from_address(0x0002), None);
    }

    #[test]
    fn cycle_filter_codes() {
        assert_eq!(cycle_filter(0, 1), 0x01);
        assert_eq!(cycle_filter(1, 2), 0x03);
        assert_eq!(cycle_filter(3, 4), 0x07);
        assert_eq!(cycle_filter(5, 64), 0x45);
        assert_eq!(cycle_filter(0, 3), 0x00);
    }

    #[test]
    fn header_crc_is_eleven_bits_and_input_sensitive() {
        let a = header_crc(true, true, 1, 134);
        let b = header_crc(false, true, 1, 134);
        let c = header_crc(true, true, 2, 134);
        assert!(a <= 0x7FF && b <= 0x7FF && c <= 0x7FF);
        assert_ne!(a, b);
        assert_ne!(a, c);
        // Odd byte counts round up to whole words.
        assert_eq!(header_crc(false, false, 9, 3), header_crc(false, false, 9, 4));
    }

    #[test]
    fn header_crc_reference_values() {
        // Frame 0 with no indicators and no payload only shifts the init vector.
        let mut expected: u16 = 0x1A;
        for _ in 0..20 {
            let next = (expected >> 10) & 1 == 1;
            expected = (expected << 1) & 0x7FE;
            if next {
                expected ^= 0x385;
            }
        }
        assert_eq!(header_crc(false, false, 0, 0), expected);
    }

    #[test]
    fn buffer_layout_pointers_and_placeholder_ids() {
        let buffers = vec![MessageBuffer::transmit(1, 134), MessageBuffer::receive(0, 16)];
        let (mrc, headers) = buffer_layout(&buffers, false);
        assert_eq!(mrc & 0xFF, 2);
        assert_eq!((mrc >> 8) & 0xFF, 0x80);
        assert_eq!((mrc >> 16) & 0x7F, 1);
        assert_eq!(headers[0].wrhs3, 12);
        // 12 + 134 / 4 = 45, then 45 + 45 % 4 = 46
        assert_eq!(headers[1].wrhs3, 46);
        assert_eq!(headers[1].wrhs1 & 0x7FF, (1 | 1 << 10) & 0x7FF);
        assert_eq!(headers[0].wrhs2 >> 16, 67);
        let decoded = DecodedHeader::from_wrhs1(headers[0].wrhs1);
        assert!(decoded.transmit && decoded.channel_a && !decoded.channel_b);
        assert_eq!(decoded.frame_id, 1);
    }

    #[test]
    fn two_key_slot_flag_in_mrc() {
        let (mrc, _) = buffer_layout(&[MessageBuffer::transmit(1, 8)], true);
        assert_ne!(mrc & (1 << 26), 0);
    }

    #[test]
    fn configuration_image_packs_fields() {
        let cluster = ClusterConfig {
            speed: FlexRaySpeed::Speed10M,
            strobe_point_position: StrobePointPosition::Spp5,
            cold_start_attempts: 8,
            listen_noise_macroticks: 4,
            macroticks_per_cycle: 5000,
            network_idle_time_macroticks: 40,
            offset_correction_start_macroticks: 4991,
            sync_frame_id_count_max: 15,
            ..ClusterConfig::default()
        };
        let controller = ControllerConfig {
            key_slot_used_for_startup: true,
            key_slot_used_for_sync: true,
            channel_a: true,
            channel_b: true,
            listen_timeout: 401_202,
            ..ControllerConfig::default()
        };
        let image = configuration_image(&cluster, &controller);
        let get = |register| image.iter().find(|(r, _)| *r == register).map(|(_, v)| *v).unwrap();

        let succ1 = get(ERayRegister::Succ1);
        assert_eq!(succ1 & SUCC1_CMD_MASK, 0);
        assert_ne!(succ1 & (1 << 8), 0);
        assert_ne!(succ1 & (1 << 9), 0);
        assert_eq!((succ1 >> 11) & 0x1F, 8);
        assert_eq!(succ1 >> 26 & 0x3, 0x3);
        assert_eq!(get(ERayRegister::Succ2), 401_202 | 3 << 24);
        assert_eq!(get(ERayRegister::Gtuc2), 15 << 16 | 5000);
        assert_eq!(get(ERayRegister::Gtuc4), 4959 | 4990 << 16);
        assert_ne!(get(ERayRegister::Prtc1) & (1 << 10), 0);
        assert_eq!(image.len(), 18);
    }
}
