//! Cluster-wide FlexRay timing
//!
//! A [`ClusterConfig`] must be bit-identical on every node of a cluster. Only the
//! internal consistency of one configuration is checked here; agreement between
//! nodes is the integrator's responsibility.
//!
//! [`FlexRayCluster`] binds a validated configuration to the controllers that use
//! it and tracks which key slots are claimed. Two controllers in one process may
//! not claim the same key slot.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::{DeviceError, Result};

/// Highest static slot count the E-Ray supports.
pub const MAX_STATIC_SLOTS: u16 = 1023;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FlexRaySpeed {
    #[default]
    Speed10M,
    Speed5M,
    Speed2M5,
}

impl FlexRaySpeed {
    pub fn code(self) -> u32 {
        match self {
            Self::Speed10M => 0,
            Self::Speed5M => 1,
            Self::Speed2M5 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StrobePointPosition {
    #[default]
    Spp5,
    Spp4,
    Spp6,
}

impl StrobePointPosition {
    pub fn code(self) -> u32 {
        match self {
            Self::Spp5 => 0,
            Self::Spp4 => 1,
            Self::Spp6 => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub speed: FlexRaySpeed,
    pub strobe_point_position: StrobePointPosition,
    pub action_point_offset: u8,
    pub cas_rx_low_max: u8,
    pub cold_start_attempts: u8,
    pub cycle_duration_micro_sec: u16,
    pub dynamic_slot_idle_phase_minislots: u8,
    pub listen_noise_macroticks: u8,
    pub macroticks_per_cycle: u16,
    pub macrotick_duration_micro_sec: u8,
    pub max_without_clock_correction_fatal: u8,
    pub max_without_clock_correction_passive: u8,
    pub minislot_action_point_offset_macroticks: u8,
    pub minislot_duration_macroticks: u8,
    pub network_idle_time_macroticks: u16,
    pub network_management_vector_length_bytes: u8,
    pub number_of_minislots: u16,
    pub number_of_static_slots: u16,
    pub offset_correction_start_macroticks: u16,
    pub payload_length_of_static_slot_in_words: u8,
    pub static_slot_macroticks: u16,
    pub symbol_window_macroticks: u32,
    pub symbol_window_action_point_offset_macroticks: u32,
    pub sync_frame_id_count_max: u8,
    pub transmission_start_sequence_duration_bits: u8,
    pub wakeup_rx_idle_bits: u8,
    pub wakeup_rx_low_bits: u8,
    pub wakeup_rx_window_bits: u16,
    pub wakeup_tx_active_bits: u8,
    pub wakeup_tx_idle_bits: u8,
}

impl ClusterConfig {
    /// Check that the segment lengths and ranges are self-consistent.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Err(DeviceError::configuration(reason));

        let static_segment =
            self.static_slot_macroticks as u32 * self.number_of_static_slots as u32;
        let dynamic_segment =
            self.minislot_duration_macroticks as u32 * self.number_of_minislots as u32;
        let segments = static_segment
            + dynamic_segment
            + self.symbol_window_macroticks
            + self.network_idle_time_macroticks as u32;
        if segments != self.macroticks_per_cycle as u32 {
            return fail(format!(
                "segment lengths sum to {} macroticks but macroticks_per_cycle is {}",
                segments, self.macroticks_per_cycle
            ));
        }

        let cycle = self.macroticks_per_cycle as u32 * self.macrotick_duration_micro_sec as u32;
        if cycle != self.cycle_duration_micro_sec as u32 {
            return fail(format!(
                "{} macroticks of {} us do not make a {} us cycle",
                self.macroticks_per_cycle,
                self.macrotick_duration_micro_sec,
                self.cycle_duration_micro_sec
            ));
        }

        if !(2..=MAX_STATIC_SLOTS).contains(&self.number_of_static_slots) {
            return fail(format!(
                "number_of_static_slots {} outside 2..={}",
                self.number_of_static_slots, MAX_STATIC_SLOTS
            ));
        }
        if self.payload_length_of_static_slot_in_words > 127 {
            return fail(format!(
                "static payload of {} words exceeds 127",
                self.payload_length_of_static_slot_in_words
            ));
        }
        if !(2..=15).contains(&self.sync_frame_id_count_max) {
            return fail(format!(
                "sync_frame_id_count_max {} outside 2..=15",
                self.sync_frame_id_count_max
            ));
        }
        if !(2..=16).contains(&self.listen_noise_macroticks) {
            return fail(format!(
                "listen_noise_macroticks {} outside 2..=16",
                self.listen_noise_macroticks
            ));
        }
        if !(2..=31).contains(&self.cold_start_attempts) {
            return fail(format!("cold_start_attempts {} outside 2..=31", self.cold_start_attempts));
        }
        if self.network_idle_time_macroticks == 0 {
            return fail("network_idle_time_macroticks must be non-zero".into());
        }
        if self.offset_correction_start_macroticks == 0
            || self.offset_correction_start_macroticks >= self.macroticks_per_cycle
        {
            return fail(format!(
                "offset_correction_start_macroticks {} must fall inside the {} macrotick cycle",
                self.offset_correction_start_macroticks, self.macroticks_per_cycle
            ));
        }
        if self.action_point_offset as u16 >= self.static_slot_macroticks {
            return fail(format!(
                "action_point_offset {} does not fit in a {} macrotick static slot",
                self.action_point_offset, self.static_slot_macroticks
            ));
        }
        Ok(())
    }

    pub fn macrotick(&self) -> Duration {
        Duration::from_micros(self.macrotick_duration_micro_sec as u64)
    }

    pub fn cycle_duration(&self) -> Duration {
        Duration::from_micros(self.cycle_duration_micro_sec as u64)
    }

    /// Static payload size in bytes.
    pub fn static_payload_bytes(&self) -> usize {
        self.payload_length_of_static_slot_in_words as usize * 2
    }
}

/// A validated cluster configuration shared by the controllers attached to it.
#[derive(Debug)]
pub struct FlexRayCluster {
    config: ClusterConfig,
    key_slots: Mutex<HashMap<u16, KeySlotHolder>>,
}

/// Controller instance holding a key slot. `id` is unique per process; `label`
/// is only for display, since two sessions on one unit share it.
#[derive(Debug, Clone)]
struct KeySlotHolder {
    id: u64,
    label: String,
}

impl FlexRayCluster {
    pub fn new(config: ClusterConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self { config, key_slots: Mutex::new(HashMap::new()) }))
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    fn claims(&self) -> MutexGuard<'_, HashMap<u16, KeySlotHolder>> {
        self.key_slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `slots` for controller instance `owner`, atomically.
    ///
    /// Slots already held by `owner` are kept. A slot held by any other instance
    /// fails the whole claim.
    pub(crate) fn claim_key_slots(&self, owner: u64, label: &str, slots: &[u16]) -> Result<()> {
        let mut claimed = self.claims();
        for slot in slots {
            if let Some(holder) = claimed.get(slot).filter(|holder| holder.id != owner) {
                return Err(DeviceError::configuration(format!(
                    "key slot {} is already used by controller {} in this cluster",
                    slot, holder.label
                )));
            }
        }
        claimed.retain(|_, holder| holder.id != owner);
        for slot in slots {
            claimed.insert(*slot, KeySlotHolder { id: owner, label: label.to_string() });
        }
        debug!(owner = label, ?slots, "Key slots claimed");
        Ok(())
    }

    pub(crate) fn release_key_slots(&self, owner: u64) {
        self.claims().retain(|_, holder| holder.id != owner);
    }

    /// Key slot to owning controller label, sorted by slot.
    pub fn claimed_key_slots(&self) -> Vec<(u16, String)> {
        let mut slots: Vec<_> =
            self.claims().iter().map(|(slot, holder)| (*slot, holder.label.clone())).collect();
        slots.sort();
        slots
    }
}
