//! Shared test fixtures
//!
//! Example FlexRay configurations for a 10 Mbit/s, 5 ms cluster with 32 static
//! slots, plus tracing setup for tests.

#![cfg(any(test, feature = "benchmark"))]

use crate::flexray::{ClusterConfig, ControllerConfig, FlexRaySpeed, StrobePointPosition};

/// Install a fmt subscriber once per process. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vnetlink=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A consistent cluster: 32 static slots of 155 macroticks, no dynamic segment.
pub fn example_cluster_config() -> ClusterConfig {
    ClusterConfig {
        speed: FlexRaySpeed::Speed10M,
        strobe_point_position: StrobePointPosition::Spp5,
        action_point_offset: 4,
        cas_rx_low_max: 64,
        cold_start_attempts: 8,
        cycle_duration_micro_sec: 5000,
        dynamic_slot_idle_phase_minislots: 1,
        listen_noise_macroticks: 4,
        macroticks_per_cycle: 5000,
        macrotick_duration_micro_sec: 1,
        max_without_clock_correction_fatal: 2,
        max_without_clock_correction_passive: 2,
        minislot_action_point_offset_macroticks: 4,
        minislot_duration_macroticks: 10,
        network_idle_time_macroticks: 40,
        network_management_vector_length_bytes: 1,
        number_of_minislots: 0,
        number_of_static_slots: 32,
        offset_correction_start_macroticks: 4991,
        payload_length_of_static_slot_in_words: 67,
        static_slot_macroticks: 155,
        symbol_window_macroticks: 0,
        symbol_window_action_point_offset_macroticks: 0,
        sync_frame_id_count_max: 15,
        transmission_start_sequence_duration_bits: 11,
        wakeup_rx_idle_bits: 40,
        wakeup_rx_low_bits: 40,
        wakeup_rx_window_bits: 301,
        wakeup_tx_active_bits: 60,
        wakeup_tx_idle_bits: 180,
    }
}

/// A sync/startup node transmitting in `key_slot` on both channels.
pub fn example_controller_config(key_slot: u16) -> ControllerConfig {
    ControllerConfig {
        accept_startup_range_microticks: 160,
        allow_halt_due_to_clock: true,
        allow_passive_to_active_cycle_pairs: 15,
        cluster_drift_damping: 2,
        channel_a: true,
        channel_b: true,
        decoding_correction_microticks: 56,
        delay_compensation_a_microticks: 28,
        delay_compensation_b_microticks: 28,
        key_slot_id: key_slot,
        key_slot_used_for_startup: true,
        key_slot_used_for_sync: true,
        latest_tx_minislot: 226,
        listen_timeout: 401_202,
        macro_initial_offset_a: 7,
        macro_initial_offset_b: 7,
        micro_initial_offset_a: 36,
        micro_initial_offset_b: 36,
        micro_per_cycle: 200_000,
        offset_correction_out_microticks: 189,
        rate_correction_out_microticks: 601,
        wakeup_pattern: 55,
        ..ControllerConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_configs_are_valid() {
        let cluster = example_cluster_config();
        cluster.validate().unwrap();
        example_controller_config(1).validate(&cluster).unwrap();
        assert_eq!(cluster.static_payload_bytes(), 134);
    }
}
