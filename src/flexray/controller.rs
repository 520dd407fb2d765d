//! FlexRay communication controller
//!
//! A [`FlexRayController`] drives one E-Ray core on a device through register
//! reads and writes. Configuration is held host-side and programmed into the core
//! lazily: [`start`](FlexRayController::start) brings the core to POC:ready
//! (reconfiguring it when the configuration changed) and issues RUN.
//!
//! Whether a node originates network timing is decided by its configuration:
//! only a node with `allow_coldstart` set and its key slot used for both startup
//! and sync is a coldstart candidate. Every other node integrates into a running
//! network and never transmits before it has synchronized.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::cluster::{ClusterConfig, FlexRayCluster};
use super::poc::{PocCommand, PocStatus};
use super::registers::{
    self, ENDIANNESS_MAGIC, ERayRegister, IBCR_IBSYH, LOCK_SEQUENCE, MHDS_CRAM, MessageBuffer,
    SUCC1_CMD_MASK, SUCC1_PBSY,
};
use crate::message::flexray::{
    FlexRayChannel, FlexRayMessage, MAX_PAYLOAD_BYTES, MAX_SLOT_ID, is_valid_repetition,
};
use crate::network::NetId;
use crate::{DeviceError, Result};

/// Register-level access to the E-Ray cores of one device.
///
/// Implemented by the device session; requests travel as internal
/// `FlexRayControl` messages and are correlated with their responses.
#[async_trait::async_trait]
pub trait RegisterAccess: Send + Sync {
    async fn read_register(&self, controller: u8, register: ERayRegister) -> Result<u32>;
    async fn write_register(
        &self,
        controller: u8,
        register: ERayRegister,
        value: u32,
    ) -> Result<()>;
    async fn write_message_buffer(&self, controller: u8, buffer: u16, data: Vec<u8>) -> Result<()>;
    /// Whether the owning device is online. Configuration is locked while it is.
    fn is_online(&self) -> bool;
}

/// Per-node FlexRay parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub accept_startup_range_microticks: u16,
    pub allow_halt_due_to_clock: bool,
    pub allow_passive_to_active_cycle_pairs: u8,
    pub cluster_drift_damping: u8,
    pub channel_a: bool,
    pub channel_b: bool,
    pub decoding_correction_microticks: u8,
    pub delay_compensation_a_microticks: u8,
    pub delay_compensation_b_microticks: u8,
    pub extern_offset_correction_control: u8,
    pub extern_rate_correction_control: u8,
    pub extern_offset_correction_microticks: u8,
    pub extern_rate_correction_microticks: u8,
    pub key_slot_id: u16,
    pub key_slot_only_enabled: bool,
    pub key_slot_used_for_startup: bool,
    pub key_slot_used_for_sync: bool,
    pub latest_tx_minislot: u16,
    /// pdListenTimeout, in macroticks
    pub listen_timeout: u32,
    pub macro_initial_offset_a: u8,
    pub macro_initial_offset_b: u8,
    pub micro_initial_offset_a: u8,
    pub micro_initial_offset_b: u8,
    pub micro_per_cycle: u32,
    pub mts_on_a: bool,
    pub mts_on_b: bool,
    pub offset_correction_out_microticks: u16,
    pub rate_correction_out_microticks: u16,
    pub second_key_slot_id: u16,
    pub two_key_slot_mode: bool,
    pub wakeup_pattern: u8,
    pub wakeup_on_channel_b: bool,
}

impl ControllerConfig {
    pub fn validate(&self, cluster: &ClusterConfig) -> Result<()> {
        let fail = |reason: String| Err(DeviceError::configuration(reason));
        let static_slots = cluster.number_of_static_slots;

        if !self.channel_a && !self.channel_b {
            return fail("controller must use channel A, channel B or both".into());
        }
        if self.key_slot_used_for_startup && !self.key_slot_used_for_sync {
            return fail("a startup key slot must also be used for sync".into());
        }
        if self.uses_key_slot() && !(1..=static_slots).contains(&self.key_slot_id) {
            return fail(format!(
                "key slot {} is not one of the {} static slots",
                self.key_slot_id, static_slots
            ));
        }
        if self.two_key_slot_mode {
            if !(1..=static_slots).contains(&self.second_key_slot_id) {
                return fail(format!(
                    "second key slot {} is not one of the {} static slots",
                    self.second_key_slot_id, static_slots
                ));
            }
            if self.second_key_slot_id == self.key_slot_id {
                return fail("two-key-slot mode needs two distinct key slots".into());
            }
        }
        let offsets = [("A", self.macro_initial_offset_a), ("B", self.macro_initial_offset_b)];
        for (name, offset) in offsets {
            if !(2..=72).contains(&offset) {
                return fail(format!(
                    "macro_initial_offset_{} {} outside 2..=72",
                    name.to_lowercase(),
                    offset
                ));
            }
        }
        if self.micro_per_cycle == 0 {
            return fail("micro_per_cycle must be non-zero".into());
        }
        if self.listen_timeout == 0 {
            return fail("listen_timeout must be non-zero".into());
        }
        Ok(())
    }

    /// Whether a key slot frame is transmitted.
    pub fn uses_key_slot(&self) -> bool {
        self.key_slot_used_for_sync || self.key_slot_only_enabled
    }

    pub fn key_slots(&self) -> Vec<u16> {
        let mut slots = Vec::new();
        if self.key_slot_id != 0 {
            slots.push(self.key_slot_id);
        }
        if self.two_key_slot_mode && self.second_key_slot_id != 0 {
            slots.push(self.second_key_slot_id);
        }
        slots
    }
}

/// Host-side view of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    Unconfigured,
    Configured,
    /// RUN issued as a coldstart candidate
    ColdstartPending,
    /// RUN issued, integrating into a running network
    Listening,
    /// Integrated, not transmitting (POC:normal passive)
    Synchronized,
    /// POC:normal active
    Active,
    Halted,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Polling and command timing.
#[derive(Debug, Clone, Copy)]
pub struct ControllerTiming {
    pub command_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ControllerTiming {
    fn default() -> Self {
        Self { command_timeout: Duration::from_millis(50), poll_interval: Duration::from_millis(1) }
    }
}

#[derive(Debug)]
struct Inner {
    cluster: Option<Arc<FlexRayCluster>>,
    config: Option<ControllerConfig>,
    user_buffers: Vec<MessageBuffer>,
    /// Buffers as last programmed into the core, in buffer index order.
    programmed: Vec<MessageBuffer>,
    state: ControllerState,
    allow_coldstart: bool,
    start_when_going_online: bool,
    wakeup_before_start: bool,
    dirty: bool,
    last_seen_running: bool,
}

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

pub struct FlexRayController {
    index: u8,
    network: NetId,
    /// Process-unique key for cluster key slot claims.
    instance: u64,
    owner: String,
    access: Arc<dyn RegisterAccess>,
    timing: ControllerTiming,
    inner: Mutex<Inner>,
    sequence: tokio::sync::Mutex<()>,
}

impl fmt::Debug for FlexRayController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlexRayController")
            .field("owner", &self.owner)
            .field("network", &self.network)
            .field("state", &self.state())
            .finish()
    }
}

impl FlexRayController {
    pub fn new(
        index: u8,
        network: NetId,
        owner: impl Into<String>,
        access: Arc<dyn RegisterAccess>,
        timing: ControllerTiming,
    ) -> Self {
        Self {
            index,
            network,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            owner: owner.into(),
            access,
            timing,
            inner: Mutex::new(Inner {
                cluster: None,
                config: None,
                user_buffers: Vec::new(),
                programmed: Vec::new(),
                state: ControllerState::Unconfigured,
                allow_coldstart: false,
                start_when_going_online: false,
                wakeup_before_start: false,
                dirty: false,
                last_seen_running: false,
            }),
            sequence: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn network(&self) -> NetId {
        self.network
    }

    /// Display name, `<serial>/<index>`. Not unique across sessions on one unit.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn state(&self) -> ControllerState {
        self.lock().state
    }

    fn ensure_mutable(&self, operation: &str) -> Result<()> {
        if self.access.is_online() {
            return Err(DeviceError::contract(
                operation,
                "controller configuration is locked while the device is online",
            ));
        }
        Ok(())
    }

    /// Bind this controller to `cluster` with `config`.
    ///
    /// Rejected while the device is online and outside Unconfigured/Configured.
    /// The key slots are claimed in the cluster; a slot already claimed by another
    /// controller fails with a configuration error and leaves the previous
    /// configuration in place.
    pub fn set_configuration(
        &self,
        cluster: Arc<FlexRayCluster>,
        config: ControllerConfig,
    ) -> Result<()> {
        self.ensure_mutable("set_configuration")?;
        let state = self.state();
        if !matches!(state, ControllerState::Unconfigured | ControllerState::Configured) {
            return Err(DeviceError::contract(
                "set_configuration",
                format!("controller is {}", state),
            ));
        }
        config.validate(cluster.config())?;
        cluster.claim_key_slots(self.instance, &self.owner, &config.key_slots())?;

        let previous = {
            let mut inner = self.lock();
            inner.config = Some(config);
            inner.dirty = true;
            inner.state = ControllerState::Configured;
            inner.cluster.replace(cluster.clone())
        };
        if let Some(previous) = previous.filter(|previous| !Arc::ptr_eq(previous, &cluster)) {
            previous.release_key_slots(self.instance);
        }
        debug!(owner = %self.owner, "FlexRay configuration set");
        Ok(())
    }

    pub fn configuration(&self) -> Option<(ClusterConfig, ControllerConfig)> {
        let inner = self.lock();
        Some((inner.cluster.as_ref()?.config().clone(), inner.config.clone()?))
    }

    pub fn cluster(&self) -> Option<Arc<FlexRayCluster>> {
        self.lock().cluster.clone()
    }

    pub fn allow_coldstart(&self) -> bool {
        self.lock().allow_coldstart
    }

    pub fn set_allow_coldstart(&self, enable: bool) -> Result<()> {
        self.ensure_mutable("set_allow_coldstart")?;
        self.lock().allow_coldstart = enable;
        Ok(())
    }

    pub fn start_when_going_online(&self) -> bool {
        self.lock().start_when_going_online
    }

    pub fn set_start_when_going_online(&self, enable: bool) -> Result<()> {
        self.ensure_mutable("set_start_when_going_online")?;
        self.lock().start_when_going_online = enable;
        Ok(())
    }

    pub fn wakeup_before_start(&self) -> bool {
        self.lock().wakeup_before_start
    }

    pub fn set_wakeup_before_start(&self, enable: bool) -> Result<()> {
        self.ensure_mutable("set_wakeup_before_start")?;
        self.lock().wakeup_before_start = enable;
        Ok(())
    }

    /// Coldstart candidates originate network timing from their key slot.
    pub fn is_coldstart_candidate(&self) -> bool {
        let inner = self.lock();
        inner.allow_coldstart
            && inner
                .config
                .as_ref()
                .is_some_and(|c| c.key_slot_used_for_startup && c.key_slot_used_for_sync)
    }

    pub fn add_message_buffer(&self, buffer: MessageBuffer) -> Result<()> {
        self.ensure_mutable("add_message_buffer")?;
        if buffer.frame_id > MAX_SLOT_ID {
            return Err(DeviceError::configuration(format!(
                "frame id {} exceeds {}",
                buffer.frame_id, MAX_SLOT_ID
            )));
        }
        if !is_valid_repetition(buffer.cycle_repetition)
            || buffer.base_cycle >= buffer.cycle_repetition
        {
            return Err(DeviceError::configuration(format!(
                "base cycle {} with repetition {} is not a valid cycle filter",
                buffer.base_cycle, buffer.cycle_repetition
            )));
        }
        if buffer.frame_length_bytes as usize > MAX_PAYLOAD_BYTES {
            return Err(DeviceError::configuration(format!(
                "{} byte buffer exceeds {}",
                buffer.frame_length_bytes, MAX_PAYLOAD_BYTES
            )));
        }
        if buffer.is_startup && !buffer.is_sync {
            return Err(DeviceError::configuration("a startup buffer must also be a sync buffer"));
        }
        let mut inner = self.lock();
        if inner.user_buffers.len() >= registers::MAX_MESSAGE_BUFFERS {
            return Err(DeviceError::configuration("all message buffers are in use"));
        }
        inner.user_buffers.push(buffer);
        inner.dirty = true;
        Ok(())
    }

    pub fn clear_message_buffers(&self) -> Result<()> {
        self.ensure_mutable("clear_message_buffers")?;
        let mut inner = self.lock();
        inner.user_buffers.clear();
        inner.dirty = true;
        Ok(())
    }

    /// Buffers in the order they will be programmed: key slot buffers first, then
    /// user buffers. A user buffer on a key slot replaces the default key slot
    /// buffer and has the key slot rules applied to it.
    pub fn message_buffers(&self) -> Vec<MessageBuffer> {
        let inner = self.lock();
        let (Some(cluster), Some(config)) = (&inner.cluster, &inner.config) else {
            return inner.user_buffers.clone();
        };
        let mut buffers = key_slot_buffers(cluster.config(), config);
        for user in &inner.user_buffers {
            match buffers.iter_mut().find(|key| key.frame_id == user.frame_id && key.is_transmit) {
                Some(key) => {
                    *key = MessageBuffer {
                        is_startup: key.is_startup,
                        is_sync: key.is_sync,
                        is_transmit: true,
                        channel_a: key.channel_a,
                        channel_b: key.channel_b,
                        is_dynamic: false,
                        ..user.clone()
                    }
                }
                None => buffers.push(user.clone()),
            }
        }
        buffers.truncate(registers::MAX_MESSAGE_BUFFERS);
        buffers
    }

    fn require_configuration(&self) -> Result<(ClusterConfig, ControllerConfig)> {
        self.configuration().ok_or_else(|| {
            DeviceError::configuration(format!(
                "FlexRay controller {} has no configuration",
                self.owner
            ))
        })
    }

    async fn read(&self, register: ERayRegister) -> Result<u32> {
        self.access.read_register(self.index, register).await
    }

    async fn write(&self, register: ERayRegister, value: u32) -> Result<()> {
        trace!(
            owner = %self.owner,
            ?register,
            value = format_args!("{:#010x}", value),
            "Register write"
        );
        self.access.write_register(self.index, register, value).await
    }

    /// Read `register` until `done` accepts its value or the command timeout expires.
    async fn poll_register(
        &self,
        register: ERayRegister,
        what: &str,
        done: impl Fn(u32) -> bool,
    ) -> Result<u32> {
        let deadline = Instant::now() + self.timing.command_timeout;
        loop {
            let value = self.read(register).await?;
            if done(value) {
                return Ok(value);
            }
            if Instant::now() >= deadline {
                return Err(DeviceError::timeout(what, self.timing.command_timeout));
            }
            tokio::time::sleep(self.timing.poll_interval).await;
        }
    }

    pub async fn poc_status(&self) -> Result<PocStatus> {
        let ccsv = self.read(ERayRegister::Ccsv).await?;
        PocStatus::from_ccsv(ccsv).ok_or_else(|| {
            let code = ccsv & PocStatus::CCSV_MASK;
            DeviceError::decode("CCSV", format!("unknown POC status {:#04x}", code))
        })
    }

    /// Write a POC command into SUCC1, preserving the configuration bits.
    async fn command(&self, command: PocCommand, check: bool) -> Result<()> {
        let succ1 = self.read(ERayRegister::Succ1).await?;
        self.write(ERayRegister::Succ1, (succ1 & !SUCC1_CMD_MASK) | command.code() as u32).await?;
        if !check {
            return Ok(());
        }

        let succ1 = self
            .poll_register(ERayRegister::Succ1, "POC command", |v| v & SUCC1_PBSY == 0)
            .await?;
        if succ1 & SUCC1_CMD_MASK == PocCommand::CommandNotAccepted.code() as u32 {
            let status = match self.poc_status().await {
                Ok(status) => status.to_string(),
                Err(_) => "unknown".into(),
            };
            return Err(DeviceError::configuration(format!(
                "POC command {:?} not accepted in state {}",
                command, status
            )));
        }

        let mut inner = self.lock();
        match command {
            PocCommand::Run => inner.last_seen_running = true,
            PocCommand::Halt | PocCommand::Freeze => {
                inner.last_seen_running = false;
                inner.state = ControllerState::Halted;
            }
            _ => {}
        }
        Ok(())
    }

    async fn enter_config(&self) -> Result<()> {
        if !self.poc_status().await?.accepts_config() {
            self.command(PocCommand::Freeze, true).await?;
        }
        // The first CONFIG leaves HALT for DEFAULT_CONFIG, the second enters CONFIG.
        self.command(PocCommand::Config, true).await?;
        self.command(PocCommand::Config, true).await
    }

    async fn lock_configuration(&self) -> Result<()> {
        for step in LOCK_SEQUENCE {
            self.write(ERayRegister::Lck, step).await?;
        }
        self.command(PocCommand::Ready, true).await
    }

    /// Program the core from the host-side configuration. Leaves it in POC:config.
    pub async fn configure(&self) -> Result<()> {
        let _sequence = self.sequence.lock().await;
        self.configure_locked().await
    }

    async fn configure_locked(&self) -> Result<()> {
        let (cluster, config) = self.require_configuration()?;
        if self.poc_status().await? != PocStatus::Config {
            self.enter_config().await?;
        }

        self.command(PocCommand::ClearRams, true).await?;
        self.poll_register(ERayRegister::Mhds, "CLEAR_RAMS", |v| v & MHDS_CRAM == 0).await?;

        for (register, value) in registers::configuration_image(&cluster, &config) {
            self.write(register, value).await?;
        }

        let buffers = self.message_buffers();
        let (mrc, headers) = registers::buffer_layout(&buffers, config.two_key_slot_mode);
        self.write(ERayRegister::Mrc, mrc).await?;
        for header in &headers {
            self.write(ERayRegister::Wrhs1, header.wrhs1).await?;
            self.write(ERayRegister::Wrhs2, header.wrhs2).await?;
            self.write(ERayRegister::Wrhs3, header.wrhs3).await?;
            self.write(ERayRegister::Ibcm, 1).await?;
            self.poll_register(ERayRegister::Ibcr, "input buffer transfer", |v| {
                v & IBCR_IBSYH == 0
            })
            .await?;
            self.write(ERayRegister::Ibcr, header.index as u32).await?;
        }

        let mut inner = self.lock();
        inner.programmed = buffers;
        inner.dirty = false;
        debug!(owner = %self.owner, buffers = headers.len(), "E-Ray configured");
        Ok(())
    }

    /// Bring the core to POC:ready, reconfiguring it first if needed.
    pub async fn get_ready(&self) -> Result<()> {
        let _sequence = self.sequence.lock().await;
        self.get_ready_locked().await
    }

    async fn get_ready_locked(&self) -> Result<()> {
        let endianness = self.read(ERayRegister::Endn).await?;
        if endianness != ENDIANNESS_MAGIC {
            return Err(DeviceError::connection_failed(format!(
                "E-Ray {} reports endianness {:#010x}",
                self.owner, endianness
            )));
        }

        let (allow_coldstart, dirty) = {
            let inner = self.lock();
            (inner.allow_coldstart, inner.dirty)
        };
        let status = self.poc_status().await?;
        if status != PocStatus::Ready || dirty {
            if status != PocStatus::Config {
                self.enter_config().await?;
            }
            if dirty {
                self.configure_locked().await?;
            }
            self.lock_configuration().await?;
        }
        if allow_coldstart {
            self.command(PocCommand::AllowColdstart, true).await?;
        }
        Ok(())
    }

    /// Ready the core, optionally wake the cluster, and issue RUN.
    ///
    /// RUN is not checked for acceptance; use
    /// [`wait_for_synchronization`](Self::wait_for_synchronization) to follow startup.
    pub async fn start(&self) -> Result<()> {
        let _sequence = self.sequence.lock().await;
        self.get_ready_locked().await?;
        if self.wakeup_before_start() {
            self.command(PocCommand::Wakeup, true).await?;
        }
        self.command(PocCommand::Run, false).await?;

        let candidate = self.is_coldstart_candidate();
        let mut inner = self.lock();
        inner.last_seen_running = true;
        inner.state = if candidate {
            ControllerState::ColdstartPending
        } else {
            ControllerState::Listening
        };
        info!(owner = %self.owner, coldstart = candidate, "FlexRay controller started");
        Ok(())
    }

    pub async fn wakeup(&self) -> Result<()> {
        self.command(PocCommand::Wakeup, true).await
    }

    pub async fn halt(&self) -> Result<()> {
        self.command(PocCommand::Halt, true).await
    }

    pub async fn freeze(&self) -> Result<()> {
        self.command(PocCommand::Freeze, true).await
    }

    /// Send a media access test symbol. Has no effect unless MTS is enabled on a channel.
    pub async fn trigger_mts(&self) -> Result<()> {
        self.command(PocCommand::SendMts, true).await
    }

    /// Read the POC state and fold it into the host-side state.
    pub async fn refresh_state(&self) -> Result<ControllerState> {
        let status = self.poc_status().await?;
        let mut inner = self.lock();
        inner.state = match status {
            PocStatus::NormalActive => ControllerState::Active,
            PocStatus::NormalPassive => ControllerState::Synchronized,
            PocStatus::Halt => ControllerState::Halted,
            _ => inner.state,
        };
        Ok(inner.state)
    }

    /// How long startup may take before giving up.
    ///
    /// Coldstart candidates get `coldstart_timeout`. Integrating nodes wait for the
    /// configured listen timeout.
    pub fn startup_timeout(&self, coldstart_timeout: Duration) -> Duration {
        if self.is_coldstart_candidate() {
            return coldstart_timeout;
        }
        match self.configuration() {
            Some((cluster, config)) => cluster.macrotick() * config.listen_timeout,
            None => coldstart_timeout,
        }
    }

    /// Wait until the core reaches a normal state.
    pub async fn wait_for_synchronization(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ControllerState> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.refresh_state().await?;
            if matches!(state, ControllerState::Active | ControllerState::Synchronized) {
                info!(owner = %self.owner, %state, "FlexRay synchronized");
                return Ok(state);
            }
            if Instant::now() >= deadline {
                warn!(owner = %self.owner, ?timeout, "FlexRay startup timed out");
                let operation = format!("FlexRay startup on {}", self.owner);
                return Err(DeviceError::timeout(operation, timeout));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(DeviceError::Closed),
                _ = tokio::time::sleep(self.timing.poll_interval) => {}
            }
        }
    }

    /// Fill every transmit buffer matching the frame's slot, cycle filter and channel.
    pub async fn transmit(&self, frame: &FlexRayMessage) -> Result<()> {
        let (restart, programmed) = {
            let inner = self.lock();
            (inner.dirty && inner.last_seen_running, inner.programmed.clone())
        };
        let programmed = if restart {
            debug!(owner = %self.owner, "Configuration changed while running, restarting");
            self.start().await?;
            self.lock().programmed.clone()
        } else {
            programmed
        };

        let wanted_filter = registers::cycle_filter(frame.cycle, frame.cycle_repetition);
        let mut filled = 0;
        for (index, buffer) in programmed.iter().enumerate() {
            if !buffer.is_transmit
                || buffer.frame_id != frame.slot_id
                || buffer.cycle_filter() != wanted_filter
            {
                continue;
            }
            let channel = FlexRayChannel::from_flags(buffer.channel_a, buffer.channel_b);
            if channel != Some(frame.channel) {
                continue;
            }
            if frame.data.len() > buffer.frame_length_bytes as usize {
                return Err(DeviceError::transmit_failed(format!(
                    "{} bytes do not fit the {} byte buffer for slot {}",
                    frame.data.len(),
                    buffer.frame_length_bytes,
                    frame.slot_id
                )));
            }
            let mut data = frame.data.clone();
            data.resize(buffer.frame_length_bytes as usize, 0);
            self.access.write_message_buffer(self.index, index as u16, data).await?;
            filled += 1;
        }

        if filled == 0 {
            return Err(DeviceError::transmit_failed(format!(
                "no transmit buffer for slot {} cycle {}/{} on channel {:?}",
                frame.slot_id, frame.cycle, frame.cycle_repetition, frame.channel
            )));
        }
        Ok(())
    }

    /// The device went offline; the core is no longer running.
    pub(crate) fn reset_after_offline(&self) {
        let mut inner = self.lock();
        inner.last_seen_running = false;
        if inner.config.is_some() {
            inner.state = ControllerState::Configured;
        }
    }
}

impl Drop for FlexRayController {
    fn drop(&mut self) {
        if let Some(cluster) = self.lock().cluster.take() {
            cluster.release_key_slots(self.instance);
        }
    }
}

fn key_slot_buffers(cluster: &ClusterConfig, config: &ControllerConfig) -> Vec<MessageBuffer> {
    if !config.uses_key_slot() {
        return Vec::new();
    }
    let first = MessageBuffer {
        is_startup: config.key_slot_used_for_startup,
        is_sync: config.key_slot_used_for_sync,
        is_transmit: true,
        frame_id: config.key_slot_id,
        channel_a: true,
        channel_b: !config.two_key_slot_mode && config.channel_b,
        frame_length_bytes: cluster.static_payload_bytes().min(MAX_PAYLOAD_BYTES) as u8,
        base_cycle: 0,
        cycle_repetition: 1,
        continuous_mode: false,
        ..MessageBuffer::default()
    };
    let mut buffers = vec![first.clone()];
    if config.two_key_slot_mode {
        buffers.push(MessageBuffer {
            channel_a: false,
            channel_b: true,
            frame_id: config.second_key_slot_id,
            ..first
        });
    }
    buffers
}
