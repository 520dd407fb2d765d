//! Simulated hardware
//!
//! [`SimulatedDevice`] is a [`Transport`] backed by a model of a unit's firmware
//! instead of a USB or network link:
//!
//! - bus frames sent while online are echoed back as transmit receipts
//! - control requests (online/offline, IO, settings, TC10) are answered
//! - E-Ray register access drives an [`ERayModel`] per FlexRay core, with startup
//!   arbitrated by a [`SimFlexRayBus`] that several units can share
//! - LiveData requests are served by a ticker per subscription
//!
//! [`SimCatalog`] lists simulated units to a [`Registry`](crate::Registry).

pub mod bus;
pub mod eray;
mod livedata;

pub use bus::{BusTransmission, SimFlexRayBus};
pub use eray::{CoreBuffer, ERayModel};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::livedata::LiveDataEngine;
use crate::catalog::{DeviceCatalog, DeviceDescriptor};
use crate::codec::{self, RawFrame};
use crate::device::{AnalogOutput, DeviceSettings, IoKind};
use crate::flexray::poc::PocStatus;
use crate::flexray::registers::ERayRegister;
use crate::message::{
    AckStatus, DeviceCommand, DeviceControlMessage, Direction, EthernetStatusMessage,
    FlexRayChannel, FlexRayControlMessage, FlexRayControlOp, FlexRayMessage, LinkSpeed, LinkState,
    Message, MessageBody,
};
use crate::network::NetId;
use crate::transport::Transport;
use crate::{DeviceError, Result};

/// Where a simulated unit's inbound traffic goes for the current session.
#[derive(Debug, Clone)]
pub(crate) struct Outbox {
    tx: mpsc::UnboundedSender<RawFrame>,
    closed: CancellationToken,
    epoch: Instant,
}

impl Outbox {
    /// Stamp `message` as received now and queue it for the host.
    pub(crate) fn push(&self, message: Message) {
        self.queue(message.with_direction(Direction::Rx));
    }

    /// Queue the transmit receipt for a frame the unit put on a bus.
    pub(crate) fn echo(&self, message: Message) {
        self.queue(message.with_direction(Direction::Tx));
    }

    fn queue(&self, message: Message) {
        if self.closed.is_cancelled() {
            return;
        }
        let timestamp_ns = self.epoch.elapsed().as_nanos().min(u64::MAX as u128) as u64;
        match codec::encode(&message.with_timestamp(timestamp_ns)) {
            Ok(frame) => {
                let _ = self.tx.send(frame);
            }
            Err(e) => warn!("Simulated unit could not encode a response: {}", e),
        }
    }
}

#[derive(Debug)]
struct Session {
    outbox: Outbox,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<RawFrame>>>,
}

#[derive(Debug)]
struct UnitState {
    online: bool,
    cores: Vec<ERayModel>,
    io: HashMap<(IoKind, u8), bool>,
    settings: DeviceSettings,
    revision: u32,
}

fn running(status: PocStatus) -> bool {
    status.is_startup() || status.is_normal()
}

/// A unit that exists only in memory.
#[derive(Debug)]
pub struct SimulatedDevice {
    descriptor: DeviceDescriptor,
    bus: Arc<SimFlexRayBus>,
    epoch: Instant,
    reachable: AtomicBool,
    session: Mutex<Option<Session>>,
    state: Mutex<UnitState>,
    livedata: LiveDataEngine,
    received: AtomicU64,
}

impl SimulatedDevice {
    /// Capabilities of a default simulated unit.
    pub fn default_descriptor(serial: impl Into<String>) -> DeviceDescriptor {
        DeviceDescriptor {
            supports_tc10: true,
            flexray_controllers: 2,
            analog_outputs: 2,
            ..DeviceDescriptor::new(serial, "vnet simulator")
        }
    }

    /// A unit on its own private FlexRay bus.
    pub fn new(descriptor: DeviceDescriptor) -> Arc<Self> {
        Self::on_bus(descriptor, SimFlexRayBus::new())
    }

    pub fn with_serial(serial: impl Into<String>) -> Arc<Self> {
        Self::new(Self::default_descriptor(serial))
    }

    /// A unit whose FlexRay cores sit on `bus`.
    pub fn on_bus(descriptor: DeviceDescriptor, bus: Arc<SimFlexRayBus>) -> Arc<Self> {
        let state = UnitState {
            online: false,
            cores: (0..descriptor.flexray_controllers).map(|_| ERayModel::new()).collect(),
            io: HashMap::new(),
            settings: DeviceSettings {
                analog_outputs: vec![AnalogOutput::default(); descriptor.analog_outputs],
            },
            revision: 1,
        };
        Arc::new(Self {
            descriptor,
            bus,
            epoch: Instant::now(),
            reachable: AtomicBool::new(true),
            session: Mutex::new(None),
            state: Mutex::new(state),
            livedata: LiveDataEngine::default(),
            received: AtomicU64::new(0),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, UnitState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn bus(&self) -> &Arc<SimFlexRayBus> {
        &self.bus
    }

    /// Make the unit refuse (or accept again) new sessions.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    /// Whether a session currently owns the unit.
    pub fn is_owned(&self) -> bool {
        self.lock_session().is_some()
    }

    pub fn is_online(&self) -> bool {
        self.lock_state().online
    }

    /// Frames received from the host.
    pub fn frames_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn live_data_subscriptions(&self) -> usize {
        self.livedata.subscription_count()
    }

    /// Inspect FlexRay core `index`.
    pub fn with_core<R>(&self, index: usize, inspect: impl FnOnce(&ERayModel) -> R) -> Option<R> {
        self.lock_state().cores.get(index).map(inspect)
    }

    /// Drive a digital input, as the outside world would.
    pub fn set_digital_input(&self, kind: IoKind, index: u8, value: bool) {
        self.lock_state().io.insert((kind, index), value);
    }

    /// Change settings behind the host's back, bumping the revision.
    pub fn edit_settings(&self, edit: impl FnOnce(&mut DeviceSettings)) -> u32 {
        let mut state = self.lock_state();
        edit(&mut state.settings);
        state.revision += 1;
        state.revision
    }

    pub fn settings_revision(&self) -> u32 {
        self.lock_state().revision
    }

    fn node_name(&self, core: usize) -> String {
        format!("{}/{}", self.descriptor.serial, core)
    }

    fn outbox(&self) -> Option<Outbox> {
        self.lock_session().as_ref().map(|session| session.outbox.clone())
    }

    /// Leave the bus on every running core.
    fn stop_cores(&self, state: &mut UnitState) {
        for (index, core) in state.cores.iter_mut().enumerate() {
            if running(core.status()) {
                core.set_status(PocStatus::Halt);
                self.bus.leave(&self.node_name(index));
            }
        }
    }

    fn handle(&self, message: Message, outbox: &Outbox) {
        match message.body {
            MessageBody::Can(_) | MessageBody::Ethernet(_) | MessageBody::Spi(_) => {
                if self.lock_state().online {
                    outbox.echo(message);
                } else {
                    debug!(
                        serial = %self.descriptor.serial,
                        network = %message.network,
                        "Dropping frame sent while offline"
                    );
                }
            }
            MessageBody::DeviceControl(control) => {
                let went_online = control.command == DeviceCommand::SetOnline && !self.is_online();
                let command = self.device_control(control.command);
                outbox.push(Message::new(
                    NetId::DeviceControl,
                    DeviceControlMessage::new(control.request_id, command),
                ));
                if went_online && self.is_online() {
                    let link = EthernetStatusMessage {
                        state: LinkState::Up,
                        speed: LinkSpeed::Speed100M,
                        ..Default::default()
                    };
                    outbox.push(Message::new(NetId::Ethernet01, link));
                }
            }
            MessageBody::FlexRayControl(control) => {
                let op = self.flexray_control(control.controller as usize, control.op, outbox);
                outbox.push(Message::new(
                    NetId::FlexRayControl,
                    FlexRayControlMessage::new(control.controller, control.request_id, op),
                ));
            }
            MessageBody::LiveDataCommand(command) => {
                self.livedata.handle_command(&command, outbox);
            }
            MessageBody::LiveDataSetValue(request) => {
                self.livedata.handle_set_value(&request, outbox);
            }
            other => {
                debug!(
                    serial = %self.descriptor.serial,
                    message_type = ?other.message_type(),
                    "Ignoring unexpected frame"
                );
            }
        }
    }

    fn device_control(&self, command: DeviceCommand) -> DeviceCommand {
        let mut state = self.lock_state();
        match command {
            DeviceCommand::SetOnline => {
                if !state.online {
                    state.online = true;
                    info!(serial = %self.descriptor.serial, "Simulated unit online");
                }
                DeviceCommand::Ack(AckStatus::Ok)
            }
            DeviceCommand::SetOffline => {
                state.online = false;
                self.stop_cores(&mut state);
                DeviceCommand::Ack(AckStatus::Ok)
            }
            DeviceCommand::ReadDigitalIo { kind, index } => {
                if index == 0 {
                    return DeviceCommand::Ack(AckStatus::Rejected);
                }
                let value = state.io.get(&(kind, index)).copied().unwrap_or(false);
                DeviceCommand::DigitalIo { kind, index, value }
            }
            DeviceCommand::WriteDigitalIo { kind, index, value } => {
                if index == 0 || kind.is_input() {
                    return DeviceCommand::Ack(AckStatus::Rejected);
                }
                state.io.insert((kind, index), value);
                DeviceCommand::Ack(AckStatus::Ok)
            }
            DeviceCommand::ReadSettings => DeviceCommand::Settings {
                revision: state.revision,
                settings: state.settings.clone(),
            },
            DeviceCommand::WriteSettings { base_revision, settings } => {
                if base_revision != state.revision {
                    return DeviceCommand::Ack(AckStatus::Conflict { revision: state.revision });
                }
                if settings.analog_outputs.len() != self.descriptor.analog_outputs {
                    return DeviceCommand::Ack(AckStatus::Rejected);
                }
                state.settings = settings;
                state.revision += 1;
                DeviceCommand::Settings {
                    revision: state.revision,
                    settings: state.settings.clone(),
                }
            }
            DeviceCommand::Tc10 { .. } if !self.descriptor.supports_tc10 => {
                DeviceCommand::Ack(AckStatus::Unsupported)
            }
            DeviceCommand::Tc10 { .. } => DeviceCommand::Ack(AckStatus::Ok),
            DeviceCommand::DigitalIo { .. }
            | DeviceCommand::Settings { .. }
            | DeviceCommand::Ack(_) => DeviceCommand::Ack(AckStatus::Rejected),
        }
    }

    fn flexray_control(
        &self,
        index: usize,
        op: FlexRayControlOp,
        outbox: &Outbox,
    ) -> FlexRayControlOp {
        let name = self.node_name(index);
        let mut state = self.lock_state();
        let online = state.online;
        let Some(core) = state.cores.get_mut(index) else {
            return FlexRayControlOp::Ack { accepted: false };
        };

        // Startup progress lives on the bus.
        if running(core.status())
            && let Some(status) = self.bus.status(&name)
        {
            core.set_status(status);
        }

        match op {
            FlexRayControlOp::ReadRegister { register } => {
                FlexRayControlOp::RegisterValue { register, value: core.read(register) }
            }
            FlexRayControlOp::WriteRegister { register, value } => {
                let was_running = running(core.status());
                let runs = core.run_count();
                core.write(register, value);
                if register == ERayRegister::Succ1.address() {
                    if core.run_count() != runs {
                        let coldstart = core.is_coldstart_node();
                        self.bus.run(&name, coldstart, core.key_slot(), core.sends_sync());
                    } else if was_running && !running(core.status()) {
                        self.bus.leave(&name);
                    }
                }
                FlexRayControlOp::Ack { accepted: true }
            }
            FlexRayControlOp::WriteMessageBuffer { buffer, data } => {
                let accepted = online
                    && core.status() == PocStatus::NormalActive
                    && core
                        .buffer(buffer)
                        .is_some_and(|b| b.transmit && data.len() <= b.length_bytes as usize);
                if accepted && let Some(target) = core.buffer(buffer).copied() {
                    let (base, repetition) = split_cycle_filter(target.cycle_filter);
                    let channel = FlexRayChannel::from_flags(target.channel_a, target.channel_b)
                        .unwrap_or(FlexRayChannel::A);
                    let network = NetId::flexray(index).unwrap_or(NetId::FlexRay01);
                    let frame = FlexRayMessage::new(target.frame_id, channel, data)
                        .with_cycle(base, repetition);
                    outbox.echo(Message::new(network, frame));
                    self.bus.transmit(&name, target.frame_id);
                }
                FlexRayControlOp::Ack { accepted }
            }
            FlexRayControlOp::RegisterValue { .. } | FlexRayControlOp::Ack { .. } => {
                FlexRayControlOp::Ack { accepted: false }
            }
        }
    }
}

/// Base cycle and repetition from a cycle filter code.
fn split_cycle_filter(filter: u16) -> (u8, u8) {
    let filter = filter & 0x7F;
    if filter == 0 {
        return (0, 1);
    }
    let repetition = 1u16 << (15 - filter.leading_zeros());
    ((filter & !repetition) as u8, repetition as u8)
}

#[async_trait::async_trait]
impl Transport for SimulatedDevice {
    async fn open(&self) -> Result<()> {
        if !self.reachable.load(Ordering::Acquire) {
            let reason = format!("{} is not reachable", self.descriptor.serial);
            return Err(DeviceError::connection_failed(reason));
        }
        let mut session = self.lock_session();
        if session.is_some() {
            let reason = format!("{} is already in use", self.descriptor.serial);
            return Err(DeviceError::connection_failed(reason));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *session = Some(Session {
            outbox: Outbox { tx, closed: CancellationToken::new(), epoch: self.epoch },
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        });
        debug!(serial = %self.descriptor.serial, "Simulated unit opened");
        Ok(())
    }

    async fn send(&self, frame: RawFrame) -> Result<()> {
        let outbox = self.outbox().ok_or_else(|| {
            DeviceError::transmit_failed(format!("{} is not open", self.descriptor.serial))
        })?;
        self.received.fetch_add(1, Ordering::Relaxed);
        match codec::decode(&frame) {
            Ok(message) => self.handle(message, &outbox),
            Err(e) => warn!(
                serial = %self.descriptor.serial,
                "Simulated unit dropped a malformed frame: {}", e
            ),
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Option<RawFrame>> {
        let (rx, closed) = match self.lock_session().as_ref() {
            Some(session) => (session.rx.clone(), session.outbox.closed.clone()),
            None => return Ok(None),
        };
        let mut rx = tokio::select! {
            _ = closed.cancelled() => return Ok(None),
            rx = rx.lock() => rx,
        };
        tokio::select! {
            _ = closed.cancelled() => Ok(None),
            frame = rx.recv() => Ok(frame),
        }
    }

    fn close(&self) {
        let Some(session) = self.lock_session().take() else {
            return;
        };
        session.outbox.closed.cancel();
        self.livedata.stop_all();
        let mut state = self.lock_state();
        state.online = false;
        self.stop_cores(&mut state);
        debug!(serial = %self.descriptor.serial, "Simulated unit released");
    }
}

/// Catalog of simulated units.
#[derive(Debug, Default)]
pub struct SimCatalog {
    units: Vec<Arc<SimulatedDevice>>,
}

impl SimCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default units with the given serials, each on a private bus.
    pub fn with_units<I, S>(serials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { units: serials.into_iter().map(SimulatedDevice::with_serial).collect() }
    }

    /// Default units with the given serials, all on `bus`.
    pub fn on_bus<I, S>(bus: &Arc<SimFlexRayBus>, serials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let units = serials
            .into_iter()
            .map(|serial| {
                SimulatedDevice::on_bus(SimulatedDevice::default_descriptor(serial), bus.clone())
            })
            .collect();
        Self { units }
    }

    pub fn add(&mut self, unit: Arc<SimulatedDevice>) {
        self.units.push(unit);
    }

    pub fn unit(&self, serial: &str) -> Option<&Arc<SimulatedDevice>> {
        self.units.iter().find(|unit| unit.descriptor.serial == serial)
    }
}

#[async_trait::async_trait]
impl DeviceCatalog for SimCatalog {
    async fn find_all_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self.units.iter().map(|unit| unit.descriptor.clone()).collect())
    }

    async fn connect(&self, descriptor: &DeviceDescriptor) -> Result<Arc<dyn Transport>> {
        let unit = self.unit(&descriptor.serial).ok_or_else(|| {
            DeviceError::not_found(format!("simulated device {}", descriptor.serial))
        })?;
        Ok(unit.clone())
    }
}
