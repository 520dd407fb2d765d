//! Device session
//!
//! A [`Device`] owns one transport, one router and the FlexRay controllers of a
//! unit. Its lifecycle is `Closed -> Opened -> Online -> Closed`:
//!
//! - [`open`](Device::open) acquires the transport and starts the receive loop
//! - [`go_online`](Device::go_online) arms frame flow and runs FlexRay startup
//! - [`go_offline`](Device::go_offline) returns to Opened
//! - [`close`](Device::close) releases everything, from any state, any number of times
//!
//! Operations that fail record their error text, retrievable through
//! [`last_error`](Device::last_error) and through the owning
//! [`Registry`](crate::Registry). The boolean forms ([`transmit`](Device::transmit),
//! the LiveData operations) never panic and never abort the caller's loop.

mod dispatch;
mod io;
mod settings;

pub use io::IoKind;
pub use settings::{AnalogOutput, AnalogVoltage, DeviceSettings, SettingsSnapshot};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::dispatch::{DispatchContext, PendingRequests};
use crate::catalog::DeviceDescriptor;
use crate::codec;
use crate::config::SessionConfig;
use crate::filter::MessageFilter;
use crate::flexray::{ControllerState, ERayRegister, FlexRayController, RegisterAccess};
use crate::livedata::{
    HandleGenerator, LiveDataCommand, LiveDataHandle, LiveDataTracker, LiveDataValueType,
};
use crate::message::{
    DeviceCommand, DeviceControlMessage, FlexRayControlMessage, FlexRayControlOp,
    LiveDataCommandMessage, LiveDataSetValueMessage, LiveDataStatusMessage, Message, MessageBody,
    MessageType,
};
use crate::network::NetId;
use crate::router::{MessageRouter, MessageSink, SubscriptionId};
use crate::stream::MessageStream;
use crate::transport::Transport;
use crate::{DeviceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Closed,
    Opened,
    Online,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Shared last-error slot.
pub(crate) type ErrorSlot = Arc<Mutex<Option<String>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between the device handle, its controllers and its receive loop.
pub(crate) struct DeviceShared {
    descriptor: DeviceDescriptor,
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    router: Arc<MessageRouter>,
    tracker: Arc<LiveDataTracker>,
    pending: Arc<PendingRequests>,
    handles: Arc<HandleGenerator>,
    state: Mutex<DeviceState>,
    online: AtomicBool,
    session: Mutex<CancellationToken>,
    settings: Mutex<Option<SettingsSnapshot>>,
    last_error: Mutex<Option<String>>,
    registry_error: Option<ErrorSlot>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl DeviceShared {
    fn state(&self) -> DeviceState {
        *lock(&self.state)
    }

    fn set_state(&self, state: DeviceState) {
        *lock(&self.state) = state;
        self.online.store(state == DeviceState::Online, Ordering::Release);
    }

    /// Move from `from` to `to` unless the state changed or `session` ended meanwhile.
    fn advance(&self, from: DeviceState, to: DeviceState, session: &CancellationToken) -> bool {
        let mut state = lock(&self.state);
        if *state != from || session.is_cancelled() {
            return false;
        }
        *state = to;
        self.online.store(to == DeviceState::Online, Ordering::Release);
        true
    }

    fn session_token(&self) -> CancellationToken {
        lock(&self.session).clone()
    }

    pub(crate) fn record_error(&self, error: &DeviceError) {
        let text = error.to_string();
        debug!(serial = %self.descriptor.serial, error = %text, "Device operation failed");
        if let Some(slot) = &self.registry_error {
            *lock(slot) = Some(text.clone());
        }
        *lock(&self.last_error) = Some(text);
    }

    /// Record `result`'s error, if any, and pass it through.
    pub(crate) fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            self.record_error(error);
        }
        result
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.state() == DeviceState::Closed {
            return Err(DeviceError::contract(operation, "device is not open"));
        }
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let frame = codec::encode(message)?;
        self.transport.send(frame).await
    }

    /// Send a control request and wait for the response carrying its request id.
    async fn exchange(
        &self,
        operation: &str,
        timeout: Duration,
        build: impl FnOnce(u32) -> Message,
    ) -> Result<Message> {
        self.ensure_open(operation)?;
        let cancel = self.session_token();
        let (id, response) = self.pending.register();
        if let Err(e) = self.send(&build(id)).await {
            self.pending.forget(id);
            return Err(e);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(DeviceError::Closed),
            response = tokio::time::timeout(timeout, response) => match response {
                Ok(Ok(message)) => Ok(message),
                Ok(Err(_)) => Err(DeviceError::Closed),
                Err(_) => Err(DeviceError::timeout(operation, timeout)),
            },
        };
        if result.is_err() {
            self.pending.forget(id);
        }
        result
    }

    pub(crate) async fn device_request(
        &self,
        operation: &str,
        command: DeviceCommand,
    ) -> Result<DeviceCommand> {
        self.device_request_within(operation, command, self.config.request_timeout).await
    }

    async fn device_request_within(
        &self,
        operation: &str,
        command: DeviceCommand,
        timeout: Duration,
    ) -> Result<DeviceCommand> {
        let response = self
            .exchange(operation, timeout, |id| {
                Message::new(NetId::DeviceControl, DeviceControlMessage::new(id, command))
            })
            .await?;
        match response.body {
            MessageBody::DeviceControl(control) => Ok(control.command),
            other => Err(unexpected_response(operation, &other)),
        }
    }

    async fn flexray_request(
        &self,
        controller: u8,
        op: FlexRayControlOp,
    ) -> Result<FlexRayControlOp> {
        let response = self
            .exchange("FlexRay control", self.config.request_timeout, |id| {
                Message::new(NetId::FlexRayControl, FlexRayControlMessage::new(controller, id, op))
            })
            .await?;
        match response.body {
            MessageBody::FlexRayControl(control) => Ok(control.op),
            other => Err(unexpected_response("FlexRay control", &other)),
        }
    }
}

fn unexpected_response(operation: &str, body: &MessageBody) -> DeviceError {
    DeviceError::decode(operation, format!("unexpected {:?} response", body.message_type()))
}

fn unexpected_command(operation: &str, command: &DeviceCommand) -> DeviceError {
    DeviceError::decode(operation, format!("unexpected response {:?}", command))
}

#[async_trait::async_trait]
impl RegisterAccess for DeviceShared {
    async fn read_register(&self, controller: u8, register: ERayRegister) -> Result<u32> {
        let address = register.address();
        let op = FlexRayControlOp::ReadRegister { register: address };
        match self.flexray_request(controller, op).await? {
            FlexRayControlOp::RegisterValue { register, value } if register == address => Ok(value),
            FlexRayControlOp::Ack { accepted: false } => Err(DeviceError::not_found(format!(
                "FlexRay controller {} on this unit",
                controller
            ))),
            other => Err(unexpected_op("register read", &other)),
        }
    }

    async fn write_register(
        &self,
        controller: u8,
        register: ERayRegister,
        value: u32,
    ) -> Result<()> {
        let op = FlexRayControlOp::WriteRegister { register: register.address(), value };
        match self.flexray_request(controller, op).await? {
            FlexRayControlOp::Ack { accepted: true } => Ok(()),
            FlexRayControlOp::Ack { accepted: false } => {
                Err(DeviceError::configuration(format!("register {:?} write rejected", register)))
            }
            other => Err(unexpected_op("register write", &other)),
        }
    }

    async fn write_message_buffer(&self, controller: u8, buffer: u16, data: Vec<u8>) -> Result<()> {
        let op = FlexRayControlOp::WriteMessageBuffer { buffer, data };
        match self.flexray_request(controller, op).await? {
            FlexRayControlOp::Ack { accepted: true } => Ok(()),
            FlexRayControlOp::Ack { accepted: false } => {
                Err(DeviceError::transmit_failed(format!("message buffer {} not accepted", buffer)))
            }
            other => Err(unexpected_op("message buffer write", &other)),
        }
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }
}

fn unexpected_op(operation: &str, op: &FlexRayControlOp) -> DeviceError {
    DeviceError::decode(operation, format!("unexpected response {:?}", op))
}

/// A session with one unit.
///
/// Dropping the device closes it.
pub struct Device {
    shared: Arc<DeviceShared>,
    flexray: Vec<Arc<FlexRayController>>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("descriptor", &self.shared.descriptor)
            .field("state", &self.state())
            .field("flexray", &self.flexray.len())
            .finish()
    }
}

impl Device {
    /// A standalone session.
    ///
    /// Devices created through a [`Registry`](crate::Registry) share its LiveData
    /// handle generator and last-error slot; this constructor gets its own.
    pub fn new(
        descriptor: DeviceDescriptor,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> Self {
        Self::with_context(descriptor, transport, config, Arc::new(HandleGenerator::new()), None)
    }

    pub(crate) fn with_context(
        descriptor: DeviceDescriptor,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        handles: Arc<HandleGenerator>,
        registry_error: Option<ErrorSlot>,
    ) -> Self {
        let closed = CancellationToken::new();
        closed.cancel();
        let timing = config.controller_timing();
        let shared = Arc::new(DeviceShared {
            router: Arc::new(MessageRouter::new(config.polling_capacity)),
            tracker: Arc::new(LiveDataTracker::new()),
            pending: Arc::new(PendingRequests::default()),
            handles,
            state: Mutex::new(DeviceState::Closed),
            online: AtomicBool::new(false),
            session: Mutex::new(closed),
            settings: Mutex::new(None),
            last_error: Mutex::new(None),
            registry_error,
            lifecycle: tokio::sync::Mutex::new(()),
            descriptor,
            config,
            transport,
        });

        let access: Arc<dyn RegisterAccess> = shared.clone();
        let flexray = (0..shared.descriptor.flexray_controllers)
            .filter_map(|index| {
                let network = NetId::flexray(index)?;
                let owner = format!("{}/{}", shared.descriptor.serial, index);
                let controller =
                    FlexRayController::new(index as u8, network, owner, access.clone(), timing);
                Some(Arc::new(controller))
            })
            .collect();

        Self { shared, flexray }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.shared.descriptor
    }

    pub fn serial(&self) -> &str {
        &self.shared.descriptor.serial
    }

    pub fn state(&self) -> DeviceState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() != DeviceState::Closed
    }

    pub fn is_online(&self) -> bool {
        self.state() == DeviceState::Online
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.last_error).clone()
    }

    pub fn clear_last_error(&self) {
        *lock(&self.shared.last_error) = None;
    }

    /// Acquire the transport and start the receive loop. No effect once open.
    pub async fn open(&self) -> Result<()> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        if self.is_open() {
            return Ok(());
        }
        self.shared.track(self.shared.transport.open().await)?;

        let cancel = CancellationToken::new();
        *lock(&self.shared.session) = cancel.clone();
        dispatch::spawn(
            DispatchContext {
                transport: self.shared.transport.clone(),
                router: self.shared.router.clone(),
                tracker: self.shared.tracker.clone(),
                pending: self.shared.pending.clone(),
                max_errors: self.shared.config.max_transport_errors,
                serial: self.serial().to_string(),
            },
            cancel,
        );
        self.shared.set_state(DeviceState::Opened);
        info!(serial = %self.serial(), "Device opened");
        Ok(())
    }

    /// Go on the bus and bring up FlexRay.
    ///
    /// Controllers marked `start_when_going_online` are started; coldstart
    /// candidates must reach normal operation within the go-online timeout,
    /// integrating nodes within their listen timeout. On any failure the device
    /// is taken back off the bus and stays Opened.
    pub async fn go_online(&self) -> Result<()> {
        let result = self.go_online_inner().await;
        self.shared.track(result)
    }

    async fn go_online_inner(&self) -> Result<()> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        match self.state() {
            DeviceState::Closed => {
                return Err(DeviceError::contract("go_online", "device is not open"));
            }
            DeviceState::Online => return Ok(()),
            DeviceState::Opened => {}
        }

        let starting: Vec<_> =
            self.flexray.iter().filter(|c| c.start_when_going_online()).cloned().collect();
        for controller in &starting {
            if controller.configuration().is_none() {
                return Err(DeviceError::configuration(format!(
                    "FlexRay controller {} is set to start but has no configuration",
                    controller.owner()
                )));
            }
        }

        let cancel = self.shared.session_token();
        let timeout = self.shared.config.go_online_timeout;
        let response = self
            .shared
            .device_request_within("go_online", DeviceCommand::SetOnline, timeout)
            .await?;
        match response {
            DeviceCommand::Ack(crate::message::AckStatus::Ok) => {}
            other => {
                return Err(DeviceError::connection_failed(format!(
                    "unit refused to go online: {:?}",
                    other
                )));
            }
        }
        // close() does not take the lifecycle lock and may have run during the exchange.
        if !self.shared.advance(DeviceState::Opened, DeviceState::Online, &cancel) {
            return Err(DeviceError::Closed);
        }

        let startup = futures::future::try_join_all(starting.iter().map(|controller| {
            let cancel = cancel.clone();
            async move {
                controller.start().await?;
                let bound = controller.startup_timeout(timeout);
                controller.wait_for_synchronization(bound, &cancel).await
            }
        }))
        .await;

        match startup {
            Ok(_) if cancel.is_cancelled() => Err(DeviceError::Closed),
            Ok(states) => {
                info!(serial = %self.serial(), flexray = states.len(), "Device online");
                Ok(())
            }
            Err(e) => {
                warn!(serial = %self.serial(), "FlexRay startup failed, going back offline: {}", e);
                self.offline_locked().await;
                Err(e)
            }
        }
    }

    /// Leave the bus. No effect unless online.
    pub async fn go_offline(&self) -> Result<()> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        match self.state() {
            DeviceState::Closed => {
                self.shared.track(Err(DeviceError::contract("go_offline", "device is not open")))
            }
            DeviceState::Opened => Ok(()),
            DeviceState::Online => {
                self.offline_locked().await;
                info!(serial = %self.serial(), "Device offline");
                Ok(())
            }
        }
    }

    async fn offline_locked(&self) {
        if let Err(e) = self.shared.device_request("go_offline", DeviceCommand::SetOffline).await {
            warn!(serial = %self.serial(), "Unit did not confirm going offline: {}", e);
        }
        for controller in &self.flexray {
            controller.reset_after_offline();
        }
        let session = self.shared.session_token();
        self.shared.advance(DeviceState::Online, DeviceState::Opened, &session);
    }

    /// Transmit one message, reporting failure through the return value and
    /// [`last_error`](Self::last_error).
    pub async fn transmit(&self, message: Message) -> bool {
        self.try_transmit(message).await.is_ok()
    }

    pub async fn try_transmit(&self, message: Message) -> Result<()> {
        let result = self.transmit_inner(message).await;
        self.shared.track(result)
    }

    async fn transmit_inner(&self, message: Message) -> Result<()> {
        self.shared.ensure_open("transmit")?;
        match message.message_type() {
            MessageType::DeviceControl | MessageType::FlexRayControl => {
                return Err(DeviceError::contract(
                    "transmit",
                    "internal control messages are managed by the session",
                ));
            }
            MessageType::LiveDataCommand
            | MessageType::LiveDataSetValue
            | MessageType::LiveDataStatus
            | MessageType::LiveDataValue => {
                return Err(DeviceError::contract(
                    "transmit",
                    "LiveData traffic goes through the LiveData operations",
                ));
            }
            _ => {}
        }
        message.validate()?;

        if let MessageBody::FlexRay(frame) = &message.body {
            if !self.is_online() {
                return Err(DeviceError::contract(
                    "transmit",
                    "FlexRay frames require the device to be online",
                ));
            }
            let controller = self.flexray_controller_for(message.network.kind()).ok_or_else(|| {
                DeviceError::not_found(format!("FlexRay controller for {}", message.network))
            })?;
            return controller.transmit(frame).await;
        }

        self.shared.send(&message).await
    }

    pub fn flexray_controllers(&self) -> &[Arc<FlexRayController>] {
        &self.flexray
    }

    pub fn flexray_controller(&self, index: usize) -> Option<&Arc<FlexRayController>> {
        self.flexray.get(index)
    }

    fn flexray_controller_for(&self, network: NetId) -> Option<&Arc<FlexRayController>> {
        self.flexray.iter().find(|controller| controller.network() == network)
    }

    /// Host-side state of every FlexRay controller.
    pub fn flexray_states(&self) -> Vec<ControllerState> {
        self.flexray.iter().map(|controller| controller.state()).collect()
    }

    /// Release the transport and tear down every subscription.
    ///
    /// Safe from any state and while a dispatch is in flight. No sink observes a
    /// message after this returns.
    pub fn close(&self) {
        let was = {
            let mut state = lock(&self.shared.state);
            self.shared.online.store(false, Ordering::Release);
            std::mem::replace(&mut *state, DeviceState::Closed)
        };
        self.shared.session_token().cancel();
        self.shared.pending.clear();
        self.shared.router.clear();
        self.shared.tracker.clear();
        for controller in &self.flexray {
            controller.reset_after_offline();
        }
        if was != DeviceState::Closed {
            self.shared.transport.close();
            info!(serial = %self.serial(), "Device closed");
        }
    }

    // Subscriptions and polling

    pub fn subscribe(
        &self,
        filter: MessageFilter,
        sink: impl MessageSink + 'static,
    ) -> SubscriptionId {
        self.shared.router.subscribe(filter, sink)
    }

    pub fn subscribe_fn<F>(&self, filter: MessageFilter, sink: F) -> SubscriptionId
    where
        F: FnMut(&Arc<Message>) + Send + 'static,
    {
        self.shared.router.subscribe_fn(filter, sink)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.router.unsubscribe(id)
    }

    /// Matching messages as a stream; dropping it unsubscribes.
    pub fn message_stream(&self, filter: MessageFilter) -> MessageStream {
        MessageStream::subscribe(&self.shared.router, filter)
    }

    pub fn enable_polling(&self, enabled: bool) {
        self.shared.router.enable_polling(enabled);
    }

    pub fn is_polling_enabled(&self) -> bool {
        self.shared.router.is_polling_enabled()
    }

    pub fn set_polling_capacity(&self, capacity: usize) {
        self.shared.router.set_polling_capacity(capacity);
    }

    pub fn get_messages(&self) -> Vec<Arc<Message>> {
        self.shared.router.get_messages()
    }

    /// Wait for polled messages. Returns an empty vector on timeout and
    /// [`DeviceError::Closed`] if the device closes while waiting.
    pub async fn wait_for_messages(&self, timeout: Duration) -> Result<Vec<Arc<Message>>> {
        let cancel = self.shared.session_token();
        self.shared.router.wait_for_messages(timeout, &cancel).await
    }

    pub fn polling_overflow_count(&self) -> u64 {
        self.shared.router.polling_overflow_count()
    }

    pub fn router(&self) -> &MessageRouter {
        &self.shared.router
    }

    // LiveData

    /// Allocate a handle from the process-wide generator.
    pub fn new_live_data_handle(&self) -> LiveDataHandle {
        self.shared.handles.next_handle()
    }

    /// Send a SUBSCRIBE. VALUE messages for the handle are dispatched until it is
    /// unsubscribed, rejected or the device closes.
    pub async fn subscribe_live_data(&self, message: &LiveDataCommandMessage) -> bool {
        let result = self.send_live_data_command(message, LiveDataCommand::Subscribe).await;
        self.shared.track(result).is_ok()
    }

    /// Send an UNSUBSCRIBE. Unknown handles are a no-op.
    ///
    /// The handle is retired before the request leaves, so VALUE messages arriving
    /// afterwards are dropped rather than dispatched.
    pub async fn unsubscribe_live_data(&self, handle: LiveDataHandle) -> bool {
        if !self.shared.tracker.is_active(handle) {
            return true;
        }
        let message = LiveDataCommandMessage::unsubscribe(handle);
        let result = self.send_live_data_command(&message, LiveDataCommand::Unsubscribe).await;
        self.shared.track(result).is_ok()
    }

    /// End every subscription on the unit.
    pub async fn clear_all_live_data(&self) -> bool {
        let message = LiveDataCommandMessage::clear_all(self.new_live_data_handle());
        let result = self.send_live_data_command(&message, LiveDataCommand::ClearAll).await;
        self.shared.track(result).is_ok()
    }

    pub async fn set_live_data_value(&self, message: &LiveDataSetValueMessage) -> bool {
        let result = self.send_set_value(message).await;
        self.shared.track(result).is_ok()
    }

    async fn send_set_value(&self, message: &LiveDataSetValueMessage) -> Result<()> {
        self.shared.ensure_open("set_live_data_value")?;
        message.validate()?;
        self.shared.tracker.begin_set_value(message.handle);
        let sent = self.shared.send(&Message::livedata(message.clone())).await;
        if sent.is_err() {
            self.shared.tracker.abandon(message.handle);
        }
        sent
    }

    async fn send_live_data_command(
        &self,
        message: &LiveDataCommandMessage,
        expected: LiveDataCommand,
    ) -> Result<()> {
        self.shared.ensure_open("LiveData request")?;
        if message.command != expected {
            return Err(DeviceError::contract(
                "LiveData request",
                format!("expected a {} command, got {}", expected, message.command),
            ));
        }
        message.validate()?;
        self.shared.tracker.begin(message);
        let sent = self.shared.send(&Message::livedata(message.clone())).await;
        if sent.is_err() {
            self.shared.tracker.abandon(message.handle);
        }
        sent
    }

    /// Send a LiveData request and wait for the unit's STATUS for it.
    ///
    /// A non-success status becomes [`DeviceError::LiveDataRejected`].
    pub async fn live_data_request(
        &self,
        message: &LiveDataCommandMessage,
        timeout: Duration,
    ) -> Result<LiveDataStatusMessage> {
        let result = self.live_data_request_inner(message, timeout).await;
        self.shared.track(result)
    }

    async fn live_data_request_inner(
        &self,
        message: &LiveDataCommandMessage,
        timeout: Duration,
    ) -> Result<LiveDataStatusMessage> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let (handle, command) = (message.handle, message.command);
        let statuses = MessageFilter::message_type(MessageType::LiveDataStatus);
        let id = self.subscribe_fn(statuses, move |m| {
            if let MessageBody::LiveDataStatus(status) = &m.body
                && status.handle == handle
                && status.requested_command == command
            {
                let _ = tx.send(*status);
            }
        });

        let outcome = async {
            match command {
                LiveDataCommand::Unsubscribe => {
                    if !self.shared.tracker.is_active(handle) {
                        let subscription = format!("LiveData subscription {}", handle);
                        return Err(DeviceError::not_found(subscription));
                    }
                    self.send_live_data_command(message, command).await?
                }
                _ => self.send_live_data_command(message, command).await?,
            }
            let cancel = self.shared.session_token();
            tokio::select! {
                _ = cancel.cancelled() => Err(DeviceError::Closed),
                status = tokio::time::timeout(timeout, rx.recv()) => match status {
                    Ok(Some(status)) if status.status.is_success() => Ok(status),
                    Ok(Some(status)) => {
                        Err(DeviceError::LiveDataRejected { handle, status: status.status })
                    }
                    Ok(None) => Err(DeviceError::Closed),
                    Err(_) => {
                        let operation = format!("LiveData {} for handle {}", command, handle);
                        Err(DeviceError::timeout(operation, timeout))
                    }
                },
            }
        }
        .await;

        self.unsubscribe(id);
        outcome
    }

    /// Signals of an active subscription, in request order.
    pub fn live_data_signals(&self, handle: LiveDataHandle) -> Option<Vec<LiveDataValueType>> {
        self.shared.tracker.signals(handle)
    }

    pub fn live_data_active_handles(&self) -> Vec<LiveDataHandle> {
        self.shared.tracker.active_handles()
    }

    /// LiveData messages dropped because their handle was not active.
    pub fn live_data_dropped(&self) -> u64 {
        self.shared.tracker.dropped()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.close();
    }
}
