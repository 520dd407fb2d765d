#![allow(dead_code)] // Each test binary uses a different subset.

use std::path::PathBuf;
use std::sync::Arc;

use vnetlink::sim::{SimCatalog, SimFlexRayBus, SimulatedDevice};
use vnetlink::{Device, FlexRayProfile, Registry};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vnetlink=info")),
        )
        .with_test_writer()
        .try_init();
}

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures").join(name)
}

pub fn profile() -> FlexRayProfile {
    FlexRayProfile::load(fixture("flexray_profile.yaml"))
        .expect("FlexRay fixture profile should load")
}

/// An opened session on a default simulated unit.
pub async fn open_device(serial: &str) -> (Device, Arc<SimulatedDevice>) {
    let unit = SimulatedDevice::with_serial(serial);
    let mut catalog = SimCatalog::new();
    catalog.add(unit.clone());
    let registry = Registry::new();
    registry.add_catalog(catalog);
    let device = registry.device(serial).await.expect("simulated unit should be listed");
    device.open().await.expect("simulated unit should open");
    (device, unit)
}

/// Units sharing one FlexRay bus, one per serial.
pub async fn devices_on_bus(bus: &Arc<SimFlexRayBus>, serials: &[&str]) -> Vec<Device> {
    let registry = Registry::new();
    registry.add_catalog(SimCatalog::on_bus(bus, serials.iter().copied()));
    let mut devices = Vec::new();
    for serial in serials {
        let device = registry.device(serial).await.expect("simulated unit should be listed");
        device.open().await.expect("simulated unit should open");
        devices.push(device);
    }
    devices
}

/// A transport driven by the test: inbound frames are injected, outbound frames recorded.
#[derive(Debug)]
pub struct ScriptedTransport {
    inbound_tx: tokio::sync::mpsc::UnboundedSender<vnetlink::codec::RawFrame>,
    inbound_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<vnetlink::codec::RawFrame>>,
    sent: std::sync::Mutex<Vec<vnetlink::Message>>,
    closed: tokio_util::sync::CancellationToken,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(Self {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            sent: std::sync::Mutex::new(Vec::new()),
            closed: tokio_util::sync::CancellationToken::new(),
        })
    }

    /// Deliver `message` as if the unit had sent it.
    pub fn inject(&self, message: vnetlink::Message) {
        let message = message.with_direction(vnetlink::Direction::Rx);
        let frame = vnetlink::codec::encode(&message).unwrap();
        self.inbound_tx.send(frame).unwrap();
    }

    pub fn sent(&self) -> Vec<vnetlink::Message> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl vnetlink::Transport for ScriptedTransport {
    async fn open(&self) -> vnetlink::Result<()> {
        Ok(())
    }

    async fn send(&self, frame: vnetlink::codec::RawFrame) -> vnetlink::Result<()> {
        self.sent.lock().unwrap().push(vnetlink::codec::decode(&frame)?);
        Ok(())
    }

    async fn recv(&self) -> vnetlink::Result<Option<vnetlink::codec::RawFrame>> {
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            frame = rx.recv() => Ok(frame),
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
