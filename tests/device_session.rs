//! End-to-end session behaviour against simulated units.

mod common;

use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use vnetlink::catalog::DeviceDescriptor;
use vnetlink::device::{AnalogVoltage, IoKind};
use vnetlink::message::{CanMessage, EthernetMessage, SpiMessage};
use vnetlink::sim::{SimCatalog, SimulatedDevice};
use vnetlink::transports::LoopbackTransport;
use vnetlink::{
    Device, DeviceState, ErrorKind, Message, MessageFilter, NetId, Registry, SessionConfig,
};

fn counter(device: &Device, network: NetId) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    device.subscribe_fn(MessageFilter::network(network), move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    count
}

#[tokio::test]
async fn can_frame_reaches_matching_subscriber_once() {
    common::init_tracing();
    let (device, _unit) = common::open_device("SESS01").await;
    device.go_online().await.unwrap();
    assert_eq!(device.state(), DeviceState::Online);

    let on_can1 = counter(&device, NetId::DwCan01);
    let on_can2 = counter(&device, NetId::DwCan02);
    let mut stream = device.message_stream(MessageFilter::network(NetId::DwCan01));

    assert!(device.transmit(Message::can(NetId::DwCan01, 0x123, vec![1, 2, 3, 4])).await);

    let received =
        tokio::time::timeout(Duration::from_secs(1), stream.next()).await.unwrap().unwrap();
    let can = received.as_can().unwrap();
    assert_eq!(can.arbid, 0x123);
    assert_eq!(can.data, vec![1, 2, 3, 4]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(on_can1.load(Ordering::SeqCst), 1);
    assert_eq!(on_can2.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn frames_sent_while_opened_are_not_echoed() {
    let (device, unit) = common::open_device("SESS02").await;
    let on_can1 = counter(&device, NetId::DwCan01);

    assert!(device.transmit(Message::can(NetId::DwCan01, 0x10, vec![0xAA])).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(unit.frames_received(), 1);
    assert_eq!(on_can1.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn go_offline_returns_to_opened() {
    let (device, unit) = common::open_device("SESS03").await;
    device.go_online().await.unwrap();
    assert!(unit.is_online());

    device.go_offline().await.unwrap();
    assert_eq!(device.state(), DeviceState::Opened);
    assert!(!unit.is_online());

    // Offline twice is fine.
    device.go_offline().await.unwrap();
}

#[tokio::test]
async fn close_ends_streams_and_unblocks_waits() {
    let (device, unit) = common::open_device("SESS04").await;
    let device = Arc::new(device);
    device.go_online().await.unwrap();
    device.enable_polling(true);
    let mut stream = device.message_stream(MessageFilter::any());

    let waiter = {
        let device = device.clone();
        tokio::spawn(async move { device.wait_for_messages(Duration::from_secs(30)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    // Drain whatever the go-online link status left behind.
    device.get_messages();

    device.close();
    device.close();

    // Either it saw a late status frame or it was woken by the close.
    tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap().ok();

    let ended = tokio::time::timeout(Duration::from_secs(1), async {
        while stream.next().await.is_some() {}
    })
    .await;
    assert!(ended.is_ok(), "stream should end once the device closes");

    assert_eq!(device.state(), DeviceState::Closed);
    assert!(!unit.is_owned());
    assert!(!device.transmit(Message::can(NetId::DwCan01, 1, vec![])).await);
}

#[tokio::test]
async fn settings_conflict_then_retry() {
    let (device, unit) = common::open_device("SESS05").await;

    let mut snapshot = device.refresh_settings().await.unwrap();
    assert_eq!(snapshot.base_revision, 1);
    assert_eq!(snapshot.settings.analog_outputs.len(), 2);

    // Someone else edits the unit in between.
    let revision = unit.edit_settings(|settings| settings.analog_outputs[1].enabled = true);
    assert_eq!(revision, 2);

    snapshot.set_misc_io_analog_output_enabled(1, true).unwrap();
    let err = device.apply_settings(&snapshot).await.unwrap_err();
    assert!(matches!(err, vnetlink::DeviceError::SettingsConflict { expected: 1, actual: 2 }));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let mut fresh = device.refresh_settings().await.unwrap();
    fresh.set_misc_io_analog_output_enabled(1, true).unwrap();
    let applied = device.apply_settings(&fresh).await.unwrap();
    assert_eq!(applied.base_revision, 3);
    assert!(applied.settings.analog_outputs[0].enabled);
    assert!(applied.settings.analog_outputs[1].enabled);
    assert_eq!(device.settings(), Some(applied));
}

#[tokio::test]
async fn analog_output_helpers() {
    let (device, unit) = common::open_device("SESS06").await;

    device.set_misc_io_analog_output(2, AnalogVoltage::V5).await.unwrap();
    device.set_misc_io_analog_output_enabled(2, true).await.unwrap();
    assert_eq!(unit.settings_revision(), 3);

    let snapshot = device.refresh_settings().await.unwrap();
    assert_eq!(snapshot.settings.analog_outputs[1].voltage, AnalogVoltage::V5);
    assert!(snapshot.settings.analog_outputs[1].enabled);

    let err = device.set_misc_io_analog_output(3, AnalogVoltage::V1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(device.last_error().is_some());
}

#[tokio::test]
async fn digital_io() {
    let (device, unit) = common::open_device("SESS07").await;

    device.set_digital_io(IoKind::Misc, 1, true).await.unwrap();
    assert!(device.get_digital_io(IoKind::Misc, 1).await.unwrap());
    assert!(!device.get_digital_io(IoKind::Misc, 2).await.unwrap());

    let err = device.set_digital_io(IoKind::BackupPowerGood, 1, true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Contract);

    unit.set_digital_input(IoKind::BackupPowerGood, 1, true);
    assert!(device.get_digital_io(IoKind::BackupPowerGood, 1).await.unwrap());

    assert!(device.get_digital_io(IoKind::Misc, 0).await.is_err());
}

#[tokio::test]
async fn tc10_requests() {
    let (device, _unit) = common::open_device("SESS08").await;
    assert!(device.supports_tc10());
    device.request_tc10_wake(NetId::Ethernet01).await.unwrap();
    device.request_tc10_sleep(NetId::Ethernet01).await.unwrap();

    let err = device.request_tc10_wake(NetId::DwCan01).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let plain = SimulatedDevice::new(DeviceDescriptor {
        supports_tc10: false,
        ..SimulatedDevice::default_descriptor("SESS09")
    });
    let device = Device::new(plain.descriptor().clone(), plain.clone(), SessionConfig::default());
    device.open().await.unwrap();
    assert!(!device.supports_tc10());
    let err = device.request_tc10_wake(NetId::Ethernet01).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}

#[tokio::test]
async fn loopback_preserves_frame_content() {
    let device = Device::new(
        DeviceDescriptor::new("LOOP01", "loopback"),
        Arc::new(LoopbackTransport::new()),
        SessionConfig::default(),
    );
    device.open().await.unwrap();
    device.enable_polling(true);

    let mut ethernet = vec![0xFF; 6];
    ethernet.extend_from_slice(&[0x02, 0, 0, 0, 0, 1, 0x08, 0x00]);
    ethernet.extend_from_slice(&[0x45, 0x00]);

    let sent = vec![
        Message::new(NetId::DwCan01, CanMessage::new(0x7DF, vec![0x02, 0x01, 0x0D])),
        Message::new(
            NetId::DwCan02,
            CanMessage::new_fd(0x18DA_F110, (0u8..48).collect::<Vec<_>>()),
        ),
        Message::new(NetId::Ethernet01, EthernetMessage::new(ethernet)),
        Message::new(NetId::Spi01, SpiMessage::write(1, 0x0010, vec![0xDE, 0xAD, 0xBE, 0xEF])),
    ];
    for message in &sent {
        device.try_transmit(message.clone()).await.unwrap();
    }

    let mut received = Vec::new();
    while received.len() < sent.len() {
        let batch = device.wait_for_messages(Duration::from_secs(1)).await.unwrap();
        assert!(!batch.is_empty(), "loopback frames should come back");
        received.extend(batch);
    }
    for (sent, received) in sent.iter().zip(&received) {
        assert!(sent.same_content(received), "{:?} != {:?}", sent, received);
    }
}

#[tokio::test]
async fn unreachable_unit_records_error() {
    let unit = SimulatedDevice::with_serial("SESS10");
    unit.set_reachable(false);
    let mut catalog = SimCatalog::new();
    catalog.add(unit.clone());
    let registry = Registry::new();
    registry.add_catalog(catalog);

    let device = registry.device("SESS10").await.unwrap();
    let err = device.open().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(device.state(), DeviceState::Closed);
    assert!(device.last_error().is_some());
    assert_eq!(registry.last_error(), device.last_error());

    unit.set_reachable(true);
    device.open().await.unwrap();
    assert!(device.is_open());
}

#[tokio::test]
async fn unknown_serial_is_not_found() {
    let registry = Registry::new();
    registry.add_catalog(SimCatalog::with_units(["SESS11"]));
    assert_eq!(registry.find_all_devices().await.unwrap().len(), 1);
    assert!(registry.find_device("NOPE").await.unwrap().is_none());
    assert_eq!(registry.device("NOPE").await.unwrap_err().kind(), ErrorKind::NotFound);
}
