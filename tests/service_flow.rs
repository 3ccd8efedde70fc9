//! Integration tests for the scan/pair/connect flow, driven end to end
//! through the loopback adapter.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use bluescout::domain::models::{
    AppCommand, AppEvent, BluetoothDevice, ConnectionResult, ConnectionState, DeviceAddress,
};
use bluescout::domain::permissions::Permissions;
use bluescout::domain::settings::SettingsService;
use bluescout::infrastructure::bluetooth::loopback::{ConnectBehavior, LoopbackAdapter};
use bluescout::infrastructure::bluetooth::BluetoothService;
use bluescout::presentation::state::BluetoothUiState;

struct Harness {
    adapter: Arc<LoopbackAdapter>,
    commands: mpsc::UnboundedSender<AppCommand>,
    events: mpsc::UnboundedReceiver<AppEvent>,
    _settings_dir: tempfile::TempDir,
}

fn start_service(adapter: LoopbackAdapter, permissions: Permissions) -> Harness {
    let adapter = Arc::new(adapter);
    let settings_dir = tempfile::tempdir().unwrap();
    let settings = Arc::new(Mutex::new(SettingsService::with_path(
        settings_dir.path().join("settings.json"),
    )));

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let service = BluetoothService::new(adapter.clone(), event_tx, settings, permissions);
    // The service borrows `&self` across `.await`, so its `run` future is not
    // `Send` and cannot be handed to `tokio::spawn`. Production drives it on a
    // dedicated thread with a current-thread runtime (see `BluetoothHandle::spawn`);
    // mirror that here so the harness exercises the same execution model.
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build current-thread runtime for the bluetooth service");
        rt.block_on(service.run(command_rx));
    });

    Harness {
        adapter,
        commands: command_tx,
        events: event_rx,
        _settings_dir: settings_dir,
    }
}

fn device(name: &str, octet: u8) -> BluetoothDevice {
    BluetoothDevice::new(
        Some(name.to_string()),
        DeviceAddress::new([0, 0, 0, 0, 0, octet]),
    )
}

/// Waits for the first event matching `predicate`, skipping others.
async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<AppEvent>,
    predicate: impl Fn(&AppEvent) -> bool,
) -> AppEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn scan_deduplicates_and_skips_unnamed_devices() {
    let adapter = LoopbackAdapter::new();
    adapter.push_device(device("A", 1));
    adapter.push_device(BluetoothDevice::new(None, DeviceAddress::new([0, 0, 0, 0, 0, 2])));
    adapter.push_device(device("A", 1));
    let mut harness = start_service(adapter, Permissions::granted_all(31));

    harness.commands.send(AppCommand::StartScan).unwrap();
    wait_for(&mut harness.events, |e| matches!(e, AppEvent::ScanStarted)).await;
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::DeviceDiscovered(d) if d.label() == "A")
    })
    .await;

    // Nothing else was accepted: stopping is the next visible event.
    harness.commands.send(AppCommand::StopScan).unwrap();
    let next = wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::DeviceDiscovered(_) | AppEvent::ScanStopped)
    })
    .await;
    assert!(matches!(next, AppEvent::ScanStopped));
}

#[tokio::test]
async fn restarting_a_scan_forgets_the_previous_session() {
    let adapter = LoopbackAdapter::new();
    adapter.push_device(device("A", 1));
    let mut harness = start_service(adapter, Permissions::granted_all(31));
    let mut ui = BluetoothUiState::default();

    for _ in 0..2 {
        harness.commands.send(AppCommand::StartScan).unwrap();
        let event = wait_for(&mut harness.events, |e| matches!(e, AppEvent::ScanStarted)).await;
        ui.apply(event);
        assert!(ui.scanned_devices.is_empty());

        let event = wait_for(&mut harness.events, |e| {
            matches!(e, AppEvent::DeviceDiscovered(_))
        })
        .await;
        ui.apply(event);
        assert_eq!(ui.scanned_devices.len(), 1);

        harness.commands.send(AppCommand::StopScan).unwrap();
        let event = wait_for(&mut harness.events, |e| matches!(e, AppEvent::ScanStopped)).await;
        ui.apply(event);
    }
}

#[tokio::test]
async fn scan_is_refused_without_permissions() {
    let adapter = LoopbackAdapter::new();
    adapter.push_device(device("A", 1));
    let mut permissions = Permissions::granted_all(31);
    permissions.revoke("bluetooth.scan");
    let mut harness = start_service(adapter, permissions);

    harness.commands.send(AppCommand::StartScan).unwrap();
    wait_for(&mut harness.events, |e| matches!(e, AppEvent::Error(_))).await;
    assert!(!harness.adapter.is_discovering());
}

#[tokio::test]
async fn pairing_publishes_the_bonded_list() {
    let adapter = LoopbackAdapter::new();
    adapter.push_device(device("Keyboard", 7));
    let mut harness = start_service(adapter, Permissions::granted_all(31));

    // Initial bonded list is empty.
    let initial = wait_for(&mut harness.events, |e| matches!(e, AppEvent::BondedDevices(_))).await;
    assert!(matches!(initial, AppEvent::BondedDevices(devices) if devices.is_empty()));

    harness
        .commands
        .send(AppCommand::Pair(DeviceAddress::new([0, 0, 0, 0, 0, 7])))
        .unwrap();
    let bonded = wait_for(&mut harness.events, |e| matches!(e, AppEvent::BondedDevices(_))).await;
    let AppEvent::BondedDevices(devices) = bonded else {
        unreachable!()
    };
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].label(), "Keyboard");
}

#[tokio::test]
async fn connecting_stops_the_scan_and_transfers_messages() {
    let adapter = LoopbackAdapter::new();
    adapter.push_device(device("Headset", 5));
    let mut harness = start_service(adapter, Permissions::granted_all(31));

    harness.commands.send(AppCommand::StartScan).unwrap();
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::DeviceDiscovered(_))
    })
    .await;

    harness
        .commands
        .send(AppCommand::Connect(DeviceAddress::new([0, 0, 0, 0, 0, 5])))
        .unwrap();
    wait_for(&mut harness.events, |e| matches!(e, AppEvent::ScanStopped)).await;
    wait_for(&mut harness.events, |e| {
        matches!(
            e,
            AppEvent::ConnectionStateChanged(ConnectionState::Connecting)
        )
    })
    .await;
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::Connection(ConnectionResult::Established))
    })
    .await;
    assert!(!harness.adapter.is_discovering());

    // Peer to app.
    let peer = harness.adapter.take_peer().expect("no peer stream");
    let (peer_read, mut peer_write) = tokio::io::split(peer);
    peer_write.write_all(b"hello\n").await.unwrap();
    let event = wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::Connection(ConnectionResult::TransferSucceeded(_)))
    })
    .await;
    let AppEvent::Connection(ConnectionResult::TransferSucceeded(message)) = event else {
        unreachable!()
    };
    assert_eq!(message.text, "hello");
    assert_eq!(message.sender_name, "Headset");
    assert!(!message.is_from_local_user);

    // App to peer.
    harness
        .commands
        .send(AppCommand::SendMessage("hi there".to_string()))
        .unwrap();
    let mut peer_lines = BufReader::new(peer_read).lines();
    assert_eq!(peer_lines.next_line().await.unwrap().unwrap(), "hi there");
    let event = wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::Connection(ConnectionResult::TransferSucceeded(m)) if m.is_from_local_user)
    })
    .await;
    let AppEvent::Connection(ConnectionResult::TransferSucceeded(message)) = event else {
        unreachable!()
    };
    assert_eq!(message.text, "hi there");

    harness.commands.send(AppCommand::Disconnect).unwrap();
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::ConnectionStateChanged(ConnectionState::Closed))
    })
    .await;
}

#[tokio::test]
async fn refused_connection_surfaces_an_error_result() {
    let adapter = LoopbackAdapter::new();
    adapter.push_device(device("Printer", 9));
    adapter.set_connect_behavior(ConnectBehavior::Refuse);
    let mut harness = start_service(adapter, Permissions::granted_all(31));

    harness
        .commands
        .send(AppCommand::Connect(DeviceAddress::new([0, 0, 0, 0, 0, 9])))
        .unwrap();
    let event = wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::Connection(ConnectionResult::Error(_)))
    })
    .await;
    let AppEvent::Connection(ConnectionResult::Error(reason)) = event else {
        unreachable!()
    };
    assert!(reason.contains("refused"), "unexpected reason: {reason}");
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::ConnectionStateChanged(ConnectionState::Closed))
    })
    .await;
}

#[tokio::test]
async fn sending_without_a_connection_reports_an_error() {
    let adapter = LoopbackAdapter::new();
    let mut harness = start_service(adapter, Permissions::granted_all(31));

    harness
        .commands
        .send(AppCommand::SendMessage("hello?".to_string()))
        .unwrap();
    let event = wait_for(&mut harness.events, |e| matches!(e, AppEvent::Error(_))).await;
    let AppEvent::Error(message) = event else {
        unreachable!()
    };
    assert!(message.contains("No active connection"));
}
