//! Bluetooth service loop.
//!
//! Owns the scanner, the device registry, and the current connection
//! attempt. Runs on a dedicated runtime thread; the UI talks to it through
//! an [`AppCommand`] channel and listens on an [`AppEvent`] channel.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::domain::models::{AppCommand, AppEvent, BluetoothDevice, DeviceAddress};
use crate::domain::permissions::Permissions;
use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::adapter::{
    AdapterSignal, BluetoothAdapter, EventKind, EventSubscription,
};
use crate::infrastructure::bluetooth::connection::{ConnectionConfig, ConnectionHandle};
use crate::infrastructure::bluetooth::platform_adapter;
use crate::infrastructure::bluetooth::scanner::DeviceScanner;

pub struct BluetoothService {
    adapter: Arc<dyn BluetoothAdapter>,
    events: mpsc::UnboundedSender<AppEvent>,
    settings: Arc<Mutex<SettingsService>>,
    permissions: Permissions,
    scanner: DeviceScanner,
    connection: Option<ConnectionHandle>,
    signals: Option<mpsc::UnboundedReceiver<AdapterSignal>>,
    // Held so the adapter registrations are released exactly once, when the
    // service is dropped.
    _subscriptions: Vec<EventSubscription>,
}

impl BluetoothService {
    pub fn new(
        adapter: Arc<dyn BluetoothAdapter>,
        events: mpsc::UnboundedSender<AppEvent>,
        settings: Arc<Mutex<SettingsService>>,
        permissions: Permissions,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let subscriptions = vec![
            adapter.register(EventKind::StateChanged, signal_tx.clone()),
            adapter.register(EventKind::DeviceFound, signal_tx),
        ];
        let scanner = DeviceScanner::new(adapter.clone(), events.clone());

        Self {
            adapter,
            events,
            settings,
            permissions,
            scanner,
            connection: None,
            signals: Some(signal_rx),
            _subscriptions: subscriptions,
        }
    }

    /// Processes commands and adapter signals until the command channel
    /// closes.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<AppCommand>) {
        self.publish_bonded().await;

        let mut signals = self.signals.take().expect("service already running");
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command).await;
                }
                signal = signals.recv() => {
                    let Some(signal) = signal else { break };
                    self.scanner.handle_signal(signal);
                }
            }
        }

        if let Some(connection) = self.connection.take() {
            connection.cancel();
        }
        info!("Bluetooth service stopped");
    }

    async fn handle_command(&mut self, command: AppCommand) {
        match command {
            AppCommand::StartScan => self.start_scan().await,
            AppCommand::StopScan => self.stop_scan().await,
            AppCommand::Pair(address) => self.pair(address).await,
            AppCommand::Connect(address) => self.connect(address).await,
            AppCommand::SendMessage(text) => self.send_message(text),
            AppCommand::Disconnect => self.disconnect(),
        }
    }

    async fn start_scan(&mut self) {
        if !self.permissions.have_all() {
            warn!(
                "Scan refused, missing permissions: {:?}",
                self.permissions.missing()
            );
            self.report_error("Bluetooth permissions have not been granted");
            return;
        }
        if let Err(err) = self.scanner.start().await {
            error!("Failed to start discovery: {}", err);
            self.report_error(&format!("Failed to start discovery: {err}"));
        }
    }

    async fn stop_scan(&mut self) {
        if let Err(err) = self.scanner.stop().await {
            error!("Failed to stop discovery: {}", err);
        }
    }

    async fn pair(&mut self, address: DeviceAddress) {
        info!("Requesting bond with {}", address);
        match self.adapter.create_bond(address).await {
            Ok(()) => {
                info!("Bonded with {}", address);
                self.publish_bonded().await;
            }
            Err(err) => {
                error!("Pairing with {} failed: {}", address, err);
                self.report_error(&format!("Pairing failed: {err}"));
            }
        }
    }

    async fn connect(&mut self, address: DeviceAddress) {
        if self.scanner.is_scanning() {
            if let Err(err) = self.scanner.stop().await {
                warn!("Failed to stop discovery before connecting: {}", err);
            }
        }
        if let Some(previous) = self.connection.take() {
            info!(
                "Cancelling previous connection attempt to {}",
                previous.device().address
            );
            previous.cancel();
        }

        let device = self
            .scanner
            .device(address)
            .cloned()
            .unwrap_or_else(|| BluetoothDevice::new(None, address));
        let (config, local_name) = {
            let settings = self.settings.lock().unwrap();
            let settings = settings.get();
            (
                ConnectionConfig::from_settings(settings),
                settings.local_device_name.clone(),
            )
        };

        self.connection = Some(ConnectionHandle::spawn(
            self.adapter.clone(),
            device,
            config,
            self.events.clone(),
            local_name,
        ));
    }

    fn send_message(&mut self, text: String) {
        let Some(connection) = &self.connection else {
            self.report_error("No active connection");
            return;
        };
        if connection.is_finished() || !connection.send_text(text) {
            self.report_error("Connection is no longer open");
        }
    }

    fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            info!("Disconnecting from {}", connection.device().address);
            connection.cancel();
        }
    }

    async fn publish_bonded(&self) {
        match self.adapter.bonded_devices().await {
            Ok(devices) => {
                let _ = self.events.send(AppEvent::BondedDevices(devices));
            }
            Err(err) => warn!("Could not list bonded devices: {}", err),
        }
    }

    fn report_error(&self, message: &str) {
        let _ = self.events.send(AppEvent::Error(message.to_string()));
    }
}

/// Channel pair connecting the UI to a running [`BluetoothService`].
pub struct BluetoothHandle {
    pub commands: mpsc::UnboundedSender<AppCommand>,
    pub events: mpsc::UnboundedReceiver<AppEvent>,
}

impl BluetoothHandle {
    /// Starts the service on its own thread with a current-thread runtime.
    ///
    /// Blocks until the platform adapter is up; a machine without a usable
    /// Bluetooth adapter is a startup failure.
    pub fn spawn(settings: Arc<Mutex<SettingsService>>) -> anyhow::Result<Self> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let api_level = settings.lock().unwrap().get().platform_api_level;

        std::thread::Builder::new()
            .name("bluetooth".to_string())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("Failed to create tokio runtime for Bluetooth");

                rt.block_on(async move {
                    let adapter = match platform_adapter().await {
                        Ok(adapter) => adapter,
                        Err(err) => {
                            let _ = ready_tx.send(Err(err));
                            return;
                        }
                    };
                    if let Err(err) = adapter.enable().await {
                        warn!("Could not power on the adapter: {}", err);
                    }
                    let _ = ready_tx.send(Ok(()));

                    let service = BluetoothService::new(
                        adapter,
                        event_tx,
                        settings,
                        Permissions::granted_all(api_level),
                    );
                    service.run(command_rx).await;
                });
            })
            .context("failed to spawn the bluetooth thread")?;

        ready_rx
            .recv()
            .context("the bluetooth thread died during startup")??;

        Ok(Self {
            commands: command_tx,
            events: event_rx,
        })
    }
}
