//! egui application binding the UI state to the Bluetooth service.

use std::sync::{Arc, Mutex};

use eframe::egui;
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::models::{
    AdapterState, AppCommand, AppEvent, ConnectionResult, DeviceAddress,
};
use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::BluetoothHandle;
use crate::presentation::state::BluetoothUiState;

pub struct BluescoutApp {
    settings: Arc<Mutex<SettingsService>>,
    commands: mpsc::UnboundedSender<AppCommand>,
    events: mpsc::UnboundedReceiver<AppEvent>,
    state: BluetoothUiState,
    message_input: String,
    pending_connect: Option<DeviceAddress>,
}

impl BluescoutApp {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        settings: Arc<Mutex<SettingsService>>,
        bluetooth: BluetoothHandle,
    ) -> Self {
        Self {
            settings,
            commands: bluetooth.commands,
            events: bluetooth.events,
            state: BluetoothUiState::default(),
            message_input: String::new(),
            pending_connect: None,
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            if matches!(event, AppEvent::Connection(ConnectionResult::Established)) {
                if let Some(address) = self.pending_connect {
                    if let Ok(mut settings) = self.settings.lock() {
                        if let Err(err) = settings.remember_device(address) {
                            warn!("Could not persist connected device: {}", err);
                        }
                    }
                }
            }
            self.state.apply(event);
        }
    }

    fn send(&self, command: AppCommand) {
        let _ = self.commands.send(command);
    }

    fn ui_scan_controls(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if self.state.is_scanning {
                ui.label("Scanning...");
                ui.spinner();
                if ui.button("Stop Scanning").clicked() {
                    self.send(AppCommand::StopScan);
                }
            } else if ui.button("Start Scanning").clicked() {
                self.send(AppCommand::StartScan);
            }
        });
    }

    fn ui_device_list(&mut self, ui: &mut egui::Ui) {
        if self.state.scanned_devices.is_empty() {
            ui.weak("No devices found yet");
            return;
        }
        let devices = self.state.scanned_devices.clone();
        for device in devices {
            ui.group(|ui| {
                ui.label(device.label());
                ui.monospace(device.address.to_string());
                ui.horizontal(|ui| {
                    if ui.button("Pair").clicked() {
                        self.send(AppCommand::Pair(device.address));
                    }
                    if ui.button("Connect socket").clicked() {
                        self.pending_connect = Some(device.address);
                        self.send(AppCommand::Connect(device.address));
                    }
                });
            });
        }
    }

    fn ui_paired_devices(&mut self, ui: &mut egui::Ui) {
        if self.state.paired_devices.is_empty() {
            return;
        }
        ui.separator();
        ui.label("Paired devices");
        let devices = self.state.paired_devices.clone();
        for device in devices {
            ui.horizontal(|ui| {
                ui.label(device.label());
                ui.monospace(device.address.to_string());
                if ui.button("Connect socket").clicked() {
                    self.pending_connect = Some(device.address);
                    self.send(AppCommand::Connect(device.address));
                }
            });
        }
    }

    fn ui_connection_panel(&mut self, ui: &mut egui::Ui) {
        if self.state.is_connecting {
            ui.separator();
            ui.horizontal(|ui| {
                ui.label("Connecting...");
                ui.spinner();
            });
            return;
        }
        if !self.state.is_connected {
            return;
        }

        ui.separator();
        ui.horizontal(|ui| {
            ui.label("Connected");
            if ui.button("Disconnect").clicked() {
                self.send(AppCommand::Disconnect);
            }
        });

        for message in &self.state.messages {
            let prefix = if message.is_from_local_user {
                "me"
            } else {
                message.sender_name.as_str()
            };
            ui.label(format!("{}: {}", prefix, message.text));
        }

        ui.horizontal(|ui| {
            ui.text_edit_singleline(&mut self.message_input);
            if ui.button("Send").clicked() && !self.message_input.is_empty() {
                let text = std::mem::take(&mut self.message_input);
                self.send(AppCommand::SendMessage(text));
            }
        });
    }
}

impl eframe::App for BluescoutApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Bluescout");

            if self.state.adapter_state == Some(AdapterState::PoweredOff) {
                ui.colored_label(egui::Color32::YELLOW, "Bluetooth adapter is powered off");
            }
            if let Some(error) = &self.state.error_message {
                ui.colored_label(egui::Color32::RED, error.as_str());
            }

            self.ui_scan_controls(ui);
            ui.add_space(10.0);

            egui::ScrollArea::vertical().show(ui, |ui| {
                self.ui_device_list(ui);
                self.ui_paired_devices(ui);
                self.ui_connection_panel(ui);
            });
        });

        ctx.request_repaint();
    }
}
