//! UI state holder: reduces service events into the state the widgets
//! render from.

use crate::domain::models::{
    AdapterState, AppEvent, BluetoothDevice, BluetoothMessage, ConnectionResult, ConnectionState,
};

#[derive(Debug, Default)]
pub struct BluetoothUiState {
    pub scanned_devices: Vec<BluetoothDevice>,
    pub paired_devices: Vec<BluetoothDevice>,
    pub is_scanning: bool,
    pub is_connected: bool,
    pub is_connecting: bool,
    pub adapter_state: Option<AdapterState>,
    pub error_message: Option<String>,
    pub messages: Vec<BluetoothMessage>,
}

impl BluetoothUiState {
    pub fn apply(&mut self, event: AppEvent) {
        match event {
            AppEvent::AdapterStateChanged(state) => {
                self.adapter_state = Some(state);
            }
            AppEvent::ScanStarted => {
                self.is_scanning = true;
                self.scanned_devices.clear();
                self.error_message = None;
            }
            AppEvent::ScanStopped => {
                self.is_scanning = false;
            }
            AppEvent::DeviceDiscovered(device) => {
                if !self
                    .scanned_devices
                    .iter()
                    .any(|known| known.address == device.address)
                {
                    self.scanned_devices.push(device);
                }
            }
            AppEvent::BondedDevices(devices) => {
                self.paired_devices = devices;
            }
            AppEvent::ConnectionStateChanged(state) => match state {
                ConnectionState::Created => {}
                ConnectionState::Connecting => {
                    self.is_connecting = true;
                    self.is_connected = false;
                    self.error_message = None;
                }
                ConnectionState::Connected => {
                    self.is_connecting = false;
                    self.is_connected = true;
                }
                ConnectionState::Failed | ConnectionState::Closed => {
                    self.is_connecting = false;
                    self.is_connected = false;
                }
            },
            AppEvent::Connection(result) => match result {
                ConnectionResult::Established => {
                    self.is_connecting = false;
                    self.is_connected = true;
                    self.error_message = None;
                }
                ConnectionResult::TransferSucceeded(message) => {
                    self.messages.push(message);
                }
                ConnectionResult::Error(reason) => {
                    self.is_connecting = false;
                    self.is_connected = false;
                    self.error_message = Some(reason);
                }
            },
            AppEvent::Error(message) => {
                self.error_message = Some(message);
            }
        }
    }
}
