//! Registry of devices found during the current discovery session.

use crate::domain::models::{BluetoothDevice, DeviceAddress};

/// Insertion-ordered collection of discovered devices.
///
/// Deduplication is by hardware address. Devices without a usable display
/// name are rejected outright; the scan UI has nothing to show for them.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<BluetoothDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all devices from the previous session.
    pub fn clear(&mut self) {
        self.devices.clear();
    }

    /// Appends `device` if it carries a name and was not seen before.
    /// Returns whether the device was accepted.
    pub fn insert(&mut self, device: BluetoothDevice) -> bool {
        if device.display_name().is_none() {
            return false;
        }
        if self.contains(device.address) {
            return false;
        }
        self.devices.push(device);
        true
    }

    pub fn contains(&self, address: DeviceAddress) -> bool {
        self.devices.iter().any(|device| device.address == address)
    }

    pub fn get(&self, address: DeviceAddress) -> Option<&BluetoothDevice> {
        self.devices.iter().find(|device| device.address == address)
    }

    pub fn devices(&self) -> &[BluetoothDevice] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
