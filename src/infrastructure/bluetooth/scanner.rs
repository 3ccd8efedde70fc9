//! Device discovery: drives the adapter's scan session and filters the
//! resulting notifications into the device registry.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::models::{AppEvent, BluetoothDevice, DeviceAddress};
use crate::domain::registry::DeviceRegistry;
use crate::infrastructure::bluetooth::adapter::{AdapterError, AdapterSignal, BluetoothAdapter};

pub struct DeviceScanner {
    adapter: Arc<dyn BluetoothAdapter>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    registry: DeviceRegistry,
    scanning: bool,
}

impl DeviceScanner {
    pub fn new(
        adapter: Arc<dyn BluetoothAdapter>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            adapter,
            event_sender,
            registry: DeviceRegistry::new(),
            scanning: false,
        }
    }

    /// Starts a discovery session. Devices from the previous session are
    /// dropped first; starting while already scanning restarts the session.
    pub async fn start(&mut self) -> Result<(), AdapterError> {
        self.registry.clear();
        self.scanning = true;
        let _ = self.event_sender.send(AppEvent::ScanStarted);
        info!("Starting device discovery");

        if let Err(err) = self.adapter.start_discovery().await {
            self.scanning = false;
            let _ = self.event_sender.send(AppEvent::ScanStopped);
            return Err(err);
        }
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), AdapterError> {
        if !self.scanning {
            return Ok(());
        }
        info!("Stopping device discovery");
        self.scanning = false;
        let _ = self.event_sender.send(AppEvent::ScanStopped);
        self.adapter.cancel_discovery().await
    }

    /// Handles one adapter notification.
    pub fn handle_signal(&mut self, signal: AdapterSignal) {
        match signal {
            AdapterSignal::StateChanged(state) => {
                info!("Adapter state changed: {:?}", state);
                let _ = self.event_sender.send(AppEvent::AdapterStateChanged(state));
            }
            AdapterSignal::DeviceFound(device) => {
                if self.registry.insert(device.clone()) {
                    info!(
                        "Discovered device: name: {}, address: {}",
                        device.label(),
                        device.address
                    );
                    let _ = self.event_sender.send(AppEvent::DeviceDiscovered(device));
                } else {
                    debug!("Ignoring device {} (unnamed or already listed)", device.address);
                }
            }
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn device(&self, address: DeviceAddress) -> Option<&BluetoothDevice> {
        self.registry.get(address)
    }

    pub fn devices(&self) -> &[BluetoothDevice] {
        self.registry.devices()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AdapterState;
    use crate::infrastructure::bluetooth::loopback::LoopbackAdapter;

    fn found(name: Option<&str>, octet: u8) -> AdapterSignal {
        AdapterSignal::DeviceFound(BluetoothDevice::new(
            name.map(str::to_owned),
            DeviceAddress::new([0, 0, 0, 0, 0, octet]),
        ))
    }

    fn scanner() -> (DeviceScanner, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DeviceScanner::new(Arc::new(LoopbackAdapter::new()), tx), rx)
    }

    #[tokio::test]
    async fn start_clears_previous_session() {
        let (mut scanner, mut events) = scanner();
        scanner.handle_signal(found(Some("A"), 1));
        assert_eq!(scanner.devices().len(), 1);

        scanner.start().await.unwrap();
        assert!(scanner.is_scanning());
        assert!(scanner.devices().is_empty());
        assert!(matches!(events.try_recv().unwrap(), AppEvent::ScanStarted));
    }

    #[tokio::test]
    async fn stop_then_start_retains_nothing() {
        let (mut scanner, _events) = scanner();
        scanner.start().await.unwrap();
        scanner.handle_signal(found(Some("A"), 1));
        scanner.handle_signal(found(Some("B"), 2));
        scanner.stop().await.unwrap();
        assert!(!scanner.is_scanning());

        scanner.start().await.unwrap();
        assert!(scanner.devices().is_empty());
    }

    #[tokio::test]
    async fn filters_unnamed_and_duplicate_devices() {
        let (mut scanner, mut events) = scanner();
        scanner.start().await.unwrap();
        let _ = events.try_recv(); // ScanStarted

        scanner.handle_signal(found(Some("A"), 1));
        scanner.handle_signal(found(None, 2));
        scanner.handle_signal(found(Some(""), 3));
        scanner.handle_signal(found(Some("A"), 1));

        assert_eq!(scanner.devices().len(), 1);
        assert!(matches!(events.try_recv().unwrap(), AppEvent::DeviceDiscovered(d) if d.label() == "A"));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn forwards_adapter_state_changes() {
        let (mut scanner, mut events) = scanner();
        scanner.handle_signal(AdapterSignal::StateChanged(AdapterState::PoweredOff));
        assert!(matches!(
            events.try_recv().unwrap(),
            AppEvent::AdapterStateChanged(AdapterState::PoweredOff)
        ));
    }
}
