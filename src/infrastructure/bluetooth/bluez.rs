//! BlueZ adapter backend.
//!
//! Binds the [`BluetoothAdapter`] trait to the system Bluetooth daemon.
//! Discovery holds the event stream returned by BlueZ on a background task;
//! dropping that stream is what ends the platform discovery session.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::models::{AdapterState, BluetoothDevice, DeviceAddress};
use crate::infrastructure::bluetooth::adapter::{
    AdapterError, AdapterSignal, BluetoothAdapter, EventDispatcher, EventKind, EventSubscription,
    RfcommStream, RfcommTarget,
};

impl From<bluer::Error> for AdapterError {
    fn from(err: bluer::Error) -> Self {
        AdapterError::Backend(err.to_string())
    }
}

fn bluer_address(address: DeviceAddress) -> bluer::Address {
    bluer::Address::new(address.octets())
}

struct DiscoverySession {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

pub struct BlueZAdapter {
    _session: bluer::Session,
    adapter: bluer::Adapter,
    dispatcher: EventDispatcher,
    discovery: Mutex<Option<DiscoverySession>>,
}

impl BlueZAdapter {
    pub async fn new() -> Result<Self, AdapterError> {
        let session = bluer::Session::new()
            .await
            .map_err(|err| AdapterError::NotAvailable(err.to_string()))?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|err| AdapterError::NotAvailable(err.to_string()))?;
        info!("Using Bluetooth adapter {}", adapter.name());

        Ok(Self {
            _session: session,
            adapter,
            dispatcher: EventDispatcher::new(),
            discovery: Mutex::new(None),
        })
    }
}

async fn drive_discovery(
    adapter: bluer::Adapter,
    events: impl futures::Stream<Item = bluer::AdapterEvent> + Send + 'static,
    dispatcher: EventDispatcher,
    cancel: CancellationToken,
) {
    let mut events = Box::pin(events);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.next() => {
                let Some(event) = event else { break };
                match event {
                    bluer::AdapterEvent::DeviceAdded(address) => {
                        let Ok(device) = adapter.device(address) else { continue };
                        // Devices whose properties cannot be read are dropped.
                        let name = device.name().await.ok().flatten();
                        dispatcher.emit(AdapterSignal::DeviceFound(BluetoothDevice::new(
                            name,
                            DeviceAddress::new(address.0),
                        )));
                    }
                    bluer::AdapterEvent::PropertyChanged(bluer::AdapterProperty::Powered(powered)) => {
                        let state = if powered {
                            AdapterState::PoweredOn
                        } else {
                            AdapterState::PoweredOff
                        };
                        dispatcher.emit(AdapterSignal::StateChanged(state));
                    }
                    _ => {}
                }
            }
        }
    }
    // Dropping the stream ends the BlueZ discovery session.
    debug!("Discovery task finished");
}

#[async_trait]
impl BluetoothAdapter for BlueZAdapter {
    async fn state(&self) -> Result<AdapterState, AdapterError> {
        let powered = self.adapter.is_powered().await?;
        Ok(if powered {
            AdapterState::PoweredOn
        } else {
            AdapterState::PoweredOff
        })
    }

    async fn enable(&self) -> Result<(), AdapterError> {
        self.adapter.set_powered(true).await?;
        Ok(())
    }

    async fn start_discovery(&self) -> Result<(), AdapterError> {
        let mut discovery = self.discovery.lock().await;
        if discovery.is_some() {
            debug!("Discovery already running");
            return Ok(());
        }

        let events = self
            .adapter
            .discover_devices()
            .await
            .map_err(|err| AdapterError::Discovery(err.to_string()))?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(drive_discovery(
            self.adapter.clone(),
            events,
            self.dispatcher.clone(),
            cancel.clone(),
        ));
        *discovery = Some(DiscoverySession { cancel, task });
        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<(), AdapterError> {
        let Some(session) = self.discovery.lock().await.take() else {
            return Ok(());
        };
        session.cancel.cancel();
        if let Err(err) = session.task.await {
            warn!("Discovery task did not shut down cleanly: {}", err);
        }
        Ok(())
    }

    async fn create_bond(&self, address: DeviceAddress) -> Result<(), AdapterError> {
        let device = self.adapter.device(bluer_address(address))?;
        if device.is_paired().await? {
            debug!("{} is already bonded", address);
            return Ok(());
        }
        device.pair().await.map_err(|err| AdapterError::Pairing {
            address,
            reason: err.to_string(),
        })
    }

    async fn bonded_devices(&self) -> Result<Vec<BluetoothDevice>, AdapterError> {
        let mut bonded = Vec::new();
        for address in self.adapter.device_addresses().await? {
            let Ok(device) = self.adapter.device(address) else {
                continue;
            };
            if device.is_paired().await.unwrap_or(false) {
                let name = device.name().await.ok().flatten();
                bonded.push(BluetoothDevice::new(name, DeviceAddress::new(address.0)));
            }
        }
        Ok(bonded)
    }

    async fn open_rfcomm(
        &self,
        address: DeviceAddress,
        target: RfcommTarget,
    ) -> Result<Box<dyn RfcommStream>, AdapterError> {
        // BlueZ stream sockets connect by channel number; the service UUID
        // identifies the profile the channel belongs to.
        debug!(
            "Opening RFCOMM channel {} on {} (service {})",
            target.channel, address, target.service_uuid
        );
        let socket_addr = bluer::rfcomm::SocketAddr::new(bluer_address(address), target.channel);
        let stream = bluer::rfcomm::Stream::connect(socket_addr).await?;
        Ok(Box::new(stream))
    }

    fn register(
        &self,
        kind: EventKind,
        sender: mpsc::UnboundedSender<AdapterSignal>,
    ) -> EventSubscription {
        self.dispatcher.register(kind, sender)
    }
}
