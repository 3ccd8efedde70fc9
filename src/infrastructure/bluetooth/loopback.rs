//! In-process adapter backend.
//!
//! Stands in for the platform Bluetooth stack where none is available and
//! in tests: discovery announces a scripted neighborhood, and RFCOMM
//! connections are in-memory duplex pipes whose far ends can be driven by
//! the test (or by a built-in echo peer).

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::models::{AdapterState, BluetoothDevice, DeviceAddress};
use crate::infrastructure::bluetooth::adapter::{
    AdapterError, AdapterSignal, BluetoothAdapter, EventDispatcher, EventKind, EventSubscription,
    RfcommStream, RfcommTarget, SPP_UUID,
};

/// How the loopback backend answers `open_rfcomm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Hand out a duplex pipe.
    Accept,
    /// Fail immediately.
    Refuse,
    /// Never complete; the caller's deadline or cancellation has to fire.
    Stall,
}

struct LoopbackInner {
    powered: bool,
    discovering: bool,
    neighborhood: Vec<BluetoothDevice>,
    bonded: Vec<BluetoothDevice>,
    behavior: ConnectBehavior,
    echo: bool,
    peers: Vec<DuplexStream>,
}

pub struct LoopbackAdapter {
    dispatcher: EventDispatcher,
    inner: Mutex<LoopbackInner>,
}

impl Default for LoopbackAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackAdapter {
    pub fn new() -> Self {
        Self {
            dispatcher: EventDispatcher::new(),
            inner: Mutex::new(LoopbackInner {
                powered: true,
                discovering: false,
                neighborhood: Vec::new(),
                bonded: Vec::new(),
                behavior: ConnectBehavior::Accept,
                echo: false,
                peers: Vec::new(),
            }),
        }
    }

    /// A populated adapter whose connections answer with an echo peer.
    /// Used when running without real Bluetooth hardware.
    pub fn demo() -> Self {
        let adapter = Self::new();
        {
            let mut inner = adapter.inner.lock().unwrap();
            inner.echo = true;
            inner.neighborhood = vec![
                BluetoothDevice::new(
                    Some("Demo Speaker".to_string()),
                    DeviceAddress::new([0x10, 0x20, 0x30, 0x40, 0x50, 0x01]),
                ),
                BluetoothDevice::new(
                    Some("Demo Headset".to_string()),
                    DeviceAddress::new([0x10, 0x20, 0x30, 0x40, 0x50, 0x02]),
                ),
                BluetoothDevice::new(None, DeviceAddress::new([0x10, 0x20, 0x30, 0x40, 0x50, 0x03])),
            ];
        }
        adapter
    }

    /// Adds a device to the scripted neighborhood. If discovery is running
    /// the device is announced immediately.
    pub fn push_device(&self, device: BluetoothDevice) {
        let announce = {
            let mut inner = self.inner.lock().unwrap();
            inner.neighborhood.push(device.clone());
            inner.discovering
        };
        if announce {
            self.dispatcher.emit(AdapterSignal::DeviceFound(device));
        }
    }

    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        self.inner.lock().unwrap().behavior = behavior;
    }

    pub fn set_powered(&self, powered: bool) {
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            let changed = inner.powered != powered;
            inner.powered = powered;
            changed
        };
        if changed {
            let state = if powered {
                AdapterState::PoweredOn
            } else {
                AdapterState::PoweredOff
            };
            self.dispatcher.emit(AdapterSignal::StateChanged(state));
        }
    }

    /// The far end of the most recent accepted connection.
    pub fn take_peer(&self) -> Option<DuplexStream> {
        self.inner.lock().unwrap().peers.pop()
    }

    pub fn is_discovering(&self) -> bool {
        self.inner.lock().unwrap().discovering
    }
}

#[async_trait]
impl BluetoothAdapter for LoopbackAdapter {
    async fn state(&self) -> Result<AdapterState, AdapterError> {
        let inner = self.inner.lock().unwrap();
        Ok(if inner.powered {
            AdapterState::PoweredOn
        } else {
            AdapterState::PoweredOff
        })
    }

    async fn enable(&self) -> Result<(), AdapterError> {
        self.set_powered(true);
        Ok(())
    }

    async fn start_discovery(&self) -> Result<(), AdapterError> {
        let neighborhood = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.powered {
                return Err(AdapterError::Discovery("adapter is powered off".to_string()));
            }
            inner.discovering = true;
            inner.neighborhood.clone()
        };
        debug!("Loopback discovery announcing {} devices", neighborhood.len());
        for device in neighborhood {
            self.dispatcher.emit(AdapterSignal::DeviceFound(device));
        }
        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<(), AdapterError> {
        self.inner.lock().unwrap().discovering = false;
        Ok(())
    }

    async fn create_bond(&self, address: DeviceAddress) -> Result<(), AdapterError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(device) = inner
            .neighborhood
            .iter()
            .find(|device| device.address == address)
            .cloned()
        else {
            return Err(AdapterError::Pairing {
                address,
                reason: "unknown device".to_string(),
            });
        };
        if !inner.bonded.iter().any(|bonded| bonded.address == address) {
            info!("Loopback bonded with {}", address);
            inner.bonded.push(device);
        }
        Ok(())
    }

    async fn bonded_devices(&self) -> Result<Vec<BluetoothDevice>, AdapterError> {
        Ok(self.inner.lock().unwrap().bonded.clone())
    }

    async fn open_rfcomm(
        &self,
        address: DeviceAddress,
        target: RfcommTarget,
    ) -> Result<Box<dyn RfcommStream>, AdapterError> {
        let (behavior, echo) = {
            let inner = self.inner.lock().unwrap();
            (inner.behavior, inner.echo)
        };

        match behavior {
            ConnectBehavior::Refuse => Err(AdapterError::ConnectionRefused(address)),
            ConnectBehavior::Stall => std::future::pending().await,
            ConnectBehavior::Accept => {
                if target.service_uuid != SPP_UUID {
                    return Err(AdapterError::Backend(format!(
                        "service {} not available on {}",
                        target.service_uuid, address
                    )));
                }
                let (local, peer) = tokio::io::duplex(4096);
                if echo {
                    spawn_echo_peer(peer);
                } else {
                    self.inner.lock().unwrap().peers.push(peer);
                }
                Ok(Box::new(local))
            }
        }
    }

    fn register(
        &self,
        kind: EventKind,
        sender: mpsc::UnboundedSender<AdapterSignal>,
    ) -> EventSubscription {
        self.dispatcher.register(kind, sender)
    }
}

fn spawn_echo_peer(peer: DuplexStream) {
    tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(peer);
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let reply = format!("echo: {}\n", line);
            if write.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    });
}
