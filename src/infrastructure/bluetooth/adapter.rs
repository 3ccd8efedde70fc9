//! Platform adapter abstraction.
//!
//! The operating system's Bluetooth stack is consumed through the
//! [`BluetoothAdapter`] trait; the rest of the application never touches a
//! platform API directly. Backends deliver discovery notifications through
//! [`EventSubscription`] registrations, which release themselves when
//! dropped.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::models::{AdapterState, BluetoothDevice, DeviceAddress};

/// Serial Port Profile, the well-known service for RFCOMM links.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Where to open an RFCOMM connection on a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfcommTarget {
    pub service_uuid: Uuid,
    pub channel: u8,
}

impl Default for RfcommTarget {
    fn default() -> Self {
        Self {
            service_uuid: SPP_UUID,
            channel: 1,
        }
    }
}

/// Byte stream over an established RFCOMM connection.
pub trait RfcommStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RfcommStream for T {}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("no usable Bluetooth adapter: {0}")]
    NotAvailable(String),

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("pairing with {address} failed: {reason}")]
    Pairing {
        address: DeviceAddress,
        reason: String,
    },

    #[error("connection refused by {0}")]
    ConnectionRefused(DeviceAddress),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Backend(String),
}

/// Notification classes a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    StateChanged,
    DeviceFound,
}

/// A notification delivered by the adapter backend.
#[derive(Debug, Clone)]
pub enum AdapterSignal {
    StateChanged(AdapterState),
    DeviceFound(BluetoothDevice),
}

impl AdapterSignal {
    pub fn kind(&self) -> EventKind {
        match self {
            AdapterSignal::StateChanged(_) => EventKind::StateChanged,
            AdapterSignal::DeviceFound(_) => EventKind::DeviceFound,
        }
    }
}

/// Handle for a registered event subscriber.
///
/// Releasing is idempotent: calling [`release`](Self::release) twice, or
/// dropping after an explicit release, does nothing the second time. A
/// subscription that is never released explicitly releases itself on drop,
/// so a registration cannot outlive its owner.
pub struct EventSubscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl EventSubscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Operations the application needs from the platform Bluetooth stack.
#[async_trait]
pub trait BluetoothAdapter: Send + Sync {
    /// Current power state of the adapter.
    async fn state(&self) -> Result<AdapterState, AdapterError>;

    /// Powers the adapter on if it is off.
    async fn enable(&self) -> Result<(), AdapterError>;

    async fn start_discovery(&self) -> Result<(), AdapterError>;

    async fn cancel_discovery(&self) -> Result<(), AdapterError>;

    /// Establishes a platform-level bond with the device.
    async fn create_bond(&self, address: DeviceAddress) -> Result<(), AdapterError>;

    async fn bonded_devices(&self) -> Result<Vec<BluetoothDevice>, AdapterError>;

    /// Opens an RFCOMM stream to a service on the device.
    async fn open_rfcomm(
        &self,
        address: DeviceAddress,
        target: RfcommTarget,
    ) -> Result<Box<dyn RfcommStream>, AdapterError>;

    /// Registers `sender` for signals of the given kind.
    fn register(
        &self,
        kind: EventKind,
        sender: mpsc::UnboundedSender<AdapterSignal>,
    ) -> EventSubscription;
}

/// Fan-out of adapter signals to registered subscribers. Backends hold one
/// and emit into it; `register` hands out self-releasing subscriptions.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    inner: Arc<Mutex<DispatcherInner>>,
}

#[derive(Default)]
struct DispatcherInner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

struct Subscriber {
    id: u64,
    kind: EventKind,
    sender: mpsc::UnboundedSender<AdapterSignal>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        kind: EventKind,
        sender: mpsc::UnboundedSender<AdapterSignal>,
    ) -> EventSubscription {
        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.subscribers.push(Subscriber { id, kind, sender });
            id
        };

        let registry = Arc::downgrade(&self.inner);
        EventSubscription::new(move || {
            if let Some(inner) = registry.upgrade() {
                let mut inner = inner.lock().unwrap();
                inner.subscribers.retain(|subscriber| subscriber.id != id);
            }
        })
    }

    pub fn emit(&self, signal: AdapterSignal) {
        let inner = self.inner.lock().unwrap();
        for subscriber in &inner.subscribers {
            if subscriber.kind == signal.kind() {
                let _ = subscriber.sender.send(signal.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_signal(octet: u8) -> AdapterSignal {
        AdapterSignal::DeviceFound(BluetoothDevice::new(
            Some("Test".to_string()),
            DeviceAddress::new([0, 0, 0, 0, 0, octet]),
        ))
    }

    #[test]
    fn delivers_only_matching_kinds() {
        let dispatcher = EventDispatcher::new();
        let (found_tx, mut found_rx) = mpsc::unbounded_channel();
        let (state_tx, mut state_rx) = mpsc::unbounded_channel();
        let _found = dispatcher.register(EventKind::DeviceFound, found_tx);
        let _state = dispatcher.register(EventKind::StateChanged, state_tx);

        dispatcher.emit(device_signal(1));
        dispatcher.emit(AdapterSignal::StateChanged(AdapterState::PoweredOff));

        assert!(matches!(
            found_rx.try_recv().unwrap(),
            AdapterSignal::DeviceFound(_)
        ));
        assert!(found_rx.try_recv().is_err());
        assert!(matches!(
            state_rx.try_recv().unwrap(),
            AdapterSignal::StateChanged(AdapterState::PoweredOff)
        ));
    }

    #[test]
    fn released_subscription_receives_nothing() {
        let dispatcher = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut subscription = dispatcher.register(EventKind::DeviceFound, tx);

        dispatcher.emit(device_signal(1));
        subscription.release();
        dispatcher.emit(device_signal(2));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn release_is_idempotent() {
        let dispatcher = EventDispatcher::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut subscription = dispatcher.register(EventKind::DeviceFound, tx);

        subscription.release();
        assert!(subscription.is_released());
        // A second release, and the implicit release on drop, are no-ops.
        subscription.release();
        drop(subscription);
    }

    #[test]
    fn drop_releases_the_registration() {
        let dispatcher = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(dispatcher.register(EventKind::DeviceFound, tx));

        dispatcher.emit(device_signal(1));
        assert!(rx.try_recv().is_err());
    }
}
