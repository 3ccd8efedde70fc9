//! Core value types shared between the Bluetooth layer and the UI.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Six-octet Bluetooth hardware address. This is the stable identity of a
/// device; two devices are the same device iff their addresses are equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Debug for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, Error)]
#[error("invalid Bluetooth address: {0:?}")]
pub struct AddressParseError(String);

impl FromStr for DeviceAddress {
    type Err = AddressParseError;

    /// Parses the usual colon-separated form, e.g. `00:11:22:AA:BB:CC`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = 0;
        for (i, part) in s.split(':').enumerate() {
            if i >= 6 || part.len() != 2 {
                return Err(AddressParseError(s.to_string()));
            }
            octets[i] =
                u8::from_str_radix(part, 16).map_err(|_| AddressParseError(s.to_string()))?;
            parts = i + 1;
        }
        if parts != 6 {
            return Err(AddressParseError(s.to_string()));
        }
        Ok(Self(octets))
    }
}

/// A remote device as reported by discovery or the bonded-device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothDevice {
    pub name: Option<String>,
    pub address: DeviceAddress,
}

impl BluetoothDevice {
    pub fn new(name: Option<String>, address: DeviceAddress) -> Self {
        Self { name, address }
    }

    /// The advertised name, if it is non-empty.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }

    /// Name for UI purposes, falling back to the address.
    pub fn label(&self) -> String {
        self.display_name()
            .map(str::to_owned)
            .unwrap_or_else(|| self.address.to_string())
    }
}

/// Power state of the local adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    PoweredOff,
    PoweredOn,
}

/// A line of text exchanged over an open RFCOMM connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothMessage {
    pub text: String,
    pub sender_name: String,
    pub is_from_local_user: bool,
}

/// Lifecycle of a single connection attempt. Owned by the worker that runs
/// the attempt; observers only ever see it through events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Connecting,
    Connected,
    Failed,
    Closed,
}

/// Outcome reporting for a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionResult {
    Established,
    TransferSucceeded(BluetoothMessage),
    Error(String),
}

/// Commands issued by the UI to the Bluetooth service loop.
#[derive(Debug, Clone)]
pub enum AppCommand {
    StartScan,
    StopScan,
    Pair(DeviceAddress),
    Connect(DeviceAddress),
    SendMessage(String),
    Disconnect,
}

/// Events flowing back from the Bluetooth service loop to the UI.
#[derive(Debug, Clone)]
pub enum AppEvent {
    AdapterStateChanged(AdapterState),
    ScanStarted,
    ScanStopped,
    DeviceDiscovered(BluetoothDevice),
    BondedDevices(Vec<BluetoothDevice>),
    ConnectionStateChanged(ConnectionState),
    Connection(ConnectionResult),
    Error(String),
}
