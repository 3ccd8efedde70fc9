//! Bluetooth Module
//!
//! Discovery, pairing, and RFCOMM connections over an abstracted platform
//! adapter.
//!
//! ## Modules
//!
//! - [`adapter`] - Platform adapter trait, events, and subscriptions
//! - [`scanner`] - Device discovery and the discovered-device registry
//! - [`connection`] - RFCOMM connection worker
//! - [`service`] - Main service coordinator
//! - [`bluez`] - BlueZ backend (Linux)
//! - [`loopback`] - In-process backend for tests and hardware-less runs

pub mod adapter;
#[cfg(target_os = "linux")]
pub mod bluez;
pub mod connection;
pub mod loopback;
pub mod scanner;
pub mod service;

use std::sync::Arc;

use adapter::{AdapterError, BluetoothAdapter};

pub use service::{BluetoothHandle, BluetoothService};

/// The adapter backend for the current platform.
#[cfg(target_os = "linux")]
pub async fn platform_adapter() -> Result<Arc<dyn BluetoothAdapter>, AdapterError> {
    Ok(Arc::new(bluez::BlueZAdapter::new().await?))
}

#[cfg(not(target_os = "linux"))]
pub async fn platform_adapter() -> Result<Arc<dyn BluetoothAdapter>, AdapterError> {
    tracing::warn!("No native Bluetooth backend for this platform; using the loopback adapter");
    Ok(Arc::new(loopback::LoopbackAdapter::demo()))
}
