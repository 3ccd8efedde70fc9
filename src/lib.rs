//! Classic Bluetooth scanner with pairing and RFCOMM connections.

pub mod domain;
pub mod infrastructure;
pub mod presentation;
