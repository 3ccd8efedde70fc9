//! Permission gate for scanning and connecting.
//!
//! Which permissions are required depends on the platform generation the
//! application runs under; the two identifier sets below mirror the split
//! between modern and legacy Bluetooth permission models.

use std::collections::BTreeSet;

pub const PERMISSION_SCAN: &str = "bluetooth.scan";
pub const PERMISSION_CONNECT: &str = "bluetooth.connect";
pub const PERMISSION_LEGACY_BLUETOOTH: &str = "bluetooth";
pub const PERMISSION_LEGACY_ADMIN: &str = "bluetooth.admin";
pub const PERMISSION_LEGACY_LOCATION: &str = "location.fine";

/// First API level that uses the modern scan/connect permission pair.
pub const MODERN_PERMISSIONS_API_LEVEL: u32 = 31;

const MODERN_PERMISSIONS: &[&str] = &[PERMISSION_SCAN, PERMISSION_CONNECT];
const LEGACY_PERMISSIONS: &[&str] = &[
    PERMISSION_LEGACY_BLUETOOTH,
    PERMISSION_LEGACY_ADMIN,
    PERMISSION_LEGACY_LOCATION,
];

/// The permission set required on the given API level.
pub fn required_permissions(api_level: u32) -> &'static [&'static str] {
    if api_level >= MODERN_PERMISSIONS_API_LEVEL {
        MODERN_PERMISSIONS
    } else {
        LEGACY_PERMISSIONS
    }
}

/// Current grant state. `have_all` is a pure predicate over it: no caching,
/// no side effects, re-evaluated on every call.
#[derive(Debug, Clone)]
pub struct Permissions {
    api_level: u32,
    granted: BTreeSet<String>,
}

impl Permissions {
    /// No permissions granted yet.
    pub fn new(api_level: u32) -> Self {
        Self {
            api_level,
            granted: BTreeSet::new(),
        }
    }

    /// Every required permission granted. This is the state on desktop
    /// systems, where access control lives in the system Bluetooth daemon
    /// rather than in per-application grants.
    pub fn granted_all(api_level: u32) -> Self {
        let mut permissions = Self::new(api_level);
        for permission in required_permissions(api_level) {
            permissions.grant(permission);
        }
        permissions
    }

    pub fn grant(&mut self, permission: &str) {
        self.granted.insert(permission.to_string());
    }

    pub fn revoke(&mut self, permission: &str) {
        self.granted.remove(permission);
    }

    pub fn is_granted(&self, permission: &str) -> bool {
        self.granted.contains(permission)
    }

    pub fn required(&self) -> &'static [&'static str] {
        required_permissions(self.api_level)
    }

    /// True iff every permission required on this API level is granted.
    pub fn have_all(&self) -> bool {
        self.required().iter().all(|p| self.is_granted(p))
    }

    /// The required permissions that are currently missing.
    pub fn missing(&self) -> Vec<&'static str> {
        self.required()
            .iter()
            .copied()
            .filter(|p| !self.is_granted(p))
            .collect()
    }
}
