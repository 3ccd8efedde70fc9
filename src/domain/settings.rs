//! Persisted application settings.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::models::DeviceAddress;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "never"
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            console_logging_enabled: default_true(),
            file_logging_enabled: default_false(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            rotation: default_rotation(),
            ansi_colors: default_true(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "bluescout".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    // RFCOMM connection settings
    #[serde(default = "default_service_uuid")]
    pub spp_service_uuid: String,
    #[serde(default = "default_rfcomm_channel")]
    pub rfcomm_channel: u8,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    // Permission model of the platform generation we run under
    #[serde(default = "default_api_level")]
    pub platform_api_level: u32,

    // Name attached to outgoing messages
    #[serde(default = "default_local_name")]
    pub local_device_name: String,

    #[serde(default)]
    pub known_device_addresses: Vec<String>,
    #[serde(default)]
    pub last_connected_address: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            spp_service_uuid: default_service_uuid(),
            rfcomm_channel: default_rfcomm_channel(),
            connect_timeout_ms: default_connect_timeout_ms(),
            platform_api_level: default_api_level(),
            local_device_name: default_local_name(),
            known_device_addresses: Vec::new(),
            last_connected_address: None,
        }
    }
}

fn default_service_uuid() -> String {
    // Serial Port Profile
    "00001101-0000-1000-8000-00805f9b34fb".to_string()
}
fn default_rfcomm_channel() -> u8 {
    1
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_api_level() -> u32 {
    crate::domain::permissions::MODERN_PERMISSIONS_API_LEVEL
}
fn default_local_name() -> String {
    "bluescout".to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self::with_path(Self::settings_path()?))
    }

    /// Loads from the given path, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("bluescout");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Records a successful connection so the device can be offered again.
    pub fn remember_device(&mut self, address: DeviceAddress) -> anyhow::Result<()> {
        let address = address.to_string();
        if !self.settings.known_device_addresses.contains(&address) {
            self.settings.known_device_addresses.push(address.clone());
        }
        self.settings.last_connected_address = Some(address);
        self.save()
    }
}
