//! Configuration file support for gr260dl.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (GR260_*)
//! 3. Local config file (./gr260dl.toml)
//! 4. Global config file (~/.config/gr260dl/config.toml)

use directories::ProjectDirs;
use gr260::SessionConfig;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG: &str = "gr260dl.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Remembered USB bridges, treated as known during port selection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Download defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Retransmits allowed per block.
    pub max_retries: Option<u32>,
    /// Use the barometric altitude for GPX elevation.
    #[serde(default)]
    pub baro_altitude: bool,
    /// Line-level response timeout in milliseconds.
    pub handshake_timeout_ms: Option<u64>,
    /// Idle gap that ends a binary block, in milliseconds.
    pub transfer_timeout_ms: Option<u64>,
}

impl DownloadConfig {
    /// Apply these defaults on top of a session configuration.
    pub fn apply(&self, mut session: SessionConfig) -> SessionConfig {
        if let Some(retries) = self.max_retries {
            session = session.with_max_block_retries(retries);
        }
        if let Some(ms) = self.handshake_timeout_ms {
            session = session.with_handshake_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.transfer_timeout_ms {
            session = session.with_transfer_timeout(Duration::from_millis(ms));
        }
        session
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Download configuration.
    #[serde(default)]
    pub download: DownloadConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Invalid TOML in config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "gr260dl").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    fn merge(&mut self, other: Self) {
        if other.port.connection.serial.is_some() {
            self.port.connection.serial = other.port.connection.serial;
        }
        for device in other.port.usb_device {
            if !self.port.usb_device.contains(&device) {
                self.port.usb_device.push(device);
            }
        }

        let download = other.download;
        if download.max_retries.is_some() {
            self.download.max_retries = download.max_retries;
        }
        if download.handshake_timeout_ms.is_some() {
            self.download.handshake_timeout_ms = download.handshake_timeout_ms;
        }
        if download.transfer_timeout_ms.is_some() {
            self.download.transfer_timeout_ms = download.transfer_timeout_ms;
        }
        if download.baro_altitude {
            self.download.baro_altitude = true;
        }
    }

    /// Whether a VID/PID pair was remembered by the user.
    pub fn is_remembered(&self, vid: u16, pid: u16) -> bool {
        self.port.usb_device.iter().any(|d| d.matches(vid, pid))
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };

        if self.port.usb_device.contains(&device) {
            return Ok(());
        }

        let path = if Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_CONFIG)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from(LOCAL_CONFIG)
        };

        self.port.usb_device.push(device);

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        info!("Saved USB device to {}", path.display());

        Ok(())
    }
}
