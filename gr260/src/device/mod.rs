//! Serial port discovery and classification.
//!
//! The logger's data cable is a USB-UART bridge, so discovery means listing
//! serial ports and ranking them by the bridge chip behind them. The cable
//! that ships with the GR260 is a Prolific PL2303, which ranks first.

use crate::error::{Error, Result};

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// Transport type for discovered endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TransportKind {
    /// Serial transport (UART/USB CDC).
    Serial,
    /// Unknown or unclassified transport.
    Unknown,
}

/// Known USB-UART bridge kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceKind {
    /// Prolific PL2303, as used by the logger's own cable.
    Prolific,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs for common USB-to-UART bridges.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], DeviceKind::Prolific),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], DeviceKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        DeviceKind::Ch340,
    ),
];

impl DeviceKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_USB_DEVICES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && pids.contains(&pid))
            .map_or(Self::Unknown, |(_, _, device)| *device)
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Prolific => "PL2303",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Ch340 => "CH340/CH341",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known bridge.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Auto-selection rank, lower is better.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Prolific => 0,
            Self::Cp210x => 1,
            Self::Ftdi => 2,
            Self::Ch340 => 3,
            Self::Unknown => 4,
        }
    }
}

/// Discovered device endpoint information.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Endpoint name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Transport type.
    pub transport: TransportKind,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Check if this endpoint sits behind a known USB-UART bridge.
    pub fn is_likely_logger(&self) -> bool {
        self.device.is_known()
    }
}

/// Detect all available endpoints with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            return Vec::new();
        },
    };

    ports
        .into_iter()
        .map(|port_info| {
            let mut detected = DetectedPort {
                name: port_info.port_name.clone(),
                transport: TransportKind::Serial,
                device: DeviceKind::Unknown,
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial: None,
            };

            if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                detected.vid = Some(usb_info.vid);
                detected.pid = Some(usb_info.pid);
                detected.manufacturer = usb_info.manufacturer;
                detected.product = usb_info.product;
                detected.serial = usb_info.serial_number;
                detected.device = DeviceKind::from_vid_pid(usb_info.vid, usb_info.pid);

                trace!(
                    "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                    port_info.port_name, usb_info.vid, usb_info.pid, detected.device
                );
            }

            detected
        })
        .collect()
}

/// Detect all available endpoints (no serial backend: always empty).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Pick the best candidate from `ports`: known bridges by priority, then the
/// first port of any kind.
pub fn best_candidate(ports: &[DetectedPort]) -> Option<&DetectedPort> {
    ports
        .iter()
        .filter(|p| p.device.is_known())
        .min_by_key(|p| p.device.priority())
        .or_else(|| ports.first())
}

/// Auto-detect a single logger endpoint.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let ports = detect_ports();
    let port = best_candidate(&ports).ok_or(Error::DeviceNotFound)?;

    if port.device.is_known() {
        info!(
            "Auto-detected {} USB-UART bridge: {}",
            port.device.name(),
            port.name
        );
    } else {
        info!("Using first available port: {}", port.name);
    }
    Ok(port.clone())
}

/// Auto-detect a single logger endpoint (no serial backend: unsupported).
#[cfg(not(feature = "native"))]
pub fn auto_detect_port() -> Result<DetectedPort> {
    Err(Error::Unsupported(
        "Port detection needs the `native` feature".to_string(),
    ))
}

/// Format a list of detected endpoints for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port.device.is_known() {
                format!(" [{}]", port.device.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };

            let product_info = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{}{}", port.name, device_info, product_info)
        })
        .collect()
}
