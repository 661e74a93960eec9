//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait for bulk communication with a device
//! in Download Mode, and the `DeviceConnector` trait that opens one,
//! allowing different implementations (nusb, mock, etc.).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::constants::{DOWNLOAD_MODE_PIDS, SAMSUNG_VENDOR_ID};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Which device the connector should open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelector {
    /// First Samsung device exposing a known Download Mode PID.
    #[default]
    Any,
    /// Exact VID/PID pair.
    Ids { vid: u16, pid: u16 },
}

impl DeviceSelector {
    /// Check whether a device with these ids is selected.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        match self {
            DeviceSelector::Any => vid == SAMSUNG_VENDOR_ID && DOWNLOAD_MODE_PIDS.contains(&pid),
            DeviceSelector::Ids {
                vid: want_vid,
                pid: want_pid,
            } => vid == *want_vid && pid == *want_pid,
        }
    }

    /// Ids reported in `DeviceNotFound` errors.
    pub fn ids(&self) -> (u16, u16) {
        match self {
            DeviceSelector::Any => (SAMSUNG_VENDOR_ID, 0),
            DeviceSelector::Ids { vid, pid } => (*vid, *pid),
        }
    }
}

/// Abstract USB transport interface over one opened device channel.
///
/// Dropping the transport closes the channel and releases the interface.
pub trait UsbTransport: Send + Sync {
    /// Write raw bytes to the bulk OUT endpoint.
    fn write(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read up to `max_len` bytes from the bulk IN endpoint.
    ///
    /// Must return `TransportError::Timeout` if nothing arrives in `timeout`.
    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Write all of `data`, treating a partial write as an error.
    fn write_all(&self, data: &[u8]) -> Result<(), TransportError> {
        let written = self.write(data)?;
        if written != data.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: data.len(),
            });
        }
        Ok(())
    }

    /// Check if device is still connected.
    fn is_connected(&self) -> bool;

    /// Get the current VID.
    fn vendor_id(&self) -> u16;

    /// Get the current PID.
    fn product_id(&self) -> u16;
}

/// Opens a transport to a device in Download Mode.
pub trait DeviceConnector {
    type Transport: UsbTransport;

    /// Open and claim the selected device.
    fn open(&self, selector: &DeviceSelector) -> Result<Self::Transport, TransportError>;
}
