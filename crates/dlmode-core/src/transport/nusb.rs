//! nusb-based USB transport implementation.

use nusb::transfer::{Bulk, In, Out};
use nusb::{Interface, MaybeFuture, list_devices};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::traits::{DeviceConnector, DeviceSelector, TransportError, UsbTransport};

/// Interface claimed on Download Mode devices.
const DOWNLOAD_INTERFACE: u8 = 1;

/// nusb-based USB transport.
pub struct NusbTransport {
    interface: Interface,
    in_endpoint: u8,
    out_endpoint: u8,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    /// Open the first device matching `selector`.
    #[instrument(level = "info")]
    pub fn open(selector: &DeviceSelector) -> Result<Self, TransportError> {
        let (vid, pid) = selector.ids();
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| selector.matches(d.vendor_id(), d.product_id()))
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        Self::open_device_info(device_info)
    }

    fn open_device_info(device_info: nusb::DeviceInfo) -> Result<Self, TransportError> {
        let vid = device_info.vendor_id();
        let pid = device_info.product_id();

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        // Download Mode exposes its bulk pair on the CDC data interface.
        let mut interface_number = None;
        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;

        for config in device.configurations() {
            for iface in config.interfaces() {
                for alt in iface.alt_settings() {
                    let mut bulk_in = 0;
                    let mut bulk_out = 0;
                    for ep in alt.endpoints() {
                        if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                            if ep.direction() == nusb::transfer::Direction::In {
                                bulk_in = ep.address();
                            } else {
                                bulk_out = ep.address();
                            }
                        }
                    }
                    if bulk_in != 0 && bulk_out != 0 && interface_number.is_none() {
                        interface_number = Some(iface.interface_number());
                        in_endpoint = bulk_in;
                        out_endpoint = bulk_out;
                    }
                }
            }
        }

        if in_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "In".into(),
            });
        }
        if out_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "Out".into(),
            });
        }

        let number = interface_number.unwrap_or(DOWNLOAD_INTERFACE);
        let interface =
            device
                .claim_interface(number)
                .wait()
                .map_err(|e| TransportError::ClaimInterfaceFailed {
                    interface: number,
                    message: e.to_string(),
                })?;

        info!(
            interface = number,
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            "Device opened successfully"
        );

        Ok(Self {
            interface,
            in_endpoint,
            out_endpoint,
            vid,
            pid,
        })
    }
}

impl UsbTransport for NusbTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let ep = self
            .interface
            .endpoint::<Bulk, Out>(self.out_endpoint)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        let mut writer = ep.writer(4096);
        writer
            .write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    #[instrument(skip(self))]
    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let ep = self
            .interface
            .endpoint::<Bulk, In>(self.in_endpoint)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        let mut reader = ep.reader(4096).with_read_timeout(timeout);
        let mut buf = vec![0u8; max_len];

        let n = reader.read(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::TimedOut => TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            },
            _ => TransportError::ReadFailed(e.to_string()),
        })?;

        buf.truncate(n);
        debug!(bytes_read = n, "Read complete");
        Ok(buf)
    }

    fn is_connected(&self) -> bool {
        // nusb has no cheap liveness probe; failures surface on the next transfer.
        true
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

/// Connector that enumerates real USB devices through nusb.
#[derive(Debug, Default, Clone, Copy)]
pub struct NusbConnector;

impl DeviceConnector for NusbConnector {
    type Transport = NusbTransport;

    fn open(&self, selector: &DeviceSelector) -> Result<NusbTransport, TransportError> {
        NusbTransport::open(selector)
    }
}
