//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::{MockConnector, MockTransport};
pub use nusb::{NusbConnector, NusbTransport};
pub use traits::{DeviceConnector, DeviceSelector, TransportError, UsbTransport};
