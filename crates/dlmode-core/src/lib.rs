//! dlmode-core: Samsung Download Mode flash protocol engine in Rust.
//!
//! This crate parses and writes Partition Information Tables, maps image
//! files to partitions, and drives the session/chunk/ACK protocol that
//! writes an image to a device in Download Mode.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Transport**: USB communication abstraction (nusb, mock)
//! - **Protocol**: Constants, frames, checksum and the ACK wait
//! - **PIT**: Partition table model, codec and validation
//! - **Resolver**: Image filename to partition mapping
//! - **Flash**: Flash session protocol and device commands
//! - **State**: Device session states
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use dlmode_core::session::{DeviceSession, PitSource, SessionConfig};
//! use dlmode_core::transport::NusbConnector;
//!
//! let mut session = DeviceSession::new(NusbConnector, SessionConfig::default());
//! session.detect().expect("no device");
//! session.load_pit(PitSource::Device).expect("PIT download failed");
//! session.flash("recovery.img").expect("flash failed");
//! ```

pub mod events;
pub mod flash;
pub mod image;
pub mod pit;
pub mod protocol;
pub mod resolver;
pub mod session;
pub mod settings;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use events::{ChannelObserver, EngineEvent, FlashObserver, LogLevel, NullObserver, ProgressEvent, TracingObserver};
pub use flash::{CancelToken, FlashError, FlashProtocol, ProtocolConfig, SessionStatus};
pub use image::{ChunkState, FlashImage, ImageError};
pub use pit::{FormatError, PitEntry, PitError, PitTable, ValidationError};
pub use resolver::{Confidence, Resolution, resolve};
pub use session::{DeviceSession, FlashStep, FlashSummary, PitSource, SessionConfig, SessionError};
pub use settings::{Setting, Settings};
pub use state::DeviceState;
pub use transport::{DeviceConnector, DeviceSelector, MockTransport, NusbConnector, NusbTransport, TransportError, UsbTransport};
