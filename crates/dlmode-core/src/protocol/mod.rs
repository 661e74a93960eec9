//! Protocol module - Download Mode wire definitions.

pub mod ack;
pub mod checksum;
pub mod constants;
pub mod frame;

pub use ack::{Ack, AckError, wait_ack};
pub use checksum::Checksum;
pub use constants::*;
pub use frame::{ChunkHeader, DeviceCommand, FrameError, SessionEnd, SessionStart};
