//! Acknowledgment parsing and the shared ACK-wait primitive.
//!
//! Every command and every chunk is answered by a single 16-byte
//! response whose first word decides acceptance.

use std::fmt;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;
use tracing::{debug, trace};

use super::constants::{ACK_ACCEPTED, ACK_SIZE};
use crate::transport::{TransportError, UsbTransport};

/// Why an acknowledgment wait did not produce an accepting ACK.
#[derive(Error, Debug)]
pub enum AckError {
    #[error("no acknowledgment within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("device rejected command (status 0x{code:08X})")]
    Rejected { code: u32 },

    #[error("malformed acknowledgment ({len} bytes)")]
    Malformed { len: usize },

    #[error("transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for AckError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout { timeout_ms } => AckError::Timeout { timeout_ms },
            other => AckError::Transport(other),
        }
    }
}

/// Parsed acknowledgment from device.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Ack {
    words: [u32; 4],
}

impl Ack {
    /// Parse a response; missing trailing words read as zero.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AckError> {
        if bytes.len() < 4 {
            return Err(AckError::Malformed { len: bytes.len() });
        }
        let mut words = [0u32; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let start = i * 4;
            if let Some(raw) = bytes.get(start..start + 4) {
                *word = LittleEndian::read_u32(raw);
            }
        }
        Ok(Self { words })
    }

    /// Status word.
    pub fn code(&self) -> u32 {
        self.words[0]
    }

    /// Word `index` (0..4) of the response.
    pub fn word(&self, index: usize) -> u32 {
        self.words.get(index).copied().unwrap_or(0)
    }

    pub fn is_accepted(&self) -> bool {
        self.code() == ACK_ACCEPTED
    }
}

impl fmt::Debug for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ack({:08X} {:08X} {:08X} {:08X})",
            self.words[0], self.words[1], self.words[2], self.words[3]
        )
    }
}

/// Block for one acknowledgment, bounded by `timeout`.
///
/// Returns the ACK only if it is accepting; a negative status, a short
/// response, a transport failure and a timeout are all errors.
pub fn wait_ack<T: UsbTransport + ?Sized>(transport: &T, timeout: Duration) -> Result<Ack, AckError> {
    let bytes = transport.read(ACK_SIZE, timeout)?;
    trace!(len = bytes.len(), "ACK bytes received");
    let ack = Ack::from_bytes(&bytes)?;
    if !ack.is_accepted() {
        debug!(ack = ?ack, "Negative acknowledgment");
        return Err(AckError::Rejected { code: ack.code() });
    }
    Ok(ack)
}
