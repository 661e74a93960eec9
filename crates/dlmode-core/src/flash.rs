//! Flash session protocol.
//!
//! Drives one `start → chunk/ACK … → end` exchange per partition and the
//! simple device commands (reboot, PIT request, PIT upload). At most one
//! session is in flight; it is discarded as soon as it ends.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::events::{EngineEvent, FlashObserver, ProgressEvent};
use crate::image::ChunkState;
use crate::protocol::{
    ABORT_FRAME, Ack, AckError, Checksum, ChunkHeader, DEFAULT_ACK_TIMEOUT_MS, DEFAULT_CHUNK_SIZE,
    DeviceCommand, FrameError, MAX_PIT_DOWNLOAD, PIT_UPLOAD_FRAME, SessionEnd, SessionStart,
    wait_ack,
};
use crate::transport::{TransportError, UsbTransport};

/// Status line suffix for failures that may have left the device half-written.
pub const DEVICE_STATE_UNKNOWN: &str = "device state unknown, do not disconnect without investigating";

/// Lifecycle of a flash session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Negotiating,
    Transferring,
    Finalizing,
    Complete,
    Failed,
    Aborted,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "Idle"),
            SessionStatus::Negotiating => write!(f, "Negotiating"),
            SessionStatus::Transferring => write!(f, "Transferring"),
            SessionStatus::Finalizing => write!(f, "Finalizing"),
            SessionStatus::Complete => write!(f, "Complete"),
            SessionStatus::Failed => write!(f, "Failed"),
            SessionStatus::Aborted => write!(f, "Aborted"),
        }
    }
}

#[derive(Error, Debug)]
pub enum FlashError {
    #[error("A flash session is already in progress")]
    Busy,

    #[error("Refusing to flash an empty image")]
    EmptyPayload,

    #[error("Chunk size must be non-zero")]
    ZeroChunkSize,

    #[error("Image of {len} bytes exceeds the 32-bit length field")]
    PayloadTooLarge { len: usize },

    #[error("Invalid partition name: {0}")]
    InvalidPartition(#[from] FrameError),

    #[error("No session is transferring")]
    NotTransferring,

    #[error("Chunk of {len} bytes does not fit the session")]
    InvalidChunk { len: usize },

    #[error("Session end requested after {sent} of {total} bytes")]
    Incomplete { sent: usize, total: usize },

    #[error("Handshake failed: {0}")]
    Handshake(#[source] AckError),

    #[error("Chunk {} not acknowledged within {timeout_ms}ms", .sequence + 1)]
    AckTimeout { sequence: u32, timeout_ms: u64 },

    #[error("Chunk {} rejected: {source}", .sequence + 1)]
    AckRejected {
        sequence: u32,
        #[source]
        source: AckError,
    },

    #[error("Session end failed: {0}")]
    Finalize(#[source] AckError),

    #[error("Transport failed while {status}: {source}")]
    Transport {
        status: SessionStatus,
        #[source]
        source: TransportError,
    },

    #[error("Flash aborted after {bytes_sent} bytes")]
    Aborted { bytes_sent: usize },

    #[error("{command} failed: {source}")]
    Command {
        command: &'static str,
        #[source]
        source: AckError,
    },

    #[error("Device reported a PIT of {length} bytes (limit {})", MAX_PIT_DOWNLOAD)]
    PitLength { length: u32 },

    #[error("PIT download stopped at {received} of {expected} bytes: {source}")]
    PitTransfer {
        received: usize,
        expected: usize,
        #[source]
        source: TransportError,
    },
}

impl FlashError {
    /// True when payload bytes may already have reached the device.
    pub fn device_state_unknown(&self) -> bool {
        match self {
            FlashError::AckTimeout { .. } | FlashError::AckRejected { .. } | FlashError::Finalize(_) => true,
            FlashError::Transport { status, .. } => {
                matches!(status, SessionStatus::Transferring | SessionStatus::Finalizing)
            }
            FlashError::Aborted { bytes_sent } => *bytes_sent > 0,
            FlashError::Incomplete { sent, .. } => *sent > 0,
            _ => false,
        }
    }

    /// One-line message for the presentation layer.
    pub fn status_message(&self) -> String {
        if self.device_state_unknown() {
            format!("{self}: {DEVICE_STATE_UNKNOWN}")
        } else {
            self.to_string()
        }
    }
}

/// Cooperative cancellation flag, checked between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Protocol tuning.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolConfig {
    pub chunk_size: usize,
    pub ack_timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            ack_timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
        }
    }
}

/// The in-flight session.
#[derive(Debug)]
pub struct FlashSession {
    pub partition: String,
    pub total_len: usize,
    pub bytes_sent: usize,
    pub sequence: u32,
    pub status: SessionStatus,
    checksum: Checksum,
}

impl FlashSession {
    fn new(partition: &str, total_len: usize) -> Self {
        Self {
            partition: partition.to_string(),
            total_len,
            bytes_sent: 0,
            sequence: 0,
            status: SessionStatus::Negotiating,
            checksum: Checksum::new(),
        }
    }

    pub fn checksum(&self) -> u32 {
        self.checksum.value()
    }
}

/// Session/chunk/ACK framing over any [`UsbTransport`].
#[derive(Debug, Default)]
pub struct FlashProtocol {
    config: ProtocolConfig,
    active: Option<FlashSession>,
    last_status: SessionStatus,
}

impl FlashProtocol {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config,
            active: None,
            last_status: SessionStatus::Idle,
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn active(&self) -> Option<&FlashSession> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Status of the in-flight session, or how the last one ended.
    pub fn status(&self) -> SessionStatus {
        self.active
            .as_ref()
            .map(|s| s.status)
            .unwrap_or(self.last_status)
    }

    /// Negotiate a session for `total_len` bytes to `partition`.
    #[instrument(skip(self, transport))]
    pub fn begin<T: UsbTransport + ?Sized>(
        &mut self,
        transport: &T,
        partition: &str,
        total_len: usize,
    ) -> Result<(), FlashError> {
        if self.active.is_some() {
            return Err(FlashError::Busy);
        }
        if self.config.chunk_size == 0 {
            return Err(FlashError::ZeroChunkSize);
        }
        if total_len == 0 {
            return Err(FlashError::EmptyPayload);
        }
        if u32::try_from(total_len).is_err() {
            return Err(FlashError::PayloadTooLarge { len: total_len });
        }
        let start = SessionStart::new(partition)?;

        self.active = Some(FlashSession::new(partition, total_len));
        let negotiated = transport
            .write_all(&start.to_bytes())
            .map_err(AckError::from)
            .and_then(|()| wait_ack(transport, self.config.ack_timeout));

        match negotiated {
            Ok(_) => {
                self.set_status(SessionStatus::Transferring);
                info!(partition = partition, size = total_len, "Session negotiated");
                Ok(())
            }
            Err(e) => {
                self.end(SessionStatus::Failed);
                Err(FlashError::Handshake(e))
            }
        }
    }

    /// Send one chunk and wait for its acknowledgment.
    ///
    /// Any failure ends the session as `Failed`.
    pub fn send_chunk<T, O>(&mut self, transport: &T, chunk: &[u8], observer: &O) -> Result<ProgressEvent, FlashError>
    where
        T: UsbTransport + ?Sized,
        O: FlashObserver + ?Sized,
    {
        let ack_timeout = self.config.ack_timeout;
        let chunk_size = self.config.chunk_size;
        let session = match self.active.as_mut() {
            Some(s) if s.status == SessionStatus::Transferring => s,
            _ => return Err(FlashError::NotTransferring),
        };
        if chunk.is_empty() || chunk.len() > chunk_size || session.bytes_sent + chunk.len() > session.total_len {
            return Err(FlashError::InvalidChunk { len: chunk.len() });
        }

        let sequence = session.sequence;
        let header = ChunkHeader::new(sequence, chunk.len() as u32);
        let sent = transport
            .write_all(&header.to_bytes())
            .and_then(|()| transport.write_all(chunk));
        if let Err(source) = sent {
            self.end(SessionStatus::Failed);
            return Err(FlashError::Transport {
                status: SessionStatus::Transferring,
                source,
            });
        }
        session.checksum.update(chunk);
        session.bytes_sent += chunk.len();

        if let Err(e) = wait_ack(transport, ack_timeout) {
            warn!(sequence = sequence, error = %e, "Chunk not acknowledged");
            self.end(SessionStatus::Failed);
            return Err(match e {
                AckError::Timeout { timeout_ms } => FlashError::AckTimeout { sequence, timeout_ms },
                other => FlashError::AckRejected { sequence, source: other },
            });
        }

        session.sequence += 1;
        debug!(sequence = sequence, sent = session.bytes_sent, total = session.total_len, "Chunk acknowledged");
        let progress = ProgressEvent::new(session.bytes_sent, session.total_len, format!("Chunk {}", sequence + 1));
        observer.on_event(&EngineEvent::Progress(progress.clone()));
        Ok(progress)
    }

    /// Send the session end frame and wait for its acknowledgment.
    ///
    /// Ending before every byte was sent aborts the session instead.
    pub fn finish<T, O>(&mut self, transport: &T, observer: &O) -> Result<(), FlashError>
    where
        T: UsbTransport + ?Sized,
        O: FlashObserver + ?Sized,
    {
        let ack_timeout = self.config.ack_timeout;
        let session = match self.active.as_mut() {
            Some(s) if s.status == SessionStatus::Transferring => s,
            _ => return Err(FlashError::NotTransferring),
        };
        if session.bytes_sent != session.total_len {
            let (sent, total) = (session.bytes_sent, session.total_len);
            warn!(sent = sent, total = total, "Session end before all bytes were sent");
            self.abort(transport)?;
            return Err(FlashError::Incomplete { sent, total });
        }

        session.status = SessionStatus::Finalizing;
        let end = SessionEnd::new(session.total_len as u32, session.checksum.value());
        let finalized = transport
            .write_all(&end.to_bytes())
            .map_err(AckError::from)
            .and_then(|()| wait_ack(transport, ack_timeout));

        match finalized {
            Ok(_) => {
                info!(partition = %session.partition, checksum = format!("0x{:08X}", end.checksum), "Session complete");
                self.end(SessionStatus::Complete);
                observer.on_event(&EngineEvent::Progress(ProgressEvent::complete()));
                Ok(())
            }
            Err(e) => {
                self.end(SessionStatus::Failed);
                Err(FlashError::Finalize(e))
            }
        }
    }

    /// Abort the active session, if any.
    ///
    /// Returns whether a session was aborted; without one this is a no-op.
    pub fn abort<T: UsbTransport + ?Sized>(&mut self, transport: &T) -> Result<bool, FlashError> {
        let Some(session) = self.active.as_ref() else {
            return Ok(false);
        };
        let status = session.status;
        info!(partition = %session.partition, sent = session.bytes_sent, "Aborting session");
        self.end(SessionStatus::Aborted);
        transport
            .write_all(&ABORT_FRAME)
            .map_err(|source| FlashError::Transport { status, source })?;
        Ok(true)
    }

    /// Run a whole session over `data`, checking `cancel` between chunks.
    pub fn flash<T, O>(
        &mut self,
        transport: &T,
        partition: &str,
        data: &[u8],
        cancel: &CancelToken,
        observer: &O,
    ) -> Result<(), FlashError>
    where
        T: UsbTransport + ?Sized,
        O: FlashObserver + ?Sized,
    {
        self.begin(transport, partition, data.len())?;
        let mut chunks = ChunkState::new(data.len(), self.config.chunk_size);
        while let Some(chunk) = chunks.next_chunk(data) {
            if cancel.is_cancelled() {
                let bytes_sent = self.active.as_ref().map_or(0, |s| s.bytes_sent);
                self.abort(transport)?;
                return Err(FlashError::Aborted { bytes_sent });
            }
            self.send_chunk(transport, chunk, observer)?;
        }
        self.finish(transport, observer)
    }

    /// Ask the device to reboot.
    pub fn reboot<T: UsbTransport + ?Sized>(&mut self, transport: &T) -> Result<(), FlashError> {
        self.command(transport, DeviceCommand::Reboot).map(|_| ())
    }

    /// Download the device's PIT as raw bytes.
    #[instrument(skip(self, transport))]
    pub fn request_pit<T: UsbTransport + ?Sized>(&mut self, transport: &T) -> Result<Vec<u8>, FlashError> {
        let ack = self.command(transport, DeviceCommand::RequestPit)?;
        let length = ack.word(1);
        let expected = length as usize;
        if expected == 0 || expected > MAX_PIT_DOWNLOAD {
            return Err(FlashError::PitLength { length });
        }

        let mut data = Vec::with_capacity(expected);
        while data.len() < expected {
            let received = data.len();
            let part = transport
                .read(expected - received, self.config.ack_timeout)
                .map_err(|source| FlashError::PitTransfer {
                    received,
                    expected,
                    source,
                })?;
            if part.is_empty() {
                return Err(FlashError::PitTransfer {
                    received,
                    expected,
                    source: TransportError::ReadFailed("empty read".to_string()),
                });
            }
            data.extend_from_slice(&part);
        }
        data.truncate(expected);
        info!(size = expected, "PIT downloaded");
        Ok(data)
    }

    /// Upload a serialized PIT (repartition).
    #[instrument(skip(self, transport, pit))]
    pub fn send_pit<T: UsbTransport + ?Sized>(&mut self, transport: &T, pit: &[u8]) -> Result<(), FlashError> {
        if self.active.is_some() {
            return Err(FlashError::Busy);
        }
        let command = "PIT upload";
        transport
            .write_all(&PIT_UPLOAD_FRAME)
            .and_then(|()| transport.write_all(pit))
            .map_err(|e| FlashError::Command {
                command,
                source: e.into(),
            })?;
        wait_ack(transport, self.config.ack_timeout).map_err(|source| FlashError::Command { command, source })?;
        info!(size = pit.len(), "PIT uploaded");
        Ok(())
    }

    /// Send a fixed-size command and wait for its single acknowledgment.
    fn command<T: UsbTransport + ?Sized>(&mut self, transport: &T, command: DeviceCommand) -> Result<Ack, FlashError> {
        if self.active.is_some() {
            return Err(FlashError::Busy);
        }
        let name = command.name();
        debug!(command = name, "Sending command");
        transport
            .write_all(&command.to_bytes())
            .map_err(AckError::from)
            .and_then(|()| wait_ack(transport, self.config.ack_timeout))
            .map_err(|source| FlashError::Command { command: name, source })
    }

    fn set_status(&mut self, status: SessionStatus) {
        if let Some(session) = self.active.as_mut() {
            session.status = status;
        }
    }

    /// Discard the session, remembering how it ended.
    fn end(&mut self, status: SessionStatus) {
        self.active = None;
        self.last_status = status;
    }
}
