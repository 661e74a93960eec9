//! Device session - high-level orchestrator for Download Mode operations.
//!
//! Sequences detect → PIT load → flash → reboot against one device and is
//! the single-flight guard: while a flash is pending every other
//! operation returns [`SessionError::Busy`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::events::{EngineEvent, FlashObserver, LogLevel, ProgressEvent, TracingObserver};
use crate::flash::{CancelToken, FlashError, FlashProtocol, ProtocolConfig, SessionStatus};
use crate::image::{ChunkState, FlashImage, ImageError};
use crate::pit::{self, PitError, PitTable};
use crate::protocol::{DEFAULT_ACK_TIMEOUT_MS, DEFAULT_CHUNK_SIZE};
use crate::resolver::{self, Resolution};
use crate::settings::Settings;
use crate::state::{DeviceState, StateMachine};
use crate::transport::{DeviceConnector, DeviceSelector, TransportError, UsbTransport};

/// Configuration for a device session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to wait for each acknowledgment.
    pub ack_timeout_ms: u64,
    /// Payload bytes per chunk. Must be non-zero.
    pub chunk_size: usize,
    /// How long `detect` keeps polling; 0 means a single attempt.
    pub detect_wait_secs: u64,
    /// Which device to open.
    pub device: DeviceSelector,
    /// Persisted flags.
    pub settings: Settings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            detect_wait_secs: 0,
            device: DeviceSelector::Any,
            settings: Settings::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        if config.chunk_size == 0 {
            bail!("chunk_size must be non-zero");
        }
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig {
            chunk_size: if self.chunk_size == 0 {
                DEFAULT_CHUNK_SIZE
            } else {
                self.chunk_size
            },
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No Download Mode device found: {0}")]
    DeviceNotFound(#[source] TransportError),

    #[error("Another operation is in progress")]
    Busy,

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: DeviceState,
    },

    #[error("Cannot determine partition for '{filename}'")]
    UnresolvedPartition { filename: String },

    #[error("Partition {partition} was inferred without a PIT; disable safe mode or load a PIT")]
    UnverifiedPartition { partition: String },

    #[error("Image of {size} bytes does not fit {partition} ({capacity} bytes)")]
    ImageTooLarge {
        partition: String,
        size: usize,
        capacity: u64,
    },

    #[error("Repartitioning is disabled in safe mode")]
    RepartitionRefused,

    #[error(transparent)]
    Pit(#[from] PitError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Flash(#[from] FlashError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// True when the device may hold a partially written partition.
    pub fn device_state_unknown(&self) -> bool {
        matches!(self, SessionError::Flash(e) if e.device_state_unknown())
    }

    /// One-line message for the presentation layer.
    pub fn status_message(&self) -> String {
        match self {
            SessionError::Flash(e) => e.status_message(),
            other => other.to_string(),
        }
    }
}

/// Where `load_pit` takes the table from.
#[derive(Debug, Clone)]
pub enum PitSource {
    File(PathBuf),
    Bytes(Vec<u8>),
    /// Download from the connected device.
    Device,
}

/// Result of one [`DeviceSession::step_flash`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum FlashStep {
    /// A chunk was acknowledged.
    Progress(ProgressEvent),
    /// The session ended successfully.
    Complete(FlashSummary),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlashSummary {
    pub partition: Resolution,
    pub bytes: usize,
    pub rebooted: bool,
    /// Why the automatic reboot failed; the image itself was written.
    pub reboot_error: Option<String>,
}

/// A negotiated flash waiting for its next chunk.
struct PendingFlash {
    image: FlashImage,
    resolution: Resolution,
    chunks: ChunkState,
}

/// Device session - owns the transport, the PIT and the flash protocol.
pub struct DeviceSession<C: DeviceConnector, O: FlashObserver> {
    connector: C,
    transport: Option<C::Transport>,
    machine: StateMachine,
    pit: Option<PitTable>,
    protocol: FlashProtocol,
    pending: Option<PendingFlash>,
    config: SessionConfig,
    observer: Arc<O>,
    cancel: CancelToken,
}

impl<C: DeviceConnector> DeviceSession<C, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(connector: C, config: SessionConfig) -> Self {
        Self::with_observer(connector, config, Arc::new(TracingObserver))
    }
}

impl<C: DeviceConnector, O: FlashObserver> DeviceSession<C, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(connector: C, config: SessionConfig, observer: Arc<O>) -> Self {
        Self {
            connector,
            transport: None,
            machine: StateMachine::new(),
            pit: None,
            protocol: FlashProtocol::new(config.protocol_config()),
            pending: None,
            config,
            observer,
            cancel: CancelToken::new(),
        }
    }

    pub fn state(&self) -> DeviceState {
        self.machine.current()
    }

    pub fn pit(&self) -> Option<&PitTable> {
        self.pit.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.config.settings
    }

    /// Status of the current or last flash session.
    pub fn flash_status(&self) -> SessionStatus {
        self.protocol.status()
    }

    /// Handle for cancelling a flash from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Open the configured device, polling until `detect_wait_secs` elapse.
    ///
    /// Only valid without an open device; call `disconnect` first to
    /// re-detect. Every open failure is reported as `DeviceNotFound`.
    #[instrument(skip(self))]
    pub fn detect(&mut self) -> Result<(u16, u16), SessionError> {
        self.require_idle("detect")?;
        if self.state() == DeviceState::Settings || self.transport.is_some() {
            return Err(self.invalid("detect"));
        }

        let timeout = Duration::from_secs(self.config.detect_wait_secs);
        let start = Instant::now();
        let mut poll_count = 0u64;

        let transport = loop {
            poll_count += 1;
            match self.connector.open(&self.config.device) {
                Ok(t) => break t,
                Err(e @ TransportError::DeviceNotFound { .. }) => {
                    if start.elapsed() >= timeout {
                        return Err(SessionError::DeviceNotFound(e));
                    }
                    thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    warn!(error = %e, "Device present but could not be opened");
                    return Err(SessionError::DeviceNotFound(e));
                }
            }
        };

        let ids = (transport.vendor_id(), transport.product_id());
        info!(
            vid = format!("{:04X}", ids.0),
            pid = format!("{:04X}", ids.1),
            "Device found after {} polls",
            poll_count
        );
        self.transport = Some(transport);
        self.pit = None;
        self.observer
            .on_event(&EngineEvent::DeviceConnected { vid: ids.0, pid: ids.1 });
        self.transition(DeviceState::Detected);
        Ok(ids)
    }

    /// Load, validate and hold a PIT, replacing any previous one.
    ///
    /// On failure the previous table and state are kept.
    #[instrument(skip(self))]
    pub fn load_pit(&mut self, source: PitSource) -> Result<&PitTable, SessionError> {
        self.require_idle("load PIT")?;
        let transport = usable(self.state(), self.transport.as_ref(), "load PIT")?;

        let bytes = match source {
            PitSource::File(path) => std::fs::read(&path).map_err(|source| PitError::Io { path, source })?,
            PitSource::Bytes(bytes) => bytes,
            PitSource::Device => self.protocol.request_pit(transport)?,
        };
        let table = pit::parse(&bytes).map_err(PitError::from)?;
        table.validate().map_err(PitError::from)?;

        info!(device = %table.device_name(), entries = table.entry_count(), "PIT loaded");
        self.observer.on_event(&EngineEvent::PitLoaded {
            device_name: table.device_name().to_string(),
            entries: table.entry_count(),
        });
        self.transition(DeviceState::PitReady);
        Ok(self.pit.insert(table))
    }

    /// Map a filename to a partition using the held PIT, if any.
    pub fn resolve(&self, filename: &str) -> Option<Resolution> {
        resolver::resolve(filename, self.pit.as_ref())
    }

    /// Load an image file and negotiate its session.
    pub fn begin_flash<P: AsRef<Path>>(&mut self, path: P) -> Result<Resolution, SessionError> {
        self.require_idle("flash")?;
        usable(self.state(), self.transport.as_ref(), "flash")?;
        let image = FlashImage::load(path)?;
        self.begin_flash_image(image)
    }

    /// Negotiate a session for an in-memory image.
    ///
    /// Nothing is sent unless the partition resolves and passes the
    /// safe-mode and size checks.
    #[instrument(skip(self, image), fields(image = %image.name(), size = image.len()))]
    pub fn begin_flash_image(&mut self, image: FlashImage) -> Result<Resolution, SessionError> {
        self.require_idle("flash")?;
        usable(self.state(), self.transport.as_ref(), "flash")?;
        let settings = self.config.settings;

        let resolution = self
            .resolve(image.name())
            .ok_or_else(|| SessionError::UnresolvedPartition {
                filename: image.name().to_string(),
            })?;
        if !resolution.is_verified() && settings.safe_mode {
            return Err(SessionError::UnverifiedPartition {
                partition: resolution.partition,
            });
        }
        if settings.verify_on_flash
            && let Some(entry) = self.pit.as_ref().and_then(|t| t.find(&resolution.partition))
        {
            let capacity = entry.capacity_bytes();
            if capacity > 0 && image.len() as u64 > capacity {
                return Err(SessionError::ImageTooLarge {
                    partition: resolution.partition,
                    size: image.len(),
                    capacity,
                });
            }
        }

        let transport = usable(self.state(), self.transport.as_ref(), "flash")?;
        self.cancel.reset();
        self.protocol.begin(transport, &resolution.partition, image.len())?;

        info!(partition = %resolution, "Flashing");
        let chunks = ChunkState::new(image.len(), self.protocol.config().chunk_size);
        self.pending = Some(PendingFlash {
            image,
            resolution: resolution.clone(),
            chunks,
        });
        self.transition(DeviceState::Flashing);
        Ok(resolution)
    }

    /// Send the next chunk of the pending flash, or finalize it.
    ///
    /// A cancelled token aborts the session instead.
    pub fn step_flash(&mut self) -> Result<FlashStep, SessionError> {
        let state = self.state();
        let (Some(pending), Some(transport)) = (self.pending.as_mut(), self.transport.as_ref()) else {
            return Err(SessionError::InvalidState {
                operation: "continue flash",
                state,
            });
        };

        let outcome = if self.cancel.is_cancelled() {
            let bytes_sent = self.protocol.active().map_or(0, |s| s.bytes_sent);
            self.protocol
                .abort(transport)
                .and_then(|_| Err(FlashError::Aborted { bytes_sent }))
        } else {
            match pending.chunks.next_chunk(pending.image.data()) {
                Some(chunk) => self
                    .protocol
                    .send_chunk(transport, chunk, self.observer.as_ref())
                    .map(Some),
                None => self
                    .protocol
                    .finish(transport, self.observer.as_ref())
                    .map(|()| None),
            }
        };

        match outcome {
            Ok(Some(progress)) => Ok(FlashStep::Progress(progress)),
            Ok(None) => self.complete_flash().map(FlashStep::Complete),
            Err(e) => {
                self.end_flash();
                warn!(error = %e, "Flash failed");
                self.status(LogLevel::Error, e.status_message());
                Err(e.into())
            }
        }
    }

    /// Flash an image file from start to finish.
    pub fn flash<P: AsRef<Path>>(&mut self, path: P) -> Result<FlashSummary, SessionError> {
        self.begin_flash(path)?;
        self.drive_flash()
    }

    /// Flash an in-memory image from start to finish.
    pub fn flash_image(&mut self, image: FlashImage) -> Result<FlashSummary, SessionError> {
        self.begin_flash_image(image)?;
        self.drive_flash()
    }

    /// Abort the pending flash. No-op without one.
    pub fn abort(&mut self) -> Result<bool, SessionError> {
        if self.pending.is_none() {
            return Ok(false);
        }
        let aborted = match self.transport.as_ref() {
            Some(transport) => self.protocol.abort(transport),
            None => Ok(false),
        };
        self.end_flash();
        self.status(LogLevel::Warn, "Flash aborted".to_string());
        Ok(aborted?)
    }

    /// Ask the device to reboot; it will disconnect.
    #[instrument(skip(self))]
    pub fn reboot(&mut self) -> Result<(), SessionError> {
        self.require_idle("reboot")?;
        let transport = usable(self.state(), self.transport.as_ref(), "reboot")?;
        self.protocol.reboot(transport)?;
        info!("Reboot acknowledged");
        self.drop_device();
        Ok(())
    }

    /// Upload a PIT to the device (repartition).
    #[instrument(skip(self, table), fields(entries = table.entry_count()))]
    pub fn upload_pit(&mut self, table: &PitTable) -> Result<(), SessionError> {
        self.require_idle("upload PIT")?;
        let transport = usable(self.state(), self.transport.as_ref(), "upload PIT")?;
        if self.config.settings.safe_mode {
            return Err(SessionError::RepartitionRefused);
        }
        table.validate().map_err(PitError::from)?;
        self.protocol.send_pit(transport, &pit::serialize(table))?;

        self.pit = Some(table.clone());
        self.observer.on_event(&EngineEvent::PitLoaded {
            device_name: table.device_name().to_string(),
            entries: table.entry_count(),
        });
        self.transition(DeviceState::PitReady);
        Ok(())
    }

    /// Close the transport and forget the PIT.
    pub fn disconnect(&mut self) -> Result<(), SessionError> {
        self.require_idle("disconnect")?;
        if self.transport.is_some() {
            self.drop_device();
        }
        Ok(())
    }

    /// Enter the settings side state.
    pub fn enter_settings(&mut self) -> Result<(), SessionError> {
        self.require_idle("open settings")?;
        let from = self.state();
        if !self.machine.enter_settings() {
            return Err(self.invalid("open settings"));
        }
        self.emit_transition(from);
        Ok(())
    }

    /// Mutable settings, available only inside the settings state.
    pub fn settings_mut(&mut self) -> Result<&mut Settings, SessionError> {
        if self.state() != DeviceState::Settings {
            return Err(self.invalid("change settings"));
        }
        Ok(&mut self.config.settings)
    }

    /// Leave the settings side state.
    pub fn leave_settings(&mut self) -> Result<(), SessionError> {
        let from = self.state();
        if !self.machine.leave_settings() {
            return Err(self.invalid("leave settings"));
        }
        self.emit_transition(from);
        Ok(())
    }

    fn drive_flash(&mut self) -> Result<FlashSummary, SessionError> {
        loop {
            if let FlashStep::Complete(summary) = self.step_flash()? {
                return Ok(summary);
            }
        }
    }

    fn complete_flash(&mut self) -> Result<FlashSummary, SessionError> {
        let bytes = self.pending.as_ref().map_or(0, |p| p.image.len());
        let partition = self.end_flash().ok_or(SessionError::InvalidState {
            operation: "complete flash",
            state: self.state(),
        })?;
        self.status(LogLevel::Info, format!("Flashed {partition} ({bytes} bytes)"));

        let mut summary = FlashSummary {
            partition,
            bytes,
            rebooted: false,
            reboot_error: None,
        };
        if self.config.settings.auto_reboot {
            match self.reboot() {
                Ok(()) => summary.rebooted = true,
                Err(e) => {
                    warn!(error = %e, "Auto-reboot failed");
                    self.status(LogLevel::Error, format!("Auto-reboot failed: {}", e.status_message()));
                    summary.reboot_error = Some(e.to_string());
                }
            }
        }
        Ok(summary)
    }

    /// Drop the pending flash and return to the resting state.
    fn end_flash(&mut self) -> Option<Resolution> {
        let pending = self.pending.take()?;
        let ready = DeviceState::ready(self.pit.is_some());
        self.transition(ready);
        Some(pending.resolution)
    }

    fn drop_device(&mut self) {
        self.transport = None;
        self.pit = None;
        self.observer.on_event(&EngineEvent::DeviceDisconnected);
        self.transition(DeviceState::NoDevice);
    }

    fn require_idle(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.pending.is_some() {
            warn!(operation = operation, "Rejected while flashing");
            return Err(SessionError::Busy);
        }
        Ok(())
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            state: self.state(),
        }
    }

    fn transition(&mut self, to: DeviceState) {
        let from = self.machine.goto_state(to);
        if from != to {
            self.observer.on_event(&EngineEvent::StateChanged { from, to });
        }
    }

    fn emit_transition(&self, from: DeviceState) {
        self.observer.on_event(&EngineEvent::StateChanged {
            from,
            to: self.state(),
        });
    }

    fn status(&self, level: LogLevel, message: String) {
        self.observer.on_event(&EngineEvent::Status { level, message });
    }
}

/// The open transport, if `state` allows device operations.
fn usable<'a, T>(
    state: DeviceState,
    transport: Option<&'a T>,
    operation: &'static str,
) -> Result<&'a T, SessionError> {
    match (state, transport) {
        (DeviceState::Detected | DeviceState::PitReady, Some(transport)) => Ok(transport),
        _ => Err(SessionError::InvalidState { operation, state }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelObserver, NullObserver};
    use crate::pit::PitEntry;
    use crate::protocol::ABORT_FRAME;
    use crate::transport::{MockConnector, MockTransport};
    use std::sync::mpsc::{self, Receiver};

    const CHUNK: usize = 16;

    fn config() -> SessionConfig {
        SessionConfig {
            ack_timeout_ms: 10,
            chunk_size: CHUNK,
            ..Default::default()
        }
    }

    fn sample_pit() -> PitTable {
        let mut recovery = PitEntry::new(1, "RECOVERY", "recovery.bin").unwrap();
        recovery.block_size = 16;
        recovery.block_count = 4;
        let factoryfs = PitEntry::new(2, "FACTORYFS", "factoryfs.rfs").unwrap();
        PitTable::new("GT-I9000", [0, 0], vec![recovery, factoryfs]).unwrap()
    }

    fn detected(config: SessionConfig) -> (DeviceSession<MockConnector, NullObserver>, MockTransport) {
        let mock = MockTransport::new();
        let connector = MockConnector::with_device(mock.clone());
        let mut session = DeviceSession::with_observer(connector, config, Arc::new(NullObserver));
        session.detect().unwrap();
        (session, mock)
    }

    fn with_pit(config: SessionConfig) -> (DeviceSession<MockConnector, NullObserver>, MockTransport) {
        let (mut session, mock) = detected(config);
        session
            .load_pit(PitSource::Bytes(pit::serialize(&sample_pit())))
            .unwrap();
        (session, mock)
    }

    fn queue_acks(mock: &MockTransport, n: usize) {
        for _ in 0..n {
            mock.queue_ack();
        }
    }

    fn image(name: &str, len: usize) -> FlashImage {
        FlashImage::from_bytes(name, vec![0x5A; len]).unwrap()
    }

    fn drain(rx: &Receiver<EngineEvent>) -> Vec<EngineEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_detect_without_device() {
        let mut session = DeviceSession::with_observer(MockConnector::empty(), config(), Arc::new(NullObserver));
        assert!(matches!(session.detect(), Err(SessionError::DeviceNotFound(_))));
        assert_eq!(session.state(), DeviceState::NoDevice);
    }

    #[test]
    fn test_detect_with_open_device_is_rejected() {
        let (mut session, mock) = with_pit(config());
        assert!(matches!(
            session.detect(),
            Err(SessionError::InvalidState {
                state: DeviceState::PitReady,
                ..
            })
        ));
        assert_eq!(session.state(), DeviceState::PitReady);
        assert!(session.pit().is_some());

        mock.queue_ack();
        session.reboot().unwrap();
        assert_eq!(session.detect().unwrap(), (0x04E8, 0x685D));
    }

    #[test]
    fn test_open_failure_is_device_not_found() {
        let mock = MockTransport::new();
        mock.disconnect();
        let connector = MockConnector::with_device(mock);
        let mut session = DeviceSession::with_observer(connector, config(), Arc::new(NullObserver));
        assert!(matches!(
            session.detect(),
            Err(SessionError::DeviceNotFound(TransportError::OpenFailed(_)))
        ));
        assert_eq!(session.state(), DeviceState::NoDevice);
    }

    #[test]
    fn test_detect_emits_events() {
        let (tx, rx) = mpsc::channel();
        let connector = MockConnector::with_device(MockTransport::new());
        let mut session = DeviceSession::with_observer(connector, config(), Arc::new(ChannelObserver::new(tx)));

        assert_eq!(session.detect().unwrap(), (0x04E8, 0x685D));
        assert_eq!(session.state(), DeviceState::Detected);
        let events = drain(&rx);
        assert!(matches!(events[0], EngineEvent::DeviceConnected { vid: 0x04E8, .. }));
        assert!(matches!(
            events[1],
            EngineEvent::StateChanged {
                from: DeviceState::NoDevice,
                to: DeviceState::Detected
            }
        ));
    }

    #[test]
    fn test_load_pit_requires_device() {
        let mut session = DeviceSession::with_observer(MockConnector::empty(), config(), Arc::new(NullObserver));
        assert!(matches!(
            session.load_pit(PitSource::Bytes(vec![])),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_load_pit_from_bytes_and_file() {
        let (mut session, _mock) = detected(config());
        let bytes = pit::serialize(&sample_pit());
        assert_eq!(session.load_pit(PitSource::Bytes(bytes)).unwrap().entry_count(), 2);
        assert_eq!(session.state(), DeviceState::PitReady);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.pit");
        let other = PitTable::new("SGH-T959", [1, 2], vec![PitEntry::new(9, "CACHE", "").unwrap()]).unwrap();
        other.write_to_file(&path).unwrap();
        session.load_pit(PitSource::File(path)).unwrap();
        assert_eq!(session.pit(), Some(&other));
    }

    #[test]
    fn test_invalid_pit_keeps_state() {
        let (mut session, _mock) = detected(config());
        let dup = PitTable::new(
            "GT-I9000",
            [0, 0],
            vec![PitEntry::new(1, "A", "").unwrap(), PitEntry::new(1, "B", "").unwrap()],
        )
        .unwrap();
        let err = session
            .load_pit(PitSource::Bytes(pit::serialize(&dup)))
            .unwrap_err();
        assert!(matches!(err, SessionError::Pit(PitError::Validation(_))));
        assert!(matches!(
            session.load_pit(PitSource::Bytes(vec![0; 8])),
            Err(SessionError::Pit(PitError::Format(_)))
        ));
        assert_eq!(session.state(), DeviceState::Detected);
        assert!(session.pit().is_none());
    }

    #[test]
    fn test_load_pit_from_device() {
        let (mut session, mock) = detected(config());
        let bytes = pit::serialize(&sample_pit());
        mock.queue_ack_words([0, bytes.len() as u32, 0, 0]);
        mock.queue_response(&bytes);

        session.load_pit(PitSource::Device).unwrap();
        assert_eq!(session.pit(), Some(&sample_pit()));
        assert_eq!(&mock.get_writes()[0][..4], b"PITD");
    }

    #[test]
    fn test_flash_file_with_pit() {
        let (tx, rx) = mpsc::channel();
        let mock = MockTransport::new();
        let connector = MockConnector::with_device(mock.clone());
        let mut session = DeviceSession::with_observer(connector, config(), Arc::new(ChannelObserver::new(tx)));
        session.detect().unwrap();
        session
            .load_pit(PitSource::Bytes(pit::serialize(&sample_pit())))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recovery.img");
        std::fs::write(&path, vec![1u8; 40]).unwrap();
        queue_acks(&mock, 1 + 3 + 1);
        mock.clear_writes();
        drain(&rx);

        let summary = session.flash(&path).unwrap();
        assert_eq!(summary.partition.partition, "RECOVERY");
        assert!(summary.partition.is_verified());
        assert_eq!(summary.bytes, 40);
        assert!(!summary.rebooted);
        assert_eq!(session.state(), DeviceState::PitReady);
        assert_eq!(session.flash_status(), SessionStatus::Complete);
        assert_eq!(mock.get_writes().len(), 1 + 3 * 2 + 1);

        let fractions: Vec<f32> = drain(&rx)
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Progress(p) => Some(p.fraction),
                _ => None,
            })
            .collect();
        assert_eq!(fractions.len(), 4);
        assert_eq!(fractions.last().copied(), Some(1.0));
    }

    #[test]
    fn test_unresolved_partition_sends_nothing() {
        let (mut session, mock) = with_pit(config());
        mock.clear_writes();
        assert!(matches!(
            session.flash_image(image("holiday.jpg", 8)),
            Err(SessionError::UnresolvedPartition { .. })
        ));
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_safe_mode_refuses_inferred_partition() {
        let (mut session, mock) = detected(config());
        assert!(matches!(
            session.flash_image(image("modem.bin", 8)),
            Err(SessionError::UnverifiedPartition { ref partition }) if partition == "RADIO"
        ));
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_inferred_partition_without_safe_mode() {
        let mut cfg = config();
        cfg.settings.safe_mode = false;
        let (mut session, mock) = detected(cfg);
        queue_acks(&mock, 3);

        let summary = session.flash_image(image("modem.bin", 8)).unwrap();
        assert_eq!(summary.partition.to_string(), "RADIO (unverified)");
        assert_eq!(&mock.get_writes()[0][1..6], b"RADIO");
        assert_eq!(session.state(), DeviceState::Detected);
    }

    #[test]
    fn test_verify_on_flash_checks_capacity() {
        let (mut session, mock) = with_pit(config());
        mock.clear_writes();
        assert!(matches!(
            session.flash_image(image("recovery.img", 65)),
            Err(SessionError::ImageTooLarge { capacity: 64, .. })
        ));
        assert!(mock.get_writes().is_empty());

        session.enter_settings().unwrap();
        session.settings_mut().unwrap().verify_on_flash = false;
        session.leave_settings().unwrap();
        queue_acks(&mock, 1 + 5 + 1);
        session.flash_image(image("recovery.img", 65)).unwrap();
    }

    #[test]
    fn test_flash_while_pending_is_busy() {
        let (mut session, mock) = with_pit(config());
        queue_acks(&mock, 1);
        session.begin_flash_image(image("recovery.img", 32)).unwrap();
        assert_eq!(session.state(), DeviceState::Flashing);

        assert!(matches!(
            session.flash_image(image("factoryfs.img", 8)),
            Err(SessionError::Busy)
        ));
        assert!(matches!(session.detect(), Err(SessionError::Busy)));
        assert!(matches!(session.reboot(), Err(SessionError::Busy)));
        assert!(matches!(session.enter_settings(), Err(SessionError::Busy)));

        queue_acks(&mock, 3);
        assert!(matches!(session.step_flash(), Ok(FlashStep::Progress(_))));
        assert!(matches!(session.step_flash(), Ok(FlashStep::Progress(ref p)) if p.fraction == 1.0));
        match session.step_flash() {
            Ok(FlashStep::Complete(summary)) => assert_eq!(summary.partition.partition, "RECOVERY"),
            other => panic!("unexpected step: {other:?}"),
        }
        assert_eq!(session.state(), DeviceState::PitReady);
        assert!(matches!(session.step_flash(), Err(SessionError::InvalidState { .. })));
    }

    #[test]
    fn test_failure_mid_transfer_reports_unknown_state() {
        let (mut session, mock) = with_pit(config());
        mock.queue_ack();
        mock.queue_ack();
        mock.queue_nak(3);

        let err = session.flash_image(image("recovery.img", 48)).unwrap_err();
        assert!(err.device_state_unknown());
        assert!(err.status_message().contains("device state unknown"));
        assert_eq!(session.state(), DeviceState::PitReady);
        assert_eq!(session.flash_status(), SessionStatus::Failed);
        assert!(!session.abort().unwrap());
    }

    #[test]
    fn test_cancel_aborts_between_chunks() {
        let (mut session, mock) = with_pit(config());
        queue_acks(&mock, 2);
        session.begin_flash_image(image("recovery.img", 48)).unwrap();
        session.step_flash().unwrap();

        session.cancel_token().cancel();
        let err = session.step_flash().unwrap_err();
        assert!(matches!(
            err,
            SessionError::Flash(FlashError::Aborted { bytes_sent: 16 })
        ));
        assert!(err.device_state_unknown());
        assert_eq!(mock.get_writes().last().cloned(), Some(ABORT_FRAME.to_vec()));
        assert_eq!(session.state(), DeviceState::PitReady);
        assert_eq!(session.flash_status(), SessionStatus::Aborted);
    }

    #[test]
    fn test_explicit_abort() {
        let (mut session, mock) = with_pit(config());
        queue_acks(&mock, 1);
        session.begin_flash_image(image("recovery.img", 48)).unwrap();
        assert!(session.abort().unwrap());
        assert!(!session.abort().unwrap());
        assert!(!session.is_busy());
        assert_eq!(session.state(), DeviceState::PitReady);
    }

    #[test]
    fn test_reboot_drops_device() {
        let (mut session, mock) = with_pit(config());
        mock.queue_ack();
        session.reboot().unwrap();
        assert_eq!(session.state(), DeviceState::NoDevice);
        assert!(session.pit().is_none());
        assert!(matches!(session.reboot(), Err(SessionError::InvalidState { .. })));
    }

    #[test]
    fn test_failed_reboot_keeps_state() {
        let (mut session, _mock) = with_pit(config());
        assert!(matches!(session.reboot(), Err(SessionError::Flash(FlashError::Command { .. }))));
        assert_eq!(session.state(), DeviceState::PitReady);
    }

    #[test]
    fn test_auto_reboot_after_flash() {
        let mut cfg = config();
        cfg.settings.auto_reboot = true;
        let (mut session, mock) = with_pit(cfg);
        queue_acks(&mock, 1 + 1 + 1 + 1);

        let summary = session.flash_image(image("recovery.img", 8)).unwrap();
        assert!(summary.rebooted);
        assert_eq!(summary.reboot_error, None);
        assert_eq!(session.state(), DeviceState::NoDevice);
        assert_eq!(&mock.get_writes().last().unwrap()[..4], b"REBT");
    }

    #[test]
    fn test_failed_auto_reboot_keeps_flash_result() {
        let mut cfg = config();
        cfg.settings.auto_reboot = true;
        let (tx, rx) = mpsc::channel();
        let mock = MockTransport::new();
        let connector = MockConnector::with_device(mock.clone());
        let mut session = DeviceSession::with_observer(connector, cfg, Arc::new(ChannelObserver::new(tx)));
        session.detect().unwrap();
        session
            .load_pit(PitSource::Bytes(pit::serialize(&sample_pit())))
            .unwrap();
        drain(&rx);
        // start, one chunk, end; nothing for the reboot
        queue_acks(&mock, 3);

        let summary = session.flash_image(image("recovery.img", 8)).unwrap();
        assert_eq!(summary.partition.partition, "RECOVERY");
        assert_eq!(summary.bytes, 8);
        assert!(!summary.rebooted);
        assert!(summary.reboot_error.as_deref().is_some_and(|e| e.contains("reboot")));
        assert_eq!(session.flash_status(), SessionStatus::Complete);
        assert_eq!(session.state(), DeviceState::PitReady);

        let errors: Vec<String> = drain(&rx)
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Status {
                    level: LogLevel::Error,
                    message,
                } => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Auto-reboot failed"));
    }

    #[test]
    fn test_upload_pit_respects_safe_mode() {
        let (mut session, mock) = detected(config());
        let table = sample_pit();
        assert!(matches!(session.upload_pit(&table), Err(SessionError::RepartitionRefused)));
        assert!(mock.get_writes().is_empty());

        session.enter_settings().unwrap();
        session.settings_mut().unwrap().safe_mode = false;
        session.leave_settings().unwrap();
        assert_eq!(session.state(), DeviceState::Detected);

        mock.queue_ack();
        session.upload_pit(&table).unwrap();
        assert_eq!(session.state(), DeviceState::PitReady);
        assert_eq!(mock.get_writes()[1], pit::serialize(&table));
    }

    #[test]
    fn test_settings_state_blocks_device_operations() {
        let (mut session, _mock) = detected(config());
        assert!(matches!(session.settings_mut(), Err(SessionError::InvalidState { .. })));
        session.enter_settings().unwrap();
        assert!(matches!(session.detect(), Err(SessionError::InvalidState { .. })));
        assert!(matches!(
            session.flash_image(image("boot.img", 4)),
            Err(SessionError::InvalidState { .. })
        ));
        session.leave_settings().unwrap();
        assert!(matches!(session.leave_settings(), Err(SessionError::InvalidState { .. })));
    }

    #[test]
    fn test_disconnect() {
        let (mut session, _mock) = with_pit(config());
        session.disconnect().unwrap();
        assert_eq!(session.state(), DeviceState::NoDevice);
        assert!(session.pit().is_none());
        session.disconnect().unwrap();
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlmode.toml");
        let cfg = SessionConfig {
            device: DeviceSelector::Ids {
                vid: 0x04E8,
                pid: 0x6601,
            },
            settings: Settings {
                auto_reboot: true,
                ..Default::default()
            },
            ..Default::default()
        };
        cfg.save_to_file(&path).unwrap();
        assert_eq!(SessionConfig::load_from_file(&path).unwrap(), cfg);

        std::fs::write(&path, "chunk_size = 0\n").unwrap();
        assert!(SessionConfig::load_from_file(&path).is_err());
    }
}
