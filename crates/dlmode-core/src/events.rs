//! Event system for UI decoupling.
//!
//! The engine never renders anything itself; a CLI, TUI or GUI subscribes
//! to these events through a [`FlashObserver`]. Events are delivered
//! synchronously, in-line with the protocol loop, so observers should
//! return quickly.

use std::fmt;
use std::sync::mpsc::Sender;

use crate::state::DeviceState;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Snapshot of flash progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Fraction complete in `[0.0, 1.0]`.
    pub fraction: f32,
    /// Short phase label, e.g. `Chunk 3`.
    pub label: String,
}

impl ProgressEvent {
    pub fn new(done: usize, total: usize, label: impl Into<String>) -> Self {
        let fraction = if total == 0 {
            0.0
        } else {
            (done as f64 / total as f64).clamp(0.0, 1.0) as f32
        };
        Self {
            fraction,
            label: label.into(),
        }
    }

    pub fn complete() -> Self {
        Self {
            fraction: 1.0,
            label: "Complete".to_string(),
        }
    }

    pub fn percent(&self) -> u32 {
        (self.fraction * 100.0).round() as u32
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}%)", self.label, self.percent())
    }
}

/// Events emitted by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Transport opened.
    DeviceConnected { vid: u16, pid: u16 },
    /// Transport closed (explicitly or after reboot).
    DeviceDisconnected,
    /// Device session state changed.
    StateChanged { from: DeviceState, to: DeviceState },
    /// A new PIT replaced the held one.
    PitLoaded { device_name: String, entries: usize },
    /// Flash progress at a chunk boundary.
    Progress(ProgressEvent),
    /// Human-readable status line.
    Status { level: LogLevel, message: String },
}

/// Observer trait for receiving engine events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait FlashObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &EngineEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl FlashObserver for NullObserver {
    fn on_event(&self, _event: &EngineEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl FlashObserver for TracingObserver {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::DeviceConnected { vid, pid } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), "Device connected");
            }
            EngineEvent::DeviceDisconnected => {
                tracing::info!("Device disconnected");
            }
            EngineEvent::StateChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "State changed");
            }
            EngineEvent::PitLoaded {
                device_name,
                entries,
            } => {
                tracing::info!(device = %device_name, entries = entries, "PIT loaded");
            }
            EngineEvent::Progress(progress) => {
                tracing::info!(label = %progress.label, progress = %format!("{}%", progress.percent()), "Progress");
            }
            EngineEvent::Status { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}

/// Observer that forwards every event over a channel.
///
/// Send failures (receiver dropped) are ignored.
pub struct ChannelObserver {
    sender: Sender<EngineEvent>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<EngineEvent>) -> Self {
        Self { sender }
    }
}

impl FlashObserver for ChannelObserver {
    fn on_event(&self, event: &EngineEvent) {
        let _ = self.sender.send(event.clone());
    }
}
