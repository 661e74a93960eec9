//! Protocol constants for Samsung Download Mode.
//!
//! Frame layouts follow the Odin/Heimdall family of flashing tools.

// ============================================================================
// Device Identification
// ============================================================================

/// Samsung Electronics Vendor ID
pub const SAMSUNG_VENDOR_ID: u16 = 0x04E8;

/// Download Mode product ID (older handsets)
pub const DOWNLOAD_MODE_PID_LEGACY: u16 = 0x6601;
/// Download Mode product ID (Galaxy S and later)
pub const DOWNLOAD_MODE_PID: u16 = 0x685D;
/// Download Mode product ID (some Galaxy Tab / Note variants)
pub const DOWNLOAD_MODE_PID_ALT: u16 = 0x68C3;

/// All supported PIDs for device discovery
pub const DOWNLOAD_MODE_PIDS: &[u16] = &[
    DOWNLOAD_MODE_PID_LEGACY,
    DOWNLOAD_MODE_PID,
    DOWNLOAD_MODE_PID_ALT,
];

// ============================================================================
// Size Constants
// ============================================================================

pub const TWO_FIFTY_SIX_K: usize = 256 * 1024;

/// Default payload chunk size for one framed transfer.
pub const DEFAULT_CHUNK_SIZE: usize = TWO_FIFTY_SIX_K;

/// Default bound on every acknowledgment wait.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 5000;

/// Upper bound accepted for a PIT downloaded from the device.
pub const MAX_PIT_DOWNLOAD: usize = 1024 * 1024;

// ============================================================================
// Frames (Host -> Device)
// ============================================================================

/// Session start: 64 bytes, opcode in byte 0, partition name in 1..32.
pub const SESSION_START_SIZE: usize = 64;
pub const SESSION_START_OPCODE: u8 = 0x11;
/// Bytes available to the partition name in the session start frame.
pub const SESSION_START_NAME_LEN: usize = 31;

/// Chunk header and session end frames are four LE words.
pub const WORD_FRAME_SIZE: usize = 16;
pub const CHUNK_MARKER: u32 = 0x0000_0001;
pub const SESSION_END_MARKER: u32 = 0x0000_0002;

/// Abort frame sent to drop an active session.
pub const ABORT_FRAME: [u8; 6] = [0xFF, 0x00, 0x00, 0x00, 0x00, 0x00];

/// PIT upload prefix, followed by the serialized table.
pub const PIT_UPLOAD_FRAME: [u8; 6] = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Device command tags (first four bytes of a 16-byte command frame).
pub const COMMAND_REBOOT: [u8; 4] = *b"REBT";
pub const COMMAND_PIT_REQUEST: [u8; 4] = *b"PITD";

// ============================================================================
// Acknowledgment (Device -> Host)
// ============================================================================

/// Acknowledgment frames are four LE words.
pub const ACK_SIZE: usize = 16;
/// First word of an accepting acknowledgment.
pub const ACK_ACCEPTED: u32 = 0x0000_0000;
