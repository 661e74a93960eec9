//! Fixed-size command frames sent over the bulk OUT endpoint.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Partition name '{name}' exceeds {max} bytes")]
    NameTooLong { name: String, max: usize },
    #[error("Partition name is empty")]
    EmptyName,
}

/// Session start (64 bytes / 0x40).
///
/// Byte 0 is the opcode, bytes 1..32 hold the zero-padded partition name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    pub partition: String,
}

impl SessionStart {
    pub const SIZE: usize = SESSION_START_SIZE;

    pub fn new(partition: &str) -> Result<Self, FrameError> {
        if partition.is_empty() {
            return Err(FrameError::EmptyName);
        }
        if partition.len() > SESSION_START_NAME_LEN || partition.as_bytes().contains(&0) {
            return Err(FrameError::NameTooLong {
                name: partition.to_string(),
                max: SESSION_START_NAME_LEN,
            });
        }
        Ok(Self {
            partition: partition.to_string(),
        })
    }

    pub fn to_bytes(&self) -> [u8; SESSION_START_SIZE] {
        let mut buf = [0u8; SESSION_START_SIZE];
        buf[0] = SESSION_START_OPCODE;
        let name = self.partition.as_bytes();
        buf[1..1 + name.len()].copy_from_slice(name);
        buf
    }
}

/// Chunk header (16 bytes), immediately followed by the chunk bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub sequence: u32,
    pub length: u32,
}

impl ChunkHeader {
    pub const SIZE: usize = WORD_FRAME_SIZE;

    pub fn new(sequence: u32, length: u32) -> Self {
        Self { sequence, length }
    }

    pub fn to_bytes(&self) -> [u8; WORD_FRAME_SIZE] {
        encode_words([CHUNK_MARKER, self.sequence, self.length, 0])
    }
}

/// Session end (16 bytes): total length and payload checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnd {
    pub total_length: u32,
    pub checksum: u32,
}

impl SessionEnd {
    pub const SIZE: usize = WORD_FRAME_SIZE;

    pub fn new(total_length: u32, checksum: u32) -> Self {
        Self {
            total_length,
            checksum,
        }
    }

    pub fn to_bytes(&self) -> [u8; WORD_FRAME_SIZE] {
        encode_words([SESSION_END_MARKER, self.total_length, self.checksum, 0])
    }
}

/// Simple device commands outside a flash session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Reboot,
    RequestPit,
}

impl DeviceCommand {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::Reboot => "reboot",
            DeviceCommand::RequestPit => "PIT request",
        }
    }

    pub fn to_bytes(&self) -> [u8; WORD_FRAME_SIZE] {
        let tag = match self {
            DeviceCommand::Reboot => COMMAND_REBOOT,
            DeviceCommand::RequestPit => COMMAND_PIT_REQUEST,
        };
        let mut buf = [0u8; WORD_FRAME_SIZE];
        buf[..4].copy_from_slice(&tag);
        buf
    }
}

fn encode_words(words: [u32; 4]) -> [u8; WORD_FRAME_SIZE] {
    let mut buf = [0u8; WORD_FRAME_SIZE];
    LittleEndian::write_u32_into(&words, &mut buf);
    buf
}
