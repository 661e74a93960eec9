//! Image files and chunking.
//!
//! An image is read fully into memory once and then sliced into
//! fixed-size chunks for transfer; the file is never re-read.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Failed to read image {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Image '{name}' is empty")]
    Empty { name: String },
}

/// An image loaded into memory.
#[derive(Debug, Clone)]
pub struct FlashImage {
    name: String,
    data: Vec<u8>,
}

impl FlashImage {
    /// Read an image file. Empty files are refused.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| ImageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), size = data.len(), "Loaded image");
        Self::from_bytes(path.to_string_lossy(), data)
    }

    /// Wrap an in-memory image; `name` is what the resolver sees.
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Result<Self, ImageError> {
        let name = name.into();
        if data.is_empty() {
            return Err(ImageError::Empty { name });
        }
        Ok(Self { name, data })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Chunk-iteration state over a payload.
#[derive(Debug, Clone, Default)]
pub struct ChunkState {
    /// Chunks handed out so far.
    pub current: usize,
    /// Total number of chunks.
    pub total: usize,
    /// Current byte offset.
    pub offset: usize,
    /// Size of each chunk.
    pub chunk_size: usize,
    /// Total data size.
    pub data_size: usize,
}

impl ChunkState {
    /// `chunk_size` must be non-zero.
    pub fn new(data_size: usize, chunk_size: usize) -> Self {
        let total = if data_size == 0 || chunk_size == 0 {
            0
        } else {
            data_size.div_ceil(chunk_size)
        };
        Self {
            current: 0,
            total,
            offset: 0,
            chunk_size,
            data_size,
        }
    }

    /// Get next chunk from data, advancing state.
    pub fn next_chunk<'a>(&mut self, data: &'a [u8]) -> Option<&'a [u8]> {
        if self.is_done() || self.offset >= data.len() {
            return None;
        }

        let remaining = (self.data_size - self.offset).min(data.len() - self.offset);
        let chunk_len = remaining.min(self.chunk_size);

        let chunk = &data[self.offset..self.offset + chunk_len];
        self.offset += chunk_len;
        self.current += 1;

        Some(chunk)
    }

    /// Check if done.
    pub fn is_done(&self) -> bool {
        self.current >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TWO_FIFTY_SIX_K;

    #[test]
    fn test_chunk_state_600k() {
        let data = vec![0u8; 600 * 1024];
        let mut state = ChunkState::new(data.len(), TWO_FIFTY_SIX_K);

        assert_eq!(state.total, 3);
        assert!(!state.is_done());

        let lens: Vec<usize> = std::iter::from_fn(|| state.next_chunk(&data))
            .map(<[u8]>::len)
            .collect();
        assert_eq!(lens, vec![256 * 1024, 256 * 1024, 88 * 1024]);
        assert!(state.is_done());
        assert!(state.next_chunk(&data).is_none());
    }

    #[test]
    fn test_chunk_state_exact_multiple() {
        let data = vec![1u8; 8];
        let mut state = ChunkState::new(data.len(), 4);
        assert_eq!(state.total, 2);
        assert_eq!(state.next_chunk(&data).map(<[u8]>::len), Some(4));
        assert_eq!(state.next_chunk(&data).map(<[u8]>::len), Some(4));
        assert!(state.next_chunk(&data).is_none());
    }

    #[test]
    fn test_zero_chunk_size_yields_nothing() {
        let mut state = ChunkState::new(10, 0);
        assert!(state.is_done());
        assert!(state.next_chunk(&[0u8; 10]).is_none());
    }

    #[test]
    fn test_load_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recovery.img");
        std::fs::write(&path, b"payload").unwrap();

        let image = FlashImage::load(&path).unwrap();
        assert_eq!(image.data(), b"payload");
        assert!(image.name().ends_with("recovery.img"));
    }

    #[test]
    fn test_empty_image_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.img");
        std::fs::write(&path, b"").unwrap();

        assert!(matches!(FlashImage::load(&path), Err(ImageError::Empty { .. })));
        assert!(matches!(
            FlashImage::load(dir.path().join("missing.img")),
            Err(ImageError::Io { .. })
        ));
    }
}
