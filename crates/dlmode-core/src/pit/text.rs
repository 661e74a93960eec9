//! Fixed-width, NUL-terminated text fields used inside the PIT.

use std::borrow::Cow;
use std::fmt;

use super::FormatError;

/// A text field occupying exactly `N` bytes on the wire.
///
/// Holds at most `N - 1` visible bytes; everything after the first NUL
/// is zero, so two fields compare equal iff their visible text does.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PitText<const N: usize> {
    raw: [u8; N],
}

impl<const N: usize> PitText<N> {
    /// Maximum number of visible bytes.
    pub const CAPACITY: usize = N - 1;

    /// Build from a string, failing if it does not fit the field.
    pub fn new(text: &str) -> Result<Self, FormatError> {
        let bytes = text.as_bytes();
        if bytes.len() > Self::CAPACITY || bytes.contains(&0) {
            return Err(FormatError::TextTooLong {
                text: text.to_string(),
                max: Self::CAPACITY,
            });
        }
        let mut raw = [0u8; N];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { raw })
    }

    /// Decode a wire field. Never reads past `field`, stops at the first
    /// NUL and truncates unterminated text to `N - 1` bytes.
    pub fn from_field(field: &[u8]) -> Self {
        let limit = field.len().min(Self::CAPACITY);
        let visible = field[..limit]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(limit);
        let mut raw = [0u8; N];
        raw[..visible].copy_from_slice(&field[..visible]);
        Self { raw }
    }

    /// Visible bytes, without terminator or padding.
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.raw.iter().position(|&b| b == 0).unwrap_or(N);
        &self.raw[..len]
    }

    /// The full zero-padded field as written on the wire.
    pub fn as_field(&self) -> &[u8; N] {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw[0] == 0
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    pub fn eq_ignore_ascii_case(&self, other: &str) -> bool {
        self.as_bytes().eq_ignore_ascii_case(other.as_bytes())
    }
}

impl<const N: usize> Default for PitText<N> {
    fn default() -> Self {
        Self { raw: [0u8; N] }
    }
}

impl<const N: usize> fmt::Display for PitText<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.to_string_lossy())
    }
}

impl<const N: usize> fmt::Debug for PitText<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}
