//! Streaming payload checksum carried in the session end frame.
//!
//! 32-bit accumulator, starting at zero; for every payload byte the
//! accumulator is rotated left by one bit and XORed with the byte.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checksum {
    acc: u32,
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `data` into the running value.
    pub fn update(&mut self, data: &[u8]) {
        for &b in data {
            self.acc = self.acc.rotate_left(1) ^ u32::from(b);
        }
    }

    pub fn value(&self) -> u32 {
        self.acc
    }

    /// Checksum of a complete buffer.
    pub fn of(data: &[u8]) -> u32 {
        let mut c = Self::new();
        c.update(data);
        c.value()
    }
}
