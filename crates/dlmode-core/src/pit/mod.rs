//! Partition Information Table (PIT).
//!
//! The PIT is the device's catalogue of flashable partitions. This module
//! holds the in-memory table, its validation rules and file helpers; the
//! binary layout lives in [`codec`].

pub mod codec;
pub mod text;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use codec::{parse, serialize};
pub use text::PitText;

/// Magic word at offset 0 of every PIT.
pub const PIT_MAGIC: u32 = 0x1234_9876;
/// Header size in bytes; entries start here.
pub const PIT_HEADER_SIZE: usize = 44;
/// Size of one serialized entry.
pub const PIT_ENTRY_SIZE: usize = 132;
/// Maximum number of entries in one table.
pub const PIT_MAX_ENTRIES: usize = 64;
/// Width of the header's device name field.
pub const DEVICE_NAME_LEN: usize = 28;
/// Width of each per-entry name field.
pub const PIT_NAME_LEN: usize = 32;

pub type DeviceName = PitText<DEVICE_NAME_LEN>;
pub type PartitionName = PitText<PIT_NAME_LEN>;

/// Malformed PIT bytes.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FormatError {
    #[error("PIT too short: {actual} bytes, header needs {}", PIT_HEADER_SIZE)]
    TooShort { actual: usize },

    #[error("Invalid PIT magic: expected 0x{:08X}, got 0x{actual:08X}", PIT_MAGIC)]
    BadMagic { actual: u32 },

    #[error("PIT declares {count} entries, maximum is {}", PIT_MAX_ENTRIES)]
    TooManyEntries { count: u32 },

    #[error("PIT declares {count} entries ({expected} bytes) but buffer holds {actual}")]
    Truncated {
        count: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Text '{text}' exceeds field capacity of {max} bytes")]
    TextTooLong { text: String, max: usize },
}

/// Structurally valid but semantically unusable PIT.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("PIT has no entries")]
    NoEntries,

    #[error("PIT has {count} entries, maximum is {}", PIT_MAX_ENTRIES)]
    TooManyEntries { count: usize },

    #[error("Identifier {identifier} used by entries {first} and {second}")]
    DuplicateIdentifier {
        identifier: u32,
        first: usize,
        second: usize,
    },

    #[error("PIT device name is empty")]
    EmptyDeviceName,
}

/// Errors from loading a PIT from storage.
#[derive(Error, Debug)]
pub enum PitError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to access PIT file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One partition descriptor.
///
/// The classification words are opaque and copied verbatim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PitEntry {
    pub binary_type: u32,
    pub device_type: u32,
    pub identifier: u32,
    pub attributes: u32,
    pub update_attributes: u32,
    pub block_size: u32,
    pub block_count: u32,
    pub file_offset: u32,
    pub file_size: u32,
    pub partition_name: PartitionName,
    pub flash_filename: PartitionName,
    pub fota_filename: PartitionName,
}

impl PitEntry {
    /// Entry with the given identifier and names, all other fields zero.
    pub fn new(identifier: u32, partition_name: &str, flash_filename: &str) -> Result<Self, FormatError> {
        Ok(Self {
            identifier,
            partition_name: PitText::new(partition_name)?,
            flash_filename: PitText::new(flash_filename)?,
            ..Default::default()
        })
    }

    /// Partition capacity in bytes, zero if the entry does not say.
    pub fn capacity_bytes(&self) -> u64 {
        u64::from(self.block_size) * u64::from(self.block_count)
    }

    /// Check whether `name` names this entry (partition or flash filename).
    pub fn matches(&self, name: &str) -> bool {
        self.partition_name.eq_ignore_ascii_case(name)
            || self.flash_filename.eq_ignore_ascii_case(name)
    }
}

/// A whole partition table.
///
/// Only the codec builds tables from bytes; once built a table is replaced
/// wholesale rather than edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitTable {
    reserved: [u32; 2],
    device_name: DeviceName,
    entries: Vec<PitEntry>,
}

impl PitTable {
    /// Build a table from parts, enforcing the entry limit.
    pub fn new(device_name: &str, reserved: [u32; 2], entries: Vec<PitEntry>) -> Result<Self, FormatError> {
        if entries.len() > PIT_MAX_ENTRIES {
            return Err(FormatError::TooManyEntries {
                count: entries.len() as u32,
            });
        }
        Ok(Self {
            reserved,
            device_name: PitText::new(device_name)?,
            entries,
        })
    }

    pub(crate) fn from_parts(reserved: [u32; 2], device_name: DeviceName, entries: Vec<PitEntry>) -> Self {
        Self {
            reserved,
            device_name,
            entries,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// The two opaque header words, preserved across round-trips.
    pub fn reserved(&self) -> [u32; 2] {
        self.reserved
    }

    pub fn device_name(&self) -> &DeviceName {
        &self.device_name
    }

    pub fn entries(&self) -> &[PitEntry] {
        &self.entries
    }

    /// Serialized size: header plus one record per entry.
    pub fn serialized_size(&self) -> usize {
        PIT_HEADER_SIZE + self.entries.len() * PIT_ENTRY_SIZE
    }

    /// Find an entry by partition name or flash filename, ignoring case.
    pub fn find(&self, name: &str) -> Option<&PitEntry> {
        self.entries.iter().find(|e| e.matches(name))
    }

    /// Check semantic rules: 1..=64 entries, unique identifiers and a
    /// non-empty device name.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.entries.is_empty() {
            return Err(ValidationError::NoEntries);
        }
        if self.entries.len() > PIT_MAX_ENTRIES {
            return Err(ValidationError::TooManyEntries {
                count: self.entries.len(),
            });
        }
        let mut seen: HashMap<u32, usize> = HashMap::with_capacity(self.entries.len());
        for (index, entry) in self.entries.iter().enumerate() {
            if let Some(&first) = seen.get(&entry.identifier) {
                return Err(ValidationError::DuplicateIdentifier {
                    identifier: entry.identifier,
                    first,
                    second: index,
                });
            }
            seen.insert(entry.identifier, index);
        }
        if self.device_name.is_empty() {
            return Err(ValidationError::EmptyDeviceName);
        }
        Ok(())
    }

    /// Parse a PIT file. The result is not validated.
    pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self, PitError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| PitError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(parse(&data)?)
    }

    /// Serialize this table into a file.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), PitError> {
        let path = path.as_ref();
        std::fs::write(path, serialize(self)).map_err(|source| PitError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl fmt::Display for PitTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PIT Device: {}", self.device_name)?;
        writeln!(f, "Partitions: {}", self.entries.len())?;
        writeln!(f, "-------------------------------")?;
        for (i, entry) in self.entries.iter().enumerate() {
            writeln!(
                f,
                "[{:02}] {:<16} | Id: {:>3} | Block: {} | Count: {} | File: {}",
                i,
                entry.partition_name,
                entry.identifier,
                entry.block_size,
                entry.block_count,
                entry.flash_filename
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(ids: &[u32]) -> PitTable {
        let entries = ids
            .iter()
            .map(|&id| PitEntry::new(id, &format!("PART{id}"), "").unwrap())
            .collect();
        PitTable::new("GT-I9000", [0, 0], entries).unwrap()
    }

    #[test]
    fn test_validate_accepts_unique_ids() {
        assert_eq!(table(&[1]).validate(), Ok(()));
        let ids: Vec<u32> = (0..64).collect();
        assert_eq!(table(&ids).validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_duplicate_identifier() {
        assert_eq!(
            table(&[1, 2, 1]).validate(),
            Err(ValidationError::DuplicateIdentifier {
                identifier: 1,
                first: 0,
                second: 2
            })
        );
    }

    #[test]
    fn test_validate_rejects_empty_table_and_name() {
        assert_eq!(table(&[]).validate(), Err(ValidationError::NoEntries));

        let unnamed = PitTable::new("", [0, 0], vec![PitEntry::new(1, "BOOT", "").unwrap()]).unwrap();
        assert_eq!(unnamed.validate(), Err(ValidationError::EmptyDeviceName));
    }

    #[test]
    fn test_new_rejects_oversized_table() {
        let entries = (0..65).map(|i| PitEntry { identifier: i, ..Default::default() }).collect();
        assert!(matches!(
            PitTable::new("X", [0, 0], entries),
            Err(FormatError::TooManyEntries { count: 65 })
        ));
    }

    #[test]
    fn test_find_matches_either_name() {
        let t = PitTable::new(
            "GT-I9000",
            [0, 0],
            vec![
                PitEntry::new(1, "RECOVERY", "recovery.bin").unwrap(),
                PitEntry::new(2, "FACTORYFS", "factoryfs.rfs").unwrap(),
            ],
        )
        .unwrap();
        assert_eq!(t.find("recovery").map(|e| e.identifier), Some(1));
        assert_eq!(t.find("FACTORYFS.RFS").map(|e| e.identifier), Some(2));
        assert!(t.find("CACHE").is_none());
    }

    #[test]
    fn test_capacity_and_display() {
        let mut e = PitEntry::new(3, "CACHE", "cache.rfs").unwrap();
        e.block_size = 512;
        e.block_count = 2048;
        assert_eq!(e.capacity_bytes(), 1024 * 1024);

        let t = PitTable::new("SGH-T959", [0, 0], vec![e]).unwrap();
        let text = t.to_string();
        assert!(text.contains("PIT Device: SGH-T959"));
        assert!(text.contains("Partitions: 1"));
        assert!(text.contains("CACHE"));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.pit");
        let t = table(&[4, 5, 6]);
        t.write_to_file(&path).unwrap();
        assert_eq!(PitTable::read_from_file(&path).unwrap(), t);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PitTable::read_from_file(dir.path().join("absent.pit")),
            Err(PitError::Io { .. })
        ));
    }
}
