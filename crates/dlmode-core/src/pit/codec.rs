//! PIT binary codec.
//!
//! Layout (all words little-endian u32):
//!
//! | Offset | Field           | Size |
//! |--------|-----------------|------|
//! | 0      | magic           | 4    |
//! | 4      | entry count     | 4    |
//! | 8      | reserved word 1 | 4    |
//! | 12     | reserved word 2 | 4    |
//! | 16     | device name     | 28   |
//! | 44     | entries         | n × 132 |
//!
//! Every field is read and written through bounds-checked offset
//! accessors; embedded counts are never trusted beyond the buffer.

use byteorder::{ByteOrder, LittleEndian};

use super::{
    DEVICE_NAME_LEN, FormatError, PIT_ENTRY_SIZE, PIT_HEADER_SIZE, PIT_MAGIC, PIT_MAX_ENTRIES,
    PIT_NAME_LEN, PitEntry, PitTable, PitText,
};

// Header offsets
const MAGIC_OFFSET: usize = 0;
const COUNT_OFFSET: usize = 4;
const RESERVED1_OFFSET: usize = 8;
const RESERVED2_OFFSET: usize = 12;
const DEVICE_NAME_OFFSET: usize = 16;

// Entry offsets, relative to the entry start
const BINARY_TYPE_OFFSET: usize = 0;
const DEVICE_TYPE_OFFSET: usize = 4;
const IDENTIFIER_OFFSET: usize = 8;
const ATTRIBUTES_OFFSET: usize = 12;
const UPDATE_ATTRIBUTES_OFFSET: usize = 16;
const BLOCK_SIZE_OFFSET: usize = 20;
const BLOCK_COUNT_OFFSET: usize = 24;
const FILE_OFFSET_OFFSET: usize = 28;
const FILE_SIZE_OFFSET: usize = 32;
const PARTITION_NAME_OFFSET: usize = 36;
const FLASH_FILENAME_OFFSET: usize = 68;
const FOTA_FILENAME_OFFSET: usize = 100;

/// Parse a raw PIT buffer. Bytes past the last declared entry are ignored.
pub fn parse(data: &[u8]) -> Result<PitTable, FormatError> {
    if data.len() < PIT_HEADER_SIZE {
        return Err(FormatError::TooShort { actual: data.len() });
    }

    let magic = read_u32(data, MAGIC_OFFSET)?;
    if magic != PIT_MAGIC {
        return Err(FormatError::BadMagic { actual: magic });
    }

    let count = read_u32(data, COUNT_OFFSET)?;
    if count as usize > PIT_MAX_ENTRIES {
        return Err(FormatError::TooManyEntries { count });
    }

    let expected = PIT_HEADER_SIZE + count as usize * PIT_ENTRY_SIZE;
    if data.len() < expected {
        return Err(FormatError::Truncated {
            count,
            expected,
            actual: data.len(),
        });
    }

    let reserved = [
        read_u32(data, RESERVED1_OFFSET)?,
        read_u32(data, RESERVED2_OFFSET)?,
    ];
    let device_name = read_text::<DEVICE_NAME_LEN>(data, DEVICE_NAME_OFFSET)?;

    let entries = (0..count as usize)
        .map(|i| {
            let start = PIT_HEADER_SIZE + i * PIT_ENTRY_SIZE;
            field(data, start, PIT_ENTRY_SIZE).and_then(parse_entry)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PitTable::from_parts(reserved, device_name, entries))
}

fn parse_entry(raw: &[u8]) -> Result<PitEntry, FormatError> {
    Ok(PitEntry {
        binary_type: read_u32(raw, BINARY_TYPE_OFFSET)?,
        device_type: read_u32(raw, DEVICE_TYPE_OFFSET)?,
        identifier: read_u32(raw, IDENTIFIER_OFFSET)?,
        attributes: read_u32(raw, ATTRIBUTES_OFFSET)?,
        update_attributes: read_u32(raw, UPDATE_ATTRIBUTES_OFFSET)?,
        block_size: read_u32(raw, BLOCK_SIZE_OFFSET)?,
        block_count: read_u32(raw, BLOCK_COUNT_OFFSET)?,
        file_offset: read_u32(raw, FILE_OFFSET_OFFSET)?,
        file_size: read_u32(raw, FILE_SIZE_OFFSET)?,
        partition_name: read_text::<PIT_NAME_LEN>(raw, PARTITION_NAME_OFFSET)?,
        flash_filename: read_text::<PIT_NAME_LEN>(raw, FLASH_FILENAME_OFFSET)?,
        fota_filename: read_text::<PIT_NAME_LEN>(raw, FOTA_FILENAME_OFFSET)?,
    })
}

/// Serialize a table: exactly header + `entry_count` records.
pub fn serialize(table: &PitTable) -> Vec<u8> {
    let mut buf = vec![0u8; table.serialized_size()];

    write_u32(&mut buf, MAGIC_OFFSET, PIT_MAGIC);
    write_u32(&mut buf, COUNT_OFFSET, table.entry_count() as u32);
    let [reserved1, reserved2] = table.reserved();
    write_u32(&mut buf, RESERVED1_OFFSET, reserved1);
    write_u32(&mut buf, RESERVED2_OFFSET, reserved2);
    write_bytes(&mut buf, DEVICE_NAME_OFFSET, table.device_name().as_field());

    for (i, entry) in table.entries().iter().enumerate() {
        let start = PIT_HEADER_SIZE + i * PIT_ENTRY_SIZE;
        let raw = &mut buf[start..start + PIT_ENTRY_SIZE];
        write_entry(raw, entry);
    }

    buf
}

fn write_entry(raw: &mut [u8], entry: &PitEntry) {
    write_u32(raw, BINARY_TYPE_OFFSET, entry.binary_type);
    write_u32(raw, DEVICE_TYPE_OFFSET, entry.device_type);
    write_u32(raw, IDENTIFIER_OFFSET, entry.identifier);
    write_u32(raw, ATTRIBUTES_OFFSET, entry.attributes);
    write_u32(raw, UPDATE_ATTRIBUTES_OFFSET, entry.update_attributes);
    write_u32(raw, BLOCK_SIZE_OFFSET, entry.block_size);
    write_u32(raw, BLOCK_COUNT_OFFSET, entry.block_count);
    write_u32(raw, FILE_OFFSET_OFFSET, entry.file_offset);
    write_u32(raw, FILE_SIZE_OFFSET, entry.file_size);
    write_bytes(raw, PARTITION_NAME_OFFSET, entry.partition_name.as_field());
    write_bytes(raw, FLASH_FILENAME_OFFSET, entry.flash_filename.as_field());
    write_bytes(raw, FOTA_FILENAME_OFFSET, entry.fota_filename.as_field());
}

// ============================================================================
// Bounds-checked accessors
// ============================================================================

fn field(data: &[u8], offset: usize, len: usize) -> Result<&[u8], FormatError> {
    data.get(offset..offset + len)
        .ok_or(FormatError::TooShort { actual: data.len() })
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, FormatError> {
    field(data, offset, 4).map(LittleEndian::read_u32)
}

fn read_text<const N: usize>(data: &[u8], offset: usize) -> Result<PitText<N>, FormatError> {
    field(data, offset, N).map(PitText::from_field)
}

// Writers only target offsets inside a buffer sized from the same constants.
fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    if let Some(dst) = buf.get_mut(offset..offset + 4) {
        LittleEndian::write_u32(dst, value);
    }
}

fn write_bytes(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    if let Some(dst) = buf.get_mut(offset..offset + bytes.len()) {
        dst.copy_from_slice(bytes);
    }
}
