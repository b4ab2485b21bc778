//! Record framing shared by every kind of on-disk record (spec §3).
//!
//! Every record starts at an 8-byte-aligned file position with a fixed
//! 12-byte header and ends with a 4-byte CRC-32 trailer (zero when
//! checksums are disabled). The header's `record_length` field counts the
//! whole record: header, content, padding and trailer.

use crate::error::{GvrsError, Result};
use crate::io::{Data, Read, Write};

/// 4-byte length + 1-byte type tag + 3 reserved bytes (spec §3).
pub const RECORD_HEADER_SIZE: u64 = 8;
pub const RECORD_TRAILER_SIZE: u64 = 4;
pub const RECORD_OVERHEAD: u64 = RECORD_HEADER_SIZE + RECORD_TRAILER_SIZE;

/// One of the record kinds a container file ever writes (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    Freespace = 0,
    Metadata = 1,
    Tile = 2,
    FileSpaceDir = 3,
    MetadataDir = 4,
    TileDir = 5,
    Header = 6,
}

impl RecordType {
    /// Every record kind gets a maintained trailer checksum except
    /// freespace records, whose content is excluded from checksumming
    /// entirely (spec §3, §4.8, §8): the checksum sweep fills their
    /// trailer with zero instead of a computed CRC.
    pub fn has_checksum(self) -> bool {
        !matches!(self, RecordType::Freespace)
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        Ok(match value {
            0 => RecordType::Freespace,
            1 => RecordType::Metadata,
            2 => RecordType::Tile,
            3 => RecordType::FileSpaceDir,
            4 => RecordType::MetadataDir,
            5 => RecordType::TileDir,
            6 => RecordType::Header,
            other => return Err(GvrsError::InvalidFile(format!("unknown record type tag {other}"))),
        })
    }
}

/// The 12-byte header that precedes every record's content.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    /// Total record size in bytes, including this header, content, padding
    /// and the trailing checksum. Always a multiple of 8.
    pub record_length: u32,
    pub record_type: RecordType,
}

impl RecordHeader {
    pub fn read(read: &mut impl Read) -> Result<Self> {
        let record_length = u32::read(read)?;
        let record_type = RecordType::from_u8(u8::read(read)?)?;
        let mut reserved = [0_u8; 3];
        u8::read_slice(read, &mut reserved)?;

        if record_length % 8 != 0 {
            return Err(GvrsError::InvalidFile(format!("record length {record_length} is not a multiple of 8")));
        }

        Ok(RecordHeader { record_length, record_type })
    }

    pub fn write(self, write: &mut impl Write) -> Result<()> {
        debug_assert_eq!(self.record_length % 8, 0, "record length must be 8-byte aligned");
        self.record_length.write(write)?;
        (self.record_type as u8).write(write)?;
        u8::write_slice(write, &[0, 0, 0])?;
        Ok(())
    }

    /// Number of content bytes available between the header and the trailer.
    pub fn content_capacity(&self) -> u64 {
        self.record_length as u64 - RECORD_OVERHEAD
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = RecordHeader { record_length: 64, record_type: RecordType::Tile };
        let mut buffer = Vec::new();
        header.write(&mut buffer).unwrap();
        assert_eq!(buffer.len(), RECORD_HEADER_SIZE as usize);
        assert_eq!(RECORD_HEADER_SIZE, 8);

        let mut cursor = buffer.as_slice();
        let read_back = RecordHeader::read(&mut cursor).unwrap();
        assert_eq!(read_back.record_length, 64);
        assert_eq!(read_back.record_type, RecordType::Tile);
    }

    #[test]
    fn unaligned_length_is_rejected() {
        let mut buffer = Vec::new();
        65_u32.write(&mut buffer).unwrap();
        (RecordType::Tile as u8).write(&mut buffer).unwrap();
        u8::write_slice(&mut buffer, &[0, 0, 0]).unwrap();

        let mut cursor = buffer.as_slice();
        assert!(RecordHeader::read(&mut cursor).is_err());
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        assert!(RecordType::from_u8(250).is_err());
    }
}
