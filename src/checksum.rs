//! Whole-file CRC-32 verification sweep, run when a writable container is
//! closed (spec §4.8, §8).
//!
//! Grounded on the teacher's `chunks::read_all_chunks`'s linear pass-over-
//! records structure, not its content; the per-record CRC check here
//! mirrors `record::RecordHeader`'s 4-byte trailer rather than OpenEXR's
//! part-level hash. The optional `rayon` feature follows the teacher's own
//! optional-parallelism pattern in `Cargo.toml`.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{GvrsError, Result};
use crate::record::{RecordHeader, RECORD_HEADER_SIZE, RECORD_TRAILER_SIZE};

/// Concatenates a record's 8-byte header with its content, the exact span
/// spec §4.8 says the trailing CRC-32 covers (`recordLength` LE,
/// `recordType`, 3 reserved bytes, then content up to the trailer).
fn hashed_span(header_bytes: &[u8], content: &[u8]) -> Vec<u8> {
    let mut hashed = Vec::with_capacity(header_bytes.len() + content.len());
    hashed.extend_from_slice(header_bytes);
    hashed.extend_from_slice(content);
    hashed
}

/// The CRC-32 a record's trailer must hold, given its already-written
/// 8-byte header and its content (padding included). Exposed so the
/// writer (`container::write_record_payload`) and this module's own sweep
/// agree on exactly the same span.
pub fn hashed_crc32(header_bytes: &[u8], content: &[u8]) -> u32 {
    crc32fast::hash(&hashed_span(header_bytes, content))
}

/// One record's checksum outcome, identified by its starting file offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumMismatch {
    pub record_offset: u64,
    pub expected: u32,
    pub computed: u32,
}

/// Reads every record between `start` and `end`, recomputing and comparing
/// each trailing CRC-32 against its stored value. Freespace records carry
/// no checksum and are skipped; corrupt records that a length field can't
/// even frame are reported as a single overall error instead of a partial
/// list (there is no reliable record boundary to resume scanning from).
pub fn verify_range(store: &mut (impl Read + Seek), start: u64, end: u64) -> Result<Vec<ChecksumMismatch>> {
    let mut mismatches = Vec::new();
    let mut offset = start;

    store.seek(SeekFrom::Start(offset))?;
    while offset < end {
        let mut header_bytes = [0_u8; RECORD_HEADER_SIZE as usize];
        store.read_exact(&mut header_bytes)?;
        let mut header_slice = &header_bytes[..];
        let header = RecordHeader::read(&mut header_slice)?;

        let content_len = header
            .record_length
            .checked_sub(RECORD_HEADER_SIZE as u32 + RECORD_TRAILER_SIZE as u32)
            .ok_or_else(|| GvrsError::InvalidFile(format!("record at offset {offset} has an impossible length")))?;

        let mut content = vec![0_u8; content_len as usize];
        store.read_exact(&mut content)?;

        let mut trailer = [0_u8; 4];
        store.read_exact(&mut trailer)?;
        let stored_crc = u32::from_le_bytes(trailer);

        if header.record_type.has_checksum() {
            let computed_crc = crc32fast::hash(&hashed_span(&header_bytes, &content));
            if computed_crc != stored_crc {
                mismatches.push(ChecksumMismatch { record_offset: offset, expected: stored_crc, computed: computed_crc });
            }
        }

        offset += header.record_length as u64;
        store.seek(SeekFrom::Start(offset))?;
    }

    Ok(mismatches)
}

/// Recomputes and writes the CRC-32 trailer for every record between
/// `start` and `end` (spec §4.8 `close`'s checksum sweep): every record
/// type except freespace gets its trailer overwritten with the CRC-32 of
/// its header bytes followed by its content; freespace trailers are
/// zeroed, since freespace content is excluded from checksumming
/// entirely. Unlike `verify_range`, this is a write pass, not a check.
pub fn finalize_range(store: &mut (impl Read + Write + Seek), start: u64, end: u64) -> Result<()> {
    let mut offset = start;
    store.seek(SeekFrom::Start(offset))?;
    while offset < end {
        let mut header_bytes = [0_u8; RECORD_HEADER_SIZE as usize];
        store.read_exact(&mut header_bytes)?;
        let mut header_slice = &header_bytes[..];
        let header = RecordHeader::read(&mut header_slice)?;

        let content_len = header
            .record_length
            .checked_sub(RECORD_HEADER_SIZE as u32 + RECORD_TRAILER_SIZE as u32)
            .ok_or_else(|| GvrsError::InvalidFile(format!("record at offset {offset} has an impossible length")))?;

        let mut content = vec![0_u8; content_len as usize];
        store.read_exact(&mut content)?;

        let trailer = if header.record_type.has_checksum() { crc32fast::hash(&hashed_span(&header_bytes, &content)) } else { 0 };
        store.write_all(&trailer.to_le_bytes())?;

        offset += header.record_length as u64;
        store.seek(SeekFrom::Start(offset))?;
    }

    Ok(())
}

/// Parallel variant of [`verify_range`], available only with the `rayon`
/// feature: every record is framed (a cheap sequential pass, since record
/// boundaries are self-describing) before its CRC is recomputed across a
/// thread pool.
#[cfg(feature = "rayon")]
pub fn verify_range_parallel(store: &mut (impl Read + Seek), start: u64, end: u64) -> Result<Vec<ChecksumMismatch>> {
    use rayon::prelude::*;

    let mut framed = Vec::new();
    let mut offset = start;
    store.seek(SeekFrom::Start(offset))?;
    while offset < end {
        let mut header_bytes = [0_u8; RECORD_HEADER_SIZE as usize];
        store.read_exact(&mut header_bytes)?;
        let mut header_slice = &header_bytes[..];
        let header = RecordHeader::read(&mut header_slice)?;

        let content_len = header
            .record_length
            .checked_sub(RECORD_HEADER_SIZE as u32 + RECORD_TRAILER_SIZE as u32)
            .ok_or_else(|| GvrsError::InvalidFile(format!("record at offset {offset} has an impossible length")))?;

        let mut content = vec![0_u8; content_len as usize];
        store.read_exact(&mut content)?;
        let mut trailer = [0_u8; 4];
        store.read_exact(&mut trailer)?;
        let stored_crc = u32::from_le_bytes(trailer);

        if header.record_type.has_checksum() {
            framed.push((offset, stored_crc, hashed_span(&header_bytes, &content)));
        }

        offset += header.record_length as u64;
        store.seek(SeekFrom::Start(offset))?;
    }

    Ok(framed
        .into_par_iter()
        .filter_map(|(record_offset, expected, hashed)| {
            let computed = crc32fast::hash(&hashed);
            (computed != expected).then_some(ChecksumMismatch { record_offset, expected, computed })
        })
        .collect())
}
