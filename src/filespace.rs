//! The variable-length-space allocator (spec §4.6): an ordered list of free
//! blocks that is reused across allocate/deallocate cycles instead of ever
//! truncating the file.
//!
//! Grounded on the teacher's `block::chunk` offset-table bookkeeping style
//! (plain `Vec`-backed tables rather than intrusive linked lists), per the
//! redesign note in spec.md §9 preferring an ordered container to intrusive
//! pointers while keeping the same merge-on-insert guarantee.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{GvrsError, Result};
use crate::io::round_up;
use crate::record::{RecordHeader, RecordType, RECORD_HEADER_SIZE, RECORD_OVERHEAD};

/// Anything the allocator can read, write and seek within: the real
/// container file in production, an in-memory cursor in tests.
pub trait Store: Read + Write + Seek {}
impl<T: Read + Write + Seek> Store for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    pub file_pos: u64,
    pub block_size: u64,
}

/// Minimum leftover a split must leave behind; below this the whole block
/// is handed to the requester instead of being split (spec §4.6 step 2).
const MIN_SPLIT_REMAINDER: u64 = 32;

/// Ordered, non-overlapping, non-adjacent list of free blocks plus the
/// current end-of-file position.
#[derive(Debug, Clone, Default)]
pub struct FileSpaceManager {
    free_list: Vec<FreeBlock>,
    end_of_file: u64,
}

impl FileSpaceManager {
    pub fn new(end_of_file: u64) -> Self {
        FileSpaceManager { free_list: Vec::new(), end_of_file }
    }

    pub fn end_of_file(&self) -> u64 {
        self.end_of_file
    }

    pub fn free_block_count(&self) -> usize {
        self.free_list.len()
    }

    pub fn total_free_bytes(&self) -> u64 {
        self.free_list.iter().map(|b| b.block_size).sum()
    }

    pub fn free_blocks(&self) -> &[FreeBlock] {
        &self.free_list
    }

    /// Allocates space for `content_size` bytes of `record_type` content,
    /// writes the record header, and returns the file offset of the first
    /// content byte (spec §4.6 steps 1-4).
    pub fn allocate(&mut self, store: &mut impl Store, content_size: u64, record_type: RecordType) -> Result<u64> {
        let block_size = round_up(content_size as usize + RECORD_OVERHEAD as usize, 8) as u64;

        let file_pos = if let Some(index) = self.free_list.iter().position(|b| b.block_size == block_size) {
            self.free_list.remove(index).file_pos
        } else if let Some(index) = self.free_list.iter().position(|b| b.block_size >= block_size + MIN_SPLIT_REMAINDER) {
            let block = self.free_list[index];
            let remainder = FreeBlock { file_pos: block.file_pos + block_size, block_size: block.block_size - block_size };
            self.free_list[index] = remainder;
            self.rewrite_free_header(store, remainder)?;
            block.file_pos
        } else if let Some(last) = self.free_list.last().copied() {
            if last.file_pos + last.block_size == self.end_of_file && last.block_size < block_size {
                self.free_list.pop();
                self.end_of_file += block_size - last.block_size;
                last.file_pos
            } else {
                self.append_at_end_of_file(block_size)
            }
        } else {
            self.append_at_end_of_file(block_size)
        };

        store.seek(SeekFrom::Start(file_pos))?;
        RecordHeader { record_length: block_size as u32, record_type }.write(store)?;
        Ok(file_pos + RECORD_HEADER_SIZE)
    }

    fn append_at_end_of_file(&mut self, block_size: u64) -> u64 {
        let file_pos = self.end_of_file;
        self.end_of_file += block_size;
        file_pos
    }

    /// Releases the record whose content starts at `content_pos` back to the
    /// free list, merging with an adjacent predecessor or successor (spec
    /// §4.6 steps 1-4). Attempted double-frees are silently ignored.
    pub fn deallocate(&mut self, store: &mut impl Store, content_pos: u64) -> Result<()> {
        if content_pos < RECORD_HEADER_SIZE {
            return Err(GvrsError::internal("content position precedes any possible record header"));
        }
        let release_pos = content_pos - RECORD_HEADER_SIZE;

        store.seek(SeekFrom::Start(release_pos))?;
        let header = RecordHeader::read(store)?;
        let release_size = header.record_length as u64;

        if header.record_type == RecordType::Freespace {
            return Ok(()); // already free: silently ignore the double-free
        }
        if self.free_list.iter().any(|b| b.file_pos == release_pos) {
            return Ok(());
        }

        store.seek(SeekFrom::Start(release_pos))?;
        RecordHeader { record_length: release_size as u32, record_type: RecordType::Freespace }.write(store)?;

        let mut merged = FreeBlock { file_pos: release_pos, block_size: release_size };

        let insert_at = self.free_list.partition_point(|b| b.file_pos < merged.file_pos);

        if insert_at > 0 {
            let predecessor = self.free_list[insert_at - 1];
            if predecessor.file_pos + predecessor.block_size == merged.file_pos {
                merged = FreeBlock { file_pos: predecessor.file_pos, block_size: predecessor.block_size + merged.block_size };
                self.free_list.remove(insert_at - 1);
            }
        }

        let insert_at = self.free_list.partition_point(|b| b.file_pos < merged.file_pos);
        if insert_at < self.free_list.len() {
            let successor = self.free_list[insert_at];
            if merged.file_pos + merged.block_size == successor.file_pos {
                merged = FreeBlock { file_pos: merged.file_pos, block_size: merged.block_size + successor.block_size };
                self.free_list.remove(insert_at);
            }
        }

        self.rewrite_free_header(store, merged)?;
        let insert_at = self.free_list.partition_point(|b| b.file_pos < merged.file_pos);
        self.free_list.insert(insert_at, merged);
        Ok(())
    }

    fn rewrite_free_header(&self, store: &mut impl Store, block: FreeBlock) -> Result<()> {
        store.seek(SeekFrom::Start(block.file_pos))?;
        RecordHeader { record_length: block.block_size as u32, record_type: RecordType::Freespace }.write(store)
    }

    /// Pads a record's content with zeroes up to the start of its trailing
    /// checksum slot (spec §4.6 `finish`). `block_size` is the full record
    /// size returned by the allocation that produced `content_pos`.
    pub fn finish(&self, store: &mut impl Store, content_pos: u64, block_size: u64) -> Result<()> {
        let release_pos = content_pos - RECORD_HEADER_SIZE;
        let checksum_slot = release_pos + block_size - 4;
        let current = store.stream_position()?;

        if current > checksum_slot {
            return Err(GvrsError::internal("record write overran its allocated block"));
        }

        let padding = checksum_slot - current;
        if padding > 0 {
            store.write_all(&vec![0_u8; padding as usize])?;
        }
        Ok(())
    }

    /// Serializes the free list into a `FileSpaceDir` record (spec §4.6,
    /// `close` persisting the allocator's own state).
    pub fn write_directory(&mut self, store: &mut impl Store) -> Result<u64> {
        let content_size = 4 + self.free_list.len() as u64 * 16;
        let content_pos = self.allocate(store, content_size, RecordType::FileSpaceDir)?;
        store.seek(SeekFrom::Start(content_pos))?;

        store.write_all(&(self.free_list.len() as u32).to_le_bytes())?;
        for block in &self.free_list {
            store.write_all(&block.file_pos.to_le_bytes())?;
            store.write_all(&block.block_size.to_le_bytes())?;
        }

        self.finish(store, content_pos, round_up(content_size as usize + RECORD_OVERHEAD as usize, 8) as u64)?;
        Ok(content_pos)
    }

    pub fn read_directory(store: &mut impl Store, content_pos: u64, end_of_file: u64) -> Result<Self> {
        store.seek(SeekFrom::Start(content_pos))?;
        let mut count_bytes = [0_u8; 4];
        store.read_exact(&mut count_bytes)?;
        let count = u32::from_le_bytes(count_bytes) as usize;

        let mut free_list = Vec::with_capacity(count);
        for _ in 0..count {
            let mut pos_bytes = [0_u8; 8];
            let mut size_bytes = [0_u8; 8];
            store.read_exact(&mut pos_bytes)?;
            store.read_exact(&mut size_bytes)?;
            free_list.push(FreeBlock { file_pos: u64::from_le_bytes(pos_bytes), block_size: u64::from_le_bytes(size_bytes) });
        }

        Ok(FileSpaceManager { free_list, end_of_file })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn store() -> Cursor<Vec<u8>> {
        Cursor::new(Vec::new())
    }

    #[test]
    fn allocate_then_deallocate_leaves_one_spanning_block() {
        let mut s = store();
        let mut fsm = FileSpaceManager::new(0);

        let a = fsm.allocate(&mut s, 100, RecordType::Metadata).unwrap();
        let b = fsm.allocate(&mut s, 200, RecordType::Metadata).unwrap();
        let c = fsm.allocate(&mut s, 50, RecordType::Metadata).unwrap();
        let end = fsm.end_of_file();

        fsm.deallocate(&mut s, b).unwrap();
        fsm.deallocate(&mut s, a).unwrap();
        fsm.deallocate(&mut s, c).unwrap();

        assert_eq!(fsm.free_block_count(), 1);
        assert_eq!(fsm.free_blocks()[0], FreeBlock { file_pos: 0, block_size: end });
    }

    #[test]
    fn free_blocks_never_adjacent_and_stay_sorted() {
        let mut s = store();
        let mut fsm = FileSpaceManager::new(0);

        let offsets: Vec<u64> = (0..6).map(|_| fsm.allocate(&mut s, 40, RecordType::Tile).unwrap()).collect();
        fsm.deallocate(&mut s, offsets[1]).unwrap();
        fsm.deallocate(&mut s, offsets[3]).unwrap();
        fsm.deallocate(&mut s, offsets[2]).unwrap();

        let blocks = fsm.free_blocks();
        assert!(blocks.windows(2).all(|w| w[0].file_pos < w[1].file_pos));
        assert!(blocks.windows(2).all(|w| w[0].file_pos + w[0].block_size < w[1].file_pos));
        // blocks 1,2,3 merged into one contiguous run
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn double_free_is_ignored() {
        let mut s = store();
        let mut fsm = FileSpaceManager::new(0);
        let a = fsm.allocate(&mut s, 40, RecordType::Tile).unwrap();
        fsm.deallocate(&mut s, a).unwrap();
        fsm.deallocate(&mut s, a).unwrap();
        assert_eq!(fsm.free_block_count(), 1);
    }

    #[test]
    fn exact_size_reuse_does_not_grow_file() {
        let mut s = store();
        let mut fsm = FileSpaceManager::new(0);
        let a = fsm.allocate(&mut s, 40, RecordType::Tile).unwrap();
        fsm.deallocate(&mut s, a).unwrap();
        let end_before = fsm.end_of_file();

        let _b = fsm.allocate(&mut s, 40, RecordType::Tile).unwrap();
        assert_eq!(fsm.end_of_file(), end_before);
        assert_eq!(fsm.free_block_count(), 0);
    }

    #[test]
    fn directory_round_trips() {
        let mut s = store();
        let mut fsm = FileSpaceManager::new(0);
        let offsets: Vec<u64> = (0..4).map(|_| fsm.allocate(&mut s, 40, RecordType::Tile).unwrap()).collect();
        fsm.deallocate(&mut s, offsets[1]).unwrap();

        let dir_pos = fsm.write_directory(&mut s).unwrap();
        let reread = FileSpaceManager::read_directory(&mut s, dir_pos, fsm.end_of_file()).unwrap();
        assert_eq!(reread.free_blocks(), fsm.free_blocks());
    }
}
