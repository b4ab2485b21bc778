//! The tile directory (spec §3, §4.7): grid-index → file-offset table for
//! every tile ever written, growable, compact (32-bit) or extended
//! (64-bit) offsets.
//!
//! Grounded on the teacher's `meta::OffsetTable` (`Vec<u64>` per header,
//! one slot per chunk) and the redesign note in spec.md §9 preferring a
//! simple `(tileIndex -> offset)` arena plus bounds over an intrusive
//! sparse 2-D array.

use crate::error::Result;
use crate::io::round_up;

/// File size past which a tile record offset can no longer be represented
/// by a 32-bit value scaled by 8 (spec §3).
const COMPACT_LIMIT_BYTES: u64 = 32 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Representation {
    /// 32-bit offsets, each the real byte offset divided by 8.
    Compact,
    /// Full 64-bit byte offsets.
    Extended,
}

/// A `[row0, row1] x [col0, col1]` rectangle of the tile grid that has ever
/// had a stored tile, with a dense offset array indexed by
/// `(tileRow - row0) * nCols + (tileCol - col0)`.
#[derive(Debug, Clone)]
pub struct TileDirectory {
    n_rows_of_tiles: usize,
    n_cols_of_tiles: usize,
    row0: usize,
    row1: usize,
    col0: usize,
    col1: usize,
    representation: Representation,
    offsets: Vec<u64>,
    has_rectangle: bool,
}

impl TileDirectory {
    pub fn new(n_rows_of_tiles: usize, n_cols_of_tiles: usize) -> Self {
        TileDirectory {
            n_rows_of_tiles,
            n_cols_of_tiles,
            row0: 0,
            row1: 0,
            col0: 0,
            col1: 0,
            representation: Representation::Compact,
            offsets: Vec::new(),
            has_rectangle: false,
        }
    }

    fn rect_cols(&self) -> usize {
        self.col1 - self.col0 + 1
    }

    fn index_within_rect(&self, tile_row: usize, tile_col: usize) -> usize {
        (tile_row - self.row0) * self.rect_cols() + (tile_col - self.col0)
    }

    /// Returns the on-disk record offset for `tile_index`, or 0 if the tile
    /// has never been persisted (spec §4.7 `Fetch`).
    pub fn offset_of(&self, tile_row: usize, tile_col: usize) -> u64 {
        if !self.has_rectangle
            || tile_row < self.row0 || tile_row > self.row1
            || tile_col < self.col0 || tile_col > self.col1
        {
            return 0;
        }
        self.offsets[self.index_within_rect(tile_row, tile_col)]
    }

    /// Records the on-disk offset of a tile, growing the rectangle (and
    /// upgrading to the extended representation if needed) to cover it.
    pub fn set_offset(&mut self, tile_row: usize, tile_col: usize, offset: u64) {
        if offset >= COMPACT_LIMIT_BYTES && self.representation != Representation::Extended {
            log::info!("tile directory upgrading compact -> extended representation at offset {offset}");
            self.representation = Representation::Extended;
        }

        if !self.has_rectangle {
            self.row0 = tile_row;
            self.row1 = tile_row;
            self.col0 = tile_col;
            self.col1 = tile_col;
            self.offsets = vec![0];
            self.has_rectangle = true;
        } else {
            self.grow_to_include(tile_row, tile_col);
        }

        let index = self.index_within_rect(tile_row, tile_col);
        self.offsets[index] = offset;
    }

    fn grow_to_include(&mut self, tile_row: usize, tile_col: usize) {
        let new_row0 = self.row0.min(tile_row);
        let new_row1 = self.row1.max(tile_row);
        let new_col0 = self.col0.min(tile_col);
        let new_col1 = self.col1.max(tile_col);

        if new_row0 == self.row0 && new_row1 == self.row1 && new_col0 == self.col0 && new_col1 == self.col1 {
            return;
        }

        let new_cols = new_col1 - new_col0 + 1;
        let new_rows = new_row1 - new_row0 + 1;
        let mut new_offsets = vec![0_u64; new_rows * new_cols];

        for r in self.row0..=self.row1 {
            for c in self.col0..=self.col1 {
                let old_value = self.offsets[self.index_within_rect(r, c)];
                if old_value != 0 {
                    new_offsets[(r - new_row0) * new_cols + (c - new_col0)] = old_value;
                }
            }
        }

        self.row0 = new_row0;
        self.row1 = new_row1;
        self.col0 = new_col0;
        self.col1 = new_col1;
        self.offsets = new_offsets;
    }

    pub fn is_extended(&self) -> bool {
        self.representation == Representation::Extended
    }

    /// Whether any tile has ever been registered in this directory (spec
    /// §6 `add_element`: elements may only be added before the first tile
    /// write, since a tile's interleaved layout is then fixed).
    pub fn has_any_tile(&self) -> bool {
        self.has_rectangle
    }

    /// Serializes the directory into a `TileDir` record's content.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.n_rows_of_tiles as u32).to_le_bytes());
        out.extend_from_slice(&(self.n_cols_of_tiles as u32).to_le_bytes());
        out.push(if self.has_rectangle { 1 } else { 0 });
        out.push(self.representation as u8);
        out.extend_from_slice(&[0_u8; 2]);

        if self.has_rectangle {
            out.extend_from_slice(&(self.row0 as u32).to_le_bytes());
            out.extend_from_slice(&(self.row1 as u32).to_le_bytes());
            out.extend_from_slice(&(self.col0 as u32).to_le_bytes());
            out.extend_from_slice(&(self.col1 as u32).to_le_bytes());

            match self.representation {
                Representation::Compact => {
                    for &offset in &self.offsets {
                        out.extend_from_slice(&((offset / 8) as u32).to_le_bytes());
                    }
                }
                Representation::Extended => {
                    for &offset in &self.offsets {
                        out.extend_from_slice(&offset.to_le_bytes());
                    }
                }
            }
        }

        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let n_rows_of_tiles = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let n_cols_of_tiles = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let has_rectangle = bytes[8] != 0;
        let representation = if bytes[9] == 1 { Representation::Extended } else { Representation::Compact };

        let mut directory = TileDirectory {
            n_rows_of_tiles,
            n_cols_of_tiles,
            row0: 0,
            row1: 0,
            col0: 0,
            col1: 0,
            representation,
            offsets: Vec::new(),
            has_rectangle,
        };

        if has_rectangle {
            let row0 = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
            let row1 = u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
            let col0 = u32::from_le_bytes(bytes[20..24].try_into().unwrap()) as usize;
            let col1 = u32::from_le_bytes(bytes[24..28].try_into().unwrap()) as usize;
            let count = (row1 - row0 + 1) * (col1 - col0 + 1);

            let mut offsets = Vec::with_capacity(count);
            let mut cursor = 28;
            match representation {
                Representation::Compact => {
                    for _ in 0..count {
                        let scaled = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
                        offsets.push(scaled as u64 * 8);
                        cursor += 4;
                    }
                }
                Representation::Extended => {
                    for _ in 0..count {
                        offsets.push(u64::from_le_bytes(bytes[cursor..cursor + 8].try_into().unwrap()));
                        cursor += 8;
                    }
                }
            }

            directory.row0 = row0;
            directory.row1 = row1;
            directory.col0 = col0;
            directory.col1 = col1;
            directory.offsets = offsets;
        }

        Ok(directory)
    }

    /// Size in bytes the serialized directory content would occupy, used to
    /// pre-size the allocation request before writing it.
    pub fn serialized_size(&self) -> usize {
        let per_entry = if self.representation == Representation::Extended { 8 } else { 4 };
        let fixed = 12 + if self.has_rectangle { 16 } else { 0 };
        round_up(fixed + self.offsets.len() * per_entry, 4)
    }
}
