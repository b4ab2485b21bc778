//! The container engine (spec §4, §5, §6): `GvrsFile`, the single type that
//! wires the allocator, tile directory, tile cache, metadata directory,
//! coordinate maps and codec registry into the public `create`/`open`/
//! `read_cell`/`write_cell`/`flush`/`close` surface.
//!
//! Grounded on the teacher's `image::Image`/`block::UncompressedBlock`
//! split between "whole-file structure" and "one block's worth of
//! pixels", generalized here to GVRS's record-addressed tiles: a tile's
//! in-memory buffer interleaves every element's cells (stride
//! `sum(padded_data_size)`, spec §3) for O(1) random cell access, and is
//! only split back into per-element planes when a tile is actually
//! written to or read from disk, so each element can pick its own codec.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::cache::{CacheSize, Tile, TileCache};
use crate::codec::CodecRegistry;
use crate::coordinates::CoordinateMaps;
use crate::element::{CellValue, ElementSpec, ElementVariant};
use crate::error::{GvrsError, Result};
use crate::filespace::{FileSpaceManager, Store};
use crate::header::{now_millis, FileHeader, RasterMetadata};
use crate::io::round_up;
use crate::metadata::{MetadataDirectory, MetadataRecord};
use crate::record::{RecordHeader, RecordType, RECORD_HEADER_SIZE, RECORD_OVERHEAD};
use crate::tiledir::TileDirectory;

/// Sentinel codec-table index meaning "element stored uncompressed", used
/// when every registered codec refuses a tile (or compresses it to no
/// smaller than the raw form).
const RAW_CODEC_MARKER: u8 = 0xFF;

/// Extra bytes reserved past the header's content at creation time, so a
/// handful of `add_element` calls made right after `create` (before the
/// first tile write) can still grow the header in place. Declaring every
/// element up front avoids depending on this budget at all; see
/// `DESIGN.md` for the tradeoff this simplification makes.
const HEADER_SLACK_BYTES: usize = 1024;

#[derive(Debug, Clone, Copy, Default)]
struct Stats {
    tile_reads: u64,
    tile_writes: u64,
}

/// Snapshot of a container's activity and space usage (spec §6, §7).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
    pub tile_reads: u64,
    pub tile_writes: u64,
    pub free_block_count: usize,
    pub total_free_bytes: u64,
}

/// A Rust value that can be read from or written to a single raster cell,
/// bridging the generic `read_cell`/`write_cell` API to the tagged
/// [`CellValue`] each element variant actually stores.
pub trait CellData: Sized {
    fn from_cell_value(value: CellValue) -> Result<Self>;
    fn to_cell_value(self, variant: ElementVariant) -> Result<CellValue>;
}

fn type_mismatch() -> GvrsError {
    GvrsError::BadElementSpec("requested cell type does not match the element's variant".into())
}

impl CellData for i32 {
    fn from_cell_value(value: CellValue) -> Result<Self> {
        match value {
            CellValue::Int32(v) => Ok(v),
            _ => Err(type_mismatch()),
        }
    }
    fn to_cell_value(self, _variant: ElementVariant) -> Result<CellValue> {
        Ok(CellValue::Int32(self))
    }
}

impl CellData for f32 {
    fn from_cell_value(value: CellValue) -> Result<Self> {
        match value {
            CellValue::Float32(v) => Ok(v),
            _ => Err(type_mismatch()),
        }
    }
    fn to_cell_value(self, _variant: ElementVariant) -> Result<CellValue> {
        Ok(CellValue::Float32(self))
    }
}

impl CellData for i16 {
    fn from_cell_value(value: CellValue) -> Result<Self> {
        match value {
            CellValue::Int16(v) => Ok(v),
            _ => Err(type_mismatch()),
        }
    }
    fn to_cell_value(self, _variant: ElementVariant) -> Result<CellValue> {
        Ok(CellValue::Int16(self))
    }
}

impl CellData for f64 {
    fn from_cell_value(value: CellValue) -> Result<Self> {
        match value {
            CellValue::IntCodedFloat(v) => Ok(v),
            _ => Err(type_mismatch()),
        }
    }
    fn to_cell_value(self, variant: ElementVariant) -> Result<CellValue> {
        match variant {
            ElementVariant::IntCodedFloat { .. } => Ok(CellValue::IntCodedFloat(self)),
            _ => Err(type_mismatch()),
        }
    }
}

fn fill_bytes(variant: ElementVariant) -> Vec<u8> {
    match variant.fill_as_cell() {
        CellValue::Int32(v) => v.to_le_bytes().to_vec(),
        CellValue::Float32(v) => v.to_le_bytes().to_vec(),
        CellValue::Int16(v) => v.to_le_bytes().to_vec(),
        CellValue::IntCodedFloat(_) => match variant {
            ElementVariant::IntCodedFloat { int_fill, .. } => int_fill.to_le_bytes().to_vec(),
            _ => unreachable!("fill_as_cell and variant must agree"),
        },
    }
}

fn raw_i32_bytes(values: &[i32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for &v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn raw_f32_bytes(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for &v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// A reference to one element's record-offset directory kept by an open
/// `GvrsFile` for named/typed metadata blobs (spec §4.9). Borrows three
/// disjoint fields of the container so callers can write/read/delete
/// without the container engine needing a single combined lock.
pub struct MetadataHandle<'a, S: Store> {
    store: &'a mut S,
    file_space: &'a mut FileSpaceManager,
    directory: &'a mut MetadataDirectory,
}

impl<'a, S: Store> MetadataHandle<'a, S> {
    pub fn write(&mut self, record: MetadataRecord) -> Result<()> {
        self.directory.write(self.store, self.file_space, record)
    }

    pub fn delete(&mut self, name: &str, record_id: i32) -> Result<bool> {
        self.directory.delete(self.store, self.file_space, name, record_id)
    }

    pub fn read_by_name_and_id(&mut self, name: &str, record_id: i32) -> Result<Vec<MetadataRecord>> {
        self.directory.read_by_name_and_id(self.store, name, record_id)
    }

    pub fn delete_by_name_and_id(&mut self, name: &str, record_id: i32) -> Result<usize> {
        self.directory.delete_by_name_and_id(self.store, self.file_space, name, record_id)
    }

    pub fn len(&self) -> usize {
        self.directory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }
}

/// An open GVRS container (spec §4, §5, §6).
///
/// Dropping an open `GvrsFile` without calling [`close`](Self::close)
/// performs no I/O: a reader simply stops reading, and a writer discards
/// whatever cell writes or metadata edits had not yet been flushed. Only
/// an explicit `close()` (or `flush()`) persists pending changes; there is
/// no flush-on-drop.
pub struct GvrsFile<S: Store = File> {
    store: S,
    header: FileHeader,
    header_block_size: u64,
    file_space: FileSpaceManager,
    tile_directory: TileDirectory,
    metadata: MetadataDirectory,
    cache: TileCache,
    codecs: CodecRegistry,
    coordinate_maps: CoordinateMaps,
    element_offsets: Vec<usize>,
    cell_stride: usize,
    writable: bool,
    path: Option<PathBuf>,
    delete_on_close: bool,
    closed: bool,
    stats: Stats,
}

impl GvrsFile<File> {
    /// Creates a brand-new container at `path`, truncating any existing
    /// file, and opens it for writing (spec §6 `create`).
    pub fn create(path: impl AsRef<Path>, raster: RasterMetadata) -> Result<GvrsFile<File>> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(path.as_ref())?;
        let mut gvrs = Self::create_with_store(file, raster)?;
        gvrs.path = Some(path.as_ref().to_path_buf());
        gvrs.header.opened_for_writing_time_ms = now_millis();
        gvrs.write_header()?;
        Ok(gvrs)
    }

    /// Opens an existing container read-only (spec §6 `open`).
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<GvrsFile<File>> {
        let file = File::open(path.as_ref()).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => GvrsError::FileNotFound(path.as_ref().display().to_string()),
            _ => GvrsError::FileError(e),
        })?;
        let mut gvrs = Self::open_with_store(file, false)?;
        gvrs.path = Some(path.as_ref().to_path_buf());
        Ok(gvrs)
    }

    /// Opens an existing container for reading and writing, claiming the
    /// advisory exclusive-write lock (spec §5, §6 `open`). Fails with
    /// [`GvrsError::ExclusiveOpen`] if another writer already holds it.
    pub fn open_writable(path: impl AsRef<Path>) -> Result<GvrsFile<File>> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref()).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => GvrsError::FileNotFound(path.as_ref().display().to_string()),
            _ => GvrsError::FileError(e),
        })?;
        let mut gvrs = Self::open_with_store(file, true)?;
        if gvrs.header.opened_for_writing_time_ms != 0 {
            return Err(GvrsError::ExclusiveOpen);
        }
        gvrs.path = Some(path.as_ref().to_path_buf());
        gvrs.header.opened_for_writing_time_ms = now_millis();
        gvrs.write_header()?;
        Ok(gvrs)
    }
}

impl<S: Store> GvrsFile<S> {
    fn compute_layout(elements: &[ElementSpec]) -> (Vec<usize>, usize) {
        let mut offsets = Vec::with_capacity(elements.len());
        let mut stride = 0;
        for element in elements {
            offsets.push(stride);
            stride += element.padded_data_size();
        }
        (offsets, stride)
    }

    fn recompute_layout(&mut self) {
        let (offsets, stride) = Self::compute_layout(&self.header.raster.elements);
        self.element_offsets = offsets;
        self.cell_stride = stride;
    }

    /// Creates a new container backed by an arbitrary [`Store`] (a real
    /// file in production, an in-memory cursor in tests).
    pub fn create_with_store(mut store: S, raster: RasterMetadata) -> Result<GvrsFile<S>> {
        let header = FileHeader::new(raster);
        let mut file_space = FileSpaceManager::new(0);

        let mut probe = Vec::new();
        header.write(&mut probe, 0)?;
        let reserved_content_size = probe.len() + HEADER_SLACK_BYTES;
        let header_block_size = round_up(reserved_content_size + RECORD_OVERHEAD as usize, 8) as u64;

        let content_pos = file_space.allocate(&mut store, reserved_content_size as u64, RecordType::Header)?;
        debug_assert_eq!(content_pos, RECORD_HEADER_SIZE, "the header must be the very first allocation");

        let coordinate_maps = CoordinateMaps::new(
            header.raster.coordinate_system,
            header.raster.raster_to_model,
            header.raster.x0,
            header.raster.x1,
        )?;
        let (element_offsets, cell_stride) = Self::compute_layout(&header.raster.elements);
        let cache_capacity = CacheSize::Medium.slot_count(header.raster.n_rows_of_tiles(), header.raster.n_cols_of_tiles());
        let tile_directory = TileDirectory::new(header.raster.n_rows_of_tiles(), header.raster.n_cols_of_tiles());

        let mut gvrs = GvrsFile {
            store,
            header,
            header_block_size,
            file_space,
            tile_directory,
            metadata: MetadataDirectory::new(),
            cache: TileCache::with_capacity(cache_capacity),
            codecs: CodecRegistry::with_builtins(),
            coordinate_maps,
            element_offsets,
            cell_stride,
            writable: true,
            path: None,
            delete_on_close: false,
            closed: false,
            stats: Stats::default(),
        };
        gvrs.write_header()?;
        Ok(gvrs)
    }

    /// Opens a container backed by an arbitrary [`Store`]; `writable`
    /// controls whether mutation methods are permitted.
    pub fn open_with_store(mut store: S, writable: bool) -> Result<GvrsFile<S>> {
        store.seek(SeekFrom::Start(0))?;
        let record_header = RecordHeader::read(&mut store)?;
        if record_header.record_type != RecordType::Header {
            return Err(GvrsError::InvalidFile("first record is not the file header".into()));
        }
        let header_block_size = record_header.record_length as u64;
        let header = FileHeader::read(&mut store)?;

        let end_of_file = store.seek(SeekFrom::End(0))?;

        let file_space = if header.file_space_dir_offset != 0 {
            FileSpaceManager::read_directory(&mut store, header.file_space_dir_offset as u64, end_of_file)?
        } else {
            FileSpaceManager::new(end_of_file)
        };

        let tile_directory = if header.tile_dir_offset != 0 {
            let tile_dir_content_pos = header.tile_dir_offset as u64;
            store.seek(SeekFrom::Start(tile_dir_content_pos - RECORD_HEADER_SIZE))?;
            let record = RecordHeader::read(&mut store)?;
            let mut bytes = vec![0_u8; record.content_capacity() as usize];
            store.read_exact(&mut bytes)?;
            TileDirectory::from_bytes(&bytes)?
        } else {
            TileDirectory::new(header.raster.n_rows_of_tiles(), header.raster.n_cols_of_tiles())
        };

        let metadata = if header.metadata_dir_offset != 0 {
            MetadataDirectory::read_directory(&mut store, header.metadata_dir_offset as u64)?
        } else {
            MetadataDirectory::new()
        };

        let coordinate_maps = CoordinateMaps::new(
            header.raster.coordinate_system,
            header.raster.raster_to_model,
            header.raster.x0,
            header.raster.x1,
        )?;
        let (element_offsets, cell_stride) = Self::compute_layout(&header.raster.elements);
        let cache_capacity = CacheSize::Medium.slot_count(header.raster.n_rows_of_tiles(), header.raster.n_cols_of_tiles());

        Ok(GvrsFile {
            store,
            header,
            header_block_size,
            file_space,
            tile_directory,
            metadata,
            cache: TileCache::with_capacity(cache_capacity),
            codecs: CodecRegistry::with_builtins(),
            coordinate_maps,
            element_offsets,
            cell_stride,
            writable,
            path: None,
            delete_on_close: false,
            closed: false,
            stats: Stats::default(),
        })
    }

    pub fn raster(&self) -> &RasterMetadata {
        &self.header.raster
    }

    pub fn coordinate_maps(&self) -> &CoordinateMaps {
        &self.coordinate_maps
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Adds an element to the raster's schema. Only permitted before any
    /// tile has ever been written (spec §6 `add_element`): once a tile
    /// record exists, its interleaved layout is fixed.
    pub fn add_element(&mut self, spec: ElementSpec) -> Result<()> {
        if !self.writable {
            return Err(GvrsError::NotOpenedForWriting);
        }
        if self.tile_directory.has_any_tile() || self.cache.resident_count() > 0 {
            return Err(GvrsError::BadRasterSpecification(
                "elements cannot be added once the first tile has been written".into(),
            ));
        }
        if self.header.raster.elements.iter().any(|e| e.name == spec.name) {
            return Err(GvrsError::NameNotUnique(spec.name.to_string()));
        }

        self.header.raster.elements.push(spec);
        self.recompute_layout();
        Ok(())
    }

    pub fn metadata(&mut self) -> MetadataHandle<'_, S> {
        MetadataHandle { store: &mut self.store, file_space: &mut self.file_space, directory: &mut self.metadata }
    }

    fn element_index(&self, name: &str) -> Result<usize> {
        self.header
            .raster
            .elements
            .iter()
            .position(|e| e.name.as_str() == name)
            .ok_or_else(|| GvrsError::ElementNotFound(name.to_string()))
    }

    fn bounds_check(&self, row: i32, col: i32) -> Result<()> {
        if row < 0 || col < 0 || row >= self.header.raster.n_rows_in_raster || col >= self.header.raster.n_cols_in_raster {
            return Err(GvrsError::CoordinateOutOfBounds(format!("({row}, {col})")));
        }
        Ok(())
    }

    fn tile_location(&self, row: i32, col: i32) -> (usize, usize, usize, usize) {
        let n_rows_in_tile = self.header.raster.n_rows_in_tile as usize;
        let n_cols_in_tile = self.header.raster.n_cols_in_tile as usize;
        let row = row as usize;
        let col = col as usize;
        (row / n_rows_in_tile, col / n_cols_in_tile, row % n_rows_in_tile, col % n_cols_in_tile)
    }

    fn tile_index(&self, tile_row: usize, tile_col: usize) -> u64 {
        tile_row as u64 * self.header.raster.n_cols_of_tiles() as u64 + tile_col as u64
    }

    fn tile_row_col(&self, tile_index: u64) -> (usize, usize) {
        let cols = self.header.raster.n_cols_of_tiles() as u64;
        ((tile_index / cols) as usize, (tile_index % cols) as usize)
    }

    fn n_cells_per_tile(&self) -> usize {
        self.header.raster.n_rows_in_tile as usize * self.header.raster.n_cols_in_tile as usize
    }

    fn tile_byte_size(&self) -> usize {
        self.cell_stride * self.n_cells_per_tile()
    }

    fn cell_byte_offset(&self, element_index: usize, local_row: usize, local_col: usize) -> usize {
        let n_cols_in_tile = self.header.raster.n_cols_in_tile as usize;
        let cell_index = local_row * n_cols_in_tile + local_col;
        cell_index * self.cell_stride + self.element_offsets[element_index]
    }

    fn fresh_tile_buffer(&self) -> Vec<u8> {
        let mut cell_template = vec![0_u8; self.cell_stride];
        for (element, &offset) in self.header.raster.elements.iter().zip(&self.element_offsets) {
            let bytes = fill_bytes(element.variant);
            cell_template[offset..offset + bytes.len()].copy_from_slice(&bytes);
        }
        cell_template.repeat(self.n_cells_per_tile())
    }

    fn ensure_tile_resident(&mut self, tile_index: u64, tile_row: usize, tile_col: usize) -> Result<()> {
        if self.cache.get(tile_index).is_some() {
            return Ok(());
        }

        let offset = self.tile_directory.offset_of(tile_row, tile_col);
        let data = if offset == 0 { self.fresh_tile_buffer() } else { self.read_tile_record(offset)? };
        self.stats.tile_reads += 1;

        if let Some(evicted) = self.cache.insert(Tile::new(tile_index, data)) {
            log::debug!("evicting tile {} from cache (write_pending={})", evicted.tile_index, evicted.write_pending);
            if evicted.write_pending {
                let (evicted_row, evicted_col) = self.tile_row_col(evicted.tile_index);
                self.persist_tile(evicted.tile_index, evicted_row, evicted_col, &evicted.data)?;
            }
        }
        Ok(())
    }

    fn read_raw_cell(&mut self, element_name: &str, row: i32, col: i32) -> Result<CellValue> {
        let index = self.element_index(element_name)?;
        self.bounds_check(row, col)?;
        let (tile_row, tile_col, local_row, local_col) = self.tile_location(row, col);
        let tile_index = self.tile_index(tile_row, tile_col);
        self.ensure_tile_resident(tile_index, tile_row, tile_col)?;

        let variant = self.header.raster.elements[index].variant;
        let offset = self.cell_byte_offset(index, local_row, local_col);
        let tile = self.cache.get(tile_index).expect("tile was just made resident");

        Ok(match variant {
            ElementVariant::Int32 { .. } => {
                CellValue::Int32(i32::from_le_bytes(tile.data[offset..offset + 4].try_into().unwrap()))
            }
            ElementVariant::Float32 { .. } => {
                CellValue::Float32(f32::from_le_bytes(tile.data[offset..offset + 4].try_into().unwrap()))
            }
            ElementVariant::Int16 { .. } => {
                CellValue::Int16(i16::from_le_bytes(tile.data[offset..offset + 2].try_into().unwrap()))
            }
            ElementVariant::IntCodedFloat { .. } => {
                let stored = i32::from_le_bytes(tile.data[offset..offset + 4].try_into().unwrap());
                CellValue::IntCodedFloat(variant.int_coded_to_float(stored))
            }
        })
    }

    fn write_raw_cell(&mut self, element_name: &str, row: i32, col: i32, value: CellValue) -> Result<()> {
        if !self.writable {
            return Err(GvrsError::NotOpenedForWriting);
        }
        let index = self.element_index(element_name)?;
        self.bounds_check(row, col)?;

        let variant = self.header.raster.elements[index].variant;
        let raw: Vec<u8> = match (variant, value) {
            (ElementVariant::Int32 { .. }, CellValue::Int32(v)) => v.to_le_bytes().to_vec(),
            (ElementVariant::Float32 { .. }, CellValue::Float32(v)) => v.to_le_bytes().to_vec(),
            (ElementVariant::Int16 { .. }, CellValue::Int16(v)) => v.to_le_bytes().to_vec(),
            (ElementVariant::IntCodedFloat { .. }, CellValue::IntCodedFloat(v)) => {
                variant.float_to_int_coded(v).to_le_bytes().to_vec()
            }
            _ => return Err(type_mismatch()),
        };

        let (tile_row, tile_col, local_row, local_col) = self.tile_location(row, col);
        let tile_index = self.tile_index(tile_row, tile_col);
        self.ensure_tile_resident(tile_index, tile_row, tile_col)?;

        let offset = self.cell_byte_offset(index, local_row, local_col);
        let tile = self.cache.get_mut(tile_index).expect("tile was just made resident");
        tile.data[offset..offset + raw.len()].copy_from_slice(&raw);
        tile.write_pending = true;
        Ok(())
    }

    /// Reads one cell of `element` at `(row, col)` (spec §6 `read_cell`).
    pub fn read_cell<T: CellData>(&mut self, element: &str, row: i32, col: i32) -> Result<T> {
        T::from_cell_value(self.read_raw_cell(element, row, col)?)
    }

    /// Writes one cell of `element` at `(row, col)` (spec §6 `write_cell`).
    pub fn write_cell<T: CellData>(&mut self, element: &str, row: i32, col: i32, value: T) -> Result<()> {
        let index = self.element_index(element)?;
        let variant = self.header.raster.elements[index].variant;
        let cell_value = value.to_cell_value(variant)?;
        self.write_raw_cell(element, row, col, cell_value)
    }

    fn extract_plane_i32(&self, data: &[u8], element_index: usize) -> Vec<i32> {
        let offset = self.element_offsets[element_index];
        let variant = self.header.raster.elements[element_index].variant;
        (0..self.n_cells_per_tile())
            .map(|cell| {
                let base = cell * self.cell_stride + offset;
                match variant {
                    ElementVariant::Int16 { .. } => i16::from_le_bytes(data[base..base + 2].try_into().unwrap()) as i32,
                    _ => i32::from_le_bytes(data[base..base + 4].try_into().unwrap()),
                }
            })
            .collect()
    }

    fn scatter_plane_i32(&self, data: &mut [u8], element_index: usize, plane: &[i32]) {
        let offset = self.element_offsets[element_index];
        let variant = self.header.raster.elements[element_index].variant;
        for (cell, &value) in plane.iter().enumerate() {
            let base = cell * self.cell_stride + offset;
            match variant {
                ElementVariant::Int16 { .. } => data[base..base + 2].copy_from_slice(&(value as i16).to_le_bytes()),
                _ => data[base..base + 4].copy_from_slice(&value.to_le_bytes()),
            }
        }
    }

    fn extract_plane_f32(&self, data: &[u8], element_index: usize) -> Vec<f32> {
        let offset = self.element_offsets[element_index];
        (0..self.n_cells_per_tile())
            .map(|cell| {
                let base = cell * self.cell_stride + offset;
                f32::from_le_bytes(data[base..base + 4].try_into().unwrap())
            })
            .collect()
    }

    fn scatter_plane_f32(&self, data: &mut [u8], element_index: usize, plane: &[f32]) {
        let offset = self.element_offsets[element_index];
        for (cell, &value) in plane.iter().enumerate() {
            let base = cell * self.cell_stride + offset;
            data[base..base + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    fn compress_plane_int(&self, values: &[i32]) -> (u8, Vec<u8>) {
        let n_rows = self.header.raster.n_rows_in_tile as usize;
        let n_cols = self.header.raster.n_cols_in_tile as usize;
        let mut best: Option<(u8, Vec<u8>)> = None;
        for (idx, identifier) in self.header.raster.codec_identifiers.iter().enumerate() {
            let codec = self.codecs.instantiate(identifier);
            if let Ok(bytes) = codec.encode_int(values, n_rows, n_cols) {
                if best.as_ref().map_or(true, |(_, b)| bytes.len() < b.len()) {
                    best = Some((idx as u8, bytes));
                }
            }
        }
        best.unwrap_or_else(|| (RAW_CODEC_MARKER, raw_i32_bytes(values)))
    }

    fn decompress_plane_int(&self, marker: u8, bytes: &[u8]) -> Result<Vec<i32>> {
        let n_rows = self.header.raster.n_rows_in_tile as usize;
        let n_cols = self.header.raster.n_cols_in_tile as usize;
        if marker == RAW_CODEC_MARKER {
            return Ok(bytes.chunks_exact(4).map(|c| i32::from_le_bytes(c.try_into().unwrap())).collect());
        }
        let identifier = self
            .header
            .raster
            .codec_identifiers
            .get(marker as usize)
            .ok_or_else(|| GvrsError::BadCompressionFormat("unknown tile codec marker".into()))?;
        self.codecs.instantiate(identifier).decode_int(bytes, n_rows, n_cols)
    }

    fn compress_plane_float(&self, values: &[f32]) -> (u8, Vec<u8>) {
        let n_rows = self.header.raster.n_rows_in_tile as usize;
        let n_cols = self.header.raster.n_cols_in_tile as usize;
        let mut best: Option<(u8, Vec<u8>)> = None;
        for (idx, identifier) in self.header.raster.codec_identifiers.iter().enumerate() {
            let codec = self.codecs.instantiate(identifier);
            if let Ok(bytes) = codec.encode_float(values, n_rows, n_cols) {
                if best.as_ref().map_or(true, |(_, b)| bytes.len() < b.len()) {
                    best = Some((idx as u8, bytes));
                }
            }
        }
        best.unwrap_or_else(|| (RAW_CODEC_MARKER, raw_f32_bytes(values)))
    }

    fn decompress_plane_float(&self, marker: u8, bytes: &[u8]) -> Result<Vec<f32>> {
        let n_rows = self.header.raster.n_rows_in_tile as usize;
        let n_cols = self.header.raster.n_cols_in_tile as usize;
        if marker == RAW_CODEC_MARKER {
            return Ok(bytes.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect());
        }
        let identifier = self
            .header
            .raster
            .codec_identifiers
            .get(marker as usize)
            .ok_or_else(|| GvrsError::BadCompressionFormat("unknown tile codec marker".into()))?;
        self.codecs.instantiate(identifier).decode_float(bytes, n_rows, n_cols)
    }

    fn encode_tile(&self, data: &[u8]) -> Vec<u8> {
        let mut content = Vec::new();
        for i in 0..self.header.raster.elements.len() {
            let (marker, bytes) = match self.header.raster.elements[i].variant {
                ElementVariant::Float32 { .. } => self.compress_plane_float(&self.extract_plane_f32(data, i)),
                _ => self.compress_plane_int(&self.extract_plane_i32(data, i)),
            };
            content.push(marker);
            content.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            content.extend_from_slice(&bytes);
        }
        content
    }

    fn decode_tile(&self, mut content: &[u8]) -> Result<Vec<u8>> {
        let mut data = vec![0_u8; self.tile_byte_size()];
        for i in 0..self.header.raster.elements.len() {
            if content.len() < 5 {
                return Err(GvrsError::BadCompressionFormat("tile record truncated".into()));
            }
            let marker = content[0];
            let len = u32::from_le_bytes(content[1..5].try_into().unwrap()) as usize;
            if content.len() < 5 + len {
                return Err(GvrsError::BadCompressionFormat("tile segment truncated".into()));
            }
            let segment = &content[5..5 + len];

            match self.header.raster.elements[i].variant {
                ElementVariant::Float32 { .. } => {
                    let plane = self.decompress_plane_float(marker, segment)?;
                    self.scatter_plane_f32(&mut data, i, &plane);
                }
                _ => {
                    let plane = self.decompress_plane_int(marker, segment)?;
                    self.scatter_plane_i32(&mut data, i, &plane);
                }
            }

            content = &content[5 + len..];
        }
        Ok(data)
    }

    fn read_tile_record(&mut self, content_pos: u64) -> Result<Vec<u8>> {
        self.store.seek(SeekFrom::Start(content_pos - RECORD_HEADER_SIZE))?;
        let header = RecordHeader::read(&mut self.store)?;
        let mut content = vec![0_u8; header.content_capacity() as usize];
        self.store.read_exact(&mut content)?;
        self.decode_tile(&content)
    }

    fn write_record_payload(&mut self, content_pos: u64, block_size: u64, content: &[u8]) -> Result<()> {
        let capacity = (block_size - RECORD_OVERHEAD) as usize;
        debug_assert!(content.len() <= capacity, "content overruns its allocated record");

        let mut payload = content.to_vec();
        payload.resize(capacity, 0);

        self.store.seek(SeekFrom::Start(content_pos))?;
        self.store.write_all(&payload)?;

        // spec §4.8: the trailing CRC-32 covers the record's 8-byte header
        // as well as its content, so header corruption is also detectable.
        let crc = if self.header.raster.checksums_enabled {
            let mut header_bytes = [0_u8; RECORD_HEADER_SIZE as usize];
            self.store.seek(SeekFrom::Start(content_pos - RECORD_HEADER_SIZE))?;
            self.store.read_exact(&mut header_bytes)?;
            self.store.seek(SeekFrom::Start(content_pos + payload.len() as u64))?;
            crate::checksum::hashed_crc32(&header_bytes, &payload)
        } else {
            0
        };
        self.store.write_all(&crc.to_le_bytes())?;
        Ok(())
    }

    fn persist_tile(&mut self, tile_index: u64, tile_row: usize, tile_col: usize, data: &[u8]) -> Result<()> {
        let content = self.encode_tile(data);

        let old_offset = self.tile_directory.offset_of(tile_row, tile_col);
        if old_offset != 0 {
            self.file_space.deallocate(&mut self.store, old_offset)?;
        }

        let block_size = round_up(content.len() + RECORD_OVERHEAD as usize, 8) as u64;
        let content_pos = self.file_space.allocate(&mut self.store, content.len() as u64, RecordType::Tile)?;
        self.write_record_payload(content_pos, block_size, &content)?;

        self.tile_directory.set_offset(tile_row, tile_col, content_pos);
        if let Some(tile) = self.cache.get_mut(tile_index) {
            tile.write_pending = false;
            tile.record_offset = content_pos;
        }
        self.stats.tile_writes += 1;
        Ok(())
    }

    fn write_tile_directory(&mut self) -> Result<()> {
        if self.header.tile_dir_offset != 0 {
            self.file_space.deallocate(&mut self.store, self.header.tile_dir_offset as u64)?;
        }
        let bytes = self.tile_directory.to_bytes();
        let content_pos = self.file_space.allocate(&mut self.store, bytes.len() as u64, RecordType::TileDir)?;
        let block_size = round_up(bytes.len() + RECORD_OVERHEAD as usize, 8) as u64;
        self.write_record_payload(content_pos, block_size, &bytes)?;
        self.header.tile_dir_offset = content_pos as i64;
        Ok(())
    }

    fn write_file_space_directory(&mut self) -> Result<()> {
        if self.header.file_space_dir_offset != 0 {
            self.file_space.deallocate(&mut self.store, self.header.file_space_dir_offset as u64)?;
        }
        self.header.file_space_dir_offset = self.file_space.write_directory(&mut self.store)? as i64;
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let mut content = Vec::new();
        self.header.write(&mut content, self.header_block_size as u32)?;
        if content.len() + RECORD_OVERHEAD as usize > self.header_block_size as usize {
            return Err(GvrsError::internal(
                "header content grew past its reserved slack; declare every element before the first flush",
            ));
        }
        let block_size = self.header_block_size;
        self.write_record_payload(RECORD_HEADER_SIZE, block_size, &content)
    }

    /// Persists every pending tile write, metadata edit, and directory to
    /// disk (spec §6 `flush`). A no-op on a read-only handle beyond
    /// validating there is nothing pending to lose.
    pub fn flush(&mut self) -> Result<()> {
        if !self.writable {
            return Err(GvrsError::NotOpenedForWriting);
        }

        let pending = self.cache.pending_tile_indices();
        log::debug!("flushing {} pending tile(s)", pending.len());
        for tile_index in pending {
            let (tile_row, tile_col) = self.tile_row_col(tile_index);
            let data = self.cache.get(tile_index).expect("pending tile must be resident").data.clone();
            self.persist_tile(tile_index, tile_row, tile_col, &data)?;
        }

        if self.metadata.write_pending {
            if self.header.metadata_dir_offset != 0 {
                self.file_space.deallocate(&mut self.store, self.header.metadata_dir_offset as u64)?;
            }
            self.header.metadata_dir_offset = self.metadata.write_directory(&mut self.store, &mut self.file_space)? as i64;
        }

        self.write_tile_directory()?;
        self.write_file_space_directory()?;
        self.header.modification_time_ms = now_millis();
        self.write_header()?;
        self.store.flush()?;
        Ok(())
    }

    /// Marks the container for deletion once [`close`](Self::close) runs,
    /// instead of persisting it (spec §6 `set_delete_on_close`).
    pub fn set_delete_on_close(&mut self) {
        self.delete_on_close = true;
    }

    /// Resizes the tile cache to one of the presets in [`CacheSize`],
    /// flushing every pending tile first so no dirty data is dropped
    /// (spec §4.7 "Cache resize").
    pub fn set_cache_size(&mut self, size: CacheSize) -> Result<()> {
        if self.writable {
            for tile_index in self.cache.pending_tile_indices() {
                let (tile_row, tile_col) = self.tile_row_col(tile_index);
                let data = self.cache.get(tile_index).expect("pending tile must be resident").data.clone();
                self.persist_tile(tile_index, tile_row, tile_col, &data)?;
            }
        }
        self.cache.drain_all();
        let capacity = size.slot_count(self.header.raster.n_rows_of_tiles(), self.header.raster.n_cols_of_tiles());
        log::info!("resizing tile cache to {capacity} slot(s)");
        self.cache = TileCache::with_capacity(capacity);
        Ok(())
    }

    pub fn summary(&self) -> Summary {
        let cache_stats = self.cache.stats();
        Summary {
            cache_hits: cache_stats.hits,
            cache_misses: cache_stats.misses,
            cache_evictions: cache_stats.evictions,
            tile_reads: self.stats.tile_reads,
            tile_writes: self.stats.tile_writes,
            free_block_count: self.file_space.free_block_count(),
            total_free_bytes: self.file_space.total_free_bytes(),
        }
    }

    /// Flushes (unless delete-on-close was requested), releases the
    /// advisory write lock, and if requested removes the backing file
    /// (spec §5, §6 `close`). A no-op if already closed.
    pub fn close(mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        if self.writable && !self.delete_on_close {
            self.header.opened_for_writing_time_ms = 0;
            self.flush()?;

            if self.header.raster.checksums_enabled {
                crate::checksum::finalize_range(&mut self.store, 0, self.file_space.end_of_file())?;
                self.store.flush()?;
            }
        }
        self.closed = true;

        if self.delete_on_close {
            if let Some(path) = self.path.take() {
                let _ = std::fs::remove_file(path);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::coordinates::{AffineTransform, CoordinateSystem};
    use crate::element::{ElementName, ElementVariant};
    use std::io::Cursor;

    fn int_raster(rows: i32, cols: i32, tile_rows: i32, tile_cols: i32) -> RasterMetadata {
        let r2m = AffineTransform::raster_to_model(rows as usize, cols as usize, 0.0, 0.0, cols as f64, rows as f64);
        RasterMetadata {
            n_rows_in_raster: rows,
            n_cols_in_raster: cols,
            n_rows_in_tile: tile_rows,
            n_cols_in_tile: tile_cols,
            checksums_enabled: true,
            raster_space_code: 0,
            coordinate_system: CoordinateSystem::Cartesian,
            x0: 0.0,
            y0: 0.0,
            x1: cols as f64,
            y1: rows as f64,
            cell_size_x: 1.0,
            cell_size_y: 1.0,
            model_to_raster: r2m.invert().unwrap(),
            raster_to_model: r2m,
            elements: vec![ElementSpec {
                name: ElementName::new("value").unwrap(),
                variant: ElementVariant::Int32 { min: i32::MIN, max: i32::MAX, fill: -1 },
                continuous: true,
                label: "Value".into(),
                description: "".into(),
                unit_of_measure: "".into(),
            }],
            codec_identifiers: vec!["gvrs.huffman".into(), "gvrs.deflate".into()],
            product_label: "test".into(),
        }
    }

    #[test]
    fn write_then_read_cell_round_trips() {
        let store = Cursor::new(Vec::new());
        let mut gvrs = GvrsFile::create_with_store(store, int_raster(10, 10, 5, 5)).unwrap();

        gvrs.write_cell::<i32>("value", 3, 7, 42).unwrap();
        gvrs.write_cell::<i32>("value", 0, 0, -5).unwrap();

        assert_eq!(gvrs.read_cell::<i32>("value", 3, 7).unwrap(), 42);
        assert_eq!(gvrs.read_cell::<i32>("value", 0, 0).unwrap(), -5);
        // untouched cell reports the element's fill value
        assert_eq!(gvrs.read_cell::<i32>("value", 9, 9).unwrap(), -1);
    }

    #[test]
    fn cell_out_of_bounds_is_rejected() {
        let store = Cursor::new(Vec::new());
        let mut gvrs = GvrsFile::create_with_store(store, int_raster(10, 10, 5, 5)).unwrap();
        assert!(matches!(gvrs.write_cell::<i32>("value", 10, 0, 1), Err(GvrsError::CoordinateOutOfBounds(_))));
        assert!(matches!(gvrs.read_cell::<i32>("value", -1, 0), Err(GvrsError::CoordinateOutOfBounds(_))));
    }

    #[test]
    fn unknown_element_name_is_rejected() {
        let store = Cursor::new(Vec::new());
        let mut gvrs = GvrsFile::create_with_store(store, int_raster(10, 10, 5, 5)).unwrap();
        assert!(matches!(gvrs.read_cell::<i32>("nope", 0, 0), Err(GvrsError::ElementNotFound(_))));
    }

    #[test]
    fn flush_then_reopen_preserves_cells() {
        let store = Cursor::new(Vec::new());
        let mut gvrs = GvrsFile::create_with_store(store, int_raster(20, 20, 4, 4)).unwrap();

        for row in 0..20 {
            for col in 0..20 {
                gvrs.write_cell::<i32>("value", row, col, row * 100 + col).unwrap();
            }
        }
        gvrs.flush().unwrap();
        assert!(gvrs.summary().tile_writes > 0);

        let bytes = gvrs.store.into_inner();
        let mut reopened = GvrsFile::open_with_store(Cursor::new(bytes), false).unwrap();
        for row in 0..20 {
            for col in 0..20 {
                assert_eq!(reopened.read_cell::<i32>("value", row, col).unwrap(), row * 100 + col);
            }
        }
    }

    #[test]
    fn tile_eviction_flushes_dirty_tiles_before_they_are_dropped() {
        // Cache capacity clamps to 4; touch many more distinct tiles than
        // that to force eviction of dirty tiles mid-session, then confirm
        // their writes survive a flush + reopen.
        let store = Cursor::new(Vec::new());
        let mut gvrs = GvrsFile::create_with_store(store, int_raster(40, 40, 4, 4)).unwrap();
        assert_eq!(gvrs.cache.capacity(), 4);

        for row in (0..40).step_by(4) {
            for col in (0..40).step_by(4) {
                gvrs.write_cell::<i32>("value", row, col, row * 1000 + col).unwrap();
            }
        }
        assert!(gvrs.summary().cache_evictions > 0);

        gvrs.flush().unwrap();
        let bytes = gvrs.store.into_inner();
        let mut reopened = GvrsFile::open_with_store(Cursor::new(bytes), false).unwrap();
        for row in (0..40).step_by(4) {
            for col in (0..40).step_by(4) {
                assert_eq!(reopened.read_cell::<i32>("value", row, col).unwrap(), row * 1000 + col);
            }
        }
    }

    #[test]
    fn read_only_handle_rejects_writes() {
        let store = Cursor::new(Vec::new());
        let mut gvrs = GvrsFile::create_with_store(store, int_raster(10, 10, 5, 5)).unwrap();
        gvrs.flush().unwrap();
        let bytes = gvrs.store.into_inner();

        let mut reopened = GvrsFile::open_with_store(Cursor::new(bytes), false).unwrap();
        assert!(matches!(reopened.write_cell::<i32>("value", 0, 0, 1), Err(GvrsError::NotOpenedForWriting)));
    }

    #[test]
    fn add_element_before_first_tile_write_is_allowed_after() {
        let store = Cursor::new(Vec::new());
        let mut gvrs = GvrsFile::create_with_store(store, int_raster(10, 10, 5, 5)).unwrap();
        gvrs.add_element(ElementSpec {
            name: ElementName::new("flag").unwrap(),
            variant: ElementVariant::Int16 { min: 0, max: 1, fill: 0 },
            continuous: false,
            label: "Flag".into(),
            description: "".into(),
            unit_of_measure: "".into(),
        })
        .unwrap();

        gvrs.write_cell::<i32>("value", 0, 0, 7).unwrap();
        gvrs.write_cell::<i16>("flag", 0, 0, 1).unwrap();
        assert_eq!(gvrs.read_cell::<i32>("value", 0, 0).unwrap(), 7);
        assert_eq!(gvrs.read_cell::<i16>("flag", 0, 0).unwrap(), 1);
    }

    #[test]
    fn add_element_after_a_tile_is_written_is_rejected() {
        let store = Cursor::new(Vec::new());
        let mut gvrs = GvrsFile::create_with_store(store, int_raster(10, 10, 5, 5)).unwrap();
        gvrs.write_cell::<i32>("value", 0, 0, 1).unwrap();

        let result = gvrs.add_element(ElementSpec {
            name: ElementName::new("late").unwrap(),
            variant: ElementVariant::Int16 { min: 0, max: 1, fill: 0 },
            continuous: false,
            label: "Late".into(),
            description: "".into(),
            unit_of_measure: "".into(),
        });
        assert!(matches!(result, Err(GvrsError::BadRasterSpecification(_))));
    }

    #[test]
    fn metadata_round_trips_through_the_container() {
        let store = Cursor::new(Vec::new());
        let mut gvrs = GvrsFile::create_with_store(store, int_raster(10, 10, 5, 5)).unwrap();

        gvrs.metadata()
            .write(MetadataRecord {
                name: "author".into(),
                record_id: 0,
                kind: crate::metadata::MetadataType::String,
                payload: b"jane".to_vec(),
                description: None,
            })
            .unwrap();

        let found = gvrs.metadata().read_by_name_and_id("author", 0).unwrap();
        assert_eq!(found[0].payload, b"jane");
        assert!(gvrs.metadata().delete("author", 0).unwrap());
        assert_eq!(gvrs.metadata().len(), 0);
    }

    #[test]
    fn summary_reports_cache_and_space_counters() {
        let store = Cursor::new(Vec::new());
        let mut gvrs = GvrsFile::create_with_store(store, int_raster(10, 10, 5, 5)).unwrap();
        gvrs.write_cell::<i32>("value", 0, 0, 1).unwrap();
        gvrs.read_cell::<i32>("value", 0, 0).unwrap();
        let summary = gvrs.summary();
        assert!(summary.cache_hits >= 1);
    }

    #[test]
    fn cache_resize_flushes_pending_tiles_and_preserves_reads() {
        let store = Cursor::new(Vec::new());
        let mut gvrs = GvrsFile::create_with_store(store, int_raster(40, 40, 4, 4)).unwrap();
        assert_eq!(gvrs.cache.capacity(), 4);

        for row in (0..40).step_by(4) {
            for col in (0..40).step_by(4) {
                gvrs.write_cell::<i32>("value", row, col, row * 1000 + col).unwrap();
            }
        }

        gvrs.set_cache_size(CacheSize::Large).unwrap();
        assert_eq!(gvrs.cache.capacity(), 10);
        assert_eq!(gvrs.cache.resident_count(), 0);

        for row in (0..40).step_by(4) {
            for col in (0..40).step_by(4) {
                assert_eq!(gvrs.read_cell::<i32>("value", row, col).unwrap(), row * 1000 + col);
            }
        }
    }
}
