//! The fixed file header (spec §6): magic, version, identity, directory
//! offsets, raster geometry, element descriptors and codec list.
//!
//! Grounded on the teacher's `meta::Header`/`meta::requirements` byte
//! layout discipline (every field's width and order fixed, validated on
//! read) though GVRS's header is single, not per-part.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::coordinates::{AffineTransform, CoordinateSystem};
use crate::element::ElementSpec;
use crate::error::{GvrsError, Result};
use crate::io::{read_string, round_up, write_string, Data, Read, Write};

pub const MAGIC: &[u8; 12] = b"gvrs raster\0";
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;

/// Not an RFC-4122 UUID formatter (that facade is out of scope, spec §1) —
/// just two probably-unique `u64`s, derived from wall-clock time, process
/// id and a per-process counter, to stamp a container's identity.
pub fn generate_identity() -> (u64, u64) {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64;
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id() as u64;

    let high = nanos ^ (pid.rotate_left(17));
    let low = nanos.rotate_left(31) ^ counter ^ (pid << 32);
    (high, low)
}

pub fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Raster geometry, coordinate system, element and codec lists (spec §3,
/// §6). Everything in the header except the identity/directory-offset
/// bookkeeping that the container engine mutates across open/close.
#[derive(Debug, Clone)]
pub struct RasterMetadata {
    pub n_rows_in_raster: i32,
    pub n_cols_in_raster: i32,
    pub n_rows_in_tile: i32,
    pub n_cols_in_tile: i32,
    pub checksums_enabled: bool,
    pub raster_space_code: u8,
    pub coordinate_system: CoordinateSystem,
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub cell_size_x: f64,
    pub cell_size_y: f64,
    pub model_to_raster: AffineTransform,
    pub raster_to_model: AffineTransform,
    pub elements: Vec<ElementSpec>,
    pub codec_identifiers: Vec<String>,
    pub product_label: String,
}

impl RasterMetadata {
    pub fn n_rows_of_tiles(&self) -> usize {
        crate::io::round_up(self.n_rows_in_raster as usize, self.n_rows_in_tile as usize) / self.n_rows_in_tile as usize
    }

    pub fn n_cols_of_tiles(&self) -> usize {
        crate::io::round_up(self.n_cols_in_raster as usize, self.n_cols_in_tile as usize) / self.n_cols_in_tile as usize
    }

    fn write(&self, write: &mut impl Write) -> Result<()> {
        self.n_rows_in_raster.write(write)?;
        self.n_cols_in_raster.write(write)?;
        self.n_rows_in_tile.write(write)?;
        self.n_cols_in_tile.write(write)?;
        u8::write_slice(write, &[0_u8; 8])?;
        (self.checksums_enabled as u8).write(write)?;
        self.raster_space_code.write(write)?;
        self.coordinate_system.code().write(write)?;
        u8::write_slice(write, &[0_u8; 5])?;
        self.x0.write(write)?;
        self.y0.write(write)?;
        self.x1.write(write)?;
        self.y1.write(write)?;
        self.cell_size_x.write(write)?;
        self.cell_size_y.write(write)?;
        for v in self.model_to_raster.to_array() {
            v.write(write)?;
        }
        for v in self.raster_to_model.to_array() {
            v.write(write)?;
        }

        (self.elements.len() as i32).write(write)?;
        for element in &self.elements {
            element.write(write)?;
        }

        (self.codec_identifiers.len() as i32).write(write)?;
        for identifier in &self.codec_identifiers {
            write_string(write, identifier)?;
        }

        write_string(write, &self.product_label)
    }

    fn read(read: &mut impl Read) -> Result<Self> {
        let n_rows_in_raster = i32::read(read)?;
        let n_cols_in_raster = i32::read(read)?;
        let n_rows_in_tile = i32::read(read)?;
        let n_cols_in_tile = i32::read(read)?;
        if n_rows_in_raster <= 0 || n_cols_in_raster <= 0 || n_rows_in_tile <= 0 || n_cols_in_tile <= 0 {
            return Err(GvrsError::BadRasterSpecification("raster and tile dimensions must be positive".into()));
        }
        let mut reserved = [0_u8; 8];
        u8::read_slice(read, &mut reserved)?;

        let checksums_enabled = u8::read(read)? != 0;
        let raster_space_code = u8::read(read)?;
        let coordinate_system = CoordinateSystem::from_code(u8::read(read)?);
        let mut reserved = [0_u8; 5];
        u8::read_slice(read, &mut reserved)?;

        let x0 = f64::read(read)?;
        let y0 = f64::read(read)?;
        let x1 = f64::read(read)?;
        let y1 = f64::read(read)?;
        let cell_size_x = f64::read(read)?;
        let cell_size_y = f64::read(read)?;

        let mut m2r = [0_f64; 6];
        for v in m2r.iter_mut() {
            *v = f64::read(read)?;
        }
        let mut r2m = [0_f64; 6];
        for v in r2m.iter_mut() {
            *v = f64::read(read)?;
        }

        let n_elements = i32::read(read)?;
        if n_elements < 1 {
            return Err(GvrsError::BadRasterSpecification("a raster needs at least one element".into()));
        }
        let mut elements = Vec::with_capacity(n_elements as usize);
        for _ in 0..n_elements {
            elements.push(ElementSpec::read(read)?);
        }

        let n_codecs = i32::read(read)?;
        let mut codec_identifiers = Vec::with_capacity(n_codecs.max(0) as usize);
        for _ in 0..n_codecs {
            codec_identifiers.push(read_string(read)?);
        }

        let product_label = read_string(read)?;

        Ok(RasterMetadata {
            n_rows_in_raster, n_cols_in_raster, n_rows_in_tile, n_cols_in_tile,
            checksums_enabled, raster_space_code, coordinate_system,
            x0, y0, x1, y1, cell_size_x, cell_size_y,
            model_to_raster: AffineTransform::from_array(m2r),
            raster_to_model: AffineTransform::from_array(r2m),
            elements, codec_identifiers, product_label,
        })
    }
}

/// The fixed-position fields at the front of the file (spec §6). Directory
/// offsets of 0 mean "not yet written".
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub uuid: (u64, u64),
    pub modification_time_ms: i64,
    pub opened_for_writing_time_ms: i64,
    pub file_space_dir_offset: i64,
    pub metadata_dir_offset: i64,
    pub tile_dir_offset: i64,
    pub raster: RasterMetadata,
}

impl FileHeader {
    pub fn new(raster: RasterMetadata) -> Self {
        FileHeader {
            uuid: generate_identity(),
            modification_time_ms: now_millis(),
            opened_for_writing_time_ms: 0,
            file_space_dir_offset: 0,
            metadata_dir_offset: 0,
            tile_dir_offset: 0,
            raster,
        }
    }

    pub fn write(&self, write: &mut impl Write, size_of_header: u32) -> Result<()> {
        write.write_all(MAGIC)?;
        VERSION_MAJOR.write(write)?;
        VERSION_MINOR.write(write)?;
        u8::write_slice(write, &[0_u8; 2])?;
        size_of_header.write(write)?;
        self.uuid.0.write(write)?;
        self.uuid.1.write(write)?;
        self.modification_time_ms.write(write)?;
        self.opened_for_writing_time_ms.write(write)?;
        self.file_space_dir_offset.write(write)?;
        self.metadata_dir_offset.write(write)?;
        0_i16.write(write)?; // level count: reserved for future multi-resolution support
        u8::write_slice(write, &[0_u8; 2])?;
        self.tile_dir_offset.write(write)?;
        self.raster.write(write)
    }

    pub fn read(read: &mut impl Read) -> Result<Self> {
        let mut magic = [0_u8; 12];
        u8::read_slice(read, &mut magic)?;
        if &magic != MAGIC {
            return Err(GvrsError::InvalidFile("missing gvrs raster magic".into()));
        }

        let major = u8::read(read)?;
        let minor = u8::read(read)?;
        if major != VERSION_MAJOR {
            return Err(GvrsError::VersionNotSupported(format!("{major}.{minor}")));
        }
        let mut reserved = [0_u8; 2];
        u8::read_slice(read, &mut reserved)?;

        let _size_of_header = u32::read(read)?;
        let uuid = (u64::read(read)?, u64::read(read)?);
        let modification_time_ms = i64::read(read)?;
        let opened_for_writing_time_ms = i64::read(read)?;
        let file_space_dir_offset = i64::read(read)?;
        let metadata_dir_offset = i64::read(read)?;
        let _level_count = i16::read(read)?;
        let mut reserved = [0_u8; 2];
        u8::read_slice(read, &mut reserved)?;
        let tile_dir_offset = i64::read(read)?;

        let raster = RasterMetadata::read(read)?;

        Ok(FileHeader {
            uuid, modification_time_ms, opened_for_writing_time_ms,
            file_space_dir_offset, metadata_dir_offset, tile_dir_offset, raster,
        })
    }

    /// Bytes the fixed+variable header occupies, rounded up to a multiple
    /// of 8 to keep the next record 8-byte aligned, plus a trailing CRC-32
    /// slot (spec §3, §6).
    pub fn serialized_size(&self) -> u32 {
        let mut probe = Vec::new();
        self.write(&mut probe, 0).expect("writing to a Vec never fails");
        round_up(probe.len() + 4, 8) as u32
    }
}
