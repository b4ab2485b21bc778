//! `gvrs`: a random-access storage engine for very large two-dimensional
//! raster grids (spec §1–§2).
//!
//! A raster is partitioned into fixed-size tiles, each persisted as a
//! variable-length record inside a single container file. This crate
//! provides the on-disk record layout and its directories, the
//! variable-length-space allocator, the tile cache, the tile codec
//! pipeline (Huffman, Deflate, float, LSOP), and the open/close lifecycle
//! of the container.
//!
//! ```no_run
//! use gvrs::{AffineTransform, CoordinateSystem, ElementName, ElementSpec, ElementVariant};
//! use gvrs::{GvrsFile, RasterMetadata};
//!
//! # fn main() -> gvrs::Result<()> {
//! let raster_to_model = AffineTransform::raster_to_model(100, 100, 0.0, 0.0, 100.0, 100.0);
//! let raster = RasterMetadata {
//!     n_rows_in_raster: 100, n_cols_in_raster: 100, n_rows_in_tile: 10, n_cols_in_tile: 10,
//!     checksums_enabled: true, raster_space_code: 0, coordinate_system: CoordinateSystem::Cartesian,
//!     x0: 0.0, y0: 0.0, x1: 100.0, y1: 100.0, cell_size_x: 1.0, cell_size_y: 1.0,
//!     model_to_raster: raster_to_model.invert()?,
//!     raster_to_model,
//!     elements: Vec::new(),
//!     codec_identifiers: vec!["gvrs.huffman".into()],
//!     product_label: "example".into(),
//! };
//! let mut file = GvrsFile::create("example.gvrs", raster)?;
//! file.add_element(ElementSpec {
//!     name: ElementName::new("elevation")?,
//!     variant: ElementVariant::Int32 { min: i32::MIN, max: i32::MAX, fill: 0 },
//!     continuous: true, label: "Elevation".into(), description: String::new(), unit_of_measure: String::new(),
//! })?;
//! file.write_cell::<i32>("elevation", 0, 0, 42)?;
//! file.close()?;
//! # Ok(())
//! # }
//! ```

pub mod bitio;
pub mod cache;
pub mod checksum;
pub mod codec;
pub mod container;
pub mod coordinates;
pub mod element;
pub mod error;
pub mod filespace;
pub mod header;
pub mod io;
pub mod m32;
pub mod metadata;
pub mod predictor;
pub mod record;
pub mod tiledir;

pub use cache::{CacheSize, CacheStats};
pub use codec::{Codec, CodecRegistry};
pub use container::{CellData, GvrsFile, MetadataHandle, Summary};
pub use coordinates::{AffineTransform, CoordinateMaps, CoordinateSystem};
pub use element::{CellValue, ElementName, ElementSpec, ElementVariant};
pub use error::{GvrsError, PassiveResult, Result};
pub use header::RasterMetadata;
pub use metadata::{MetadataDirectory, MetadataRecord, MetadataType, WILDCARD_NAME, WILDCARD_RECORD_ID};
pub use record::RecordType;
