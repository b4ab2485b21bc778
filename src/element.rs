//! Element descriptors (spec §3): one logical data channel of a raster,
//! parallel sub-arrays within each tile.
//!
//! Grounded on the teacher's `meta::attributes::Text` validated-identifier
//! handling (name length limits enforced on construction, not scattered
//! across call sites) and its small closed `SampleType` enum for the
//! per-channel numeric representation.

use crate::error::{GvrsError, Result};
use crate::io::{read_string, round_up, write_string, Data, Read, Write};

/// A validated element identifier: leading letter, then letters, digits or
/// underscores, at most 32 bytes (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementName(String);

impl ElementName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();

        let mut chars = name.chars();
        let first = chars.next().ok_or_else(|| GvrsError::BadNameSpecification(name.clone()))?;
        if !first.is_ascii_alphabetic() {
            return Err(GvrsError::BadNameSpecification(name));
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(GvrsError::BadNameSpecification(name));
        }
        if name.len() > 32 {
            return Err(GvrsError::BadNameSpecification(name));
        }

        Ok(ElementName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Abbreviation table for units-to-metres conversion (spec §3).
pub fn units_to_metres(unit: &str) -> f64 {
    match unit.to_ascii_lowercase().as_str() {
        "feet" | "ft" => 0.3048,
        "yards" | "yd" => 0.9144,
        "fathoms" => 1.8388,
        _ => 1.0,
    }
}

/// One cell's numeric value, tagged with the variant it was read as.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellValue {
    Int32(i32),
    Float32(f32),
    Int16(i16),
    /// The float side of an `IntCodedFloat` element (`f = i/scale + offset`).
    IntCodedFloat(f64),
}

/// Variant-specific range/fill parameters (spec §3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElementVariant {
    Int32 { min: i32, max: i32, fill: i32 },
    Float32 { min: f32, max: f32, fill: f32 },
    Int16 { min: i16, max: i16, fill: i16 },
    IntCodedFloat { min: f64, max: f64, fill: f64, scale: f64, offset: f64, int_min: i32, int_max: i32, int_fill: i32 },
}

impl ElementVariant {
    pub fn type_code(&self) -> u8 {
        match self {
            ElementVariant::Int32 { .. } => 0,
            ElementVariant::IntCodedFloat { .. } => 1,
            ElementVariant::Float32 { .. } => 2,
            ElementVariant::Int16 { .. } => 3,
        }
    }

    /// Bytes one cell of this element occupies inside a tile's data buffer.
    pub fn cell_byte_size(&self) -> usize {
        match self {
            ElementVariant::Int32 { .. } => 4,
            ElementVariant::IntCodedFloat { .. } => 4,
            ElementVariant::Float32 { .. } => 4,
            ElementVariant::Int16 { .. } => 2,
        }
    }

    pub fn fill_as_cell(&self) -> CellValue {
        match *self {
            ElementVariant::Int32 { fill, .. } => CellValue::Int32(fill),
            ElementVariant::Float32 { fill, .. } => CellValue::Float32(fill),
            ElementVariant::Int16 { fill, .. } => CellValue::Int16(fill),
            ElementVariant::IntCodedFloat { fill, .. } => CellValue::IntCodedFloat(fill),
        }
    }

    /// Converts a stored integer to its float representation for an
    /// `IntCodedFloat` element (`f = i/scale + offset`); identity elsewhere.
    pub fn int_coded_to_float(&self, stored: i32) -> f64 {
        match *self {
            ElementVariant::IntCodedFloat { scale, offset, .. } => stored as f64 / scale + offset,
            _ => stored as f64,
        }
    }

    /// Inverse of [`int_coded_to_float`](Self::int_coded_to_float).
    pub fn float_to_int_coded(&self, value: f64) -> i32 {
        match *self {
            ElementVariant::IntCodedFloat { scale, offset, .. } => ((value - offset) * scale).round() as i32,
            _ => value as i32,
        }
    }
}

/// One element's descriptor: name, variant, and free-text documentation
/// (spec §3, §6).
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSpec {
    pub name: ElementName,
    pub variant: ElementVariant,
    pub continuous: bool,
    pub label: String,
    pub description: String,
    pub unit_of_measure: String,
}

impl ElementSpec {
    pub fn units_to_metres(&self) -> f64 {
        units_to_metres(&self.unit_of_measure)
    }

    pub fn data_size(&self) -> usize {
        self.variant.cell_byte_size()
    }

    /// Size padded up to a multiple of 4, as stored between consecutive
    /// elements inside a tile's data buffer (spec §3).
    pub fn padded_data_size(&self) -> usize {
        round_up(self.data_size(), 4)
    }

    pub fn write(&self, write: &mut impl Write) -> Result<()> {
        self.variant.type_code().write(write)?;
        (self.continuous as u8).write(write)?;
        u8::write_slice(write, &[0_u8; 6])?;
        write_string(write, self.name.as_str())?;

        match self.variant {
            ElementVariant::Int32 { min, max, fill } => {
                min.write(write)?;
                max.write(write)?;
                fill.write(write)?;
            }
            ElementVariant::Float32 { min, max, fill } => {
                min.write(write)?;
                max.write(write)?;
                fill.write(write)?;
            }
            ElementVariant::Int16 { min, max, fill } => {
                (min as i32).write(write)?;
                (max as i32).write(write)?;
                (fill as i32).write(write)?;
            }
            ElementVariant::IntCodedFloat { scale, offset, int_min, int_max, int_fill, .. } => {
                int_min.write(write)?;
                int_max.write(write)?;
                int_fill.write(write)?;
                scale.write(write)?;
                offset.write(write)?;
            }
        }

        write_string(write, &self.label)?;
        write_string(write, &self.description)?;
        write_string(write, &self.unit_of_measure)
    }

    pub fn read(read: &mut impl Read) -> Result<Self> {
        let type_code = u8::read(read)?;
        let continuous = u8::read(read)? != 0;
        let mut reserved = [0_u8; 6];
        u8::read_slice(read, &mut reserved)?;
        let name = ElementName::new(read_string(read)?)?;

        let variant = match type_code {
            0 => ElementVariant::Int32 { min: i32::read(read)?, max: i32::read(read)?, fill: i32::read(read)? },
            2 => ElementVariant::Float32 { min: f32::read(read)?, max: f32::read(read)?, fill: f32::read(read)? },
            3 => ElementVariant::Int16 { min: i32::read(read)? as i16, max: i32::read(read)? as i16, fill: i32::read(read)? as i16 },
            1 => {
                let int_min = i32::read(read)?;
                let int_max = i32::read(read)?;
                let int_fill = i32::read(read)?;
                let scale = f64::read(read)?;
                let offset = f64::read(read)?;
                ElementVariant::IntCodedFloat {
                    min: int_min as f64 / scale + offset,
                    max: int_max as f64 / scale + offset,
                    fill: int_fill as f64 / scale + offset,
                    scale,
                    offset,
                    int_min,
                    int_max,
                    int_fill,
                }
            }
            other => return Err(GvrsError::BadElementSpec(format!("unknown element type code {other}"))),
        };

        let label = read_string(read)?;
        let description = read_string(read)?;
        let unit_of_measure = read_string(read)?;

        Ok(ElementSpec { name, variant, continuous, label, description, unit_of_measure })
    }
}
