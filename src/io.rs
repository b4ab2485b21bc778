//! Little-endian primitive I/O, shared by the header, element, directory and
//! metadata readers/writers.

pub use ::std::io::{Read, Write};
use lebe::prelude::*;
use crate::error::{GvrsError, Result, PassiveResult};

pub fn skip_bytes(read: &mut impl Read, count: u64) -> PassiveResult {
    let skipped = std::io::copy(&mut read.by_ref().take(count), &mut std::io::sink())?;
    debug_assert_eq!(skipped, count);
    Ok(())
}

/// Extension trait for primitive types read and written little-endian,
/// the way every multi-byte field of the container file is encoded.
pub trait Data: Sized + Default + Clone {
    fn read(read: &mut impl Read) -> Result<Self>;
    fn write(self, write: &mut impl Write) -> PassiveResult;

    fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> PassiveResult;
    fn write_slice(write: &mut impl Write, slice: &[Self]) -> PassiveResult;

    const BYTE_SIZE: usize = ::std::mem::size_of::<Self>();
}

macro_rules! implement_data_for_primitive {
    ($kind: ident) => {
        impl Data for $kind {
            fn read(read: &mut impl Read) -> Result<Self> {
                Ok(read.read_from_little_endian()?)
            }

            fn write(self, write: &mut impl Write) -> PassiveResult {
                write.write_as_little_endian(&self)?;
                Ok(())
            }

            fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> PassiveResult {
                read.read_from_little_endian_into(slice)?;
                Ok(())
            }

            fn write_slice(write: &mut impl Write, slice: &[Self]) -> PassiveResult {
                write.write_as_little_endian(slice)?;
                Ok(())
            }
        }
    };
}

implement_data_for_primitive!(u8);
implement_data_for_primitive!(i8);
implement_data_for_primitive!(i16);
implement_data_for_primitive!(u16);
implement_data_for_primitive!(u32);
implement_data_for_primitive!(i32);
implement_data_for_primitive!(i64);
implement_data_for_primitive!(u64);
implement_data_for_primitive!(f32);
implement_data_for_primitive!(f64);

/// Reads a 16-bit-length-prefixed UTF-8 string, the encoding used by
/// element names, labels, descriptions and units throughout the container.
pub fn read_string(read: &mut impl Read) -> Result<String> {
    let len = u16::read(read)? as usize;
    let mut bytes = vec![0_u8; len];
    u8::read_slice(read, &mut bytes)?;
    String::from_utf8(bytes).map_err(|_| GvrsError::invalid("string is not valid utf-8"))
}

pub fn write_string(write: &mut impl Write, text: &str) -> PassiveResult {
    let bytes = text.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(GvrsError::invalid("string exceeds maximum length"));
    }

    (bytes.len() as u16).write(write)?;
    u8::write_slice(write, bytes)
}

/// Rounds `value` up to the next multiple of `multiple` (`multiple` a power of two).
#[inline]
pub fn round_up(value: usize, multiple: usize) -> usize {
    debug_assert!(multiple.is_power_of_two());
    (value + multiple - 1) & !(multiple - 1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_up_rounds_to_next_multiple() {
        assert_eq!(round_up(0, 8), 0);
        assert_eq!(round_up(1, 8), 8);
        assert_eq!(round_up(8, 8), 8);
        assert_eq!(round_up(9, 8), 16);
        assert_eq!(round_up(13, 4), 16);
    }

    #[test]
    fn string_round_trip() {
        let mut buffer = Vec::new();
        write_string(&mut buffer, "elevation_m").unwrap();
        let mut cursor = buffer.as_slice();
        assert_eq!(read_string(&mut cursor).unwrap(), "elevation_m");
    }
}
