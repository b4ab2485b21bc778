//! Float codec (spec §4.4): per-byte-plane differencing plus independent
//! DEFLATE compression of each plane of an IEEE-754 binary32 tile.
//!
//! Grounded on the teacher's `compression::pxr24` (splitting a pixel value
//! into byte planes before compressing) and `compression::zip`'s
//! `optimize_bytes` horizontal-differencing helper, adapted from pxr24's
//! 3-plane/lossy scheme to GVRS's own lossless 5-plane layout (sign,
//! exponent, and the three mantissa bytes, each exactly reconstructed).

use miniz_oxide::deflate::compress_to_vec_zlib;
use zune_inflate::DeflateDecoder;

use crate::bitio::{BitReader, BitWriter};
use crate::error::{GvrsError, Result};
use super::{Bytes, Codec};

const CODEC_INDEX: u8 = 2;
const LEVEL: u8 = 6;

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    DeflateDecoder::new(data)
        .decode_zlib()
        .map_err(|e| GvrsError::BadCompressionFormat(format!("float plane deflate stream corrupt: {e}")))
}

/// Horizontal first-order difference per row: column 0 keeps its raw
/// value (the seed for that row's prefix sum), later columns store the
/// wrapping delta from their left neighbour (spec §4.4).
fn differentiate_rows(plane: &mut [u8], n_rows: usize, n_cols: usize) {
    for row in 0..n_rows {
        let start = row * n_cols;
        for col in (1..n_cols).rev() {
            plane[start + col] = plane[start + col].wrapping_sub(plane[start + col - 1]);
        }
    }
}

fn integrate_rows(plane: &mut [u8], n_rows: usize, n_cols: usize) {
    for row in 0..n_rows {
        let start = row * n_cols;
        for col in 1..n_cols {
            plane[start + col] = plane[start + col].wrapping_add(plane[start + col - 1]);
        }
    }
}

fn deflate_plane(plane: &[u8]) -> Vec<u8> {
    compress_to_vec_zlib(plane, LEVEL)
}

/// Lossless 5-stream float codec: sign bits, exponent bytes, and the three
/// (row-differenced) mantissa byte planes, each DEFLATE-compressed
/// independently (spec §4.4).
#[derive(Default, Clone)]
pub struct FloatCodec;

impl Codec for FloatCodec {
    fn identifier(&self) -> &str {
        "gvrs.float"
    }

    fn encode_int(&self, _values: &[i32], _n_rows: usize, _n_cols: usize) -> Result<Bytes> {
        Err(GvrsError::CompressionNotImplemented("gvrs.float only encodes floating-point tiles".into()))
    }

    fn decode_int(&self, _compressed: &[u8], _n_rows: usize, _n_cols: usize) -> Result<Vec<i32>> {
        Err(GvrsError::CompressionNotImplemented("gvrs.float only decodes floating-point tiles".into()))
    }

    fn encode_float(&self, values: &[f32], n_rows: usize, n_cols: usize) -> Result<Bytes> {
        let n = values.len();
        let mut sign_bits = BitWriter::with_capacity(n / 8 + 1);
        let mut exponent = vec![0_u8; n];
        let mut mantissa_high = vec![0_u8; n];
        let mut mantissa_mid = vec![0_u8; n];
        let mut mantissa_low = vec![0_u8; n];

        for (i, &value) in values.iter().enumerate() {
            let bits = value.to_bits();
            sign_bits.put_bit(((bits >> 31) & 1) as u8);
            exponent[i] = ((bits >> 23) & 0xFF) as u8;
            let mantissa = bits & 0x007F_FFFF;
            mantissa_high[i] = (mantissa >> 16) as u8;
            mantissa_mid[i] = (mantissa >> 8) as u8;
            mantissa_low[i] = mantissa as u8;
        }

        differentiate_rows(&mut mantissa_high, n_rows, n_cols);
        differentiate_rows(&mut mantissa_mid, n_rows, n_cols);
        differentiate_rows(&mut mantissa_low, n_rows, n_cols);

        let streams = [
            deflate_plane(&sign_bits.finalize()),
            deflate_plane(&exponent),
            deflate_plane(&mantissa_high),
            deflate_plane(&mantissa_mid),
            deflate_plane(&mantissa_low),
        ];

        let mut out = vec![CODEC_INDEX, 0];
        for stream in &streams {
            out.extend_from_slice(&(stream.len() as u32).to_le_bytes());
            out.extend_from_slice(stream);
        }
        Ok(out)
    }

    fn decode_float(&self, compressed: &[u8], n_rows: usize, n_cols: usize) -> Result<Vec<f32>> {
        if compressed.len() < 2 {
            return Err(GvrsError::BadCompressionFormat("float codec header truncated".into()));
        }

        let n = n_rows * n_cols;
        let mut cursor = 2_usize;
        let mut planes = Vec::with_capacity(5);
        for _ in 0..5 {
            if compressed.len() < cursor + 4 {
                return Err(GvrsError::BadCompressionFormat("float plane length truncated".into()));
            }
            let len = u32::from_le_bytes(compressed[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            if compressed.len() < cursor + len {
                return Err(GvrsError::BadCompressionFormat("float plane body truncated".into()));
            }
            planes.push(inflate(&compressed[cursor..cursor + len])?);
            cursor += len;
        }

        let sign_bytes = &planes[0];
        let exponent = &planes[1];
        let mut mantissa_high = planes[2].clone();
        let mut mantissa_mid = planes[3].clone();
        let mut mantissa_low = planes[4].clone();

        if exponent.len() != n || mantissa_high.len() != n || mantissa_mid.len() != n || mantissa_low.len() != n {
            return Err(GvrsError::BadCompressionFormat("float plane length mismatch with tile size".into()));
        }

        integrate_rows(&mut mantissa_high, n_rows, n_cols);
        integrate_rows(&mut mantissa_mid, n_rows, n_cols);
        integrate_rows(&mut mantissa_low, n_rows, n_cols);

        let mut sign_reader = BitReader::new(sign_bytes);
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let sign = sign_reader.get_bit().ok_or_else(|| GvrsError::BadCompressionFormat("truncated sign plane".into()))? as u32;
            let mantissa = ((mantissa_high[i] as u32) << 16) | ((mantissa_mid[i] as u32) << 8) | mantissa_low[i] as u32;
            let bits = (sign << 31) | ((exponent[i] as u32) << 23) | mantissa;
            out.push(f32::from_bits(bits));
        }

        Ok(out)
    }

    fn clone_box(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}
