//! DEFLATE-backed integer tile codec (spec §4.3): same 10-byte integer
//! framing as [`super::huffman`], but the body is a raw DEFLATE stream
//! instead of a Huffman-coded one.
//!
//! Grounded on the teacher's `compression::zip` (predictor-then-DEFLATE
//! wrapper), using the crates the teacher's own `Cargo.toml` declares for
//! this purpose: `miniz_oxide` to compress, `zune-inflate` to decompress.

use miniz_oxide::deflate::compress_to_vec_zlib;
use zune_inflate::DeflateDecoder;

use crate::error::{GvrsError, Result};
use crate::predictor::{self, Predictor};
use super::{Bytes, Codec};

const CODEC_INDEX: u8 = 1;
const DEFAULT_LEVEL: u8 = 6;
const MAX_LEVEL: u8 = 9;

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    DeflateDecoder::new(data)
        .decode_zlib()
        .map_err(|e| GvrsError::BadCompressionFormat(format!("deflate stream corrupt: {e}")))
}

/// DEFLATE-based integer and float codec. Holds the configured compression
/// level; `with_maximum_compression` raises it to 9 (spec §4.3).
#[derive(Clone)]
pub struct DeflateCodec {
    level: u8,
}

impl Default for DeflateCodec {
    fn default() -> Self {
        DeflateCodec { level: DEFAULT_LEVEL }
    }
}

impl DeflateCodec {
    pub fn with_maximum_compression() -> Self {
        DeflateCodec { level: MAX_LEVEL }
    }
}

impl Codec for DeflateCodec {
    fn identifier(&self) -> &str {
        "gvrs.deflate"
    }

    fn encode_int(&self, values: &[i32], n_rows: usize, n_cols: usize) -> Result<Bytes> {
        let (predictor, seed, m32_bytes) = predictor::encode_smallest(values, n_rows, n_cols);
        let deflated = compress_to_vec_zlib(&m32_bytes, self.level);

        let mut out = Vec::with_capacity(10 + deflated.len());
        out.push(CODEC_INDEX);
        out.push(predictor.index());
        out.extend_from_slice(&seed.to_le_bytes());
        out.extend_from_slice(&(m32_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&deflated);

        if out.len() >= values.len() * 4 {
            return Err(GvrsError::CompressionFailure("deflate output not smaller than raw".into()));
        }
        Ok(out)
    }

    fn decode_int(&self, compressed: &[u8], n_rows: usize, n_cols: usize) -> Result<Vec<i32>> {
        if compressed.len() < 10 {
            return Err(GvrsError::BadCompressionFormat("deflate integer header truncated".into()));
        }

        let predictor_index = compressed[1];
        let seed = i32::from_le_bytes(compressed[2..6].try_into().unwrap());
        let m32_len = u32::from_le_bytes(compressed[6..10].try_into().unwrap()) as usize;

        let predictor = Predictor::from_index(predictor_index)
            .ok_or_else(|| GvrsError::BadCompressionFormat("unknown predictor index".into()))?;

        let m32_bytes = inflate(&compressed[10..])?;
        if m32_bytes.len() != m32_len {
            return Err(GvrsError::BadCompressionFormat("inflated byte count mismatch".into()));
        }

        Ok(predictor::decode(predictor, seed, &m32_bytes, n_rows, n_cols))
    }

    fn encode_float(&self, values: &[f32], _n_rows: usize, _n_cols: usize) -> Result<Bytes> {
        let mut raw = Vec::with_capacity(values.len() * 4);
        for &v in values {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let deflated = compress_to_vec_zlib(&raw, self.level);

        let mut out = Vec::with_capacity(5 + deflated.len());
        out.push(CODEC_INDEX);
        out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        out.extend_from_slice(&deflated);

        if out.len() >= raw.len() {
            return Err(GvrsError::CompressionFailure("deflate output not smaller than raw".into()));
        }
        Ok(out)
    }

    fn decode_float(&self, compressed: &[u8], n_rows: usize, n_cols: usize) -> Result<Vec<f32>> {
        if compressed.len() < 5 {
            return Err(GvrsError::BadCompressionFormat("deflate float header truncated".into()));
        }

        let raw_len = u32::from_le_bytes(compressed[1..5].try_into().unwrap()) as usize;
        let raw = inflate(&compressed[5..])?;
        if raw.len() != raw_len || raw.len() != n_rows * n_cols * 4 {
            return Err(GvrsError::BadCompressionFormat("decoded float byte count mismatch".into()));
        }

        Ok(raw.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect())
    }

    fn clone_box(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn smooth_ramp_round_trips_and_compresses() {
        let codec = DeflateCodec::default();
        let (rows, cols) = (20, 20);
        let values: Vec<i32> = (0..rows * cols).map(|i| (i / cols * 10 + i % cols) as i32).collect();

        let encoded = codec.encode_int(&values, rows, cols).unwrap();
        assert!(encoded.len() < values.len() * 4);

        let decoded = codec.decode_int(&encoded, rows, cols).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn float_tile_round_trips() {
        let codec = DeflateCodec::default();
        let values: Vec<f32> = (0..64).map(|i| (i as f32) * 0.25).collect();
        let encoded = codec.encode_float(&values, 8, 8).unwrap();
        let decoded = codec.decode_float(&encoded, 8, 8).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn maximum_compression_uses_level_nine() {
        let codec = DeflateCodec::with_maximum_compression();
        assert_eq!(codec.level, MAX_LEVEL);
    }

    #[test]
    fn incompressible_random_noise_may_fail_over_to_raw() {
        use rand::Rng;
        let codec = DeflateCodec::default();
        let mut rng = rand::rng();
        let values: Vec<i32> = (0..64).map(|_| rng.random()).collect();
        // Either it compresses (rare for pure noise) or the codec correctly
        // reports failure so the engine can fall back to raw storage.
        match codec.encode_int(&values, 8, 8) {
            Ok(encoded) => assert!(encoded.len() < values.len() * 4),
            Err(GvrsError::CompressionFailure(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}
