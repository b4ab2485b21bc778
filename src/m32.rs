//! M32: the variable-length signed-integer symbol encoding used by the
//! predictors. Grounded on the teacher's `compression::piz::huffman` bit
//! manipulation style (manual shift/mask over integer accumulators), adapted
//! to a self-describing byte stream rather than a fixed-width bit code.
//!
//! Encoding, from smallest to largest magnitude:
//! - `[-126, 126]`: one byte, signed-8.
//! - `i32::MIN`: one byte `0x80` (terminator / "no data").
//! - everything else: a signalling byte (`127` positive, `-127` negative)
//!   followed by 1-5 continuation bytes carrying 7 bits each, high bit set
//!   on all but the last. The accumulated payload, added to the base value
//!   of the tier selected by the number of continuation bytes, reconstructs
//!   the magnitude. Tier `t` (0-indexed, `t+1` continuation bytes) covers
//!   `[BASES[t], BASES[t + 1])`, so `[127, 254]` is exactly the one-byte
//!   continuation case.

use bit_field::BitField;

/// Sentinel returned by `decode_next` both for the explicit no-data
/// terminator byte and for end-of-stream.
pub const NO_DATA: i32 = i32::MIN;

const BASES: [i64; 6] = [127, 255, 16_639, 2_113_791, 270_549_247, i64::MAX];

/// Encodes a stream of signed 32-bit symbols into a compact byte sequence.
#[derive(Default)]
pub struct M32Writer {
    bytes: Vec<u8>,
}

impl M32Writer {
    pub fn with_capacity(capacity: usize) -> Self {
        M32Writer { bytes: Vec::with_capacity(capacity.max(8 * 1024)) }
    }

    pub fn encode(&mut self, symbol: i32) {
        if symbol == NO_DATA {
            self.bytes.push(0x80);
            return;
        }

        if (-126..=126).contains(&symbol) {
            self.bytes.push(symbol as i8 as u8);
            return;
        }

        let sign_positive = symbol > 0;
        let magnitude = symbol.unsigned_abs() as i64;

        let tier = BASES.windows(2).position(|w| magnitude >= w[0] && magnitude < w[1])
            .expect("magnitude out of representable M32 range");

        self.bytes.push(if sign_positive { 127_i8 as u8 } else { (-127_i8) as u8 });

        let payload = magnitude - BASES[tier];
        let n_continuation = tier + 1;

        for i in (0..n_continuation).rev() {
            let mut byte = payload.get_bits((i as u32 * 7)..(i as u32 * 7 + 7)) as u8;
            if i != 0 {
                byte.set_bit(7, true);
            }
            self.bytes.push(byte);
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        self.bytes
    }
}

/// Decodes an M32 byte stream one symbol at a time.
pub struct M32Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> M32Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        M32Reader { bytes, position: 0 }
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.bytes.len()
    }

    /// Returns `NO_DATA` when the buffer is exhausted or the `0x80` terminator is seen.
    pub fn decode_next(&mut self) -> i32 {
        if self.position >= self.bytes.len() {
            return NO_DATA;
        }

        let first = self.bytes[self.position] as i8;
        self.position += 1;

        if first as u8 == 0x80 {
            return NO_DATA;
        }

        if (-126..=126).contains(&first) {
            return first as i32;
        }

        if first != 127 && first != -127 {
            return NO_DATA;
        }

        let sign_positive = first == 127;
        let mut tier = 0_usize;
        let mut payload: i64 = 0;

        loop {
            if self.position >= self.bytes.len() {
                return NO_DATA;
            }
            let byte = self.bytes[self.position];
            self.position += 1;
            payload = (payload << 7) | (byte & 0x7F) as i64;

            if byte & 0x80 == 0 {
                break;
            }
            tier += 1;
            if tier >= BASES.len() - 1 {
                return NO_DATA;
            }
        }

        let magnitude = BASES[tier] + payload;
        let signed = if sign_positive { magnitude } else { -magnitude };
        if signed > i32::MAX as i64 || signed < i32::MIN as i64 {
            return NO_DATA;
        }
        signed as i32
    }
}

/// Encodes a full slice of symbols at once.
pub fn encode_all(symbols: &[i32]) -> Vec<u8> {
    let mut writer = M32Writer::with_capacity(symbols.len() * 2);
    for &s in symbols {
        writer.encode(s);
    }
    writer.finalize()
}

/// Decodes exactly `count` symbols from `bytes`.
pub fn decode_all(bytes: &[u8], count: usize) -> Vec<i32> {
    let mut reader = M32Reader::new(bytes);
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(reader.decode_next());
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip(values: &[i32]) {
        let encoded = encode_all(values);
        let decoded = decode_all(&encoded, values.len());
        assert_eq!(decoded, values, "round trip failed for {:?}", values);
    }

    #[test]
    fn small_values_round_trip() {
        round_trip(&[0, 1, -1, 126, -126, 63, -63]);
    }

    #[test]
    fn two_byte_boundary_round_trips() {
        round_trip(&[127, 128, 200, 254, -127, -128, -200, -254]);
    }

    #[test]
    fn large_values_round_trip() {
        round_trip(&[255, 1000, -1000, 16638, 16639, 100_000, -100_000, i32::MAX, i32::MIN + 1]);
    }

    #[test]
    fn every_tier_boundary_round_trips() {
        round_trip(&[126, 127, 254, 255, 16638, 16639, 2_113_790, 2_113_791, 270_549_246, 270_549_247]);
    }

    #[test]
    fn no_data_terminator_round_trips() {
        round_trip(&[1, 2, NO_DATA, 3]);
    }

    #[test]
    fn exhausted_stream_yields_no_data() {
        let mut reader = M32Reader::new(&[]);
        assert_eq!(reader.decode_next(), NO_DATA);
    }

    #[test]
    fn fuzz_random_i32_round_trip() {
        use rand::Rng;
        let mut rng = rand::rng();
        let values: Vec<i32> = (0..2000)
            .map(|_| {
                let v: i32 = rng.random();
                if v == NO_DATA { v.wrapping_add(1) } else { v }
            })
            .collect();
        round_trip(&values);
    }
}
