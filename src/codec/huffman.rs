//! Canonical binary Huffman coding over the 8-bit alphabet (spec §4.2).
//!
//! Grounded on the teacher's `compression::piz::huffman` module: a
//! priority-queue-driven tree build, and the same emphasis on avoiding
//! recursion during tree (de)serialization because an 8-bit alphabet's tree
//! can be up to 255 levels deep.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::bitio::{BitReader, BitWriter};
use crate::error::{GvrsError, Result};
use crate::m32;
use crate::predictor::{self, Predictor};
use super::{Bytes, Codec};

const CODEC_INDEX: u8 = 0;

#[derive(Clone)]
enum Node {
    Leaf(u8),
    Branch(Box<Node>, Box<Node>),
}

struct HeapEntry(u64, u64, Node);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0 && self.1 == other.1
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // reversed so `BinaryHeap` (a max-heap) pops the least-frequent node first;
    // ties broken by ascending secondary key, matching spec's (count desc, symbol asc) ordering
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0).then_with(|| other.1.cmp(&self.1))
    }
}

/// Builds the Huffman tree for the given byte frequencies (step 2-3 of §4.2).
fn build_tree(input: &[u8]) -> Node {
    let mut frequencies = [0_u64; 256];
    for &byte in input {
        frequencies[byte as usize] += 1;
    }
    // degenerate empty input still needs a tree to carry the framing;
    // treat byte 0 as present with frequency 1 so there is something to serialize
    if input.is_empty() {
        frequencies[0] = 1;
    }

    let mut heap = BinaryHeap::new();
    for symbol in 0..256usize {
        if frequencies[symbol] > 0 {
            heap.push(HeapEntry(frequencies[symbol], symbol as u64, Node::Leaf(symbol as u8)));
        }
    }

    let mut merge_order = 0_u64;
    while heap.len() > 1 {
        let HeapEntry(count_a, _, node_a) = heap.pop().unwrap();
        let HeapEntry(count_b, _, node_b) = heap.pop().unwrap();
        merge_order += 1;
        heap.push(HeapEntry(count_a + count_b, 256 + merge_order, Node::Branch(Box::new(node_a), Box::new(node_b))));
    }

    heap.pop().expect("non-empty histogram always yields a root").2
}

fn leaf_count(node: &Node) -> usize {
    match node {
        Node::Leaf(_) => 1,
        Node::Branch(left, right) => leaf_count(left) + leaf_count(right),
    }
}

/// Pre-order serialization using an explicit stack, not recursion (§4.2).
fn serialize_tree(root: &Node, writer: &mut BitWriter) {
    let mut stack: Vec<&Node> = vec![root];
    while let Some(node) = stack.pop() {
        match node {
            Node::Leaf(symbol) => {
                writer.put_bit(1);
                writer.put_byte(*symbol);
            }
            Node::Branch(left, right) => {
                writer.put_bit(0);
                stack.push(right);
                stack.push(left);
            }
        }
    }
}

enum Pending {
    NeedBoth,
    NeedRight(Box<Node>),
}

/// Deserializes a pre-order tree using an explicit stack of partially-built
/// branch nodes, mirroring `serialize_tree`.
fn deserialize_tree(reader: &mut BitReader) -> Result<Node> {
    let mut stack: Vec<Pending> = Vec::new();

    loop {
        let bit = reader.get_bit().ok_or_else(|| GvrsError::BadCompressionFormat("truncated huffman tree".into()))?;

        let mut node = if bit == 1 {
            let symbol = reader.get_byte().ok_or_else(|| GvrsError::BadCompressionFormat("truncated huffman tree".into()))?;
            Node::Leaf(symbol)
        } else {
            if stack.len() >= 256 {
                return Err(GvrsError::BadCompressionFormat("huffman tree stack overflow".into()));
            }
            stack.push(Pending::NeedBoth);
            continue;
        };

        loop {
            match stack.pop() {
                None => return Ok(node),
                Some(Pending::NeedBoth) => {
                    stack.push(Pending::NeedRight(Box::new(node)));
                    break;
                }
                Some(Pending::NeedRight(left)) => {
                    node = Node::Branch(left, Box::new(node));
                }
            }
        }
    }
}

/// Code table: `codes[symbol] = Some((bits, length))`, `length == 0` for the
/// degenerate one-leaf tree (no bits are needed to tell symbols apart).
fn build_codes(root: &Node) -> [Option<(u64, u8)>; 256] {
    let mut codes = [None; 256];
    let mut stack: Vec<(&Node, u64, u8)> = vec![(root, 0, 0)];

    while let Some((node, bits, length)) = stack.pop() {
        match node {
            Node::Leaf(symbol) => codes[*symbol as usize] = Some((bits, length)),
            Node::Branch(left, right) => {
                assert!(length < 64, "huffman code length exceeds 64 bits for this tile size");
                stack.push((left, bits, length + 1));
                stack.push((right, bits | (1 << length), length + 1));
            }
        }
    }

    codes
}

/// Exposed crate-wide so [`super::lsop`] can reuse the same inner byte
/// coder for its Huffman-selected inner stage.
pub(crate) fn encode_bytes(input: &[u8]) -> Bytes {
    let tree = build_tree(input);
    let count = leaf_count(&tree);
    let codes = build_codes(&tree);

    let mut writer = BitWriter::with_capacity(input.len() + 16);
    serialize_tree(&tree, &mut writer);

    if count > 1 {
        for &byte in input {
            let (bits, length) = codes[byte as usize].expect("every input byte has a code");
            for i in 0..length {
                writer.put_bit(((bits >> i) & 1) as u8);
            }
        }
    }

    let mut out = Vec::with_capacity(1 + writer.finalize_capacity_hint());
    out.push((count - 1) as u8);
    out.extend(writer.finalize());
    out
}

pub(crate) fn decode_bytes(data: &[u8], expected_len: usize) -> Result<Bytes> {
    if data.is_empty() {
        return Err(GvrsError::BadCompressionFormat("empty huffman payload".into()));
    }

    let mut reader = BitReader::new(&data[1..]);
    let root = deserialize_tree(&mut reader)?;

    if let Node::Leaf(symbol) = root {
        return Ok(vec![symbol; expected_len]);
    }

    let mut out = Vec::with_capacity(expected_len);
    for _ in 0..expected_len {
        let mut node = &root;
        loop {
            match node {
                Node::Leaf(symbol) => {
                    out.push(*symbol);
                    break;
                }
                Node::Branch(left, right) => {
                    let bit = reader.get_bit().ok_or_else(|| GvrsError::BadCompressionFormat("truncated huffman payload".into()))?;
                    node = if bit == 0 { left } else { right };
                }
            }
        }
    }

    Ok(out)
}

trait FinalizeCapacityHint {
    fn finalize_capacity_hint(&self) -> usize;
}
impl FinalizeCapacityHint for BitWriter {
    fn finalize_capacity_hint(&self) -> usize {
        self.bit_count() / 8 + 1
    }
}

/// The Huffman codec, framed per spec §4.2: a 10-byte header (codec index,
/// predictor index, predictor seed, M32 byte count) precedes the Huffman
/// stream for integer tiles; float tiles are Huffman-coded directly over
/// their raw little-endian bytes.
#[derive(Default, Clone)]
pub struct HuffmanCodec;

impl Codec for HuffmanCodec {
    fn identifier(&self) -> &str {
        "gvrs.huffman"
    }

    fn encode_int(&self, values: &[i32], n_rows: usize, n_cols: usize) -> Result<Bytes> {
        let (predictor, seed, m32_bytes) = predictor::encode_smallest(values, n_rows, n_cols);
        let body = encode_bytes(&m32_bytes);

        let mut out = Vec::with_capacity(10 + body.len());
        out.push(CODEC_INDEX);
        out.push(predictor.index());
        out.extend_from_slice(&seed.to_le_bytes());
        out.extend_from_slice(&(m32_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);

        if out.len() >= values.len() * 4 {
            return Err(GvrsError::CompressionFailure("huffman output not smaller than raw".into()));
        }
        Ok(out)
    }

    fn decode_int(&self, compressed: &[u8], n_rows: usize, n_cols: usize) -> Result<Vec<i32>> {
        if compressed.len() < 10 {
            return Err(GvrsError::BadCompressionFormat("huffman header truncated".into()));
        }

        let predictor_index = compressed[1];
        let seed = i32::from_le_bytes(compressed[2..6].try_into().unwrap());
        let m32_len = u32::from_le_bytes(compressed[6..10].try_into().unwrap()) as usize;

        let predictor = Predictor::from_index(predictor_index)
            .ok_or_else(|| GvrsError::BadCompressionFormat("unknown predictor index".into()))?;

        let m32_bytes = decode_bytes(&compressed[10..], m32_len)?;
        Ok(predictor::decode(predictor, seed, &m32_bytes, n_rows, n_cols))
    }

    fn encode_float(&self, values: &[f32], _n_rows: usize, _n_cols: usize) -> Result<Bytes> {
        let mut raw = Vec::with_capacity(values.len() * 4);
        for &v in values {
            raw.extend_from_slice(&v.to_le_bytes());
        }

        let body = encode_bytes(&raw);
        let mut out = Vec::with_capacity(5 + body.len());
        out.push(CODEC_INDEX);
        out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);

        if out.len() >= raw.len() {
            return Err(GvrsError::CompressionFailure("huffman output not smaller than raw".into()));
        }
        Ok(out)
    }

    fn decode_float(&self, compressed: &[u8], n_rows: usize, n_cols: usize) -> Result<Vec<f32>> {
        if compressed.len() < 5 {
            return Err(GvrsError::BadCompressionFormat("huffman float header truncated".into()));
        }

        let raw_len = u32::from_le_bytes(compressed[1..5].try_into().unwrap()) as usize;
        let raw = decode_bytes(&compressed[5..], raw_len)?;

        let expected = n_rows * n_cols;
        if raw.len() != expected * 4 {
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
    fn byte_stream_round_trips() {
        let input = b"the quick brown fox jumps over the lazy dog, again and again".to_vec();
        let encoded = encode_bytes(&input);
        let decoded = decode_bytes(&encoded, input.len()).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn single_distinct_symbol_is_degenerate() {
        let input = vec![7_u8; 50];
        let tree = build_tree(&input);
        assert!(matches!(tree, Node::Leaf(7)));

        let encoded = encode_bytes(&input);
        let decoded = decode_bytes(&encoded, input.len()).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn empty_input_round_trips() {
        let encoded = encode_bytes(&[]);
        let decoded = decode_bytes(&encoded, 0).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn int_tile_round_trips() {
        let codec = HuffmanCodec::default();
        let values: Vec<i32> = (0..100).map(|i| (i % 7) - 3).collect();
        let encoded = codec.encode_int(&values, 10, 10).unwrap();
        let decoded = codec.decode_int(&encoded, 10, 10).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn float_tile_round_trips() {
        let codec = HuffmanCodec::default();
        let values: Vec<f32> = (0..64).map(|i| i as f32 * 0.5).collect();
        let encoded = codec.encode_float(&values, 8, 8).unwrap();
        let decoded = codec.decode_float(&encoded, 8, 8).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn malformed_tree_is_rejected() {
        let garbage = vec![255_u8; 4];
        let err = decode_bytes(&garbage, 10).unwrap_err();
        assert!(matches!(err, GvrsError::BadCompressionFormat(_)));
    }

    #[test]
    fn fuzz_random_byte_streams_round_trip() {
        use rand::Rng;
        let mut rng = rand::rng();
        for _ in 0..20 {
            let len = rng.random_range(0..500);
            let input: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            let encoded = encode_bytes(&input);
            let decoded = decode_bytes(&encoded, input.len()).unwrap();
            assert_eq!(decoded, input);
        }
    }
}
