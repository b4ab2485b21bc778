//! Lossless integer neighbour-prediction over a tile (spec §4.1).
//!
//! All three predictors operate in row-major order over an
//! `nRows x nCols` grid of 32-bit integers, using wrapping 32-bit
//! two's-complement arithmetic throughout, and emit their residuals
//! as an [`crate::m32`] symbol stream plus a seed (the raw value of
//! cell `(0, 0)`).

use crate::m32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predictor {
    /// Differential: residual is the delta from the left neighbour
    /// (row starts take the delta from the cell above the first column).
    P1,
    /// Linear: interior cells predicted as `left + up - upper_left`.
    P2,
    /// Triangle: a P2 variant with different boundary tie-breaking.
    P3,
}

impl Predictor {
    pub fn index(self) -> u8 {
        match self {
            Predictor::P1 => 1,
            Predictor::P2 => 2,
            Predictor::P3 => 3,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            1 => Some(Predictor::P1),
            2 => Some(Predictor::P2),
            3 => Some(Predictor::P3),
            _ => None,
        }
    }
}

#[inline]
fn at(values: &[i32], n_cols: usize, row: usize, col: usize) -> i32 {
    values[row * n_cols + col]
}

/// Encodes `values` (row-major, `n_rows x n_cols`) with the given predictor,
/// returning the seed (raw value of cell `(0,0)`) and the residual stream.
pub fn encode(predictor: Predictor, values: &[i32], n_rows: usize, n_cols: usize) -> (i32, Vec<u8>) {
    assert_eq!(values.len(), n_rows * n_cols);
    let seed = values[0];
    let mut writer = m32::M32Writer::with_capacity(values.len());

    match predictor {
        Predictor::P1 => encode_p1(values, n_rows, n_cols, &mut writer),
        Predictor::P2 => encode_p2_or_p3(values, n_rows, n_cols, &mut writer),
        Predictor::P3 => encode_p3(values, n_rows, n_cols, &mut writer),
    }

    (seed, writer.finalize())
}

/// Reconstructs the `n_rows x n_cols` tile from a seed and residual stream.
pub fn decode(predictor: Predictor, seed: i32, residuals: &[u8], n_rows: usize, n_cols: usize) -> Vec<i32> {
    let mut values = vec![0_i32; n_rows * n_cols];
    values[0] = seed;
    let mut reader = m32::M32Reader::new(residuals);

    match predictor {
        Predictor::P1 => decode_p1(&mut values, n_rows, n_cols, &mut reader),
        Predictor::P2 => decode_p2_or_p3(&mut values, n_rows, n_cols, &mut reader),
        Predictor::P3 => decode_p3(&mut values, n_rows, n_cols, &mut reader),
    }

    values
}

fn encode_p1(values: &[i32], n_rows: usize, n_cols: usize, writer: &mut m32::M32Writer) {
    for row in 0..n_rows {
        for col in 0..n_cols {
            if row == 0 && col == 0 {
                continue;
            }

            let predicted = if col == 0 {
                at(values, n_cols, row - 1, n_cols - 1)
            } else {
                at(values, n_cols, row, col - 1)
            };

            let residual = at(values, n_cols, row, col).wrapping_sub(predicted);
            writer.encode(residual);
        }
    }
}

fn decode_p1(values: &mut [i32], n_rows: usize, n_cols: usize, reader: &mut m32::M32Reader) {
    for row in 0..n_rows {
        for col in 0..n_cols {
            if row == 0 && col == 0 {
                continue;
            }

            let predicted = if col == 0 {
                at(values, n_cols, row - 1, n_cols - 1)
            } else {
                at(values, n_cols, row, col - 1)
            };

            let residual = reader.decode_next();
            values[row * n_cols + col] = predicted.wrapping_add(residual);
        }
    }
}

/// P2: boundary cells use the P1 first-order delta (from the left, or from
/// above); interior cells are predicted as `left + up - upper_left`.
fn encode_p2_or_p3(values: &[i32], n_rows: usize, n_cols: usize, writer: &mut m32::M32Writer) {
    run_p2_or_p3(values, n_rows, n_cols, Triangle::No, |predicted, actual| {
        writer.encode(actual.wrapping_sub(predicted));
    })
}

fn decode_p2_or_p3(values: &mut [i32], n_rows: usize, n_cols: usize, reader: &mut m32::M32Reader) {
    run_p2_or_p3_decode(values, n_rows, n_cols, Triangle::No, reader)
}

/// P3: like P2, but boundary cells use a second-order (linear-extrapolation)
/// tie-break once two prior boundary samples are available, instead of P2's
/// plain first-order delta.
fn encode_p3(values: &[i32], n_rows: usize, n_cols: usize, writer: &mut m32::M32Writer) {
    run_p2_or_p3(values, n_rows, n_cols, Triangle::Yes, |predicted, actual| {
        writer.encode(actual.wrapping_sub(predicted));
    })
}

fn decode_p3(values: &mut [i32], n_rows: usize, n_cols: usize, reader: &mut m32::M32Reader) {
    run_p2_or_p3_decode(values, n_rows, n_cols, Triangle::Yes, reader)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Triangle { No, Yes }

fn run_p2_or_p3(values: &[i32], n_rows: usize, n_cols: usize, triangle: Triangle, mut emit: impl FnMut(i32, i32)) {
    for row in 0..n_rows {
        for col in 0..n_cols {
            if row == 0 && col == 0 {
                continue;
            }

            let predicted = boundary_or_interior_prediction(values, n_cols, row, col, triangle);
            emit(predicted, at(values, n_cols, row, col));
        }
    }
}

fn run_p2_or_p3_decode(values: &mut [i32], n_rows: usize, n_cols: usize, triangle: Triangle, reader: &mut m32::M32Reader) {
    for row in 0..n_rows {
        for col in 0..n_cols {
            if row == 0 && col == 0 {
                continue;
            }

            let predicted = boundary_or_interior_prediction(values, n_cols, row, col, triangle);
            let residual = reader.decode_next();
            values[row * n_cols + col] = predicted.wrapping_add(residual);
        }
    }
}

/// The triangle predictor's prediction for a single already-partially-filled
/// cell, exposed so other codecs (the LSOP border/fallback cells) can reuse
/// it without re-running a whole-tile encode/decode pass.
pub fn triangle_at(values: &[i32], n_cols: usize, row: usize, col: usize) -> i32 {
    boundary_or_interior_prediction(values, n_cols, row, col, Triangle::Yes)
}

#[inline]
fn boundary_or_interior_prediction(values: &[i32], n_cols: usize, row: usize, col: usize, triangle: Triangle) -> i32 {
    if row == 0 {
        // first row: delta from the left neighbour; P3 extrapolates linearly
        // once two samples are available.
        if triangle == Triangle::Yes && col >= 2 {
            let left1 = at(values, n_cols, 0, col - 1);
            let left2 = at(values, n_cols, 0, col - 2);
            left1.wrapping_add(left1).wrapping_sub(left2)
        } else {
            at(values, n_cols, 0, col - 1)
        }
    } else if col == 0 {
        // first column: delta from the cell above; same P3 extrapolation.
        if triangle == Triangle::Yes && row >= 2 {
            let up1 = at(values, n_cols, row - 1, 0);
            let up2 = at(values, n_cols, row - 2, 0);
            up1.wrapping_add(up1).wrapping_sub(up2)
        } else {
            at(values, n_cols, row - 1, 0)
        }
    } else {
        let a = at(values, n_cols, row, col - 1); // left
        let b = at(values, n_cols, row - 1, col - 1); // upper-left
        let c = at(values, n_cols, row - 1, col); // up
        a.wrapping_add(c).wrapping_sub(b)
    }
}

/// Encodes with P1, P2 and P3 and returns the one with the smallest M32
/// output, alongside its predictor tag and seed.
pub fn encode_smallest(values: &[i32], n_rows: usize, n_cols: usize) -> (Predictor, i32, Vec<u8>) {
    [Predictor::P1, Predictor::P2, Predictor::P3]
        .into_iter()
        .map(|predictor| {
            let (seed, bytes) = encode(predictor, values, n_rows, n_cols);
            (predictor, seed, bytes)
        })
        .min_by_key(|(_, _, bytes)| bytes.len())
        .expect("non-empty predictor list")
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::Rng;

    fn random_tile(rows: usize, cols: usize) -> Vec<i32> {
        let mut rng = rand::rng();
        (0..rows * cols).map(|_| rng.random()).collect()
    }

    #[test]
    fn p1_round_trip() {
        let tile = random_tile(17, 23);
        let (seed, residuals) = encode(Predictor::P1, &tile, 17, 23);
        let decoded = decode(Predictor::P1, seed, &residuals, 17, 23);
        assert_eq!(decoded, tile);
    }

    #[test]
    fn p2_round_trip() {
        let tile = random_tile(17, 23);
        let (seed, residuals) = encode(Predictor::P2, &tile, 17, 23);
        let decoded = decode(Predictor::P2, seed, &residuals, 17, 23);
        assert_eq!(decoded, tile);
    }

    #[test]
    fn p3_round_trip() {
        let tile = random_tile(17, 23);
        let (seed, residuals) = encode(Predictor::P3, &tile, 17, 23);
        let decoded = decode(Predictor::P3, seed, &residuals, 17, 23);
        assert_eq!(decoded, tile);
    }

    #[test]
    fn single_cell_tile_round_trips() {
        let tile = vec![42];
        let (seed, residuals) = encode(Predictor::P1, &tile, 1, 1);
        assert_eq!(seed, 42);
        let decoded = decode(Predictor::P1, seed, &residuals, 1, 1);
        assert_eq!(decoded, tile);
    }

    #[test]
    fn smooth_ramp_compresses_well_with_p2() {
        let (rows, cols) = (10, 10);
        let tile: Vec<i32> = (0..rows * cols).map(|i| (i / cols * 10 + i % cols) as i32).collect();
        let (predictor, seed, bytes) = encode_smallest(&tile, rows, cols);
        let decoded = decode(predictor, seed, &bytes, rows, cols);
        assert_eq!(decoded, tile);
        assert!(bytes.len() < tile.len() * 4, "prediction should beat raw 4-byte-per-cell storage");
    }
}
