//! Deterministic projection of real-valued vectors into [`BitSignature`]s.
//!
//! Construction (rotation sampling, the sparse contrast projection matrix)
//! is translated directly from the reference `lshModel.cpp`/`.hpp`: a
//! zero-mean sparse contrast projection matrix `P` of shape `(bits, dim)`,
//! and `variations` full-rank `dim × dim` rotation matrices. Matrices are
//! plain row-major `Vec<f64>` — no linear-algebra crate appears anywhere in
//! the example pack for this kind of small, build-time-only dense algebra,
//! so rank/solve are hand-rolled via Gaussian elimination with partial
//! pivoting, in the same "do the numeric work by hand" spirit as the rest
//! of this codebase's fixed-point and container math.

use crate::binfmt::{read_double, write_double};
use crate::bitsignature::BitSignature;
use crate::error::{Error, Result};
use crate::rng::DeterministicRng;

const EPS: f64 = 1e-9;

/// A dense row-major matrix.
#[derive(Debug, Clone, PartialEq)]
struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    fn zeros(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![0.0; rows * cols] }
    }

    #[inline]
    fn get(&self, r: usize, c: usize) -> f64 {
        self.data[r * self.cols + c]
    }

    #[inline]
    fn set(&mut self, r: usize, c: usize, v: f64) {
        self.data[r * self.cols + c] = v;
    }

    fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// `self * v`, where `v` has `cols` entries and the result has `rows` entries.
    fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.rows];
        for r in 0..self.rows {
            let row = self.row(r);
            let mut acc = 0.0;
            for c in 0..self.cols {
                acc += row[c] * v[c];
            }
            out[r] = acc;
        }
        out
    }

    fn sample_uniform(rows: usize, cols: usize, rng: &mut DeterministicRng) -> Self {
        let mut m = Self::zeros(rows, cols);
        for v in m.data.iter_mut() {
            *v = rng.next_uniform_signed();
        }
        m
    }

    /// Numerical rank via Gaussian elimination with partial pivoting.
    /// Requires a square matrix.
    fn rank(&self) -> usize {
        debug_assert_eq!(self.rows, self.cols);
        let n = self.rows;
        let mut a = self.data.clone();
        let idx = |r: usize, c: usize| r * n + c;
        let mut rank = 0;
        for col in 0..n {
            let mut pivot = rank;
            let mut best = a[idx(rank, col)].abs();
            for r in (rank + 1)..n {
                let v = a[idx(r, col)].abs();
                if v > best {
                    best = v;
                    pivot = r;
                }
            }
            if best < EPS {
                continue;
            }
            if pivot != rank {
                for c in 0..n {
                    a.swap(idx(rank, c), idx(pivot, c));
                }
            }
            let pivot_val = a[idx(rank, col)];
            for r in (rank + 1)..n {
                let factor = a[idx(r, col)] / pivot_val;
                if factor != 0.0 {
                    for c in col..n {
                        let sub = factor * a[idx(rank, c)];
                        a[idx(r, c)] -= sub;
                    }
                }
            }
            rank += 1;
            if rank == n {
                break;
            }
        }
        rank
    }

    fn approx_eq(&self, other: &Matrix) -> bool {
        self.rows == other.rows
            && self.cols == other.cols
            && self.data.iter().zip(other.data.iter()).all(|(a, b)| (a - b).abs() < EPS)
    }
}

/// Deterministic LSH projection model: `dim`-dimensional vectors in,
/// `bits * variations`-bit [`BitSignature`]s out.
#[derive(Debug, Clone)]
pub struct LshModel {
    dim: usize,
    bits: usize,
    variations: usize,
    projection: Matrix,
    rotations: Vec<Matrix>,
}

impl LshModel {
    /// Builds a fresh model. `bits` must be positive and `bits <= dim`;
    /// `variations` must be positive. The total signature width `bits *
    /// variations` need not itself be a multiple of 64 — [`BitSignature`]
    /// pads to the next word boundary regardless. `seed` drives rotation
    /// sampling and must be supplied explicitly — see `crate::rng`.
    pub fn build(dim: usize, bits: usize, variations: usize, seed: u64) -> Result<Self> {
        if dim == 0 {
            return Err(Error::invalid_argument("dim must be positive"));
        }
        if bits == 0 {
            return Err(Error::invalid_argument("bits must be positive"));
        }
        if bits > dim {
            return Err(Error::invalid_argument("bits must not exceed dim"));
        }
        if variations == 0 {
            return Err(Error::invalid_argument("variations must be positive"));
        }

        let projection = Self::build_projection_matrix(dim, bits);

        let mut rng = DeterministicRng::new(seed);
        let mut rotations = Vec::with_capacity(variations);
        while rotations.len() < variations {
            let candidate = Matrix::sample_uniform(dim, dim, &mut rng);
            if candidate.rank() == dim {
                rotations.push(candidate);
            }
            // else: rejected, loop resamples with the already-advanced rng state.
        }

        Ok(Self { dim, bits, variations, projection, rotations })
    }

    fn build_projection_matrix(dim: usize, bits: usize) -> Matrix {
        let mut p = Matrix::zeros(bits, dim);
        let step = dim as f64 / bits as f64;
        for i in 0..bits {
            let c1 = (i as f64 * step).floor() as usize;
            let c2 = if i + 1 == bits {
                dim
            } else {
                ((i + 1) as f64 * step).floor() as usize
            };
            let span = c2 - c1;
            let neg = -1.0 / (dim - span) as f64;
            let pos = 1.0 / span as f64;
            for c in 0..dim {
                p.set(i, c, if c >= c1 && c < c2 { pos } else { neg });
            }
        }
        p
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    pub fn variations(&self) -> usize {
        self.variations
    }

    /// Total signature width, `bits * variations`.
    pub fn signature_width(&self) -> u32 {
        (self.bits * self.variations) as u32
    }

    /// Projects `v` (length must equal `dim`) into a [`BitSignature`] tagged
    /// with `featno` as its owning id.
    pub fn sim_hash(&self, v: &[f64], featno: u64) -> Result<BitSignature> {
        if v.len() != self.dim {
            return Err(Error::invalid_argument(format!(
                "dimension mismatch: model expects {}, got {}",
                self.dim,
                v.len()
            )));
        }
        let mut sig = BitSignature::with_width(self.signature_width(), false);
        let mut bit = 0u32;
        for rotation in &self.rotations {
            let rotated = rotation.mul_vec(v);
            let projected = self.projection.mul_vec(&rotated);
            for u in projected {
                sig.set(bit, u >= 0.0)?;
                bit += 1;
            }
        }
        Ok(sig.with_id(featno))
    }

    /// Component-wise equality under a tight epsilon, as required for the
    /// serialize/deserialize round-trip law.
    pub fn approx_eq(&self, other: &LshModel) -> bool {
        self.dim == other.dim
            && self.bits == other.bits
            && self.variations == other.variations
            && self.projection.approx_eq(&other.projection)
            && self.rotations.len() == other.rotations.len()
            && self.rotations.iter().zip(other.rotations.iter()).all(|(a, b)| a.approx_eq(b))
    }

    /// Header: (dim, bits, variations) as big-endian u32. Body: all rotation
    /// entries row-major (rotation by rotation), then the projection's
    /// entries row-major; each `f64` as two big-endian u32 halves (high, low)
    /// of its IEEE-754 bit pattern.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            12 + (self.variations * self.dim * self.dim + self.bits * self.dim) * 8,
        );
        out.extend_from_slice(&(self.dim as u32).to_be_bytes());
        out.extend_from_slice(&(self.bits as u32).to_be_bytes());
        out.extend_from_slice(&(self.variations as u32).to_be_bytes());
        for rotation in &self.rotations {
            for &entry in &rotation.data {
                write_double(&mut out, entry);
            }
        }
        for &entry in &self.projection.data {
            write_double(&mut out, entry);
        }
        out
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        if buf.len() < 12 {
            return Err(Error::corruption("LSH model header truncated"));
        }
        let dim = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
        let bits = u32::from_be_bytes(buf[4..8].try_into().unwrap()) as usize;
        let variations = u32::from_be_bytes(buf[8..12].try_into().unwrap()) as usize;

        let expected_doubles = variations * dim * dim + bits * dim;
        let expected_len = 12 + expected_doubles * 8;
        if buf.len() != expected_len {
            return Err(Error::corruption(format!(
                "LSH model body length mismatch: expected {expected_len}, got {}",
                buf.len()
            )));
        }

        let mut off = 12;
        let mut rotations = Vec::with_capacity(variations);
        for _ in 0..variations {
            let mut m = Matrix::zeros(dim, dim);
            for entry in m.data.iter_mut() {
                *entry = read_double(buf, off);
                off += 8;
            }
            rotations.push(m);
        }
        let mut projection = Matrix::zeros(bits, dim);
        for entry in projection.data.iter_mut() {
            *entry = read_double(buf, off);
            off += 8;
        }

        Ok(Self { dim, bits, variations, projection, rotations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_model() {
        let model = LshModel::build(8, 4, 2, 1234).unwrap();
        let bytes = model.serialize();
        let back = LshModel::deserialize(&bytes).unwrap();
        assert!(model.approx_eq(&back));
    }

    #[test]
    fn sim_hash_deterministic_across_rebuild() {
        let model = LshModel::build(8, 4, 2, 7).unwrap();
        let v = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let a = model.sim_hash(&v, 1).unwrap();

        let bytes = model.serialize();
        let rebuilt = LshModel::deserialize(&bytes).unwrap();
        let b = rebuilt.sim_hash(&v, 1).unwrap();

        assert_eq!(a.words(), b.words());
    }

    #[test]
    fn dimension_mismatch_is_invalid_argument() {
        let model = LshModel::build(8, 4, 1, 1).unwrap();
        let err = model.sim_hash(&[1.0, 2.0], 1).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn rotations_are_full_rank() {
        let model = LshModel::build(16, 8, 3, 99).unwrap();
        for rotation in &model.rotations {
            assert_eq!(rotation.rank(), model.dim());
        }
    }

    #[test]
    fn projection_rows_are_zero_mean_contrast() {
        let model = LshModel::build(12, 4, 1, 5).unwrap();
        for i in 0..model.bits {
            let row = model.projection.row(i);
            let sum: f64 = row.iter().sum();
            assert!(sum.abs() < 1e-6, "row {i} sums to {sum}");
        }
    }

    #[test]
    fn rejects_bad_dims() {
        assert!(LshModel::build(0, 4, 1, 1).is_err());
        assert!(LshModel::build(8, 0, 1, 1).is_err());
        assert!(LshModel::build(8, 9, 1, 1).is_err());
        assert!(LshModel::build(8, 4, 0, 1).is_err());
    }
}
