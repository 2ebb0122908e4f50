//! Fixed-width bit vector with population-count Hamming operations and
//! big-endian binary I/O.
//!
//! Two signatures produced by the same [`crate::lsh::LshModel`] always have
//! identical width and word count; padding bits beyond `width` are always
//! zero. A signature is immutable after construction and cheap to clone.

use crate::error::{Error, Result};
use crate::rng::mix_word;

/// A fixed-width bit vector, stored as 64-bit words in a fixed,
/// architecture-independent order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSignature {
    width: u32,
    words: Vec<u64>,
    /// The feature number this signature belongs to, if any. Zero means unset —
    /// featnos are 1-based (see `crate::kv`), so 0 is never a real id.
    id: u64,
}

impl BitSignature {
    #[inline]
    fn word_count_for(width: u32) -> usize {
        (width as usize).div_ceil(64)
    }

    /// All-zero or all-one signature of the given bit width.
    pub fn with_width(width: u32, initval: bool) -> Self {
        let nwords = Self::word_count_for(width);
        let mut words = vec![if initval { u64::MAX } else { 0 }; nwords];
        if initval {
            Self::clear_padding(&mut words, width);
        }
        Self { width, words, id: 0 }
    }

    /// Build from an explicit sequence of bit values.
    pub fn from_bits(bits: &[bool]) -> Self {
        let width = bits.len() as u32;
        let mut sig = Self::with_width(width, false);
        for (i, &b) in bits.iter().enumerate() {
            // Construction-time only; width matches bits.len() by definition.
            sig.set(i as u32, b).expect("index within freshly sized signature");
        }
        sig
    }

    /// Deterministic pseudo-random signature, reproducible across platforms.
    /// Used both directly and as the basis of the LSH rotation sampling.
    pub fn random_hash(width: u32, seed: u64) -> Self {
        let nwords = Self::word_count_for(width);
        let mut words = Vec::with_capacity(nwords);
        for i in 0..nwords {
            words.push(mix_word(seed, i as u64));
        }
        Self::clear_padding(&mut words, width);
        Self { width, words, id: 0 }
    }

    fn clear_padding(words: &mut [u64], width: u32) {
        let used_bits = width as usize % 64;
        if used_bits != 0 {
            if let Some(last) = words.last_mut() {
                let mask = (1u64 << used_bits) - 1;
                *last &= mask;
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn get(&self, i: u32) -> Result<bool> {
        if i >= self.width {
            return Err(Error::out_of_range(format!(
                "bit index {i} out of range for width {}",
                self.width
            )));
        }
        let word = self.words[(i / 64) as usize];
        Ok((word >> (i % 64)) & 1 == 1)
    }

    pub fn set(&mut self, i: u32, value: bool) -> Result<()> {
        if i >= self.width {
            return Err(Error::out_of_range(format!(
                "bit index {i} out of range for width {}",
                self.width
            )));
        }
        let word = &mut self.words[(i / 64) as usize];
        let mask = 1u64 << (i % 64);
        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }
        Ok(())
    }

    /// Population count (number of set bits).
    pub fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Hamming distance: popcount of XOR over all words. Both signatures
    /// must have the same width.
    pub fn dist(&self, other: &BitSignature) -> u32 {
        debug_assert_eq!(self.width, other.width, "dist on mismatched widths");
        let mut d = 0u32;
        for (a, b) in self.words.iter().zip(other.words.iter()) {
            d += (a ^ b).count_ones();
        }
        d
    }

    /// Equivalent to `dist(a, b) <= max_dist`, but stops accumulating as
    /// soon as the running popcount exceeds `max_dist` so a large-distance
    /// rejection is cheap.
    pub fn near(&self, other: &BitSignature, max_dist: u32) -> bool {
        let mut acc = 0u32;
        for (a, b) in self.words.iter().zip(other.words.iter()) {
            acc += (a ^ b).count_ones();
            if acc > max_dist {
                return false;
            }
        }
        true
    }

    /// Big-endian width(u32), word_count(u32), then each word as
    /// (high32, low32) big-endian halves.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.words.len() * 8);
        out.extend_from_slice(&self.width.to_be_bytes());
        out.extend_from_slice(&(self.words.len() as u32).to_be_bytes());
        for w in &self.words {
            out.extend_from_slice(&((*w >> 32) as u32).to_be_bytes());
            out.extend_from_slice(&(*w as u32).to_be_bytes());
        }
        out
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(Error::corruption("bit signature header truncated"));
        }
        let width = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let word_count = u32::from_be_bytes(buf[4..8].try_into().unwrap()) as usize;
        let expected_len = 8 + word_count * 8;
        if buf.len() != expected_len {
            return Err(Error::corruption(format!(
                "bit signature body length mismatch: expected {expected_len}, got {}",
                buf.len()
            )));
        }
        if word_count != Self::word_count_for(width) {
            return Err(Error::corruption(
                "bit signature word count inconsistent with declared width",
            ));
        }
        let mut words = Vec::with_capacity(word_count);
        let mut off = 8;
        for _ in 0..word_count {
            let high = u32::from_be_bytes(buf[off..off + 4].try_into().unwrap()) as u64;
            let low = u32::from_be_bytes(buf[off + 4..off + 8].try_into().unwrap()) as u64;
            words.push((high << 32) | low);
            off += 8;
        }
        Ok(Self { width, words, id: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dist_symmetric_and_bounded() {
        let a = BitSignature::random_hash(192, 1);
        let b = BitSignature::random_hash(192, 2);
        assert_eq!(a.dist(&b), b.dist(&a));
        assert!(a.dist(&b) <= 192);
    }

    #[test]
    fn near_matches_dist() {
        let a = BitSignature::random_hash(256, 11);
        let b = BitSignature::random_hash(256, 12);
        let d = a.dist(&b);
        assert!(a.near(&b, d));
        assert!(!a.near(&b, d.saturating_sub(1)));
        assert!(a.near(&b, d + 1));
    }

    #[test]
    fn round_trip_serialize() {
        let sig = BitSignature::random_hash(130, 99);
        let bytes = sig.serialize();
        let back = BitSignature::deserialize(&bytes).unwrap();
        assert_eq!(sig, back);
    }

    #[test]
    fn padding_bits_are_zero() {
        let sig = BitSignature::with_width(70, true);
        assert_eq!(sig.count(), 70);
    }

    #[test]
    fn set_get_out_of_range() {
        let mut sig = BitSignature::with_width(10, false);
        assert!(sig.set(10, true).is_err());
        assert!(sig.get(10).is_err());
        sig.set(3, true).unwrap();
        assert!(sig.get(3).unwrap());
    }

    #[test]
    fn random_hash_deterministic() {
        let a = BitSignature::random_hash(128, 42);
        let b = BitSignature::random_hash(128, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn from_bits_matches_indices() {
        let bits = vec![true, false, true, true];
        let sig = BitSignature::from_bits(&bits);
        assert_eq!(sig.width(), 4);
        for (i, &b) in bits.iter().enumerate() {
            assert_eq!(sig.get(i as u32).unwrap(), b);
        }
    }
}
