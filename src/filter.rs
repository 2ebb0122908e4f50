//! Cascaded candidate admission over fixed word positions: an approximate,
//! allocation-free pre-filter that a full per-row `dist()` would be far too
//! slow to run over every stored signature for. Grounded on the bench/filter
//! cascade idiom this codebase already uses for sparse similarity search
//! (`storage/ladybug/spo.rs`'s `belichtungsmesser`/`cascade_search`), here
//! built directly against word positions of a `BitSignature` rather than a
//! fingerprint's set bits.

use crate::bitsignature::BitSignature;
use crate::error::{Error, Result};

/// All stored signatures' value at one fixed word position, columnar so a
/// bench can be scanned without touching any other word.
#[derive(Debug, Clone)]
pub struct SignatureBench {
    word_pos: usize,
    values: Vec<u64>,
}

impl SignatureBench {
    fn from_column(word_pos: usize, values: Vec<u64>) -> Self {
        Self { word_pos, values }
    }

    /// Rows whose distance at this bench's word alone is within `max_per_bench`.
    fn search(&self, needle_word: u64, max_per_bench: u32) -> Vec<(usize, u32)> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(row, &word)| {
                let d = (word ^ needle_word).count_ones();
                (d <= max_per_bench).then_some((row, d))
            })
            .collect()
    }

    /// Narrows an existing partial candidate set using this bench's word,
    /// keeping only rows whose accumulated distance stays within `bound`.
    fn filter(&self, partial: &[(usize, u32)], needle_word: u64, bound: f64) -> Vec<(usize, u32)> {
        partial
            .iter()
            .filter_map(|&(row, acc)| {
                let d = (self.values[row] ^ needle_word).count_ones();
                let total = acc + d;
                (total as f64 <= bound).then_some((row, total))
            })
            .collect()
    }
}

const WORDS_PER_BENCH: u32 = 64;

/// A k-bench cascade over one type's stored signatures.
#[derive(Debug, Clone)]
pub struct SignatureFilter {
    positions: Vec<usize>,
    benches: Vec<SignatureBench>,
    total_words: usize,
    total_bits: u32,
}

impl SignatureFilter {
    /// Builds a filter with `k` benches over `signatures`, all of which must
    /// share the same width. Benches sit at evenly spaced word positions so
    /// the sampled words are not clustered within one rotation's output.
    /// The fill is partitioned across up to `threads` workers, each owning a
    /// disjoint contiguous row range and writing only its own slice; a
    /// fork-join barrier gates construction of the returned filter.
    pub fn build(signatures: &[BitSignature], k: usize, threads: usize) -> Result<Self> {
        if signatures.is_empty() {
            return Err(Error::invalid_argument("cannot build a filter over zero signatures"));
        }
        let total_words = signatures[0].word_count() as usize;
        let total_bits = signatures[0].width();
        if k == 0 || k > 4 || k > total_words {
            return Err(Error::invalid_argument(format!(
                "bench count {k} must be in 1..=4 and no more than {total_words} words"
            )));
        }
        for s in signatures {
            if s.width() != total_bits {
                return Err(Error::invalid_argument("all signatures in a filter must share one width"));
            }
        }
        let positions = evenly_spaced_positions(total_words, k);
        let columns = fill_columns(signatures, &positions, threads);
        let benches = positions
            .iter()
            .zip(columns)
            .map(|(&pos, column)| SignatureBench::from_column(pos, column))
            .collect();
        Ok(Self { positions, benches, total_words, total_bits })
    }

    pub fn total_bits(&self) -> u32 {
        self.total_bits
    }

    /// The cascade's final admission bound (the bound `search` applies at
    /// its last bench) for a given `probsimdist`/`simdist` pair, without
    /// re-running the cascade. Lets a caller derive a cheaper shdiff
    /// pre-check as an effective `probsimdist` shrinks during refinement.
    pub fn sum_bound(&self, probsimdist: u32, simdist: u32) -> f64 {
        let per_bench_bound = (probsimdist as f64 * WORDS_PER_BENCH as f64) / self.total_bits as f64;
        let decr = (probsimdist as f64 - simdist as f64) / (2.0 * self.total_words as f64);
        let k = self.benches.len() as f64;
        k * per_bench_bound - (k - 1.0) * decr
    }

    /// Candidate rows (row index, accumulated partial Hamming distance)
    /// whose sampled-word distance sum stays within the bound the cascade
    /// derives from `probsimdist`/`simdist`.
    pub fn search(&self, needle: &BitSignature, simdist: u32, probsimdist: u32) -> Result<Vec<(usize, u32)>> {
        if probsimdist < simdist {
            return Err(Error::invalid_argument("probsimdist must be >= simdist"));
        }
        if needle.width() != self.total_bits {
            return Err(Error::invalid_argument("needle width does not match filter"));
        }
        let per_bench_bound = (probsimdist as f64 * WORDS_PER_BENCH as f64) / self.total_bits as f64;
        let decr = (probsimdist as f64 - simdist as f64) / (2.0 * self.total_words as f64);

        let mut candidates: Vec<(usize, u32)> = Vec::new();
        for (b, bench) in self.benches.iter().enumerate() {
            let running_bound = (b + 1) as f64 * per_bench_bound - b as f64 * decr;
            let needle_word = needle.words()[self.positions[b]];
            candidates = if b == 0 {
                bench.search(needle_word, running_bound.floor().max(0.0) as u32)
            } else {
                bench.filter(&candidates, needle_word, running_bound)
            };
        }
        Ok(candidates)
    }
}

fn evenly_spaced_positions(total_words: usize, k: usize) -> Vec<usize> {
    (0..k).map(|j| (j * total_words) / k).collect()
}

/// Reads `positions.len()` word columns out of `signatures`, one `u64` per
/// row per position, partitioning the row range across up to `threads`
/// workers. Each worker fills a disjoint contiguous slice of a single
/// row-major scratch buffer (row `r`'s `k` values at `[r*k .. r*k+k)`), so
/// there is no cross-thread synchronization during the fill; the scope exit
/// is the fork-join barrier. The scratch buffer is then split back into
/// per-bench columns.
fn fill_columns(signatures: &[BitSignature], positions: &[usize], threads: usize) -> Vec<Vec<u64>> {
    let n = signatures.len();
    let k = positions.len();
    let mut rows = vec![0u64; n * k];
    let threads = threads.max(1).min(n.max(1));

    if threads <= 1 {
        for (row, sig) in signatures.iter().enumerate() {
            for (b, &pos) in positions.iter().enumerate() {
                rows[row * k + b] = sig.words()[pos];
            }
        }
    } else {
        let rows_per_chunk = n.div_ceil(threads);
        std::thread::scope(|scope| {
            for (chunk_idx, out_chunk) in rows.chunks_mut(rows_per_chunk * k).enumerate() {
                let row_start = chunk_idx * rows_per_chunk;
                let sig_chunk = &signatures[row_start..(row_start + rows_per_chunk).min(n)];
                scope.spawn(move || {
                    for (local_row, sig) in sig_chunk.iter().enumerate() {
                        for (b, &pos) in positions.iter().enumerate() {
                            out_chunk[local_row * k + b] = sig.words()[pos];
                        }
                    }
                });
            }
        });
    }

    let mut columns = vec![Vec::with_capacity(n); k];
    for row in 0..n {
        for b in 0..k {
            columns[b].push(rows[row * k + b]);
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(bits: &[bool]) -> BitSignature {
        BitSignature::from_bits(bits)
    }

    #[test]
    fn exact_match_is_always_a_candidate() {
        let needle_bits: Vec<bool> = (0..128).map(|i| i % 3 == 0).collect();
        let needle = sig(&needle_bits);
        let other_bits: Vec<bool> = (0..128).map(|i| i % 5 == 0).collect();
        let other = sig(&other_bits);
        let filter = SignatureFilter::build(&[needle.clone(), other], 2, 1).unwrap();
        let candidates = filter.search(&needle, 0, 0).unwrap();
        assert!(candidates.iter().any(|&(row, _)| row == 0));
    }

    #[test]
    fn distant_signature_is_rejected_with_tight_bound() {
        let a = sig(&vec![false; 128]);
        let b = sig(&vec![true; 128]);
        let filter = SignatureFilter::build(&[a.clone(), b], 4, 1).unwrap();
        let candidates = filter.search(&a, 0, 0).unwrap();
        assert!(candidates.iter().all(|&(row, _)| row != 1));
    }

    #[test]
    fn rejects_empty_or_mismatched_width() {
        assert!(SignatureFilter::build(&[], 2, 1).is_err());
        let a = sig(&vec![false; 64]);
        let b = sig(&vec![false; 128]);
        assert!(SignatureFilter::build(&[a, b], 2, 1).is_err());
    }

    #[test]
    fn rejects_bench_count_above_four() {
        let a = sig(&vec![false; 512]);
        assert!(SignatureFilter::build(&[a], 5, 1).is_err());
    }

    #[test]
    fn probsimdist_below_simdist_rejected() {
        let a = sig(&vec![false; 128]);
        let filter = SignatureFilter::build(&[a.clone()], 2, 1).unwrap();
        assert!(filter.search(&a, 10, 5).is_err());
    }

    #[test]
    fn sum_bound_matches_cascade_admission() {
        let signatures: Vec<BitSignature> = (0..20)
            .map(|i| {
                let bits: Vec<bool> = (0..128).map(|b| (b + i * 3) % 4 == 0).collect();
                sig(&bits)
            })
            .collect();
        let filter = SignatureFilter::build(&signatures, 2, 1).unwrap();
        let candidates = filter.search(&signatures[0], 0, 40).unwrap();
        let bound = filter.sum_bound(40, 0);
        for (_, shdiff) in candidates {
            assert!(shdiff as f64 <= bound + 1e-9);
        }
    }

    #[test]
    fn parallel_fill_matches_sequential_fill() {
        let signatures: Vec<BitSignature> = (0..37)
            .map(|i| {
                let bits: Vec<bool> = (0..128).map(|b| (b + i) % 7 == 0).collect();
                sig(&bits)
            })
            .collect();
        let sequential = SignatureFilter::build(&signatures, 3, 1).unwrap();
        let parallel = SignatureFilter::build(&signatures, 3, 8).unwrap();
        assert_eq!(sequential.positions, parallel.positions);
        for (seq_bench, par_bench) in sequential.benches.iter().zip(&parallel.benches) {
            assert_eq!(seq_bench.values, par_bench.values);
        }
    }
}
