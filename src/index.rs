//! Per-type approximate nearest-neighbor index: a [`SignatureFilter`] cascade
//! plus the row→featno mapping and a signature source for the refinement
//! step. Built once from a type's stored signatures (sequential load) and
//! queried many times (random-access refinement of survivors).

use crate::bitsignature::BitSignature;
use crate::error::{Error, Result};
use crate::ranklist::{weight, RankEntry, RankList};

/// Where a candidate row's full signature comes from during refinement.
/// `Resident` keeps every signature in memory (fast refinement, higher
/// footprint); `Backed` re-reads from the store on demand per §4.7's
/// "database-backed" loading policy, trading memory for re-read cost.
enum SignatureSource {
    Resident(Vec<BitSignature>),
    Backed { reader: Box<dyn Fn(u64) -> Result<BitSignature> + Send + Sync> },
}

impl SignatureSource {
    fn load(&self, row: usize, featno: u64) -> Result<BitSignature> {
        match self {
            SignatureSource::Resident(sigs) => Ok(sigs[row].clone()),
            SignatureSource::Backed { reader } => reader(featno),
        }
    }
}

/// One result of a similarity search: the matched feature id and its
/// reported similarity weight in (roughly) `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityResult {
    pub featno: u64,
    pub weight: f64,
}

pub struct SignatureIndex {
    filter: crate::filter::SignatureFilter,
    id_vec: Vec<u64>,
    source: SignatureSource,
}

impl SignatureIndex {
    /// Builds a resident index: every signature is kept in memory, loaded
    /// sequentially from `rows` (already in featno order). The bench fill is
    /// partitioned across up to `threads` workers (see `SignatureFilter::build`).
    pub fn build_resident(rows: Vec<(u64, BitSignature)>, bench_count: usize, threads: usize) -> Result<Self> {
        if rows.is_empty() {
            return Err(Error::invalid_argument("cannot build an index over zero vectors"));
        }
        let id_vec: Vec<u64> = rows.iter().map(|(featno, _)| *featno).collect();
        let sigs: Vec<BitSignature> = rows.into_iter().map(|(_, sig)| sig).collect();
        let filter = crate::filter::SignatureFilter::build(&sigs, bench_count, threads)?;
        Ok(Self { filter, id_vec, source: SignatureSource::Resident(sigs) })
    }

    /// Builds a database-backed index: the filter's benches are built from
    /// `rows`, but full signatures are re-read through `reader` on
    /// refinement instead of being kept resident.
    pub fn build_backed(
        rows: Vec<(u64, BitSignature)>,
        bench_count: usize,
        threads: usize,
        reader: Box<dyn Fn(u64) -> Result<BitSignature> + Send + Sync>,
    ) -> Result<Self> {
        if rows.is_empty() {
            return Err(Error::invalid_argument("cannot build an index over zero vectors"));
        }
        let id_vec: Vec<u64> = rows.iter().map(|(featno, _)| *featno).collect();
        let sigs: Vec<BitSignature> = rows.iter().map(|(_, sig)| sig.clone()).collect();
        let filter = crate::filter::SignatureFilter::build(&sigs, bench_count, threads)?;
        Ok(Self { filter, id_vec, source: SignatureSource::Backed { reader } })
    }

    pub fn len(&self) -> usize {
        self.id_vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_vec.is_empty()
    }

    pub fn total_bits(&self) -> u32 {
        self.filter.total_bits()
    }

    /// Finds up to `k` nearest signatures to `needle`, tightening `maxDist`
    /// as the rank list fills per §4.7. As `maxDist` falls, the sum bound
    /// the cascade would have applied at that tighter distance is
    /// recomputed and used to skip remaining candidates by their already
    /// computed `shdiff` alone, without loading their full signature.
    pub fn find_similar(
        &self,
        needle: &BitSignature,
        simdist: u32,
        probsimdist: u32,
        k: usize,
    ) -> Result<Vec<SimilarityResult>> {
        let mut max_dist = probsimdist;
        let mut sum_bound = self.filter.sum_bound(max_dist.max(simdist), simdist);
        let mut ranks: RankList<RankEntry> = RankList::new(k)?;
        let candidates = self.filter.search(needle, simdist, probsimdist)?;

        for (row, shdiff) in candidates {
            if shdiff as f64 > sum_bound {
                continue;
            }
            let featno = self.id_vec[row];
            let full = self.source.load(row, featno)?;
            if !full.near(needle, max_dist) {
                continue;
            }
            let dist = full.dist(needle);
            ranks.insert(RankEntry { dist, featno });
            if ranks.complete() {
                if let Some(worst) = ranks.last() {
                    if worst.dist < max_dist {
                        max_dist = worst.dist;
                        sum_bound = self.filter.sum_bound(max_dist.max(simdist), simdist);
                    }
                }
            }
        }

        let total_bits = self.total_bits();
        Ok(ranks
            .into_iter()
            .map(|e| SimilarityResult { featno: e.featno, weight: weight(e.dist, total_bits) })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsh::LshModel;

    fn build_model() -> LshModel {
        LshModel::build(8, 64, 4, 42).unwrap()
    }

    #[test]
    fn finds_exact_match_first() {
        let model = build_model();
        let vectors: Vec<Vec<f64>> = vec![
            vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        ];
        let rows: Vec<(u64, BitSignature)> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i as u64 + 1, model.sim_hash(v, i as u64 + 1).unwrap()))
            .collect();
        let index = SignatureIndex::build_resident(rows, 4, 1).unwrap();
        let needle = model.sim_hash(&vectors[1], 0).unwrap();
        let results = index.find_similar(&needle, 0, 64, 3).unwrap();
        assert_eq!(results[0].featno, 2);
        assert!((results[0].weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn backed_source_reads_through_closure() {
        let model = build_model();
        let v = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let sig = model.sim_hash(&v, 1).unwrap();
        let rows = vec![(1u64, sig.clone())];
        let sig_for_reader = sig.clone();
        let index = SignatureIndex::build_backed(
            rows,
            2,
            1,
            Box::new(move |_featno| Ok(sig_for_reader.clone())),
        )
        .unwrap();
        let results = index.find_similar(&sig, 0, 64, 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].featno, 1);
    }

    #[test]
    fn rejects_empty_rows() {
        assert!(SignatureIndex::build_resident(vec![], 2, 1).is_err());
    }
}
