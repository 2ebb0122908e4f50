//! Minimal-cover ranking over an externally supplied token lattice.
//!
//! This does not tokenize anything itself — tokenization and the structural
//! glue around the lexer instance/context split are out of scope. What
//! remains, grounded on the shape of the reference `scanField`-style
//! alternative-split search, is the small combinatorial core: given a set
//! of candidate (feature, span) tokens over a field of known length, find
//! the covering sequence that uses the fewest tokens, breaking ties by
//! total weight.

use crate::error::{Error, Result};

/// One candidate token spanning `[start, end)` of the field being covered.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticeToken {
    pub featno: u64,
    pub start: usize,
    pub end: usize,
    pub weight: f64,
}

/// Finds the minimal-cardinality sequence of non-overlapping tokens from
/// `tokens` that exactly covers `[0, length)`, breaking ties between
/// equally short covers by total weight (higher is better).
pub fn minimal_cover(tokens: &[LatticeToken], length: usize) -> Result<Vec<LatticeToken>> {
    for t in tokens {
        if t.start >= t.end || t.end > length {
            return Err(Error::invalid_argument(format!(
                "token span [{}, {}) is invalid for a field of length {length}",
                t.start, t.end
            )));
        }
    }

    let mut by_start: Vec<Vec<usize>> = vec![Vec::new(); length + 1];
    for (i, t) in tokens.iter().enumerate() {
        by_start[t.start].push(i);
    }

    // best[pos] = (token count, total weight) of the best cover of [0, pos).
    let mut best: Vec<Option<(usize, f64)>> = vec![None; length + 1];
    let mut prev: Vec<Option<(usize, usize)>> = vec![None; length + 1];
    best[0] = Some((0, 0.0));

    for pos in 0..length {
        let Some((count, weight)) = best[pos] else { continue };
        for &ti in &by_start[pos] {
            let t = &tokens[ti];
            let candidate = (count + 1, weight + t.weight);
            let better = match best[t.end] {
                None => true,
                Some((c, w)) => candidate.0 < c || (candidate.0 == c && candidate.1 > w),
            };
            if better {
                best[t.end] = Some(candidate);
                prev[t.end] = Some((pos, ti));
            }
        }
    }

    let mut result = Vec::new();
    let mut pos = length;
    while pos > 0 {
        let (prev_pos, ti) = prev[pos]
            .ok_or_else(|| Error::not_found("no token sequence covers the field"))?;
        result.push(tokens[ti].clone());
        pos = prev_pos;
    }
    result.reverse();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(featno: u64, start: usize, end: usize, weight: f64) -> LatticeToken {
        LatticeToken { featno, start, end, weight }
    }

    #[test]
    fn picks_fewest_tokens() {
        let tokens = vec![
            tok(1, 0, 1, 0.5),
            tok(2, 1, 2, 0.5),
            tok(3, 0, 2, 0.9),
        ];
        let cover = minimal_cover(&tokens, 2).unwrap();
        assert_eq!(cover.len(), 1);
        assert_eq!(cover[0].featno, 3);
    }

    #[test]
    fn ties_broken_by_weight() {
        let tokens = vec![
            tok(1, 0, 2, 0.2),
            tok(2, 0, 2, 0.8),
        ];
        let cover = minimal_cover(&tokens, 2).unwrap();
        assert_eq!(cover.len(), 1);
        assert_eq!(cover[0].featno, 2);
    }

    #[test]
    fn no_cover_is_not_found() {
        let tokens = vec![tok(1, 0, 1, 1.0)];
        assert!(minimal_cover(&tokens, 3).is_err());
    }

    #[test]
    fn rejects_out_of_bounds_token() {
        let tokens = vec![tok(1, 0, 5, 1.0)];
        assert!(minimal_cover(&tokens, 3).is_err());
    }

    #[test]
    fn multi_token_cover_in_order() {
        let tokens = vec![tok(1, 0, 1, 1.0), tok(2, 1, 3, 1.0), tok(3, 3, 4, 1.0)];
        let cover = minimal_cover(&tokens, 4).unwrap();
        let featnos: Vec<u64> = cover.iter().map(|t| t.featno).collect();
        assert_eq!(featnos, vec![1, 2, 3]);
    }
}
