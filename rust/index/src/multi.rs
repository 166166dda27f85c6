//! C9: multi-index batched search, grounded on
//! `mxIndex_samples/TestAscendMultiSearch.cpp` — the same query batch
//! run against several independently-trained indexes in one call,
//! producing one dense `(n x m x k)` result tensor instead of `m`
//! separate round trips.

use ivf_error::EngineError;
use ivf_types::{Metric, UserId, SENTINEL_ID};
use rayon::prelude::*;

use crate::variants::IndexVariant;

/// Optional per-(query, index) inclusion filter: `mask[qi][mi]` true
/// means query `qi` is allowed to see results from index `mi`. Absent
/// entirely means every query searches every index.
pub type QueryIndexMask = Vec<Vec<bool>>;

/// Dense `(n, m, k)` result: `distances[qi][mi]` and `ids[qi][mi]` are
/// each length `k`, best-first, sentinel-padded the same way a single
/// index's search pads short results.
pub struct MultiSearchResult {
    pub n: usize,
    pub m: usize,
    pub k: usize,
    pub distances: Vec<Vec<Vec<f32>>>,
    pub ids: Vec<Vec<Vec<UserId>>>,
}

/// Run `queries` (`n x dim`, `dim` must match every index) against all
/// of `indexes`, optionally filtered by `mask`. An index that is not
/// trained yet fails the whole call, matching the fail-fast contract a
/// single `search` already has (spec.md §4.7).
pub fn multi_search(
    indexes: &[&dyn IndexVariant],
    queries: &[f32],
    n: usize,
    k: usize,
    mask: Option<&QueryIndexMask>,
) -> Result<MultiSearchResult, EngineError> {
    let m = indexes.len();
    if m == 0 {
        return Ok(MultiSearchResult { n, m: 0, k, distances: Vec::new(), ids: Vec::new() });
    }
    if let Some(mask) = mask {
        if mask.len() != n || mask.iter().any(|row| row.len() != m) {
            return Err(EngineError::invalid_argument("mask shape must be n x m"));
        }
    }
    for idx in indexes {
        if !idx.is_trained() {
            return Err(EngineError::NotTrained);
        }
    }

    // Every index is searched with the full query batch; per-(query,
    // index) exclusion is applied afterward rather than by trimming the
    // batch, since the indexes run independently and in parallel.
    let per_index: Vec<Result<(Vec<f32>, Vec<UserId>), EngineError>> =
        indexes.par_iter().map(|idx| idx.search(queries, n, k)).collect();

    let mut distances = vec![vec![vec![0f32; k]; m]; n];
    let mut ids = vec![vec![vec![SENTINEL_ID; k]; m]; n];

    for (mi, result) in per_index.into_iter().enumerate() {
        let (dist, id) = result?;
        let metric = indexes[mi].metric();
        for qi in 0..n {
            let allowed = mask.map(|mask| mask[qi][mi]).unwrap_or(true);
            for kk in 0..k {
                if allowed {
                    distances[qi][mi][kk] = dist[qi * k + kk];
                    ids[qi][mi][kk] = id[qi * k + kk];
                } else {
                    distances[qi][mi][kk] = sentinel_for(metric);
                    ids[qi][mi][kk] = SENTINEL_ID;
                }
            }
        }
    }

    Ok(MultiSearchResult { n, m, k, distances, ids })
}

fn sentinel_for(metric: Metric) -> f32 {
    metric.sentinel_distance()
}
