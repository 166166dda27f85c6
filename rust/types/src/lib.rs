//! Shared vocabulary for the vector-search core: the types every other
//! crate in the workspace needs but that belong to none of them in
//! particular (mirrors the role `chroma-types` plays for chroma).

use bytemuck::{Pod, Zeroable};
use ivf_error::EngineError;

/// Row/column block size for the Zz tiled code layout, and the unit a
/// new inverted-list length is rounded up to. Taken from the original
/// source's `CUBE_ALIGN_SIZE`.
pub const CUBE_ALIGN_SIZE: usize = 16;

/// User-visible 32-bit vector id.
pub type UserId = u32;

/// Sentinel id used to pad top-K results when fewer than `k` candidates exist.
pub const SENTINEL_ID: UserId = u32::MAX;

/// Distance metric. L2 search is ascending (smaller is better); IP and
/// cosine are descending (larger is better).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Metric {
    L2,
    InnerProduct,
}

impl Metric {
    /// Sentinel distance for an empty result slot under this metric.
    pub fn sentinel_distance(&self) -> f32 {
        match self {
            Metric::L2 => f32::INFINITY,
            Metric::InnerProduct => f32::NEG_INFINITY,
        }
    }

    /// True if `a` is strictly better than `b` under this metric.
    pub fn is_better(&self, a: f32, b: f32) -> bool {
        match self {
            Metric::L2 => a < b,
            Metric::InnerProduct => a > b,
        }
    }

    /// Sort a vector of (distance, id) ascending in "goodness" order
    /// (best first).
    pub fn sort_best_first(&self, v: &mut [(f32, UserId)]) {
        match self {
            Metric::L2 => v.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap()),
            Metric::InnerProduct => v.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap()),
        }
    }
}

/// The on-device code encoding for one vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodeKind {
    /// Raw half-precision vector, `D` fp16 values, `2*D` bytes.
    Fp16Flat,
    /// Scalar-quantised, one byte per dimension, `D` bytes.
    Sq8,
    /// Product-quantised, one byte per sub-quantiser, `M` bytes.
    Pq { m: usize },
    /// Raw int8 vector, `D` bytes.
    Int8Flat,
}

impl CodeKind {
    /// Byte width of one code row, given the vector dimension `d`.
    pub fn element_size(&self, d: usize) -> usize {
        match self {
            CodeKind::Fp16Flat => d * 2,
            CodeKind::Sq8 => d,
            CodeKind::Pq { m } => *m,
            CodeKind::Int8Flat => d,
        }
    }
}

/// One (distance, id) search result pair, laid out for zero-copy RPC framing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Neighbor {
    pub distance: f32,
    pub id: UserId,
}

impl Neighbor {
    pub fn sentinel(metric: Metric) -> Self {
        Neighbor {
            distance: metric.sentinel_distance(),
            id: SENTINEL_ID,
        }
    }
}

/// Selector used by `remove_ids`: either a contiguous id range or an
/// explicit batch of ids.
#[derive(Clone, Debug)]
pub enum Selector {
    Range { min: UserId, max: UserId },
    Batch(Vec<UserId>),
}

impl Selector {
    pub fn matches(&self, id: UserId) -> bool {
        match self {
            Selector::Range { min, max } => id >= *min && id < *max,
            Selector::Batch(ids) => ids.contains(&id),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Selector::Range { min, max } => min >= max,
            Selector::Batch(ids) => ids.is_empty(),
        }
    }
}

/// Validate a requested dimensionality: must be a positive multiple of
/// `CUBE_ALIGN_SIZE`, per spec.md §3.
pub fn validate_dimension(d: usize) -> Result<(), EngineError> {
    if d == 0 || d % CUBE_ALIGN_SIZE != 0 {
        return Err(EngineError::invalid_argument(format!(
            "dimension must be a positive multiple of {CUBE_ALIGN_SIZE}, got {d}"
        )));
    }
    Ok(())
}

/// Validate `n` and `k` for a search call.
pub fn validate_search_args(n: usize, k: usize) -> Result<(), EngineError> {
    if k < 1 {
        return Err(EngineError::invalid_argument("k must be >= 1"));
    }
    if n > i32::MAX as usize {
        return Err(EngineError::invalid_argument(
            "batch count exceeds the 2^31 ceiling",
        ));
    }
    Ok(())
}

/// Reject NaN/Inf entries in a query or database batch.
pub fn validate_finite(vectors: &[f32]) -> Result<(), EngineError> {
    if vectors.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::invalid_argument(
            "vector batch contains NaN or Inf",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_sentinel_and_ordering() {
        assert_eq!(Metric::L2.sentinel_distance(), f32::INFINITY);
        assert_eq!(Metric::InnerProduct.sentinel_distance(), f32::NEG_INFINITY);
        assert!(Metric::L2.is_better(1.0, 2.0));
        assert!(Metric::InnerProduct.is_better(2.0, 1.0));
    }

    #[test]
    fn selector_matching() {
        let r = Selector::Range { min: 2, max: 5 };
        assert!(!r.matches(1));
        assert!(r.matches(2));
        assert!(r.matches(4));
        assert!(!r.matches(5));

        let b = Selector::Batch(vec![1, 3, 7]);
        assert!(b.matches(3));
        assert!(!b.matches(4));
    }

    #[test]
    fn dimension_validation() {
        assert!(validate_dimension(128).is_ok());
        assert!(validate_dimension(0).is_err());
        assert!(validate_dimension(100).is_err());
    }

    #[test]
    fn neighbor_is_pod() {
        let n = Neighbor { distance: 1.5, id: 42 };
        let bytes = bytemuck::bytes_of(&n);
        assert_eq!(bytes.len(), 8);
    }
}
