//! Host- and device-shared distance kernels.
//!
//! The three base kernels (squared L2, inner product, cosine-via-
//! normalization) mirror `chroma-distance::distance`'s scalar
//! functions; everything else generalizes them to the code encodings
//! spec.md §3/§4.6/§4.8 require: fp16 flat vectors, SQ8 scalar
//! quantisation, PQ product quantisation, and int8 codes.

pub mod int8;
pub mod pq;
pub mod scalar;
pub mod sq8;

pub use ivf_types::Metric;

/// L2-normalize a vector in place-compatible fashion (matches
/// `chroma-distance::normalize`'s epsilon-guarded shape).
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    vector.iter().map(|x| x / (norm + 1e-32)).collect()
}

/// Convert a float vector to half-precision, the wire representation
/// for float indexes (spec.md §3).
pub fn to_fp16(vector: &[f32]) -> Vec<half::f16> {
    vector.iter().map(|&v| half::f16::from_f32(v)).collect()
}

/// Convert a half-precision vector back to float.
pub fn from_fp16(vector: &[half::f16]) -> Vec<f32> {
    vector.iter().map(|&v| v.to_f32()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_vector() {
        let v = vec![3.0, 4.0];
        let n = normalize(&v);
        let norm: f32 = n.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn fp16_round_trip_is_approximate() {
        let v = vec![0.1, -2.5, 100.25];
        let back = from_fp16(&to_fp16(&v));
        for (a, b) in v.iter().zip(back.iter()) {
            assert!((a - b).abs() < 0.5, "{a} vs {b}");
        }
    }
}
