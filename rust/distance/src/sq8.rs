//! 8-bit scalar quantisation: reconstruction and distance, grounded on
//! `original_source/ascenddaemon/impl/IndexSQ.cpp` / `IndexSQL2.cpp`.

use half::f16;

/// Reconstruct dimension `i` of a code byte `c`, per spec.md §3:
/// `(c + 0.5)/255 * vdiff[i] + vmin[i]`.
#[inline]
pub fn reconstruct_dim(c: u8, vmin: f16, vdiff: f16) -> f32 {
    (c as f32 + 0.5) / 255.0 * vdiff.to_f32() + vmin.to_f32()
}

/// Reconstruct a full code row back to float.
pub fn reconstruct(code: &[u8], vmin: &[f16], vdiff: &[f16]) -> Vec<f32> {
    debug_assert_eq!(code.len(), vmin.len());
    debug_assert_eq!(code.len(), vdiff.len());
    code.iter()
        .zip(vmin.iter())
        .zip(vdiff.iter())
        .map(|((&c, &mn), &df)| reconstruct_dim(c, mn, df))
        .collect()
}

/// Squared L2 norm of the reconstructed vector, the precomputed term
/// IVF-SQ8-L2 stores per code (spec.md §4.8) so the device need not
/// recompute it on every query.
pub fn reconstructed_norm_sq(code: &[u8], vmin: &[f16], vdiff: &[f16]) -> f32 {
    reconstruct(code, vmin, vdiff).iter().map(|x| x * x).sum()
}

/// Squared L2 distance between a float query and an SQ8 code, using
/// the precomputed reconstructed-norm term:
/// `||q - r||^2 = ||q||^2 - 2*<q,r> + ||r||^2`.
pub fn squared_l2(query: &[f32], code: &[u8], vmin: &[f16], vdiff: &[f16], code_norm_sq: f32) -> f32 {
    let mut dot = 0.0f32;
    let mut q_norm = 0.0f32;
    for i in 0..query.len() {
        let r = reconstruct_dim(code[i], vmin[i], vdiff[i]);
        dot += query[i] * r;
        q_norm += query[i] * query[i];
    }
    q_norm - 2.0 * dot + code_norm_sq
}

/// Inner product between a float query and an SQ8 code.
pub fn inner_product(query: &[f32], code: &[u8], vmin: &[f16], vdiff: &[f16]) -> f32 {
    let mut dot = 0.0f32;
    for i in 0..query.len() {
        dot += query[i] * reconstruct_dim(code[i], vmin[i], vdiff[i]);
    }
    dot
}

/// Fit `(vmin, vdiff)` training parameters over a sample of vectors,
/// one pair of bounds per dimension.
pub fn train(samples: &[Vec<f32>], dim: usize) -> (Vec<f16>, Vec<f16>) {
    let mut vmin = vec![f32::INFINITY; dim];
    let mut vmax = vec![f32::NEG_INFINITY; dim];
    for v in samples {
        for i in 0..dim {
            vmin[i] = vmin[i].min(v[i]);
            vmax[i] = vmax[i].max(v[i]);
        }
    }
    let vdiff: Vec<f32> = vmin.iter().zip(vmax.iter()).map(|(mn, mx)| mx - mn).collect();
    (
        vmin.into_iter().map(f16::from_f32).collect(),
        vdiff.into_iter().map(f16::from_f32).collect(),
    )
}

/// Encode a float vector into SQ8 codes given trained bounds.
pub fn encode(vector: &[f32], vmin: &[f16], vdiff: &[f16]) -> Vec<u8> {
    vector
        .iter()
        .zip(vmin.iter())
        .zip(vdiff.iter())
        .map(|((&v, &mn), &df)| {
            let diff = df.to_f32();
            if diff <= 0.0 {
                return 0u8;
            }
            let t = (v - mn.to_f32()) / diff;
            (t.clamp(0.0, 1.0) * 255.0).round() as u8
        })
        .collect()
}
