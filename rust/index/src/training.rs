//! Host-side k-means++ training delegation (spec.md §4.7): the device
//! never trains from scratch, it only receives the centroids this
//! module produces. Grounded on
//! `original_source/.../ascend/AscendClustering.cpp`'s subsample-then-
//! Lloyd shape.

use ivf_distance::scalar::squared_l2;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Run k-means++ initialisation followed by `iters` Lloyd refinements on
/// a subsample of at most `max_points_per_centroid * k1` vectors drawn
/// from `vectors` (row-major, `n x dim`). Returns `k1` centroids,
/// flattened row-major, and their squared L2 norms.
pub fn train_kmeans(
    vectors: &[f32],
    n: usize,
    dim: usize,
    k1: usize,
    max_points_per_centroid: usize,
    iters: usize,
    seed: u64,
) -> (Vec<f32>, Vec<f32>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let subsample_cap = (max_points_per_centroid * k1).min(n).max(k1.min(n));
    let mut indices: Vec<usize> = (0..n).collect();
    for i in (1..indices.len()).rev() {
        let j = rng.gen_range(0..=i);
        indices.swap(i, j);
    }
    indices.truncate(subsample_cap);

    let row = |i: usize| &vectors[i * dim..(i + 1) * dim];

    // k-means++ seeding.
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k1);
    centroids.push(row(indices[rng.gen_range(0..indices.len())]).to_vec());
    let mut d2: Vec<f32> = indices.iter().map(|&i| squared_l2(row(i), &centroids[0])).collect();
    while centroids.len() < k1 {
        let total: f32 = d2.iter().sum();
        let pick = if total <= 0.0 {
            rng.gen_range(0..indices.len())
        } else {
            let target = rng.gen::<f32>() * total;
            let mut acc = 0.0;
            let mut chosen = indices.len() - 1;
            for (i, &d) in d2.iter().enumerate() {
                acc += d;
                if acc >= target {
                    chosen = i;
                    break;
                }
            }
            chosen
        };
        let new_centroid = row(indices[pick]).to_vec();
        for (slot, &i) in d2.iter_mut().zip(indices.iter()) {
            *slot = slot.min(squared_l2(row(i), &new_centroid));
        }
        centroids.push(new_centroid);
    }

    // Lloyd refinement.
    for _ in 0..iters {
        let mut sums = vec![vec![0f32; dim]; k1];
        let mut counts = vec![0usize; k1];
        for &i in &indices {
            let v = row(i);
            let mut best = 0usize;
            let mut best_dist = f32::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = squared_l2(v, centroid);
                if d < best_dist {
                    best_dist = d;
                    best = c;
                }
            }
            counts[best] += 1;
            for (s, &x) in sums[best].iter_mut().zip(v.iter()) {
                *s += x;
            }
        }
        for c in 0..k1 {
            if counts[c] > 0 {
                for (s, slot) in sums[c].iter().zip(centroids[c].iter_mut()) {
                    *slot = s / counts[c] as f32;
                }
            }
        }
    }

    let flat: Vec<f32> = centroids.iter().flatten().copied().collect();
    let norms: Vec<f32> = centroids.iter().map(|c| c.iter().map(|x| x * x).sum()).collect();
    (flat, norms)
}

/// Assign `vector` to its nearest centroid (host-side quantiser used by
/// `add` sharding, spec.md §4.7).
pub fn nearest_centroid(vector: &[f32], centroids: &[f32], k1: usize, dim: usize) -> usize {
    let mut best = 0usize;
    let mut best_dist = f32::INFINITY;
    for c in 0..k1 {
        let d = squared_l2(vector, &centroids[c * dim..(c + 1) * dim]);
        if d < best_dist {
            best_dist = d;
            best = c;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kmeans_recovers_well_separated_clusters() {
        let dim = 4;
        let mut vectors = Vec::new();
        for _ in 0..50 {
            vectors.extend_from_slice(&[0.0, 0.0, 0.0, 0.0]);
        }
        for _ in 0..50 {
            vectors.extend_from_slice(&[10.0, 10.0, 10.0, 10.0]);
        }
        let (centroids, norms) = train_kmeans(&vectors, 100, dim, 2, 60, 10, 1234);
        assert_eq!(centroids.len(), 2 * dim);
        assert_eq!(norms.len(), 2);
        let near_zero = centroids[0..dim].iter().map(|v| v.abs()).sum::<f32>()
            < centroids[dim..2 * dim].iter().map(|v| v.abs()).sum::<f32>();
        // one centroid should land near each cluster, in either order
        let a: f32 = centroids[0..dim].iter().sum();
        let b: f32 = centroids[dim..2 * dim].iter().sum();
        assert!((a.min(b)) < 2.0);
        assert!((a.max(b)) > 30.0);
        let _ = near_zero;
    }

    #[test]
    fn nearest_centroid_picks_closest() {
        let centroids = vec![0.0, 0.0, 10.0, 10.0];
        assert_eq!(nearest_centroid(&[0.5, 0.5], &centroids, 2, 2), 0);
        assert_eq!(nearest_centroid(&[9.5, 9.5], &centroids, 2, 2), 1);
    }
}
