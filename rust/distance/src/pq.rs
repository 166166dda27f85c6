//! Product quantisation: centroid table, encode, and the
//! lookup-table-then-sum distance kernel, grounded on
//! `original_source/ascendfaiss/ascend/AscendIndexIVFSQ.cpp`'s sibling
//! PQ path and the generic faiss PQ algorithm spec.md §3/§4.8 describe.

use half::f16;

/// `m` sub-quantisers, 256 centroids each, `dims_per_sub = d / m` values
/// per centroid, stored half-precision (spec.md §3).
#[derive(Clone, Debug)]
pub struct PqCentroids {
    pub m: usize,
    pub dims_per_sub: usize,
    /// Flattened as `[sub][centroid][dim]`, `m * 256 * dims_per_sub` f16s.
    pub data: Vec<f16>,
}

impl PqCentroids {
    pub fn new(m: usize, dims_per_sub: usize) -> Self {
        PqCentroids {
            m,
            dims_per_sub,
            data: vec![f16::from_f32(0.0); m * 256 * dims_per_sub],
        }
    }

    fn centroid(&self, sub: usize, code: u8) -> &[f16] {
        let start = (sub * 256 + code as usize) * self.dims_per_sub;
        &self.data[start..start + self.dims_per_sub]
    }

    /// Encode one vector: for each sub-quantiser, the nearest centroid id.
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        (0..self.m)
            .map(|sub| {
                let sub_vec = &vector[sub * self.dims_per_sub..(sub + 1) * self.dims_per_sub];
                let mut best = 0u8;
                let mut best_dist = f32::INFINITY;
                for code in 0..=255u8 {
                    let c = self.centroid(sub, code);
                    let d: f32 = sub_vec
                        .iter()
                        .zip(c.iter())
                        .map(|(a, b)| {
                            let diff = a - b.to_f32();
                            diff * diff
                        })
                        .sum();
                    if d < best_dist {
                        best_dist = d;
                        best = code;
                    }
                }
                best
            })
            .collect()
    }

    /// Build the `m x 256` squared-L2 lookup table for one query: the
    /// distance kernel sums one table entry per code byte instead of
    /// reconstructing the full vector, per spec.md §4.8.
    pub fn build_lookup_table(&self, query: &[f32]) -> Vec<f32> {
        let mut table = vec![0f32; self.m * 256];
        for sub in 0..self.m {
            let sub_vec = &query[sub * self.dims_per_sub..(sub + 1) * self.dims_per_sub];
            for code in 0..=255u8 {
                let c = self.centroid(sub, code);
                let d: f32 = sub_vec
                    .iter()
                    .zip(c.iter())
                    .map(|(a, b)| {
                        let diff = a - b.to_f32();
                        diff * diff
                    })
                    .sum();
                table[sub * 256 + code as usize] = d;
            }
        }
        table
    }

    /// Sum the per-sub-quantiser table entries named by `code`.
    pub fn distance_from_table(table: &[f32], code: &[u8]) -> f32 {
        code.iter()
            .enumerate()
            .map(|(sub, &c)| table[sub * 256 + c as usize])
            .sum()
    }

    /// Train by running a small k-means per sub-quantiser over `samples`.
    pub fn train(m: usize, dims_per_sub: usize, samples: &[Vec<f32>], iters: usize, seed: u64) -> Self {
        use rand::{rngs::StdRng, Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(seed);
        let mut data = vec![f16::from_f32(0.0); m * 256 * dims_per_sub];

        for sub in 0..m {
            let sub_samples: Vec<&[f32]> = samples
                .iter()
                .map(|v| &v[sub * dims_per_sub..(sub + 1) * dims_per_sub])
                .collect();
            if sub_samples.is_empty() {
                continue;
            }
            let mut centroids: Vec<Vec<f32>> = (0..256)
                .map(|_| sub_samples[rng.gen_range(0..sub_samples.len())].to_vec())
                .collect();

            for _ in 0..iters {
                let mut sums = vec![vec![0f32; dims_per_sub]; 256];
                let mut counts = vec![0usize; 256];
                for v in &sub_samples {
                    let mut best = 0usize;
                    let mut best_dist = f32::INFINITY;
                    for (ci, c) in centroids.iter().enumerate() {
                        let d: f32 = v.iter().zip(c.iter()).map(|(a, b)| (a - b) * (a - b)).sum();
                        if d < best_dist {
                            best_dist = d;
                            best = ci;
                        }
                    }
                    counts[best] += 1;
                    for i in 0..dims_per_sub {
                        sums[best][i] += v[i];
                    }
                }
                for c in 0..256 {
                    if counts[c] > 0 {
                        for i in 0..dims_per_sub {
                            centroids[c][i] = sums[c][i] / counts[c] as f32;
                        }
                    }
                }
            }

            for (code, c) in centroids.into_iter().enumerate() {
                let start = (sub * 256 + code) * dims_per_sub;
                for (i, v) in c.into_iter().enumerate() {
                    data[start + i] = f16::from_f32(v);
                }
            }
        }

        PqCentroids { m, dims_per_sub, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_table_matches_direct_computation() {
        let pq = PqCentroids::train(
            4,
            4,
            &(0..64)
                .map(|i| (0..16).map(|j| (i * 16 + j) as f32 * 0.01).collect())
                .collect::<Vec<_>>(),
            3,
            42,
        );
        let query: Vec<f32> = (0..16).map(|i| i as f32 * 0.02).collect();
        let code = pq.encode(&query);
        let table = pq.build_lookup_table(&query);
        let fast = PqCentroids::distance_from_table(&table, &code);

        let mut direct = 0f32;
        for sub in 0..4 {
            let c = pq.centroid(sub, code[sub]);
            let sub_q = &query[sub * 4..(sub + 1) * 4];
            direct += sub_q
                .iter()
                .zip(c.iter())
                .map(|(a, b)| {
                    let d = a - b.to_f32();
                    d * d
                })
                .sum::<f32>();
        }
        assert!((fast - direct).abs() < 1e-4, "{fast} vs {direct}");
    }
}
