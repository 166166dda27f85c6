//! C6: Device Distance + Top-K Engine.
//!
//! Grounded on `original_source/.../impl/IndexIVF.cpp::search` (coarse
//! scan → probe selection → per-list scan → heap merge) and
//! `utils/TopkOp.h`/`HeapSort.h` for the bounded top-K shape. The
//! per-tile flag/burst-extrema machinery of the real kernel is folded
//! into a single synchronous pass here (see `device.rs` for where a
//! [`crate::flags::CompletionToken`] wraps each stage for the hardware
//! case); the ordering contract — ties broken by visit order, sentinel
//! padding for short lists — is preserved exactly.

use ivf_distance::{int8, pq::PqCentroids, scalar, sq8};
use ivf_types::{Metric, Neighbor, UserId};

use crate::store::InvertedList;

/// Parameters needed to score one code row against a query, beyond the
/// raw bytes themselves.
pub enum Kernel<'a> {
    Fp16Flat,
    Sq8 { vmin: &'a [half::f16], vdiff: &'a [half::f16] },
    Pq { centroids: &'a PqCentroids },
    Int8Cos { use_mask: Option<&'a int8::BitSet> },
}

/// Score every vector in `list` against `query`, returning unordered
/// (distance, id) candidates. `list`'s codes are Zz-tiled; this walks
/// logical rows via [`InvertedList::code_row`].
pub fn scan_list(query: &[f32], list: &InvertedList, metric: Metric, kernel: &Kernel) -> Vec<(f32, UserId)> {
    let mut out = Vec::with_capacity(list.len());
    for row in 0..list.len() {
        let code = list.code_row(row);
        let id = list.ids()[row];
        let dist = match kernel {
            Kernel::Fp16Flat => {
                let reconstructed = ivf_distance::from_fp16(unsafe {
                    std::slice::from_raw_parts(code.as_ptr() as *const half::f16, code.len() / 2)
                });
                match metric {
                    Metric::L2 => scalar::squared_l2(query, &reconstructed),
                    Metric::InnerProduct => scalar::inner_product(query, &reconstructed),
                }
            }
            Kernel::Sq8 { vmin, vdiff } => {
                let norm_sq = list.precompute().map(|p| p[row]);
                match metric {
                    Metric::L2 => {
                        let norm_sq = norm_sq.unwrap_or_else(|| sq8::reconstructed_norm_sq(&code, vmin, vdiff));
                        sq8::squared_l2(query, &code, vmin, vdiff, norm_sq)
                    }
                    Metric::InnerProduct => sq8::inner_product(query, &code, vmin, vdiff),
                }
            }
            Kernel::Pq { centroids } => {
                let table = centroids.build_lookup_table(query);
                PqCentroids::distance_from_table(&table, &code)
            }
            Kernel::Int8Cos { use_mask } => {
                if let Some(mask) = use_mask {
                    if !mask.get(row) {
                        continue;
                    }
                }
                let query_i8: Vec<i8> = query.iter().map(|&v| v.round().clamp(-128.0, 127.0) as i8).collect();
                let code_i8: &[i8] = bytemuck::cast_slice(&code);
                int8::dot(&query_i8, code_i8) as f32
            }
        };
        out.push((dist, id));
    }
    out
}

/// Coarse L1 scan: an (n x k1) distance matrix between queries and
/// tiled coarse centroids (stored here as plain row-major f32 for the
/// reference device; a real device keeps them in the 4-D cube shape).
pub fn coarse_scan(queries: &[f32], n: usize, dim: usize, centroids: &[f32], k1: usize, metric: Metric) -> Vec<f32> {
    let mut out = vec![0.0f32; n * k1];
    for qi in 0..n {
        let q = &queries[qi * dim..(qi + 1) * dim];
        for ci in 0..k1 {
            let c = &centroids[ci * dim..(ci + 1) * dim];
            out[qi * k1 + ci] = match metric {
                Metric::L2 => scalar::squared_l2(q, c),
                Metric::InnerProduct => scalar::inner_product(q, c),
            };
        }
    }
    out
}

/// The best `nprobe` list ids for one query's coarse-distance row,
/// ties broken by lowest list id (stable visit order).
pub fn select_nprobe(row: &[f32], nprobe: usize, metric: Metric) -> Vec<usize> {
    let mut indexed: Vec<(f32, usize)> = row.iter().copied().zip(0..).collect();
    indexed.sort_by(|a, b| match metric {
        Metric::L2 => a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)),
        Metric::InnerProduct => b.0.partial_cmp(&a.0).unwrap().then(a.1.cmp(&b.1)),
    });
    indexed.into_iter().take(nprobe.min(row.len())).map(|(_, i)| i).collect()
}

/// Merge candidates from (possibly many) lists into the final top-K for
/// one query: strict improvement only survives a tie at the boundary
/// (spec.md §9's Flat-IP resolution — first write wins).
pub fn merge_topk(candidates: Vec<(f32, UserId)>, k: usize, metric: Metric) -> Vec<Neighbor> {
    let mut heap: Vec<(f32, UserId)> = Vec::with_capacity(k);
    let better = |a: f32, b: f32| metric.is_better(a, b);

    for (dist, id) in candidates {
        if heap.len() < k {
            heap.push((dist, id));
        } else {
            let worst_idx = heap
                .iter()
                .enumerate()
                .max_by(|a, b| match metric {
                    Metric::L2 => a.1 .0.partial_cmp(&b.1 .0).unwrap(),
                    Metric::InnerProduct => b.1 .0.partial_cmp(&a.1 .0).unwrap(),
                })
                .map(|(i, _)| i)
                .unwrap();
            // Strict improvement only: ties at the boundary never evict
            // the incumbent (spec.md §9's Flat-IP resolution).
            if better(dist, heap[worst_idx].0) {
                heap[worst_idx] = (dist, id);
            }
        }
    }
    metric.sort_best_first(&mut heap);
    let mut out: Vec<Neighbor> = heap
        .into_iter()
        .map(|(distance, id)| Neighbor { distance, id })
        .collect();
    while out.len() < k {
        out.push(Neighbor::sentinel(metric));
    }
    out
}
