//! End-to-end scenarios and the quantified invariants from spec.md §8.
//! S2/S3/S5 run at a scaled-down N/nlist here to keep the suite fast;
//! each has an `#[ignore]`'d sibling documenting the literal spec
//! parameters for anyone running the slow suite.

use ivf_config::EngineConfig;
use ivf_index::variants::{CenteringTransform, FlatIndex, Int8FlatIndex, IndexVariant, IvfPqIndex, IvfSq8Index, PreTransformIndex};
use ivf_index::{create_index, index_cpu_to_device, index_device_to_cpu, multi_search, IndexDescriptor, Orchestrator};
use ivf_types::{CodeKind, Metric, SENTINEL_ID};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn uniform_vectors(n: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * dim).map(|_| rng.gen::<f32>()).collect()
}

fn int8_vectors(n: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * dim).map(|_| rng.gen_range(-128..=127) as f32).collect()
}

// S1 — Flat-L2 self-query (scaled: D=16, N=200 in place of D=128, N=10000).
#[test]
fn s1_flat_l2_self_query() {
    let config = EngineConfig::default();
    let dim = 16;
    let n = 200;
    let idx = FlatIndex::new(&config, dim, Metric::L2).unwrap();
    let vectors = uniform_vectors(n, dim, 1234);
    let ids: Vec<u32> = (0..n as u32).collect();
    idx.add_with_ids(&vectors, n, &ids).unwrap();

    for i in 0..10 {
        let query = &vectors[i * dim..(i + 1) * dim];
        let (dist, ids_out) = idx.search(query, 1, 1).unwrap();
        assert_eq!(ids_out[0], i as u32);
        assert!(dist[0] < 1e-3);
    }
}

#[test]
#[ignore = "literal spec parameters (D=128, N=10000); slow"]
fn s1_flat_l2_self_query_full_scale() {
    let config = EngineConfig::default();
    let dim = 128;
    let n = 10_000;
    let idx = FlatIndex::new(&config, dim, Metric::L2).unwrap();
    let vectors = uniform_vectors(n, dim, 1234);
    let ids: Vec<u32> = (0..n as u32).collect();
    idx.add_with_ids(&vectors, n, &ids).unwrap();
    for i in 0..10 {
        let query = &vectors[i * dim..(i + 1) * dim];
        let (dist, ids_out) = idx.search(query, 1, 1).unwrap();
        assert_eq!(ids_out[0], i as u32);
        assert!(dist[0] < 1e-3);
    }
}

// S2 — IVF-SQ8-L2 (scaled: D=64, N=2000, nlist=16, nprobe=8 in place of
// N=200000, nlist=1024, nprobe=64).
#[test]
fn s2_ivf_sq8_train_add_search_then_remove_range() {
    let config = EngineConfig::default();
    let dim = 64;
    let n = 2000;
    let idx = IvfSq8Index::new(&config, dim, Metric::L2, 16).unwrap();
    let vectors = uniform_vectors(n, dim, 1234);
    idx.train(&vectors, n).unwrap();
    let ids: Vec<u32> = (0..n as u32).collect();
    idx.add_with_ids(&vectors, n, &ids).unwrap();
    idx.set_nprobe(8).unwrap();

    for i in 3..10 {
        let query = &vectors[i * dim..(i + 1) * dim];
        let (_dist, ids_out) = idx.search(query, 1, 1).unwrap();
        assert_eq!(ids_out[0], i as u32);
    }

    let removed = idx.remove_range_ids(0, 2).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(idx.ntotal(), n as u64 - 2);

    for i in 3..10 {
        let query = &vectors[i * dim..(i + 1) * dim];
        let (_dist, ids_out) = idx.search(query, 1, 5).unwrap();
        assert!(!ids_out.contains(&0) && !ids_out.contains(&1));
    }
}

#[test]
#[ignore = "literal spec parameters (D=64, N=200000, nlist=1024, nprobe=64); slow"]
fn s2_ivf_sq8_full_scale() {
    let config = EngineConfig::default();
    let dim = 64;
    let n = 200_000;
    let idx = IvfSq8Index::new(&config, dim, Metric::L2, 1024).unwrap();
    let vectors = uniform_vectors(n, dim, 1234);
    idx.train(&vectors, n).unwrap();
    let ids: Vec<u32> = (0..n as u32).collect();
    idx.add_with_ids(&vectors, n, &ids).unwrap();
    idx.set_nprobe(64).unwrap();
    for i in 3..10 {
        let query = &vectors[i * dim..(i + 1) * dim];
        let (_dist, ids_out) = idx.search(query, 1, 1).unwrap();
        assert_eq!(ids_out[0], i as u32);
    }
    idx.remove_range_ids(0, 2).unwrap();
    assert_eq!(idx.ntotal(), n as u64 - 2);
}

// S3 — IVF-PQ (scaled: D=128, N=2000, nlist=32, M=32, nprobe=8 in place
// of N=200000, nlist=2048, nprobe=64).
#[test]
fn s3_ivf_pq_train_add_search() {
    let config = EngineConfig::default();
    let dim = 128;
    let n = 2000;
    let idx = IvfPqIndex::new(&config, dim, Metric::L2, 32, 32).unwrap();
    let vectors = uniform_vectors(n, dim, 1234);
    idx.train(&vectors, n).unwrap();
    let ids: Vec<u32> = (0..n as u32).collect();
    idx.add_with_ids(&vectors, n, &ids).unwrap();
    idx.set_nprobe(8).unwrap();

    for i in 3..10 {
        let query = &vectors[i * dim..(i + 1) * dim];
        let (_dist, ids_out) = idx.search(query, 1, 1).unwrap();
        assert_eq!(ids_out[0], i as u32);
    }
}

#[test]
#[ignore = "literal spec parameters (D=128, N=200000, nlist=2048, M=32, nprobe=64); slow"]
fn s3_ivf_pq_full_scale() {
    let config = EngineConfig::default();
    let dim = 128;
    let n = 200_000;
    let idx = IvfPqIndex::new(&config, dim, Metric::L2, 2048, 32).unwrap();
    let vectors = uniform_vectors(n, dim, 1234);
    idx.train(&vectors, n).unwrap();
    let ids: Vec<u32> = (0..n as u32).collect();
    idx.add_with_ids(&vectors, n, &ids).unwrap();
    idx.set_nprobe(64).unwrap();
    for i in 3..10 {
        let query = &vectors[i * dim..(i + 1) * dim];
        let (_dist, ids_out) = idx.search(query, 1, 1).unwrap();
        assert_eq!(ids_out[0], i as u32);
    }
}

// S4 — Int8-Flat-Cosine (scaled: N=2000 in place of N=250000).
#[test]
fn s4_int8_flat_cosine_self_query_then_delete_range() {
    let config = EngineConfig::default();
    let dim = 512;
    let n = 2000;
    let idx = Int8FlatIndex::new(&config, dim, 1).unwrap();
    let vectors = int8_vectors(n, dim, 1234);
    let ids: Vec<u32> = (0..n as u32).collect();
    idx.add_with_ids(&vectors, n, &ids).unwrap();

    for i in 0..10 {
        let query = &vectors[i * dim..(i + 1) * dim];
        let (_dist, ids_out) = idx.search(query, 1, 1).unwrap();
        assert_eq!(ids_out[0], i as u32);
    }

    let removed = idx.remove_range_ids(6, 10).unwrap();
    assert_eq!(removed, 4);

    for i in 0..10 {
        let query = &vectors[i * dim..(i + 1) * dim];
        let (_dist, ids_out) = idx.search(query, 1, 5).unwrap();
        for victim in 6..10u32 {
            assert!(!ids_out.contains(&victim));
        }
        if i < 6 {
            assert_eq!(ids_out[0], i as u32);
        }
    }
}

// S5 — Pre-transform(centering) + IVF-SQ8 (scaled: D=64, nlist=64,
// nprobe=8, N=600 in place of PCA 512->128, nlist=16384, N=200000).
// The teacher's transform (centering) doesn't change dimensionality,
// so this exercises the composite training/delegation contract rather
// than a literal PCA projection.
#[test]
fn s5_pretransform_ivf_sq8_train_add_search_then_remove_range() {
    let config = EngineConfig::default();
    let dim = 64;
    let n = 600;
    let inner = Box::new(IvfSq8Index::new(&config, dim, Metric::L2, 64).unwrap());
    let idx = PreTransformIndex::new(Box::new(CenteringTransform::new()), inner);
    let vectors = uniform_vectors(n, dim, 1234);
    idx.train(&vectors, n).unwrap();
    assert!(idx.is_trained());
    let ids: Vec<u32> = (0..n as u32).collect();
    idx.add_with_ids(&vectors, n, &ids).unwrap();
    idx.set_nprobe(8).unwrap();

    for i in 3..20 {
        let query = &vectors[i * dim..(i + 1) * dim];
        let (_dist, ids_out) = idx.search(query, 1, 1).unwrap();
        assert_eq!(ids_out[0], i as u32);
    }

    let removed = idx.remove_range_ids(0, 2).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(idx.ntotal(), n as u64 - 2);
    for i in 3..20 {
        let query = &vectors[i * dim..(i + 1) * dim];
        let (_dist, ids_out) = idx.search(query, 1, 5).unwrap();
        assert!(!ids_out.contains(&0) && !ids_out.contains(&1));
    }
}

// S6 — Multi-index Int8 batched search (scaled: 3 indexes x N=200 x
// D=64 in place of 10 indexes x N=100000 x D=64).
#[test]
fn s6_multi_index_batched_search_matches_independent_search() {
    let config = EngineConfig::default();
    let dim = 64;
    let n = 200;
    let num_indexes = 3;

    let indexes: Vec<Int8FlatIndex> = (0..num_indexes)
        .map(|j| {
            let idx = Int8FlatIndex::new(&config, dim, 1).unwrap();
            let vectors = int8_vectors(n, dim, 1000 + j as u64);
            let ids: Vec<u32> = (0..n as u32).collect();
            idx.add_with_ids(&vectors, n, &ids).unwrap();
            idx
        })
        .collect();
    let refs: Vec<&dyn IndexVariant> = indexes.iter().map(|i| i as &dyn IndexVariant).collect();

    for &num_queries in &[1usize, 2, 4, 8] {
        let queries = int8_vectors(num_queries, dim, 42);
        let result = multi_search(&refs, &queries, num_queries, 1, None).unwrap();
        for qi in 0..num_queries {
            for (mi, idx) in indexes.iter().enumerate() {
                let query = &queries[qi * dim..(qi + 1) * dim];
                let (dist, ids) = idx.search(query, 1, 1).unwrap();
                assert_eq!(result.ids[qi][mi][0], ids[0]);
                assert_eq!(result.distances[qi][mi][0], dist[0]);
            }
        }
    }
}

// --- Quantified invariants (spec.md §8) ---

fn config_with_devices(num: usize) -> EngineConfig {
    let mut c = EngineConfig::default();
    c.devices = (0..num as u32).collect();
    c.topk_pool_threads = num.max(1).min(4);
    c
}

#[test]
fn invariant_codes_ids_length_agreement_per_list() {
    let cfg = config_with_devices(2);
    let dim = 16;
    let orch = Orchestrator::new(&cfg, dim, Metric::L2, CodeKind::Fp16Flat, 4).unwrap();
    orch.push_centroids(&vec![0.0f32; dim * 4]).unwrap();
    let n = 20;
    let mut codes = Vec::new();
    for i in 0..n {
        let row: Vec<half::f16> = (0..dim).map(|d| half::f16::from_f32((i * dim + d) as f32 * 0.01)).collect();
        codes.extend(bytemuck::cast_slice::<half::f16, u8>(&row));
    }
    let ids: Vec<u32> = (0..n as u32).collect();
    let list_ids: Vec<usize> = (0..n).map(|i| i % 4).collect();
    orch.add_with_ids(&codes, dim * 2, &ids, &list_ids).unwrap();

    for list_id in 0..4 {
        let (list_codes, list_ids_out) = orch.get_list_codes(list_id).unwrap();
        assert_eq!(list_codes.len(), list_ids_out.len() * dim * 2);
    }
}

#[test]
fn invariant_ntotal_equals_sum_of_list_lengths() {
    let cfg = config_with_devices(1);
    let dim = 16;
    let orch = Orchestrator::new(&cfg, dim, Metric::L2, CodeKind::Fp16Flat, 3).unwrap();
    orch.push_centroids(&vec![0.0f32; dim * 3]).unwrap();
    let n = 9;
    let codes = vec![0u8; n * dim * 2];
    let ids: Vec<u32> = (0..n as u32).collect();
    let list_ids: Vec<usize> = (0..n).map(|i| i % 3).collect();
    orch.add_with_ids(&codes, dim * 2, &ids, &list_ids).unwrap();

    let sum: u64 = (0..3).map(|l| orch.get_list_length(l).unwrap()).sum();
    assert_eq!(sum, orch.ntotal());
}

#[test]
fn invariant_add_increases_ntotal_by_exactly_n_and_preserves_id_set() {
    let config = EngineConfig::default();
    let idx = FlatIndex::new(&config, 16, Metric::L2).unwrap();
    let before = idx.ntotal();
    let n = 7;
    let vectors = uniform_vectors(n, 16, 99);
    let ids: Vec<u32> = vec![100, 101, 102, 103, 104, 105, 106];
    idx.add_with_ids(&vectors, n, &ids).unwrap();
    assert_eq!(idx.ntotal(), before + n as u64);

    let lists = idx.export_lists().unwrap();
    let mut seen: Vec<u32> = lists.into_iter().flat_map(|(_, ids)| ids).collect();
    seen.sort();
    let mut expected = ids.clone();
    expected.sort();
    assert_eq!(seen, expected);
}

#[test]
fn invariant_remove_decreases_ntotal_and_drops_matched_ids() {
    let config = EngineConfig::default();
    let idx = FlatIndex::new(&config, 16, Metric::L2).unwrap();
    let vectors = uniform_vectors(5, 16, 7);
    idx.add_with_ids(&vectors, 5, &[1, 2, 3, 4, 5]).unwrap();

    let removed = idx.remove_ids(vec![2, 4]).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(idx.ntotal(), 3);

    let lists = idx.export_lists().unwrap();
    let surviving: Vec<u32> = lists.into_iter().flat_map(|(_, ids)| ids).collect();
    assert!(!surviving.contains(&2) && !surviving.contains(&4));
}

#[test]
fn invariant_round_trip_through_cpu_form_preserves_search() {
    let config = EngineConfig::default();
    let descriptor = IndexDescriptor::IvfSq8 { dim: 32, metric: Metric::L2, nlist: 4 };
    let idx = create_index(&config, descriptor.clone()).unwrap();
    let vectors = uniform_vectors(64, 32, 11);
    idx.train(&vectors, 64).unwrap();
    let ids: Vec<u32> = (0..64u32).collect();
    idx.add_with_ids(&vectors, 64, &ids).unwrap();

    let cpu = index_device_to_cpu(idx.as_ref(), descriptor).unwrap();
    let rebuilt = index_cpu_to_device(&config, &cpu).unwrap();

    let query = &vectors[0..32];
    let (dist_a, ids_a) = idx.search(query, 1, 5).unwrap();
    let (dist_b, ids_b) = rebuilt.search(query, 1, 5).unwrap();
    assert_eq!(ids_a, ids_b);
    assert_eq!(dist_a, dist_b);
}

#[test]
fn invariant_reset_is_idempotent() {
    let config = EngineConfig::default();
    let idx = FlatIndex::new(&config, 16, Metric::L2).unwrap();
    let vectors = uniform_vectors(4, 16, 3);
    idx.add_with_ids(&vectors, 4, &[1, 2, 3, 4]).unwrap();
    idx.reset().unwrap();
    idx.reset().unwrap();
    assert_eq!(idx.ntotal(), 0);
    assert_eq!(idx.export_lists().unwrap()[0].1.len(), 0);
}

#[test]
fn invariant_paging_idempotence() {
    let cfg = config_with_devices(1);
    let dim = 16;
    let n = 40;
    let row_codes: Vec<u8> = {
        let mut codes = Vec::new();
        for i in 0..n {
            let row: Vec<half::f16> = (0..dim).map(|d| half::f16::from_f32((i * dim + d) as f32 * 0.01)).collect();
            codes.extend(bytemuck::cast_slice::<half::f16, u8>(&row));
        }
        codes
    };
    let ids: Vec<u32> = (0..n as u32).collect();
    let list_ids = vec![0usize; n];

    let mut cfg_whole = cfg.clone();
    cfg_whole.max_request_vectors = 1_000_000;
    let whole = Orchestrator::new(&cfg_whole, dim, Metric::L2, CodeKind::Fp16Flat, 1).unwrap();
    whole.add_with_ids(&row_codes, dim * 2, &ids, &list_ids).unwrap();

    let mut cfg_paged = cfg.clone();
    cfg_paged.max_request_vectors = 6;
    let paged = Orchestrator::new(&cfg_paged, dim, Metric::L2, CodeKind::Fp16Flat, 1).unwrap();
    paged.add_with_ids(&row_codes, dim * 2, &ids, &list_ids).unwrap();

    let (whole_codes, whole_ids) = whole.get_list_codes(0).unwrap();
    let (paged_codes, paged_ids) = paged.get_list_codes(0).unwrap();
    assert_eq!(whole_ids, paged_ids);
    assert_eq!(whole_codes, paged_codes);
}

// --- Boundary tests ---

#[test]
fn boundary_search_with_zero_queries_short_circuits() {
    let config = EngineConfig::default();
    let idx = FlatIndex::new(&config, 16, Metric::L2).unwrap();
    let (dist, ids) = idx.search(&[], 0, 5).unwrap();
    assert!(dist.is_empty() && ids.is_empty());
}

#[test]
fn boundary_k_greater_than_ntotal_pads_with_sentinel() {
    let config = EngineConfig::default();
    let idx = FlatIndex::new(&config, 16, Metric::L2).unwrap();
    idx.add_with_ids(&uniform_vectors(2, 16, 1), 2, &[1, 2]).unwrap();
    let (dist, ids) = idx.search(&uniform_vectors(1, 16, 1), 1, 5).unwrap();
    assert_eq!(ids[2], SENTINEL_ID);
    assert_eq!(dist[2], f32::INFINITY);
}

#[test]
fn boundary_add_of_zero_vectors_is_noop() {
    let config = EngineConfig::default();
    let idx = FlatIndex::new(&config, 16, Metric::L2).unwrap();
    idx.add_with_ids(&[], 0, &[]).unwrap();
    assert_eq!(idx.ntotal(), 0);
}

#[test]
fn boundary_remove_matching_nothing_returns_zero() {
    let config = EngineConfig::default();
    let idx = FlatIndex::new(&config, 16, Metric::L2).unwrap();
    idx.add_with_ids(&uniform_vectors(2, 16, 1), 2, &[1, 2]).unwrap();
    let removed = idx.remove_ids(vec![999]).unwrap();
    assert_eq!(removed, 0);
    assert_eq!(idx.ntotal(), 2);
}
