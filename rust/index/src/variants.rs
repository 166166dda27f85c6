//! The index variants from spec.md §4.8, expressed as implementors of
//! one `IndexVariant` trait object rather than a C++ class hierarchy
//! with `dynamic_cast`, per spec.md §9. Each variant is grounded
//! file-for-file on its `original_source/ascendfaiss/ascend/AscendIndex*.cpp`
//! counterpart; all six share the same `Orchestrator` beneath them,
//! since a Flat index is simply `nlist == 1` (see `DESIGN.md`).

use std::sync::atomic::{AtomicBool, Ordering};

use ivf_config::EngineConfig;
use ivf_distance::pq::PqCentroids;
use ivf_distance::{sq8, to_fp16};
use ivf_error::EngineError;
use ivf_types::{validate_finite, CodeKind, Metric, UserId};
use parking_lot::Mutex;

use crate::orchestrator::Orchestrator;
use crate::training::{nearest_centroid, train_kmeans};

/// Common surface every concrete index variant implements, so the host
/// library can hold `Box<dyn IndexVariant>` without knowing which
/// on-device code encoding backs it (spec.md §9's tagged-union
/// replacement for the original class hierarchy).
pub trait IndexVariant: Send + Sync {
    fn dimension(&self) -> usize;
    fn metric(&self) -> Metric;
    fn is_trained(&self) -> bool;
    fn ntotal(&self) -> u64;
    fn train(&self, vectors: &[f32], n: usize) -> Result<(), EngineError>;
    fn add_with_ids(&self, vectors: &[f32], n: usize, ids: &[UserId]) -> Result<(), EngineError>;
    fn search(&self, queries: &[f32], n: usize, k: usize) -> Result<(Vec<f32>, Vec<UserId>), EngineError>;
    fn remove_ids(&self, ids: Vec<UserId>) -> Result<u64, EngineError>;
    fn remove_range_ids(&self, min: UserId, max: UserId) -> Result<u64, EngineError>;
    fn reset(&self) -> Result<(), EngineError>;
    fn reserve_memory(&self, n_vectors: u64) -> Result<(), EngineError>;
    fn reclaim_memory(&self) -> Result<u64, EngineError>;
    fn set_nprobe(&self, nprobe: usize) -> Result<(), EngineError>;

    /// Dump every list's raw on-device codes/ids, for `CpuIndex`
    /// persistence (spec.md §6). Unsupported by default; overridden by
    /// every variant backed directly by an `Orchestrator`.
    fn export_lists(&self) -> Result<Vec<(Vec<u8>, Vec<u32>)>, EngineError> {
        Err(EngineError::unsupported("this index does not support raw export"))
    }

    /// Re-add previously exported per-list raw codes. Training
    /// parameters must already be pushed (`train` or the equivalent
    /// manual `push_*` calls) before this is called.
    fn import_lists(&self, _lists: &[(Vec<u8>, Vec<u32>)]) -> Result<(), EngineError> {
        Err(EngineError::unsupported("this index does not support raw import"))
    }

    /// Flatten whatever training parameters (coarse centroids, SQ
    /// `(vmin, vdiff)`, PQ centroids) this variant holds, for `CpuIndex`
    /// persistence. Empty for variants with nothing to train.
    fn export_trained_blob(&self) -> Vec<f32> {
        Vec::new()
    }

    /// Re-push a previously exported training blob. A no-op for
    /// variants with nothing to train.
    fn import_trained_blob(&self, _blob: &[f32]) -> Result<(), EngineError> {
        Ok(())
    }

    /// `add` without caller-supplied ids: assigns `ntotal()..ntotal()+n`.
    fn add(&self, vectors: &[f32], n: usize) -> Result<(), EngineError> {
        let start = self.ntotal();
        let ids: Vec<UserId> = (0..n as u64).map(|i| (start + i) as UserId).collect();
        self.add_with_ids(vectors, n, &ids)
    }
}

fn check_batch(dim: usize, vectors: &[f32], n: usize) -> Result<(), EngineError> {
    if vectors.len() != n * dim {
        return Err(EngineError::invalid_argument("vector batch shape mismatch"));
    }
    validate_finite(vectors)
}

/// `original_source/.../AscendIndexFlat.cpp`: a flat fp16 index is an
/// IVF index with one list whose coarse centroid never gates anything.
pub struct FlatIndex {
    orch: Orchestrator,
}

impl FlatIndex {
    pub fn new(config: &EngineConfig, dim: usize, metric: Metric) -> Result<Self, EngineError> {
        Ok(FlatIndex { orch: Orchestrator::new(config, dim, metric, CodeKind::Fp16Flat, 1)? })
    }
}

impl IndexVariant for FlatIndex {
    fn dimension(&self) -> usize {
        self.orch.dim()
    }
    fn metric(&self) -> Metric {
        self.orch.metric()
    }
    fn is_trained(&self) -> bool {
        self.orch.is_trained()
    }
    fn ntotal(&self) -> u64 {
        self.orch.ntotal()
    }
    fn train(&self, _vectors: &[f32], _n: usize) -> Result<(), EngineError> {
        Ok(())
    }
    fn add_with_ids(&self, vectors: &[f32], n: usize, ids: &[UserId]) -> Result<(), EngineError> {
        check_batch(self.orch.dim(), vectors, n)?;
        let codes = to_fp16(vectors);
        let bytes = bytemuck::cast_slice::<half::f16, u8>(&codes).to_vec();
        let list_ids = vec![0usize; n];
        self.orch.add_with_ids(&bytes, self.orch.dim() * 2, ids, &list_ids)
    }
    fn search(&self, queries: &[f32], n: usize, k: usize) -> Result<(Vec<f32>, Vec<UserId>), EngineError> {
        check_batch(self.orch.dim(), queries, n)?;
        self.orch.search(queries, n, k, &[])
    }
    fn remove_ids(&self, ids: Vec<UserId>) -> Result<u64, EngineError> {
        self.orch.remove_ids(ids)
    }
    fn remove_range_ids(&self, min: UserId, max: UserId) -> Result<u64, EngineError> {
        self.orch.remove_range_ids(min, max)
    }
    fn reset(&self) -> Result<(), EngineError> {
        self.orch.reset()
    }
    fn reserve_memory(&self, n_vectors: u64) -> Result<(), EngineError> {
        self.orch.reserve_memory(n_vectors)
    }
    fn reclaim_memory(&self) -> Result<u64, EngineError> {
        self.orch.reclaim_memory()
    }
    fn set_nprobe(&self, _nprobe: usize) -> Result<(), EngineError> {
        Ok(())
    }
    fn export_lists(&self) -> Result<Vec<(Vec<u8>, Vec<u32>)>, EngineError> {
        self.orch.export_all_lists()
    }
    fn import_lists(&self, lists: &[(Vec<u8>, Vec<u32>)]) -> Result<(), EngineError> {
        self.orch.import_all_lists(lists)
    }
}

/// `AscendIndexIVF.cpp` + `AscendIndexIVFFlat.cpp`: coarse quantiser
/// over fp16 per-vector codes.
pub struct IvfFlatIndex {
    orch: Orchestrator,
    centroids: Mutex<Option<Vec<f32>>>,
    max_points_per_centroid: usize,
}

impl IvfFlatIndex {
    pub fn new(config: &EngineConfig, dim: usize, metric: Metric, nlist: usize) -> Result<Self, EngineError> {
        Ok(IvfFlatIndex {
            orch: Orchestrator::new(config, dim, metric, CodeKind::Fp16Flat, nlist)?,
            centroids: Mutex::new(None),
            max_points_per_centroid: config.max_points_per_centroid,
        })
    }

    fn assign_lists(&self, vectors: &[f32], n: usize) -> Result<Vec<usize>, EngineError> {
        let dim = self.orch.dim();
        let centroids = self.centroids.lock();
        let centroids = centroids.as_ref().ok_or(EngineError::NotTrained)?;
        Ok((0..n).map(|i| nearest_centroid(&vectors[i * dim..(i + 1) * dim], centroids, self.orch.nlist(), dim)).collect())
    }
}

impl IndexVariant for IvfFlatIndex {
    fn dimension(&self) -> usize {
        self.orch.dim()
    }
    fn metric(&self) -> Metric {
        self.orch.metric()
    }
    fn is_trained(&self) -> bool {
        self.orch.is_trained()
    }
    fn ntotal(&self) -> u64 {
        self.orch.ntotal()
    }
    fn train(&self, vectors: &[f32], n: usize) -> Result<(), EngineError> {
        check_batch(self.orch.dim(), vectors, n)?;
        let dim = self.orch.dim();
        let nlist = self.orch.nlist();
        let (centroids, _norms) = train_kmeans(vectors, n, dim, nlist, self.max_points_per_centroid, 15, 1234);
        self.orch.push_centroids(&centroids)?;
        *self.centroids.lock() = Some(centroids);
        Ok(())
    }
    fn add_with_ids(&self, vectors: &[f32], n: usize, ids: &[UserId]) -> Result<(), EngineError> {
        check_batch(self.orch.dim(), vectors, n)?;
        let list_ids = self.assign_lists(vectors, n)?;
        let codes = to_fp16(vectors);
        let bytes = bytemuck::cast_slice::<half::f16, u8>(&codes).to_vec();
        self.orch.add_with_ids(&bytes, self.orch.dim() * 2, ids, &list_ids)
    }
    fn search(&self, queries: &[f32], n: usize, k: usize) -> Result<(Vec<f32>, Vec<UserId>), EngineError> {
        check_batch(self.orch.dim(), queries, n)?;
        self.orch.search(queries, n, k, &[])
    }
    fn remove_ids(&self, ids: Vec<UserId>) -> Result<u64, EngineError> {
        self.orch.remove_ids(ids)
    }
    fn remove_range_ids(&self, min: UserId, max: UserId) -> Result<u64, EngineError> {
        self.orch.remove_range_ids(min, max)
    }
    fn reset(&self) -> Result<(), EngineError> {
        self.orch.reset()
    }
    fn reserve_memory(&self, n_vectors: u64) -> Result<(), EngineError> {
        self.orch.reserve_memory(n_vectors)
    }
    fn reclaim_memory(&self) -> Result<u64, EngineError> {
        self.orch.reclaim_memory()
    }
    fn set_nprobe(&self, nprobe: usize) -> Result<(), EngineError> {
        self.orch.set_nprobe(nprobe)
    }
    fn export_lists(&self) -> Result<Vec<(Vec<u8>, Vec<u32>)>, EngineError> {
        self.orch.export_all_lists()
    }
    fn import_lists(&self, lists: &[(Vec<u8>, Vec<u32>)]) -> Result<(), EngineError> {
        self.orch.import_all_lists(lists)
    }
    fn export_trained_blob(&self) -> Vec<f32> {
        self.centroids.lock().clone().unwrap_or_default()
    }
    fn import_trained_blob(&self, blob: &[f32]) -> Result<(), EngineError> {
        if blob.is_empty() {
            return Ok(());
        }
        self.orch.push_centroids(blob)?;
        *self.centroids.lock() = Some(blob.to_vec());
        Ok(())
    }
}

/// `AscendIndexIVFSQ.cpp`: coarse quantiser plus a per-dimension
/// `(vmin, vdiff)` scalar-quantised code.
pub struct IvfSq8Index {
    orch: Orchestrator,
    centroids: Mutex<Option<Vec<f32>>>,
    sq: Mutex<Option<(Vec<half::f16>, Vec<half::f16>)>>,
    max_points_per_centroid: usize,
}

impl IvfSq8Index {
    pub fn new(config: &EngineConfig, dim: usize, metric: Metric, nlist: usize) -> Result<Self, EngineError> {
        Ok(IvfSq8Index {
            orch: Orchestrator::new(config, dim, metric, CodeKind::Sq8, nlist)?,
            centroids: Mutex::new(None),
            sq: Mutex::new(None),
            max_points_per_centroid: config.max_points_per_centroid,
        })
    }

    fn assign_lists(&self, vectors: &[f32], n: usize) -> Result<Vec<usize>, EngineError> {
        let dim = self.orch.dim();
        if self.orch.nlist() <= 1 {
            return Ok(vec![0; n]);
        }
        let centroids = self.centroids.lock();
        let centroids = centroids.as_ref().ok_or(EngineError::NotTrained)?;
        Ok((0..n).map(|i| nearest_centroid(&vectors[i * dim..(i + 1) * dim], centroids, self.orch.nlist(), dim)).collect())
    }
}

impl IndexVariant for IvfSq8Index {
    fn dimension(&self) -> usize {
        self.orch.dim()
    }
    fn metric(&self) -> Metric {
        self.orch.metric()
    }
    fn is_trained(&self) -> bool {
        self.orch.is_trained()
    }
    fn ntotal(&self) -> u64 {
        self.orch.ntotal()
    }
    fn train(&self, vectors: &[f32], n: usize) -> Result<(), EngineError> {
        check_batch(self.orch.dim(), vectors, n)?;
        let dim = self.orch.dim();
        if self.orch.nlist() > 1 {
            let (centroids, _norms) = train_kmeans(vectors, n, dim, self.orch.nlist(), self.max_points_per_centroid, 15, 1234);
            self.orch.push_centroids(&centroids)?;
            *self.centroids.lock() = Some(centroids);
        }
        let samples: Vec<Vec<f32>> = (0..n).map(|i| vectors[i * dim..(i + 1) * dim].to_vec()).collect();
        let (vmin, vdiff) = sq8::train(&samples, dim);
        let vmin_f32: Vec<f32> = vmin.iter().map(|v| v.to_f32()).collect();
        let vdiff_f32: Vec<f32> = vdiff.iter().map(|v| v.to_f32()).collect();
        self.orch.push_sq(&vmin_f32, &vdiff_f32)?;
        *self.sq.lock() = Some((vmin, vdiff));
        Ok(())
    }
    fn add_with_ids(&self, vectors: &[f32], n: usize, ids: &[UserId]) -> Result<(), EngineError> {
        check_batch(self.orch.dim(), vectors, n)?;
        let dim = self.orch.dim();
        let list_ids = self.assign_lists(vectors, n)?;
        let sq = self.sq.lock();
        let (vmin, vdiff) = sq.as_ref().ok_or(EngineError::NotTrained)?;
        let mut codes = Vec::with_capacity(n * dim);
        for i in 0..n {
            codes.extend(sq8::encode(&vectors[i * dim..(i + 1) * dim], vmin, vdiff));
        }
        self.orch.add_with_ids(&codes, dim, ids, &list_ids)
    }
    fn search(&self, queries: &[f32], n: usize, k: usize) -> Result<(Vec<f32>, Vec<UserId>), EngineError> {
        check_batch(self.orch.dim(), queries, n)?;
        self.orch.search(queries, n, k, &[])
    }
    fn remove_ids(&self, ids: Vec<UserId>) -> Result<u64, EngineError> {
        self.orch.remove_ids(ids)
    }
    fn remove_range_ids(&self, min: UserId, max: UserId) -> Result<u64, EngineError> {
        self.orch.remove_range_ids(min, max)
    }
    fn reset(&self) -> Result<(), EngineError> {
        self.orch.reset()
    }
    fn reserve_memory(&self, n_vectors: u64) -> Result<(), EngineError> {
        self.orch.reserve_memory(n_vectors)
    }
    fn reclaim_memory(&self) -> Result<u64, EngineError> {
        self.orch.reclaim_memory()
    }
    fn set_nprobe(&self, nprobe: usize) -> Result<(), EngineError> {
        self.orch.set_nprobe(nprobe)
    }
    fn export_lists(&self) -> Result<Vec<(Vec<u8>, Vec<u32>)>, EngineError> {
        self.orch.export_all_lists()
    }
    fn import_lists(&self, lists: &[(Vec<u8>, Vec<u32>)]) -> Result<(), EngineError> {
        self.orch.import_all_lists(lists)
    }
    fn export_trained_blob(&self) -> Vec<f32> {
        let mut out = self.centroids.lock().clone().unwrap_or_default();
        if let Some((vmin, vdiff)) = self.sq.lock().as_ref() {
            out.extend(vmin.iter().map(|v| v.to_f32()));
            out.extend(vdiff.iter().map(|v| v.to_f32()));
        }
        out
    }
    fn import_trained_blob(&self, blob: &[f32]) -> Result<(), EngineError> {
        let dim = self.orch.dim();
        let centroid_len = if self.orch.nlist() > 1 { self.orch.nlist() * dim } else { 0 };
        if blob.len() < centroid_len + 2 * dim {
            return Err(EngineError::invalid_argument("trained blob too short for ivf-sq8"));
        }
        if centroid_len > 0 {
            let centroids = &blob[..centroid_len];
            self.orch.push_centroids(centroids)?;
            *self.centroids.lock() = Some(centroids.to_vec());
        }
        let rest = &blob[centroid_len..];
        let vmin_f32 = &rest[..dim];
        let vdiff_f32 = &rest[dim..2 * dim];
        self.orch.push_sq(vmin_f32, vdiff_f32)?;
        let vmin: Vec<half::f16> = vmin_f32.iter().map(|&v| half::f16::from_f32(v)).collect();
        let vdiff: Vec<half::f16> = vdiff_f32.iter().map(|&v| half::f16::from_f32(v)).collect();
        *self.sq.lock() = Some((vmin, vdiff));
        Ok(())
    }
}

/// `AscendIndexIVFSQ.cpp`'s sibling PQ path: coarse quantiser plus an
/// `m`-subquantiser product code.
pub struct IvfPqIndex {
    orch: Orchestrator,
    centroids: Mutex<Option<Vec<f32>>>,
    pq: Mutex<Option<PqCentroids>>,
    m: usize,
    max_points_per_centroid: usize,
}

impl IvfPqIndex {
    pub fn new(config: &EngineConfig, dim: usize, metric: Metric, nlist: usize, m: usize) -> Result<Self, EngineError> {
        if m == 0 || dim % m != 0 {
            return Err(EngineError::invalid_argument("m must evenly divide the dimension"));
        }
        Ok(IvfPqIndex {
            orch: Orchestrator::new(config, dim, metric, CodeKind::Pq { m }, nlist)?,
            centroids: Mutex::new(None),
            pq: Mutex::new(None),
            m,
            max_points_per_centroid: config.max_points_per_centroid,
        })
    }

    fn assign_lists(&self, vectors: &[f32], n: usize) -> Result<Vec<usize>, EngineError> {
        let dim = self.orch.dim();
        if self.orch.nlist() <= 1 {
            return Ok(vec![0; n]);
        }
        let centroids = self.centroids.lock();
        let centroids = centroids.as_ref().ok_or(EngineError::NotTrained)?;
        Ok((0..n).map(|i| nearest_centroid(&vectors[i * dim..(i + 1) * dim], centroids, self.orch.nlist(), dim)).collect())
    }
}

impl IndexVariant for IvfPqIndex {
    fn dimension(&self) -> usize {
        self.orch.dim()
    }
    fn metric(&self) -> Metric {
        self.orch.metric()
    }
    fn is_trained(&self) -> bool {
        self.orch.is_trained()
    }
    fn ntotal(&self) -> u64 {
        self.orch.ntotal()
    }
    fn train(&self, vectors: &[f32], n: usize) -> Result<(), EngineError> {
        check_batch(self.orch.dim(), vectors, n)?;
        let dim = self.orch.dim();
        if self.orch.nlist() > 1 {
            let (centroids, _norms) = train_kmeans(vectors, n, dim, self.orch.nlist(), self.max_points_per_centroid, 15, 1234);
            self.orch.push_centroids(&centroids)?;
            *self.centroids.lock() = Some(centroids);
        }
        let samples: Vec<Vec<f32>> = (0..n).map(|i| vectors[i * dim..(i + 1) * dim].to_vec()).collect();
        let dims_per_sub = dim / self.m;
        let pq = PqCentroids::train(self.m, dims_per_sub, &samples, 10, 4242);
        let flat: Vec<f32> = pq.data.iter().map(|v| v.to_f32()).collect();
        self.orch.push_pq_centroids(&flat)?;
        *self.pq.lock() = Some(pq);
        Ok(())
    }
    fn add_with_ids(&self, vectors: &[f32], n: usize, ids: &[UserId]) -> Result<(), EngineError> {
        check_batch(self.orch.dim(), vectors, n)?;
        let dim = self.orch.dim();
        let list_ids = self.assign_lists(vectors, n)?;
        let pq = self.pq.lock();
        let pq = pq.as_ref().ok_or(EngineError::NotTrained)?;
        let mut codes = Vec::with_capacity(n * self.m);
        for i in 0..n {
            codes.extend(pq.encode(&vectors[i * dim..(i + 1) * dim]));
        }
        self.orch.add_with_ids(&codes, self.m, ids, &list_ids)
    }
    fn search(&self, queries: &[f32], n: usize, k: usize) -> Result<(Vec<f32>, Vec<UserId>), EngineError> {
        check_batch(self.orch.dim(), queries, n)?;
        self.orch.search(queries, n, k, &[])
    }
    fn remove_ids(&self, ids: Vec<UserId>) -> Result<u64, EngineError> {
        self.orch.remove_ids(ids)
    }
    fn remove_range_ids(&self, min: UserId, max: UserId) -> Result<u64, EngineError> {
        self.orch.remove_range_ids(min, max)
    }
    fn reset(&self) -> Result<(), EngineError> {
        self.orch.reset()
    }
    fn reserve_memory(&self, n_vectors: u64) -> Result<(), EngineError> {
        self.orch.reserve_memory(n_vectors)
    }
    fn reclaim_memory(&self) -> Result<u64, EngineError> {
        self.orch.reclaim_memory()
    }
    fn set_nprobe(&self, nprobe: usize) -> Result<(), EngineError> {
        self.orch.set_nprobe(nprobe)
    }
    fn export_lists(&self) -> Result<Vec<(Vec<u8>, Vec<u32>)>, EngineError> {
        self.orch.export_all_lists()
    }
    fn import_lists(&self, lists: &[(Vec<u8>, Vec<u32>)]) -> Result<(), EngineError> {
        self.orch.import_all_lists(lists)
    }
    fn export_trained_blob(&self) -> Vec<f32> {
        let mut out = self.centroids.lock().clone().unwrap_or_default();
        if let Some(pq) = self.pq.lock().as_ref() {
            out.extend(pq.data.iter().map(|v| v.to_f32()));
        }
        out
    }
    fn import_trained_blob(&self, blob: &[f32]) -> Result<(), EngineError> {
        let dim = self.orch.dim();
        let centroid_len = if self.orch.nlist() > 1 { self.orch.nlist() * dim } else { 0 };
        let dims_per_sub = dim / self.m;
        let pq_len = self.m * 256 * dims_per_sub;
        if blob.len() < centroid_len + pq_len {
            return Err(EngineError::invalid_argument("trained blob too short for ivf-pq"));
        }
        if centroid_len > 0 {
            let centroids = &blob[..centroid_len];
            self.orch.push_centroids(centroids)?;
            *self.centroids.lock() = Some(centroids.to_vec());
        }
        let pq_f32 = &blob[centroid_len..centroid_len + pq_len];
        self.orch.push_pq_centroids(pq_f32)?;
        let data: Vec<half::f16> = pq_f32.iter().map(|&v| half::f16::from_f32(v)).collect();
        *self.pq.lock() = Some(PqCentroids { m: self.m, dims_per_sub, data });
        Ok(())
    }
}

/// `AscendIndexInt8FlatCos.cpp`: raw int8 codes under a cosine-style
/// inner-product metric (callers are expected to pass pre-normalized
/// vectors; the index itself never normalizes, matching the original's
/// "cosine over int8" contract). `nlist <= 1` is the Flat case;
/// `nlist > 1` gives its IVF sibling, `AscendIndexInt8IVFFlat.cpp`. The
/// use-mask spec.md §9 asks for is synthesized all-ones host-side
/// (never left empty) so the device-side kernel never observes an
/// ambiguous "no filter" state through an implicit default.
pub struct Int8FlatIndex {
    orch: Orchestrator,
    trained: AtomicBool,
    centroids: Mutex<Option<Vec<f32>>>,
}

impl Int8FlatIndex {
    pub fn new(config: &EngineConfig, dim: usize, nlist: usize) -> Result<Self, EngineError> {
        Ok(Int8FlatIndex {
            orch: Orchestrator::new(config, dim, Metric::InnerProduct, CodeKind::Int8Flat, nlist)?,
            trained: AtomicBool::new(false),
            centroids: Mutex::new(None),
        })
    }

    fn encode(vector: &[f32]) -> Vec<u8> {
        vector.iter().map(|&v| v.round().clamp(-128.0, 127.0) as i8 as u8).collect()
    }

    fn assign_lists(&self, vectors: &[f32], n: usize) -> Result<Vec<usize>, EngineError> {
        let dim = self.orch.dim();
        if self.orch.nlist() <= 1 {
            return Ok(vec![0; n]);
        }
        let centroids = self.centroids.lock();
        let centroids = centroids.as_ref().ok_or(EngineError::NotTrained)?;
        Ok((0..n).map(|i| nearest_centroid(&vectors[i * dim..(i + 1) * dim], centroids, self.orch.nlist(), dim)).collect())
    }
}

impl IndexVariant for Int8FlatIndex {
    fn dimension(&self) -> usize {
        self.orch.dim()
    }
    fn metric(&self) -> Metric {
        self.orch.metric()
    }
    fn is_trained(&self) -> bool {
        self.orch.nlist() <= 1 || self.trained.load(Ordering::SeqCst)
    }
    fn ntotal(&self) -> u64 {
        self.orch.ntotal()
    }
    fn train(&self, vectors: &[f32], n: usize) -> Result<(), EngineError> {
        if self.orch.nlist() <= 1 {
            return Ok(());
        }
        check_batch(self.orch.dim(), vectors, n)?;
        let dim = self.orch.dim();
        let (centroids, _norms) = train_kmeans(vectors, n, dim, self.orch.nlist(), 60, 15, 1234);
        self.orch.push_centroids(&centroids)?;
        *self.centroids.lock() = Some(centroids);
        self.trained.store(true, Ordering::SeqCst);
        Ok(())
    }
    fn add_with_ids(&self, vectors: &[f32], n: usize, ids: &[UserId]) -> Result<(), EngineError> {
        check_batch(self.orch.dim(), vectors, n)?;
        let dim = self.orch.dim();
        let list_ids = self.assign_lists(vectors, n)?;
        let mut codes = Vec::with_capacity(n * dim);
        for i in 0..n {
            codes.extend(Self::encode(&vectors[i * dim..(i + 1) * dim]));
        }
        self.orch.add_with_ids(&codes, dim, ids, &list_ids)
    }
    fn search(&self, queries: &[f32], n: usize, k: usize) -> Result<(Vec<f32>, Vec<UserId>), EngineError> {
        check_batch(self.orch.dim(), queries, n)?;
        let mask = self.orch.build_all_ones_mask(n);
        self.orch.search(queries, n, k, &mask)
    }
    fn remove_ids(&self, ids: Vec<UserId>) -> Result<u64, EngineError> {
        self.orch.remove_ids(ids)
    }
    fn remove_range_ids(&self, min: UserId, max: UserId) -> Result<u64, EngineError> {
        self.orch.remove_range_ids(min, max)
    }
    fn reset(&self) -> Result<(), EngineError> {
        self.orch.reset()
    }
    fn reserve_memory(&self, n_vectors: u64) -> Result<(), EngineError> {
        self.orch.reserve_memory(n_vectors)
    }
    fn reclaim_memory(&self) -> Result<u64, EngineError> {
        self.orch.reclaim_memory()
    }
    fn set_nprobe(&self, nprobe: usize) -> Result<(), EngineError> {
        self.orch.set_nprobe(nprobe)
    }
    fn export_lists(&self) -> Result<Vec<(Vec<u8>, Vec<u32>)>, EngineError> {
        self.orch.export_all_lists()
    }
    fn import_lists(&self, lists: &[(Vec<u8>, Vec<u32>)]) -> Result<(), EngineError> {
        self.orch.import_all_lists(lists)
    }
    fn export_trained_blob(&self) -> Vec<f32> {
        self.centroids.lock().clone().unwrap_or_default()
    }
    fn import_trained_blob(&self, blob: &[f32]) -> Result<(), EngineError> {
        if blob.is_empty() {
            return Ok(());
        }
        self.orch.push_centroids(blob)?;
        *self.centroids.lock() = Some(blob.to_vec());
        self.trained.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A linear preprocessing step applied ahead of the wrapped index, the
/// composition primitive `AscendIndexPreTransform.cpp` exposes.
pub trait Transform: Send + Sync {
    fn apply(&self, vectors: &[f32], n: usize, dim: usize) -> Vec<f32>;
    fn is_trained(&self) -> bool {
        true
    }
    fn train(&self, _vectors: &[f32], _n: usize) {}

    /// Flatten learned parameters for `CpuIndex` persistence.
    fn export_state(&self) -> Vec<f32> {
        Vec::new()
    }
    /// Restore learned parameters from a previously exported state.
    fn import_state(&self, _state: &[f32]) {}
}

/// Per-dimension centering, the simplest transform the chain supports
/// (subtract a fixed offset learned from training data).
pub struct CenteringTransform {
    offset: Mutex<Option<Vec<f32>>>,
}

impl CenteringTransform {
    pub fn new() -> Self {
        CenteringTransform { offset: Mutex::new(None) }
    }
}

impl Default for CenteringTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for CenteringTransform {
    fn apply(&self, vectors: &[f32], n: usize, dim: usize) -> Vec<f32> {
        let offset = self.offset.lock();
        match offset.as_ref() {
            Some(offset) => (0..n)
                .flat_map(|i| (0..dim).map(move |d| (i, d)))
                .map(|(i, d)| vectors[i * dim + d] - offset[d])
                .collect(),
            None => vectors.to_vec(),
        }
    }

    fn is_trained(&self) -> bool {
        self.offset.lock().is_some()
    }

    fn train(&self, vectors: &[f32], n: usize) {
        if n == 0 {
            return;
        }
        let dim = vectors.len() / n;
        let mut mean = vec![0f32; dim];
        for i in 0..n {
            for d in 0..dim {
                mean[d] += vectors[i * dim + d];
            }
        }
        for v in &mut mean {
            *v /= n as f32;
        }
        *self.offset.lock() = Some(mean);
    }

    fn export_state(&self) -> Vec<f32> {
        self.offset.lock().clone().unwrap_or_default()
    }

    fn import_state(&self, state: &[f32]) {
        if !state.is_empty() {
            *self.offset.lock() = Some(state.to_vec());
        }
    }
}

/// `AscendIndexPreTransform.cpp`: delegates every operation to `inner`
/// after running its transform chain over the vectors first. Open
/// Question #3 (spec.md §9): the composite is trained as soon as every
/// transform in the chain is trained, independent of
/// `inner.is_trained()` — a pre-transform is meant to run ahead of an
/// already-trained target index just as often as ahead of one still
/// being trained.
pub struct PreTransformIndex {
    chain: Mutex<Vec<Box<dyn Transform>>>,
    inner: Box<dyn IndexVariant>,
}

impl PreTransformIndex {
    pub fn new(transform: Box<dyn Transform>, inner: Box<dyn IndexVariant>) -> Self {
        PreTransformIndex { chain: Mutex::new(vec![transform]), inner }
    }

    /// `pre_transform.prepend_transform(transform)`: insert a new
    /// transform ahead of every transform already in the chain, so it
    /// sees the raw vectors first and its output feeds the rest of the
    /// chain. Mirrors `AscendIndexPreTransform::prependTransform`.
    pub fn prepend_transform(&self, transform: Box<dyn Transform>) {
        self.chain.lock().insert(0, transform);
    }

    fn apply_chain(&self, vectors: &[f32], n: usize, dim: usize) -> Vec<f32> {
        let chain = self.chain.lock();
        let mut cur = vectors.to_vec();
        for t in chain.iter() {
            cur = t.apply(&cur, n, dim);
        }
        cur
    }

    fn chain_is_trained(&self) -> bool {
        self.chain.lock().iter().all(|t| t.is_trained())
    }
}

impl IndexVariant for PreTransformIndex {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
    fn metric(&self) -> Metric {
        self.inner.metric()
    }
    fn is_trained(&self) -> bool {
        self.chain_is_trained()
    }
    fn ntotal(&self) -> u64 {
        self.inner.ntotal()
    }
    fn train(&self, vectors: &[f32], n: usize) -> Result<(), EngineError> {
        let dim = self.dimension();
        let mut cur = vectors.to_vec();
        for t in self.chain.lock().iter() {
            if !t.is_trained() {
                t.train(&cur, n);
            }
            cur = t.apply(&cur, n, dim);
        }
        self.inner.train(&cur, n)
    }
    fn add_with_ids(&self, vectors: &[f32], n: usize, ids: &[UserId]) -> Result<(), EngineError> {
        if !self.chain_is_trained() {
            return Err(EngineError::NotTrained);
        }
        let transformed = self.apply_chain(vectors, n, self.dimension());
        self.inner.add_with_ids(&transformed, n, ids)
    }
    fn search(&self, queries: &[f32], n: usize, k: usize) -> Result<(Vec<f32>, Vec<UserId>), EngineError> {
        if !self.chain_is_trained() {
            return Err(EngineError::NotTrained);
        }
        let transformed = self.apply_chain(queries, n, self.dimension());
        self.inner.search(&transformed, n, k)
    }
    fn remove_ids(&self, ids: Vec<UserId>) -> Result<u64, EngineError> {
        self.inner.remove_ids(ids)
    }
    fn remove_range_ids(&self, min: UserId, max: UserId) -> Result<u64, EngineError> {
        self.inner.remove_range_ids(min, max)
    }
    fn reset(&self) -> Result<(), EngineError> {
        self.inner.reset()
    }
    fn reserve_memory(&self, n_vectors: u64) -> Result<(), EngineError> {
        self.inner.reserve_memory(n_vectors)
    }
    fn reclaim_memory(&self) -> Result<u64, EngineError> {
        self.inner.reclaim_memory()
    }
    fn set_nprobe(&self, nprobe: usize) -> Result<(), EngineError> {
        self.inner.set_nprobe(nprobe)
    }
    fn export_lists(&self) -> Result<Vec<(Vec<u8>, Vec<u32>)>, EngineError> {
        self.inner.export_lists()
    }
    fn import_lists(&self, lists: &[(Vec<u8>, Vec<u32>)]) -> Result<(), EngineError> {
        self.inner.import_lists(lists)
    }
    fn export_trained_blob(&self) -> Vec<f32> {
        let chain = self.chain.lock();
        let mut out = vec![chain.len() as f32];
        for t in chain.iter() {
            let s = t.export_state();
            out.push(s.len() as f32);
            out.extend(s);
        }
        drop(chain);
        out.extend(self.inner.export_trained_blob());
        out
    }
    fn import_trained_blob(&self, blob: &[f32]) -> Result<(), EngineError> {
        if blob.is_empty() {
            return Ok(());
        }
        let too_short = || EngineError::invalid_argument("trained blob too short for pretransform");
        let chain_len = blob[0] as usize;
        let mut pos = 1;
        let chain = self.chain.lock();
        if chain_len != chain.len() {
            return Err(EngineError::invalid_argument("trained blob transform chain length mismatch"));
        }
        for t in chain.iter() {
            let s_len = *blob.get(pos).ok_or_else(too_short)? as usize;
            pos += 1;
            let state = blob.get(pos..pos + s_len).ok_or_else(too_short)?;
            t.import_state(state);
            pos += s_len;
        }
        drop(chain);
        self.inner.import_trained_blob(&blob[pos..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn flat_index_round_trips_self_match() {
        let idx = FlatIndex::new(&config(), 16, Metric::L2).unwrap();
        assert!(idx.is_trained());
        let vectors: Vec<f32> = (0..16).map(|d| d as f32 * 0.1).collect();
        idx.add_with_ids(&vectors, 1, &[42]).unwrap();
        let (dist, ids) = idx.search(&vectors, 1, 1).unwrap();
        assert_eq!(ids[0], 42);
        assert!(dist[0] < 1e-2);
    }

    #[test]
    fn ivf_flat_requires_training_before_add() {
        let idx = IvfFlatIndex::new(&config(), 16, Metric::L2, 4).unwrap();
        assert!(!idx.is_trained());
        let vectors = vec![0f32; 16];
        assert!(idx.add_with_ids(&vectors, 1, &[1]).is_err());
    }

    #[test]
    fn ivf_sq8_trains_then_searches() {
        let idx = IvfSq8Index::new(&config(), 16, Metric::L2, 2).unwrap();
        let mut train_data = Vec::new();
        for i in 0..32 {
            train_data.extend((0..16).map(|d| ((i + d) as f32) * 0.05));
        }
        idx.train(&train_data, 32).unwrap();
        assert!(idx.is_trained());
        let v: Vec<f32> = (0..16).map(|d| d as f32 * 0.05).collect();
        idx.add_with_ids(&v, 1, &[9]).unwrap();
        let (_dist, ids) = idx.search(&v, 1, 1).unwrap();
        assert_eq!(ids[0], 9);
    }

    #[test]
    fn pretransform_requires_transform_training_only() {
        let inner = Box::new(FlatIndex::new(&config(), 4, Metric::L2).unwrap());
        let composite = PreTransformIndex::new(Box::new(CenteringTransform::new()), inner);
        assert!(!composite.is_trained());
        composite.train(&[1.0, 2.0, 3.0, 4.0], 1).unwrap();
        assert!(composite.is_trained());
    }

    #[test]
    fn int8_ivf_flat_search_survives_uneven_list_lengths() {
        let dim = 16;
        let idx = Int8FlatIndex::new(&config(), dim, 4).unwrap();

        // Train on vectors clustered far apart so list sizes stay
        // uneven after assignment, the exact condition that used to
        // make device.rs reuse list 0's length against a differently
        // sized probed list and panic inside `BitSet::get`.
        let mut train_data = Vec::new();
        for cluster in 0..4u32 {
            let reps = 2 + cluster as usize; // 2, 3, 4, 5 vectors per cluster
            for _ in 0..reps {
                train_data.extend(vec![(cluster * 40) as f32; dim]);
            }
        }
        let n_train = train_data.len() / dim;
        idx.train(&train_data, n_train).unwrap();
        assert!(idx.is_trained());

        let ids: Vec<UserId> = (0..n_train as u32).collect();
        idx.add_with_ids(&train_data, n_train, &ids).unwrap();
        assert_eq!(idx.ntotal(), n_train as u64);

        idx.set_nprobe(4).unwrap();
        for cluster in 0..4u32 {
            let q = vec![(cluster * 40) as f32; dim];
            let (_dist, found) = idx.search(&q, 1, 1).unwrap();
            assert_ne!(found[0], ivf_types::SENTINEL_ID);
        }
    }

    #[test]
    fn prepend_transform_runs_ahead_of_existing_chain() {
        let inner = Box::new(FlatIndex::new(&config(), 4, Metric::L2).unwrap());
        let composite = PreTransformIndex::new(Box::new(CenteringTransform::new()), inner);
        composite.prepend_transform(Box::new(CenteringTransform::new()));
        assert!(!composite.is_trained());

        let train_data: Vec<f32> = (0..4).flat_map(|i| vec![i as f32, i as f32, i as f32, i as f32]).collect();
        composite.train(&train_data, 4).unwrap();
        assert!(composite.is_trained());

        let v = vec![1.5f32, 1.5, 1.5, 1.5];
        composite.add_with_ids(&v, 1, &[5]).unwrap();
        let (_dist, ids) = composite.search(&v, 1, 1).unwrap();
        assert_eq!(ids[0], 5);
    }
}
