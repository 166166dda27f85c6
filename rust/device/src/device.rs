//! The software reference device: a server loop that answers the wire
//! protocol from `ivf-rpc` using `store`/`search`/`dispatch`/`flags`
//! beneath it. A real accelerator implements the same RPC contract in
//! silicon; this implementation runs the identical steps on the host
//! CPU with `rayon` standing in for the device's own parallelism
//! (spec.md §4 component-design note on the "software reference
//! device").
//!
//! Flat indexes are modelled as IVF indexes with a single list (`nlist
//! == 1`) whose sole centroid never actually gates anything, collapsing
//! six of spec.md §4.8's variants onto one generic engine parameterised
//! by `(nlist, metric, CodeKind)`. This is recorded as a design decision
//! in `DESIGN.md`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use ivf_distance::{int8::BitSet, pq::PqCentroids};
use ivf_error::EngineError;
use ivf_rpc::{wire::{Reader, Writer}, *};
use ivf_types::{CodeKind, Metric, Selector, UserId};
use rayon::prelude::*;

use crate::search::{coarse_scan, merge_topk, scan_list, select_nprobe, Kernel};
use crate::store::InvertedList;

struct DeviceIndex {
    dim: usize,
    metric: Metric,
    code_kind: CodeKind,
    nlist: usize,
    nprobe: usize,
    lists: Vec<InvertedList>,
    centroids: Vec<f32>,
    sq_vmin: Option<Vec<half::f16>>,
    sq_vdiff: Option<Vec<half::f16>>,
    pq: Option<PqCentroids>,
    centroids_set: bool,
}

impl DeviceIndex {
    fn new(dim: usize, metric: Metric, code_kind: CodeKind, nlist: usize) -> Self {
        let elem_size = code_kind.element_size(dim);
        let with_precompute = matches!(code_kind, CodeKind::Sq8) && matches!(metric, Metric::L2);
        let row_dims = match code_kind {
            CodeKind::Pq { m } => m,
            _ => dim,
        };
        let lists = (0..nlist)
            .map(|_| InvertedList::new(row_dims, elem_size / row_dims.max(1), with_precompute))
            .collect();
        DeviceIndex {
            dim,
            metric,
            code_kind,
            nlist,
            nprobe: nlist.min(1),
            lists,
            centroids: vec![0.0; nlist * dim],
            sq_vmin: None,
            sq_vdiff: None,
            pq: None,
            centroids_set: false,
        }
    }

    fn is_trained(&self) -> bool {
        let centroids_ok = self.nlist <= 1 || self.centroids_set;
        let sq_ok = !matches!(self.code_kind, CodeKind::Sq8) || (self.sq_vmin.is_some() && self.sq_vdiff.is_some());
        let pq_ok = !matches!(self.code_kind, CodeKind::Pq { .. }) || self.pq.is_some();
        centroids_ok && sq_ok && pq_ok
    }

    fn ntotal(&self) -> usize {
        self.lists.iter().map(|l| l.len()).sum()
    }

    fn kernel<'a>(&'a self, use_mask: Option<&'a BitSet>) -> Kernel<'a> {
        match &self.code_kind {
            CodeKind::Fp16Flat => Kernel::Fp16Flat,
            CodeKind::Sq8 => Kernel::Sq8 {
                vmin: self.sq_vmin.as_deref().unwrap_or(&[]),
                vdiff: self.sq_vdiff.as_deref().unwrap_or(&[]),
            },
            CodeKind::Pq { .. } => Kernel::Pq {
                centroids: self.pq.as_ref().expect("pq centroids must be set before search"),
            },
            CodeKind::Int8Flat => Kernel::Int8Cos { use_mask },
        }
    }

    /// `mask`, when non-empty, is a flat per-query use-mask laid out
    /// list-by-list over every list this device holds (spec.md §9's
    /// Int8-Cos contract — callers with no active filter pass an
    /// all-ones mask, never `None`, so the device never has to
    /// special-case an absent mask). Each probed list has its own
    /// length, so `search_batch` carves out that list's own bit range
    /// rather than reusing one fixed-size mask across every list —
    /// Int8-IVF-Flat's lists are rarely the same length.
    fn search_batch(&self, queries: &[f32], n: usize, k: usize, mask: &[u8]) -> Vec<(f32, UserId)> {
        let mut list_offsets = Vec::with_capacity(self.lists.len());
        let mut offset = 0usize;
        for l in &self.lists {
            list_offsets.push(offset);
            offset += l.len();
        }
        let total_len = offset;
        let mask_bytes_per_query = if mask.is_empty() { 0 } else { mask.len() / n.max(1) };
        (0..n)
            .into_par_iter()
            .flat_map_iter(|qi| {
                let q = &queries[qi * self.dim..(qi + 1) * self.dim];
                let probes = if self.nlist <= 1 {
                    vec![0]
                } else {
                    let row = coarse_scan(q, 1, self.dim, &self.centroids, self.nlist, self.metric);
                    select_nprobe(&row, self.nprobe, self.metric)
                };
                let query_mask = if mask_bytes_per_query > 0 {
                    let start = qi * mask_bytes_per_query;
                    let end = start + mask_bytes_per_query;
                    Some(BitSet::from_bytes(&mask[start..end], total_len.max(mask_bytes_per_query * 8)))
                } else {
                    None
                };
                let kernel_mask = |list_id: usize| {
                    query_mask.as_ref().map(|m| m.sub_range(list_offsets[list_id], self.lists[list_id].len()))
                };
                let mut candidates = Vec::new();
                for list_id in probes {
                    let list_mask = kernel_mask(list_id);
                    let kernel = self.kernel(list_mask.as_ref());
                    candidates.extend(scan_list(q, &self.lists[list_id], self.metric, &kernel));
                }
                merge_topk(candidates, k, self.metric)
                    .into_iter()
                    .map(move |nb| (nb.distance, nb.id))
            })
            .collect()
    }
}

/// Dispatches framed RPC requests against a table of device-local index
/// handles. One `Device` instance is the whole "accelerator" in the
/// software reference implementation.
pub struct Device {
    indexes: HashMap<u32, DeviceIndex>,
    next_handle: AtomicU32,
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

impl Device {
    pub fn new() -> Self {
        Device {
            indexes: HashMap::new(),
            next_handle: AtomicU32::new(1),
        }
    }

    fn alloc_handle(&mut self, index: DeviceIndex) -> u32 {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.indexes.insert(handle, index);
        handle
    }

    fn get(&self, handle: u32) -> Result<&DeviceIndex, EngineError> {
        self.indexes
            .get(&handle)
            .ok_or_else(|| EngineError::invalid_argument(format!("unknown index handle {handle}")))
    }

    fn get_mut(&mut self, handle: u32) -> Result<&mut DeviceIndex, EngineError> {
        self.indexes
            .get_mut(&handle)
            .ok_or_else(|| EngineError::invalid_argument(format!("unknown index handle {handle}")))
    }

    /// Handle one framed request, returning the framed reply. Errors
    /// from the operation itself are carried in the reply's
    /// `ResponseHeader`, not as an `Err` here — a malformed/undecodable
    /// frame is the only thing that short-circuits with `Err`.
    pub fn handle(&mut self, frame: Frame) -> Frame {
        let body = self.dispatch(frame.kind, &frame.payload);
        let mut w = Writer::new();
        match body {
            Ok(bytes) => {
                ResponseHeader::ok().encode(&mut w);
                w.bytes(&bytes);
            }
            Err(e) => {
                ResponseHeader::error(e.to_string()).encode(&mut w);
            }
        }
        Frame::new(RpcKind::Reply, w.into_bytes())
    }

    fn dispatch(&mut self, kind: RpcKind, payload: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut r = Reader::new(payload);
        match kind {
            RpcKind::CreateIndexFlat
            | RpcKind::CreateIndexIvfFlat
            | RpcKind::CreateIndexIvfSq
            | RpcKind::CreateIndexIvfPq
            | RpcKind::CreateIndexInt8Flat
            | RpcKind::CreateIndexInt8IvfFlat => {
                let req = CreateIndexRequest::decode(&mut r)?;
                let metric = if req.metric == 0 { Metric::L2 } else { Metric::InnerProduct };
                let code_kind = match kind {
                    RpcKind::CreateIndexFlat | RpcKind::CreateIndexIvfFlat => CodeKind::Fp16Flat,
                    RpcKind::CreateIndexIvfSq => CodeKind::Sq8,
                    RpcKind::CreateIndexIvfPq => CodeKind::Pq { m: req.m as usize },
                    RpcKind::CreateIndexInt8Flat | RpcKind::CreateIndexInt8IvfFlat => CodeKind::Int8Flat,
                    _ => unreachable!(),
                };
                let nlist = match kind {
                    RpcKind::CreateIndexFlat | RpcKind::CreateIndexInt8Flat => 1,
                    _ => req.nlist.max(1) as usize,
                };
                let index = DeviceIndex::new(req.dimension as usize, metric, code_kind, nlist);
                let handle = self.alloc_handle(index);
                let mut w = Writer::new();
                CreateIndexResponse { handle }.encode(&mut w);
                Ok(w.into_bytes())
            }
            RpcKind::CreateIndexPreTransform => Err(EngineError::unsupported(
                "pre-transform composition is a host-side orchestrator concern",
            )),
            RpcKind::DestroyIndex => {
                let req = HandleRequest::decode(&mut r)?;
                self.indexes.remove(&req.handle);
                Ok(Vec::new())
            }
            RpcKind::IndexReset => {
                let req = HandleRequest::decode(&mut r)?;
                for list in &mut self.get_mut(req.handle)?.lists {
                    list.reset();
                }
                Ok(Vec::new())
            }
            RpcKind::IndexReserveMem => {
                let _req = ReserveMemRequest::decode(&mut r)?;
                Ok(Vec::new())
            }
            RpcKind::IndexReclaimMem => {
                let _req = HandleRequest::decode(&mut r)?;
                let mut w = Writer::new();
                ReclaimMemResponse { bytes_freed: 0 }.encode(&mut w);
                Ok(w.into_bytes())
            }
            RpcKind::IndexIvfUpdateCoarseCent => {
                let req = UpdateCentroidsRequest::decode(&mut r)?;
                let index = self.get_mut(req.handle)?;
                if req.centroids.len() != index.nlist * index.dim {
                    return Err(EngineError::invalid_argument("centroid tensor shape mismatch"));
                }
                index.centroids = req.centroids;
                index.centroids_set = true;
                Ok(Vec::new())
            }
            RpcKind::IndexIvfPqUpdatePqCent => {
                let req = UpdateCentroidsRequest::decode(&mut r)?;
                let index = self.get_mut(req.handle)?;
                let CodeKind::Pq { m } = index.code_kind else {
                    return Err(EngineError::unsupported("index is not a PQ index"));
                };
                let dims_per_sub = index.dim / m;
                if req.centroids.len() != m * 256 * dims_per_sub {
                    return Err(EngineError::invalid_argument("pq centroid tensor shape mismatch"));
                }
                let mut pq = PqCentroids::new(m, dims_per_sub);
                for (slot, &v) in pq.data.iter_mut().zip(req.centroids.iter()) {
                    *slot = half::f16::from_f32(v);
                }
                index.pq = Some(pq);
                Ok(Vec::new())
            }
            RpcKind::IndexSqUpdateTrainedValue => {
                let req = UpdateTrainedValueRequest::decode(&mut r)?;
                let index = self.get_mut(req.handle)?;
                if req.vmin.len() != index.dim || req.vdiff.len() != index.dim {
                    return Err(EngineError::invalid_argument("sq8 parameter shape mismatch"));
                }
                index.sq_vmin = Some(req.vmin.into_iter().map(half::f16::from_f32).collect());
                index.sq_vdiff = Some(req.vdiff.into_iter().map(half::f16::from_f32).collect());
                Ok(Vec::new())
            }
            RpcKind::IndexIvfUpdateNprobe => {
                let req = UpdateNprobeRequest::decode(&mut r)?;
                let index = self.get_mut(req.handle)?;
                index.nprobe = (req.nprobe as usize).clamp(1, index.nlist.max(1));
                Ok(Vec::new())
            }
            RpcKind::IndexFlatAdd
            | RpcKind::IndexIvfFlatAdd
            | RpcKind::IndexIvfSqAdd
            | RpcKind::IndexIvfPqAdd
            | RpcKind::IndexInt8IvfFlatAdd => {
                let req = AddRequest::decode(&mut r)?;
                let index = self.get_mut(req.handle)?;
                if !index.is_trained() {
                    return Err(EngineError::NotTrained);
                }
                if req.list_id as usize >= index.lists.len() {
                    return Err(EngineError::invalid_argument("list id out of range"));
                }
                index.lists[req.list_id as usize].add(&req.code_bytes, &req.ids, None)?;
                let new_total = index.ntotal() as u64;
                let mut w = Writer::new();
                AddResponse { new_total }.encode(&mut w);
                Ok(w.into_bytes())
            }
            RpcKind::IndexSearch => {
                let req = SearchRequest::decode(&mut r)?;
                let index = self.get(req.handle)?;
                if !index.is_trained() {
                    return Err(EngineError::NotTrained);
                }
                let n = req.n as usize;
                let k = req.k as usize;
                let results = index.search_batch(&req.queries, n, k, &req.mask);
                let distances: Vec<f32> = results.iter().map(|r| r.0).collect();
                let ids: Vec<UserId> = results.iter().map(|r| r.1).collect();
                let mut w = Writer::new();
                SearchResponse { distances, ids }.encode(&mut w);
                Ok(w.into_bytes())
            }
            RpcKind::IndexRemoveIds => {
                let req = RemoveIdsRequest::decode(&mut r)?;
                let selector = Selector::Batch(req.ids);
                let index = self.get_mut(req.handle)?;
                let removed: usize = index.lists.iter_mut().map(|l| l.remove(&selector)).sum();
                let mut w = Writer::new();
                RemoveResponse { removed: removed as u64 }.encode(&mut w);
                Ok(w.into_bytes())
            }
            RpcKind::IndexRemoveRangeIds => {
                let req = RemoveRangeIdsRequest::decode(&mut r)?;
                let selector = Selector::Range { min: req.min, max: req.max };
                let index = self.get_mut(req.handle)?;
                let removed: usize = index.lists.iter_mut().map(|l| l.remove(&selector)).sum();
                let mut w = Writer::new();
                RemoveResponse { removed: removed as u64 }.encode(&mut w);
                Ok(w.into_bytes())
            }
            RpcKind::IndexFlatGetBaseSize => {
                let req = HandleRequest::decode(&mut r)?;
                let index = self.get(req.handle)?;
                let mut w = Writer::new();
                SizeResponse { size: index.ntotal() as u64 }.encode(&mut w);
                Ok(w.into_bytes())
            }
            RpcKind::IndexFlatGetBase => {
                let req = HandleRequest::decode(&mut r)?;
                let index = self.get(req.handle)?;
                let list = &index.lists[0];
                let mut w = Writer::new();
                GetBaseResponse {
                    code_bytes: list.get_codes_reshaped(),
                    ids: list.ids().to_vec(),
                }
                .encode(&mut w);
                Ok(w.into_bytes())
            }
            RpcKind::IndexIvfGetListLength => {
                let req = ListRequest::decode(&mut r)?;
                let index = self.get(req.handle)?;
                let len = index
                    .lists
                    .get(req.list_id as usize)
                    .ok_or_else(|| EngineError::invalid_argument("list id out of range"))?
                    .len();
                let mut w = Writer::new();
                SizeResponse { size: len as u64 }.encode(&mut w);
                Ok(w.into_bytes())
            }
            RpcKind::IndexIvfGetListCodes => {
                let req = ListRequest::decode(&mut r)?;
                let index = self.get(req.handle)?;
                let list = index
                    .lists
                    .get(req.list_id as usize)
                    .ok_or_else(|| EngineError::invalid_argument("list id out of range"))?;
                let mut w = Writer::new();
                GetBaseResponse {
                    code_bytes: list.get_codes_reshaped(),
                    ids: list.ids().to_vec(),
                }
                .encode(&mut w);
                Ok(w.into_bytes())
            }
            RpcKind::IndexIvfFastGetListCodes => {
                let req = HandleRequest::decode(&mut r)?;
                let index = self.get(req.handle)?;
                let mut w = Writer::new();
                w.u32(index.lists.len() as u32);
                for (list_id, list) in index.lists.iter().enumerate() {
                    FastListChunk {
                        list_id: list_id as u32,
                        list_size: list.len() as u32,
                        code_bytes: list.get_codes_reshaped(),
                        ids: list.ids().to_vec(),
                        is_last: list_id + 1 == index.lists.len(),
                    }
                    .encode(&mut w);
                }
                Ok(w.into_bytes())
            }
            RpcKind::TestDataIntegrity => {
                let req = IntegrityProbeRequest::decode(&mut r)?;
                let checksum = crc32fast::hash(&req.payload);
                let mut w = Writer::new();
                IntegrityProbeResponse { checksum, echoed: req.payload }.encode(&mut w);
                Ok(w.into_bytes())
            }
            RpcKind::Reply => Err(EngineError::invalid_argument("Reply is not a request kind")),
        }
    }
}
