//! Host-side orchestration across a fleet of devices (spec.md §4.7): a
//! per-device RPC session backed by a thread running the software
//! reference `Device`, add paging and least-loaded sharding, a search
//! fan-out over `ivf-system`'s `Dispatcher`, and the cross-device
//! pointer-based top-K merge. Grounded on
//! `original_source/.../AscendIndexIVF.cpp`'s `addWithIds`/`search`
//! device-loop shape, with `chroma-system::Dispatcher` standing in for
//! its per-device worker fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use ivf_config::EngineConfig;
use ivf_device::Device;
use ivf_error::EngineError;
use ivf_rpc::wire::{Reader, Writer};
use ivf_rpc::*;
use ivf_system::{Dispatcher, Operator};
use ivf_types::{CodeKind, Metric, Selector, UserId, SENTINEL_ID};
use parking_lot::Mutex;

/// One device's RPC session plus the background thread answering it.
struct DeviceLink {
    session: Session,
    handle: u32,
    worker: Option<JoinHandle<()>>,
}

impl DeviceLink {
    fn spawn(create_kind: RpcKind, req: CreateIndexRequest) -> Result<Self, EngineError> {
        let (host, device_end) = ChannelTransport::pair();
        let worker = std::thread::Builder::new()
            .name("ivf-device".into())
            .spawn(move || {
                let mut device = Device::new();
                loop {
                    let frame = match device_end.recv() {
                        Ok(f) => f,
                        Err(_) => return,
                    };
                    let reply = device.handle(frame);
                    if device_end.send(reply).is_err() {
                        return;
                    }
                }
            })
            .expect("failed to spawn device thread");
        let session = Session::new(Box::new(host));
        let mut w = Writer::new();
        req.encode(&mut w);
        let body = Self::roundtrip(&session, create_kind, w.into_bytes())?;
        let mut r = Reader::new(&body);
        let handle = CreateIndexResponse::decode(&mut r)?.handle;
        Ok(DeviceLink {
            session,
            handle,
            worker: Some(worker),
        })
    }

    fn roundtrip(session: &Session, kind: RpcKind, payload: Vec<u8>) -> Result<Vec<u8>, EngineError> {
        let reply = session.send_and_receive(kind, payload)?;
        let mut r = Reader::new(&reply);
        let header = ResponseHeader::decode(&mut r)?;
        header.into_result()?;
        r.bytes()
    }

    fn call(&self, kind: RpcKind, payload: Vec<u8>) -> Result<Vec<u8>, EngineError> {
        Self::roundtrip(&self.session, kind, payload)
    }

    fn push_centroids(&self, kind: RpcKind, centroids: Vec<f32>) -> Result<(), EngineError> {
        let mut w = Writer::new();
        UpdateCentroidsRequest { handle: self.handle, centroids }.encode(&mut w);
        self.call(kind, w.into_bytes()).map(|_| ())
    }

    fn push_sq(&self, vmin: Vec<f32>, vdiff: Vec<f32>) -> Result<(), EngineError> {
        let mut w = Writer::new();
        UpdateTrainedValueRequest { handle: self.handle, vmin, vdiff }.encode(&mut w);
        self.call(RpcKind::IndexSqUpdateTrainedValue, w.into_bytes()).map(|_| ())
    }

    fn set_nprobe(&self, nprobe: u32) -> Result<(), EngineError> {
        let mut w = Writer::new();
        UpdateNprobeRequest { handle: self.handle, nprobe }.encode(&mut w);
        self.call(RpcKind::IndexIvfUpdateNprobe, w.into_bytes()).map(|_| ())
    }

    fn reserve_mem(&self, n_vectors: u64) -> Result<(), EngineError> {
        let mut w = Writer::new();
        ReserveMemRequest { handle: self.handle, n_vectors }.encode(&mut w);
        self.call(RpcKind::IndexReserveMem, w.into_bytes()).map(|_| ())
    }

    fn reclaim_mem(&self) -> Result<u64, EngineError> {
        let mut w = Writer::new();
        HandleRequest { handle: self.handle }.encode(&mut w);
        let body = self.call(RpcKind::IndexReclaimMem, w.into_bytes())?;
        let mut r = Reader::new(&body);
        Ok(ReclaimMemResponse::decode(&mut r)?.bytes_freed)
    }

    fn reset(&self) -> Result<(), EngineError> {
        let mut w = Writer::new();
        HandleRequest { handle: self.handle }.encode(&mut w);
        self.call(RpcKind::IndexReset, w.into_bytes()).map(|_| ())
    }

    fn add(&self, add_kind: RpcKind, list_id: u32, code_bytes: Vec<u8>, ids: Vec<u32>) -> Result<u64, EngineError> {
        let mut w = Writer::new();
        AddRequest { handle: self.handle, list_id, n: ids.len() as u32, code_bytes, ids }.encode(&mut w);
        let body = self.call(add_kind, w.into_bytes())?;
        let mut r = Reader::new(&body);
        Ok(AddResponse::decode(&mut r)?.new_total)
    }

    fn search(&self, n: u32, k: u32, queries: Vec<f32>, nprobe: u32, mask: Vec<u8>) -> Result<(Vec<f32>, Vec<UserId>), EngineError> {
        let mut w = Writer::new();
        SearchRequest { handle: self.handle, n, k, queries, nprobe, mask }.encode(&mut w);
        let body = self.call(RpcKind::IndexSearch, w.into_bytes())?;
        let mut r = Reader::new(&body);
        let resp = SearchResponse::decode(&mut r)?;
        Ok((resp.distances, resp.ids))
    }

    fn remove(&self, kind: RpcKind, payload: Vec<u8>) -> Result<u64, EngineError> {
        let body = self.call(kind, payload)?;
        let mut r = Reader::new(&body);
        Ok(RemoveResponse::decode(&mut r)?.removed)
    }

    fn get_base_size(&self) -> Result<u64, EngineError> {
        let mut w = Writer::new();
        HandleRequest { handle: self.handle }.encode(&mut w);
        let body = self.call(RpcKind::IndexFlatGetBaseSize, w.into_bytes())?;
        let mut r = Reader::new(&body);
        Ok(SizeResponse::decode(&mut r)?.size)
    }

    fn get_base(&self) -> Result<(Vec<u8>, Vec<u32>), EngineError> {
        let mut w = Writer::new();
        HandleRequest { handle: self.handle }.encode(&mut w);
        let body = self.call(RpcKind::IndexFlatGetBase, w.into_bytes())?;
        let mut r = Reader::new(&body);
        let resp = GetBaseResponse::decode(&mut r)?;
        Ok((resp.code_bytes, resp.ids))
    }

    fn get_list_length(&self, list_id: u32) -> Result<u64, EngineError> {
        let mut w = Writer::new();
        ListRequest { handle: self.handle, list_id }.encode(&mut w);
        let body = self.call(RpcKind::IndexIvfGetListLength, w.into_bytes())?;
        let mut r = Reader::new(&body);
        Ok(SizeResponse::decode(&mut r)?.size)
    }

    fn get_list_codes(&self, list_id: u32) -> Result<(Vec<u8>, Vec<u32>), EngineError> {
        let mut w = Writer::new();
        ListRequest { handle: self.handle, list_id }.encode(&mut w);
        let body = self.call(RpcKind::IndexIvfGetListCodes, w.into_bytes())?;
        let mut r = Reader::new(&body);
        let resp = GetBaseResponse::decode(&mut r)?;
        Ok((resp.code_bytes, resp.ids))
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        if let Some(w) = self.worker.take() {
            let _ = w.join();
        }
    }
}

/// One `add` job bound for a single device's single list, already
/// encoded and owned so it can cross into an `Operator`'s `'static`
/// input bound (spec.md §4.7's per-device fan-out).
struct AddJob {
    device: usize,
    list_id: u32,
    code_bytes: Vec<u8>,
    ids: Vec<u32>,
}

struct AddOperator {
    devices: Vec<Arc<DeviceLink>>,
    add_kind: RpcKind,
}

impl std::fmt::Debug for AddOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddOperator").field("devices", &self.devices.len()).field("add_kind", &self.add_kind).finish()
    }
}

impl std::fmt::Debug for AddJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddJob").field("device", &self.device).field("list_id", &self.list_id).finish()
    }
}

impl Operator<AddJob, u64> for AddOperator {
    fn run(&self, input: &AddJob) -> Result<u64, EngineError> {
        self.devices[input.device].add(self.add_kind, input.list_id, input.code_bytes.clone(), input.ids.clone())
    }
}

#[derive(Debug)]
struct SearchOperator {
    n: usize,
    k: usize,
    nprobe: usize,
    queries: Vec<f32>,
    mask: Vec<u8>,
}

impl Operator<Arc<DeviceLink>, (Vec<f32>, Vec<UserId>)> for SearchOperator {
    fn run(&self, dev: &Arc<DeviceLink>) -> Result<(Vec<f32>, Vec<UserId>), EngineError> {
        dev.search(self.n as u32, self.k as u32, self.queries.clone(), self.nprobe as u32, self.mask.clone())
    }
}

/// Fans `train`/`add`/`search`/`remove` across one or more devices for
/// a single index. Coarse/SQ/PQ training itself happens on the host
/// (`crate::training`); the orchestrator only pushes the resulting
/// parameters out to every device.
pub struct Orchestrator {
    devices: Vec<Arc<DeviceLink>>,
    dispatcher: Dispatcher,
    dim: usize,
    metric: Metric,
    code_kind: CodeKind,
    nlist: usize,
    create_kind: RpcKind,
    add_kind: RpcKind,
    nprobe: AtomicUsize,
    /// `[device][list] -> resident vector count`, the load table the
    /// sharding rules consult (spec.md §4.7: least-loaded-list for IVF,
    /// smallest-base-then-round-robin for Flat, where Flat is just the
    /// `nlist == 1` case of the same table).
    list_counts: Mutex<Vec<Vec<u64>>>,
    flat_round_robin: AtomicUsize,
    centroids_set: AtomicBool,
    sq_set: AtomicBool,
    pq_set: AtomicBool,
    ntotal: AtomicU64,
    max_request_bytes: usize,
    max_request_vectors: usize,
}

fn kinds_for(code_kind: CodeKind, nlist: usize) -> (RpcKind, RpcKind) {
    match code_kind {
        CodeKind::Fp16Flat if nlist <= 1 => (RpcKind::CreateIndexFlat, RpcKind::IndexFlatAdd),
        CodeKind::Fp16Flat => (RpcKind::CreateIndexIvfFlat, RpcKind::IndexIvfFlatAdd),
        CodeKind::Sq8 => (RpcKind::CreateIndexIvfSq, RpcKind::IndexIvfSqAdd),
        CodeKind::Pq { .. } => (RpcKind::CreateIndexIvfPq, RpcKind::IndexIvfPqAdd),
        CodeKind::Int8Flat if nlist <= 1 => (RpcKind::CreateIndexInt8Flat, RpcKind::IndexInt8IvfFlatAdd),
        CodeKind::Int8Flat => (RpcKind::CreateIndexInt8IvfFlat, RpcKind::IndexInt8IvfFlatAdd),
    }
}

impl Orchestrator {
    pub fn new(
        config: &EngineConfig,
        dim: usize,
        metric: Metric,
        code_kind: CodeKind,
        nlist: usize,
    ) -> Result<Self, EngineError> {
        ivf_types::validate_dimension(dim)?;
        let nlist = nlist.max(1);
        let (create_kind, add_kind) = kinds_for(code_kind, nlist);
        let (m, nbits) = match code_kind {
            CodeKind::Pq { m } => (m as u32, 8),
            _ => (0, 8),
        };
        let metric_byte = match metric {
            Metric::L2 => 0,
            Metric::InnerProduct => 1,
        };
        let num_devices = config.devices.len().max(1);
        let mut devices = Vec::with_capacity(num_devices);
        for _ in 0..num_devices {
            let req = CreateIndexRequest {
                dimension: dim as u32,
                metric: metric_byte,
                nlist: nlist as u32,
                m,
                nbits,
            };
            devices.push(Arc::new(DeviceLink::spawn(create_kind, req)?));
        }
        let dispatcher = Dispatcher::new(config.topk_pool_threads.max(num_devices), config.topk_pool_first_core);
        Ok(Orchestrator {
            list_counts: Mutex::new(vec![vec![0u64; nlist]; num_devices]),
            devices,
            dispatcher,
            dim,
            metric,
            code_kind,
            nlist,
            create_kind,
            add_kind,
            nprobe: AtomicUsize::new(nlist.min(1).max(1)),
            flat_round_robin: AtomicUsize::new(0),
            centroids_set: AtomicBool::new(false),
            sq_set: AtomicBool::new(false),
            pq_set: AtomicBool::new(false),
            ntotal: AtomicU64::new(0),
            max_request_bytes: config.max_request_bytes,
            max_request_vectors: config.max_request_vectors,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }

    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    pub fn ntotal(&self) -> u64 {
        self.ntotal.load(Ordering::SeqCst)
    }

    pub fn is_trained(&self) -> bool {
        let centroids_ok = self.nlist <= 1 || self.centroids_set.load(Ordering::SeqCst);
        let sq_ok = !matches!(self.code_kind, CodeKind::Sq8) || self.sq_set.load(Ordering::SeqCst);
        let pq_ok = !matches!(self.code_kind, CodeKind::Pq { .. }) || self.pq_set.load(Ordering::SeqCst);
        centroids_ok && sq_ok && pq_ok
    }

    pub fn push_centroids(&self, centroids: &[f32]) -> Result<(), EngineError> {
        if centroids.len() != self.nlist * self.dim {
            return Err(EngineError::invalid_argument("centroid tensor shape mismatch"));
        }
        for dev in &self.devices {
            dev.push_centroids(RpcKind::IndexIvfUpdateCoarseCent, centroids.to_vec())?;
        }
        self.centroids_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn push_pq_centroids(&self, centroids: &[f32]) -> Result<(), EngineError> {
        for dev in &self.devices {
            dev.push_centroids(RpcKind::IndexIvfPqUpdatePqCent, centroids.to_vec())?;
        }
        self.pq_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn push_sq(&self, vmin: &[f32], vdiff: &[f32]) -> Result<(), EngineError> {
        if vmin.len() != self.dim || vdiff.len() != self.dim {
            return Err(EngineError::invalid_argument("sq8 parameter shape mismatch"));
        }
        for dev in &self.devices {
            dev.push_sq(vmin.to_vec(), vdiff.to_vec())?;
        }
        self.sq_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn set_nprobe(&self, nprobe: usize) -> Result<(), EngineError> {
        let nprobe = nprobe.clamp(1, self.nlist.max(1));
        for dev in &self.devices {
            dev.set_nprobe(nprobe as u32)?;
        }
        self.nprobe.store(nprobe, Ordering::SeqCst);
        Ok(())
    }

    pub fn nprobe(&self) -> usize {
        self.nprobe.load(Ordering::SeqCst)
    }

    pub fn reserve_memory(&self, n_vectors: u64) -> Result<(), EngineError> {
        for dev in &self.devices {
            dev.reserve_mem(n_vectors)?;
        }
        Ok(())
    }

    pub fn reclaim_memory(&self) -> Result<u64, EngineError> {
        let mut total = 0u64;
        for dev in &self.devices {
            total += dev.reclaim_mem()?;
        }
        Ok(total)
    }

    pub fn reset(&self) -> Result<(), EngineError> {
        for dev in &self.devices {
            dev.reset()?;
        }
        for row in self.list_counts.lock().iter_mut() {
            row.iter_mut().for_each(|c| *c = 0);
        }
        self.ntotal.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Assign `list_id` to the device currently holding the fewest
    /// vectors for that list (ties broken by lowest device index), the
    /// IVF sharding rule.
    fn pick_least_loaded(counts: &mut [Vec<u64>], list_id: usize) -> usize {
        let mut best = 0usize;
        let mut best_count = u64::MAX;
        for (d, row) in counts.iter().enumerate() {
            if row[list_id] < best_count {
                best_count = row[list_id];
                best = d;
            }
        }
        best
    }

    /// Flat sharding: smallest current base size, round-robin among ties.
    fn pick_flat_round_robin(&self, counts: &mut [Vec<u64>]) -> usize {
        let mut min_count = u64::MAX;
        let mut candidates = Vec::new();
        for (d, row) in counts.iter().enumerate() {
            let c = row[0];
            if c < min_count {
                min_count = c;
                candidates.clear();
                candidates.push(d);
            } else if c == min_count {
                candidates.push(d);
            }
        }
        let idx = self.flat_round_robin.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates[idx]
    }

    /// `row_codes` is `n` contiguous rows of `row_len` bytes each,
    /// already encoded for `self.code_kind`. `list_ids[i]` names the
    /// coarse list vector `i` belongs to (all zero for Flat). Pages the
    /// batch at `max_request_bytes`/`max_request_vectors` (spec.md
    /// §4.7) and shards each page across devices.
    pub fn add_with_ids(
        &self,
        row_codes: &[u8],
        row_len: usize,
        ids: &[UserId],
        list_ids: &[usize],
    ) -> Result<(), EngineError> {
        let n = ids.len();
        if n == 0 {
            return Ok(());
        }
        if row_codes.len() != n * row_len || list_ids.len() != n {
            return Err(EngineError::invalid_argument("add batch shape mismatch"));
        }

        // Assign each row to a (device, list) pair, updating the load
        // table as we go so later rows in the same batch see earlier
        // ones' placement.
        let mut assignment = Vec::with_capacity(n);
        {
            let mut counts = self.list_counts.lock();
            for i in 0..n {
                let list_id = if self.nlist <= 1 { 0 } else { list_ids[i] };
                if list_id >= self.nlist {
                    return Err(EngineError::invalid_argument("list id out of range"));
                }
                let device = if self.nlist <= 1 {
                    self.pick_flat_round_robin(&mut counts)
                } else {
                    Self::pick_least_loaded(&mut counts, list_id)
                };
                counts[device][list_id] += 1;
                assignment.push((device, list_id));
            }
        }

        let mut groups: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
        for (row, key) in assignment.into_iter().enumerate() {
            groups.entry(key).or_default().push(row);
        }

        let max_rows_per_page = (self.max_request_bytes / row_len.max(1)).min(self.max_request_vectors).max(1);

        let mut jobs = Vec::new();
        for ((device, list_id), rows) in groups {
            for chunk in rows.chunks(max_rows_per_page) {
                let mut code_bytes = Vec::with_capacity(chunk.len() * row_len);
                let mut chunk_ids = Vec::with_capacity(chunk.len());
                for &row in chunk {
                    code_bytes.extend_from_slice(&row_codes[row * row_len..(row + 1) * row_len]);
                    chunk_ids.push(ids[row]);
                }
                jobs.push(AddJob { device, list_id: list_id as u32, code_bytes, ids: chunk_ids });
            }
        }

        let op = Arc::new(AddOperator { devices: self.devices.clone(), add_kind: self.add_kind });
        let results = self.dispatcher.fan_out(jobs, op);
        for r in results {
            r.into_inner()?;
        }
        self.ntotal.fetch_add(n as u64, Ordering::SeqCst);
        Ok(())
    }

    /// Broadcast `queries` to every device, gather each device's
    /// per-query top-K, and merge with the pointer-based k-way merge
    /// from spec.md §4.7.
    pub fn search(&self, queries: &[f32], n: usize, k: usize, mask: &[u8]) -> Result<(Vec<f32>, Vec<UserId>), EngineError> {
        if n == 0 {
            return Ok((Vec::new(), Vec::new()));
        }
        let op = Arc::new(SearchOperator {
            n,
            k,
            nprobe: self.nprobe(),
            queries: queries.to_vec(),
            mask: mask.to_vec(),
        });
        let results = self.dispatcher.fan_out(self.devices.clone(), op);
        let mut per_device = Vec::with_capacity(results.len());
        for r in results {
            per_device.push(r.into_inner()?);
        }
        Ok(merge_cross_device(&per_device, n, k, self.metric))
    }

    pub fn remove_ids(&self, ids: Vec<UserId>) -> Result<u64, EngineError> {
        let mut total = 0u64;
        for dev in &self.devices {
            let mut w = Writer::new();
            RemoveIdsRequest { handle: dev.handle, ids: ids.clone() }.encode(&mut w);
            total += dev.remove(RpcKind::IndexRemoveIds, w.into_bytes())?;
        }
        self.ntotal.fetch_sub(total.min(self.ntotal.load(Ordering::SeqCst)), Ordering::SeqCst);
        Ok(total)
    }

    pub fn remove_range_ids(&self, min: UserId, max: UserId) -> Result<u64, EngineError> {
        let selector = Selector::Range { min, max };
        if selector.is_empty() {
            return Ok(0);
        }
        let mut total = 0u64;
        for dev in &self.devices {
            let mut w = Writer::new();
            RemoveRangeIdsRequest { handle: dev.handle, min, max }.encode(&mut w);
            total += dev.remove(RpcKind::IndexRemoveRangeIds, w.into_bytes())?;
        }
        self.ntotal.fetch_sub(total.min(self.ntotal.load(Ordering::SeqCst)), Ordering::SeqCst);
        Ok(total)
    }

    /// Concatenate every device's base (Flat only: `nlist == 1`).
    pub fn get_base(&self) -> Result<(Vec<u8>, Vec<u32>), EngineError> {
        let mut codes = Vec::new();
        let mut ids = Vec::new();
        for dev in &self.devices {
            let (c, i) = dev.get_base()?;
            codes.extend(c);
            ids.extend(i);
        }
        Ok((codes, ids))
    }

    pub fn get_base_size(&self) -> Result<u64, EngineError> {
        let mut total = 0u64;
        for dev in &self.devices {
            total += dev.get_base_size()?;
        }
        Ok(total)
    }

    pub fn get_list_codes(&self, list_id: usize) -> Result<(Vec<u8>, Vec<u32>), EngineError> {
        let mut codes = Vec::new();
        let mut ids = Vec::new();
        for dev in &self.devices {
            let (c, i) = dev.get_list_codes(list_id as u32)?;
            codes.extend(c);
            ids.extend(i);
        }
        Ok((codes, ids))
    }

    pub fn get_list_length(&self, list_id: usize) -> Result<u64, EngineError> {
        let mut total = 0u64;
        for dev in &self.devices {
            total += dev.get_list_length(list_id as u32)?;
        }
        Ok(total)
    }

    pub fn create_kind(&self) -> RpcKind {
        self.create_kind
    }

    /// Sum of every device's locally tracked count for `list_id`, used
    /// to synthesize the explicit all-ones use-mask spec.md §9's
    /// Int8-Cos resolution calls for instead of leaving the mask empty.
    pub fn local_list_total(&self, list_id: usize) -> u64 {
        self.list_counts.lock().iter().map(|row| row[list_id]).sum()
    }

    /// An all-ones use-mask covering every resident row across every
    /// list (not just list 0), repeated once per query, so Int8-IVF-Flat
    /// (`nlist > 1`) probing several differently-sized lists never reads
    /// past the mask `device.rs::search_batch` rebuilds per scanned
    /// list. Content is uniform so the exact per-list offset a given
    /// device lands on doesn't matter, only that the buffer is long
    /// enough to cover the largest list any device holds.
    pub fn build_all_ones_mask(&self, n: usize) -> Vec<u8> {
        let len: usize = (0..self.nlist()).map(|l| self.local_list_total(l) as usize).sum();
        let bytes_per_query = (len + 7) / 8;
        vec![0xFFu8; bytes_per_query * n]
    }

    /// Byte width of one code row for this index's encoding, the unit
    /// `add_with_ids`/persistence both page in.
    pub fn row_len(&self) -> usize {
        self.code_kind.element_size(self.dim)
    }

    /// Dump every list's raw codes/ids, the CPU-persistence mirror
    /// spec.md §6 describes.
    pub fn export_all_lists(&self) -> Result<Vec<(Vec<u8>, Vec<u32>)>, EngineError> {
        (0..self.nlist).map(|list_id| self.get_list_codes(list_id)).collect()
    }

    /// Re-add previously exported per-list raw codes, restoring an
    /// index from its `CpuIndex` mirror. Assumes training parameters
    /// (centroids/sq/pq) have already been pushed.
    pub fn import_all_lists(&self, lists: &[(Vec<u8>, Vec<u32>)]) -> Result<(), EngineError> {
        let row_len = self.row_len();
        for (list_id, (codes, ids)) in lists.iter().enumerate() {
            if ids.is_empty() {
                continue;
            }
            let list_ids = vec![list_id; ids.len()];
            self.add_with_ids(codes, row_len, ids, &list_ids)?;
        }
        Ok(())
    }
}

/// The per-query pointer-based k-way merge across device result lists
/// (spec.md §4.7): each device already returns its own top-K sorted
/// best-first, so the merge never has to re-sort, only repeatedly pick
/// the best still-live pointer.
fn merge_cross_device(per_device: &[(Vec<f32>, Vec<UserId>)], n: usize, k: usize, metric: Metric) -> (Vec<f32>, Vec<UserId>) {
    let num_devices = per_device.len();
    let mut out_d = Vec::with_capacity(n * k);
    let mut out_i = Vec::with_capacity(n * k);
    for qi in 0..n {
        let mut ptr = vec![0usize; num_devices];
        for _ in 0..k {
            let mut best: Option<(usize, f32, UserId)> = None;
            for d in 0..num_devices {
                if ptr[d] >= k {
                    continue;
                }
                let idx = qi * k + ptr[d];
                let (dist, id) = (per_device[d].0[idx], per_device[d].1[idx]);
                if id == SENTINEL_ID {
                    continue;
                }
                let replace = match best {
                    None => true,
                    Some((_, best_dist, _)) => metric.is_better(dist, best_dist),
                };
                if replace {
                    best = Some((d, dist, id));
                }
            }
            match best {
                Some((d, dist, id)) => {
                    out_d.push(dist);
                    out_i.push(id);
                    ptr[d] += 1;
                }
                None => {
                    out_d.push(metric.sentinel_distance());
                    out_i.push(SENTINEL_ID);
                }
            }
        }
    }
    (out_d, out_i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(num_devices: usize) -> EngineConfig {
        let mut c = EngineConfig::default();
        c.devices = (0..num_devices as u32).collect();
        c.topk_pool_threads = num_devices.max(1).min(4);
        c
    }

    #[test]
    fn flat_single_device_add_then_search_finds_self() {
        let cfg = config(1);
        let orch = Orchestrator::new(&cfg, 16, Metric::L2, CodeKind::Fp16Flat, 1).unwrap();
        assert!(orch.is_trained());

        let n = 4;
        let dim = 16;
        let mut codes = Vec::new();
        for i in 0..n {
            let row: Vec<half::f16> = (0..dim).map(|d| half::f16::from_f32((i * dim + d) as f32 * 0.01)).collect();
            codes.extend(bytemuck::cast_slice::<half::f16, u8>(&row));
        }
        let ids: Vec<u32> = vec![10, 11, 12, 13];
        let list_ids = vec![0usize; n];
        orch.add_with_ids(&codes, dim * 2, &ids, &list_ids).unwrap();
        assert_eq!(orch.ntotal(), n as u64);

        let query: Vec<f32> = (0..dim).map(|d| d as f32 * 0.01).collect();
        let (dist, ids_out) = orch.search(&query, 1, 1, &[]).unwrap();
        assert_eq!(ids_out[0], 10);
        assert!(dist[0] < 1e-3);
    }

    #[test]
    fn ivf_two_devices_shard_by_least_loaded_list() {
        let cfg = config(2);
        let orch = Orchestrator::new(&cfg, 16, Metric::L2, CodeKind::Fp16Flat, 2).unwrap();
        let centroids = vec![0.0f32; 16 * 2];
        orch.push_centroids(&centroids).unwrap();
        assert!(orch.is_trained());

        let dim = 16;
        let n = 4;
        let mut codes = Vec::new();
        for i in 0..n {
            let row: Vec<half::f16> = (0..dim).map(|d| half::f16::from_f32((i * dim + d) as f32 * 0.01)).collect();
            codes.extend(bytemuck::cast_slice::<half::f16, u8>(&row));
        }
        let ids: Vec<u32> = vec![1, 2, 3, 4];
        let list_ids = vec![0, 0, 1, 1];
        orch.add_with_ids(&codes, dim * 2, &ids, &list_ids).unwrap();
        assert_eq!(orch.ntotal(), 4);
        assert_eq!(orch.get_list_length(0).unwrap(), 2);
        assert_eq!(orch.get_list_length(1).unwrap(), 2);
    }

    #[test]
    fn remove_then_search_excludes_removed_id() {
        let cfg = config(1);
        let orch = Orchestrator::new(&cfg, 16, Metric::L2, CodeKind::Fp16Flat, 1).unwrap();
        let dim = 16;
        let n = 2;
        let mut codes = Vec::new();
        for i in 0..n {
            let row: Vec<half::f16> = (0..dim).map(|d| half::f16::from_f32((i * dim + d) as f32 * 0.01)).collect();
            codes.extend(bytemuck::cast_slice::<half::f16, u8>(&row));
        }
        orch.add_with_ids(&codes, dim * 2, &[7, 8], &[0, 0]).unwrap();
        let removed = orch.remove_ids(vec![7]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(orch.ntotal(), 1);
        let (_, ids) = orch.get_base().unwrap();
        assert_eq!(ids, vec![8]);
    }
}
