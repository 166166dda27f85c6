//! Request/response payload shapes for every [`crate::RpcKind`].
//!
//! Both the device-side server (`ivf-device`) and the host-side client
//! stub (`ivf-index`) encode/decode through these types so the wire
//! format cannot drift between the two ends.

use crate::wire::{Reader, Writer};
use ivf_error::EngineError;
use ivf_types::UserId;

/// Common envelope every reply carries ahead of its kind-specific body.
pub struct ResponseHeader {
    pub ok: bool,
    pub message: String,
}

impl ResponseHeader {
    pub fn ok() -> Self {
        ResponseHeader {
            ok: true,
            message: String::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ResponseHeader {
            ok: false,
            message: message.into(),
        }
    }

    pub fn encode(&self, w: &mut Writer) {
        w.u8(self.ok as u8);
        w.bytes(self.message.as_bytes());
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        let ok = r.u8()? != 0;
        let message = String::from_utf8_lossy(&r.bytes()?).into_owned();
        Ok(ResponseHeader { ok, message })
    }

    pub fn into_result(self) -> Result<(), EngineError> {
        if self.ok {
            Ok(())
        } else {
            Err(EngineError::TransportFailure(self.message))
        }
    }
}

pub struct CreateIndexRequest {
    pub dimension: u32,
    pub metric: u8,
    pub nlist: u32,
    pub m: u32,
    pub nbits: u32,
}

impl CreateIndexRequest {
    pub fn encode(&self, w: &mut Writer) {
        w.u32(self.dimension)
            .u8(self.metric)
            .u32(self.nlist)
            .u32(self.m)
            .u32(self.nbits);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(CreateIndexRequest {
            dimension: r.u32()?,
            metric: r.u8()?,
            nlist: r.u32()?,
            m: r.u32()?,
            nbits: r.u32()?,
        })
    }
}

pub struct CreateIndexResponse {
    pub handle: u32,
}

impl CreateIndexResponse {
    pub fn encode(&self, w: &mut Writer) {
        w.u32(self.handle);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(CreateIndexResponse { handle: r.u32()? })
    }
}

pub struct HandleRequest {
    pub handle: u32,
}

impl HandleRequest {
    pub fn encode(&self, w: &mut Writer) {
        w.u32(self.handle);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(HandleRequest { handle: r.u32()? })
    }
}

pub struct ReserveMemRequest {
    pub handle: u32,
    pub n_vectors: u64,
}

impl ReserveMemRequest {
    pub fn encode(&self, w: &mut Writer) {
        w.u32(self.handle).u64(self.n_vectors);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(ReserveMemRequest {
            handle: r.u32()?,
            n_vectors: r.u64()?,
        })
    }
}

pub struct ReclaimMemResponse {
    pub bytes_freed: u64,
}

impl ReclaimMemResponse {
    pub fn encode(&self, w: &mut Writer) {
        w.u64(self.bytes_freed);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(ReclaimMemResponse {
            bytes_freed: r.u64()?,
        })
    }
}

pub struct UpdateCentroidsRequest {
    pub handle: u32,
    pub centroids: Vec<f32>,
}

impl UpdateCentroidsRequest {
    pub fn encode(&self, w: &mut Writer) {
        w.u32(self.handle).f32_vec(&self.centroids);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(UpdateCentroidsRequest {
            handle: r.u32()?,
            centroids: r.f32_vec()?,
        })
    }
}

pub struct UpdateTrainedValueRequest {
    pub handle: u32,
    pub vmin: Vec<f32>,
    pub vdiff: Vec<f32>,
}

impl UpdateTrainedValueRequest {
    pub fn encode(&self, w: &mut Writer) {
        w.u32(self.handle).f32_vec(&self.vmin).f32_vec(&self.vdiff);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(UpdateTrainedValueRequest {
            handle: r.u32()?,
            vmin: r.f32_vec()?,
            vdiff: r.f32_vec()?,
        })
    }
}

pub struct UpdateNprobeRequest {
    pub handle: u32,
    pub nprobe: u32,
}

impl UpdateNprobeRequest {
    pub fn encode(&self, w: &mut Writer) {
        w.u32(self.handle).u32(self.nprobe);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(UpdateNprobeRequest {
            handle: r.u32()?,
            nprobe: r.u32()?,
        })
    }
}

pub struct AddRequest {
    pub handle: u32,
    pub list_id: u32,
    pub n: u32,
    pub code_bytes: Vec<u8>,
    pub ids: Vec<u32>,
}

impl AddRequest {
    pub fn encode(&self, w: &mut Writer) {
        w.u32(self.handle)
            .u32(self.list_id)
            .u32(self.n)
            .bytes(&self.code_bytes)
            .u32_vec(&self.ids);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(AddRequest {
            handle: r.u32()?,
            list_id: r.u32()?,
            n: r.u32()?,
            code_bytes: r.bytes()?,
            ids: r.u32_vec()?,
        })
    }
}

pub struct AddResponse {
    pub new_total: u64,
}

impl AddResponse {
    pub fn encode(&self, w: &mut Writer) {
        w.u64(self.new_total);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(AddResponse {
            new_total: r.u64()?,
        })
    }
}

pub struct SearchRequest {
    pub handle: u32,
    pub n: u32,
    pub k: u32,
    pub queries: Vec<f32>,
    pub nprobe: u32,
    /// Per-query use mask, flattened; empty means "search everything".
    pub mask: Vec<u8>,
}

impl SearchRequest {
    pub fn encode(&self, w: &mut Writer) {
        w.u32(self.handle)
            .u32(self.n)
            .u32(self.k)
            .f32_vec(&self.queries)
            .u32(self.nprobe)
            .bytes(&self.mask);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(SearchRequest {
            handle: r.u32()?,
            n: r.u32()?,
            k: r.u32()?,
            queries: r.f32_vec()?,
            nprobe: r.u32()?,
            mask: r.bytes()?,
        })
    }
}

/// Flattened `n * k` row-major (distance, id) pairs.
pub struct SearchResponse {
    pub distances: Vec<f32>,
    pub ids: Vec<UserId>,
}

impl SearchResponse {
    pub fn encode(&self, w: &mut Writer) {
        w.f32_vec(&self.distances).u32_vec(&self.ids);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(SearchResponse {
            distances: r.f32_vec()?,
            ids: r.u32_vec()?,
        })
    }
}

pub struct RemoveIdsRequest {
    pub handle: u32,
    pub ids: Vec<u32>,
}

impl RemoveIdsRequest {
    pub fn encode(&self, w: &mut Writer) {
        w.u32(self.handle).u32_vec(&self.ids);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(RemoveIdsRequest {
            handle: r.u32()?,
            ids: r.u32_vec()?,
        })
    }
}

pub struct RemoveRangeIdsRequest {
    pub handle: u32,
    pub min: u32,
    pub max: u32,
}

impl RemoveRangeIdsRequest {
    pub fn encode(&self, w: &mut Writer) {
        w.u32(self.handle).u32(self.min).u32(self.max);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(RemoveRangeIdsRequest {
            handle: r.u32()?,
            min: r.u32()?,
            max: r.u32()?,
        })
    }
}

pub struct RemoveResponse {
    pub removed: u64,
}

impl RemoveResponse {
    pub fn encode(&self, w: &mut Writer) {
        w.u64(self.removed);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(RemoveResponse {
            removed: r.u64()?,
        })
    }
}

pub struct SizeResponse {
    pub size: u64,
}

impl SizeResponse {
    pub fn encode(&self, w: &mut Writer) {
        w.u64(self.size);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(SizeResponse { size: r.u64()? })
    }
}

pub struct GetBaseResponse {
    pub code_bytes: Vec<u8>,
    pub ids: Vec<u32>,
}

impl GetBaseResponse {
    pub fn encode(&self, w: &mut Writer) {
        w.bytes(&self.code_bytes).u32_vec(&self.ids);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(GetBaseResponse {
            code_bytes: r.bytes()?,
            ids: r.u32_vec()?,
        })
    }
}

pub struct ListRequest {
    pub handle: u32,
    pub list_id: u32,
}

impl ListRequest {
    pub fn encode(&self, w: &mut Writer) {
        w.u32(self.handle).u32(self.list_id);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(ListRequest {
            handle: r.u32()?,
            list_id: r.u32()?,
        })
    }
}

/// One chunk of a `IndexIvfFastGetListCodes` stream: the device writes
/// its tiled code buffer straight across the wire without an
/// intermediate host-side copy through `GetListCodes`.
pub struct FastListChunk {
    pub list_id: u32,
    pub list_size: u32,
    pub code_bytes: Vec<u8>,
    pub ids: Vec<u32>,
    /// True on the chunk that ends the stream (may carry data too).
    pub is_last: bool,
}

impl FastListChunk {
    pub fn encode(&self, w: &mut Writer) {
        w.u32(self.list_id)
            .u32(self.list_size)
            .bytes(&self.code_bytes)
            .u32_vec(&self.ids)
            .u8(self.is_last as u8);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(FastListChunk {
            list_id: r.u32()?,
            list_size: r.u32()?,
            code_bytes: r.bytes()?,
            ids: r.u32_vec()?,
            is_last: r.u8()? != 0,
        })
    }
}

pub struct IntegrityProbeRequest {
    pub payload: Vec<u8>,
}

impl IntegrityProbeRequest {
    pub fn encode(&self, w: &mut Writer) {
        w.bytes(&self.payload);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(IntegrityProbeRequest {
            payload: r.bytes()?,
        })
    }
}

pub struct IntegrityProbeResponse {
    pub checksum: u32,
    pub echoed: Vec<u8>,
}

impl IntegrityProbeResponse {
    pub fn encode(&self, w: &mut Writer) {
        w.u32(self.checksum).bytes(&self.echoed);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, EngineError> {
        Ok(IntegrityProbeResponse {
            checksum: r.u32()?,
            echoed: r.bytes()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_request_round_trips() {
        let req = SearchRequest {
            handle: 3,
            n: 2,
            k: 5,
            queries: vec![1.0, 2.0, 3.0, 4.0],
            nprobe: 8,
            mask: vec![0xFF, 0x01],
        };
        let mut w = Writer::new();
        req.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let back = SearchRequest::decode(&mut r).unwrap();
        assert_eq!(back.handle, 3);
        assert_eq!(back.queries, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(back.mask, vec![0xFF, 0x01]);
    }

    #[test]
    fn response_header_error_round_trips_as_err() {
        let header = ResponseHeader::error("capacity exceeded");
        let mut w = Writer::new();
        header.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let back = ResponseHeader::decode(&mut r).unwrap();
        assert!(back.into_result().is_err());
    }
}
