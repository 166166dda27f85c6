//! The closed enum of RPC message kinds, per spec.md §6.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RpcKind {
    CreateIndexFlat = 1,
    CreateIndexIvfPq = 2,
    CreateIndexIvfSq = 3,
    CreateIndexIvfFlat = 4,
    CreateIndexInt8Flat = 5,
    CreateIndexInt8IvfFlat = 6,
    CreateIndexPreTransform = 7,

    DestroyIndex = 10,

    IndexReset = 20,
    IndexReserveMem = 21,
    IndexReclaimMem = 22,

    IndexIvfUpdateCoarseCent = 30,
    IndexIvfPqUpdatePqCent = 31,
    IndexSqUpdateTrainedValue = 32,
    IndexIvfUpdateNprobe = 33,

    IndexFlatAdd = 40,
    IndexIvfPqAdd = 41,
    IndexIvfSqAdd = 42,
    IndexIvfFlatAdd = 43,
    IndexInt8IvfFlatAdd = 44,

    IndexSearch = 50,

    IndexRemoveIds = 60,
    IndexRemoveRangeIds = 61,

    IndexFlatGetBaseSize = 70,
    IndexFlatGetBase = 71,
    IndexIvfGetListLength = 72,
    IndexIvfGetListCodes = 73,
    IndexIvfFastGetListCodes = 74,

    TestDataIntegrity = 200,

    /// Not in spec.md's literal catalogue, but needed to carry a
    /// response frame's payload: every request kind above gets a reply
    /// framed with this kind plus the common status header (see
    /// `protocol::ResponseHeader`). Kept as its own kind, rather than
    /// overloading the request kind, so a misrouted frame is detectable
    /// by kind alone.
    Reply = 65535,
}

impl RpcKind {
    pub fn from_u16(v: u16) -> Option<Self> {
        use RpcKind::*;
        Some(match v {
            1 => CreateIndexFlat,
            2 => CreateIndexIvfPq,
            3 => CreateIndexIvfSq,
            4 => CreateIndexIvfFlat,
            5 => CreateIndexInt8Flat,
            6 => CreateIndexInt8IvfFlat,
            7 => CreateIndexPreTransform,
            10 => DestroyIndex,
            20 => IndexReset,
            21 => IndexReserveMem,
            22 => IndexReclaimMem,
            30 => IndexIvfUpdateCoarseCent,
            31 => IndexIvfPqUpdatePqCent,
            32 => IndexSqUpdateTrainedValue,
            33 => IndexIvfUpdateNprobe,
            40 => IndexFlatAdd,
            41 => IndexIvfPqAdd,
            42 => IndexIvfSqAdd,
            43 => IndexIvfFlatAdd,
            44 => IndexInt8IvfFlatAdd,
            50 => IndexSearch,
            60 => IndexRemoveIds,
            61 => IndexRemoveRangeIds,
            70 => IndexFlatGetBaseSize,
            71 => IndexFlatGetBase,
            72 => IndexIvfGetListLength,
            73 => IndexIvfGetListCodes,
            74 => IndexIvfFastGetListCodes,
            200 => TestDataIntegrity,
            65535 => Reply,
            _ => return None,
        })
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_round_trips_through_u16() {
        let kinds = [
            RpcKind::CreateIndexFlat,
            RpcKind::CreateIndexIvfPq,
            RpcKind::CreateIndexIvfSq,
            RpcKind::CreateIndexIvfFlat,
            RpcKind::CreateIndexInt8Flat,
            RpcKind::CreateIndexInt8IvfFlat,
            RpcKind::CreateIndexPreTransform,
            RpcKind::DestroyIndex,
            RpcKind::IndexReset,
            RpcKind::IndexReserveMem,
            RpcKind::IndexReclaimMem,
            RpcKind::IndexIvfUpdateCoarseCent,
            RpcKind::IndexIvfPqUpdatePqCent,
            RpcKind::IndexSqUpdateTrainedValue,
            RpcKind::IndexIvfUpdateNprobe,
            RpcKind::IndexFlatAdd,
            RpcKind::IndexIvfPqAdd,
            RpcKind::IndexIvfSqAdd,
            RpcKind::IndexIvfFlatAdd,
            RpcKind::IndexInt8IvfFlatAdd,
            RpcKind::IndexSearch,
            RpcKind::IndexRemoveIds,
            RpcKind::IndexRemoveRangeIds,
            RpcKind::IndexFlatGetBaseSize,
            RpcKind::IndexFlatGetBase,
            RpcKind::IndexIvfGetListLength,
            RpcKind::IndexIvfGetListCodes,
            RpcKind::IndexIvfFastGetListCodes,
            RpcKind::TestDataIntegrity,
            RpcKind::Reply,
        ];
        for k in kinds {
            assert_eq!(RpcKind::from_u16(k.as_u16()), Some(k));
        }
    }

    #[test]
    fn unknown_kind_rejected() {
        assert!(RpcKind::from_u16(9999).is_none());
    }
}
