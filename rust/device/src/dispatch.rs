//! C3: Operator Dispatch.
//!
//! Grounded on `original_source/.../AscendIndexIVF.cpp`'s per-batch-size
//! operator cache and `ModelProcess.cpp`'s submit/wait-free-of-sync
//! shape. Real device kernels are pre-compiled per `(kind, batch size)`;
//! the software reference device has nothing to compile, so the
//! "handle" is just the kind/batch pair itself, but the cache and the
//! "submit without synchronising" contract are preserved so the
//! orchestrator can rely on the same discrete batch-size set regardless
//! of whether a real accelerator is behind the session.

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    CoarseL1,
    ListScanSq8L2,
    ListScanSq8Ip,
    ListScanFlatL2,
    ListScanFlatIp,
    ListScanPq,
    ListScanInt8L2,
    ListScanInt8Cos,
    TopKSelect,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OperatorKey {
    pub kind: OperatorKind,
    pub batch_size: usize,
}

/// A "compiled" kernel handle. The reference device has no kernel
/// binary to hold, so this only records that the (kind, batch) pair was
/// registered at construction time, matching the source's "pre-build
/// one entry per supported batch size" discipline.
#[derive(Clone, Copy)]
pub struct OperatorHandle {
    pub key: OperatorKey,
}

pub struct OperatorRegistry {
    handles: HashMap<OperatorKey, OperatorHandle>,
}

impl OperatorRegistry {
    /// Pre-build one handle per `(kind, batch_size)` pair, the way an
    /// index constructor walks its supported batch-size list.
    pub fn new(kinds: &[OperatorKind], batch_sizes: &[usize]) -> Self {
        let mut handles = HashMap::new();
        for &kind in kinds {
            for &batch_size in batch_sizes {
                let key = OperatorKey { kind, batch_size };
                handles.insert(key, OperatorHandle { key });
            }
        }
        OperatorRegistry { handles }
    }

    pub fn get(&self, kind: OperatorKind, batch_size: usize) -> Option<OperatorHandle> {
        self.handles.get(&OperatorKey { kind, batch_size }).copied()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
