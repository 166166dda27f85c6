//! Bump-pointer device memory arena, shaped after
//! `original_source/ascenddaemon/utils/AscendStackMemory.cpp`'s `Stack`.

use ivf_error::EngineError;
use parking_lot::Mutex;
use std::sync::Arc;

struct Inner {
    size: usize,
    head: usize,
    /// Outstanding reservations, in allocation order; a release must
    /// name the tail entry (LIFO discipline, spec.md §4.1).
    outstanding: Vec<(usize, usize)>,
    high_water: usize,
    warned_fallback: bool,
}

/// A single up-front device allocation, bumped on each request. Falls
/// back to an individual allocation (with a one-time warning) if a
/// request does not fit in the remaining space.
pub struct StackArena {
    inner: Mutex<Inner>,
}

impl StackArena {
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(StackArena {
            inner: Mutex::new(Inner {
                size,
                head: 0,
                outstanding: Vec::new(),
                high_water: 0,
                warned_fallback: false,
            }),
        })
    }

    /// Bytes currently available on the stack (not counting fallback capacity).
    pub fn available(&self) -> usize {
        let inner = self.inner.lock();
        inner.size - inner.head
    }

    pub fn high_water_mark(&self) -> usize {
        self.inner.lock().high_water
    }

    /// Reserve `size` bytes. Reservations must be released in reverse
    /// (LIFO) order via [`ArenaReservation`]'s `Drop` impl.
    pub fn alloc(self: &Arc<Self>, size: usize) -> ArenaReservation {
        let mut inner = self.inner.lock();
        if inner.head + size <= inner.size {
            let offset = inner.head;
            inner.head += size;
            inner.outstanding.push((offset, size));
            inner.high_water = inner.high_water.max(inner.head);
            ArenaReservation {
                arena: Some(self.clone()),
                buffer: vec![0u8; size],
                offset: Some(offset),
                size,
            }
        } else {
            if !inner.warned_fallback {
                inner.warned_fallback = true;
                tracing::warn!(
                    requested = size,
                    available = inner.size - inner.head,
                    "stack arena exhausted, falling back to a direct allocation"
                );
            }
            ArenaReservation {
                arena: Some(self.clone()),
                buffer: vec![0u8; size],
                offset: None,
                size,
            }
        }
    }

    /// Same as [`StackArena::alloc`] but fails instead of falling back,
    /// for call sites that must split the request rather than spill.
    pub fn try_alloc(self: &Arc<Self>, size: usize) -> Result<ArenaReservation, EngineError> {
        let inner = self.inner.lock();
        let available = inner.size - inner.head;
        if size > available {
            return Err(EngineError::Capacity {
                requested: size,
                available,
            });
        }
        drop(inner);
        Ok(self.alloc(size))
    }

    fn release(&self, offset: Option<usize>, size: usize) {
        let Some(offset) = offset else {
            // Fallback allocation: nothing to give back to the stack.
            return;
        };
        let mut inner = self.inner.lock();
        match inner.outstanding.last().copied() {
            Some((top_off, top_size)) if top_off == offset && top_size == size => {
                inner.outstanding.pop();
                inner.head = top_off;
            }
            _ => {
                tracing::error!(
                    offset,
                    size,
                    "arena reservation released out of LIFO order; leaking the slot"
                );
            }
        }
    }

    /// Reset the bump pointer. Only valid once every reservation has
    /// been dropped; long-lived allocations must live outside the arena.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if !inner.outstanding.is_empty() {
            tracing::warn!(
                outstanding = inner.outstanding.len(),
                "resetting arena with outstanding reservations"
            );
        }
        inner.head = 0;
        inner.outstanding.clear();
    }
}

/// An in-flight arena reservation. Must be released in the reverse
/// order it was acquired; `Drop` enforces this against the arena's
/// bookkeeping and logs (rather than panics) on violation, since a
/// violation here should fail the surrounding search, not the process.
pub struct ArenaReservation {
    arena: Option<Arc<StackArena>>,
    buffer: Vec<u8>,
    offset: Option<usize>,
    size: usize,
}

impl ArenaReservation {
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// True if this reservation came from the stack proper rather than
    /// a capacity-exceeded fallback allocation.
    pub fn is_stack_backed(&self) -> bool {
        self.offset.is_some()
    }
}

impl Drop for ArenaReservation {
    fn drop(&mut self) {
        if let Some(arena) = self.arena.take() {
            arena.release(self.offset, self.size);
        }
    }
}
