//! C1: Tensor & Device Memory.
//!
//! [`Tensor`] is an owned N-dimensional (`rank <= 5`) view with
//! row-major strides fixed at construction, matching
//! `original_source/ascenddaemon/utils/AscendTensor.h`'s contract
//! (copy-from/copy-to with bounds checks, index-sequence element
//! access, re-view to an equal-or-smaller rank, fill).
//!
//! [`StackArena`] is the bump-pointer device-memory allocator from
//! `original_source/ascenddaemon/utils/AscendStackMemory.cpp`: a single
//! up-front allocation, LIFO release discipline, a high-water mark, and
//! a one-off fallback allocation (with a single warning) when a request
//! does not fit. It backs short-lived per-search scratch space (C6);
//! long-lived state such as inverted-list columns (C5) is allocated
//! directly and never drawn from the arena, per spec.md §4.1.

pub mod arena;
pub mod tensor;

pub use arena::{ArenaReservation, StackArena};
pub use tensor::Tensor;
