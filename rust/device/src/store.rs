//! C5: Device Inverted-List Store.
//!
//! Grounded on `original_source/.../impl/IndexIVFSQ.cpp`'s
//! `getListVectorsReshaped`/row-block offset arithmetic (the `CUBE_ALIGN`
//! tiling and its inverse) and `impl/IndexIVF.cpp`'s
//! add/remove/reclaim-slack shape.

use ivf_error::EngineError;
use ivf_types::{Selector, CUBE_ALIGN_SIZE};

/// Byte offset of element `(row, dim)` in a Zz-tiled buffer of `dims`
/// elements per row, `elem_size` bytes per element. Rows and columns
/// are both blocked by [`CUBE_ALIGN_SIZE`] so a 16x16 tile of scalars is
/// contiguous on device.
pub fn tiled_offset(row: usize, dim: usize, dims: usize, elem_size: usize) -> usize {
    let padded_dims = pad16(dims);
    let row_block = row / CUBE_ALIGN_SIZE;
    let row_in_block = row % CUBE_ALIGN_SIZE;
    let dim_block = dim / CUBE_ALIGN_SIZE;
    let dim_in_block = dim % CUBE_ALIGN_SIZE;
    let block_elems = CUBE_ALIGN_SIZE * CUBE_ALIGN_SIZE;
    let elem_offset = row_block * CUBE_ALIGN_SIZE * padded_dims
        + dim_block * block_elems
        + row_in_block * CUBE_ALIGN_SIZE
        + dim_in_block;
    elem_offset * elem_size
}

pub fn pad16(n: usize) -> usize {
    (n + CUBE_ALIGN_SIZE - 1) / CUBE_ALIGN_SIZE * CUBE_ALIGN_SIZE
}

fn tiled_buffer_len(capacity_rows: usize, dims: usize, elem_size: usize) -> usize {
    pad16(capacity_rows) * pad16(dims) * elem_size
}

/// Re-tile `contiguous` (row-major, `n` rows of `dims` elements) into
/// the Zz layout, appending into `dst`, which must already be sized for
/// `n_before + n` rows.
fn scatter_into_tiled(
    dst: &mut [u8],
    contiguous: &[u8],
    n_before: usize,
    n: usize,
    dims: usize,
    elem_size: usize,
) {
    for r in 0..n {
        let row = n_before + r;
        for d in 0..dims {
            let src_off = r * dims * elem_size + d * elem_size;
            let dst_off = tiled_offset(row, d, dims, elem_size);
            dst[dst_off..dst_off + elem_size]
                .copy_from_slice(&contiguous[src_off..src_off + elem_size]);
        }
    }
}

fn gather_from_tiled(src: &[u8], n: usize, dims: usize, elem_size: usize) -> Vec<u8> {
    let mut out = vec![0u8; n * dims * elem_size];
    for row in 0..n {
        for d in 0..dims {
            let dst_off = row * dims * elem_size + d * elem_size;
            let src_off = tiled_offset(row, d, dims, elem_size);
            out[dst_off..dst_off + elem_size].copy_from_slice(&src[src_off..src_off + elem_size]);
        }
    }
    out
}

/// One coarse bucket's codes/ids/optional precomputed norms, on one
/// device. `codes` is always Zz-tiled; `dims`/`elem_size` describe the
/// logical (element-count, bytes-per-element) shape of one row.
pub struct InvertedList {
    dims: usize,
    elem_size: usize,
    len: usize,
    capacity_rows: usize,
    codes: Vec<u8>,
    ids: Vec<u32>,
    precompute: Option<Vec<f32>>,
}

impl InvertedList {
    pub fn new(dims: usize, elem_size: usize, with_precompute: bool) -> Self {
        InvertedList {
            dims,
            elem_size,
            len: 0,
            capacity_rows: 0,
            codes: Vec::new(),
            ids: Vec::new(),
            precompute: with_precompute.then(Vec::new),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn precompute(&self) -> Option<&[f32]> {
        self.precompute.as_deref()
    }

    /// The Zz-tiled bytes of row `idx`, copied out contiguously.
    pub fn code_row(&self, idx: usize) -> Vec<u8> {
        let mut out = vec![0u8; self.dims * self.elem_size];
        for d in 0..self.dims {
            let off = tiled_offset(idx, d, self.dims, self.elem_size);
            let dst = d * self.elem_size;
            out[dst..dst + self.elem_size]
                .copy_from_slice(&self.codes[off..off + self.elem_size]);
        }
        out
    }

    pub fn codes_tiled(&self) -> &[u8] {
        &self.codes
    }

    /// spec.md §4.5: round the new total up to the block size, resize
    /// the three columns, re-tile the incoming contiguous codes.
    pub fn add(
        &mut self,
        contiguous_codes: &[u8],
        ids: &[u32],
        precompute: Option<&[f32]>,
    ) -> Result<(), EngineError> {
        let n = ids.len();
        if n == 0 {
            return Ok(());
        }
        if contiguous_codes.len() != n * self.dims * self.elem_size {
            return Err(EngineError::invalid_argument(
                "code buffer length does not match n * dims * elem_size",
            ));
        }
        let new_len = self.len + n;
        let new_capacity_rows = pad16(new_len);
        if new_capacity_rows > self.capacity_rows {
            let mut grown = vec![0u8; tiled_buffer_len(new_capacity_rows, self.dims, self.elem_size)];
            grown[..self.codes.len()].copy_from_slice(&self.codes);
            self.codes = grown;
            self.capacity_rows = new_capacity_rows;
        }
        scatter_into_tiled(&mut self.codes, contiguous_codes, self.len, n, self.dims, self.elem_size);
        self.ids.extend_from_slice(ids);
        match (&mut self.precompute, precompute) {
            (Some(dst), Some(src)) => dst.extend_from_slice(src),
            (Some(dst), None) => dst.extend(std::iter::repeat(0.0).take(n)),
            (None, _) => {}
        }
        self.len = new_len;
        Ok(())
    }

    /// spec.md §4.5: swap-remove matching positions, then reclaim slack
    /// if the free fraction exceeds 25%, retiling down to one-eighth
    /// free.
    pub fn remove(&mut self, selector: &Selector) -> usize {
        let mut removed = 0;
        let mut p = 0;
        while p < self.len {
            if selector.matches(self.ids[p]) {
                let last = self.len - 1;
                if p != last {
                    let last_row = self.code_row(last);
                    self.write_row(p, &last_row);
                    self.ids[p] = self.ids[last];
                    if let Some(pc) = &mut self.precompute {
                        pc[p] = pc[last];
                    }
                }
                self.ids.pop();
                if let Some(pc) = &mut self.precompute {
                    pc.pop();
                }
                self.len -= 1;
                removed += 1;
                // continue scanning from p (spec.md §4.5)
            } else {
                p += 1;
            }
        }
        self.maybe_reclaim();
        removed
    }

    fn write_row(&mut self, idx: usize, contiguous_row: &[u8]) {
        for d in 0..self.dims {
            let off = tiled_offset(idx, d, self.dims, self.elem_size);
            let src = d * self.elem_size;
            self.codes[off..off + self.elem_size]
                .copy_from_slice(&contiguous_row[src..src + self.elem_size]);
        }
    }

    fn maybe_reclaim(&mut self) {
        if self.capacity_rows == 0 {
            return;
        }
        let free = self.capacity_rows - self.len;
        if free as f64 > 0.25 * self.capacity_rows as f64 {
            let target_capacity = pad16((self.len as f64 * 8.0 / 7.0).ceil() as usize).max(pad16(self.len));
            if target_capacity < self.capacity_rows {
                let rows: Vec<Vec<u8>> = (0..self.len).map(|r| self.code_row(r)).collect();
                self.codes = vec![0u8; tiled_buffer_len(target_capacity, self.dims, self.elem_size)];
                self.capacity_rows = target_capacity;
                for (r, row) in rows.iter().enumerate() {
                    self.write_row(r, row);
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.len = 0;
        self.capacity_rows = 0;
        self.codes.clear();
        self.ids.clear();
        if let Some(pc) = &mut self.precompute {
            pc.clear();
        }
    }

    /// Inverse of the tiling: a contiguous `(len x dims*elem_size)` byte
    /// block, for cpu-clone / fast-bulk-extract.
    pub fn get_codes_reshaped(&self) -> Vec<u8> {
        gather_from_tiled(&self.codes, self.len, self.dims, self.elem_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivf_types::Selector;

    #[test]
    fn add_then_reshape_round_trips_for_unaligned_length() {
        let dims = 16;
        let mut list = InvertedList::new(dims, 1, false);
        let n = 20; // not a multiple of 16
        let mut contiguous = vec![0u8; n * dims];
        for (i, b) in contiguous.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let ids: Vec<u32> = (0..n as u32).collect();
        list.add(&contiguous, &ids, None).unwrap();
        assert_eq!(list.len(), n);
        assert_eq!(list.get_codes_reshaped(), contiguous);
    }

    #[test]
    fn remove_matching_swaps_from_tail() {
        let dims = 16;
        let mut list = InvertedList::new(dims, 1, false);
        let contiguous = vec![0u8; 4 * dims];
        let ids = vec![10, 11, 12, 13];
        list.add(&contiguous, &ids, None).unwrap();
        let removed = list.remove(&Selector::Batch(vec![11]));
        assert_eq!(removed, 1);
        assert_eq!(list.len(), 3);
        assert!(!list.ids().contains(&11));
    }

    #[test]
    fn precompute_column_stays_aligned_with_ids_after_remove() {
        let dims = 16;
        let mut list = InvertedList::new(dims, 1, true);
        let contiguous = vec![0u8; 3 * dims];
        list.add(&contiguous, &[1, 2, 3], Some(&[1.0, 2.0, 3.0])).unwrap();
        list.remove(&Selector::Batch(vec![1]));
        assert_eq!(list.ids().len(), list.precompute().unwrap().len());
    }

    #[test]
    fn reset_clears_everything() {
        let dims = 16;
        let mut list = InvertedList::new(dims, 1, false);
        list.add(&vec![0u8; dims], &[5], None).unwrap();
        list.reset();
        assert_eq!(list.len(), 0);
        assert!(list.get_codes_reshaped().is_empty());
    }
}
