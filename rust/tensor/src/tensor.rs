use ivf_error::EngineError;

pub const MAX_RANK: usize = 5;

/// An owned, row-major, rank <= 5 view over `T`. Strides are derived
/// from `sizes` at construction and never mutated afterwards.
#[derive(Clone, Debug)]
pub struct Tensor<T> {
    data: Vec<T>,
    sizes: Vec<usize>,
    strides: Vec<usize>,
}

fn row_major_strides(sizes: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; sizes.len()];
    for i in (0..sizes.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * sizes[i + 1];
    }
    strides
}

impl<T: Clone + Default> Tensor<T> {
    /// Allocate a zero-filled tensor of the given shape.
    pub fn zeros(sizes: &[usize]) -> Result<Self, EngineError> {
        Self::validate_shape(sizes)?;
        let len: usize = sizes.iter().product();
        Ok(Tensor {
            data: vec![T::default(); len],
            strides: row_major_strides(sizes),
            sizes: sizes.to_vec(),
        })
    }
}

impl<T: Clone> Tensor<T> {
    /// Wrap an existing buffer as a tensor of the given shape.
    pub fn from_vec(data: Vec<T>, sizes: &[usize]) -> Result<Self, EngineError> {
        Self::validate_shape(sizes)?;
        let expected: usize = sizes.iter().product();
        if data.len() != expected {
            return Err(EngineError::invalid_argument(format!(
                "data has {} elements, shape expects {expected}",
                data.len()
            )));
        }
        Ok(Tensor {
            data,
            strides: row_major_strides(sizes),
            sizes: sizes.to_vec(),
        })
    }

    fn validate_shape(sizes: &[usize]) -> Result<(), EngineError> {
        if sizes.is_empty() || sizes.len() > MAX_RANK {
            return Err(EngineError::invalid_argument(format!(
                "tensor rank must be in 1..={MAX_RANK}, got {}",
                sizes.len()
            )));
        }
        if sizes.iter().any(|&s| s == 0) {
            return Err(EngineError::invalid_argument("tensor dimension cannot be 0"));
        }
        Ok(())
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn rank(&self) -> usize {
        self.sizes.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    fn flat_index(&self, idx: &[usize]) -> Result<usize, EngineError> {
        if idx.len() != self.sizes.len() {
            return Err(EngineError::invalid_argument(format!(
                "index has rank {}, tensor has rank {}",
                idx.len(),
                self.sizes.len()
            )));
        }
        let mut flat = 0;
        for (i, (&ix, &sz)) in idx.iter().zip(self.sizes.iter()).enumerate() {
            if ix >= sz {
                return Err(EngineError::invalid_argument(format!(
                    "index {ix} out of bounds for dimension {i} of size {sz}"
                )));
            }
            flat += ix * self.strides[i];
        }
        Ok(flat)
    }

    pub fn get(&self, idx: &[usize]) -> Result<&T, EngineError> {
        let flat = self.flat_index(idx)?;
        Ok(&self.data[flat])
    }

    pub fn set(&mut self, idx: &[usize], value: T) -> Result<(), EngineError> {
        let flat = self.flat_index(idx)?;
        self.data[flat] = value;
        Ok(())
    }

    /// Copy `src` into this tensor's backing buffer, bounds-checked.
    pub fn copy_from_slice(&mut self, src: &[T]) -> Result<(), EngineError> {
        if src.len() != self.data.len() {
            return Err(EngineError::invalid_argument(format!(
                "copy_from_slice length mismatch: tensor has {}, src has {}",
                self.data.len(),
                src.len()
            )));
        }
        self.data.clone_from_slice(src);
        Ok(())
    }

    /// Copy this tensor's contents into `dst`, bounds-checked.
    pub fn copy_to_slice(&self, dst: &mut [T]) -> Result<(), EngineError> {
        if dst.len() != self.data.len() {
            return Err(EngineError::invalid_argument(format!(
                "copy_to_slice length mismatch: tensor has {}, dst has {}",
                self.data.len(),
                dst.len()
            )));
        }
        dst.clone_from_slice(&self.data);
        Ok(())
    }

    /// Re-view this tensor with a new shape of equal or smaller rank,
    /// as long as the total element count is unchanged.
    pub fn view(&self, sizes: &[usize]) -> Result<Tensor<T>, EngineError> {
        if sizes.len() > self.sizes.len() {
            return Err(EngineError::invalid_argument(
                "view rank must be <= the original rank",
            ));
        }
        let expected: usize = sizes.iter().product();
        if expected != self.data.len() {
            return Err(EngineError::invalid_argument(format!(
                "view shape has {expected} elements, tensor has {}",
                self.data.len()
            )));
        }
        Tensor::from_vec(self.data.clone(), sizes)
    }

    /// Fill every element with `value`.
    pub fn fill(&mut self, value: T) {
        for slot in self.data.iter_mut() {
            *slot = value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_has_correct_shape_and_strides() {
        let t: Tensor<f32> = Tensor::zeros(&[2, 3, 4]).unwrap();
        assert_eq!(t.len(), 24);
        assert_eq!(t.sizes(), &[2, 3, 4]);
        assert_eq!(*t.get(&[1, 2, 3]).unwrap(), 0.0);
    }

    #[test]
    fn set_and_get_round_trip() {
        let mut t: Tensor<f32> = Tensor::zeros(&[4, 4]).unwrap();
        t.set(&[2, 1], 5.0).unwrap();
        assert_eq!(*t.get(&[2, 1]).unwrap(), 5.0);
        assert_eq!(*t.get(&[0, 0]).unwrap(), 0.0);
    }

    #[test]
    fn out_of_bounds_index_is_rejected() {
        let t: Tensor<f32> = Tensor::zeros(&[4, 4]).unwrap();
        assert!(t.get(&[4, 0]).is_err());
        assert!(t.get(&[0]).is_err());
    }

    #[test]
    fn rank_above_five_is_rejected() {
        let r: Result<Tensor<f32>, _> = Tensor::zeros(&[1, 1, 1, 1, 1, 1]);
        assert!(r.is_err());
    }

    #[test]
    fn view_collapses_rank() {
        let t: Tensor<f32> = Tensor::zeros(&[2, 3]).unwrap();
        let v = t.view(&[6]).unwrap();
        assert_eq!(v.rank(), 1);
        assert!(t.view(&[2, 3, 1]).is_err());
        assert!(t.view(&[5]).is_err());
    }

    #[test]
    fn fill_sets_every_element() {
        let mut t: Tensor<f32> = Tensor::zeros(&[3]).unwrap();
        t.fill(9.0);
        assert_eq!(t.as_slice(), &[9.0, 9.0, 9.0]);
    }

    #[test]
    fn copy_from_and_to_slice_are_bounds_checked() {
        let mut t: Tensor<f32> = Tensor::zeros(&[3]).unwrap();
        assert!(t.copy_from_slice(&[1.0, 2.0]).is_err());
        t.copy_from_slice(&[1.0, 2.0, 3.0]).unwrap();
        let mut out = vec![0.0; 3];
        t.copy_to_slice(&mut out).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0]);
    }
}
