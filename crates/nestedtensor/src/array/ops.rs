//! Element-wise operations, stacking and the bias broadcast helpers.

use super::DenseArray;
use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::strides::{compute_strides, increment_index};

impl<T: Scalar> DenseArray<T> {
    /// Apply a function to each element, returning a new array.
    pub fn map(&self, f: impl Fn(T) -> T) -> Self {
        let data: Vec<T> = self.to_vec().into_iter().map(f).collect();
        Self::from_storage(
            crate::storage::Storage::from_vec(data),
            0,
            self.shape.clone(),
            compute_strides(&self.shape),
        )
    }

    /// Combine two arrays of identical shape element-wise.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the shapes differ.
    pub fn zip_with(&self, other: &Self, f: impl Fn(T, T) -> T) -> Result<Self, TensorError> {
        if self.shape() != other.shape() {
            return Err(TensorError::shape_mismatch(self.shape(), other.shape()));
        }
        let data: Vec<T> = self
            .to_vec()
            .into_iter()
            .zip(other.to_vec())
            .map(|(x, y)| f(x, y))
            .collect();
        Self::from_vec(data, self.shape())
    }

    /// Element-wise sum.
    ///
    /// # Example
    ///
    /// ```
    /// use nestedtensor::DenseArray;
    ///
    /// let a = DenseArray::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap();
    /// let b = DenseArray::from_vec(vec![4.0, 5.0, 6.0], &[3]).unwrap();
    /// assert_eq!(a.add(&b).unwrap().to_vec(), vec![5.0, 7.0, 9.0]);
    /// ```
    pub fn add(&self, other: &Self) -> Result<Self, TensorError> {
        self.zip_with(other, |x, y| x + y)
    }

    /// Element-wise product.
    pub fn mul(&self, other: &Self) -> Result<Self, TensorError> {
        self.zip_with(other, |x, y| x * y)
    }

    /// Multiply all elements by a scalar, returning a new array.
    pub fn scale(&self, alpha: T) -> Self {
        self.map(|x| x * alpha)
    }

    /// Accumulate `other` into `self` in place.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the shapes differ; `self` is
    /// left untouched in that case.
    pub fn add_assign(&mut self, other: &Self) -> Result<(), TensorError> {
        if self.shape() != other.shape() {
            return Err(TensorError::shape_mismatch(self.shape(), other.shape()));
        }
        let rhs = other.to_vec();
        for (x, y) in self.data_mut().iter_mut().zip(rhs) {
            *x = *x + y;
        }
        Ok(())
    }

    /// Stack equally shaped arrays along a new leading axis.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::InvalidArgument` for an empty input and
    /// `TensorError::ShapeMismatch` if the shapes differ.
    pub fn stack(arrays: &[&Self]) -> Result<Self, TensorError> {
        let first = arrays
            .first()
            .ok_or_else(|| TensorError::InvalidArgument("stack expects a non-empty list".into()))?;
        let mut data = Vec::with_capacity(first.numel() * arrays.len());
        for array in arrays {
            if array.shape() != first.shape() {
                return Err(TensorError::shape_mismatch(first.shape(), array.shape()));
            }
            data.extend(array.to_vec());
        }
        let mut shape = Vec::with_capacity(first.ndim() + 1);
        shape.push(arrays.len());
        shape.extend_from_slice(first.shape());
        Self::from_vec(data, &shape)
    }

    /// Materialize `self` broadcast to `shape` (trailing-aligned, size-1 or
    /// missing dimensions expand).
    pub fn expand_to(&self, shape: &[usize]) -> Result<Self, TensorError> {
        let src_strides = broadcast_strides(self.shape(), self.strides(), shape)?;
        let len: usize = shape.iter().product();
        let mut data = Vec::with_capacity(len);
        if len > 0 {
            let src = self.storage.as_slice();
            let mut idx = vec![0; shape.len()];
            loop {
                let linear: usize = idx.iter().zip(&src_strides).map(|(i, s)| i * s).sum();
                data.push(src[self.offset + linear]);
                if !increment_index(&mut idx, shape) {
                    break;
                }
            }
        }
        Self::from_vec(data, shape)
    }

    /// Sum over the dimensions that broadcasting `shape` up to `self.shape()`
    /// would have expanded. The inverse of [`DenseArray::expand_to`] for
    /// gradients.
    pub fn sum_to_shape(&self, shape: &[usize]) -> Result<Self, TensorError> {
        if self.shape() == shape {
            return Ok(self.contiguous());
        }
        let out_strides = compute_strides(shape);
        let reduce_strides = broadcast_strides(shape, &out_strides, self.shape())?;
        let mut out = vec![T::zero(); shape.iter().product()];
        if self.numel() > 0 {
            let mut idx = vec![0; self.ndim()];
            for value in self.to_vec() {
                let linear: usize = idx.iter().zip(&reduce_strides).map(|(i, s)| i * s).sum();
                out[linear] = out[linear] + value;
                increment_index(&mut idx, self.shape());
            }
        }
        Self::from_vec(out, shape)
    }
}

/// Strides that read an array of `src_shape` as if it had `target` shape.
/// Broadcast dimensions get stride 0.
fn broadcast_strides(
    src_shape: &[usize],
    src_strides: &[usize],
    target: &[usize],
) -> Result<Vec<usize>, TensorError> {
    if src_shape.len() > target.len() {
        return Err(TensorError::shape_mismatch(target, src_shape));
    }
    let lead = target.len() - src_shape.len();
    let mut strides = vec![0; target.len()];
    for (i, (&dim, &stride)) in src_shape.iter().zip(src_strides).enumerate() {
        let t = target[lead + i];
        if dim == t {
            strides[lead + i] = stride;
        } else if dim != 1 {
            return Err(TensorError::shape_mismatch(target, src_shape));
        }
    }
    Ok(strides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_add_shape_mismatch() {
        let a = DenseArray::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap();
        let b = DenseArray::from_vec(vec![4.0, 5.0], &[2]).unwrap();
        assert!(matches!(a.add(&b), Err(TensorError::ShapeMismatch(_))));
    }

    #[test]
    fn test_add_assign_transposed_rhs() {
        let mut acc = DenseArray::<f64>::zeros(&[3, 2]);
        let a = DenseArray::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        acc.add_assign(&a.transpose(0, 1).unwrap()).unwrap();
        assert_eq!(acc.to_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_add_assign_keeps_aliases_intact() {
        let base = DenseArray::from_vec(vec![1.0, 1.0], &[2]).unwrap();
        let mut acc = base.clone();
        acc.add_assign(&base).unwrap();
        assert_eq!(base.to_vec(), vec![1.0, 1.0]);
        assert_eq!(acc.to_vec(), vec![2.0, 2.0]);
    }

    #[test]
    fn test_scale_and_mul() {
        let a = DenseArray::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap();
        assert_eq!(a.scale(2.0).to_vec(), vec![2.0, 4.0, 6.0]);
        assert_eq!(a.mul(&a).unwrap().to_vec(), vec![1.0, 4.0, 9.0]);
    }

    #[test]
    fn test_stack() {
        let a = DenseArray::from_vec(vec![1.0, 2.0], &[2]).unwrap();
        let b = DenseArray::from_vec(vec![3.0, 4.0], &[2]).unwrap();
        let s = DenseArray::stack(&[&a, &b]).unwrap();
        assert_eq!(s.shape(), &[2, 2]);
        assert_eq!(s.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);

        let c = DenseArray::from_vec(vec![5.0], &[1]).unwrap();
        assert!(DenseArray::stack(&[&a, &c]).is_err());
        assert!(DenseArray::<f64>::stack(&[]).is_err());
    }

    #[test]
    fn test_expand_bias_row() {
        let bias = DenseArray::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap();
        let e = bias.expand_to(&[2, 3]).unwrap();
        assert_eq!(e.to_vec(), vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);

        let col = DenseArray::from_vec(vec![1.0, 2.0], &[2, 1]).unwrap();
        let e = col.expand_to(&[2, 3]).unwrap();
        assert_eq!(e.to_vec(), vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);

        assert!(bias.expand_to(&[2, 4]).is_err());
    }

    #[test]
    fn test_sum_to_shape() {
        let g = DenseArray::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let row = g.sum_to_shape(&[3]).unwrap();
        assert_eq!(row.to_vec(), vec![5.0, 7.0, 9.0]);
        let keep = g.sum_to_shape(&[1, 3]).unwrap();
        assert_eq!(keep.shape(), &[1, 3]);
        let col = g.sum_to_shape(&[2, 1]).unwrap();
        assert_eq!(col.to_vec(), vec![6.0, 15.0]);
        let scalar = g.sum_to_shape(&[]).unwrap();
        assert_relative_eq!(scalar.to_vec()[0], 21.0);
    }
}
