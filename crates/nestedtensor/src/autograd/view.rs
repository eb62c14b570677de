//! Backward function of a strided view into a larger array.

use super::graph::{GradFn, NodeId};
use crate::array::DenseArray;
use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::strides::{cartesian_to_linear, increment_index};

/// Scatters the gradient of a view back into a zero array shaped like its
/// base. Views are assumed non-overlapping within their own extent.
#[derive(Debug)]
pub struct ViewBackward {
    base: NodeId,
    base_shape: Vec<usize>,
    offset: usize,
    shape: Vec<usize>,
    strides: Vec<usize>,
}

impl ViewBackward {
    /// `offset` and `strides` are in elements relative to the start of the
    /// (contiguous) base.
    pub fn new(
        base: NodeId,
        base_shape: Vec<usize>,
        offset: usize,
        shape: &[usize],
        strides: &[usize],
    ) -> Self {
        Self {
            base,
            base_shape,
            offset,
            shape: shape.to_vec(),
            strides: strides.to_vec(),
        }
    }
}

impl<T: Scalar> GradFn<T> for ViewBackward {
    fn backward(
        &self,
        grad_output: &DenseArray<T>,
    ) -> Result<Vec<(NodeId, DenseArray<T>)>, TensorError> {
        if grad_output.shape() != self.shape.as_slice() {
            return Err(TensorError::shape_mismatch(&self.shape, grad_output.shape()));
        }
        let mut base_grad = DenseArray::zeros(&self.base_shape);
        let len = base_grad.numel();
        let data = base_grad.data_mut();
        if grad_output.numel() > 0 {
            let mut idx = vec![0; self.shape.len()];
            for value in grad_output.to_vec() {
                let pos = self.offset + cartesian_to_linear(&idx, &self.strides);
                if pos >= len {
                    return Err(TensorError::IndexOutOfBounds {
                        index: pos,
                        dim_size: len,
                    });
                }
                data[pos] = data[pos] + value;
                increment_index(&mut idx, &self.shape);
            }
        }
        Ok(vec![(self.base, base_grad)])
    }

    fn inputs(&self) -> Vec<NodeId> {
        vec![self.base]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strides::compute_strides;

    #[test]
    fn test_scatter_into_base() {
        let base = NodeId::new_for_test(0);
        let view = ViewBackward::new(base, vec![6], 2, &[2, 2], &compute_strides(&[2, 2]));
        let grad = DenseArray::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let out = GradFn::<f64>::backward(&view, &grad).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, base);
        assert_eq!(out[0].1.to_vec(), vec![0.0, 0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_strided_view() {
        let base = NodeId::new_for_test(0);
        // Column 1 of a 2x3 base.
        let view = ViewBackward::new(base, vec![2, 3], 1, &[2], &[3]);
        let grad = DenseArray::from_vec(vec![5.0, 7.0], &[2]).unwrap();
        let out = GradFn::<f64>::backward(&view, &grad).unwrap();
        assert_eq!(out[0].1.shape(), &[2, 3]);
        assert_eq!(out[0].1.to_vec(), vec![0.0, 5.0, 0.0, 0.0, 7.0, 0.0]);
    }

    #[test]
    fn test_wrong_gradient_shape() {
        let view = ViewBackward::new(NodeId::new_for_test(0), vec![4], 0, &[4], &[1]);
        let grad = DenseArray::<f64>::zeros(&[3]);
        assert!(GradFn::<f64>::backward(&view, &grad).is_err());
    }
}
