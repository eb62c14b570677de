//! Packed layout: building leaf views over a single flat buffer.

use tracing::trace;

use super::NestedTensor;
use crate::array::DenseArray;
use crate::autograd::PackBackward;
use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::strides::compute_strides;
use crate::tree::{ShapeTree, TreeNode, shape_numel};

/// Build leaf views of `buffer` with the shapes in `sizes`.
///
/// Leaves are laid out back to back in traversal order: each leaf starts
/// at the sum of the element counts of the leaves before it. `strides`
/// defaults to row-major strides for each leaf. `buffer` must be a
/// contiguous 1-D array holding exactly the elements described.
///
/// If `buffer` requires grad, every view is registered so that gradients
/// flow back into it.
///
/// # Errors
///
/// - `ElementCountMismatch` if the buffer size differs from the total of
///   `sizes`.
/// - `ShapeMismatch` if `strides` does not match `sizes`.
/// - `InvalidArgument` if `buffer` is not a contiguous 1-D array or a
///   strided leaf would reach past its slot.
pub fn build_structure<T: Scalar>(
    buffer: &DenseArray<T>,
    sizes: &ShapeTree,
    strides: Option<&ShapeTree>,
) -> Result<TreeNode<DenseArray<T>>, TensorError> {
    if buffer.ndim() != 1 || !buffer.is_contiguous() {
        return Err(TensorError::InvalidArgument(format!(
            "packed buffer must be a contiguous 1-D array, got shape {:?}",
            buffer.shape()
        )));
    }
    let total = shape_numel(sizes);
    if total != buffer.numel() {
        return Err(TensorError::ElementCountMismatch {
            expected: total,
            actual: buffer.numel(),
        });
    }
    let strides = match strides {
        Some(strides) => sizes.try_zip_map(strides, |shape, stride| {
            if shape.len() != stride.len() {
                return Err(TensorError::shape_mismatch(shape, stride));
            }
            Ok(stride.clone())
        })?,
        None => sizes.map(|shape| compute_strides(shape)),
    };

    let mut offset = 0;
    sizes.try_zip_map(&strides, |shape, stride| {
        let numel: usize = shape.iter().product();
        if numel > 0 {
            let extent = 1 + shape
                .iter()
                .zip(stride)
                .map(|(d, s)| (d - 1) * s)
                .sum::<usize>();
            if extent > numel {
                return Err(TensorError::InvalidArgument(format!(
                    "leaf of shape {shape:?} with strides {stride:?} overruns its slot"
                )));
            }
        }
        let view = buffer.view_at(offset, shape, stride);
        offset += numel;
        Ok(view)
    })
}

impl<T: Scalar> NestedTensor<T> {
    /// Packed tensor over `buffer` with row-major leaves of `nested_size`.
    ///
    /// `buffer` may have any shape; it is flattened first (a view when it
    /// is contiguous).
    ///
    /// # Example
    ///
    /// ```
    /// use nestedtensor::{DenseArray, NestedTensor, TreeNode};
    ///
    /// let buffer = DenseArray::from_vec((0..10).map(|x| x as f64).collect(), &[10]).unwrap();
    /// let sizes = TreeNode::internal(vec![TreeNode::leaf(vec![2, 2]), TreeNode::leaf(vec![3, 2])]);
    /// let nt = NestedTensor::from_buffer(buffer, &sizes).unwrap();
    /// assert!(nt.is_contiguous());
    /// assert_eq!(nt.size(), vec![Some(2), None, Some(2)]);
    /// assert_eq!(nt.structure().flatten()[1].to_vec(), vec![4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    /// ```
    pub fn from_buffer(buffer: DenseArray<T>, nested_size: &ShapeTree) -> Result<Self, TensorError> {
        Self::from_buffer_inner(buffer, nested_size, None)
    }

    /// Packed tensor over `buffer` with explicit per-leaf strides.
    pub fn from_buffer_with_strides(
        buffer: DenseArray<T>,
        nested_size: &ShapeTree,
        nested_stride: &ShapeTree,
    ) -> Result<Self, TensorError> {
        Self::from_buffer_inner(buffer, nested_size, Some(nested_stride))
    }

    fn from_buffer_inner(
        buffer: DenseArray<T>,
        nested_size: &ShapeTree,
        nested_stride: Option<&ShapeTree>,
    ) -> Result<Self, TensorError> {
        let buffer = if buffer.ndim() == 1 && buffer.is_contiguous() {
            buffer
        } else if buffer.requires_grad() {
            return Err(TensorError::InvalidArgument(
                "a buffer that requires grad must already be a contiguous 1-D array".into(),
            ));
        } else {
            buffer.reshape(&[buffer.numel()])?
        };
        let structure = build_structure(&buffer, nested_size, nested_stride)?;
        Self::assemble(structure, Some(buffer))
    }

    /// Pack every leaf into one new buffer, in traversal order.
    ///
    /// Returns a clone when `self` is already contiguous. If the leaves
    /// require grad, the new buffer is recorded in the graph so that its
    /// gradient is split back onto the source leaves; the packed tensor
    /// then has no [`NestedTensor::grad`] of its own.
    pub fn contiguous(&self) -> Result<Self, TensorError> {
        if self.is_contiguous() {
            return Ok(self.clone());
        }
        trace!(leaves = self.structure.num_leaves(), "packing nested tensor");
        let mut data = Vec::with_capacity(self.numel());
        let mut pack = PackBackward::new(self.numel());
        for leaf in self.structure.flatten() {
            if let Some(node) = leaf.node_id() {
                pack.push(node, data.len(), leaf.shape());
            }
            data.extend(leaf.to_vec());
        }
        let len = data.len();
        let mut buffer = DenseArray::from_vec(data, &[len])?;
        if !pack.is_empty() {
            let node = T::with_graph(|g| g.create_node(Box::new(pack), true));
            buffer.attach_node(node);
        }
        Self::from_buffer(buffer, &self.nested_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::clear_graph;

    fn sizes() -> ShapeTree {
        TreeNode::internal(vec![TreeNode::leaf(vec![2, 3]), TreeNode::leaf(vec![1, 3])])
    }

    #[test]
    fn test_offsets_are_running_sums() {
        let buffer = DenseArray::from_vec((0..9).map(|x| x as f64).collect(), &[9]).unwrap();
        let tree = build_structure(&buffer, &sizes(), None).unwrap();
        let leaves = tree.flatten();
        assert_eq!(leaves[0].offset(), 0);
        assert_eq!(leaves[1].offset(), 6);
        assert_eq!(leaves[1].to_vec(), vec![6.0, 7.0, 8.0]);
        assert!(leaves.iter().all(|l| l.shares_storage_with(&buffer)));
    }

    #[test]
    fn test_element_count_checked() {
        let buffer = DenseArray::<f64>::zeros(&[8]);
        assert!(matches!(
            build_structure(&buffer, &sizes(), None),
            Err(TensorError::ElementCountMismatch { expected: 9, actual: 8 })
        ));
    }

    #[test]
    fn test_explicit_strides() {
        let buffer = DenseArray::from_vec((0..9).map(|x| x as f64).collect(), &[9]).unwrap();
        let strides = TreeNode::internal(vec![TreeNode::leaf(vec![3, 1]), TreeNode::leaf(vec![3, 1])]);
        let tree = build_structure(&buffer, &sizes(), Some(&strides)).unwrap();
        assert_eq!(tree.flatten()[0].strides(), &[3, 1]);

        // Column-major strides still fit inside the slot.
        let strides = TreeNode::internal(vec![TreeNode::leaf(vec![1, 2]), TreeNode::leaf(vec![3, 1])]);
        let tree = build_structure(&buffer, &sizes(), Some(&strides)).unwrap();
        assert_eq!(tree.flatten()[0].to_vec(), vec![0.0, 2.0, 4.0, 1.0, 3.0, 5.0]);

        let overrun = TreeNode::internal(vec![TreeNode::leaf(vec![6, 1]), TreeNode::leaf(vec![3, 1])]);
        assert!(build_structure(&buffer, &sizes(), Some(&overrun)).is_err());
    }

    #[test]
    fn test_views_of_grad_buffer_are_tracked() {
        clear_graph::<f64>();
        let buffer = DenseArray::<f64>::zeros(&[9]).with_requires_grad(true);
        let tree = build_structure(&buffer, &sizes(), None).unwrap();
        assert!(tree.flatten().iter().all(|l| l.requires_grad()));
    }

    #[test]
    fn test_contiguous_packs_in_order() {
        let a = DenseArray::from_vec(vec![1.0, 2.0], &[1, 2]).unwrap();
        let b = DenseArray::from_vec(vec![3.0, 4.0, 5.0, 6.0], &[2, 2]).unwrap();
        let nt = NestedTensor::from_leaves(vec![a, b.transpose(0, 1).unwrap()]).unwrap();
        assert!(!nt.is_packed());
        let packed = nt.contiguous().unwrap();
        assert!(packed.is_contiguous());
        assert_eq!(
            packed.buffer().unwrap().to_vec(),
            vec![1.0, 2.0, 3.0, 5.0, 4.0, 6.0]
        );
        assert_eq!(packed.nested_size(), nt.nested_size());
    }

    #[test]
    fn test_contiguous_keeps_gradient_path() {
        clear_graph::<f64>();
        let a = DenseArray::from_vec(vec![1.0, 2.0], &[1, 2]).unwrap();
        let b = DenseArray::from_vec(vec![3.0, 4.0, 5.0, 6.0], &[2, 2]).unwrap();
        let nt = NestedTensor::from_leaves(vec![a, b.transpose(0, 1).unwrap()])
            .unwrap()
            .with_requires_grad(true)
            .unwrap();
        let packed = nt.contiguous().unwrap();
        assert!(packed.is_contiguous());
        assert!(packed.requires_grad());
        assert!(packed.grad().is_none());

        let seed = DenseArray::from_vec((1..=6).map(f64::from).collect(), &[6]).unwrap();
        let seed = NestedTensor::from_buffer(seed, &packed.nested_size()).unwrap();
        packed.backward(&seed, false, false).unwrap();

        let grads: Vec<Vec<f64>> = nt
            .grad()
            .unwrap()
            .structure()
            .flatten()
            .iter()
            .map(|l| l.to_vec())
            .collect();
        assert_eq!(grads, vec![vec![1.0, 2.0], vec![3.0, 4.0, 5.0, 6.0]]);
    }

    #[test]
    fn test_contiguous_of_untracked_leaves_stays_untracked() {
        let nt = NestedTensor::from_leaves(vec![
            DenseArray::<f64>::ones(&[2]),
            DenseArray::<f64>::ones(&[3]),
        ])
        .unwrap();
        let packed = nt.contiguous().unwrap();
        assert!(!packed.requires_grad());
        assert!(packed.buffer().unwrap().node_id().is_none());
    }
}
