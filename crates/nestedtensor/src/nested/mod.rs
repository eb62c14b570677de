//! The nested tensor type.
//!
//! A `NestedTensor` is a tree of dense leaves of possibly different
//! shapes. When it is *packed*, every leaf is a non-overlapping view into
//! one flat buffer, which lets whole-collection operations run as a
//! single dense kernel.

mod grad;
mod layout;

pub use layout::build_structure;

use crate::array::{DenseArray, Device};
use crate::error::TensorError;
use crate::scalar::{DType, Scalar};
use crate::tree::{ShapeTree, TreeNode, construct_size};

/// A ragged collection of dense arrays with an optional packed buffer.
///
/// # Example
///
/// ```
/// use nestedtensor::{DenseArray, NestedTensor};
///
/// let nt = NestedTensor::from_leaves(vec![
///     DenseArray::<f64>::ones(&[2, 3]),
///     DenseArray::<f64>::ones(&[4, 3]),
/// ])
/// .unwrap();
/// assert_eq!(nt.len(), 2);
/// assert_eq!(nt.dim(), 3);
/// assert_eq!(nt.size(), vec![Some(2), None, Some(3)]);
/// assert_eq!(nt.numel(), 18);
/// assert!(!nt.is_contiguous());
/// assert!(nt.contiguous().unwrap().is_contiguous());
/// ```
#[derive(Debug, Clone)]
pub struct NestedTensor<T: Scalar> {
    structure: TreeNode<DenseArray<T>>,
    buffer: Option<DenseArray<T>>,
}

impl<T: Scalar> NestedTensor<T> {
    /// Unpacked nested tensor over a tree of arrays.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::InvalidArgument` if the tree has no leaves,
    /// leaves sit at different depths, or leaves differ in rank.
    pub fn new(structure: TreeNode<DenseArray<T>>) -> Result<Self, TensorError> {
        let first = structure.first_leaf().ok_or_else(|| {
            TensorError::InvalidArgument("a nested tensor needs at least one leaf".into())
        })?;
        let ndim = first.ndim();
        let height = structure.height();
        check_depths(&structure, 0, height)?;
        let mut mismatch = None;
        structure.for_each(|leaf| {
            if mismatch.is_none() && leaf.ndim() != ndim {
                mismatch = Some(leaf.ndim());
            }
        });
        if let Some(actual) = mismatch {
            return Err(TensorError::InvalidArgument(format!(
                "all leaves must have the same rank: found {ndim} and {actual}"
            )));
        }
        Ok(Self {
            structure,
            buffer: None,
        })
    }

    /// Unpacked nested tensor with one level of nesting.
    pub fn from_leaves(leaves: Vec<DenseArray<T>>) -> Result<Self, TensorError> {
        Self::new(TreeNode::internal(
            leaves.into_iter().map(TreeNode::leaf).collect(),
        ))
    }

    /// Pair a structure with its buffer; the caller guarantees the leaves
    /// are views into `buffer` when it is present.
    pub(crate) fn assemble(
        structure: TreeNode<DenseArray<T>>,
        buffer: Option<DenseArray<T>>,
    ) -> Result<Self, TensorError> {
        match buffer {
            None => Self::new(structure),
            Some(buffer) => {
                let mut nt = Self::new(structure)?;
                nt.buffer = Some(buffer);
                Ok(nt)
            }
        }
    }

    /// The tree of leaves.
    pub fn structure(&self) -> &TreeNode<DenseArray<T>> {
        &self.structure
    }

    /// The packed buffer, if any.
    pub fn buffer(&self) -> Option<&DenseArray<T>> {
        self.buffer.as_ref()
    }

    /// First leaf in traversal order.
    pub fn first_leaf(&self) -> Option<&DenseArray<T>> {
        self.structure.first_leaf()
    }

    /// Whether the leaves are views into a single buffer.
    #[inline]
    pub fn is_packed(&self) -> bool {
        self.buffer.is_some()
    }

    /// Packed, with a contiguous buffer and contiguous leaves.
    pub fn is_contiguous(&self) -> bool {
        self.buffer.as_ref().is_some_and(DenseArray::is_contiguous)
            && self.structure.reduce(true, |leaf, acc| acc && leaf.is_contiguous())
    }

    /// Number of top-level entries.
    ///
    /// For a nested root this is its number of children; for a tensor that
    /// is a single leaf it is the leaf's leading dimension.
    pub fn len(&self) -> usize {
        match &self.structure {
            TreeNode::Internal(children) => children.len(),
            TreeNode::Leaf(leaf) => leaf.shape().first().copied().unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of nesting levels.
    pub fn nested_dim(&self) -> usize {
        self.structure.height()
    }

    /// Nested dimensions plus the leaf rank.
    pub fn dim(&self) -> usize {
        self.first_leaf().map_or(0, DenseArray::ndim) + self.nested_dim()
    }

    /// Total number of elements over all leaves.
    pub fn numel(&self) -> usize {
        self.structure.reduce(0, |leaf, acc| acc + leaf.numel())
    }

    /// Per-dimension sizes; `None` marks a ragged dimension.
    pub fn size(&self) -> Vec<Option<usize>> {
        construct_size(&self.nested_size())
    }

    /// Tree of leaf shapes.
    pub fn nested_size(&self) -> ShapeTree {
        self.structure.map(|leaf| leaf.shape().to_vec())
    }

    /// Tree of leaf strides.
    pub fn nested_stride(&self) -> ShapeTree {
        self.structure.map(|leaf| leaf.strides().to_vec())
    }

    #[inline]
    pub fn element_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    #[inline]
    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    pub fn device(&self) -> Device {
        self.first_leaf().map_or(Device::Cpu, DenseArray::device)
    }

    /// Requires-grad flag of the first leaf.
    pub fn requires_grad(&self) -> bool {
        self.first_leaf().is_some_and(DenseArray::requires_grad)
    }

    /// Dense array of shape `size()`.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::RaggedShape` naming the first ragged dimension.
    pub fn to_tensor(&self) -> Result<DenseArray<T>, TensorError> {
        let shape = self
            .size()
            .into_iter()
            .enumerate()
            .map(|(dim, s)| s.ok_or(TensorError::RaggedShape { dim }))
            .collect::<Result<Vec<_>, _>>()?;
        if let (true, Some(buffer)) = (self.is_contiguous(), &self.buffer) {
            return buffer.reshape(&shape);
        }
        let leaves = self.structure.flatten();
        DenseArray::stack(&leaves)?.reshape(&shape)
    }

    /// Leaf-wise copies flagged as pinned; the result is unpacked.
    pub fn pin_memory(&self) -> Self {
        Self {
            structure: self.structure.map(DenseArray::pin_memory),
            buffer: None,
        }
    }

    pub fn is_pinned(&self) -> bool {
        match (&self.buffer, self.is_contiguous()) {
            (Some(buffer), true) => buffer.is_pinned(),
            _ => self.first_leaf().is_some_and(DenseArray::is_pinned),
        }
    }

    /// Leaf-wise detach without copying.
    ///
    /// The leaves still alias the same storage; a packed tensor stays
    /// packed over its (detached) buffer.
    pub fn detach(&self) -> Self {
        Self {
            structure: self.structure.map(DenseArray::detach),
            buffer: self.buffer.as_ref().map(DenseArray::detach),
        }
    }
}

fn check_depths<T>(node: &TreeNode<T>, depth: usize, height: usize) -> Result<(), TensorError> {
    match node {
        TreeNode::Leaf(_) if depth != height => Err(TensorError::InvalidArgument(format!(
            "leaves must all be at depth {height}, found one at depth {depth}"
        ))),
        TreeNode::Leaf(_) => Ok(()),
        TreeNode::Internal(children) => children
            .iter()
            .try_for_each(|c| check_depths(c, depth + 1, height)),
    }
}
