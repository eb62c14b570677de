//! Dense N-dimensional arrays over shared host storage.
//!
//! `DenseArray` is the leaf type of every nested tensor. It is a strided
//! view `(storage, offset, shape, strides)`; reshapes of contiguous arrays,
//! transposes and buffer slices share storage, while kernels allocate fresh
//! row-major outputs.

mod linalg;
mod ops;

pub use linalg::matmul_shape;

use crate::autograd::{self, NodeId, ViewBackward};
use crate::error::TensorError;
use crate::scalar::{DType, Scalar};
use crate::storage::Storage;
use crate::strides::{cartesian_to_linear, compute_strides, increment_index, is_row_major};

/// Memory location of an array. Only host memory is modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
}

/// A strided dense array.
///
/// # Example
///
/// ```
/// use nestedtensor::DenseArray;
///
/// let a = DenseArray::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
/// assert_eq!(a.shape(), &[2, 3]);
/// // Row-major: [0, 1] is the second element.
/// assert_eq!(a.get(&[0, 1]), Some(2.0));
///
/// let t = a.transpose(0, 1).unwrap();
/// assert_eq!(t.shape(), &[3, 2]);
/// assert_eq!(t.get(&[1, 0]), Some(2.0));
/// assert!(!t.is_contiguous());
/// ```
#[derive(Debug, Clone)]
pub struct DenseArray<T: Scalar> {
    storage: Storage<T>,
    offset: usize,
    shape: Vec<usize>,
    strides: Vec<usize>,
    requires_grad: bool,
    node: Option<NodeId>,
    pinned: bool,
}

impl<T: Scalar> DenseArray<T> {
    /// Create a zero-initialized array.
    pub fn zeros(shape: &[usize]) -> Self {
        let len: usize = shape.iter().product();
        Self::from_storage(Storage::zeros(len), 0, shape.to_vec(), compute_strides(shape))
    }

    /// Create an array filled with ones.
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, T::one())
    }

    /// Create an array filled with `value`.
    pub fn full(shape: &[usize], value: T) -> Self {
        let len: usize = shape.iter().product();
        Self::from_storage(
            Storage::from_vec(vec![value; len]),
            0,
            shape.to_vec(),
            compute_strides(shape),
        )
    }

    /// Create a zero-initialized array with the shape of `other`.
    pub fn zeros_like(other: &Self) -> Self {
        Self::zeros(other.shape())
    }

    /// Create an array from row-major data.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ElementCountMismatch` if the data length doesn't
    /// match the shape.
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self, TensorError> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(TensorError::ElementCountMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self::from_storage(
            Storage::from_vec(data),
            0,
            shape.to_vec(),
            compute_strides(shape),
        ))
    }

    /// Create an array whose element at each index is `f(index)`.
    pub fn from_fn(shape: &[usize], mut f: impl FnMut(&[usize]) -> T) -> Self {
        let len: usize = shape.iter().product();
        let mut data = Vec::with_capacity(len);
        if len > 0 {
            let mut idx = vec![0; shape.len()];
            loop {
                data.push(f(&idx));
                if !increment_index(&mut idx, shape) {
                    break;
                }
            }
        }
        Self::from_storage(Storage::from_vec(data), 0, shape.to_vec(), compute_strides(shape))
    }

    pub(crate) fn from_storage(
        storage: Storage<T>,
        offset: usize,
        shape: Vec<usize>,
        strides: Vec<usize>,
    ) -> Self {
        Self {
            storage,
            offset,
            shape,
            strides,
            requires_grad: false,
            node: None,
            pinned: false,
        }
    }

    /// View `shape`/`strides` at `offset` elements past the start of `self`.
    ///
    /// `self` must be contiguous. If `self` requires grad, the view is
    /// registered with a backward function that scatters into `self`.
    pub(crate) fn view_at(&self, offset: usize, shape: &[usize], strides: &[usize]) -> Self {
        let mut view = Self::from_storage(
            self.storage.clone(),
            self.offset + offset,
            shape.to_vec(),
            strides.to_vec(),
        );
        view.pinned = self.pinned;
        if let (true, Some(base)) = (self.requires_grad, self.node) {
            let backward = ViewBackward::new(base, self.shape.clone(), offset, shape, strides);
            let node = T::with_graph(|g| g.create_node(Box::new(backward), true));
            view.requires_grad = true;
            view.node = Some(node);
        }
        view
    }

    /// Get the shape.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the strides (in elements).
    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Get the element offset into the backing storage.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Get the size of dimension `dim`.
    pub fn size(&self, dim: usize) -> Result<usize, TensorError> {
        self.shape
            .get(dim)
            .copied()
            .ok_or(TensorError::InvalidDimension {
                dim,
                ndim: self.ndim(),
            })
    }

    /// Get the rank (number of dimensions).
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get total number of elements.
    #[inline]
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Check if the array has zero elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    /// Size of one element in bytes.
    #[inline]
    pub fn element_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    /// Element type tag.
    #[inline]
    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    /// Device the data lives on.
    #[inline]
    pub fn device(&self) -> Device {
        Device::Cpu
    }

    /// Whether the array was produced by `pin_memory`.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Materialize a copy flagged as page-locked.
    ///
    /// Host memory is not actually locked; the flag is carried so callers
    /// can track which arrays were staged for transfer.
    pub fn pin_memory(&self) -> Self {
        let mut pinned = self.materialize();
        pinned.pinned = true;
        pinned
    }

    /// Whether the elements are tightly packed in row-major order.
    pub fn is_contiguous(&self) -> bool {
        is_row_major(&self.shape, &self.strides)
    }

    /// Check if this array shares storage with another array.
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        self.storage.shares_storage_with(&other.storage)
    }

    /// Borrow the elements when the array is contiguous.
    pub fn as_slice(&self) -> Option<&[T]> {
        if self.is_contiguous() {
            Some(&self.storage.as_slice()[self.offset..self.offset + self.numel()])
        } else {
            None
        }
    }

    /// Copy the elements out in row-major order.
    pub fn to_vec(&self) -> Vec<T> {
        if let Some(slice) = self.as_slice() {
            return slice.to_vec();
        }
        let len = self.numel();
        let mut out = Vec::with_capacity(len);
        if len == 0 {
            return out;
        }
        let data = self.storage.as_slice();
        let mut idx = vec![0; self.ndim()];
        loop {
            out.push(data[self.offset + cartesian_to_linear(&idx, &self.strides)]);
            if !increment_index(&mut idx, &self.shape) {
                break;
            }
        }
        out
    }

    /// Copy into fresh row-major storage, dropping any graph node.
    fn materialize(&self) -> Self {
        Self::from_storage(
            Storage::from_vec(self.to_vec()),
            0,
            self.shape.clone(),
            compute_strides(&self.shape),
        )
    }

    /// Return a contiguous array: `self` if already contiguous, else a copy.
    pub fn contiguous(&self) -> Self {
        if self.is_contiguous() {
            self.clone()
        } else {
            self.materialize()
        }
    }

    /// Mutable access to the elements, in row-major order.
    ///
    /// Non-contiguous arrays are materialized first and storage shared with
    /// other arrays is copied, so writes never leak into other views.
    pub fn data_mut(&mut self) -> &mut [T] {
        if !self.is_contiguous() {
            let fresh = self.materialize();
            self.storage = fresh.storage;
            self.offset = 0;
            self.strides = fresh.strides;
        }
        let len = self.numel();
        let offset = self.offset;
        &mut self.storage.make_mut()[offset..offset + len]
    }

    /// Get element by cartesian indices.
    ///
    /// Returns `None` if indices are out of bounds or of the wrong length.
    pub fn get(&self, indices: &[usize]) -> Option<T> {
        if indices.len() != self.ndim() {
            return None;
        }
        if indices.iter().zip(self.shape.iter()).any(|(&i, &d)| i >= d) {
            return None;
        }
        let linear = self.offset + cartesian_to_linear(indices, &self.strides);
        self.storage.as_slice().get(linear).copied()
    }

    /// Set element by cartesian indices.
    pub fn set(&mut self, indices: &[usize], value: T) -> Result<(), TensorError> {
        if indices.len() != self.ndim() {
            return Err(TensorError::RankMismatch {
                expected: self.ndim(),
                actual: indices.len(),
            });
        }
        for (&index, &dim_size) in indices.iter().zip(self.shape.iter()) {
            if index >= dim_size {
                return Err(TensorError::IndexOutOfBounds { index, dim_size });
            }
        }
        let strides = compute_strides(&self.shape);
        let linear = cartesian_to_linear(indices, &strides);
        self.data_mut()[linear] = value;
        Ok(())
    }

    /// Fill all elements with a value.
    pub fn fill(&mut self, value: T) {
        for x in self.data_mut() {
            *x = value;
        }
    }

    /// Reshape to `new_shape`.
    ///
    /// Contiguous arrays are reshaped as views that share storage; others
    /// are copied first. The result is detached from the graph.
    pub fn reshape(&self, new_shape: &[usize]) -> Result<Self, TensorError> {
        let new_len: usize = new_shape.iter().product();
        if new_len != self.numel() {
            return Err(TensorError::ElementCountMismatch {
                expected: self.numel(),
                actual: new_len,
            });
        }
        let base = self.contiguous();
        let mut out = Self::from_storage(
            base.storage,
            base.offset,
            new_shape.to_vec(),
            compute_strides(new_shape),
        );
        out.pinned = self.pinned;
        Ok(out)
    }

    /// Swap two dimensions (zero-copy strided view, detached from the graph).
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Self, TensorError> {
        let ndim = self.ndim();
        for dim in [dim0, dim1] {
            if dim >= ndim {
                return Err(TensorError::InvalidDimension { dim, ndim });
            }
        }
        let mut shape = self.shape.clone();
        let mut strides = self.strides.clone();
        shape.swap(dim0, dim1);
        strides.swap(dim0, dim1);
        let mut out = Self::from_storage(self.storage.clone(), self.offset, shape, strides);
        out.pinned = self.pinned;
        Ok(out)
    }

    /// Swap the last two dimensions.
    pub fn transpose_last(&self) -> Result<Self, TensorError> {
        let ndim = self.ndim();
        if ndim < 2 {
            return Err(TensorError::RankMismatch {
                expected: 2,
                actual: ndim,
            });
        }
        self.transpose(ndim - 2, ndim - 1)
    }

    /// Whether this array takes part in gradient computation.
    #[inline]
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Graph node of this array, if it is tracked.
    #[inline]
    pub fn node_id(&self) -> Option<NodeId> {
        self.node
    }

    /// Set the requires-grad flag.
    ///
    /// Turning the flag on for an untracked array registers it as a leaf in
    /// the thread-local graph; turning it off detaches the array.
    pub fn set_requires_grad(&mut self, requires_grad: bool) {
        if requires_grad {
            if self.node.is_none() {
                self.node = Some(T::with_graph(|g| g.create_leaf(true)));
            }
        } else {
            self.node = None;
        }
        self.requires_grad = requires_grad;
    }

    /// Builder form of [`DenseArray::set_requires_grad`].
    pub fn with_requires_grad(mut self, requires_grad: bool) -> Self {
        self.set_requires_grad(requires_grad);
        self
    }

    /// Mark this array as the output of graph node `node`.
    pub(crate) fn attach_node(&mut self, node: NodeId) {
        self.requires_grad = true;
        self.node = Some(node);
    }

    /// Share data but drop gradient tracking.
    ///
    /// The result still aliases the same storage; it is not a copy.
    pub fn detach(&self) -> Self {
        let mut out = self.clone();
        out.requires_grad = false;
        out.node = None;
        out
    }

    /// Gradient accumulated on this array by previous backward passes.
    pub fn grad(&self) -> Option<Self> {
        let id = self.node?;
        T::with_graph(|g| g.grad(id).cloned())
    }

    /// Run reverse-mode differentiation seeded with `gradient`.
    ///
    /// See [`autograd::backward`].
    pub fn backward(
        &self,
        gradient: &Self,
        retain_graph: bool,
        create_graph: bool,
    ) -> Result<(), TensorError> {
        autograd::backward(self, gradient, retain_graph, create_graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::clear_graph;
    use crate::scalar::c64;

    #[test]
    fn test_zeros_generic() {
        fn check<T: Scalar>() {
            let a: DenseArray<T> = DenseArray::zeros(&[2, 3]);
            assert_eq!(a.shape(), &[2, 3]);
            assert_eq!(a.strides(), &[3, 1]);
            assert_eq!(a.numel(), 6);
            assert!(a.to_vec().iter().all(|&x| x == T::zero()));
        }
        check::<f64>();
        check::<c64>();
    }

    #[test]
    fn test_from_vec_mismatch() {
        let result = DenseArray::<f64>::from_vec(vec![1.0, 2.0, 3.0], &[2, 3]);
        assert!(matches!(
            result,
            Err(TensorError::ElementCountMismatch {
                expected: 6,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_scalar_array() {
        let a: DenseArray<f64> = DenseArray::zeros(&[]);
        assert_eq!(a.ndim(), 0);
        assert_eq!(a.numel(), 1);
        assert_eq!(a.get(&[]), Some(0.0));
    }

    #[test]
    fn test_zero_sized() {
        let a: DenseArray<f64> = DenseArray::zeros(&[0, 4]);
        assert!(a.is_empty());
        assert!(a.is_contiguous());
        assert!(a.to_vec().is_empty());
    }

    #[test]
    fn test_from_fn_row_major() {
        let a = DenseArray::<f64>::from_fn(&[2, 3], |idx| (idx[0] * 10 + idx[1]) as f64);
        assert_eq!(a.to_vec(), vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_transpose_view() {
        let a = DenseArray::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let t = a.transpose(0, 1).unwrap();
        assert!(t.shares_storage_with(&a));
        assert!(!t.is_contiguous());
        assert!(t.as_slice().is_none());
        assert_eq!(t.to_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert!(t.contiguous().is_contiguous());
        assert!(a.transpose(0, 2).is_err());
    }

    #[test]
    fn test_reshape_shares_storage() {
        let a = DenseArray::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let r = a.reshape(&[3, 2]).unwrap();
        assert!(a.shares_storage_with(&r));
        assert_eq!(r.get(&[2, 1]), Some(6.0));
        assert!(a.reshape(&[4]).is_err());

        // Reshaping a transposed view has to copy.
        let t = a.transpose(0, 1).unwrap().reshape(&[6]).unwrap();
        assert!(!t.shares_storage_with(&a));
        assert_eq!(t.to_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_data_mut_copy_on_write() {
        let a = DenseArray::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap();
        let mut b = a.clone();
        b.set(&[0], 100.0).unwrap();
        assert_eq!(a.get(&[0]), Some(1.0));
        assert_eq!(b.get(&[0]), Some(100.0));
        assert!(!a.shares_storage_with(&b));
    }

    #[test]
    fn test_set_errors() {
        let mut a: DenseArray<f64> = DenseArray::zeros(&[2, 3]);
        assert!(matches!(
            a.set(&[2, 0], 1.0),
            Err(TensorError::IndexOutOfBounds { index: 2, dim_size: 2 })
        ));
        assert!(matches!(
            a.set(&[0], 1.0),
            Err(TensorError::RankMismatch { .. })
        ));
    }

    #[test]
    fn test_view_at_offset() {
        let buffer = DenseArray::from_vec((0..10).map(|x| x as f64).collect(), &[10]).unwrap();
        let view = buffer.view_at(4, &[2, 3], &[3, 1]);
        assert_eq!(view.to_vec(), vec![4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert!(view.shares_storage_with(&buffer));
        assert!(!view.requires_grad());
    }

    #[test]
    fn test_requires_grad_and_detach() {
        clear_graph::<f64>();
        let a = DenseArray::<f64>::ones(&[2]).with_requires_grad(true);
        assert!(a.requires_grad());
        assert!(a.node_id().is_some());
        let d = a.detach();
        assert!(!d.requires_grad());
        assert!(d.node_id().is_none());
        assert!(d.shares_storage_with(&a));
    }

    #[test]
    fn test_pin_memory_copies() {
        let a = DenseArray::from_vec(vec![1.0, 2.0], &[2]).unwrap();
        assert!(!a.is_pinned());
        let p = a.pin_memory();
        assert!(p.is_pinned());
        assert!(!p.shares_storage_with(&a));
        assert_eq!(p.to_vec(), a.to_vec());
    }
}
