//! Batched matrix products with a ragged left operand.

use faer::Par;
use tracing::{debug, trace};

use super::accumulate::sum_leaves_to_shape;
use super::function::{BackwardFunction, single_grad_output};
use super::{Operand, map_leaves, transpose_leaves, zip_map_leaves};
use crate::array::{DenseArray, matmul_shape};
use crate::config::{NestedConfig, config};
use crate::error::TensorError;
use crate::nested::{NestedTensor, build_structure};
use crate::scalar::Scalar;
use crate::strides::increment_index;
use crate::tree::{ShapeTree, TreeNode, shape_numel, zip_apply_mut};

/// Inputs saved by [`matmul`] for the backward pass.
#[derive(Debug, Clone)]
pub struct MatmulSavedContext<T: Scalar> {
    pub self_: NestedTensor<T>,
    pub other: Operand<T>,
}

/// `self_ @ other` over the last two dimensions of every leaf.
///
/// `other` may be another nested tensor (leaves are paired) or a dense
/// array (shared by every leaf). Packed operands of the right shape take a
/// single-buffer path; everything else is evaluated leaf by leaf.
///
/// # Errors
///
/// - `InvalidArgument` if `self_` is a dense array.
/// - `ShapeMismatch` if trees or leaf shapes are incompatible.
///
/// # Example
///
/// ```
/// use nestedtensor::{DenseArray, NestedTensor};
/// use nestedtensor::ops::{Operand, matmul};
///
/// let nt = NestedTensor::from_leaves(vec![
///     DenseArray::<f64>::ones(&[2, 3]),
///     DenseArray::<f64>::ones(&[4, 3]),
/// ])
/// .unwrap()
/// .contiguous()
/// .unwrap();
/// let w = DenseArray::<f64>::ones(&[3, 5]);
/// let (out, _ctx) = matmul(&Operand::Ragged(nt), &Operand::Dense(w)).unwrap();
/// assert!(out.is_contiguous());
/// assert_eq!(out.size(), vec![Some(2), None, Some(5)]);
/// ```
pub fn matmul<T: Scalar>(
    self_: &Operand<T>,
    other: &Operand<T>,
) -> Result<(NestedTensor<T>, MatmulSavedContext<T>), TensorError> {
    let Operand::Ragged(nt) = self_ else {
        return Err(TensorError::InvalidArgument(
            "matmul: self must be a nested tensor".into(),
        ));
    };
    let result = matmul_with_config(config(), nt, other)?;
    let ctx = MatmulSavedContext {
        self_: nt.clone(),
        other: other.clone(),
    };
    Ok((result, ctx))
}

/// Forward strategy selection.
pub(crate) fn matmul_with_config<T: Scalar>(
    cfg: &NestedConfig,
    self_: &NestedTensor<T>,
    other: &Operand<T>,
) -> Result<NestedTensor<T>, TensorError> {
    match other {
        Operand::Ragged(other) => {
            if cfg.packed_fast_paths && packed_batched_applies(self_, other) {
                debug!(leaves = self_.structure().num_leaves(), "packed nested x nested matmul");
                return packed_batched_matmul(cfg, self_, other);
            }
            trace!("leaf-wise nested x nested matmul");
            zip_map_leaves(cfg, self_, other, |a, b| a.matmul(b))
        }
        Operand::Dense(other) => {
            if cfg.packed_fast_paths && packed_rows_apply(self_, other) {
                debug!(numel = self_.numel(), "packed nested x dense matmul");
                return packed_rows_matmul(cfg, self_, other);
            }
            trace!("leaf-wise nested x dense matmul");
            map_leaves(cfg, self_, |leaf| leaf.matmul(other))
        }
    }
}

/// Both contiguous, 3-D leaves under one nesting level, equal entry and
/// head counts, and a concrete matching inner dimension.
fn packed_batched_applies<T: Scalar>(a: &NestedTensor<T>, b: &NestedTensor<T>) -> bool {
    if !(a.is_contiguous() && b.is_contiguous()) {
        return false;
    }
    if a.dim() != 4 || b.dim() != 4 || a.nested_dim() != 1 || b.nested_dim() != 1 {
        return false;
    }
    let (sa, sb) = (a.size(), b.size());
    matches!(
        (sa[0], sb[0], sa[1], sb[1], sa[3], sb[2]),
        (Some(a0), Some(b0), Some(a1), Some(b1), Some(a3), Some(b2))
            if a0 == b0 && a1 == b1 && a3 == b2
    )
}

/// Every leaf product written into its own slice of one new buffer.
fn packed_batched_matmul<T: Scalar>(
    cfg: &NestedConfig,
    self_: &NestedTensor<T>,
    other: &NestedTensor<T>,
) -> Result<NestedTensor<T>, TensorError> {
    let sizes = self_
        .nested_size()
        .try_zip_map(&other.nested_size(), |a, b| matmul_shape(a, b))?;
    let total = shape_numel(&sizes);
    let mut data = vec![T::zero(); total];

    let mut chunks = Vec::with_capacity(sizes.num_leaves());
    let mut rest = data.as_mut_slice();
    for shape in sizes.flatten() {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(shape.iter().product());
        chunks.push(head);
        rest = tail;
    }
    fill_leaf_products(cfg, &sizes, chunks, self_.structure(), other.structure())?;

    NestedTensor::from_buffer(DenseArray::from_vec(data, &[total])?, &sizes)
}

/// Write each leaf product into its chunk; `chunks` follow traversal order.
fn fill_leaf_products<T: Scalar>(
    cfg: &NestedConfig,
    sizes: &ShapeTree,
    chunks: Vec<&mut [T]>,
    a: &TreeNode<DenseArray<T>>,
    b: &TreeNode<DenseArray<T>>,
) -> Result<(), TensorError> {
    if cfg.use_parallel_leaves() {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;

            return chunks
                .into_par_iter()
                .zip(a.flatten().into_par_iter().zip(b.flatten()))
                .try_for_each(|(chunk, (x, y))| x.matmul_into_slice(y, chunk, Par::Seq));
        }
    }
    let mut out = sizes.replace_leaves(chunks)?;
    zip_apply_mut(&mut out, a, b, |chunk, x, y| {
        x.matmul_into_slice(y, chunk, Par::Seq)
    })
}

/// Contiguous 2-D leaves under one nesting level with a concrete inner
/// dimension matching the rows of a 2-D `other`.
fn packed_rows_apply<T: Scalar>(a: &NestedTensor<T>, other: &DenseArray<T>) -> bool {
    if !a.is_contiguous() || a.dim() != 3 || a.nested_dim() != 1 || other.ndim() != 2 {
        return false;
    }
    let size = a.size();
    matches!(
        (size[0], size[2]),
        (Some(_), Some(k)) if k == other.shape()[0] && k > 0
    )
}

/// The buffer viewed as `(rows, k)`, one gemm, and the result re-split.
fn packed_rows_matmul<T: Scalar>(
    cfg: &NestedConfig,
    self_: &NestedTensor<T>,
    other: &DenseArray<T>,
) -> Result<NestedTensor<T>, TensorError> {
    let k = other.shape()[0];
    let n = other.shape()[1];
    let buffer = self_.buffer().ok_or_else(not_packed)?;
    let rows = self_.numel() / k;
    let product = buffer
        .reshape(&[rows, k])?
        .matmul_with_par(other, cfg.gemm_par())?;
    let sizes = self_.nested_size().map(|shape| vec![shape[0], n]);
    NestedTensor::from_buffer(product.reshape(&[rows * n])?, &sizes)
}

pub(crate) fn not_packed() -> TensorError {
    TensorError::InvalidArgument("expected a packed nested tensor".into())
}

/// Leaf-wise `self_ @ other` written into `result`.
///
/// The products are computed first; `result` is only modified once every
/// product has the shape of the corresponding result leaf. A packed result
/// keeps its buffer layout and its leaves are views of the new buffer
/// contents.
///
/// The write is copy-on-write: if the storage of `result` is shared with
/// clones or other views, it is copied first, so those keep their old
/// values and only `result` sees the products.
///
/// # Errors
///
/// - `InvalidArgument` if `self_` is a dense array.
/// - `ShapeMismatch` if trees or leaf shapes are incompatible.
pub fn matmul_out<T: Scalar>(
    result: &mut NestedTensor<T>,
    self_: &Operand<T>,
    other: &Operand<T>,
) -> Result<(), TensorError> {
    let Operand::Ragged(nt) = self_ else {
        return Err(TensorError::InvalidArgument(
            "matmul_out: self must be a nested tensor".into(),
        ));
    };
    let products = match other {
        Operand::Ragged(other) => nt
            .structure()
            .try_zip_map(other.structure(), |a, b| a.matmul(b))?,
        Operand::Dense(other) => nt.structure().try_map(|a| a.matmul(other))?,
    };
    result
        .structure()
        .try_zip_apply(&products, |out, product| {
            if out.shape() == product.shape() {
                Ok(())
            } else {
                Err(TensorError::shape_mismatch(out.shape(), product.shape()))
            }
        })?;

    match result.buffer() {
        Some(buffer) => {
            let mut buffer = buffer.clone();
            let base = buffer.offset();
            let data = buffer.data_mut();
            result.structure().try_zip_apply(&products, |out, product| {
                scatter(data, out.offset() - base, out.strides(), product);
                Ok(())
            })?;
            let structure =
                build_structure(&buffer, &result.nested_size(), Some(&result.nested_stride()))?;
            *result = NestedTensor::assemble(structure, Some(buffer))?;
        }
        None => *result = NestedTensor::new(products)?,
    }
    Ok(())
}

/// Write `src` into `dst` through a strided layout starting at `offset`.
fn scatter<T: Scalar>(dst: &mut [T], offset: usize, strides: &[usize], src: &DenseArray<T>) {
    if src.is_empty() {
        return;
    }
    let mut idx = vec![0; src.ndim()];
    for value in src.to_vec() {
        let pos = offset + idx.iter().zip(strides).map(|(i, s)| i * s).sum::<usize>();
        dst[pos] = value;
        increment_index(&mut idx, src.shape());
    }
}

impl<T: Scalar> BackwardFunction<T> for MatmulSavedContext<T> {
    /// `grad_self = grad @ otherᵀ`, `grad_other = self_ᵀ @ grad`.
    ///
    /// A dense `other` receives the sum of the per-leaf contributions.
    fn apply(&self, grad_outputs: &[Operand<T>]) -> Result<Vec<Option<Operand<T>>>, TensorError> {
        let grad = single_grad_output("matmul", grad_outputs)?;
        let cfg = config();
        match &self.other {
            Operand::Ragged(other) => {
                if self.self_.dim() < 4 || other.dim() < 4 {
                    return Err(TensorError::InvalidArgument(format!(
                        "matmul backward needs nested operands of rank >= 4, got {} and {}",
                        self.self_.dim(),
                        other.dim()
                    )));
                }
                trace!("matmul backward, nested other");
                let other_t = Operand::Ragged(transpose_leaves(cfg, other)?);
                let grad_self = matmul_with_config(cfg, grad, &other_t)?;
                let self_t = transpose_leaves(cfg, &self.self_)?;
                let grad_other = matmul_with_config(cfg, &self_t, &Operand::Ragged(grad.clone()))?;
                Ok(vec![
                    Some(Operand::Ragged(grad_self)),
                    Some(Operand::Ragged(grad_other)),
                ])
            }
            Operand::Dense(other) => {
                if self.self_.dim() < 3 || other.ndim() < 2 {
                    return Err(TensorError::InvalidArgument(format!(
                        "matmul backward needs a nested self of rank >= 3 and a dense other \
                         of rank >= 2, got {} and {}",
                        self.self_.dim(),
                        other.ndim()
                    )));
                }
                trace!("matmul backward, dense other");
                let other_t = Operand::Dense(other.transpose_last()?);
                let mut grad_self = matmul_with_config(cfg, grad, &other_t)?;
                // A batched `other` broadcasts over the leaves; fold its batch axes back.
                if grad_self.nested_size() != self.self_.nested_size() {
                    grad_self = zip_map_leaves(cfg, &grad_self, &self.self_, |g, s| {
                        g.sum_to_shape(s.shape())
                    })?;
                }
                let self_t = transpose_leaves(cfg, &self.self_)?;
                let per_leaf = zip_map_leaves(cfg, &self_t, grad, |a, g| a.matmul(g))?;
                let grad_other = sum_leaves_to_shape(&per_leaf, other.shape())?;
                Ok(vec![
                    Some(Operand::Ragged(grad_self)),
                    Some(Operand::Dense(grad_other)),
                ])
            }
        }
    }
}
