//! Differentiable operators over nested tensors.
//!
//! Each operator has a forward function returning its result together
//! with a saved context, and the context implements [`BackwardFunction`]
//! to map the output gradient to one gradient per forward input.
//!
//! Forward functions prefer a packed single-buffer strategy when the
//! operands allow it (see [`crate::config`]) and otherwise fall back to
//! leaf-wise evaluation. Both produce the same values.

mod accumulate;
mod addmm;
mod function;
mod matmul;

pub use accumulate::sum_leaves_to_shape;
pub use addmm::{AddmmSavedContext, addmm};
pub use function::BackwardFunction;
pub use matmul::{MatmulSavedContext, matmul, matmul_out};

use crate::array::DenseArray;
use crate::config::{NestedConfig, config};
use crate::error::TensorError;
use crate::nested::NestedTensor;
use crate::scalar::Scalar;

/// An operator argument: a nested tensor or a plain dense array.
#[derive(Debug, Clone)]
pub enum Operand<T: Scalar> {
    Ragged(NestedTensor<T>),
    Dense(DenseArray<T>),
}

impl<T: Scalar> Operand<T> {
    /// Rank including nested dimensions.
    pub fn dim(&self) -> usize {
        match self {
            Operand::Ragged(nt) => nt.dim(),
            Operand::Dense(a) => a.ndim(),
        }
    }

    pub fn requires_grad(&self) -> bool {
        match self {
            Operand::Ragged(nt) => nt.requires_grad(),
            Operand::Dense(a) => a.requires_grad(),
        }
    }

    pub fn is_ragged(&self) -> bool {
        matches!(self, Operand::Ragged(_))
    }

    pub fn as_ragged(&self) -> Option<&NestedTensor<T>> {
        match self {
            Operand::Ragged(nt) => Some(nt),
            Operand::Dense(_) => None,
        }
    }

    pub fn as_dense(&self) -> Option<&DenseArray<T>> {
        match self {
            Operand::Dense(a) => Some(a),
            Operand::Ragged(_) => None,
        }
    }
}

impl<T: Scalar> From<NestedTensor<T>> for Operand<T> {
    fn from(nt: NestedTensor<T>) -> Self {
        Operand::Ragged(nt)
    }
}

impl<T: Scalar> From<DenseArray<T>> for Operand<T> {
    fn from(a: DenseArray<T>) -> Self {
        Operand::Dense(a)
    }
}

/// Apply `f` to every leaf, producing an unpacked nested tensor.
///
/// With the `parallel` feature (and parallel leaves enabled in the
/// configuration) leaves are processed on the rayon pool.
pub fn map_nested_tensor<T, F>(nt: &NestedTensor<T>, f: F) -> Result<NestedTensor<T>, TensorError>
where
    T: Scalar,
    F: Fn(&DenseArray<T>) -> Result<DenseArray<T>, TensorError> + Sync + Send,
{
    map_leaves(config(), nt, f)
}

pub(crate) fn map_leaves<T, F>(
    cfg: &NestedConfig,
    nt: &NestedTensor<T>,
    f: F,
) -> Result<NestedTensor<T>, TensorError>
where
    T: Scalar,
    F: Fn(&DenseArray<T>) -> Result<DenseArray<T>, TensorError> + Sync + Send,
{
    if cfg.use_parallel_leaves() {
        #[cfg(feature = "parallel")]
        return NestedTensor::new(nt.structure().try_par_map(f)?);
    }
    NestedTensor::new(nt.structure().try_map(f)?)
}

/// Apply `f` to pairs of corresponding leaves of `a` and `b`.
///
/// # Errors
///
/// Returns `TensorError::ShapeMismatch` before calling `f` if the trees
/// differ in shape.
pub fn zip_map_nested_tensor<T, F>(
    a: &NestedTensor<T>,
    b: &NestedTensor<T>,
    f: F,
) -> Result<NestedTensor<T>, TensorError>
where
    T: Scalar,
    F: Fn(&DenseArray<T>, &DenseArray<T>) -> Result<DenseArray<T>, TensorError> + Sync + Send,
{
    zip_map_leaves(config(), a, b, f)
}

pub(crate) fn zip_map_leaves<T, F>(
    cfg: &NestedConfig,
    a: &NestedTensor<T>,
    b: &NestedTensor<T>,
    f: F,
) -> Result<NestedTensor<T>, TensorError>
where
    T: Scalar,
    F: Fn(&DenseArray<T>, &DenseArray<T>) -> Result<DenseArray<T>, TensorError> + Sync + Send,
{
    if cfg.use_parallel_leaves() {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;

            if !a.structure().same_shape(b.structure()) {
                return Err(TensorError::ShapeMismatch(
                    "nested tensors have different tree structures".into(),
                ));
            }
            let pairs: Vec<_> = a
                .structure()
                .flatten()
                .into_iter()
                .zip(b.structure().flatten())
                .collect();
            let leaves: Vec<DenseArray<T>> = pairs
                .into_par_iter()
                .map(|(x, y)| f(x, y))
                .collect::<Result<_, _>>()?;
            return NestedTensor::new(a.structure().replace_leaves(leaves)?);
        }
    }
    NestedTensor::new(a.structure().try_zip_map(b.structure(), |x, y| f(x, y))?)
}

/// Transpose the last two dimensions of every leaf.
pub(crate) fn transpose_leaves<T: Scalar>(
    cfg: &NestedConfig,
    nt: &NestedTensor<T>,
) -> Result<NestedTensor<T>, TensorError> {
    map_leaves(cfg, nt, DenseArray::transpose_last)
}
