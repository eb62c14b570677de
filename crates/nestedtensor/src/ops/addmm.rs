use tracing::{debug, trace};

use super::accumulate::sum_leaves_to_shape;
use super::function::{BackwardFunction, single_grad_output};
use super::matmul::{matmul_with_config, not_packed};
use super::{Operand, map_leaves, transpose_leaves, zip_map_leaves};
use crate::array::DenseArray;
use crate::config::{NestedConfig, config};
use crate::error::TensorError;
use crate::nested::NestedTensor;
use crate::scalar::Scalar;

/// Inputs saved by [`addmm`] for the backward pass.
#[derive(Debug, Clone)]
pub struct AddmmSavedContext<T: Scalar> {
    pub input: DenseArray<T>,
    pub self_: NestedTensor<T>,
    pub other: DenseArray<T>,
    pub alpha: T,
    pub beta: T,
}

/// `alpha * (self_ @ other) + beta * input` for every leaf of `self_`.
///
/// `input` is a bias broadcast to each leaf product. `self_` must have
/// 2-D leaves and `other` must be a 2-D dense array.
///
/// # Errors
///
/// Returns `TensorError::InvalidArgument` if an operand has the wrong role
/// or rank, and `TensorError::ShapeMismatch` if shapes are incompatible.
pub fn addmm<T: Scalar>(
    input: &Operand<T>,
    self_: &Operand<T>,
    other: &Operand<T>,
    alpha: T,
    beta: T,
) -> Result<(NestedTensor<T>, AddmmSavedContext<T>), TensorError> {
    let (input, nt, mat) = check_operands(input, self_, other)?;
    let result = addmm_with_config(config(), input, nt, mat, alpha, beta)?;
    let ctx = AddmmSavedContext {
        input: input.clone(),
        self_: nt.clone(),
        other: mat.clone(),
        alpha,
        beta,
    };
    Ok((result, ctx))
}

fn check_operands<'a, T: Scalar>(
    input: &'a Operand<T>,
    self_: &'a Operand<T>,
    other: &'a Operand<T>,
) -> Result<(&'a DenseArray<T>, &'a NestedTensor<T>, &'a DenseArray<T>), TensorError> {
    let Operand::Dense(input) = input else {
        return Err(TensorError::InvalidArgument(
            "addmm: input must be a dense array".into(),
        ));
    };
    let Operand::Ragged(nt) = self_ else {
        return Err(TensorError::InvalidArgument(
            "addmm: self must be a nested tensor".into(),
        ));
    };
    let Operand::Dense(other) = other else {
        return Err(TensorError::InvalidArgument(
            "addmm: other must be a dense array".into(),
        ));
    };
    if other.ndim() != 2 {
        return Err(TensorError::InvalidArgument(format!(
            "addmm: other must be 2-D, got rank {}",
            other.ndim()
        )));
    }
    if nt.dim() - nt.nested_dim() != 2 {
        return Err(TensorError::InvalidArgument(format!(
            "addmm: self must have 2-D leaves, got rank {}",
            nt.dim() - nt.nested_dim()
        )));
    }
    Ok((input, nt, other))
}

pub(crate) fn addmm_with_config<T: Scalar>(
    cfg: &NestedConfig,
    input: &DenseArray<T>,
    self_: &NestedTensor<T>,
    other: &DenseArray<T>,
    alpha: T,
    beta: T,
) -> Result<NestedTensor<T>, TensorError> {
    if cfg.packed_fast_paths && packed_applies(input, self_, other) {
        let (k, n) = (other.shape()[0], other.shape()[1]);
        debug!(numel = self_.numel(), k, n, "packed addmm");
        let buffer = self_.buffer().ok_or_else(not_packed)?;
        let rows = self_.numel() / k;
        let product = DenseArray::addmm_with_par(
            input,
            &buffer.reshape(&[rows, k])?,
            other,
            alpha,
            beta,
            cfg.gemm_par(),
        )?;
        let sizes = self_.nested_size().map(|shape| vec![shape[0], n]);
        return NestedTensor::from_buffer(product.reshape(&[rows * n])?, &sizes);
    }
    trace!("leaf-wise addmm");
    map_leaves(cfg, self_, |leaf| {
        DenseArray::addmm(input, leaf, other, alpha, beta)
    })
}

/// Contiguous, one nesting level, a concrete inner dimension equal to the
/// rows of `other`, and a bias that broadcasts to one output row.
fn packed_applies<T: Scalar>(
    input: &DenseArray<T>,
    self_: &NestedTensor<T>,
    other: &DenseArray<T>,
) -> bool {
    if !self_.is_contiguous() || self_.dim() != 3 || self_.nested_dim() != 1 {
        return false;
    }
    let (k, n) = (other.shape()[0], other.shape()[1]);
    let inner = self_.size()[2];
    inner == Some(k) && k > 0 && broadcasts_to_row(input.shape(), n)
}

fn broadcasts_to_row(shape: &[usize], n: usize) -> bool {
    match shape {
        [] => true,
        [c] | [1, c] => *c == n || *c == 1,
        _ => false,
    }
}

fn scale_nested<T: Scalar>(
    cfg: &NestedConfig,
    nt: &NestedTensor<T>,
    alpha: T,
) -> Result<NestedTensor<T>, TensorError> {
    match nt.buffer() {
        Some(buffer) if nt.is_contiguous() => {
            NestedTensor::from_buffer(buffer.scale(alpha), &nt.nested_size())
        }
        _ => map_leaves(cfg, nt, |leaf| Ok(leaf.scale(alpha))),
    }
}

impl<T: Scalar> BackwardFunction<T> for AddmmSavedContext<T> {
    /// Gradients for `(input, self_, other, alpha, beta)`; the scalar
    /// coefficients get `None`.
    fn apply(&self, grad_outputs: &[Operand<T>]) -> Result<Vec<Option<Operand<T>>>, TensorError> {
        let grad = single_grad_output("addmm", grad_outputs)?;
        let cfg = config();
        trace!("addmm backward");

        let grad_input = sum_leaves_to_shape(grad, self.input.shape())?.scale(self.beta);

        let alpha = self.alpha;
        let other_t = Operand::Dense(self.other.transpose_last()?);
        let grad_self = scale_nested(cfg, &matmul_with_config(cfg, grad, &other_t)?, alpha)?;

        let self_t = transpose_leaves(cfg, &self.self_)?;
        let per_leaf = zip_map_leaves(cfg, &self_t, grad, |a, g| a.matmul(g))?;
        let grad_other = sum_leaves_to_shape(&per_leaf, self.other.shape())?.scale(alpha);

        Ok(vec![
            Some(Operand::Dense(grad_input)),
            Some(Operand::Ragged(grad_self)),
            Some(Operand::Dense(grad_other)),
            None,
            None,
        ])
    }
}
