use super::Operand;
use crate::error::TensorError;
use crate::nested::NestedTensor;
use crate::scalar::Scalar;

/// Backward half of a differentiable operator.
///
/// The forward pass saves exactly its inputs in the implementing context.
/// `apply` receives the gradients of the forward outputs and returns one
/// entry per forward input, in input order; `None` marks an input that
/// has no gradient (e.g. a scalar coefficient).
pub trait BackwardFunction<T: Scalar> {
    fn apply(&self, grad_outputs: &[Operand<T>]) -> Result<Vec<Option<Operand<T>>>, TensorError>;
}

/// The single ragged output gradient of `op`.
///
/// Double backward is not supported, so a gradient that itself requires
/// grad is rejected.
pub(crate) fn single_grad_output<'a, T: Scalar>(
    op: &str,
    grad_outputs: &'a [Operand<T>],
) -> Result<&'a NestedTensor<T>, TensorError> {
    let [grad] = grad_outputs else {
        return Err(TensorError::UnsupportedOperation(format!(
            "{op} expects exactly one output gradient, got {}",
            grad_outputs.len()
        )));
    };
    if grad.requires_grad() {
        return Err(TensorError::UnsupportedOperation(format!(
            "{op} does not support double backward"
        )));
    }
    grad.as_ragged().ok_or_else(|| {
        TensorError::InvalidArgument(format!("{op} output gradient must be a nested tensor"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DenseArray;
    use crate::autograd::clear_graph;

    fn grad() -> Operand<f64> {
        NestedTensor::from_leaves(vec![DenseArray::ones(&[2, 2])]).unwrap().into()
    }

    #[test]
    fn test_single_grad_output() {
        let grads = [grad()];
        assert!(single_grad_output("matmul", &grads).is_ok());

        let two = [grad(), grad()];
        assert!(matches!(
            single_grad_output("matmul", &two),
            Err(TensorError::UnsupportedOperation(_))
        ));
        let none: [Operand<f64>; 0] = [];
        assert!(single_grad_output("matmul", &none).is_err());

        let dense = [Operand::Dense(DenseArray::<f64>::ones(&[2]))];
        assert!(matches!(
            single_grad_output("matmul", &dense),
            Err(TensorError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_grad_requiring_grad_rejected() {
        clear_graph::<f64>();
        let tracked = NestedTensor::from_leaves(vec![DenseArray::<f64>::ones(&[2, 2])])
            .unwrap()
            .with_requires_grad(true)
            .unwrap();
        let grads = [Operand::Ragged(tracked)];
        let err = single_grad_output("addmm", &grads).unwrap_err();
        assert!(err.to_string().contains("double backward"));
    }
}
