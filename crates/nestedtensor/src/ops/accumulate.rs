use crate::array::DenseArray;
use crate::error::TensorError;
use crate::nested::NestedTensor;
use crate::scalar::Scalar;

/// Sum every leaf of `nt` into one dense array of `shape`.
///
/// Each leaf is first reduced over the dimensions that broadcasting
/// `shape` to the leaf shape would expand, then added in traversal order.
/// This is how ragged gradients are folded back onto a dense operand.
///
/// # Example
///
/// ```
/// use nestedtensor::{DenseArray, NestedTensor};
/// use nestedtensor::ops::sum_leaves_to_shape;
///
/// let nt = NestedTensor::from_leaves(vec![
///     DenseArray::<f64>::ones(&[2, 3]),
///     DenseArray::<f64>::ones(&[1, 3]),
/// ])
/// .unwrap();
/// let total = sum_leaves_to_shape(&nt, &[3]).unwrap();
/// assert_eq!(total.to_vec(), vec![3.0, 3.0, 3.0]);
/// ```
pub fn sum_leaves_to_shape<T: Scalar>(
    nt: &NestedTensor<T>,
    shape: &[usize],
) -> Result<DenseArray<T>, TensorError> {
    let mut acc = DenseArray::zeros(shape);
    for leaf in nt.structure().flatten() {
        acc.add_assign(&leaf.sum_to_shape(shape)?)?;
    }
    Ok(acc)
}
