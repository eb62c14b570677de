//! GEMM-backed matrix products using faer.
//!
//! Arrays are row-major while faer's slice constructors are column-major.
//! A row-major `X` read column-major is `Xᵀ`, so `C = A·B` is evaluated as
//! `Cᵀ = Bᵀ·Aᵀ` without any copies.

use faer::linalg::matmul::matmul as faer_matmul;
use faer::{Accum, MatMut, MatRef, Par};

use super::DenseArray;
use crate::error::TensorError;
use crate::scalar::Scalar;

/// `c (m x n) = alpha * a (m x k) · b (k x n)`, or `c += ...` when
/// `accumulate` is set. All slices are row-major.
pub(crate) fn gemm<T: Scalar>(
    c: &mut [T],
    a: &[T],
    b: &[T],
    (m, k, n): (usize, usize, usize),
    alpha: T,
    accumulate: bool,
    par: Par,
) {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), k * n);
    debug_assert_eq!(c.len(), m * n);
    if k == 0 {
        if !accumulate {
            c.fill(T::zero());
        }
        return;
    }
    let a_t = MatRef::from_column_major_slice(a, k, m);
    let b_t = MatRef::from_column_major_slice(b, n, k);
    let c_t = MatMut::from_column_major_slice_mut(c, n, m);
    let accum = if accumulate {
        Accum::Add
    } else {
        Accum::Replace
    };
    faer_matmul(c_t, accum, b_t, a_t, alpha, par);
}

/// Output shape of `matmul` for operands of shape `a` and `b`.
///
/// Both operands need at least two dimensions. Leading (batch) dimensions
/// must be equal, or one side must have none.
pub fn matmul_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>, TensorError> {
    for shape in [a, b] {
        if shape.len() < 2 {
            return Err(TensorError::RankMismatch {
                expected: 2,
                actual: shape.len(),
            });
        }
    }
    let (batch_a, mk) = a.split_at(a.len() - 2);
    let (batch_b, kn) = b.split_at(b.len() - 2);
    if mk[1] != kn[0] {
        return Err(TensorError::ShapeMismatch(format!(
            "matmul inner dimensions differ: {a:?} @ {b:?}"
        )));
    }
    let batch = match (batch_a.is_empty(), batch_b.is_empty()) {
        (_, true) => batch_a,
        (true, false) => batch_b,
        (false, false) if batch_a == batch_b => batch_a,
        _ => {
            return Err(TensorError::ShapeMismatch(format!(
                "matmul batch dimensions differ: {a:?} @ {b:?}"
            )));
        }
    };
    let mut out = batch.to_vec();
    out.extend_from_slice(&[mk[0], kn[1]]);
    Ok(out)
}

impl<T: Scalar> DenseArray<T> {
    /// Matrix product over the last two dimensions.
    ///
    /// # Example
    ///
    /// ```
    /// use nestedtensor::DenseArray;
    ///
    /// let a = DenseArray::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
    /// let b = DenseArray::<f64>::ones(&[3, 2]);
    /// let c = a.matmul(&b).unwrap();
    /// assert_eq!(c.shape(), &[2, 2]);
    /// assert_eq!(c.to_vec(), vec![6.0, 6.0, 15.0, 15.0]);
    /// ```
    pub fn matmul(&self, other: &Self) -> Result<Self, TensorError> {
        self.matmul_with_par(other, Par::Seq)
    }

    pub(crate) fn matmul_with_par(&self, other: &Self, par: Par) -> Result<Self, TensorError> {
        let shape = matmul_shape(self.shape(), other.shape())?;
        let mut data = vec![T::zero(); shape.iter().product()];
        self.matmul_into_slice(other, &mut data, par)?;
        Self::from_vec(data, &shape)
    }

    /// Write `self · other` into `out` (row-major, sized by [`matmul_shape`]).
    pub(crate) fn matmul_into_slice(
        &self,
        other: &Self,
        out: &mut [T],
        par: Par,
    ) -> Result<(), TensorError> {
        let shape = matmul_shape(self.shape(), other.shape())?;
        let expected: usize = shape.iter().product();
        if out.len() != expected {
            return Err(TensorError::ElementCountMismatch {
                expected,
                actual: out.len(),
            });
        }
        let a = self.contiguous();
        let b = other.contiguous();
        let a_data = a.as_slice().unwrap_or(&[]);
        let b_data = b.as_slice().unwrap_or(&[]);
        let (m, k) = (self.shape()[self.ndim() - 2], self.shape()[self.ndim() - 1]);
        let n = other.shape()[other.ndim() - 1];

        if other.ndim() == 2 {
            // Fold the batch of `self` into its rows: one gemm.
            let rows: usize = self.shape()[..self.ndim() - 1].iter().product();
            gemm(out, a_data, b_data, (rows, k, n), T::one(), false, par);
            return Ok(());
        }

        let batches = expected / (m * n).max(1);
        let a_step = if self.ndim() == 2 { 0 } else { m * k };
        let b_step = k * n;
        if m * n == 0 {
            return Ok(());
        }
        for (i, c) in out.chunks_mut(m * n).enumerate().take(batches) {
            let a_i = &a_data[i * a_step..i * a_step + m * k];
            let b_i = &b_data[i * b_step..i * b_step + k * n];
            gemm(c, a_i, b_i, (m, k, n), T::one(), false, par);
        }
        Ok(())
    }

    /// `beta * input + alpha * (mat1 · mat2)` for 2-D `mat1`, `mat2`.
    ///
    /// `input` is broadcast to the `(rows, cols)` product shape.
    ///
    /// # Example
    ///
    /// ```
    /// use nestedtensor::DenseArray;
    ///
    /// let bias = DenseArray::from_vec(vec![1.0, 2.0], &[2]).unwrap();
    /// let a = DenseArray::<f64>::ones(&[3, 4]);
    /// let b = DenseArray::<f64>::ones(&[4, 2]);
    /// let c = DenseArray::addmm(&bias, &a, &b, 0.5, 2.0).unwrap();
    /// assert_eq!(c.shape(), &[3, 2]);
    /// assert_eq!(c.get(&[0, 0]), Some(4.0));
    /// assert_eq!(c.get(&[2, 1]), Some(6.0));
    /// ```
    pub fn addmm(
        input: &Self,
        mat1: &Self,
        mat2: &Self,
        alpha: T,
        beta: T,
    ) -> Result<Self, TensorError> {
        Self::addmm_with_par(input, mat1, mat2, alpha, beta, Par::Seq)
    }

    pub(crate) fn addmm_with_par(
        input: &Self,
        mat1: &Self,
        mat2: &Self,
        alpha: T,
        beta: T,
        par: Par,
    ) -> Result<Self, TensorError> {
        for mat in [mat1, mat2] {
            if mat.ndim() != 2 {
                return Err(TensorError::RankMismatch {
                    expected: 2,
                    actual: mat.ndim(),
                });
            }
        }
        let shape = matmul_shape(mat1.shape(), mat2.shape())?;
        let (m, k, n) = (shape[0], mat1.shape()[1], shape[1]);
        let expanded = input.expand_to(&shape)?;
        let mut out = if beta == T::zero() {
            DenseArray::zeros(&shape)
        } else {
            expanded.scale(beta)
        };
        let a = mat1.contiguous();
        let b = mat2.contiguous();
        let (a_data, b_data) = (a.as_slice().unwrap_or(&[]), b.as_slice().unwrap_or(&[]));
        gemm(out.data_mut(), a_data, b_data, (m, k, n), alpha, true, par);
        Ok(out)
    }
}
