//! Scalar trait for array element types.

use faer_traits::ComplexField;
use std::fmt::Debug;
use std::ops::{Add, Mul, Sub};

use crate::autograd::{ComputationGraph, with_graph_c64, with_graph_f64};

pub use faer::c64;

/// Element type tag reported by `dtype()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F64,
    C64,
}

/// Trait for scalar types supported by nestedtensor.
///
/// This wraps faer's `ComplexField` with the arithmetic bounds needed by
/// the dense kernels, and gives every element type its own thread-local
/// computation graph.
pub trait Scalar:
    ComplexField
    + Copy
    + Debug
    + Default
    + PartialEq
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + 'static
{
    /// Element type tag.
    const DTYPE: DType;

    /// Returns the additive identity (zero).
    fn zero() -> Self {
        Self::default()
    }

    /// Returns the multiplicative identity (one).
    fn one() -> Self;

    /// Run `f` against this thread's computation graph for the element type.
    fn with_graph<R>(f: impl FnOnce(&mut ComputationGraph<Self>) -> R) -> R;
}

impl Scalar for f64 {
    const DTYPE: DType = DType::F64;

    fn one() -> Self {
        1.0
    }

    fn with_graph<R>(f: impl FnOnce(&mut ComputationGraph<Self>) -> R) -> R {
        with_graph_f64(f)
    }
}

impl Scalar for c64 {
    const DTYPE: DType = DType::C64;

    fn one() -> Self {
        c64::new(1.0, 0.0)
    }

    fn with_graph<R>(f: impl FnOnce(&mut ComputationGraph<Self>) -> R) -> R {
        with_graph_c64(f)
    }
}
