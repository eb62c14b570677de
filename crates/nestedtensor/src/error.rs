//! Error types for nestedtensor.

use thiserror::Error;

/// Errors that can occur in dense and nested tensor operations.
#[derive(Debug, Error)]
pub enum TensorError {
    /// Operand trees or array shapes are incompatible.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A concrete size was required but the dimension is ragged.
    #[error("dimension {dim} is ragged; a concrete size is required")]
    RaggedShape { dim: usize },

    /// A role, rank or layout precondition was violated at an entry point.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested operation is not supported (e.g. double backward).
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Data length does not match the requested shape.
    #[error("element count mismatch: expected {expected} elements, got {actual}")]
    ElementCountMismatch { expected: usize, actual: usize },

    /// Index out of bounds.
    #[error("index out of bounds: index {index} is out of range for dimension {dim_size}")]
    IndexOutOfBounds { index: usize, dim_size: usize },

    /// Operation requires a specific array rank.
    #[error("expected array of rank {expected}, got rank {actual}")]
    RankMismatch { expected: usize, actual: usize },

    /// Dimension index out of range for the array rank.
    #[error("dimension {dim} out of range for array of rank {ndim}")]
    InvalidDimension { dim: usize, ndim: usize },
}

impl TensorError {
    pub(crate) fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        TensorError::ShapeMismatch(format!("expected {expected:?}, got {actual:?}"))
    }
}
