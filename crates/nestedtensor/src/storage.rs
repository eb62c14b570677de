//! Shared host storage for dense arrays.
//!
//! A `Storage` is the sole owner of a flat element vector. Arrays hold a
//! handle plus an element offset, so every view of a packed buffer is an
//! auditable `(storage, offset, shape, strides)` tuple. Handles are
//! reference counted: a view can never outlive the storage it reads.

use std::sync::Arc;

use crate::scalar::Scalar;

/// Reference-counted flat element buffer in host memory.
#[derive(Debug, Clone)]
pub struct Storage<T: Scalar> {
    data: Arc<Vec<T>>,
}

impl<T: Scalar> Storage<T> {
    /// Create storage with given length, zero-initialized.
    pub fn zeros(len: usize) -> Self {
        Self::from_vec(vec![T::zero(); len])
    }

    /// Create storage from existing vector (takes ownership).
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    /// Length of storage.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if storage is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get immutable slice of data.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Get a mutable slice, copying first if other handles share the data.
    pub fn make_mut(&mut self) -> &mut [T] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Check if two handles point at the same allocation.
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}
