//! Gradient storage container.

use std::collections::HashMap;

use super::graph::NodeId;
use crate::array::DenseArray;
use crate::error::TensorError;
use crate::scalar::Scalar;

/// Pending gradients of a backward pass, keyed by node.
///
/// A node reached along several paths receives the sum of the
/// contributions.
#[derive(Debug)]
pub struct Gradients<T: Scalar> {
    grads: HashMap<NodeId, DenseArray<T>>,
}

impl<T: Scalar> Gradients<T> {
    pub fn new() -> Self {
        Self {
            grads: HashMap::new(),
        }
    }

    /// Accumulate a gradient for a node.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if an existing gradient for the
    /// node has a different shape.
    pub fn accumulate(&mut self, id: NodeId, grad: DenseArray<T>) -> Result<(), TensorError> {
        match self.grads.get_mut(&id) {
            Some(existing) => existing.add_assign(&grad),
            None => {
                self.grads.insert(id, grad);
                Ok(())
            }
        }
    }

    /// Remove and return a gradient (to hand it to a backward function).
    pub fn remove(&mut self, id: NodeId) -> Option<DenseArray<T>> {
        self.grads.remove(&id)
    }
}

impl<T: Scalar> Default for Gradients<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_multiple() {
        let mut grads: Gradients<f64> = Gradients::new();
        let id = NodeId::new_for_test(0);
        grads
            .accumulate(id, DenseArray::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap())
            .unwrap();
        grads
            .accumulate(id, DenseArray::from_vec(vec![4.0, 5.0, 6.0], &[3]).unwrap())
            .unwrap();
        assert_eq!(grads.grads[&id].to_vec(), vec![5.0, 7.0, 9.0]);
        assert_eq!(grads.grads.len(), 1);
    }

    #[test]
    fn test_accumulate_shape_mismatch() {
        let mut grads: Gradients<f64> = Gradients::new();
        let id = NodeId::new_for_test(3);
        grads.accumulate(id, DenseArray::zeros(&[2])).unwrap();
        assert!(grads.accumulate(id, DenseArray::zeros(&[3])).is_err());
        assert_eq!(grads.grads[&id].shape(), &[2]);
    }

    #[test]
    fn test_remove() {
        let mut grads: Gradients<f64> = Gradients::new();
        let id = NodeId::new_for_test(1);
        grads.accumulate(id, DenseArray::ones(&[2, 2])).unwrap();
        assert!(grads.grads.contains_key(&id));
        assert!(grads.remove(id).is_some());
        assert!(!grads.grads.contains_key(&id));
        assert!(grads.grads.is_empty());
    }
}
