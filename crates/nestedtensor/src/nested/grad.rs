//! Gradient plumbing for nested tensors.

use tracing::trace;

use super::NestedTensor;
use super::layout::build_structure;
use crate::error::TensorError;
use crate::scalar::Scalar;

impl<T: Scalar> NestedTensor<T> {
    /// Gradient accumulated by earlier backward passes.
    ///
    /// For a contiguous tensor the gradient lives on the buffer, and the
    /// result is a packed tensor of views into it with this tensor's sizes
    /// and strides. Otherwise the leaves' own gradients are collected.
    /// Returns `None` if any required gradient is absent.
    pub fn grad(&self) -> Option<Self> {
        if let (true, Some(buffer)) = (self.is_contiguous(), &self.buffer) {
            let grad_buffer = buffer.grad()?;
            let structure =
                build_structure(&grad_buffer, &self.nested_size(), Some(&self.nested_stride()))
                    .ok()?;
            return Some(Self {
                structure,
                buffer: Some(grad_buffer),
            });
        }
        let structure = self.structure.try_map(|leaf| leaf.grad().ok_or(())).ok()?;
        Some(Self {
            structure,
            buffer: None,
        })
    }

    /// Backpropagate `gradient` through every leaf.
    ///
    /// When both tensors are contiguous a single dense backward runs on
    /// the buffers; otherwise leaves are processed one by one in traversal
    /// order.
    ///
    /// # Errors
    ///
    /// - `UnsupportedOperation` if `create_graph` is set.
    /// - `ShapeMismatch` if `gradient` has a different nested size.
    pub fn backward(
        &self,
        gradient: &Self,
        retain_graph: bool,
        create_graph: bool,
    ) -> Result<(), TensorError> {
        if create_graph {
            return Err(TensorError::UnsupportedOperation(
                "double backward (create_graph = true) is not supported".into(),
            ));
        }
        if self.nested_size() != gradient.nested_size() {
            return Err(TensorError::ShapeMismatch(
                "gradient must have the nested size of the tensor".into(),
            ));
        }
        match (&self.buffer, &gradient.buffer) {
            (Some(buffer), Some(grad_buffer))
                if self.is_contiguous() && gradient.is_contiguous() =>
            {
                trace!(numel = buffer.numel(), "buffer backward");
                buffer.backward(grad_buffer, retain_graph, false)
            }
            _ => {
                trace!(leaves = self.structure.num_leaves(), "leaf-wise backward");
                self.structure.try_zip_apply(&gradient.structure, |leaf, grad| {
                    leaf.backward(grad, retain_graph, false)
                })
            }
        }
    }

    /// Set the requires-grad flag on every leaf and, if packed, the buffer.
    ///
    /// Leaves of a packed tensor are rebuilt as views of the buffer so that
    /// their gradients accumulate there.
    pub fn requires_grad_(&mut self, requires_grad: bool) -> Result<&mut Self, TensorError> {
        let (sizes, strides) = (self.nested_size(), self.nested_stride());
        match &mut self.buffer {
            Some(buffer) => {
                buffer.set_requires_grad(requires_grad);
                self.structure = build_structure(buffer, &sizes, Some(&strides))?;
            }
            None => self
                .structure
                .apply(|leaf| leaf.set_requires_grad(requires_grad)),
        }
        Ok(self)
    }

    /// Builder form of [`NestedTensor::requires_grad_`].
    pub fn with_requires_grad(mut self, requires_grad: bool) -> Result<Self, TensorError> {
        self.requires_grad_(requires_grad)?;
        Ok(self)
    }
}
