//! Backward function of packing several arrays into one flat buffer.

use super::graph::{GradFn, NodeId};
use crate::array::DenseArray;
use crate::error::TensorError;
use crate::scalar::Scalar;

#[derive(Debug)]
struct PackedSource {
    node: NodeId,
    offset: usize,
    shape: Vec<usize>,
}

/// Splits the gradient of a packed 1-D buffer back into the arrays that
/// were copied into it. Sources that were not tracked are simply skipped.
#[derive(Debug, Default)]
pub struct PackBackward {
    len: usize,
    sources: Vec<PackedSource>,
}

impl PackBackward {
    /// Empty pack for a buffer of `len` elements.
    pub fn new(len: usize) -> Self {
        Self {
            len,
            sources: Vec::new(),
        }
    }

    /// Record that the array of node `node` was copied, row-major, to
    /// `offset`.
    pub fn push(&mut self, node: NodeId, offset: usize, shape: &[usize]) {
        self.sources.push(PackedSource {
            node,
            offset,
            shape: shape.to_vec(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl<T: Scalar> GradFn<T> for PackBackward {
    fn backward(
        &self,
        grad_output: &DenseArray<T>,
    ) -> Result<Vec<(NodeId, DenseArray<T>)>, TensorError> {
        if grad_output.shape() != [self.len] {
            return Err(TensorError::shape_mismatch(&[self.len], grad_output.shape()));
        }
        let data = grad_output.to_vec();
        self.sources
            .iter()
            .map(|src| {
                let numel: usize = src.shape.iter().product();
                let end = src.offset + numel;
                if end > data.len() {
                    return Err(TensorError::IndexOutOfBounds {
                        index: end,
                        dim_size: data.len(),
                    });
                }
                let grad = DenseArray::from_vec(data[src.offset..end].to_vec(), &src.shape)?;
                Ok((src.node, grad))
            })
            .collect()
    }

    fn inputs(&self) -> Vec<NodeId> {
        self.sources.iter().map(|src| src.node).collect()
    }
}
