//! Computation graph for reverse-mode automatic differentiation.

use std::cell::RefCell;
use std::fmt::Debug;

use crate::array::DenseArray;
use crate::error::TensorError;
use crate::scalar::Scalar;

/// Unique identifier for a node in the computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Get the internal index.
    pub fn index(&self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(index: usize) -> Self {
        Self(index)
    }
}

/// Backward function of a graph node.
///
/// Maps the gradient of the node's output to gradients of its inputs.
pub trait GradFn<T: Scalar>: Debug {
    /// Compute the vector-Jacobian product for each input.
    fn backward(
        &self,
        grad_output: &DenseArray<T>,
    ) -> Result<Vec<(NodeId, DenseArray<T>)>, TensorError>;

    /// Input node IDs (for topological sort).
    fn inputs(&self) -> Vec<NodeId>;
}

/// A node in the computation graph.
#[derive(Debug)]
pub struct Node<T: Scalar> {
    id: NodeId,
    /// Backward function (None for leaf nodes and released nodes).
    grad_fn: Option<Box<dyn GradFn<T>>>,
    requires_grad: bool,
    /// Set once the backward function has been freed by a backward pass.
    released: bool,
    /// Gradient deposited on a leaf by backward passes.
    grad: Option<DenseArray<T>>,
}

impl<T: Scalar> Node<T> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn grad_fn(&self) -> Option<&dyn GradFn<T>> {
        self.grad_fn.as_deref()
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Whether a previous backward pass freed this node's backward function.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Whether this node is a graph leaf (never had a backward function).
    pub fn is_leaf(&self) -> bool {
        self.grad_fn.is_none() && !self.released
    }

    pub(crate) fn release(&mut self) {
        if self.grad_fn.take().is_some() {
            self.released = true;
        }
    }

    pub(crate) fn accumulate_grad(&mut self, grad: DenseArray<T>) -> Result<(), TensorError> {
        match &mut self.grad {
            Some(existing) => existing.add_assign(&grad),
            None => {
                self.grad = Some(grad);
                Ok(())
            }
        }
    }
}

/// Thread-local computation graph.
///
/// Each thread has one independent graph per scalar type.
pub struct ComputationGraph<T: Scalar> {
    nodes: Vec<Node<T>>,
}

impl<T: Scalar> ComputationGraph<T> {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    fn push(&mut self, grad_fn: Option<Box<dyn GradFn<T>>>, requires_grad: bool) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            grad_fn,
            requires_grad,
            released: false,
            grad: None,
        });
        id
    }

    /// Create a leaf node (an array created by the user with requires_grad).
    pub fn create_leaf(&mut self, requires_grad: bool) -> NodeId {
        self.push(None, requires_grad)
    }

    /// Create a computed node with a backward function.
    pub fn create_node(&mut self, grad_fn: Box<dyn GradFn<T>>, requires_grad: bool) -> NodeId {
        self.push(Some(grad_fn), requires_grad)
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node<T>> {
        self.nodes.get(id.index())
    }

    pub(crate) fn get_node_mut(&mut self, id: NodeId) -> Option<&mut Node<T>> {
        self.nodes.get_mut(id.index())
    }

    /// Gradient accumulated on a node.
    pub fn grad(&self, id: NodeId) -> Option<&DenseArray<T>> {
        self.get_node(id)?.grad.as_ref()
    }

    /// Drop the accumulated gradient of a node.
    pub fn zero_grad(&mut self, id: NodeId) {
        if let Some(node) = self.get_node_mut(id) {
            node.grad = None;
        }
    }

    pub fn nodes(&self) -> &[Node<T>] {
        &self.nodes
    }

    /// Remove every node. Outstanding `NodeId`s become dangling.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<T: Scalar> Default for ComputationGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> Debug for ComputationGraph<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputationGraph")
            .field("num_nodes", &self.nodes.len())
            .finish()
    }
}

thread_local! {
    static GRAPH_F64: RefCell<ComputationGraph<f64>> = RefCell::new(ComputationGraph::new());
    static GRAPH_C64: RefCell<ComputationGraph<faer::c64>> = RefCell::new(ComputationGraph::new());
}

/// Access the thread-local computation graph for f64.
pub fn with_graph_f64<R>(f: impl FnOnce(&mut ComputationGraph<f64>) -> R) -> R {
    GRAPH_F64.with(|g| f(&mut g.borrow_mut()))
}

/// Access the thread-local computation graph for c64.
pub fn with_graph_c64<R>(f: impl FnOnce(&mut ComputationGraph<faer::c64>) -> R) -> R {
    GRAPH_C64.with(|g| f(&mut g.borrow_mut()))
}

/// Clear this thread's computation graph for `T`.
pub fn clear_graph<T: Scalar>() {
    T::with_graph(|g| g.clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct PassThrough {
        input_ids: Vec<NodeId>,
    }

    impl GradFn<f64> for PassThrough {
        fn backward(
            &self,
            grad_output: &DenseArray<f64>,
        ) -> Result<Vec<(NodeId, DenseArray<f64>)>, TensorError> {
            Ok(self
                .input_ids
                .iter()
                .map(|&id| (id, grad_output.clone()))
                .collect())
        }

        fn inputs(&self) -> Vec<NodeId> {
            self.input_ids.clone()
        }
    }

    #[test]
    fn test_create_leaf() {
        let mut graph: ComputationGraph<f64> = ComputationGraph::new();
        let a = graph.create_leaf(true);
        let b = graph.create_leaf(false);
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);

        let node = graph.get_node(a).unwrap();
        assert!(node.requires_grad());
        assert!(node.is_leaf());
        assert!(!graph.get_node(b).unwrap().requires_grad());
    }

    #[test]
    fn test_create_node_and_release() {
        let mut graph: ComputationGraph<f64> = ComputationGraph::new();
        let a = graph.create_leaf(true);
        let b = graph.create_leaf(true);
        let c = graph.create_node(Box::new(PassThrough { input_ids: vec![a, b] }), true);

        let node = graph.get_node(c).unwrap();
        assert_eq!(node.grad_fn().unwrap().inputs(), vec![a, b]);
        assert!(!node.is_leaf());

        graph.get_node_mut(c).unwrap().release();
        let node = graph.get_node(c).unwrap();
        assert!(node.is_released());
        assert!(!node.is_leaf());
        assert!(node.grad_fn().is_none());
    }

    #[test]
    fn test_leaf_grad_accumulates() {
        let mut graph: ComputationGraph<f64> = ComputationGraph::new();
        let a = graph.create_leaf(true);
        let g = DenseArray::from_vec(vec![1.0, 2.0], &[2]).unwrap();
        let node = graph.get_node_mut(a).unwrap();
        node.accumulate_grad(g.clone()).unwrap();
        node.accumulate_grad(g).unwrap();
        assert_eq!(graph.grad(a).unwrap().to_vec(), vec![2.0, 4.0]);

        graph.zero_grad(a);
        assert!(graph.grad(a).is_none());
    }

    #[test]
    fn test_thread_local_graph() {
        clear_graph::<f64>();
        with_graph_f64(|g| {
            g.create_leaf(true);
            g.create_leaf(true);
        });
        assert_eq!(with_graph_f64(|g| g.len()), 2);
        clear_graph::<f64>();
        assert!(with_graph_f64(|g| g.is_empty()));
    }

    #[test]
    fn test_graphs_are_per_scalar_type() {
        clear_graph::<f64>();
        clear_graph::<faer::c64>();
        with_graph_c64(|g| g.create_leaf(true));
        assert_eq!(with_graph_f64(|g| g.len()), 0);
        assert_eq!(with_graph_c64(|g| g.len()), 1);
    }
}
