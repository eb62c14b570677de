//! Backward pass execution for reverse-mode automatic differentiation.

use std::collections::{HashMap, VecDeque};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::trace;

use super::gradients::Gradients;
use super::graph::{ComputationGraph, NodeId};
use crate::array::DenseArray;
use crate::error::TensorError;
use crate::scalar::Scalar;

/// Propagate `gradient` from `root` to every reachable graph leaf.
///
/// Leaf gradients are accumulated on their nodes and read back with
/// [`DenseArray::grad`]. Unless `retain_graph` is set, the backward
/// functions visited are freed and a second pass through them fails.
///
/// # Errors
///
/// - `UnsupportedOperation` if `create_graph` is set or the graph was
///   already freed by an earlier pass.
/// - `InvalidArgument` if `root` is not tracked.
/// - `ShapeMismatch` if `gradient` does not match the shape of `root`.
pub fn backward<T: Scalar>(
    root: &DenseArray<T>,
    gradient: &DenseArray<T>,
    retain_graph: bool,
    create_graph: bool,
) -> Result<(), TensorError> {
    if create_graph {
        return Err(TensorError::UnsupportedOperation(
            "double backward (create_graph = true) is not supported".into(),
        ));
    }
    let root_id = root.node_id().ok_or_else(|| {
        TensorError::InvalidArgument(
            "backward() called on an array that does not require grad".into(),
        )
    })?;
    if gradient.shape() != root.shape() {
        return Err(TensorError::shape_mismatch(root.shape(), gradient.shape()));
    }

    T::with_graph(|graph| {
        let order = topological_sort(graph, root_id)?;
        trace!(root = root_id.index(), nodes = order.len(), "backward pass");

        let mut gradients = Gradients::new();
        gradients.accumulate(root_id, gradient.contiguous())?;
        for &id in &order {
            let Some(grad_output) = gradients.remove(id) else {
                continue;
            };
            let Some(node) = graph.get_node_mut(id) else {
                continue;
            };
            match node.grad_fn().map(|f| f.backward(&grad_output)) {
                Some(input_grads) => {
                    for (input, grad) in input_grads? {
                        gradients.accumulate(input, grad)?;
                    }
                }
                None if node.requires_grad() => node.accumulate_grad(grad_output)?,
                None => {}
            }
        }

        if !retain_graph {
            for &id in &order {
                if let Some(node) = graph.get_node_mut(id) {
                    node.release();
                }
            }
        }
        Ok(())
    })
}

/// Nodes reachable from `start`, outputs before inputs.
fn topological_sort<T: Scalar>(
    graph: &ComputationGraph<T>,
    start: NodeId,
) -> Result<Vec<NodeId>, TensorError> {
    let mut dag: DiGraph<NodeId, ()> = DiGraph::new();
    let mut index: HashMap<NodeId, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);
    index.insert(start, dag.add_node(start));

    while let Some(id) = queue.pop_front() {
        let node = graph.get_node(id).ok_or_else(|| {
            TensorError::InvalidArgument(format!("node {} is not in the graph", id.index()))
        })?;
        if node.is_released() {
            return Err(TensorError::UnsupportedOperation(
                "trying to backward through the graph a second time; \
                 pass retain_graph = true on the first call"
                    .into(),
            ));
        }
        let Some(grad_fn) = node.grad_fn() else {
            continue;
        };
        let output = index[&id];
        for input in grad_fn.inputs() {
            let input_idx = *index.entry(input).or_insert_with(|| {
                queue.push_back(input);
                dag.add_node(input)
            });
            dag.add_edge(output, input_idx, ());
        }
    }

    let sorted = toposort(&dag, None).map_err(|cycle| {
        TensorError::InvalidArgument(format!(
            "computation graph has a cycle at node {}",
            dag[cycle.node_id()].index()
        ))
    })?;
    Ok(sorted.into_iter().map(|idx| dag[idx]).collect())
}
