//! Reverse-mode automatic differentiation for dense arrays.
//!
//! A thread-local computation graph per scalar type records which arrays
//! require gradients and how views relate to the buffers they alias:
//!
//! ```text
//! DenseArray (requires_grad)  ──registers──►  ComputationGraph<T> (thread_local)
//!        │                                           │
//!        ▼ view_at                                   ▼
//! DenseArray (view)  ──node──►  ViewBackward (GradFn)  ──scatters into──►  buffer leaf
//! ```
//!
//! Packing tracked leaves into a new buffer records a [`PackBackward`] node
//! that splits the buffer gradient back onto them.
//!
//! Graph leaves accumulate their gradient in place; [`DenseArray::grad`]
//! reads it back. The nested matmul operators do not record nodes: their
//! gradients are computed explicitly by [`crate::ops::BackwardFunction`].
//!
//! [`DenseArray::grad`]: crate::DenseArray::grad

mod backward;
mod gradients;
mod graph;
mod pack;
mod view;

pub use backward::backward;
pub use graph::{
    ComputationGraph, GradFn, Node, NodeId, clear_graph, with_graph_c64, with_graph_f64,
};
pub use pack::PackBackward;
pub use view::ViewBackward;
