//! nestedtensor - ragged tensors with packed buffers
//!
//! A [`NestedTensor`] is a tree of dense arrays whose shapes may differ
//! (e.g. a batch of sequences of different lengths). Leaves may all be
//! views into one flat buffer, in which case the tensor is *packed* and
//! batched operations can run as a single dense kernel.
//!
//! # Architecture
//!
//! ```text
//! ops        matmul / addmm forward + BackwardFunction contexts
//!   │            strategy selection: packed single buffer → leaf-wise
//!   ▼
//! nested     NestedTensor: size/stride trees, pack, to_tensor, grads
//!   │
//!   ├── tree      TreeNode<T>: ordered tree with map / zip / flatten
//!   ▼
//! array      DenseArray: strided views over shared storage, faer gemm
//!   │
//!   ▼
//! autograd   thread-local graph: leaf gradients, view scatter
//! ```
//!
//! # Example
//!
//! ```
//! use nestedtensor::{DenseArray, NestedTensor};
//! use nestedtensor::ops::{Operand, matmul};
//!
//! let nt = NestedTensor::from_leaves(vec![
//!     DenseArray::<f64>::ones(&[3, 4]),
//!     DenseArray::<f64>::ones(&[1, 4]),
//! ])
//! .unwrap()
//! .contiguous()
//! .unwrap();
//! assert_eq!(nt.size(), vec![Some(2), None, Some(4)]);
//!
//! let w = DenseArray::<f64>::full(&[4, 2], 0.5);
//! let (out, _ctx) = matmul(&Operand::Ragged(nt), &Operand::Dense(w)).unwrap();
//! let leaves = out.structure().flatten();
//! assert_eq!(leaves[0].shape(), &[3, 2]);
//! assert_eq!(leaves[1].to_vec(), vec![2.0, 2.0]);
//! ```

pub mod array;
pub mod autograd;
pub mod config;
pub mod error;
pub mod nested;
pub mod ops;
pub mod random;
pub mod scalar;
pub mod storage;
pub mod strides;
pub mod tree;

pub use array::{DenseArray, Device};
pub use config::{NestedConfig, config, configure};
pub use error::TensorError;
pub use nested::{NestedTensor, build_structure};
pub use ops::{
    AddmmSavedContext, BackwardFunction, MatmulSavedContext, Operand, addmm, map_nested_tensor,
    matmul, matmul_out, zip_map_nested_tensor,
};
pub use scalar::{DType, Scalar, c64};
pub use tree::TreeNode;
