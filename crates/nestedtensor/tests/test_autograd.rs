//! Integration tests for gradient flow through nested tensors.

use approx::assert_relative_eq;
use nestedtensor::autograd::{backward, clear_graph};
use nestedtensor::ops::{BackwardFunction, Operand, matmul};
use nestedtensor::{DenseArray, NestedTensor, TensorError, TreeNode};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn packed(seed: u64) -> NestedTensor<f64> {
    let sizes = TreeNode::internal(vec![
        TreeNode::leaf(vec![2, 3]),
        TreeNode::leaf(vec![1, 3]),
        TreeNode::leaf(vec![4, 3]),
    ]);
    NestedTensor::randn_with_rng(&sizes, &mut StdRng::seed_from_u64(seed)).unwrap()
}

#[test]
fn test_leaf_views_accumulate_into_buffer() {
    clear_graph::<f64>();
    let nt = packed(1).with_requires_grad(true).unwrap();
    let leaves = nt.structure().flatten();

    // Two passes into the same slot accumulate.
    leaves[1]
        .backward(&DenseArray::full(&[1, 3], 2.0), true, false)
        .unwrap();
    leaves[1]
        .backward(&DenseArray::full(&[1, 3], 0.5), false, false)
        .unwrap();

    let grad = nt.grad().unwrap();
    assert!(grad.is_contiguous());
    let buffer_grad = grad.buffer().unwrap().to_vec();
    assert_eq!(buffer_grad.len(), 21);
    assert!(buffer_grad[..6].iter().all(|&x| x == 0.0));
    assert!(buffer_grad[6..9].iter().all(|&x| x == 2.5));
    assert!(buffer_grad[9..].iter().all(|&x| x == 0.0));
    assert_eq!(grad.structure().flatten()[1].to_vec(), vec![2.5; 3]);
}

#[test]
fn test_released_view_cannot_run_twice() {
    clear_graph::<f64>();
    let nt = packed(2).with_requires_grad(true).unwrap();
    let leaf = nt.structure().flatten()[0].clone();
    let seed = DenseArray::ones(&[2, 3]);
    leaf.backward(&seed, false, false).unwrap();
    assert!(matches!(
        backward(&leaf, &seed, false, false),
        Err(TensorError::UnsupportedOperation(_))
    ));
}

#[test]
fn test_matmul_gradient_flows_to_nested_input() {
    clear_graph::<f64>();
    let nt = packed(3).with_requires_grad(true).unwrap();
    let w = DenseArray::<f64>::randn_with_rng(&[3, 2], &mut StdRng::seed_from_u64(4));
    let (out, ctx) = matmul(&Operand::Ragged(nt.detach()), &Operand::Dense(w.clone())).unwrap();

    let seed = nestedtensor::map_nested_tensor(&out, |l| Ok(DenseArray::ones(l.shape()))).unwrap();
    let grads = ctx.apply(&[Operand::Ragged(seed)]).unwrap();
    let grad_self = grads[0].as_ref().and_then(Operand::as_ragged).unwrap();

    nt.backward(&grad_self.contiguous().unwrap(), false, false).unwrap();
    let grad = nt.grad().unwrap();

    // d(sum(X W))/dX[i, k] = sum_n W[k, n].
    let row_sums: Vec<f64> = (0..3)
        .map(|k| w.get(&[k, 0]).unwrap() + w.get(&[k, 1]).unwrap())
        .collect();
    for leaf in grad.structure().flatten() {
        for i in 0..leaf.shape()[0] {
            for (k, &s) in row_sums.iter().enumerate() {
                assert_relative_eq!(leaf.get(&[i, k]).unwrap(), s, epsilon = 1e-12);
            }
        }
    }
}

#[test]
fn test_unpacked_leaves_get_own_grads() {
    clear_graph::<f64>();
    let nt = NestedTensor::from_leaves(vec![
        DenseArray::<f64>::zeros(&[2]),
        DenseArray::<f64>::zeros(&[1]),
    ])
    .unwrap()
    .with_requires_grad(true)
    .unwrap();
    let seed = NestedTensor::from_leaves(vec![
        DenseArray::from_vec(vec![1.0, 2.0], &[2]).unwrap(),
        DenseArray::from_vec(vec![3.0], &[1]).unwrap(),
    ])
    .unwrap();
    nt.backward(&seed, false, false).unwrap();
    let grad = nt.grad().unwrap();
    assert!(!grad.is_packed());
    let values: Vec<Vec<f64>> = grad.structure().flatten().iter().map(|l| l.to_vec()).collect();
    assert_eq!(values, vec![vec![1.0, 2.0], vec![3.0]]);
}
