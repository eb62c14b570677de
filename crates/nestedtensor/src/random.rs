//! Random array and nested tensor construction.
//!
//! Mostly used to build test inputs; pass a seeded RNG for reproducible
//! values.

use rand::Rng;
use rand::distr::StandardUniform;
use rand_distr::StandardNormal;

use crate::array::DenseArray;
use crate::error::TensorError;
use crate::nested::NestedTensor;
use crate::scalar::{Scalar, c64};
use crate::tree::{ShapeTree, shape_numel};

/// Types that can be sampled from the uniform distribution on [0, 1).
pub trait RandomUniform: Scalar {
    fn sample_uniform<R: Rng>(rng: &mut R) -> Self;
}

impl RandomUniform for f64 {
    fn sample_uniform<R: Rng>(rng: &mut R) -> Self {
        rng.sample(StandardUniform)
    }
}

impl RandomUniform for c64 {
    fn sample_uniform<R: Rng>(rng: &mut R) -> Self {
        c64::new(rng.sample(StandardUniform), rng.sample(StandardUniform))
    }
}

/// Types that can be sampled from the standard normal distribution.
pub trait RandomNormal: Scalar {
    fn sample_normal<R: Rng>(rng: &mut R) -> Self;
}

impl RandomNormal for f64 {
    fn sample_normal<R: Rng>(rng: &mut R) -> Self {
        rng.sample(StandardNormal)
    }
}

impl RandomNormal for c64 {
    fn sample_normal<R: Rng>(rng: &mut R) -> Self {
        // Real and imaginary parts are N(0, 1/2) so that E|z|^2 = 1.
        let scale = std::f64::consts::FRAC_1_SQRT_2;
        c64::new(
            rng.sample::<f64, _>(StandardNormal) * scale,
            rng.sample::<f64, _>(StandardNormal) * scale,
        )
    }
}

impl<T: RandomUniform> DenseArray<T> {
    /// Uniform random values in [0, 1).
    ///
    /// # Example
    ///
    /// ```
    /// use nestedtensor::DenseArray;
    /// use rand::SeedableRng;
    /// use rand::rngs::StdRng;
    ///
    /// let a = DenseArray::<f64>::random_with_rng(&[2, 3], &mut StdRng::seed_from_u64(7));
    /// let b = DenseArray::<f64>::random_with_rng(&[2, 3], &mut StdRng::seed_from_u64(7));
    /// assert_eq!(a.to_vec(), b.to_vec());
    /// assert!(a.to_vec().iter().all(|&x| (0.0..1.0).contains(&x)));
    /// ```
    pub fn random_with_rng<R: Rng>(shape: &[usize], rng: &mut R) -> Self {
        Self::from_fn(shape, |_| T::sample_uniform(rng))
    }

    /// Uniform random values from the thread RNG.
    pub fn random(shape: &[usize]) -> Self {
        Self::random_with_rng(shape, &mut rand::rng())
    }
}

impl<T: RandomNormal> DenseArray<T> {
    /// Standard normal random values.
    pub fn randn_with_rng<R: Rng>(shape: &[usize], rng: &mut R) -> Self {
        Self::from_fn(shape, |_| T::sample_normal(rng))
    }

    pub fn randn(shape: &[usize]) -> Self {
        Self::randn_with_rng(shape, &mut rand::rng())
    }
}

impl<T: RandomNormal> NestedTensor<T> {
    /// A packed nested tensor with leaf shapes `nested_size` and standard
    /// normal values.
    ///
    /// # Example
    ///
    /// ```
    /// use nestedtensor::NestedTensor;
    /// use nestedtensor::tree::TreeNode;
    /// use rand::SeedableRng;
    /// use rand::rngs::StdRng;
    ///
    /// let sizes = TreeNode::internal(vec![
    ///     TreeNode::leaf(vec![2, 4]),
    ///     TreeNode::leaf(vec![5, 4]),
    /// ]);
    /// let nt = NestedTensor::<f64>::randn_with_rng(&sizes, &mut StdRng::seed_from_u64(1)).unwrap();
    /// assert!(nt.is_contiguous());
    /// assert_eq!(nt.numel(), 28);
    /// ```
    pub fn randn_with_rng<R: Rng>(nested_size: &ShapeTree, rng: &mut R) -> Result<Self, TensorError> {
        let numel = shape_numel(nested_size);
        Self::from_buffer(DenseArray::randn_with_rng(&[numel], rng), nested_size)
    }
}
