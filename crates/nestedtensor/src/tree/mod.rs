//! Ordered trees with leaf-wise traversal.
//!
//! Every traversal visits leaves depth-first, left to right. Binary and
//! ternary traversals first check that the operands have the same shape
//! (equal degree at every internal node, leaves in the same places) and
//! fail with `TensorError::ShapeMismatch` before producing any output or
//! running any callback.

mod shape;

pub use shape::{ShapeTree, construct_size, shape_numel};

use crate::error::TensorError;

/// A node of an ordered tree whose payloads live at the leaves.
///
/// # Example
///
/// ```
/// use nestedtensor::TreeNode;
///
/// let tree = TreeNode::internal(vec![
///     TreeNode::internal(vec![TreeNode::leaf(1), TreeNode::leaf(2)]),
///     TreeNode::internal(vec![TreeNode::leaf(3)]),
/// ]);
/// assert_eq!(tree.degree(), 2);
/// assert_eq!(tree.height(), 2);
/// assert_eq!(tree.reduce(0, |x, acc| acc + x), 6);
/// assert_eq!(tree.map(|x| x * 10).flatten(), vec![&10, &20, &30]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode<T> {
    Leaf(T),
    Internal(Vec<TreeNode<T>>),
}

impl<T> TreeNode<T> {
    pub fn leaf(value: T) -> Self {
        TreeNode::Leaf(value)
    }

    pub fn internal(children: Vec<TreeNode<T>>) -> Self {
        TreeNode::Internal(children)
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf(_))
    }

    /// Number of direct children (0 for a leaf).
    pub fn degree(&self) -> usize {
        match self {
            TreeNode::Leaf(_) => 0,
            TreeNode::Internal(children) => children.len(),
        }
    }

    /// Number of levels above the leaves (0 for a leaf).
    pub fn height(&self) -> usize {
        match self {
            TreeNode::Leaf(_) => 0,
            TreeNode::Internal(children) => {
                1 + children.iter().map(TreeNode::height).max().unwrap_or(0)
            }
        }
    }

    /// Direct children (empty for a leaf).
    pub fn children(&self) -> &[TreeNode<T>] {
        match self {
            TreeNode::Leaf(_) => &[],
            TreeNode::Internal(children) => children,
        }
    }

    /// The payload if this node is a leaf.
    pub fn as_leaf(&self) -> Option<&T> {
        match self {
            TreeNode::Leaf(value) => Some(value),
            TreeNode::Internal(_) => None,
        }
    }

    /// First leaf in traversal order.
    pub fn first_leaf(&self) -> Option<&T> {
        match self {
            TreeNode::Leaf(value) => Some(value),
            TreeNode::Internal(children) => children.iter().find_map(TreeNode::first_leaf),
        }
    }

    /// Number of leaves.
    pub fn num_leaves(&self) -> usize {
        self.reduce(0, |_, acc| acc + 1)
    }

    /// Whether `self` and `other` have the same shape.
    pub fn same_shape<U>(&self, other: &TreeNode<U>) -> bool {
        match (self, other) {
            (TreeNode::Leaf(_), TreeNode::Leaf(_)) => true,
            (TreeNode::Internal(a), TreeNode::Internal(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_shape(y))
            }
            _ => false,
        }
    }

    fn check_same_shape<U>(&self, other: &TreeNode<U>) -> Result<(), TensorError> {
        if self.same_shape(other) {
            Ok(())
        } else {
            Err(TensorError::ShapeMismatch(format!(
                "tree structures differ (degree {} vs {}, height {} vs {})",
                self.degree(),
                other.degree(),
                self.height(),
                other.height()
            )))
        }
    }

    /// Map every leaf, keeping the tree shape.
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> TreeNode<U> {
        self.map_inner(&mut f)
    }

    fn map_inner<U>(&self, f: &mut impl FnMut(&T) -> U) -> TreeNode<U> {
        match self {
            TreeNode::Leaf(value) => TreeNode::Leaf(f(value)),
            TreeNode::Internal(children) => {
                TreeNode::Internal(children.iter().map(|c| c.map_inner(f)).collect())
            }
        }
    }

    /// Fallible [`TreeNode::map`]; stops at the first error.
    pub fn try_map<U, E>(&self, mut f: impl FnMut(&T) -> Result<U, E>) -> Result<TreeNode<U>, E> {
        self.try_map_inner(&mut f)
    }

    fn try_map_inner<U, E>(
        &self,
        f: &mut impl FnMut(&T) -> Result<U, E>,
    ) -> Result<TreeNode<U>, E> {
        match self {
            TreeNode::Leaf(value) => Ok(TreeNode::Leaf(f(value)?)),
            TreeNode::Internal(children) => Ok(TreeNode::Internal(
                children
                    .iter()
                    .map(|c| c.try_map_inner(f))
                    .collect::<Result<_, _>>()?,
            )),
        }
    }

    /// Map pairs of corresponding leaves.
    pub fn zip_map<U, V>(
        &self,
        other: &TreeNode<U>,
        mut f: impl FnMut(&T, &U) -> V,
    ) -> Result<TreeNode<V>, TensorError> {
        self.try_zip_map(other, |a, b| Ok(f(a, b)))
    }

    /// Fallible [`TreeNode::zip_map`].
    pub fn try_zip_map<U, V>(
        &self,
        other: &TreeNode<U>,
        mut f: impl FnMut(&T, &U) -> Result<V, TensorError>,
    ) -> Result<TreeNode<V>, TensorError> {
        self.check_same_shape(other)?;
        self.zip_map_inner(other, &mut f)
    }

    fn zip_map_inner<U, V>(
        &self,
        other: &TreeNode<U>,
        f: &mut impl FnMut(&T, &U) -> Result<V, TensorError>,
    ) -> Result<TreeNode<V>, TensorError> {
        match (self, other) {
            (TreeNode::Leaf(a), TreeNode::Leaf(b)) => Ok(TreeNode::Leaf(f(a, b)?)),
            (TreeNode::Internal(a), TreeNode::Internal(b)) => Ok(TreeNode::Internal(
                a.iter()
                    .zip(b)
                    .map(|(x, y)| x.zip_map_inner(y, f))
                    .collect::<Result<_, _>>()?,
            )),
            _ => Err(TensorError::ShapeMismatch("tree structures differ".into())),
        }
    }

    /// Left-to-right fold over the leaves: `acc = f(leaf, acc)`.
    pub fn reduce<'a, A>(&'a self, init: A, mut f: impl FnMut(&'a T, A) -> A) -> A {
        self.reduce_inner(init, &mut f)
    }

    fn reduce_inner<'a, A>(&'a self, acc: A, f: &mut impl FnMut(&'a T, A) -> A) -> A {
        match self {
            TreeNode::Leaf(value) => f(value, acc),
            TreeNode::Internal(children) => {
                children.iter().fold(acc, |acc, c| c.reduce_inner(acc, f))
            }
        }
    }

    /// Run `f` on every leaf for its side effect.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        self.reduce((), |leaf, ()| f(leaf));
    }

    /// Mutate every leaf in place.
    pub fn apply(&mut self, mut f: impl FnMut(&mut T)) {
        self.apply_inner(&mut f);
    }

    fn apply_inner(&mut self, f: &mut impl FnMut(&mut T)) {
        match self {
            TreeNode::Leaf(value) => f(value),
            TreeNode::Internal(children) => {
                for c in children {
                    c.apply_inner(f);
                }
            }
        }
    }

    /// Run `f` on pairs of corresponding leaves, stopping at the first error.
    pub fn try_zip_apply<U>(
        &self,
        other: &TreeNode<U>,
        mut f: impl FnMut(&T, &U) -> Result<(), TensorError>,
    ) -> Result<(), TensorError> {
        self.try_zip_map(other, |a, b| f(a, b)).map(|_| ())
    }

    /// Run `f` on pairs of corresponding leaves.
    pub fn zip_apply<U>(
        &self,
        other: &TreeNode<U>,
        mut f: impl FnMut(&T, &U),
    ) -> Result<(), TensorError> {
        self.try_zip_apply(other, |a, b| {
            f(a, b);
            Ok(())
        })
    }

    /// Leaves in traversal order.
    pub fn flatten(&self) -> Vec<&T> {
        self.reduce(Vec::new(), |leaf, mut acc| {
            acc.push(leaf);
            acc
        })
    }

    /// Consume the tree, returning its leaves in traversal order.
    pub fn into_leaves(self) -> Vec<T> {
        let mut out = Vec::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into(self, out: &mut Vec<T>) {
        match self {
            TreeNode::Leaf(value) => out.push(value),
            TreeNode::Internal(children) => {
                for c in children {
                    c.collect_into(out);
                }
            }
        }
    }

    /// Build a tree of the same shape whose leaves are `values`, in
    /// traversal order.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if `values` yields a different
    /// number of items than `self` has leaves.
    pub fn replace_leaves<U>(
        &self,
        values: impl IntoIterator<Item = U>,
    ) -> Result<TreeNode<U>, TensorError> {
        let mut values = values.into_iter();
        let out = self.try_map(|_| {
            values.next().ok_or_else(|| {
                TensorError::ShapeMismatch("fewer values than tree leaves".into())
            })
        })?;
        if values.next().is_some() {
            return Err(TensorError::ShapeMismatch(
                "more values than tree leaves".into(),
            ));
        }
        Ok(out)
    }
}

#[cfg(feature = "parallel")]
impl<T: Sync> TreeNode<T> {
    /// [`TreeNode::try_map`] with the leaves mapped on the rayon pool.
    ///
    /// The result keeps traversal order; on failure the error of the
    /// earliest failing leaf is returned.
    pub fn try_par_map<U: Send>(
        &self,
        f: impl Fn(&T) -> Result<U, TensorError> + Sync + Send,
    ) -> Result<TreeNode<U>, TensorError> {
        use rayon::prelude::*;

        let mapped: Vec<U> = self
            .flatten()
            .into_par_iter()
            .map(f)
            .collect::<Result<_, _>>()?;
        self.replace_leaves(mapped)
    }
}

/// Run `f(out_leaf, a_leaf, b_leaf)` over three same-shaped trees.
///
/// All three shapes are checked before `f` runs.
pub fn zip_apply_mut<T, U, V>(
    out: &mut TreeNode<V>,
    a: &TreeNode<T>,
    b: &TreeNode<U>,
    mut f: impl FnMut(&mut V, &T, &U) -> Result<(), TensorError>,
) -> Result<(), TensorError> {
    a.check_same_shape(b)?;
    a.check_same_shape(out)?;
    let mut pairs = a.flatten().into_iter().zip(b.flatten());
    let mut result = Ok(());
    out.apply(|leaf| {
        if result.is_err() {
            return;
        }
        if let Some((x, y)) = pairs.next() {
            result = f(leaf, x, y);
        }
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(groups: &[&[i32]]) -> TreeNode<i32> {
        TreeNode::internal(
            groups
                .iter()
                .map(|g| TreeNode::internal(g.iter().copied().map(TreeNode::leaf).collect()))
                .collect(),
        )
    }

    #[test]
    fn test_degree_and_height() {
        let t = tree(&[&[1, 2], &[3]]);
        assert_eq!(t.degree(), 2);
        assert_eq!(t.height(), 2);
        assert_eq!(t.children()[0].degree(), 2);
        assert_eq!(TreeNode::leaf(5).height(), 0);
        assert_eq!(TreeNode::leaf(5).degree(), 0);
        assert_eq!(TreeNode::<i32>::internal(vec![]).height(), 1);
    }

    #[test]
    fn test_traversal_order() {
        let t = tree(&[&[1, 2], &[3]]);
        let mut seen = Vec::new();
        t.for_each(|x| seen.push(*x));
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(t.flatten(), vec![&1, &2, &3]);
        assert_eq!(t.first_leaf(), Some(&1));
        assert_eq!(t.num_leaves(), 3);
        assert_eq!(t.clone().into_leaves(), vec![1, 2, 3]);
    }

    #[test]
    fn test_reduce_is_left_fold() {
        let t = tree(&[&[1, 2], &[3]]);
        let digits = t.reduce(0, |x, acc| acc * 10 + x);
        assert_eq!(digits, 123);
    }

    #[test]
    fn test_reduce_can_collect_leaf_refs() {
        let t = tree(&[&[4, 5], &[6]]);
        let largest = t.reduce(None, |x, acc: Option<&i32>| match acc {
            Some(m) if m >= x => Some(m),
            _ => Some(x),
        });
        assert_eq!(largest, Some(&6));
        assert!(std::ptr::eq(largest.unwrap(), t.flatten()[2]));
    }

    #[test]
    fn test_zip_map() {
        let a = tree(&[&[1, 2], &[3]]);
        let b = tree(&[&[10, 20], &[30]]);
        let c = a.zip_map(&b, |x, y| x + y).unwrap();
        assert_eq!(c, tree(&[&[11, 22], &[33]]));
    }

    #[test]
    fn test_shape_mismatch_runs_nothing() {
        let a = tree(&[&[1, 2], &[3]]);
        let b = tree(&[&[1], &[2, 3]]);
        let mut calls = 0;
        let result = a.zip_map(&b, |x, y| {
            calls += 1;
            x + y
        });
        assert!(matches!(result, Err(TensorError::ShapeMismatch(_))));
        assert_eq!(calls, 0);

        let mut out = a.clone();
        let result = zip_apply_mut(&mut out, &a, &b, |o, x, y| {
            *o = x + y;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(out, a);
    }

    #[test]
    fn test_leaf_vs_internal_mismatch() {
        let a = TreeNode::internal(vec![TreeNode::leaf(1)]);
        let b = TreeNode::internal(vec![TreeNode::internal(vec![TreeNode::leaf(1)])]);
        assert!(!a.same_shape(&b));
        assert!(a.zip_apply(&b, |_, _| {}).is_err());
    }

    #[test]
    fn test_try_map_stops_at_first_error() {
        let t = tree(&[&[1, 2], &[3]]);
        let mut visited = Vec::new();
        let result: Result<TreeNode<i32>, String> = t.try_map(|x| {
            visited.push(*x);
            if *x == 2 { Err("two".into()) } else { Ok(*x) }
        });
        assert_eq!(result.unwrap_err(), "two");
        assert_eq!(visited, vec![1, 2]);
    }

    #[test]
    fn test_apply_and_zip_apply_mut() {
        let mut t = tree(&[&[1, 2], &[3]]);
        t.apply(|x| *x *= 2);
        assert_eq!(t, tree(&[&[2, 4], &[6]]));

        let a = tree(&[&[1, 1], &[1]]);
        zip_apply_mut(&mut t, &a, &a, |o, x, y| {
            *o += x + y;
            Ok(())
        })
        .unwrap();
        assert_eq!(t, tree(&[&[4, 6], &[8]]));
    }

    #[test]
    fn test_replace_leaves() {
        let t = tree(&[&[1, 2], &[3]]);
        let r = t.replace_leaves(vec!["a", "b", "c"]).unwrap();
        assert_eq!(r.flatten(), vec![&"a", &"b", &"c"]);
        assert!(t.replace_leaves(vec![1, 2]).is_err());
        assert!(t.replace_leaves(vec![1, 2, 3, 4]).is_err());
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_try_par_map_keeps_order() {
        let t = tree(&[&[1, 2, 3], &[4], &[5, 6]]);
        let r = t.try_par_map(|x| Ok(x * x)).unwrap();
        assert_eq!(r, tree(&[&[1, 4, 9], &[16], &[25, 36]]));
    }
}
