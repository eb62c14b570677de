use super::TreeNode;

/// Tree of per-leaf shapes (or strides).
pub type ShapeTree = TreeNode<Vec<usize>>;

/// Aggregate size per dimension of a shape tree.
///
/// Nested dimensions come first: an internal node contributes its degree,
/// followed by the merged sizes of its children. A position is `Some(n)`
/// when every child that has it agrees on `n`, and `None` (ragged)
/// otherwise.
///
/// # Example
///
/// ```
/// use nestedtensor::tree::{TreeNode, construct_size};
///
/// let sizes = TreeNode::internal(vec![
///     TreeNode::leaf(vec![2, 4]),
///     TreeNode::leaf(vec![3, 4]),
/// ]);
/// assert_eq!(construct_size(&sizes), vec![Some(2), None, Some(4)]);
/// ```
pub fn construct_size(tree: &ShapeTree) -> Vec<Option<usize>> {
    match tree {
        TreeNode::Leaf(shape) => shape.iter().copied().map(Some).collect(),
        TreeNode::Internal(children) => {
            let child_sizes: Vec<Vec<Option<usize>>> =
                children.iter().map(construct_size).collect();
            let depth = child_sizes.iter().map(Vec::len).max().unwrap_or(0);
            let mut out = Vec::with_capacity(depth + 1);
            out.push(Some(children.len()));
            for i in 0..depth {
                let mut present = child_sizes.iter().filter_map(|s| s.get(i).copied());
                let first = present.next().flatten();
                let merged = if present.all(|s| s == first) { first } else { None };
                out.push(merged);
            }
            out
        }
    }
}

/// Total element count described by a shape tree.
pub fn shape_numel(tree: &ShapeTree) -> usize {
    tree.reduce(0, |shape, acc| acc + shape.iter().product::<usize>())
}
