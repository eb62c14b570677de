//! Stride computation utilities.
//!
//! Arrays are laid out in row-major (C) order so that a packed buffer can be
//! reinterpreted as `(-1, k)` without copying.

/// Compute row-major strides from shape.
///
/// For shape `[d0, d1, d2]`, returns strides `[d1*d2, d2, 1]`.
///
/// # Examples
///
/// ```
/// use nestedtensor::strides::compute_strides;
///
/// assert_eq!(compute_strides(&[3, 4, 5]), vec![20, 5, 1]);
/// assert_eq!(compute_strides(&[2, 3]), vec![3, 1]);
/// assert_eq!(compute_strides(&[5]), vec![1]);
/// assert_eq!(compute_strides(&[]), Vec::<usize>::new());
/// ```
pub fn compute_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut stride = 1;
    for (s, &dim) in strides.iter_mut().zip(shape.iter()).rev() {
        *s = stride;
        stride *= dim;
    }
    strides
}

/// Convert cartesian indices to a linear offset.
#[inline]
pub fn cartesian_to_linear(indices: &[usize], strides: &[usize]) -> usize {
    indices
        .iter()
        .zip(strides.iter())
        .map(|(&idx, &stride)| idx * stride)
        .sum()
}

/// Convert a row-major linear index to cartesian indices.
pub fn linear_to_cartesian(mut linear: usize, shape: &[usize]) -> Vec<usize> {
    let mut indices = vec![0; shape.len()];
    for (idx, &dim) in indices.iter_mut().zip(shape.iter()).rev() {
        *idx = linear % dim;
        linear /= dim;
    }
    indices
}

/// Whether `strides` describe a tightly packed row-major layout of `shape`.
///
/// Dimensions of extent 1 may carry any stride.
pub fn is_row_major(shape: &[usize], strides: &[usize]) -> bool {
    if shape.contains(&0) {
        return true;
    }
    let mut expected = 1;
    for (&dim, &stride) in shape.iter().zip(strides.iter()).rev() {
        if dim != 1 && stride != expected {
            return false;
        }
        expected *= dim;
    }
    true
}

/// Advance a row-major multi-index in place. Returns `false` after the last index.
#[inline]
pub(crate) fn increment_index(indices: &mut [usize], shape: &[usize]) -> bool {
    for d in (0..shape.len()).rev() {
        indices[d] += 1;
        if indices[d] < shape[d] {
            return true;
        }
        indices[d] = 0;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_strides_3d() {
        assert_eq!(compute_strides(&[3, 4, 5]), vec![20, 5, 1]);
    }

    #[test]
    fn test_cartesian_to_linear() {
        let strides = compute_strides(&[3, 4, 5]);
        assert_eq!(cartesian_to_linear(&[0, 0, 0], &strides), 0);
        assert_eq!(cartesian_to_linear(&[0, 0, 1], &strides), 1);
        assert_eq!(cartesian_to_linear(&[0, 1, 0], &strides), 5);
        assert_eq!(cartesian_to_linear(&[1, 0, 0], &strides), 20);
        assert_eq!(cartesian_to_linear(&[2, 3, 4], &strides), 59);
    }

    #[test]
    fn test_roundtrip() {
        let shape = [3, 4, 5];
        let strides = compute_strides(&shape);
        for linear in 0..60 {
            let cartesian = linear_to_cartesian(linear, &shape);
            assert_eq!(cartesian_to_linear(&cartesian, &strides), linear);
        }
    }

    #[test]
    fn test_is_row_major() {
        assert!(is_row_major(&[2, 3], &[3, 1]));
        assert!(!is_row_major(&[2, 3], &[1, 2]));
        // Unit dimensions are ignored.
        assert!(is_row_major(&[1, 3], &[7, 1]));
        assert!(is_row_major(&[], &[]));
    }

    #[test]
    fn test_increment_index() {
        let shape = [2, 2];
        let mut idx = vec![0, 0];
        let mut seen = vec![idx.clone()];
        while increment_index(&mut idx, &shape) {
            seen.push(idx.clone());
        }
        assert_eq!(seen, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
    }
}
