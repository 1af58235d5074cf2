//! Tensor handles
//!
//! A [`Tensor`] is an immutable, reference-identified array value: a flat
//! `Array1<f32>` buffer plus an explicit shape vector, shared behind an `Rc`.
//! Cloning a handle is O(1). Storage lifetime accounting is done by the
//! [`Engine`](crate::Engine)'s registry, not by the handle itself.

use ndarray::Array1;
use std::rc::Rc;

/// Process-unique tensor identifier, monotonically assigned by the engine.
///
/// An id is never reused while its tensor is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub(crate) u64);

struct TensorInner {
    id: TensorId,
    shape: Vec<usize>,
    data: Array1<f32>,
}

/// Immutable tensor handle with a shape and a unique id.
#[derive(Clone)]
pub struct Tensor {
    inner: Rc<TensorInner>,
}

impl Tensor {
    /// Build a handle. Callers go through the engine constructors so that the
    /// output is registered with the active scope before anyone sees it.
    pub(crate) fn new(id: TensorId, shape: Vec<usize>, data: Array1<f32>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        Self {
            inner: Rc::new(TensorInner { id, shape, data }),
        }
    }

    /// Unique identifier of this tensor.
    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    /// Shape of the tensor. An empty shape denotes a scalar.
    pub fn shape(&self) -> &[usize] {
        &self.inner.shape
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.inner.shape.len()
    }

    /// Total number of elements (1 for a scalar).
    pub fn len(&self) -> usize {
        self.inner.shape.iter().product()
    }

    /// True only for a degenerate tensor with a zero-sized dimension.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat backing buffer, row-major.
    pub fn data(&self) -> &Array1<f32> {
        &self.inner.data
    }

    /// Copy the contents out as a plain vector.
    pub fn to_vec(&self) -> Vec<f32> {
        self.inner.data.to_vec()
    }

    /// Value of a scalar tensor.
    pub fn scalar_value(&self) -> f32 {
        debug_assert_eq!(self.len(), 1);
        self.inner.data[0]
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.inner.id)
            .field("shape", &self.inner.shape)
            .field("data", &self.inner.data)
            .finish()
    }
}

/// Right-aligned NumPy-style broadcast of two shapes.
pub(crate) fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0usize; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        if da == db {
            out[i] = da;
        } else if da == 1 {
            out[i] = db;
        } else if db == 1 {
            out[i] = da;
        } else {
            return None;
        }
    }
    Some(out)
}

/// Row-major strides for `shape`, with stride 0 on axes broadcast up to
/// `out_shape` (missing leading axes and size-1 axes).
pub(crate) fn broadcast_strides(shape: &[usize], out_shape: &[usize]) -> Vec<usize> {
    let mut native = vec![0usize; shape.len()];
    let mut acc = 1usize;
    for i in (0..shape.len()).rev() {
        native[i] = acc;
        acc *= shape[i];
    }
    let offset = out_shape.len() - shape.len();
    let mut out = vec![0usize; out_shape.len()];
    for i in 0..out_shape.len() {
        if i < offset {
            out[i] = 0;
        } else if shape[i - offset] == 1 && out_shape[i] != 1 {
            out[i] = 0;
        } else {
            out[i] = native[i - offset];
        }
    }
    out
}

/// Map a flat index in `out_shape` to a flat source index via `strides`
/// (as produced by [`broadcast_strides`]).
pub(crate) fn broadcast_source_index(flat: usize, out_shape: &[usize], strides: &[usize]) -> usize {
    let mut rem = flat;
    let mut src = 0usize;
    for i in (0..out_shape.len()).rev() {
        let coord = rem % out_shape[i];
        rem /= out_shape[i];
        src += coord * strides[i];
    }
    src
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_shapes_equal() {
        assert_eq!(broadcast_shapes(&[2, 3], &[2, 3]), Some(vec![2, 3]));
    }

    #[test]
    fn test_broadcast_shapes_scalar() {
        assert_eq!(broadcast_shapes(&[], &[4]), Some(vec![4]));
        assert_eq!(broadcast_shapes(&[4], &[]), Some(vec![4]));
    }

    #[test]
    fn test_broadcast_shapes_expand() {
        assert_eq!(broadcast_shapes(&[1, 3], &[2, 1]), Some(vec![2, 3]));
        assert_eq!(broadcast_shapes(&[3], &[2, 3]), Some(vec![2, 3]));
    }

    #[test]
    fn test_broadcast_shapes_incompatible() {
        assert_eq!(broadcast_shapes(&[2, 3], &[4, 3]), None);
    }

    #[test]
    fn test_broadcast_strides_and_index() {
        // [3] broadcast to [2, 3]: leading axis repeats.
        let strides = broadcast_strides(&[3], &[2, 3]);
        assert_eq!(strides, vec![0, 1]);
        assert_eq!(broadcast_source_index(0, &[2, 3], &strides), 0);
        assert_eq!(broadcast_source_index(4, &[2, 3], &strides), 1);
        assert_eq!(broadcast_source_index(5, &[2, 3], &strides), 2);
    }
}
