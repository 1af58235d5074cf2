//! Shape manipulation ops
//!
//! `broadcast_to` and `sum_to_shape` form the closed gradient pair behind
//! broadcasting: the gradient of expanding a tensor is summing back over the
//! expanded axes, and vice versa. Binary ops reduce their natural gradients
//! to each input's shape with `sum_to_shape` before accumulation ever sees
//! them, so the accumulation map always sums same-shaped tensors.

use crate::engine::{Engine, GradientThunk, NodeGradFn};
use crate::error::{Error, Result};
use crate::tensor::{broadcast_shapes, broadcast_source_index, broadcast_strides, Tensor};
use ndarray::Array1;
use std::rc::Rc;

/// Reinterpret `t` with a new shape of the same element count.
pub fn reshape(engine: &Engine, t: &Tensor, shape: &[usize]) -> Result<Tensor> {
    let numel: usize = shape.iter().product();
    if numel != t.len() {
        return Err(Error::ShapeMismatch {
            expected: shape.to_vec(),
            got: t.shape().to_vec(),
        });
    }
    if t.shape() == shape {
        return Ok(t.clone());
    }
    let out = engine.alloc(t.data().clone(), shape.to_vec());
    let t_c = t.clone();
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let dy = dy.clone();
        let original = t_c.shape().to_vec();
        let thunk: GradientThunk = Box::new(move |eng: &Engine| reshape(eng, &dy, &original));
        Ok(vec![("x".to_string(), thunk)])
    });
    engine.record("reshape", vec![("x".to_string(), t.clone())], &out, Some(grad_fn));
    Ok(out)
}

/// Expand `t` to `shape` by repeating broadcast axes.
pub fn broadcast_to(engine: &Engine, t: &Tensor, shape: &[usize]) -> Result<Tensor> {
    if t.shape() == shape {
        return Ok(t.clone());
    }
    match broadcast_shapes(t.shape(), shape) {
        Some(ref s) if s.as_slice() == shape => {}
        _ => return Err(Error::BroadcastError(t.shape().to_vec(), shape.to_vec())),
    }
    let numel: usize = shape.iter().product();
    let strides = broadcast_strides(t.shape(), shape);
    let src = t.data();
    let mut data = Vec::with_capacity(numel);
    for i in 0..numel {
        data.push(src[broadcast_source_index(i, shape, &strides)]);
    }
    let out = engine.alloc(Array1::from(data), shape.to_vec());
    let t_c = t.clone();
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let dy = dy.clone();
        let original = t_c.shape().to_vec();
        let thunk: GradientThunk = Box::new(move |eng: &Engine| sum_to_shape(eng, &dy, &original));
        Ok(vec![("x".to_string(), thunk)])
    });
    engine.record(
        "broadcast_to",
        vec![("x".to_string(), t.clone())],
        &out,
        Some(grad_fn),
    );
    Ok(out)
}

/// Sum `t` down to `shape`, collapsing every axis that broadcasting would
/// have expanded (missing leading axes and size-1 axes). The reduction rule
/// for gradients of broadcasted operations, for arbitrary rank mismatch.
pub fn sum_to_shape(engine: &Engine, t: &Tensor, shape: &[usize]) -> Result<Tensor> {
    if t.shape() == shape {
        return Ok(t.clone());
    }
    match broadcast_shapes(shape, t.shape()) {
        Some(ref s) if s.as_slice() == t.shape() => {}
        _ => return Err(Error::BroadcastError(t.shape().to_vec(), shape.to_vec())),
    }
    let numel: usize = shape.iter().product();
    let strides = broadcast_strides(shape, t.shape());
    let src = t.data();
    let mut data = vec![0.0f32; numel];
    for i in 0..t.len() {
        data[broadcast_source_index(i, t.shape(), &strides)] += src[i];
    }
    let out = engine.alloc(Array1::from(data), shape.to_vec());
    let t_c = t.clone();
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let dy = dy.clone();
        let original = t_c.shape().to_vec();
        let thunk: GradientThunk = Box::new(move |eng: &Engine| broadcast_to(eng, &dy, &original));
        Ok(vec![("x".to_string(), thunk)])
    });
    engine.record(
        "sum_to_shape",
        vec![("x".to_string(), t.clone())],
        &out,
        Some(grad_fn),
    );
    Ok(out)
}
