//! Elementwise arithmetic with broadcasting
//!
//! Binary ops broadcast their operands NumPy-style (right-aligned) and
//! reduce each input's gradient back to its own shape with
//! [`sum_to_shape`](super::shape::sum_to_shape) before accumulation.

use super::shape::sum_to_shape;
use crate::engine::{Engine, GradientThunk, NodeGradFn};
use crate::error::{Error, Result};
use crate::tensor::{broadcast_shapes, broadcast_source_index, broadcast_strides, Tensor};
use ndarray::Array1;
use std::rc::Rc;

/// Broadcast `a` and `b` to a common shape and combine elementwise.
pub(crate) fn broadcast_zip(
    engine: &Engine,
    a: &Tensor,
    b: &Tensor,
    f: impl Fn(f32, f32) -> f32,
) -> Result<Tensor> {
    let out_shape = broadcast_shapes(a.shape(), b.shape())
        .ok_or_else(|| Error::BroadcastError(a.shape().to_vec(), b.shape().to_vec()))?;
    let numel: usize = out_shape.iter().product();
    let sa = broadcast_strides(a.shape(), &out_shape);
    let sb = broadcast_strides(b.shape(), &out_shape);
    let da = a.data();
    let db = b.data();
    let mut data = Vec::with_capacity(numel);
    for i in 0..numel {
        let x = da[broadcast_source_index(i, &out_shape, &sa)];
        let y = db[broadcast_source_index(i, &out_shape, &sb)];
        data.push(f(x, y));
    }
    Ok(engine.alloc(Array1::from(data), out_shape))
}

/// Elementwise sum.
pub fn add(engine: &Engine, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let out = broadcast_zip(engine, a, b, |x, y| x + y)?;
    let (a_c, b_c) = (a.clone(), b.clone());
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let (dy_a, dy_b) = (dy.clone(), dy.clone());
        let (a, b) = (a_c.clone(), b_c.clone());
        let ga: GradientThunk = Box::new(move |eng: &Engine| sum_to_shape(eng, &dy_a, a.shape()));
        let gb: GradientThunk = Box::new(move |eng: &Engine| sum_to_shape(eng, &dy_b, b.shape()));
        Ok(vec![("a".to_string(), ga), ("b".to_string(), gb)])
    });
    engine.record(
        "add",
        vec![("a".to_string(), a.clone()), ("b".to_string(), b.clone())],
        &out,
        Some(grad_fn),
    );
    Ok(out)
}

/// Elementwise difference.
pub fn sub(engine: &Engine, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let out = broadcast_zip(engine, a, b, |x, y| x - y)?;
    let (a_c, b_c) = (a.clone(), b.clone());
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let (dy_a, dy_b) = (dy.clone(), dy.clone());
        let (a, b) = (a_c.clone(), b_c.clone());
        let ga: GradientThunk = Box::new(move |eng: &Engine| sum_to_shape(eng, &dy_a, a.shape()));
        let gb: GradientThunk = Box::new(move |eng: &Engine| {
            let negated = neg(eng, &dy_b)?;
            sum_to_shape(eng, &negated, b.shape())
        });
        Ok(vec![("a".to_string(), ga), ("b".to_string(), gb)])
    });
    engine.record(
        "sub",
        vec![("a".to_string(), a.clone()), ("b".to_string(), b.clone())],
        &out,
        Some(grad_fn),
    );
    Ok(out)
}

/// Elementwise product.
pub fn mul(engine: &Engine, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let out = broadcast_zip(engine, a, b, |x, y| x * y)?;
    let (a_c, b_c) = (a.clone(), b.clone());
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let (dy_a, dy_b) = (dy.clone(), dy.clone());
        let (a_for_b, b_for_a) = (a_c.clone(), b_c.clone());
        let (a, b) = (a_c.clone(), b_c.clone());
        // ∂(a·b)/∂a = dy·b, ∂(a·b)/∂b = dy·a, each reduced to its input shape
        let ga: GradientThunk = Box::new(move |eng: &Engine| {
            let g = mul(eng, &dy_a, &b_for_a)?;
            sum_to_shape(eng, &g, a.shape())
        });
        let gb: GradientThunk = Box::new(move |eng: &Engine| {
            let g = mul(eng, &dy_b, &a_for_b)?;
            sum_to_shape(eng, &g, b.shape())
        });
        Ok(vec![("a".to_string(), ga), ("b".to_string(), gb)])
    });
    engine.record(
        "mul",
        vec![("a".to_string(), a.clone()), ("b".to_string(), b.clone())],
        &out,
        Some(grad_fn),
    );
    Ok(out)
}

/// Elementwise quotient.
pub fn div(engine: &Engine, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let out = broadcast_zip(engine, a, b, |x, y| x / y)?;
    let (a_c, b_c) = (a.clone(), b.clone());
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let (dy_a, dy_b) = (dy.clone(), dy.clone());
        let (a_for_b, b_for_a) = (a_c.clone(), b_c.clone());
        let (a, b) = (a_c.clone(), b_c.clone());
        // ∂(a/b)/∂a = dy/b
        let ga: GradientThunk = Box::new(move |eng: &Engine| {
            let g = div(eng, &dy_a, &b_for_a)?;
            sum_to_shape(eng, &g, a.shape())
        });
        // ∂(a/b)/∂b = -dy·a/b²
        let gb: GradientThunk = Box::new(move |eng: &Engine| {
            let numer = mul(eng, &dy_b, &a_for_b)?;
            let denom = mul(eng, &b, &b)?;
            let quotient = div(eng, &numer, &denom)?;
            let g = neg(eng, &quotient)?;
            sum_to_shape(eng, &g, b.shape())
        });
        Ok(vec![("a".to_string(), ga), ("b".to_string(), gb)])
    });
    engine.record(
        "div",
        vec![("a".to_string(), a.clone()), ("b".to_string(), b.clone())],
        &out,
        Some(grad_fn),
    );
    Ok(out)
}

/// Elementwise negation.
pub fn neg(engine: &Engine, a: &Tensor) -> Result<Tensor> {
    let out = engine.alloc(a.data().mapv(|x| -x), a.shape().to_vec());
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let dy = dy.clone();
        let thunk: GradientThunk = Box::new(move |eng: &Engine| neg(eng, &dy));
        Ok(vec![("x".to_string(), thunk)])
    });
    engine.record("neg", vec![("x".to_string(), a.clone())], &out, Some(grad_fn));
    Ok(out)
}

/// Multiply by a scalar constant.
pub fn scale(engine: &Engine, a: &Tensor, factor: f32) -> Result<Tensor> {
    let out = engine.alloc(a.data().mapv(|x| x * factor), a.shape().to_vec());
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let dy = dy.clone();
        let thunk: GradientThunk = Box::new(move |eng: &Engine| scale(eng, &dy, factor));
        Ok(vec![("x".to_string(), thunk)])
    });
    engine.record("scale", vec![("x".to_string(), a.clone())], &out, Some(grad_fn));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::grad;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_add_forward() {
        let eng = Engine::new();
        let a = eng.from_vec(vec![1.0, 2.0, 3.0]);
        let b = eng.from_vec(vec![4.0, 5.0, 6.0]);
        let c = add(&eng, &a, &b).unwrap();
        assert_eq!(c.to_vec(), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_add_broadcast_row() {
        let eng = Engine::new();
        let a = eng.tensor(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let b = eng.from_vec(vec![10.0, 20.0, 30.0]);
        let c = add(&eng, &a, &b).unwrap();
        assert_eq!(c.shape(), &[2, 3]);
        assert_eq!(c.to_vec(), vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    }

    #[test]
    fn test_mul_forward_and_grad() {
        let eng = Engine::new();
        let b = eng.from_vec(vec![5.0, 7.0]);
        let x = eng.from_vec(vec![2.0, 3.0]);

        let df = grad(|eng: &Engine, x: &Tensor| mul(eng, x, &b));
        let g = df.call(&eng, &x, None).unwrap();

        // ∂(x·b)/∂x = b
        assert_abs_diff_eq!(g.to_vec()[0], 5.0);
        assert_abs_diff_eq!(g.to_vec()[1], 7.0);
    }

    #[test]
    fn test_broadcast_grad_reduces_to_input_shape() {
        let eng = Engine::new();
        let a = eng.tensor(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let x = eng.from_vec(vec![1.0, 1.0, 1.0]);

        // y = a + x broadcasts x over two rows; dx sums the rows back.
        let df = grad(|eng: &Engine, x: &Tensor| add(eng, &a, x));
        let g = df.call(&eng, &x, None).unwrap();

        assert_eq!(g.shape(), &[3]);
        assert_eq!(g.to_vec(), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_div_grad() {
        let eng = Engine::new();
        let a = eng.from_vec(vec![2.0]);
        let x = eng.from_vec(vec![4.0]);

        // ∂(a/x)/∂x = -a/x² = -2/16
        let df = grad(|eng: &Engine, x: &Tensor| div(eng, &a, x));
        let g = df.call(&eng, &x, None).unwrap();
        assert_abs_diff_eq!(g.to_vec()[0], -2.0 / 16.0, epsilon = 1e-6);
    }

    #[test]
    fn test_incompatible_broadcast_is_error() {
        let eng = Engine::new();
        let a = eng.from_vec(vec![1.0, 2.0]);
        let b = eng.from_vec(vec![1.0, 2.0, 3.0]);
        assert!(add(&eng, &a, &b).is_err());
    }
}
