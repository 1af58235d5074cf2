//! Elementwise unary ops and gradient-less comparisons

use super::arithmetic::{broadcast_zip, div, mul, scale};
use crate::engine::{Engine, GradientThunk, NodeGradFn};
use crate::error::Result;
use crate::tensor::Tensor;
use std::rc::Rc;

/// Elementwise exponential.
pub fn exp(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    let out = engine.alloc(x.data().mapv(f32::exp), x.shape().to_vec());
    let y_c = out.clone();
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let (dy, y) = (dy.clone(), y_c.clone());
        // ∂exp(x)/∂x = exp(x), reusing the saved output
        let thunk: GradientThunk = Box::new(move |eng: &Engine| mul(eng, &dy, &y));
        Ok(vec![("x".to_string(), thunk)])
    });
    engine.record("exp", vec![("x".to_string(), x.clone())], &out, Some(grad_fn));
    Ok(out)
}

/// Elementwise natural logarithm.
pub fn log(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    let out = engine.alloc(x.data().mapv(f32::ln), x.shape().to_vec());
    let x_c = x.clone();
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let (dy, x) = (dy.clone(), x_c.clone());
        // ∂ln(x)/∂x = 1/x
        let thunk: GradientThunk = Box::new(move |eng: &Engine| div(eng, &dy, &x));
        Ok(vec![("x".to_string(), thunk)])
    });
    engine.record("log", vec![("x".to_string(), x.clone())], &out, Some(grad_fn));
    Ok(out)
}

/// Elementwise square root.
pub fn sqrt(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    let out = engine.alloc(x.data().mapv(f32::sqrt), x.shape().to_vec());
    let y_c = out.clone();
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let (dy, y) = (dy.clone(), y_c.clone());
        // ∂√x/∂x = 1/(2√x)
        let thunk: GradientThunk = Box::new(move |eng: &Engine| {
            let twice = scale(eng, &y, 2.0)?;
            div(eng, &dy, &twice)
        });
        Ok(vec![("x".to_string(), thunk)])
    });
    engine.record("sqrt", vec![("x".to_string(), x.clone())], &out, Some(grad_fn));
    Ok(out)
}

/// Elementwise square.
pub fn square(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    let out = engine.alloc(x.data().mapv(|v| v * v), x.shape().to_vec());
    let x_c = x.clone();
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let (dy, x) = (dy.clone(), x_c.clone());
        // ∂x²/∂x = 2x
        let thunk: GradientThunk = Box::new(move |eng: &Engine| {
            let twice = scale(eng, &x, 2.0)?;
            mul(eng, &dy, &twice)
        });
        Ok(vec![("x".to_string(), thunk)])
    });
    engine.record("square", vec![("x".to_string(), x.clone())], &out, Some(grad_fn));
    Ok(out)
}

/// Rectified linear unit.
pub fn relu(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    let out = engine.alloc(x.data().mapv(|v| v.max(0.0)), x.shape().to_vec());
    let x_c = x.clone();
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let (dy, x) = (dy.clone(), x_c.clone());
        // ∂relu(x)/∂x = 1 where x > 0, else 0
        let thunk: GradientThunk = Box::new(move |eng: &Engine| {
            let mask = eng.alloc(
                x.data().mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
                x.shape().to_vec(),
            );
            mul(eng, &dy, &mask)
        });
        Ok(vec![("x".to_string(), thunk)])
    });
    engine.record("relu", vec![("x".to_string(), x.clone())], &out, Some(grad_fn));
    Ok(out)
}

/// Elementwise comparison `a > b`, producing 0/1 values.
///
/// No gradient is registered: differentiating through a comparison on the
/// output path raises `MissingGradient`, while a comparison on a branch
/// that never feeds the output is pruned before backprop ever looks at it.
pub fn greater(engine: &Engine, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let out = broadcast_zip(engine, a, b, |x, y| if x > y { 1.0 } else { 0.0 })?;
    engine.record(
        "greater",
        vec![("a".to_string(), a.clone()), ("b".to_string(), b.clone())],
        &out,
        None,
    );
    Ok(out)
}
