//! Reductions

use super::arithmetic::scale;
use super::shape::broadcast_to;
use crate::engine::{Engine, GradientThunk, NodeGradFn};
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use ndarray::Array1;
use std::rc::Rc;

/// Sum of all elements, as a scalar.
pub fn sum(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    let total = x.data().sum();
    let out = engine.alloc(Array1::from(vec![total]), Vec::new());
    let x_c = x.clone();
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let dy = dy.clone();
        let shape = x_c.shape().to_vec();
        // ∂sum/∂x broadcasts dy over every element
        let thunk: GradientThunk = Box::new(move |eng: &Engine| broadcast_to(eng, &dy, &shape));
        Ok(vec![("x".to_string(), thunk)])
    });
    engine.record("sum", vec![("x".to_string(), x.clone())], &out, Some(grad_fn));
    Ok(out)
}

/// Arithmetic mean of all elements, as a scalar.
pub fn mean(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    let n = x.len();
    if n == 0 {
        return Err(Error::InvalidParameter("mean of an empty tensor".into()));
    }
    let avg = x.data().sum() / n as f32;
    let out = engine.alloc(Array1::from(vec![avg]), Vec::new());
    let x_c = x.clone();
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let dy = dy.clone();
        let shape = x_c.shape().to_vec();
        let thunk: GradientThunk = Box::new(move |eng: &Engine| {
            let spread = broadcast_to(eng, &dy, &shape)?;
            scale(eng, &spread, 1.0 / n as f32)
        });
        Ok(vec![("x".to_string(), thunk)])
    });
    engine.record("mean", vec![("x".to_string(), x.clone())], &out, Some(grad_fn));
    Ok(out)
}
