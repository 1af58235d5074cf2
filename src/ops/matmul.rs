//! 2-D matrix multiply and transpose

use crate::engine::{Engine, GradientThunk, NodeGradFn};
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use ndarray::Array1;
use std::rc::Rc;

/// Matrix product of `a` (m×k) and `b` (k×n), row-major.
pub fn matmul(engine: &Engine, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    if a.rank() != 2 || b.rank() != 2 || a.shape()[1] != b.shape()[0] {
        return Err(Error::ShapeMismatch {
            expected: a.shape().to_vec(),
            got: b.shape().to_vec(),
        });
    }
    let (m, k) = (a.shape()[0], a.shape()[1]);
    let n = b.shape()[1];
    let da = a.data();
    let db = b.data();
    let mut data = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0;
            for p in 0..k {
                sum += da[i * k + p] * db[p * n + j];
            }
            data[i * n + j] = sum;
        }
    }
    let out = engine.alloc(Array1::from(data), vec![m, n]);
    let (a_c, b_c) = (a.clone(), b.clone());
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let (dy_a, dy_b) = (dy.clone(), dy.clone());
        let (a_for_b, b_for_a) = (a_c.clone(), b_c.clone());
        // ∂L/∂A = ∂L/∂C · Bᵀ
        let ga: GradientThunk = Box::new(move |eng: &Engine| {
            let bt = transpose(eng, &b_for_a)?;
            matmul(eng, &dy_a, &bt)
        });
        // ∂L/∂B = Aᵀ · ∂L/∂C
        let gb: GradientThunk = Box::new(move |eng: &Engine| {
            let at = transpose(eng, &a_for_b)?;
            matmul(eng, &at, &dy_b)
        });
        Ok(vec![("a".to_string(), ga), ("b".to_string(), gb)])
    });
    engine.record(
        "matmul",
        vec![("a".to_string(), a.clone()), ("b".to_string(), b.clone())],
        &out,
        Some(grad_fn),
    );
    Ok(out)
}

/// Transpose of a 2-D tensor.
pub fn transpose(engine: &Engine, t: &Tensor) -> Result<Tensor> {
    if t.rank() != 2 {
        return Err(Error::InvalidParameter(format!(
            "transpose requires rank 2, got shape {:?}",
            t.shape()
        )));
    }
    let (r, c) = (t.shape()[0], t.shape()[1]);
    let src = t.data();
    let mut data = vec![0.0f32; r * c];
    for i in 0..r {
        for j in 0..c {
            data[j * r + i] = src[i * c + j];
        }
    }
    let out = engine.alloc(Array1::from(data), vec![c, r]);
    let grad_fn: NodeGradFn = Rc::new(move |_eng: &Engine, dy: &Tensor| {
        let dy = dy.clone();
        let thunk: GradientThunk = Box::new(move |eng: &Engine| transpose(eng, &dy));
        Ok(vec![("x".to_string(), thunk)])
    });
    engine.record(
        "transpose",
        vec![("x".to_string(), t.clone())],
        &out,
        Some(grad_fn),
    );
    Ok(out)
}
