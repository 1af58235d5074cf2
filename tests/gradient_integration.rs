//! Integration tests for the gradient engine, with finite-difference
//! gradient checking.

use gradiente::engine::{custom_grad, grad, grads, CustomGradFn};
use gradiente::{ops, Engine, Error, Result, Tensor};
use proptest::prelude::*;
use std::rc::Rc;

/// Finite difference gradient checker
///
/// Computes numerical gradient using central difference:
/// f'(x) ≈ (f(x + h) - f(x - h)) / (2h)
fn finite_difference<F>(f: F, x: &[f32], epsilon: f32) -> Vec<f32>
where
    F: Fn(&[f32]) -> f32,
{
    let mut grad = vec![0.0; x.len()];
    let mut x_plus = x.to_vec();
    let mut x_minus = x.to_vec();

    for i in 0..x.len() {
        x_plus[i] = x[i] + epsilon;
        x_minus[i] = x[i] - epsilon;

        grad[i] = (f(&x_plus) - f(&x_minus)) / (2.0 * epsilon);

        x_plus[i] = x[i];
        x_minus[i] = x[i];
    }

    grad
}

fn assert_close(analytical: &[f32], numerical: &[f32], tolerance: f32) {
    assert_eq!(analytical.len(), numerical.len());
    for i in 0..analytical.len() {
        let diff = (analytical[i] - numerical[i]).abs();
        assert!(
            diff < tolerance,
            "Gradient mismatch at index {}: analytical={}, numerical={}, diff={}",
            i,
            analytical[i],
            numerical[i],
            diff
        );
    }
}

#[test]
fn test_composite_expression_matches_finite_difference() {
    let eng = Engine::new();
    let x_vals = vec![0.5, 1.0, 1.5, 2.0];
    let x = eng.from_vec(x_vals.clone());

    // f(x) = sum(exp(x²) / (x + 2))
    fn forward(eng: &Engine, x: &Tensor) -> Result<Tensor> {
        let sq = ops::square(eng, x)?;
        let num = ops::exp(eng, &sq)?;
        let two = eng.fill(x.shape(), 2.0);
        let den = ops::add(eng, x, &two)?;
        let q = ops::div(eng, &num, &den)?;
        ops::sum(eng, &q)
    }

    let df = grad(forward);
    let analytical = df.call(&eng, &x, None).unwrap();

    let numerical = finite_difference(
        |vals| {
            let eng = Engine::new();
            let t = eng.from_vec(vals.to_vec());
            forward(&eng, &t).unwrap().scalar_value()
        },
        &x_vals,
        1e-3,
    );

    assert_close(&analytical.to_vec(), &numerical, 0.05);
}

#[test]
fn test_relu_chain_matches_finite_difference() {
    let eng = Engine::new();
    // Stay away from the kink at 0.
    let x_vals = vec![-1.5, -0.5, 0.5, 1.5];
    let x = eng.from_vec(x_vals.clone());

    fn forward(eng: &Engine, x: &Tensor) -> Result<Tensor> {
        let doubled = ops::scale(eng, x, 2.0)?;
        let r = ops::relu(eng, &doubled)?;
        ops::sum(eng, &r)
    }

    let df = grad(forward);
    let analytical = df.call(&eng, &x, None).unwrap();

    let numerical = finite_difference(
        |vals| {
            let eng = Engine::new();
            let t = eng.from_vec(vals.to_vec());
            forward(&eng, &t).unwrap().scalar_value()
        },
        &x_vals,
        1e-3,
    );

    assert_close(&analytical.to_vec(), &numerical, 0.05);
}

#[test]
fn test_matmul_chain_matches_finite_difference() {
    let eng = Engine::new();
    let a_vals = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let b_vals = vec![0.5, -1.0, 1.5, 2.0, -0.5, 1.0];

    fn forward(eng: &Engine, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let c = ops::matmul(eng, a, b)?;
        let r = ops::relu(eng, &c)?;
        ops::sum(eng, &r)
    }

    let a = eng.tensor(a_vals.clone(), &[2, 3]).unwrap();
    let b = eng.tensor(b_vals.clone(), &[3, 2]).unwrap();
    let df = grads(move |eng: &Engine, xs: &[Tensor]| forward(eng, &xs[0], &xs[1]));
    let gs = df.call(&eng, &[a, b], None).unwrap();

    let numerical_a = finite_difference(
        |vals| {
            let eng = Engine::new();
            let a = eng.tensor(vals.to_vec(), &[2, 3]).unwrap();
            let b = eng.tensor(b_vals.clone(), &[3, 2]).unwrap();
            forward(&eng, &a, &b).unwrap().scalar_value()
        },
        &a_vals,
        1e-2,
    );

    assert_close(&gs[0].to_vec(), &numerical_a, 0.05);
}

#[test]
fn test_grads_returns_one_gradient_per_input() {
    let eng = Engine::new();
    let a = eng.from_vec(vec![2.0]);
    let b = eng.from_vec(vec![3.0]);

    let df = grads(|eng: &Engine, xs: &[Tensor]| ops::mul(eng, &xs[0], &xs[1]));
    let gs = df.call(&eng, &[a, b], None).unwrap();

    assert_eq!(gs.len(), 2);
    assert_eq!(gs[0].to_vec(), vec![3.0]);
    assert_eq!(gs[1].to_vec(), vec![2.0]);
}

#[test]
fn test_explicit_seed_scales_gradients() {
    let eng = Engine::new();
    let x = eng.from_vec(vec![1.0, 2.0]);

    let df = grad(|eng: &Engine, x: &Tensor| ops::square(eng, x));
    let dy = eng.from_vec(vec![10.0, 100.0]);
    let g = df.call(&eng, &x, Some(&dy)).unwrap();

    assert_eq!(g.to_vec(), vec![20.0, 400.0]);
}

#[test]
fn test_seed_shape_mismatch_is_rejected() {
    let eng = Engine::new();
    let x = eng.from_vec(vec![1.0, 2.0]);

    let df = grad(|eng: &Engine, x: &Tensor| ops::square(eng, x));
    let bad = eng.from_vec(vec![1.0, 1.0, 1.0]);
    let err = df.call(&eng, &x, Some(&bad)).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}

#[test]
fn test_third_derivative_of_fourth_power() {
    let eng = Engine::new();
    let x = eng.from_vec(vec![0.5]);

    // f(x) = x⁴, f'''(x) = 24x
    let dddf = grad(|eng: &Engine, x: &Tensor| {
        let ddf = grad(|eng: &Engine, x: &Tensor| {
            let df = grad(|eng: &Engine, x: &Tensor| {
                let sq = ops::mul(eng, x, x)?;
                ops::mul(eng, &sq, &sq)
            });
            df.call(eng, x, None)
        });
        ddf.call(eng, x, None)
    });
    let g3 = dddf.call(&eng, &x, None).unwrap();
    assert!((g3.to_vec()[0] - 12.0).abs() < 1e-4);
}

#[test]
fn test_broadcast_gradient_reduces_over_expanded_axes() {
    let eng = Engine::new();
    // bias [3] broadcast against data [2, 3]; d sum/d bias sums the rows.
    let data = eng
        .tensor(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3])
        .unwrap();
    let bias = eng.from_vec(vec![0.1, 0.2, 0.3]);

    let df = grad(|eng: &Engine, bias: &Tensor| {
        let shifted = ops::add(eng, &data, bias)?;
        let scaled = ops::mul(eng, &shifted, &data)?;
        ops::sum(eng, &scaled)
    });
    let g = df.call(&eng, &bias, None).unwrap();

    // d/d bias = column sums of data: [1+4, 2+5, 3+6]
    assert_eq!(g.shape(), &[3]);
    assert_eq!(g.to_vec(), vec![5.0, 7.0, 9.0]);
}

#[test]
fn test_scalar_broadcast_gradient_reduces_to_scalar() {
    let eng = Engine::new();
    let data = eng.tensor(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
    let s = eng.scalar(2.0);

    let df = grad(|eng: &Engine, s: &Tensor| {
        let scaled = ops::mul(eng, &data, s)?;
        ops::sum(eng, &scaled)
    });
    let g = df.call(&eng, &s, None).unwrap();

    assert_eq!(g.shape(), &[] as &[usize]);
    assert_eq!(g.scalar_value(), 10.0);
}

#[test]
fn test_custom_gradient_of_stable_softplus() {
    let eng = Engine::new();
    let x_vals = vec![-2.0, 0.0, 2.0];
    let x = eng.from_vec(x_vals.clone());

    // softplus(x) = ln(1 + eˣ) with the analytically simplified backward
    // σ(x) = 1/(1 + e⁻ˣ) supplied as a custom gradient.
    let softplus = custom_grad(|eng: &Engine, inputs: &[Tensor]| {
        let x = inputs[0].clone();
        let e = ops::exp(eng, &x)?;
        let one = eng.ones_like(&x);
        let shifted = ops::add(eng, &e, &one)?;
        let value = ops::log(eng, &shifted)?;
        let grad_fn: CustomGradFn = Rc::new(move |eng: &Engine, dy: &Tensor| {
            let neg_x = ops::neg(eng, &x)?;
            let e = ops::exp(eng, &neg_x)?;
            let one = eng.ones_like(&e);
            let den = ops::add(eng, &one, &e)?;
            let sigma = ops::div(eng, &one, &den)?;
            Ok(vec![ops::mul(eng, dy, &sigma)?])
        });
        Ok((value, grad_fn))
    });

    let df = grad(move |eng: &Engine, x: &Tensor| {
        let sp = softplus.call(eng, std::slice::from_ref(x))?;
        ops::sum(eng, &sp)
    });
    let analytical = df.call(&eng, &x, None).unwrap();

    let numerical = finite_difference(
        |vals| vals.iter().map(|v| (1.0 + v.exp()).ln()).sum(),
        &x_vals,
        1e-3,
    );

    assert_close(&analytical.to_vec(), &numerical, 0.01);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_square_gradient_check(
        x in prop::collection::vec(-5.0f32..5.0, 1..20)
    ) {
        let eng = Engine::new();
        let t = eng.from_vec(x.clone());

        let df = grad(|eng: &Engine, x: &Tensor| {
            let sq = ops::square(eng, x)?;
            ops::sum(eng, &sq)
        });
        let analytical = df.call(&eng, &t, None).unwrap();

        for (i, &v) in x.iter().enumerate() {
            let diff = (analytical.to_vec()[i] - 2.0 * v).abs();
            prop_assert!(diff < 1e-3, "index {}: got {}, want {}", i, analytical.to_vec()[i], 2.0 * v);
        }
    }

    #[test]
    fn prop_mul_gradient_check(
        xy in prop::collection::vec((-5.0f32..5.0, -5.0f32..5.0), 1..20)
    ) {
        let (x, y): (Vec<f32>, Vec<f32>) = xy.into_iter().unzip();
        let eng = Engine::new();
        let a = eng.from_vec(x.clone());
        let b = eng.from_vec(y.clone());

        let df = grads(|eng: &Engine, xs: &[Tensor]| {
            let p = ops::mul(eng, &xs[0], &xs[1])?;
            ops::sum(eng, &p)
        });
        let gs = df.call(&eng, &[a, b], None).unwrap();

        // ∂sum(a·b)/∂a = b and vice versa
        for i in 0..x.len() {
            prop_assert!((gs[0].to_vec()[i] - y[i]).abs() < 1e-4);
            prop_assert!((gs[1].to_vec()[i] - x[i]).abs() < 1e-4);
        }
    }

    #[test]
    fn prop_gradient_calls_leave_no_garbage(
        x in prop::collection::vec(-2.0f32..2.0, 1..10)
    ) {
        let eng = Engine::new();
        let t = eng.from_vec(x);
        let before = eng.memory().num_tensors;

        let df = grad(|eng: &Engine, x: &Tensor| {
            let sq = ops::square(eng, x)?;
            let e = ops::exp(eng, &sq)?;
            ops::mean(eng, &e)
        });
        let _g = df.call(&eng, &t, None).unwrap();

        prop_assert_eq!(eng.memory().num_tensors, before + 1);
    }
}
