//! RMSProp optimizer

use super::Optimizer;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use ndarray::Array1;
use std::collections::{BTreeMap, HashMap};

/// RMSProp optimizer: per-parameter learning rates from a decaying average
/// of squared gradients
pub struct RMSProp {
    lr: f32,
    decay: f32,
    epsilon: f32,
    cache: HashMap<String, Array1<f32>>,
}

impl RMSProp {
    /// Create a new RMSProp optimizer
    pub fn new(lr: f32, decay: f32, epsilon: f32) -> Self {
        Self {
            lr,
            decay,
            epsilon,
            cache: HashMap::new(),
        }
    }

    /// Create RMSProp with default parameters
    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 1e-8)
    }
}

impl Optimizer for RMSProp {
    fn apply_gradients(
        &mut self,
        engine: &Engine,
        grads: &BTreeMap<String, Tensor>,
    ) -> Result<()> {
        for (name, grad) in grads {
            let var = engine
                .get_variable(name)
                .ok_or_else(|| Error::InvalidParameter(format!("unknown variable '{name}'")))?;
            if !var.trainable() {
                continue;
            }
            let current = var.value();
            if grad.shape() != current.shape() {
                return Err(Error::ShapeMismatch {
                    expected: current.shape().to_vec(),
                    got: grad.shape().to_vec(),
                });
            }
            let g = grad.data();

            // cache = decay * cache + (1 - decay) * g²
            let g_sq = g * g;
            let cache_t = match self.cache.get(name) {
                Some(c) => c * self.decay + &(&g_sq * (1.0 - self.decay)),
                None => &g_sq * (1.0 - self.decay),
            };

            // θ_t = θ_{t-1} - lr * g / (√cache + ε)
            let update = g / &(cache_t.mapv(f32::sqrt) + self.epsilon) * self.lr;
            let next = engine.alloc(current.data() - &update, current.shape().to_vec());
            var.assign(engine, next)?;

            self.cache.insert(name.clone(), cache_t);
        }
        Ok(())
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops;

    #[test]
    fn test_rmsprop_quadratic_convergence() {
        let eng = Engine::new();
        let init = eng.from_vec(vec![4.0, -2.0]);
        eng.variable("w", init, true).unwrap();
        let mut optimizer = RMSProp::default_params(0.05);

        for _ in 0..300 {
            optimizer
                .minimize(&eng, |eng: &Engine| {
                    let w = eng.get_variable("w").unwrap().value();
                    let sq = ops::square(eng, &w)?;
                    ops::sum(eng, &sq)
                })
                .unwrap();
        }

        let w = eng.get_variable("w").unwrap().value();
        for &v in w.data().iter() {
            assert!(v.abs() < 0.1, "Value {} did not converge", v);
        }
    }
}
