//! Stochastic Gradient Descent optimizer

use super::Optimizer;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use ndarray::Array1;
use std::collections::{BTreeMap, HashMap};

/// SGD optimizer with optional momentum
pub struct SGD {
    lr: f32,
    momentum: f32,
    velocities: HashMap<String, Array1<f32>>,
}

impl SGD {
    /// Create a new SGD optimizer
    pub fn new(lr: f32, momentum: f32) -> Self {
        Self {
            lr,
            momentum,
            velocities: HashMap::new(),
        }
    }
}

impl Optimizer for SGD {
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

            let updated = if self.momentum > 0.0 {
                // v = momentum * v - lr * grad
                let velocity = match self.velocities.get(name) {
                    Some(v) => v * self.momentum - &(grad.data() * self.lr),
                    None => grad.data() * (-self.lr),
                };
                let next = current.data() + &velocity;
                self.velocities.insert(name.clone(), velocity);
                next
            } else {
                // param -= lr * grad
                current.data() - &(grad.data() * self.lr)
            };

            let next = engine.alloc(updated, current.shape().to_vec());
            var.assign(engine, next)?;
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
