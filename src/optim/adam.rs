//! Adam optimizer

use super::Optimizer;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use ndarray::Array1;
use std::collections::{BTreeMap, HashMap};

/// Adam optimizer (Adaptive Moment Estimation)
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: u64,
    m: HashMap<String, Array1<f32>>, // First moment
    v: HashMap<String, Array1<f32>>, // Second moment
}

impl Adam {
    /// Create a new Adam optimizer
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }

    /// Create Adam with default parameters
    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8)
    }
}

impl Optimizer for Adam {
    fn apply_gradients(
        &mut self,
        engine: &Engine,
        grads: &BTreeMap<String, Tensor>,
    ) -> Result<()> {
        self.t += 1;

        // Bias correction factors
        let lr_t = self.lr
            * ((1.0 - self.beta2.powi(self.t as i32)).sqrt()
                / (1.0 - self.beta1.powi(self.t as i32)));

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

            // m_t = β1 * m_{t-1} + (1 - β1) * g
            let m_t = match self.m.get(name) {
                Some(m) => m * self.beta1 + &(g * (1.0 - self.beta1)),
                None => g * (1.0 - self.beta1),
            };

            // v_t = β2 * v_{t-1} + (1 - β2) * g²
            let g_sq = g * g;
            let v_t = match self.v.get(name) {
                Some(v) => v * self.beta2 + &(&g_sq * (1.0 - self.beta2)),
                None => &g_sq * (1.0 - self.beta2),
            };

            // θ_t = θ_{t-1} - lr_t * m_t / (√v_t + ε)
            let update = &m_t / &(v_t.mapv(f32::sqrt) + self.epsilon) * lr_t;
            let next = engine.alloc(current.data() - &update, current.shape().to_vec());
            var.assign(engine, next)?;

            self.m.insert(name.clone(), m_t);
            self.v.insert(name.clone(), v_t);
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
