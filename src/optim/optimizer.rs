//! Optimizer trait

use crate::engine::Engine;
use crate::error::Result;
use crate::tensor::Tensor;
use std::collections::BTreeMap;

/// Gradient-descent update rule over named variables.
pub trait Optimizer {
    /// Apply one update step from gradients keyed by variable name, as
    /// produced by [`Engine::variable_grads`].
    fn apply_gradients(&mut self, engine: &Engine, grads: &BTreeMap<String, Tensor>)
        -> Result<()>;

    /// Compute the scalar loss `f`, backpropagate to every trainable
    /// variable, and apply the update. Returns the loss value.
    fn minimize<F>(&mut self, engine: &Engine, f: F) -> Result<Tensor>
    where
        Self: Sized,
        F: FnOnce(&Engine) -> Result<Tensor>,
    {
        let (value, grads) = engine.variable_grads(f, None)?;
        self.apply_gradients(engine, &grads)?;
        Ok(value)
    }

    /// Get learning rate
    fn lr(&self) -> f32;

    /// Set learning rate
    fn set_lr(&mut self, lr: f32);
}
