//! Named, mutable tensor slots for trainable state
//!
//! A [`Variable`] is a named slot in the engine's registry holding the
//! current value of a trainable parameter. Optimizers read gradients keyed
//! by variable name from [`Engine::variable_grads`] and write updates back
//! with [`Variable::assign`]. Variable tensors are kept: no `tidy` scope
//! ever disposes them automatically.

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use std::cell::RefCell;
use std::rc::Rc;

/// Handle to a named trainable slot. Clones share the slot.
#[derive(Clone)]
pub struct Variable {
    name: String,
    trainable: bool,
    slot: Rc<RefCell<Tensor>>,
}

impl Variable {
    /// Registry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether optimizers should update this variable.
    pub fn trainable(&self) -> bool {
        self.trainable
    }

    /// Current value of the slot.
    pub fn value(&self) -> Tensor {
        self.slot.borrow().clone()
    }

    /// Replace the slot's value. The new tensor must match the current
    /// shape; it is kept, and the previous value is disposed.
    pub fn assign(&self, engine: &Engine, value: Tensor) -> Result<()> {
        let current_shape = self.slot.borrow().shape().to_vec();
        if value.shape() != current_shape.as_slice() {
            return Err(Error::ShapeMismatch {
                expected: current_shape,
                got: value.shape().to_vec(),
            });
        }
        engine.keep(&value);
        let old = self.slot.replace(value);
        engine.dispose(&old);
        Ok(())
    }
}

impl std::fmt::Debug for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variable")
            .field("name", &self.name)
            .field("trainable", &self.trainable)
            .field("value", &self.slot.borrow())
            .finish()
    }
}

impl Engine {
    /// Register a named variable initialized with `init`. The initial tensor
    /// is kept. Registering a name twice is an error.
    pub fn variable(&self, name: &str, init: Tensor, trainable: bool) -> Result<Variable> {
        if self.state_ref().variables.contains_key(name) {
            return Err(Error::InvalidParameter(format!(
                "variable '{name}' is already registered"
            )));
        }
        self.keep(&init);
        let var = Variable {
            name: name.to_string(),
            trainable,
            slot: Rc::new(RefCell::new(init)),
        };
        self.state_mut()
            .variables
            .insert(name.to_string(), var.clone());
        Ok(var)
    }

    /// Look up a registered variable by name.
    pub fn get_variable(&self, name: &str) -> Option<Variable> {
        self.state_ref().variables.get(name).cloned()
    }

    /// All registered variables, in name order.
    pub fn variables(&self) -> Vec<Variable> {
        self.state_ref().variables.values().cloned().collect()
    }
}
