//! Engine: the explicit context object for tensor computation
//!
//! The [`Engine`] owns all mutable state of the system: the live-tensor
//! registry, the scope stack used by [`tidy`](Engine::tidy), the operation
//! tape, the gradient-session depth counters, and the variable registry.
//! There is no ambient global state; tests swap in a fresh engine (or call
//! [`reset`](Engine::reset)) to simulate a process restart.
//!
//! Execution is single-threaded and synchronous: every operation runs to
//! completion before the next begins, and scope nesting is the only
//! structuring mechanism.

mod grad;
mod memory;
mod tape;


pub use grad::{custom_grad, grad, grads, CustomGrad, CustomGradFn, Grad, Grads};
pub use memory::{MemoryInfo, TensorContainer};
pub use tape::{GradientThunk, NodeGradFn, TapeNode};

use crate::error::{Error, Result};
use crate::tensor::{Tensor, TensorId};
use crate::variable::Variable;
use ndarray::Array1;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, HashSet};

pub(crate) struct Scope {
    pub(crate) tracked: Vec<TensorId>,
}

pub(crate) struct EngineState {
    pub(crate) next_tensor_id: u64,
    pub(crate) next_node_id: u64,
    pub(crate) live: HashSet<TensorId>,
    pub(crate) kept: HashSet<TensorId>,
    /// Scope stack; index 0 is the implicit root scope and is never popped.
    pub(crate) scopes: Vec<Scope>,
    pub(crate) active_tape: Option<Vec<TapeNode>>,
    pub(crate) gradient_depth: usize,
    pub(crate) custom_grad_depth: usize,
    pub(crate) variables: BTreeMap<String, Variable>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            next_tensor_id: 0,
            next_node_id: 0,
            live: HashSet::new(),
            kept: HashSet::new(),
            scopes: vec![Scope { tracked: Vec::new() }],
            active_tape: None,
            gradient_depth: 0,
            custom_grad_depth: 0,
            variables: BTreeMap::new(),
        }
    }
}

/// Execution context owning tensor lifetimes, the tape, and variables.
pub struct Engine {
    state: RefCell<EngineState>,
}

impl Engine {
    /// Create a fresh engine with empty registries and zeroed id counters.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(EngineState::new()),
        }
    }

    /// Wipe the engine back to its freshly-created state: all live tensors,
    /// scopes, recorded nodes, variables, and id counters are discarded.
    pub fn reset(&self) {
        *self.state.borrow_mut() = EngineState::new();
    }

    pub(crate) fn state_ref(&self) -> Ref<'_, EngineState> {
        self.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, EngineState> {
        self.state.borrow_mut()
    }

    /// Register a freshly computed buffer as a live tensor tracked by the
    /// current scope. Every tensor-producing primitive goes through here
    /// before its output is returned to caller code.
    pub fn alloc(&self, data: Array1<f32>, shape: Vec<usize>) -> Tensor {
        let mut st = self.state_mut();
        let id = TensorId(st.next_tensor_id);
        st.next_tensor_id += 1;
        st.live.insert(id);
        st.scopes
            .last_mut()
            .expect("root scope always present")
            .tracked
            .push(id);
        Tensor::new(id, shape, data)
    }

    /// Create a tensor from a flat buffer and an explicit shape.
    pub fn tensor(&self, data: Vec<f32>, shape: &[usize]) -> Result<Tensor> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(self.alloc(Array1::from(data), shape.to_vec()))
    }

    /// Create a rank-1 tensor from a vector.
    pub fn from_vec(&self, data: Vec<f32>) -> Tensor {
        let shape = vec![data.len()];
        self.alloc(Array1::from(data), shape)
    }

    /// Create a scalar (rank-0) tensor.
    pub fn scalar(&self, value: f32) -> Tensor {
        self.alloc(Array1::from(vec![value]), Vec::new())
    }

    /// Create a tensor filled with a constant.
    pub fn fill(&self, shape: &[usize], value: f32) -> Tensor {
        let numel: usize = shape.iter().product();
        self.alloc(Array1::from_elem(numel, value), shape.to_vec())
    }

    /// Create a tensor of zeros.
    pub fn zeros(&self, shape: &[usize]) -> Tensor {
        self.fill(shape, 0.0)
    }

    /// Create a tensor of ones.
    pub fn ones(&self, shape: &[usize]) -> Tensor {
        self.fill(shape, 1.0)
    }

    /// Zeros with the same shape as `t`.
    pub fn zeros_like(&self, t: &Tensor) -> Tensor {
        self.fill(t.shape(), 0.0)
    }

    /// Ones with the same shape as `t`.
    pub fn ones_like(&self, t: &Tensor) -> Tensor {
        self.fill(t.shape(), 1.0)
    }

    /// Uniform random tensor over `[lo, hi)`.
    pub fn random_uniform(&self, shape: &[usize], lo: f32, hi: f32) -> Result<Tensor> {
        if !(lo < hi) {
            return Err(Error::InvalidParameter(format!(
                "random_uniform requires lo < hi, got [{lo}, {hi})"
            )));
        }
        let numel: usize = shape.iter().product();
        let mut rng = rand::thread_rng();
        let data: Vec<f32> = (0..numel).map(|_| rng.gen_range(lo..hi)).collect();
        Ok(self.alloc(Array1::from(data), shape.to_vec()))
    }

    /// Normally distributed random tensor.
    pub fn random_normal(&self, shape: &[usize], mean: f32, std: f32) -> Result<Tensor> {
        let normal = Normal::new(mean, std)
            .map_err(|e| Error::InvalidParameter(format!("random_normal: {e}")))?;
        let numel: usize = shape.iter().product();
        let mut rng = rand::thread_rng();
        let data: Vec<f32> = (0..numel).map(|_| normal.sample(&mut rng)).collect();
        Ok(self.alloc(Array1::from(data), shape.to_vec()))
    }

    /// Half-open range `[start, stop)` with the given step.
    pub fn range(&self, start: f32, stop: f32, step: f32) -> Result<Tensor> {
        if step == 0.0 {
            return Err(Error::InvalidParameter("range step must be non-zero".into()));
        }
        let mut data = Vec::new();
        let mut v = start;
        while (step > 0.0 && v < stop) || (step < 0.0 && v > stop) {
            data.push(v);
            v += step;
        }
        let shape = vec![data.len()];
        Ok(self.alloc(Array1::from(data), shape))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
