//! Scoped tensor lifetime management
//!
//! Deterministic, leak-free disposal without garbage collection. A
//! [`tidy`](Engine::tidy) block pushes a scope; every tensor allocated while
//! the scope is active is disposed when it pops, except tensors reachable
//! from the block's return value (promoted to the parent scope) and tensors
//! explicitly [`keep`](Engine::keep)-ed. The scope pops on every exit path,
//! so a failing body never leaks intermediates.

use super::{Engine, Scope};
use crate::error::Result;
use crate::tensor::{Tensor, TensorId};
use std::collections::BTreeMap;

/// Snapshot of the engine's live-tensor accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Number of tensors currently registered as live.
    pub num_tensors: usize,
}

/// Types whose tensors survive a [`tidy`](Engine::tidy) scope when returned
/// from it.
pub trait TensorContainer {
    /// Ids of every tensor reachable from this value.
    fn tensor_ids(&self) -> Vec<TensorId>;
}

impl TensorContainer for () {
    fn tensor_ids(&self) -> Vec<TensorId> {
        Vec::new()
    }
}

impl TensorContainer for f32 {
    fn tensor_ids(&self) -> Vec<TensorId> {
        Vec::new()
    }
}

impl TensorContainer for Tensor {
    fn tensor_ids(&self) -> Vec<TensorId> {
        vec![self.id()]
    }
}

impl TensorContainer for Option<Tensor> {
    fn tensor_ids(&self) -> Vec<TensorId> {
        self.iter().map(Tensor::id).collect()
    }
}

impl TensorContainer for Vec<Tensor> {
    fn tensor_ids(&self) -> Vec<TensorId> {
        self.iter().map(Tensor::id).collect()
    }
}

impl TensorContainer for (Tensor, Tensor) {
    fn tensor_ids(&self) -> Vec<TensorId> {
        vec![self.0.id(), self.1.id()]
    }
}

impl TensorContainer for (Tensor, Tensor, Tensor) {
    fn tensor_ids(&self) -> Vec<TensorId> {
        vec![self.0.id(), self.1.id(), self.2.id()]
    }
}

impl TensorContainer for (Tensor, Vec<Tensor>) {
    fn tensor_ids(&self) -> Vec<TensorId> {
        let mut ids = vec![self.0.id()];
        ids.extend(self.1.iter().map(Tensor::id));
        ids
    }
}

impl TensorContainer for BTreeMap<String, Tensor> {
    fn tensor_ids(&self) -> Vec<TensorId> {
        self.values().map(Tensor::id).collect()
    }
}

impl TensorContainer for (Tensor, BTreeMap<String, Tensor>) {
    fn tensor_ids(&self) -> Vec<TensorId> {
        let mut ids = vec![self.0.id()];
        ids.extend(self.1.values().map(Tensor::id));
        ids
    }
}

impl Engine {
    /// Run `f` in a fresh scope. When `f` returns, every tensor allocated
    /// inside the scope is disposed except the return value's tensors, which
    /// are promoted one level up, and tensors marked with
    /// [`keep`](Engine::keep). The scope pops on `Err` as well, so failures
    /// never leak intermediates.
    pub fn tidy<T, F>(&self, f: F) -> Result<T>
    where
        T: TensorContainer,
        F: FnOnce() -> Result<T>,
    {
        self.begin_scope();
        let result = f();
        match &result {
            Ok(value) => self.end_scope(&value.tensor_ids()),
            Err(_) => self.end_scope(&[]),
        }
        result
    }

    /// Exempt a tensor from automatic disposal by any enclosing `tidy` scope.
    /// Manual [`dispose`](Engine::dispose) still applies. Returns the handle.
    pub fn keep(&self, t: &Tensor) -> Tensor {
        self.state_mut().kept.insert(t.id());
        t.clone()
    }

    /// Manually release a tensor. Idempotent: disposing an id that is no
    /// longer registered is a no-op.
    pub fn dispose(&self, t: &Tensor) {
        let mut st = self.state_mut();
        st.live.remove(&t.id());
        st.kept.remove(&t.id());
    }

    /// Current live-tensor accounting; the externally observable invariant
    /// for leak testing.
    pub fn memory(&self) -> MemoryInfo {
        MemoryInfo {
            num_tensors: self.state_ref().live.len(),
        }
    }

    pub(crate) fn begin_scope(&self) {
        self.state_mut().scopes.push(Scope {
            tracked: Vec::new(),
        });
    }

    /// Pop the current scope, disposing everything it tracked except kept
    /// tensors and `promoted` ids, which move to the parent scope.
    pub(crate) fn end_scope(&self, promoted: &[TensorId]) {
        let mut st = self.state_mut();
        debug_assert!(st.scopes.len() > 1, "end_scope would pop the root scope");
        let scope = st.scopes.pop().expect("scope stack underflow");
        for id in scope.tracked {
            if promoted.contains(&id) || st.kept.contains(&id) {
                st.scopes
                    .last_mut()
                    .expect("root scope always present")
                    .tracked
                    .push(id);
            } else {
                st.live.remove(&id);
            }
        }
    }
}
