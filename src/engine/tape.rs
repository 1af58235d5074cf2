//! Operation tape: recording, path filtering, backpropagation
//!
//! During a differentiation session every primitive operation appends one
//! [`TapeNode`] capturing its named inputs, its output, and a backward
//! function. After the forward pass, [`get_filtered_nodes_x_to_y`] prunes the
//! tape to the nodes lying on a directed path from the differentiation
//! targets to the output, and [`backpropagate_gradients`] sweeps the filtered
//! nodes in reverse, accumulating per-tensor gradients.

use super::Engine;
use crate::error::{Error, Result};
use crate::ops;
use crate::tensor::{Tensor, TensorId};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Deferred computation of one input's gradient. Evaluated only when
/// backpropagation actually needs that input.
pub type GradientThunk = Box<dyn FnOnce(&Engine) -> Result<Tensor>>;

/// A node's backward function: maps the upstream gradient to lazy gradient
/// thunks keyed by the node's input names. Inputs with no entry receive no
/// gradient.
pub type NodeGradFn = Rc<dyn Fn(&Engine, &Tensor) -> Result<Vec<(String, GradientThunk)>>>;

/// One recorded operation: named inputs, output, and an optional backward
/// function. Created once during a forward pass and never mutated. The name
/// is diagnostic metadata only, never a dispatch key.
#[derive(Clone)]
pub struct TapeNode {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) inputs: Vec<(String, Tensor)>,
    pub(crate) output: Tensor,
    pub(crate) grad_fn: Option<NodeGradFn>,
}

impl TapeNode {
    /// Operation tag, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Named inputs as recorded.
    pub fn inputs(&self) -> &[(String, Tensor)] {
        &self.inputs
    }

    /// The tensor this operation produced.
    pub fn output(&self) -> &Tensor {
        &self.output
    }

    /// Whether a backward function was registered.
    pub fn has_grad_fn(&self) -> bool {
        self.grad_fn.is_some()
    }
}

impl Engine {
    /// Append one node to the active tape. A no-op when no differentiation
    /// session is active, or while a custom-gradient composite is recording
    /// its own single node. Every primitive op calls this immediately after
    /// computing its forward result.
    pub fn record(
        &self,
        name: &str,
        inputs: Vec<(String, Tensor)>,
        output: &Tensor,
        grad_fn: Option<NodeGradFn>,
    ) {
        let mut st = self.state_mut();
        if st.gradient_depth == 0 || st.custom_grad_depth > 0 || st.active_tape.is_none() {
            return;
        }
        let id = st.next_node_id;
        st.next_node_id += 1;
        st.active_tape
            .as_mut()
            .expect("checked above")
            .push(TapeNode {
                id,
                name: name.to_string(),
                inputs,
                output: output.clone(),
                grad_fn,
            });
    }

    /// Open a differentiation session, or join the enclosing one when nested.
    /// A single shared tape serves all nesting levels; that sharing is what
    /// makes gradients-of-gradients work.
    pub(crate) fn start_tape(&self) {
        let mut st = self.state_mut();
        if st.gradient_depth == 0 {
            st.active_tape = Some(Vec::new());
        }
        st.gradient_depth += 1;
    }

    /// Close this nesting level. The tape itself survives until the
    /// outermost gradient call finishes, so backward-pass operations of
    /// nested calls still record.
    pub(crate) fn end_tape(&self) {
        let mut st = self.state_mut();
        debug_assert!(st.gradient_depth > 0, "end_tape without start_tape");
        st.gradient_depth -= 1;
    }

    /// Discard the tape once the outermost gradient call is done.
    pub(crate) fn drop_tape_if_done(&self) {
        let mut st = self.state_mut();
        if st.gradient_depth == 0 {
            st.active_tape = None;
        }
    }

    pub(crate) fn begin_custom_grad(&self) {
        self.state_mut().custom_grad_depth += 1;
    }

    pub(crate) fn end_custom_grad(&self) {
        let mut st = self.state_mut();
        debug_assert!(st.custom_grad_depth > 0);
        st.custom_grad_depth -= 1;
    }
}

/// Prune `tape` to the nodes on some directed path from a tensor in `xs` to
/// `y`, preserving recording order.
///
/// Two reachability passes over the DAG implied by the node list: a forward
/// pass marks everything reachable from `xs`, a reverse pass marks everything
/// that reaches `y`. Nodes in both sets survive; each survivor's input list
/// is pruned to the inputs that are themselves reachable from `xs`, so
/// off-path operands of a retained node receive no gradient. Returns an
/// empty list when no path exists.
pub(crate) fn get_filtered_nodes_x_to_y(
    tape: &[TapeNode],
    xs: &[TensorId],
    y: TensorId,
) -> Vec<TapeNode> {
    let mut tensors_from_x: HashSet<TensorId> = xs.iter().copied().collect();
    let mut nodes_from_x: HashSet<u64> = HashSet::new();
    for node in tape {
        if node
            .inputs
            .iter()
            .any(|(_, t)| tensors_from_x.contains(&t.id()))
        {
            tensors_from_x.insert(node.output.id());
            nodes_from_x.insert(node.id);
        }
    }

    let mut tensors_lead_to_y: HashSet<TensorId> = HashSet::new();
    tensors_lead_to_y.insert(y);
    let mut nodes_to_y: HashSet<u64> = HashSet::new();
    for node in tape.iter().rev() {
        if tensors_lead_to_y.contains(&node.output.id()) {
            for (_, input) in &node.inputs {
                tensors_lead_to_y.insert(input.id());
            }
            nodes_to_y.insert(node.id);
        }
    }

    tape.iter()
        .filter(|node| nodes_from_x.contains(&node.id) && nodes_to_y.contains(&node.id))
        .map(|node| {
            let pruned_inputs = node
                .inputs
                .iter()
                .filter(|(_, t)| tensors_from_x.contains(&t.id()))
                .cloned()
                .collect();
            TapeNode {
                id: node.id,
                name: node.name.clone(),
                inputs: pruned_inputs,
                output: node.output.clone(),
                grad_fn: node.grad_fn.clone(),
            }
        })
        .collect()
}

/// Sweep `filtered_tape` in reverse recording order, accumulating gradients
/// into `accumulated`.
///
/// A node whose output has no accumulated entry is skipped outright; its
/// backward function is never invoked. A surviving node without a backward
/// function is a hard [`Error::MissingGradient`]: it is load-bearing for the
/// requested derivative. Per-input thunks are evaluated lazily, and fan-out
/// contributions are summed with the recorded `add` op so that accumulation
/// itself stays differentiable at higher order.
pub(crate) fn backpropagate_gradients(
    engine: &Engine,
    accumulated: &mut HashMap<TensorId, Tensor>,
    filtered_tape: &[TapeNode],
) -> Result<()> {
    for node in filtered_tape.iter().rev() {
        let dy = match accumulated.get(&node.output.id()) {
            Some(g) => g.clone(),
            None => continue,
        };
        let grad_fn = node
            .grad_fn
            .as_ref()
            .ok_or_else(|| Error::MissingGradient(node.name.clone()))?;
        let mut thunks = grad_fn(engine, &dy)?;
        for (input_name, input) in &node.inputs {
            let Some(pos) = thunks.iter().position(|(name, _)| name == input_name) else {
                continue;
            };
            let (_, thunk) = thunks.swap_remove(pos);
            let g = thunk(engine)?;
            if g.shape() != input.shape() {
                return Err(Error::ShapeMismatch {
                    expected: input.shape().to_vec(),
                    got: g.shape().to_vec(),
                });
            }
            let merged = match accumulated.remove(&input.id()) {
                Some(existing) => ops::add(engine, &existing, &g)?,
                None => g,
            };
            accumulated.insert(input.id(), merged);
        }
    }
    Ok(())
}
