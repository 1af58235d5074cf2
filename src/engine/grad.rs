//! Gradient computation entry points
//!
//! [`grad`] and [`grads`] differentiate a function of explicit tensor
//! arguments; [`Engine::variable_grads`] differentiates with respect to
//! registered [`Variable`](crate::Variable)s; [`custom_grad`] installs a
//! caller-supplied backward function for a composite operation. All entry
//! points run the forward pass under tape recording inside a `tidy` scope,
//! so a failed call leaves the arena with no leaked intermediates.
//!
//! Policy for disconnected inputs: a requested input with no recorded path
//! to the output yields a zeros gradient of the input's shape. The
//! [`MissingGradient`](crate::Error::MissingGradient) error is reserved for
//! operations that are actually load-bearing for the derivative.

use super::tape::{self, GradientThunk, NodeGradFn};
use super::Engine;
use crate::error::{Error, Result};
use crate::tensor::{Tensor, TensorId};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

impl Engine {
    /// Run `forward` under tape recording and backpropagate from its output
    /// to `xs`. Returns the forward value and one gradient per member of
    /// `xs`, in order, from a single backward sweep.
    pub(crate) fn gradients<F>(
        &self,
        forward: F,
        xs: &[Tensor],
        dy: Option<&Tensor>,
    ) -> Result<(Tensor, Vec<Tensor>)>
    where
        F: FnOnce() -> Result<Tensor>,
    {
        self.tidy(|| {
            self.start_tape();
            let y_result = self.tidy(forward);
            self.end_tape();
            let y = match y_result {
                Ok(y) => y,
                Err(e) => {
                    self.drop_tape_if_done();
                    return Err(e);
                }
            };

            // Default seed is all ones: differentiating an unseeded
            // multi-element output means differentiating its sum.
            let seed = match dy {
                Some(d) => {
                    if d.shape() != y.shape() {
                        self.drop_tape_if_done();
                        return Err(Error::ShapeMismatch {
                            expected: y.shape().to_vec(),
                            got: d.shape().to_vec(),
                        });
                    }
                    d.clone()
                }
                None => self.ones_like(&y),
            };

            let x_ids: Vec<TensorId> = xs.iter().map(Tensor::id).collect();
            let filtered = {
                let st = self.state_ref();
                match st.active_tape.as_deref() {
                    Some(nodes) => tape::get_filtered_nodes_x_to_y(nodes, &x_ids, y.id()),
                    None => Vec::new(),
                }
            };

            let mut accumulated: HashMap<TensorId, Tensor> = HashMap::new();
            accumulated.insert(y.id(), seed);
            let swept = tape::backpropagate_gradients(self, &mut accumulated, &filtered);
            self.drop_tape_if_done();
            swept?;

            let grads = xs
                .iter()
                .map(|x| match accumulated.get(&x.id()) {
                    Some(g) => g.clone(),
                    None => self.zeros_like(x),
                })
                .collect();
            Ok((y, grads))
        })
    }

    /// Forward value and per-variable gradients of `f`, for direct
    /// consumption by optimizers.
    ///
    /// Differentiates with respect to `var_names` if given, otherwise every
    /// registered trainable variable. `f` must produce a scalar loss.
    pub fn variable_grads<F>(
        &self,
        f: F,
        var_names: Option<&[&str]>,
    ) -> Result<(Tensor, BTreeMap<String, Tensor>)>
    where
        F: FnOnce(&Engine) -> Result<Tensor>,
    {
        let vars = match var_names {
            Some(names) => {
                let mut vars = Vec::with_capacity(names.len());
                for name in names {
                    let var = self.get_variable(name).ok_or_else(|| {
                        Error::InvalidParameter(format!("unknown variable '{name}'"))
                    })?;
                    vars.push(var);
                }
                vars
            }
            None => self
                .variables()
                .into_iter()
                .filter(|v| v.trainable())
                .collect(),
        };
        if vars.is_empty() {
            return Err(Error::InvalidParameter(
                "variable_grads found no trainable variables".into(),
            ));
        }

        self.tidy(|| {
            let xs: Vec<Tensor> = vars.iter().map(|v| v.value()).collect();
            let (value, grads) = self.gradients(|| f(self), &xs, None)?;
            if value.len() != 1 {
                return Err(Error::InvalidParameter(format!(
                    "variable_grads requires a scalar loss, got shape {:?}",
                    value.shape()
                )));
            }
            let named = vars
                .iter()
                .map(|v| v.name().to_string())
                .zip(grads)
                .collect();
            Ok((value, named))
        })
    }
}

/// Differentiable function of one tensor, produced by [`grad`].
pub struct Grad<F> {
    f: F,
}

/// Lift `f` into a reusable gradient function.
///
/// `grad(f).call(engine, x, dy)` evaluates `f(x)` under tape recording and
/// returns d`f`/d`x`, seeded with `dy` or ones. The returned object carries
/// no per-call state, so it is callable repeatedly, and `f` may itself call
/// `grad` internally to obtain higher-order derivatives.
pub fn grad<F>(f: F) -> Grad<F>
where
    F: Fn(&Engine, &Tensor) -> Result<Tensor>,
{
    Grad { f }
}

impl<F> Grad<F>
where
    F: Fn(&Engine, &Tensor) -> Result<Tensor>,
{
    /// Gradient of `f` at `x`, seeded with `dy` (ones when absent).
    pub fn call(&self, engine: &Engine, x: &Tensor, dy: Option<&Tensor>) -> Result<Tensor> {
        engine.tidy(|| {
            let (_, mut grads) =
                engine.gradients(|| (self.f)(engine, x), std::slice::from_ref(x), dy)?;
            Ok(grads.remove(0))
        })
    }
}

/// Differentiable function of several tensors, produced by [`grads`].
pub struct Grads<F> {
    f: F,
}

/// Multi-input form of [`grad`]: one gradient per input, in input order, all
/// from a single backward sweep.
pub fn grads<F>(f: F) -> Grads<F>
where
    F: Fn(&Engine, &[Tensor]) -> Result<Tensor>,
{
    Grads { f }
}

impl<F> Grads<F>
where
    F: Fn(&Engine, &[Tensor]) -> Result<Tensor>,
{
    /// Gradients of `f` at `xs`, seeded with `dy` (ones when absent).
    pub fn call(
        &self,
        engine: &Engine,
        xs: &[Tensor],
        dy: Option<&Tensor>,
    ) -> Result<Vec<Tensor>> {
        engine.tidy(|| {
            let (_, grads) = engine.gradients(|| (self.f)(engine, xs), xs, dy)?;
            Ok(grads)
        })
    }
}

/// Caller-supplied backward function for a [`custom_grad`] composite: maps
/// the upstream gradient to one gradient per input, in input order. Its own
/// tensor operations are recorded when it runs, so the override is itself
/// differentiable under a nested `grad`.
pub type CustomGradFn = Rc<dyn Fn(&Engine, &Tensor) -> Result<Vec<Tensor>>>;

/// Composite operation with an overridden backward function, produced by
/// [`custom_grad`].
pub struct CustomGrad<F> {
    f: F,
}

/// Define a composite operation whose backward function replaces whatever
/// its forward implementation would have recorded.
///
/// `f` computes the forward value and returns it together with the gradient
/// function. While `f` runs, its internal primitive operations are not
/// recorded; exactly one tape node is installed for the whole composite.
pub fn custom_grad<F>(f: F) -> CustomGrad<F>
where
    F: Fn(&Engine, &[Tensor]) -> Result<(Tensor, CustomGradFn)>,
{
    CustomGrad { f }
}

impl<F> CustomGrad<F>
where
    F: Fn(&Engine, &[Tensor]) -> Result<(Tensor, CustomGradFn)>,
{
    /// Run the composite forward and install its single tape node.
    pub fn call(&self, engine: &Engine, inputs: &[Tensor]) -> Result<Tensor> {
        engine.begin_custom_grad();
        let result = (self.f)(engine, inputs);
        engine.end_custom_grad();
        let (value, grad_fn) = result?;

        let named_inputs: Vec<(String, Tensor)> = inputs
            .iter()
            .enumerate()
            .map(|(i, t)| (i.to_string(), t.clone()))
            .collect();
        let n_inputs = inputs.len();
        let node_grad: NodeGradFn = Rc::new(move |eng: &Engine, dy: &Tensor| {
            let gs = grad_fn(eng, dy)?;
            if gs.len() != n_inputs {
                return Err(Error::BackwardFailed(format!(
                    "custom gradient produced {} gradients for {} inputs",
                    gs.len(),
                    n_inputs
                )));
            }
            Ok(gs
                .into_iter()
                .enumerate()
                .map(|(i, g)| {
                    let thunk: GradientThunk = Box::new(move |_: &Engine| Ok(g));
                    (i.to_string(), thunk)
                })
                .collect())
        });
        engine.record("custom_grad", named_inputs, &value, Some(node_grad));
        Ok(value)
    }
}
