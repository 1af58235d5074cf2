//! # Gradiente: Tensor Autodiff Library
//!
//! Gradiente provides tape-based reverse-mode automatic differentiation with
//! an explicit engine context, scoped tensor lifetime management, and
//! gradient-consuming optimizers, for building and training small
//! neural-network style models.
//!
//! ## Architecture
//!
//! - **engine**: Execution context, `tidy` scopes, operation tape, and the
//!   `grad`/`grads`/`variable_grads`/`custom_grad` entry points
//! - **tensor**: Immutable, reference-identified tensor handles
//! - **variable**: Named trainable slots consumed by optimizers
//! - **ops**: Operation kernels (elementwise, matmul, reductions, shape)
//! - **optim**: Optimizers (SGD, Adam, RMSProp)
//!
//! ## Example
//!
//! ```
//! use gradiente::{grad, ops, Engine, Tensor};
//!
//! let engine = Engine::new();
//! let x = engine.from_vec(vec![0.1, 0.2]);
//!
//! // d(x²)/dx = 2x
//! let df = grad(|eng: &Engine, x: &Tensor| ops::square(eng, x));
//! let g = df.call(&engine, &x, None).unwrap();
//! assert!((g.to_vec()[0] - 0.2).abs() < 1e-6);
//! assert!((g.to_vec()[1] - 0.4).abs() < 1e-6);
//! ```

pub mod engine;
pub mod error;
pub mod ops;
pub mod optim;
pub mod tensor;
pub mod variable;

// Re-export commonly used types
pub use engine::{custom_grad, grad, grads, CustomGradFn, Engine, MemoryInfo, TensorContainer};
pub use error::{Error, Result};
pub use tensor::{Tensor, TensorId};
pub use variable::Variable;
