//! Operation kernels
//!
//! Every tensor-producing primitive follows the same protocol: compute the
//! forward result, register it with the engine's active scope via
//! [`Engine::alloc`](crate::Engine::alloc), then call
//! [`Engine::record`](crate::Engine::record) with the named inputs and a
//! backward function of lazy per-input gradient thunks. Recording is a no-op
//! outside a differentiation session.

pub mod arithmetic;
pub mod matmul;
pub mod reduce;
pub mod shape;
pub mod unary;

pub use arithmetic::{add, div, mul, neg, scale, sub};
pub use matmul::{matmul, transpose};
pub use reduce::{mean, sum};
pub use shape::{broadcast_to, reshape, sum_to_shape};
pub use unary::{exp, greater, log, relu, sqrt, square};
