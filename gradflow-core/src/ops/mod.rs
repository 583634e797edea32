//! # Operators (`ops`)
//!
//! Differentiable functions that can be inserted into a [`Graph`](crate::autograd::Graph).
//!
//! Each operator is a struct holding its operand nodes and implementing
//! [`Function`](crate::autograd::Function): `forward` computes the value
//! with buffers taken from the graph's [`MatrixPool`](crate::mat::MatrixPool),
//! `backward` turns the output gradient into operand gradients and
//! propagates them. A `Graph` method (e.g. [`Graph::min`](crate::autograd::Graph::min))
//! wraps the usual `new_operator(Op::new(..))` call.
//!
//! - [`min`]: element-wise minimum.

pub mod min;

pub use min::Min;
