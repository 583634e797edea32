//! # gradflow-core
//!
//! A define-by-run expression graph with reverse-mode automatic
//! differentiation over dense matrices.
//!
//! - [`autograd`]: the [`Graph`], its [`Node`]s, forward and backward passes.
//! - [`mat`]: the [`Matrix`] type, element types and the buffer pool.
//! - [`ops`]: differentiable operators.
//! - [`nn`]: learnable parameters and the module trait exposing them.

pub mod autograd;
pub mod error;
pub mod mat;
pub mod nn;
pub mod ops;
pub mod utils;

pub use autograd::{BackwardOptions, Function, GradValue, Graph, GraphConfig, Node, NodeType};
pub use error::GraphError;
pub use mat::{DType, Matrix, MatrixPool};
// Re-export traits required by public bounds
pub use num_traits;
