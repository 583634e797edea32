//! # Expression graph and reverse-mode automatic differentiation
//!
//! - [`Graph`] owns the nodes, assigns their ids, runs forward passes
//!   (eagerly at operator construction or lazily) and back-propagation.
//! - [`Node`] is the handle of a vertex: a variable, an operator or a
//!   wrapper around an external [`GradValue`].
//! - [`Function`] is the forward/backward contract every operator implements.
//! - [`ProcessingQueue`] bounds how many heavy kernels run at once.

pub mod backward;
pub mod config;
pub mod function;
pub mod graph;
mod height;
pub mod node;
pub mod processing_queue;

pub use backward::BackwardOptions;
pub use config::GraphConfig;
pub use function::Function;
pub use graph::{Graph, GraphId};
pub use node::{GradValue, Node, NodeType};
pub use processing_queue::ProcessingQueue;
