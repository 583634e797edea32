use std::fmt::Debug;

use crate::autograd::node::Node;
use crate::error::GraphError;
use crate::mat::{DType, Matrix, MatrixPool};

/// Defines the interface of a differentiable operator.
///
/// A `Function` owns references to its operand nodes and nothing else: it
/// holds no cached output and no gradient. The graph stores it inside an
/// operator node, calls [`forward`](Function::forward) to produce the node's
/// value (eagerly at construction, or lazily on first access) and calls
/// [`backward`](Function::backward) during back-propagation.
///
/// The `Send + Sync` bounds let the graph run forward and backward kernels of
/// independent operators on its processing queue concurrently.
pub trait Function<T: DType>: Debug + Send + Sync {
    /// Computes the output value from the current operand values.
    ///
    /// Implementations validate operand shape compatibility and return
    /// `GraphError::IncompatibleShapes` on mismatch. The output buffer should
    /// be drawn from `pool`.
    fn forward(&self, pool: &MatrixPool<T>) -> Result<Matrix<T>, GraphError>;

    /// Given `gy`, the gradient of the loss with respect to this function's
    /// output, accumulates each operand's contribution into that operand's
    /// gradient via [`Node::propagate_grad`].
    ///
    /// Operands that do not require gradients must be skipped. Contributions
    /// are added to the existing gradient, never written over it. Transient
    /// buffers should be drawn from `pool` and released once propagated.
    fn backward(&self, gy: &Matrix<T>, pool: &MatrixPool<T>) -> Result<(), GraphError>;

    /// The operand nodes, in the order the function consumes them.
    fn operands(&self) -> Vec<Node<T>>;
}
