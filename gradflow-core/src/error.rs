use thiserror::Error;

/// Custom error type for the gradflow engine.
///
/// Every precondition the graph and its functions check is reported through
/// one of these variants. The graph-level entry points that the caller is not
/// expected to recover from (operator construction, forward and backward
/// passes) turn them into panics carrying the same message.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum GraphError {
    #[error("incompatible matrix sizes during {operation}: {left:?} and {right:?}")]
    IncompatibleShapes {
        operation: String,
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("matrix creation error: data length {data_len} does not match shape ({rows}, {cols})")]
    MatrixCreation {
        data_len: usize,
        rows: usize,
        cols: usize,
    },

    #[error(
        "operations cannot be executed among nodes of different graphs (operand {node_id}); \
         consider wrapping the node with new_wrap()"
    )]
    CrossGraphOperand { node_id: usize },

    #[error("node {node_id} does not belong to this graph")]
    ForeignNode { node_id: usize },

    #[error("concurrent computations must be greater than zero, got {0}")]
    InvalidConcurrency(usize),

    #[error("node {node_id} is not a variable; only variables support value replacement")]
    NotAVariable { node_id: usize },

    #[error("operator node {node_id} has no function attached (was the graph cleared?)")]
    MissingValue { node_id: usize },

    #[error("output gradient shape mismatch: expected {expected:?}, got {actual:?}")]
    OutputGradientShape {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}
