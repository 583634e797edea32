use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::autograd::function::Function;
use crate::autograd::graph::GraphId;
use crate::error::GraphError;
use crate::mat::matrix::check_compatible;
use crate::mat::{DType, Matrix, MatrixPool};

/// A value paired with an optional gradient, owned outside of a graph.
///
/// This is what a wrapper node adapts: model parameters, or nodes of another
/// graph.
pub trait GradValue<T: DType>: Send + Sync {
    fn value(&self) -> Arc<Matrix<T>>;
    fn grad(&self) -> Option<Matrix<T>>;
    /// Same as `grad().is_some()`, without copying the gradient.
    fn has_grad(&self) -> bool;
    fn requires_grad(&self) -> bool;
    /// Adds `gx` to the gradient, allocating it first if absent.
    fn propagate_grad(&self, gx: &Matrix<T>) -> Result<(), GraphError>;
    fn zero_grad(&self);
}

/// Variant tag of a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Variable,
    Operator,
    Wrapper,
}

/// A vertex of an expression graph.
///
/// `Node` is a cheap handle (`Arc` inside): clones refer to the same vertex
/// and compare equal. Nodes can only be created by a
/// [`Graph`](crate::autograd::Graph), which assigns their ids.
#[derive(Clone)]
pub struct Node<T: DType> {
    cell: Arc<NodeCell<T>>,
}

struct NodeCell<T: DType> {
    id: AtomicUsize,
    graph: GraphId,
    pool: Arc<MatrixPool<T>>,
    state: RwLock<NodeKind<T>>,
}

pub(crate) enum NodeKind<T: DType> {
    Variable(Variable<T>),
    Operator(Operator<T>),
    Wrapper(Wrapper<T>),
}

/// Leaf owning its value.
pub(crate) struct Variable<T: DType> {
    pub(crate) value: Arc<Matrix<T>>,
    pub(crate) grad: Option<Matrix<T>>,
    pub(crate) requires_grad: bool,
    pub(crate) name: Option<String>,
    pub(crate) time_step: usize,
}

/// Result of a function applied to operand nodes of the same graph.
pub(crate) struct Operator<T: DType> {
    /// `None` only for a shell parked in the graph's operator pool.
    pub(crate) function: Option<Arc<dyn Function<T>>>,
    pub(crate) operands: Vec<Node<T>>,
    pub(crate) value: Option<Arc<Matrix<T>>>,
    pub(crate) grad: Option<Matrix<T>>,
    pub(crate) requires_grad: bool,
    pub(crate) time_step: usize,
}

/// Adapter around an externally owned value/gradient pair.
pub(crate) struct Wrapper<T: DType> {
    pub(crate) source: Arc<dyn GradValue<T>>,
    pub(crate) wrap_grad: bool,
    pub(crate) time_step: usize,
}

impl<T: DType> Operator<T> {
    fn shell() -> Self {
        Operator {
            function: None,
            operands: Vec::new(),
            value: None,
            grad: None,
            requires_grad: false,
            time_step: 0,
        }
    }
}

impl<T: DType> Node<T> {
    pub(crate) fn new(graph: GraphId, pool: Arc<MatrixPool<T>>, kind: NodeKind<T>) -> Self {
        Node {
            cell: Arc::new(NodeCell {
                id: AtomicUsize::new(0),
                graph,
                pool,
                state: RwLock::new(kind),
            }),
        }
    }

    /// Insertion index of the node within its graph.
    pub fn id(&self) -> usize {
        self.cell.id.load(Ordering::Acquire)
    }

    pub(crate) fn set_id(&self, id: usize) {
        self.cell.id.store(id, Ordering::Release);
    }

    /// Identity of the owning graph.
    pub fn graph_id(&self) -> GraphId {
        self.cell.graph
    }

    pub fn node_type(&self) -> NodeType {
        match &*self.read_state() {
            NodeKind::Variable(_) => NodeType::Variable,
            NodeKind::Operator(_) => NodeType::Operator,
            NodeKind::Wrapper(_) => NodeType::Wrapper,
        }
    }

    pub fn is_operator(&self) -> bool {
        self.node_type() == NodeType::Operator
    }

    /// The graph time step at which the node was created.
    pub fn time_step(&self) -> usize {
        match &*self.read_state() {
            NodeKind::Variable(v) => v.time_step,
            NodeKind::Operator(op) => op.time_step,
            NodeKind::Wrapper(w) => w.time_step,
        }
    }

    /// Name of a variable node, if it was given one.
    pub fn name(&self) -> Option<String> {
        match &*self.read_state() {
            NodeKind::Variable(v) => v.name.clone(),
            _ => None,
        }
    }

    /// Returns the node's value, computing and memoizing an operator's value
    /// on first access.
    ///
    /// # Errors
    /// Propagates the failure of the operator's forward computation, or
    /// `GraphError::MissingValue` when the operator belongs to a cleared graph.
    pub fn try_value(&self) -> Result<Arc<Matrix<T>>, GraphError> {
        if let Some(value) = stored_value(&self.read_state()) {
            return Ok(value);
        }
        // Computed under the write lock so concurrent readers run the kernel once.
        let mut state = self.write_state();
        if let Some(value) = stored_value(&state) {
            return Ok(value);
        }
        match &mut *state {
            NodeKind::Operator(op) => {
                let function = op
                    .function
                    .clone()
                    .ok_or(GraphError::MissingValue { node_id: self.id() })?;
                let value = Arc::new(function.forward(&self.cell.pool)?);
                op.value = Some(Arc::clone(&value));
                Ok(value)
            }
            _ => Err(GraphError::MissingValue { node_id: self.id() }),
        }
    }

    /// Returns the node's value.
    ///
    /// # Panics
    /// Panics if a lazily evaluated operator fails its forward computation
    /// (for instance on incompatible operand shapes).
    pub fn value(&self) -> Arc<Matrix<T>> {
        self.try_value().unwrap_or_else(|err| panic!("{}", err))
    }

    /// Returns a copy of the accumulated gradient, if any.
    pub fn grad(&self) -> Option<Matrix<T>> {
        match &*self.read_state() {
            NodeKind::Variable(v) => v.grad.clone(),
            NodeKind::Operator(op) => op.grad.clone(),
            NodeKind::Wrapper(w) if w.wrap_grad => w.source.grad(),
            NodeKind::Wrapper(_) => None,
        }
    }

    pub fn has_grad(&self) -> bool {
        match &*self.read_state() {
            NodeKind::Variable(v) => v.grad.is_some(),
            NodeKind::Operator(op) => op.grad.is_some(),
            NodeKind::Wrapper(w) => w.wrap_grad && w.source.has_grad(),
        }
    }

    /// Fixed at creation; for operators, true iff any operand requires it.
    pub fn requires_grad(&self) -> bool {
        match &*self.read_state() {
            NodeKind::Variable(v) => v.requires_grad,
            NodeKind::Operator(op) => op.requires_grad,
            NodeKind::Wrapper(w) => w.wrap_grad && w.source.requires_grad(),
        }
    }

    /// Accumulates `gx` into the node's gradient.
    ///
    /// The first call allocates a zeroed buffer from the graph pool, shaped
    /// like the node's value; later calls add in place.
    ///
    /// # Errors
    /// Returns `GraphError::IncompatibleShapes` if `gx` does not fit the
    /// gradient buffer.
    pub fn propagate_grad(&self, gx: &Matrix<T>) -> Result<(), GraphError> {
        let mut state = self.write_state();
        let (grad, value_dims) = match &mut *state {
            NodeKind::Variable(v) => (&mut v.grad, v.value.dims()),
            NodeKind::Operator(op) => {
                let dims = op.value.as_ref().map_or(gx.dims(), |v| v.dims());
                (&mut op.grad, dims)
            }
            NodeKind::Wrapper(w) => {
                return if w.wrap_grad {
                    w.source.propagate_grad(gx)
                } else {
                    Ok(())
                };
            }
        };
        match grad {
            Some(existing) => existing.add_in_place(gx),
            None => {
                let mut buffer = self.cell.pool.acquire(value_dims.0, value_dims.1);
                if let Err(err) = buffer.add_in_place(gx) {
                    self.cell.pool.release(buffer);
                    return Err(err);
                }
                *grad = Some(buffer);
                Ok(())
            }
        }
    }

    /// Drops the gradient, returning its buffer to the pool.
    pub fn zero_grad(&self) {
        let mut state = self.write_state();
        let released = match &mut *state {
            NodeKind::Variable(v) => v.grad.take(),
            NodeKind::Operator(op) => op.grad.take(),
            NodeKind::Wrapper(w) => {
                if w.wrap_grad {
                    w.source.zero_grad();
                }
                None
            }
        };
        if let Some(buffer) = released {
            self.cell.pool.release(buffer);
        }
    }

    /// The operand nodes of an operator; empty for leaves.
    pub fn operands(&self) -> Vec<Node<T>> {
        match &*self.read_state() {
            NodeKind::Operator(op) => op.operands.clone(),
            _ => Vec::new(),
        }
    }

    /// Replaces the value of a variable node, leaving its gradient untouched.
    ///
    /// # Errors
    /// Returns `GraphError::NotAVariable` for operators and wrappers.
    pub fn replace_value(&self, value: Matrix<T>) -> Result<(), GraphError> {
        match &mut *self.write_state() {
            NodeKind::Variable(v) => {
                v.value = Arc::new(value);
                Ok(())
            }
            _ => Err(GraphError::NotAVariable { node_id: self.id() }),
        }
    }

    /// Runs the operator's backward function with its accumulated gradient.
    /// No-op for leaves, for operators that do not require gradients, and for
    /// operators that received no gradient.
    pub(crate) fn backward(&self) -> Result<(), GraphError> {
        let state = self.read_state();
        let NodeKind::Operator(op) = &*state else {
            return Ok(());
        };
        if !op.requires_grad {
            return Ok(());
        }
        match (&op.grad, &op.function) {
            (Some(gy), Some(function)) => function.backward(gy, &self.cell.pool),
            _ => Ok(()),
        }
    }

    /// Computes the operator value if it is still missing.
    pub(crate) fn ensure_value(&self) -> Result<(), GraphError> {
        if self.is_operator() {
            self.try_value()?;
        }
        Ok(())
    }

    /// Releases an operator's value and gradient to the pool, keeping its
    /// function and operands.
    pub(crate) fn release_memory(&self) {
        let mut state = self.write_state();
        if let NodeKind::Operator(op) = &mut *state {
            if let Some(value) = op.value.take() {
                // Still shared with a caller: let it drop normally.
                if let Ok(matrix) = Arc::try_unwrap(value) {
                    self.cell.pool.release(matrix);
                }
            }
            if let Some(grad) = op.grad.take() {
                self.cell.pool.release(grad);
            }
        }
    }

    /// Turns an operator into an empty shell, dropping its function and
    /// operand references.
    pub(crate) fn strip_operator(&self) {
        self.release_memory();
        let mut state = self.write_state();
        if let NodeKind::Operator(op) = &mut *state {
            *op = Operator::shell();
        }
    }

    /// Overwrites every field of a pooled operator shell.
    pub(crate) fn refill_operator(&self, operator: Operator<T>) {
        *self.write_state() = NodeKind::Operator(operator);
    }

    /// True when no handle other than this one refers to the node.
    pub(crate) fn is_unshared(&self) -> bool {
        Arc::strong_count(&self.cell) == 1
    }

    fn read_state(&self) -> RwLockReadGuard<'_, NodeKind<T>> {
        self.cell.state.read().expect("Node RwLock poisoned")
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, NodeKind<T>> {
        self.cell.state.write().expect("Node RwLock poisoned")
    }
}

fn stored_value<T: DType>(kind: &NodeKind<T>) -> Option<Arc<Matrix<T>>> {
    match kind {
        NodeKind::Variable(v) => Some(Arc::clone(&v.value)),
        NodeKind::Operator(op) => op.value.clone(),
        NodeKind::Wrapper(w) => Some(w.source.value()),
    }
}

impl<T: DType> PartialEq for Node<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T: DType> Eq for Node<T> {}

impl<T: DType> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("graph", &self.graph_id())
            .field("type", &self.node_type())
            .finish()
    }
}

/// Lets a node of one graph be wrapped into another.
impl<T: DType> GradValue<T> for Node<T> {
    fn value(&self) -> Arc<Matrix<T>> {
        Node::value(self)
    }

    fn grad(&self) -> Option<Matrix<T>> {
        Node::grad(self)
    }

    fn has_grad(&self) -> bool {
        Node::has_grad(self)
    }

    fn requires_grad(&self) -> bool {
        Node::requires_grad(self)
    }

    fn propagate_grad(&self, gx: &Matrix<T>) -> Result<(), GraphError> {
        Node::propagate_grad(self, gx)
    }

    fn zero_grad(&self) {
        Node::zero_grad(self)
    }
}

/// Checks that an incoming gradient fits a value of the given node.
pub(crate) fn check_output_grad<T: DType>(
    value: &Matrix<T>,
    gy: &Matrix<T>,
) -> Result<(), GraphError> {
    check_compatible(value, gy, "output gradient").map_err(|_| GraphError::OutputGradientShape {
        expected: value.dims(),
        actual: gy.dims(),
    })
}
