use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::{debug, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::autograd::config::GraphConfig;
use crate::autograd::function::Function;
use crate::autograd::height::{HeightCache, HeightGroups};
use crate::autograd::node::{GradValue, Node, NodeKind, Operator, Variable, Wrapper};
use crate::autograd::processing_queue::ProcessingQueue;
use crate::error::GraphError;
use crate::mat::{DType, Matrix, MatrixPool};

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a [`Graph`], used to reject operations across graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(u64);

/// The expression graph: a DAG of variables, wrappers and operators.
///
/// Nodes are inserted one at a time and receive sequential ids starting at 0.
/// Operators run their forward computation at construction time when eager
/// execution is enabled (the default), on the graph's processing queue, so
/// that heavy kernels of independent operators built from several threads can
/// overlap.
///
/// All methods take `&self`; a graph can be shared between threads behind an
/// `Arc`. Node insertion, `clear` and `clear_for_reuse` are serialized by one
/// lock, constant memoization by another.
pub struct Graph<T: DType> {
    pub(super) id: GraphId,
    pub(super) state: Mutex<GraphState<T>>,
    constants: Mutex<HashMap<u64, Node<T>>>,
    time_step: AtomicUsize,
    eager_execution: AtomicBool,
    queue: RwLock<Arc<ProcessingQueue>>,
    pub(super) pool: Arc<MatrixPool<T>>,
    operator_shells: Mutex<Vec<Node<T>>>,
    rng: Mutex<StdRng>,
}

pub(super) struct GraphState<T: DType> {
    /// Index `i` holds the node with id `i`.
    pub(super) nodes: Vec<Node<T>>,
    pub(super) heights: HeightCache<T>,
}

impl<T: DType> Default for Graph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DType> Graph<T> {
    /// Creates an empty graph with the default [`GraphConfig`].
    pub fn new() -> Self {
        let config = GraphConfig::default();
        let size = NonZeroUsize::new(config.concurrent_computations).unwrap_or(NonZeroUsize::MIN);
        Self::build(&config, ProcessingQueue::with_size(size))
    }

    /// Creates an empty graph with the given options.
    ///
    /// # Errors
    /// Returns `GraphError::InvalidConcurrency` if
    /// `config.concurrent_computations` is zero.
    pub fn with_config(config: GraphConfig) -> Result<Self, GraphError> {
        let queue = ProcessingQueue::new(config.concurrent_computations)?;
        Ok(Self::build(&config, queue))
    }

    fn build(config: &GraphConfig, queue: ProcessingQueue) -> Self {
        Graph {
            id: GraphId(NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed)),
            state: Mutex::new(GraphState {
                nodes: Vec::new(),
                heights: HeightCache::new(),
            }),
            constants: Mutex::new(HashMap::new()),
            time_step: AtomicUsize::new(0),
            eager_execution: AtomicBool::new(config.eager_execution),
            queue: RwLock::new(Arc::new(queue)),
            pool: Arc::new(MatrixPool::new()),
            operator_shells: Mutex::new(Vec::new()),
            rng: Mutex::new(StdRng::seed_from_u64(config.rand_seed)),
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    /// The matrix pool shared by the graph's nodes.
    pub fn pool(&self) -> &Arc<MatrixPool<T>> {
        &self.pool
    }

    /// Sets whether operators compute their value during graph definition.
    /// Returns the previous setting.
    pub fn set_eager_execution(&self, value: bool) -> bool {
        self.eager_execution.swap(value, Ordering::AcqRel)
    }

    pub fn eager_execution_enabled(&self) -> bool {
        self.eager_execution.load(Ordering::Acquire)
    }

    /// Sets the maximum number of concurrent heavy computations (1 means
    /// sequential execution). Returns the previous value.
    ///
    /// # Errors
    /// Returns `GraphError::InvalidConcurrency` if `value` is zero.
    pub fn try_set_concurrent_computations(&self, value: usize) -> Result<usize, GraphError> {
        let queue = Arc::new(ProcessingQueue::new(value)?);
        let previous = mem::replace(&mut *self.queue_slot(), queue);
        debug!(
            "graph {:?}: concurrent computations {} -> {}",
            self.id,
            previous.size(),
            value
        );
        Ok(previous.size())
    }

    /// # Panics
    /// Panics if `value` is zero.
    pub fn set_concurrent_computations(&self, value: usize) -> usize {
        self.try_set_concurrent_computations(value)
            .unwrap_or_else(|err| panic!("{}", err))
    }

    pub fn concurrent_computations(&self) -> usize {
        self.queue().size()
    }

    pub(super) fn queue(&self) -> Arc<ProcessingQueue> {
        Arc::clone(&self.queue.read().expect("Graph queue RwLock poisoned"))
    }

    fn queue_slot(&self) -> std::sync::RwLockWriteGuard<'_, Arc<ProcessingQueue>> {
        self.queue.write().expect("Graph queue RwLock poisoned")
    }

    /// Runs `f` with the graph's random number generator.
    pub fn with_rand<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        let mut rng = self.rng.lock().expect("Graph rng mutex poisoned");
        f(&mut rng)
    }

    /// Replaces the random number generator with a new one seeded with `seed`.
    pub fn set_rand_seed(&self, seed: u64) {
        *self.rng.lock().expect("Graph rng mutex poisoned") = StdRng::seed_from_u64(seed);
    }

    /// Current time step, 0 for a new graph.
    pub fn time_step(&self) -> usize {
        self.time_step.load(Ordering::Acquire)
    }

    /// Advances the time step. Nodes record the time step they were created
    /// at, which truncated back-propagation uses as a cut-off.
    pub fn inc_time_step(&self) {
        self.time_step.fetch_add(1, Ordering::AcqRel);
    }

    /// Snapshot of the nodes, in id order.
    pub fn nodes(&self) -> Vec<Node<T>> {
        self.lock_state().nodes.clone()
    }

    pub fn node_count(&self) -> usize {
        self.lock_state().nodes.len()
    }

    /// Drops the gradients of every node.
    pub fn zero_grad(&self) {
        for node in self.nodes() {
            node.zero_grad();
        }
    }

    /// Inserts a variable created at the current time step, with no gradient.
    pub fn new_variable(&self, value: Matrix<T>, requires_grad: bool) -> Node<T> {
        self.insert_variable(value, requires_grad, None)
    }

    pub fn new_variable_with_name(
        &self,
        value: Matrix<T>,
        requires_grad: bool,
        name: impl Into<String>,
    ) -> Node<T> {
        self.insert_variable(value, requires_grad, Some(name.into()))
    }

    /// Inserts a scalar variable that does not require gradients.
    pub fn new_scalar(&self, value: T) -> Node<T> {
        self.new_variable(Matrix::scalar(value), false)
    }

    pub fn new_scalar_with_name(&self, value: T, name: impl Into<String>) -> Node<T> {
        self.new_variable_with_name(Matrix::scalar(value), false, name)
    }

    /// Returns a scalar node that does not require gradients, creating it on
    /// first use. Equal values share one node (`0.0` and `-0.0` included);
    /// `NaN` is never memoized.
    pub fn constant(&self, value: T) -> Node<T> {
        let mut constants = self.constants.lock().expect("Graph constants mutex poisoned");
        let key = value.constant_key();
        if let Some(node) = key.and_then(|k| constants.get(&k)) {
            trace!("constant {} found as node {}", value, node.id());
            return node.clone();
        }
        let node = self.new_scalar_with_name(value, value.to_string());
        trace!("constant {} inserted as node {}", value, node.id());
        if let Some(k) = key {
            constants.insert(k, node.clone());
        }
        node
    }

    /// Inserts an operator applying `function` to its operands.
    ///
    /// The operands are those reported by [`Function::operands`]; they must
    /// all belong to this graph. With eager execution the forward computation
    /// runs before the call returns, on the processing queue.
    ///
    /// # Errors
    /// `GraphError::CrossGraphOperand` if an operand belongs to another graph,
    /// `GraphError::ForeignNode` if an operand was detached by
    /// [`clear`](Graph::clear), or the error of the eager forward computation.
    pub fn try_new_operator<F>(&self, function: F) -> Result<Node<T>, GraphError>
    where
        F: Function<T> + 'static,
    {
        let operands = function.operands();
        if let Some(foreign) = operands.iter().find(|o| o.graph_id() != self.id) {
            return Err(GraphError::CrossGraphOperand {
                node_id: foreign.id(),
            });
        }
        if let Some(detached) = operands.iter().find(|o| !self.contains(o)) {
            return Err(GraphError::ForeignNode {
                node_id: detached.id(),
            });
        }
        let function: Arc<dyn Function<T>> = Arc::new(function);
        let value = if self.eager_execution_enabled() {
            // Outside the graph lock, so it can overlap with other insertions.
            let value = self.queue().run(|| function.forward(&self.pool))?;
            Some(Arc::new(value))
        } else {
            None
        };
        let requires_grad = operands.iter().any(Node::requires_grad);
        let operator = Operator {
            function: Some(function),
            operands,
            value,
            grad: None,
            requires_grad,
            time_step: self.time_step(),
        };
        let node = self.operator_shell(operator);
        Ok(self.insert(node))
    }

    /// Inserts an operator applying `function` to its operands.
    ///
    /// # Panics
    /// Panics if an operand belongs to another graph or was detached by
    /// `clear`, or if the eager forward computation fails (e.g. incompatible
    /// matrix sizes).
    pub fn new_operator<F>(&self, function: F) -> Node<T>
    where
        F: Function<T> + 'static,
    {
        self.try_new_operator(function)
            .unwrap_or_else(|err| panic!("{}", err))
    }

    /// Wraps an external value; gradients flow back to it.
    pub fn new_wrap<V>(&self, value: V) -> Node<T>
    where
        V: GradValue<T> + 'static,
    {
        self.insert_wrapper(Arc::new(value), true)
    }

    /// Wraps an external value without differentiating through it.
    pub fn new_wrap_no_grad<V>(&self, value: V) -> Node<T>
    where
        V: GradValue<T> + 'static,
    {
        self.insert_wrapper(Arc::new(value), false)
    }

    /// Computes every operator value that is still missing: after
    /// `clear_for_reuse`, or when eager execution is disabled.
    ///
    /// With a processing queue of size 1 operators run in id order; otherwise
    /// height groups run one after the other, each group concurrently.
    ///
    /// # Errors
    /// Returns the first forward failure.
    pub fn try_forward(&self) -> Result<(), GraphError> {
        let queue = self.queue();
        if queue.size() == 1 {
            debug!("graph {:?}: sequential forward", self.id);
            for node in self.nodes() {
                node.ensure_value()?;
            }
            return Ok(());
        }
        let groups = self.group_nodes_by_height();
        debug!(
            "graph {:?}: concurrent forward over {} height groups",
            self.id,
            groups.len()
        );
        for group in groups.iter() {
            let failure = Mutex::new(None);
            queue.for_each(group, |node| {
                if let Err(err) = node.ensure_value() {
                    failure.lock().expect("forward failure mutex poisoned").get_or_insert(err);
                }
            });
            if let Some(err) = failure.into_inner().expect("forward failure mutex poisoned") {
                return Err(err);
            }
        }
        Ok(())
    }

    /// # Panics
    /// Panics on the first forward failure.
    pub fn forward(&self) {
        self.try_forward().unwrap_or_else(|err| panic!("{}", err))
    }

    /// Detaches every node, resets ids and the time step, releases operator
    /// values and gradients to the pool and parks operator nodes for reuse.
    ///
    /// Handles to the old nodes stay readable but hold no operator values.
    pub fn clear(&self) {
        // Same lock order as `constant`: constants, then state.
        let mut constants = self.constants.lock().expect("Graph constants mutex poisoned");
        let mut state = self.lock_state();
        self.time_step.store(0, Ordering::Release);
        if state.nodes.is_empty() {
            return;
        }
        constants.clear();
        state.heights.clear();
        let nodes = mem::take(&mut state.nodes);
        let mut shells = self.operator_shells.lock().expect("Graph shells mutex poisoned");
        let count = nodes.len();
        for node in nodes {
            if node.is_operator() {
                node.strip_operator();
                shells.push(node);
            }
        }
        debug!(
            "graph {:?}: cleared {} nodes, {} operator shells pooled",
            self.id,
            count,
            shells.len()
        );
    }

    /// Releases operator values and gradients like [`clear`](Graph::clear)
    /// but keeps every node and its wiring, so the same structure can be
    /// evaluated again with [`forward`](Graph::forward).
    pub fn clear_for_reuse(&self) {
        let state = self.lock_state();
        for node in &state.nodes {
            node.release_memory();
        }
        debug!(
            "graph {:?}: released memory of {} nodes for reuse",
            self.id,
            state.nodes.len()
        );
    }

    /// Groups the nodes by topological height; index 0 holds the leaves and
    /// the operators depending only on leaves.
    ///
    /// The grouping is cached: without insertions in between, two calls
    /// return the same `Arc`. New nodes are folded into the cached grouping
    /// without recomputing older heights.
    pub(crate) fn group_nodes_by_height(&self) -> HeightGroups<T> {
        let mut state = self.lock_state();
        let GraphState { nodes, heights } = &mut *state;
        heights.group(nodes)
    }

    /// Height of `node`, computing pending heights first.
    pub(crate) fn height_of(&self, node: &Node<T>) -> Option<usize> {
        let mut state = self.lock_state();
        let GraphState { nodes, heights } = &mut *state;
        heights.group(nodes);
        heights.height(node.id())
    }

    /// True if `node` is currently one of this graph's nodes. Handles kept
    /// from before a `clear` are not.
    pub(crate) fn contains(&self, node: &Node<T>) -> bool {
        node.graph_id() == self.id && self.lock_state().nodes.get(node.id()) == Some(node)
    }

    pub(super) fn lock_state(&self) -> MutexGuard<'_, GraphState<T>> {
        self.state.lock().expect("Graph state mutex poisoned")
    }

    fn insert_variable(&self, value: Matrix<T>, requires_grad: bool, name: Option<String>) -> Node<T> {
        let kind = NodeKind::Variable(Variable {
            value: Arc::new(value),
            grad: None,
            requires_grad,
            name,
            time_step: self.time_step(),
        });
        self.insert(Node::new(self.id, Arc::clone(&self.pool), kind))
    }

    fn insert_wrapper(&self, source: Arc<dyn GradValue<T>>, wrap_grad: bool) -> Node<T> {
        let kind = NodeKind::Wrapper(Wrapper {
            source,
            wrap_grad,
            time_step: self.time_step(),
        });
        self.insert(Node::new(self.id, Arc::clone(&self.pool), kind))
    }

    /// Takes a parked operator node and overwrites it, or allocates a new one.
    fn operator_shell(&self, operator: Operator<T>) -> Node<T> {
        let mut shells = self.operator_shells.lock().expect("Graph shells mutex poisoned");
        while let Some(shell) = shells.pop() {
            if shell.is_unshared() {
                trace!("reusing operator shell (former id {})", shell.id());
                shell.refill_operator(operator);
                return shell;
            }
            warn!(
                "discarding operator shell {}: a handle from before clear() is still alive",
                shell.id()
            );
        }
        drop(shells);
        Node::new(self.id, Arc::clone(&self.pool), NodeKind::Operator(operator))
    }

    /// Assigns the next id and appends the node.
    fn insert(&self, node: Node<T>) -> Node<T> {
        let mut state = self.lock_state();
        node.set_id(state.nodes.len());
        state.nodes.push(node.clone());
        node
    }
}

impl<T: DType> fmt::Debug for Graph<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("nodes", &self.node_count())
            .field("time_step", &self.time_step())
            .field("eager_execution", &self.eager_execution_enabled())
            .field("concurrent_computations", &self.concurrent_computations())
            .finish()
    }
}

/// A graph is runtime state only: it serializes to a unit value, so that a
/// model embedding one can be persisted without it.
impl<T: DType> Serialize for Graph<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_unit()
    }
}

/// Ignores whatever was stored and yields a fresh, empty graph.
impl<'de, T: DType> Deserialize<'de> for Graph<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        IgnoredAny::deserialize(deserializer)?;
        Ok(Graph::new())
    }
}

#[cfg(test)]
#[path = "graph_test.rs"]
mod tests;
