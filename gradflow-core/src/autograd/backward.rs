use std::sync::Mutex;

use log::debug;

use crate::autograd::graph::Graph;
use crate::autograd::node::{check_output_grad, Node};
use crate::error::GraphError;
use crate::mat::{DType, Matrix};

/// Options of [`Graph::backward`].
#[derive(Debug, Clone, Default)]
pub struct BackwardOptions<T> {
    output_grad: Option<Matrix<T>>,
    stop_at_time_step: Option<usize>,
}

impl<T: DType> BackwardOptions<T> {
    pub fn new() -> Self {
        BackwardOptions {
            output_grad: None,
            stop_at_time_step: None,
        }
    }

    /// Gradient seeded into the starting node. Defaults to ones shaped like
    /// its value.
    pub fn with_output_grad(mut self, gy: Matrix<T>) -> Self {
        self.output_grad = Some(gy);
        self
    }

    /// Truncated back-propagation: operators created at a time step
    /// `<= time_step` are not differentiated.
    pub fn stop_at_time_step(mut self, time_step: usize) -> Self {
        self.stop_at_time_step = Some(time_step);
        self
    }
}

impl<T: DType> Graph<T> {
    /// Back-propagates from `node` to every node it depends on.
    ///
    /// The output gradient is accumulated into `node` first, then operators
    /// are visited so that every consumer of a node runs before the node
    /// itself: in decreasing id order with a processing queue of size 1,
    /// otherwise height group by height group from `node`'s height down to
    /// 0, each group on the processing queue with a barrier between groups.
    ///
    /// Does nothing if `node` does not require gradients.
    ///
    /// # Errors
    /// `GraphError::ForeignNode` if `node` belongs to another graph or was
    /// detached by [`clear`](Graph::clear),
    /// `GraphError::OutputGradientShape` if the output gradient does not fit
    /// its value, or the first failure of a backward function. Gradients
    /// accumulated before a failure are left as they are.
    pub fn try_backward(&self, node: &Node<T>, options: BackwardOptions<T>) -> Result<(), GraphError> {
        if !self.contains(node) {
            return Err(GraphError::ForeignNode { node_id: node.id() });
        }
        if !node.requires_grad() {
            debug!("graph {:?}: node {} does not require grad, skipping backward", self.id, node.id());
            return Ok(());
        }
        self.seed_output_grad(node, options.output_grad)?;
        self.propagate(Start::Node(node), options.stop_at_time_step)
    }

    /// # Panics
    /// Panics on any failure reported by [`try_backward`](Graph::try_backward).
    pub fn backward(&self, node: &Node<T>, options: BackwardOptions<T>) {
        self.try_backward(node, options)
            .unwrap_or_else(|err| panic!("{}", err))
    }

    /// Runs the backward function of every operator in the graph, without
    /// seeding any gradient: callers propagate output gradients themselves.
    pub fn try_backward_all(&self) -> Result<(), GraphError> {
        match self.node_count().checked_sub(1) {
            Some(last_id) => self.propagate(Start::All { last_id }, None),
            None => Ok(()),
        }
    }

    /// # Panics
    /// Panics on the first backward failure.
    pub fn backward_all(&self) {
        self.try_backward_all()
            .unwrap_or_else(|err| panic!("{}", err))
    }

    fn seed_output_grad(&self, node: &Node<T>, output_grad: Option<Matrix<T>>) -> Result<(), GraphError> {
        let value = node.try_value()?;
        match output_grad {
            Some(gy) => {
                check_output_grad(&value, &gy)?;
                node.propagate_grad(&gy)
            }
            None => {
                let mut gy = self.pool.acquire_like(&value);
                gy.data_mut().iter_mut().for_each(|v| *v = T::one());
                let result = node.propagate_grad(&gy);
                self.pool.release(gy);
                result
            }
        }
    }

    fn propagate(&self, start: Start<'_, T>, stop_at_time_step: Option<usize>) -> Result<(), GraphError> {
        let queue = self.queue();
        if queue.size() == 1 {
            self.propagate_serial(start.last_id(), stop_at_time_step)
        } else {
            self.propagate_concurrent(start, stop_at_time_step)
        }
    }

    fn propagate_serial(&self, last_id: usize, stop_at_time_step: Option<usize>) -> Result<(), GraphError> {
        let nodes = self.nodes();
        debug!("graph {:?}: serial backward from node {}", self.id, last_id);
        for node in nodes[..=last_id].iter().rev() {
            // Time steps never decrease with ids.
            if stop_at_time_step.is_some_and(|stop| node.time_step() <= stop) {
                break;
            }
            node.backward()?;
        }
        Ok(())
    }

    fn propagate_concurrent(&self, start: Start<'_, T>, stop_at_time_step: Option<usize>) -> Result<(), GraphError> {
        let groups = self.group_nodes_by_height();
        let last_id = start.last_id();
        let top_group = match start {
            Start::Node(node) => self.height_of(node).unwrap_or(0),
            Start::All { .. } => groups.len().saturating_sub(1),
        };
        let queue = self.queue();
        debug!(
            "graph {:?}: concurrent backward from node {} over {} height groups",
            self.id,
            last_id,
            top_group + 1
        );
        for group in groups.iter().take(top_group + 1).rev() {
            let operators: Vec<&Node<T>> = group
                .iter()
                .filter(|node| node.is_operator() && node.id() <= last_id)
                .filter(|node| !stop_at_time_step.is_some_and(|stop| node.time_step() <= stop))
                .collect();
            let failure = Mutex::new(None);
            queue.for_each(&operators, |node| {
                if let Err(err) = node.backward() {
                    failure
                        .lock()
                        .expect("backward failure mutex poisoned")
                        .get_or_insert(err);
                }
            });
            if let Some(err) = failure.into_inner().expect("backward failure mutex poisoned") {
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Where a backward pass starts: at one node, or over the whole graph.
#[derive(Clone, Copy)]
enum Start<'a, T: DType> {
    Node(&'a Node<T>),
    All { last_id: usize },
}

impl<T: DType> Start<'_, T> {
    fn last_id(&self) -> usize {
        match self {
            Start::Node(node) => node.id(),
            Start::All { last_id } => *last_id,
        }
    }
}
