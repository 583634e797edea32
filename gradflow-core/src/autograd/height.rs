use std::sync::Arc;

use log::trace;

use crate::autograd::node::Node;
use crate::mat::DType;

/// Nodes grouped by height, index 0 first.
pub(crate) type HeightGroups<T> = Arc<Vec<Vec<Node<T>>>>;

/// Incrementally maintained topological heights.
///
/// An operator's height is one more than the highest operator among its
/// operands, or 0 when all of its operands are leaves. Leaves have height 0.
/// The cache is valid for the nodes with id `<= max_id`; nodes inserted
/// afterwards are folded in on the next call without revisiting older ones.
pub(crate) struct HeightCache<T: DType> {
    max_id: Option<usize>,
    groups: HeightGroups<T>,
    heights: Vec<usize>,
}

impl<T: DType> HeightCache<T> {
    pub(crate) fn new() -> Self {
        HeightCache {
            max_id: None,
            groups: Arc::new(Vec::new()),
            heights: Vec::new(),
        }
    }

    pub(crate) fn clear(&mut self) {
        *self = HeightCache::new();
    }

    /// Returns the grouping for `nodes`, which must be the graph's node list
    /// (node `i` has id `i`).
    ///
    /// When nothing was inserted since the last call the very same `Arc` is
    /// returned.
    pub(crate) fn group(&mut self, nodes: &[Node<T>]) -> HeightGroups<T> {
        let current_max = nodes.len().checked_sub(1);
        if self.max_id == current_max {
            return Arc::clone(&self.groups);
        }
        let start = self.max_id.map_or(0, |id| id + 1);
        trace!(
            "extending height cache from {:?} to {:?}",
            self.max_id,
            current_max
        );

        self.heights.resize(nodes.len(), 0);
        let groups = Arc::make_mut(&mut self.groups);
        for node in &nodes[start..] {
            let mut height = 0;
            for operand in node.operands() {
                if operand.is_operator() {
                    let operand_height = self.heights[operand.id()];
                    if operand_height >= height {
                        height = operand_height + 1;
                    }
                }
            }
            self.heights[node.id()] = height;
            if height == groups.len() {
                groups.push(Vec::with_capacity(1));
            }
            groups[height].push(node.clone());
        }

        self.max_id = current_max;
        Arc::clone(&self.groups)
    }

    /// Height of the node with the given id, if the cache covers it.
    pub(crate) fn height(&self, id: usize) -> Option<usize> {
        match self.max_id {
            Some(max_id) if id <= max_id => self.heights.get(id).copied(),
            _ => None,
        }
    }
}
