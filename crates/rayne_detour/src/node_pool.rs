//! Search nodes for the A* queries and the priority queue ordering them.

use bitflags::bitflags;
use glam::Vec3;

use crate::PolyRef;

bitflags! {
    /// Search state of a [`Node`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct NodeFlags: u8 {
        const OPEN = 0x01;
        const CLOSED = 0x02;
    }
}

/// Index of a node inside its [`NodePool`].
pub(crate) type NodeIndex = u16;

/// The largest pool a [`NodeIndex`] can address.
pub(crate) const MAX_NODES: usize = NodeIndex::MAX as usize;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Node {
    /// Position of the node, the midpoint of the edge it was entered through
    pub(crate) position: Vec3,
    /// Cost from the start to the node
    pub(crate) cost: f32,
    /// Cost plus heuristic
    pub(crate) total: f32,
    pub(crate) parent: Option<NodeIndex>,
    pub(crate) flags: NodeFlags,
    pub(crate) id: PolyRef,
}

/// A fixed capacity set of search nodes, looked up by polygon reference through a hash table.
#[derive(Debug)]
pub(crate) struct NodePool {
    nodes: Vec<Node>,
    first: Vec<Option<NodeIndex>>,
    next: Vec<Option<NodeIndex>>,
    max_nodes: usize,
}

impl NodePool {
    pub(crate) fn new(max_nodes: usize) -> Self {
        let max_nodes = max_nodes.min(MAX_NODES);
        let hash_size = (max_nodes / 4).max(1).next_power_of_two();
        Self {
            nodes: Vec::with_capacity(max_nodes),
            first: vec![None; hash_size],
            next: Vec::with_capacity(max_nodes),
            max_nodes,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.first.fill(None);
        self.next.clear();
        self.nodes.clear();
    }

    #[inline]
    fn bucket(&self, id: PolyRef) -> usize {
        hash_ref(id) as usize & (self.first.len() - 1)
    }

    pub(crate) fn find(&self, id: PolyRef) -> Option<NodeIndex> {
        let mut i = self.first[self.bucket(id)];
        while let Some(index) = i {
            if self.nodes[index as usize].id == id {
                return Some(index);
            }
            i = self.next[index as usize];
        }
        None
    }

    /// Returns the node of `id`, allocating a fresh one if needed.
    /// Returns `None` when the pool is exhausted.
    pub(crate) fn get_or_insert(&mut self, id: PolyRef) -> Option<NodeIndex> {
        if let Some(index) = self.find(id) {
            return Some(index);
        }
        if self.nodes.len() >= self.max_nodes {
            return None;
        }

        let index = self.nodes.len() as NodeIndex;
        self.nodes.push(Node {
            position: Vec3::ZERO,
            cost: 0.0,
            total: 0.0,
            parent: None,
            flags: NodeFlags::empty(),
            id,
        });
        let bucket = self.bucket(id);
        self.next.push(self.first[bucket]);
        self.first[bucket] = Some(index);
        Some(index)
    }

    #[inline]
    pub(crate) fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index as usize]
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, index: NodeIndex) -> &mut Node {
        &mut self.nodes[index as usize]
    }

    #[inline]
    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of nodes handed out since the last [`NodePool::clear`].
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// Integer hash of a polygon reference.
fn hash_ref(id: PolyRef) -> u32 {
    let mut a = id.bits();
    a = a.wrapping_add(!(a << 15));
    a ^= a >> 10;
    a = a.wrapping_add(a << 3);
    a ^= a >> 6;
    a = a.wrapping_add(!(a << 11));
    a ^= a >> 16;
    a
}

/// Binary min-heap of node indices, ordered by [`Node::total`].
///
/// Unlike [`std::collections::BinaryHeap`] it supports moving a node up after its total decreased.
#[derive(Debug, Default)]
pub(crate) struct NodeQueue {
    heap: Vec<NodeIndex>,
}

impl NodeQueue {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }

    pub(crate) fn push(&mut self, index: NodeIndex, nodes: &[Node]) {
        self.heap.push(index);
        self.bubble_up(self.heap.len() - 1, nodes);
    }

    pub(crate) fn pop(&mut self, nodes: &[Node]) -> Option<NodeIndex> {
        let last = self.heap.pop()?;
        if self.heap.is_empty() {
            return Some(last);
        }
        let top = std::mem::replace(&mut self.heap[0], last);
        self.trickle_down(0, nodes);
        Some(top)
    }

    /// Restores the heap order after the total of `index` decreased.
    pub(crate) fn modify(&mut self, index: NodeIndex, nodes: &[Node]) {
        if let Some(position) = self.heap.iter().position(|&i| i == index) {
            self.bubble_up(position, nodes);
        }
    }

    fn bubble_up(&mut self, mut position: usize, nodes: &[Node]) {
        let index = self.heap[position];
        let total = nodes[index as usize].total;
        while position > 0 {
            let parent = (position - 1) / 2;
            if nodes[self.heap[parent] as usize].total <= total {
                break;
            }
            self.heap[position] = self.heap[parent];
            position = parent;
        }
        self.heap[position] = index;
    }

    fn trickle_down(&mut self, mut position: usize, nodes: &[Node]) {
        let index = self.heap[position];
        let total = nodes[index as usize].total;
        let len = self.heap.len();
        loop {
            let mut child = position * 2 + 1;
            if child >= len {
                break;
            }
            if child + 1 < len
                && nodes[self.heap[child + 1] as usize].total < nodes[self.heap[child] as usize].total
            {
                child += 1;
            }
            if total <= nodes[self.heap[child] as usize].total {
                break;
            }
            self.heap[position] = self.heap[child];
            position = child;
        }
        self.heap[position] = index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poly_ref(poly: u32) -> PolyRef {
        PolyRef::encode(1, 0, poly).unwrap()
    }

    #[test]
    fn nodes_are_reused_per_reference() {
        let mut pool = NodePool::new(8);
        let a = pool.get_or_insert(poly_ref(1)).unwrap();
        let b = pool.get_or_insert(poly_ref(2)).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.get_or_insert(poly_ref(1)), Some(a));
        assert_eq!(pool.find(poly_ref(2)), Some(b));
        assert_eq!(pool.find(poly_ref(3)), None);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn exhausted_pool_returns_none() {
        let mut pool = NodePool::new(2);
        assert!(pool.get_or_insert(poly_ref(1)).is_some());
        assert!(pool.get_or_insert(poly_ref(2)).is_some());
        assert_eq!(pool.get_or_insert(poly_ref(3)), None);
        pool.clear();
        assert!(pool.get_or_insert(poly_ref(3)).is_some());
    }

    #[test]
    fn queue_pops_lowest_total_first() {
        let mut pool = NodePool::new(16);
        let mut queue = NodeQueue::with_capacity(16);
        for (poly, total) in [(1, 5.0), (2, 1.0), (3, 3.0), (4, 4.0), (5, 2.0)] {
            let index = pool.get_or_insert(poly_ref(poly)).unwrap();
            pool.node_mut(index).total = total;
            queue.push(index, pool.nodes());
        }

        // Decrease the total of the worst node.
        let index = pool.find(poly_ref(1)).unwrap();
        pool.node_mut(index).total = 0.5;
        queue.modify(index, pool.nodes());

        let mut order = Vec::new();
        while let Some(index) = queue.pop(pool.nodes()) {
            order.push(pool.node(index).id.poly());
        }
        assert_eq!(order, vec![1, 2, 5, 3, 4]);
    }
}
