//! Node pool and open list used by the graph searches
//!
//! The pool maps polygon references to search nodes through a fixed-size
//! hash table; it never grows past the capacity it was created with, which
//! is what bounds a search. The queue is a binary heap of node indices
//! ordered by total cost, breaking ties in favour of the most recent push.

use super::{PolyRef, Result};
use divert_common::next_pow2;

bitflags::bitflags! {
    /// Node flags for search state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        const OPEN = 0x01;
        const CLOSED = 0x02;
    }
}

/// Node index type
pub type NodeIndex = u16;

/// Largest pool a query may request; the last index is reserved
pub const MAX_NODE_POOL_SIZE: usize = NodeIndex::MAX as usize;

/// Node in the search graph
#[derive(Debug, Clone)]
pub struct Node {
    /// Position the node was entered at
    pub pos: [f32; 3],
    /// Cost from the start to this node
    pub cost: f32,
    /// Cost plus heuristic
    pub total: f32,
    /// Parent node
    pub parent: Option<NodeIndex>,
    /// Node flags
    pub flags: NodeFlags,
    /// Polygon the node corresponds to
    pub id: PolyRef,
}

impl Node {
    fn new(id: PolyRef) -> Self {
        Self {
            pos: [0.0; 3],
            cost: 0.0,
            total: 0.0,
            parent: None,
            flags: NodeFlags::empty(),
            id,
        }
    }

    /// True until the node has been placed on the open list once
    pub fn is_new(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Fixed-capacity hash pool of search nodes
#[derive(Debug)]
pub struct NodePool {
    nodes: Vec<Node>,
    first: Vec<Option<NodeIndex>>,
    next: Vec<Option<NodeIndex>>,
    max_nodes: usize,
    hash_mask: usize,
}

impl NodePool {
    /// Creates a pool holding at most `max_nodes` nodes
    pub fn new(max_nodes: usize) -> Result<Self> {
        let hash_size = next_pow2((max_nodes / 4).max(1) as u32) as usize;

        let mut nodes = Vec::new();
        nodes.try_reserve_exact(max_nodes)?;
        let mut first = Vec::new();
        first.try_reserve_exact(hash_size)?;
        first.resize(hash_size, None);
        let mut next = Vec::new();
        next.try_reserve_exact(max_nodes)?;

        Ok(Self {
            nodes,
            first,
            next,
            max_nodes,
            hash_mask: hash_size - 1,
        })
    }

    /// Forgets every node
    pub fn clear(&mut self) {
        self.first.fill(None);
        self.next.clear();
        self.nodes.clear();
    }

    /// Returns the node for `id`, allocating it if needed
    ///
    /// `None` means the pool is exhausted.
    pub fn get_node(&mut self, id: PolyRef) -> Option<NodeIndex> {
        if let Some(idx) = self.find_node(id) {
            return Some(idx);
        }
        if self.nodes.len() >= self.max_nodes {
            return None;
        }

        let idx = self.nodes.len() as NodeIndex;
        let bucket = hash_ref(id) & self.hash_mask;
        self.nodes.push(Node::new(id));
        self.next.push(self.first[bucket]);
        self.first[bucket] = Some(idx);
        Some(idx)
    }

    /// Looks up an existing node
    pub fn find_node(&self, id: PolyRef) -> Option<NodeIndex> {
        let mut cur = self.first[hash_ref(id) & self.hash_mask];
        while let Some(idx) = cur {
            if self.nodes[idx as usize].id == id {
                return Some(idx);
            }
            cur = self.next[idx as usize];
        }
        None
    }

    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx as usize]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
        &mut self.nodes[idx as usize]
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Integer hash of a polygon reference
fn hash_ref(id: PolyRef) -> usize {
    let mut a = id.id();
    a = a.wrapping_add(!(a << 15));
    a ^= a >> 10;
    a = a.wrapping_add(a << 3);
    a ^= a >> 6;
    a = a.wrapping_add(!(a << 11));
    a ^= a >> 16;
    a as usize
}

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    node: NodeIndex,
    total: f32,
    seq: u64,
}

impl QueueEntry {
    /// Heap order: lower total first, later push first on ties
    fn before(&self, other: &QueueEntry) -> bool {
        self.total < other.total || (self.total == other.total && self.seq > other.seq)
    }
}

/// Heap slot marker for nodes not in the queue
const NOT_QUEUED: usize = usize::MAX;

/// Open list of a search
#[derive(Debug)]
pub struct NodeQueue {
    heap: Vec<QueueEntry>,
    /// Heap slot of each node index
    slots: Vec<usize>,
    capacity: usize,
    seq: u64,
}

impl NodeQueue {
    /// Creates a queue holding at most `capacity` entries
    pub fn new(capacity: usize) -> Result<Self> {
        let mut heap = Vec::new();
        heap.try_reserve_exact(capacity)?;
        Ok(Self {
            heap,
            slots: Vec::new(),
            capacity,
            seq: 0,
        })
    }

    pub fn clear(&mut self) {
        for entry in &self.heap {
            self.slots[entry.node as usize] = NOT_QUEUED;
        }
        self.heap.clear();
        self.seq = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Node with the lowest total cost
    pub fn top(&self) -> Option<NodeIndex> {
        self.heap.first().map(|e| e.node)
    }

    /// Removes and returns the node with the lowest total cost
    pub fn pop(&mut self) -> Option<NodeIndex> {
        if self.heap.is_empty() {
            return None;
        }
        let top = self.heap.swap_remove(0);
        self.slots[top.node as usize] = NOT_QUEUED;
        if let Some(moved) = self.heap.first() {
            self.slots[moved.node as usize] = 0;
            self.trickle_down(0);
        }
        Some(top.node)
    }

    /// Adds a node; ignored once the queue is at capacity
    pub fn push(&mut self, node: NodeIndex, total: f32) {
        if self.heap.len() >= self.capacity {
            return;
        }
        let idx = node as usize;
        if self.slots.len() <= idx {
            self.slots.resize(idx + 1, NOT_QUEUED);
        }
        self.seq += 1;
        self.heap.push(QueueEntry {
            node,
            total,
            seq: self.seq,
        });
        let last = self.heap.len() - 1;
        self.slots[idx] = last;
        self.bubble_up(last);
    }

    /// Re-sorts a node whose total cost changed; counts as a fresh push
    pub fn modify(&mut self, node: NodeIndex, total: f32) {
        let Some(i) = self.slots.get(node as usize).copied().filter(|&i| i != NOT_QUEUED) else {
            return;
        };
        self.seq += 1;
        self.heap[i].total = total;
        self.heap[i].seq = self.seq;
        self.bubble_up(i);
        self.trickle_down(self.slots[node as usize]);
    }

    fn swap_entries(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.slots[self.heap[a].node as usize] = a;
        self.slots[self.heap[b].node as usize] = b;
    }

    fn bubble_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[i].before(&self.heap[parent]) {
                self.swap_entries(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn trickle_down(&mut self, mut i: usize) {
        let len = self.heap.len();
        loop {
            let left = i * 2 + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.heap[right].before(&self.heap[left]) {
                right
            } else {
                left
            };
            if self.heap[child].before(&self.heap[i]) {
                self.swap_entries(i, child);
                i = child;
            } else {
                break;
            }
        }
    }
}
