//! Ordered iteration over the leaf list.

use generational_arena::Arena;

use crate::kv::{Key, Payload};
use crate::node::{Node, NodeId};

/// Walks every filled slot of every leaf, in key order.
pub struct Iter<'a, P: Payload> {
    nodes: &'a Arena<Node<P>>,
    leaf: Option<NodeId>,
    slot: usize,
}

impl<'a, P: Payload> Iter<'a, P> {
    pub(crate) fn new(nodes: &'a Arena<Node<P>>, first_leaf: NodeId) -> Self {
        Self {
            nodes,
            leaf: Some(first_leaf),
            slot: 0,
        }
    }
}

impl<'a, P: Payload> Iterator for Iter<'a, P> {
    type Item = (Key, P);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(leaf_id) = self.leaf {
            let leaf = self.nodes[leaf_id].data();
            while self.slot < leaf.data_capacity() {
                let slot = self.slot;
                self.slot += 1;
                if leaf.slots.is_filled(slot) {
                    return Some((leaf.slots.keys[slot], leaf.slots.payloads[slot]));
                }
            }
            self.leaf = leaf.next_leaf;
            self.slot = 0;
        }
        None
    }
}
