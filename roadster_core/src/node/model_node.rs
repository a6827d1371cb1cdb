//! Internal nodes of the RMI: a linear model over the key plus a power-of-two
//! child pointer array.

use super::NodeId;
use crate::kv::Key;
use crate::model::LinearModel;

/// A model node routes a key to one of its children by clamping the model
/// prediction into the child array. A child with duplication factor `d`
/// occupies `2^d` consecutive, aligned slots, all pointing to the same node;
/// this lets the array grow without relocating children.
pub struct ModelNode {
    pub level: i32,
    pub duplication_factor: u32,
    pub cost: f64,
    pub model: LinearModel,
    pub children: Vec<NodeId>,
}

impl ModelNode {
    pub fn new(level: i32) -> Self {
        Self {
            level,
            duplication_factor: 0,
            cost: 0.0,
            model: LinearModel::default(),
            children: Vec::new(),
        }
    }

    #[inline]
    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    /// Child bucket for `key`: model prediction clamped into the array.
    #[inline]
    pub fn bucket_for(&self, key: Key) -> usize {
        let prediction = self.model.predict(key);
        prediction.clamp(0, self.num_children() as i64 - 1) as usize
    }

    #[inline]
    pub fn child_for(&self, key: Key) -> NodeId {
        self.children[self.bucket_for(key)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_clamped_to_child_array() {
        let mut node = ModelNode::new(0);
        node.model = LinearModel::new(0.5, 0.0);
        let mut arena = generational_arena::Arena::new();
        node.children = (0..4).map(|_| arena.insert(())).collect();

        assert_eq!(node.bucket_for(-100), 0);
        assert_eq!(node.bucket_for(3), 1);
        assert_eq!(node.bucket_for(1_000_000), 3);
    }
}
