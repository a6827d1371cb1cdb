//! Fanout-tree split planner.
//!
//! To replace an overloaded leaf, candidate splits are arranged in a binary
//! tree over the leaf's key range: level l partitions the parent's model
//! output space into 2^l equal-width buckets. Every candidate is priced by
//! simulating a bulk load, levels are explored until costs turn monotonically
//! worse, and adjacent winners are merged back upwards when that pays. The
//! result is a fanout (power of two) plus a possibly-ragged list of planned
//! leaves covering the range in key order.

use crate::kv::{Key, Payload};
use crate::model::LinearModel;
use crate::node::{expected_cost_from_range, DataNode};
use crate::params::{INITIAL_DENSITY, MODEL_SIZE_WEIGHT, NODE_LOOKUPS_WEIGHT};

/// One candidate node of the fanout tree.
#[derive(Debug, Clone)]
pub(crate) struct FanoutTreeNode {
    /// Level in the fanout tree.
    pub level: usize,
    /// Position within its level.
    pub node_id: usize,
    pub cost: f64,
    /// Slot range `[left_boundary, right_boundary)` of the leaf being split.
    pub left_boundary: usize,
    pub right_boundary: usize,
    pub in_use: bool,
    pub expected_avg_search_iterations: f64,
    pub expected_avg_shifts: f64,
    pub num_keys: usize,
    /// Trained model of the candidate, reused by the real bulk load.
    pub a: f64,
    pub b: f64,
}

/// Plans the replacement of `leaf` (the child at `bucket_id` of a parent with
/// model `parent_model`). Returns the chosen fanout-tree depth — 0 means
/// resize in place — and the planned leaves sorted in key order.
pub(crate) fn find_best_fanout_existing_node<P: Payload>(
    parent_model: &LinearModel,
    leaf: &mut DataNode<P>,
    bucket_id: usize,
    total_index_keys: usize,
    max_fanout: usize,
) -> (usize, Vec<FanoutTreeNode>) {
    // sizeof(DataNode) is a stand-in for the memory cost of a planned leaf
    let node_type_size = std::mem::size_of::<DataNode<P>>() as f64;
    let pointer_size = std::mem::size_of::<usize>() as f64;

    let num_keys = leaf.num_keys;
    debug_assert!(num_keys > 0, "planning a split of an empty leaf");

    // Remap the leaf's slot group in the parent onto [0, 1).
    let repeats = 1usize << leaf.duplication_factor;
    let start_bucket_id = bucket_id - bucket_id % repeats;
    let end_bucket_id = start_bucket_id + repeats;
    let base_model = if parent_model.a == 0.0 {
        LinearModel::new(
            0.0,
            (parent_model.b - start_bucket_id as f64) / repeats as f64,
        )
    } else {
        let left_boundary_value = (start_bucket_id as f64 - parent_model.b) / parent_model.a;
        let right_boundary_value = (end_bucket_id as f64 - parent_model.b) / parent_model.a;
        let a = 1.0 / (right_boundary_value - left_boundary_value);
        LinearModel::new(a, -a * left_boundary_value)
    };

    let frac_inserts = leaf.frac_inserts();
    let mut best_level = 0;
    let mut best_cost = f64::MAX;
    let mut level_costs: Vec<f64> = Vec::new();
    let mut tree: Vec<Vec<FanoutTreeNode>> = Vec::new();

    let mut fanout = 1usize;
    let mut level = 0usize;
    while fanout <= max_fanout {
        let mut candidates = Vec::with_capacity(fanout);
        let mut cost = 0.0;
        let a = base_model.a * fanout as f64;
        let b = base_model.b * fanout as f64;
        let mut right_boundary = 0usize;
        for i in 0..fanout {
            let left_boundary = right_boundary;
            right_boundary = if i == fanout - 1 {
                leaf.data_capacity()
            } else {
                let boundary_value = ((i + 1) as f64 - b) / a;
                leaf.lower_bound(boundary_value as Key)
            };

            let range = expected_cost_from_range(
                leaf,
                left_boundary,
                right_boundary,
                INITIAL_DENSITY,
                frac_inserts,
            );
            cost += range.cost * range.num_keys as f64 / num_keys as f64;
            candidates.push(FanoutTreeNode {
                level,
                node_id: i,
                cost: range.cost,
                left_boundary,
                right_boundary,
                in_use: false,
                expected_avg_search_iterations: range.expected_avg_exp_search_iterations,
                expected_avg_shifts: range.expected_avg_shifts,
                num_keys: range.num_keys,
                a: range.model.a,
                b: range.model.b,
            });
        }

        let traversal_cost = NODE_LOOKUPS_WEIGHT
            + MODEL_SIZE_WEIGHT
                * fanout as f64
                * (node_type_size + pointer_size)
                * total_index_keys as f64
                / num_keys as f64;
        cost += traversal_cost;
        level_costs.push(cost);

        // stop once costs have been strictly increasing for three levels
        let n = level_costs.len();
        if n >= 3 && level_costs[n - 1] > level_costs[n - 2] && level_costs[n - 2] > level_costs[n - 3]
        {
            break;
        }

        if cost < best_cost {
            best_cost = cost;
            best_level = level;
        }
        tree.push(candidates);

        fanout *= 2;
        level += 1;
    }

    for candidate in &mut tree[best_level] {
        candidate.in_use = true;
    }
    merge_nodes_upwards(
        &mut tree,
        best_level,
        best_cost,
        num_keys,
        total_index_keys,
        node_type_size,
    );

    (best_level, collect_used_nodes(tree, best_level))
}

/// Collapses adjacent in-use sibling pairs into their parent while the cost
/// delta is non-negative, level by level.
fn merge_nodes_upwards(
    tree: &mut [Vec<FanoutTreeNode>],
    start_level: usize,
    mut best_cost: f64,
    num_keys: usize,
    total_index_keys: usize,
    node_type_size: f64,
) -> f64 {
    for level in (1..=start_level).rev() {
        let level_fanout = 1usize << level;
        let mut at_least_one_merge = false;
        for i in 0..level_fanout / 2 {
            if !(tree[level][2 * i].in_use && tree[level][2 * i + 1].in_use) {
                continue;
            }
            let num_node_keys = tree[level - 1][i].num_keys;
            if num_node_keys == 0 {
                tree[level][2 * i].in_use = false;
                tree[level][2 * i + 1].in_use = false;
                tree[level - 1][i].in_use = true;
                at_least_one_merge = true;
                best_cost -=
                    MODEL_SIZE_WEIGHT * node_type_size * total_index_keys as f64 / num_keys as f64;
                continue;
            }

            let num_left_keys = tree[level][2 * i].num_keys;
            let num_right_keys = tree[level][2 * i + 1].num_keys;
            let merging_cost_saving = (tree[level][2 * i].cost * num_left_keys as f64
                / num_node_keys as f64)
                + (tree[level][2 * i + 1].cost * num_right_keys as f64 / num_node_keys as f64)
                - tree[level - 1][i].cost
                + (MODEL_SIZE_WEIGHT * node_type_size * total_index_keys as f64
                    / num_node_keys as f64);

            if merging_cost_saving >= 0.0 {
                tree[level][2 * i].in_use = false;
                tree[level][2 * i + 1].in_use = false;
                tree[level - 1][i].in_use = true;
                best_cost -= merging_cost_saving * num_node_keys as f64 / num_keys as f64;
                at_least_one_merge = true;
            }
        }
        if !at_least_one_merge {
            break;
        }
    }
    best_cost
}

/// Gathers in-use nodes ordered so they form a linear sequence in key order:
/// `node_id << (max_level - node_level)` is the id a node would have at the
/// deepest level.
fn collect_used_nodes(tree: Vec<Vec<FanoutTreeNode>>, max_level: usize) -> Vec<FanoutTreeNode> {
    let max_level = max_level.min(tree.len() - 1);
    let mut used: Vec<FanoutTreeNode> = tree
        .into_iter()
        .take(max_level + 1)
        .flatten()
        .filter(|candidate| candidate.in_use)
        .collect();
    used.sort_by_key(|candidate| candidate.node_id << (max_level - candidate.level));
    used
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{DEFAULT_MAX_NODE_SIZE, MIN_DENSITY};

    fn loaded_leaf(keys: &[Key]) -> DataNode<i64> {
        let mut node: DataNode<i64> = DataNode::empty(DEFAULT_MAX_NODE_SIZE / 16);
        for &key in keys {
            loop {
                match node.insert(key, key) {
                    Ok(_) => break,
                    Err(crate::error::Error::NoInsertion) => panic!("duplicate key {key}"),
                    Err(_) => {
                        node.resize(MIN_DENSITY, true, false, false);
                        let (cost, iterations, shifts) =
                            node.compute_expected_cost(node.frac_inserts());
                        node.cost = cost;
                        node.expected_avg_exp_search_iterations = iterations;
                        node.expected_avg_shifts = shifts;
                        node.stats.reset();
                    }
                }
            }
        }
        node
    }

    /// A parent model mapping the leaf's key range onto one bucket.
    fn unit_parent_model(leaf: &DataNode<i64>) -> LinearModel {
        let span = (leaf.max_key - leaf.min_key).max(1) as f64;
        let a = 1.0 / span;
        LinearModel::new(a, -(leaf.min_key as f64) * a)
    }

    #[test]
    fn capped_planner_decides_zero_or_one() {
        let mut leaf = loaded_leaf(&(0..500).map(|i| i * 5).collect::<Vec<_>>());
        let parent_model = unit_parent_model(&leaf);
        let (depth, used) =
            find_best_fanout_existing_node(&parent_model, &mut leaf, 0, 500, 2);
        assert!(depth <= 1);
        if depth > 0 {
            assert!(!used.is_empty());
        }
    }

    #[test]
    fn planned_leaves_tile_the_slot_range() {
        let mut leaf = loaded_leaf(&(0..2000).map(|i| i * i).collect::<Vec<_>>());
        let parent_model = unit_parent_model(&leaf);
        let capacity = leaf.data_capacity();
        let num_keys = leaf.num_keys;
        let (depth, used) =
            find_best_fanout_existing_node(&parent_model, &mut leaf, 0, num_keys, 1 << 8);

        if depth == 0 {
            return;
        }
        assert!(!used.is_empty());
        assert_eq!(used.first().unwrap().left_boundary, 0);
        assert_eq!(used.last().unwrap().right_boundary, capacity);
        for pair in used.windows(2) {
            assert_eq!(pair[0].right_boundary, pair[1].left_boundary);
        }
        let covered: usize = used.iter().map(|n| n.num_keys).sum();
        assert_eq!(covered, num_keys);
        // every planned run is a power-of-two share of the deepest level
        for node in &used {
            assert!(depth >= node.level);
        }
    }

    #[test]
    fn uniform_keys_favor_flat_plans() {
        let mut leaf = loaded_leaf(&(0..400).collect::<Vec<_>>());
        let parent_model = unit_parent_model(&leaf);
        let (depth, _) =
            find_best_fanout_existing_node(&parent_model, &mut leaf, 0, 400, 1 << 8);
        // perfectly linear data never needs a deep fanout
        assert!(depth <= 2);
    }
}
