//! The updatable learned index: a recursive model index whose leaves are
//! gapped arrays, with an adaptation controller that resizes, splits sideways
//! or downwards, and expands the root domain as the key distribution drifts.

use generational_arena::Arena;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::fanout::{find_best_fanout_existing_node, FanoutTreeNode};
use crate::iter::Iter;
use crate::kv::{Key, Payload, END_SENTINEL, MAX_KEY, MIN_KEY};
use crate::model::LinearModel;
use crate::node::{DataNode, ModelNode, Node, NodeId};
use crate::params::{
    IndexConfig, SplittingPolicy, MAX_OUT_OF_DOMAIN_KEYS, MIN_DENSITY, MIN_OUT_OF_DOMAIN_KEYS,
    OUT_OF_DOMAIN_TOLERANCE_FACTOR,
};

/// Bound on a single root-expansion step. Expansion repeats, doubling the
/// covered interval each step, until the offending key fits, so the bound
/// limits allocation per step without limiting reach.
const MAX_EXPANSION_FACTOR_PER_STEP: usize = 1 << 10;

/// `Key::div_ceil` equivalent for strictly positive operands (the signed
/// `div_ceil` on integer primitives is still behind the unstable
/// `int_roundings` feature).
fn div_ceil_positive(a: Key, b: Key) -> Key {
    (a + b - 1) / b
}

/// Operation counters of the whole index.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexStats {
    pub num_keys: usize,
    pub num_data_nodes: usize,
    pub num_model_nodes: usize,
    pub num_inserts: u64,
    pub num_lookups: u64,
    pub num_node_lookups: u64,
    pub num_expand_and_retrains: u64,
    pub num_downward_splits: u64,
    pub num_sideways_splits: u64,
    pub num_model_node_expansions: u64,
}

/// One step of the root-to-leaf descent: a model node and the bucket taken.
#[derive(Debug, Clone, Copy)]
struct TraversalFrame {
    node: NodeId,
    bucket: usize,
}

/// An updatable learned index over `i64` keys with payloads of type `P`.
///
/// Lookups descend the model hierarchy, predict a slot in the target leaf,
/// and finish with exponential search. Inserts fill a gap or shift a short
/// run; when a leaf refuses an insert, the controller resizes or splits it
/// and retries.
pub struct Index<P: Payload> {
    nodes: Arena<Node<P>>,
    /// Fanout-1 model node above the true root, so the root is uniformly a
    /// child of something.
    super_root: NodeId,
    root: NodeId,

    expected_insert_frac: f64,
    splitting_policy: SplittingPolicy,
    max_fanout: usize,
    max_data_node_slots: usize,

    key_domain_min: Key,
    key_domain_max: Key,
    num_keys_above_key_domain: usize,
    num_keys_below_key_domain: usize,
    num_keys_at_last_right_domain_resize: usize,
    num_keys_at_last_left_domain_resize: usize,

    num_keys: usize,
    stats: IndexStats,
}

impl<P: Payload> Index<P> {
    /// An empty index: one empty leaf under the super-root.
    pub fn new() -> Self {
        Self::with_config(IndexConfig::default())
    }

    pub fn with_config(config: IndexConfig) -> Self {
        let max_fanout = config.max_fanout();
        let max_data_node_slots = config.max_data_node_slots(std::mem::size_of::<P>());

        let mut nodes = Arena::new();
        let root = nodes.insert(Node::Data(DataNode::empty(max_data_node_slots)));
        let mut super_root_node = ModelNode::new(-1);
        super_root_node.children = vec![root];
        let super_root = nodes.insert(Node::Model(super_root_node));

        Self {
            nodes,
            super_root,
            root,
            expected_insert_frac: config.expected_insert_frac,
            splitting_policy: config.splitting_policy,
            max_fanout,
            max_data_node_slots,
            key_domain_min: MAX_KEY,
            key_domain_max: MIN_KEY,
            num_keys_above_key_domain: 0,
            num_keys_below_key_domain: 0,
            num_keys_at_last_right_domain_resize: 0,
            num_keys_at_last_left_domain_resize: 0,
            num_keys: 0,
            stats: IndexStats {
                num_data_nodes: 1,
                ..IndexStats::default()
            },
        }
    }

    pub fn len(&self) -> usize {
        self.num_keys
    }

    pub fn is_empty(&self) -> bool {
        self.num_keys == 0
    }

    pub fn stats(&self) -> IndexStats {
        let mut stats = self.stats;
        stats.num_keys = self.num_keys;
        stats
    }

    /// The key interval the root model is trained over.
    pub fn key_domain(&self) -> (Key, Key) {
        (self.key_domain_min, self.key_domain_max)
    }

    /// Smallest key in the index.
    pub fn get_min_key(&self) -> Option<Key> {
        let mut leaf_id = Some(self.first_data_node());
        while let Some(id) = leaf_id {
            let leaf = self.nodes[id].data();
            if leaf.num_keys > 0 {
                return Some(leaf.first_key());
            }
            leaf_id = leaf.next_leaf;
        }
        None
    }

    /// Largest key in the index.
    pub fn get_max_key(&self) -> Option<Key> {
        let mut leaf_id = Some(self.last_data_node());
        while let Some(id) = leaf_id {
            let leaf = self.nodes[id].data();
            if leaf.num_keys > 0 {
                return Some(leaf.last_key());
            }
            leaf_id = leaf.prev_leaf;
        }
        None
    }

    /// Walks every key in ascending order via the leaf list.
    pub fn iter(&self) -> Iter<'_, P> {
        Iter::new(&self.nodes, self.first_data_node())
    }

    /// Exact-match lookup.
    pub fn find(&mut self, key: Key) -> Option<P> {
        self.stats.num_lookups += 1;
        let (leaf_id, _) = self.get_leaf(key, false);
        let leaf = self.nodes[leaf_id].data_mut();
        match leaf.find_key_position(key) {
            Ok(position) => Some(leaf.slots.payloads[position]),
            Err(_) => None,
        }
    }

    /// Inserts a key/payload pair. Duplicate keys (and the reserved sentinel
    /// key) are rejected with [`Error::NoInsertion`]; structural refusals
    /// from the leaf are handled internally by adaptation and retry.
    pub fn insert(&mut self, key: Key, payload: P) -> Result<()> {
        if key == END_SENTINEL {
            return Err(Error::NoInsertion);
        }

        if key > self.key_domain_max {
            self.num_keys_above_key_domain += 1;
            if self.nodes[self.root].is_leaf() {
                if self.should_promote_leaf_root(key) {
                    self.promote_leaf_root(key);
                }
            } else if self.should_expand_right() {
                self.expand_root(key, false);
            }
        } else if key < self.key_domain_min {
            self.num_keys_below_key_domain += 1;
            if self.nodes[self.root].is_leaf() {
                if self.should_promote_leaf_root(key) {
                    self.promote_leaf_root(key);
                }
            } else if self.should_expand_left() {
                self.expand_root(key, true);
            }
        }

        let (leaf_id, _) = self.get_leaf(key, false);
        match self.nodes[leaf_id].data_mut().insert(key, payload) {
            Ok(_) => {}
            Err(Error::NoInsertion) => return Err(Error::NoInsertion),
            Err(first_error) => self.adapt_and_insert(key, payload, first_error)?,
        }

        self.num_keys += 1;
        self.stats.num_inserts += 1;
        // While the root is still a leaf, the trained domain mirrors its key
        // bounds so out-of-domain tracking has a reference interval.
        if let Node::Data(root_leaf) = &self.nodes[self.root] {
            self.key_domain_min = root_leaf.min_key;
            self.key_domain_max = root_leaf.max_key;
        }
        Ok(())
    }

    /// Insert-failure path: resize or split the refusing leaf per the
    /// planner, then retry until the insert lands or turns out to be a
    /// duplicate.
    fn adapt_and_insert(&mut self, key: Key, payload: P, first_error: Error) -> Result<()> {
        let (mut leaf_id, path) = self.get_leaf(key, true);
        let frame = *path.last().expect("traversal path always has a frame");
        let mut parent_id = frame.node;
        let mut bucket_id = frame.bucket;
        let mut error = first_error;

        loop {
            if parent_id == self.super_root {
                self.update_super_root_key_domain();
            }

            let mut fanout_tree_depth = 1;
            let mut used_fanout_tree: Vec<FanoutTreeNode> = Vec::new();
            let skip_planner = self.splitting_policy == SplittingPolicy::AlwaysSplitInTwo
                || matches!(error, Error::MaxCapacity | Error::CatastrophicCost);
            if !skip_planner {
                let planner_max_fanout = match self.splitting_policy {
                    SplittingPolicy::DecideBetweenNoSplittingOrSplittingInTwo => 2,
                    SplittingPolicy::UseFullFanoutTree => self.max_fanout,
                    SplittingPolicy::AlwaysSplitInTwo => unreachable!(),
                };
                let parent_model = *self.nodes[parent_id].model();
                let total_keys = self.num_keys;
                let leaf = self.nodes[leaf_id].data_mut();
                let (depth, used) = find_best_fanout_existing_node(
                    &parent_model,
                    leaf,
                    bucket_id,
                    total_keys,
                    planner_max_fanout,
                );
                fanout_tree_depth = depth;
                used_fanout_tree = used;
            }

            if fanout_tree_depth == 0 {
                // no split: expand in place and retrain
                let plan = &used_fanout_tree[0];
                let leaf = self.nodes[leaf_id].data_mut();
                let keep_left = leaf.is_append_mostly_right();
                let keep_right = leaf.is_append_mostly_left();
                leaf.resize(MIN_DENSITY, true, keep_left, keep_right);
                leaf.cost = plan.cost;
                leaf.expected_avg_exp_search_iterations = plan.expected_avg_search_iterations;
                leaf.expected_avg_shifts = plan.expected_avg_shifts;
                leaf.stats.reset();
                self.stats.num_expand_and_retrains += 1;
                trace!(keys = self.nodes[leaf_id].data().num_keys, "expanded and retrained leaf");
            } else {
                let best_fanout = 1usize << fanout_tree_depth;
                let reuse_model = error == Error::MaxCapacity;
                let leaf_repeats = 1usize << self.nodes[leaf_id].duplication_factor();
                let parent_num_children = self.nodes[parent_id].model_node().num_children();
                let split_downwards = parent_num_children * best_fanout / leaf_repeats
                    > self.max_fanout
                    || parent_id == self.super_root;

                if split_downwards {
                    parent_id = self.split_downwards(
                        parent_id,
                        bucket_id,
                        fanout_tree_depth,
                        &mut used_fanout_tree,
                        reuse_model,
                    );
                } else {
                    self.split_sideways(
                        parent_id,
                        bucket_id,
                        fanout_tree_depth,
                        &mut used_fanout_tree,
                        reuse_model,
                    );
                }

                let parent = self.nodes[parent_id].model_node();
                bucket_id = parent.bucket_for(key);
                leaf_id = parent.children[bucket_id];
            }

            match self.nodes[leaf_id].data_mut().insert(key, payload) {
                Ok(_) => return Ok(()),
                Err(Error::NoInsertion) => return Err(Error::NoInsertion),
                Err(retry_error) => error = retry_error,
            }
        }
    }

    // ------------------------------------------------------------------
    // Descent
    // ------------------------------------------------------------------

    fn first_data_node(&self) -> NodeId {
        let mut current = self.root;
        while let Node::Model(model_node) = &self.nodes[current] {
            current = model_node.children[0];
        }
        current
    }

    fn last_data_node(&self) -> NodeId {
        let mut current = self.root;
        while let Node::Model(model_node) = &self.nodes[current] {
            current = *model_node.children.last().expect("model node has children");
        }
        current
    }

    /// Descends to the leaf responsible for `key`. A prediction within float
    /// tolerance of a bucket boundary is checked against the neighboring
    /// leaves; when the neighbor wins, the traversal path is corrected to
    /// match.
    fn get_leaf(&mut self, key: Key, build_traversal_path: bool) -> (NodeId, Vec<TraversalFrame>) {
        let mut path = Vec::new();
        if build_traversal_path {
            path.push(TraversalFrame {
                node: self.super_root,
                bucket: 0,
            });
        }

        if self.nodes[self.root].is_leaf() {
            return (self.root, path);
        }

        let mut current = self.root;
        loop {
            let model_node = self.nodes[current].model_node();
            let bucket_prediction = model_node.model.predict_double(key);
            let bucket = (bucket_prediction as i64).clamp(0, model_node.num_children() as i64 - 1)
                as usize;
            let child = model_node.children[bucket];
            if build_traversal_path {
                path.push(TraversalFrame {
                    node: current,
                    bucket,
                });
            }

            if !self.nodes[child].is_leaf() {
                current = child;
                continue;
            }

            self.stats.num_node_lookups += self.nodes[child].level().max(0) as u64;

            let rounded = (bucket_prediction + 0.5) as i64 as f64;
            let tolerance = 10.0 * f64::EPSILON * bucket_prediction;
            if (bucket_prediction - rounded).abs() <= tolerance {
                if rounded <= bucket_prediction {
                    if let Some(prev_id) = self.nodes[child].data().prev_leaf {
                        if self.nodes[prev_id].data().last_key() >= key {
                            if build_traversal_path {
                                self.correct_traversal_path(child, &mut path, true);
                            }
                            return (prev_id, path);
                        }
                    }
                } else if let Some(next_id) = self.nodes[child].data().next_leaf {
                    if self.nodes[next_id].data().first_key() <= key {
                        if build_traversal_path {
                            self.correct_traversal_path(child, &mut path, false);
                        }
                        return (next_id, path);
                    }
                }
            }
            return (child, path);
        }
    }

    /// Repoints the traversal path at the leaf to the left or right of the
    /// one it currently ends at: pop frames while the current slot group sits
    /// at the edge of its parent, step the bucket, then descend along the
    /// facing edge.
    fn correct_traversal_path(&self, leaf: NodeId, path: &mut Vec<TraversalFrame>, left: bool) {
        let mut repeats = 1usize << self.nodes[leaf].duplication_factor();
        if left {
            let mut frame = *path.last().expect("path has a frame");
            let mut start_bucket = frame.bucket - frame.bucket % repeats;
            if start_bucket == 0 {
                while start_bucket == 0 {
                    let popped = path.pop().expect("left neighbor exists on the path");
                    repeats = 1usize << self.nodes[popped.node].duplication_factor();
                    frame = *path.last().expect("left neighbor exists on the path");
                    start_bucket = frame.bucket - frame.bucket % repeats;
                }
                let correct_bucket = start_bucket - 1;
                path.last_mut().unwrap().bucket = correct_bucket;

                let mut current = self.nodes[frame.node].model_node().children[correct_bucket];
                while !self.nodes[current].is_leaf() {
                    let last_child = self.nodes[current].model_node().num_children() - 1;
                    path.push(TraversalFrame {
                        node: current,
                        bucket: last_child,
                    });
                    current = self.nodes[current].model_node().children[last_child];
                }
                debug_assert_eq!(Some(current), self.nodes[leaf].data().prev_leaf);
            } else {
                path.last_mut().unwrap().bucket = start_bucket - 1;
            }
        } else {
            let mut frame = *path.last().expect("path has a frame");
            let mut end_bucket = frame.bucket - frame.bucket % repeats + repeats;
            if end_bucket == self.nodes[frame.node].model_node().num_children() {
                while end_bucket == self.nodes[frame.node].model_node().num_children() {
                    let popped = path.pop().expect("right neighbor exists on the path");
                    repeats = 1usize << self.nodes[popped.node].duplication_factor();
                    frame = *path.last().expect("right neighbor exists on the path");
                    end_bucket = frame.bucket - frame.bucket % repeats + repeats;
                }
                path.last_mut().unwrap().bucket = end_bucket;

                let mut current = self.nodes[frame.node].model_node().children[end_bucket];
                while !self.nodes[current].is_leaf() {
                    path.push(TraversalFrame {
                        node: current,
                        bucket: 0,
                    });
                    current = self.nodes[current].model_node().children[0];
                }
                debug_assert_eq!(Some(current), self.nodes[leaf].data().next_leaf);
            } else {
                path.last_mut().unwrap().bucket = end_bucket;
            }
        }
    }

    // ------------------------------------------------------------------
    // Root domain
    // ------------------------------------------------------------------

    fn should_expand_right(&self) -> bool {
        if self.nodes[self.root].is_leaf() {
            return false;
        }
        let above = self.num_keys_above_key_domain;
        let growth =
            self.num_keys as f64 / self.num_keys_at_last_right_domain_resize as f64 - 1.0;
        let soft = above >= MIN_OUT_OF_DOMAIN_KEYS
            && above as f64 >= OUT_OF_DOMAIN_TOLERANCE_FACTOR * growth;
        soft || above >= MAX_OUT_OF_DOMAIN_KEYS
    }

    fn should_expand_left(&self) -> bool {
        if self.nodes[self.root].is_leaf() {
            return false;
        }
        let below = self.num_keys_below_key_domain;
        let growth = self.num_keys as f64 / self.num_keys_at_last_left_domain_resize as f64 - 1.0;
        let soft = below >= MIN_OUT_OF_DOMAIN_KEYS
            && below as f64 >= OUT_OF_DOMAIN_TOLERANCE_FACTOR * growth;
        soft || below >= MAX_OUT_OF_DOMAIN_KEYS
    }

    /// A leaf root absorbs nearby out-of-domain keys by resizing, but a key
    /// far outside the mirrored domain would wreck its model. Promote instead.
    fn should_promote_leaf_root(&self, key: Key) -> bool {
        let root = match &self.nodes[self.root] {
            Node::Data(data_node) => data_node,
            Node::Model(_) => return false,
        };
        if root.num_keys == 0 {
            return false;
        }
        let span = self.key_domain_max.saturating_sub(self.key_domain_min).max(1);
        let distance = if key > self.key_domain_max {
            key.saturating_sub(self.key_domain_max)
        } else {
            self.key_domain_min.saturating_sub(key)
        };
        distance as f64 > OUT_OF_DOMAIN_TOLERANCE_FACTOR * span as f64
    }

    /// Replaces the leaf root with a model root whose domain covers both the
    /// stored keys and the far-away `key`; descent then routes the insert
    /// into the matching half.
    fn promote_leaf_root(&mut self, key: Key) {
        let (leaf_min, leaf_max) = {
            let root = self.nodes[self.root].data();
            (root.min_key, root.max_key)
        };
        self.key_domain_min = leaf_min.min(key);
        self.key_domain_max = leaf_max.max(key);
        self.num_keys_above_key_domain = 0;
        self.num_keys_below_key_domain = 0;
        self.num_keys_at_last_right_domain_resize = self.num_keys;
        self.num_keys_at_last_left_domain_resize = self.num_keys;
        self.retrain_super_root_model();

        debug!(
            domain_min = self.key_domain_min,
            domain_max = self.key_domain_max,
            "promoting leaf root to cover far out-of-domain key"
        );
        let mut used_fanout_tree = Vec::new();
        self.split_downwards(self.super_root, 0, 1, &mut used_fanout_tree, false);
    }

    /// Retrains the super-root model onto the current key domain and resets
    /// the out-of-domain accounting.
    fn update_super_root_key_domain(&mut self) {
        self.key_domain_min = self.get_min_key().unwrap_or(MAX_KEY);
        self.key_domain_max = self.get_max_key().unwrap_or(MIN_KEY);
        self.num_keys_at_last_right_domain_resize = self.num_keys;
        self.num_keys_at_last_left_domain_resize = self.num_keys;
        self.num_keys_above_key_domain = 0;
        self.num_keys_below_key_domain = 0;
        self.retrain_super_root_model();
    }

    fn retrain_super_root_model(&mut self) {
        let span = self.key_domain_max.saturating_sub(self.key_domain_min).max(1) as f64;
        let a = 1.0 / span;
        let super_root = self.nodes[self.super_root].model_node_mut();
        super_root.model = LinearModel::new(a, -(self.key_domain_min as f64) * a);
    }

    /// Grows the domain covered by the model root until it includes `key`,
    /// doubling (at least) the covered interval per step.
    fn expand_root(&mut self, key: Key, expand_left: bool) {
        loop {
            self.expand_root_once(key, expand_left);
            let covered = if expand_left {
                self.key_domain_min <= key
            } else {
                key <= self.key_domain_max
            };
            if covered {
                break;
            }
        }
    }

    fn expand_root_once(&mut self, key: Key, expand_left: bool) {
        let domain_size = self.key_domain_max.saturating_sub(self.key_domain_min).max(1);
        let mut new_domain_min = self.key_domain_min;
        let mut new_domain_max = self.key_domain_max;

        // Pick a power-of-two expansion factor covering the key, bounded per
        // step; clamp the new bounds at the key type's domain.
        let expansion_factor;
        if expand_left {
            let target = key.min(self.get_min_key().unwrap_or(key));
            let key_difference = self.key_domain_min.saturating_sub(target).max(1);
            let needed = (div_ceil_positive(key_difference, domain_size) + 1) as u128;
            expansion_factor = needed
                .next_power_of_two()
                .min(MAX_EXPANSION_FACTOR_PER_STEP as u128) as usize;

            let half_expandable_domain = self.key_domain_max / 2 - MIN_KEY / 2;
            let half_expanded_size =
                (expansion_factor as Key / 2).saturating_mul(domain_size);
            if half_expanded_size < half_expandable_domain {
                new_domain_min = self
                    .key_domain_max
                    .saturating_sub(half_expanded_size.saturating_mul(2));
            } else {
                new_domain_min = MIN_KEY;
            }
            self.num_keys_at_last_left_domain_resize = self.num_keys;
            self.num_keys_below_key_domain = 0;
        } else {
            let target = key.max(self.get_max_key().unwrap_or(key));
            let key_difference = target.saturating_sub(self.key_domain_max).max(1);
            let needed = (div_ceil_positive(key_difference, domain_size) + 1) as u128;
            expansion_factor = needed
                .next_power_of_two()
                .min(MAX_EXPANSION_FACTOR_PER_STEP as u128) as usize;

            let half_expandable_domain = MAX_KEY / 2 - self.key_domain_min / 2;
            let half_expanded_size =
                (expansion_factor as Key / 2).saturating_mul(domain_size);
            if half_expanded_size < half_expandable_domain {
                new_domain_max = self
                    .key_domain_min
                    .saturating_add(half_expanded_size.saturating_mul(2));
            } else {
                new_domain_max = MAX_KEY;
            }
            self.num_keys_at_last_right_domain_resize = self.num_keys;
            self.num_keys_above_key_domain = 0;
        }
        debug_assert!(expansion_factor > 1, "expansion factor must grow the domain");

        debug!(
            expansion_factor,
            expand_left, new_domain_min, new_domain_max, "expanding root domain"
        );

        // The leaf that currently holds the out-of-domain keys; captured
        // before the child array grows.
        let outermost_id = if expand_left {
            self.first_data_node()
        } else {
            self.last_data_node()
        };

        // Grow the root's child array in place when it fits, otherwise wrap
        // the current root under a new model node.
        let root_num_children = self.nodes[self.root].model_node().num_children();
        let (new_nodes_start, new_nodes_end);
        if root_num_children * expansion_factor <= self.max_fanout {
            self.stats.num_model_node_expansions += 1;
            let root = self.nodes[self.root].model_node_mut();
            let old_children = std::mem::take(&mut root.children);
            let new_num_children = old_children.len() * expansion_factor;
            let copy_start;
            if expand_left {
                copy_start = new_num_children - old_children.len();
                new_nodes_start = 0;
                new_nodes_end = copy_start;
                root.model.b += (new_num_children - old_children.len()) as f64;
            } else {
                copy_start = 0;
                new_nodes_start = old_children.len();
                new_nodes_end = new_num_children;
            }
            let mut new_children = vec![old_children[0]; new_num_children];
            new_children[copy_start..copy_start + old_children.len()]
                .copy_from_slice(&old_children);
            root.children = new_children;
        } else {
            let root_level = self.nodes[self.root].level();
            let old_model = *self.nodes[self.root].model();
            let mut new_root = ModelNode::new(root_level - 1);
            new_root.model = LinearModel::new(
                old_model.a / root_num_children as f64,
                old_model.b / root_num_children as f64,
            );
            if expand_left {
                new_root.model.b += (expansion_factor - 1) as f64;
            }
            new_root.children = vec![self.root; expansion_factor];
            if expand_left {
                new_nodes_start = 0;
                new_nodes_end = expansion_factor - 1;
            } else {
                new_nodes_start = 1;
                new_nodes_end = expansion_factor;
            }
            let new_root_id = self.nodes.insert(Node::Model(new_root));
            self.stats.num_model_nodes += 1;
            self.nodes[self.super_root].model_node_mut().children[0] = new_root_id;
            self.nodes[self.super_root].set_level(root_level - 2);
            self.root = new_root_id;
        }

        // Slots mapping beyond the key type's domain stay empty.
        let root_model = *self.nodes[self.root].model();
        let (in_bounds_start, in_bounds_end) = if expand_left {
            (
                new_nodes_start.max(root_model.predict(new_domain_min).max(0) as usize),
                new_nodes_end,
            )
        } else {
            (
                new_nodes_start,
                new_nodes_end.min((root_model.predict(new_domain_max) + 1).max(0) as usize),
            )
        };

        // One fresh data node per n child slots, where n is the number of
        // slots pointing at existing children, carved from the outermost
        // pre-existing leaf.
        let num_children_now = self.nodes[self.root].model_node().num_children();
        let n = num_children_now - (new_nodes_end - new_nodes_start);
        debug_assert_eq!(num_children_now % n, 0);
        let new_node_duplication_factor = n.ilog2();
        let root_level_now = self.nodes[self.root].level();

        if expand_left {
            let mut left_boundary_value = self.key_domain_min;
            let mut left_boundary = self.nodes[outermost_id].data_mut().lower_bound(left_boundary_value);
            let mut next = Some(outermost_id);
            let mut i = new_nodes_end;
            while i > new_nodes_start {
                let right_boundary = left_boundary;
                if i - n <= in_bounds_start {
                    left_boundary = 0;
                } else {
                    left_boundary_value = left_boundary_value.saturating_sub(domain_size);
                    left_boundary =
                        self.nodes[outermost_id].data_mut().lower_bound(left_boundary_value);
                }
                let new_id = self.bulk_load_leaf_from_existing(
                    outermost_id,
                    left_boundary,
                    right_boundary,
                    true,
                    None,
                    false,
                    false,
                    false,
                );
                {
                    let node = self.nodes[new_id].data_mut();
                    node.level = root_level_now + 1;
                    node.duplication_factor = new_node_duplication_factor;
                    node.next_leaf = next;
                }
                if let Some(next_id) = next {
                    self.nodes[next_id].data_mut().prev_leaf = Some(new_id);
                }
                next = Some(new_id);
                let root = self.nodes[self.root].model_node_mut();
                for slot in (i - n)..i {
                    root.children[slot] = new_id;
                }
                i -= n;
            }

            let old_domain_min = self.key_domain_min;
            self.nodes[outermost_id]
                .data_mut()
                .erase_range(new_domain_min, old_domain_min, false);
            let last_new = self.nodes[self.root].model_node().children[new_nodes_end - 1];
            self.nodes[last_new].data_mut().next_leaf = Some(outermost_id);
            self.nodes[outermost_id].data_mut().prev_leaf = Some(last_new);
        } else {
            let outermost_capacity = self.nodes[outermost_id].data().data_capacity();
            let mut right_boundary_value = self.key_domain_max;
            let mut right_boundary =
                self.nodes[outermost_id].data_mut().lower_bound(right_boundary_value);
            let mut prev: Option<NodeId> = None;
            let mut i = new_nodes_start;
            while i < new_nodes_end {
                let left_boundary = right_boundary;
                if i + n >= in_bounds_end {
                    right_boundary = outermost_capacity;
                } else {
                    right_boundary_value = right_boundary_value.saturating_add(domain_size);
                    right_boundary =
                        self.nodes[outermost_id].data_mut().lower_bound(right_boundary_value);
                }
                let new_id = self.bulk_load_leaf_from_existing(
                    outermost_id,
                    left_boundary,
                    right_boundary,
                    true,
                    None,
                    false,
                    false,
                    false,
                );
                {
                    let node = self.nodes[new_id].data_mut();
                    node.level = root_level_now + 1;
                    node.duplication_factor = new_node_duplication_factor;
                    node.prev_leaf = prev;
                }
                if let Some(prev_id) = prev {
                    self.nodes[prev_id].data_mut().next_leaf = Some(new_id);
                }
                prev = Some(new_id);
                let root = self.nodes[self.root].model_node_mut();
                for slot in i..i + n {
                    root.children[slot] = new_id;
                }
                i += n;
            }

            let old_domain_max = self.key_domain_max;
            self.nodes[outermost_id]
                .data_mut()
                .erase_range(old_domain_max, new_domain_max, true);
            let first_new = self.nodes[self.root].model_node().children[new_nodes_start];
            self.nodes[first_new].data_mut().prev_leaf = Some(outermost_id);
            self.nodes[outermost_id].data_mut().next_leaf = Some(first_new);
        }

        self.key_domain_min = new_domain_min;
        self.key_domain_max = new_domain_max;
    }

    // ------------------------------------------------------------------
    // Splitting
    // ------------------------------------------------------------------

    /// Builds a data node from slot range `[left, right)` of an existing
    /// node, wiring in a precomputed model from the planner or a rescaled
    /// copy of the donor's model when requested.
    #[allow(clippy::too_many_arguments)]
    fn bulk_load_leaf_from_existing(
        &mut self,
        existing_id: NodeId,
        left: usize,
        right: usize,
        compute_cost: bool,
        tree_node: Option<&FanoutTreeNode>,
        reuse_model: bool,
        keep_left: bool,
        keep_right: bool,
    ) -> NodeId {
        let node = {
            let existing = self.nodes[existing_id].data();
            let precomputed = if let Some(plan) = tree_node {
                Some((LinearModel::new(plan.a, plan.b), plan.num_keys))
            } else if reuse_model {
                let num_actual_keys = existing.slots.num_keys_in_range(left, right);
                let mut model = existing.model;
                model.b -= left as f64;
                model.expand(num_actual_keys as f64 / (right - left) as f64);
                Some((model, num_actual_keys))
            } else {
                None
            };
            let mut node = DataNode::bulk_from_existing(
                existing,
                left,
                right,
                keep_left,
                keep_right,
                precomputed,
                self.max_data_node_slots,
            );
            if compute_cost {
                let has_history =
                    existing.stats.num_inserts + existing.stats.num_lookups > 0;
                let frac_inserts = if has_history {
                    existing.frac_inserts()
                } else {
                    self.expected_insert_frac
                };
                let (cost, iterations, shifts) = node.compute_expected_cost(frac_inserts);
                node.cost = cost;
                node.expected_avg_exp_search_iterations = iterations;
                node.expected_avg_shifts = shifts;
            }
            node
        };
        self.stats.num_data_nodes += 1;
        self.nodes.insert(Node::Data(node))
    }

    /// Replaces the leaf at `bucket_id` with a new model node of
    /// `2^fanout_tree_depth` children covering the leaf's key range.
    /// Returns the new model node.
    fn split_downwards(
        &mut self,
        parent_id: NodeId,
        bucket_id: usize,
        fanout_tree_depth: usize,
        used_fanout_tree: &mut Vec<FanoutTreeNode>,
        reuse_model: bool,
    ) -> NodeId {
        let leaf_id = self.nodes[parent_id].model_node().children[bucket_id];
        let (leaf_level, leaf_duplication_factor, leaf_num_keys) = {
            let leaf = self.nodes[leaf_id].data();
            (leaf.level, leaf.duplication_factor, leaf.num_keys)
        };
        self.stats.num_downward_splits += 1;
        debug!(
            fanout = 1usize << fanout_tree_depth,
            keys = leaf_num_keys,
            "splitting data node downwards"
        );

        let fanout = 1usize << fanout_tree_depth;
        let parent_model = *self.nodes[parent_id].model();
        let repeats = 1usize << leaf_duplication_factor;
        let start_bucket = bucket_id - bucket_id % repeats;
        let end_bucket = start_bucket + repeats;

        let mut new_node = ModelNode::new(leaf_level);
        new_node.duplication_factor = leaf_duplication_factor;
        if parent_model.a == 0.0 {
            new_node.model = LinearModel::new(
                0.0,
                -(start_bucket as f64 - parent_model.b) / repeats as f64,
            );
        } else {
            let left_boundary_value = (start_bucket as f64 - parent_model.b) / parent_model.a;
            let right_boundary_value = (end_bucket as f64 - parent_model.b) / parent_model.a;
            let a = 1.0 / (right_boundary_value - left_boundary_value) * fanout as f64;
            new_node.model = LinearModel::new(a, -a * left_boundary_value);
        }
        new_node.children = vec![leaf_id; fanout];
        let new_node_id = self.nodes.insert(Node::Model(new_node));
        self.stats.num_model_nodes += 1;

        if used_fanout_tree.is_empty() {
            debug_assert_eq!(fanout_tree_depth, 1);
            self.create_two_new_data_nodes(
                leaf_id,
                new_node_id,
                fanout_tree_depth as u32,
                reuse_model,
                0,
            );
        } else {
            self.create_new_data_nodes(leaf_id, new_node_id, fanout_tree_depth, used_fanout_tree, 0, 0);
        }

        self.nodes.remove(leaf_id);
        self.stats.num_data_nodes -= 1;

        {
            let parent = self.nodes[parent_id].model_node_mut();
            for slot in start_bucket..end_bucket {
                parent.children[slot] = new_node_id;
            }
        }
        if parent_id == self.super_root {
            self.root = new_node_id;
            let root_level = self.nodes[new_node_id].level();
            self.nodes[self.super_root].set_level(root_level - 1);
        }
        new_node_id
    }

    /// Replaces the leaf's duplicated slot group in its parent with new data
    /// nodes, expanding the parent's pointer array first when the group has
    /// too few redundant slots for the chosen fanout.
    fn split_sideways(
        &mut self,
        parent_id: NodeId,
        bucket_id: usize,
        fanout_tree_depth: usize,
        used_fanout_tree: &mut Vec<FanoutTreeNode>,
        reuse_model: bool,
    ) {
        let leaf_id = self.nodes[parent_id].model_node().children[bucket_id];
        let leaf_num_keys = self.nodes[leaf_id].data().num_keys;
        self.stats.num_sideways_splits += 1;
        debug!(
            fanout = 1usize << fanout_tree_depth,
            keys = leaf_num_keys,
            "splitting data node sideways"
        );

        let fanout = 1usize << fanout_tree_depth;
        let mut repeats = 1usize << self.nodes[leaf_id].duplication_factor();
        let mut bucket_id = bucket_id;
        if fanout > repeats {
            self.stats.num_model_node_expansions += 1;
            let log2_expansion =
                fanout_tree_depth as u32 - self.nodes[leaf_id].duplication_factor();
            let expansion_factor = self.expand_model_node(parent_id, log2_expansion);
            repeats *= expansion_factor;
            bucket_id *= expansion_factor;
        }
        let start_bucket = bucket_id - bucket_id % repeats;

        let leaf_duplication_factor = self.nodes[leaf_id].duplication_factor();
        if used_fanout_tree.is_empty() {
            debug_assert_eq!(fanout_tree_depth, 1);
            self.create_two_new_data_nodes(
                leaf_id,
                parent_id,
                (fanout_tree_depth as u32).max(leaf_duplication_factor),
                reuse_model,
                start_bucket,
            );
        } else {
            // extra duplication absorbs surplus redundant pointers
            let extra_duplication_factor =
                leaf_duplication_factor.saturating_sub(fanout_tree_depth as u32) as usize;
            self.create_new_data_nodes(
                leaf_id,
                parent_id,
                fanout_tree_depth,
                used_fanout_tree,
                start_bucket,
                extra_duplication_factor,
            );
        }

        self.nodes.remove(leaf_id);
        self.stats.num_data_nodes -= 1;
    }

    /// Splits `old_id` into two leaves at the parent's mid bucket, honoring
    /// append-mostly bias in whichever half holds the appending edge.
    fn create_two_new_data_nodes(
        &mut self,
        old_id: NodeId,
        parent_id: NodeId,
        duplication_factor: u32,
        reuse_model: bool,
        start_bucket: usize,
    ) {
        debug_assert!(duplication_factor >= 1);
        let num_buckets = 1usize << duplication_factor;
        let end_bucket = start_bucket + num_buckets;
        let mid_bucket = start_bucket + num_buckets / 2;

        let parent_model = *self.nodes[parent_id].model();
        let parent_num_children = self.nodes[parent_id].model_node().num_children();
        let parent_level = self.nodes[parent_id].level();

        let (append_mostly_right, append_mostly_left, old_min, old_max, old_prev, old_next) = {
            let old = self.nodes[old_id].data();
            (
                old.is_append_mostly_right(),
                old.is_append_mostly_left(),
                old.min_key,
                old.max_key,
                old.prev_leaf,
                old.next_leaf,
            )
        };
        let appending_right_bucket =
            parent_model.predict(old_max).clamp(0, parent_num_children as i64 - 1) as usize;
        let appending_left_bucket =
            parent_model.predict(old_min).clamp(0, parent_num_children as i64 - 1) as usize;

        let right_boundary = {
            let old = self.nodes[old_id].data_mut();
            let boundary_value = ((mid_bucket as f64 - parent_model.b) / parent_model.a) as Key;
            let mut boundary = old.lower_bound(boundary_value);
            // prediction rounding can strand keys of the left half past the
            // boundary; walk them back in
            while boundary < old.data_capacity()
                && old.slots.keys[boundary] != END_SENTINEL
                && parent_model.predict(old.slots.keys[boundary]) < mid_bucket as i64
            {
                boundary =
                    (old.slots.next_filled_position(boundary, false) + 1).min(old.data_capacity());
            }
            boundary
        };
        let old_capacity = self.nodes[old_id].data().data_capacity();

        let left_id = self.bulk_load_leaf_from_existing(
            old_id,
            0,
            right_boundary,
            true,
            None,
            reuse_model,
            append_mostly_right
                && start_bucket <= appending_right_bucket
                && appending_right_bucket < mid_bucket,
            append_mostly_left
                && start_bucket <= appending_left_bucket
                && appending_left_bucket < mid_bucket,
        );
        let right_id = self.bulk_load_leaf_from_existing(
            old_id,
            right_boundary,
            old_capacity,
            true,
            None,
            reuse_model,
            append_mostly_right
                && mid_bucket <= appending_right_bucket
                && appending_right_bucket < end_bucket,
            append_mostly_left
                && mid_bucket <= appending_left_bucket
                && appending_left_bucket < end_bucket,
        );

        for (id, slots) in [
            (left_id, start_bucket..mid_bucket),
            (right_id, mid_bucket..end_bucket),
        ] {
            {
                let node = self.nodes[id].data_mut();
                node.level = parent_level + 1;
                node.duplication_factor = duplication_factor - 1;
            }
            let parent = self.nodes[parent_id].model_node_mut();
            for slot in slots {
                parent.children[slot] = id;
            }
        }

        if let Some(prev_id) = old_prev {
            self.nodes[prev_id].data_mut().next_leaf = Some(left_id);
        }
        {
            let left = self.nodes[left_id].data_mut();
            left.prev_leaf = old_prev;
            left.next_leaf = Some(right_id);
        }
        {
            let right = self.nodes[right_id].data_mut();
            right.prev_leaf = Some(left_id);
            right.next_leaf = old_next;
        }
        if let Some(next_id) = old_next {
            self.nodes[next_id].data_mut().prev_leaf = Some(right_id);
        }
    }

    /// Replaces `old_id` with one data node per planned fanout-tree leaf.
    fn create_new_data_nodes(
        &mut self,
        old_id: NodeId,
        parent_id: NodeId,
        fanout_tree_depth: usize,
        used_fanout_tree: &mut [FanoutTreeNode],
        start_bucket: usize,
        extra_duplication_factor: usize,
    ) {
        let parent_model = *self.nodes[parent_id].model();
        let parent_num_children = self.nodes[parent_id].model_node().num_children();
        let parent_level = self.nodes[parent_id].level();

        let (append_mostly_right, append_mostly_left, old_min, old_max, old_prev, old_next) = {
            let old = self.nodes[old_id].data();
            (
                old.is_append_mostly_right(),
                old.is_append_mostly_left(),
                old.min_key,
                old.max_key,
                old.prev_leaf,
                old.next_leaf,
            )
        };
        let appending_right_bucket =
            parent_model.predict(old_max).clamp(0, parent_num_children as i64 - 1) as usize;
        let appending_left_bucket =
            parent_model.predict(old_min).clamp(0, parent_num_children as i64 - 1) as usize;
        let old_capacity = self.nodes[old_id].data().data_capacity();

        let mut current_bucket = start_bucket;
        let mut prev_leaf = old_prev;
        let mut right_boundary = 0usize;
        // keys can move to an adjacent planned leaf when boundary rounding
        // disagrees with the parent model
        let mut num_reassigned_keys = 0usize;
        for plan_index in 0..used_fanout_tree.len() {
            let left_boundary = right_boundary;
            let duplication_factor = (fanout_tree_depth - used_fanout_tree[plan_index].level
                + extra_duplication_factor) as u32;
            let child_repeats = 1usize << duplication_factor;
            let keep_left = append_mostly_right
                && current_bucket <= appending_right_bucket
                && appending_right_bucket < current_bucket + child_repeats;
            let keep_right = append_mostly_left
                && current_bucket <= appending_left_bucket
                && appending_left_bucket < current_bucket + child_repeats;

            right_boundary = used_fanout_tree[plan_index].right_boundary;
            used_fanout_tree[plan_index].num_keys =
                used_fanout_tree[plan_index].num_keys.saturating_sub(num_reassigned_keys);
            num_reassigned_keys = 0;
            {
                let old = self.nodes[old_id].data();
                while right_boundary < old_capacity
                    && old.slots.keys[right_boundary] != END_SENTINEL
                    && parent_model.predict(old.slots.keys[right_boundary])
                        < (current_bucket + child_repeats) as i64
                {
                    num_reassigned_keys += 1;
                    right_boundary = (old.slots.next_filled_position(right_boundary, false) + 1)
                        .min(old_capacity);
                }
            }
            used_fanout_tree[plan_index].num_keys += num_reassigned_keys;

            let child_id = self.bulk_load_leaf_from_existing(
                old_id,
                left_boundary,
                right_boundary,
                false,
                Some(&used_fanout_tree[plan_index]),
                false,
                keep_left,
                keep_right,
            );
            {
                let child = self.nodes[child_id].data_mut();
                child.level = parent_level + 1;
                child.cost = used_fanout_tree[plan_index].cost;
                child.duplication_factor = duplication_factor;
                child.expected_avg_exp_search_iterations =
                    used_fanout_tree[plan_index].expected_avg_search_iterations;
                child.expected_avg_shifts = used_fanout_tree[plan_index].expected_avg_shifts;
                child.prev_leaf = prev_leaf;
            }
            if let Some(prev_id) = prev_leaf {
                self.nodes[prev_id].data_mut().next_leaf = Some(child_id);
            }
            {
                let parent = self.nodes[parent_id].model_node_mut();
                for slot in current_bucket..current_bucket + child_repeats {
                    parent.children[slot] = child_id;
                }
            }
            current_bucket += child_repeats;
            prev_leaf = Some(child_id);
        }

        let last_id = prev_leaf.expect("planned split produces at least one leaf");
        self.nodes[last_id].data_mut().next_leaf = old_next;
        if let Some(next_id) = old_next {
            self.nodes[next_id].data_mut().prev_leaf = Some(last_id);
        }
    }

    /// Doubles the pointer array of a model node `log2_expansion_factor`
    /// times: every child keeps its position proportionally and gains
    /// duplication factor; the model scales to match. Returns the expansion
    /// factor.
    fn expand_model_node(&mut self, node_id: NodeId, log2_expansion_factor: u32) -> usize {
        let expansion_factor = 1usize << log2_expansion_factor;
        let old_children = self.nodes[node_id].model_node().children.clone();
        let mut new_children = vec![old_children[0]; old_children.len() * expansion_factor];
        let mut current = 0usize;
        while current < old_children.len() {
            let child_id = old_children[current];
            let child_duplication_factor = self.nodes[child_id].duplication_factor();
            let child_repeats = 1usize << child_duplication_factor;
            for slot in expansion_factor * current..expansion_factor * (current + child_repeats) {
                new_children[slot] = child_id;
            }
            self.nodes[child_id]
                .set_duplication_factor(child_duplication_factor + log2_expansion_factor);
            current += child_repeats;
        }
        let node = self.nodes[node_id].model_node_mut();
        node.children = new_children;
        node.model.expand(expansion_factor as f64);
        expansion_factor
    }
}

impl<P: Payload> Default for Index<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    /// Sweeps the whole structure: slot invariants in every leaf, aligned
    /// power-of-two duplication runs in every model node, and a leaf-list
    /// walk that visits every key in strictly ascending order.
    fn check_invariants(index: &Index<i64>) {
        let mut stack = vec![index.root];
        let mut tree_leaves = 0usize;
        let mut tree_model_nodes = 0usize;
        while let Some(id) = stack.pop() {
            match &index.nodes[id] {
                Node::Model(model_node) => {
                    tree_model_nodes += 1;
                    assert!(
                        model_node.num_children().is_power_of_two(),
                        "child count must be a power of two"
                    );
                    let mut slot = 0;
                    while slot < model_node.num_children() {
                        let child = model_node.children[slot];
                        let repeats = 1usize << index.nodes[child].duplication_factor();
                        assert_eq!(slot % repeats, 0, "duplicated run must be aligned");
                        for offset in 0..repeats {
                            assert_eq!(
                                model_node.children[slot + offset],
                                child,
                                "duplicated run must be contiguous"
                            );
                        }
                        stack.push(child);
                        slot += repeats;
                    }
                }
                Node::Data(leaf) => {
                    tree_leaves += 1;
                    let capacity = leaf.data_capacity();
                    for i in 1..capacity {
                        assert!(
                            leaf.slots.keys[i - 1] <= leaf.slots.keys[i],
                            "keys must be non-decreasing"
                        );
                    }
                    let mut next_key = END_SENTINEL;
                    for i in (0..capacity).rev() {
                        if leaf.slots.is_filled(i) {
                            next_key = leaf.slots.keys[i];
                        } else {
                            assert_eq!(
                                leaf.slots.keys[i], next_key,
                                "gaps must carry the next filled key"
                            );
                        }
                    }
                    assert_eq!(
                        leaf.slots.num_keys_in_range(0, capacity),
                        leaf.num_keys,
                        "bitmap popcount must match num_keys"
                    );
                }
            }
        }
        assert_eq!(tree_leaves, index.stats.num_data_nodes);
        assert_eq!(tree_model_nodes, index.stats.num_model_nodes);

        let mut previous_key: Option<Key> = None;
        let mut total_keys = 0usize;
        let mut list_leaves = 0usize;
        let mut expected_prev: Option<NodeId> = None;
        let mut leaf_id = Some(index.first_data_node());
        while let Some(id) = leaf_id {
            let leaf = index.nodes[id].data();
            assert_eq!(leaf.prev_leaf, expected_prev, "prev link must mirror the walk");
            list_leaves += 1;
            for (_, key, _) in leaf.slots.filled(0..leaf.data_capacity()) {
                if let Some(previous) = previous_key {
                    assert!(previous < key, "leaf walk must be strictly ascending");
                }
                previous_key = Some(key);
                total_keys += 1;
            }
            expected_prev = Some(id);
            leaf_id = leaf.next_leaf;
        }
        assert_eq!(total_keys, index.len(), "leaf walk must visit every key");
        assert_eq!(list_leaves, tree_leaves, "leaf list must cover every leaf");
    }

    #[test]
    fn empty_index_lookup() {
        let mut index: Index<i64> = Index::new();
        assert_eq!(index.find(42), None);
        assert_eq!(index.get_min_key(), None);
        assert_eq!(index.get_max_key(), None);
        assert!(index.is_empty());
        check_invariants(&index);
    }

    #[test]
    fn singleton() {
        let mut index: Index<i64> = Index::new();
        index.insert(7, 100).unwrap();
        assert_eq!(index.find(7), Some(100));
        assert_eq!(index.get_min_key(), Some(7));
        assert_eq!(index.get_max_key(), Some(7));
        assert_eq!(index.len(), 1);
        check_invariants(&index);
    }

    #[test]
    fn ascending_1k() {
        let mut index: Index<i64> = Index::new();
        for i in 0..1000 {
            index.insert(i, i).unwrap();
        }
        for i in 0..1000 {
            assert_eq!(index.find(i), Some(i), "lookup of {i}");
        }
        assert_eq!(index.get_min_key(), Some(0));
        assert_eq!(index.get_max_key(), Some(999));
        let walked: Vec<Key> = index.iter().map(|(key, _)| key).collect();
        assert_eq!(walked, (0..1000).collect::<Vec<_>>());
        check_invariants(&index);
    }

    #[test]
    fn shuffled_10k_seed_42() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut keys: Vec<Key> = (0..10_000).collect();
        keys.shuffle(&mut rng);

        let mut index: Index<i64> = Index::new();
        for (insertion_order, &key) in keys.iter().enumerate() {
            index.insert(key, insertion_order as i64).unwrap();
            if insertion_order % 1000 == 999 {
                check_invariants(&index);
            }
        }
        check_invariants(&index);

        for (insertion_order, &key) in keys.iter().enumerate() {
            assert_eq!(index.find(key), Some(insertion_order as i64), "lookup of {key}");
        }
        for absent in 10_000..10_100 {
            assert_eq!(index.find(absent), None);
        }
    }

    #[test]
    fn append_mostly_100k() {
        let mut index: Index<i64> = Index::new();
        for key in 1..=100_000 {
            index.insert(key, key).unwrap();
        }
        check_invariants(&index);

        let last_leaf = index.nodes[index.last_data_node()].data();
        let ratio = last_leaf.stats.num_right_out_of_bounds_inserts as f64
            / last_leaf.stats.num_inserts as f64;
        assert!(ratio > 0.9, "right-most leaf should be append-mostly, got {ratio}");

        for key in (1..=100_000).step_by(997) {
            assert_eq!(index.find(key), Some(key));
        }
        assert_eq!(index.get_min_key(), Some(1));
        assert_eq!(index.get_max_key(), Some(100_000));
    }

    #[test]
    fn far_jump_domain_expansion() {
        let mut index: Index<i64> = Index::new();
        index.insert(0, 0).unwrap();
        index.insert(10_000_000, 1).unwrap();

        assert_eq!(index.find(0), Some(0));
        assert_eq!(index.find(10_000_000), Some(1));
        assert!(index.stats().num_model_nodes >= 1, "root should be a model node");
        assert!(index.key_domain().1 >= 10_000_000);
        check_invariants(&index);
    }

    #[test]
    fn far_jump_left() {
        let mut index: Index<i64> = Index::new();
        index.insert(0, 0).unwrap();
        index.insert(-10_000_000, 1).unwrap();

        assert_eq!(index.find(0), Some(0));
        assert_eq!(index.find(-10_000_000), Some(1));
        assert!(index.key_domain().0 <= -10_000_000);
        check_invariants(&index);
    }

    #[test]
    fn descending_inserts() {
        let mut index: Index<i64> = Index::new();
        for key in (0..10_000).rev() {
            index.insert(key, key).unwrap();
        }
        check_invariants(&index);
        for key in (0..10_000).step_by(101) {
            assert_eq!(index.find(key), Some(key));
        }
        assert_eq!(index.get_min_key(), Some(0));
        assert_eq!(index.get_max_key(), Some(9_999));
    }

    #[test]
    fn negative_and_positive_keys() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut keys: Vec<Key> = (-5_000..5_000).map(|i| i * 3).collect();
        keys.shuffle(&mut rng);

        let mut index: Index<i64> = Index::new();
        for &key in &keys {
            index.insert(key, key * 2).unwrap();
        }
        check_invariants(&index);
        for &key in &keys {
            assert_eq!(index.find(key), Some(key * 2));
        }
        assert_eq!(index.find(1), None);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut index: Index<i64> = Index::new();
        index.insert(1, 1).unwrap();
        assert_eq!(index.insert(1, 2), Err(Error::NoInsertion));
        assert_eq!(index.find(1), Some(1));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn sentinel_key_is_rejected() {
        let mut index: Index<i64> = Index::new();
        assert_eq!(index.insert(END_SENTINEL, 1), Err(Error::NoInsertion));
        assert!(index.is_empty());
    }

    #[test]
    fn repeated_find_is_stable() {
        let mut index: Index<i64> = Index::new();
        for key in 0..100 {
            index.insert(key, key).unwrap();
        }
        let filled_before: Vec<(Key, i64)> = index.iter().collect();
        for _ in 0..3 {
            assert_eq!(index.find(50), Some(50));
            assert_eq!(index.find(-1), None);
        }
        let filled_after: Vec<(Key, i64)> = index.iter().collect();
        assert_eq!(filled_before, filled_after);
        check_invariants(&index);
    }

    #[test]
    fn full_fanout_tree_policy() {
        let config = IndexConfig {
            splitting_policy: SplittingPolicy::UseFullFanoutTree,
            ..IndexConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(13);
        let mut keys: Vec<Key> = (0..5_000).map(|i| i * 11).collect();
        keys.shuffle(&mut rng);

        let mut index: Index<i64> = Index::with_config(config);
        for &key in &keys {
            index.insert(key, key).unwrap();
        }
        check_invariants(&index);
        for &key in &keys {
            assert_eq!(index.find(key), Some(key));
        }
    }

    #[test]
    fn always_split_in_two_policy() {
        let config = IndexConfig {
            splitting_policy: SplittingPolicy::AlwaysSplitInTwo,
            ..IndexConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(29);
        let mut keys: Vec<Key> = (0..5_000).map(|i| i * 5 + 1).collect();
        keys.shuffle(&mut rng);

        let mut index: Index<i64> = Index::with_config(config);
        for &key in &keys {
            index.insert(key, key).unwrap();
        }
        check_invariants(&index);
        for &key in &keys {
            assert_eq!(index.find(key), Some(key));
        }
    }
}
