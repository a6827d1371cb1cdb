//! Leaf nodes: a gapped array positioned by a per-node linear model, plus the
//! running statistics that drive the adaptation cost model.

use super::gapped_array::GappedArray;
use super::NodeId;
use crate::cost::ExpectedSearchIterationsAndShiftsAccumulator;
use crate::error::{Error, Result};
use crate::kv::{Key, Payload, END_SENTINEL, MAX_KEY, MIN_KEY};
use crate::model::{LinearModel, LinearModelBuilder};
use crate::params::{
    CATASTROPHE_CHECK_FREQUENCY, EXP_SEARCH_ITERATIONS_WEIGHT, MAX_DENSITY, MIN_DENSITY,
    NODE_LOOKUPS_WEIGHT, NUM_KEYS_DATA_NODE_RETRAIN_THRESHOLD, SHIFTS_WEIGHT,
    APPEND_MOSTLY_THRESHOLD,
};

/// Operation counters. None of these reset on resize; `reset` runs only after
/// an expand-and-retrain replaces the node's cost estimate.
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeStats {
    pub num_shifts: u64,
    pub num_exp_search_iterations: u64,
    pub num_lookups: u64,
    pub num_inserts: u64,
    pub num_resizes: u64,
    pub num_right_out_of_bounds_inserts: u64,
    pub num_left_out_of_bounds_inserts: u64,
}

impl NodeStats {
    pub fn reset(&mut self) {
        self.num_shifts = 0;
        self.num_exp_search_iterations = 0;
        self.num_lookups = 0;
        self.num_inserts = 0;
        self.num_resizes = 0;
    }
}

pub struct DataNode<P: Payload> {
    pub level: i32,
    pub duplication_factor: u32,
    /// Expected cost stored at creation or replanning; compared against the
    /// empirical cost to detect drift.
    pub cost: f64,
    pub model: LinearModel,
    pub slots: GappedArray<P>,
    pub num_keys: usize,
    /// Resize once `num_keys` reaches this.
    pub expansion_threshold: f64,
    /// Contract once `num_keys` falls below this.
    pub contraction_threshold: f64,
    pub max_slots: usize,
    pub prev_leaf: Option<NodeId>,
    pub next_leaf: Option<NodeId>,
    /// Updated on inserts only, not on erases.
    pub min_key: Key,
    pub max_key: Key,
    pub stats: NodeStats,
    pub expected_avg_exp_search_iterations: f64,
    pub expected_avg_shifts: f64,
}

/// Simulated bulk-load of a slot range: the planner's per-candidate oracle.
pub struct RangeCost {
    pub cost: f64,
    pub expected_avg_exp_search_iterations: f64,
    pub expected_avg_shifts: f64,
    /// Trained (unexpanded) model over the range.
    pub model: LinearModel,
    pub num_keys: usize,
}

impl<P: Payload> DataNode<P> {
    /// An empty leaf with a single sentinel slot.
    pub fn empty(max_slots: usize) -> Self {
        Self {
            level: 0,
            duplication_factor: 0,
            cost: 0.0,
            model: LinearModel::default(),
            slots: GappedArray::new(1),
            num_keys: 0,
            expansion_threshold: 1.0,
            contraction_threshold: 0.0,
            max_slots,
            prev_leaf: None,
            next_leaf: None,
            min_key: MAX_KEY,
            max_key: MIN_KEY,
            stats: NodeStats::default(),
            expected_avg_exp_search_iterations: 0.0,
            expected_avg_shifts: 0.0,
        }
    }

    #[inline]
    pub fn data_capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Model prediction clamped into the slot array.
    #[inline]
    pub fn predict_position(&self, key: Key) -> usize {
        self.model
            .predict(key)
            .clamp(0, self.data_capacity() as i64 - 1) as usize
    }

    // ---------------------------------------------------------------------
    // Search
    // ---------------------------------------------------------------------

    /// First position strictly greater than `key`, starting the doubling
    /// search from `m`. Returns a position in `[0, data_capacity]`, possibly
    /// a gap.
    pub fn exponential_search_upper_bound(&mut self, m: usize, key: Key) -> usize {
        let mut bound = 1;
        let (l, r);
        if self.slots.keys[m] > key {
            let size = m;
            while bound < size && self.slots.keys[m - bound] > key {
                bound *= 2;
                self.stats.num_exp_search_iterations += 1;
            }
            l = m - bound.min(size);
            r = m - bound / 2;
        } else {
            let size = self.data_capacity() - m;
            while bound < size && self.slots.keys[m + bound] <= key {
                bound *= 2;
                self.stats.num_exp_search_iterations += 1;
            }
            l = m + bound / 2;
            r = m + bound.min(size);
        }
        binary_search_upper_bound(&self.slots.keys, l, r, key)
    }

    /// First position no less than `key`, starting the doubling search from
    /// `m`. Returns a position in `[0, data_capacity]`, possibly a gap.
    pub fn exponential_search_lower_bound(&mut self, m: usize, key: Key) -> usize {
        let mut bound = 1;
        let (l, r);
        if self.slots.keys[m] >= key {
            let size = m;
            while bound < size && self.slots.keys[m - bound] >= key {
                bound *= 2;
                self.stats.num_exp_search_iterations += 1;
            }
            l = m - bound.min(size);
            r = m - bound / 2;
        } else {
            let size = self.data_capacity() - m;
            while bound < size && self.slots.keys[m + bound] < key {
                bound *= 2;
                self.stats.num_exp_search_iterations += 1;
            }
            l = m + bound / 2;
            r = m + bound.min(size);
        }
        binary_search_lower_bound(&self.slots.keys, l, r, key)
    }

    /// First position strictly greater than `key`; may be a gap.
    pub fn upper_bound(&mut self, key: Key) -> usize {
        self.stats.num_lookups += 1;
        let position = self.predict_position(key);
        self.exponential_search_upper_bound(position, key)
    }

    /// First position no less than `key`; may be a gap.
    pub fn lower_bound(&mut self, key: Key) -> usize {
        self.stats.num_lookups += 1;
        let position = self.predict_position(key);
        self.exponential_search_lower_bound(position, key)
    }

    /// First filled position strictly greater than `key`.
    pub fn find_upper(&mut self, key: Key) -> usize {
        let position = self.upper_bound(key);
        self.slots.next_filled_position(position, false)
    }

    /// First filled position no less than `key`.
    pub fn find_lower(&mut self, key: Key) -> usize {
        let position = self.lower_bound(key);
        self.slots.next_filled_position(position, false)
    }

    /// Position of `key`, or `KeyNotFound`.
    pub fn find_key_position(&mut self, key: Key) -> Result<usize> {
        self.stats.num_lookups += 1;
        let predicted = self.predict_position(key);
        let position = self.exponential_search_upper_bound(predicted, key);
        if position == 0 || self.slots.keys[position - 1] != key {
            return Err(Error::KeyNotFound);
        }
        Ok(position - 1)
    }

    // ---------------------------------------------------------------------
    // Insert
    // ---------------------------------------------------------------------

    /// Picks the slot to insert `key` into. The first value honors the model
    /// prediction (a prediction landing in a gap pulls the key toward it);
    /// the second is the plain upper bound of `key`.
    fn find_insert_position(&mut self, key: Key) -> (usize, usize) {
        let predicted = self.predict_position(key);
        let position = self.exponential_search_upper_bound(predicted, key);
        if predicted <= position || self.slots.is_filled(position) {
            (position, position)
        } else {
            let next_filled = self.slots.next_filled_position(position, true);
            (predicted.min(next_filled - 1), position)
        }
    }

    /// Writes the entry at `pos` (a gap), then back-fills preceding gaps with
    /// the new key to keep the key array monotonic.
    fn insert_element_at(&mut self, key: Key, payload: P, pos: usize) {
        self.slots.fill(pos, key, payload);
        let mut i = pos;
        while i > 0 && !self.slots.is_filled(i - 1) {
            self.slots.keys[i - 1] = key;
            i -= 1;
        }
    }

    /// Inserts at `pos` (or `pos - 1` when the nearest gap is to the left; the
    /// off-by-one preserves ordering) by shifting the run between `pos` and
    /// the closest gap. Returns the actual insertion position.
    fn insert_using_shifts(&mut self, key: Key, payload: P, pos: usize) -> usize {
        let gap_pos = self
            .slots
            .closest_gap(pos)
            .expect("no gap in a data node below capacity");
        self.slots.bitmap[gap_pos] = true;
        if gap_pos >= pos {
            for i in (pos + 1..=gap_pos).rev() {
                self.slots.keys[i] = self.slots.keys[i - 1];
                self.slots.payloads[i] = self.slots.payloads[i - 1];
            }
            self.insert_element_at(key, payload, pos);
            self.stats.num_shifts += (gap_pos - pos) as u64;
            pos
        } else {
            for i in gap_pos..pos - 1 {
                self.slots.keys[i] = self.slots.keys[i + 1];
                self.slots.payloads[i] = self.slots.payloads[i + 1];
            }
            self.insert_element_at(key, payload, pos - 1);
            self.stats.num_shifts += (pos - 1 - gap_pos) as u64;
            pos - 1
        }
    }

    /// Inserts `key`, or reports why the node refuses it: the controller
    /// reacts to `CatastrophicCost` / `SignificantCostDeviation` /
    /// `MaxCapacity` with a structural change and retries. `NoInsertion`
    /// means the key is already present.
    pub fn insert(&mut self, key: Key, payload: P) -> Result<usize> {
        if self.stats.num_inserts % CATASTROPHE_CHECK_FREQUENCY == 0 && self.catastrophic_cost() {
            return Err(Error::CatastrophicCost);
        }

        if self.num_keys as f64 >= self.expansion_threshold {
            if self.significant_cost_deviation() {
                return Err(Error::SignificantCostDeviation);
            }
            if self.catastrophic_cost() {
                return Err(Error::CatastrophicCost);
            }
            if self.num_keys as f64 > self.max_slots as f64 * MIN_DENSITY {
                return Err(Error::MaxCapacity);
            }
            let keep_left = self.is_append_mostly_right();
            let keep_right = self.is_append_mostly_left();
            self.resize(MIN_DENSITY, false, keep_left, keep_right);
            self.stats.num_resizes += 1;
        }

        let (insertion_position, upper_bound_position) = self.find_insert_position(key);
        if upper_bound_position > 0 && self.slots.keys[upper_bound_position - 1] == key {
            return Err(Error::NoInsertion);
        }

        let insertion_position = if insertion_position < self.data_capacity()
            && !self.slots.is_filled(insertion_position)
        {
            self.insert_element_at(key, payload, insertion_position);
            insertion_position
        } else {
            self.insert_using_shifts(key, payload, insertion_position)
        };

        self.num_keys += 1;
        self.stats.num_inserts += 1;
        if key > self.max_key {
            self.max_key = key;
            self.stats.num_right_out_of_bounds_inserts += 1;
        }
        if key < self.min_key {
            self.min_key = key;
            self.stats.num_left_out_of_bounds_inserts += 1;
        }
        Ok(insertion_position)
    }

    // ---------------------------------------------------------------------
    // Resize and erase
    // ---------------------------------------------------------------------

    /// Rebuilds the slot array at `target_density`. The model is retrained
    /// below the retrain threshold (or on request) and rescaled otherwise;
    /// `keep_left` / `keep_right` leave headroom on the appending side.
    pub fn resize(
        &mut self,
        target_density: f64,
        force_retrain: bool,
        keep_left: bool,
        keep_right: bool,
    ) {
        if self.num_keys == 0 {
            return;
        }

        let old_capacity = self.data_capacity();
        let new_capacity =
            ((self.num_keys as f64 / target_density).ceil() as usize).max(self.num_keys + 1);

        if self.num_keys < NUM_KEYS_DATA_NODE_RETRAIN_THRESHOLD || force_retrain {
            let mut builder = LinearModelBuilder::new();
            for (rank, (_, key, _)) in self.slots.filled(0..old_capacity).enumerate() {
                builder.add(key as f64, rank as f64);
            }
            self.model = builder.build();
            if keep_left {
                self.model.expand(old_capacity as f64 / self.num_keys as f64);
            } else if keep_right {
                self.model.expand(old_capacity as f64 / self.num_keys as f64);
                self.model.b += (new_capacity - old_capacity) as f64;
            } else {
                self.model.expand(new_capacity as f64 / self.num_keys as f64);
            }
        } else if keep_right {
            self.model.b += (new_capacity - old_capacity) as f64;
        } else if !keep_left {
            self.model.expand(new_capacity as f64 / old_capacity as f64);
        }

        let mut new_slots = GappedArray::new(new_capacity);
        let mut last_position: i64 = -1;
        let mut keys_remaining = self.num_keys;
        let mut i = self.slots.next_filled_position(0, false);
        while i < old_capacity {
            let position = self.model.predict(self.slots.keys[i]).max(last_position + 1);

            let positions_remaining = new_capacity as i64 - position;
            if positions_remaining < keys_remaining as i64 {
                // out of headroom; pack the tail contiguously
                let mut pos = new_capacity - keys_remaining;
                for j in (last_position + 1) as usize..pos {
                    new_slots.keys[j] = self.slots.keys[i];
                }
                while pos < new_capacity {
                    new_slots.fill(pos, self.slots.keys[i], self.slots.payloads[i]);
                    i = self.slots.next_filled_position(i + 1, false);
                    pos += 1;
                }
                break;
            }

            let position = position as usize;
            // gaps up to the placement carry the placed key
            for j in (last_position + 1) as usize..position {
                new_slots.keys[j] = self.slots.keys[i];
            }
            new_slots.fill(position, self.slots.keys[i], self.slots.payloads[i]);

            last_position = position as i64;
            keys_remaining -= 1;
            i = self.slots.next_filled_position(i + 1, false);
        }

        self.slots = new_slots;
        self.expansion_threshold = (new_capacity as f64 * MAX_DENSITY)
            .max(self.num_keys as f64 + 1.0)
            .min(new_capacity as f64);
        self.contraction_threshold = new_capacity as f64 * MIN_DENSITY;
    }

    /// Clears filled slots with keys in the range, back-filling vacated
    /// positions with the next surviving key. Returns the number erased.
    /// Contracts if occupancy falls below the contraction threshold.
    pub fn erase_range(&mut self, start_key: Key, end_key: Key, end_key_inclusive: bool) -> usize {
        let pos = if end_key_inclusive {
            self.upper_bound(end_key)
        } else {
            self.lower_bound(end_key)
        };
        if pos == 0 {
            return 0;
        }

        let next_key = if pos == self.data_capacity() {
            END_SENTINEL
        } else {
            self.slots.keys[pos]
        };

        let mut num_erased = 0;
        let mut i = pos;
        while i > 0 && self.slots.keys[i - 1] >= start_key {
            i -= 1;
            if self.slots.is_filled(i) {
                num_erased += 1;
            }
            self.slots.keys[i] = next_key;
            self.slots.bitmap[i] = false;
        }
        self.num_keys -= num_erased;

        if (self.num_keys as f64) < self.contraction_threshold {
            self.resize(MIN_DENSITY, false, false, false);
            self.stats.num_resizes += 1;
        }
        num_erased
    }

    // ---------------------------------------------------------------------
    // Cost model
    // ---------------------------------------------------------------------

    pub fn shifts_per_insert(&self) -> f64 {
        if self.stats.num_inserts == 0 {
            return 0.0;
        }
        self.stats.num_shifts as f64 / self.stats.num_inserts as f64
    }

    /// Empirical average exponential-search iterations per operation.
    pub fn exp_search_iterations_per_operation(&self) -> f64 {
        let num_ops = self.stats.num_inserts + self.stats.num_lookups;
        if num_ops == 0 {
            return 0.0;
        }
        self.stats.num_exp_search_iterations as f64 / num_ops as f64
    }

    pub fn frac_inserts(&self) -> f64 {
        let num_ops = self.stats.num_inserts + self.stats.num_lookups;
        if num_ops == 0 {
            return 0.0;
        }
        self.stats.num_inserts as f64 / num_ops as f64
    }

    pub fn empirical_cost(&self) -> f64 {
        let num_ops = self.stats.num_inserts + self.stats.num_lookups;
        if num_ops == 0 {
            return 0.0;
        }
        let frac_inserts = self.stats.num_inserts as f64 / num_ops as f64;
        EXP_SEARCH_ITERATIONS_WEIGHT * self.exp_search_iterations_per_operation()
            + SHIFTS_WEIGHT * self.shifts_per_insert() * frac_inserts
    }

    /// Shifts-per-insert so high (over 100, expected or empirical) that only
    /// a split can fix the node.
    pub fn catastrophic_cost(&self) -> bool {
        self.model.a != 0.0
            && (self.shifts_per_insert() > 100.0 || self.expected_avg_shifts > 100.0)
    }

    /// Whether the empirical cost has drifted materially above the stored
    /// expected cost; low-cost nodes are never worth splitting.
    pub fn significant_cost_deviation(&self) -> bool {
        let empirical = self.empirical_cost();
        self.model.a != 0.0 && empirical > NODE_LOOKUPS_WEIGHT && empirical > 1.5 * self.cost
    }

    pub fn is_append_mostly_right(&self) -> bool {
        self.stats.num_right_out_of_bounds_inserts as f64 / self.stats.num_inserts as f64
            > APPEND_MOSTLY_THRESHOLD
    }

    pub fn is_append_mostly_left(&self) -> bool {
        self.stats.num_left_out_of_bounds_inserts as f64 / self.stats.num_inserts as f64
            > APPEND_MOSTLY_THRESHOLD
    }

    /// Expected cost of this node under its current model, as
    /// `(cost, expected_iterations, expected_shifts)`.
    pub fn compute_expected_cost(&self, frac_inserts: f64) -> (f64, f64, f64) {
        if self.num_keys == 0 {
            return (0.0, 0.0, 0.0);
        }
        let capacity = self.data_capacity();
        let mut accumulator = ExpectedSearchIterationsAndShiftsAccumulator::new();
        for (position, key, _) in self.slots.filled(0..capacity) {
            let predicted = self.model.predict(key).clamp(0, capacity as i64 - 1) as usize;
            accumulator.accumulate(position, predicted);
        }
        let iterations = accumulator.expected_search_iterations();
        let shifts = accumulator.expected_shifts();
        let cost =
            EXP_SEARCH_ITERATIONS_WEIGHT * iterations + SHIFTS_WEIGHT * shifts * frac_inserts;
        (cost, iterations, shifts)
    }

    // ---------------------------------------------------------------------
    // Bulk loading
    // ---------------------------------------------------------------------

    /// Builds a node from slot range `[left, right)` of an existing node,
    /// with model-based placement at the minimum density. `precomputed`
    /// carries an already-trained `(model, key count)` pair when the caller
    /// has one (from the planner, or a rescaled parent model).
    ///
    /// The caller sets level, duplication factor, and neighbor links.
    pub fn bulk_from_existing(
        existing: &DataNode<P>,
        left: usize,
        right: usize,
        keep_left: bool,
        keep_right: bool,
        precomputed: Option<(LinearModel, usize)>,
        max_slots: usize,
    ) -> Self {
        assert!(
            left <= right && right <= existing.data_capacity(),
            "slot range out of bounds"
        );

        let (mut model, num_keys) = match precomputed {
            Some((model, num_keys)) => (model, num_keys),
            None => {
                let mut builder = LinearModelBuilder::new();
                let mut count = 0;
                for (rank, (_, key, _)) in existing.slots.filled(left..right).enumerate() {
                    builder.add(key as f64, rank as f64);
                    count = rank + 1;
                }
                (builder.build(), count)
            }
        };

        let data_capacity = ((num_keys as f64 / MIN_DENSITY).ceil() as usize).max(num_keys + 1);
        let mut node = Self {
            level: 0,
            duplication_factor: 0,
            cost: 0.0,
            model: LinearModel::default(),
            slots: GappedArray::new(data_capacity),
            num_keys,
            expansion_threshold: data_capacity as f64,
            contraction_threshold: 0.0,
            max_slots,
            prev_leaf: None,
            next_leaf: None,
            min_key: MAX_KEY,
            max_key: MIN_KEY,
            stats: NodeStats::default(),
            expected_avg_exp_search_iterations: 0.0,
            expected_avg_shifts: 0.0,
        };
        if num_keys == 0 {
            return node;
        }

        if keep_left {
            model.expand(1.0 / MAX_DENSITY);
        } else if keep_right {
            model.expand(1.0 / MAX_DENSITY);
            model.b += data_capacity as f64 - num_keys as f64 / MAX_DENSITY;
        } else {
            model.expand(data_capacity as f64 / num_keys as f64);
        }
        node.model = model;

        let mut last_position: i64 = -1;
        let mut keys_remaining = num_keys;
        let mut i = existing.slots.next_filled_position(left, false);
        while i < right {
            let position = node.model.predict(existing.slots.keys[i]).max(last_position + 1);

            let positions_remaining = data_capacity as i64 - position;
            if positions_remaining < keys_remaining as i64 {
                let mut pos = data_capacity - keys_remaining;
                for j in (last_position + 1) as usize..pos {
                    node.slots.keys[j] = existing.slots.keys[i];
                }
                while pos < data_capacity {
                    node.slots
                        .fill(pos, existing.slots.keys[i], existing.slots.payloads[i]);
                    i = existing.slots.next_filled_position(i + 1, false);
                    pos += 1;
                }
                break;
            }

            let position = position as usize;
            for j in (last_position + 1) as usize..position {
                node.slots.keys[j] = existing.slots.keys[i];
            }
            node.slots
                .fill(position, existing.slots.keys[i], existing.slots.payloads[i]);

            last_position = position as i64;
            keys_remaining -= 1;
            i = existing.slots.next_filled_position(i + 1, false);
        }

        node.min_key = node.first_key();
        node.max_key = node.last_key();
        node.expansion_threshold = (data_capacity as f64 * MAX_DENSITY)
            .max(num_keys as f64 + 1.0)
            .min(data_capacity as f64);
        node.contraction_threshold = data_capacity as f64 * MIN_DENSITY;
        node
    }

    /// First filled key; the end sentinel when the node is empty.
    pub fn first_key(&self) -> Key {
        self.slots
            .filled(0..self.data_capacity())
            .next()
            .map(|(_, key, _)| key)
            .unwrap_or(MAX_KEY)
    }

    /// Last filled key; the minimum key when the node is empty.
    pub fn last_key(&self) -> Key {
        (0..self.data_capacity())
            .rev()
            .find(|&i| self.slots.is_filled(i))
            .map(|i| self.slots.keys[i])
            .unwrap_or(MIN_KEY)
    }
}

/// Simulates a model-based bulk load of slot range `[left, right)` at
/// `density` and prices the result: trains an OLS model over the range, plays
/// the placement into the cost accumulators, and returns the trained model so
/// the caller can reuse it for the real load.
pub(crate) fn expected_cost_from_range<P: Payload>(
    node: &DataNode<P>,
    left: usize,
    right: usize,
    density: f64,
    expected_insert_frac: f64,
) -> RangeCost {
    let mut builder = LinearModelBuilder::new();
    let mut num_keys = 0;
    for (rank, (_, key, _)) in node.slots.filled(left..right).enumerate() {
        builder.add(key as f64, rank as f64);
        num_keys = rank + 1;
    }
    let model = builder.build();
    if num_keys == 0 {
        return RangeCost {
            cost: 0.0,
            expected_avg_exp_search_iterations: 0.0,
            expected_avg_shifts: 0.0,
            model,
            num_keys: 0,
        };
    }

    let data_capacity = ((num_keys as f64 / density).ceil() as usize).max(num_keys + 1);
    let mut scaled = model;
    scaled.expand(data_capacity as f64 / num_keys as f64);

    let mut accumulator = ExpectedSearchIterationsAndShiftsAccumulator::new();
    let mut last_position: i64 = -1;
    let mut keys_remaining = num_keys;
    let mut i = node.slots.next_filled_position(left, false);
    while i < right {
        let predicted = scaled
            .predict(node.slots.keys[i])
            .clamp(0, data_capacity as i64 - 1);
        let actual = predicted.max(last_position + 1);

        if data_capacity as i64 - actual < keys_remaining as i64 {
            let mut actual = data_capacity - keys_remaining;
            while actual < data_capacity {
                let predicted = scaled
                    .predict(node.slots.keys[i])
                    .clamp(0, data_capacity as i64 - 1) as usize;
                accumulator.accumulate(actual, predicted);
                actual += 1;
                i = node.slots.next_filled_position(i + 1, false);
            }
            break;
        }

        accumulator.accumulate(actual as usize, predicted as usize);
        last_position = actual;
        keys_remaining -= 1;
        i = node.slots.next_filled_position(i + 1, false);
    }

    let iterations = accumulator.expected_search_iterations();
    let shifts = accumulator.expected_shifts();
    RangeCost {
        cost: EXP_SEARCH_ITERATIONS_WEIGHT * iterations
            + SHIFTS_WEIGHT * shifts * expected_insert_frac,
        expected_avg_exp_search_iterations: iterations,
        expected_avg_shifts: shifts,
        model,
        num_keys,
    }
}

fn binary_search_upper_bound(keys: &[Key], mut l: usize, mut r: usize, key: Key) -> usize {
    while l < r {
        let m = l + (r - l) / 2;
        if keys[m] <= key {
            l = m + 1;
        } else {
            r = m;
        }
    }
    l
}

fn binary_search_lower_bound(keys: &[Key], mut l: usize, mut r: usize, key: Key) -> usize {
    while l < r {
        let m = l + (r - l) / 2;
        if keys[m] >= key {
            r = m;
        } else {
            l = m + 1;
        }
    }
    l
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::DEFAULT_MAX_NODE_SIZE;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    const TEST_MAX_SLOTS: usize = DEFAULT_MAX_NODE_SIZE / 16;

    /// Drives inserts the way the controller would: structural refusals are
    /// answered with an expand-and-retrain.
    fn insert_all(node: &mut DataNode<i64>, keys: &[Key]) {
        for &key in keys {
            loop {
                match node.insert(key, key) {
                    Ok(_) => break,
                    Err(Error::NoInsertion) => panic!("unexpected duplicate for {key}"),
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
    }

    fn check_slot_invariants(node: &DataNode<i64>) {
        let capacity = node.data_capacity();
        // keys non-decreasing across every position
        for i in 1..capacity {
            assert!(
                node.slots.keys[i - 1] <= node.slots.keys[i],
                "keys out of order at {i}"
            );
        }
        // every gap carries the next filled key to the right
        let mut next_key = END_SENTINEL;
        for i in (0..capacity).rev() {
            if node.slots.is_filled(i) {
                next_key = node.slots.keys[i];
            } else {
                assert_eq!(node.slots.keys[i], next_key, "stale gap key at {i}");
            }
        }
        // occupancy matches the counter
        assert_eq!(node.slots.num_keys_in_range(0, capacity), node.num_keys);
    }

    #[test]
    fn empty_node_reports_not_found() {
        let mut node: DataNode<i64> = DataNode::empty(TEST_MAX_SLOTS);
        assert_eq!(node.find_key_position(42), Err(Error::KeyNotFound));
        assert_eq!(node.first_key(), MAX_KEY);
        assert_eq!(node.last_key(), MIN_KEY);
    }

    #[test]
    fn single_insert_is_found() {
        let mut node: DataNode<i64> = DataNode::empty(TEST_MAX_SLOTS);
        node.insert(7, 100).unwrap();
        let pos = node.find_key_position(7).unwrap();
        assert_eq!(node.slots.payloads[pos], 100);
        assert_eq!(node.min_key, 7);
        assert_eq!(node.max_key, 7);
        check_slot_invariants(&node);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut node: DataNode<i64> = DataNode::empty(TEST_MAX_SLOTS);
        insert_all(&mut node, &[5, 1, 9]);
        assert_eq!(node.insert(5, 0), Err(Error::NoInsertion));
        assert_eq!(node.num_keys, 3);
        check_slot_invariants(&node);
    }

    #[test]
    fn ascending_inserts_hold_invariants() {
        let mut node: DataNode<i64> = DataNode::empty(TEST_MAX_SLOTS);
        let keys: Vec<Key> = (0..500).collect();
        insert_all(&mut node, &keys);
        check_slot_invariants(&node);
        for &key in &keys {
            let pos = node.find_key_position(key).unwrap();
            assert_eq!(node.slots.payloads[pos], key);
        }
        assert_eq!(node.first_key(), 0);
        assert_eq!(node.last_key(), 499);
    }

    #[test]
    fn shuffled_inserts_hold_invariants() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut keys: Vec<Key> = (0..1000).map(|i| i * 3).collect();
        keys.shuffle(&mut rng);

        let mut node: DataNode<i64> = DataNode::empty(TEST_MAX_SLOTS);
        insert_all(&mut node, &keys);
        check_slot_invariants(&node);
        for &key in &keys {
            let pos = node.find_key_position(key).unwrap();
            assert_eq!(node.slots.payloads[pos], key);
        }
        assert_eq!(node.find_key_position(1), Err(Error::KeyNotFound));
    }

    #[test]
    fn bounds_match_naive_scan() {
        let mut node: DataNode<i64> = DataNode::empty(TEST_MAX_SLOTS);
        insert_all(&mut node, &[10, 20, 30, 40, 50, 60, 70]);

        for probe in [-5, 10, 15, 30, 55, 70, 75] {
            let upper = node.upper_bound(probe);
            let lower = node.lower_bound(probe);
            let capacity = node.data_capacity();
            let naive_upper = (0..capacity)
                .find(|&i| node.slots.keys[i] > probe)
                .unwrap_or(capacity);
            let naive_lower = (0..capacity)
                .find(|&i| node.slots.keys[i] >= probe)
                .unwrap_or(capacity);
            assert_eq!(upper, naive_upper, "upper bound for {probe}");
            assert_eq!(lower, naive_lower, "lower bound for {probe}");
        }
    }

    #[test]
    fn resize_preserves_contents() {
        let mut node: DataNode<i64> = DataNode::empty(TEST_MAX_SLOTS);
        let keys: Vec<Key> = (0..200).map(|i| i * 7).collect();
        insert_all(&mut node, &keys);

        node.resize(MIN_DENSITY, true, false, false);
        check_slot_invariants(&node);
        assert!(node.data_capacity() >= keys.len());
        for &key in &keys {
            assert!(node.find_key_position(key).is_ok());
        }
    }

    #[test]
    fn append_mostly_right_after_ascending_run() {
        let mut node: DataNode<i64> = DataNode::empty(TEST_MAX_SLOTS);
        insert_all(&mut node, &(0..100).collect::<Vec<_>>());
        assert!(node.is_append_mostly_right());
        assert!(!node.is_append_mostly_left());
    }

    #[test]
    fn erase_range_backfills_and_recounts() {
        let mut node: DataNode<i64> = DataNode::empty(TEST_MAX_SLOTS);
        insert_all(&mut node, &(0..100).collect::<Vec<_>>());

        let erased = node.erase_range(40, 60, false);
        assert_eq!(erased, 20);
        assert_eq!(node.num_keys, 80);
        check_slot_invariants(&node);
        assert_eq!(node.find_key_position(45), Err(Error::KeyNotFound));
        assert!(node.find_key_position(39).is_ok());
        assert!(node.find_key_position(60).is_ok());
    }

    #[test]
    fn bulk_from_existing_carves_a_range() {
        let mut donor: DataNode<i64> = DataNode::empty(TEST_MAX_SLOTS);
        insert_all(&mut donor, &(0..300).collect::<Vec<_>>());

        let mid = donor.lower_bound(150);
        let left = DataNode::bulk_from_existing(&donor, 0, mid, false, false, None, TEST_MAX_SLOTS);
        let right = DataNode::bulk_from_existing(
            &donor,
            mid,
            donor.data_capacity(),
            false,
            false,
            None,
            TEST_MAX_SLOTS,
        );

        assert_eq!(left.num_keys + right.num_keys, 300);
        assert_eq!(left.first_key(), 0);
        assert_eq!(right.last_key(), 299);
        assert!(left.last_key() < right.first_key());
        check_slot_invariants(&left);
        check_slot_invariants(&right);
    }

    #[test]
    fn expected_cost_prices_a_range() {
        let mut donor: DataNode<i64> = DataNode::empty(TEST_MAX_SLOTS);
        insert_all(&mut donor, &(0..200).map(|i| i * 2).collect::<Vec<_>>());

        let range_cost =
            expected_cost_from_range(&donor, 0, donor.data_capacity(), 0.7, 1.0);
        assert_eq!(range_cost.num_keys, 200);
        assert!(range_cost.cost >= 0.0);
        assert!(range_cost.model.a > 0.0);

        let empty_cost = expected_cost_from_range(&donor, 0, 0, 0.7, 1.0);
        assert_eq!(empty_cost.num_keys, 0);
        assert_eq!(empty_cost.cost, 0.0);
    }
}
