//! Tuning constants and construction-time configuration.
//!
//! The constants govern when data nodes resize and when the adaptation
//! controller prefers a structural split over an in-place expansion.

/// Density after contracting; also determines the expansion threshold.
pub const MAX_DENSITY: f64 = 0.8;

/// Density of data nodes after bulk loading.
pub const INITIAL_DENSITY: f64 = 0.7;

/// Density after expanding; also determines the contraction threshold.
pub const MIN_DENSITY: f64 = 0.6;

/// Intra-node cost weight of one expected exponential-search iteration.
pub const EXP_SEARCH_ITERATIONS_WEIGHT: f64 = 20.0;

/// Intra-node cost weight of one expected shift.
pub const SHIFTS_WEIGHT: f64 = 0.5;

/// Traversal cost weight of one node lookup on the root-to-leaf path.
pub const NODE_LOOKUPS_WEIGHT: f64 = 20.0;

/// Traversal cost weight of one byte of model structure.
pub const MODEL_SIZE_WEIGHT: f64 = 5e-7;

/// A node is append-mostly if the fraction of its inserts that fall out of
/// bounds on one side exceeds this threshold. Append-mostly nodes resize with
/// headroom on that side.
pub const APPEND_MOSTLY_THRESHOLD: f64 = 0.9;

/// At least this many keys must land outside the root domain before a domain
/// expansion is considered.
pub const MIN_OUT_OF_DOMAIN_KEYS: usize = 5;

/// Once this many keys are outside the root domain, expansion is forced.
pub const MAX_OUT_OF_DOMAIN_KEYS: usize = 1000;

/// Between the min and max counts, expand only when the out-of-domain volume
/// exceeds the growth-adjusted expectation by this factor.
pub const OUT_OF_DOMAIN_TOLERANCE_FACTOR: f64 = 2.0;

/// Catastrophic-cost check runs every this many inserts into a data node.
pub const CATASTROPHE_CHECK_FREQUENCY: u64 = 64;

/// Below this many keys a resize retrains the data node model instead of
/// rescaling it.
pub const NUM_KEYS_DATA_NODE_RETRAIN_THRESHOLD: usize = 50;

/// Default maximum node size in bytes (16MB).
pub const DEFAULT_MAX_NODE_SIZE: usize = 1 << 24;

/// How a data node that can no longer absorb inserts is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplittingPolicy {
    /// Split the node in two, skipping the planner.
    AlwaysSplitInTwo,
    /// Let the planner pick between an in-place expand-and-retrain and a
    /// two-way split.
    #[default]
    DecideBetweenNoSplittingOrSplittingInTwo,
    /// Search the full fanout tree for the cheapest partitioning.
    UseFullFanoutTree,
}

/// Construction-time parameters of an [`crate::Index`].
#[derive(Debug, Clone, Copy)]
pub struct IndexConfig {
    /// Expected fraction of operations that are inserts, in `[0, 1]`.
    /// Feeds the expected-cost model; 0 means read-only, 1 write-only.
    pub expected_insert_frac: f64,
    /// Maximum node size in bytes. Larger nodes improve average throughput at
    /// the price of worse tail insert latency.
    pub max_node_size: usize,
    /// Split policy applied on insert failure.
    pub splitting_policy: SplittingPolicy,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            expected_insert_frac: 1.0,
            max_node_size: DEFAULT_MAX_NODE_SIZE,
            splitting_policy: SplittingPolicy::default(),
        }
    }
}

impl IndexConfig {
    /// Maximum number of child pointers in a model node.
    pub(crate) fn max_fanout(&self) -> usize {
        self.max_node_size / std::mem::size_of::<usize>()
    }

    /// Maximum number of slots in a data node holding payloads of `payload_size` bytes.
    pub(crate) fn max_data_node_slots(&self, payload_size: usize) -> usize {
        self.max_node_size / (std::mem::size_of::<crate::Key>() + payload_size)
    }
}
