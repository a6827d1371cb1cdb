//! An updatable learned index for ordered integer keys.
//!
//! The index approximates the cumulative key distribution with a hierarchy of
//! linear models whose leaves are gapped arrays: lookups are a model
//! prediction plus exponential search, inserts fill a gap or shift a short
//! run. The hierarchy adapts on-line — data nodes resize, split sideways or
//! downwards, and the root domain expands — driven by cost models fed from
//! empirical search and shift statistics.
//!
//! ```
//! use roadster_core::Index;
//!
//! let mut index: Index<u64> = Index::new();
//! index.insert(7, 100).unwrap();
//! assert_eq!(index.find(7), Some(100));
//! assert_eq!(index.find(8), None);
//! ```

pub mod cost;
pub mod index;
pub mod iter;
pub mod model;
pub mod node;
pub mod params;

mod error;
mod fanout;
mod kv;

pub use error::{Error, Result};
pub use index::{Index, IndexStats};
pub use iter::Iter;
pub use kv::{Key, Payload, END_SENTINEL, MAX_KEY, MIN_KEY};
pub use params::{IndexConfig, SplittingPolicy};
