use thiserror::Error;

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by index operations.
///
/// The first three variants are internal signals from a data node to the
/// insert controller: the controller reacts with a resize or a split and
/// retries, so they never reach the caller. Only [`Error::NoInsertion`]
/// (duplicate or sentinel key) and [`Error::KeyNotFound`] are terminal.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("catastrophic insertion cost")]
    CatastrophicCost,

    #[error("significant cost deviation")]
    SignificantCostDeviation,

    #[error("data node at maximum capacity")]
    MaxCapacity,

    #[error("no gap found")]
    NoGapFound,

    #[error("no insertion")]
    NoInsertion,

    #[error("key not found")]
    KeyNotFound,
}
