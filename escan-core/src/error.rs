//! Error types for escan-core.

use thiserror::Error;

/// Result type alias for escan data model operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for scan record queries.
#[derive(Error, Debug)]
pub enum Error {
    /// A channel name did not resolve to any sum or detector row.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// Array shapes do not agree with each other or with the name lists.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A sum group definition references detectors that do not exist.
    #[error("invalid sum group: {0}")]
    InvalidSumGroup(String),
}
