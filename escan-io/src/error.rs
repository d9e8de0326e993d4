//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Loading and cache error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The scan or sidecar text could not be parsed.
    #[error("{0}")]
    ParseError(#[from] escan_parse::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] escan_core::Error),

    /// A cache file failed its version or completeness check.
    #[error("cache file is not usable: {0}")]
    CacheCorrupt(String),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// Invalid load configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
