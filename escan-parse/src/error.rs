//! Parser error types.

use thiserror::Error;

/// Result type for scan parsing.
pub type Result<T> = std::result::Result<T, Error>;

/// Scan and sidecar parsing errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Not an Epics Scan file, or a line that cannot be interpreted.
    #[error("invalid scan format: {0}")]
    Format(String),

    /// A mandatory section (PV list, column labels, data) is missing.
    #[error("empty scan file: {0}")]
    EmptyScan(String),

    /// 2D row counts cannot be reconciled to a rectangular grid.
    #[error("inconsistent 2D grid: {0}")]
    InconsistentGrid(String),

    /// The sidecar is not a full XRF spectra file.
    #[error("not a full XRF spectra file: {0}")]
    XrfFormat(String),

    /// A scan point has no spectrum in the sidecar file.
    #[error("full XRF spectra missing for point {ix}/{iy}")]
    XrfMissingPoint { ix: i64, iy: i64 },

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] escan_core::Error),
}
