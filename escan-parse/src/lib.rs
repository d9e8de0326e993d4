//! escan-parse: Epics Scan text parser and full XRF sidecar reader.
//!
//! Parsing is a single pass over the text followed by array construction:
//!
//! 1. [`mode`] classifies each line and drives the section state machine.
//! 2. [`section::accumulate`] buckets lines into a [`ParseState`].
//! 3. [`arrays::build_record`] reconciles the 2D grid, forms sum groups,
//!    splits off ICR/OCR channels and applies the deadtime correction.
//!
//! The sidecar reader in [`xrf`] is independent of the main parser and is
//! attached to a record by the loader in `escan-io`.

pub mod arrays;
mod error;
pub mod grid;
pub mod mode;
pub mod section;
pub mod xrf;

pub use arrays::{build_record, form_sum_groups, parse_column_details, ICR_OCR_KEY};
pub use error::{Error, Result};
pub use grid::{plan_grid, GridPlan};
pub use section::{accumulate, sniff, ParseState, FILE_MARKER};
pub use xrf::{parse_full_xrf, Roi, XrfConfig, XrfGrid, XrfHeader, XRF_MARKER};

use escan_core::ScanRecord;

/// Parse the text of an escan file into a record.
///
/// The record has no full XRF spectra; see [`parse_full_xrf`].
///
/// # Errors
/// Returns an error if the text is not an Epics Scan file or its sections
/// cannot be assembled into consistent arrays.
pub fn parse_scan(text: &str) -> Result<ScanRecord> {
    build_record(accumulate(text)?)
}
