//! escan-core: Data model for Epics Scan (escan) instrument files.
//!
//! This crate provides the parsed scan record, named-channel lookup and the
//! deadtime correction arithmetic shared by the parser and the cache layer.
//!

pub mod correction;
pub mod error;
pub mod lookup;
pub mod record;

pub use correction::{correct_detectors, mca_element, sum_base_name, sum_rows};
pub use error::{Error, Result};
pub use lookup::{match_channel_name, ChannelRef};
pub use record::{ChannelName, PartialData, ScanRecord, SumGroup, XrfCube};
