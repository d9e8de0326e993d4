//! escan-io: loading Epics Scan files with a parse cache.
//!
//! [`ScanLoader`] reads a scan file through a memory map, attaches the
//! optional `.fullxrf` sidecar, and mirrors the parsed record to a sibling
//! cache file so unchanged scans load without parsing.
//!
//! The HDF5 cache backend is behind the `hdf5` feature; without it the
//! loader uses [`NoCache`] and always parses.

pub mod cache;
mod config;
mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
mod loader;
mod reader;

pub use cache::{default_cache, is_fresh, sibling_path, NoCache, ScanCache};
pub use config::LoadConfig;
pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use hdf5::{read_record, write_record, Hdf5Cache, CACHE_SUFFIX};
pub use loader::{is_escan_file, LoadEvent, ScanLoader};
pub use reader::{read_sidecar, MappedFileReader, SIDECAR_SUFFIX};
