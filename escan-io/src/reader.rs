//! Memory-mapped scan and sidecar readers.

use std::borrow::Cow;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use escan_core::XrfCube;
use escan_parse::{parse_full_xrf, XrfConfig, XrfGrid};
use log::{info, warn};
use memmap2::Mmap;

use crate::cache::sibling_path;
use crate::{Error, Result};

/// Suffix of the full XRF spectra sidecar.
pub const SIDECAR_SUFFIX: &str = ".fullxrf";

/// A memory-mapped file reader.
pub struct MappedFileReader {
    mmap: Option<Mmap>,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // zero-length files cannot be mapped on every platform
        let mmap = if file.metadata()?.len() == 0 {
            None
        } else {
            // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
            // This is the standard safety contract for memory mapping.
            #[allow(unsafe_code)]
            let mmap = unsafe { Mmap::map(&file)? };
            Some(mmap)
        };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    /// Returns the file contents as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path the reader was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read the `.fullxrf` sidecar of `scan_path`, if there is one.
///
/// A sidecar that does not start with the spectra marker or lacks a usable
/// calibration header is skipped with a warning.
///
/// # Errors
/// Returns an error for I/O failures, malformed spectrum lines, or grid
/// points without a spectrum.
pub fn read_sidecar(scan_path: &Path, grid: XrfGrid, config: &XrfConfig) -> Result<Option<XrfCube>> {
    let path = sibling_path(scan_path, SIDECAR_SUFFIX);
    if !path.is_file() {
        return Ok(None);
    }
    let reader = MappedFileReader::open(&path)?;
    if reader.is_empty() {
        warn!("ignoring empty {}", path.display());
        return Ok(None);
    }
    let date = std::fs::metadata(&path)?
        .modified()
        .map(|t| DateTime::<Local>::from(t).format("%a %b %e %H:%M:%S %Y").to_string())
        .unwrap_or_default();

    match parse_full_xrf(&reader.text(), grid, config, &date) {
        Ok(cube) => {
            info!(
                "read full XRF spectra {:?} from {}",
                cube.data.shape(),
                path.display()
            );
            Ok(Some(cube))
        }
        Err(escan_parse::Error::XrfFormat(reason)) => {
            warn!("ignoring {}: {reason}", path.display());
            Ok(None)
        }
        Err(e) => Err(Error::ParseError(e)),
    }
}
