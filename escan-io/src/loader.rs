//! File loading with cache lookup and sidecar attachment.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use escan_core::{PartialData, ScanRecord};
use escan_parse::{parse_scan, sniff, XrfGrid};
use log::{debug, info, warn};

use crate::cache::{default_cache, is_fresh, ScanCache};
use crate::reader::{read_sidecar, MappedFileReader};
use crate::{LoadConfig, Result};

/// Progress notices sent to an observer while a file loads.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadEvent {
    /// Loading of a file started.
    Reading(PathBuf),
    /// The record was read from a fresh cache file.
    CacheHit(PathBuf),
    /// Part of the file was not used.
    PartialData(PartialData),
    /// The text was parsed; the duration covers parsing and the sidecar.
    Parsed(PathBuf, Duration),
    /// The cache file was (re)written.
    CacheWritten(PathBuf),
    /// Loading failed with the given message.
    Failed(String),
}

/// Loads scan files, consulting a parse cache.
///
/// # Example
///
/// ```no_run
/// use escan_io::{LoadConfig, ScanLoader};
///
/// let loader = ScanLoader::new(LoadConfig::default());
/// let scan = loader.load("sample.001")?;
/// let fe = scan.get_map("Fe Ka", Some("I0"))?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct ScanLoader {
    config: LoadConfig,
    cache: Box<dyn ScanCache>,
    events: Option<Sender<LoadEvent>>,
    parses: AtomicUsize,
}

impl ScanLoader {
    /// Create a loader with the best cache backend available in this build.
    #[must_use]
    pub fn new(config: LoadConfig) -> Self {
        let cache = default_cache(&config);
        Self::with_cache(config, cache)
    }

    /// Create a loader with an explicit cache backend.
    #[must_use]
    pub fn with_cache(config: LoadConfig, cache: Box<dyn ScanCache>) -> Self {
        Self {
            config,
            cache,
            events: None,
            parses: AtomicUsize::new(0),
        }
    }

    /// Send [`LoadEvent`]s to `sender` during loads.
    #[must_use]
    pub fn with_events(mut self, sender: Sender<LoadEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Number of text parses performed so far.
    #[must_use]
    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::Relaxed)
    }

    /// Load a scan file.
    ///
    /// A cache file newer than `path` is used instead of parsing. After a
    /// successful parse the cache is rewritten; cache problems are logged
    /// and never fail the load.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if its
    /// sidecar holds malformed or missing spectra.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<ScanRecord> {
        let path = path.as_ref();
        self.emit(LoadEvent::Reading(path.to_path_buf()));

        let cache_path = if self.config.use_cache {
            self.cache.cache_path(path)
        } else {
            None
        };
        if let Some(cache_path) = &cache_path {
            if let Some(record) = self.read_cache(cache_path, path) {
                self.emit_warnings(&record);
                return Ok(record);
            }
        }

        let start = Instant::now();
        let record = match self.parse(path) {
            Ok(record) => record,
            Err(e) => {
                warn!("failed to load {}: {e}", path.display());
                self.emit(LoadEvent::Failed(format!("{}: {e}", path.display())));
                return Err(e);
            }
        };
        self.emit_warnings(&record);
        let elapsed = start.elapsed();
        info!("read {} in {elapsed:?}", path.display());
        self.emit(LoadEvent::Parsed(path.to_path_buf(), elapsed));

        if let Some(cache_path) = cache_path {
            match self.cache.write(&record, &cache_path) {
                Ok(()) => {
                    debug!("wrote cache {}", cache_path.display());
                    self.emit(LoadEvent::CacheWritten(cache_path));
                }
                Err(e) => warn!("could not write cache {}: {e}", cache_path.display()),
            }
        }
        Ok(record)
    }

    fn read_cache(&self, cache_path: &Path, source: &Path) -> Option<ScanRecord> {
        if !is_fresh(cache_path, source) {
            return None;
        }
        match self.cache.read(cache_path) {
            Ok(record) => {
                info!("read {} from cache", source.display());
                self.emit(LoadEvent::CacheHit(cache_path.to_path_buf()));
                Some(record)
            }
            Err(e) => {
                warn!("ignoring cache {}: {e}", cache_path.display());
                None
            }
        }
    }

    fn parse(&self, path: &Path) -> Result<ScanRecord> {
        self.parses.fetch_add(1, Ordering::Relaxed);
        let reader = MappedFileReader::open(path)?;
        debug!("mapped {} ({} bytes)", reader.path().display(), reader.len());
        let mut record = parse_scan(&reader.text())?;

        if self.config.read_full_xrf {
            let grid = XrfGrid {
                x_points: record.x.len(),
                y_points: record.is_2d().then_some(record.y.len()),
            };
            record.full_xrf = read_sidecar(path, grid, &self.config.xrf)?;
        }
        Ok(record)
    }

    fn emit_warnings(&self, record: &ScanRecord) {
        for notice in &record.warnings {
            self.emit(LoadEvent::PartialData(notice.clone()));
        }
    }

    fn emit(&self, event: LoadEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }
}

impl Default for ScanLoader {
    fn default() -> Self {
        Self::new(LoadConfig::default())
    }
}

/// Returns true if the first line of `path` marks an Epics Scan file.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn is_escan_file<P: AsRef<Path>>(path: P) -> Result<bool> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut first = Vec::new();
    reader.read_until(b'\n', &mut first)?;
    Ok(sniff(&String::from_utf8_lossy(&first)))
}
