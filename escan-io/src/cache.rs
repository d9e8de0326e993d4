//! Parse cache interface.
//!
//! A cache mirrors a fully parsed [`ScanRecord`] to a sibling file so an
//! unchanged scan is not parsed twice. The backend is chosen when the loader
//! is built; the parser never knows whether a cache exists.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use escan_core::ScanRecord;

use crate::{LoadConfig, Result};

/// Storage backend for parsed records.
pub trait ScanCache: Send + Sync {
    /// Cache file for `source`, or `None` if this backend stores nothing.
    fn cache_path(&self, source: &Path) -> Option<PathBuf>;

    /// Read a record back from a cache file.
    ///
    /// # Errors
    /// Returns [`Error::CacheCorrupt`](crate::Error::CacheCorrupt) if the
    /// file is incomplete, from another format version, or inconsistent.
    fn read(&self, path: &Path) -> Result<ScanRecord>;

    /// Write `record` to `path`, replacing any previous file only on success.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    fn write(&self, record: &ScanRecord, path: &Path) -> Result<()>;
}

/// Backend used when no structured-storage library is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl ScanCache for NoCache {
    fn cache_path(&self, _source: &Path) -> Option<PathBuf> {
        None
    }

    fn read(&self, path: &Path) -> Result<ScanRecord> {
        Err(crate::Error::CacheCorrupt(format!(
            "no cache backend to read {}",
            path.display()
        )))
    }

    fn write(&self, _record: &ScanRecord, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// The best backend compiled into this build.
#[must_use]
pub fn default_cache(config: &LoadConfig) -> Box<dyn ScanCache> {
    #[cfg(feature = "hdf5")]
    {
        Box::new(crate::hdf5::Hdf5Cache::new(config.cache_compression))
    }
    #[cfg(not(feature = "hdf5"))]
    {
        let _ = config;
        Box::new(NoCache)
    }
}

/// `path` with `suffix` appended to the full file name (`scan.001` becomes
/// `scan.001.h5`).
#[must_use]
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Returns true if `cache` exists and was modified strictly after `source`.
#[must_use]
pub fn is_fresh(cache: &Path, source: &Path) -> bool {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(cache), modified(source)) {
        (Some(cached), Some(src)) => cached > src,
        _ => false,
    }
}

/// Write through a `.partial` sibling and rename into place.
///
/// The partial file is removed if `write` fails, so a reader never sees a
/// half-written cache under the final name.
///
/// # Errors
/// Returns the error from `write` or from the final rename.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let partial = sibling_path(path, ".partial");
    let result = write(&partial).and_then(|()| Ok(fs::rename(&partial, path)?));
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    #[test]
    fn test_sibling_path() {
        assert_eq!(
            sibling_path(Path::new("/data/scan.001"), ".h5"),
            PathBuf::from("/data/scan.001.h5")
        );
    }

    #[test]
    fn test_freshness_is_strict() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("scan.001");
        let cache = dir.path().join("scan.001.h5");
        fs::write(&source, "x").unwrap();
        assert!(!is_fresh(&cache, &source));

        fs::write(&cache, "y").unwrap();
        let t0 = SystemTime::now() - Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(&source)
            .unwrap()
            .set_modified(t0)
            .unwrap();
        let cache_file = fs::File::options().write(true).open(&cache).unwrap();

        cache_file.set_modified(t0).unwrap();
        assert!(!is_fresh(&cache, &source));
        cache_file.set_modified(t0 + Duration::from_secs(1)).unwrap();
        assert!(is_fresh(&cache, &source));
    }

    #[test]
    fn test_write_atomic_cleans_up() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.h5");

        let err = write_atomic(&target, |partial| {
            fs::write(partial, "half")?;
            Err(Error::CacheCorrupt("boom".to_string()))
        })
        .unwrap_err();
        assert!(matches!(err, Error::CacheCorrupt(_)));
        assert!(!target.exists());
        assert!(!sibling_path(&target, ".partial").exists());

        write_atomic(&target, |partial| Ok(fs::write(partial, "done")?)).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "done");
    }

    #[test]
    fn test_no_cache() {
        assert!(NoCache.cache_path(Path::new("scan.001")).is_none());
        assert!(NoCache.read(Path::new("scan.001.h5")).is_err());
    }
}
