//! HDF5 cache backend.
//!
//! Layout of a cache file:
//!
//! ```text
//! /                     attrs: escan_format_version, title, complete
//! /scan                 attrs: dimension
//!   positions, detectors, detectors_corrected, sums, sums_corrected,
//!   intensity_ratio (optional), x, y      f64 datasets
//!   metadata            JSON string (names, sum groups, header lists, info)
//! /full_xrf (optional)
//!   energies            f64 [elements, channels]
//!   data                u32 [positions..., elements, channels]
//!   header              string
//! ```
//!
//! The `complete` attribute is written last; a file without it is never
//! trusted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use escan_core::{ChannelName, PartialData, ScanRecord, SumGroup, XrfCube};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use ndarray::{ArrayD, Dimension, Ix1, Ix2};
use serde::{Deserialize, Serialize};

use crate::cache::{sibling_path, write_atomic, ScanCache};
use crate::{Error, Result};

/// Cache file suffix appended to the scan file name.
pub const CACHE_SUFFIX: &str = ".h5";

const FORMAT_VERSION: &str = "1";
const TITLE: &str = "Epics Scan Data";

/// Every non-array field of a record, stored as one JSON document.
#[derive(Serialize, Deserialize)]
struct CacheMetadata {
    position_names: Vec<ChannelName>,
    detector_names: Vec<ChannelName>,
    sum_groups: Vec<SumGroup>,
    x_name: String,
    y_name: String,
    user_titles: Vec<String>,
    pv_list: Vec<String>,
    scan_regions: Vec<String>,
    info: BTreeMap<String, String>,
    start_time: String,
    stop_time: String,
    warnings: Vec<PartialData>,
}

/// Cache backend storing records in a sibling HDF5 file.
#[derive(Debug, Clone, Copy)]
pub struct Hdf5Cache {
    compression: Option<u8>,
}

impl Hdf5Cache {
    /// Create a backend writing datasets with the given deflate level.
    #[must_use]
    pub fn new(compression: Option<u8>) -> Self {
        Self { compression }
    }
}

impl Default for Hdf5Cache {
    fn default() -> Self {
        Self::new(Some(5))
    }
}

impl ScanCache for Hdf5Cache {
    fn cache_path(&self, source: &Path) -> Option<PathBuf> {
        Some(sibling_path(source, CACHE_SUFFIX))
    }

    fn read(&self, path: &Path) -> Result<ScanRecord> {
        read_record(path).map_err(|e| match e {
            Error::CacheCorrupt(_) => e,
            other => Error::CacheCorrupt(other.to_string()),
        })
    }

    fn write(&self, record: &ScanRecord, path: &Path) -> Result<()> {
        write_atomic(path, |partial| write_record(partial, record, self.compression))
    }
}

/// Write a record to a new HDF5 file at `path`.
///
/// # Errors
/// Returns an error if HDF5 I/O fails.
pub fn write_record<P: AsRef<Path>>(
    path: P,
    record: &ScanRecord,
    compression: Option<u8>,
) -> Result<()> {
    let file = File::create(path)?;
    set_attr_str_file(&file, "escan_format_version", FORMAT_VERSION)?;
    set_attr_str_file(&file, "title", TITLE)?;

    let scan = file.create_group("scan")?;
    scan.new_attr::<u8>()
        .create("dimension")?
        .write_scalar(&record.dimension)?;

    let tables = [
        ("positions", &record.positions),
        ("detectors", &record.detectors),
        ("detectors_corrected", &record.detectors_corrected),
        ("sums", &record.sums),
        ("sums_corrected", &record.sums_corrected),
    ];
    for (name, table) in tables {
        write_array(&scan, name, table, compression)?;
    }
    if let Some(ratio) = &record.intensity_ratio {
        write_array(&scan, "intensity_ratio", ratio, compression)?;
    }
    write_array(&scan, "x", &record.x, None)?;
    write_array(&scan, "y", &record.y, None)?;

    let metadata = CacheMetadata {
        position_names: record.position_names.clone(),
        detector_names: record.detector_names.clone(),
        sum_groups: record.sum_groups.clone(),
        x_name: record.x_name.clone(),
        y_name: record.y_name.clone(),
        user_titles: record.user_titles.clone(),
        pv_list: record.pv_list.clone(),
        scan_regions: record.scan_regions.clone(),
        info: record.info.clone(),
        start_time: record.start_time.clone(),
        stop_time: record.stop_time.clone(),
        warnings: record.warnings.clone(),
    };
    write_string_dataset(&scan, "metadata", &serde_json::to_string(&metadata)?)?;

    if let Some(cube) = &record.full_xrf {
        let xrf = file.create_group("full_xrf")?;
        write_array(&xrf, "energies", &cube.energies, None)?;
        write_array(&xrf, "data", &cube.data, compression)?;
        write_string_dataset(&xrf, "header", &cube.header)?;
    }

    file.new_attr::<u8>().create("complete")?.write_scalar(&1u8)?;
    Ok(())
}

/// Read a record written by [`write_record`].
///
/// # Errors
/// Returns [`Error::CacheCorrupt`] if the version tag or completion
/// sentinel is missing or the stored arrays are inconsistent, and an HDF5
/// error if the file cannot be read.
pub fn read_record<P: AsRef<Path>>(path: P) -> Result<ScanRecord> {
    let file = File::open(path)?;
    match read_attr_opt_string(&file, "escan_format_version")? {
        Some(version) if version == FORMAT_VERSION => {}
        Some(version) => {
            return Err(Error::CacheCorrupt(format!(
                "format version {version}, expected {FORMAT_VERSION}"
            )))
        }
        None => return Err(Error::CacheCorrupt("no format version".to_string())),
    }
    if read_attr_opt::<u8>(&file, "complete")? != Some(1) {
        return Err(Error::CacheCorrupt("file was not completely written".to_string()));
    }

    let scan = file.group("scan")?;
    let dimension: u8 = scan.attr("dimension")?.read_scalar()?;
    let metadata: CacheMetadata =
        serde_json::from_str(&read_string_dataset(&scan, "metadata")?)?;

    let full_xrf = match file.group("full_xrf") {
        Ok(xrf) => Some(XrfCube {
            energies: read_array::<f64, Ix2>(&xrf, "energies")?,
            data: read_array::<u32, _>(&xrf, "data")?,
            header: read_string_dataset(&xrf, "header")?,
        }),
        Err(_) => None,
    };

    let record = ScanRecord {
        dimension,
        position_names: metadata.position_names,
        detector_names: metadata.detector_names,
        positions: read_array(&scan, "positions")?,
        detectors: read_array(&scan, "detectors")?,
        detectors_corrected: read_array(&scan, "detectors_corrected")?,
        sums: read_array(&scan, "sums")?,
        sums_corrected: read_array(&scan, "sums_corrected")?,
        sum_groups: metadata.sum_groups,
        intensity_ratio: read_array_opt(&scan, "intensity_ratio")?,
        x: read_array::<f64, Ix1>(&scan, "x")?,
        y: read_array::<f64, Ix1>(&scan, "y")?,
        x_name: metadata.x_name,
        y_name: metadata.y_name,
        user_titles: metadata.user_titles,
        pv_list: metadata.pv_list,
        scan_regions: metadata.scan_regions,
        info: metadata.info,
        start_time: metadata.start_time,
        stop_time: metadata.stop_time,
        full_xrf,
        warnings: metadata.warnings,
    };
    record
        .validate()
        .map_err(|e| Error::CacheCorrupt(e.to_string()))?;
    Ok(record)
}

fn write_array<T, D>(
    group: &Group,
    name: &str,
    array: &ndarray::Array<T, D>,
    compression: Option<u8>,
) -> Result<()>
where
    T: H5Type,
    D: Dimension,
{
    let shape = array.shape().to_vec();
    let dataset = create_fixed_dataset::<T>(group, name, &shape, compression)?;
    if !array.is_empty() {
        dataset.write(&array.as_standard_layout())?;
    }
    Ok(())
}

fn create_fixed_dataset<T: H5Type>(
    group: &Group,
    name: &str,
    shape: &[usize],
    compression: Option<u8>,
) -> Result<Dataset> {
    let mut builder = group.new_dataset::<T>().shape(shape.to_vec());

    // filters need a chunked layout, which rejects zero-length axes
    if let Some(level) = compression.filter(|_| shape.iter().all(|&n| n > 0)) {
        builder = builder.chunk(shape.to_vec()).shuffle().deflate(level);
    }

    Ok(builder.create(name)?)
}

fn read_array<T, D>(group: &Group, name: &str) -> Result<ndarray::Array<T, D>>
where
    T: H5Type,
    D: Dimension,
{
    let dataset = group.dataset(name)?;
    let data = dataset.read_dyn::<T>()?;
    data.into_dimensionality::<D>()
        .map_err(|e| Error::CacheCorrupt(format!("dataset {name}: {e}")))
}

fn read_array_opt(group: &Group, name: &str) -> Result<Option<ArrayD<f64>>> {
    match group.dataset(name) {
        Ok(_) => Ok(Some(read_array(group, name)?)),
        Err(_) => Ok(None),
    }
}

fn write_string_dataset(group: &Group, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    group
        .new_dataset::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn read_string_dataset(group: &Group, name: &str) -> Result<String> {
    let value: VarLenUnicode = group.dataset(name)?.read_scalar()?;
    Ok(value.to_string())
}

fn set_attr_str_file(file: &File, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    file.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn read_attr_opt<T: H5Type + Clone>(group: &Group, name: &str) -> Result<Option<T>> {
    match group.attr(name) {
        Ok(attr) => Ok(Some(attr.read_scalar::<T>()?)),
        Err(_) => Ok(None),
    }
}

fn read_attr_opt_string(group: &Group, name: &str) -> Result<Option<String>> {
    match group.attr(name) {
        Ok(attr) => {
            let value: VarLenUnicode = attr.read_scalar()?;
            Ok(Some(value.to_string()))
        }
        Err(_) => Ok(None),
    }
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::CacheCorrupt(format!("invalid utf-8 string: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use escan_parse::parse_scan;
    use ndarray::{Array2, IxDyn};
    use tempfile::{tempdir, NamedTempFile};

    const RASTER: &str = "\
; Epics Scan 2 dimensional scan
; scan dimension = 2
; User Titles:
;   map of grain 3
; PV list:
;   13IDE:en.VAL = 7200
; Column Labels:
; P1 = (Fine X) --> 13IDE:m1.VAL
; D1 = (I0) --> 13IDE:scaler1.S2
; D2 = (mca1: Fe Ka) --> 13SDD1:mca1.R0
; D3 = (mca2: Fe Ka) --> 13SDD1:mca2.R0
; D4 = (Det1 icr) --> 13SDD1:dxp1:ICR
; D5 = (Det2 icr) --> 13SDD1:dxp2:ICR
; D6 = (Det1 ocr) --> 13SDD1:dxp1:OCR
; D7 = (Det2 ocr) --> 13SDD1:dxp2:OCR
;2D 13IDE:m2.VAL: 0.50
; Scan began at      2026-10-16 10:00:00
;----------------
; P1 D1 D2 D3 D4 D5 D6 D7
1.0 100 5 6 100 200 80 100
1.1 101 7 8 110 210 100 105
;2D 13IDE:m2.VAL: 0.51
1.0 102 9 10 100 100 100 100
1.1 103 11 12 90 180 90 90
;2D 13IDE:m2.VAL: 0.52
1.0 104 13
";

    fn parsed() -> ScanRecord {
        parse_scan(RASTER).unwrap()
    }

    #[test]
    fn test_cache_roundtrip() {
        let mut record = parsed();
        assert!(record.is_truncated());
        assert!(record.intensity_ratio.is_some());
        record.full_xrf = Some(XrfCube {
            energies: Array2::from_shape_fn((2, 3), |(e, i)| e as f64 + 0.01 * i as f64),
            data: ArrayD::from_shape_fn(IxDyn(&[2, 2, 2, 3]), |ix| {
                u32::try_from(ix[0] * 100 + ix[1] * 10 + ix[3]).unwrap()
            }),
            header: "VERSION:    3.1\nELEMENTS:              2".to_string(),
        });

        let file = NamedTempFile::new().unwrap();
        write_record(file.path(), &record, Some(5)).unwrap();
        let loaded = read_record(file.path()).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_cache_roundtrip_uncompressed() {
        let mut record = parsed();
        record.full_xrf = None;
        let file = NamedTempFile::new().unwrap();
        write_record(file.path(), &record, None).unwrap();
        assert_eq!(read_record(file.path()).unwrap(), record);
    }

    #[test]
    fn test_missing_sentinel() {
        let file = NamedTempFile::new().unwrap();
        {
            let h5 = File::create(file.path()).unwrap();
            set_attr_str_file(&h5, "escan_format_version", FORMAT_VERSION).unwrap();
        }
        let err = Hdf5Cache::default().read(file.path()).unwrap_err();
        assert!(matches!(err, Error::CacheCorrupt(_)));
    }

    #[test]
    fn test_version_mismatch() {
        let file = NamedTempFile::new().unwrap();
        {
            let h5 = File::create(file.path()).unwrap();
            set_attr_str_file(&h5, "escan_format_version", "0").unwrap();
            h5.new_attr::<u8>()
                .create("complete")
                .unwrap()
                .write_scalar(&1u8)
                .unwrap();
        }
        let err = read_record(file.path()).unwrap_err();
        assert!(matches!(err, Error::CacheCorrupt(msg) if msg.contains("version")));
    }

    #[test]
    fn test_not_hdf5() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scan.001.h5");
        std::fs::write(&path, "plain text").unwrap();
        assert!(matches!(
            Hdf5Cache::default().read(&path),
            Err(Error::CacheCorrupt(_))
        ));
    }

    #[test]
    fn test_cache_write_replaces_file() {
        let dir = tempdir().unwrap();
        let cache = Hdf5Cache::new(None);
        let path = cache.cache_path(&dir.path().join("scan.001")).unwrap();
        assert!(path.ends_with("scan.001.h5"));

        cache.write(&parsed(), &path).unwrap();
        cache.write(&parsed(), &path).unwrap();
        assert!(!sibling_path(&path, ".partial").exists());
        assert_eq!(cache.read(&path).unwrap(), parsed());
    }
}
