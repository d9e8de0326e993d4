//! Parsed scan record types.
//!
//! A [`ScanRecord`] is built once per file load, either by the ASCII parser
//! or from the on-disk cache, and is only read afterwards.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{Array1, Array2, ArrayD, Axis};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A channel label paired with the process variable it was recorded from.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelName {
    /// User-facing label, e.g. `Fe Ka` or `mca1: Fe Ka`.
    pub label: String,
    /// Source identifier (EPICS PV name).
    pub source: String,
}

impl ChannelName {
    /// Creates a new channel name.
    pub fn new(label: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            source: source.into(),
        }
    }
}

/// One logical sum channel: detector rows sharing a base name.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SumGroup {
    /// Base name after stripping the `mca` qualifier.
    pub name: String,
    /// Detector row indices summed into this group, in detector order.
    pub members: Vec<usize>,
}

/// Non-fatal notice that part of the file was not used.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PartialData {
    /// Trailing 2D rows did not fit the rectangular grid and were dropped.
    TrailingRowsDropped {
        /// Number of `2d` row markers seen in the file.
        marker_rows: usize,
        /// Number of rows kept.
        kept_rows: usize,
        /// Number of data points discarded.
        dropped_points: usize,
    },
    /// A second `Epics Scan` header was found; reading stopped at that line.
    SecondScanAppended {
        /// One-based line number of the second header.
        line: usize,
    },
}

impl fmt::Display for PartialData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrailingRowsDropped {
                marker_rows,
                kept_rows,
                dropped_points,
            } => write!(
                f,
                "some trailing data was lost: kept {kept_rows} of {marker_rows} rows, \
                 dropped {dropped_points} points"
            ),
            Self::SecondScanAppended { line } => write!(
                f,
                "file appears to have a second scan appended at line {line}; ignoring the rest"
            ),
        }
    }
}

/// Energy-resolved spectra read from a `.fullxrf` sidecar file.
#[derive(Debug, Clone, PartialEq)]
pub struct XrfCube {
    /// Energy axis per detector element, shape `[elements, channels]`.
    pub energies: Array2<f64>,
    /// Counts, shape `[y, x, elements, channels]` (2D) or `[x, elements, channels]` (1D).
    pub data: ArrayD<u32>,
    /// Legacy MCA header text kept for export.
    pub header: String,
}

impl XrfCube {
    /// Number of detector elements.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.energies.nrows()
    }

    /// Number of energy channels per element.
    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.energies.ncols()
    }
}

/// The parsed contents of one scan file.
///
/// Array tables have the channel index on axis 0; the remaining axes are
/// `[points]` for 1D scans and `[rows, columns]` for 2D scans.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    /// Scan rank, 1 or 2.
    pub dimension: u8,
    /// Positioner names, one per row of `positions`.
    pub position_names: Vec<ChannelName>,
    /// Raw detector names, one per row of `detectors`.
    pub detector_names: Vec<ChannelName>,
    /// Positioner values.
    pub positions: ArrayD<f64>,
    /// Raw detector counts.
    pub detectors: ArrayD<f64>,
    /// Detector counts with the ICR/OCR deadtime correction applied.
    pub detectors_corrected: ArrayD<f64>,
    /// Raw per-group detector sums.
    pub sums: ArrayD<f64>,
    /// Per-group sums of the corrected detectors.
    pub sums_corrected: ArrayD<f64>,
    /// Sum group definitions, one per row of `sums`.
    pub sum_groups: Vec<SumGroup>,
    /// ICR/OCR ratio per detector element, when both channel kinds are present.
    pub intensity_ratio: Option<ArrayD<f64>>,
    /// Fast-axis coordinates.
    pub x: Array1<f64>,
    /// Slow-axis coordinates (empty for 1D scans).
    pub y: Array1<f64>,
    /// Fast-axis positioner label.
    pub x_name: String,
    /// Slow-axis PV name (empty for 1D scans).
    pub y_name: String,
    /// User title lines.
    pub user_titles: Vec<String>,
    /// `PV = value` lines recorded at scan start.
    pub pv_list: Vec<String>,
    /// Scan region description lines.
    pub scan_regions: Vec<String>,
    /// Miscellaneous `key = value` header entries.
    pub info: BTreeMap<String, String>,
    /// Scan start timestamp as written in the file.
    pub start_time: String,
    /// Scan end timestamp as written in the file.
    pub stop_time: String,
    /// Full XRF spectra from the sidecar file.
    pub full_xrf: Option<XrfCube>,
    /// Partial-data notices raised while parsing.
    pub warnings: Vec<PartialData>,
}

impl ScanRecord {
    /// Returns true for 2D (raster) scans.
    #[must_use]
    pub fn is_2d(&self) -> bool {
        self.dimension == 2
    }

    /// Returns true if a full XRF cube was loaded.
    #[must_use]
    pub fn has_full_xrf(&self) -> bool {
        self.full_xrf.is_some()
    }

    /// Returns true if any input data was dropped while parsing.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Sum channel names, parallel to the rows of `sums`.
    pub fn sum_names(&self) -> impl Iterator<Item = &str> {
        self.sum_groups.iter().map(|g| g.name.as_str())
    }

    /// Positioner labels in column order.
    #[must_use]
    pub fn position_channel_names(&self) -> Vec<String> {
        self.position_names.iter().map(|n| n.label.clone()).collect()
    }

    /// Sum names followed by raw detector labels.
    #[must_use]
    pub fn detector_channel_names(&self) -> Vec<String> {
        self.sum_names()
            .map(str::to_string)
            .chain(self.detector_names.iter().map(|n| n.label.clone()))
            .collect()
    }

    /// Check the shape invariants tying names, tables and axes together.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] describing the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        if self.dimension != 1 && self.dimension != 2 {
            return Err(Error::ShapeMismatch(format!(
                "unsupported dimension {}",
                self.dimension
            )));
        }
        let rank = usize::from(self.dimension) + 1;
        check_rows("positions", &self.positions, self.position_names.len())?;
        check_rows("detectors", &self.detectors, self.detector_names.len())?;
        check_rows("sums", &self.sums, self.sum_groups.len())?;
        let trailing = &self.positions.shape()[1..];

        let tables = [
            ("positions", &self.positions),
            ("detectors", &self.detectors),
            ("detectors_corrected", &self.detectors_corrected),
            ("sums", &self.sums),
            ("sums_corrected", &self.sums_corrected),
        ];
        for (name, table) in tables {
            if table.ndim() != rank || &table.shape()[1..] != trailing {
                return Err(Error::ShapeMismatch(format!(
                    "{name} has shape {:?}, expected [_, {trailing:?}]",
                    table.shape()
                )));
            }
        }
        if let Some(ratio) = &self.intensity_ratio {
            if ratio.ndim() != rank || &ratio.shape()[1..] != trailing {
                return Err(Error::ShapeMismatch(format!(
                    "intensity ratio has shape {:?}",
                    ratio.shape()
                )));
            }
        }

        let n_det = self.detectors.len_of(Axis(0));
        for group in &self.sum_groups {
            if group.members.is_empty() || group.members.iter().any(|&i| i >= n_det) {
                return Err(Error::ShapeMismatch(format!(
                    "sum group {:?} has members {:?} outside 0..{n_det}",
                    group.name, group.members
                )));
            }
        }

        let n_x = *trailing.last().unwrap_or(&0);
        if self.x.len() != n_x {
            return Err(Error::ShapeMismatch(format!(
                "x axis has {} points, tables have {n_x}",
                self.x.len()
            )));
        }
        if self.is_2d() && self.y.len() != trailing[0] {
            return Err(Error::ShapeMismatch(format!(
                "y axis has {} points, tables have {} rows",
                self.y.len(),
                trailing[0]
            )));
        }
        Ok(())
    }
}

fn check_rows(name: &str, table: &ArrayD<f64>, expected: usize) -> Result<()> {
    if table.ndim() == 0 || table.len_of(Axis(0)) != expected {
        return Err(Error::ShapeMismatch(format!(
            "{name} has shape {:?} but {expected} names",
            table.shape()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, IxDyn};

    fn small_record() -> ScanRecord {
        let positions = ArrayD::from_shape_vec(IxDyn(&[1, 3]), vec![1.0, 2.0, 3.0]).unwrap();
        let detectors =
            ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]).unwrap();
        let sums = ArrayD::from_shape_vec(IxDyn(&[1, 3]), vec![3.0, 3.0, 3.0]).unwrap();
        ScanRecord {
            dimension: 1,
            position_names: vec![ChannelName::new("Energy", "13IDC:En")],
            detector_names: vec![
                ChannelName::new("mca1: Fe Ka", "13SDD1:mca1.R0"),
                ChannelName::new("mca2: Fe Ka", "13SDD1:mca2.R0"),
            ],
            detectors_corrected: detectors.clone(),
            detectors,
            sums_corrected: sums.clone(),
            sums,
            sum_groups: vec![SumGroup {
                name: "Fe Ka".into(),
                members: vec![0, 1],
            }],
            intensity_ratio: None,
            x: arr1(&[1.0, 2.0, 3.0]),
            y: Array1::zeros(0),
            x_name: "Energy".into(),
            y_name: String::new(),
            user_titles: vec![],
            pv_list: vec![],
            scan_regions: vec![],
            info: BTreeMap::new(),
            start_time: String::new(),
            stop_time: String::new(),
            full_xrf: None,
            positions,
            warnings: vec![],
        }
    }

    #[test]
    fn test_valid_record() {
        let record = small_record();
        record.validate().unwrap();
        assert!(!record.is_2d());
        assert!(!record.is_truncated());
        assert_eq!(
            record.detector_channel_names(),
            vec!["Fe Ka", "mca1: Fe Ka", "mca2: Fe Ka"]
        );
        assert_eq!(record.position_channel_names(), vec!["Energy"]);
    }

    #[test]
    fn test_name_count_mismatch() {
        let mut record = small_record();
        record.detector_names.pop();
        assert!(matches!(record.validate(), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_sum_member_out_of_range() {
        let mut record = small_record();
        record.sum_groups[0].members.push(5);
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_partial_data_message() {
        let msg = PartialData::TrailingRowsDropped {
            marker_rows: 4,
            kept_rows: 3,
            dropped_points: 7,
        }
        .to_string();
        assert!(msg.contains("kept 3 of 4 rows"));
    }
}
