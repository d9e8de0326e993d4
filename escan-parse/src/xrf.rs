//! Full XRF spectra sidecar parsing.
//!
//! A `.fullxrf` file carries a `;`-prefixed header (calibration and ROI
//! definitions, one value per detector element) followed by one line per
//! scan point: `ix iy` and then every element's spectrum as integers.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use escan_core::XrfCube;
use log::debug;
use ndarray::{Array2, ArrayD, IxDyn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// First-line marker of a full XRF spectra file.
pub const XRF_MARKER: &str = "; MCA Spectra";

const HEADER_END: &str = ";----";

/// Sidecar reader configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XrfConfig {
    /// Energy channels per detector element.
    pub energy_channels: usize,
}

impl Default for XrfConfig {
    fn default() -> Self {
        Self {
            energy_channels: 2048,
        }
    }
}

/// Region of interest for one detector element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Roi {
    pub label: String,
    pub left: i64,
    pub right: i64,
}

/// Calibration and ROI header of a sidecar file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct XrfHeader {
    pub offset: Vec<f64>,
    pub slope: Vec<f64>,
    pub quad: Vec<f64>,
    /// ROIs keyed by ROI number, one entry per element in encounter order.
    pub rois: BTreeMap<usize, Vec<Roi>>,
}

impl XrfHeader {
    /// Number of detector elements, taken from the offset calibration.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.offset.len()
    }

    /// Energy axis per element: `offset + i * (slope + i * quad)`.
    #[must_use]
    pub fn energies(&self, channels: usize) -> Array2<f64> {
        Array2::from_shape_fn((self.num_elements(), channels), |(e, i)| {
            #[allow(clippy::cast_precision_loss)]
            let i = i as f64;
            self.offset[e] + i * (self.slope[e] + i * self.quad[e])
        })
    }
}

/// Point grid the sidecar must cover.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct XrfGrid {
    /// Fast-axis points.
    pub x_points: usize,
    /// Slow-axis rows, `None` for 1D scans.
    pub y_points: Option<usize>,
}

/// Parse a sidecar file.
///
/// `date` is written into the legacy header text.
///
/// # Errors
/// Returns [`Error::XrfFormat`] if the marker or calibration header is
/// missing, [`Error::Format`] for malformed spectrum lines and
/// [`Error::XrfMissingPoint`] if a grid point has no spectrum.
pub fn parse_full_xrf(
    text: &str,
    grid: XrfGrid,
    config: &XrfConfig,
    date: &str,
) -> Result<XrfCube> {
    let mut lines = text.lines().enumerate().peekable();
    match lines.next() {
        Some((_, first)) if first.starts_with(XRF_MARKER) => {}
        _ => return Err(Error::XrfFormat(format!("missing {XRF_MARKER:?} marker"))),
    }

    let mut header = XrfHeader::default();
    let mut closed = false;
    while let Some((_, line)) = lines.next_if(|(_, l)| l.starts_with(';')) {
        if line.starts_with(HEADER_END) {
            closed = true;
            break;
        }
        read_header_line(&mut header, line)?;
    }
    // the line after the separator is a column caption, commented or not
    if closed {
        lines.next();
    }
    while lines.next_if(|(_, l)| l.starts_with(';')).is_some() {}

    let n_elements = header.num_elements();
    if n_elements == 0 {
        return Err(Error::XrfFormat("no CAL_OFFSET calibration".to_string()));
    }
    if header.slope.len() != n_elements || header.quad.len() != n_elements {
        return Err(Error::XrfFormat(format!(
            "calibration has {} offsets, {} slopes, {} quads",
            n_elements,
            header.slope.len(),
            header.quad.len()
        )));
    }

    let channels = config.energy_channels;
    let per_point = n_elements * channels;
    let body: Vec<(usize, &str)> = lines.filter(|(_, l)| !l.trim().is_empty()).collect();
    let spectra = body
        .par_iter()
        .map(|&(index, line)| parse_spectrum_line(line, index + 1, per_point))
        .collect::<Result<Vec<_>>>()?;
    debug!("read {} spectra with {n_elements} elements", spectra.len());

    let last_iy = spectra.last().map_or(1, |s| s.1);
    let points: HashMap<(i64, i64), Vec<u32>> = spectra
        .into_iter()
        .map(|(ix, iy, counts)| ((ix, iy), counts))
        .collect();

    let (keys, shape): (Vec<(i64, i64)>, Vec<usize>) = match grid.y_points {
        Some(ny) => (
            (1..=to_i64(ny))
                .flat_map(|iy| (1..=to_i64(grid.x_points)).map(move |ix| (ix, iy)))
                .collect(),
            vec![ny, grid.x_points, n_elements, channels],
        ),
        None => (
            (1..=to_i64(grid.x_points)).map(|ix| (ix, last_iy)).collect(),
            vec![grid.x_points, n_elements, channels],
        ),
    };

    let mut flat = Vec::with_capacity(keys.len() * per_point);
    for (ix, iy) in keys {
        let counts = points
            .get(&(ix, iy))
            .ok_or(Error::XrfMissingPoint { ix, iy })?;
        flat.extend_from_slice(counts);
    }
    let data = ArrayD::from_shape_vec(IxDyn(&shape), flat)
        .map_err(|e| Error::Format(format!("full XRF shape: {e}")))?;

    Ok(XrfCube {
        energies: header.energies(channels),
        data,
        header: legacy_header(&header, channels, date),
    })
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn read_header_line(header: &mut XrfHeader, line: &str) -> Result<()> {
    let body = line[1..].trim();
    let Some((key, rest)) = body.split_once(':') else {
        return Ok(());
    };
    let key = key.trim();
    match key {
        "CAL_OFFSET" => header.offset = parse_floats(key, rest)?,
        "CAL_SLOPE" => header.slope = parse_floats(key, rest)?,
        "CAL_QUAD" => header.quad = parse_floats(key, rest)?,
        _ => {
            if let Some(number) = key.strip_prefix("ROI") {
                let number = number
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| Error::XrfFormat(format!("bad ROI key {key:?}")))?;
                let roi = parse_roi(rest)
                    .ok_or_else(|| Error::XrfFormat(format!("bad ROI line {line:?}")))?;
                header.rois.entry(number).or_default().push(roi);
            }
        }
    }
    Ok(())
}

fn parse_floats(key: &str, text: &str) -> Result<Vec<f64>> {
    text.split_whitespace()
        .map(|w| {
            w.parse::<f64>()
                .map_err(|_| Error::XrfFormat(format!("{key}: {w:?} is not a number")))
        })
        .collect()
}

/// `label: left: right` or `label left right`.
fn parse_roi(text: &str) -> Option<Roi> {
    let parts: Vec<&str> = text.split(':').map(str::trim).collect();
    if let [label, left, right] = parts.as_slice() {
        return Some(Roi {
            label: (*label).to_string(),
            left: left.parse().ok()?,
            right: right.parse().ok()?,
        });
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let [label @ .., left, right] = words.as_slice() else {
        return None;
    };
    Some(Roi {
        label: label.join(" "),
        left: left.parse().ok()?,
        right: right.parse().ok()?,
    })
}

fn parse_spectrum_line(line: &str, lineno: usize, per_point: usize) -> Result<(i64, i64, Vec<u32>)> {
    let mut words = line.split_whitespace();
    let mut index = || {
        words
            .next()
            .and_then(|w| w.parse::<i64>().ok())
            .ok_or_else(|| Error::Format(format!("full XRF line {lineno}: bad point index")))
    };
    let ix = index()?;
    let iy = index()?;
    let counts = words
        .map(|w| {
            w.parse::<u32>()
                .map_err(|_| Error::Format(format!("full XRF line {lineno}: bad count {w:?}")))
        })
        .collect::<Result<Vec<u32>>>()?;
    if counts.len() != per_point {
        return Err(Error::Format(format!(
            "full XRF line {lineno}: {} counts, expected {per_point}",
            counts.len()
        )));
    }
    Ok((ix, iy, counts))
}

/// Format like C's `%15.8e`.
fn sci(value: f64) -> String {
    let formatted = format!("{value:.8e}");
    let (mantissa, exponent) = formatted
        .split_once('e')
        .unwrap_or((formatted.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{:>15}", format!("{mantissa}e{sign}{:02}", exponent.abs()))
}

/// Header text in the legacy multi-element MCA file layout.
fn legacy_header(header: &XrfHeader, channels: usize, date: &str) -> String {
    let n = header.num_elements();
    let repeat = |v: &str| vec![v; n].join(" ");
    let calib = |values: &[f64]| values.iter().map(|v| sci(*v)).collect::<Vec<_>>().join(" ");
    let n_rois = header.rois.len().to_string();

    let mut out = String::new();
    let _ = writeln!(out, "VERSION:    3.1");
    let _ = writeln!(out, "ELEMENTS:              {n}");
    let _ = writeln!(out, "DATE:       {date}");
    let _ = writeln!(out, "CHANNELS:           {channels}");
    let _ = writeln!(out, "ROIS:        {}", repeat(&n_rois));
    let _ = writeln!(out, "REAL_TIME:   {}", repeat("1.0"));
    let _ = writeln!(out, "LIVE_TIME:   {}", repeat("1.0"));
    let _ = writeln!(out, "CAL_OFFSET:  {}", calib(&header.offset));
    let _ = writeln!(out, "CAL_SLOPE:   {}", calib(&header.slope));
    let _ = writeln!(out, "CAL_QUAD:    {}", calib(&header.quad));
    let _ = write!(out, "TWO_THETA:   {}", repeat("10.0000000"));

    for (i, rois) in header.rois.values().enumerate() {
        let lefts: Vec<String> = rois.iter().map(|r| r.left.to_string()).collect();
        let rights: Vec<String> = rois.iter().map(|r| r.right.to_string()).collect();
        let labels: Vec<&str> = rois.iter().map(|r| r.label.as_str()).collect();
        let _ = write!(out, "\nROI_{i}_LEFT:   {}", lefts.join(" "));
        let _ = write!(out, "\nROI_{i}_RIGHT:  {}", rights.join(" "));
        let _ = write!(out, "\nROI_{i}_LABEL:  {} & ", labels.join(" & "));
    }
    out
}
