//! Section accumulation.
//!
//! Walks the classified line stream once and buckets content into a
//! [`ParseState`], which the array builder consumes to produce a record.

use std::collections::BTreeMap;

use escan_core::PartialData;
use log::{debug, warn};

use crate::mode::{is_comment, strip_marker, LineKind, ModeMachine, Section};
use crate::{Error, Result};

/// Substring every escan file carries on its first line.
pub const FILE_MARKER: &str = "Epics Scan";

/// Column at which timestamps start on `Scan began/ended at` lines.
const TIMESTAMP_COLUMN: usize = 20;

/// Returns true if `first_line` identifies an Epics Scan file.
#[must_use]
pub fn sniff(first_line: &str) -> bool {
    first_line.contains(FILE_MARKER)
}

/// Everything collected from the text before arrays are built.
#[derive(Debug, Clone, Default)]
pub struct ParseState {
    /// 1 or 2.
    pub dimension: u8,
    /// Raw numeric rows, in file order.
    pub rows: Vec<Vec<f64>>,
    /// Slow-axis value from each `2d` marker.
    pub slow_axis: Vec<f64>,
    /// Slow-axis positioner name from the `2d` markers.
    pub slow_axis_name: String,
    /// Data row count at each `2d` marker seen after data started.
    pub running_totals: Vec<usize>,
    /// `P`/`D` column tags.
    pub legend: Option<Vec<String>>,
    /// `KEY = (Label) --> PV` strings.
    pub column_details: Vec<String>,
    pub user_titles: Vec<String>,
    pub pv_list: Vec<String>,
    pub scan_regions: Vec<String>,
    pub info: BTreeMap<String, String>,
    pub start_time: String,
    pub stop_time: String,
    pub warnings: Vec<PartialData>,
}

impl ParseState {
    /// Running totals closed off with the final row count.
    #[must_use]
    pub fn row_totals(&self) -> Vec<usize> {
        let mut totals = self.running_totals.clone();
        totals.push(self.rows.len());
        totals
    }
}

/// Accumulate the sections of an escan file.
///
/// # Errors
/// Returns [`Error::Format`] if the first line is not an Epics Scan header or
/// a line cannot be interpreted, and [`Error::EmptyScan`] if the PV list,
/// column labels or data are missing.
pub fn accumulate(text: &str) -> Result<ParseState> {
    let mut lines = text
        .lines()
        .map(|l| l.trim_end_matches(['\r', '\n']))
        .enumerate();

    match lines.next() {
        Some((_, first)) if sniff(first) => {}
        _ => {
            return Err(Error::Format(format!(
                "first line does not contain {FILE_MARKER:?}"
            )))
        }
    }

    let mut state = ParseState {
        dimension: 1,
        ..ParseState::default()
    };
    let mut machine = ModeMachine::new();

    while let Some((index, raw)) = lines.next() {
        let lineno = index + 1;
        let kind = machine.feed(raw);
        if kind == LineKind::Blank {
            continue;
        }

        match machine.mode() {
            Some(Section::TwoD) => {
                state.dimension = 2;
                let words: Vec<&str> = raw.split_whitespace().collect();
                let value = words
                    .get(2)
                    .and_then(|w| w.parse::<f64>().ok())
                    .ok_or_else(|| {
                        Error::Format(format!("line {lineno}: bad 2D row marker {raw:?}"))
                    })?;
                state.slow_axis.push(value);
                if state.slow_axis_name.is_empty() {
                    state.slow_axis_name = words[1].trim_end_matches(':').to_string();
                }
                if !state.rows.is_empty() {
                    state.running_totals.push(state.rows.len());
                }
                machine.reset();
            }
            Some(Section::EpicsScan) => {
                let notice = PartialData::SecondScanAppended { line: lineno };
                warn!("{notice}");
                state.warnings.push(notice);
                break;
            }
            Some(Section::Data) => {
                if matches!(kind, LineKind::Numeric | LineKind::Text) {
                    state.rows.push(parse_row(raw, lineno)?);
                }
            }
            Some(Section::Rule) => {
                if state.legend.is_none() {
                    if let Some((_, next)) = lines.next() {
                        let legend = strip_marker(next)
                            .split_whitespace()
                            .map(str::to_string)
                            .collect();
                        state.legend = Some(legend);
                    }
                }
            }
            Some(Section::DoubleRule) => {}
            Some(Section::UserTitles) => state.user_titles.push(strip_marker(raw).to_string()),
            Some(Section::PvList) => state.pv_list.push(strip_marker(raw).to_string()),
            Some(Section::ScanRegions) => state.scan_regions.push(strip_marker(raw).to_string()),
            Some(Section::ColumnLabels) => {
                state.column_details.push(strip_marker(raw).to_string());
            }
            Some(Section::ScanBegan) => {
                if matches!(kind, LineKind::Header(_)) {
                    state.start_time = timestamp(raw);
                }
            }
            Some(Section::ScanEnded) => {
                if matches!(kind, LineKind::Header(_)) {
                    state.stop_time = timestamp(raw);
                }
            }
            None => read_info_line(&mut state, raw)?,
        }
    }

    finish_sections(&mut state)?;
    debug!(
        "accumulated {} data rows, {} columns labels, dimension {}",
        state.rows.len(),
        state.column_details.len(),
        state.dimension
    );
    Ok(state)
}

fn parse_row(raw: &str, lineno: usize) -> Result<Vec<f64>> {
    raw.split_whitespace()
        .map(|w| {
            w.parse::<f64>()
                .map_err(|_| Error::Format(format!("line {lineno}: {w:?} is not a number")))
        })
        .collect()
}

fn timestamp(raw: &str) -> String {
    raw.chars()
        .skip(TIMESTAMP_COLUMN)
        .collect::<String>()
        .trim()
        .to_string()
}

#[allow(clippy::cast_possible_truncation)]
fn read_info_line(state: &mut ParseState, raw: &str) -> Result<()> {
    let body = if is_comment(raw) { &raw[1..] } else { raw };
    let Some((key, value)) = body.split_once('=') else {
        return Ok(());
    };
    let (key, value) = (key.trim(), value.trim());
    if key == "scan dimension" {
        let dimension = value
            .parse::<f64>()
            .map_err(|_| Error::Format(format!("bad scan dimension {value:?}")))?;
        state.dimension = match dimension as i64 {
            1 => 1,
            2 => 2,
            other => {
                return Err(Error::Format(format!("unsupported scan dimension {other}")));
            }
        };
    }
    state.info.insert(key.to_string(), value.to_string());
    Ok(())
}

/// Drop the header lines recorded as the first entry of each list section.
fn finish_sections(state: &mut ParseState) -> Result<()> {
    if state.column_details.is_empty() {
        return Err(Error::EmptyScan("no column labels section".to_string()));
    }
    state.column_details.remove(0);
    if state.column_details.is_empty() {
        return Err(Error::EmptyScan("column labels section is empty".to_string()));
    }
    if state.pv_list.is_empty() {
        return Err(Error::EmptyScan("no PV list section".to_string()));
    }
    state.pv_list.remove(0);

    for list in [&mut state.user_titles, &mut state.scan_regions] {
        if !list.is_empty() {
            list.remove(0);
        }
    }
    if state.rows.is_empty() {
        return Err(Error::EmptyScan("no data rows".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT_SCAN: &str = "\
; Epics Scan 1 dimensional scan
; current scan = 4
; scan prefix = 13IDC:scan1
; User Titles:
;   Fe foil
; PV list:
;   13IDC:m1.VAL = 1.5
; Scan Regions:
;   7000 7100 50
; Column Labels:
; P1 = (Energy) --> 13IDC:En.VAL
; D1 = (I0) --> 13IDC:scaler1.S2
; Scan began at      2026-10-16 10:00:00
;---------------------------------
; P1  D1
7000.0  100
7050.0  110
; Scan ended at      2026-10-16 10:05:00
";

    #[test]
    fn test_accumulate_sections() {
        let state = accumulate(SHORT_SCAN).unwrap();
        assert_eq!(state.dimension, 1);
        assert_eq!(state.user_titles, vec!["Fe foil"]);
        assert_eq!(state.pv_list, vec!["13IDC:m1.VAL = 1.5"]);
        assert_eq!(state.scan_regions, vec!["7000 7100 50"]);
        assert_eq!(state.column_details.len(), 2);
        assert_eq!(state.column_details[0], "P1 = (Energy) --> 13IDC:En.VAL");
        assert_eq!(
            state.legend,
            Some(vec!["P1".to_string(), "D1".to_string()])
        );
        assert_eq!(state.rows, vec![vec![7000.0, 100.0], vec![7050.0, 110.0]]);
        assert_eq!(state.info["current scan"], "4");
        assert_eq!(state.start_time, "2026-10-16 10:00:00");
        assert_eq!(state.stop_time, "2026-10-16 10:05:00");
    }

    #[test]
    fn test_header_only_lists_are_empty() {
        let text = SHORT_SCAN.replace(";   Fe foil\n", "").replace(";   7000 7100 50\n", "");
        let state = accumulate(&text).unwrap();
        assert!(state.user_titles.is_empty());
        assert!(state.scan_regions.is_empty());
    }

    #[test]
    fn test_sniff_failure() {
        let err = accumulate("not a scan file\n1 2 3\n").unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert!(matches!(accumulate(""), Err(Error::Format(_))));
    }

    #[test]
    fn test_missing_column_labels() {
        let text = "; Epics Scan\n; PV list:\n;  a\n1.0 2.0\n";
        assert!(matches!(accumulate(text), Err(Error::EmptyScan(_))));
    }

    #[test]
    fn test_second_scan_stops_reading() {
        let text = format!("{SHORT_SCAN}; Epics Scan 1 dimensional scan\n7100.0 120\n");
        let state = accumulate(&text).unwrap();
        assert_eq!(state.rows.len(), 2);
        assert!(matches!(
            state.warnings.as_slice(),
            [PartialData::SecondScanAppended { .. }]
        ));
    }

    #[test]
    fn test_two_d_markers() {
        let text = "\
; Epics Scan 2 dimensional scan
; scan dimension = 2
; PV list:
; Column Labels:
; P1 = (X) --> 13IDE:m1.VAL
; D1 = (I0) --> 13IDE:scaler1.S2
;2D 13IDE:m2.VAL: 0.5
;-----------
; P1 D1
1.0 10
2.0 20
;2D 13IDE:m2.VAL: 0.6
1.0 11
2.0 21
";
        let state = accumulate(text).unwrap();
        assert_eq!(state.dimension, 2);
        assert_eq!(state.slow_axis, vec![0.5, 0.6]);
        assert_eq!(state.slow_axis_name, "13IDE:m2.VAL");
        assert_eq!(state.running_totals, vec![2]);
        assert_eq!(state.row_totals(), vec![2, 4]);
        assert!(state.pv_list.is_empty());
    }

    #[test]
    fn test_bad_data_row() {
        let text = SHORT_SCAN.replace("7050.0  110", "7050.0  1x0");
        assert!(matches!(accumulate(&text), Err(Error::Format(_))));
    }

    #[test]
    fn test_unsupported_dimension() {
        let text = SHORT_SCAN.replace("; current scan = 4", "; scan dimension = 3");
        assert!(matches!(accumulate(&text), Err(Error::Format(_))));
    }
}
