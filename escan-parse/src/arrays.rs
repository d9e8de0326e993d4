//! Array construction from accumulated sections.
//!
//! Turns the row-major numeric table into position/detector tables, forms
//! sum groups, splits off ICR/OCR channels, reshapes 2D scans and applies
//! the deadtime correction.

use escan_core::{
    correct_detectors, sum_base_name, sum_rows, ChannelName, ScanRecord, SumGroup,
};
use log::{debug, warn};
use ndarray::{s, Array1, Array2, ArrayD, Axis, IxDyn};

use crate::grid::plan_grid;
use crate::section::ParseState;
use crate::{Error, Result};

/// Info key recording whether ICR/OCR channels were found.
pub const ICR_OCR_KEY: &str = "icr/ocr";

/// Build a scan record from accumulated sections.
///
/// # Errors
/// Returns [`Error::Format`] if the legend, column labels and data columns
/// disagree, and [`Error::InconsistentGrid`] if a 2D scan has no rectangular
/// prefix.
pub fn build_record(mut state: ParseState) -> Result<ScanRecord> {
    let legend = state
        .legend
        .take()
        .ok_or_else(|| Error::Format("missing column legend line".to_string()))?;
    let n_pos = count_tagged(&legend, 'p');
    let n_det = count_tagged(&legend, 'd');
    if n_pos == 0 {
        return Err(Error::Format("legend has no positioner columns".to_string()));
    }

    let grid = if state.dimension == 2 {
        let plan = plan_grid(&state.row_totals(), state.slow_axis.len())?;
        if let Some(notice) = &plan.dropped {
            warn!("{notice}");
            state.warnings.push(notice.clone());
        }
        state.rows.truncate(plan.points());
        state.slow_axis.truncate(plan.rows);
        Some((plan.rows, plan.cols))
    } else {
        None
    };

    let table = transpose_rows(&state.rows, n_pos + n_det)?;
    let (position_names, mut detector_names) = parse_column_details(&state.column_details)?;
    if position_names.len() != n_pos || detector_names.len() != n_det {
        return Err(Error::Format(format!(
            "column labels name {} positioners and {} detectors, legend has {n_pos} and {n_det}",
            position_names.len(),
            detector_names.len()
        )));
    }

    let positions = table.slice(s![..n_pos, ..]).to_owned();
    let mut detectors = table.slice(s![n_pos.., ..]).to_owned();
    let (mut sum_groups, icr, ocr) = form_sum_groups(&detector_names);

    let mut intensity_ratio = None;
    let has_icr_ocr = !icr.is_empty() && icr.len() == ocr.len();
    if has_icr_ocr {
        let icr_rows = detectors.select(Axis(0), &icr);
        let ocr_rows = detectors.select(Axis(0), &ocr);
        intensity_ratio = Some(icr_rows / ocr_rows);

        // ICR/OCR channels are the trailing 2n detectors and sum groups
        let n_drop = 2 * icr.len();
        let keep = detectors.nrows().saturating_sub(n_drop);
        detectors = detectors.slice(s![..keep, ..]).to_owned();
        detector_names.truncate(keep);
        sum_groups.retain(|g| g.members.iter().any(|&i| i < keep));
        if sum_groups.iter().flat_map(|g| &g.members).any(|&i| i >= keep) {
            return Err(Error::Format(
                "ICR/OCR channels are not the trailing detector columns".to_string(),
            ));
        }
        debug!("found {} ICR/OCR channel pairs", icr.len());
    }
    state.info.insert(
        ICR_OCR_KEY.to_string(),
        if has_icr_ocr { "True" } else { "False" }.to_string(),
    );

    let trailing = match grid {
        Some((rows, cols)) => vec![rows, cols],
        None => vec![table.ncols()],
    };
    let positions = reshape(positions, &trailing)?;
    let detectors = reshape(detectors, &trailing)?;
    let intensity_ratio = intensity_ratio
        .map(|ratio| reshape(ratio, &trailing))
        .transpose()?;

    let x: Array1<f64> = if grid.is_some() {
        positions.slice(s![0, 0, ..]).to_owned()
    } else {
        positions.slice(s![0, ..]).to_owned()
    };
    let y = if grid.is_some() {
        Array1::from(std::mem::take(&mut state.slow_axis))
    } else {
        Array1::zeros(0)
    };

    let detectors_corrected =
        correct_detectors(&detectors, &detector_names, intensity_ratio.as_ref());
    let sums = sum_rows(&detectors, &sum_groups);
    let sums_corrected = sum_rows(&detectors_corrected, &sum_groups);

    let record = ScanRecord {
        dimension: if grid.is_some() { 2 } else { 1 },
        x_name: position_names[0].label.clone(),
        y_name: state.slow_axis_name,
        position_names,
        detector_names,
        positions,
        detectors,
        detectors_corrected,
        sums,
        sums_corrected,
        sum_groups,
        intensity_ratio,
        x,
        y,
        user_titles: state.user_titles,
        pv_list: state.pv_list,
        scan_regions: state.scan_regions,
        info: state.info,
        start_time: state.start_time,
        stop_time: state.stop_time,
        full_xrf: None,
        warnings: state.warnings,
    };
    record.validate()?;
    Ok(record)
}

fn count_tagged(legend: &[String], tag: char) -> usize {
    legend
        .iter()
        .filter(|t| t.chars().next().is_some_and(|c| c.eq_ignore_ascii_case(&tag)))
        .count()
}

/// Column-major `[columns, rows]` table from row-major data.
fn transpose_rows(rows: &[Vec<f64>], n_cols: usize) -> Result<Array2<f64>> {
    let mut flat = Vec::with_capacity(rows.len() * n_cols);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != n_cols {
            return Err(Error::Format(format!(
                "data row {i} has {} columns, legend has {n_cols}",
                row.len()
            )));
        }
        flat.extend_from_slice(row);
    }
    let table = Array2::from_shape_vec((rows.len(), n_cols), flat)
        .map_err(|e| Error::Format(format!("data table shape: {e}")))?;
    Ok(table.reversed_axes().as_standard_layout().into_owned())
}

/// Split `KEY = (Label) --> PV` strings into positioner and detector names.
///
/// Parsing stops at the first entry without an `=`.
pub fn parse_column_details(
    details: &[String],
) -> Result<(Vec<ChannelName>, Vec<ChannelName>)> {
    let mut positions = Vec::new();
    let mut detectors = Vec::new();
    for detail in details {
        let Some((key, rest)) = detail.split_once('=') else {
            break;
        };
        let (label, pv) = rest
            .split_once("-->")
            .ok_or_else(|| Error::Format(format!("column label without '-->': {detail:?}")))?;
        let label = label.trim();
        let label = label
            .strip_prefix('(')
            .and_then(|l| l.strip_suffix(')'))
            .unwrap_or(label);
        let name = ChannelName::new(label, pv.trim());
        if key.trim().starts_with('P') {
            positions.push(name);
        } else {
            detectors.push(name);
        }
    }
    Ok((positions, detectors))
}

/// Group consecutive detectors sharing a base name, and collect the row
/// indices of ICR and OCR channels in encounter order.
#[must_use]
pub fn form_sum_groups(names: &[ChannelName]) -> (Vec<SumGroup>, Vec<usize>, Vec<usize>) {
    let mut groups: Vec<SumGroup> = Vec::new();
    let mut icr = Vec::new();
    let mut ocr = Vec::new();

    for (i, name) in names.iter().enumerate() {
        let base = sum_base_name(&name.label);
        let lower = base.to_lowercase();
        if lower.contains("icr") {
            icr.push(i);
        }
        if lower.contains("ocr") {
            ocr.push(i);
        }
        match groups.last_mut() {
            Some(group) if group.name == base => group.members.push(i),
            _ => groups.push(SumGroup {
                name: base,
                members: vec![i],
            }),
        }
    }
    (groups, icr, ocr)
}

fn reshape(table: Array2<f64>, trailing: &[usize]) -> Result<ArrayD<f64>> {
    let mut shape = vec![table.nrows()];
    shape.extend_from_slice(trailing);
    table
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order(IxDyn(&shape))
        .map_err(|e| Error::Format(format!("cannot reshape to {shape:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(labels: &[&str]) -> Vec<ChannelName> {
        labels
            .iter()
            .map(|l| ChannelName::new(*l, "pv"))
            .collect()
    }

    #[test]
    fn test_parse_column_details() {
        let details = vec![
            "P1 = (Energy) --> 13IDC:En.VAL".to_string(),
            "D1 = (I0) --> 13IDC:scaler1.S2".to_string(),
            "D2 = (mca1: Fe Ka) --> 13SDD1:mca1.R0".to_string(),
        ];
        let (pos, det) = parse_column_details(&details).unwrap();
        assert_eq!(pos, vec![ChannelName::new("Energy", "13IDC:En.VAL")]);
        assert_eq!(det[1], ChannelName::new("mca1: Fe Ka", "13SDD1:mca1.R0"));
    }

    #[test]
    fn test_column_detail_without_arrow() {
        let details = vec!["D1 = (I0) 13IDC:scaler1.S2".to_string()];
        assert!(parse_column_details(&details).is_err());
    }

    #[test]
    fn test_form_sum_groups() {
        let dets = names(&[
            "I0",
            "mca1: Fe Ka",
            "mca2: Fe Ka",
            "mca1: Ca Ka",
            "Det1 icr",
            "Det1 ocr",
        ]);
        let (groups, icr, ocr) = form_sum_groups(&dets);
        let group_names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(group_names, vec!["I0", "Fe Ka", "Ca Ka", "Det1 icr", "Det1 ocr"]);
        assert_eq!(groups[1].members, vec![1, 2]);
        assert_eq!(icr, vec![4]);
        assert_eq!(ocr, vec![5]);
    }

    #[test]
    fn test_non_consecutive_names_split() {
        let dets = names(&["mca1: Fe Ka", "I0", "mca2: Fe Ka"]);
        let (groups, _, _) = form_sum_groups(&dets);
        assert_eq!(groups.len(), 3);
    }

    #[test]
    fn test_count_tagged() {
        let legend: Vec<String> = ["P1", "p2", "D1", "d2", "D3"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        assert_eq!(count_tagged(&legend, 'p'), 2);
        assert_eq!(count_tagged(&legend, 'd'), 3);
    }

    #[test]
    fn test_transpose_rows() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let table = transpose_rows(&rows, 2).unwrap();
        assert_eq!(table.shape(), &[2, 3]);
        assert_eq!(table.row(0).to_vec(), vec![1.0, 3.0, 5.0]);
        assert!(transpose_rows(&rows, 3).is_err());
    }
}
