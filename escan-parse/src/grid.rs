//! 2D grid reconciliation.
//!
//! A raster scan writes one `2d` marker per slow-axis row. When a scan is
//! aborted mid-row the last row is short, so the data cannot be reshaped into
//! a rectangle. The policy here keeps the longest prefix of complete rows.

use escan_core::PartialData;

use crate::{Error, Result};

/// Rectangular layout chosen for a 2D scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridPlan {
    /// Slow-axis rows kept.
    pub rows: usize,
    /// Points per row.
    pub cols: usize,
    /// Set when trailing markers or data rows were dropped.
    pub dropped: Option<PartialData>,
}

impl GridPlan {
    /// Total data points covered by the plan.
    #[must_use]
    pub fn points(&self) -> usize {
        self.rows * self.cols
    }
}

/// Choose the grid for a 2D scan.
///
/// `totals` holds the cumulative data-row count at the end of each row (the
/// running totals recorded at each `2d` marker, closed with the final count).
/// `markers` is the number of slow-axis values read.
///
/// The row length is `totals[0]`. If the data does not fill `totals.len()`
/// rows exactly, the largest `i` with `totals[i] == cols * (i + 1)` sets the
/// number of rows kept. Every kept row must have exactly `cols` points.
///
/// # Errors
/// Returns [`Error::InconsistentGrid`] when no such rectangular prefix exists.
pub fn plan_grid(totals: &[usize], markers: usize) -> Result<GridPlan> {
    let (Some(&cols), Some(&total)) = (totals.first(), totals.last()) else {
        return Err(Error::InconsistentGrid("no rows recorded".to_string()));
    };
    if cols == 0 {
        return Err(Error::InconsistentGrid("first row has no points".to_string()));
    }

    let rows = if total == cols * totals.len() {
        totals.len()
    } else {
        totals
            .iter()
            .enumerate()
            .rev()
            .find(|&(i, &n)| n == cols * (i + 1))
            .map_or(0, |(i, _)| i + 1)
    };

    let uniform = totals[..rows]
        .iter()
        .enumerate()
        .all(|(i, &n)| n == cols * (i + 1));
    if !uniform {
        return Err(Error::InconsistentGrid(format!(
            "rows do not all have {cols} points: cumulative counts {:?}",
            &totals[..rows]
        )));
    }
    if markers < rows {
        return Err(Error::InconsistentGrid(format!(
            "{rows} complete rows but only {markers} row markers"
        )));
    }

    let dropped_points = total - cols * rows;
    let dropped = (markers > rows || dropped_points > 0).then_some(
        PartialData::TrailingRowsDropped {
            marker_rows: markers,
            kept_rows: rows,
            dropped_points,
        },
    );
    Ok(GridPlan {
        rows,
        cols,
        dropped,
    })
}
