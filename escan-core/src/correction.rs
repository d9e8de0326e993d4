//! Sum-group and deadtime correction arithmetic.
//!
//! Both operations are pure functions of their inputs: a corrected row only
//! depends on the raw row and the matching ICR/OCR row.

use ndarray::{ArrayD, Axis, IxDyn};

use crate::record::{ChannelName, SumGroup};

/// Normalize a detector label to its sum-group base name.
///
/// Labels such as `mca1: Fe Ka` carry an element qualifier; the base name is
/// the text after the colon once the `mca` infix is removed.
#[must_use]
pub fn sum_base_name(label: &str) -> String {
    if label.contains("mca") && label.contains(':') {
        let stripped = label.replace("mca", "");
        if let Some(base) = stripped.split(':').nth(1) {
            return base.trim().to_string();
        }
    }
    label.to_string()
}

/// Parse the zero-based MCA element index from a source PV name.
///
/// `13SDD1:mca3.R0` belongs to element 2. Returns `None` when the PV has no
/// `mca` segment or the segment is not followed by a positive integer.
#[must_use]
pub fn mca_element(source: &str) -> Option<usize> {
    let (_, rest) = source.split_once("mca")?;
    let number = rest.split('.').next()?;
    number.trim().parse::<usize>().ok()?.checked_sub(1)
}

/// Apply the ICR/OCR deadtime correction to a detector table.
///
/// Rows whose source PV names an MCA element are multiplied by that
/// element's intensity ratio row; every other row is copied unchanged.
#[must_use]
pub fn correct_detectors(
    detectors: &ArrayD<f64>,
    names: &[ChannelName],
    ratio: Option<&ArrayD<f64>>,
) -> ArrayD<f64> {
    let mut corrected = detectors.clone();
    let Some(ratio) = ratio else {
        return corrected;
    };
    let n_elements = ratio.len_of(Axis(0));

    for (idet, name) in names.iter().enumerate() {
        let Some(element) = mca_element(&name.source) else {
            continue;
        };
        if element >= n_elements || idet >= corrected.len_of(Axis(0)) {
            continue;
        }
        let mut row = corrected.index_axis_mut(Axis(0), idet);
        row *= &ratio.index_axis(Axis(0), element);
    }
    corrected
}

/// Sum detector rows per group.
///
/// Output row `g` is the elementwise sum of `detectors[i]` for every `i` in
/// `groups[g].members`, in member order.
///
/// # Panics
/// Panics if a group member is not a valid detector row; records are
/// validated before this is called.
#[must_use]
pub fn sum_rows(detectors: &ArrayD<f64>, groups: &[SumGroup]) -> ArrayD<f64> {
    let mut shape = detectors.shape().to_vec();
    shape[0] = groups.len();
    let mut sums = ArrayD::zeros(IxDyn(&shape));

    for (isum, group) in groups.iter().enumerate() {
        let mut row = sums.index_axis_mut(Axis(0), isum);
        for &member in &group.members {
            row += &detectors.index_axis(Axis(0), member);
        }
    }
    sums
}
