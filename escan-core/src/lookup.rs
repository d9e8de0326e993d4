//! Named-channel lookup.
//!
//! Channel names typed by a user resolve first against sum names (exact,
//! case-insensitive), then against raw detector labels through
//! [`match_channel_name`].

use ndarray::{ArrayD, Axis};

use crate::correction::sum_rows;
use crate::record::{ChannelName, ScanRecord};
use crate::{Error, Result};

/// A resolved channel: which table it lives in and its row index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRef {
    /// Row of `sums` / `sums_corrected`.
    Sum(usize),
    /// Row of `detectors` / `detectors_corrected`.
    Detector(usize),
}

/// Find the channel whose label best matches `query`.
///
/// Matching is case-insensitive and runs in three passes over the names in
/// declaration order:
/// 1. the whole label equals the query;
/// 2. the label equals the first word of the query (`fe extra` finds `Fe`);
/// 3. (only when `strict` is false) the label contains the query's first word.
///
/// The first index found by the earliest successful pass is returned.
#[must_use]
pub fn match_channel_name(names: &[ChannelName], query: &str, strict: bool) -> Option<usize> {
    let query = query.to_lowercase();
    let first_word = query.split_whitespace().next()?;
    let labels: Vec<String> = names.iter().map(|n| n.label.to_lowercase()).collect();

    if let Some(i) = labels.iter().position(|l| *l == query) {
        return Some(i);
    }
    if let Some(i) = labels.iter().position(|l| l.trim() == first_word) {
        return Some(i);
    }
    if strict {
        return None;
    }
    labels.iter().position(|l| l.contains(first_word))
}

impl ScanRecord {
    /// Index of the raw detector best matching `query`.
    #[must_use]
    pub fn match_detector_name(&self, query: &str, strict: bool) -> Option<usize> {
        match_channel_name(&self.detector_names, query, strict)
    }

    /// Resolve a user-facing channel name to a table row.
    #[must_use]
    pub fn resolve_channel(&self, name: &str) -> Option<ChannelRef> {
        let wanted = name.to_lowercase();
        if let Some(i) = self.sum_names().position(|s| s.to_lowercase() == wanted) {
            return Some(ChannelRef::Sum(i));
        }
        self.match_detector_name(name, false)
            .map(ChannelRef::Detector)
    }

    /// Fetch the data row for a named channel.
    ///
    /// With `apply_correction` the deadtime-corrected tables are used. When
    /// `normalize_by` is given, the row is divided elementwise by the
    /// (corrected) row of that channel.
    ///
    /// # Errors
    /// Returns [`Error::ChannelNotFound`] if either name does not resolve.
    pub fn get_data(
        &self,
        name: &str,
        normalize_by: Option<&str>,
        apply_correction: bool,
    ) -> Result<ArrayD<f64>> {
        let data = self.channel_row(name, apply_correction)?;
        match normalize_by {
            Some(norm) => {
                let norm = self.channel_row(norm, true)?;
                Ok(&data / &norm)
            }
            None => Ok(data),
        }
    }

    /// Deadtime-corrected channel data, optionally normalized.
    ///
    /// # Errors
    /// Returns [`Error::ChannelNotFound`] if either name does not resolve.
    pub fn get_map(&self, name: &str, normalize_by: Option<&str>) -> Result<ArrayD<f64>> {
        self.get_data(name, normalize_by, true)
    }

    /// Replace the members of the sum group `name` resolves to and rebuild
    /// both sum tables.
    ///
    /// # Errors
    /// Returns [`Error::ChannelNotFound`] if `name` matches no group, or
    /// [`Error::InvalidSumGroup`] if `members` is empty or out of range.
    pub fn set_sum_group(&mut self, name: &str, members: Vec<usize>) -> Result<()> {
        let group = match self.resolve_channel(name) {
            Some(ChannelRef::Sum(i)) => i,
            Some(ChannelRef::Detector(idet)) => self
                .sum_groups
                .iter()
                .position(|g| g.members.contains(&idet))
                .ok_or_else(|| Error::ChannelNotFound(name.to_string()))?,
            None => return Err(Error::ChannelNotFound(name.to_string())),
        };

        let n_det = self.detectors.len_of(Axis(0));
        if members.is_empty() || members.iter().any(|&i| i >= n_det) {
            return Err(Error::InvalidSumGroup(format!(
                "members {members:?} must be a non-empty subset of 0..{n_det}"
            )));
        }

        self.sum_groups[group].members = members;
        self.sums = sum_rows(&self.detectors, &self.sum_groups);
        self.sums_corrected = sum_rows(&self.detectors_corrected, &self.sum_groups);
        Ok(())
    }

    fn channel_row(&self, name: &str, corrected: bool) -> Result<ArrayD<f64>> {
        let (table, index) = match self.resolve_channel(name) {
            Some(ChannelRef::Sum(i)) if corrected => (&self.sums_corrected, i),
            Some(ChannelRef::Sum(i)) => (&self.sums, i),
            Some(ChannelRef::Detector(i)) if corrected => (&self.detectors_corrected, i),
            Some(ChannelRef::Detector(i)) => (&self.detectors, i),
            None => return Err(Error::ChannelNotFound(name.to_string())),
        };
        Ok(table.index_axis(Axis(0), index).to_owned())
    }
}
