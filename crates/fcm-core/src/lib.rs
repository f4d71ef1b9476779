//! Core domain model for the faculty citation metrics table.

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "fcm-core";

/// Author name used when the metrics API does not resolve one.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// One row of the faculty table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacultyRecord {
    pub serial_number: u32,
    pub name: String,
    pub profile_url: String,
    pub citations: Option<u64>,
    pub h_index: Option<u64>,
    pub i10_index: Option<u64>,
}

impl FacultyRecord {
    pub fn new(serial_number: u32, name: impl Into<String>, profile_url: impl Into<String>) -> Self {
        Self {
            serial_number,
            name: name.into(),
            profile_url: profile_url.into(),
            citations: None,
            h_index: None,
            i10_index: None,
        }
    }

    /// Case-insensitive, ignoring surrounding whitespace.
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.trim().to_lowercase() == name.trim().to_lowercase()
    }

    /// A profile reference worth sending to the fetcher: non-empty and URL-shaped.
    pub fn has_fetchable_url(&self) -> bool {
        let url = self.profile_url.trim();
        !url.is_empty() && url.starts_with("http")
    }

    pub fn apply_metrics(&mut self, metrics: &MetricsResult) {
        self.citations = Some(metrics.citations);
        self.h_index = Some(metrics.h_index);
        self.i10_index = Some(metrics.i10_index);
    }
}

/// Normalized outcome of one successful metrics fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsResult {
    pub name: String,
    pub citations: u64,
    pub h_index: u64,
    pub i10_index: u64,
}

impl MetricsResult {
    /// True when the response carried nothing usable: placeholder name and
    /// zero citations and zero h-index.
    pub fn looks_empty(&self) -> bool {
        self.name == UNKNOWN_AUTHOR && self.citations == 0 && self.h_index == 0
    }
}

/// Append a new record with `serial_number = len + 1` and null metrics.
pub fn append_faculty(
    records: &mut Vec<FacultyRecord>,
    name: impl Into<String>,
    profile_url: impl Into<String>,
) -> &FacultyRecord {
    let serial = records.len() as u32 + 1;
    records.push(FacultyRecord::new(serial, name, profile_url));
    &records[records.len() - 1]
}

/// Remove every record whose name matches case-insensitively, then renumber.
/// Returns how many rows were removed.
pub fn remove_faculty(records: &mut Vec<FacultyRecord>, name: &str) -> usize {
    let before = records.len();
    records.retain(|r| !r.matches_name(name));
    let removed = before - records.len();
    if removed > 0 {
        renumber(records);
    }
    removed
}

pub fn renumber(records: &mut [FacultyRecord]) {
    for (idx, record) in records.iter_mut().enumerate() {
        record.serial_number = idx as u32 + 1;
    }
}

pub fn find_first_mut<'a>(
    records: &'a mut [FacultyRecord],
    name: &str,
) -> Option<&'a mut FacultyRecord> {
    records.iter_mut().find(|r| r.matches_name(name))
}

/// Distinct non-empty trimmed names, sorted case-insensitively.
pub fn faculty_names(records: &[FacultyRecord]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for record in records {
        let name = record.name.trim();
        if name.is_empty() || names.iter().any(|n| n == name) {
            continue;
        }
        names.push(name.to_string());
    }
    names.sort_by_key(|n| n.to_lowercase());
    names
}
