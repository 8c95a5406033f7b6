//! Near-duplicate detection for incoming test results.

use chrono::TimeDelta;

use crate::data::NormalizedResult;

pub const DEFAULT_TOLERANCE_MINUTES: u32 = 30;

/// Whether `a` and `b` describe the same measurement.
///
/// Same patient, same test (case-insensitive), identical value, and either
/// timestamps within `tolerance_minutes` (when both carry a time) or the same
/// calendar date.
pub fn same_measurement(a: &NormalizedResult, b: &NormalizedResult, tolerance_minutes: u32) -> bool {
    if a.patient_id != b.patient_id {
        return false;
    }
    if !a.test_name.trim().eq_ignore_ascii_case(b.test_name.trim()) {
        return false;
    }
    if a.test_value != b.test_value {
        return false;
    }
    match a.test_date.distance(&b.test_date) {
        Some(delta) => delta <= TimeDelta::minutes(i64::from(tolerance_minutes)),
        None => a.test_date.date == b.test_date.date,
    }
}

pub fn is_duplicate<'a, I>(candidate: &NormalizedResult, existing: I, tolerance_minutes: u32) -> bool
where
    I: IntoIterator<Item = &'a NormalizedResult>,
{
    existing
        .into_iter()
        .any(|prior| same_measurement(candidate, prior, tolerance_minutes))
}
