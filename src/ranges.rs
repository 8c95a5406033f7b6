//! Range candidates and the pool they are resolved from.
//!
//! Custom ranges come from a JSON or YAML configuration file, either as a
//! flat list of entries that each name their test, or grouped under the test
//! name:
//!
//! ```json
//! { "Hemoglobin": [ { "range_name": "Paediatric", "age_min": 0, "age_max": 17,
//!                     "normal_min": 11.0, "normal_max": 15.0 } ] }
//! ```
//!
//! Every entry is validated on load; one bad entry rejects the whole file.

use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use itertools::Itertools;
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    builtin,
    data::{Gender, parse_gender},
    error::RangeConfigError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RangeSource {
    #[default]
    #[serde(rename = "custom")]
    Custom,
    #[serde(rename = "built-in", alias = "builtin", alias = "built_in")]
    BuiltIn,
}

impl fmt::Display for RangeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeSource::Custom => f.write_str("custom"),
            RangeSource::BuiltIn => f.write_str("built-in"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeCandidate {
    pub test_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_min: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_max: Option<u8>,
    #[serde(
        default,
        deserialize_with = "deserialize_gender",
        skip_serializing_if = "Option::is_none"
    )]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_name: Option<String>,
    pub normal_min: f64,
    pub normal_max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_high: Option<f64>,
    #[serde(default)]
    pub source: RangeSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl RangeCandidate {
    pub fn new(test_name: impl Into<String>, normal_min: f64, normal_max: f64) -> Self {
        Self {
            test_name: test_name.into(),
            range_name: None,
            age_min: None,
            age_max: None,
            gender: None,
            condition_name: None,
            normal_min,
            normal_max,
            critical_low: None,
            critical_high: None,
            source: RangeSource::Custom,
            notes: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.range_name = Some(name.into());
        self
    }

    pub fn ages(mut self, min: Option<u8>, max: Option<u8>) -> Self {
        self.age_min = min;
        self.age_max = max;
        self
    }

    pub fn for_gender(mut self, gender: Gender) -> Self {
        self.gender = Some(gender);
        self
    }

    pub fn for_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition_name = Some(condition.into());
        self
    }

    pub fn critical(mut self, low: Option<f64>, high: Option<f64>) -> Self {
        self.critical_low = low;
        self.critical_high = high;
        self
    }

    pub fn built_in(mut self) -> Self {
        self.source = RangeSource::BuiltIn;
        self
    }

    pub fn has_age_bounds(&self) -> bool {
        self.age_min.is_some() || self.age_max.is_some()
    }

    pub fn is_custom(&self) -> bool {
        self.source == RangeSource::Custom
    }

    /// Number of filter dimensions set (age, gender, condition).
    pub fn specificity(&self) -> u32 {
        u32::from(self.has_age_bounds())
            + u32::from(self.gender.is_some())
            + u32::from(self.condition_name.is_some())
    }

    pub fn is_unfiltered(&self) -> bool {
        self.specificity() == 0
    }

    pub fn matches_test(&self, test_name: &str) -> bool {
        self.test_name.trim().eq_ignore_ascii_case(test_name.trim())
    }

    pub fn age_label(&self) -> Option<String> {
        match (self.age_min, self.age_max) {
            (Some(min), Some(max)) => Some(format!("age {min}-{max}")),
            (Some(min), None) => Some(format!("age {min}+")),
            (None, Some(max)) => Some(format!("age <={max}")),
            (None, None) => None,
        }
    }

    /// Human-readable list of the filters this candidate applies.
    pub fn describe_filters(&self) -> String {
        let parts = [
            self.age_label(),
            self.gender.map(|g| g.to_string()),
            self.condition_name
                .as_ref()
                .map(|c| format!("condition {c}")),
        ];
        let described = parts.into_iter().flatten().collect::<Vec<_>>();
        if described.is_empty() {
            "no demographic filters".to_string()
        } else {
            described.join(", ")
        }
    }

    pub fn display_name(&self) -> &str {
        self.range_name.as_deref().unwrap_or(&self.test_name)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.test_name.trim().is_empty() {
            return Err("test_name must not be empty".into());
        }
        if !self.normal_min.is_finite() || !self.normal_max.is_finite() {
            return Err("normal bounds must be finite numbers".into());
        }
        if self.normal_min >= self.normal_max {
            return Err(format!(
                "normal_min ({}) must be less than normal_max ({})",
                self.normal_min, self.normal_max
            ));
        }
        if let (Some(min), Some(max)) = (self.age_min, self.age_max)
            && min > max
        {
            return Err(format!("age_min ({min}) must not exceed age_max ({max})"));
        }
        if let (Some(low), Some(high)) = (self.critical_low, self.critical_high)
            && low >= high
        {
            return Err(format!(
                "critical_low ({low}) must be less than critical_high ({high})"
            ));
        }
        if self.source == RangeSource::BuiltIn && self.condition_name.is_some() {
            return Err("built-in ranges cannot carry a condition filter".into());
        }
        Ok(())
    }
}

fn deserialize_gender<'de, D>(deserializer: D) -> Result<Option<Gender>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_gender))
}

/// Entry of a flat configuration list.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RangeEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    test_name: Option<String>,
    #[serde(flatten)]
    body: RangeBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RangeBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    range_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    age_min: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    age_max: Option<u8>,
    #[serde(
        default,
        deserialize_with = "deserialize_gender",
        skip_serializing_if = "Option::is_none"
    )]
    gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition_name: Option<String>,
    normal_min: f64,
    normal_max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    critical_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    critical_high: Option<f64>,
    #[serde(default)]
    source: RangeSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
}

impl RangeBody {
    fn into_candidate(self, test_name: String) -> RangeCandidate {
        RangeCandidate {
            test_name,
            range_name: self.range_name,
            age_min: self.age_min,
            age_max: self.age_max,
            gender: self.gender,
            condition_name: self.condition_name,
            normal_min: self.normal_min,
            normal_max: self.normal_max,
            critical_low: self.critical_low,
            critical_high: self.critical_high,
            source: self.source,
            notes: self.notes,
        }
    }

    fn from_candidate(candidate: &RangeCandidate) -> Self {
        Self {
            range_name: candidate.range_name.clone(),
            age_min: candidate.age_min,
            age_max: candidate.age_max,
            gender: candidate.gender,
            condition_name: candidate.condition_name.clone(),
            normal_min: candidate.normal_min,
            normal_max: candidate.normal_max,
            critical_low: candidate.critical_low,
            critical_high: candidate.critical_high,
            source: candidate.source,
            notes: candidate.notes.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RangeConfig {
    Flat(Vec<RangeEntry>),
    Grouped(BTreeMap<String, Vec<RangeBody>>),
}

impl RangeConfig {
    fn into_candidates(self) -> Result<Vec<RangeCandidate>, RangeConfigError> {
        match self {
            RangeConfig::Flat(entries) => entries
                .into_iter()
                .enumerate()
                .map(|(index, entry)| {
                    let test_name = entry.test_name.unwrap_or_default();
                    let candidate = entry.body.into_candidate(test_name);
                    checked(index, candidate)
                })
                .collect(),
            RangeConfig::Grouped(groups) => groups
                .into_iter()
                .flat_map(|(test_name, bodies)| {
                    bodies
                        .into_iter()
                        .map(move |body| body.into_candidate(test_name.clone()))
                })
                .enumerate()
                .map(|(index, candidate)| checked(index, candidate))
                .collect(),
        }
    }
}

fn checked(index: usize, candidate: RangeCandidate) -> Result<RangeCandidate, RangeConfigError> {
    candidate
        .validate()
        .map_err(|reason| RangeConfigError::InvalidCandidate {
            index,
            test_name: candidate.test_name.clone(),
            reason,
        })?;
    if let Some(low) = candidate.critical_low
        && low > candidate.normal_min
    {
        warn!(
            "Range '{}' for {} has critical_low above normal_min",
            candidate.display_name(),
            candidate.test_name
        );
    }
    Ok(candidate)
}

/// Ordered set of range candidates. Order is load order and is the final
/// tie-break when resolving.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangePool {
    candidates: Vec<RangeCandidate>,
}

impl RangePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool preloaded with the built-in base and demographic ranges.
    pub fn with_builtins() -> Self {
        Self {
            candidates: builtin::builtin_ranges(),
        }
    }

    pub fn candidates(&self) -> &[RangeCandidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn custom(&self) -> impl Iterator<Item = &RangeCandidate> {
        self.candidates.iter().filter(|c| c.is_custom())
    }

    pub fn for_test<'a>(&'a self, test_name: &'a str) -> impl Iterator<Item = &'a RangeCandidate> {
        self.candidates.iter().filter(move |c| c.matches_test(test_name))
    }

    pub fn add(&mut self, candidate: RangeCandidate) -> Result<(), RangeConfigError> {
        let checked = checked(self.candidates.len(), candidate)?;
        self.candidates.push(checked);
        Ok(())
    }

    pub fn extend(&mut self, candidates: Vec<RangeCandidate>) {
        self.candidates.extend(candidates);
    }

    /// Removes custom ranges for a test, optionally only the named one.
    /// Returns how many were removed.
    pub fn remove_custom(&mut self, test_name: &str, range_name: Option<&str>) -> usize {
        let before = self.candidates.len();
        self.candidates.retain(|c| {
            let targeted = c.is_custom()
                && c.matches_test(test_name)
                && range_name.is_none_or(|name| c.range_name.as_deref() == Some(name));
            !targeted
        });
        before - self.candidates.len()
    }

    /// Appends every range from a JSON/YAML configuration file.
    pub fn load_config(&mut self, path: &Path) -> Result<usize, RangeConfigError> {
        let candidates = read_config(path)?;
        let count = candidates.len();
        info!("Loaded {count} range(s) from {path:?}");
        self.candidates.extend(candidates);
        Ok(count)
    }

    pub fn export(&self, path: &Path, include_builtin: bool) -> Result<(), RangeConfigError> {
        let grouped = self.grouped(include_builtin);
        let file = File::create(path).map_err(|source| RangeConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let writer = BufWriter::new(file);
        if is_yaml(path) {
            serde_yaml::to_writer(writer, &grouped)?;
        } else {
            serde_json::to_writer_pretty(writer, &grouped)?;
        }
        debug!("Exported {} test group(s) to {path:?}", grouped.len());
        Ok(())
    }

    /// Writes only the custom ranges, grouped by test name.
    pub fn export_custom(&self, path: &Path) -> Result<(), RangeConfigError> {
        self.export(path, false)
    }

    fn grouped(&self, include_builtin: bool) -> BTreeMap<String, Vec<RangeBody>> {
        self.candidates
            .iter()
            .filter(|c| include_builtin || c.is_custom())
            .into_group_map_by(|c| c.test_name.clone())
            .into_iter()
            .map(|(test_name, members)| {
                let bodies = members.into_iter().map(RangeBody::from_candidate).collect();
                (test_name, bodies)
            })
            .collect()
    }
}

pub fn parse_json_config(text: &str) -> Result<Vec<RangeCandidate>, RangeConfigError> {
    let config: RangeConfig = serde_json::from_str(text)?;
    config.into_candidates()
}

pub fn parse_yaml_config(text: &str) -> Result<Vec<RangeCandidate>, RangeConfigError> {
    let config: RangeConfig = serde_yaml::from_str(text)?;
    config.into_candidates()
}

pub fn read_config(path: &Path) -> Result<Vec<RangeCandidate>, RangeConfigError> {
    let io_err = |source| RangeConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("json") => {
            let reader = BufReader::new(File::open(path).map_err(io_err)?);
            let config: RangeConfig = serde_json::from_reader(reader)?;
            config.into_candidates()
        }
        Some("yml" | "yaml") => {
            let reader = BufReader::new(File::open(path).map_err(io_err)?);
            let config: RangeConfig = serde_yaml::from_reader(reader)?;
            config.into_candidates()
        }
        _ => Err(RangeConfigError::UnsupportedFormat(path.to_path_buf())),
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_and_grouped_configs_load_the_same_ranges() {
        let flat = parse_json_config(
            r#"[
                {"test_name": "Hemoglobin", "range_name": "Paediatric", "age_min": 0, "age_max": 17,
                 "normal_min": 11.0, "normal_max": 15.0},
                {"test_name": "Hemoglobin", "gender": "female", "normal_min": 12.1, "normal_max": 15.1}
            ]"#,
        )
        .unwrap();
        let grouped = parse_json_config(
            r#"{"Hemoglobin": [
                {"range_name": "Paediatric", "age_min": 0, "age_max": 17,
                 "normal_min": 11.0, "normal_max": 15.0},
                {"gender": "F", "normal_min": 12.1, "normal_max": 15.1}
            ]}"#,
        )
        .unwrap();
        assert_eq!(flat, grouped);
        assert_eq!(flat[1].gender, Some(Gender::Female));
        assert_eq!(flat[0].source, RangeSource::Custom);
        assert_eq!(flat[0].specificity(), 1);
    }

    #[test]
    fn yaml_configs_are_supported() {
        let ranges = parse_yaml_config(
            "Creatinine:\n  - condition_name: CKD\n    normal_min: 1.0\n    normal_max: 2.5\n",
        )
        .unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].condition_name.as_deref(), Some("CKD"));
    }

    #[test]
    fn invalid_entries_reject_the_configuration() {
        let err = parse_json_config(
            r#"[{"test_name": "Glucose", "normal_min": 100, "normal_max": 70}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, RangeConfigError::InvalidCandidate { index: 0, .. }));

        let err = parse_json_config(
            r#"[{"test_name": "Glucose", "age_min": 40, "age_max": 20, "normal_min": 70, "normal_max": 100}]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("age_min"));

        let err = parse_json_config(r#"[{"normal_min": 1, "normal_max": 2}]"#).unwrap_err();
        assert!(err.to_string().contains("test_name"));
    }

    #[test]
    fn remove_custom_leaves_builtins_alone() {
        let mut pool = RangePool::with_builtins();
        let builtin_count = pool.len();
        pool.add(RangeCandidate::new("Hemoglobin", 11.0, 15.0).named("Clinic A"))
            .unwrap();
        pool.add(RangeCandidate::new("Hemoglobin", 11.5, 15.5).named("Clinic B"))
            .unwrap();
        assert_eq!(pool.remove_custom("hemoglobin", Some("Clinic A")), 1);
        assert_eq!(pool.remove_custom("Hemoglobin", None), 1);
        assert_eq!(pool.len(), builtin_count);
    }

    #[test]
    fn describe_filters_lists_each_dimension() {
        let candidate = RangeCandidate::new("Creatinine", 0.6, 1.1)
            .ages(Some(18), Some(64))
            .for_gender(Gender::Female)
            .for_condition("Pregnancy");
        assert_eq!(
            candidate.describe_filters(),
            "age 18-64, Female, condition Pregnancy"
        );
        assert_eq!(candidate.specificity(), 3);
    }
}
