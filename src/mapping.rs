//! Schema mapper: proposes which source header feeds each canonical field.
//!
//! Every (field, header) pair receives the best score over the field's
//! aliases. The full set of scored pairs is then assigned greedily from the
//! highest score down, so a header that is the best match for several fields
//! goes to whichever pair scores highest, and no header or field is used
//! twice. Equal scores fall back to catalog order, then header position.

use std::{cmp::Ordering, collections::HashSet, fmt};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{CanonicalField, PatternCatalog},
    error::{ImportError, MappingError},
};

pub const EXACT_MATCH_SCORE: u8 = 100;
pub const MIN_PARTIAL_SCORE: u8 = 30;
pub const MAX_PARTIAL_SCORE: u8 = 99;
pub const DEFAULT_MIN_CONFIDENCE: u8 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            95.. => ConfidenceLevel::High,
            60..=94 => ConfidenceLevel::Medium,
            _ => ConfidenceLevel::Low,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high confidence - likely correct",
            ConfidenceLevel::Medium => "medium confidence - should review",
            ConfidenceLevel::Low => "low confidence - needs verification",
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAssignment {
    pub field: CanonicalField,
    pub header: String,
    pub header_index: usize,
    pub confidence: u8,
    pub overridden: bool,
}

impl FieldAssignment {
    pub fn level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_score(self.confidence)
    }
}

/// Header-to-field assignments for one dataset, kept in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    assignments: Vec<FieldAssignment>,
}

impl FieldMapping {
    pub fn assignments(&self) -> &[FieldAssignment] {
        &self.assignments
    }

    pub fn get(&self, field: CanonicalField) -> Option<&FieldAssignment> {
        self.assignments.iter().find(|a| a.field == field)
    }

    pub fn header_for(&self, field: CanonicalField) -> Option<&str> {
        self.get(field).map(|a| a.header.as_str())
    }

    pub fn index_for(&self, field: CanonicalField) -> Option<usize> {
        self.get(field).map(|a| a.header_index)
    }

    pub fn confidence_for(&self, field: CanonicalField) -> Option<u8> {
        self.get(field).map(|a| a.confidence)
    }

    pub fn contains(&self, field: CanonicalField) -> bool {
        self.get(field).is_some()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn missing_fields(&self) -> Vec<CanonicalField> {
        CanonicalField::ALL
            .iter()
            .copied()
            .filter(|field| !self.contains(*field))
            .collect()
    }

    /// Fails with [`ImportError::UnmappableSchema`] listing every field in
    /// `required` that has no assignment.
    pub fn require(&self, required: &[CanonicalField]) -> Result<(), ImportError> {
        let missing = required
            .iter()
            .copied()
            .filter(|field| !self.contains(*field))
            .collect::<Vec<_>>();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ImportError::UnmappableSchema { missing })
        }
    }

    fn insert(&mut self, assignment: FieldAssignment) {
        self.assignments.push(assignment);
        self.assignments.sort_by_key(|a| a.field.ordinal());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingOptions {
    /// Assignments scoring below this are discarded and the field is reported missing.
    pub min_confidence: u8,
}

impl Default for MappingOptions {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// Scores a single alias against a single header.
pub fn score_header(alias: &str, header: &str) -> u8 {
    let alias = alias.trim().to_lowercase();
    let header = header.trim().to_lowercase();
    if alias.is_empty() || header.is_empty() {
        return 0;
    }
    if alias == header {
        return EXACT_MATCH_SCORE;
    }
    if header.contains(alias.as_str()) || alias.contains(header.as_str()) {
        let alias_len = alias.chars().count();
        let header_len = header.chars().count();
        let ratio = alias_len.min(header_len) as f64 / alias_len.max(header_len) as f64;
        let scaled = f64::from(MIN_PARTIAL_SCORE)
            + (f64::from(MAX_PARTIAL_SCORE - MIN_PARTIAL_SCORE) * ratio).round();
        return (scaled as u8).min(MAX_PARTIAL_SCORE);
    }
    0
}

/// Best score any of `field`'s aliases achieves against `header`.
pub fn score_field(catalog: &PatternCatalog, field: CanonicalField, header: &str) -> u8 {
    catalog
        .aliases(field)
        .iter()
        .map(|alias| score_header(alias, header))
        .max()
        .unwrap_or(0)
}

/// Infers a mapping with the standard catalog and default options.
pub fn infer_mapping(headers: &[String]) -> FieldMapping {
    let catalog = PatternCatalog::standard();
    infer_mapping_with(headers, &catalog, &[], &MappingOptions::default())
        .unwrap_or_default()
}

/// Infers a mapping, honouring caller overrides first.
///
/// Overrides are frozen at confidence 100 and claim their field and header
/// before automatic assignment fills the remainder.
pub fn infer_mapping_with(
    headers: &[String],
    catalog: &PatternCatalog,
    overrides: &[(CanonicalField, String)],
    options: &MappingOptions,
) -> Result<FieldMapping, MappingError> {
    let mut mapping = FieldMapping::default();
    let mut claimed_fields = HashSet::new();
    let mut claimed_headers = HashSet::new();

    for (field, header) in overrides {
        let header_index = headers
            .iter()
            .position(|h| h == header)
            .or_else(|| {
                headers
                    .iter()
                    .position(|h| h.trim().eq_ignore_ascii_case(header.trim()))
            })
            .ok_or_else(|| MappingError::HeaderNotFound(header.clone()))?;
        if !claimed_fields.insert(*field) {
            return Err(MappingError::FieldAlreadyMapped(*field));
        }
        if !claimed_headers.insert(header_index) {
            let owner = mapping
                .assignments
                .iter()
                .find(|a| a.header_index == header_index)
                .map(|a| a.field)
                .unwrap_or(*field);
            return Err(MappingError::HeaderAlreadyUsed {
                header: headers[header_index].clone(),
                field: owner,
            });
        }
        mapping.insert(FieldAssignment {
            field: *field,
            header: headers[header_index].clone(),
            header_index,
            confidence: EXACT_MATCH_SCORE,
            overridden: true,
        });
    }

    let mut candidates = Vec::new();
    for entry in catalog.entries() {
        if claimed_fields.contains(&entry.field) {
            continue;
        }
        for (idx, header) in headers.iter().enumerate() {
            if claimed_headers.contains(&idx) || catalog.is_ignored(header) {
                continue;
            }
            let score = score_field(catalog, entry.field, header);
            if score > 0 && score >= options.min_confidence {
                candidates.push((entry.field, idx, score));
            }
        }
    }
    candidates.sort_by(|a, b| compare_triples(catalog, a, b));

    for (field, header_index, score) in candidates {
        if claimed_fields.contains(&field) || claimed_headers.contains(&header_index) {
            continue;
        }
        debug!(
            "Mapped '{}' -> {} (confidence {score})",
            headers[header_index], field
        );
        claimed_fields.insert(field);
        claimed_headers.insert(header_index);
        mapping.insert(FieldAssignment {
            field,
            header: headers[header_index].clone(),
            header_index,
            confidence: score,
            overridden: false,
        });
    }

    Ok(mapping)
}

fn compare_triples(
    catalog: &PatternCatalog,
    a: &(CanonicalField, usize, u8),
    b: &(CanonicalField, usize, u8),
) -> Ordering {
    b.2.cmp(&a.2)
        .then_with(|| catalog_position(catalog, a.0).cmp(&catalog_position(catalog, b.0)))
        .then_with(|| a.1.cmp(&b.1))
}

fn catalog_position(catalog: &PatternCatalog, field: CanonicalField) -> usize {
    catalog
        .entries()
        .iter()
        .position(|entry| entry.field == field)
        .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldPatterns;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        assert_eq!(score_header("sex", " SEX "), 100);
    }

    #[test]
    fn partial_match_scales_with_length_ratio() {
        // "patient" inside "patient_id": 7/10 of the longer string.
        assert_eq!(score_header("patient_id", "Patient"), 30 + 48);
        // A short alias buried in a long header scores near the floor.
        let weak = score_header("id", "specimen identifier code");
        assert!((30..40).contains(&weak), "{weak}");
        assert_eq!(score_header("unit", "glucose"), 0);
    }

    #[test]
    fn standard_device_headers_map_to_expected_fields() {
        let mapping = infer_mapping(&headers(&[
            "Patient", "Test", "Result", "Units", "Date", "Age", "Sex",
        ]));
        assert_eq!(mapping.header_for(CanonicalField::PatientId), Some("Patient"));
        assert_eq!(mapping.header_for(CanonicalField::TestName), Some("Test"));
        assert_eq!(mapping.header_for(CanonicalField::TestValue), Some("Result"));
        assert_eq!(mapping.header_for(CanonicalField::Unit), Some("Units"));
        assert_eq!(mapping.header_for(CanonicalField::TestDate), Some("Date"));
        assert_eq!(mapping.header_for(CanonicalField::Age), Some("Age"));
        assert_eq!(mapping.header_for(CanonicalField::Gender), Some("Sex"));
        assert_eq!(mapping.confidence_for(CanonicalField::Gender), Some(100));
        assert!(!mapping.contains(CanonicalField::Notes));
    }

    #[test]
    fn contested_header_goes_to_the_highest_scoring_field() {
        // "Test Value" is an exact alias of test_value and a partial match
        // for test_name; test_name must settle for "Analyte".
        let mapping = infer_mapping(&headers(&["Analyte", "Test Value", "PID"]));
        assert_eq!(mapping.header_for(CanonicalField::TestValue), Some("Test Value"));
        assert_eq!(mapping.header_for(CanonicalField::TestName), Some("Analyte"));
        assert_eq!(mapping.header_for(CanonicalField::PatientId), Some("PID"));
    }

    #[test]
    fn ignored_columns_are_never_assigned() {
        let mapping = infer_mapping(&headers(&["Sr. No", "Device ID", "Patient ID", "Value"]));
        assert_eq!(mapping.header_for(CanonicalField::PatientId), Some("Patient ID"));
        assert!(
            mapping
                .assignments()
                .iter()
                .all(|a| a.header != "Device ID" && a.header != "Sr. No")
        );
    }

    #[test]
    fn equal_scores_break_by_header_position() {
        let mapping = infer_mapping(&headers(&["result", "Result"]));
        assert_eq!(mapping.index_for(CanonicalField::TestValue), Some(0));
    }

    #[test]
    fn equal_scores_break_by_catalog_declaration_order() {
        let shared = |field| FieldPatterns {
            field,
            aliases: vec!["remark".to_string()],
        };
        let cols = headers(&["Remark"]);

        let notes_first = PatternCatalog::new(
            vec![
                shared(CanonicalField::Notes),
                shared(CanonicalField::LabTechnician),
            ],
            Vec::new(),
        );
        let mapping =
            infer_mapping_with(&cols, &notes_first, &[], &MappingOptions::default()).unwrap();
        assert_eq!(mapping.index_for(CanonicalField::Notes), Some(0));
        assert_eq!(mapping.index_for(CanonicalField::LabTechnician), None);

        let technician_first = PatternCatalog::new(
            vec![
                shared(CanonicalField::LabTechnician),
                shared(CanonicalField::Notes),
            ],
            Vec::new(),
        );
        let mapping =
            infer_mapping_with(&cols, &technician_first, &[], &MappingOptions::default())
                .unwrap();
        assert_eq!(mapping.index_for(CanonicalField::LabTechnician), Some(0));
        assert_eq!(mapping.index_for(CanonicalField::Notes), None);
    }

    #[test]
    fn overrides_are_frozen_before_inference() {
        let catalog = PatternCatalog::standard();
        let mapping = infer_mapping_with(
            &headers(&["Patient", "Reading", "Result"]),
            &catalog,
            &[(CanonicalField::TestValue, "Reading".to_string())],
            &MappingOptions::default(),
        )
        .expect("valid override");
        let assignment = mapping.get(CanonicalField::TestValue).unwrap();
        assert_eq!(assignment.header, "Reading");
        assert!(assignment.overridden);
        assert_eq!(assignment.confidence, 100);
        assert_eq!(mapping.header_for(CanonicalField::PatientId), Some("Patient"));
    }

    #[test]
    fn override_errors_are_reported() {
        let catalog = PatternCatalog::standard();
        let options = MappingOptions::default();
        let cols = headers(&["A", "B"]);
        assert_eq!(
            infer_mapping_with(
                &cols,
                &catalog,
                &[(CanonicalField::Age, "Z".into())],
                &options
            ),
            Err(MappingError::HeaderNotFound("Z".into()))
        );
        assert_eq!(
            infer_mapping_with(
                &cols,
                &catalog,
                &[
                    (CanonicalField::Age, "A".into()),
                    (CanonicalField::Age, "B".into())
                ],
                &options
            ),
            Err(MappingError::FieldAlreadyMapped(CanonicalField::Age))
        );
        assert_eq!(
            infer_mapping_with(
                &cols,
                &catalog,
                &[
                    (CanonicalField::Age, "A".into()),
                    (CanonicalField::Notes, "A".into())
                ],
                &options
            ),
            Err(MappingError::HeaderAlreadyUsed {
                header: "A".into(),
                field: CanonicalField::Age
            })
        );
    }

    #[test]
    fn min_confidence_discards_weak_matches() {
        let catalog = PatternCatalog::standard();
        let cols = headers(&["Patient"]);
        let strict = infer_mapping_with(&cols, &catalog, &[], &MappingOptions { min_confidence: 90 })
            .unwrap();
        assert!(strict.is_empty());
        let lenient = infer_mapping_with(&cols, &catalog, &[], &MappingOptions::default()).unwrap();
        assert_eq!(lenient.header_for(CanonicalField::PatientId), Some("Patient"));
    }

    #[test]
    fn require_reports_unmapped_fields() {
        let mapping = infer_mapping(&headers(&["Patient"]));
        assert_eq!(
            mapping.require(&[CanonicalField::PatientId, CanonicalField::TestValue]),
            Err(ImportError::UnmappableSchema {
                missing: vec![CanonicalField::TestValue]
            })
        );
    }

    fn header_strategy() -> impl Strategy<Value = Vec<String>> {
        let pool = prop_oneof![
            Just("Patient".to_string()),
            Just("patient id".to_string()),
            Just("Test".to_string()),
            Just("Result".to_string()),
            Just("Value".to_string()),
            Just("Date".to_string()),
            Just("Sex".to_string()),
            Just("Age".to_string()),
            Just("Comments".to_string()),
            "[a-z_ ]{1,12}",
        ];
        proptest::collection::vec(pool, 0..10).prop_map(|names| {
            let mut seen = HashSet::new();
            names
                .into_iter()
                .filter(|name| seen.insert(name.clone()))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn inferred_mapping_is_a_deterministic_partial_bijection(cols in header_strategy()) {
            let first = infer_mapping(&cols);
            let second = infer_mapping(&cols);
            prop_assert_eq!(&first, &second);

            let mut fields = HashSet::new();
            let mut indices = HashSet::new();
            for assignment in first.assignments() {
                prop_assert!(fields.insert(assignment.field));
                prop_assert!(indices.insert(assignment.header_index));
                prop_assert!(assignment.confidence >= DEFAULT_MIN_CONFIDENCE);
                prop_assert_eq!(&cols[assignment.header_index], &assignment.header);
            }
        }
    }
}
