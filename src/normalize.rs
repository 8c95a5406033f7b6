//! Value normalizer: turns one raw row into a [`NormalizedResult`].
//!
//! Only `patient_id`, `test_value` and `test_name` can reject a row. Every
//! other field degrades to absent (or, for the date, to the processing date)
//! and leaves a [`Notice`] so callers can report what was lost.

use std::fmt;

use chrono::{Local, NaiveDate};
use log::debug;
use serde::Serialize;

use crate::{
    catalog::CanonicalField,
    data::{
        NormalizedResult, RawRow, TestTimestamp, clean_text, is_placeholder, parse_age,
        parse_gender, parse_test_timestamp, parse_test_value,
    },
    error::RowError,
    mapping::FieldMapping,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Substituted for missing or unparseable test dates.
    pub processing_date: NaiveDate,
    /// Used when the test name column is unmapped or empty.
    pub default_test_name: Option<String>,
}

impl NormalizeOptions {
    pub fn new(processing_date: NaiveDate) -> Self {
        Self {
            processing_date,
            default_test_name: None,
        }
    }
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self::new(Local::now().date_naive())
    }
}

/// Non-fatal observations made while normalizing a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    DateDefaulted { raw: String, substituted: NaiveDate },
    AgeDiscarded { raw: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::DateDefaulted { raw, substituted } if raw.is_empty() => {
                write!(f, "date_defaulted: no test date, used {substituted}")
            }
            Notice::DateDefaulted { raw, substituted } => {
                write!(f, "date_defaulted: could not parse '{raw}', used {substituted}")
            }
            Notice::AgeDiscarded { raw } => write!(f, "age_discarded: '{raw}' is not a valid age"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub result: NormalizedResult,
    pub notices: Vec<Notice>,
}

impl Normalized {
    pub fn date_defaulted(&self) -> bool {
        self.notices
            .iter()
            .any(|notice| matches!(notice, Notice::DateDefaulted { .. }))
    }
}

pub fn normalize(
    row: &RawRow<'_>,
    mapping: &FieldMapping,
    options: &NormalizeOptions,
) -> Result<Normalized, RowError> {
    let cell = |field: CanonicalField| mapping.index_for(field).map(|idx| row.cell(idx));
    let mut notices = Vec::new();

    let patient_id = cell(CanonicalField::PatientId)
        .and_then(clean_text)
        .ok_or(RowError::MissingRequiredField(CanonicalField::PatientId))?;

    let raw_value = cell(CanonicalField::TestValue).unwrap_or("");
    if is_placeholder(raw_value) {
        return Err(RowError::MissingRequiredField(CanonicalField::TestValue));
    }
    let test_value = parse_test_value(raw_value).map_err(|_| RowError::InvalidNumericValue {
        field: CanonicalField::TestValue,
        value: raw_value.trim().to_string(),
    })?;

    let test_name = cell(CanonicalField::TestName)
        .and_then(clean_text)
        .or_else(|| options.default_test_name.clone())
        .ok_or(RowError::MissingRequiredField(CanonicalField::TestName))?;

    let age = match cell(CanonicalField::Age) {
        Some(raw) if !is_placeholder(raw) => match parse_age(raw) {
            Ok(age) => Some(age),
            Err(err) => {
                debug!("Discarding age for patient {patient_id}: {err}");
                notices.push(Notice::AgeDiscarded {
                    raw: raw.trim().to_string(),
                });
                None
            }
        },
        _ => None,
    };

    let gender = cell(CanonicalField::Gender).and_then(parse_gender);

    let raw_date = cell(CanonicalField::TestDate).unwrap_or("");
    let test_date = match parse_test_timestamp(raw_date) {
        Ok(parsed) if !raw_date.trim().is_empty() => parsed,
        _ => {
            notices.push(Notice::DateDefaulted {
                raw: raw_date.trim().to_string(),
                substituted: options.processing_date,
            });
            TestTimestamp::date(options.processing_date)
        }
    };

    let text = |field: CanonicalField| cell(field).and_then(clean_text);

    Ok(Normalized {
        result: NormalizedResult {
            patient_id,
            age,
            gender,
            test_name,
            test_value,
            test_date,
            unit: text(CanonicalField::Unit),
            lab_technician: text(CanonicalField::LabTechnician),
            notes: text(CanonicalField::Notes),
            first_name: text(CanonicalField::FirstName),
            last_name: text(CanonicalField::LastName),
        },
        notices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::Gender, mapping::infer_mapping};
    use rust_decimal::Decimal;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn options() -> NormalizeOptions {
        NormalizeOptions::new(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap())
    }

    #[test]
    fn scenario_row_normalizes_every_field() {
        let headers = strings(&["Patient", "Test", "Result", "Units", "Date", "Age", "Sex"]);
        let cells = strings(&["P001", "Glucose", "95.5", "mg/dL", "2024-01-15", "45", "M"]);
        let mapping = infer_mapping(&headers);
        let normalized = normalize(&RawRow::new(&headers, &cells), &mapping, &options()).unwrap();
        let result = normalized.result;
        assert_eq!(result.patient_id, "P001");
        assert_eq!(result.test_name, "Glucose");
        assert_eq!(result.test_value, Decimal::new(955, 1));
        assert_eq!(result.unit.as_deref(), Some("mg/dL"));
        assert_eq!(result.age, Some(45));
        assert_eq!(result.gender, Some(Gender::Male));
        assert_eq!(
            result.test_date,
            TestTimestamp::date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
        );
        assert!(normalized.notices.is_empty());
    }

    #[test]
    fn missing_patient_id_rejects_the_row() {
        let headers = strings(&["Patient", "Test", "Result"]);
        let cells = strings(&["  ", "Glucose", "95"]);
        let mapping = infer_mapping(&headers);
        assert_eq!(
            normalize(&RawRow::new(&headers, &cells), &mapping, &options()),
            Err(RowError::MissingRequiredField(CanonicalField::PatientId))
        );
    }

    #[test]
    fn non_numeric_value_rejects_the_row() {
        let headers = strings(&["Patient", "Test", "Result"]);
        let cells = strings(&["P1", "Glucose", "high"]);
        let mapping = infer_mapping(&headers);
        assert_eq!(
            normalize(&RawRow::new(&headers, &cells), &mapping, &options()),
            Err(RowError::InvalidNumericValue {
                field: CanonicalField::TestValue,
                value: "high".into()
            })
        );
    }

    #[test]
    fn empty_value_is_a_missing_field() {
        let headers = strings(&["Patient", "Test", "Result"]);
        let cells = strings(&["P1", "Glucose", "NA"]);
        let mapping = infer_mapping(&headers);
        assert_eq!(
            normalize(&RawRow::new(&headers, &cells), &mapping, &options()),
            Err(RowError::MissingRequiredField(CanonicalField::TestValue))
        );
    }

    #[test]
    fn unparseable_date_defaults_with_notice() {
        let headers = strings(&["Patient", "Test", "Result", "Date"]);
        let cells = strings(&["P1", "Glucose", "90", "sometime"]);
        let mapping = infer_mapping(&headers);
        let normalized = normalize(&RawRow::new(&headers, &cells), &mapping, &options()).unwrap();
        assert_eq!(
            normalized.result.test_date,
            TestTimestamp::date(options().processing_date)
        );
        assert!(normalized.date_defaulted());
    }

    #[test]
    fn invalid_age_degrades_to_absent() {
        let headers = strings(&["Patient", "Test", "Result", "Date", "Age"]);
        let cells = strings(&["P1", "Glucose", "90", "2024-01-15", "200"]);
        let mapping = infer_mapping(&headers);
        let normalized = normalize(&RawRow::new(&headers, &cells), &mapping, &options()).unwrap();
        assert_eq!(normalized.result.age, None);
        assert_eq!(
            normalized.notices,
            vec![Notice::AgeDiscarded { raw: "200".into() }]
        );
    }

    #[test]
    fn default_test_name_fills_unmapped_column() {
        let headers = strings(&["Patient", "Result"]);
        let cells = strings(&["P1", "13.2"]);
        let mapping = infer_mapping(&headers);
        let mut opts = options();
        assert_eq!(
            normalize(&RawRow::new(&headers, &cells), &mapping, &opts),
            Err(RowError::MissingRequiredField(CanonicalField::TestName))
        );
        opts.default_test_name = Some("Hemoglobin".into());
        let normalized = normalize(&RawRow::new(&headers, &cells), &mapping, &opts).unwrap();
        assert_eq!(normalized.result.test_name, "Hemoglobin");
    }
}
