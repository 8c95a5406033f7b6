//! Pattern catalog: the ordered list of canonical fields and the header
//! aliases each one is known by across laboratory device exports.
//!
//! Declaration order is significant. The schema mapper breaks score ties by
//! the position of a field in [`CanonicalField::ALL`], so reordering entries
//! changes which header wins an equal-score contest.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    PatientId,
    Age,
    Gender,
    TestName,
    TestValue,
    TestDate,
    Unit,
    LabTechnician,
    Notes,
    FirstName,
    LastName,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 11] = [
        CanonicalField::PatientId,
        CanonicalField::Age,
        CanonicalField::Gender,
        CanonicalField::TestName,
        CanonicalField::TestValue,
        CanonicalField::TestDate,
        CanonicalField::Unit,
        CanonicalField::LabTechnician,
        CanonicalField::Notes,
        CanonicalField::FirstName,
        CanonicalField::LastName,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::PatientId => "patient_id",
            CanonicalField::Age => "age",
            CanonicalField::Gender => "gender",
            CanonicalField::TestName => "test_name",
            CanonicalField::TestValue => "test_value",
            CanonicalField::TestDate => "test_date",
            CanonicalField::Unit => "unit",
            CanonicalField::LabTechnician => "lab_technician",
            CanonicalField::Notes => "notes",
            CanonicalField::FirstName => "first_name",
            CanonicalField::LastName => "last_name",
        }
    }

    /// Position in the catalog declaration order.
    pub fn ordinal(&self) -> usize {
        Self::ALL
            .iter()
            .position(|field| field == self)
            .unwrap_or(Self::ALL.len())
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalField {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        CanonicalField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == normalized)
            .ok_or_else(|| {
                anyhow!(
                    "Unknown field '{value}'. Supported fields: {}",
                    CanonicalField::ALL
                        .iter()
                        .map(|f| f.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

#[derive(Debug, Clone)]
pub struct FieldPatterns {
    pub field: CanonicalField,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PatternCatalog {
    entries: Vec<FieldPatterns>,
    ignore: Vec<String>,
}

const PATIENT_ID_ALIASES: &[&str] = &[
    "patient_id",
    "patientid",
    "patient id",
    "pid",
    "id",
    "patient_id_biocheq",
    "barcode_id",
    "barcode id",
];
const AGE_ALIASES: &[&str] = &["age", "patient_age", "age_years", "years"];
const GENDER_ALIASES: &[&str] = &["gender", "sex", "patient_gender", "male_female", "m/f"];
const TEST_NAME_ALIASES: &[&str] = &[
    "test_name",
    "testname",
    "test name",
    "test_type",
    "test type",
    "parameters",
    "analyte",
    "test",
    "parameter",
];
const TEST_VALUE_ALIASES: &[&str] = &[
    "test_value",
    "testvalue",
    "test value",
    "value",
    "result",
    "reading",
    "measurement",
    "concentration",
    "level",
];
const TEST_DATE_ALIASES: &[&str] = &[
    "test_date",
    "testdate",
    "test date",
    "date",
    "date_time",
    "date & time",
    "timestamp",
    "collection_date",
];
const UNIT_ALIASES: &[&str] = &["unit", "units", "measurement_unit", "test_unit"];
const LAB_TECHNICIAN_ALIASES: &[&str] = &[
    "lab_technician",
    "technician",
    "operator",
    "tech",
    "performed_by",
];
const NOTES_ALIASES: &[&str] = &["notes", "comments", "remarks", "observation"];
const FIRST_NAME_ALIASES: &[&str] = &["first_name", "firstname", "first name", "fname", "given_name"];
const LAST_NAME_ALIASES: &[&str] = &[
    "last_name",
    "lastname",
    "last name",
    "lname",
    "surname",
    "family_name",
];

// Serial counters, device identifiers and ward markers that devices emit
// alongside the measurement but that never carry canonical data.
const IGNORE_PATTERNS: &[&str] = &[
    "sr.",
    "sr no",
    "serial",
    "device_id",
    "device id",
    "bio-cheq",
    "biocheq",
    "opd/ipd",
    "opd",
    "ipd",
    "unused",
    "empty",
    "blank",
];

impl PatternCatalog {
    /// Catalog of aliases observed across supported device exports.
    pub fn standard() -> Self {
        let entries = CanonicalField::ALL
            .iter()
            .map(|field| FieldPatterns {
                field: *field,
                aliases: standard_aliases(*field)
                    .iter()
                    .map(|alias| alias.to_string())
                    .collect(),
            })
            .collect();
        Self {
            entries,
            ignore: IGNORE_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn new(entries: Vec<FieldPatterns>, ignore: Vec<String>) -> Self {
        Self { entries, ignore }
    }

    pub fn entries(&self) -> &[FieldPatterns] {
        &self.entries
    }

    pub fn aliases(&self, field: CanonicalField) -> &[String] {
        self.entries
            .iter()
            .find(|entry| entry.field == field)
            .map(|entry| entry.aliases.as_slice())
            .unwrap_or(&[])
    }

    /// Adds an alias to the end of a field's alias list.
    pub fn push_alias(&mut self, field: CanonicalField, alias: impl Into<String>) {
        let alias = alias.into();
        match self.entries.iter_mut().find(|entry| entry.field == field) {
            Some(entry) => entry.aliases.push(alias),
            None => self.entries.push(FieldPatterns {
                field,
                aliases: vec![alias],
            }),
        }
    }

    pub fn is_ignored(&self, header: &str) -> bool {
        let lowered = header.trim().to_lowercase();
        !lowered.is_empty()
            && self
                .ignore
                .iter()
                .any(|pattern| lowered == *pattern || lowered.contains(pattern.as_str()))
    }
}

impl Default for PatternCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

fn standard_aliases(field: CanonicalField) -> &'static [&'static str] {
    match field {
        CanonicalField::PatientId => PATIENT_ID_ALIASES,
        CanonicalField::Age => AGE_ALIASES,
        CanonicalField::Gender => GENDER_ALIASES,
        CanonicalField::TestName => TEST_NAME_ALIASES,
        CanonicalField::TestValue => TEST_VALUE_ALIASES,
        CanonicalField::TestDate => TEST_DATE_ALIASES,
        CanonicalField::Unit => UNIT_ALIASES,
        CanonicalField::LabTechnician => LAB_TECHNICIAN_ALIASES,
        CanonicalField::Notes => NOTES_ALIASES,
        CanonicalField::FirstName => FIRST_NAME_ALIASES,
        CanonicalField::LastName => LAST_NAME_ALIASES,
    }
}
