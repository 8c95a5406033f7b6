//! Import orchestrator: maps, normalizes, deduplicates and commits a table of
//! raw rows to a [`ResultSink`].
//!
//! Rows are independent. A row that cannot be normalized or written is
//! recorded in the summary and the import moves on to the next one; only an
//! unmappable schema stops the dataset, and it does so before any row is
//! touched.

use std::{collections::BTreeMap, fmt};

use chrono::{Local, NaiveDate};
use log::{debug, info, warn};

use crate::{
    catalog::CanonicalField,
    data::{NormalizedResult, PatientRecord, Table},
    duplicate::{self, DEFAULT_TOLERANCE_MINUTES},
    error::{ImportError, RowError, SinkError},
    mapping::FieldMapping,
    normalize::{NormalizeOptions, Notice, normalize},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    pub check_duplicates: bool,
    /// Overwrite stored patient details with non-empty incoming values.
    pub update_existing: bool,
    pub tolerance_minutes: u32,
    pub processing_date: NaiveDate,
    pub default_test_name: Option<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            check_duplicates: true,
            update_existing: false,
            tolerance_minutes: DEFAULT_TOLERANCE_MINUTES,
            processing_date: Local::now().date_naive(),
            default_test_name: None,
        }
    }
}

impl ImportOptions {
    fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            processing_date: self.processing_date,
            default_test_name: self.default_test_name.clone(),
        }
    }

    fn required_fields(&self) -> Vec<CanonicalField> {
        let mut required = vec![CanonicalField::PatientId, CanonicalField::TestValue];
        if self.default_test_name.is_none() {
            required.insert(1, CanonicalField::TestName);
        }
        required
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Row(RowError),
    SinkWrite(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Row(err) => write!(f, "{err}"),
            FailureReason::SinkWrite(message) => write!(f, "sink write failed: {message}"),
        }
    }
}

impl From<RowError> for FailureReason {
    fn from(err: RowError) -> Self {
        FailureReason::Row(err)
    }
}

impl From<SinkError> for FailureReason {
    fn from(err: SinkError) -> Self {
        FailureReason::SinkWrite(format_sink_error(&err))
    }
}

fn format_sink_error(err: &SinkError) -> String {
    match std::error::Error::source(err) {
        Some(source) => format!("{err}: {source}"),
        None => err.to_string(),
    }
}

/// A failed row. `row_index` is zero-based over data rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub row_index: usize,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowNotice {
    pub row_index: usize,
    pub notice: Notice,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub rows_seen: usize,
    pub rows_accepted: usize,
    pub rows_skipped_duplicate: usize,
    pub rows_failed: usize,
    pub new_patients_created: usize,
    pub patients_updated: usize,
    pub dates_defaulted: usize,
    pub failures: Vec<RowFailure>,
    /// Accepted rows whose patient record could not be written.
    pub patient_failures: Vec<RowFailure>,
    pub notices: Vec<RowNotice>,
}

impl ImportSummary {
    fn fail(&mut self, row_index: usize, reason: impl Into<FailureReason>) {
        let reason = reason.into();
        warn!("Row {row_index}: {reason}");
        self.rows_failed += 1;
        self.failures.push(RowFailure { row_index, reason });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatientUpsert {
    Created,
    Updated,
    Unchanged,
}

/// Persistence collaborator for accepted results.
///
/// Implementations must make results appended during a run visible to
/// `existing_results_for` immediately, so duplicates within one file are
/// caught.
pub trait ResultSink {
    fn existing_results_for(&self, patient_id: &str) -> Result<Vec<NormalizedResult>, SinkError>;

    fn append(&mut self, result: &NormalizedResult) -> Result<(), SinkError>;

    fn upsert_patient(
        &mut self,
        patient: &PatientRecord,
        update_existing: bool,
    ) -> Result<PatientUpsert, SinkError>;
}

/// Applies an incoming patient record to a stored one.
pub fn merge_patient(
    stored: &mut PatientRecord,
    incoming: &PatientRecord,
    update_existing: bool,
) -> PatientUpsert {
    if update_existing && stored.merge_from(incoming) {
        PatientUpsert::Updated
    } else {
        PatientUpsert::Unchanged
    }
}

/// In-memory sink, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    results: Vec<NormalizedResult>,
    patients: BTreeMap<String, PatientRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> &[NormalizedResult] {
        &self.results
    }

    pub fn patient(&self, patient_id: &str) -> Option<&PatientRecord> {
        self.patients.get(patient_id)
    }

    pub fn patient_count(&self) -> usize {
        self.patients.len()
    }
}

impl ResultSink for MemorySink {
    fn existing_results_for(&self, patient_id: &str) -> Result<Vec<NormalizedResult>, SinkError> {
        Ok(self
            .results
            .iter()
            .filter(|r| r.patient_id == patient_id)
            .cloned()
            .collect())
    }

    fn append(&mut self, result: &NormalizedResult) -> Result<(), SinkError> {
        self.results.push(result.clone());
        Ok(())
    }

    fn upsert_patient(
        &mut self,
        patient: &PatientRecord,
        update_existing: bool,
    ) -> Result<PatientUpsert, SinkError> {
        match self.patients.get_mut(&patient.patient_id) {
            Some(stored) => Ok(merge_patient(stored, patient, update_existing)),
            None => {
                self.patients
                    .insert(patient.patient_id.clone(), patient.clone());
                Ok(PatientUpsert::Created)
            }
        }
    }
}

pub fn import_dataset<S: ResultSink + ?Sized>(
    table: &Table,
    mapping: &FieldMapping,
    sink: &mut S,
    options: &ImportOptions,
) -> Result<ImportSummary, ImportError> {
    mapping.require(&options.required_fields())?;

    let normalize_options = options.normalize_options();
    let mut summary = ImportSummary::default();

    for (row_index, row) in table.raw_rows().enumerate() {
        summary.rows_seen += 1;

        let normalized = match normalize(&row, mapping, &normalize_options) {
            Ok(normalized) => normalized,
            Err(err) => {
                summary.fail(row_index, err);
                continue;
            }
        };
        let result = &normalized.result;

        if options.check_duplicates {
            match sink.existing_results_for(&result.patient_id) {
                Ok(existing) => {
                    if duplicate::is_duplicate(result, &existing, options.tolerance_minutes) {
                        debug!(
                            "Row {row_index}: skipping duplicate {} result for patient {}",
                            result.test_name, result.patient_id
                        );
                        summary.rows_skipped_duplicate += 1;
                        continue;
                    }
                }
                Err(err) => {
                    summary.fail(row_index, err);
                    continue;
                }
            }
        }

        if let Err(err) = sink.append(result) {
            summary.fail(row_index, err);
            continue;
        }
        summary.rows_accepted += 1;

        // The result is stored; a patient write failure no longer rejects the row.
        match sink.upsert_patient(&result.patient(), options.update_existing) {
            Ok(PatientUpsert::Created) => summary.new_patients_created += 1,
            Ok(PatientUpsert::Updated) => summary.patients_updated += 1,
            Ok(PatientUpsert::Unchanged) => {}
            Err(err) => {
                warn!(
                    "Row {row_index}: patient {} not saved: {}",
                    result.patient_id,
                    format_sink_error(&err)
                );
                summary.patient_failures.push(RowFailure {
                    row_index,
                    reason: err.into(),
                });
            }
        }

        if normalized.date_defaulted() {
            summary.dates_defaulted += 1;
        }
        summary.notices.extend(
            normalized
                .notices
                .into_iter()
                .map(|notice| RowNotice { row_index, notice }),
        );
    }

    info!(
        "Import finished: {} seen, {} accepted, {} duplicate(s), {} failed",
        summary.rows_seen,
        summary.rows_accepted,
        summary.rows_skipped_duplicate,
        summary.rows_failed
    );
    Ok(summary)
}
