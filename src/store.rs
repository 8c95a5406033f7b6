//! File-backed result store: a directory holding `results.csv` and
//! `patients.csv`.
//!
//! Existing rows are loaded when the store is opened and kept in memory, so
//! results appended during an import are visible to later duplicate checks.
//! Each appended result is written and flushed on its own.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::BufReader,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    data::{NormalizedResult, PatientRecord, parse_gender, parse_test_timestamp},
    error::SinkError,
    import::{PatientUpsert, ResultSink, merge_patient},
};

pub const RESULTS_FILE: &str = "results.csv";
pub const PATIENTS_FILE: &str = "patients.csv";

/// On-disk shape of one result row.
#[derive(Debug, Serialize, Deserialize)]
struct StoredResult {
    patient_id: String,
    test_name: String,
    test_value: String,
    unit: Option<String>,
    test_date: String,
    age: Option<u8>,
    gender: Option<String>,
    lab_technician: Option<String>,
    notes: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

impl StoredResult {
    fn from_result(result: &NormalizedResult) -> Self {
        Self {
            patient_id: result.patient_id.clone(),
            test_name: result.test_name.clone(),
            test_value: result.test_value.to_string(),
            unit: result.unit.clone(),
            test_date: result.test_date.to_string(),
            age: result.age,
            gender: result.gender.map(|g| g.as_str().to_string()),
            lab_technician: result.lab_technician.clone(),
            notes: result.notes.clone(),
            first_name: result.first_name.clone(),
            last_name: result.last_name.clone(),
        }
    }

    fn into_result(self, line: usize) -> Result<NormalizedResult, SinkError> {
        let test_value = Decimal::from_str(&self.test_value).map_err(|err| {
            SinkError::Corrupt(format!(
                "{RESULTS_FILE} record {line}: test_value '{}': {err}",
                self.test_value
            ))
        })?;
        let test_date = parse_test_timestamp(&self.test_date).map_err(|err| {
            SinkError::Corrupt(format!("{RESULTS_FILE} record {line}: {err}"))
        })?;
        Ok(NormalizedResult {
            patient_id: self.patient_id,
            age: self.age,
            gender: self.gender.as_deref().and_then(parse_gender),
            test_name: self.test_name,
            test_value,
            test_date,
            unit: self.unit,
            lab_technician: self.lab_technician,
            notes: self.notes,
            first_name: self.first_name,
            last_name: self.last_name,
        })
    }
}

#[derive(Debug)]
pub struct CsvResultStore {
    dir: PathBuf,
    results: Vec<NormalizedResult>,
    patients: BTreeMap<String, PatientRecord>,
}

impl CsvResultStore {
    /// Opens (creating if needed) the store rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self, SinkError> {
        fs::create_dir_all(dir).map_err(|source| SinkError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut store = Self {
            dir: dir.to_path_buf(),
            results: Vec::new(),
            patients: BTreeMap::new(),
        };
        store.results = store.load_results()?;
        store.patients = store.load_patients()?;
        debug!(
            "Opened store {dir:?} with {} result(s) and {} patient(s)",
            store.results.len(),
            store.patients.len()
        );
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir.join(RESULTS_FILE)
    }

    pub fn patients_path(&self) -> PathBuf {
        self.dir.join(PATIENTS_FILE)
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

    fn load_results(&self) -> Result<Vec<NormalizedResult>, SinkError> {
        let path = self.results_path();
        let Some(mut reader) = open_reader(&path)? else {
            return Ok(Vec::new());
        };
        reader
            .deserialize::<StoredResult>()
            .enumerate()
            .map(|(idx, row)| row?.into_result(idx + 1))
            .collect()
    }

    fn load_patients(&self) -> Result<BTreeMap<String, PatientRecord>, SinkError> {
        let path = self.patients_path();
        let Some(mut reader) = open_reader(&path)? else {
            return Ok(BTreeMap::new());
        };
        let mut patients = BTreeMap::new();
        for row in reader.deserialize::<PatientRecord>() {
            let patient = row?;
            patients.insert(patient.patient_id.clone(), patient);
        }
        Ok(patients)
    }

    fn write_patients(&self) -> Result<(), SinkError> {
        let path = self.patients_path();
        let staging = self.dir.join(format!("{PATIENTS_FILE}.tmp"));
        {
            let mut writer = csv::Writer::from_path(&staging)?;
            for patient in self.patients.values() {
                writer.serialize(patient)?;
            }
            writer.flush().map_err(|source| SinkError::Io {
                path: staging.clone(),
                source,
            })?;
        }
        fs::rename(&staging, &path).map_err(|source| SinkError::Io { path, source })
    }
}

fn open_reader(path: &Path) -> Result<Option<csv::Reader<BufReader<File>>>, SinkError> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path).map_err(|source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(csv::Reader::from_reader(BufReader::new(file))))
}

impl ResultSink for CsvResultStore {
    fn existing_results_for(&self, patient_id: &str) -> Result<Vec<NormalizedResult>, SinkError> {
        Ok(self
            .results
            .iter()
            .filter(|r| r.patient_id == patient_id)
            .cloned()
            .collect())
    }

    fn append(&mut self, result: &NormalizedResult) -> Result<(), SinkError> {
        let path = self.results_path();
        let io_err = |source| SinkError::Io {
            path: path.clone(),
            source,
        };
        let needs_header = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer.serialize(StoredResult::from_result(result))?;
        writer.flush().map_err(io_err)?;
        self.results.push(result.clone());
        Ok(())
    }

    fn upsert_patient(
        &mut self,
        patient: &PatientRecord,
        update_existing: bool,
    ) -> Result<PatientUpsert, SinkError> {
        let previous = self.patients.get(&patient.patient_id).cloned();
        let outcome = match self.patients.get_mut(&patient.patient_id) {
            Some(stored) => merge_patient(stored, patient, update_existing),
            None => {
                self.patients
                    .insert(patient.patient_id.clone(), patient.clone());
                PatientUpsert::Created
            }
        };
        if outcome == PatientUpsert::Unchanged {
            return Ok(outcome);
        }
        if let Err(err) = self.write_patients() {
            // Memory must not get ahead of patients.csv.
            match previous {
                Some(stored) => self.patients.insert(patient.patient_id.clone(), stored),
                None => self.patients.remove(&patient.patient_id),
            };
            return Err(err);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Gender;
    use tempfile::tempdir;

    fn result(patient: &str, value: &str, date: &str) -> NormalizedResult {
        NormalizedResult {
            patient_id: patient.into(),
            age: Some(45),
            gender: Some(Gender::Male),
            test_name: "Glucose".into(),
            test_value: Decimal::from_str(value).unwrap(),
            test_date: parse_test_timestamp(date).unwrap(),
            unit: Some("mg/dL".into()),
            lab_technician: None,
            notes: Some("fasting, repeat".into()),
            first_name: None,
            last_name: None,
        }
    }

    #[test]
    fn appended_results_survive_reopen() {
        let dir = tempdir().unwrap();
        let mut store = CsvResultStore::open(dir.path()).unwrap();
        let first = result("P1", "95.5", "2024-01-15");
        let second = result("P1", "101", "2024-01-16 08:30");
        store.append(&first).unwrap();
        store.append(&second).unwrap();

        let reopened = CsvResultStore::open(dir.path()).unwrap();
        assert_eq!(reopened.results(), &[first, second]);
        assert_eq!(reopened.existing_results_for("P1").unwrap().len(), 2);
        assert!(reopened.existing_results_for("P2").unwrap().is_empty());
    }

    #[test]
    fn patients_are_persisted_and_updated() {
        let dir = tempdir().unwrap();
        let mut store = CsvResultStore::open(dir.path()).unwrap();
        let mut patient = result("P1", "1", "2024-01-15").patient();
        patient.gender = None;
        assert_eq!(
            store.upsert_patient(&patient, false).unwrap(),
            PatientUpsert::Created
        );

        patient.gender = Some(Gender::Female);
        assert_eq!(
            store.upsert_patient(&patient, false).unwrap(),
            PatientUpsert::Unchanged
        );
        assert_eq!(
            store.upsert_patient(&patient, true).unwrap(),
            PatientUpsert::Updated
        );

        let reopened = CsvResultStore::open(dir.path()).unwrap();
        assert_eq!(reopened.patient_count(), 1);
        assert_eq!(
            reopened.patient("P1").and_then(|p| p.gender),
            Some(Gender::Female)
        );
    }

    #[test]
    fn failed_patient_writes_are_rolled_back() {
        let dir = tempdir().unwrap();
        let mut store = CsvResultStore::open(dir.path()).unwrap();
        let patient = result("P5", "1", "2024-01-15").patient();

        let staging = dir.path().join(format!("{PATIENTS_FILE}.tmp"));
        fs::create_dir(&staging).unwrap();
        assert!(store.upsert_patient(&patient, false).is_err());
        assert!(store.patient("P5").is_none());

        fs::remove_dir(&staging).unwrap();
        assert_eq!(
            store.upsert_patient(&patient, false).unwrap(),
            PatientUpsert::Created
        );
        let reopened = CsvResultStore::open(dir.path()).unwrap();
        assert!(reopened.patient("P5").is_some());
    }

    #[test]
    fn corrupt_results_are_reported() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(RESULTS_FILE),
            "patient_id,test_name,test_value,unit,test_date,age,gender,lab_technician,notes,first_name,last_name\n\
             P1,Glucose,abc,,2024-01-15,,,,,,\n",
        )
        .unwrap();
        let err = CsvResultStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, SinkError::Corrupt(_)));
    }
}
