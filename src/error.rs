//! Error types shared by the import engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::CanonicalField;

/// Per-row failures. A row that fails is excluded; the import continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("missing required field '{0}'")]
    MissingRequiredField(CanonicalField),
    #[error("invalid numeric value '{value}' for field '{field}'")]
    InvalidNumericValue {
        field: CanonicalField,
        value: String,
    },
}

/// Problems with a caller-supplied mapping override.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("header '{0}' is not present in the input")]
    HeaderNotFound(String),
    #[error("header '{header}' is already mapped to '{field}'")]
    HeaderAlreadyUsed {
        header: String,
        field: CanonicalField,
    },
    #[error("field '{0}' was given more than one override")]
    FieldAlreadyMapped(CanonicalField),
}

/// Terminal failures that stop a dataset before any row is committed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    #[error("required field(s) could not be mapped: {}", join_fields(.missing))]
    UnmappableSchema { missing: Vec<CanonicalField> },
}

#[derive(Debug, Error)]
pub enum RangeConfigError {
    #[error("range #{index} for '{test_name}': {reason}")]
    InvalidCandidate {
        index: usize,
        test_name: String,
        reason: String,
    },
    #[error("unsupported range configuration format for {0:?} (expected .json, .yml or .yaml)")]
    UnsupportedFormat(PathBuf),
    #[error("reading range configuration {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing JSON range configuration")]
    Json(#[from] serde_json::Error),
    #[error("parsing YAML range configuration")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("store I/O failure at {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store CSV failure")]
    Csv(#[from] csv::Error),
    #[error("corrupt store record: {0}")]
    Corrupt(String),
}

fn join_fields(fields: &[CanonicalField]) -> String {
    fields
        .iter()
        .map(|field| field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
