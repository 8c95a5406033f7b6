use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::{
    catalog::CanonicalField, duplicate::DEFAULT_TOLERANCE_MINUTES,
    mapping::DEFAULT_MIN_CONFIDENCE,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Import laboratory exports and resolve demographic-aware reference ranges",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Propose a header-to-field mapping for an input file
    Map(MapArgs),
    /// Normalize, deduplicate and store the rows of an input file
    Import(ImportArgs),
    /// Resolve the reference range for a test and patient demographics
    Resolve(ResolveArgs),
    /// Validate or export custom range configurations
    Ranges(RangesArgs),
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// Input CSV/TSV file (`-` for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (tries utf-8, latin1, cp1252 when omitted)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct MappingArgs {
    /// Force a field onto a header, e.g. `--map patient_id="Sample ID"`
    #[arg(long = "map", value_parser = parse_override, action = clap::ArgAction::Append)]
    pub overrides: Vec<(CanonicalField, String)>,
    /// Minimum confidence (0-100) for automatic assignments
    #[arg(long = "min-confidence", default_value_t = DEFAULT_MIN_CONFIDENCE)]
    pub min_confidence: u8,
}

#[derive(Debug, Args)]
pub struct MapArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub mapping: MappingArgs,
    /// Print the mapping as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub mapping: MappingArgs,
    /// Store directory holding results.csv and patients.csv
    #[arg(short = 's', long = "store")]
    pub store: PathBuf,
    /// Accept rows even when they duplicate stored results
    #[arg(long = "no-duplicate-check")]
    pub no_duplicate_check: bool,
    /// Overwrite stored patient details with incoming values
    #[arg(long = "update-existing")]
    pub update_existing: bool,
    /// Minutes within which two timed results count as the same measurement
    #[arg(long = "tolerance-minutes", default_value_t = DEFAULT_TOLERANCE_MINUTES)]
    pub tolerance_minutes: u32,
    /// Test name for files that carry a single test and no test column
    #[arg(long = "default-test-name")]
    pub default_test_name: Option<String>,
    /// Date substituted for missing test dates (defaults to today)
    #[arg(long = "processing-date", value_parser = parse_date)]
    pub processing_date: Option<NaiveDate>,
    /// Write per-row failures to this CSV file
    #[arg(long = "report")]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RangeSourceArgs {
    /// Custom range configuration (.json, .yml or .yaml); repeatable
    #[arg(long = "ranges", action = clap::ArgAction::Append)]
    pub ranges: Vec<PathBuf>,
    /// Ignore the built-in reference tables
    #[arg(long = "no-builtin")]
    pub no_builtin: bool,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Test name, e.g. "Hemoglobin"
    #[arg(short = 't', long = "test")]
    pub test: String,
    /// Patient age in years (0-150)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=150))]
    pub age: Option<u8>,
    /// Patient gender (M/F/male/female/...)
    #[arg(long)]
    pub gender: Option<String>,
    /// Patient condition matched against custom condition ranges
    #[arg(long)]
    pub condition: Option<String>,
    #[command(flatten)]
    pub source: RangeSourceArgs,
    /// Classify this value against the resolved range
    #[arg(long, allow_negative_numbers = true)]
    pub value: Option<f64>,
    /// Print the decision as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct RangesArgs {
    #[command(subcommand)]
    pub command: RangesCommand,
}

#[derive(Debug, Subcommand)]
pub enum RangesCommand {
    /// Validate range configuration files
    Check(RangesCheckArgs),
    /// Write ranges grouped by test name to a JSON or YAML file
    Export(RangesExportArgs),
}

#[derive(Debug, Args)]
pub struct RangesCheckArgs {
    /// Range configuration files to validate
    #[arg(long = "ranges", required = true, action = clap::ArgAction::Append)]
    pub ranges: Vec<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RangesExportArgs {
    /// Range configuration files to merge before export
    #[arg(long = "ranges", action = clap::ArgAction::Append)]
    pub ranges: Vec<PathBuf>,
    /// Destination file; format follows the extension
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
    /// Include the built-in reference tables in the export
    #[arg(long = "include-builtin")]
    pub include_builtin: bool,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

pub fn parse_override(value: &str) -> Result<(CanonicalField, String), String> {
    let (field, header) = value
        .split_once('=')
        .ok_or_else(|| format!("Expected field=Header, got '{value}'"))?;
    let field = field
        .trim()
        .parse::<CanonicalField>()
        .map_err(|err| err.to_string())?;
    let header = header.trim().trim_matches('"');
    if header.is_empty() {
        return Err(format!("Override for '{field}' names no header"));
    }
    Ok((field, header.to_string()))
}

pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|err| format!("Expected YYYY-MM-DD, got '{value}': {err}"))
}
