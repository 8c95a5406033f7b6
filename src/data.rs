use std::{fmt, str::FromStr};

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A fully materialized table: one header row plus decoded data rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<RawRow<'_>> {
        self.rows.get(index).map(|cells| RawRow {
            headers: &self.headers,
            cells,
        })
    }

    pub fn raw_rows(&self) -> impl Iterator<Item = RawRow<'_>> {
        self.rows.iter().map(|cells| RawRow {
            headers: &self.headers,
            cells,
        })
    }
}

/// One data row viewed alongside the header row it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct RawRow<'a> {
    pub headers: &'a [String],
    pub cells: &'a [String],
}

impl<'a> RawRow<'a> {
    pub fn new(headers: &'a [String], cells: &'a [String]) -> Self {
        Self { headers, cells }
    }

    /// Cell at `index`; short rows read as empty.
    pub fn cell(&self, index: usize) -> &'a str {
        self.cells.get(index).map(|s| s.as_str()).unwrap_or("")
    }

    pub fn get(&self, header: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .position(|h| h == header)
            .map(|idx| self.cell(idx))
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.headers
            .iter()
            .enumerate()
            .map(|(idx, header)| (header.as_str(), self.cell(idx)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
            Gender::Unknown => "Unknown",
        }
    }

    /// Whether the value identifies the patient for range selection.
    pub fn is_known(&self) -> bool {
        !matches!(self, Gender::Unknown)
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_gender(value).ok_or_else(|| anyhow!("Gender value is empty"))
    }
}

/// A test date, with the time of day when the source carried one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestTimestamp {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
}

impl TestTimestamp {
    pub fn date(date: NaiveDate) -> Self {
        Self { date, time: None }
    }

    pub fn datetime(value: NaiveDateTime) -> Self {
        Self {
            date: value.date(),
            time: Some(value.time()),
        }
    }

    pub fn has_time(&self) -> bool {
        self.time.is_some()
    }

    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        self.time.map(|time| self.date.and_time(time))
    }

    /// Absolute distance between two timestamps that both carry a time.
    pub fn distance(&self, other: &TestTimestamp) -> Option<TimeDelta> {
        let left = self.to_datetime()?;
        let right = other.to_datetime()?;
        Some((left - right).abs())
    }
}

impl fmt::Display for TestTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.time {
            Some(time) => write!(f, "{} {}", self.date.format("%Y-%m-%d"), time.format("%H:%M:%S")),
            None => write!(f, "{}", self.date.format("%Y-%m-%d")),
        }
    }
}

/// One test result in canonical shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub patient_id: String,
    pub age: Option<u8>,
    pub gender: Option<Gender>,
    pub test_name: String,
    pub test_value: Decimal,
    pub test_date: TestTimestamp,
    pub unit: Option<String>,
    pub lab_technician: Option<String>,
    pub notes: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl NormalizedResult {
    pub fn patient(&self) -> PatientRecord {
        PatientRecord {
            patient_id: self.patient_id.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            age: self.age,
            gender: self.gender,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<u8>,
    pub gender: Option<Gender>,
}

impl PatientRecord {
    /// Fills fields that are absent here with values from `incoming`,
    /// replacing present ones. Returns whether anything changed.
    pub fn merge_from(&mut self, incoming: &PatientRecord) -> bool {
        let before = self.clone();
        if incoming.first_name.is_some() {
            self.first_name.clone_from(&incoming.first_name);
        }
        if incoming.last_name.is_some() {
            self.last_name.clone_from(&incoming.last_name);
        }
        if incoming.age.is_some() {
            self.age = incoming.age;
        }
        if incoming.gender.is_some() {
            self.gender = incoming.gender;
        }
        *self != before
    }
}

pub const MAX_AGE: u8 = 150;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const DAY_FIRST_DATETIME_FORMATS: &[&str] = &["%d/%m/%Y %H:%M:%S", "%d/%m/%Y %H:%M"];

const DATE_FORMATS: &[&str] = &[
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%d-%b-%Y",
    "%b %d, %Y",
];

/// Parses a test date, trying each supported layout in a fixed order.
///
/// Day-first layouts are tried before month-first ones, so `03/04/2024` is
/// the 3rd of April while `04/15/2024` can only be April 15th.
pub fn parse_test_timestamp(value: &str) -> Result<TestTimestamp> {
    let trimmed = value.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(TestTimestamp::datetime(parsed));
        }
    }
    if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(TestTimestamp::date(parsed));
    }
    for fmt in DAY_FIRST_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(TestTimestamp::datetime(parsed));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(TestTimestamp::date(parsed));
        }
    }
    Err(anyhow!("Failed to parse '{value}' as a test date"))
}

pub fn is_placeholder(value: &str) -> bool {
    let lowered = value.trim().to_ascii_lowercase();
    if lowered.is_empty() {
        return true;
    }
    let stripped = lowered.trim_start_matches('#');
    matches!(
        stripped,
        "na" | "n/a" | "n.a." | "nan" | "null" | "none" | "unknown" | "missing"
    ) || stripped.chars().all(|c| c == '-')
}

/// Trimmed text, or `None` when empty or a placeholder token.
pub fn clean_text(value: &str) -> Option<String> {
    if is_placeholder(value) {
        None
    } else {
        Some(value.trim().to_string())
    }
}

pub fn parse_gender(value: &str) -> Option<Gender> {
    let lowered = value.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "" => None,
        "m" | "male" | "man" | "1" => Some(Gender::Male),
        "f" | "female" | "woman" | "2" => Some(Gender::Female),
        "u" | "unk" | "unknown" => Some(Gender::Unknown),
        other if is_placeholder(other) => None,
        _ => Some(Gender::Other),
    }
}

/// Age in whole years; anything outside `0..=150` is rejected.
pub fn parse_age(value: &str) -> Result<u8> {
    let trimmed = value.trim();
    let years = match trimmed.parse::<i64>() {
        Ok(years) => years,
        Err(_) => {
            let float: f64 = trimmed
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as age"))?;
            if float.fract() != 0.0 || !float.is_finite() {
                return Err(anyhow!("Age '{value}' is not a whole number"));
            }
            float as i64
        }
    };
    if !(0..=i64::from(MAX_AGE)).contains(&years) {
        return Err(anyhow!("Age '{value}' is outside 0-{MAX_AGE}"));
    }
    Ok(years as u8)
}

pub fn parse_test_value(value: &str) -> Result<Decimal> {
    let trimmed = value.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .with_context(|| format!("Failed to parse '{value}' as a decimal"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parse_test_timestamp_supports_every_layout() {
        let expected = ymd(2024, 1, 15);
        for raw in [
            "2024-01-15",
            "15/01/2024",
            "01/15/2024",
            "15-01-2024",
            "2024/01/15",
            "15.01.2024",
            "15-Jan-2024",
            "Jan 15, 2024",
        ] {
            let parsed = parse_test_timestamp(raw).unwrap_or_else(|e| panic!("{raw}: {e}"));
            assert_eq!(parsed, TestTimestamp::date(expected), "{raw}");
        }
    }

    #[test]
    fn parse_test_timestamp_keeps_time_of_day() {
        let parsed = parse_test_timestamp("2024-01-15 14:30:00").unwrap();
        assert_eq!(parsed.date, ymd(2024, 1, 15));
        assert_eq!(parsed.time, NaiveTime::from_hms_opt(14, 30, 0));
        let day_first = parse_test_timestamp("15/01/2024 09:05").unwrap();
        assert_eq!(day_first.time, NaiveTime::from_hms_opt(9, 5, 0));
    }

    #[test]
    fn ambiguous_slash_dates_read_day_first() {
        let parsed = parse_test_timestamp("03/04/2024").unwrap();
        assert_eq!(parsed.date, ymd(2024, 4, 3));
    }

    #[test]
    fn parse_test_timestamp_rejects_garbage() {
        assert!(parse_test_timestamp("yesterday").is_err());
        assert!(parse_test_timestamp("2024-13-45").is_err());
    }

    #[test]
    fn gender_tokens_are_standardized() {
        assert_eq!(parse_gender("M"), Some(Gender::Male));
        assert_eq!(parse_gender(" female "), Some(Gender::Female));
        assert_eq!(parse_gender("2"), Some(Gender::Female));
        assert_eq!(parse_gender("Unknown"), Some(Gender::Unknown));
        assert_eq!(parse_gender("x"), Some(Gender::Other));
        assert_eq!(parse_gender("N/A"), None);
        assert_eq!(parse_gender(""), None);
    }

    #[test]
    fn age_bounds_are_enforced() {
        assert_eq!(parse_age("45").unwrap(), 45);
        assert_eq!(parse_age("45.0").unwrap(), 45);
        assert!(parse_age("45.5").is_err());
        assert!(parse_age("-1").is_err());
        assert!(parse_age("151").is_err());
        assert!(parse_age("old").is_err());
    }

    #[test]
    fn test_values_keep_exact_decimal_precision() {
        assert_eq!(parse_test_value("95.5").unwrap(), Decimal::new(955, 1));
        assert_eq!(parse_test_value("95.50").unwrap(), parse_test_value("95.5").unwrap());
        assert_eq!(parse_test_value("1.2e3").unwrap(), Decimal::new(1200, 0));
        assert!(parse_test_value("high").is_err());
    }

    #[test]
    fn placeholders_are_treated_as_empty() {
        assert_eq!(clean_text("  N/A "), None);
        assert_eq!(clean_text("---"), None);
        assert_eq!(clean_text(" mg/dL "), Some("mg/dL".to_string()));
    }

    #[test]
    fn distance_requires_time_on_both_sides() {
        let a = parse_test_timestamp("2024-01-15 10:00").unwrap();
        let b = parse_test_timestamp("2024-01-15 10:20").unwrap();
        let c = parse_test_timestamp("2024-01-15").unwrap();
        assert_eq!(a.distance(&b), Some(TimeDelta::minutes(20)));
        assert_eq!(a.distance(&c), None);
    }

    #[test]
    fn raw_row_reads_short_rows_as_empty() {
        let headers = vec!["a".to_string(), "b".to_string()];
        let cells = vec!["1".to_string()];
        let row = RawRow::new(&headers, &cells);
        assert_eq!(row.cell(1), "");
        assert_eq!(row.get("a"), Some("1"));
        assert_eq!(row.get("z"), None);
    }
}
