//! How much of a patient's demographics are on file, and what adding the
//! rest would unlock for range selection.

use std::fmt;

use serde::Serialize;

use crate::{data::Gender, resolve::PatientProfile};

const AGE_POINTS: u8 = 50;
const GENDER_POINTS: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletenessLevel {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl CompletenessLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            100.. => CompletenessLevel::Excellent,
            50..=99 => CompletenessLevel::Good,
            25..=49 => CompletenessLevel::Fair,
            _ => CompletenessLevel::Poor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompletenessLevel::Poor => "poor",
            CompletenessLevel::Fair => "fair",
            CompletenessLevel::Good => "good",
            CompletenessLevel::Excellent => "excellent",
        }
    }
}

impl fmt::Display for CompletenessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DemographicCompleteness {
    pub score: u8,
    pub level: CompletenessLevel,
    pub missing: Vec<&'static str>,
    pub recommendations: Vec<&'static str>,
}

pub fn assess_demographics(age: Option<u8>, gender: Option<Gender>) -> DemographicCompleteness {
    let mut score = 0;
    let mut missing = Vec::new();
    let mut recommendations = Vec::new();

    if age.is_some() {
        score += AGE_POINTS;
    } else {
        missing.push("age");
        recommendations.push("Add date of birth for age-specific normal ranges");
    }

    if gender.is_some_and(|g| g.is_known()) {
        score += GENDER_POINTS;
    } else {
        missing.push("gender");
        recommendations.push("Add gender for gender-specific normal ranges");
    }

    DemographicCompleteness {
        score,
        level: CompletenessLevel::from_score(score),
        missing,
        recommendations,
    }
}

impl PatientProfile {
    pub fn completeness(&self) -> DemographicCompleteness {
        assess_demographics(self.age, self.gender)
    }
}
