//! Built-in reference ranges shipped with the engine.
//!
//! Every test has one unfiltered base range (the adult default). A handful
//! of tests also carry demographic adjustments, either split by gender and
//! age group or by age group alone.

use crate::{data::Gender, ranges::RangeCandidate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeGroup {
    pub name: &'static str,
    pub min: u8,
    pub max: u8,
}

pub const INFANT: AgeGroup = AgeGroup { name: "infant", min: 0, max: 1 };
pub const CHILD: AgeGroup = AgeGroup { name: "child", min: 2, max: 12 };
pub const TEEN: AgeGroup = AgeGroup { name: "teen", min: 13, max: 17 };
pub const ADULT: AgeGroup = AgeGroup { name: "adult", min: 18, max: 64 };
pub const ELDERLY: AgeGroup = AgeGroup { name: "elderly", min: 65, max: 150 };

pub const AGE_GROUPS: [AgeGroup; 5] = [INFANT, CHILD, TEEN, ADULT, ELDERLY];

pub fn age_group(age: u8) -> Option<AgeGroup> {
    AGE_GROUPS
        .into_iter()
        .find(|group| (group.min..=group.max).contains(&age))
}

/// (test, unit, normal_min, normal_max)
const BASE_RANGES: &[(&str, &str, f64, f64)] = &[
    ("Hemoglobin", "g/dL", 12.0, 16.0),
    ("White Blood Cell Count", "cells/μL", 4000.0, 11000.0),
    ("Platelet Count", "cells/μL", 150000.0, 450000.0),
    ("Blood Glucose", "mg/dL", 70.0, 100.0),
    ("Cholesterol Total", "mg/dL", 0.0, 200.0),
    ("HDL Cholesterol", "mg/dL", 40.0, 100.0),
    ("LDL Cholesterol", "mg/dL", 0.0, 100.0),
    ("Triglycerides", "mg/dL", 0.0, 150.0),
    ("Creatinine", "mg/dL", 0.6, 1.2),
    ("Blood Urea Nitrogen", "mg/dL", 7.0, 20.0),
    ("ALT", "U/L", 7.0, 40.0),
    ("AST", "U/L", 8.0, 40.0),
    ("Blood Pressure Systolic", "mmHg", 90.0, 120.0),
    ("Blood Pressure Diastolic", "mmHg", 60.0, 80.0),
    ("Heart Rate", "bpm", 60.0, 100.0),
];

/// (test, gender, age group, normal_min, normal_max)
const GENDER_AGE_RANGES: &[(&str, Gender, AgeGroup, f64, f64)] = &[
    ("Hemoglobin", Gender::Male, ADULT, 13.8, 17.2),
    ("Hemoglobin", Gender::Male, CHILD, 11.0, 16.0),
    ("Hemoglobin", Gender::Male, ELDERLY, 13.0, 16.8),
    ("Hemoglobin", Gender::Female, ADULT, 12.1, 15.1),
    ("Hemoglobin", Gender::Female, CHILD, 11.0, 16.0),
    ("Hemoglobin", Gender::Female, ELDERLY, 11.7, 15.5),
    ("Creatinine", Gender::Male, ADULT, 0.7, 1.3),
    ("Creatinine", Gender::Male, CHILD, 0.3, 0.7),
    ("Creatinine", Gender::Male, ELDERLY, 0.8, 1.4),
    ("Creatinine", Gender::Female, ADULT, 0.6, 1.1),
    ("Creatinine", Gender::Female, CHILD, 0.3, 0.7),
    ("Creatinine", Gender::Female, ELDERLY, 0.6, 1.2),
    ("HDL Cholesterol", Gender::Male, ADULT, 40.0, 100.0),
    ("HDL Cholesterol", Gender::Male, CHILD, 35.0, 100.0),
    ("HDL Cholesterol", Gender::Male, ELDERLY, 40.0, 100.0),
    ("HDL Cholesterol", Gender::Female, ADULT, 50.0, 100.0),
    ("HDL Cholesterol", Gender::Female, CHILD, 35.0, 100.0),
    ("HDL Cholesterol", Gender::Female, ELDERLY, 50.0, 100.0),
];

/// (test, age group, normal_min, normal_max)
const AGE_RANGES: &[(&str, AgeGroup, f64, f64)] = &[
    ("Heart Rate", INFANT, 100.0, 160.0),
    ("Heart Rate", CHILD, 70.0, 120.0),
    ("Heart Rate", TEEN, 60.0, 100.0),
    ("Heart Rate", ADULT, 60.0, 100.0),
    ("Heart Rate", ELDERLY, 60.0, 100.0),
    ("Blood Pressure Systolic", CHILD, 80.0, 110.0),
    ("Blood Pressure Systolic", TEEN, 100.0, 120.0),
    ("Blood Pressure Systolic", ADULT, 90.0, 120.0),
    ("Blood Pressure Systolic", ELDERLY, 90.0, 140.0),
];

pub fn unit_for(test_name: &str) -> Option<&'static str> {
    BASE_RANGES
        .iter()
        .find(|(name, ..)| name.eq_ignore_ascii_case(test_name.trim()))
        .map(|(_, unit, ..)| *unit)
}

/// Built-in candidates in a stable order: base ranges first, then the
/// gender-only adult ranges, then the age-bounded ones.
pub fn builtin_ranges() -> Vec<RangeCandidate> {
    let base = BASE_RANGES.iter().map(|(test, unit, min, max)| {
        let mut candidate = RangeCandidate::new(*test, *min, *max)
            .named("base")
            .built_in();
        candidate.notes = Some(format!("Adult reference range ({unit})"));
        candidate
    });

    // With no age on file, gendered tests fall back to the adult range for
    // that gender.
    let gender_only = GENDER_AGE_RANGES
        .iter()
        .filter(|(_, _, group, ..)| *group == ADULT)
        .map(|(test, gender, _, min, max)| {
            RangeCandidate::new(*test, *min, *max)
                .named(format!("{gender} (assumed adult)"))
                .for_gender(*gender)
                .built_in()
        });

    let gender_age = GENDER_AGE_RANGES
        .iter()
        .map(|(test, gender, group, min, max)| {
            RangeCandidate::new(*test, *min, *max)
                .named(format!("{gender} {}", group.name))
                .ages(Some(group.min), Some(group.max))
                .for_gender(*gender)
                .built_in()
        });

    let age_only = AGE_RANGES.iter().map(|(test, group, min, max)| {
        RangeCandidate::new(*test, *min, *max)
            .named(group.name)
            .ages(Some(group.min), Some(group.max))
            .built_in()
    });

    base.chain(gender_only)
        .chain(gender_age)
        .chain(age_only)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_range_is_valid() {
        for candidate in builtin_ranges() {
            assert!(
                candidate.validate().is_ok(),
                "{} / {:?}",
                candidate.test_name,
                candidate.range_name
            );
            assert!(!candidate.is_custom());
        }
    }

    #[test]
    fn every_adjusted_test_has_a_base_range() {
        let ranges = builtin_ranges();
        for candidate in ranges.iter().filter(|c| !c.is_unfiltered()) {
            assert!(
                ranges
                    .iter()
                    .any(|base| base.is_unfiltered() && base.test_name == candidate.test_name),
                "{} has no base range",
                candidate.test_name
            );
        }
    }

    #[test]
    fn age_groups_cover_every_valid_age() {
        for age in 0..=150u8 {
            assert!(age_group(age).is_some(), "age {age} has no group");
        }
        assert_eq!(age_group(8).map(|g| g.name), Some("child"));
        assert_eq!(age_group(65).map(|g| g.name), Some("elderly"));
    }

    #[test]
    fn units_are_looked_up_case_insensitively() {
        assert_eq!(unit_for("hemoglobin"), Some("g/dL"));
        assert_eq!(unit_for("Unobtainium"), None);
    }
}
