//! Range resolver: picks the most specific admissible reference range for a
//! test given whatever demographics are known, and classifies values against
//! it.
//!
//! Resolution is a three step pipeline over the candidate list:
//!
//! 1. [`score_candidate`] drops candidates whose filters contradict a known
//!    attribute and scores the rest.
//! 2. [`compare_candidates`] orders the survivors; the first one wins.
//! 3. With no survivor a synthetic `0-100` default is returned, so resolution
//!    never fails.

use std::{cmp::Ordering, fmt};

use log::debug;
use serde::Serialize;

use crate::{
    data::{Gender, NormalizedResult},
    ranges::{RangeCandidate, RangePool},
};

pub const AGE_MATCH_SCORE: u32 = 10;
pub const GENDER_MATCH_SCORE: u32 = 5;
pub const CONDITION_MATCH_SCORE: u32 = 15;
pub const SPECIFICITY_BONUS: u32 = 5;

/// Share of the normal width added beyond each normal bound when a range has
/// no explicit critical threshold.
pub const DERIVED_CRITICAL_FRACTION: f64 = 0.3;

pub const DEFAULT_NORMAL_MIN: f64 = 0.0;
pub const DEFAULT_NORMAL_MAX: f64 = 100.0;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientProfile {
    pub age: Option<u8>,
    pub gender: Option<Gender>,
    pub condition: Option<String>,
}

impl PatientProfile {
    pub fn new(age: Option<u8>, gender: Option<Gender>, condition: Option<String>) -> Self {
        Self {
            age,
            gender,
            condition,
        }
    }

    pub fn from_result(result: &NormalizedResult) -> Self {
        Self::new(result.age, result.gender, None)
    }

    /// Gender usable for range selection; `Unknown` counts as absent.
    pub fn known_gender(&self) -> Option<Gender> {
        self.gender.filter(Gender::is_known)
    }

    fn known_condition(&self) -> Option<&str> {
        self.condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackTier {
    Custom,
    AgeGender,
    AgeOnly,
    GenderOnly,
    BaseAdult,
    SyntheticDefault,
}

impl FallbackTier {
    fn of(candidate: &RangeCandidate) -> Self {
        if candidate.is_custom() {
            return FallbackTier::Custom;
        }
        match (candidate.has_age_bounds(), candidate.gender.is_some()) {
            (true, true) => FallbackTier::AgeGender,
            (true, false) => FallbackTier::AgeOnly,
            (false, true) => FallbackTier::GenderOnly,
            (false, false) => FallbackTier::BaseAdult,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackTier::Custom => "custom",
            FallbackTier::AgeGender => "age_gender",
            FallbackTier::AgeOnly => "age_only",
            FallbackTier::GenderOnly => "gender_only",
            FallbackTier::BaseAdult => "base_adult",
            FallbackTier::SyntheticDefault => "synthetic_default",
        }
    }
}

impl fmt::Display for FallbackTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The range chosen for one test and patient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeDecision {
    pub test_name: String,
    pub range: RangeCandidate,
    pub tier: FallbackTier,
    pub score: u32,
    pub age_adjusted: bool,
    pub gender_adjusted: bool,
    /// Effective thresholds: the range's own, else the test's base range's.
    pub critical_low: Option<f64>,
    pub critical_high: Option<f64>,
    pub provenance: String,
}

impl RangeDecision {
    pub fn normal_min(&self) -> f64 {
        self.range.normal_min
    }

    pub fn normal_max(&self) -> f64 {
        self.range.normal_max
    }

    /// Critical thresholds. When either bound is missing both are derived
    /// from the normal width.
    pub fn critical_thresholds(&self) -> (f64, f64) {
        if let (Some(low), Some(high)) = (self.critical_low, self.critical_high) {
            return (low, high);
        }
        let margin = (self.normal_max() - self.normal_min()) * DERIVED_CRITICAL_FRACTION;
        (self.normal_min() - margin, self.normal_max() + margin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Normal,
    Low,
    High,
    CriticalLow,
    CriticalHigh,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Normal => "normal",
            ResultStatus::Low => "low",
            ResultStatus::High => "high",
            ResultStatus::CriticalLow => "critical_low",
            ResultStatus::CriticalHigh => "critical_high",
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, ResultStatus::CriticalLow | ResultStatus::CriticalHigh)
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate that survived filtering, with its score and load position.
#[derive(Debug, Clone, Copy)]
pub struct ScoredCandidate<'a> {
    pub index: usize,
    pub candidate: &'a RangeCandidate,
    pub score: u32,
}

/// Scores `candidate` for `profile`, or `None` when one of its filters
/// contradicts a known attribute.
///
/// A custom range filtering on an attribute the patient lacks stays
/// admissible with that dimension unscored. Built-in table rows partition
/// patients by age group and gender, so they require the attribute to be
/// known; unknown demographics reach them through the gender-only and base
/// rows instead. The specificity bonus counts every non-null filter
/// dimension beyond the first.
///
/// The test name is not checked here; see [`resolve`].
pub fn score_candidate(candidate: &RangeCandidate, profile: &PatientProfile) -> Option<u32> {
    let strict = !candidate.is_custom();
    let mut score = 0;

    if candidate.has_age_bounds() {
        match profile.age {
            Some(age) => {
                if candidate.age_min.is_some_and(|min| age < min)
                    || candidate.age_max.is_some_and(|max| age > max)
                {
                    return None;
                }
                score += AGE_MATCH_SCORE;
            }
            None if strict => return None,
            None => {}
        }
    }

    if let Some(required) = candidate.gender {
        match profile.known_gender() {
            Some(gender) if gender != required => return None,
            Some(_) => score += GENDER_MATCH_SCORE,
            None if strict => return None,
            None => {}
        }
    }

    if let Some(required) = candidate.condition_name.as_deref() {
        match profile.known_condition() {
            Some(condition) if !condition.eq_ignore_ascii_case(required.trim()) => return None,
            Some(_) if candidate.is_custom() => score += CONDITION_MATCH_SCORE,
            Some(_) => {}
            None if strict => return None,
            None => {}
        }
    }

    let dimensions = candidate.specificity();
    if dimensions > 1 {
        score += SPECIFICITY_BONUS * (dimensions - 1);
    }
    Some(score)
}

/// Orders candidates best first: higher score, then custom over built-in,
/// then more filter dimensions, then earlier load order.
pub fn compare_candidates(a: &ScoredCandidate<'_>, b: &ScoredCandidate<'_>) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.candidate.is_custom().cmp(&a.candidate.is_custom()))
        .then_with(|| b.candidate.specificity().cmp(&a.candidate.specificity()))
        .then_with(|| a.index.cmp(&b.index))
}

pub fn resolve(
    test_name: &str,
    profile: &PatientProfile,
    candidates: &[RangeCandidate],
) -> RangeDecision {
    let winner = candidates
        .iter()
        .enumerate()
        .filter(|(_, candidate)| candidate.matches_test(test_name))
        .filter_map(|(index, candidate)| {
            score_candidate(candidate, profile).map(|score| ScoredCandidate {
                index,
                candidate,
                score,
            })
        })
        .min_by(compare_candidates);

    let Some(winner) = winner else {
        debug!("No admissible range for '{test_name}'; using synthetic default");
        return synthetic_default(test_name);
    };

    let range = winner.candidate.clone();
    let tier = FallbackTier::of(&range);
    let base = base_range(test_name, candidates);
    let critical_low = range
        .critical_low
        .or_else(|| base.and_then(|b| b.critical_low));
    let critical_high = range
        .critical_high
        .or_else(|| base.and_then(|b| b.critical_high));
    let provenance = describe(tier, &range);
    debug!(
        "Resolved '{test_name}' to '{}' (tier {tier}, score {})",
        range.display_name(),
        winner.score
    );

    RangeDecision {
        test_name: test_name.trim().to_string(),
        age_adjusted: range.has_age_bounds(),
        gender_adjusted: range.gender.is_some(),
        tier,
        score: winner.score,
        critical_low,
        critical_high,
        provenance,
        range,
    }
}

impl RangePool {
    pub fn resolve(&self, test_name: &str, profile: &PatientProfile) -> RangeDecision {
        resolve(test_name, profile, self.candidates())
    }
}

pub fn classify(value: f64, decision: &RangeDecision) -> ResultStatus {
    let (critical_low, critical_high) = decision.critical_thresholds();
    if value >= critical_high {
        ResultStatus::CriticalHigh
    } else if value <= critical_low {
        ResultStatus::CriticalLow
    } else if value > decision.normal_max() {
        ResultStatus::High
    } else if value < decision.normal_min() {
        ResultStatus::Low
    } else {
        ResultStatus::Normal
    }
}

/// The unfiltered range for a test, preferring a built-in one.
fn base_range<'a>(test_name: &str, candidates: &'a [RangeCandidate]) -> Option<&'a RangeCandidate> {
    let mut unfiltered = candidates
        .iter()
        .filter(|c| c.matches_test(test_name) && c.is_unfiltered());
    let first = unfiltered.clone().next();
    unfiltered.find(|c| !c.is_custom()).or(first)
}

fn synthetic_default(test_name: &str) -> RangeDecision {
    let test_name = test_name.trim().to_string();
    let range = RangeCandidate::new(test_name.clone(), DEFAULT_NORMAL_MIN, DEFAULT_NORMAL_MAX)
        .named("default")
        .built_in();
    RangeDecision {
        provenance: format!(
            "No reference range configured for '{test_name}'; using default {DEFAULT_NORMAL_MIN}-{DEFAULT_NORMAL_MAX}"
        ),
        test_name,
        range,
        tier: FallbackTier::SyntheticDefault,
        score: 0,
        age_adjusted: false,
        gender_adjusted: false,
        critical_low: None,
        critical_high: None,
    }
}

fn describe(tier: FallbackTier, range: &RangeCandidate) -> String {
    match tier {
        FallbackTier::Custom => format!(
            "Custom range '{}' ({})",
            range.display_name(),
            range.describe_filters()
        ),
        FallbackTier::AgeGender => format!("Age/gender adjusted ({})", range.describe_filters()),
        FallbackTier::AgeOnly => format!("Age adjusted ({})", range.describe_filters()),
        FallbackTier::GenderOnly => format!(
            "Gender adjusted (assumed adult, {})",
            range.gender.map(|g| g.as_str()).unwrap_or("any")
        ),
        FallbackTier::BaseAdult => "Base range (assumed adult)".to_string(),
        FallbackTier::SyntheticDefault => "Synthetic default".to_string(),
    }
}
