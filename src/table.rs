//! Plain-text table rendering for CLI reports.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::{
    catalog::CanonicalField,
    demographics::DemographicCompleteness,
    import::ImportSummary,
    mapping::FieldMapping,
    resolve::{RangeDecision, ResultStatus},
};

pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let mut widths = headers
        .iter()
        .map(|h| display_width(h).max(3))
        .collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }

    let mut output = String::new();
    let header_cells = headers.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&header_cells, &widths));
    let separator = widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

/// One line per canonical field: mapped header and confidence, or a gap.
pub fn render_mapping(mapping: &FieldMapping) -> String {
    let rows = CanonicalField::ALL
        .iter()
        .map(|field| match mapping.get(*field) {
            Some(assignment) => vec![
                field.to_string(),
                assignment.header.clone(),
                assignment.confidence.to_string(),
                if assignment.overridden {
                    "override".to_string()
                } else {
                    assignment.level().to_string()
                },
            ],
            None => vec![field.to_string(), "-".into(), "-".into(), "unmapped".into()],
        })
        .collect::<Vec<_>>();
    render_table(&["field", "header", "confidence", "level"], &rows)
}

pub fn render_summary(summary: &ImportSummary) -> String {
    let counts = [
        ("rows_seen", summary.rows_seen),
        ("rows_accepted", summary.rows_accepted),
        ("rows_skipped_duplicate", summary.rows_skipped_duplicate),
        ("rows_failed", summary.rows_failed),
        ("new_patients_created", summary.new_patients_created),
        ("patients_updated", summary.patients_updated),
        ("dates_defaulted", summary.dates_defaulted),
    ];
    let rows = counts
        .iter()
        .map(|(name, count)| vec![name.to_string(), count.to_string()])
        .collect::<Vec<_>>();
    let mut output = render_table(&["metric", "count"], &rows);

    if !summary.failures.is_empty() {
        let failures = summary
            .failures
            .iter()
            .map(|f| vec![(f.row_index + 1).to_string(), f.reason.to_string()])
            .collect::<Vec<_>>();
        output.push('\n');
        output.push_str(&render_table(&["row", "failure"], &failures));
    }
    if !summary.patient_failures.is_empty() {
        let failures = summary
            .patient_failures
            .iter()
            .map(|f| vec![(f.row_index + 1).to_string(), f.reason.to_string()])
            .collect::<Vec<_>>();
        output.push('\n');
        output.push_str(&render_table(&["row", "patient not saved"], &failures));
    }
    output
}

pub fn render_decision(
    decision: &RangeDecision,
    completeness: &DemographicCompleteness,
    classification: Option<(f64, ResultStatus)>,
) -> String {
    let (critical_low, critical_high) = decision.critical_thresholds();
    let mut rows = vec![
        vec!["test".to_string(), decision.test_name.clone()],
        vec![
            "normal range".to_string(),
            format!("{} - {}", decision.normal_min(), decision.normal_max()),
        ],
        vec![
            "critical range".to_string(),
            format!("<= {critical_low} / >= {critical_high}"),
        ],
        vec!["tier".to_string(), decision.tier.to_string()],
        vec!["score".to_string(), decision.score.to_string()],
        vec!["age adjusted".to_string(), decision.age_adjusted.to_string()],
        vec![
            "gender adjusted".to_string(),
            decision.gender_adjusted.to_string(),
        ],
        vec!["provenance".to_string(), decision.provenance.clone()],
        vec![
            "demographics".to_string(),
            format!("{} ({}/100)", completeness.level, completeness.score),
        ],
    ];
    rows.extend(
        completeness
            .recommendations
            .iter()
            .map(|r| vec!["recommendation".to_string(), r.to_string()]),
    );
    if let Some((value, status)) = classification {
        rows.push(vec!["value".to_string(), value.to_string()]);
        rows.push(vec!["status".to_string(), status.to_string()]);
    }
    render_table(&["attribute", "value"], &rows)
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let sanitized = sanitize_cell(value);
            let padding = width.saturating_sub(display_width(&sanitized));
            format!("{sanitized}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    while line.ends_with(' ') {
        line.pop();
    }
    line
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
