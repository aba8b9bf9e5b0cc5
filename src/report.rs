use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{RiskAssessment, VitalReading, VitalType, VitalTypeSummary};
use crate::risk;

pub fn summarize_by_type(readings: &[VitalReading]) -> Vec<VitalTypeSummary> {
    let mut map: BTreeMap<VitalType, (usize, f64, Option<DateTime<Utc>>)> = BTreeMap::new();

    for reading in readings {
        let entry = map.entry(reading.vital_type).or_insert((0, 0.0, None));
        entry.0 += 1;
        entry.1 += reading.value;
        entry.2 = entry.2.max(Some(reading.recorded_at));
    }

    let mut summaries: Vec<VitalTypeSummary> = map
        .into_iter()
        .map(|(vital_type, (count, total, latest))| VitalTypeSummary {
            vital_type,
            count,
            average: if count == 0 {
                0.0
            } else {
                risk::round_one_decimal(total / count as f64)
            },
            latest,
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count));
    summaries
}

pub fn build_report(assessment: &RiskAssessment, readings: &[VitalReading]) -> String {
    let summaries = summarize_by_type(readings);
    let mut output = String::new();

    let _ = writeln!(output, "# Vital Risk Report");
    let _ = writeln!(
        output,
        "Generated for {} at {} (vitals from {} to {})",
        assessment.patient_id,
        assessment.evaluated_at.to_rfc3339(),
        assessment.time_range.from.to_rfc3339(),
        assessment.time_range.to.to_rfc3339()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Level: {}", assessment.risk_level);
    let _ = writeln!(
        output,
        "{} data points analyzed.",
        assessment.data_points_analyzed
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Triggered Rules");
    if assessment.triggered_rules.is_empty() {
        let _ = writeln!(output, "No rules triggered in this window.");
    } else {
        for rule in assessment.triggered_rules.iter() {
            let _ = writeln!(output, "- {}", rule);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Vital Mix");
    if summaries.is_empty() {
        let _ = writeln!(output, "No vitals recorded for this window.");
    } else {
        for summary in summaries.iter() {
            let latest = summary
                .latest
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                output,
                "- {}: {} readings (avg {:.1}, latest {})",
                summary.vital_type, summary.count, summary.average, latest
            );
        }
    }

    let mut recent = readings.to_vec();
    recent.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Readings");
    if recent.is_empty() {
        let _ = writeln!(output, "No vitals recorded for this window.");
    } else {
        for reading in recent.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} {} = {}",
                reading.recorded_at.to_rfc3339(),
                reading.vital_type,
                reading.value
            );
        }
    }

    output
}
