use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::ServiceResult;
use crate::models::{RiskAssessment, RiskLevel, TimeRange, Vital, VitalQuery, VitalType};
use crate::store::VitalStore;

pub const DEFAULT_WINDOW_HOURS: i64 = 24;
/// Roughly a century; longer settings are treated as misconfiguration.
pub const MAX_WINDOW_HOURS: i64 = 1_000_000;

/// Trailing interval aggregated by the engine. Between one hour and
/// `MAX_WINDOW_HOURS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskWindow {
    hours: i64,
}

impl RiskWindow {
    pub fn from_hours(hours: i64) -> Self {
        if !(1..=MAX_WINDOW_HOURS).contains(&hours) || Duration::try_hours(hours).is_none() {
            return Self::default();
        }
        Self { hours }
    }

    /// Reads a configured value; anything that is not an integer in
    /// `1..=MAX_WINDOW_HOURS` falls back to the default window.
    pub fn from_setting(raw: Option<&str>) -> Self {
        raw.and_then(|value| value.trim().parse::<i64>().ok())
            .map(Self::from_hours)
            .unwrap_or_default()
    }

    pub fn hours(&self) -> i64 {
        self.hours
    }

    pub fn bounds(&self, now: DateTime<Utc>) -> TimeRange {
        let from = Duration::try_hours(self.hours)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        TimeRange { from, to: now }
    }
}

impl Default for RiskWindow {
    fn default() -> Self {
        Self {
            hours: DEFAULT_WINDOW_HOURS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparator {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gt => value > threshold,
            Comparator::Gte => value >= threshold,
            Comparator::Lt => value < threshold,
            Comparator::Lte => value <= threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskRule {
    pub vital_type: VitalType,
    pub comparator: Comparator,
    pub threshold: f64,
}

impl RiskRule {
    pub fn triggers(&self, average: f64) -> bool {
        self.comparator.holds(average, self.threshold)
    }
}

impl fmt::Display for RiskRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.vital_type,
            self.comparator.symbol(),
            self.threshold
        )
    }
}

/// Evaluated in this order; triggered rules are reported in the same order.
pub const RISK_RULES: [RiskRule; 3] = [
    RiskRule {
        vital_type: VitalType::Hr,
        comparator: Comparator::Gt,
        threshold: 120.0,
    },
    RiskRule {
        vital_type: VitalType::Sbp,
        comparator: Comparator::Lt,
        threshold: 90.0,
    },
    RiskRule {
        vital_type: VitalType::SpO2,
        comparator: Comparator::Lt,
        threshold: 90.0,
    },
];

pub fn rule_vital_types() -> Vec<VitalType> {
    RISK_RULES.iter().map(|rule| rule.vital_type).collect()
}

pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Per-type mean of the readings, rounded to one decimal. Types without
/// readings are absent from the map.
pub fn average_by_type(vitals: &[Vital]) -> BTreeMap<VitalType, f64> {
    let mut sums: BTreeMap<VitalType, (f64, usize)> = BTreeMap::new();

    for vital in vitals {
        let entry = sums.entry(vital.vital_type).or_insert((0.0, 0));
        entry.0 += vital.value;
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|(vital_type, (sum, count))| (vital_type, round_one_decimal(sum / count as f64)))
        .collect()
}

pub fn triggered_rules(averages: &BTreeMap<VitalType, f64>) -> Vec<String> {
    RISK_RULES
        .iter()
        .filter(|rule| {
            averages
                .get(&rule.vital_type)
                .map_or(false, |average| rule.triggers(*average))
        })
        .map(|rule| rule.to_string())
        .collect()
}

/// Pure classification of an already loaded window.
pub fn assess(
    patient_id: &str,
    vitals: &[Vital],
    time_range: TimeRange,
    evaluated_at: DateTime<Utc>,
) -> RiskAssessment {
    let rule_types = rule_vital_types();
    let considered: Vec<Vital> = vitals
        .iter()
        .filter(|vital| rule_types.contains(&vital.vital_type))
        .cloned()
        .collect();

    let vital_averages = average_by_type(&considered);
    let triggered_rules = triggered_rules(&vital_averages);

    RiskAssessment {
        patient_id: patient_id.to_string(),
        risk_level: RiskLevel::from_triggered(triggered_rules.len()),
        triggered_rules,
        vital_averages,
        data_points_analyzed: considered.len(),
        time_range,
        evaluated_at,
    }
}

pub struct RiskEngine<S> {
    store: S,
    window: RiskWindow,
}

impl<S: VitalStore> RiskEngine<S> {
    pub fn new(store: S, window: RiskWindow) -> Self {
        Self { store, window }
    }

    pub async fn calculate_risk(&self, patient_id: &str) -> ServiceResult<RiskAssessment> {
        self.calculate_risk_at(patient_id, Utc::now()).await
    }

    /// Recomputes the assessment from stored vitals as of `now`. Reads only.
    pub async fn calculate_risk_at(
        &self,
        patient_id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<RiskAssessment> {
        let time_range = self.window.bounds(now);
        let query = VitalQuery {
            patient_id: patient_id.to_string(),
            from: time_range.from,
            to: time_range.to,
            vital_types: Some(rule_vital_types()),
        };
        let vitals = self.store.find_vitals(&query).await?;

        let assessment = assess(patient_id, &vitals, time_range, now);
        debug!(
            patient_id,
            risk_level = %assessment.risk_level,
            data_points = assessment.data_points_analyzed,
            window_hours = self.window.hours(),
            "evaluated vital risk"
        );

        Ok(assessment)
    }
}
