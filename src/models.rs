use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ServiceError;

pub const BIRTH_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl From<ParseEnumError> for ServiceError {
    fn from(err: ParseEnumError) -> Self {
        ServiceError::WrongParameter(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VitalType {
    #[serde(rename = "HR")]
    Hr,
    #[serde(rename = "RR")]
    Rr,
    #[serde(rename = "SBP")]
    Sbp,
    #[serde(rename = "DBP")]
    Dbp,
    #[serde(rename = "SpO2")]
    SpO2,
    #[serde(rename = "BT")]
    Bt,
}

impl VitalType {
    pub const ALL: [VitalType; 6] = [
        VitalType::Hr,
        VitalType::Rr,
        VitalType::Sbp,
        VitalType::Dbp,
        VitalType::SpO2,
        VitalType::Bt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VitalType::Hr => "HR",
            VitalType::Rr => "RR",
            VitalType::Sbp => "SBP",
            VitalType::Dbp => "DBP",
            VitalType::SpO2 => "SpO2",
            VitalType::Bt => "BT",
        }
    }
}

impl fmt::Display for VitalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VitalType {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        VitalType::ALL
            .into_iter()
            .find(|vital_type| vital_type.as_str() == value)
            .ok_or_else(|| ParseEnumError {
                kind: "vital type",
                value: value.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    M,
    F,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::M => "M",
            Gender::F => "F",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "M" => Ok(Gender::M),
            "F" => Ok(Gender::F),
            other => Err(ParseEnumError {
                kind: "gender",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patient {
    pub id: Uuid,
    pub patient_id: String,
    pub name: String,
    pub gender: Gender,
    pub birth_date: NaiveDate,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Natural key of a vital measurement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VitalKey {
    pub patient_id: String,
    pub recorded_at: DateTime<Utc>,
    pub vital_type: VitalType,
}

impl fmt::Display for VitalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vital {} {} at {}",
            self.patient_id, self.vital_type, self.recorded_at
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vital {
    pub patient_id: String,
    pub recorded_at: DateTime<Utc>,
    pub vital_type: VitalType,
    pub value: f64,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Vital {
    pub fn key(&self) -> VitalKey {
        VitalKey {
            patient_id: self.patient_id.clone(),
            recorded_at: self.recorded_at,
            vital_type: self.vital_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VitalQuery {
    pub patient_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// `None` means every vital type.
    pub vital_types: Option<Vec<VitalType>>,
}

impl VitalQuery {
    #[cfg(test)]
    pub fn matches(&self, vital: &Vital) -> bool {
        vital.patient_id == self.patient_id
            && vital.recorded_at >= self.from
            && vital.recorded_at <= self.to
            && self
                .vital_types
                .as_ref()
                .map_or(true, |types| types.contains(&vital.vital_type))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VitalReading {
    pub vital_type: VitalType,
    pub recorded_at: DateTime<Utc>,
    pub value: f64,
}

impl From<&Vital> for VitalReading {
    fn from(vital: &Vital) -> Self {
        Self {
            vital_type: vital.vital_type,
            recorded_at: vital.recorded_at,
            value: vital.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientVitals {
    pub patient_id: String,
    pub items: Vec<VitalReading>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VitalTypeSummary {
    pub vital_type: VitalType,
    pub count: usize,
    pub average: f64,
    pub latest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePatientRequest {
    pub patient_id: String,
    pub name: String,
    pub gender: String,
    pub birth_date: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePatientRequest {
    pub name: String,
    pub gender: String,
    pub birth_date: String,
    pub version: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertVitalRequest {
    pub patient_id: String,
    pub recorded_at: DateTime<Utc>,
    pub vital_type: String,
    pub value: f64,
    pub version: i32,
}

#[derive(Debug, Clone)]
pub struct GetVitalsRequest {
    pub patient_id: String,
    pub from: String,
    pub to: String,
    pub vital_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_triggered(count: usize) -> Self {
        match count {
            0 => RiskLevel::Low,
            1 | 2 => RiskLevel::Medium,
            _ => RiskLevel::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub patient_id: String,
    pub risk_level: RiskLevel,
    pub triggered_rules: Vec<String>,
    pub vital_averages: BTreeMap<VitalType, f64>,
    pub data_points_analyzed: usize,
    pub time_range: TimeRange,
    pub evaluated_at: DateTime<Utc>,
}

pub fn parse_birth_date(value: &str) -> Result<NaiveDate, ServiceError> {
    NaiveDate::parse_from_str(value, BIRTH_DATE_FORMAT).map_err(|_| {
        ServiceError::wrong_parameter(format!("birth date must be YYYY-MM-DD, got {value:?}"))
    })
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ServiceError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| {
            ServiceError::wrong_parameter(format!("timestamp must be RFC 3339, got {value:?}"))
        })
}
