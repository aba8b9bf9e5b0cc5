use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    parse_timestamp, GetVitalsRequest, PatientVitals, TimeRange, UpsertVitalRequest, Vital,
    VitalKey, VitalQuery, VitalReading, VitalType,
};
use crate::patients::validate_patient_id;
use crate::store::{VersionGuard, VitalStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted { version: i32 },
    Updated { version: i32 },
}

/// Where the upsert goes after the lookup.
#[derive(Debug)]
enum UpsertStep {
    Insert,
    Update(Vital),
}

pub struct VitalService<S> {
    store: S,
}

impl<S: VitalStore> VitalService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Inserts the measurement when the `(patient, recorded_at, type)` triple
    /// is new, otherwise updates it under the version guard. Conflicts are
    /// reported once and never retried here.
    pub async fn upsert_vital(
        &self,
        request: &UpsertVitalRequest,
    ) -> ServiceResult<UpsertOutcome> {
        let key = validate_upsert(request)?;

        match self.lookup(&key).await? {
            UpsertStep::Insert => self.insert(key, request).await,
            UpsertStep::Update(existing) => self.update(existing, request).await,
        }
    }

    async fn lookup(&self, key: &VitalKey) -> ServiceResult<UpsertStep> {
        match self.store.find_vital(key).await {
            Ok(existing) => Ok(UpsertStep::Update(existing)),
            Err(err) if err.is_not_found() => Ok(UpsertStep::Insert),
            Err(err) => Err(err),
        }
    }

    async fn insert(
        &self,
        key: VitalKey,
        request: &UpsertVitalRequest,
    ) -> ServiceResult<UpsertOutcome> {
        if request.version != 1 {
            return Err(ServiceError::wrong_parameter("version must be 1 for new record"));
        }

        let now = Utc::now();
        let vital = Vital {
            patient_id: key.patient_id,
            recorded_at: key.recorded_at,
            vital_type: key.vital_type,
            value: request.value,
            version: 1,
            created_at: now,
            updated_at: Some(now),
        };

        match self.store.insert_vital(&vital).await {
            Ok(()) => {}
            // Another writer created the triple after our lookup.
            Err(ServiceError::Duplicate(detail)) => {
                warn!(
                    patient_id = %vital.patient_id,
                    vital_type = %vital.vital_type,
                    "lost insert race for vital"
                );
                return Err(ServiceError::conflict(format!(
                    "concurrent insert of {detail}"
                )));
            }
            Err(err) => return Err(err),
        }

        info!(
            patient_id = %vital.patient_id,
            vital_type = %vital.vital_type,
            recorded_at = %vital.recorded_at,
            "inserted vital"
        );
        Ok(UpsertOutcome::Inserted { version: 1 })
    }

    async fn update(
        &self,
        mut existing: Vital,
        request: &UpsertVitalRequest,
    ) -> ServiceResult<UpsertOutcome> {
        let guard = VersionGuard::check(existing.version, request.version).map_err(|err| {
            warn!(
                patient_id = %existing.patient_id,
                vital_type = %existing.vital_type,
                stored = existing.version,
                supplied = request.version,
                "vital version mismatch"
            );
            err
        })?;

        existing.value = request.value;
        existing.version = guard.target();
        existing.updated_at = Some(Utc::now());

        if let Err(err) = self.store.update_vital(&existing, guard).await {
            if err.is_conflict() {
                warn!(
                    patient_id = %existing.patient_id,
                    vital_type = %existing.vital_type,
                    expected = guard.expected(),
                    "vital changed between lookup and write"
                );
            }
            return Err(err);
        }

        info!(
            patient_id = %existing.patient_id,
            vital_type = %existing.vital_type,
            version = guard.target(),
            "updated vital"
        );
        Ok(UpsertOutcome::Updated {
            version: guard.target(),
        })
    }

    pub async fn get_vitals(&self, request: &GetVitalsRequest) -> ServiceResult<PatientVitals> {
        validate_patient_id(&request.patient_id)?;
        let from = parse_timestamp(&request.from)?;
        let to = parse_timestamp(&request.to)?;
        if from > to {
            return Err(ServiceError::wrong_parameter(format!(
                "from ({from}) must not be after to ({to})"
            )));
        }
        let vital_types = request
            .vital_type
            .as_deref()
            .map(|raw| raw.parse::<VitalType>().map(|parsed| vec![parsed]))
            .transpose()?;

        let items = self
            .readings(&request.patient_id, TimeRange { from, to }, vital_types)
            .await?;

        Ok(PatientVitals {
            patient_id: request.patient_id.clone(),
            items,
        })
    }

    pub async fn readings(
        &self,
        patient_id: &str,
        range: TimeRange,
        vital_types: Option<Vec<VitalType>>,
    ) -> ServiceResult<Vec<VitalReading>> {
        let query = VitalQuery {
            patient_id: patient_id.to_string(),
            from: range.from,
            to: range.to,
            vital_types,
        };
        let vitals = self.store.find_vitals(&query).await?;
        debug!(patient_id, count = vitals.len(), "loaded vitals");

        Ok(vitals.iter().map(VitalReading::from).collect())
    }
}

fn validate_upsert(request: &UpsertVitalRequest) -> ServiceResult<VitalKey> {
    validate_patient_id(&request.patient_id)?;
    let vital_type = request.vital_type.parse::<VitalType>()?;
    if !request.value.is_finite() {
        return Err(ServiceError::wrong_parameter("value must be a finite number"));
    }
    if request.version < 1 {
        return Err(ServiceError::wrong_parameter("version must be at least 1"));
    }

    Ok(VitalKey {
        patient_id: request.patient_id.clone(),
        recorded_at: request.recorded_at,
        vital_type,
    })
}
