//! In-memory store used by the service tests. It honours the same conditional
//! write contract as the Postgres backend: an update applies only when the
//! stored version equals the guard's expected version.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{Patient, Vital, VitalKey, VitalQuery};
use crate::store::{PatientStore, VersionGuard, VitalStore};

#[derive(Default)]
struct Inner {
    patients: HashMap<String, Patient>,
    deleted_patients: Vec<Patient>,
    vitals: HashMap<VitalKey, Vital>,
    fail_range_reads: bool,
    yield_after_lookup: bool,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store poisoned")
    }

    /// Range reads fail with a storage error from now on.
    pub fn fail_range_reads(&self) {
        self.lock().fail_range_reads = true;
    }

    /// Point lookups yield to the scheduler before returning, so two joined
    /// writers both finish their lookup before either writes.
    pub fn yield_after_lookup(&self) {
        self.lock().yield_after_lookup = true;
    }

    pub fn put_vital(&self, vital: Vital) {
        self.lock().vitals.insert(vital.key(), vital);
    }

    pub fn vital(&self, key: &VitalKey) -> Option<Vital> {
        self.lock().vitals.get(key).cloned()
    }

    pub fn vital_count(&self) -> usize {
        self.lock().vitals.len()
    }

    pub fn patient(&self, patient_id: &str) -> Option<Patient> {
        self.lock().patients.get(patient_id).cloned()
    }

    pub fn deleted_patient_count(&self) -> usize {
        self.lock().deleted_patients.len()
    }
}

#[async_trait]
impl PatientStore for MemoryStore {
    async fn insert_patient(&self, patient: &Patient) -> ServiceResult<()> {
        let mut inner = self.lock();
        if inner.patients.contains_key(&patient.patient_id) {
            return Err(ServiceError::Duplicate(format!(
                "patient {}",
                patient.patient_id
            )));
        }
        inner
            .patients
            .insert(patient.patient_id.clone(), patient.clone());
        Ok(())
    }

    async fn find_patient(&self, patient_id: &str) -> ServiceResult<Patient> {
        let (found, should_yield) = {
            let inner = self.lock();
            (inner.patients.get(patient_id).cloned(), inner.yield_after_lookup)
        };
        if should_yield {
            tokio::task::yield_now().await;
        }
        found.ok_or_else(|| ServiceError::not_found(format!("patient {patient_id}")))
    }

    async fn update_patient(&self, patient: &Patient, guard: VersionGuard) -> ServiceResult<()> {
        let mut inner = self.lock();
        let rows = match inner.patients.get_mut(&patient.patient_id) {
            Some(stored) if stored.version == guard.expected() => {
                stored.name = patient.name.clone();
                stored.gender = patient.gender;
                stored.birth_date = patient.birth_date;
                stored.version = guard.target();
                stored.updated_at = patient.updated_at;
                1
            }
            _ => 0,
        };
        guard.settle(rows)?;
        Ok(())
    }

    async fn soft_delete_patient(
        &self,
        patient_id: &str,
        guard: VersionGuard,
    ) -> ServiceResult<()> {
        let mut inner = self.lock();
        let current = inner
            .patients
            .get(patient_id)
            .map(|stored| stored.version == guard.expected());
        if current != Some(true) {
            guard.settle(0)?;
        }
        if let Some(mut removed) = inner.patients.remove(patient_id) {
            removed.version = guard.target();
            removed.updated_at = Some(Utc::now());
            inner.deleted_patients.push(removed);
        }
        Ok(())
    }
}

#[async_trait]
impl VitalStore for MemoryStore {
    async fn find_vital(&self, key: &VitalKey) -> ServiceResult<Vital> {
        let (found, should_yield) = {
            let inner = self.lock();
            (inner.vitals.get(key).cloned(), inner.yield_after_lookup)
        };
        if should_yield {
            tokio::task::yield_now().await;
        }
        found.ok_or_else(|| ServiceError::not_found(key.to_string()))
    }

    async fn find_vitals(&self, query: &VitalQuery) -> ServiceResult<Vec<Vital>> {
        let inner = self.lock();
        if inner.fail_range_reads {
            return Err(ServiceError::Storage(sqlx::Error::PoolTimedOut));
        }
        let mut vitals: Vec<Vital> = inner
            .vitals
            .values()
            .filter(|vital| query.matches(vital))
            .cloned()
            .collect();
        vitals.sort_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then(a.vital_type.cmp(&b.vital_type))
        });
        Ok(vitals)
    }

    async fn insert_vital(&self, vital: &Vital) -> ServiceResult<()> {
        let mut inner = self.lock();
        let key = vital.key();
        if inner.vitals.contains_key(&key) {
            return Err(ServiceError::Duplicate(key.to_string()));
        }
        inner.vitals.insert(key, vital.clone());
        Ok(())
    }

    async fn update_vital(&self, vital: &Vital, guard: VersionGuard) -> ServiceResult<()> {
        let mut inner = self.lock();
        let rows = match inner.vitals.get_mut(&vital.key()) {
            Some(stored) if stored.version == guard.expected() => {
                stored.value = vital.value;
                stored.version = guard.target();
                stored.updated_at = vital.updated_at;
                1
            }
            _ => 0,
        };
        guard.settle(rows)?;
        Ok(())
    }
}
