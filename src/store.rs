//! Storage contracts shared by the Postgres backend and the in-memory test
//! store.
//!
//! Every mutation of an existing record goes through a [`VersionGuard`]: the
//! caller proves it has seen the stored version, the backend performs one
//! atomic `... WHERE version = expected` write that also sets the version to
//! `expected + 1`, and the number of affected rows decides the outcome.

use async_trait::async_trait;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{Patient, Vital, VitalKey, VitalQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionGuard {
    expected: i32,
}

impl VersionGuard {
    /// Application-level check: the version the caller supplied must be the
    /// version currently stored.
    pub fn check(stored: i32, supplied: i32) -> ServiceResult<Self> {
        if stored != supplied {
            return Err(ServiceError::conflict(format!(
                "version mismatch: stored {stored}, supplied {supplied}"
            )));
        }
        Ok(Self { expected: stored })
    }

    pub fn expected(&self) -> i32 {
        self.expected
    }

    pub fn target(&self) -> i32 {
        self.expected + 1
    }

    /// Interprets the affected-row count of the conditional write. Existence
    /// has already been confirmed by the caller, so zero rows is a lost race.
    pub fn settle(&self, rows_affected: u64) -> ServiceResult<i32> {
        if rows_affected == 0 {
            return Err(ServiceError::conflict(format!(
                "version conflict in db update: expected {}",
                self.expected
            )));
        }
        Ok(self.target())
    }
}

#[async_trait]
pub trait PatientStore: Send + Sync {
    async fn insert_patient(&self, patient: &Patient) -> ServiceResult<()>;

    async fn find_patient(&self, patient_id: &str) -> ServiceResult<Patient>;

    /// Writes `patient` with version `guard.target()` iff the stored version
    /// is still `guard.expected()`.
    async fn update_patient(&self, patient: &Patient, guard: VersionGuard) -> ServiceResult<()>;

    async fn soft_delete_patient(
        &self,
        patient_id: &str,
        guard: VersionGuard,
    ) -> ServiceResult<()>;
}

#[async_trait]
pub trait VitalStore: Send + Sync {
    async fn find_vital(&self, key: &VitalKey) -> ServiceResult<Vital>;

    /// Inclusive range read, ordered by `recorded_at` ascending.
    async fn find_vitals(&self, query: &VitalQuery) -> ServiceResult<Vec<Vital>>;

    async fn insert_vital(&self, vital: &Vital) -> ServiceResult<()>;

    async fn update_vital(&self, vital: &Vital, guard: VersionGuard) -> ServiceResult<()>;
}
