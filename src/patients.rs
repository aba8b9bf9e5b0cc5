use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    parse_birth_date, CreatePatientRequest, Gender, Patient, UpdatePatientRequest,
};
use crate::store::{PatientStore, VersionGuard};

const MAX_PATIENT_ID_LEN: usize = 20;
const MAX_NAME_LEN: usize = 50;

pub fn validate_patient_id(patient_id: &str) -> ServiceResult<()> {
    if patient_id.trim().is_empty() {
        return Err(ServiceError::wrong_parameter("patient id is required"));
    }
    if patient_id.chars().count() > MAX_PATIENT_ID_LEN {
        return Err(ServiceError::wrong_parameter(format!(
            "patient id must be at most {MAX_PATIENT_ID_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_name(name: &str) -> ServiceResult<()> {
    if name.trim().is_empty() {
        return Err(ServiceError::wrong_parameter("name is required"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ServiceError::wrong_parameter(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

pub struct PatientService<S> {
    store: S,
}

impl<S: PatientStore> PatientService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn create_patient(&self, request: &CreatePatientRequest) -> ServiceResult<Patient> {
        validate_patient_id(&request.patient_id)?;
        validate_name(&request.name)?;
        let gender = request.gender.parse::<Gender>()?;
        let birth_date = parse_birth_date(&request.birth_date)?;

        let now = Utc::now();
        let patient = Patient {
            id: Uuid::new_v4(),
            patient_id: request.patient_id.clone(),
            name: request.name.clone(),
            gender,
            birth_date,
            version: 1,
            created_at: now,
            updated_at: Some(now),
        };

        self.store.insert_patient(&patient).await?;
        info!(patient_id = %patient.patient_id, "created patient");

        Ok(patient)
    }

    pub async fn get_patient(&self, patient_id: &str) -> ServiceResult<Patient> {
        validate_patient_id(patient_id)?;
        self.store.find_patient(patient_id).await
    }

    /// Read, compare the supplied version, then write under the guard. Input
    /// is validated before the store is touched.
    pub async fn update_patient(
        &self,
        patient_id: &str,
        request: &UpdatePatientRequest,
    ) -> ServiceResult<Patient> {
        validate_patient_id(patient_id)?;
        validate_name(&request.name)?;
        let gender = request.gender.parse::<Gender>()?;
        let birth_date = parse_birth_date(&request.birth_date)?;
        if request.version < 1 {
            return Err(ServiceError::wrong_parameter("version must be at least 1"));
        }

        let mut patient = self.store.find_patient(patient_id).await?;
        let guard = VersionGuard::check(patient.version, request.version).map_err(|err| {
            warn!(
                patient_id,
                stored = patient.version,
                supplied = request.version,
                "patient version mismatch"
            );
            err
        })?;

        patient.name = request.name.clone();
        patient.gender = gender;
        patient.birth_date = birth_date;
        patient.version = guard.target();
        patient.updated_at = Some(Utc::now());

        self.store.update_patient(&patient, guard).await?;
        info!(patient_id, version = patient.version, "updated patient");

        Ok(patient)
    }

    pub async fn delete_patient(&self, patient_id: &str, version: i32) -> ServiceResult<()> {
        validate_patient_id(patient_id)?;

        let patient = self.store.find_patient(patient_id).await?;
        let guard = VersionGuard::check(patient.version, version)?;
        self.store.soft_delete_patient(patient_id, guard).await?;
        info!(patient_id, "deleted patient");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::NaiveDate;

    fn create_request(patient_id: &str) -> CreatePatientRequest {
        CreatePatientRequest {
            patient_id: patient_id.to_string(),
            name: "Avery Lee".to_string(),
            gender: "M".to_string(),
            birth_date: "1975-03-01".to_string(),
        }
    }

    fn update_request(version: i32) -> UpdatePatientRequest {
        UpdatePatientRequest {
            name: "Avery Lee-Moreno".to_string(),
            gender: "F".to_string(),
            birth_date: "1975-03-02".to_string(),
            version,
        }
    }

    fn service() -> (PatientService<MemoryStore>, MemoryStore) {
        let store = MemoryStore::new();
        (PatientService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn created_patient_starts_at_version_one() {
        let (service, store) = service();

        let patient = service.create_patient(&create_request("P00001234")).await.unwrap();

        assert_eq!(patient.version, 1);
        assert!(patient.updated_at.is_some());
        assert_eq!(store.patient("P00001234").unwrap().id, patient.id);
    }

    #[tokio::test]
    async fn duplicate_external_id_is_rejected() {
        let (service, _) = service();
        service.create_patient(&create_request("P00001234")).await.unwrap();

        let err = service
            .create_patient(&create_request("P00001234"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Duplicate(_)));
    }

    #[tokio::test]
    async fn malformed_birth_date_and_gender_are_wrong_parameters() {
        let (service, store) = service();

        let mut bad_date = create_request("P00001234");
        bad_date.birth_date = "19750301".to_string();
        let mut bad_gender = create_request("P00001234");
        bad_gender.gender = "X".to_string();

        for request in [bad_date, bad_gender] {
            let err = service.create_patient(&request).await.unwrap_err();
            assert!(matches!(err, ServiceError::WrongParameter(_)));
        }
        assert!(store.patient("P00001234").is_none());
    }

    #[tokio::test]
    async fn update_with_current_version_moves_one_to_two() {
        let (service, store) = service();
        service.create_patient(&create_request("P00001234")).await.unwrap();

        let updated = service
            .update_patient("P00001234", &update_request(1))
            .await
            .unwrap();

        assert_eq!(updated.version, 2);
        let stored = store.patient("P00001234").unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.name, "Avery Lee-Moreno");
        assert_eq!(stored.gender, Gender::F);
        assert_eq!(stored.birth_date, NaiveDate::from_ymd_opt(1975, 3, 2).unwrap());
    }

    #[tokio::test]
    async fn update_with_future_version_conflicts_and_keeps_record() {
        let (service, store) = service();
        service.create_patient(&create_request("P00001234")).await.unwrap();

        let err = service
            .update_patient("P00001234", &update_request(2))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        let stored = store.patient("P00001234").unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.name, "Avery Lee");
    }

    #[tokio::test]
    async fn update_of_unknown_patient_is_not_found() {
        let (service, _) = service();

        let err = service
            .update_patient("P99999999", &update_request(1))
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn update_validates_before_lookup() {
        let (service, _) = service();
        let mut request = update_request(1);
        request.birth_date = "1975/03/01".to_string();

        let err = service
            .update_patient("P99999999", &request)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::WrongParameter(_)));
    }

    #[tokio::test]
    async fn racing_updates_at_the_same_version_let_one_writer_win() {
        let (service, store) = service();
        service.create_patient(&create_request("P00001234")).await.unwrap();
        store.yield_after_lookup();

        let first = update_request(1);
        let mut second = update_request(1);
        second.name = "Avery Moreno".to_string();

        let (a, b) = tokio::join!(
            service.update_patient("P00001234", &first),
            service.update_patient("P00001234", &second)
        );

        let winner_name = match (&a, &b) {
            (Ok(updated), Err(err)) if err.is_conflict() => {
                assert_eq!(updated.version, 2);
                first.name.clone()
            }
            (Err(err), Ok(updated)) if err.is_conflict() => {
                assert_eq!(updated.version, 2);
                second.name.clone()
            }
            other => panic!("expected one update and one conflict, got {other:?}"),
        };
        let stored = store.patient("P00001234").unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.name, winner_name);
    }

    #[tokio::test]
    async fn soft_delete_frees_the_external_id() {
        let (service, store) = service();
        service.create_patient(&create_request("P00001234")).await.unwrap();

        let err = service.delete_patient("P00001234", 2).await.unwrap_err();
        assert!(err.is_conflict());

        service.delete_patient("P00001234", 1).await.unwrap();
        assert!(service.get_patient("P00001234").await.unwrap_err().is_not_found());
        assert_eq!(store.deleted_patient_count(), 1);

        let recreated = service.create_patient(&create_request("P00001234")).await.unwrap();
        assert_eq!(recreated.version, 1);
    }
}
