use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{Gender, Patient, Vital, VitalKey, VitalQuery, VitalType};
use crate::store::{PatientStore, VersionGuard, VitalStore};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let patients = vec![
        ("P00001234", "Avery Lee", "M", (1975, 3, 1)),
        ("P00005678", "Jules Moreno", "F", (1988, 11, 23)),
    ];

    for (patient_id, name, gender, (year, month, day)) in patients {
        let birth_date = NaiveDate::from_ymd_opt(year, month, day).context("invalid date")?;
        sqlx::query(
            r#"
            INSERT INTO vital_signs.patients
            (id, patient_id, name, gender, birth_date, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 1, now(), now())
            ON CONFLICT (patient_id) WHERE deleted_at IS NULL DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(patient_id)
        .bind(name)
        .bind(gender)
        .bind(birth_date)
        .execute(pool)
        .await?;
    }

    // Readings are anchored to the current hour so a fresh seed falls inside
    // the default risk window.
    let anchor = Utc::now()
        .duration_trunc(Duration::hours(1))
        .context("failed to truncate seed anchor")?;
    let vitals = vec![
        ("P00001234", 3, "HR", 128.0),
        ("P00001234", 2, "HR", 134.0),
        ("P00001234", 3, "SBP", 86.0),
        ("P00001234", 2, "SpO2", 88.0),
        ("P00005678", 4, "HR", 76.0),
        ("P00005678", 4, "SBP", 118.0),
        ("P00005678", 4, "SpO2", 98.0),
        ("P00005678", 4, "BT", 36.8),
    ];

    for (patient_id, hours_ago, vital_type, value) in vitals {
        sqlx::query(
            r#"
            INSERT INTO vital_signs.vitals
            (patient_id, recorded_at, vital_type, value, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 1, now(), now())
            ON CONFLICT (patient_id, recorded_at, vital_type) DO NOTHING
            "#,
        )
        .bind(patient_id)
        .bind(anchor - Duration::hours(hours_ago))
        .bind(vital_type)
        .bind(value)
        .execute(pool)
        .await?;
    }

    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_enum<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: std::str::FromStr<Err = crate::models::ParseEnumError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|err| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(err),
    })
}

fn patient_from_row(row: &PgRow) -> Result<Patient, sqlx::Error> {
    Ok(Patient {
        id: row.try_get("id")?,
        patient_id: row.try_get("patient_id")?,
        name: row.try_get("name")?,
        gender: decode_enum::<Gender>(row, "gender")?,
        birth_date: row.try_get("birth_date")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn vital_from_row(row: &PgRow) -> Result<Vital, sqlx::Error> {
    Ok(Vital {
        patient_id: row.try_get("patient_id")?,
        recorded_at: row.try_get("recorded_at")?,
        vital_type: decode_enum::<VitalType>(row, "vital_type")?,
        value: row.try_get("value")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn classify_insert(err: sqlx::Error, what: String) -> ServiceError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            ServiceError::Duplicate(what)
        }
        _ => ServiceError::Storage(err),
    }
}

#[async_trait]
impl PatientStore for PgStore {
    async fn insert_patient(&self, patient: &Patient) -> ServiceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO vital_signs.patients
            (id, patient_id, name, gender, birth_date, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(patient.id)
        .bind(&patient.patient_id)
        .bind(&patient.name)
        .bind(patient.gender.as_str())
        .bind(patient.birth_date)
        .bind(patient.version)
        .bind(patient.created_at)
        .bind(patient.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|err| classify_insert(err, format!("patient {}", patient.patient_id)))?;

        Ok(())
    }

    async fn find_patient(&self, patient_id: &str) -> ServiceResult<Patient> {
        let row = sqlx::query(
            r#"
            SELECT id, patient_id, name, gender, birth_date, version, created_at, updated_at
            FROM vital_signs.patients
            WHERE patient_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(patient_from_row(&row)?),
            None => Err(ServiceError::not_found(format!("patient {patient_id}"))),
        }
    }

    async fn update_patient(&self, patient: &Patient, guard: VersionGuard) -> ServiceResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE vital_signs.patients
            SET name = $1, gender = $2, birth_date = $3, version = $4, updated_at = $5
            WHERE patient_id = $6 AND version = $7 AND deleted_at IS NULL
            "#,
        )
        .bind(&patient.name)
        .bind(patient.gender.as_str())
        .bind(patient.birth_date)
        .bind(guard.target())
        .bind(patient.updated_at)
        .bind(&patient.patient_id)
        .bind(guard.expected())
        .execute(&self.pool)
        .await?;

        guard.settle(result.rows_affected())?;
        Ok(())
    }

    async fn soft_delete_patient(
        &self,
        patient_id: &str,
        guard: VersionGuard,
    ) -> ServiceResult<()> {
        let now: DateTime<Utc> = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE vital_signs.patients
            SET deleted_at = $1, updated_at = $1, version = $2
            WHERE patient_id = $3 AND version = $4 AND deleted_at IS NULL
            "#,
        )
        .bind(now)
        .bind(guard.target())
        .bind(patient_id)
        .bind(guard.expected())
        .execute(&self.pool)
        .await?;

        guard.settle(result.rows_affected())?;
        Ok(())
    }
}

#[async_trait]
impl VitalStore for PgStore {
    async fn find_vital(&self, key: &VitalKey) -> ServiceResult<Vital> {
        let row = sqlx::query(
            r#"
            SELECT patient_id, recorded_at, vital_type, value, version, created_at, updated_at
            FROM vital_signs.vitals
            WHERE patient_id = $1 AND recorded_at = $2 AND vital_type = $3
            "#,
        )
        .bind(&key.patient_id)
        .bind(key.recorded_at)
        .bind(key.vital_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(vital_from_row(&row)?),
            None => Err(ServiceError::not_found(key.to_string())),
        }
    }

    async fn find_vitals(&self, query: &VitalQuery) -> ServiceResult<Vec<Vital>> {
        let vital_types: Option<Vec<String>> = query
            .vital_types
            .as_ref()
            .map(|types| types.iter().map(|t| t.as_str().to_string()).collect());

        let rows = sqlx::query(
            r#"
            SELECT patient_id, recorded_at, vital_type, value, version, created_at, updated_at
            FROM vital_signs.vitals
            WHERE patient_id = $1 AND recorded_at >= $2 AND recorded_at <= $3
              AND ($4::text[] IS NULL OR vital_type = ANY($4))
            ORDER BY recorded_at ASC, vital_type ASC
            "#,
        )
        .bind(&query.patient_id)
        .bind(query.from)
        .bind(query.to)
        .bind(vital_types)
        .fetch_all(&self.pool)
        .await?;

        let mut vitals = Vec::with_capacity(rows.len());
        for row in rows {
            vitals.push(vital_from_row(&row)?);
        }

        Ok(vitals)
    }

    async fn insert_vital(&self, vital: &Vital) -> ServiceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO vital_signs.vitals
            (patient_id, recorded_at, vital_type, value, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&vital.patient_id)
        .bind(vital.recorded_at)
        .bind(vital.vital_type.as_str())
        .bind(vital.value)
        .bind(vital.version)
        .bind(vital.created_at)
        .bind(vital.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|err| classify_insert(err, vital.key().to_string()))?;

        Ok(())
    }

    async fn update_vital(&self, vital: &Vital, guard: VersionGuard) -> ServiceResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE vital_signs.vitals
            SET value = $1, version = $2, updated_at = $3
            WHERE patient_id = $4 AND recorded_at = $5 AND vital_type = $6
              AND version = $7
            "#,
        )
        .bind(vital.value)
        .bind(guard.target())
        .bind(vital.updated_at)
        .bind(&vital.patient_id)
        .bind(vital.recorded_at)
        .bind(vital.vital_type.as_str())
        .bind(guard.expected())
        .execute(&self.pool)
        .await?;

        guard.settle(result.rows_affected())?;
        Ok(())
    }
}
