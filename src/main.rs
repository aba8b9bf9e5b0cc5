use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;

mod config;
mod db;
mod error;
mod import;
#[cfg(test)]
mod memory;
mod models;
mod patients;
mod report;
mod risk;
mod store;
mod vitals;

use crate::config::Settings;
use crate::db::PgStore;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    parse_timestamp, CreatePatientRequest, GetVitalsRequest, UpdatePatientRequest,
    UpsertVitalRequest,
};
use crate::patients::PatientService;
use crate::risk::RiskEngine;
use crate::vitals::VitalService;

#[derive(Parser)]
#[command(name = "vital-signs-risk")]
#[command(about = "Versioned patient vitals with threshold-based risk inference", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo patients and vitals
    Seed,
    /// Register a patient
    CreatePatient {
        #[arg(long)]
        patient_id: String,
        #[arg(long)]
        name: String,
        /// M or F
        #[arg(long)]
        gender: String,
        /// YYYY-MM-DD
        #[arg(long)]
        birth_date: String,
    },
    /// Update a patient's demographics at a known version
    UpdatePatient {
        #[arg(long)]
        patient_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        gender: String,
        #[arg(long)]
        birth_date: String,
        #[arg(long)]
        version: i32,
    },
    /// Show a patient record
    GetPatient {
        #[arg(long)]
        patient_id: String,
    },
    /// Soft-delete a patient at a known version
    DeletePatient {
        #[arg(long)]
        patient_id: String,
        #[arg(long)]
        version: i32,
    },
    /// Insert or update one vital measurement
    UpsertVital {
        #[arg(long)]
        patient_id: String,
        /// RFC 3339 timestamp
        #[arg(long, value_parser = parse_recorded_at)]
        recorded_at: DateTime<Utc>,
        /// HR, RR, SBP, DBP, SpO2 or BT
        #[arg(long)]
        vital_type: String,
        #[arg(long, allow_hyphen_values = true)]
        value: f64,
        /// 1 for a new measurement, otherwise the stored version
        #[arg(long)]
        version: i32,
    },
    /// List vitals in an inclusive time range
    GetVitals {
        #[arg(long)]
        patient_id: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        vital_type: Option<String>,
    },
    /// Upsert vitals from a CSV file
    ImportVitals {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Classify a patient's risk over the configured window
    Risk {
        #[arg(long)]
        patient_id: String,
    },
    /// Write a markdown risk report
    Report {
        #[arg(long)]
        patient_id: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn parse_recorded_at(value: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp(value).map_err(|err| err.to_string())
}

fn service_failure(err: ServiceError) -> anyhow::Error {
    anyhow::anyhow!("request failed with status {}: {}", err.status_code(), err)
}

fn emit<T: Serialize>(result: ServiceResult<T>) -> anyhow::Result<()> {
    let value = result.map_err(service_failure)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.settings.init_tracing();

    let pool = PgPoolOptions::new()
        .max_connections(cli.settings.max_connections)
        .connect(&cli.settings.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgStore::new(pool.clone());

    let patients = PatientService::new(store.clone());
    let vitals = VitalService::new(store.clone());
    let engine = RiskEngine::new(store, cli.settings.risk_window());

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::CreatePatient {
            patient_id,
            name,
            gender,
            birth_date,
        } => {
            let request = CreatePatientRequest {
                patient_id,
                name,
                gender,
                birth_date,
            };
            emit(patients.create_patient(&request).await)?;
        }
        Commands::UpdatePatient {
            patient_id,
            name,
            gender,
            birth_date,
            version,
        } => {
            let request = UpdatePatientRequest {
                name,
                gender,
                birth_date,
                version,
            };
            emit(patients.update_patient(&patient_id, &request).await)?;
        }
        Commands::GetPatient { patient_id } => {
            emit(patients.get_patient(&patient_id).await)?;
        }
        Commands::DeletePatient {
            patient_id,
            version,
        } => {
            patients
                .delete_patient(&patient_id, version)
                .await
                .map_err(service_failure)?;
            println!("Patient {patient_id} deleted.");
        }
        Commands::UpsertVital {
            patient_id,
            recorded_at,
            vital_type,
            value,
            version,
        } => {
            let request = UpsertVitalRequest {
                patient_id,
                recorded_at,
                vital_type,
                value,
                version,
            };
            emit(vitals.upsert_vital(&request).await)?;
        }
        Commands::GetVitals {
            patient_id,
            from,
            to,
            vital_type,
        } => {
            let request = GetVitalsRequest {
                patient_id,
                from,
                to,
                vital_type,
            };
            emit(vitals.get_vitals(&request).await)?;
        }
        Commands::ImportVitals { csv } => {
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let summary = import::import_vitals(&vitals, file).await?;
            println!(
                "Imported {} from {}: {} inserted, {} updated, {} conflicts, {} rejected.",
                summary.inserted + summary.updated,
                csv.display(),
                summary.inserted,
                summary.updated,
                summary.conflicts,
                summary.rejected
            );
        }
        Commands::Risk { patient_id } => {
            emit(engine.calculate_risk(&patient_id).await)?;
        }
        Commands::Report { patient_id, out } => {
            let assessment = engine
                .calculate_risk(&patient_id)
                .await
                .map_err(service_failure)?;
            let readings = vitals
                .readings(&patient_id, assessment.time_range, None)
                .await
                .map_err(service_failure)?;
            let report = report::build_report(&assessment, &readings);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
