use std::io::Read;

use serde::Serialize;
use tracing::warn;

use crate::error::ServiceError;
use crate::models::UpsertVitalRequest;
use crate::store::VitalStore;
use crate::vitals::{UpsertOutcome, VitalService};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
    pub conflicts: usize,
    pub rejected: usize,
}

/// Feeds each CSV row (`patient_id,recorded_at,vital_type,value,version`)
/// through the upsert path. Conflicts and bad rows are tallied and skipped; a
/// storage failure stops the import.
pub async fn import_vitals<S, R>(
    service: &VitalService<S>,
    reader: R,
) -> anyhow::Result<ImportSummary>
where
    S: VitalStore,
    R: Read,
{
    let mut reader = csv::Reader::from_reader(reader);
    let mut summary = ImportSummary::default();

    for (index, result) in reader.deserialize::<UpsertVitalRequest>().enumerate() {
        let line = index + 2;
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                warn!(line, error = %err, "skipping unreadable vital row");
                summary.rejected += 1;
                continue;
            }
        };

        match service.upsert_vital(&row).await {
            Ok(UpsertOutcome::Inserted { .. }) => summary.inserted += 1,
            Ok(UpsertOutcome::Updated { .. }) => summary.updated += 1,
            Err(ServiceError::Conflict(detail)) => {
                warn!(line, %detail, "vital row conflicts with stored version");
                summary.conflicts += 1;
            }
            Err(ServiceError::WrongParameter(detail)) => {
                warn!(line, %detail, "rejecting vital row");
                summary.rejected += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(summary)
}
