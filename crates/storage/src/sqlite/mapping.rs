use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use practice_core::model::{ProblemId, ProgressSnapshot, ProgressStats};
use sqlx::Row;

use crate::repository::StorageError;

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn count_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

/// Encodes the solved-set for the `problems` column.
pub(crate) fn problems_to_json(snapshot: &ProgressSnapshot) -> Result<String, StorageError> {
    serde_json::to_string(snapshot.solved()).map_err(ser)
}

pub(crate) fn map_progress_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<ProgressSnapshot, StorageError> {
    let problems: String = row.try_get("problems").map_err(ser)?;
    let solved: BTreeSet<ProblemId> = serde_json::from_str(&problems).map_err(ser)?;

    let stats = ProgressStats::from_buckets(
        count_from_i64("easy", row.try_get("easy").map_err(ser)?)?,
        count_from_i64("medium", row.try_get("medium").map_err(ser)?)?,
        count_from_i64("hard", row.try_get("hard").map_err(ser)?)?,
    )
    .map_err(ser)?;

    let total = count_from_i64("total", row.try_get("total").map_err(ser)?)?;
    if total != stats.total() {
        return Err(StorageError::Serialization(format!(
            "stored total {total} does not match buckets ({})",
            stats.total()
        )));
    }

    let updated_at: Option<DateTime<Utc>> = row.try_get("updated_at").map_err(ser)?;
    Ok(ProgressSnapshot::from_parts(solved, stats, updated_at))
}
