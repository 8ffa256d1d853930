use async_trait::async_trait;
use practice_core::model::{ProgressSnapshot, UserId};

use crate::repository::{ProgressRepository, StorageError};

use super::SqliteRepository;
use super::mapping::{map_progress_row, problems_to_json};

#[async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(&self, user: &UserId) -> Result<ProgressSnapshot, StorageError> {
        let row = sqlx::query(
            r"
            SELECT problems, easy, medium, hard, total, updated_at
            FROM user_progress
            WHERE user_id = ?1
            ",
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        match row {
            Some(row) => map_progress_row(&row),
            None => Ok(ProgressSnapshot::empty()),
        }
    }

    async fn upsert_progress(
        &self,
        user: &UserId,
        snapshot: &ProgressSnapshot,
    ) -> Result<(), StorageError> {
        let stats = snapshot.stats();
        sqlx::query(
            r"
            INSERT INTO user_progress (user_id, problems, easy, medium, hard, total, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(user_id) DO UPDATE SET
                problems = excluded.problems,
                easy = excluded.easy,
                medium = excluded.medium,
                hard = excluded.hard,
                total = excluded.total,
                updated_at = excluded.updated_at
            ",
        )
        .bind(user.as_str())
        .bind(problems_to_json(snapshot)?)
        .bind(i64::from(stats.easy()))
        .bind(i64::from(stats.medium()))
        .bind(i64::from(stats.hard()))
        .bind(i64::from(stats.total()))
        .bind(snapshot.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        tracing::debug!(user = %user, solved = snapshot.solved_count(), "progress upserted");
        Ok(())
    }

    async fn reset_progress(&self, user: &UserId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM user_progress WHERE user_id = ?1")
            .bind(user.as_str())
            .execute(&self.pool)
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;
        Ok(())
    }
}
