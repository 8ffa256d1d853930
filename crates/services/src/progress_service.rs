use std::sync::Arc;

use practice_core::model::{ProgressSnapshot, UserId};
use practice_core::{
    Clock, ProblemCatalog, ProgressEngine, ProgressReport, StatsProjector, ToggleIntent,
};
use storage::repository::ProgressRepository;
use tokio::sync::Mutex;

use crate::error::ProgressServiceError;

/// Server-authoritative progress operations.
///
/// Every mutation runs through the same `ProgressEngine` the client uses, so
/// both sides derive identical stats.
pub struct ProgressService {
    clock: Clock,
    engine: ProgressEngine,
    progress: Arc<dyn ProgressRepository>,
    // Serializes read-modify-write cycles inside this process.
    writes: Mutex<()>,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        clock: Clock,
        catalog: Arc<ProblemCatalog>,
        progress: Arc<dyn ProgressRepository>,
    ) -> Self {
        Self {
            clock,
            engine: ProgressEngine::new(catalog),
            progress,
            writes: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &ProblemCatalog {
        self.engine.catalog()
    }

    /// Fetch the stored snapshot (empty if the user has none).
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if the repository fails.
    pub async fn get(&self, user: &UserId) -> Result<ProgressSnapshot, ProgressServiceError> {
        Ok(self.progress.get_progress(user).await?)
    }

    /// Apply one toggle and persist the result.
    ///
    /// No-op toggles are not written.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Toggle` for unknown problems or
    /// mismatched difficulty, `ProgressServiceError::Storage` if the
    /// repository fails.
    pub async fn update(
        &self,
        user: &UserId,
        intent: &ToggleIntent,
    ) -> Result<ProgressSnapshot, ProgressServiceError> {
        let _guard = self.writes.lock().await;
        let current = self.progress.get_progress(user).await?;
        let outcome = self
            .engine
            .toggle(&current, intent, self.clock.now())
            .inspect_err(|err| tracing::warn!(user = %user, %err, "toggle rejected"))?;

        if outcome.changed {
            self.progress.upsert_progress(user, &outcome.snapshot).await?;
            tracing::info!(
                user = %user,
                problem = %intent.problem_id,
                solved = intent.solved,
                total = outcome.snapshot.stats().total(),
                "progress updated"
            );
        }
        Ok(outcome.snapshot)
    }

    /// Replace the whole snapshot.
    ///
    /// Submitted stats are not trusted: they are re-derived from the
    /// solved-set before storing.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Toggle` if the snapshot names unknown
    /// problems, `ProgressServiceError::Storage` if the repository fails.
    pub async fn replace(
        &self,
        user: &UserId,
        submitted: &ProgressSnapshot,
    ) -> Result<ProgressSnapshot, ProgressServiceError> {
        let reconciled = self
            .engine
            .reconcile(submitted)
            .inspect_err(|err| tracing::warn!(user = %user, %err, "snapshot rejected"))?;
        if reconciled.stats() != submitted.stats() {
            tracing::warn!(user = %user, "submitted stats disagreed with solved set; re-derived");
        }

        let stored = if reconciled.is_empty() {
            reconciled
        } else {
            ProgressSnapshot::from_parts(
                reconciled.solved().clone(),
                reconciled.stats(),
                Some(self.clock.now()),
            )
        };

        let _guard = self.writes.lock().await;
        self.progress.upsert_progress(user, &stored).await?;
        Ok(stored)
    }

    /// Restore the empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if the repository fails.
    pub async fn reset(&self, user: &UserId) -> Result<ProgressSnapshot, ProgressServiceError> {
        let _guard = self.writes.lock().await;
        self.progress.reset_progress(user).await?;
        tracing::info!(user = %user, "progress reset");
        Ok(self.engine.reset())
    }

    /// Display aggregates for the user's current snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if the repository fails.
    pub async fn report(&self, user: &UserId) -> Result<ProgressReport, ProgressServiceError> {
        let snapshot = self.get(user).await?;
        Ok(StatsProjector::project(&snapshot, self.engine.catalog()))
    }
}
