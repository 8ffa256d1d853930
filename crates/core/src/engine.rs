use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::ProblemCatalog;
use crate::model::{Difficulty, ProblemId, ProgressSnapshot, ProgressStats, SnapshotError};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Rejections raised before any state is touched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ToggleError {
    #[error("unknown problem: {0}")]
    UnknownProblem(ProblemId),

    #[error("difficulty mismatch for {id}: catalog says {expected}, caller sent {actual}")]
    DifficultyMismatch {
        id: ProblemId,
        expected: Difficulty,
        actual: Difficulty,
    },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

//
// ─── INTENT ────────────────────────────────────────────────────────────────────
//

/// "Set problem P's solved state to S".
///
/// Field names follow the fine-grained update payload
/// (`{ problemId, isSolved, difficulty }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleIntent {
    pub problem_id: ProblemId,
    #[serde(rename = "isSolved")]
    pub solved: bool,
    pub difficulty: Difficulty,
}

impl ToggleIntent {
    #[must_use]
    pub fn new(problem_id: ProblemId, difficulty: Difficulty, solved: bool) -> Self {
        Self {
            problem_id,
            solved,
            difficulty,
        }
    }
}

/// Result of applying an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub snapshot: ProgressSnapshot,
    /// False when the intent matched the current state.
    pub changed: bool,
}

//
// ─── ENGINE ────────────────────────────────────────────────────────────────────
//

/// Turns toggle intents into new, invariant-satisfying snapshots.
///
/// The engine holds only the read-only catalog; every operation is a pure
/// function of its arguments.
#[derive(Debug, Clone)]
pub struct ProgressEngine {
    catalog: Arc<ProblemCatalog>,
}

impl ProgressEngine {
    #[must_use]
    pub fn new(catalog: Arc<ProblemCatalog>) -> Self {
        Self { catalog }
    }

    #[must_use]
    pub fn catalog(&self) -> &ProblemCatalog {
        &self.catalog
    }

    /// Applies one intent to `snapshot`.
    ///
    /// A no-op intent returns the snapshot unchanged, including its
    /// timestamp. Otherwise the solved-set and the matching bucket move by
    /// one step and `total` is recomputed from the buckets.
    ///
    /// # Errors
    ///
    /// Returns `ToggleError::UnknownProblem` if the id is not in the catalog and
    /// `ToggleError::DifficultyMismatch` if the caller's difficulty disagrees
    /// with the catalog.
    pub fn toggle(
        &self,
        snapshot: &ProgressSnapshot,
        intent: &ToggleIntent,
        now: DateTime<Utc>,
    ) -> Result<ToggleOutcome, ToggleError> {
        let difficulty = self.verify(&intent.problem_id, intent.difficulty)?;

        if snapshot.is_solved(&intent.problem_id) == intent.solved {
            return Ok(ToggleOutcome {
                snapshot: snapshot.clone(),
                changed: false,
            });
        }

        let mut next = snapshot.clone();
        next.set_solved(&intent.problem_id, intent.solved);
        next.set_stats(snapshot.stats().stepped(difficulty, intent.solved));
        next.touch(now);

        Ok(ToggleOutcome {
            snapshot: next,
            changed: true,
        })
    }

    /// Re-derives every counter from the solved-set.
    ///
    /// Used for whole-snapshot writes and untrusted cached records, where the
    /// submitted stats cannot be relied on. The timestamp is kept as given.
    ///
    /// # Errors
    ///
    /// Returns `ToggleError::UnknownProblem` for the first solved id that is
    /// absent from the catalog.
    pub fn reconcile(&self, snapshot: &ProgressSnapshot) -> Result<ProgressSnapshot, ToggleError> {
        let (mut easy, mut medium, mut hard) = (0_u32, 0_u32, 0_u32);
        for id in snapshot.solved() {
            let meta = self
                .catalog
                .get(id)
                .ok_or_else(|| ToggleError::UnknownProblem(id.clone()))?;
            let bucket = match meta.difficulty() {
                Difficulty::Easy => &mut easy,
                Difficulty::Medium => &mut medium,
                Difficulty::Hard => &mut hard,
            };
            *bucket = bucket.saturating_add(1);
        }
        let stats = ProgressStats::from_buckets(easy, medium, hard)?;
        Ok(ProgressSnapshot::from_parts(
            snapshot.solved().clone(),
            stats,
            snapshot.updated_at(),
        ))
    }

    /// True when the snapshot's stats already match its solved-set.
    #[must_use]
    pub fn is_reconciled(&self, snapshot: &ProgressSnapshot) -> bool {
        self.reconcile(snapshot)
            .is_ok_and(|derived| derived.stats() == snapshot.stats())
    }

    /// The empty snapshot every reset returns to.
    #[must_use]
    pub fn reset(&self) -> ProgressSnapshot {
        ProgressSnapshot::empty()
    }

    /// Solved ids in `snapshot` that are also in the catalog.
    #[must_use]
    pub fn known_solved(&self, snapshot: &ProgressSnapshot) -> BTreeSet<ProblemId> {
        snapshot
            .solved()
            .iter()
            .filter(|id| self.catalog.contains(id))
            .cloned()
            .collect()
    }

    fn verify(&self, id: &ProblemId, difficulty: Difficulty) -> Result<Difficulty, ToggleError> {
        let meta = self
            .catalog
            .get(id)
            .ok_or_else(|| ToggleError::UnknownProblem(id.clone()))?;
        if meta.difficulty() != difficulty {
            return Err(ToggleError::DifficultyMismatch {
                id: id.clone(),
                expected: meta.difficulty(),
                actual: difficulty,
            });
        }
        Ok(meta.difficulty())
    }
}
