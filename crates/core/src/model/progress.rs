use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::ProblemId;
use crate::model::problem::Difficulty;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// A persisted or submitted snapshot that violates the schema.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error("stats total {total} does not equal easy + medium + hard ({sum})")]
    InconsistentTotal { total: u32, sum: u32 },

    #[error("stats overflowed")]
    Overflow,
}

//
// ─── STATS ─────────────────────────────────────────────────────────────────────
//

/// Solved counts per difficulty bucket.
///
/// `total` is never stored independently: every constructor derives it from
/// the three buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "StatsWire")]
pub struct ProgressStats {
    easy: u32,
    medium: u32,
    hard: u32,
    total: u32,
}

impl ProgressStats {
    /// Builds stats from bucket counts.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError::Overflow` if the sum does not fit in `u32`.
    pub fn from_buckets(easy: u32, medium: u32, hard: u32) -> Result<Self, SnapshotError> {
        let total = easy
            .checked_add(medium)
            .and_then(|sum| sum.checked_add(hard))
            .ok_or(SnapshotError::Overflow)?;
        Ok(Self {
            easy,
            medium,
            hard,
            total,
        })
    }

    #[must_use]
    pub fn easy(&self) -> u32 {
        self.easy
    }

    #[must_use]
    pub fn medium(&self) -> u32 {
        self.medium
    }

    #[must_use]
    pub fn hard(&self) -> u32 {
        self.hard
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    #[must_use]
    pub fn bucket(&self, difficulty: Difficulty) -> u32 {
        match difficulty {
            Difficulty::Easy => self.easy,
            Difficulty::Medium => self.medium,
            Difficulty::Hard => self.hard,
        }
    }

    /// Returns a copy with one bucket moved by one step, floored at zero.
    #[must_use]
    pub(crate) fn stepped(self, difficulty: Difficulty, solved: bool) -> Self {
        let mut next = self;
        let bucket = match difficulty {
            Difficulty::Easy => &mut next.easy,
            Difficulty::Medium => &mut next.medium,
            Difficulty::Hard => &mut next.hard,
        };
        *bucket = if solved {
            bucket.saturating_add(1)
        } else {
            bucket.saturating_sub(1)
        };
        next.total = next
            .easy
            .saturating_add(next.medium)
            .saturating_add(next.hard);
        next
    }

    /// True when `total` equals the bucket sum.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        u64::from(self.total)
            == u64::from(self.easy) + u64::from(self.medium) + u64::from(self.hard)
    }
}

/// Incoming stats shape. `total` is optional in older payloads.
#[derive(Deserialize)]
struct StatsWire {
    #[serde(default)]
    easy: u32,
    #[serde(default)]
    medium: u32,
    #[serde(default)]
    hard: u32,
    #[serde(default)]
    total: Option<u32>,
}

impl TryFrom<StatsWire> for ProgressStats {
    type Error = SnapshotError;

    fn try_from(wire: StatsWire) -> Result<Self, Self::Error> {
        let stats = ProgressStats::from_buckets(wire.easy, wire.medium, wire.hard)?;
        match wire.total {
            Some(total) if total != stats.total => Err(SnapshotError::InconsistentTotal {
                total,
                sum: stats.total,
            }),
            _ => Ok(stats),
        }
    }
}

//
// ─── SNAPSHOT ──────────────────────────────────────────────────────────────────
//

/// Solved-set and aggregate stats for one user at one point in time.
///
/// Only solved ids are kept; `false` entries in submitted payloads are
/// dropped on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "SnapshotWire", into = "SnapshotWire")]
pub struct ProgressSnapshot {
    solved: BTreeSet<ProblemId>,
    stats: ProgressStats,
    updated_at: Option<DateTime<Utc>>,
}

impl ProgressSnapshot {
    /// The canonical empty snapshot.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Assembles a snapshot from already-validated parts.
    #[must_use]
    pub fn from_parts(
        solved: BTreeSet<ProblemId>,
        stats: ProgressStats,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            solved,
            stats,
            updated_at,
        }
    }

    #[must_use]
    pub fn is_solved(&self, id: &ProblemId) -> bool {
        self.solved.contains(id)
    }

    #[must_use]
    pub fn solved(&self) -> &BTreeSet<ProblemId> {
        &self.solved
    }

    #[must_use]
    pub fn stats(&self) -> ProgressStats {
        self.stats
    }

    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    #[must_use]
    pub fn solved_count(&self) -> usize {
        self.solved.len()
    }

    /// True when nothing is solved and all counters are zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.solved.is_empty() && self.stats == ProgressStats::default()
    }

    pub(crate) fn set_solved(&mut self, id: &ProblemId, solved: bool) {
        if solved {
            self.solved.insert(id.clone());
        } else {
            self.solved.remove(id);
        }
    }

    pub(crate) fn set_stats(&mut self, stats: ProgressStats) {
        self.stats = stats;
    }

    pub(crate) fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotWire {
    #[serde(default)]
    problems: BTreeMap<ProblemId, bool>,
    #[serde(default)]
    stats: ProgressStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<SnapshotWire> for ProgressSnapshot {
    type Error = SnapshotError;

    fn try_from(wire: SnapshotWire) -> Result<Self, Self::Error> {
        let solved = wire
            .problems
            .into_iter()
            .filter_map(|(id, solved)| solved.then_some(id))
            .collect();
        Ok(Self {
            solved,
            stats: wire.stats,
            updated_at: wire.updated_at,
        })
    }
}

impl From<ProgressSnapshot> for SnapshotWire {
    fn from(snapshot: ProgressSnapshot) -> Self {
        Self {
            problems: snapshot.solved.into_iter().map(|id| (id, true)).collect(),
            stats: snapshot.stats,
            updated_at: snapshot.updated_at,
        }
    }
}
