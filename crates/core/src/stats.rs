//! Display aggregates derived from a snapshot and the catalog.

use serde::Serialize;

use crate::catalog::ProblemCatalog;
use crate::model::{Difficulty, ProgressSnapshot};

/// Completion of one difficulty bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyProgress {
    pub difficulty: Difficulty,
    pub solved: u32,
    pub available: usize,
    pub percent: f64,
}

/// Overall completion plus one entry per difficulty, easiest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub solved: u32,
    pub available: usize,
    pub percent: f64,
    pub by_difficulty: Vec<DifficultyProgress>,
}

impl ProgressReport {
    #[must_use]
    pub fn for_difficulty(&self, difficulty: Difficulty) -> Option<&DifficultyProgress> {
        self.by_difficulty.iter().find(|d| d.difficulty == difficulty)
    }
}

/// Read-side projection; holds no state.
pub struct StatsProjector;

impl StatsProjector {
    #[must_use]
    pub fn project(snapshot: &ProgressSnapshot, catalog: &ProblemCatalog) -> ProgressReport {
        let stats = snapshot.stats();
        let by_difficulty = Difficulty::ALL
            .into_iter()
            .map(|difficulty| {
                let solved = stats.bucket(difficulty);
                let available = catalog.count_by_difficulty(difficulty);
                DifficultyProgress {
                    difficulty,
                    solved,
                    available,
                    percent: percent(solved, available),
                }
            })
            .collect();

        ProgressReport {
            solved: stats.total(),
            available: catalog.len(),
            percent: percent(stats.total(), catalog.len()),
            by_difficulty,
        }
    }
}

/// `part / whole * 100`, clamped to `[0, 100]`; an empty whole yields 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percent(part: u32, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (f64::from(part) / whole as f64 * 100.0).clamp(0.0, 100.0)
}
