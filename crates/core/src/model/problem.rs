use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{ParseIdError, ProblemId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProblemError {
    #[error("unknown difficulty: {0}")]
    UnknownDifficulty(String),

    #[error("problem title cannot be empty")]
    EmptyTitle,

    #[error(transparent)]
    InvalidId(#[from] ParseIdError),
}

//
// ─── DIFFICULTY ────────────────────────────────────────────────────────────────
//

/// Difficulty bucket of a problem.
///
/// Parsing is case-insensitive so both the catalog form (`"Easy"`) and the
/// lowercase stats key (`"easy"`) are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    /// Display label as used by the catalog.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }

    /// Lowercase key, matching the stats field names.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Difficulty {
    type Err = ProblemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(ProblemError::UnknownDifficulty(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Difficulty {
    type Error = ProblemError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Difficulty> for String {
    fn from(value: Difficulty) -> Self {
        value.label().to_owned()
    }
}

//
// ─── PROBLEM META ──────────────────────────────────────────────────────────────
//

/// Immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemMeta {
    id: ProblemId,
    title: String,
    difficulty: Difficulty,
    #[serde(default)]
    tags: BTreeSet<String>,
}

impl ProblemMeta {
    /// Creates a catalog entry.
    ///
    /// # Errors
    ///
    /// Returns `ProblemError::EmptyTitle` if the title is blank.
    pub fn new<I, S>(
        id: ProblemId,
        title: impl Into<String>,
        difficulty: Difficulty,
        tags: I,
    ) -> Result<Self, ProblemError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(ProblemError::EmptyTitle);
        }
        Ok(Self {
            id,
            title,
            difficulty,
            tags: tags.into_iter().map(Into::into).collect(),
        })
    }

    #[must_use]
    pub fn id(&self) -> &ProblemId {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    #[must_use]
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}
