use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::model::{Difficulty, ProblemId, ProblemMeta, ProgressSnapshot};

const BUILTIN_PROBLEMS: &str = include_str!("../data/problems.json");

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("duplicate problem id: {0}")]
    DuplicateId(ProblemId),

    #[error("invalid catalog data: {0}")]
    Parse(String),
}

//
// ─── CATALOG ───────────────────────────────────────────────────────────────────
//

/// Read-only list of practice problems, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct ProblemCatalog {
    problems: Vec<ProblemMeta>,
    index: HashMap<ProblemId, usize>,
}

impl ProblemCatalog {
    /// Builds a catalog, preserving the given order.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::DuplicateId` if two entries share an id.
    pub fn new(problems: Vec<ProblemMeta>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(problems.len());
        for (pos, problem) in problems.iter().enumerate() {
            if index.insert(problem.id().clone(), pos).is_some() {
                return Err(CatalogError::DuplicateId(problem.id().clone()));
            }
        }
        Ok(Self { problems, index })
    }

    /// Parses a JSON array of problems.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Parse` for malformed JSON or entries, and
    /// `CatalogError::DuplicateId` for repeated ids.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let problems: Vec<ProblemMeta> =
            serde_json::from_str(json).map_err(|err| CatalogError::Parse(err.to_string()))?;
        Self::new(problems)
    }

    /// The dataset bundled with this crate.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the bundled data is invalid.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json(BUILTIN_PROBLEMS)
    }

    #[must_use]
    pub fn list_problems(&self) -> &[ProblemMeta] {
        &self.problems
    }

    #[must_use]
    pub fn get(&self, id: &ProblemId) -> Option<&ProblemMeta> {
        self.index.get(id).map(|&pos| &self.problems[pos])
    }

    #[must_use]
    pub fn contains(&self, id: &ProblemId) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.problems.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    #[must_use]
    pub fn count_by_difficulty(&self, difficulty: Difficulty) -> usize {
        self.problems
            .iter()
            .filter(|p| p.difficulty() == difficulty)
            .count()
    }

    /// Distinct tags across the catalog, sorted.
    #[must_use]
    pub fn tags(&self) -> BTreeSet<&str> {
        self.problems
            .iter()
            .flat_map(|p| p.tags().iter().map(String::as_str))
            .collect()
    }

    /// Problems matching every criterion of `filter`, in catalog order.
    ///
    /// `progress` is only consulted when the filter selects by status.
    #[must_use]
    pub fn filter<'a>(
        &'a self,
        filter: &ProblemFilter,
        progress: Option<&ProgressSnapshot>,
    ) -> Vec<&'a ProblemMeta> {
        self.problems
            .iter()
            .filter(|p| filter.matches(p, progress))
            .collect()
    }
}

//
// ─── FILTER ────────────────────────────────────────────────────────────────────
//

/// Solved-state selector for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Solved,
    Unsolved,
}

/// Listing criteria. Empty criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProblemFilter {
    pub difficulty: Option<Difficulty>,
    pub tag: Option<String>,
    pub query: Option<String>,
    pub status: StatusFilter,
}

impl ProblemFilter {
    #[must_use]
    pub fn matches(&self, problem: &ProblemMeta, progress: Option<&ProgressSnapshot>) -> bool {
        if self.difficulty.is_some_and(|d| d != problem.difficulty()) {
            return false;
        }
        if let Some(tag) = self.tag.as_deref() {
            if !problem.has_tag(tag) {
                return false;
            }
        }
        if let Some(query) = self.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let needle = query.to_lowercase();
            let in_title = problem.title().to_lowercase().contains(&needle);
            let in_tags = problem
                .tags()
                .iter()
                .any(|t| t.to_lowercase().contains(&needle));
            if !in_title && !in_tags {
                return false;
            }
        }
        let solved = progress.is_some_and(|s| s.is_solved(problem.id()));
        match self.status {
            StatusFilter::All => true,
            StatusFilter::Solved => solved,
            StatusFilter::Unsolved => !solved,
        }
    }
}
