#![forbid(unsafe_code)]

pub mod catalog;
pub mod engine;
pub mod model;
pub mod stats;
pub mod time;

pub use catalog::{CatalogError, ProblemCatalog, ProblemFilter, StatusFilter};
pub use engine::{ProgressEngine, ToggleError, ToggleIntent, ToggleOutcome};
pub use stats::{DifficultyProgress, ProgressReport, StatsProjector};
pub use time::Clock;
