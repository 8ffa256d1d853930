mod ids;
mod problem;
mod progress;

pub use ids::{ParseIdError, ProblemId, UserId};
pub use problem::{Difficulty, ProblemError, ProblemMeta};
pub use progress::{ProgressSnapshot, ProgressStats, SnapshotError};
