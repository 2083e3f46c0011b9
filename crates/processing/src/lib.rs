//! Processing domain module.
//!
//! Business rules for processes and their files, implemented as deterministic
//! domain logic (no IO, no HTTP, no storage): status transitions, the
//! progress/ETA estimator and results aggregation.

pub mod file;
pub mod process;
pub mod progress;
pub mod results;

pub use file::{File, FileMetrics, FileStatus, MAX_TOP_WORDS};
pub use process::{FileCounts, Process, ProcessStatus, STOPPED_BY_REQUEST, StatusChange};
pub use progress::{Progress, estimate};
pub use results::ProcessResults;
