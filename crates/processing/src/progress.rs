//! Progress and completion-time estimation for a process.
//!
//! Read-only projection over the persisted process and file records (not the
//! saga state). The estimate is a simple linear extrapolation:
//!
//! ```text
//! avg_per_file = (last_finished_file.updated_at - process.started_at) / processed
//! eta          = now + avg_per_file * remaining
//! ```
//!
//! No estimate is produced when it would be meaningless: before two files have
//! finished, without a start time, outside `RUNNING`/`COMPLETED`, or when the
//! projection lands more than [`MAX_ETA_HORIZON_HOURS`] hours out.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::file::File;
use crate::process::{Process, ProcessStatus};

pub const MAX_ETA_HORIZON_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total_files: u32,
    pub processed_files: u32,
    pub percentage: u32,
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// Estimate progress for `process` given its `files`, as seen at `now`.
pub fn estimate(process: &Process, files: &[File], now: DateTime<Utc>) -> Progress {
    let mut finished: Vec<&File> = files.iter().filter(|f| f.status.is_terminal()).collect();
    let processed = finished.len() as u32;

    let percentage = if process.total_files > 0 {
        (u64::from(processed) * 100 / u64::from(process.total_files)) as u32
    } else {
        0
    };

    finished.sort_by_key(|f| f.updated_at);

    let mut eta = None;
    if matches!(process.status, ProcessStatus::Running | ProcessStatus::Completed) && processed > 1 {
        if let (Some(started_at), Some(last)) = (process.started_at, finished.last()) {
            let elapsed_ms = (last.updated_at - started_at).num_milliseconds() as f64;
            let avg_ms_per_file = elapsed_ms / f64::from(processed);
            if avg_ms_per_file > 0.0 {
                let remaining = process.total_files.saturating_sub(processed);
                let remaining_ms = (avg_ms_per_file * f64::from(remaining)) as i64;
                eta = Some(now + TimeDelta::milliseconds(remaining_ms));
            }
        }
    }

    if let Some(at) = eta {
        if at > now + TimeDelta::hours(MAX_ETA_HORIZON_HOURS) {
            eta = None;
        }
    }

    if process.status == ProcessStatus::Completed {
        if let Some(completed_at) = process.completed_at {
            eta = Some(completed_at);
        }
    }

    Progress {
        total_files: process.total_files,
        processed_files: processed,
        percentage,
        estimated_completion: eta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileMetrics;
    use docproc_core::ProcessId;
    use proptest::prelude::*;

    fn base_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn running(total: u32, started_at: DateTime<Utc>) -> Process {
        let mut p = Process::new(ProcessId::new(), total, started_at);
        p.transition_to(ProcessStatus::Running, None, started_at).unwrap();
        p
    }

    fn finished_file(process: &Process, at: DateTime<Utc>) -> File {
        let mut f = File::pending(process.id, "doc.txt", process.created_at);
        f.complete(FileMetrics::default(), at).unwrap();
        f
    }

    fn pending_file(process: &Process) -> File {
        File::pending(process.id, "doc.txt", process.created_at)
    }

    #[test]
    fn percentage_is_floored() {
        let t0 = base_time();
        let p = running(3, t0);
        let files = vec![finished_file(&p, t0 + TimeDelta::seconds(1)), pending_file(&p), pending_file(&p)];
        let progress = estimate(&p, &files, t0 + TimeDelta::seconds(2));
        assert_eq!(progress.processed_files, 1);
        assert_eq!(progress.percentage, 33);
    }

    #[test]
    fn zero_total_reports_zero_percent() {
        let p = running(0, base_time());
        let progress = estimate(&p, &[], base_time());
        assert_eq!(progress.percentage, 0);
        assert_eq!(progress.estimated_completion, None);
    }

    #[test]
    fn extrapolates_from_average_file_time() {
        let t0 = base_time();
        let p = running(4, t0);
        let files = vec![
            finished_file(&p, t0 + TimeDelta::seconds(10)),
            finished_file(&p, t0 + TimeDelta::seconds(20)),
            pending_file(&p),
            pending_file(&p),
        ];
        let now = t0 + TimeDelta::seconds(25);
        let progress = estimate(&p, &files, now);
        // 20s over 2 files = 10s/file, 2 remaining.
        assert_eq!(progress.estimated_completion, Some(now + TimeDelta::seconds(20)));
        assert_eq!(progress.percentage, 50);
    }

    #[test]
    fn single_processed_file_gives_no_estimate() {
        let t0 = base_time();
        let p = running(3, t0);
        let files = vec![finished_file(&p, t0 + TimeDelta::seconds(5)), pending_file(&p), pending_file(&p)];
        assert_eq!(estimate(&p, &files, t0 + TimeDelta::seconds(6)).estimated_completion, None);
    }

    #[test]
    fn missing_start_time_gives_no_estimate() {
        let t0 = base_time();
        let mut p = running(3, t0);
        p.started_at = None;
        let files = vec![
            finished_file(&p, t0 + TimeDelta::seconds(5)),
            finished_file(&p, t0 + TimeDelta::seconds(6)),
            pending_file(&p),
        ];
        assert_eq!(estimate(&p, &files, t0 + TimeDelta::seconds(7)).estimated_completion, None);
    }

    #[test]
    fn estimate_beyond_a_day_is_suppressed() {
        let t0 = base_time();
        let p = running(1000, t0);
        let mut files = vec![
            finished_file(&p, t0 + TimeDelta::hours(1)),
            finished_file(&p, t0 + TimeDelta::hours(2)),
        ];
        files.extend((0..998).map(|_| pending_file(&p)));
        assert_eq!(estimate(&p, &files, t0 + TimeDelta::hours(2)).estimated_completion, None);
    }

    #[test]
    fn stopped_process_gives_no_estimate() {
        let t0 = base_time();
        let mut p = running(3, t0);
        p.stop(t0 + TimeDelta::seconds(30)).unwrap();
        let files = vec![
            finished_file(&p, t0 + TimeDelta::seconds(5)),
            finished_file(&p, t0 + TimeDelta::seconds(6)),
            pending_file(&p),
        ];
        assert_eq!(estimate(&p, &files, t0 + TimeDelta::seconds(40)).estimated_completion, None);
    }

    #[test]
    fn completed_process_reports_completion_time() {
        let t0 = base_time();
        let mut p = running(1, t0);
        let done = t0 + TimeDelta::seconds(3);
        let files = vec![finished_file(&p, done)];
        p.transition_to(ProcessStatus::Completed, None, done).unwrap();

        let progress = estimate(&p, &files, t0 + TimeDelta::hours(3));
        assert_eq!(progress.estimated_completion, Some(done));
        assert_eq!(progress.percentage, 100);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: percentage never exceeds 100 and an estimate, if any, is within the horizon.
        #[test]
        fn estimate_stays_in_bounds(
            total in 1u32..50,
            finished_secs in proptest::collection::vec(1i64..100_000, 0..50),
        ) {
            let t0 = base_time();
            let p = running(total, t0);
            let files: Vec<File> = finished_secs
                .iter()
                .take(total as usize)
                .map(|s| finished_file(&p, t0 + TimeDelta::seconds(*s)))
                .collect();
            let now = t0 + TimeDelta::seconds(100_000);

            let progress = estimate(&p, &files, now);
            prop_assert!(progress.percentage <= 100);
            prop_assert_eq!(progress.processed_files as usize, files.len());
            if let Some(eta) = progress.estimated_completion {
                prop_assert!(eta >= now);
                prop_assert!(eta <= now + TimeDelta::hours(MAX_ETA_HORIZON_HOURS));
            }
        }
    }
}
