//! Aggregated results over the completed files of a process.

use serde::{Deserialize, Serialize};

use docproc_core::{DomainError, DomainResult};

use crate::file::{File, FileStatus, MAX_TOP_WORDS};
use crate::process::Process;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResults {
    pub total_words: u64,
    pub total_lines: u64,
    /// Words that appear most often across the per-file top-word lists.
    pub most_frequent_words: Vec<String>,
    /// Names of the files that completed successfully.
    pub files_processed: Vec<String>,
}

impl ProcessResults {
    /// Aggregate results for a finished process.
    ///
    /// Only `COMPLETED` and `COMPLETED_WITH_FAILURES` processes have results;
    /// anything else is a conflict. Failed files contribute nothing.
    pub fn for_process(process: &Process, files: &[File]) -> DomainResult<Self> {
        if !process.status.has_results() {
            return Err(DomainError::conflict(format!(
                "process {} is not completed yet ({})",
                process.id, process.status
            )));
        }
        Ok(Self::from_files(files))
    }

    pub fn from_files(files: &[File]) -> Self {
        let completed: Vec<&File> = files
            .iter()
            .filter(|f| f.status == FileStatus::Completed)
            .collect();

        let total_words = completed.iter().map(|f| u64::from(f.word_count)).sum();
        let total_lines = completed.iter().map(|f| u64::from(f.line_count)).sum();

        // Each file votes once per word in its own top list; ties keep first-seen order.
        let mut tally: Vec<(&str, usize)> = Vec::new();
        for word in completed.iter().flat_map(|f| f.top_words.iter()) {
            let word = word.trim();
            if word.is_empty() {
                continue;
            }
            match tally.iter_mut().find(|(w, _)| *w == word) {
                Some((_, n)) => *n += 1,
                None => tally.push((word, 1)),
            }
        }
        tally.sort_by(|a, b| b.1.cmp(&a.1));

        Self {
            total_words,
            total_lines,
            most_frequent_words: tally
                .into_iter()
                .take(MAX_TOP_WORDS)
                .map(|(w, _)| w.to_string())
                .collect(),
            files_processed: completed.iter().map(|f| f.file_name.clone()).collect(),
        }
    }
}
