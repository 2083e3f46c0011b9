use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use docproc_core::ProcessId;

/// A message that could not be handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetter {
    pub consumer: &'static str,
    pub message_type: &'static str,
    pub process_id: ProcessId,
    pub error: String,
    /// Delivery attempts made, including the first.
    pub deliveries: u32,
    pub failed_at: DateTime<Utc>,
}

pub trait DeadLetterSink: Send + Sync {
    fn record(&self, letter: DeadLetter);
}

/// Keeps dead letters in memory for inspection.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetters {
    inner: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<DeadLetter> {
        self.inner.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn for_process(&self, process_id: ProcessId) -> Vec<DeadLetter> {
        self.all()
            .into_iter()
            .filter(|l| l.process_id == process_id)
            .collect()
    }
}

impl DeadLetterSink for InMemoryDeadLetters {
    fn record(&self, letter: DeadLetter) {
        if let Ok(mut v) = self.inner.lock() {
            v.push(letter);
        }
    }
}
