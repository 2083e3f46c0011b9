//! Saga infrastructure: state persistence, transition rules and the orchestrator.

pub mod in_memory;
pub mod janitor;
pub mod orchestrator;
pub mod postgres;
pub mod process_saga;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use docproc_core::ProcessId;
use docproc_events::SagaState;

pub use in_memory::InMemorySagaStore;
pub use janitor::SagaJanitor;
pub use orchestrator::{SagaError, SagaOrchestrator, SagaOutcome};
pub use postgres::PostgresSagaStore;
pub use process_saga::{Decision, IgnoreReason, Rejection, Step};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SagaStoreError {
    /// An instance with this correlation id already exists.
    #[error("saga {0} already exists")]
    AlreadyExists(ProcessId),

    #[error("saga {0} not found")]
    NotFound(ProcessId),

    /// Connectivity or other backend failure.
    #[error("saga store backend error: {0}")]
    Backend(String),

    #[error("corrupt saga record: {0}")]
    Corrupt(String),
}

/// Keyed, mutable saga state, addressed by correlation id.
///
/// Callers serialize mutations per key; implementations only need to make each
/// individual call atomic.
#[async_trait::async_trait]
pub trait SagaStore: Send + Sync {
    async fn load(&self, correlation_id: ProcessId) -> Result<Option<SagaState>, SagaStoreError>;

    /// Create a new instance. `AlreadyExists` if the key is taken.
    async fn insert(&self, state: &SagaState) -> Result<(), SagaStoreError>;

    /// Overwrite an existing instance. `NotFound` if it was never inserted.
    async fn save(&self, state: &SagaState) -> Result<(), SagaStoreError>;

    async fn remove(&self, correlation_id: ProcessId) -> Result<bool, SagaStoreError>;

    /// Remove finalized instances last updated before `before`.
    async fn purge_finalized(&self, before: DateTime<Utc>) -> Result<usize, SagaStoreError>;
}

#[async_trait::async_trait]
impl<S> SagaStore for Arc<S>
where
    S: SagaStore + ?Sized,
{
    async fn load(&self, correlation_id: ProcessId) -> Result<Option<SagaState>, SagaStoreError> {
        (**self).load(correlation_id).await
    }

    async fn insert(&self, state: &SagaState) -> Result<(), SagaStoreError> {
        (**self).insert(state).await
    }

    async fn save(&self, state: &SagaState) -> Result<(), SagaStoreError> {
        (**self).save(state).await
    }

    async fn remove(&self, correlation_id: ProcessId) -> Result<bool, SagaStoreError> {
        (**self).remove(correlation_id).await
    }

    async fn purge_finalized(&self, before: DateTime<Utc>) -> Result<usize, SagaStoreError> {
        (**self).purge_finalized(before).await
    }
}
