//! Saga orchestrator: drives one saga instance per process.
//!
//! Each event is handled under a per-process lock:
//!
//! 1. load the instance (timeout ∘ retry)
//! 2. compute the next instance and its commands ([`decide`])
//! 3. publish every command (timeout ∘ retry)
//! 4. store the instance (timeout ∘ retry)
//!
//! Commands go out before the state is stored. If publishing fails nothing is
//! stored and the redelivered event runs the same transition again; if storing
//! fails the commands are published twice, which every stage tolerates.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use docproc_core::ProcessId;
use docproc_events::{EventBus, PipelineCommand, PipelineEvent};
use docproc_processing::ProcessStatus;

use crate::locks::KeyedLocks;
use crate::resilience::{DeadlineError, Resilience};
use crate::workers::{DeliveryFailure, Disposition, MessageHandler};

use super::process_saga::{Decision, IgnoreReason, Rejection, decide};
use super::{SagaStore, SagaStoreError};

/// What handling one event did to its saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaOutcome {
    Started,
    Advanced,
    Finalized(ProcessStatus),
    Ignored(IgnoreReason),
}

#[derive(Debug, Error)]
pub enum SagaError {
    #[error("{operation}: saga store failed: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: DeadlineError<SagaStoreError>,
    },

    #[error("{operation}: publishing {command} failed: {message}")]
    SideEffect {
        operation: &'static str,
        command: &'static str,
        message: String,
    },

    #[error("{operation}: {rejection}")]
    Rejected {
        operation: &'static str,
        #[source]
        rejection: Rejection,
    },
}

impl DeliveryFailure for SagaError {
    fn disposition(&self) -> Disposition {
        match self {
            SagaError::Store { source, .. } => match source {
                DeadlineError::Failed(SagaStoreError::Corrupt(_) | SagaStoreError::NotFound(_)) => {
                    Disposition::DeadLetter
                }
                _ => Disposition::Redeliver,
            },
            SagaError::SideEffect { .. } => Disposition::Redeliver,
            SagaError::Rejected { rejection, .. } => rejection.disposition(),
        }
    }
}

fn operation_name(event: &PipelineEvent) -> &'static str {
    match event {
        PipelineEvent::ProcessStarted(_) => "initialize_process",
        PipelineEvent::FileReady(_) => "handle_file_ready",
        PipelineEvent::FileProcessed(_) => "handle_file_processed",
        PipelineEvent::FileFailed(_) => "handle_file_failed",
        PipelineEvent::FilePersisted(_) => "handle_file_persisted",
    }
}

pub struct SagaOrchestrator<B> {
    store: Arc<dyn SagaStore>,
    commands: B,
    resilience: Resilience,
    locks: KeyedLocks<ProcessId>,
}

impl<B> SagaOrchestrator<B>
where
    B: EventBus<PipelineCommand>,
{
    pub fn new(store: Arc<dyn SagaStore>, commands: B, resilience: Resilience) -> Self {
        Self {
            store,
            commands,
            resilience,
            locks: KeyedLocks::new(),
        }
    }

    pub fn resilience(&self) -> Resilience {
        self.resilience
    }

    pub async fn handle_event(&self, event: PipelineEvent) -> Result<SagaOutcome, SagaError> {
        let process_id = event.correlation_id();
        let guard = self.locks.lock(&process_id).await;
        let result = self.transition(process_id, &event).await;
        drop(guard);
        self.locks.prune(&process_id);
        result
    }

    async fn transition(&self, process_id: ProcessId, event: &PipelineEvent) -> Result<SagaOutcome, SagaError> {
        let operation = operation_name(event);
        let store_err = |source: DeadlineError<SagaStoreError>| SagaError::Store { operation, source };

        let current = self
            .resilience
            .run("load_saga", || self.store.load(process_id))
            .await
            .map_err(store_err)?;

        let step = match decide(current.as_ref(), event, Utc::now()) {
            Ok(Decision::Apply(step)) => step,
            Ok(Decision::Ignore(reason)) => {
                log_ignored(process_id, operation, reason);
                return Ok(SagaOutcome::Ignored(reason));
            }
            Err(rejection) => {
                warn!(
                    process_id = %process_id,
                    operation,
                    error = %rejection,
                    "event rejected"
                );
                return Err(SagaError::Rejected { operation, rejection });
            }
        };

        for command in &step.commands {
            self.resilience
                .run(operation, || self.commands.publish(command.clone()))
                .await
                .map_err(|e| SagaError::SideEffect {
                    operation,
                    command: command.message_type(),
                    message: e.to_string(),
                })?;
        }

        if step.is_new {
            match self.resilience.run("insert_saga", || self.store.insert(&step.state)).await {
                Ok(()) => {}
                Err(DeadlineError::Failed(SagaStoreError::AlreadyExists(_))) => {
                    // Another handler won the race; its commands are equivalent.
                    log_ignored(process_id, operation, IgnoreReason::DuplicateStart);
                    return Ok(SagaOutcome::Ignored(IgnoreReason::DuplicateStart));
                }
                Err(e) => return Err(store_err(e)),
            }
        } else {
            self.resilience
                .run("save_saga", || self.store.save(&step.state))
                .await
                .map_err(store_err)?;
        }

        if let Some(status) = step.finalized {
            info!(
                process_id = %process_id,
                status = %status,
                total_files = step.state.total_files,
                persisted_files = step.state.persisted_files,
                failed_files = step.state.failed_files,
                "saga completed"
            );
            return Ok(SagaOutcome::Finalized(status));
        }

        if step.is_new {
            info!(process_id = %process_id, total_files = step.state.total_files, "saga started");
            Ok(SagaOutcome::Started)
        } else {
            debug!(
                process_id = %process_id,
                operation,
                completed_files = step.state.completed_files,
                persisted_files = step.state.persisted_files,
                failed_files = step.state.failed_files,
                "saga advanced"
            );
            Ok(SagaOutcome::Advanced)
        }
    }
}

fn log_ignored(process_id: ProcessId, operation: &'static str, reason: IgnoreReason) {
    match reason {
        IgnoreReason::Finalized => {
            info!(process_id = %process_id, operation, "event for completed saga ignored")
        }
        IgnoreReason::DuplicateStart => {
            debug!(process_id = %process_id, operation, "duplicate start ignored")
        }
        IgnoreReason::DuplicateFileEvent { file_id, stage } => debug!(
            process_id = %process_id,
            file_id = %file_id,
            ?stage,
            operation,
            "duplicate file event ignored"
        ),
    }
}

#[async_trait::async_trait]
impl<B> MessageHandler<PipelineEvent> for SagaOrchestrator<B>
where
    B: EventBus<PipelineCommand> + 'static,
{
    type Error = SagaError;

    async fn handle(&self, message: PipelineEvent) -> Result<(), Self::Error> {
        self.handle_event(message).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use docproc_core::FileId;
    use docproc_events::{
        FileFailed, FilePersisted, FileProcessed, FileReady, InMemoryEventBus, ProcessStarted,
        SagaPhase, SagaState, Subscription,
    };
    use docproc_processing::{FileMetrics, FileStatus};

    use crate::resilience::RetryPolicy;
    use crate::saga::InMemorySagaStore;

    /// Fails the first `failures` publishes with a transient io error.
    struct FlakyBus {
        inner: InMemoryEventBus<PipelineCommand>,
        failures: AtomicU32,
        attempts: AtomicU32,
    }

    impl FlakyBus {
        fn new(failures: u32) -> Self {
            Self {
                inner: InMemoryEventBus::new(),
                failures: AtomicU32::new(failures),
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl EventBus<PipelineCommand> for FlakyBus {
        type Error = io::Error;

        async fn publish(&self, message: PipelineCommand) -> Result<(), Self::Error> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "broker reset"));
            }
            self.inner.publish(message).await.map_err(io::Error::other)
        }

        fn subscribe(&self) -> Subscription<PipelineCommand> {
            self.inner.subscribe()
        }
    }

    fn fast() -> Resilience {
        Resilience::new(RetryPolicy::new(3, Duration::from_millis(5)), Duration::from_secs(5))
    }

    struct Harness<B> {
        store: Arc<InMemorySagaStore>,
        orchestrator: SagaOrchestrator<Arc<B>>,
        commands: Subscription<PipelineCommand>,
    }

    fn harness<B>(bus: Arc<B>) -> Harness<B>
    where
        B: EventBus<PipelineCommand> + 'static,
    {
        let store = Arc::new(InMemorySagaStore::new());
        let commands = bus.subscribe();
        let orchestrator = SagaOrchestrator::new(store.clone(), bus, fast());
        Harness {
            store,
            orchestrator,
            commands,
        }
    }

    impl<B: EventBus<PipelineCommand>> Harness<B> {
        async fn state(&self, process_id: ProcessId) -> SagaState {
            self.store.load(process_id).await.unwrap().unwrap()
        }

        fn drain(&mut self) -> Vec<PipelineCommand> {
            let mut out = Vec::new();
            while let Ok(cmd) = self.commands.try_recv() {
                out.push(cmd);
            }
            out
        }
    }

    fn started(process_id: ProcessId, n: usize) -> PipelineEvent {
        PipelineEvent::ProcessStarted(ProcessStarted {
            process_id,
            file_names: (0..n).map(|i| format!("doc-{i}.txt")).collect(),
        })
    }

    fn ready(process_id: ProcessId, file_id: FileId) -> PipelineEvent {
        PipelineEvent::FileReady(FileReady {
            process_id,
            file_id,
            file_name: "doc.txt".into(),
        })
    }

    fn processed(process_id: ProcessId, file_id: FileId) -> PipelineEvent {
        PipelineEvent::FileProcessed(FileProcessed {
            process_id,
            file_id,
            file_name: "doc.txt".into(),
            metrics: FileMetrics::default(),
        })
    }

    fn failed(process_id: ProcessId, file_id: FileId) -> PipelineEvent {
        PipelineEvent::FileFailed(FileFailed {
            process_id,
            file_id,
            file_name: "doc.txt".into(),
            error_message: "Processing error: boom".into(),
        })
    }

    fn persisted(process_id: ProcessId, file_id: FileId, status: FileStatus) -> PipelineEvent {
        PipelineEvent::FilePersisted(FilePersisted {
            process_id,
            file_id,
            file_name: "doc.txt".into(),
            status,
        })
    }

    #[tokio::test]
    async fn drives_a_process_to_completion() {
        let mut h = harness(Arc::new(InMemoryEventBus::<PipelineCommand>::new()));
        let pid = ProcessId::new();
        let fid = FileId::new();

        assert_eq!(h.orchestrator.handle_event(started(pid, 1)).await.unwrap(), SagaOutcome::Started);
        assert!(matches!(h.drain().as_slice(), [PipelineCommand::InitializeFiles(_)]));

        h.orchestrator.handle_event(ready(pid, fid)).await.unwrap();
        assert!(matches!(h.drain().as_slice(), [PipelineCommand::ProcessFile(c)] if c.file_id == fid));

        h.orchestrator.handle_event(processed(pid, fid)).await.unwrap();
        assert!(matches!(h.drain().as_slice(), [PipelineCommand::PersistFileResult(_)]));

        let outcome = h
            .orchestrator
            .handle_event(persisted(pid, fid, FileStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome, SagaOutcome::Finalized(ProcessStatus::Completed));
        assert!(matches!(
            h.drain().as_slice(),
            [PipelineCommand::UpdateProcessStatus(u)] if u.new_status == ProcessStatus::Completed
        ));
        assert_eq!(h.state(pid).await.current_state, SagaPhase::Completed);
    }

    #[tokio::test]
    async fn duplicate_persisted_after_completion_changes_nothing() {
        let mut h = harness(Arc::new(InMemoryEventBus::<PipelineCommand>::new()));
        let pid = ProcessId::new();
        let fid = FileId::new();

        for event in [
            started(pid, 1),
            ready(pid, fid),
            processed(pid, fid),
            persisted(pid, fid, FileStatus::Completed),
        ] {
            h.orchestrator.handle_event(event).await.unwrap();
        }
        h.drain();
        let before = h.state(pid).await;

        let outcome = h
            .orchestrator
            .handle_event(persisted(pid, fid, FileStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome, SagaOutcome::Ignored(IgnoreReason::Finalized));
        assert!(h.drain().is_empty());
        assert_eq!(h.state(pid).await, before);
    }

    #[tokio::test]
    async fn one_failed_file_completes_with_failures() {
        let mut h = harness(Arc::new(InMemoryEventBus::<PipelineCommand>::new()));
        let pid = ProcessId::new();
        let (ok, bad) = (FileId::new(), FileId::new());

        for event in [
            started(pid, 2),
            ready(pid, ok),
            ready(pid, bad),
            processed(pid, ok),
            failed(pid, bad),
            persisted(pid, ok, FileStatus::Completed),
        ] {
            h.orchestrator.handle_event(event).await.unwrap();
        }
        let outcome = h
            .orchestrator
            .handle_event(persisted(pid, bad, FileStatus::Failed))
            .await
            .unwrap();
        assert_eq!(outcome, SagaOutcome::Finalized(ProcessStatus::CompletedWithFailures));

        let last = h.drain().pop();
        assert!(matches!(
            last,
            Some(PipelineCommand::UpdateProcessStatus(u))
                if u.new_status == ProcessStatus::CompletedWithFailures
                    && u.reason.as_deref() == Some("Process completed with 1 failures")
        ));
        let state = h.state(pid).await;
        assert_eq!(state.failed_files, 1);
        assert_eq!(state.persisted_files, 1);
    }

    #[tokio::test]
    async fn transient_publish_failures_are_retried() {
        let bus = Arc::new(FlakyBus::new(2));
        let mut h = harness(bus.clone());
        let pid = ProcessId::new();

        assert_eq!(h.orchestrator.handle_event(started(pid, 1)).await.unwrap(), SagaOutcome::Started);
        assert_eq!(bus.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(h.drain().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_publish_leaves_state_unsaved() {
        let bus = Arc::new(FlakyBus::new(u32::MAX));
        let h = harness(bus.clone());
        let pid = ProcessId::new();

        let err = h.orchestrator.handle_event(started(pid, 1)).await.unwrap_err();
        assert!(matches!(err, SagaError::SideEffect { operation: "initialize_process", .. }));
        assert_eq!(err.disposition(), Disposition::Redeliver);
        assert_eq!(bus.attempts.load(Ordering::SeqCst), 4);
        assert!(h.store.load(pid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_saga_is_dead_lettered() {
        let h = harness(Arc::new(InMemoryEventBus::<PipelineCommand>::new()));
        let err = h
            .orchestrator
            .handle_event(ready(ProcessId::new(), FileId::new()))
            .await
            .unwrap_err();
        assert_eq!(err.disposition(), Disposition::DeadLetter);
    }

    #[tokio::test]
    async fn concurrent_events_for_one_process_are_serialized() {
        let h = harness(Arc::new(InMemoryEventBus::<PipelineCommand>::new()));
        let orchestrator = Arc::new(h.orchestrator);
        let pid = ProcessId::new();
        let n = 16;
        orchestrator.handle_event(started(pid, n)).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..n {
            let o = orchestrator.clone();
            tasks.spawn(async move { o.handle_event(ready(pid, FileId::new())).await });
        }
        while let Some(res) = tasks.join_next().await {
            assert_eq!(res.unwrap().unwrap(), SagaOutcome::Advanced);
        }

        let state = h.store.load(pid).await.unwrap().unwrap();
        assert_eq!(state.files.len(), n);
    }
}
