//! Wires the buses, stores, stages and the saga orchestrator into a running pipeline.
//!
//! ```text
//!                 ┌──────────── events ────────────┐
//!  ProcessStarted │                                ▼
//!  ───────────────┤                        SagaOrchestrator
//!                 │                                │
//!                 │           commands ◄───────────┘
//!                 │      ┌────────┼─────────┐
//!                 │      ▼        ▼         ▼
//!                 └─ Initializer Analyzer  Writer
//! ```
//!
//! Every consumer gets its own subscription; stages on the command bus skip
//! the commands addressed to the others.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use docproc_analysis::{StopWords, TextAnalyzer};
use docproc_core::ProcessId;
use docproc_events::{InMemoryEventBus, PipelineCommand, PipelineEvent, UpdateProcessStatus};
use docproc_processing::{ProcessStatus, STOPPED_BY_REQUEST, StatusChange};

use crate::config::PipelineConfig;
use crate::repository::{InMemoryProcessRepository, PostgresProcessRepository, ProcessRepository, RepositoryError};
use crate::saga::{InMemorySagaStore, PostgresSagaStore, SagaJanitor, SagaOrchestrator, SagaStore, SagaStoreError};
use crate::stages::{
    AnalyzerStage, DocumentStore, FsDocumentStore, InMemoryDocumentStore, InitializerStage, StageError, WriterStage,
};
use crate::workers::{ConsumerWorker, DeadLetterSink, InMemoryDeadLetters, WorkerHandle};

pub type EventBusHandle = Arc<InMemoryEventBus<PipelineEvent>>;
pub type CommandBusHandle = Arc<InMemoryEventBus<PipelineCommand>>;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cannot connect to postgres: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("process repository: {0}")]
    Repository(#[from] RepositoryError),

    #[error("saga store: {0}")]
    SagaStore(#[from] SagaStoreError),
}

/// The durable stores a pipeline runs on.
#[derive(Clone)]
pub struct PipelineStores {
    pub repository: Arc<dyn ProcessRepository>,
    pub sagas: Arc<dyn SagaStore>,
}

impl PipelineStores {
    pub fn in_memory() -> Self {
        Self {
            repository: Arc::new(InMemoryProcessRepository::new()),
            sagas: Arc::new(InMemorySagaStore::new()),
        }
    }

    /// Connect to Postgres and create the tables if they are missing.
    pub async fn connect(database_url: &str) -> Result<Self, StartupError> {
        let pool = PgPool::connect(database_url).await?;

        let repository = PostgresProcessRepository::new(pool.clone());
        repository.ensure_schema().await?;
        let sagas = PostgresSagaStore::new(pool);
        sagas.ensure_schema().await?;

        info!("using postgres stores");
        Ok(Self {
            repository: Arc::new(repository),
            sagas: Arc::new(sagas),
        })
    }

    /// Postgres when the config asks for it, in-memory otherwise.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self, StartupError> {
        match config.persistent_database_url() {
            Some(url) => Self::connect(url).await,
            None => {
                info!("using in-memory stores");
                Ok(Self::in_memory())
            }
        }
    }
}

pub struct Pipeline {
    events: EventBusHandle,
    commands: CommandBusHandle,
    stores: PipelineStores,
    documents: Arc<dyn DocumentStore>,
    writer: Arc<WriterStage<EventBusHandle>>,
    dead_letters: Arc<InMemoryDeadLetters>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl Pipeline {
    /// Spawn the saga consumer, the three stage consumers and the saga janitor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &PipelineConfig, stores: PipelineStores) -> Self {
        let events: EventBusHandle = Arc::new(InMemoryEventBus::new());
        let commands: CommandBusHandle = Arc::new(InMemoryEventBus::new());
        let dead_letters = Arc::new(InMemoryDeadLetters::new());
        let sink: Arc<dyn DeadLetterSink> = dead_letters.clone();

        let documents: Arc<dyn DocumentStore> = match &config.documents_root {
            Some(root) => {
                info!(root = %root.display(), "reading documents from the filesystem");
                Arc::new(FsDocumentStore::new(root))
            }
            None => Arc::new(InMemoryDocumentStore::new()),
        };
        let analyzer = Arc::new(TextAnalyzer::new(StopWords::load_or_default(
            config.stop_words_path.as_deref(),
        )));

        let orchestrator = Arc::new(SagaOrchestrator::new(
            stores.sagas.clone(),
            commands.clone(),
            config.resilience(),
        ));
        let initializer = Arc::new(InitializerStage::new(stores.repository.clone(), events.clone()));
        let analyzer_stage = Arc::new(AnalyzerStage::new(
            stores.repository.clone(),
            documents.clone(),
            analyzer,
            events.clone(),
            commands.clone(),
        ));
        let writer = Arc::new(WriterStage::new(stores.repository.clone(), events.clone()));

        let workers = vec![
            ConsumerWorker::spawn(config.consumer_config("saga"), &events, orchestrator, sink.clone()),
            ConsumerWorker::spawn(
                config.consumer_config("initializer"),
                &commands,
                initializer,
                sink.clone(),
            ),
            ConsumerWorker::spawn(config.consumer_config("analyzer"), &commands, analyzer_stage, sink.clone()),
            ConsumerWorker::spawn(config.consumer_config("writer"), &commands, writer.clone(), sink),
            SagaJanitor::spawn(
                stores.sagas.clone(),
                config.saga_retention(),
                config.saga_purge_interval(),
            ),
        ];

        info!(workers = workers.len(), "pipeline started");
        Self {
            events,
            commands,
            stores,
            documents,
            writer,
            dead_letters,
            workers: Mutex::new(workers),
        }
    }

    /// Bus on which `ProcessStarted` is published to kick off a process.
    pub fn events(&self) -> &EventBusHandle {
        &self.events
    }

    pub fn commands(&self) -> &CommandBusHandle {
        &self.commands
    }

    pub fn repository(&self) -> Arc<dyn ProcessRepository> {
        self.stores.repository.clone()
    }

    pub fn sagas(&self) -> Arc<dyn SagaStore> {
        self.stores.sagas.clone()
    }

    pub fn documents(&self) -> Arc<dyn DocumentStore> {
        self.documents.clone()
    }

    pub fn dead_letters(&self) -> Arc<InMemoryDeadLetters> {
        self.dead_letters.clone()
    }

    /// Stop a process that has not finished yet.
    ///
    /// Goes through the writer so it cannot interleave with a concurrent
    /// status or counter update for the same process.
    pub async fn stop_process(&self, process_id: ProcessId) -> Result<StatusChange, StageError> {
        self.writer
            .update_status(UpdateProcessStatus {
                process_id,
                new_status: ProcessStatus::Stopped,
                reason: Some(STOPPED_BY_REQUEST.to_string()),
            })
            .await
    }

    /// Drop completed saga instances last touched before `before`.
    pub async fn purge_finalized_sagas(&self, before: DateTime<Utc>) -> Result<usize, SagaStoreError> {
        let purged = self.stores.sagas.purge_finalized(before).await?;
        info!(purged, "finalized sagas purged");
        Ok(purged)
    }

    /// Stop every consumer after its in-flight deliveries finish.
    ///
    /// Later calls find no workers left and return immediately.
    pub async fn shutdown(&self) {
        let workers = self
            .workers
            .lock()
            .map(|mut w| std::mem::take(&mut *w))
            .unwrap_or_default();
        for worker in workers {
            let name = worker.name();
            worker.shutdown().await;
            info!(worker = name, "worker joined");
        }
        info!("pipeline stopped");
    }
}
