//! Pipeline events, commands and the transport they travel on.

pub mod bus;
pub mod in_memory_bus;
pub mod message;
pub mod saga;

pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use message::{
    Correlated, FileFailed, FileOutcome, FilePersisted, FileProcessed, FileReady, InitializeFiles,
    PersistFileResult, PipelineCommand, PipelineEvent, ProcessFile, ProcessStarted,
    UpdateProcessStatus,
};
pub use saga::{FileStage, SagaPhase, SagaState};
