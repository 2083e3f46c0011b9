//! Background consumers: bus subscription loops with redelivery and dead-lettering.

pub mod consumer;
pub mod dead_letter;

pub use consumer::{ConsumerConfig, ConsumerWorker, WorkerHandle};
pub use dead_letter::{DeadLetter, DeadLetterSink, InMemoryDeadLetters};

/// What the transport should do with a message whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient failure; deliver the same message again later.
    Redeliver,
    /// Poison message; never retry, hand it to the dead-letter sink.
    DeadLetter,
}

/// Errors a handler can return to a consumer loop.
pub trait DeliveryFailure: std::error::Error + Send + Sync + 'static {
    fn disposition(&self) -> Disposition;
}

/// A message handler run by a [`ConsumerWorker`].
///
/// Handlers must be idempotent: the transport is at-least-once and failed
/// deliveries are retried with the same message.
#[async_trait::async_trait]
pub trait MessageHandler<M>: Send + Sync + 'static {
    type Error: DeliveryFailure;

    async fn handle(&self, message: M) -> Result<(), Self::Error>;
}
