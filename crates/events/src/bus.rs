//! Message publishing/subscription abstraction (mechanics only).
//!
//! The bus is the transport between pipeline stages. It makes minimal
//! assumptions:
//!
//! - **Transport-agnostic**: in-memory channels today, a broker tomorrow
//! - **At-least-once delivery**: messages may be delivered more than once;
//!   every consumer must be idempotent
//! - **No cross-type ordering**: a `FilePersisted` may overtake an earlier
//!   `FileReady` for a sibling file
//! - **No persistence**: redelivery after a failed handler is the consumer
//!   loop's job, not the bus's

use std::sync::Arc;

use tokio::sync::mpsc;

/// A subscription to a message stream.
///
/// Each subscription gets a copy of every message published after it was
/// created (broadcast semantics).
///
/// ```ignore
/// let mut sub = bus.subscribe();
/// while let Some(msg) = sub.recv().await {
///     handle(msg).await?;
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: mpsc::UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: mpsc::UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<M, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

/// Pub/sub contract used by every stage.
///
/// `publish()` is fire-and-forget from the caller's point of view: success
/// means the transport accepted the message, not that anyone handled it.
/// Failures are surfaced so callers can wrap publication in the retry and
/// timeout policies.
#[async_trait::async_trait]
pub trait EventBus<M: Send + 'static>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

#[async_trait::async_trait]
impl<M, B> EventBus<M> for Arc<B>
where
    M: Send + 'static,
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    async fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message).await
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
