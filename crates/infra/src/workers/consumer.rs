use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use docproc_events::{Correlated, EventBus, Subscription};

use super::dead_letter::{DeadLetter, DeadLetterSink};
use super::{DeliveryFailure, Disposition, MessageHandler};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub name: &'static str,
    /// Redeliveries after the first delivery before giving up.
    pub max_redeliveries: u32,
    pub redelivery_delay: Duration,
}

impl ConsumerConfig {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            max_redeliveries: 5,
            redelivery_delay: Duration::from_millis(200),
        }
    }

    pub fn with_max_redeliveries(mut self, n: u32) -> Self {
        self.max_redeliveries = n;
        self
    }

    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }
}

/// Handle to control and join a background consumer.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn new(name: &'static str, shutdown: watch::Sender<bool>, join: JoinHandle<()>) -> Self {
        Self {
            name,
            shutdown,
            join: Some(join),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop accepting new messages, let in-flight deliveries finish, then join.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(j) = self.join.take() {
            let _ = j.await;
        }
    }
}

/// Generic consumer loop.
///
/// - Subscribes to a bus before returning, so nothing published afterwards is missed
/// - Runs every delivery in its own task; ordering and per-key exclusion are
///   the handler's concern
/// - Redelivers transient failures a bounded number of times
/// - Sends poison messages and exhausted redeliveries to the dead-letter sink
#[derive(Debug)]
pub struct ConsumerWorker;

impl ConsumerWorker {
    pub fn spawn<M, B, H>(
        config: ConsumerConfig,
        bus: &B,
        handler: Arc<H>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> WorkerHandle
    where
        M: Correlated + Clone + Send + Sync + 'static,
        B: EventBus<M> + ?Sized,
        H: MessageHandler<M>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sub = bus.subscribe();
        let name = config.name;

        let join = tokio::spawn(consume_loop(config, sub, shutdown_rx, handler, dead_letters));
        info!(worker = name, "consumer started");

        WorkerHandle::new(name, shutdown_tx, join)
    }
}

async fn consume_loop<M, H>(
    config: ConsumerConfig,
    mut sub: Subscription<M>,
    mut shutdown_rx: watch::Receiver<bool>,
    handler: Arc<H>,
    dead_letters: Arc<dyn DeadLetterSink>,
) where
    M: Correlated + Clone + Send + Sync + 'static,
    H: MessageHandler<M>,
{
    let config = Arc::new(config);
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            msg = sub.recv() => match msg {
                Some(msg) => {
                    in_flight.spawn(deliver(config.clone(), handler.clone(), dead_letters.clone(), msg));
                }
                None => break,
            },
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
        }
    }

    while in_flight.join_next().await.is_some() {}
    info!(worker = config.name, "consumer stopped");
}

async fn deliver<M, H>(
    config: Arc<ConsumerConfig>,
    handler: Arc<H>,
    dead_letters: Arc<dyn DeadLetterSink>,
    msg: M,
) where
    M: Correlated + Clone + Send + Sync + 'static,
    H: MessageHandler<M>,
{
    let mut deliveries = 0u32;
    loop {
        deliveries += 1;
        let err = match handler.handle(msg.clone()).await {
            Ok(()) => {
                debug!(
                    worker = config.name,
                    message_type = msg.message_type(),
                    process_id = %msg.correlation_id(),
                    "message handled"
                );
                return;
            }
            Err(err) => err,
        };

        match err.disposition() {
            Disposition::Redeliver if deliveries <= config.max_redeliveries => {
                warn!(
                    worker = config.name,
                    message_type = msg.message_type(),
                    process_id = %msg.correlation_id(),
                    delivery = deliveries,
                    error = %err,
                    "handler failed; scheduling redelivery"
                );
                tokio::time::sleep(config.redelivery_delay).await;
            }
            disposition => {
                error!(
                    worker = config.name,
                    message_type = msg.message_type(),
                    process_id = %msg.correlation_id(),
                    deliveries,
                    ?disposition,
                    error = %err,
                    "message dead-lettered"
                );
                dead_letters.record(DeadLetter {
                    consumer: config.name,
                    message_type: msg.message_type(),
                    process_id: msg.correlation_id(),
                    error: err.to_string(),
                    deliveries,
                    failed_at: Utc::now(),
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use docproc_core::ProcessId;
    use docproc_events::{InMemoryEventBus, PipelineCommand, UpdateProcessStatus};
    use docproc_processing::ProcessStatus;

    use crate::workers::InMemoryDeadLetters;

    #[derive(Debug, thiserror::Error)]
    #[error("handler failed ({0:?})")]
    struct TestFailure(Disposition);

    impl DeliveryFailure for TestFailure {
        fn disposition(&self) -> Disposition {
            self.0
        }
    }

    /// Fails the first `fail_times` deliveries with the given disposition.
    struct Scripted {
        calls: AtomicU32,
        fail_times: u32,
        disposition: Disposition,
    }

    #[async_trait::async_trait]
    impl MessageHandler<PipelineCommand> for Scripted {
        type Error = TestFailure;

        async fn handle(&self, _message: PipelineCommand) -> Result<(), Self::Error> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(TestFailure(self.disposition))
            } else {
                Ok(())
            }
        }
    }

    fn command() -> PipelineCommand {
        PipelineCommand::UpdateProcessStatus(UpdateProcessStatus {
            process_id: ProcessId::new(),
            new_status: ProcessStatus::Running,
            reason: None,
        })
    }

    async fn run(handler: Arc<Scripted>, max_redeliveries: u32) -> Arc<InMemoryDeadLetters> {
        let bus = InMemoryEventBus::<PipelineCommand>::new();
        let dlq = Arc::new(InMemoryDeadLetters::new());
        let config = ConsumerConfig::new("test")
            .with_max_redeliveries(max_redeliveries)
            .with_redelivery_delay(Duration::from_millis(1));
        let worker = ConsumerWorker::spawn(config, &bus, handler.clone(), dlq.clone());

        bus.publish(command()).await.unwrap();
        for _ in 0..200 {
            let done = handler.calls.load(Ordering::SeqCst) > handler.fail_times.min(max_redeliveries)
                || !dlq.all().is_empty();
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        worker.shutdown().await;
        dlq
    }

    #[tokio::test]
    async fn transient_failures_are_redelivered() {
        let handler = Arc::new(Scripted {
            calls: AtomicU32::new(0),
            fail_times: 2,
            disposition: Disposition::Redeliver,
        });
        let dlq = run(handler.clone(), 5).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(dlq.all().is_empty());
    }

    #[tokio::test]
    async fn poison_messages_are_dead_lettered_immediately() {
        let handler = Arc::new(Scripted {
            calls: AtomicU32::new(0),
            fail_times: u32::MAX,
            disposition: Disposition::DeadLetter,
        });
        let dlq = run(handler.clone(), 5).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        let letters = dlq.all();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].message_type, "update_process_status");
        assert_eq!(letters[0].deliveries, 1);
    }

    #[tokio::test]
    async fn redelivery_is_bounded() {
        let handler = Arc::new(Scripted {
            calls: AtomicU32::new(0),
            fail_times: u32::MAX,
            disposition: Disposition::Redeliver,
        });
        let dlq = run(handler.clone(), 2).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(dlq.all()[0].deliveries, 3);
    }
}
