// Worker - producer/consumer loops around the bounded queue

pub mod constants;
mod panic_guard;

pub use panic_guard::{execute_guarded, panic_message, PanicGuardResult};

use crate::application::queue::{BoundedBlockingQueue, CancelToken};
use crate::domain::Message;
use crate::port::{IdProvider, MessageHandler, TimeProvider};
use constants::*;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What one producer did before it stopped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProducerSummary {
    pub producer: usize,
    pub produced: u64,
    /// Stopped by cancellation rather than by reaching its quota
    pub cancelled: bool,
}

/// What one consumer did before it stopped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerSummary {
    pub consumer: usize,
    pub consumed: u64,
    pub handled: u64,
    pub failed: u64,
    pub panicked: u64,
    pub cancelled: bool,
}

/// Puts numbered messages into the queue
pub struct ProducerWorker {
    id: usize,
    queue: BoundedBlockingQueue<Message>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    interval: Duration,
}

impl ProducerWorker {
    pub fn new(
        id: usize,
        queue: BoundedBlockingQueue<Message>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            id,
            queue,
            id_provider,
            time_provider,
            interval: Duration::ZERO,
        }
    }

    /// Pause between messages (zero = produce as fast as the queue allows)
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Produce until `quota` messages were put (or forever when `None`),
    /// stopping early on cancellation.
    pub fn run(&self, quota: Option<u64>, cancel: &CancelToken) -> ProducerSummary {
        info!(producer = self.id, queue = %self.queue.name(), ?quota, "Producer started");
        let mut summary = ProducerSummary {
            producer: self.id,
            ..Default::default()
        };

        while quota.map_or(true, |quota| summary.produced < quota) {
            let message = self.next_message(summary.produced);
            let message_id = message.id.clone();

            if let Err(e) = self.queue.put_cancellable(message, cancel) {
                debug!(
                    producer = self.id,
                    message_id = %message_id,
                    reason = %e.reason(),
                    "Put abandoned, message dropped"
                );
                summary.cancelled = true;
                break;
            }
            debug!(producer = self.id, message_id = %message_id, "Produced message");
            summary.produced += 1;

            if !self.interval.is_zero() && cancel.wait_timeout(self.interval) {
                summary.cancelled = true;
                break;
            }
        }

        info!(
            producer = self.id,
            produced = summary.produced,
            cancelled = summary.cancelled,
            "Producer stopped"
        );
        summary
    }

    fn next_message(&self, sequence: u64) -> Message {
        Message::new(
            self.id_provider.generate_id(),
            self.id,
            sequence,
            serde_json::json!({ "producer": self.id, "value": sequence }),
            self.time_provider.now_millis(),
        )
    }
}

/// Takes messages from the queue and hands them to a `MessageHandler`
pub struct ConsumerWorker {
    id: usize,
    queue: BoundedBlockingQueue<Message>,
    handler: Arc<dyn MessageHandler>,
    delay: Duration,
}

impl ConsumerWorker {
    pub fn new(
        id: usize,
        queue: BoundedBlockingQueue<Message>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            id,
            queue,
            handler,
            delay: DEFAULT_CONSUMER_DELAY,
        }
    }

    /// Simulated processing time after each message
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Consume until `quota` messages were taken (or forever when `None`),
    /// stopping early on cancellation. Handler failures and panics are
    /// counted; the loop keeps going.
    pub fn run(&self, quota: Option<u64>, cancel: &CancelToken) -> ConsumerSummary {
        info!(consumer = self.id, queue = %self.queue.name(), ?quota, "Consumer started");
        let mut summary = ConsumerSummary {
            consumer: self.id,
            ..Default::default()
        };

        while quota.map_or(true, |quota| summary.consumed < quota) {
            let message = match self.queue.take_cancellable(cancel) {
                Ok(message) => message,
                Err(e) => {
                    debug!(consumer = self.id, reason = %e, "Take abandoned");
                    summary.cancelled = true;
                    break;
                }
            };
            summary.consumed += 1;

            let message_id = message.id.clone();
            let handler = &self.handler;
            let consumer = self.id;
            match execute_guarded(AssertUnwindSafe(|| handler.handle(consumer, message))) {
                PanicGuardResult::Success(Ok(())) => summary.handled += 1,
                PanicGuardResult::Success(Err(e)) => {
                    warn!(consumer, message_id = %message_id, error = %e, "Handler failed");
                    summary.failed += 1;
                }
                PanicGuardResult::Panicked(_) => {
                    warn!(consumer, message_id = %message_id, "Handler panicked, consumer continues");
                    summary.panicked += 1;
                }
            }

            if !self.delay.is_zero() && cancel.wait_timeout(self.delay) {
                summary.cancelled = true;
                break;
            }
        }

        info!(
            consumer = self.id,
            consumed = summary.consumed,
            failed = summary.failed,
            panicked = summary.panicked,
            cancelled = summary.cancelled,
            "Consumer stopped"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::queue::cancel_channel;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::message_handler::mocks::{MockBehavior, MockMessageHandler};
    use crate::port::time_provider::mocks::FixedTimeProvider;
    use std::thread;

    fn producer(id: usize, queue: &BoundedBlockingQueue<Message>) -> ProducerWorker {
        ProducerWorker::new(
            id,
            queue.clone(),
            Arc::new(SequentialIdProvider::new()),
            Arc::new(FixedTimeProvider::new(1_700_000_000_000)),
        )
    }

    #[test]
    fn test_producer_stops_at_quota() {
        let queue = BoundedBlockingQueue::new(8).unwrap();
        let (_sender, token) = cancel_channel();

        let summary = producer(3, &queue).run(Some(5), &token);

        assert_eq!(summary.produced, 5);
        assert!(!summary.cancelled);
        assert_eq!(queue.len(), 5);

        let first = queue.take();
        assert_eq!(first.id, "msg-0");
        assert_eq!(first.producer, 3);
        assert_eq!(first.sequence, 0);
        assert_eq!(first.produced_at_ms, 1_700_000_000_000);
        assert_eq!(first.payload["value"], 0);
    }

    #[test]
    fn test_producer_stamps_current_time() {
        let queue = BoundedBlockingQueue::new(4).unwrap();
        let (_sender, token) = cancel_channel();
        let clock = Arc::new(FixedTimeProvider::new(5_000));
        let worker = ProducerWorker::new(
            0,
            queue.clone(),
            Arc::new(SequentialIdProvider::new()),
            clock.clone(),
        );

        worker.run(Some(1), &token);
        clock.advance(250);
        worker.run(Some(1), &token);

        assert_eq!(queue.take().produced_at_ms, 5_000);
        assert_eq!(queue.take().produced_at_ms, 5_250);
    }

    #[test]
    fn test_producer_blocked_on_full_queue_is_cancelled() {
        let queue = BoundedBlockingQueue::new(2).unwrap();
        let (sender, token) = cancel_channel();
        let worker = producer(0, &queue);

        let handle = thread::spawn(move || worker.run(None, &token));
        while queue.stats().waiting_producers == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        sender.cancel();

        let summary = handle.join().unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.produced, 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_consumer_counts_failures_and_panics() {
        let queue = BoundedBlockingQueue::new(8).unwrap();
        let (_sender, token) = cancel_channel();
        producer(0, &queue).run(Some(3), &token);

        let mock = Arc::new(MockMessageHandler::new_success());
        let consumer = ConsumerWorker::new(1, queue.clone(), mock.clone());

        assert_eq!(consumer.run(Some(1), &token).handled, 1);

        mock.set_behavior(MockBehavior::Fail("bad".into()));
        assert_eq!(consumer.run(Some(1), &token).failed, 1);

        mock.set_behavior(MockBehavior::Panic("boom".into()));
        let summary = consumer.run(Some(1), &token);
        assert_eq!(summary.panicked, 1);
        assert_eq!(summary.consumed, 1);

        assert_eq!(mock.call_count(), 3);
        assert!(mock.handled().iter().all(|(consumer, _)| *consumer == 1));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_idle_consumer_exits_on_cancel() {
        let queue: BoundedBlockingQueue<Message> = BoundedBlockingQueue::new(1).unwrap();
        let (sender, token) = cancel_channel();
        let consumer = ConsumerWorker::new(0, queue.clone(), Arc::new(MockMessageHandler::new_success()));

        let handle = thread::spawn(move || consumer.run(None, &token));
        while queue.stats().waiting_consumers == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        sender.cancel();

        let summary = handle.join().unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.consumed, 0);
    }

    #[test]
    fn test_consumer_delay_is_interrupted_by_cancel() {
        let queue = BoundedBlockingQueue::new(4).unwrap();
        let (sender, token) = cancel_channel();
        producer(0, &queue).run(Some(1), &token);

        let consumer = ConsumerWorker::new(0, queue.clone(), Arc::new(MockMessageHandler::new_success()))
            .with_delay(Duration::from_secs(60));
        let handle = thread::spawn(move || consumer.run(None, &token));

        while !queue.is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        sender.cancel();

        let summary = handle.join().unwrap();
        assert_eq!(summary.handled, 1);
        assert!(summary.cancelled);
    }
}
