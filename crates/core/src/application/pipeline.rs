// Pipeline - bounded producer/consumer run with delivery accounting
//
// Producers each put a fixed number of messages; consumers take until the
// ledger has seen every message (or the drain timeout passes), then the run is
// cancelled and every thread joined. Cancellation always happens before
// consumers are joined, otherwise an idle consumer would block the join.

use crate::application::queue::{cancel_channel, BoundedBlockingQueue, CancelSender};
use crate::application::worker::constants::{DEFAULT_CONSUMER_DELAY, DEFAULT_DRAIN_TIMEOUT};
use crate::application::worker::{
    panic_message, ConsumerSummary, ConsumerWorker, ProducerSummary, ProducerWorker,
};
use crate::domain::{DomainError, Message, MessageId, QueueConfig, QueueStats};
use crate::error::{AppError, Result};
use crate::port::id_provider::UuidProvider;
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{HandlerError, IdProvider, MessageHandler, TimeProvider};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Shape of one bounded run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub queue: QueueConfig,
    pub producers: usize,
    pub consumers: usize,
    pub items_per_producer: u64,
    pub consumer_delay: Duration,
    pub drain_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            producers: 2,
            consumers: 2,
            items_per_producer: 100,
            consumer_delay: DEFAULT_CONSUMER_DELAY,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// Check the run shape and return how many messages it delivers
    pub fn validate(&self) -> std::result::Result<u64, DomainError> {
        self.queue.validate()?;
        if self.producers == 0 {
            return Err(DomainError::Validation(
                "Pipeline needs at least one producer".to_string(),
            ));
        }
        if self.consumers == 0 {
            return Err(DomainError::Validation(
                "Pipeline needs at least one consumer".to_string(),
            ));
        }
        self.expected_items().ok_or_else(|| {
            DomainError::Validation(format!(
                "{} producers x {} items overflows the message count",
                self.producers, self.items_per_producer
            ))
        })
    }

    /// Messages a complete run delivers, `None` if the count overflows
    pub fn expected_items(&self) -> Option<u64> {
        u64::try_from(self.producers)
            .ok()?
            .checked_mul(self.items_per_producer)
    }
}

/// Outcome of a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub expected: u64,
    pub produced: u64,
    pub consumed: u64,
    pub handled: u64,
    pub failed: u64,
    pub panicked: u64,
    /// Extra deliveries of a message already delivered once
    pub duplicates: u64,
    /// Produced messages no consumer ever received
    pub lost: u64,
    pub elapsed_ms: u64,
    pub stats: QueueStats,
    pub producers: Vec<ProducerSummary>,
    pub consumers: Vec<ConsumerSummary>,
}

impl PipelineReport {
    /// Every expected message was delivered exactly once
    pub fn is_lossless(&self) -> bool {
        self.lost == 0 && self.duplicates == 0 && self.produced == self.expected
    }
}

/// Counts deliveries per message id before passing each message on
struct Ledger {
    inner: Arc<dyn MessageHandler>,
    seen: Mutex<HashMap<MessageId, u64>>,
    delivered: Condvar,
}

impl Ledger {
    fn new(inner: Arc<dyn MessageHandler>) -> Self {
        Self {
            inner,
            seen: Mutex::new(HashMap::new()),
            delivered: Condvar::new(),
        }
    }

    /// Block until `total` deliveries were recorded; false on timeout
    fn wait_for(&self, total: u64, timeout: Duration) -> bool {
        let seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let (_seen, result) = self
            .delivered
            .wait_timeout_while(seen, timeout, |seen| {
                seen.values().sum::<u64>() < total
            })
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    /// (distinct ids, duplicate deliveries)
    fn tally(&self) -> (u64, u64) {
        let seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let duplicates = seen.values().map(|count| count - 1).sum();
        (seen.len() as u64, duplicates)
    }
}

impl MessageHandler for Ledger {
    fn handle(&self, consumer: usize, message: Message) -> std::result::Result<(), HandlerError> {
        {
            let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
            *seen.entry(message.id.clone()).or_insert(0) += 1;
        }
        self.delivered.notify_all();
        self.inner.handle(consumer, message)
    }
}

/// Cancels the run when dropped, including on early return or unwind
struct CancelOnDrop<'a>(&'a CancelSender);

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Runs producers and consumers on scoped threads and accounts for delivery
pub struct Pipeline {
    config: PipelineConfig,
    handler: Arc<dyn MessageHandler>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            config,
            handler,
            id_provider: Arc::new(UuidProvider),
            time_provider: Arc::new(SystemTimeProvider),
        }
    }

    /// Swap the id and clock sources (deterministic tests)
    pub fn with_providers(
        mut self,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        self.id_provider = id_provider;
        self.time_provider = time_provider;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run to completion (or until the drain timeout) and report
    ///
    /// # Errors
    /// - `AppError::Domain` for an invalid configuration
    /// - `AppError::Worker` if a thread cannot be spawned or dies outside
    ///   the handler's panic guard
    pub fn run(&self) -> Result<PipelineReport> {
        let expected = self.config.validate()?;
        let queue: BoundedBlockingQueue<Message> =
            BoundedBlockingQueue::from_config(&self.config.queue)?;
        let ledger = Arc::new(Ledger::new(Arc::clone(&self.handler)));
        let (sender, token) = cancel_channel();

        info!(
            queue = %queue.name(),
            capacity = queue.capacity(),
            producers = self.config.producers,
            consumers = self.config.consumers,
            expected,
            "Pipeline started"
        );
        let started = Instant::now();

        let (producers, consumers) = thread::scope(|scope| -> Result<_> {
            let _cancel_on_exit = CancelOnDrop(&sender);

            let mut consumer_handles = Vec::with_capacity(self.config.consumers);
            for id in 0..self.config.consumers {
                let handler: Arc<dyn MessageHandler> = ledger.clone();
                let worker = ConsumerWorker::new(id, queue.clone(), handler)
                    .with_delay(self.config.consumer_delay);
                let token = token.clone();
                consumer_handles.push(spawn_worker(
                    scope,
                    format!("relay-consumer-{id}"),
                    move || worker.run(None, &token),
                )?);
            }

            let mut producer_handles = Vec::with_capacity(self.config.producers);
            for id in 0..self.config.producers {
                let worker = ProducerWorker::new(
                    id,
                    queue.clone(),
                    Arc::clone(&self.id_provider),
                    Arc::clone(&self.time_provider),
                );
                let token = token.clone();
                let quota = self.config.items_per_producer;
                producer_handles.push(spawn_worker(
                    scope,
                    format!("relay-producer-{id}"),
                    move || worker.run(Some(quota), &token),
                )?);
            }

            if !ledger.wait_for(expected, self.config.drain_timeout) {
                warn!(
                    timeout_ms = self.config.drain_timeout.as_millis() as u64,
                    "Drain timeout reached, cancelling pipeline"
                );
            }
            sender.cancel();

            let producers = join_all(producer_handles, "producer")?;
            let consumers = join_all(consumer_handles, "consumer")?;
            Ok((producers, consumers))
        })?;

        let elapsed = started.elapsed();
        let (delivered, duplicates) = ledger.tally();
        let produced: u64 = producers.iter().map(|p| p.produced).sum();

        let report = PipelineReport {
            expected,
            produced,
            consumed: consumers.iter().map(|c| c.consumed).sum(),
            handled: consumers.iter().map(|c| c.handled).sum(),
            failed: consumers.iter().map(|c| c.failed).sum(),
            panicked: consumers.iter().map(|c| c.panicked).sum(),
            duplicates,
            lost: produced.saturating_sub(delivered),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            stats: queue.stats(),
            producers,
            consumers,
        };

        info!(
            produced = report.produced,
            consumed = report.consumed,
            lost = report.lost,
            duplicates = report.duplicates,
            elapsed_ms = report.elapsed_ms,
            "Pipeline finished"
        );
        Ok(report)
    }
}

fn spawn_worker<'scope, 'env, T, F>(
    scope: &'scope thread::Scope<'scope, 'env>,
    name: String,
    f: F,
) -> Result<ScopedJoinHandle<'scope, T>>
where
    F: FnOnce() -> T + Send + 'scope,
    T: Send + 'scope,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn_scoped(scope, f)
        .map_err(|e| AppError::Worker(format!("failed to spawn {}: {}", name, e)))
}

fn join_all<T>(handles: Vec<ScopedJoinHandle<'_, T>>, kind: &str) -> Result<Vec<T>> {
    handles
        .into_iter()
        .map(|handle| {
            handle.join().map_err(|payload| {
                AppError::Worker(format!(
                    "{} thread panicked: {}",
                    kind,
                    panic_message(payload.as_ref())
                ))
            })
        })
        .collect()
}
