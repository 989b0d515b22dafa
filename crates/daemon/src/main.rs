//! Relay Daemon - Main Entry Point
//! Producers and consumers share one bounded queue until Ctrl+C

mod settings;
mod telemetry;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use relay_core::application::worker::constants::SHUTDOWN_GRACE_PERIOD;
use relay_core::application::worker::{ConsumerSummary, ProducerSummary};
use relay_core::application::{ConsumerWorker, ProducerWorker};
use relay_core::domain::Message;
use relay_core::port::id_provider::UuidProvider;
use relay_core::port::time_provider::SystemTimeProvider;
use relay_core::port::{IdProvider, LoggingHandler, MessageHandler, TimeProvider};
use relay_core::{cancel_channel, BoundedBlockingQueue, QueueMonitor};
use settings::DaemonConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (defaults < RELAY_CONFIG file < RELAY_* env)
    let config = DaemonConfig::load()?;

    // 2. Initialize logging
    let log_guard = telemetry::init_logging(config.log_dir.as_deref())?;
    info!("Relay daemon v{} starting...", VERSION);
    info!(
        queue = %config.queue.name,
        capacity = config.queue.capacity,
        fairness = %config.queue.fairness,
        wake_policy = %config.queue.wake_policy,
        producers = config.producers,
        consumers = config.consumers,
        "Configuration loaded"
    );

    // 3. Setup dependencies (DI wiring)
    let queue: BoundedBlockingQueue<Message> = BoundedBlockingQueue::from_config(&config.queue)
        .context("Failed to create queue")?;
    let id_provider: Arc<dyn IdProvider> = Arc::new(UuidProvider);
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let handler: Arc<dyn MessageHandler> = Arc::new(LoggingHandler);
    let (cancel_tx, cancel_rx) = cancel_channel();

    // 4. Start workers (blocking threads: the queue parks on a condvar)
    let mut consumers: Vec<JoinHandle<ConsumerSummary>> = Vec::with_capacity(config.consumers);
    for id in 0..config.consumers {
        let worker = ConsumerWorker::new(id, queue.clone(), Arc::clone(&handler))
            .with_delay(config.consumer_delay());
        let token = cancel_rx.clone();
        consumers.push(tokio::task::spawn_blocking(move || worker.run(None, &token)));
    }

    let mut producers: Vec<JoinHandle<ProducerSummary>> = Vec::with_capacity(config.producers);
    for id in 0..config.producers {
        let worker = ProducerWorker::new(
            id,
            queue.clone(),
            Arc::clone(&id_provider),
            Arc::clone(&time_provider),
        )
        .with_interval(config.produce_interval());
        let token = cancel_rx.clone();
        producers.push(tokio::task::spawn_blocking(move || worker.run(None, &token)));
    }

    // 5. Start stats monitor
    let monitor = tokio::spawn(
        QueueMonitor::new(queue.clone(), config.stats_interval()).run(cancel_rx.clone()),
    );

    info!("System ready. Press Ctrl+C to shutdown");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received. Cancelling workers...");

    // 7. Graceful shutdown: cancel wakes every blocked put/take
    cancel_tx.cancel();

    let joined = join_workers(producers, consumers, SHUTDOWN_GRACE_PERIOD).await;
    if let Some((produced, consumed)) = joined {
        info!(produced, consumed, "All workers stopped");
    }

    if let Ok(Some(stats)) = monitor.await {
        info!(
            len = stats.len,
            total_put = stats.total_put,
            total_taken = stats.total_taken,
            high_water_mark = stats.high_water_mark,
            "Final queue stats"
        );
    }

    if joined.is_none() {
        // Blocking tasks keep the runtime alive on drop; leave without them
        error!("Forcing exit with workers still running");
        drop(log_guard);
        std::process::exit(1);
    }

    info!("Shutdown complete.");
    Ok(())
}

/// Await every worker for at most `grace`; `None` if any is still running
/// (its task is left behind)
async fn join_workers(
    producers: Vec<JoinHandle<ProducerSummary>>,
    consumers: Vec<JoinHandle<ConsumerSummary>>,
    grace: Duration,
) -> Option<(u64, u64)> {
    let joined = tokio::time::timeout(grace, async {
        let mut produced = 0;
        let mut consumed = 0;
        for handle in producers {
            match handle.await {
                Ok(summary) => produced += summary.produced,
                Err(e) => error!(error = ?e, "Producer task failed"),
            }
        }
        for handle in consumers {
            match handle.await {
                Ok(summary) => consumed += summary.consumed,
                Err(e) => error!(error = ?e, "Consumer task failed"),
            }
        }
        (produced, consumed)
    })
    .await;

    if joined.is_err() {
        warn!(
            grace_secs = grace.as_secs(),
            "Workers did not stop within the grace period"
        );
    }
    joined.ok()
}
