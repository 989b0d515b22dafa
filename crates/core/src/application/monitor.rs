// Queue Monitor - periodic stats logging until shutdown

use crate::application::queue::{BoundedBlockingQueue, CancelToken};
use crate::domain::QueueStats;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

/// Logs a [`QueueStats`] snapshot on every tick
pub struct QueueMonitor<T> {
    queue: BoundedBlockingQueue<T>,
    interval: Duration,
}

impl<T> QueueMonitor<T> {
    pub fn new(queue: BoundedBlockingQueue<T>, interval: Duration) -> Self {
        Self { queue, interval }
    }

    /// Run until `cancel` fires; returns the last snapshot taken, if any.
    ///
    /// `stats()` holds the queue mutex only long enough to copy counters, so
    /// calling it from an async task does not stall the runtime.
    pub async fn run(self, cancel: CancelToken) -> Option<QueueStats> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(queue = %self.queue.name(), "Queue monitor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let stats = self.queue.stats();
                    info!(
                        queue = %stats.name,
                        len = stats.len,
                        capacity = stats.capacity,
                        waiting_producers = stats.waiting_producers,
                        waiting_consumers = stats.waiting_consumers,
                        total_put = stats.total_put,
                        total_taken = stats.total_taken,
                        high_water_mark = stats.high_water_mark,
                        "Queue stats"
                    );
                    last = Some(stats);
                }
            }
        }

        last
    }
}
