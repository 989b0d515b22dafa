// Worker constants (no magic values)
use std::time::Duration;

pub use crate::domain::queue::DEFAULT_QUEUE_CAPACITY;

/// Pause between two messages of a continuously running producer (100ms)
pub const DEFAULT_PRODUCE_INTERVAL: Duration = Duration::from_millis(100);

/// Consumers take immediately; pure blocking, no polling delay
pub const DEFAULT_CONSUMER_DELAY: Duration = Duration::ZERO;

/// How long a bounded pipeline run waits for consumers to drain the queue (30s)
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the monitor logs a stats snapshot (10s)
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Graceful shutdown: how long to wait for cancelled workers to exit (5s)
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);
