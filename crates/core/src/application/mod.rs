// Application Layer - queue, workers and the runners built on them

pub mod lock_order;
pub mod monitor;
pub mod pipeline;
pub mod queue;
pub mod worker;

// Re-exports
pub use lock_order::{lock_all, lock_pair};
pub use monitor::QueueMonitor;
pub use pipeline::{Pipeline, PipelineConfig, PipelineReport};
pub use queue::{
    cancel_channel, BoundedBlockingQueue, CancelSender, CancelToken, PutError, QueueBuilder,
    WaitError, WaitOptions,
};
pub use worker::{ConsumerSummary, ConsumerWorker, ProducerSummary, ProducerWorker};
