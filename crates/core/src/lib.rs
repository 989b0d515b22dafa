// Relay Core - Bounded blocking queue, cancellation, worker harness & ports
// NO binaries, NO config loading (hexagonal layout: binaries are composition roots)

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use application::{
    cancel_channel, BoundedBlockingQueue, CancelSender, CancelToken, Pipeline, PipelineConfig,
    PipelineReport, PutError, QueueBuilder, QueueMonitor, WaitError, WaitOptions,
};
pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
