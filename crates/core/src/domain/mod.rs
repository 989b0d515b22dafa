// Domain Layer - Queue settings, snapshots and the message envelope

pub mod error;
pub mod message;
pub mod queue;

// Re-exports
pub use error::DomainError;
pub use message::{Message, MessageId};
pub use queue::{Fairness, QueueConfig, QueueId, QueueStats, WakePolicy};
