// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod message_handler;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use message_handler::{HandlerError, LoggingHandler, MessageHandler};
pub use time_provider::TimeProvider;
