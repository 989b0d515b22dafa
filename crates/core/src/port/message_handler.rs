// Message Handler Port
// What a consumer does with each message it takes from the queue

use crate::domain::Message;
use thiserror::Error;
use tracing::info;

/// Handler errors (the message is counted as failed, the consumer keeps going)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// Message Handler trait
///
/// Implementations:
/// - LoggingHandler: logs each message (daemon and CLI default)
/// - mocks::MockMessageHandler: records messages for tests
pub trait MessageHandler: Send + Sync {
    /// Handle one message
    ///
    /// # Errors
    /// - HandlerError::Rejected if the message cannot be processed
    /// - HandlerError::InvalidPayload if the payload is malformed
    fn handle(&self, consumer: usize, message: Message) -> Result<(), HandlerError>;
}

/// Logs every consumed message; payloads must be JSON objects
pub struct LoggingHandler;

impl MessageHandler for LoggingHandler {
    fn handle(&self, consumer: usize, message: Message) -> Result<(), HandlerError> {
        if !message.payload.is_object() {
            return Err(HandlerError::InvalidPayload(format!(
                "{} carries a non-object payload",
                message.id
            )));
        }
        info!(
            consumer,
            message_id = %message.id,
            producer = message.producer,
            sequence = message.sequence,
            "Consumed message"
        );
        Ok(())
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Mock handler behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Always fail with message
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep before succeeding (slow consumer)
        Delay(Duration),
    }

    /// Mock Message Handler for testing
    pub struct MockMessageHandler {
        behavior: Arc<Mutex<MockBehavior>>,
        handled: Arc<Mutex<Vec<(usize, Message)>>>,
    }

    impl MockMessageHandler {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Arc::new(Mutex::new(behavior)),
                handled: Arc::new(Mutex::new(Vec::new())),
            }
        }
        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }
        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }
        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }
        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }
        /// Messages seen so far, with the consumer index that handled each
        pub fn handled(&self) -> Vec<(usize, Message)> {
            self.handled.lock().unwrap().clone()
        }
        pub fn call_count(&self) -> usize {
            self.handled.lock().unwrap().len()
        }
    }

    impl MessageHandler for MockMessageHandler {
        fn handle(&self, consumer: usize, message: Message) -> Result<(), HandlerError> {
            self.handled.lock().unwrap().push((consumer, message));

            let behavior = self.behavior.lock().unwrap().clone();

            match behavior {
                MockBehavior::Success => Ok(()),
                MockBehavior::Fail(msg) => Err(HandlerError::Rejected(msg)),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
                MockBehavior::Delay(delay) => {
                    std::thread::sleep(delay);
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_logging_handler_accepts_object_payload() {
        let message = Message::new("m-1", 0, 0, json!({ "producer": 0, "value": 0 }), 0);
        assert_eq!(LoggingHandler.handle(1, message), Ok(()));
    }

    #[test]
    fn test_logging_handler_rejects_non_object_payload() {
        let message = Message::new("m-2", 0, 1, json!([1, 2, 3]), 0);
        let err = LoggingHandler.handle(1, message).unwrap_err();
        assert!(matches!(err, HandlerError::InvalidPayload(ref why) if why.contains("m-2")));
    }
}
