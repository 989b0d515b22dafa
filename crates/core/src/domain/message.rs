// Message Domain Model

use serde::{Deserialize, Serialize};

/// Message ID (UUID v4 in production)
pub type MessageId = String;

/// Unit of work moved from producers to consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Index of the producer that created the message
    pub producer: usize,
    /// Per-producer sequence number, starting at 0
    pub sequence: u64,
    pub payload: serde_json::Value,
    pub produced_at_ms: i64, // epoch ms
}

impl Message {
    pub fn new(
        id: impl Into<MessageId>,
        producer: usize,
        sequence: u64,
        payload: serde_json::Value,
        produced_at_ms: i64,
    ) -> Self {
        Self {
            id: id.into(),
            producer,
            sequence,
            payload,
            produced_at_ms,
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Message{{id={}, producer={}, sequence={}}}",
            self.id, self.producer, self.sequence
        )
    }
}
