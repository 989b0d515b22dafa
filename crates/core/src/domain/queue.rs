// Queue Domain Model

use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Queue identifier (used in logs and stats only)
pub type QueueId = String;

/// Longest accepted queue name
pub const MAX_QUEUE_NAME_LEN: usize = 64;

/// Queue capacity when none is configured
pub const DEFAULT_QUEUE_CAPACITY: i64 = 16;

/// Order in which blocked threads of the same kind are served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fairness {
    /// Any blocked thread whose predicate holds may proceed next
    #[default]
    Unordered,
    /// Blocked threads proceed in arrival order; newcomers never barge
    Fifo,
}

/// How many waiters are woken per successful put/take
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WakePolicy {
    /// Wake every waiter of the relevant kind (they re-check and re-block)
    #[default]
    Broadcast,
    /// Wake exactly one waiter per new item / freed slot
    Single,
}

impl std::fmt::Display for Fairness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fairness::Unordered => write!(f, "unordered"),
            Fairness::Fifo => write!(f, "fifo"),
        }
    }
}

impl std::fmt::Display for WakePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WakePolicy::Broadcast => write!(f, "broadcast"),
            WakePolicy::Single => write!(f, "single"),
        }
    }
}

/// Queue construction settings
///
/// `capacity` is signed so that a negative value coming from a config file or
/// the environment is reported as [`DomainError::InvalidCapacity`] instead of
/// failing deserialization with an opaque message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: QueueId,
    pub capacity: i64,
    #[serde(default)]
    pub fairness: Fairness,
    #[serde(default)]
    pub wake_policy: WakePolicy,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, capacity: i64) -> Self {
        Self {
            name: name.into(),
            capacity,
            fairness: Fairness::default(),
            wake_policy: WakePolicy::default(),
        }
    }

    pub fn with_fairness(mut self, fairness: Fairness) -> Self {
        self.fairness = fairness;
        self
    }

    pub fn with_wake_policy(mut self, wake_policy: WakePolicy) -> Self {
        self.wake_policy = wake_policy;
        self
    }

    /// Validate settings and return the capacity as a slot count
    pub fn validate(&self) -> Result<usize> {
        if self.name.is_empty() {
            return Err(DomainError::Validation(
                "Queue name cannot be empty".to_string(),
            ));
        }
        if self.name.len() > MAX_QUEUE_NAME_LEN {
            return Err(DomainError::Validation(format!(
                "Queue name too long (max {} chars)",
                MAX_QUEUE_NAME_LEN
            )));
        }
        if self.capacity <= 0 {
            return Err(DomainError::InvalidCapacity(self.capacity));
        }
        usize::try_from(self.capacity).map_err(|_| DomainError::InvalidCapacity(self.capacity))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new("default", DEFAULT_QUEUE_CAPACITY)
    }
}

/// Point-in-time view of a queue, taken under its mutex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub name: QueueId,
    pub len: usize,
    pub capacity: usize,
    pub waiting_producers: usize,
    pub waiting_consumers: usize,
    pub total_put: u64,
    pub total_taken: u64,
    /// Largest length ever observed outside the critical section
    pub high_water_mark: usize,
    pub fairness: Fairness,
    pub wake_policy: WakePolicy,
}
