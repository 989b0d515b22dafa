// Wait outcomes and options for blocking queue operations

use super::cancel::CancelToken;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a blocking put/take gave up
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("wait timed out")]
    TimedOut,

    #[error("wait cancelled")]
    Cancelled,
}

/// A put that did not happen, handing the item back to the caller
#[derive(Error)]
#[error("put failed: {reason}")]
pub struct PutError<T> {
    pub item: T,
    pub reason: WaitError,
}

impl<T> PutError<T> {
    pub fn new(item: T, reason: WaitError) -> Self {
        Self { item, reason }
    }

    /// Recover the item that was not enqueued
    pub fn into_item(self) -> T {
        self.item
    }

    pub fn reason(&self) -> WaitError {
        self.reason
    }
}

// Items are not required to be Debug
impl<T> std::fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutError")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

/// Bounds on how long a put/take may block
///
/// The default waits forever and cannot be cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitOptions<'a> {
    timeout: Option<Duration>,
    cancel: Option<&'a CancelToken>,
}

impl<'a> WaitOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up with [`WaitError::TimedOut`] after `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Give up with [`WaitError::Cancelled`] once `token` is cancelled
    pub fn cancel(mut self, token: &'a CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn cancel_token(&self) -> Option<&'a CancelToken> {
        self.cancel
    }

    /// Absolute deadline measured from `now`; `None` when unbounded or when
    /// the timeout is too large to represent.
    pub(crate) fn deadline_from(&self, now: Instant) -> Option<Instant> {
        self.timeout.and_then(|timeout| now.checked_add(timeout))
    }
}
