// Cancellation channel for blocked queue operations and async tasks
//
// Lock order: the waker registry and a queue mutex are never held together.
// Waiters register before locking the queue and deregister after unlocking it;
// `cancel` snapshots the registry, releases it, then runs the wakers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

/// Callback that wakes every thread parked on one queue
pub(crate) type Waker = Arc<dyn Fn() + Send + Sync>;

struct CancelState {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    wakers: Mutex<HashMap<u64, Waker>>,
    // Async side: tasks await the flip to `true`
    signal: watch::Sender<bool>,
}

/// Observes cancellation; cheap to clone, one clone per worker
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Wait for cancellation (async tasks such as the stats monitor)
    pub async fn cancelled(&self) {
        let mut rx = self.state.signal.subscribe();
        // The sender lives in the shared state, so the channel cannot close here
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the token was (or became) cancelled.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let parked = Arc::new((Mutex::new(()), Condvar::new()));
        let remote = Arc::clone(&parked);
        let _registration = self.register(Arc::new(move || {
            let (lock, cvar) = &*remote;
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            cvar.notify_all();
        }));

        let deadline = Instant::now().checked_add(duration);
        let (lock, cvar) = &*parked;
        let mut guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.is_cancelled() {
                return true;
            }
            guard = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return false;
                    }
                    cvar.wait_timeout(guard, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => cvar.wait(guard).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Register a waker to run on cancellation; it is removed when the
    /// returned registration drops.
    pub(crate) fn register(&self, waker: Waker) -> Registration<'_> {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        self.state
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, waker);
        Registration { token: self, id }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Requests cancellation of every clone of the paired token
pub struct CancelSender {
    state: Arc<CancelState>,
}

impl CancelSender {
    /// Cancel all operations waiting on the token (idempotent)
    pub fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        let wakers: Vec<Waker> = self
            .state
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        debug!(waiters = wakers.len(), "Cancellation requested");
        for wake in wakers {
            wake();
        }
        self.state.signal.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Another token observing this sender
    pub fn token(&self) -> CancelToken {
        CancelToken {
            state: Arc::clone(&self.state),
        }
    }
}

/// Create a cancellation channel
pub fn cancel_channel() -> (CancelSender, CancelToken) {
    let state = Arc::new(CancelState {
        cancelled: AtomicBool::new(false),
        next_id: AtomicU64::new(0),
        wakers: Mutex::new(HashMap::new()),
        signal: watch::channel(false).0,
    });
    (
        CancelSender {
            state: Arc::clone(&state),
        },
        CancelToken { state },
    )
}

pub(crate) struct Registration<'a> {
    token: &'a CancelToken,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.token
            .state
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
