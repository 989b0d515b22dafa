// Bounded Blocking Queue - one mutex, two condition variables
//
// Every predicate is re-checked in a loop after each wake; the mutex is never
// held across the wait itself (Condvar::wait releases and reacquires it).

mod cancel;
mod line;
mod wait;


pub use cancel::{cancel_channel, CancelSender, CancelToken};
pub use wait::{PutError, WaitError, WaitOptions};

use crate::domain::{DomainError, Fairness, QueueConfig, QueueId, QueueStats, WakePolicy};
use cancel::Waker;
use line::{Ticket, WaitLine};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Upper bound on slots allocated up front; larger queues grow on demand
const PREALLOCATE_LIMIT: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Producer,
    Consumer,
}

impl Side {
    fn opposite(self) -> Self {
        match self {
            Side::Producer => Side::Consumer,
            Side::Consumer => Side::Producer,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Side::Producer => "producer",
            Side::Consumer => "consumer",
        }
    }
}

struct State<T> {
    items: VecDeque<T>,
    producers: WaitLine,
    consumers: WaitLine,
    total_put: u64,
    total_taken: u64,
    high_water_mark: usize,
}

impl<T> State<T> {
    fn line(&self, side: Side) -> &WaitLine {
        match side {
            Side::Producer => &self.producers,
            Side::Consumer => &self.consumers,
        }
    }

    fn line_mut(&mut self, side: Side) -> &mut WaitLine {
        match side {
            Side::Producer => &mut self.producers,
            Side::Consumer => &mut self.consumers,
        }
    }

    /// "not full" for producers, "not empty" for consumers
    fn can_proceed(&self, side: Side, capacity: usize) -> bool {
        match side {
            Side::Producer => self.items.len() < capacity,
            Side::Consumer => !self.items.is_empty(),
        }
    }
}

struct Shared<T> {
    name: QueueId,
    capacity: usize,
    fairness: Fairness,
    wake_policy: WakePolicy,
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> Shared<T> {
    // Every mutation of State is an infallible VecDeque/counter update, so a
    // poisoned lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn condvar(&self, side: Side) -> &Condvar {
        match side {
            Side::Producer => &self.not_full,
            Side::Consumer => &self.not_empty,
        }
    }

    fn is_fair(&self) -> bool {
        self.fairness == Fairness::Fifo
    }

    /// May a thread that holds no ticket act on `side` right now?
    fn open_for_newcomer(&self, state: &State<T>, side: Side) -> bool {
        (!self.is_fair() || state.line(side).is_empty()) && state.can_proceed(side, self.capacity)
    }

    /// Block until it is this thread's turn on `side` and the side's predicate
    /// holds, the deadline passes, or `cancel` fires.
    fn wait_turn<'a>(
        &'a self,
        mut state: MutexGuard<'a, State<T>>,
        side: Side,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<MutexGuard<'a, State<T>>, WaitError> {
        let mut ticket: Option<Ticket> = None;

        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                self.abandon(&mut state, side, ticket);
                debug!(queue = %self.name, side = side.as_str(), "Wait cancelled");
                return Err(WaitError::Cancelled);
            }

            let my_turn = match ticket {
                Some(ticket) => state.line(side).is_head(ticket),
                None => !self.is_fair() || state.line(side).is_empty(),
            };
            if my_turn && state.can_proceed(side, self.capacity) {
                if let Some(ticket) = ticket {
                    state.line_mut(side).leave(ticket);
                }
                return Ok(state);
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.abandon(&mut state, side, ticket);
                        debug!(queue = %self.name, side = side.as_str(), "Wait timed out");
                        return Err(WaitError::TimedOut);
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            if self.is_fair() && ticket.is_none() {
                ticket = Some(state.line_mut(side).join());
            }

            trace!(
                queue = %self.name,
                side = side.as_str(),
                len = state.items.len(),
                capacity = self.capacity,
                "Blocking until it is this thread's turn"
            );

            state.line_mut(side).park();
            state = match remaining {
                Some(timeout) => {
                    self.condvar(side)
                        .wait_timeout(state, timeout)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .condvar(side)
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
            state.line_mut(side).unpark();
        }
    }

    /// Leave `side` without acting: drop the ticket and pass on any wakeup
    /// this thread may have absorbed.
    fn abandon(&self, state: &mut State<T>, side: Side, ticket: Option<Ticket>) {
        if let Some(ticket) = ticket {
            state.line_mut(side).leave(ticket);
        }
        if state.line(side).parked() > 0 && state.can_proceed(side, self.capacity) {
            self.wake(side);
        }
    }

    fn wake(&self, side: Side) {
        if self.is_fair() || self.wake_policy == WakePolicy::Broadcast {
            self.condvar(side).notify_all();
        } else {
            self.condvar(side).notify_one();
        }
    }

    /// Wake waiters after a successful put/take on `side`
    fn signal_after(&self, state: &State<T>, side: Side) {
        let other = side.opposite();
        if state.line(other).parked() > 0 {
            self.wake(other);
        }
        // The next ticket holder on this side may already be able to proceed
        if self.is_fair() && !state.line(side).is_empty() && state.can_proceed(side, self.capacity)
        {
            self.wake(side);
        }
    }

    fn complete_put(&self, mut state: MutexGuard<'_, State<T>>, item: T) {
        state.items.push_back(item);
        state.total_put += 1;
        state.high_water_mark = state.high_water_mark.max(state.items.len());
        trace!(queue = %self.name, len = state.items.len(), "Item enqueued");
        self.signal_after(&state, Side::Producer);
    }

    fn complete_take(&self, mut state: MutexGuard<'_, State<T>>) -> Option<T> {
        let item = state.items.pop_front()?;
        state.total_taken += 1;
        trace!(queue = %self.name, len = state.items.len(), "Item dequeued");
        self.signal_after(&state, Side::Consumer);
        Some(item)
    }

    /// Wake every parked thread on both sides without changing state
    fn wake_everyone(&self) {
        let _state = self.lock();
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }
}

/// Capacity-bounded FIFO handoff between producer and consumer threads
///
/// Handles are cheap to clone and all refer to the same queue. `put` blocks
/// while the queue is full and `take` blocks while it is empty; bounded and
/// cancellable variants report [`WaitError`] instead of blocking forever.
///
/// # Example
/// ```
/// use relay_core::BoundedBlockingQueue;
///
/// let queue = BoundedBlockingQueue::new(2).unwrap();
/// queue.put(1);
/// queue.put(2);
/// assert_eq!(queue.take(), 1);
/// assert_eq!(queue.try_take(), Some(2));
/// assert_eq!(queue.try_take(), None);
/// ```
pub struct BoundedBlockingQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BoundedBlockingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for BoundedBlockingQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedBlockingQueue")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .field("fairness", &self.shared.fairness)
            .field("wake_policy", &self.shared.wake_policy)
            .finish_non_exhaustive()
    }
}

impl<T> BoundedBlockingQueue<T> {
    /// Create an unordered, broadcasting queue named "default"
    ///
    /// # Errors
    /// `DomainError::InvalidCapacity` if `capacity` is zero
    pub fn new(capacity: usize) -> Result<Self, DomainError> {
        QueueBuilder::new(capacity).build()
    }

    /// Create a queue from validated settings
    pub fn from_config(config: &QueueConfig) -> Result<Self, DomainError> {
        QueueBuilder::from_config(config)?.build()
    }

    pub fn builder(capacity: usize) -> QueueBuilder<T> {
        QueueBuilder::new(capacity)
    }

    /// Append `item`, blocking while the queue is full
    pub fn put(&self, item: T) {
        if let Err(err) = self.put_until(item, None, None) {
            unreachable!("put without deadline or token failed: {}", err.reason);
        }
    }

    /// Remove the oldest item, blocking while the queue is empty
    pub fn take(&self) -> T {
        match self.take_until(None, None) {
            Ok(item) => item,
            Err(reason) => unreachable!("take without deadline or token failed: {}", reason),
        }
    }

    /// Append without blocking; hands `item` back when there is no room
    pub fn try_put(&self, item: T) -> Result<(), T> {
        let state = self.shared.lock();
        if !self.shared.open_for_newcomer(&state, Side::Producer) {
            return Err(item);
        }
        self.shared.complete_put(state, item);
        Ok(())
    }

    /// Remove the oldest item without blocking
    pub fn try_take(&self) -> Option<T> {
        let state = self.shared.lock();
        if !self.shared.open_for_newcomer(&state, Side::Consumer) {
            return None;
        }
        self.shared.complete_take(state)
    }

    /// Append `item`, blocking at most `timeout`
    pub fn put_timeout(&self, item: T, timeout: Duration) -> Result<(), PutError<T>> {
        let deadline = Instant::now().checked_add(timeout);
        self.put_until(item, deadline, None)
    }

    /// Remove the oldest item, blocking at most `timeout`
    pub fn take_timeout(&self, timeout: Duration) -> Result<T, WaitError> {
        let deadline = Instant::now().checked_add(timeout);
        self.take_until(deadline, None)
    }

    fn put_until(
        &self,
        item: T,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<(), PutError<T>> {
        let state = self.shared.lock();
        match self.shared.wait_turn(state, Side::Producer, deadline, cancel) {
            Ok(state) => {
                self.shared.complete_put(state, item);
                Ok(())
            }
            Err(reason) => Err(PutError::new(item, reason)),
        }
    }

    fn take_until(
        &self,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<T, WaitError> {
        let state = self.shared.lock();
        let state = self
            .shared
            .wait_turn(state, Side::Consumer, deadline, cancel)?;
        match self.shared.complete_take(state) {
            Some(item) => Ok(item),
            None => unreachable!("consumer turn granted on an empty queue"),
        }
    }

    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn fairness(&self) -> Fairness {
        self.shared.fairness
    }

    pub fn wake_policy(&self) -> WakePolicy {
        self.shared.wake_policy
    }

    /// Consistent snapshot of length, waiters and counters
    pub fn stats(&self) -> QueueStats {
        let state = self.shared.lock();
        QueueStats {
            name: self.shared.name.clone(),
            len: state.items.len(),
            capacity: self.shared.capacity,
            waiting_producers: state.producers.parked(),
            waiting_consumers: state.consumers.parked(),
            total_put: state.total_put,
            total_taken: state.total_taken,
            high_water_mark: state.high_water_mark,
            fairness: self.shared.fairness,
            wake_policy: self.shared.wake_policy,
        }
    }

    /// Wake all parked threads without changing state, as a spurious wakeup would
    #[cfg(test)]
    pub(crate) fn wake_spuriously(&self) {
        self.shared.wake_everyone();
    }
}

impl<T: Send + 'static> BoundedBlockingQueue<T> {
    /// Append `item`, honoring the timeout and cancel token in `options`
    ///
    /// On failure nothing was inserted and the item is returned in the error.
    pub fn put_with(&self, item: T, options: WaitOptions<'_>) -> Result<(), PutError<T>> {
        let deadline = options.deadline_from(Instant::now());
        let cancel = options.cancel_token();
        // Registered before the queue lock is taken, dropped after it is released
        let _registration = cancel.map(|token| token.register(self.waker()));
        self.put_until(item, deadline, cancel)
    }

    /// Remove the oldest item, honoring the timeout and cancel token in `options`
    pub fn take_with(&self, options: WaitOptions<'_>) -> Result<T, WaitError> {
        let deadline = options.deadline_from(Instant::now());
        let cancel = options.cancel_token();
        let _registration = cancel.map(|token| token.register(self.waker()));
        self.take_until(deadline, cancel)
    }

    pub fn put_cancellable(&self, item: T, token: &CancelToken) -> Result<(), PutError<T>> {
        self.put_with(item, WaitOptions::new().cancel(token))
    }

    pub fn take_cancellable(&self, token: &CancelToken) -> Result<T, WaitError> {
        self.take_with(WaitOptions::new().cancel(token))
    }

    fn waker(&self) -> Waker {
        let shared = Arc::downgrade(&self.shared);
        Arc::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.wake_everyone();
            }
        })
    }
}

/// Construction-time options for [`BoundedBlockingQueue`]
///
/// Typed by the item the queue will carry, so `build` needs no annotation
/// once the queue is used.
pub struct QueueBuilder<T> {
    name: QueueId,
    capacity: usize,
    fairness: Fairness,
    wake_policy: WakePolicy,
    item: PhantomData<fn() -> T>,
}

impl<T> Clone for QueueBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            capacity: self.capacity,
            fairness: self.fairness,
            wake_policy: self.wake_policy,
            item: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for QueueBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueBuilder")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("fairness", &self.fairness)
            .field("wake_policy", &self.wake_policy)
            .finish()
    }
}

impl<T> QueueBuilder<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            name: "default".to_string(),
            capacity,
            fairness: Fairness::default(),
            wake_policy: WakePolicy::default(),
            item: PhantomData,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Result<Self, DomainError> {
        let capacity = config.validate()?;
        Ok(Self {
            name: config.name.clone(),
            capacity,
            fairness: config.fairness,
            wake_policy: config.wake_policy,
            item: PhantomData,
        })
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn fairness(mut self, fairness: Fairness) -> Self {
        self.fairness = fairness;
        self
    }

    pub fn wake_policy(mut self, wake_policy: WakePolicy) -> Self {
        self.wake_policy = wake_policy;
        self
    }

    /// # Errors
    /// `DomainError::InvalidCapacity` if the capacity is zero
    pub fn build(self) -> Result<BoundedBlockingQueue<T>, DomainError> {
        if self.capacity == 0 {
            return Err(DomainError::InvalidCapacity(0));
        }

        debug!(
            queue = %self.name,
            capacity = self.capacity,
            fairness = %self.fairness,
            wake_policy = %self.wake_policy,
            "Creating bounded blocking queue"
        );

        Ok(BoundedBlockingQueue {
            shared: Arc::new(Shared {
                name: self.name,
                capacity: self.capacity,
                fairness: self.fairness,
                wake_policy: self.wake_policy,
                state: Mutex::new(State {
                    items: VecDeque::with_capacity(self.capacity.min(PREALLOCATE_LIMIT)),
                    producers: WaitLine::default(),
                    consumers: WaitLine::default(),
                    total_put: 0,
                    total_taken: 0,
                    high_water_mark: 0,
                }),
                not_full: Condvar::new(),
                not_empty: Condvar::new(),
            }),
        })
    }
}
