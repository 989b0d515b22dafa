//! Lock ordering - acquire several mutexes in one global order
//!
//! Two threads that take the same pair of locks in opposite order can block
//! each other forever. Every path in this workspace that holds more than one
//! mutex goes through these helpers, which always acquire in ascending address
//! order regardless of the order the caller names the locks in. Guards are
//! handed back in the caller's order.
//!
//! The queue itself never holds more than one lock at a time.

use std::sync::{Mutex, MutexGuard, PoisonError};

fn address<T: ?Sized>(lock: &Mutex<T>) -> usize {
    lock as *const Mutex<T> as *const () as usize
}

fn acquire<T: ?Sized>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lock two distinct mutexes, lowest address first
///
/// # Panics
/// If `first` and `second` are the same mutex (std mutexes are not reentrant).
pub fn lock_pair<'a, A, B>(
    first: &'a Mutex<A>,
    second: &'a Mutex<B>,
) -> (MutexGuard<'a, A>, MutexGuard<'a, B>) {
    assert_ne!(
        address(first),
        address(second),
        "lock_pair called twice on the same mutex"
    );

    if address(first) < address(second) {
        let a = acquire(first);
        let b = acquire(second);
        (a, b)
    } else {
        let b = acquire(second);
        let a = acquire(first);
        (a, b)
    }
}

/// Lock every mutex in `locks`, lowest address first
///
/// The returned guards are in the same order as `locks`.
///
/// # Panics
/// If the same mutex appears twice.
pub fn lock_all<'a, T>(locks: &[&'a Mutex<T>]) -> Vec<MutexGuard<'a, T>> {
    let mut order: Vec<usize> = (0..locks.len()).collect();
    order.sort_by_key(|&index| address(locks[index]));
    assert!(
        order
            .windows(2)
            .all(|pair| address(locks[pair[0]]) != address(locks[pair[1]])),
        "lock_all called with the same mutex twice"
    );

    let mut guards: Vec<Option<MutexGuard<'a, T>>> = locks.iter().map(|_| None).collect();
    for index in order {
        guards[index] = Some(acquire(locks[index]));
    }
    guards.into_iter().flatten().collect()
}
