//! Queue Property Tests
//!
//! Ordering, capacity and delivery guarantees under real thread contention,
//! for every fairness / wake policy combination.

use relay_core::domain::{DomainError, Fairness, QueueConfig, WakePolicy};
use relay_core::BoundedBlockingQueue;
use std::collections::HashSet;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Longest any scenario may take before it counts as a deadlock
const DEADLOCK_TIMEOUT: Duration = Duration::from_secs(30);

const POLICIES: [(Fairness, WakePolicy); 4] = [
    (Fairness::Unordered, WakePolicy::Broadcast),
    (Fairness::Unordered, WakePolicy::Single),
    (Fairness::Fifo, WakePolicy::Broadcast),
    (Fairness::Fifo, WakePolicy::Single),
];

fn queue<T>(capacity: i64, fairness: Fairness, wake_policy: WakePolicy) -> BoundedBlockingQueue<T> {
    let config = QueueConfig::new("properties", capacity)
        .with_fairness(fairness)
        .with_wake_policy(wake_policy);
    BoundedBlockingQueue::from_config(&config).unwrap()
}

/// Run `scenario` on its own thread and fail the test if it does not finish
fn within_deadline<R, F>(label: &str, scenario: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(scenario());
    });
    rx.recv_timeout(DEADLOCK_TIMEOUT)
        .unwrap_or_else(|_| panic!("{}: did not finish, possible deadlock or lost wakeup", label))
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let started = std::time::Instant::now();
    while !condition() {
        assert!(started.elapsed() < DEADLOCK_TIMEOUT, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

/// Property 1: Single-threaded FIFO
#[test]
fn test_single_thread_fifo_order() {
    let queue = BoundedBlockingQueue::new(5).unwrap();
    for i in 1..=5 {
        queue.put(i);
    }
    let taken: Vec<i32> = (0..5).map(|_| queue.take()).collect();
    assert_eq!(taken, vec![1, 2, 3, 4, 5]);
    assert!(queue.is_empty());
}

/// Property 2: Invalid capacities never produce a queue
#[test]
fn test_invalid_capacity_rejected() {
    assert_eq!(
        BoundedBlockingQueue::<u8>::new(0).unwrap_err(),
        DomainError::InvalidCapacity(0)
    );
    let config = QueueConfig::new("negative", -5);
    assert_eq!(
        BoundedBlockingQueue::<u8>::from_config(&config).unwrap_err(),
        DomainError::InvalidCapacity(-5)
    );
}

/// Property 3: A consumer on an empty queue blocks until a put
#[test]
fn test_take_blocks_until_put() {
    let queue: BoundedBlockingQueue<&str> = BoundedBlockingQueue::new(1).unwrap();
    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || queue.take())
    };

    wait_until("consumer to block", || queue.stats().waiting_consumers == 1);
    assert!(!consumer.is_finished());

    queue.put("hello");
    assert_eq!(consumer.join().unwrap(), "hello");
}

/// Property 4: A producer on a full queue blocks until a take
#[test]
fn test_put_blocks_until_take() {
    let queue = BoundedBlockingQueue::new(2).unwrap();
    queue.put(1);
    queue.put(2);

    let producer = {
        let queue = queue.clone();
        thread::spawn(move || queue.put(3))
    };

    wait_until("producer to block", || queue.stats().waiting_producers == 1);
    assert_eq!(queue.len(), 2);

    assert_eq!(queue.take(), 1);
    producer.join().unwrap();
    assert_eq!(queue.take(), 2);
    assert_eq!(queue.take(), 3);
}

/// Property 5: Capacity 1 degenerates into a strict handoff
#[test]
fn test_capacity_one_handoff() {
    for (fairness, wake_policy) in POLICIES {
        let queue = queue(1, fairness, wake_policy);
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || (1..=5).for_each(|i| queue.put(i)))
        };

        let received = within_deadline("handoff", move || {
            let taken: Vec<u32> = (0..5).map(|_| queue.take()).collect();
            (taken, queue.stats().high_water_mark)
        });
        producer.join().unwrap();

        assert_eq!(received.0, vec![1, 2, 3, 4, 5], "{}/{}", fairness, wake_policy);
        assert_eq!(received.1, 1);
    }
}

/// Property 6: MPMC stress. No loss, no duplication, never over capacity,
/// with producers and consumers far outnumbering the slots.
#[test]
fn test_mpmc_stress_all_policies() {
    const CAPACITY: i64 = 3;
    const PRODUCERS: u64 = 5;
    const ITEMS: u64 = 100;
    const CONSUMERS: u64 = 5;

    for (fairness, wake_policy) in POLICIES {
        let queue: BoundedBlockingQueue<u64> = queue(CAPACITY, fairness, wake_policy);
        let label = format!("stress {}/{}", fairness, wake_policy);

        let (taken, stats) = within_deadline(&label, move || {
            let producers: Vec<_> = (0..PRODUCERS)
                .map(|p| {
                    let queue = queue.clone();
                    thread::spawn(move || {
                        for i in 0..ITEMS {
                            queue.put(p * ITEMS + i);
                        }
                    })
                })
                .collect();

            let per_consumer = PRODUCERS * ITEMS / CONSUMERS;
            let consumers: Vec<_> = (0..CONSUMERS)
                .map(|_| {
                    let queue = queue.clone();
                    thread::spawn(move || (0..per_consumer).map(|_| queue.take()).collect::<Vec<_>>())
                })
                .collect();

            for producer in producers {
                producer.join().unwrap();
            }
            let taken: Vec<u64> = consumers
                .into_iter()
                .flat_map(|consumer| consumer.join().unwrap())
                .collect();
            (taken, queue.stats())
        });

        assert_eq!(taken.len() as u64, PRODUCERS * ITEMS, "{}", label);
        let distinct: HashSet<u64> = taken.iter().copied().collect();
        assert_eq!(distinct.len() as u64, PRODUCERS * ITEMS, "{}: duplicates", label);
        assert!(distinct.iter().all(|&v| v < PRODUCERS * ITEMS));

        assert!(stats.high_water_mark <= CAPACITY as usize, "{}: over capacity", label);
        assert_eq!(stats.len, 0);
        assert_eq!(stats.total_put, PRODUCERS * ITEMS);
        assert_eq!(stats.total_taken, PRODUCERS * ITEMS);
        assert_eq!(stats.waiting_producers, 0);
        assert_eq!(stats.waiting_consumers, 0);
    }
}

/// Property 7: Items from one producer reach a single consumer in order
#[test]
fn test_per_producer_order_preserved() {
    for (fairness, wake_policy) in POLICIES {
        let queue: BoundedBlockingQueue<(usize, u32)> = queue(2, fairness, wake_policy);

        let taken = within_deadline("per-producer order", move || {
            let producers: Vec<_> = (0..3)
                .map(|p| {
                    let queue = queue.clone();
                    thread::spawn(move || (0..200).for_each(|i| queue.put((p, i))))
                })
                .collect();
            let taken: Vec<(usize, u32)> = (0..600).map(|_| queue.take()).collect();
            producers.into_iter().for_each(|p| p.join().unwrap());
            taken
        });

        for p in 0..3 {
            let sequence: Vec<u32> = taken.iter().filter(|(q, _)| *q == p).map(|(_, i)| *i).collect();
            assert_eq!(sequence, (0..200).collect::<Vec<_>>(), "{}/{}", fairness, wake_policy);
        }
    }
}

/// Property 8: Targeted wakeups stay live when both sides block often
#[test]
fn test_single_wake_no_lost_wakeup() {
    let queue: BoundedBlockingQueue<u32> = queue(1, Fairness::Unordered, WakePolicy::Single);

    let total = within_deadline("single wake liveness", move || {
        let producers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || (0..500).for_each(|i| queue.put(i)))
            })
            .collect();
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || (0..500).map(|_| queue.take()).count())
            })
            .collect();

        producers.into_iter().for_each(|p| p.join().unwrap());
        consumers.into_iter().map(|c| c.join().unwrap()).sum::<usize>()
    });

    assert_eq!(total, 2_000);
}

/// Property 9: Bounded waits give up without touching the queue
#[test]
fn test_timeouts_leave_queue_unchanged() {
    let queue = BoundedBlockingQueue::new(1).unwrap();
    assert!(queue.take_timeout(Duration::from_millis(20)).is_err());

    queue.put('a');
    let err = queue.put_timeout('b', Duration::from_millis(20)).unwrap_err();
    assert_eq!(err.into_item(), 'b');

    let stats = queue.stats();
    assert_eq!(stats.len, 1);
    assert_eq!(stats.total_put, 1);
    assert_eq!(stats.total_taken, 0);
    assert_eq!(queue.take(), 'a');
}
