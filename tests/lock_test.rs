/*!
 * Reentrant Lock Integration Tests
 *
 * Mutual exclusion, reentrancy, fairness ordering, interruption, and
 * condition handoff across real OS threads
 */

use pretty_assertions::assert_eq;
use qsync::{ReentrantLock, SyncError, ThreadHandle};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_mutual_exclusion_counter_never_exceeds_one() {
    let lock = Arc::new(ReentrantLock::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let lock = lock.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    lock.lock();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    inside.fetch_sub(1, Ordering::SeqCst);
                    lock.unlock().unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert!(!lock.is_locked());
}

#[test]
fn test_reentrant_holds_release_n_plus_one_times() {
    let lock = Arc::new(ReentrantLock::new());

    lock.lock();
    for _ in 0..4 {
        lock.lock();
    }
    assert_eq!(lock.hold_count(), 5);

    // Another thread cannot get in until every hold is released.
    for _ in 0..4 {
        lock.unlock().unwrap();
        let lock_clone = lock.clone();
        let grabbed = thread::spawn(move || lock_clone.try_lock()).join().unwrap();
        assert!(!grabbed, "lock leaked while still held reentrantly");
    }

    lock.unlock().unwrap();
    let lock_clone = lock.clone();
    let grabbed = thread::spawn(move || {
        let grabbed = lock_clone.try_lock();
        if grabbed {
            lock_clone.unlock().unwrap();
        }
        grabbed
    })
    .join()
    .unwrap();
    assert!(grabbed);
}

#[test]
fn test_fair_lock_serves_queued_threads_in_order() {
    let lock = Arc::new(ReentrantLock::fair());
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    lock.lock();

    let mut handles = Vec::new();
    for i in 0..5 {
        let lock_clone = lock.clone();
        let order_clone = order.clone();
        handles.push(thread::spawn(move || {
            lock_clone.lock();
            order_clone.lock().push(i);
            lock_clone.unlock().unwrap();
        }));
        // Admit threads to the queue one at a time so arrival order is
        // deterministic.
        while lock.queue_length() < i + 1 {
            thread::yield_now();
        }
    }

    lock.unlock().unwrap();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_try_lock_race_has_exactly_one_winner() {
    // Scenario: two threads race a non-fair try_lock; exactly one wins.
    for _ in 0..100 {
        let lock = Arc::new(ReentrantLock::new());
        let barrier = Arc::new(Barrier::new(2));
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let lock = lock.clone();
                let barrier = barrier.clone();
                let winners = winners.clone();
                thread::spawn(move || {
                    barrier.wait();
                    if lock.try_lock() {
                        winners.fetch_add(1, Ordering::SeqCst);
                        lock.unlock().unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_wait_blocks_until_signal_then_holds_lock() {
    // Scenario: wait() with no prior signal blocks; a later signal makes
    // it return holding the lock again.
    let lock = Arc::new(ReentrantLock::new());
    let condition = Arc::new(lock.new_condition());
    let woke = Arc::new(AtomicBool::new(false));

    let lock_clone = lock.clone();
    let condition_clone = condition.clone();
    let woke_clone = woke.clone();
    let waiter = thread::spawn(move || {
        lock_clone.lock();
        condition_clone.wait().unwrap();
        let held = lock_clone.is_held_by_current_thread();
        woke_clone.store(true, Ordering::SeqCst);
        lock_clone.unlock().unwrap();
        held
    });

    // No signal yet: the waiter must still be blocked.
    thread::sleep(Duration::from_millis(100));
    assert!(!woke.load(Ordering::SeqCst));

    lock.lock();
    condition.signal().unwrap();
    lock.unlock().unwrap();

    assert!(waiter.join().unwrap());
    assert!(woke.load(Ordering::SeqCst));
}

#[test]
fn test_signal_wakes_exactly_one_registered_waiter() {
    let lock = Arc::new(ReentrantLock::new());
    let condition = Arc::new(lock.new_condition());
    let completed = Arc::new(AtomicUsize::new(0));

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let lock = lock.clone();
            let condition = condition.clone();
            let completed = completed.clone();
            thread::spawn(move || {
                lock.lock();
                condition.wait().unwrap();
                lock.unlock().unwrap();
                completed.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    // Wait until all three are registered.
    loop {
        lock.lock();
        let count = condition.waiter_count().unwrap();
        lock.unlock().unwrap();
        if count == 3 {
            break;
        }
        thread::yield_now();
    }

    lock.lock();
    condition.signal().unwrap();
    lock.unlock().unwrap();

    thread::sleep(Duration::from_millis(100));
    assert_eq!(completed.load(Ordering::SeqCst), 1);

    lock.lock();
    condition.signal_all().unwrap();
    lock.unlock().unwrap();

    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(completed.load(Ordering::SeqCst), 3);
}

#[test]
fn test_uninterruptible_wait_reasserts_interrupt_flag() {
    let lock = Arc::new(ReentrantLock::new());
    let condition = Arc::new(lock.new_condition());
    let (tx, rx) = std::sync::mpsc::channel();

    let lock_clone = lock.clone();
    let condition_clone = condition.clone();
    let waiter = thread::spawn(move || {
        lock_clone.lock();
        tx.send(ThreadHandle::current()).unwrap();
        condition_clone.wait_uninterruptibly().unwrap();
        let interrupted = ThreadHandle::current().is_interrupted();
        lock_clone.unlock().unwrap();
        interrupted
    });

    let handle = rx.recv().unwrap();
    loop {
        lock.lock();
        let registered = condition.has_waiters().unwrap();
        lock.unlock().unwrap();
        if registered {
            break;
        }
        thread::yield_now();
    }

    // The interrupt must not end the wait; only the signal does.
    handle.interrupt();
    thread::sleep(Duration::from_millis(100));

    lock.lock();
    condition.signal().unwrap();
    lock.unlock().unwrap();

    assert!(waiter.join().unwrap());
}

#[test]
fn test_interrupted_timed_lock_is_distinct_from_timeout() {
    let lock = Arc::new(ReentrantLock::new());
    lock.lock();

    let (tx, rx) = std::sync::mpsc::channel();
    let lock_clone = lock.clone();
    let waiter = thread::spawn(move || {
        tx.send(ThreadHandle::current()).unwrap();
        lock_clone.try_lock_for(Duration::from_secs(10))
    });

    let handle = rx.recv().unwrap();
    while !lock.has_queued_threads() {
        thread::yield_now();
    }
    handle.interrupt();

    // Interrupted, not timed out and not acquired.
    assert_eq!(waiter.join().unwrap(), Err(SyncError::Interrupted));
    lock.unlock().unwrap();
}
