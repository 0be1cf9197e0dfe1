/*!
 * Reentrant Lock
 *
 * Exclusive lock over the queue synchronizer with fair and non-fair
 * acquisition policies. The owning thread may re-acquire freely; the
 * lock frees only when every reentrant hold has been released.
 *
 * Fair mode guarantees FIFO service among contended acquirers. Non-fair
 * mode lets an arriving thread barge ahead of the queue when the lock
 * happens to be free, trading strict ordering for lower handoff latency.
 */

use crate::condition::ConditionVariable;
use crate::errors::{Result, SyncError};
use crate::sync::{Protocol, QueueSynchronizer, SyncState};
use crate::thread::ThreadHandle;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Acquire/release policy for exclusive reentrant ownership
pub(crate) struct ReentrantPolicy {
    fair: bool,
}

impl ReentrantPolicy {
    /// Barging attempt: take the lock if it is free or already ours,
    /// ignoring queue order. Shared by the non-fair path and `try_lock`.
    fn try_barge(&self, state: &SyncState, thread: &ThreadHandle, acquires: usize) -> bool {
        let current = state.state();
        if current == 0 {
            if state.cas_state(0, acquires) {
                state.set_owner(thread.id());
                return true;
            }
            return false;
        }
        if state.owner_id() == thread.id() {
            self.bump_holds(state, current, acquires);
            return true;
        }
        false
    }

    /// Reentrant re-acquisition by the owner; overflow of the hold count
    /// is an unrecoverable programming error.
    fn bump_holds(&self, state: &SyncState, current: usize, acquires: usize) {
        let next = current
            .checked_add(acquires)
            .unwrap_or_else(|| panic!("maximum lock count exceeded"));
        state.set_state(next);
    }
}

impl Protocol for ReentrantPolicy {
    fn try_acquire(&self, state: &SyncState, thread: &ThreadHandle, acquires: usize) -> bool {
        if !self.fair {
            return self.try_barge(state, thread, acquires);
        }
        let current = state.state();
        if current == 0 {
            // A fair first acquisition yields to earlier-queued threads.
            if state.has_queued_predecessor(thread) {
                return false;
            }
            if state.cas_state(0, acquires) {
                state.set_owner(thread.id());
                return true;
            }
            return false;
        }
        if state.owner_id() == thread.id() {
            self.bump_holds(state, current, acquires);
            return true;
        }
        false
    }

    fn try_release(
        &self,
        state: &SyncState,
        thread: &ThreadHandle,
        releases: usize,
    ) -> Result<bool> {
        if state.owner_id() != thread.id() {
            return Err(SyncError::NotOwner);
        }
        let remaining = state.state() - releases;
        if remaining == 0 {
            // Clear ownership before publishing the free state.
            state.clear_owner();
            state.set_state(0);
            Ok(true)
        } else {
            state.set_state(remaining);
            Ok(false)
        }
    }

    fn spin_before_queueing(&self) -> bool {
        !self.fair
    }
}

/// Reentrant mutual-exclusion lock
///
/// Unlike a poisoning `std`-style mutex this lock does not guard data;
/// it pairs with [`ConditionVariable`]s and explicit `unlock` calls,
/// which is what the blocking queue is built from.
pub struct ReentrantLock {
    sync: Arc<QueueSynchronizer<ReentrantPolicy>>,
}

impl ReentrantLock {
    /// Non-fair lock (the default policy: lowest handoff latency).
    pub fn new() -> Self {
        Self::with_fairness(false)
    }

    /// Fair lock: contended acquisitions are served strictly FIFO.
    pub fn fair() -> Self {
        Self::with_fairness(true)
    }

    pub fn with_fairness(fair: bool) -> Self {
        Self {
            sync: Arc::new(QueueSynchronizer::new(ReentrantPolicy { fair })),
        }
    }

    /// Block until the lock is held, ignoring interrupts (an interrupt
    /// observed while waiting is re-asserted on the thread's flag).
    pub fn lock(&self) {
        self.sync.acquire(1);
    }

    /// Block until the lock is held or the thread is interrupted.
    pub fn lock_interruptibly(&self) -> Result<()> {
        self.sync.acquire_interruptibly(1)
    }

    /// Immediate non-blocking probe. Always barges, even on a fair lock:
    /// queueing for a best-effort attempt would defeat its purpose, and
    /// callers depend on this observable behavior.
    pub fn try_lock(&self) -> bool {
        let thread = ThreadHandle::current();
        self.sync
            .protocol()
            .try_barge(self.sync.state(), &thread, 1)
    }

    /// Bounded wait; `Ok(false)` on expiry, `Err(Interrupted)` when the
    /// waiting thread is interrupted.
    pub fn try_lock_for(&self, timeout: Duration) -> Result<bool> {
        self.sync.acquire_timed(1, timeout)
    }

    /// Release one reentrant hold. Fails with `SyncError::NotOwner` when
    /// the calling thread does not hold the lock.
    pub fn unlock(&self) -> Result<()> {
        self.sync.release(1).map(|_| ())
    }

    /// New condition variable bound to this lock.
    pub fn new_condition(&self) -> ConditionVariable {
        ConditionVariable::new(Arc::clone(&self.sync))
    }

    pub fn is_fair(&self) -> bool {
        self.sync.protocol().fair
    }

    pub fn is_locked(&self) -> bool {
        self.sync.state().state() > 0
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.sync.state().owner_id() == ThreadHandle::current().id()
    }

    /// Number of reentrant holds by the calling thread (0 when not held).
    pub fn hold_count(&self) -> usize {
        if self.is_held_by_current_thread() {
            self.sync.state().state()
        } else {
            0
        }
    }

    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_waiters()
    }

    /// Number of threads currently queued for this lock (diagnostic; the
    /// value can be stale by the time it is read).
    pub fn queue_length(&self) -> usize {
        self.sync.waiter_count()
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReentrantLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantLock")
            .field("fair", &self.is_fair())
            .field("locked", &self.is_locked())
            .finish()
    }
}
