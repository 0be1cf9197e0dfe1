/*!
 * Condition Variables
 *
 * Per-lock wait queues bound to a reentrant lock's synchronizer. A
 * waiter saves its full reentrancy count, releases the lock outright,
 * and parks on the condition queue; `signal` moves the head node into
 * the synchronizer's acquisition queue, where the woken thread contends
 * for the lock like any other acquirer.
 *
 * Every operation requires the associated lock to be held. A signal
 * issued before any waiter has registered is a no-op, never a deadlock:
 * the waiter simply was never queued.
 */

use crate::errors::{Result, SyncError};
use crate::lock::ReentrantPolicy;
use crate::node::{NodeStatus, WaitNode};
use crate::sync::QueueSynchronizer;
use crate::thread::ThreadHandle;
use log::trace;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Condition wait queue bound to one reentrant lock
pub struct ConditionVariable {
    sync: Arc<QueueSynchronizer<ReentrantPolicy>>,
    /// FIFO wait queue, distinct from the acquisition queue. Nodes move
    /// out on signal (transfer) or are unlinked by their own waiter on
    /// timeout/interrupt.
    waiters: Mutex<VecDeque<Arc<WaitNode>>>,
}

impl ConditionVariable {
    pub(crate) fn new(sync: Arc<QueueSynchronizer<ReentrantPolicy>>) -> Self {
        Self {
            sync,
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    fn check_owner(&self, thread: &ThreadHandle) -> Result<()> {
        if self.sync.state().owner_id() != thread.id() {
            return Err(SyncError::NotOwner);
        }
        Ok(())
    }

    /// Release the lock and wait until signalled or interrupted. The lock
    /// is re-acquired, with its saved reentrancy count restored, before
    /// this returns on every path.
    pub fn wait(&self) -> Result<()> {
        self.do_wait(None, true).map(|_| ())
    }

    /// As `wait`, but an interrupt only marks the thread's flag instead of
    /// aborting the wait.
    pub fn wait_uninterruptibly(&self) -> Result<()> {
        self.do_wait(None, false).map(|_| ())
    }

    /// Bounded wait returning the time remaining until the deadline;
    /// `Duration::ZERO` means the deadline elapsed with no signal (the
    /// waiter unlinked its own node).
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Duration> {
        let deadline = Instant::now() + timeout;
        let signalled = self.do_wait(Some(deadline), true)?;
        if signalled {
            Ok(deadline.saturating_duration_since(Instant::now()))
        } else {
            Ok(Duration::ZERO)
        }
    }

    /// Bounded wait; `Ok(true)` when signalled before the timeout.
    pub fn wait_for(&self, timeout: Duration) -> Result<bool> {
        self.do_wait(Some(Instant::now() + timeout), true)
    }

    /// Bounded wait against an absolute deadline; `Ok(true)` when
    /// signalled before it passes.
    pub fn wait_until(&self, deadline: Instant) -> Result<bool> {
        self.do_wait(Some(deadline), true)
    }

    /// Move the longest-waiting node into the acquisition queue and wake
    /// its thread. No-op when no waiter is registered.
    pub fn signal(&self) -> Result<()> {
        self.check_owner(&ThreadHandle::current())?;
        self.transfer_one();
        Ok(())
    }

    /// Transfer every queued waiter, in FIFO order.
    pub fn signal_all(&self) -> Result<()> {
        self.check_owner(&ThreadHandle::current())?;
        let drained = std::mem::take(&mut *self.waiters.lock());
        for node in drained {
            self.transfer(node);
        }
        Ok(())
    }

    /// Whether any thread is waiting on this condition.
    pub fn has_waiters(&self) -> Result<bool> {
        self.waiter_count().map(|count| count > 0)
    }

    /// Number of threads waiting on this condition.
    pub fn waiter_count(&self) -> Result<usize> {
        self.check_owner(&ThreadHandle::current())?;
        let count = self
            .waiters
            .lock()
            .iter()
            .filter(|node| node.status() == NodeStatus::Condition)
            .count();
        Ok(count)
    }

    fn transfer_one(&self) -> bool {
        loop {
            let node = self.waiters.lock().pop_front();
            let Some(node) = node else {
                return false;
            };
            if self.transfer(node) {
                return true;
            }
            // Cancelled in the meantime; try the next waiter.
        }
    }

    /// Move one node into the acquisition queue if it is still waiting.
    /// The caller holds the lock, so the woken thread cannot race past us:
    /// its acquire attempt fails until the lock is released.
    fn transfer(&self, node: Arc<WaitNode>) -> bool {
        if !node.transition(NodeStatus::Condition, NodeStatus::Waiting) {
            return false;
        }
        trace!(
            "transferring condition waiter {} to acquisition queue",
            node.thread().id()
        );
        let target = node.thread().clone();
        self.sync.enqueue_transferred(node);
        target.unpark();
        true
    }

    fn remove_waiter(&self, node: &Arc<WaitNode>) {
        self.waiters.lock().retain(|n| !Arc::ptr_eq(n, node));
    }

    /// Core wait loop. Returns `Ok(true)` when signalled, `Ok(false)` on
    /// timeout; `Err(Interrupted)` only when `interruptible` and the
    /// interrupt arrived before any signal.
    fn do_wait(&self, deadline: Option<Instant>, interruptible: bool) -> Result<bool> {
        let thread = ThreadHandle::current();
        self.check_owner(&thread)?;
        if interruptible && thread.clear_interrupted() {
            return Err(SyncError::Interrupted);
        }

        let node = WaitNode::condition(thread.clone());
        self.waiters.lock().push_back(node.clone());

        let saved = match self.sync.fully_release() {
            Ok(saved) => saved,
            Err(err) => {
                // The wait never started; roll back the registration.
                node.set_status(NodeStatus::Cancelled);
                self.remove_waiter(&node);
                return Err(err);
            }
        };

        let mut interrupted_before_signal = false;
        let mut reassert_interrupt = false;
        let mut timed_out = false;

        loop {
            if node.status() != NodeStatus::Condition {
                // Transferred into the acquisition queue by a signal.
                break;
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    if node.transition(NodeStatus::Condition, NodeStatus::Cancelled) {
                        self.remove_waiter(&node);
                        timed_out = true;
                    }
                    // Losing the race means a signal transferred the node
                    // right at the deadline; treat that as signalled.
                    break;
                }
                thread.park_until(deadline);
            } else {
                thread.park();
            }

            if thread.clear_interrupted() {
                if !interruptible {
                    reassert_interrupt = true;
                    continue;
                }
                if node.transition(NodeStatus::Condition, NodeStatus::Cancelled) {
                    self.remove_waiter(&node);
                    interrupted_before_signal = true;
                } else {
                    // A signal won first; return normally with the
                    // interrupt flag left set for the caller.
                    reassert_interrupt = true;
                }
                break;
            }
        }

        // Re-acquire the lock, restoring the saved reentrancy count. A
        // transferred node finishes its acquire in place so the queue
        // position from signal time holds; a cancelled one queues afresh.
        if node.status() == NodeStatus::Waiting {
            if self.sync.acquire_transferred(node, saved) {
                reassert_interrupt = true;
            }
        } else {
            self.sync.acquire(saved);
        }

        if interrupted_before_signal {
            return Err(SyncError::Interrupted);
        }
        if reassert_interrupt {
            thread.set_interrupted();
        }
        Ok(!timed_out)
    }
}
