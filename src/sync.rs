/*!
 * Queue Synchronizer
 *
 * Queue-based exclusive synchronization state machine: an atomic state
 * integer plus a FIFO queue of parked waiter nodes. Concrete locks supply
 * the acquire/release transitions through the `Protocol` trait; this
 * module owns queueing, parking, wakeup propagation, and cancellation.
 *
 * # Design
 *
 * The acquisition queue is serviced strictly from the head: a queued
 * thread retries its acquire only while it is the head node, and parks
 * otherwise. Releases unpark the head; cancelled nodes are unlinked
 * eagerly under the queue mutex and pass any wakeup aimed at them to the
 * next live node, so a cancellation can never strand later waiters.
 * Because the parking permit is binary and sticky, an unpark that races
 * ahead of the corresponding park is never lost.
 */

use crate::backoff;
use crate::errors::{Result, SyncError};
use crate::node::{NodeStatus, WaitNode};
use crate::thread::ThreadHandle;
use log::trace;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::hint;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Iteration cap for the randomized pre-queue spin on barging acquires.
const MAX_ACQUIRE_SPINS: u32 = 64;

/// Shared synchronization state visible to `Protocol` implementations
pub struct SyncState {
    /// 0 = free; for an exclusive lock, >0 counts reentrant holds.
    state: AtomicUsize,
    /// Id of the owning thread, 0 when free. Only ever meaningfully
    /// compared against the caller's own id, so relaxed ordering suffices;
    /// the state word carries the acquire/release edges.
    owner: AtomicU64,
    /// FIFO acquisition queue: appended at the tail, serviced from the
    /// head. Cancelled nodes are unlinked eagerly under this mutex.
    queue: Mutex<VecDeque<Arc<WaitNode>>>,
}

impl SyncState {
    fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
            owner: AtomicU64::new(0),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    #[inline]
    pub fn state(&self) -> usize {
        self.state.load(Ordering::Acquire)
    }

    /// Plain write; only valid while the caller holds the resource.
    #[inline]
    pub fn set_state(&self, value: usize) {
        self.state.store(value, Ordering::Release);
    }

    #[inline]
    pub fn cas_state(&self, current: usize, new: usize) -> bool {
        self.state
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn owner_id(&self) -> u64 {
        self.owner.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_owner(&self, id: u64) {
        self.owner.store(id, Ordering::Relaxed);
    }

    #[inline]
    pub fn clear_owner(&self) {
        self.owner.store(0, Ordering::Relaxed);
    }

    /// True when a thread other than `thread` is queued ahead of it.
    /// The fair policy consults this before a first acquisition.
    pub fn has_queued_predecessor(&self, thread: &ThreadHandle) -> bool {
        self.queue
            .lock()
            .front()
            .is_some_and(|node| node.thread().id() != thread.id())
    }

    pub fn has_waiters(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    pub fn waiter_count(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Acquire/release transitions supplied by a concrete lock
pub trait Protocol: Send + Sync {
    /// Attempt the state transition that takes the resource. Success means
    /// the calling thread now holds it.
    fn try_acquire(&self, state: &SyncState, thread: &ThreadHandle, acquires: usize) -> bool;

    /// Attempt the transition toward free. `Ok(true)` means the resource
    /// became fully free and a successor may be woken; `Err(NotOwner)`
    /// when the caller does not hold it.
    fn try_release(&self, state: &SyncState, thread: &ThreadHandle, releases: usize)
        -> Result<bool>;

    /// Whether contended acquires may spin briefly before queueing.
    /// Only meaningful for barging (non-fair) policies.
    fn spin_before_queueing(&self) -> bool {
        false
    }
}

/// FIFO-queue-based synchronizer parameterized by an acquire protocol
pub struct QueueSynchronizer<P: Protocol> {
    state: SyncState,
    protocol: P,
}

impl<P: Protocol> QueueSynchronizer<P> {
    pub fn new(protocol: P) -> Self {
        Self {
            state: SyncState::new(),
            protocol,
        }
    }

    #[inline]
    pub fn state(&self) -> &SyncState {
        &self.state
    }

    #[inline]
    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Single immediate attempt with no queueing.
    pub fn try_acquire_once(&self, acquires: usize) -> bool {
        let thread = ThreadHandle::current();
        self.protocol.try_acquire(&self.state, &thread, acquires)
    }

    /// Acquire, blocking uninterruptibly until the resource is held. An
    /// interrupt observed while waiting is re-asserted on the thread's
    /// flag before returning.
    pub fn acquire(&self, acquires: usize) {
        let thread = ThreadHandle::current();
        if self.protocol.try_acquire(&self.state, &thread, acquires) {
            return;
        }
        let outcome = self.acquire_slow(&thread, acquires, None, false);
        debug_assert!(matches!(outcome, Ok(true)));
    }

    /// Acquire, aborting with `SyncError::Interrupted` if the thread is
    /// interrupted before or while waiting.
    pub fn acquire_interruptibly(&self, acquires: usize) -> Result<()> {
        let thread = ThreadHandle::current();
        if thread.clear_interrupted() {
            return Err(SyncError::Interrupted);
        }
        if self.protocol.try_acquire(&self.state, &thread, acquires) {
            return Ok(());
        }
        self.acquire_slow(&thread, acquires, None, true).map(|_| ())
    }

    /// Bounded interruptible acquire. `Ok(false)` on expiry; interruption
    /// is reported separately so callers can tell the two apart.
    pub fn acquire_timed(&self, acquires: usize, timeout: Duration) -> Result<bool> {
        let thread = ThreadHandle::current();
        if thread.clear_interrupted() {
            return Err(SyncError::Interrupted);
        }
        if self.protocol.try_acquire(&self.state, &thread, acquires) {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }
        let deadline = Instant::now() + timeout;
        self.acquire_slow(&thread, acquires, Some(deadline), true)
    }

    /// Release `releases` units. `Ok(true)` when the resource became fully
    /// free, in which case the queue head is unparked to re-attempt.
    pub fn release(&self, releases: usize) -> Result<bool> {
        let thread = ThreadHandle::current();
        if self.protocol.try_release(&self.state, &thread, releases)? {
            self.unpark_head();
            return Ok(true);
        }
        Ok(false)
    }

    /// Release every reentrant hold at once, returning the saved count so
    /// a condition waiter can restore it when it re-acquires.
    pub(crate) fn fully_release(&self) -> Result<usize> {
        let thread = ThreadHandle::current();
        let saved = self.state.state();
        if self.protocol.try_release(&self.state, &thread, saved)? {
            self.unpark_head();
            Ok(saved)
        } else {
            // try_release succeeding without freeing means `saved` missed
            // holds, which cannot happen while we own the resource.
            Err(SyncError::NotOwner)
        }
    }

    pub fn has_waiters(&self) -> bool {
        self.state.has_waiters()
    }

    pub fn waiter_count(&self) -> usize {
        self.state.waiter_count()
    }

    /// Push a node a condition variable is transferring into the
    /// acquisition queue. The node keeps its identity so the waiting
    /// thread finishes its acquire with the queue position from signal
    /// time.
    pub(crate) fn enqueue_transferred(&self, node: Arc<WaitNode>) {
        self.state.queue.lock().push_back(node);
    }

    /// Finish acquiring for a node already placed in the queue by a
    /// condition transfer. Uninterruptible; returns whether an interrupt
    /// was observed while waiting.
    pub(crate) fn acquire_transferred(&self, node: Arc<WaitNode>, acquires: usize) -> bool {
        let thread = ThreadHandle::current();
        let mut interrupted = false;
        loop {
            if self.head_is(&node) && self.protocol.try_acquire(&self.state, &thread, acquires) {
                self.dequeue_head(&node);
                return interrupted;
            }
            thread.park();
            if thread.clear_interrupted() {
                interrupted = true;
            }
        }
    }

    fn acquire_slow(
        &self,
        thread: &ThreadHandle,
        acquires: usize,
        deadline: Option<Instant>,
        interruptible: bool,
    ) -> Result<bool> {
        // Contended locks are often released within a few hundred cycles;
        // barging policies spin a jittered beat before paying for a queue
        // entry and a park.
        if self.protocol.spin_before_queueing() {
            for _ in 0..backoff::spins(MAX_ACQUIRE_SPINS) {
                hint::spin_loop();
                if self.protocol.try_acquire(&self.state, thread, acquires) {
                    return Ok(true);
                }
            }
        }

        let node = WaitNode::waiting(thread.clone());
        self.state.queue.lock().push_back(node.clone());
        self.acquire_queued(thread, node, acquires, deadline, interruptible)
    }

    /// Core queued-acquire loop: retry at the head, park otherwise.
    fn acquire_queued(
        &self,
        thread: &ThreadHandle,
        node: Arc<WaitNode>,
        acquires: usize,
        deadline: Option<Instant>,
        interruptible: bool,
    ) -> Result<bool> {
        let mut interrupted = false;
        loop {
            if self.head_is(&node) && self.protocol.try_acquire(&self.state, thread, acquires) {
                self.dequeue_head(&node);
                if interrupted {
                    thread.set_interrupted();
                }
                return Ok(true);
            }

            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        self.cancel(&node);
                        if interrupted {
                            thread.set_interrupted();
                        }
                        return Ok(false);
                    }
                    thread.park_until(deadline);
                }
                None => thread.park(),
            }

            if thread.clear_interrupted() {
                if interruptible {
                    self.cancel(&node);
                    return Err(SyncError::Interrupted);
                }
                interrupted = true;
            }
        }
    }

    fn head_is(&self, node: &Arc<WaitNode>) -> bool {
        self.state
            .queue
            .lock()
            .front()
            .is_some_and(|head| Arc::ptr_eq(head, node))
    }

    /// Unlink our own node from the head after a successful acquire. The
    /// node stays at the head throughout: only the head thread dequeues
    /// itself, and other threads only ever cancel their own (non-head)
    /// nodes behind it.
    fn dequeue_head(&self, node: &Arc<WaitNode>) {
        let mut queue = self.state.queue.lock();
        debug_assert!(queue.front().is_some_and(|head| Arc::ptr_eq(head, node)));
        queue.pop_front();
    }

    /// Abandon a queued node after timeout or interrupt: mark it
    /// cancelled, unlink it, and pass any wakeup aimed at it to the next
    /// live node so later waiters are never left permanently stuck.
    fn cancel(&self, node: &Arc<WaitNode>) {
        node.set_status(NodeStatus::Cancelled);
        let successor = {
            let mut queue = self.state.queue.lock();
            let was_head = queue.front().is_some_and(|head| Arc::ptr_eq(head, node));
            queue.retain(|n| !Arc::ptr_eq(n, node));
            if was_head {
                queue.front().cloned()
            } else {
                None
            }
        };
        trace!("cancelled queued waiter for thread {}", node.thread().id());
        if let Some(next) = successor {
            next.thread().unpark();
        }
    }

    fn unpark_head(&self) {
        if let Some(head) = self.state.queue.lock().front() {
            head.thread().unpark();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    /// Minimal non-reentrant binary protocol for exercising the queue
    /// machinery in isolation.
    struct BinaryMutex;

    impl Protocol for BinaryMutex {
        fn try_acquire(&self, state: &SyncState, thread: &ThreadHandle, _acquires: usize) -> bool {
            if state.cas_state(0, 1) {
                state.set_owner(thread.id());
                true
            } else {
                false
            }
        }

        fn try_release(
            &self,
            state: &SyncState,
            thread: &ThreadHandle,
            _releases: usize,
        ) -> Result<bool> {
            if state.owner_id() != thread.id() {
                return Err(SyncError::NotOwner);
            }
            state.clear_owner();
            state.set_state(0);
            Ok(true)
        }

        fn spin_before_queueing(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_mutual_exclusion_under_contention() {
        let sync = Arc::new(QueueSynchronizer::new(BinaryMutex));
        let inside = Arc::new(AtomicBool::new(false));
        let violations = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sync = sync.clone();
                let inside = inside.clone();
                let violations = violations.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        sync.acquire(1);
                        if inside.swap(true, Ordering::SeqCst) {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        inside.store(false, Ordering::SeqCst);
                        sync.release(1).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert_eq!(sync.state().state(), 0);
        assert!(!sync.has_waiters());
    }

    #[test]
    fn test_release_by_non_owner_is_rejected() {
        let sync = Arc::new(QueueSynchronizer::new(BinaryMutex));
        sync.acquire(1);

        let sync_clone = sync.clone();
        let result = thread::spawn(move || sync_clone.release(1)).join().unwrap();
        assert_eq!(result, Err(SyncError::NotOwner));

        sync.release(1).unwrap();
    }

    #[test]
    fn test_acquire_timed_expires() {
        let sync = Arc::new(QueueSynchronizer::new(BinaryMutex));
        sync.acquire(1);

        let sync_clone = sync.clone();
        let acquired = thread::spawn(move || {
            sync_clone.acquire_timed(1, Duration::from_millis(50))
        })
        .join()
        .unwrap();

        assert_eq!(acquired, Ok(false));
        assert!(!sync.has_waiters());
        sync.release(1).unwrap();
    }

    #[test]
    fn test_interrupt_unwinds_queued_node() {
        let sync = Arc::new(QueueSynchronizer::new(BinaryMutex));
        sync.acquire(1);

        let (tx, rx) = std::sync::mpsc::channel();
        let sync_clone = sync.clone();
        let waiter = thread::spawn(move || {
            tx.send(ThreadHandle::current()).unwrap();
            sync_clone.acquire_interruptibly(1)
        });

        let handle = rx.recv().unwrap();
        while !sync.has_waiters() {
            thread::yield_now();
        }
        handle.interrupt();

        assert_eq!(waiter.join().unwrap(), Err(SyncError::Interrupted));
        // The cancelled node must be gone, not lingering as a phantom
        // blocked successor.
        assert!(!sync.has_waiters());
        sync.release(1).unwrap();
    }

    #[test]
    fn test_release_hands_off_to_queued_waiter() {
        let sync = Arc::new(QueueSynchronizer::new(BinaryMutex));
        sync.acquire(1);

        let sync_clone = sync.clone();
        let waiter = thread::spawn(move || {
            sync_clone.acquire(1);
            sync_clone.release(1).unwrap();
        });

        while !sync.has_waiters() {
            thread::yield_now();
        }
        sync.release(1).unwrap();
        waiter.join().unwrap();
        assert_eq!(sync.state().state(), 0);
    }
}
