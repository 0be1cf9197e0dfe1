/*!
 * Bounded Blocking Queue
 *
 * Fixed-capacity FIFO ring buffer protected by one reentrant lock and
 * two condition variables (`not_empty`, `not_full`). Every mutating
 * operation holds the lock for its entire duration; there is no
 * lock-free fast path, which is what makes `len` exact rather than
 * approximate.
 */

use crate::condition::ConditionVariable;
use crate::errors::{Result, SyncError};
use crate::lock::ReentrantLock;
use log::debug;
use std::cell::UnsafeCell;
use std::fmt;

/// Slot array with head/tail indices mod capacity
struct Ring<T> {
    items: Box<[Option<T>]>,
    /// Next read position.
    head: usize,
    /// Next write position.
    tail: usize,
    count: usize,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        let mut items = Vec::with_capacity(capacity);
        items.resize_with(capacity, || None);
        Self {
            items: items.into_boxed_slice(),
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.items.len()
    }

    fn enqueue(&mut self, item: T) {
        debug_assert!(self.count < self.capacity());
        self.items[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.capacity();
        self.count += 1;
    }

    fn dequeue(&mut self) -> T {
        debug_assert!(self.count > 0);
        let item = self.items[self.head]
            .take()
            .expect("slot in [head, head+count) must be occupied");
        self.head = (self.head + 1) % self.capacity();
        self.count -= 1;
        item
    }
}

/// Fixed-capacity blocking FIFO queue
///
/// Blocking `put`/`take` are interruptible; `offer`/`poll`/`peek` never
/// block and report full/empty as ordinary values, never as errors.
pub struct BoundedBlockingQueue<T> {
    lock: ReentrantLock,
    not_empty: ConditionVariable,
    not_full: ConditionVariable,
    capacity: usize,
    /// Touched only while `lock` is held.
    ring: UnsafeCell<Ring<T>>,
}

// The ring is only ever accessed under the lock, so the container is as
// thread-safe as its elements are sendable.
unsafe impl<T: Send> Send for BoundedBlockingQueue<T> {}
unsafe impl<T: Send> Sync for BoundedBlockingQueue<T> {}

impl<T> BoundedBlockingQueue<T> {
    /// Non-fair queue with the given capacity.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_fairness(capacity, false)
    }

    /// Queue whose internal lock uses the given fairness policy.
    pub fn with_fairness(capacity: usize, fair: bool) -> Result<Self> {
        if capacity == 0 {
            return Err(SyncError::InvalidCapacity(capacity));
        }
        let lock = ReentrantLock::with_fairness(fair);
        let not_empty = lock.new_condition();
        let not_full = lock.new_condition();
        debug!("bounded queue created: capacity={capacity} fair={fair}");
        Ok(Self {
            lock,
            not_empty,
            not_full,
            capacity,
            ring: UnsafeCell::new(Ring::with_capacity(capacity)),
        })
    }

    /// Queue pre-filled from `initial` in iteration order. Rejects a
    /// source larger than `capacity`.
    pub fn with_initial(
        capacity: usize,
        fair: bool,
        initial: impl IntoIterator<Item = T>,
    ) -> Result<Self> {
        let queue = Self::with_fairness(capacity, fair)?;
        let items: Vec<T> = initial.into_iter().collect();
        if items.len() > capacity {
            return Err(SyncError::CapacityExceeded {
                provided: items.len(),
                capacity,
            });
        }
        queue.lock.lock();
        // Safety: lock held.
        let ring = unsafe { &mut *queue.ring.get() };
        for item in items {
            ring.enqueue(item);
        }
        queue.unlock_held();
        Ok(queue)
    }

    /// Non-blocking insert. Returns the element back when the queue is
    /// full instead of dropping it.
    pub fn offer(&self, item: T) -> std::result::Result<(), T> {
        self.lock.lock();
        // Safety: lock held.
        let ring = unsafe { &mut *self.ring.get() };
        let result = if ring.count == ring.capacity() {
            Err(item)
        } else {
            ring.enqueue(item);
            self.signal_held(&self.not_empty);
            Ok(())
        };
        self.unlock_held();
        result
    }

    /// Blocking insert: waits (interruptibly) on `not_full` while the
    /// queue is at capacity.
    pub fn put(&self, item: T) -> Result<()> {
        self.lock.lock_interruptibly()?;
        let result = self.put_held(item);
        self.unlock_held();
        result
    }

    fn put_held(&self, item: T) -> Result<()> {
        // Safety: lock held; the borrow is re-taken after every wait
        // because waiting releases the lock.
        while unsafe { &*self.ring.get() }.count == self.capacity() {
            self.not_full.wait()?;
        }
        unsafe { &mut *self.ring.get() }.enqueue(item);
        self.signal_held(&self.not_empty);
        Ok(())
    }

    /// Non-blocking removal; `None` when empty.
    pub fn poll(&self) -> Option<T> {
        self.lock.lock();
        // Safety: lock held.
        let ring = unsafe { &mut *self.ring.get() };
        let item = if ring.count == 0 {
            None
        } else {
            let item = ring.dequeue();
            self.signal_held(&self.not_full);
            Some(item)
        };
        self.unlock_held();
        item
    }

    /// Blocking removal: waits (interruptibly) on `not_empty` while the
    /// queue is empty.
    pub fn take(&self) -> Result<T> {
        self.lock.lock_interruptibly()?;
        let result = self.take_held();
        self.unlock_held();
        result
    }

    fn take_held(&self) -> Result<T> {
        // Safety: lock held; see put_held.
        while unsafe { &*self.ring.get() }.count == 0 {
            self.not_empty.wait()?;
        }
        let item = unsafe { &mut *self.ring.get() }.dequeue();
        self.signal_held(&self.not_full);
        Ok(item)
    }

    /// Exact number of buffered elements.
    pub fn len(&self) -> usize {
        self.lock.lock();
        // Safety: lock held.
        let count = unsafe { &*self.ring.get() }.count;
        self.unlock_held();
        count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Fixed capacity this queue was constructed with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Signal a condition while the lock is known to be held.
    fn signal_held(&self, condition: &ConditionVariable) {
        condition
            .signal()
            .expect("signalling with the lock held cannot fail");
    }

    fn unlock_held(&self) {
        self.lock
            .unlock()
            .expect("unlock on the owning thread cannot fail");
    }
}

impl<T: Clone> BoundedBlockingQueue<T> {
    /// Copy of the head element without removing it; `None` when empty.
    pub fn peek(&self) -> Option<T> {
        self.lock.lock();
        // Safety: lock held.
        let ring = unsafe { &*self.ring.get() };
        let item = if ring.count == 0 {
            None
        } else {
            ring.items[ring.head].clone()
        };
        self.unlock_held();
        item
    }
}

impl<T> fmt::Debug for BoundedBlockingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedBlockingQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
