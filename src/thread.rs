/*!
 * Thread Handles
 *
 * Opaque, comparable per-thread identity carrying the interrupt flag and
 * the thread's parker. Stored as plain data in wait-queue nodes and the
 * lock's owner slot; compared by id value, never by reference identity.
 */

use crate::park::Parker;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic id source; 0 is reserved as the "no owner" sentinel.
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: ThreadHandle = ThreadHandle::alloc();
}

struct ThreadInner {
    id: u64,
    interrupted: AtomicBool,
    parker: Parker,
}

/// Handle to a thread participating in synchronization
///
/// Cloning is cheap (one `Arc` bump) and every clone refers to the same
/// underlying thread: same id, same interrupt flag, same parker.
#[derive(Clone)]
pub struct ThreadHandle {
    inner: Arc<ThreadInner>,
}

impl ThreadHandle {
    fn alloc() -> Self {
        Self {
            inner: Arc::new(ThreadInner {
                id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
                interrupted: AtomicBool::new(false),
                parker: Parker::new(),
            }),
        }
    }

    /// Handle for the calling thread, created on first use.
    pub fn current() -> Self {
        CURRENT.with(|handle| handle.clone())
    }

    /// Process-unique id of this thread (never 0).
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Interrupt the thread: set its interrupt flag and wake it if it is
    /// parked. Blocked operations observe the flag after waking; `park`
    /// itself never fails.
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::Release);
        self.inner.parker.unpark();
    }

    /// Read the interrupt flag without consuming it.
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::Acquire)
    }

    /// Consume the interrupt flag, returning whether it was set.
    pub fn clear_interrupted(&self) -> bool {
        self.inner.interrupted.swap(false, Ordering::AcqRel)
    }

    /// Re-assert the interrupt flag (used by uninterruptible waits that
    /// observed an interrupt and must preserve it for the caller).
    pub fn set_interrupted(&self) {
        self.inner.interrupted.store(true, Ordering::Release);
    }

    /// Make this thread's permit available.
    pub fn unpark(&self) {
        self.inner.parker.unpark();
    }

    /// Park the calling thread (must be the thread this handle refers to).
    /// Returns immediately when the interrupt flag is already set.
    pub(crate) fn park(&self) {
        if self.is_interrupted() {
            return;
        }
        self.inner.parker.park();
    }

    /// As `park`, bounded by `deadline`. Returns `false` only on timeout
    /// with no permit consumed.
    pub(crate) fn park_until(&self, deadline: Instant) -> bool {
        if self.is_interrupted() {
            return true;
        }
        self.inner.parker.park_until(deadline)
    }
}

impl PartialEq for ThreadHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ThreadHandle {}

impl std::hash::Hash for ThreadHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("id", &self.inner.id)
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}
