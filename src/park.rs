/*!
 * Thread Parker
 *
 * Per-thread single-permit blocking primitive built on parking_lot_core.
 * On Linux the underlying parking maps to futex syscalls for minimal
 * overhead.
 *
 * # Design
 *
 * A three-state atomic (`EMPTY`/`NOTIFIED`/`PARKED`) whose address serves
 * as the park key. `unpark` makes the single permit available; `park`
 * consumes it, blocking first if none is present. Permits are binary:
 * issuing any number of unparks before a park consumes them has the same
 * effect as issuing one.
 */

use parking_lot_core::{park, unpark_one, ParkToken, UnparkToken};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

const EMPTY: usize = 0;
const NOTIFIED: usize = 1;
const PARKED: usize = 2;

/// Single-permit parking primitive for one thread
///
/// `park` must only be called by the thread the parker belongs to;
/// `unpark` may be called from any thread.
pub struct Parker {
    state: AtomicUsize,
}

impl Parker {
    pub const fn new() -> Self {
        Self {
            state: AtomicUsize::new(EMPTY),
        }
    }

    /// Stable parking key (the address of the state word, as in the
    /// parking-lot bucket scheme).
    #[inline]
    fn key(&self) -> usize {
        &self.state as *const AtomicUsize as usize
    }

    /// Block the calling thread until the permit is available, consuming it.
    ///
    /// Returns when a matching `unpark` has been issued, or spuriously with
    /// no cause; callers must re-check their condition in a loop.
    pub fn park(&self) {
        self.park_inner(None);
    }

    /// As `park`, but give up once `deadline` passes.
    ///
    /// Returns `false` only when the deadline elapsed with no permit
    /// consumed.
    pub fn park_until(&self, deadline: Instant) -> bool {
        self.park_inner(Some(deadline))
    }

    fn park_inner(&self, deadline: Option<Instant>) -> bool {
        // Fast path: consume an already-available permit without parking.
        if self
            .state
            .compare_exchange(NOTIFIED, EMPTY, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return true;
        }

        // The validate callback runs under the parking-lot bucket lock, so
        // an unpark that lands after the fast path either fails our CAS here
        // (permit visible below) or finds us in the queue.
        let _ = unsafe {
            park(
                self.key(),
                || {
                    self.state
                        .compare_exchange(EMPTY, PARKED, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                },
                || {},
                |_, _| {},
                ParkToken(0),
                deadline,
            )
        };

        // Fold the state back to EMPTY whatever happened; the permit was
        // consumed exactly when an unpark set NOTIFIED.
        self.state.swap(EMPTY, Ordering::Acquire) == NOTIFIED
    }

    /// Make the permit available, waking the owning thread if it is parked.
    pub fn unpark(&self) {
        // Permits do not accumulate: NOTIFIED -> NOTIFIED is a no-op.
        if self.state.swap(NOTIFIED, Ordering::Release) == PARKED {
            unsafe {
                unpark_one(self.key(), |_| UnparkToken(0));
            }
        }
    }
}

impl Default for Parker {
    fn default() -> Self {
        Self::new()
    }
}
