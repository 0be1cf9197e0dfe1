/*!
 * Wait Nodes
 *
 * Queue entries representing one blocked thread's registration. A node
 * lives in exactly one queue at a time, either the synchronizer's
 * acquisition queue or a condition's wait queue, and moves between them
 * on signal. The status word is CAS'd to arbitrate signal-vs-timeout and
 * signal-vs-interrupt races.
 */

use crate::thread::ThreadHandle;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum NodeStatus {
    /// Queued on the synchronizer's acquisition queue.
    Waiting = 0,
    /// Queued on a condition's wait queue, awaiting a signal.
    Condition = 1,
    /// Abandoned by timeout or interrupt; skipped by wakeups.
    Cancelled = 2,
}

fn decode(raw: u8) -> NodeStatus {
    match raw {
        0 => NodeStatus::Waiting,
        1 => NodeStatus::Condition,
        _ => NodeStatus::Cancelled,
    }
}

pub(crate) struct WaitNode {
    thread: ThreadHandle,
    status: AtomicU8,
}

impl WaitNode {
    pub fn waiting(thread: ThreadHandle) -> Arc<Self> {
        Arc::new(Self {
            thread,
            status: AtomicU8::new(NodeStatus::Waiting as u8),
        })
    }

    pub fn condition(thread: ThreadHandle) -> Arc<Self> {
        Arc::new(Self {
            thread,
            status: AtomicU8::new(NodeStatus::Condition as u8),
        })
    }

    #[inline]
    pub fn thread(&self) -> &ThreadHandle {
        &self.thread
    }

    #[inline]
    pub fn status(&self) -> NodeStatus {
        decode(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: NodeStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Atomically move `from` -> `to`; returns whether this call won the
    /// transition.
    pub fn transition(&self, from: NodeStatus, to: NodeStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
