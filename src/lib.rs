/*!
 * qsync - Queue-Based Thread Synchronization
 *
 * Small, self-contained synchronization library for raw OS threads:
 * a per-thread parking primitive, a FIFO-queue-based exclusive
 * synchronizer, a reentrant lock (fair and non-fair) with condition
 * variables, and a bounded blocking queue built on top of them.
 *
 * # Architecture
 *
 * Leaves first: `Parker` blocks and wakes single threads with a binary
 * permit; `QueueSynchronizer` layers an atomic state integer and a FIFO
 * wait queue on top of it, with the acquire/release transitions supplied
 * by a `Protocol` implementation; `ReentrantLock` and `ConditionVariable`
 * are the concrete exclusive protocol; `BoundedBlockingQueue` combines
 * one lock and two conditions into a blocking ring buffer.
 */

pub mod backoff;
pub mod condition;
pub mod errors;
pub mod lock;
pub mod park;
pub mod queue;
pub mod sync;
pub mod thread;

mod node;

// Re-exports
pub use condition::ConditionVariable;
pub use errors::{Result, SyncError};
pub use lock::ReentrantLock;
pub use park::Parker;
pub use queue::BoundedBlockingQueue;
pub use sync::{Protocol, QueueSynchronizer, SyncState};
pub use thread::ThreadHandle;
