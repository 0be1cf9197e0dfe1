/*!
 * Error Types
 * Centralized error handling with thiserror
 */

use thiserror::Error;

/// Synchronization errors
///
/// Timeouts and full/empty queue states are ordinary values
/// (`bool`/`Option`/`Duration`), never errors, so callers can always tell
/// "timed out" from "was interrupted" from "succeeded".
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// A blocking call was interrupted while waiting. The thread's
    /// interrupt flag is consumed before this is returned.
    #[error("interrupted while waiting")]
    Interrupted,

    /// The calling thread does not hold the lock required for this
    /// operation (unlock, signal, or wait without ownership).
    #[error("lock is not held by the current thread")]
    NotOwner,

    /// Queue capacity must be positive.
    #[error("invalid queue capacity: {0}")]
    InvalidCapacity(usize),

    /// More initial elements were supplied than the queue can hold.
    #[error("initial elements ({provided}) exceed queue capacity ({capacity})")]
    CapacityExceeded { provided: usize, capacity: usize },
}

/// Result type for synchronization operations
pub type Result<T> = std::result::Result<T, SyncError>;
