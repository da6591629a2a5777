//! The error taxonomy of the store: user-input errors are recoverable, while
//! `InvariantViolation` marks a debug-only invariant check that, if it ever
//! fires, means the store must be considered unusable.

use thiserror::Error;

/// Errors produced by the public surface of the store and its substrates.
#[derive(Debug, Error)]
pub enum PmaError {
    /// Out-of-range constructor parameters, `remove` on a variant that does
    /// not support it, `find(min, max)` with `min > max`, and similar.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A failed OS call inside the rewired memory substrate (`memfd_create`,
    /// `ftruncate`, `mmap`, `munmap`), or a misuse of the buffered pool's
    /// `swap_and_release` (neither or both addresses in the buffer zone).
    #[error("rewiring error: {message} (errno {errno})")]
    RewiringError { message: String, errno: i32 },

    /// `extend` would grow the rewired substrate past `max_memory`.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A detected mismatch between internal bookkeeping and the structures
    /// it describes (`sum(sizes) != cardinality`, an out-of-order
    /// separator, an orphaned scratch buffer). Fatal: the store that raises
    /// this should not be used further.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl PmaError {
    pub(crate) fn rewiring(message: impl Into<String>) -> PmaError {
        let errno = errno::errno().0;
        PmaError::RewiringError {
            message: message.into(),
            errno,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> PmaError {
        PmaError::InvalidArgument(message.into())
    }

    pub(crate) fn invariant(message: impl Into<String>) -> PmaError {
        PmaError::InvariantViolation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, PmaError>;
