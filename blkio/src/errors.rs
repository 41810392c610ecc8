// SPDX-License-Identifier: MIT

use thiserror::Error;

/// Result type for BlockIO operations.
pub type BlockIOResult<T = ()> = core::result::Result<T, BlockIOError>;

/// Error type for BlockIO operations.
#[derive(Debug, Error)]
pub enum BlockIOError {
    /// Underlying device I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Attempted to read or write out of bounds.
    #[error("Out of bounds")]
    OutOfBounds,

    /// The backend cannot perform this operation.
    #[error("Unsupported operation")]
    Unsupported,

    /// The device (or the kernel) refused because it is in use.
    #[error("Device busy")]
    Busy,

    #[error("{0}")]
    Other(&'static str),
}

impl BlockIOError {
    #[inline]
    pub fn is_busy(&self) -> bool {
        matches!(self, BlockIOError::Busy)
    }
}

impl From<&'static str> for BlockIOError {
    #[inline]
    fn from(msg: &'static str) -> Self {
        BlockIOError::Other(msg)
    }
}
