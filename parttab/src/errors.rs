// SPDX-License-Identifier: MIT

use blkio::errors::BlockIOError;
use thiserror::Error;

/// Unified error type for the partition table engine (MBR, EMBR, GPT, APM).
#[derive(Debug, Error)]
pub enum PartError {
    #[error("I/O error: {0}")]
    Io(BlockIOError),

    /// The device, or the kernel, refused because it is in use.
    #[error("device busy")]
    Busy,

    /// No recognizable partition table: safe to create one.
    #[error("no partition table found")]
    ScrubNeeded,

    /// A table signature is present but its fields violate an invariant.
    #[error("malformed partition table: {0}")]
    Malformed(&'static str),

    /// A single on-disk field could not be decoded.
    #[error("malformed field: {0}")]
    MalformedField(&'static str),

    #[error("no partition at the given offset")]
    NotFound,

    #[error("not enough space: {0}")]
    NoSpace(&'static str),

    #[error("no free partition slot: {0}")]
    NoFreeSlot(&'static str),

    #[error("partition overlaps an existing one")]
    Overlap,

    #[error("invalid partition type: {0}")]
    InvalidType(&'static str),

    #[error("invalid flag: {0}")]
    InvalidFlag(&'static str),

    #[error("invalid label: {0}")]
    InvalidLabel(&'static str),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// The table is committed on disk but the kernel did not pick it up.
    #[error("kernel did not reread the partition table: {0}")]
    KernelRereadFailed(BlockIOError),
}

impl PartError {
    /// Soft errors leave the on-disk state committed; the caller may retry later.
    #[inline]
    pub fn is_soft(&self) -> bool {
        matches!(self, PartError::KernelRereadFailed(_))
    }
}

impl From<BlockIOError> for PartError {
    fn from(e: BlockIOError) -> Self {
        match e {
            BlockIOError::Busy => PartError::Busy,
            other => PartError::Io(other),
        }
    }
}

pub type PartResult<T = ()> = Result<T, PartError>;
