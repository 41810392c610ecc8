// SPDX-License-Identifier: MIT

// Core modules
pub mod errors;
pub mod stats;

// Backend modules
#[cfg(feature = "mem")]
mod mem;

#[cfg(all(feature = "std", unix))]
mod file;

// Prelude re-exports (central entrypoint)
pub mod prelude {
    pub use super::BlockIO;
    pub use super::BlockIOExt;
    pub use super::DiskGeometry;
    pub use super::errors::*;
    pub use super::stats::*;

    #[cfg(feature = "mem")]
    pub use super::mem::MemBlockIO;

    #[cfg(all(feature = "std", unix))]
    pub use super::file::FileBlockIO;
}

// Internal use
use errors::*;

// Constants

/// Maximum size of internal scratch buffer (used for streaming/chunked ops).
/// 4 KiB = typical page size and common disk sector/cluster size.
pub const BLOCK_BUF_SIZE: usize = 4096;

/// Logical block size assumed when a backend has nothing better to report.
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Legacy cylinder/head/sector geometry as reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    pub heads: u32,
    pub sectors_per_track: u32,
}

impl DiskGeometry {
    #[inline]
    pub fn new(heads: u32, sectors_per_track: u32) -> Self {
        Self {
            heads,
            sectors_per_track,
        }
    }

    /// Geometry with no zero component; anything else is useless for alignment.
    #[inline]
    pub fn is_usable(&self) -> bool {
        self.heads > 0 && self.heads <= 255 && self.sectors_per_track > 0 && self.sectors_per_track <= 63
    }
}

// Traits

/// Block IO abstraction trait.
///
/// Allows read/write/flush at arbitrary byte offsets on a block device.
/// Implementations may target RAM, image files, or real block devices.
///
/// `size_bytes` and `logical_block_size` must be cheap and idempotent: backends
/// query the device once at construction.
pub trait BlockIO {
    /// Writes `data` at `offset` (absolute).
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult;

    /// Reads `buf.len()` bytes into `buf` from `offset` (absolute).
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult;

    /// Flushes buffered data down to stable storage (`fsync` semantics).
    fn flush(&mut self) -> BlockIOResult;

    /// Total size of the device in bytes.
    fn size_bytes(&self) -> u64;

    /// Logical block size used to interpret LBA fields.
    fn logical_block_size(&self) -> u32;

    /// Geometry reported by the device, if any.
    fn geometry(&self) -> Option<DiskGeometry> {
        None
    }

    /// Asks the OS to refresh its view of the partition table.
    ///
    /// Best effort: backends without a kernel behind them succeed trivially.
    fn request_kernel_reread(&mut self) -> BlockIOResult {
        Ok(())
    }
}

impl<T: BlockIO + ?Sized> BlockIO for &mut T {
    #[inline]
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        (**self).write_at(offset, data)
    }

    #[inline]
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        (**self).read_at(offset, buf)
    }

    #[inline]
    fn flush(&mut self) -> BlockIOResult {
        (**self).flush()
    }

    #[inline]
    fn size_bytes(&self) -> u64 {
        (**self).size_bytes()
    }

    #[inline]
    fn logical_block_size(&self) -> u32 {
        (**self).logical_block_size()
    }

    #[inline]
    fn geometry(&self) -> Option<DiskGeometry> {
        (**self).geometry()
    }

    #[inline]
    fn request_kernel_reread(&mut self) -> BlockIOResult {
        (**self).request_kernel_reread()
    }
}

/// Extension helpers for BlockIO.
pub trait BlockIOExt: BlockIO {
    /// Reads `len` bytes from `offset` into a fresh buffer.
    #[inline]
    fn read_vec(&mut self, offset: u64, len: usize) -> BlockIOResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Fills a region with zeroes.
    #[inline(always)]
    fn zero_fill(&mut self, offset: u64, len: u64) -> BlockIOResult {
        const ZERO_BUF: [u8; BLOCK_BUF_SIZE] = [0u8; BLOCK_BUF_SIZE];
        let mut remaining = len;
        let mut off = offset;
        while remaining > 0 {
            let chunk = remaining.min(ZERO_BUF.len() as u64) as usize;
            self.write_at(off, &ZERO_BUF[..chunk])?;
            off += chunk as u64;
            remaining -= chunk as u64;
        }
        Ok(())
    }
}

impl<T: BlockIO + ?Sized> BlockIOExt for T {}

