// SPDX-License-Identifier: MIT

//! LBA-addressed BlockIO helpers with overflow checks.

use blkio::prelude::*;

/// Offset = LBA * block_size (with overflow-check)
#[inline]
pub(crate) fn lba_offset(lba: u64, block_size: u64) -> BlockIOResult<u64> {
    lba.checked_mul(block_size)
        .ok_or(BlockIOError::Other("lba_offset overflow"))
}

/// Block-addressed reads and writes.
pub(crate) trait BlockIOLbaExt: BlockIO {
    /// Writes `buf.len()` bytes starting from an LBA (offset = lba * block_size).
    #[inline]
    fn write_at_lba(&mut self, lba: u64, block_size: u64, data: &[u8]) -> BlockIOResult {
        let off = lba_offset(lba, block_size)?;
        self.write_at(off, data)
    }

    /// Reads `count` whole blocks starting at `lba`.
    #[inline]
    fn read_blocks(&mut self, lba: u64, block_size: u64, count: u64) -> BlockIOResult<Vec<u8>> {
        let len = count
            .checked_mul(block_size)
            .and_then(|l| usize::try_from(l).ok())
            .ok_or(BlockIOError::Other("read_blocks length overflow"))?;
        self.read_vec(lba_offset(lba, block_size)?, len)
    }

    /// Number of whole blocks on the device.
    #[inline]
    fn total_blocks(&self, block_size: u64) -> u64 {
        self.size_bytes() / block_size.max(1)
    }
}

impl<T: BlockIO + ?Sized> BlockIOLbaExt for T {}
