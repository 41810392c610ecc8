// SPDX-License-Identifier: MIT

use crate::{BlockIO, BlockIOError, BlockIOResult, DEFAULT_BLOCK_SIZE, DiskGeometry};

/// In-memory implementation of `BlockIO`.
///
/// Useful for tests and virtual disks. The kernel reread request is simulated:
/// it is counted, and can be made to fail with `Busy`.
#[derive(Debug)]
pub struct MemBlockIO<'a> {
    buffer: &'a mut [u8],
    block_size: u32,
    geometry: Option<DiskGeometry>,
    reread_busy: bool,
    rereads: u32,
    flushes: u32,
}

impl<'a> MemBlockIO<'a> {
    #[inline]
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self::with_block_size(buffer, DEFAULT_BLOCK_SIZE)
    }

    #[inline]
    pub fn with_block_size(buffer: &'a mut [u8], block_size: u32) -> Self {
        Self {
            buffer,
            block_size,
            geometry: None,
            reread_busy: false,
            rereads: 0,
            flushes: 0,
        }
    }

    /// Reports `geometry` from [`BlockIO::geometry`].
    #[inline]
    pub fn with_geometry(mut self, geometry: DiskGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// Makes subsequent kernel reread requests fail with `Busy`.
    #[inline]
    pub fn set_reread_busy(&mut self, busy: bool) {
        self.reread_busy = busy;
    }

    /// Number of successful kernel reread requests so far.
    #[inline]
    pub fn rereads(&self) -> u32 {
        self.rereads
    }

    #[inline]
    pub fn flushes(&self) -> u32 {
        self.flushes
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.buffer
    }

    #[inline]
    fn check_bounds(&self, offset: u64, len: usize) -> BlockIOResult {
        let end = offset
            .checked_add(len as u64)
            .ok_or(BlockIOError::OutOfBounds)?;
        if end > self.buffer.len() as u64 {
            return Err(BlockIOError::OutOfBounds);
        }
        Ok(())
    }
}

impl<'a> BlockIO for MemBlockIO<'a> {
    #[inline(always)]
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        self.check_bounds(offset, data.len())?;
        let start = offset as usize;
        self.buffer[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    #[inline(always)]
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        self.check_bounds(offset, buf.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.buffer[start..start + buf.len()]);
        Ok(())
    }

    #[inline]
    fn flush(&mut self) -> BlockIOResult {
        self.flushes += 1;
        Ok(())
    }

    #[inline]
    fn size_bytes(&self) -> u64 {
        self.buffer.len() as u64
    }

    #[inline]
    fn logical_block_size(&self) -> u32 {
        self.block_size
    }

    #[inline]
    fn geometry(&self) -> Option<DiskGeometry> {
        self.geometry
    }

    fn request_kernel_reread(&mut self) -> BlockIOResult {
        if self.reread_busy {
            return Err(BlockIOError::Busy);
        }
        self.rereads += 1;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::prelude::*;

    #[test]
    fn test_rw() {
        let mut buf = [0u8; 256];
        let mut io = MemBlockIO::new(&mut buf);
        io.write_at(10, &[1, 2, 3, 4]).unwrap();

        let mut output = [0u8; 4];
        io.read_at(10, &mut output).unwrap();
        assert_eq!(output, [1, 2, 3, 4]);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut buf = [0u8; 512];
        let mut io = MemBlockIO::new(&mut buf);
        assert!(matches!(
            io.write_at(510, &[0; 4]),
            Err(BlockIOError::OutOfBounds)
        ));
        assert!(io.read_at(u64::MAX, &mut [0u8; 1]).is_err());
    }

    #[test]
    fn test_size_and_block_size() {
        let mut buf = vec![0u8; 8192];
        let io = MemBlockIO::with_block_size(&mut buf, 4096);
        assert_eq!(io.size_bytes(), 8192);
        assert_eq!(io.logical_block_size(), 4096);
        assert_eq!(io.geometry(), None);
    }

    #[test]
    fn test_zero_fill() {
        let mut buf = [0xFF; 64];
        let mut io = MemBlockIO::new(&mut buf);

        io.zero_fill(10, 8).unwrap();

        let mut output = [0xAA; 8];
        io.read_at(10, &mut output).unwrap();
        assert_eq!(output, [0u8; 8]);
        assert_eq!(io.as_slice()[9], 0xFF);
        assert_eq!(io.as_slice()[18], 0xFF);
    }

    #[test]
    fn test_reread_busy() {
        let mut buf = [0u8; 512];
        let mut io = MemBlockIO::new(&mut buf);
        io.request_kernel_reread().unwrap();
        io.set_reread_busy(true);
        assert!(io.request_kernel_reread().unwrap_err().is_busy());
        assert_eq!(io.rereads(), 1);
    }
}
