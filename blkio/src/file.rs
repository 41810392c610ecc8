// SPDX-License-Identifier: MIT

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, FileTypeExt};
use std::path::Path;

use crate::{BlockIO, BlockIOResult, DEFAULT_BLOCK_SIZE, DiskGeometry};

/// `BlockIO` over a file descriptor: positioned `pread`/`pwrite`, `fsync`,
/// and `BLKRRPART` when the file is a block device.
///
/// Plain image files work too; they report their length as the device size,
/// a 512-byte block size (unless overridden) and treat the reread request as a no-op.
#[derive(Debug)]
pub struct FileBlockIO {
    file: File,
    size: u64,
    block_size: u32,
    geometry: Option<DiskGeometry>,
    is_block_device: bool,
}

impl FileBlockIO {
    /// Opens `path` read-only, or read-write when `writable`.
    pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> BlockIOResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path.as_ref())?;
        Self::from_file(file)
    }

    pub fn from_file(mut file: File) -> BlockIOResult<Self> {
        let meta = file.metadata()?;
        let is_block_device = meta.file_type().is_block_device();

        let (size, block_size, geometry) = if is_block_device {
            (
                sys::device_size(&mut file)?,
                sys::logical_block_size(&file)?,
                sys::geometry(&file),
            )
        } else {
            (meta.len(), DEFAULT_BLOCK_SIZE, None)
        };

        log::debug!(
            "opened {} ({} bytes, {}-byte blocks)",
            if is_block_device { "block device" } else { "image file" },
            size,
            block_size
        );

        Ok(Self {
            file,
            size,
            block_size,
            geometry,
            is_block_device,
        })
    }

    /// Overrides the logical block size (e.g. for 4Kn disk images).
    #[inline]
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    #[inline]
    pub fn is_block_device(&self) -> bool {
        self.is_block_device
    }

    #[inline]
    pub fn into_inner(self) -> File {
        self.file
    }
}

impl BlockIO for FileBlockIO {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        self.file.write_all_at(data, offset)?;
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn flush(&mut self) -> BlockIOResult {
        self.file.sync_all()?;
        Ok(())
    }

    #[inline]
    fn size_bytes(&self) -> u64 {
        self.size
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
        if !self.is_block_device {
            return Ok(());
        }
        sys::reread_partition_table(&self.file)
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use std::fs::File;
    use std::os::fd::AsRawFd;
    use std::thread::sleep;
    use std::time::Duration;

    use nix::errno::Errno;
    use nix::libc::{c_int, c_uchar, c_ulong, c_ushort};

    use crate::{BlockIOError, BlockIOResult, DiskGeometry};

    const REREAD_ATTEMPTS: u32 = 20;
    const REREAD_BACKOFF: Duration = Duration::from_millis(250);

    #[repr(C)]
    #[derive(Default)]
    #[allow(dead_code)]
    pub struct HdGeometry {
        heads: c_uchar,
        sectors: c_uchar,
        cylinders: c_ushort,
        start: c_ulong,
    }

    // create unsafe ioctl wrappers
    #[allow(clippy::missing_safety_doc)]
    mod ioctl {
        use super::{HdGeometry, c_int};
        use nix::{ioctl_none, ioctl_read, ioctl_read_bad, request_code_none};
        ioctl_none!(blkrrpart, 0x12, 95);
        ioctl_read_bad!(blksszget, request_code_none!(0x12, 104), c_int);
        ioctl_read!(blkgetsize64, 0x12, 114, u64);
        ioctl_read_bad!(hdio_getgeo, 0x0301, HdGeometry);
    }

    pub fn device_size(file: &mut File) -> BlockIOResult<u64> {
        let mut size: u64 = 0;
        // SAFETY: the fd is open for the lifetime of `file`, `size` is a valid out pointer.
        unsafe { ioctl::blkgetsize64(file.as_raw_fd(), &mut size) }
            .map_err(|e| BlockIOError::Io(e.into()))?;
        Ok(size)
    }

    pub fn logical_block_size(file: &File) -> BlockIOResult<u32> {
        let mut size: c_int = 0;
        // SAFETY: as above.
        unsafe { ioctl::blksszget(file.as_raw_fd(), &mut size) }
            .map_err(|e| BlockIOError::Io(e.into()))?;
        u32::try_from(size)
            .ok()
            .filter(|s| *s > 0)
            .ok_or(BlockIOError::Other("device reported an invalid sector size"))
    }

    pub fn geometry(file: &File) -> Option<DiskGeometry> {
        let mut geo = HdGeometry::default();
        // SAFETY: as above.
        match unsafe { ioctl::hdio_getgeo(file.as_raw_fd(), &mut geo) } {
            Ok(_) => {
                let g = DiskGeometry::new(geo.heads as u32, geo.sectors as u32);
                g.is_usable().then_some(g)
            }
            Err(_) => None,
        }
    }

    pub fn reread_partition_table(file: &File) -> BlockIOResult {
        let fd = file.as_raw_fd();
        // The kernel refuses with EBUSY while partitions are held open;
        // that often clears by itself, so retry for a while.
        for attempt in 1..=REREAD_ATTEMPTS {
            // SAFETY: the fd is open for the lifetime of `file`.
            match unsafe { ioctl::blkrrpart(fd) } {
                Ok(_) => return Ok(()),
                Err(Errno::EBUSY) if attempt < REREAD_ATTEMPTS => sleep(REREAD_BACKOFF),
                Err(Errno::EBUSY) => {
                    log::warn!("couldn't reread partition table: device is in use");
                    return Err(BlockIOError::Busy);
                }
                Err(Errno::EINVAL) => {
                    log::warn!("couldn't reread partition table: device may not support partitions");
                    return Err(BlockIOError::Unsupported);
                }
                Err(e) => return Err(BlockIOError::Io(e.into())),
            }
        }
        Err(BlockIOError::Busy)
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::fs::File;
    use std::io::{Seek, SeekFrom};

    use crate::{BlockIOResult, DEFAULT_BLOCK_SIZE, DiskGeometry};

    pub fn device_size(file: &mut File) -> BlockIOResult<u64> {
        let size = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;
        Ok(size)
    }

    pub fn logical_block_size(_file: &File) -> BlockIOResult<u32> {
        Ok(DEFAULT_BLOCK_SIZE)
    }

    pub fn geometry(_file: &File) -> Option<DiskGeometry> {
        None
    }

    pub fn reread_partition_table(_file: &File) -> BlockIOResult {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::prelude::*;
    use tempfile::tempfile;

    fn image(len: u64) -> FileBlockIO {
        let file = tempfile().unwrap();
        file.set_len(len).unwrap();
        FileBlockIO::from_file(file).unwrap()
    }

    #[test]
    fn test_rw() {
        let mut io = image(4096);
        io.write_at(10, &[1, 2, 3, 4]).unwrap();

        let mut output = [0u8; 4];
        io.read_at(10, &mut output).unwrap();
        assert_eq!(output, [1, 2, 3, 4]);
    }

    #[test]
    fn test_image_reports_size_and_default_block() {
        let io = image(1 << 20);
        assert_eq!(io.size_bytes(), 1 << 20);
        assert_eq!(io.logical_block_size(), DEFAULT_BLOCK_SIZE);
        assert!(!io.is_block_device());
        assert_eq!(io.with_block_size(4096).logical_block_size(), 4096);
    }

    #[test]
    fn test_reread_is_noop_on_images() {
        let mut io = image(512);
        io.request_kernel_reread().unwrap();
        io.flush().unwrap();
    }

    #[test]
    fn test_read_past_end_fails() {
        let mut io = image(512);
        let mut buf = [0u8; 16];
        assert!(matches!(io.read_at(508, &mut buf), Err(BlockIOError::Io(_))));
    }

    #[test]
    fn test_zero_fill() {
        let mut io = image(128);
        io.write_at(42, &[0xFF; 8]).unwrap();
        io.zero_fill(42, 8).unwrap();

        let mut buf = [0xAA; 8];
        io.read_at(42, &mut buf).unwrap();

        assert_eq!(buf, [0u8; 8]);
    }
}
