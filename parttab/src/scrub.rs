// SPDX-License-Identifier: MIT

//! Signature scrubbing: zeroing the regions where filesystem, RAID and LVM
//! superblocks live so that nothing stale is detected after an edit.

use core::sync::atomic::{AtomicBool, Ordering};

use blkio::prelude::*;

use crate::SIGNATURE_REGION;
use crate::errors::*;

/// Chunk size of a full zeroing pass; cancellation is checked between chunks.
pub const SCRUB_CHUNK: u64 = 128 * 1024;

/// Options for [`scrub`].
#[derive(Default)]
pub struct ScrubOptions<'a> {
    /// `0` zeroes the signature regions only, `1` zeroes the whole range.
    /// `3`, `7` and `35` (DoD / Gutmann) are reserved and not implemented.
    pub passes: u32,
    pub cancel: Option<&'a AtomicBool>,
    /// Called with an integer percent between chunks of a full pass.
    pub progress: Option<&'a mut dyn FnMut(u32)>,
}

impl<'a> ScrubOptions<'a> {
    pub fn signatures() -> Self {
        Self::default()
    }

    pub fn full() -> Self {
        Self {
            passes: 1,
            ..Self::default()
        }
    }

    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, progress: &'a mut dyn FnMut(u32)) -> Self {
        self.progress = Some(progress);
        self
    }

    #[inline]
    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|c| c.load(Ordering::Relaxed))
    }
}

/// Zeroes the first and last `min(128 KiB, size)` bytes of `[offset, offset + size)`,
/// each byte at most once, then flushes.
pub fn scrub_signatures<IO: BlockIO + ?Sized>(io: &mut IO, offset: u64, size: u64) -> PartResult {
    check_range(io, offset, size)?;
    let end = offset + size;
    let head = size.min(SIGNATURE_REGION);
    io.zero_fill(offset, head)?;

    let tail_start = end.saturating_sub(SIGNATURE_REGION).max(offset + head);
    if tail_start < end {
        io.zero_fill(tail_start, end - tail_start)?;
    }
    io.flush()?;
    log::debug!("scrub: signatures cleared in [{offset}, {end})");
    Ok(())
}

/// Scrubs `[offset, offset + size)` according to `opts.passes`.
pub fn scrub<IO: BlockIO + ?Sized>(
    io: &mut IO,
    offset: u64,
    size: u64,
    opts: &mut ScrubOptions<'_>,
) -> PartResult {
    match opts.passes {
        0 => scrub_signatures(io, offset, size),
        1 => {
            scrub_signatures(io, offset, size)?;
            zero_range(io, offset, size, opts)
        }
        3 | 7 | 35 => Err(PartError::NotSupported("multi-pass secure erase")),
        _ => Err(PartError::NotSupported("unknown scrub pass count")),
    }
}

fn zero_range<IO: BlockIO + ?Sized>(
    io: &mut IO,
    offset: u64,
    size: u64,
    opts: &mut ScrubOptions<'_>,
) -> PartResult {
    let end = offset + size;
    let mut pos = offset;
    while pos < end {
        if opts.cancelled() {
            io.flush()?;
            log::info!("scrub: cancelled at {} of {size} bytes", pos - offset);
            return Err(PartError::Cancelled);
        }
        let chunk = SCRUB_CHUNK.min(end - pos);
        io.zero_fill(pos, chunk)?;
        pos += chunk;
        if let Some(progress) = opts.progress.as_deref_mut() {
            progress(((pos - offset) * 100 / size.max(1)) as u32);
        }
    }
    io.flush()?;
    Ok(())
}

fn check_range<IO: BlockIO + ?Sized>(io: &IO, offset: u64, size: u64) -> PartResult {
    match offset.checked_add(size) {
        Some(end) if end <= io.size_bytes() => Ok(()),
        _ => Err(PartError::Io(BlockIOError::OutOfBounds)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_touch_head_and_tail_only() {
        let mut buf = vec![0xFFu8; 1 << 20];
        let mut io = MemBlockIO::new(&mut buf);
        scrub_signatures(&mut io, 0, 1 << 20).unwrap();
        let s = io.as_slice();
        assert!(s[..SIGNATURE_REGION as usize].iter().all(|&b| b == 0));
        assert!(s[(1 << 20) - SIGNATURE_REGION as usize..].iter().all(|&b| b == 0));
        assert!(s[SIGNATURE_REGION as usize..(1 << 20) - SIGNATURE_REGION as usize]
            .iter()
            .all(|&b| b == 0xFF));
        assert_eq!(io.flushes(), 1);
    }

    #[test]
    fn small_range_is_zeroed_once() {
        let mut buf = vec![0xFFu8; 1 << 20];
        let mut mem = MemBlockIO::new(&mut buf);
        let mut io = IOCounter::new(&mut mem);
        scrub_signatures(&mut io, 4096, 100 * 1024).unwrap();
        assert_eq!(io.snapshot().write_bytes, 100 * 1024);

        let mut log = TracingIO::new(&mut mem, EventLog::default());
        scrub_signatures(&mut log, 0, 200 * 1024).unwrap();
        assert_eq!(log.tracer().written_bytes(), 200 * 1024);
    }

    #[test]
    fn full_pass_reports_progress() {
        let mut buf = vec![0xABu8; 1 << 20];
        let mut io = MemBlockIO::new(&mut buf);
        let mut seen = Vec::new();
        let mut cb = |p: u32| seen.push(p);
        let mut opts = ScrubOptions::full().with_progress(&mut cb);
        scrub(&mut io, 0, 1 << 20, &mut opts).unwrap();
        drop(opts);
        assert!(io.as_slice().iter().all(|&b| b == 0));
        assert_eq!(seen.len(), 8);
        assert_eq!(seen.last(), Some(&100));
    }

    #[test]
    fn cancel_flushes_and_stops() {
        let mut buf = vec![0xABu8; 1 << 20];
        let mut io = MemBlockIO::new(&mut buf);
        let cancel = AtomicBool::new(true);
        let mut opts = ScrubOptions::full().with_cancel(&cancel);
        assert!(matches!(
            scrub(&mut io, 0, 1 << 20, &mut opts),
            Err(PartError::Cancelled)
        ));
        // Signatures go first even when the full pass is cancelled.
        assert!(io.as_slice()[..SIGNATURE_REGION as usize].iter().all(|&b| b == 0));
        assert_eq!(io.as_slice()[512 * 1024], 0xAB);
        assert_eq!(io.flushes(), 2);
    }

    #[test]
    fn reserved_pass_counts() {
        let mut buf = vec![0u8; 4096];
        let mut io = MemBlockIO::new(&mut buf);
        for passes in [3, 7, 35, 2] {
            let mut opts = ScrubOptions {
                passes,
                ..ScrubOptions::default()
            };
            assert!(matches!(
                scrub(&mut io, 0, 4096, &mut opts),
                Err(PartError::NotSupported(_))
            ));
        }
        let mut opts = ScrubOptions::signatures();
        assert!(scrub(&mut io, 0, 8192, &mut opts).is_err());
    }
}
