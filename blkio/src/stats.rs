// SPDX-License-Identifier: MIT

use crate::{BlockIO, BlockIOResult, DiskGeometry};

/// Simple counters.
#[derive(Clone, Copy, Default, Debug)]
pub struct IoStats {
    pub reads: u64,
    pub read_bytes: u64,
    pub writes: u64,
    pub write_bytes: u64,
    pub flushes: u64,
    pub rereads: u64,

    // Alignment against the device's logical block size
    pub aligned_writes: u64,
    pub unaligned_writes: u64,

    pub max_write: u64,
}

impl IoStats {
    #[inline]
    pub fn reset(&mut self) {
        *self = IoStats::default();
    }
}

/// Transparent instrumentation wrapper.
pub struct IOCounter<'a, IO: BlockIO + ?Sized> {
    inner: &'a mut IO,
    pub stats: IoStats,
}

impl<'a, IO: BlockIO + ?Sized> IOCounter<'a, IO> {
    #[inline]
    pub fn new(inner: &'a mut IO) -> Self {
        Self {
            inner,
            stats: IoStats::default(),
        }
    }

    #[inline]
    pub fn snapshot(&self) -> IoStats {
        self.stats
    }

    #[inline]
    pub fn into_inner(self) -> &'a mut IO {
        self.inner
    }
}

impl<'a, IO: BlockIO + ?Sized> BlockIO for IOCounter<'a, IO> {
    #[inline]
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        let align = self.inner.logical_block_size().max(1) as u64;
        let aligned = offset % align == 0 && data.len() as u64 % align == 0;
        if aligned {
            self.stats.aligned_writes += 1;
        } else {
            self.stats.unaligned_writes += 1;
        }

        self.stats.writes += 1;
        self.stats.write_bytes += data.len() as u64;
        self.stats.max_write = self.stats.max_write.max(data.len() as u64);

        self.inner.write_at(offset, data)
    }

    #[inline]
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        self.stats.reads += 1;
        self.stats.read_bytes += buf.len() as u64;
        self.inner.read_at(offset, buf)
    }

    #[inline]
    fn flush(&mut self) -> BlockIOResult {
        self.stats.flushes += 1;
        self.inner.flush()
    }

    #[inline]
    fn size_bytes(&self) -> u64 {
        self.inner.size_bytes()
    }

    #[inline]
    fn logical_block_size(&self) -> u32 {
        self.inner.logical_block_size()
    }

    #[inline]
    fn geometry(&self) -> Option<DiskGeometry> {
        self.inner.geometry()
    }

    #[inline]
    fn request_kernel_reread(&mut self) -> BlockIOResult {
        self.stats.rereads += 1;
        self.inner.request_kernel_reread()
    }
}

/// Callbacks observing each IO call before it reaches the device.
pub trait IOTracer {
    fn on_read(&mut self, _off: u64, _len: usize) {}
    fn on_write(&mut self, _off: u64, _len: usize) {}
    fn on_flush(&mut self) {}
    fn on_reread(&mut self) {}
}

/// Kind of a traced IO call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IOEvent {
    Read { offset: u64, len: u64 },
    Write { offset: u64, len: u64 },
    Flush,
    Reread,
}

impl IOEvent {
    /// True when a read or write touches any byte of `[start, end)`.
    pub fn touches(&self, start: u64, end: u64) -> bool {
        match *self {
            IOEvent::Read { offset, len } | IOEvent::Write { offset, len } => {
                offset < end && start < offset + len
            }
            IOEvent::Flush | IOEvent::Reread => false,
        }
    }
}

/// Tracer that records every call in order.
#[derive(Debug, Default)]
pub struct EventLog {
    pub events: Vec<IOEvent>,
}

impl EventLog {
    /// Total bytes passed to `write_at`.
    pub fn written_bytes(&self) -> u64 {
        self.events
            .iter()
            .map(|e| match *e {
                IOEvent::Write { len, .. } => len,
                _ => 0,
            })
            .sum()
    }

    /// True when any read or write touched `[start, end)`.
    pub fn touched(&self, start: u64, end: u64) -> bool {
        self.events.iter().any(|e| e.touches(start, end))
    }

    /// Index of the first event matching `pred`.
    pub fn position(&self, pred: impl Fn(&IOEvent) -> bool) -> Option<usize> {
        self.events.iter().position(pred)
    }
}

impl IOTracer for EventLog {
    fn on_read(&mut self, off: u64, len: usize) {
        self.events.push(IOEvent::Read {
            offset: off,
            len: len as u64,
        });
    }
    fn on_write(&mut self, off: u64, len: usize) {
        self.events.push(IOEvent::Write {
            offset: off,
            len: len as u64,
        });
    }
    fn on_flush(&mut self) {
        self.events.push(IOEvent::Flush);
    }
    fn on_reread(&mut self) {
        self.events.push(IOEvent::Reread);
    }
}

pub struct TracingIO<'a, IO: BlockIO + ?Sized, Tr: IOTracer> {
    inner: &'a mut IO,
    tracer: Tr,
}

impl<'a, IO: BlockIO + ?Sized, Tr: IOTracer> TracingIO<'a, IO, Tr> {
    #[inline]
    pub fn new(inner: &'a mut IO, tracer: Tr) -> Self {
        Self { inner, tracer }
    }

    #[inline]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    #[inline]
    pub fn into_tracer(self) -> Tr {
        self.tracer
    }
}

impl<'a, IO: BlockIO + ?Sized, Tr: IOTracer> BlockIO for TracingIO<'a, IO, Tr> {
    fn write_at(&mut self, off: u64, data: &[u8]) -> BlockIOResult {
        self.tracer.on_write(off, data.len());
        self.inner.write_at(off, data)
    }
    fn read_at(&mut self, off: u64, buf: &mut [u8]) -> BlockIOResult {
        self.tracer.on_read(off, buf.len());
        self.inner.read_at(off, buf)
    }
    fn flush(&mut self) -> BlockIOResult {
        self.tracer.on_flush();
        self.inner.flush()
    }
    fn size_bytes(&self) -> u64 {
        self.inner.size_bytes()
    }
    fn logical_block_size(&self) -> u32 {
        self.inner.logical_block_size()
    }
    fn geometry(&self) -> Option<DiskGeometry> {
        self.inner.geometry()
    }
    fn request_kernel_reread(&mut self) -> BlockIOResult {
        self.tracer.on_reread();
        self.inner.request_kernel_reread()
    }
}
