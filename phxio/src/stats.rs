// SPDX-License-Identifier: MIT

use tracing::debug;

use crate::BlockIO;
use crate::errors::BlockIOResult;

/// Read counters collected by [`IoCounter`].
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct IoStats {
    pub reads: u64,
    pub read_bytes: u64,
    pub failed_reads: u64,

    // Largest single request, useful to diagnose granularity
    pub max_read: u64,
}

impl IoStats {
    #[inline]
    pub fn reset(&mut self) {
        *self = IoStats::default();
    }

    /// Emits the counters as one debug event.
    pub fn log(&self) {
        debug!(
            reads = self.reads,
            read_bytes = self.read_bytes,
            failed_reads = self.failed_reads,
            max_read = self.max_read,
            "device io statistics"
        );
    }
}

/// Transparent instrumentation wrapper.
pub struct IoCounter<'a, IO: BlockIO + ?Sized> {
    inner: &'a mut IO,
    pub stats: IoStats,
}

impl<'a, IO: BlockIO + ?Sized> IoCounter<'a, IO> {
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
}

impl<IO: BlockIO + ?Sized> BlockIO for IoCounter<'_, IO> {
    #[inline]
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        let len = buf.len() as u64;
        self.stats.reads += 1;
        self.stats.max_read = self.stats.max_read.max(len);

        let res = self.inner.read_at(offset, buf);
        match res {
            Ok(()) => self.stats.read_bytes += len,
            Err(_) => self.stats.failed_reads += 1,
        }
        res
    }

    #[inline]
    fn device_len(&self) -> Option<u64> {
        self.inner.device_len()
    }

    #[inline]
    fn close(&mut self) {
        self.inner.close()
    }
}
