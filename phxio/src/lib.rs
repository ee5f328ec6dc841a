// SPDX-License-Identifier: MIT
//! Read-only block IO for metadata recovery.
//!
//! Every backend exposes absolute-offset reads and nothing else: the analyzer
//! built on top of this crate never writes to the device it inspects.

// Core modules
pub mod errors;
pub mod stats;

// Backend modules
mod device;
mod mem;
mod retry;

// Prelude re-exports (central entrypoint)
pub mod prelude {
    pub use super::BlockIO;
    pub use super::BlockIOExt;
    pub use super::device::{DeviceBlockIO, ReaderOptions};
    pub use super::errors::*;
    pub use super::mem::MemBlockIO;
    pub use super::stats::*;
}

use errors::*;

// Constants

/// Default alignment for unbuffered (`O_DIRECT`) access.
pub const DEFAULT_ALIGNMENT: usize = 4096;

/// Default bound on consecutive stalled reads before a short read is reported.
pub const DEFAULT_READ_ATTEMPTS: u32 = 4;

// Traits

/// Read-only block IO abstraction.
///
/// Implementations may target RAM, image files or raw block devices.
pub trait BlockIO {
    /// Reads `buf.len()` bytes into `buf` from `offset` (absolute).
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult;

    /// Total addressable length in bytes, when the backend knows it.
    fn device_len(&self) -> Option<u64>;

    /// Releases the underlying handle. Calling it again is a no-op.
    fn close(&mut self) {}
}

impl<T: BlockIO + ?Sized> BlockIO for &mut T {
    #[inline]
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        (**self).read_at(offset, buf)
    }

    #[inline]
    fn device_len(&self) -> Option<u64> {
        (**self).device_len()
    }

    #[inline]
    fn close(&mut self) {
        (**self).close()
    }
}

/// Extension helpers for BlockIO.
pub trait BlockIOExt: BlockIO {
    /// Whether `[offset, offset + len)` lies inside the known device length.
    ///
    /// Unknown lengths are optimistic: the read itself decides.
    #[inline]
    fn fits(&self, offset: u64, len: u64) -> bool {
        match (offset.checked_add(len), self.device_len()) {
            (None, _) => false,
            (Some(end), Some(dev)) => end <= dev,
            (Some(_), None) => true,
        }
    }

    /// Reads `len` bytes at `offset` into a fresh buffer.
    fn read_vec(&mut self, offset: u64, len: usize) -> BlockIOResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Reads a fixed-layout struct of type `T` from the given offset.
    fn read_struct<T>(&mut self, offset: u64) -> BlockIOResult<T>
    where
        T: zerocopy::FromBytes + zerocopy::KnownLayout + zerocopy::Immutable,
    {
        let size = core::mem::size_of::<T>();
        let buf = self.read_vec(offset, size)?;
        T::read_from_bytes(&buf).map_err(|_| DeviceReadError::ShortRead {
            offset,
            len: size,
            got: buf.len(),
            attempts: 1,
        })
    }
}

impl<T: BlockIO + ?Sized> BlockIOExt for T {}
