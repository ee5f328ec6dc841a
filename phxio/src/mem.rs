// SPDX-License-Identifier: MIT

use crate::BlockIO;
use crate::errors::*;

/// In-memory implementation of `BlockIO`.
///
/// Useful for tests and for images that are already loaded.
#[derive(Debug)]
pub struct MemBlockIO<'a> {
    buffer: &'a [u8],
    closed: bool,
}

impl<'a> MemBlockIO<'a> {
    #[inline]
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            closed: false,
        }
    }
}

impl BlockIO for MemBlockIO<'_> {
    #[inline(always)]
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        if self.closed {
            return Err(DeviceReadError::Closed);
        }
        let end = check_range(offset, buf.len(), Some(self.buffer.len() as u64))?;
        buf.copy_from_slice(&self.buffer[offset as usize..end as usize]);
        Ok(())
    }

    #[inline]
    fn device_len(&self) -> Option<u64> {
        Some(self.buffer.len() as u64)
    }

    #[inline]
    fn close(&mut self) {
        self.closed = true;
    }
}
