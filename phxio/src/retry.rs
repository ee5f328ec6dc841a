// SPDX-License-Identifier: MIT

use std::io;

use tracing::debug;

use crate::errors::*;

/// Fills `buf` from `read_once` until at least `need` bytes are in.
///
/// Raw devices may legitimately return fewer bytes than asked for, so partial
/// reads are continued. Reads that make no progress (zero bytes, `Interrupted`,
/// `WouldBlock`) count as stalls; `max_attempts` consecutive stalls end the
/// request with [`DeviceReadError::ShortRead`]. Progress resets the stall
/// counter, so the total number of calls stays bounded by
/// `need + max_attempts`.
///
/// Returns the number of bytes actually placed in `buf` (`>= need`).
pub(crate) fn read_retrying<F>(
    offset: u64,
    buf: &mut [u8],
    need: usize,
    max_attempts: u32,
    mut read_once: F,
) -> BlockIOResult<usize>
where
    F: FnMut(u64, &mut [u8]) -> io::Result<usize>,
{
    let need = need.min(buf.len());
    let max_attempts = max_attempts.max(1);
    let mut filled = 0usize;
    let mut stalls = 0u32;

    while filled < need {
        match read_once(offset + filled as u64, &mut buf[filled..]) {
            Ok(0) => stalls += 1,
            Ok(n) => {
                filled += n;
                stalls = 0;
                continue;
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                ) =>
            {
                stalls += 1
            }
            Err(e) => return Err(DeviceReadError::from_io(offset, need, e)),
        }

        if stalls >= max_attempts {
            return Err(DeviceReadError::ShortRead {
                offset,
                len: need,
                got: filled,
                attempts: stalls,
            });
        }
        debug!(offset, filled, need, stalls, "retrying stalled read");
    }

    Ok(filled)
}
