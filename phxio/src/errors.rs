// SPDX-License-Identifier: MIT

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type for BlockIO reads.
pub type BlockIOResult<T = ()> = core::result::Result<T, DeviceReadError>;

/// Failure to obtain a read-only handle on a device or image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceOpenError {
    #[error("{}: no such device or image", .path.display())]
    NotFound { path: PathBuf },

    #[error("{}: permission denied (raw device access usually needs elevated privileges)", .path.display())]
    PermissionDenied { path: PathBuf },

    #[error("{}: device is busy or held exclusively by another user", .path.display())]
    Busy { path: PathBuf },

    #[error("{}: not a block-addressable target ({kind})", .path.display())]
    NotBlockAddressable { path: PathBuf, kind: &'static str },

    #[error("{}: {message}", .path.display())]
    Io {
        path: PathBuf,
        kind: io::ErrorKind,
        message: String,
    },
}

impl DeviceOpenError {
    pub fn path(&self) -> &Path {
        match self {
            DeviceOpenError::NotFound { path }
            | DeviceOpenError::PermissionDenied { path }
            | DeviceOpenError::Busy { path }
            | DeviceOpenError::NotBlockAddressable { path, .. }
            | DeviceOpenError::Io { path, .. } => path,
        }
    }

    #[cold]
    pub(crate) fn from_io(path: &Path, e: io::Error) -> Self {
        let path = path.to_path_buf();
        #[cfg(unix)]
        if e.raw_os_error() == Some(libc::EBUSY) {
            return DeviceOpenError::Busy { path };
        }
        match e.kind() {
            io::ErrorKind::NotFound => DeviceOpenError::NotFound { path },
            io::ErrorKind::PermissionDenied => DeviceOpenError::PermissionDenied { path },
            kind => DeviceOpenError::Io {
                path,
                kind,
                message: e.to_string(),
            },
        }
    }
}

/// Failure while reading bytes from an open device.
///
/// Always carries the offset and length of the request so the caller can
/// tell which region of the medium failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceReadError {
    #[error("read of {len} bytes at offset {offset} exceeds device length {device_len}")]
    OutOfRange {
        offset: u64,
        len: usize,
        device_len: u64,
    },

    #[error("read of {len} bytes at offset {offset} overflows the address space")]
    Overflow { offset: u64, len: usize },

    #[error("short read at offset {offset}: got {got} of {len} bytes after {attempts} attempt(s)")]
    ShortRead {
        offset: u64,
        len: usize,
        got: usize,
        attempts: u32,
    },

    #[error("I/O error reading {len} bytes at offset {offset}: {message}")]
    Io {
        offset: u64,
        len: usize,
        kind: io::ErrorKind,
        message: String,
    },

    #[error("device handle is closed")]
    Closed,
}

impl DeviceReadError {
    /// Offset of the failed request, when one was issued.
    pub fn offset(&self) -> Option<u64> {
        match self {
            DeviceReadError::OutOfRange { offset, .. }
            | DeviceReadError::Overflow { offset, .. }
            | DeviceReadError::ShortRead { offset, .. }
            | DeviceReadError::Io { offset, .. } => Some(*offset),
            DeviceReadError::Closed => None,
        }
    }

    #[cold]
    pub(crate) fn from_io(offset: u64, len: usize, e: io::Error) -> Self {
        DeviceReadError::Io {
            offset,
            len,
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Checks `[offset, offset + len)` against an optional device length.
#[inline]
pub(crate) fn check_range(offset: u64, len: usize, device_len: Option<u64>) -> BlockIOResult<u64> {
    let end = offset
        .checked_add(len as u64)
        .ok_or(DeviceReadError::Overflow { offset, len })?;
    match device_len {
        Some(device_len) if end > device_len => Err(DeviceReadError::OutOfRange {
            offset,
            len,
            device_len,
        }),
        _ => Ok(end),
    }
}
