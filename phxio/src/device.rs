// SPDX-License-Identifier: MIT

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::errors::*;
use crate::retry::read_retrying;
use crate::{BlockIO, DEFAULT_ALIGNMENT, DEFAULT_READ_ATTEMPTS};

const PAGE_SIZE: usize = 4096;

/// Page-aligned scratch page for unbuffered reads.
#[derive(Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4096))]
struct AlignedPage([u8; PAGE_SIZE]);

/// Options for opening a device or image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Bypass the page cache (`O_DIRECT`) when the platform and backing
    /// filesystem allow it.
    pub direct_io: bool,
    /// Request a kernel-enforced exclusive open for block devices.
    pub exclusive: bool,
    /// Offset/length granularity of unbuffered reads. Rounded to a power of
    /// two, at least 512.
    pub alignment: usize,
    /// Consecutive stalled reads tolerated before a short read is reported.
    pub max_read_attempts: u32,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            direct_io: true,
            exclusive: true,
            alignment: DEFAULT_ALIGNMENT,
            max_read_attempts: DEFAULT_READ_ATTEMPTS,
        }
    }
}

impl ReaderOptions {
    /// Go through the page cache.
    pub fn buffered(mut self) -> Self {
        self.direct_io = false;
        self
    }

    /// Do not ask for an exclusive open.
    pub fn shared(mut self) -> Self {
        self.exclusive = false;
        self
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_read_attempts(mut self, attempts: u32) -> Self {
        self.max_read_attempts = attempts;
        self
    }

    fn normalized_alignment(&self) -> usize {
        self.alignment.max(512).next_power_of_two()
    }
}

/// Read-only handle on a raw block device or a disk image file.
#[derive(Debug)]
pub struct DeviceBlockIO {
    file: Option<File>,
    path: PathBuf,
    len: Option<u64>,
    block_device: bool,
    exclusive: bool,
    direct: bool,
    alignment: usize,
    max_attempts: u32,
    bounce: Vec<AlignedPage>,
}

impl std::fmt::Debug for AlignedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AlignedPage")
    }
}

impl DeviceBlockIO {
    /// Opens `path` read-only.
    ///
    /// Regular files and block devices are accepted (plus raw character disks
    /// on the BSDs and macOS). When `O_DIRECT` is rejected by the backing
    /// filesystem the handle silently degrades to buffered reads.
    pub fn open(path: impl AsRef<Path>, opts: &ReaderOptions) -> Result<Self, DeviceOpenError> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path).map_err(|e| DeviceOpenError::from_io(path, e))?;
        let block_device = classify(&meta.file_type()).map_err(|kind| {
            DeviceOpenError::NotBlockAddressable {
                path: path.to_path_buf(),
                kind,
            }
        })?;

        let exclusive = opts.exclusive && block_device;
        let (file, direct) = match open_raw(path, exclusive, opts.direct_io) {
            Ok(file) => (file, opts.direct_io && DIRECT_IO_SUPPORTED),
            Err(e) if opts.direct_io && is_einval(&e) => {
                warn!(path = %path.display(), "unbuffered access rejected, falling back to buffered reads");
                let file = open_raw(path, exclusive, false)
                    .map_err(|e| DeviceOpenError::from_io(path, e))?;
                (file, false)
            }
            Err(e) => return Err(DeviceOpenError::from_io(path, e)),
        };

        let len = if meta.is_file() {
            Some(meta.len())
        } else {
            (&file).seek(SeekFrom::End(0)).ok()
        };

        debug!(
            path = %path.display(),
            len = ?len,
            block_device,
            exclusive,
            direct,
            "device opened"
        );

        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            len,
            block_device,
            exclusive,
            direct,
            alignment: opts.normalized_alignment(),
            max_attempts: opts.max_read_attempts,
            bounce: Vec::new(),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn is_block_device(&self) -> bool {
        self.block_device
    }

    /// Whether reads currently bypass the page cache.
    #[inline]
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    fn read_buffered(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        let file = self.file.as_ref().ok_or(DeviceReadError::Closed)?;
        let need = buf.len();
        read_retrying(offset, buf, need, self.max_attempts, |off, b| {
            pread(file, b, off)
        })?;
        Ok(())
    }

    fn read_direct(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        let align = self.alignment as u64;
        let start = offset - offset % align;
        let end = (offset + buf.len() as u64).div_ceil(align) * align;
        let span = (end - start) as usize;
        let head = (offset - start) as usize;
        let need = head + buf.len();

        let pages = span.div_ceil(PAGE_SIZE);
        if self.bounce.len() < pages {
            self.bounce.resize_with(pages, AlignedPage::new_zeroed);
        }

        let file = self.file.as_ref().ok_or(DeviceReadError::Closed)?;
        let scratch = &mut self.bounce.as_mut_bytes()[..span];
        read_retrying(start, scratch, need, self.max_attempts, |off, b| {
            pread(file, b, off)
        })
        .map_err(|e| rebase(e, offset, buf.len()))?;

        buf.copy_from_slice(&scratch[head..need]);
        Ok(())
    }

    /// Reopens the handle without `O_DIRECT`.
    fn downgrade_to_buffered(&mut self) -> io::Result<()> {
        let file = open_raw(&self.path, self.exclusive, false)?;
        self.file = Some(file);
        self.direct = false;
        self.bounce = Vec::new();
        Ok(())
    }
}

impl BlockIO for DeviceBlockIO {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        if self.file.is_none() {
            return Err(DeviceReadError::Closed);
        }
        check_range(offset, buf.len(), self.len)?;
        if buf.is_empty() {
            return Ok(());
        }
        if !self.direct {
            return self.read_buffered(offset, buf);
        }

        match self.read_direct(offset, buf) {
            Err(DeviceReadError::Io {
                kind: io::ErrorKind::InvalidInput,
                ..
            }) => {
                warn!(
                    path = %self.path.display(),
                    offset,
                    "unbuffered read rejected, switching to buffered reads"
                );
                self.downgrade_to_buffered()
                    .map_err(|e| DeviceReadError::from_io(offset, buf.len(), e))?;
                self.read_buffered(offset, buf)
            }
            res => res,
        }
    }

    #[inline]
    fn device_len(&self) -> Option<u64> {
        self.len
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(path = %self.path.display(), "device closed");
        }
    }
}

/// Reports failures of an aligned read against the caller's request.
fn rebase(e: DeviceReadError, offset: u64, len: usize) -> DeviceReadError {
    match e {
        DeviceReadError::ShortRead { attempts, got, .. } => DeviceReadError::ShortRead {
            offset,
            len,
            got: got.min(len),
            attempts,
        },
        DeviceReadError::Io { kind, message, .. } => DeviceReadError::Io {
            offset,
            len,
            kind,
            message,
        },
        other => other,
    }
}

fn is_einval(e: &io::Error) -> bool {
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::EINVAL) {
        return true;
    }
    e.kind() == io::ErrorKind::InvalidInput
}

/// Ok(true) for block devices, Ok(false) for regular files.
#[cfg(unix)]
fn classify(ft: &std::fs::FileType) -> Result<bool, &'static str> {
    use std::os::unix::fs::FileTypeExt;

    if ft.is_file() {
        Ok(false)
    } else if ft.is_block_device() {
        Ok(true)
    } else if ft.is_char_device() {
        // Raw disks are character devices there (/dev/rdiskN, /dev/adaN).
        if cfg!(any(target_os = "macos", target_os = "freebsd")) {
            Ok(true)
        } else {
            Err("character device")
        }
    } else if ft.is_dir() {
        Err("directory")
    } else if ft.is_fifo() {
        Err("fifo")
    } else if ft.is_socket() {
        Err("socket")
    } else {
        Err("special file")
    }
}

#[cfg(not(unix))]
fn classify(ft: &std::fs::FileType) -> Result<bool, &'static str> {
    if ft.is_file() {
        Ok(false)
    } else if ft.is_dir() {
        Err("directory")
    } else {
        Err("special file")
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const DIRECT_IO_SUPPORTED: bool = true;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const DIRECT_IO_SUPPORTED: bool = false;

#[cfg(unix)]
fn open_raw(path: &Path, exclusive: bool, direct: bool) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut flags = 0;
    if exclusive {
        // Without O_CREAT, Linux treats O_EXCL on a block device as an
        // exclusive claim and fails with EBUSY while it is mounted.
        flags |= libc::O_EXCL;
    }
    #[cfg(any(target_os = "linux", target_os = "android"))]
    if direct {
        flags |= libc::O_DIRECT;
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let _ = direct;

    OpenOptions::new().read(true).custom_flags(flags).open(path)
}

#[cfg(not(unix))]
fn open_raw(path: &Path, _exclusive: bool, _direct: bool) -> io::Result<File> {
    OpenOptions::new().read(true).open(path)
}

#[cfg(unix)]
#[inline]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
#[inline]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}
