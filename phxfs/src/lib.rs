// SPDX-License-Identifier: MIT
//! Superblock and group descriptor recovery for damaged filesystems.
//!
//! The pipeline is read-only: a [`session::Analyzer`] locates superblock
//! copies on a block device, decodes and grades each of them, picks the most
//! trustworthy one and salvages the group descriptor table it describes. The
//! result is an immutable [`model::FilesystemModel`] that carries every
//! anomaly found on the way.

// Core Modules
pub mod core;
pub mod fs;

// Pipeline stages
pub mod format;
pub mod groups;
pub mod locator;
pub mod model;
pub mod session;
pub mod superblock;
pub mod validator;

pub mod prelude {
    pub use crate::core::anomaly::*;
    pub use crate::core::errors::*;
    pub use crate::format::{CandidateOrigin, FsFamily, SuperblockCandidate};
    pub use crate::fs::ext::features::*;
    pub use crate::groups::*;
    pub use crate::locator::{CandidateScan, LocateOptions, locate};
    pub use crate::model::*;
    pub use crate::session::*;
    pub use crate::superblock::*;
    pub use crate::validator::*;
    pub use phxio::prelude::*;
}
