// SPDX-License-Identifier: MIT
//! Supported filesystem families.
//!
//! A closed set of handlers. Each family knows how to recognise its
//! signature, decode a candidate region, grade the result, enumerate backup
//! locations and read its group descriptors. Adding a family means adding a
//! variant and filling in the arms below.

use serde::Serialize;

use phxio::BlockIO;

use crate::core::anomaly::AnomalyReport;
use crate::core::errors::*;
use crate::fs::ext;
use crate::groups::{GroupDescriptorTable, GroupReadOptions};
use crate::superblock::Superblock;
use crate::validator::CheckContext;

/// Bytes captured per candidate. Covers every supported superblock layout.
pub const CANDIDATE_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FsFamily {
    /// ext2, ext3 and ext4
    Ext,
}

/// Fixed layout constants of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyLayout {
    pub name: &'static str,
    pub magic: u64,
    pub magic_offset: usize,
    pub magic_len: usize,
    pub record_size: usize,
    pub primary_offset: u64,
}

const EXT_LAYOUT: FamilyLayout = FamilyLayout {
    name: "ext",
    magic: ext::constant::EXT_SUPERBLOCK_MAGIC as u64,
    magic_offset: ext::constant::EXT_MAGIC_OFFSET,
    magic_len: 2,
    record_size: ext::constant::EXT_SUPERBLOCK_SIZE,
    primary_offset: ext::constant::EXT_SUPERBLOCK_OFFSET,
};

impl FsFamily {
    pub const ALL: &'static [FsFamily] = &[FsFamily::Ext];

    pub fn layout(&self) -> &'static FamilyLayout {
        match self {
            FsFamily::Ext => &EXT_LAYOUT,
        }
    }

    /// Signature match on a captured region.
    pub fn detect(&self, bytes: &[u8]) -> bool {
        match self {
            FsFamily::Ext => ext::parser::detect(bytes),
        }
    }

    /// First family whose signature matches.
    pub fn detect_any(bytes: &[u8]) -> Option<FsFamily> {
        Self::ALL.iter().copied().find(|f| f.detect(bytes))
    }

    pub fn parse(&self, candidate: &SuperblockCandidate) -> DecodeResult<Superblock> {
        self.parse_region(&candidate.raw[..], candidate.origin())
    }

    pub fn parse_region(&self, bytes: &[u8], origin: CandidateOrigin) -> DecodeResult<Superblock> {
        match self {
            FsFamily::Ext => ext::parser::parse_region(bytes, origin),
        }
    }

    /// Runs the family's integrity checks.
    pub fn check(&self, sb: &Superblock, ctx: &CheckContext, rep: &mut AnomalyReport) {
        match self {
            FsFamily::Ext => ext::checker::check_superblock(sb, ctx, rep),
        }
    }

    /// `(group, byte offset)` of the backup copies implied by `sb`.
    pub fn backup_offsets(&self, sb: &Superblock, limit: usize) -> Vec<(u64, u64)> {
        match self {
            FsFamily::Ext => ext::groups::backup_superblock_offsets(sb, limit),
        }
    }

    /// `(group, byte offset)` probes used when no usable geometry is known.
    pub fn fallback_probes(&self) -> Vec<(u64, u64)> {
        match self {
            FsFamily::Ext => ext::groups::fallback_probe_offsets(),
        }
    }

    pub fn read_groups<IO: BlockIO + ?Sized>(
        &self,
        io: &mut IO,
        sb: &Superblock,
        opts: &GroupReadOptions,
    ) -> BlockIOResult<GroupDescriptorTable> {
        match self {
            FsFamily::Ext => ext::groups::read(io, sb, opts),
        }
    }

    /// Family-specific flavour of a decoded superblock (`ext4`, ...).
    pub fn flavor(&self, sb: &Superblock) -> &'static str {
        match self {
            FsFamily::Ext => ext::checker::flavor(sb),
        }
    }

    /// Name of the OS that created the filesystem.
    pub fn creator_os(&self, sb: &Superblock) -> &'static str {
        match self {
            FsFamily::Ext => ext::constant::creator_os_name(sb.creator_os),
        }
    }
}

/// Where a candidate was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CandidateOrigin {
    pub offset: u64,
    pub is_backup: bool,
    /// Block group the copy was expected in (0 for the primary)
    pub group: u64,
}

impl CandidateOrigin {
    pub const fn primary(offset: u64) -> Self {
        Self {
            offset,
            is_backup: false,
            group: 0,
        }
    }

    pub const fn backup(offset: u64, group: u64) -> Self {
        Self {
            offset,
            is_backup: true,
            group,
        }
    }
}

/// A region whose signature matched, captured verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperblockCandidate {
    pub offset: u64,
    pub raw: Box<[u8; CANDIDATE_SIZE]>,
    pub format: FsFamily,
    pub is_backup: bool,
    pub group: u64,
}

impl SuperblockCandidate {
    pub fn origin(&self) -> CandidateOrigin {
        CandidateOrigin {
            offset: self.offset,
            is_backup: self.is_backup,
            group: self.group,
        }
    }
}
