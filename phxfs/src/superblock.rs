// SPDX-License-Identifier: MIT
//! Decoded superblock record, independent of the byte layout it came from.

use serde::Serialize;
use time::OffsetDateTime;

use crate::format::{CandidateOrigin, FsFamily};
use crate::fs::ext::features::{FeatureSet, StateFlags};
use crate::fs::ext::utils;

/// Geometry fields, as decoded.
///
/// Nothing here is trusted: `block_size` is 0 when `log_block_size` cannot
/// be represented, and every derived quantity uses checked arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    pub block_size: u32,
    pub log_block_size: u32,
    pub log_cluster_size: u32,
    pub total_blocks: u64,
    pub first_data_block: u32,
    pub blocks_per_group: u32,
    pub clusters_per_group: u32,
    pub inodes_per_group: u32,
    pub inode_count: u32,
    pub inode_size: u16,
    /// Raw `s_desc_size`
    pub desc_size: u16,
}

impl Geometry {
    /// ceil((total_blocks - first_data_block) / blocks_per_group)
    pub fn group_count(&self) -> Option<u64> {
        if self.blocks_per_group == 0 {
            return None;
        }
        let span = self.total_blocks.saturating_sub(self.first_data_block as u64);
        Some(span.div_ceil(self.blocks_per_group as u64))
    }

    /// First block of `group`.
    pub fn group_first_block(&self, group: u64) -> Option<u64> {
        group
            .checked_mul(self.blocks_per_group as u64)?
            .checked_add(self.first_data_block as u64)
    }

    /// One past the last block of `group`, clamped to the filesystem end.
    pub fn group_end_block(&self, group: u64) -> Option<u64> {
        let end = self
            .group_first_block(group)?
            .checked_add(self.blocks_per_group as u64)?;
        Some(end.min(self.total_blocks))
    }

    /// Byte offset of block `block`.
    #[inline]
    pub fn block_offset(&self, block: u64) -> Option<u64> {
        block.checked_mul(self.block_size as u64)
    }

    /// total_blocks * block_size
    pub fn total_bytes(&self) -> Option<u64> {
        self.total_blocks.checked_mul(self.block_size as u64)
    }

    /// Enough to walk groups: non-zero block size and group sizes, data
    /// start inside the filesystem.
    pub fn is_walkable(&self) -> bool {
        self.block_size != 0
            && self.blocks_per_group != 0
            && self.inodes_per_group != 0
            && (self.first_data_block as u64) < self.total_blocks
    }
}

/// Unix timestamps (seconds), widened with the `_hi` bytes. 0 means unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Timestamps {
    pub mkfs: i64,
    pub mount: i64,
    pub write: i64,
    pub last_check: i64,
}

fn to_datetime(secs: i64) -> Option<OffsetDateTime> {
    if secs == 0 {
        return None;
    }
    OffsetDateTime::from_unix_timestamp(secs).ok()
}

impl Timestamps {
    pub fn mkfs_time(&self) -> Option<OffsetDateTime> {
        to_datetime(self.mkfs)
    }

    pub fn mount_time(&self) -> Option<OffsetDateTime> {
        to_datetime(self.mount)
    }

    pub fn write_time(&self) -> Option<OffsetDateTime> {
        to_datetime(self.write)
    }

    pub fn last_check_time(&self) -> Option<OffsetDateTime> {
        to_datetime(self.last_check)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChecksumKind {
    Crc32c,
    Unknown(u8),
}

/// On-disk superblock checksum, when the format defines one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Checksum {
    pub kind: ChecksumKind,
    pub stored: u32,
}

/// One decoded superblock copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Superblock {
    pub family: FsFamily,
    pub origin: CandidateOrigin,
    pub magic: u16,
    pub geometry: Geometry,
    pub free_blocks: u64,
    pub reserved_blocks: u64,
    pub free_inodes: u32,
    pub features: FeatureSet,
    pub timestamps: Timestamps,
    pub state: StateFlags,
    pub errors_behavior: u16,
    pub mount_count: u16,
    pub max_mount_count: i16,
    pub rev_level: u32,
    pub minor_rev_level: u16,
    pub creator_os: u32,
    /// Group this copy claims to live in
    pub block_group_nr: u16,
    pub uuid: [u8; 16],
    pub volume_label: String,
    pub last_mounted: String,
    pub backup_groups: [u32; 2],
    pub reserved_gdt_blocks: u16,
    pub first_meta_bg: u32,
    pub log_groups_per_flex: u8,
    pub checksum_type: u8,
    pub checksum_seed: u32,
    pub checksum: Option<Checksum>,
    /// Verbatim bytes, reserved regions included.
    #[serde(skip)]
    pub raw: Vec<u8>,
}

impl Superblock {
    #[inline]
    pub fn group_count(&self) -> Option<u64> {
        self.geometry.group_count()
    }

    #[inline]
    pub fn is_64bit(&self) -> bool {
        self.features.is_64bit()
    }

    /// Size of one group descriptor on disk.
    pub fn descriptor_size(&self) -> u16 {
        utils::descriptor_size(&self.features, self.geometry.desc_size)
    }

    #[inline]
    pub fn total_bytes(&self) -> Option<u64> {
        self.geometry.total_bytes()
    }

    #[inline]
    pub fn free_bytes(&self) -> Option<u64> {
        self.free_blocks.checked_mul(self.geometry.block_size as u64)
    }

    /// Byte offset of the superblock copy held by `group`.
    ///
    /// The primary lives at byte 1024 whatever the block size; backups sit
    /// at the first block of their group.
    pub fn group_superblock_offset(&self, group: u64) -> Option<u64> {
        if group == 0 {
            return Some(crate::fs::ext::constant::EXT_SUPERBLOCK_OFFSET);
        }
        let block = self.geometry.group_first_block(group)?;
        self.geometry.block_offset(block)
    }

    pub fn has_super(&self, group: u64) -> bool {
        utils::group_has_super(group, &self.features, self.backup_groups)
    }

    /// UUID in the usual 8-4-4-4-12 form.
    pub fn uuid_string(&self) -> String {
        let u = &self.uuid;
        format!(
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            u[0], u[1], u[2], u[3], u[4], u[5], u[6], u[7], u[8], u[9], u[10], u[11], u[12], u[13],
            u[14], u[15]
        )
    }
}
