// SPDX-License-Identifier: MIT
//! Group descriptor table, as salvaged from the device.

use serde::Serialize;

use phxio::BlockIO;

use crate::core::anomaly::Anomaly;
use crate::core::errors::BlockIOResult;
use crate::fs::ext::features::GroupFlags;
use crate::superblock::Superblock;

/// Upper bound on descriptors read from one table.
pub const DEFAULT_MAX_GROUPS: u64 = 1 << 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupReadOptions {
    pub max_groups: u64,
}

impl Default for GroupReadOptions {
    fn default() -> Self {
        Self {
            max_groups: DEFAULT_MAX_GROUPS,
        }
    }
}

impl GroupReadOptions {
    pub fn with_max_groups(mut self, max_groups: u64) -> Self {
        self.max_groups = max_groups;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum EntryStatus {
    Ok,
    /// All fields decoded, but at least one failed a sanity check.
    Degraded(Vec<Anomaly>),
}

/// One decoded group descriptor. Block numbers are absolute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupDescriptor {
    pub group_index: u64,
    pub block_bitmap: u64,
    pub inode_bitmap: u64,
    pub inode_table: u64,
    pub free_blocks: u32,
    pub free_inodes: u32,
    pub used_dirs: u32,
    pub itable_unused: u32,
    pub flags: GroupFlags,
    pub checksum: u16,
    pub status: EntryStatus,
}

impl GroupDescriptor {
    #[inline]
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, EntryStatus::Degraded(_))
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        match &self.status {
            EntryStatus::Ok => &[],
            EntryStatus::Degraded(a) => a,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TruncationReason {
    /// The table runs past the end of the device.
    DeviceEnd,
    /// More groups than `max_groups`.
    GroupCap,
    /// Geometry too broken to locate or size the table.
    UnusableGeometry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Truncation {
    pub reason: TruncationReason,
    /// Entries actually read.
    pub readable: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupDescriptorTable {
    /// Byte offset of the first table block, when it could be computed.
    pub location: Option<u64>,
    pub descriptor_size: u16,
    /// Entry count implied by geometry.
    pub expected: u64,
    pub entries: Vec<GroupDescriptor>,
    /// Table-level findings (truncation, unusable sizes).
    pub anomalies: Vec<Anomaly>,
    pub truncated: Option<Truncation>,
}

impl GroupDescriptorTable {
    pub fn empty(expected: u64, reason: TruncationReason, anomalies: Vec<Anomaly>) -> Self {
        Self {
            location: None,
            descriptor_size: 0,
            expected,
            entries: Vec::new(),
            anomalies,
            truncated: Some(Truncation {
                reason,
                readable: 0,
            }),
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.truncated.is_none()
    }

    pub fn degraded(&self) -> impl Iterator<Item = &GroupDescriptor> {
        self.entries.iter().filter(|e| e.is_degraded())
    }

    /// Sum of per-group free blocks over the entries read.
    pub fn free_blocks_sum(&self) -> u64 {
        self.entries.iter().map(|e| e.free_blocks as u64).sum()
    }

    pub fn free_inodes_sum(&self) -> u64 {
        self.entries.iter().map(|e| e.free_inodes as u64).sum()
    }
}

/// Reads the descriptor table described by `sb`.
///
/// Data-level problems never fail the call: they show up as degraded entries,
/// table anomalies or a truncation record. Only device faults propagate.
pub fn read<IO: BlockIO + ?Sized>(
    io: &mut IO,
    sb: &Superblock,
    opts: &GroupReadOptions,
) -> BlockIOResult<GroupDescriptorTable> {
    sb.family.read_groups(io, sb, opts)
}
