// SPDX-License-Identifier: MIT
//! On-disk ext2/3/4 superblock (1024 bytes, little-endian)

use core::mem::offset_of;

use zerocopy::little_endian::{I16, U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::fs::ext::constant::*;

/// Superblock layout.
///
/// Every field has an explicit width and byte order, so decoding is a plain
/// bounds-checked copy with no alignment requirement.
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ExtSuperblockRaw {
    // 0x00
    /// Total inode count
    pub s_inodes_count: U32,
    /// Total block count (lower 32 bits)
    pub s_blocks_count_lo: U32,
    /// Reserved block count (lower 32 bits)
    pub s_r_blocks_count_lo: U32,
    /// Free block count (lower 32 bits)
    pub s_free_blocks_count_lo: U32,
    // 0x10
    pub s_free_inodes_count: U32,
    pub s_first_data_block: U32,
    /// Block size = 1024 << s_log_block_size
    pub s_log_block_size: U32,
    /// Cluster size = 1024 << s_log_cluster_size
    pub s_log_cluster_size: U32,
    // 0x20
    pub s_blocks_per_group: U32,
    pub s_clusters_per_group: U32,
    pub s_inodes_per_group: U32,
    /// Mount time
    pub s_mtime: U32,
    // 0x30
    /// Write time
    pub s_wtime: U32,
    pub s_mnt_count: U16,
    /// Negative or zero disables the mount-count check
    pub s_max_mnt_count: I16,
    /// Magic signature (0xEF53)
    pub s_magic: U16,
    pub s_state: U16,
    /// Behaviour on errors
    pub s_errors: U16,
    pub s_minor_rev_level: U16,
    // 0x40
    pub s_lastcheck: U32,
    pub s_checkinterval: U32,
    pub s_creator_os: U32,
    pub s_rev_level: U32,
    // 0x50
    pub s_def_resuid: U16,
    pub s_def_resgid: U16,
    // Dynamic revision only from here
    pub s_first_ino: U32,
    pub s_inode_size: U16,
    /// Block group holding this copy
    pub s_block_group_nr: U16,
    pub s_feature_compat: U32,
    // 0x60
    pub s_feature_incompat: U32,
    pub s_feature_ro_compat: U32,
    pub s_uuid: [u8; 16],
    // 0x78
    pub s_volume_name: [u8; 16],
    // 0x88
    pub s_last_mounted: [u8; 64],
    // 0xC8
    pub s_algorithm_usage_bitmap: U32,
    pub s_prealloc_blocks: u8,
    pub s_prealloc_dir_blocks: u8,
    pub s_reserved_gdt_blocks: U16,
    // 0xD0
    pub s_journal_uuid: [u8; 16],
    // 0xE0
    pub s_journal_inum: U32,
    pub s_journal_dev: U32,
    pub s_last_orphan: U32,
    pub s_hash_seed: [U32; 4],
    pub s_def_hash_version: u8,
    pub s_jnl_backup_type: u8,
    /// Group descriptor size (64BIT only)
    pub s_desc_size: U16,
    // 0x100
    pub s_default_mount_opts: U32,
    pub s_first_meta_bg: U32,
    pub s_mkfs_time: U32,
    pub s_jnl_blocks: [U32; 17],
    // 0x150
    pub s_blocks_count_hi: U32,
    pub s_r_blocks_count_hi: U32,
    pub s_free_blocks_count_hi: U32,
    pub s_min_extra_isize: U16,
    pub s_want_extra_isize: U16,
    // 0x160
    pub s_flags: U32,
    pub s_raid_stride: U16,
    pub s_mmp_interval: U16,
    pub s_mmp_block: U64,
    // 0x170
    pub s_raid_stripe_width: U32,
    pub s_log_groups_per_flex: u8,
    pub s_checksum_type: u8,
    pub s_encryption_level: u8,
    pub s_reserved_pad: u8,
    pub s_kbytes_written: U64,
    // 0x180
    pub s_snapshot_inum: U32,
    pub s_snapshot_id: U32,
    pub s_snapshot_r_blocks_count: U64,
    // 0x190
    pub s_snapshot_list: U32,
    pub s_error_count: U32,
    pub s_first_error_time: U32,
    pub s_first_error_ino: U32,
    // 0x1A0
    pub s_first_error_block: U64,
    pub s_first_error_func: [u8; 32],
    // 0x1C8
    pub s_first_error_line: U32,
    pub s_last_error_time: U32,
    // 0x1D0
    pub s_last_error_ino: U32,
    pub s_last_error_line: U32,
    pub s_last_error_block: U64,
    // 0x1E0
    pub s_last_error_func: [u8; 32],
    // 0x200
    pub s_mount_opts: [u8; 64],
    // 0x240
    pub s_usr_quota_inum: U32,
    pub s_grp_quota_inum: U32,
    pub s_overhead_clusters: U32,
    /// Backup groups with sparse_super2
    pub s_backup_bgs: [U32; 2],
    pub s_encrypt_algos: [u8; 4],
    pub s_encrypt_pw_salt: [u8; 16],
    pub s_lpf_ino: U32,
    pub s_prj_quota_inum: U32,
    // 0x270
    /// crc32c(uuid) precomputed when CSUM_SEED is set
    pub s_checksum_seed: U32,
    // Upper 8 bits of the 32-bit timestamps
    pub s_wtime_hi: u8,
    pub s_mtime_hi: u8,
    pub s_mkfs_time_hi: u8,
    pub s_lastcheck_hi: u8,
    pub s_first_error_time_hi: u8,
    pub s_last_error_time_hi: u8,
    pub s_first_error_errcode: u8,
    pub s_last_error_errcode: u8,
    pub s_encoding: U16,
    pub s_encoding_flags: U16,
    // 0x280
    pub s_orphan_file_inum: U32,
    pub s_reserved: [U32; 94],
    // 0x3FC
    /// crc32c of bytes 0..0x3FC
    pub s_checksum: U32,
}

impl ExtSuperblockRaw {
    /// Encode to raw bytes
    pub fn to_bytes(&self) -> [u8; EXT_SUPERBLOCK_SIZE] {
        let mut out = [0u8; EXT_SUPERBLOCK_SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }
}

// Layout checks against the published on-disk format
const _: () = assert!(core::mem::size_of::<ExtSuperblockRaw>() == EXT_SUPERBLOCK_SIZE);
const _: () = assert!(offset_of!(ExtSuperblockRaw, s_magic) == EXT_MAGIC_OFFSET);
const _: () = assert!(offset_of!(ExtSuperblockRaw, s_block_group_nr) == 0x5A);
const _: () = assert!(offset_of!(ExtSuperblockRaw, s_uuid) == 0x68);
const _: () = assert!(offset_of!(ExtSuperblockRaw, s_reserved_gdt_blocks) == 0xCE);
const _: () = assert!(offset_of!(ExtSuperblockRaw, s_desc_size) == 0xFE);
const _: () = assert!(offset_of!(ExtSuperblockRaw, s_mkfs_time) == 0x108);
const _: () = assert!(offset_of!(ExtSuperblockRaw, s_blocks_count_hi) == 0x150);
const _: () = assert!(offset_of!(ExtSuperblockRaw, s_log_groups_per_flex) == 0x174);
const _: () = assert!(offset_of!(ExtSuperblockRaw, s_checksum_type) == 0x175);
const _: () = assert!(offset_of!(ExtSuperblockRaw, s_backup_bgs) == 0x24C);
const _: () = assert!(offset_of!(ExtSuperblockRaw, s_checksum_seed) == 0x270);
const _: () = assert!(offset_of!(ExtSuperblockRaw, s_wtime_hi) == 0x274);
const _: () = assert!(offset_of!(ExtSuperblockRaw, s_orphan_file_inum) == 0x280);
const _: () = assert!(offset_of!(ExtSuperblockRaw, s_checksum) == EXT_SB_CHECKSUM_OFFSET);
