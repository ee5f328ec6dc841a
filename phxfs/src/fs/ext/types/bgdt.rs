// SPDX-License-Identifier: MIT
//! On-disk block group descriptor

use core::mem::offset_of;

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::fs::ext::constant::*;

/// First 32 bytes of a descriptor, present in every layout.
#[derive(Debug, Clone, Copy, Default, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ExtGroupDescLo {
    /// Block bitmap block (lower 32 bits)
    pub bg_block_bitmap_lo: U32,
    /// Inode bitmap block (lower 32 bits)
    pub bg_inode_bitmap_lo: U32,
    /// Inode table block (lower 32 bits)
    pub bg_inode_table_lo: U32,
    pub bg_free_blocks_count_lo: U16,
    pub bg_free_inodes_count_lo: U16,
    pub bg_used_dirs_count_lo: U16,
    pub bg_flags: U16,
    pub bg_exclude_bitmap_lo: U32,
    pub bg_block_bitmap_csum_lo: U16,
    pub bg_inode_bitmap_csum_lo: U16,
    pub bg_itable_unused_lo: U16,
    /// crc16 (gdt_csum) or low 16 bits of crc32c (metadata_csum)
    pub bg_checksum: U16,
}

/// Upper half, only meaningful with 64BIT and `s_desc_size >= 64`.
#[derive(Debug, Clone, Copy, Default, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ExtGroupDescHi {
    pub bg_block_bitmap_hi: U32,
    pub bg_inode_bitmap_hi: U32,
    pub bg_inode_table_hi: U32,
    pub bg_free_blocks_count_hi: U16,
    pub bg_free_inodes_count_hi: U16,
    pub bg_used_dirs_count_hi: U16,
    pub bg_itable_unused_hi: U16,
    pub bg_exclude_bitmap_hi: U32,
    pub bg_block_bitmap_csum_hi: U16,
    pub bg_inode_bitmap_csum_hi: U16,
    pub bg_reserved: U32,
}

const _: () = assert!(core::mem::size_of::<ExtGroupDescLo>() == EXT_MIN_DESC_SIZE as usize);
const _: () = assert!(core::mem::size_of::<ExtGroupDescHi>() == EXT_MIN_DESC_SIZE as usize);
const _: () = assert!(offset_of!(ExtGroupDescLo, bg_checksum) == EXT_BG_CHECKSUM_OFFSET);
const _: () = assert!(offset_of!(ExtGroupDescLo, bg_itable_unused_lo) == 0x1C);
const _: () = assert!(offset_of!(ExtGroupDescHi, bg_itable_unused_hi) == 0x12);
