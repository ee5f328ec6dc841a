// SPDX-License-Identifier: MIT
//! Synthetic ext images with consistent metadata.
//!
//! Lays out superblock copies and descriptor tables the way mke2fs does,
//! with per-group counters that add up. Only metadata the analyzer reads is
//! written: bitmaps and inode tables stay zeroed.

use zerocopy::little_endian::{I16, U16, U32};
use zerocopy::{FromZeros, IntoBytes};

use crate::fs::ext::checksum::{
    crc32c_raw, csum_seed, group_desc_crc16, group_desc_crc32c,
};
use crate::fs::ext::constant::*;
use crate::fs::ext::features::*;
use crate::fs::ext::types::{ExtGroupDescHi, ExtGroupDescLo, ExtSuperblockRaw};
use crate::fs::ext::utils::group_has_super;

/// Placement of one group's metadata, in absolute blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupLayout {
    pub group: u64,
    pub start: u64,
    /// One past the last block, clamped to the filesystem end.
    pub end: u64,
    /// Superblock copy plus descriptor blocks at the head of the group.
    pub head_blocks: u64,
    pub block_bitmap: u64,
    pub inode_bitmap: u64,
    pub inode_table: u64,
    /// Metadata blocks charged to this group.
    pub used_blocks: u64,
}

impl GroupLayout {
    #[inline]
    pub fn free_blocks(&self) -> u64 {
        (self.end - self.start).saturating_sub(self.used_blocks)
    }
}

#[derive(Debug, Clone)]
pub struct ExtImageBuilder {
    block_size: u32,
    total_blocks: u64,
    blocks_per_group: u32,
    inodes_per_group: u32,
    inode_size: u16,
    desc_size: u16,
    features: FeatureSet,
    first_meta_bg: u32,
    backup_bgs: [u32; 2],
    log_groups_per_flex: u8,
    uuid: [u8; 16],
    label: String,
    last_mounted: String,
    state: u16,
    mkfs_time: u32,
    mount_time: u32,
    write_time: u32,
    mount_count: u16,
    max_mount_count: i16,
}

impl ExtImageBuilder {
    /// mke2fs-like defaults: sparse_super, filetype, 256-byte inodes,
    /// `8 * block_size` blocks per group.
    pub fn new(block_size: u32, total_blocks: u64) -> Self {
        Self {
            block_size,
            total_blocks,
            blocks_per_group: block_size * EXT_BITS_PER_BYTE as u32,
            inodes_per_group: 2048,
            inode_size: 256,
            desc_size: EXT_MIN_DESC_SIZE,
            features: FeatureSet {
                compat: CompatFeatures::empty(),
                incompat: IncompatFeatures::FILETYPE,
                ro_compat: RoCompatFeatures::SPARSE_SUPER,
            },
            first_meta_bg: 0,
            backup_bgs: [0; 2],
            log_groups_per_flex: 0,
            uuid: [
                0x5c, 0x1e, 0x7a, 0x42, 0x90, 0x3b, 0x4e, 0x1f, 0xa8, 0x66, 0x0d, 0x2c, 0x91, 0x7e,
                0x34, 0xb5,
            ],
            label: String::new(),
            last_mounted: String::new(),
            state: StateFlags::VALID.bits(),
            mkfs_time: 1_700_000_000,
            mount_time: 0,
            write_time: 1_700_000_000,
            mount_count: 0,
            max_mount_count: -1,
        }
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn last_mounted(mut self, path: &str) -> Self {
        self.last_mounted = path.to_string();
        self
    }

    pub fn uuid(mut self, uuid: [u8; 16]) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn blocks_per_group(mut self, bpg: u32) -> Self {
        self.blocks_per_group = bpg;
        self
    }

    pub fn inodes_per_group(mut self, ipg: u32) -> Self {
        self.inodes_per_group = ipg;
        self
    }

    pub fn with_64bit(mut self) -> Self {
        self.features.incompat |= IncompatFeatures::IS_64BIT;
        self.desc_size = EXT_MIN_DESC_SIZE_64BIT;
        self
    }

    pub fn with_metadata_csum(mut self) -> Self {
        self.features.ro_compat.remove(RoCompatFeatures::GDT_CSUM);
        self.features.ro_compat |= RoCompatFeatures::METADATA_CSUM;
        self
    }

    pub fn with_gdt_csum(mut self) -> Self {
        self.features.ro_compat.remove(RoCompatFeatures::METADATA_CSUM);
        self.features.ro_compat |= RoCompatFeatures::GDT_CSUM;
        self
    }

    /// Flex groups of `1 << log` groups. All bitmaps and inode tables are
    /// packed into group 0.
    pub fn with_flex_bg(mut self, log: u8) -> Self {
        self.features.incompat |= IncompatFeatures::FLEX_BG;
        self.log_groups_per_flex = log;
        self
    }

    pub fn with_journal(mut self) -> Self {
        self.features.compat |= CompatFeatures::HAS_JOURNAL;
        self
    }

    pub fn with_meta_bg(mut self, first_meta_bg: u32) -> Self {
        self.features.incompat |= IncompatFeatures::META_BG;
        self.first_meta_bg = first_meta_bg;
        self
    }

    pub fn sparse_super2(mut self, backup_bgs: [u32; 2]) -> Self {
        self.features.compat |= CompatFeatures::SPARSE_SUPER2;
        self.backup_bgs = backup_bgs;
        self
    }

    pub fn without_sparse_super(mut self) -> Self {
        self.features.ro_compat.remove(RoCompatFeatures::SPARSE_SUPER);
        self
    }

    pub fn state(mut self, state: u16) -> Self {
        self.state = state;
        self
    }

    pub fn mount_time(mut self, t: u32) -> Self {
        self.mount_time = t;
        self
    }

    pub fn write_time(mut self, t: u32) -> Self {
        self.write_time = t;
        self
    }

    pub fn mount_counts(mut self, count: u16, max: i16) -> Self {
        self.mount_count = count;
        self.max_mount_count = max;
        self
    }

    // Geometry

    #[inline]
    fn first_data_block(&self) -> u64 {
        u64::from(self.block_size == EXT_MIN_BLOCK_SIZE)
    }

    pub fn group_count(&self) -> u64 {
        self.total_blocks
            .saturating_sub(self.first_data_block())
            .div_ceil(self.blocks_per_group as u64)
    }

    pub fn image_len(&self) -> u64 {
        self.total_blocks * self.block_size as u64
    }

    fn descs_per_block(&self) -> u64 {
        (self.block_size / self.desc_size as u32) as u64
    }

    fn gdt_blocks(&self) -> u64 {
        self.group_count().div_ceil(self.descs_per_block())
    }

    fn inode_table_blocks(&self) -> u64 {
        (self.inodes_per_group as u64 * self.inode_size as u64).div_ceil(self.block_size as u64)
    }

    fn has_super(&self, group: u64) -> bool {
        group_has_super(group, &self.features, self.backup_bgs)
    }

    fn meta_bg(&self) -> bool {
        self.features.incompat.contains(IncompatFeatures::META_BG)
    }

    /// Descriptor blocks stored at the head of `group`.
    fn descriptor_blocks_in(&self, group: u64) -> u64 {
        let dpb = self.descs_per_block();
        if self.meta_bg() && group / dpb >= self.first_meta_bg as u64 {
            // Only the primary copy of each meta group block is kept
            u64::from(group % dpb == 0)
        } else if self.has_super(group) {
            if self.meta_bg() {
                (self.first_meta_bg as u64).min(self.gdt_blocks())
            } else {
                self.gdt_blocks()
            }
        } else {
            0
        }
    }

    fn group_start(&self, group: u64) -> u64 {
        self.first_data_block() + group * self.blocks_per_group as u64
    }

    pub fn layout(&self, group: u64) -> GroupLayout {
        let start = self.group_start(group);
        let end = (start + self.blocks_per_group as u64).min(self.total_blocks);
        let head_blocks = u64::from(self.has_super(group)) + self.descriptor_blocks_in(group);
        let itb = self.inode_table_blocks();

        if self.features.incompat.contains(IncompatFeatures::FLEX_BG) {
            let groups = self.group_count();
            let base = self.group_start(0) + u64::from(self.has_super(0)) + self.descriptor_blocks_in(0);
            let used_blocks = if group == 0 {
                head_blocks + groups * (2 + itb)
            } else {
                head_blocks
            };
            GroupLayout {
                group,
                start,
                end,
                head_blocks,
                block_bitmap: base + group,
                inode_bitmap: base + groups + group,
                inode_table: base + 2 * groups + group * itb,
                used_blocks,
            }
        } else {
            let block_bitmap = start + head_blocks;
            GroupLayout {
                group,
                start,
                end,
                head_blocks,
                block_bitmap,
                inode_bitmap: block_bitmap + 1,
                inode_table: block_bitmap + 2,
                used_blocks: head_blocks + 2 + itb,
            }
        }
    }

    fn group_free_inodes(&self, group: u64) -> u32 {
        if group == 0 {
            self.inodes_per_group.saturating_sub(EXT_GOOD_OLD_FIRST_INO)
        } else {
            self.inodes_per_group
        }
    }

    pub fn free_blocks_total(&self) -> u64 {
        (0..self.group_count()).map(|g| self.layout(g).free_blocks()).sum()
    }

    pub fn free_inodes_total(&self) -> u64 {
        (0..self.group_count()).map(|g| self.group_free_inodes(g) as u64).sum()
    }

    // Encoding

    /// Superblock copy for `group`, checksummed when metadata_csum is on.
    pub fn superblock_bytes(&self, group: u64) -> [u8; EXT_SUPERBLOCK_SIZE] {
        let mut sb = ExtSuperblockRaw::new_zeroed();
        let wide = self.features.is_64bit();
        let lo = |v: u64| U32::new(v as u32);
        let hi = |v: u64| U32::new(if wide { (v >> 32) as u32 } else { 0 });

        let total = self.total_blocks;
        let reserved = total / 20;
        let free = self.free_blocks_total();
        let log = self.block_size.trailing_zeros().saturating_sub(EXT_MIN_BLOCK_LOG_SIZE);

        sb.s_inodes_count = U32::new((self.inodes_per_group as u64 * self.group_count()) as u32);
        sb.s_blocks_count_lo = lo(total);
        sb.s_blocks_count_hi = hi(total);
        sb.s_r_blocks_count_lo = lo(reserved);
        sb.s_r_blocks_count_hi = hi(reserved);
        sb.s_free_blocks_count_lo = lo(free);
        sb.s_free_blocks_count_hi = hi(free);
        sb.s_free_inodes_count = U32::new(self.free_inodes_total() as u32);
        sb.s_first_data_block = U32::new(self.first_data_block() as u32);
        sb.s_log_block_size = U32::new(log);
        sb.s_log_cluster_size = U32::new(log);
        sb.s_blocks_per_group = U32::new(self.blocks_per_group);
        sb.s_clusters_per_group = U32::new(self.blocks_per_group);
        sb.s_inodes_per_group = U32::new(self.inodes_per_group);
        sb.s_mtime = U32::new(self.mount_time);
        sb.s_wtime = U32::new(self.write_time);
        sb.s_mkfs_time = U32::new(self.mkfs_time);
        sb.s_mnt_count = U16::new(self.mount_count);
        sb.s_max_mnt_count = I16::new(self.max_mount_count);
        sb.s_magic = U16::new(EXT_SUPERBLOCK_MAGIC);
        sb.s_state = U16::new(self.state);
        sb.s_errors = U16::new(EXT_ERRORS_CONTINUE);
        sb.s_creator_os = U32::new(EXT_OS_LINUX);
        sb.s_rev_level = U32::new(EXT_DYNAMIC_REV);
        sb.s_first_ino = U32::new(EXT_GOOD_OLD_FIRST_INO);
        sb.s_inode_size = U16::new(self.inode_size);
        sb.s_block_group_nr = U16::new(group as u16);
        sb.s_feature_compat = U32::new(self.features.compat.bits());
        sb.s_feature_incompat = U32::new(self.features.incompat.bits());
        sb.s_feature_ro_compat = U32::new(self.features.ro_compat.bits());
        sb.s_uuid = self.uuid;
        copy_str(&mut sb.s_volume_name, &self.label);
        copy_str(&mut sb.s_last_mounted, &self.last_mounted);
        if wide {
            sb.s_desc_size = U16::new(self.desc_size);
        }
        sb.s_first_meta_bg = U32::new(self.first_meta_bg);
        sb.s_log_groups_per_flex = self.log_groups_per_flex;
        sb.s_backup_bgs = [U32::new(self.backup_bgs[0]), U32::new(self.backup_bgs[1])];

        let csum = self.features.has_metadata_csum();
        if csum {
            sb.s_checksum_type = EXT_CHECKSUM_TYPE_CRC32C;
        }
        let mut out = sb.to_bytes();
        if csum {
            let c = crc32c_raw(!0, &out[..EXT_SB_CHECKSUM_OFFSET]);
            out[EXT_SB_CHECKSUM_OFFSET..].copy_from_slice(&c.to_le_bytes());
        }
        out
    }

    /// On-disk descriptor of `group`, `desc_size` bytes, checksum filled in.
    pub fn descriptor(&self, group: u64) -> Vec<u8> {
        let l = self.layout(group);
        let free_blocks = l.free_blocks();
        let free_inodes = self.group_free_inodes(group);
        let used_dirs: u32 = if group == 0 { 2 } else { 0 };

        let mut lo = ExtGroupDescLo::new_zeroed();
        lo.bg_block_bitmap_lo = U32::new(l.block_bitmap as u32);
        lo.bg_inode_bitmap_lo = U32::new(l.inode_bitmap as u32);
        lo.bg_inode_table_lo = U32::new(l.inode_table as u32);
        lo.bg_free_blocks_count_lo = U16::new(free_blocks as u16);
        lo.bg_free_inodes_count_lo = U16::new(free_inodes as u16);
        lo.bg_used_dirs_count_lo = U16::new(used_dirs as u16);

        let mut out = vec![0u8; self.desc_size as usize];
        out[..EXT_MIN_DESC_SIZE as usize].copy_from_slice(lo.as_bytes());

        if self.features.is_64bit() && self.desc_size >= EXT_MIN_DESC_SIZE_64BIT {
            let mut hi = ExtGroupDescHi::new_zeroed();
            hi.bg_block_bitmap_hi = U32::new((l.block_bitmap >> 32) as u32);
            hi.bg_inode_bitmap_hi = U32::new((l.inode_bitmap >> 32) as u32);
            hi.bg_inode_table_hi = U32::new((l.inode_table >> 32) as u32);
            hi.bg_free_blocks_count_hi = U16::new((free_blocks >> 16) as u16);
            hi.bg_free_inodes_count_hi = U16::new((free_inodes >> 16) as u16);
            out[EXT_MIN_DESC_SIZE as usize..EXT_MIN_DESC_SIZE_64BIT as usize]
                .copy_from_slice(hi.as_bytes());
        }

        let ro = self.features.ro_compat;
        let checksum = if ro.contains(RoCompatFeatures::METADATA_CSUM) {
            let seed = csum_seed(&self.features, &self.uuid, 0);
            Some(group_desc_crc32c(seed, group as u32, &out))
        } else if ro.contains(RoCompatFeatures::GDT_CSUM) {
            Some(group_desc_crc16(&self.uuid, group as u32, &out))
        } else {
            None
        };
        if let Some(c) = checksum {
            out[EXT_BG_CHECKSUM_OFFSET..EXT_BG_CHECKSUM_OFFSET + 2].copy_from_slice(&c.to_le_bytes());
        }
        out
    }

    /// Descriptors `[first, first + descs_per_block)` packed into one block.
    fn descriptor_block(&self, first: u64) -> Vec<u8> {
        let mut block = vec![0u8; self.block_size as usize];
        let end = (first + self.descs_per_block()).min(self.group_count());
        let ds = self.desc_size as usize;
        for (i, g) in (first..end).enumerate() {
            block[i * ds..(i + 1) * ds].copy_from_slice(&self.descriptor(g));
        }
        block
    }

    /// Full image: superblock copies, legacy and meta_bg descriptor blocks.
    pub fn build(&self) -> Vec<u8> {
        let bs = self.block_size as u64;
        let mut img = vec![0u8; self.image_len() as usize];
        let dpb = self.descs_per_block();
        let put = |img: &mut Vec<u8>, off: u64, data: &[u8]| {
            let off = off as usize;
            if let Some(dst) = img.get_mut(off..off + data.len()) {
                dst.copy_from_slice(data);
            }
        };

        let legacy: Vec<Vec<u8>> = (0..self.descriptor_blocks_in(0))
            .map(|b| self.descriptor_block(b * dpb))
            .collect();

        for g in 0..self.group_count() {
            let start = self.group_start(g);
            let has_super = self.has_super(g);
            if has_super {
                let sb_off = if g == 0 { EXT_SUPERBLOCK_OFFSET } else { start * bs };
                put(&mut img, sb_off, &self.superblock_bytes(g));
            }

            let meta_group = g / dpb;
            if self.meta_bg() && meta_group >= self.first_meta_bg as u64 {
                if g % dpb == 0 {
                    let block = start + u64::from(has_super);
                    put(&mut img, block * bs, &self.descriptor_block(g));
                }
            } else if has_super {
                for (i, data) in legacy.iter().enumerate() {
                    put(&mut img, (start + 1 + i as u64) * bs, data);
                }
            }
        }
        img
    }
}

fn copy_str(dst: &mut [u8], s: &str) {
    let n = s.len().min(dst.len());
    dst[..n].copy_from_slice(&s.as_bytes()[..n]);
}
