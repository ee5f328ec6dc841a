// SPDX-License-Identifier: MIT
//! Backup locations and group descriptor table reader.

use tracing::{debug, warn};
use zerocopy::FromBytes;

use phxio::{BlockIO, BlockIOExt};

use crate::core::anomaly::{Anomaly, AnomalyReport};
use crate::core::errors::BlockIOResult;
use crate::fs::ext::checksum::{csum_seed, group_desc_crc16, group_desc_crc32c};
use crate::fs::ext::constant::*;
use crate::fs::ext::features::{GroupFlags, IncompatFeatures, RoCompatFeatures};
use crate::fs::ext::types::{ExtGroupDescHi, ExtGroupDescLo};
use crate::fs::ext::utils;
use crate::groups::*;
use crate::superblock::Superblock;

fn usable_block_size(bs: u32) -> bool {
    bs.is_power_of_two() && (EXT_MIN_BLOCK_SIZE..=EXT_MAX_BLOCK_SIZE).contains(&bs)
}

/// `(group, byte offset)` of every backup copy `sb` implies, ascending,
/// at most `limit` of them.
pub fn backup_superblock_offsets(sb: &Superblock, limit: usize) -> Vec<(u64, u64)> {
    let g = &sb.geometry;
    if !g.is_walkable() || !usable_block_size(g.block_size) {
        return Vec::new();
    }
    let Some(count) = g.group_count() else {
        return Vec::new();
    };
    utils::backup_groups(count, &sb.features, sb.backup_groups, limit)
        .into_iter()
        .filter_map(|group| sb.group_superblock_offset(group).map(|off| (group, off)))
        .collect()
}

/// Group 1 backup for every block size, assuming mke2fs defaults
/// (`blocks_per_group = 8 * block_size`). Same table e2fsck walks when the
/// primary is unusable.
pub fn fallback_probe_offsets() -> Vec<(u64, u64)> {
    (0..=EXT_MAX_BLOCK_SIZE.trailing_zeros() - EXT_MIN_BLOCK_LOG_SIZE)
        .map(|log| {
            let bs = (EXT_MIN_BLOCK_SIZE << log) as u64;
            let first_data_block = u64::from(log == 0);
            let group_start = first_data_block + default_blocks_per_group(bs as u32);
            (1, group_start * bs)
        })
        .collect()
}

#[derive(Clone, Copy)]
enum DescCsum {
    None,
    Crc32c(u32),
    Crc16,
}

/// Per-table constants shared by every entry check.
struct EntryContext<'a> {
    sb: &'a Superblock,
    desc_size: usize,
    wide: bool,
    flex_bg: bool,
    itable_blocks: u64,
    device_blocks: Option<u64>,
    csum: DescCsum,
}

/// Reads the table through the copy `sb` was decoded from.
pub fn read<IO: BlockIO + ?Sized>(
    io: &mut IO,
    sb: &Superblock,
    opts: &GroupReadOptions,
) -> BlockIOResult<GroupDescriptorTable> {
    let g = &sb.geometry;
    let expected = g.group_count().unwrap_or(0);

    if !g.is_walkable() || !usable_block_size(g.block_size) {
        warn!(offset = sb.origin.offset, "geometry unusable, group descriptors skipped");
        let a = Anomaly::warn(
            "GDT.GEOMETRY",
            "block_size",
            "walkable geometry (block size, group sizes, first data block)",
            g.block_size as u64,
        );
        return Ok(GroupDescriptorTable::empty(
            expected,
            TruncationReason::UnusableGeometry,
            vec![a],
        ));
    }

    let bs = g.block_size as u64;
    let desc_size = sb.descriptor_size();
    if !(desc_size.is_power_of_two()
        && desc_size >= EXT_MIN_DESC_SIZE
        && desc_size <= EXT_MAX_DESC_SIZE
        && desc_size as u64 <= bs)
    {
        let a = Anomaly::warn(
            "GDT.DESC_SIZE",
            "desc_size",
            "power of two in 32..=min(1024, block_size)",
            desc_size as u64,
        );
        return Ok(GroupDescriptorTable::empty(
            expected,
            TruncationReason::UnusableGeometry,
            vec![a],
        ));
    }

    // The table follows the block holding this superblock copy. With 1 KiB
    // blocks and first_data_block 0 the primary sits in block 1, not 0.
    let Some(table_start) = (sb.origin.offset / bs)
        .checked_add(1)
        .filter(|&b| b < g.total_blocks)
    else {
        let a = Anomaly::warn(
            "GDT.LOCATION",
            "offset",
            "table block inside the filesystem",
            sb.origin.offset,
        );
        return Ok(GroupDescriptorTable::empty(
            expected,
            TruncationReason::UnusableGeometry,
            vec![a],
        ));
    };

    let per_block = bs / desc_size as u64;
    let wanted = expected.min(opts.max_groups);
    let mut report = AnomalyReport::default();
    let mut truncation = None;
    if expected > opts.max_groups {
        truncation = Some(TruncationReason::GroupCap);
        report.soft(
            "GDT.CAPPED",
            "group_count",
            format!("<= max_groups ({})", opts.max_groups),
            expected,
        );
    }

    let ro = sb.features.ro_compat;
    let csum = if ro.contains(RoCompatFeatures::METADATA_CSUM) {
        DescCsum::Crc32c(csum_seed(&sb.features, &sb.uuid, sb.checksum_seed))
    } else if ro.contains(RoCompatFeatures::GDT_CSUM) {
        DescCsum::Crc16
    } else {
        DescCsum::None
    };

    let ctx = EntryContext {
        sb,
        desc_size: desc_size as usize,
        wide: sb.is_64bit() && desc_size >= EXT_MIN_DESC_SIZE_64BIT,
        flex_bg: sb.features.incompat.contains(IncompatFeatures::FLEX_BG),
        itable_blocks: (g.inodes_per_group as u64 * g.inode_size as u64).div_ceil(bs),
        device_blocks: io.device_len().map(|len| len / bs),
        csum,
    };

    debug!(
        table_block = table_start,
        expected,
        desc_size,
        "reading group descriptors"
    );

    let mut entries = Vec::with_capacity(wanted.min(1 << 16) as usize);
    let mut buf = vec![0u8; bs as usize];
    for bi in 0..wanted.div_ceil(per_block) {
        let Some(off) = table_block(sb, table_start, bi, per_block).and_then(|b| g.block_offset(b))
        else {
            truncation = Some(TruncationReason::UnusableGeometry);
            break;
        };
        if !io.fits(off, bs) {
            warn!(offset = off, read = entries.len(), expected, "group descriptor table runs past device end");
            truncation = Some(TruncationReason::DeviceEnd);
            report.soft(
                "GDT.TRUNCATED",
                "group_count",
                "descriptor table inside device",
                entries.len() as u64,
            );
            break;
        }
        io.read_at(off, &mut buf)?;

        let first = bi * per_block;
        for (i, raw) in buf.chunks_exact(ctx.desc_size).enumerate() {
            let group = first + i as u64;
            if group >= wanted {
                break;
            }
            entries.push(decode_entry(group, raw, &ctx));
        }
    }

    let degraded = entries.iter().filter(|e| e.is_degraded()).count();
    if degraded > 0 {
        warn!(degraded, total = entries.len(), "degraded group descriptors");
    }

    let readable = entries.len() as u64;
    Ok(GroupDescriptorTable {
        location: g.block_offset(table_start),
        descriptor_size: desc_size,
        expected,
        entries,
        anomalies: report.anomalies,
        truncated: truncation.map(|reason| Truncation { reason, readable }),
    })
}

/// Block holding descriptors `[bi * per_block, (bi + 1) * per_block)`.
fn table_block(sb: &Superblock, table_start: u64, bi: u64, per_block: u64) -> Option<u64> {
    let meta_bg = sb.features.incompat.contains(IncompatFeatures::META_BG);
    if meta_bg && bi >= sb.first_meta_bg as u64 {
        // Each meta group keeps its descriptor block in its first group.
        let first_group = bi.checked_mul(per_block)?;
        let base = sb.geometry.group_first_block(first_group)?;
        base.checked_add(u64::from(sb.has_super(first_group)))
    } else {
        table_start.checked_add(bi)
    }
}

fn decode_entry(group: u64, raw: &[u8], ctx: &EntryContext<'_>) -> GroupDescriptor {
    let lo = ExtGroupDescLo::read_from_prefix(raw)
        .map(|(d, _)| d)
        .unwrap_or_default();
    let hi = if ctx.wide {
        raw.get(EXT_MIN_DESC_SIZE as usize..)
            .and_then(|r| ExtGroupDescHi::read_from_prefix(r).ok())
            .map(|(d, _)| d)
            .unwrap_or_default()
    } else {
        ExtGroupDescHi::default()
    };

    let join32 = |l: u32, h: u32| l as u64 | (h as u64) << 32;
    let join16 = |l: u16, h: u16| l as u32 | (h as u32) << 16;

    let mut desc = GroupDescriptor {
        group_index: group,
        block_bitmap: join32(lo.bg_block_bitmap_lo.get(), hi.bg_block_bitmap_hi.get()),
        inode_bitmap: join32(lo.bg_inode_bitmap_lo.get(), hi.bg_inode_bitmap_hi.get()),
        inode_table: join32(lo.bg_inode_table_lo.get(), hi.bg_inode_table_hi.get()),
        free_blocks: join16(lo.bg_free_blocks_count_lo.get(), hi.bg_free_blocks_count_hi.get()),
        free_inodes: join16(lo.bg_free_inodes_count_lo.get(), hi.bg_free_inodes_count_hi.get()),
        used_dirs: join16(lo.bg_used_dirs_count_lo.get(), hi.bg_used_dirs_count_hi.get()),
        itable_unused: join16(lo.bg_itable_unused_lo.get(), hi.bg_itable_unused_hi.get()),
        flags: GroupFlags::from_bits_retain(lo.bg_flags.get()),
        checksum: lo.bg_checksum.get(),
        status: EntryStatus::Ok,
    };

    let found = check_entry(&desc, raw, ctx);
    if !found.is_empty() {
        debug!(group, anomalies = found.len(), "group descriptor degraded");
        desc.status = EntryStatus::Degraded(found);
    }
    desc
}

fn check_entry(d: &GroupDescriptor, raw: &[u8], ctx: &EntryContext<'_>) -> Vec<Anomaly> {
    let g = &ctx.sb.geometry;
    let mut rep = AnomalyReport::default();
    let fdb = g.first_data_block as u64;
    let total = g.total_blocks;
    let group_first = g.group_first_block(d.group_index).unwrap_or(u64::MAX);
    let group_end = g.group_end_block(d.group_index).unwrap_or(0);

    for (field, block) in [
        ("block_bitmap", d.block_bitmap),
        ("inode_bitmap", d.inode_bitmap),
        ("inode_table", d.inode_table),
    ] {
        if block < fdb || block >= total {
            rep.hard("GD.RANGE", field, "in [first_data_block, total_blocks)", block);
        }
        if let Some(dev) = ctx.device_blocks {
            if block >= dev {
                rep.hard("GD.DEVICE", field, format!("< device blocks ({dev})"), block);
            }
        }
        if !ctx.flex_bg && (block < group_first || block >= group_end) {
            rep.hard("GD.GROUP", field, "inside own group without flex_bg", block);
        }
    }
    if d.inode_table < total && d.inode_table.saturating_add(ctx.itable_blocks) > total {
        rep.hard(
            "GD.ITABLE_END",
            "inode_table",
            format!("inode_table + {} <= total_blocks", ctx.itable_blocks),
            d.inode_table,
        );
    }

    let bpg = g.blocks_per_group as u64;
    let ipg = g.inodes_per_group as u64;
    if d.free_blocks as u64 > bpg {
        rep.hard("GD.FREE_BLOCKS", "free_blocks", "<= blocks_per_group", d.free_blocks as u64);
    }
    for (field, value) in [
        ("free_inodes", d.free_inodes),
        ("used_dirs", d.used_dirs),
        ("itable_unused", d.itable_unused),
    ] {
        if value as u64 > ipg {
            rep.hard("GD.INODES", field, "<= inodes_per_group", value as u64);
        }
    }

    let group32 = d.group_index as u32;
    let bytes = &raw[..ctx.desc_size.min(raw.len())];
    let expected = match ctx.csum {
        DescCsum::None => None,
        DescCsum::Crc32c(seed) => Some(group_desc_crc32c(seed, group32, bytes)),
        DescCsum::Crc16 => Some(group_desc_crc16(&ctx.sb.uuid, group32, bytes)),
    };
    if let Some(expected) = expected {
        if expected != d.checksum {
            rep.hard(
                "GD.CSUM",
                "checksum",
                format!("== {expected:#06x}"),
                d.checksum as u64,
            );
        }
    }

    rep.anomalies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::CandidateOrigin;
    use crate::fs::ext::builder::ExtImageBuilder;
    use crate::fs::ext::parser::parse_region;
    use phxio::prelude::*;

    fn primary(b: &ExtImageBuilder) -> Superblock {
        parse_region(&b.superblock_bytes(0), CandidateOrigin::primary(1024)).unwrap()
    }

    fn patch_u32(img: &mut [u8], off: u64, v: u32) {
        let off = off as usize;
        img[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    #[test]
    fn test_fallback_probes() {
        let probes = fallback_probe_offsets();
        assert_eq!(probes.len(), 7);
        assert_eq!(probes[0], (1, 8193 * 1024));
        assert_eq!(probes[1], (1, 16384 * 2048));
        assert_eq!(probes[2], (1, 32768 * 4096));
        assert_eq!(probes[6], (1, 524_288 * 65_536));
    }

    #[test]
    fn test_backup_offsets() {
        let b = ExtImageBuilder::new(1024, 65536);
        let sb = primary(&b);
        let offs = backup_superblock_offsets(&sb, 16);
        assert_eq!(
            offs,
            vec![
                (1, 8193 * 1024),
                (3, 24577 * 1024),
                (5, 40961 * 1024),
                (7, 57345 * 1024)
            ]
        );
        assert_eq!(backup_superblock_offsets(&sb, 2).len(), 2);
    }

    #[test]
    fn test_read_clean_table() {
        for b in [
            ExtImageBuilder::new(1024, 65536),
            ExtImageBuilder::new(4096, 4096)
                .blocks_per_group(1024)
                .inodes_per_group(256)
                .with_64bit()
                .with_metadata_csum(),
            ExtImageBuilder::new(2048, 6000)
                .blocks_per_group(2048)
                .inodes_per_group(512)
                .with_gdt_csum()
                .with_flex_bg(2),
        ] {
            let img = b.build();
            let mut io = MemBlockIO::new(&img);
            let sb = primary(&b);
            let t = read(&mut io, &sb, &GroupReadOptions::default()).unwrap();
            assert_eq!(t.expected, b.group_count());
            assert_eq!(t.entries.len() as u64, b.group_count());
            assert!(t.is_complete());
            assert_eq!(t.degraded().count(), 0, "{:?}", t.degraded().next());
            assert_eq!(t.free_blocks_sum(), b.free_blocks_total());
            for (i, e) in t.entries.iter().enumerate() {
                assert_eq!(e.group_index, i as u64);
            }
        }
    }

    #[test]
    fn test_single_degraded_entry() {
        let b = ExtImageBuilder::new(1024, 65536);
        let mut img = b.build();
        let sb = primary(&b);
        let entry3 = 2 * 1024 + 3 * 32;
        patch_u32(&mut img, entry3 + 8, 1_000_000); // inode_table far past the device

        let mut io = MemBlockIO::new(&img);
        let t = read(&mut io, &sb, &GroupReadOptions::default()).unwrap();
        assert_eq!(t.entries.len(), 8);
        let degraded: Vec<u64> = t.degraded().map(|e| e.group_index).collect();
        assert_eq!(degraded, vec![3]);
        let e = &t.entries[3];
        assert_eq!(e.inode_table, 1_000_000);
        assert!(e.anomalies().iter().any(|a| a.code == "GD.DEVICE" && a.field == "inode_table"));
    }

    #[test]
    fn test_checksum_mismatch_degrades() {
        let b = ExtImageBuilder::new(4096, 4096)
            .blocks_per_group(1024)
            .inodes_per_group(256)
            .with_metadata_csum();
        let mut img = b.build();
        let sb = primary(&b);
        // used_dirs of group 1 (table at block 1)
        let off = 4096 + 32 + 0x10;
        img[off] ^= 0x01;
        let mut io = MemBlockIO::new(&img);
        let t = read(&mut io, &sb, &GroupReadOptions::default()).unwrap();
        let degraded: Vec<_> = t.degraded().collect();
        assert_eq!(degraded.len(), 1);
        assert_eq!(degraded[0].group_index, 1);
        assert_eq!(degraded[0].anomalies()[0].code, "GD.CSUM");
    }

    #[test]
    fn test_table_past_device_end() {
        let b = ExtImageBuilder::new(1024, 65536);
        let img = b.build();
        let sb = primary(&b);
        // Only block 0 and 1 survive: the table block (2) is gone.
        let mut io = MemBlockIO::new(&img[..2048]);
        let t = read(&mut io, &sb, &GroupReadOptions::default()).unwrap();
        assert!(t.entries.is_empty());
        assert_eq!(
            t.truncated,
            Some(Truncation {
                reason: TruncationReason::DeviceEnd,
                readable: 0
            })
        );
        assert_eq!(t.anomalies[0].code, "GDT.TRUNCATED");
    }

    #[test]
    fn test_group_cap() {
        let b = ExtImageBuilder::new(1024, 65536);
        let img = b.build();
        let sb = primary(&b);
        let mut io = MemBlockIO::new(&img);
        let t = read(&mut io, &sb, &GroupReadOptions::default().with_max_groups(5)).unwrap();
        assert_eq!(t.entries.len(), 5);
        assert_eq!(t.expected, 8);
        assert_eq!(t.truncated.map(|x| x.reason), Some(TruncationReason::GroupCap));
    }

    #[test]
    fn test_read_through_backup_copy() {
        let b = ExtImageBuilder::new(1024, 65536);
        let mut img = b.build();
        // Wipe the primary table; the group 1 copy must still be readable.
        img[2048..3072].fill(0);
        let sb = parse_region(&b.superblock_bytes(1), CandidateOrigin::backup(8193 * 1024, 1))
            .unwrap();
        let mut io = MemBlockIO::new(&img);
        let t = read(&mut io, &sb, &GroupReadOptions::default()).unwrap();
        assert_eq!(t.location, Some(8194 * 1024));
        assert_eq!(t.degraded().count(), 0);
    }

    #[test]
    fn test_table_follows_superblock_block() {
        // 1 KiB blocks with first_data_block 0: the primary is in block 1
        // and its table in block 2, as with first_data_block 1.
        let b = ExtImageBuilder::new(1024, 65536);
        let img = b.build();
        let mut raw = b.superblock_bytes(0);
        raw[0x14..0x18].copy_from_slice(&0u32.to_le_bytes());
        let sb = parse_region(&raw, CandidateOrigin::primary(1024)).unwrap();
        assert_eq!(sb.geometry.first_data_block, 0);

        let mut io = MemBlockIO::new(&img);
        let t = read(&mut io, &sb, &GroupReadOptions::default()).unwrap();
        assert_eq!(t.location, Some(2 * 1024));
        assert_eq!(t.entries.len(), 8);
        assert_eq!(t.degraded().count(), 0, "{:?}", t.degraded().next());
    }

    #[test]
    fn test_table_location_outside_filesystem() {
        let b = ExtImageBuilder::new(1024, 65536);
        let img = b.build();
        let sb = parse_region(
            &b.superblock_bytes(0),
            CandidateOrigin::backup(65535 * 1024, 7),
        )
        .unwrap();
        let mut io = MemBlockIO::new(&img);
        let t = read(&mut io, &sb, &GroupReadOptions::default()).unwrap();
        assert!(t.entries.is_empty());
        assert_eq!(t.anomalies[0].code, "GDT.LOCATION");
    }

    #[test]
    fn test_meta_bg_layout() {
        // 1 KiB blocks, 32-byte descriptors: 32 per block, 40 groups.
        let b = ExtImageBuilder::new(1024, 40 * 1024 + 1)
            .blocks_per_group(1024)
            .inodes_per_group(128)
            .with_meta_bg(1);
        let img = b.build();
        let sb = primary(&b);
        let mut io = MemBlockIO::new(&img);
        let t = read(&mut io, &sb, &GroupReadOptions::default()).unwrap();
        assert_eq!(t.entries.len(), 40);
        assert_eq!(t.degraded().count(), 0, "{:?}", t.degraded().next());
    }

    #[test]
    fn test_unusable_geometry() {
        let b = ExtImageBuilder::new(1024, 65536);
        let mut raw = b.superblock_bytes(0);
        raw[0x20..0x24].copy_from_slice(&0u32.to_le_bytes());
        let sb = parse_region(&raw, CandidateOrigin::primary(1024)).unwrap();
        let img = b.build();
        let mut io = MemBlockIO::new(&img);
        let t = read(&mut io, &sb, &GroupReadOptions::default()).unwrap();
        assert_eq!(t.expected, 0);
        assert_eq!(
            t.truncated.map(|x| x.reason),
            Some(TruncationReason::UnusableGeometry)
        );
    }

    #[test]
    fn test_device_fault_propagates() {
        let b = ExtImageBuilder::new(1024, 65536);
        let img = b.build();
        let sb = primary(&b);
        let mut mem = MemBlockIO::new(&img);
        mem.close();
        assert_eq!(
            read(&mut mem, &sb, &GroupReadOptions::default()),
            Err(DeviceReadError::Closed)
        );
    }
}
