// SPDX-License-Identifier: MIT
//! Integrity checks for one decoded ext superblock.
//!
//! Every check is independent and total: no field is assumed sane, all
//! arithmetic is checked, and a failing check only adds anomalies.

use crate::core::anomaly::AnomalyReport;
use crate::fs::ext::checksum::superblock_checksum;
use crate::fs::ext::constant::*;
use crate::fs::ext::features::{CompatFeatures, IncompatFeatures, RoCompatFeatures, StateFlags};
use crate::superblock::{ChecksumKind, Superblock};
use crate::validator::{CheckContext, ValidatePhases};

pub fn check_superblock(sb: &Superblock, ctx: &CheckContext, rep: &mut AnomalyReport) {
    let phases = ctx.phases;
    if phases.contains(ValidatePhases::SIGNATURE) {
        check_signature(sb, rep);
    }
    if phases.contains(ValidatePhases::GEOMETRY) {
        check_geometry(sb, rep);
    }
    if phases.contains(ValidatePhases::ACCOUNTING) {
        check_accounting(sb, rep);
    }
    if phases.contains(ValidatePhases::DEVICE) {
        check_device_fit(sb, ctx.device_len, rep);
    }
    if phases.contains(ValidatePhases::STATE) {
        check_state(sb, rep);
    }
    if phases.contains(ValidatePhases::FEATURES) {
        check_features(sb, rep);
    }
    if phases.contains(ValidatePhases::TIMESTAMPS) {
        check_timestamps(sb, ctx, rep);
    }
    if phases.contains(ValidatePhases::ORIGIN) {
        check_origin(sb, rep);
    }
}

fn check_signature(sb: &Superblock, rep: &mut AnomalyReport) {
    if sb.magic != EXT_SUPERBLOCK_MAGIC {
        rep.hard("SB.MAGIC", "magic", "== 0xEF53", sb.magic as u64);
    }

    let Some(csum) = sb.checksum else {
        return;
    };
    if csum.kind != ChecksumKind::Crc32c {
        // Reported by the feature checks; nothing to verify against.
        return;
    }
    match superblock_checksum(&sb.raw) {
        Some(computed) if computed != csum.stored => rep.hard(
            "SB.CSUM",
            "checksum",
            format!("== crc32c {computed:#010x}"),
            csum.stored as u64,
        ),
        Some(_) => {}
        None => rep.hard(
            "SB.CSUM",
            "checksum",
            "raw superblock available",
            sb.raw.len() as u64,
        ),
    }
}

fn check_geometry(sb: &Superblock, rep: &mut AnomalyReport) {
    let g = &sb.geometry;
    let bs = g.block_size as u64;

    if !(g.block_size.is_power_of_two()
        && (EXT_MIN_BLOCK_SIZE..=EXT_MAX_BLOCK_SIZE).contains(&g.block_size))
    {
        rep.hard(
            "GEO.BLOCK_SIZE",
            "block_size",
            "power of two in 1024..=65536",
            bs,
        );
    }

    if g.total_blocks == 0 {
        rep.hard("GEO.TOTAL", "total_blocks", "> 0", 0);
    }

    let bits_per_block = bs * EXT_BITS_PER_BYTE;
    let bigalloc = sb.features.ro_compat.contains(RoCompatFeatures::BIGALLOC);
    if g.blocks_per_group == 0 {
        rep.hard("GEO.BPG", "blocks_per_group", "> 0", 0);
    } else if !bigalloc && bits_per_block != 0 && g.blocks_per_group as u64 > bits_per_block {
        rep.hard(
            "GEO.BPG",
            "blocks_per_group",
            format!("<= 8 * block_size ({bits_per_block})"),
            g.blocks_per_group as u64,
        );
    }
    if bigalloc && bits_per_block != 0 && g.clusters_per_group as u64 > bits_per_block {
        rep.hard(
            "GEO.CPG",
            "clusters_per_group",
            format!("<= 8 * block_size ({bits_per_block})"),
            g.clusters_per_group as u64,
        );
    }

    if g.inodes_per_group == 0 {
        rep.hard("GEO.IPG", "inodes_per_group", "> 0", 0);
    } else if bits_per_block != 0 && g.inodes_per_group as u64 > bits_per_block {
        rep.hard(
            "GEO.IPG",
            "inodes_per_group",
            format!("<= 8 * block_size ({bits_per_block})"),
            g.inodes_per_group as u64,
        );
    }

    if g.total_blocks != 0 && g.first_data_block as u64 >= g.total_blocks {
        rep.hard(
            "GEO.FIRST_DATA",
            "first_data_block",
            "< total_blocks",
            g.first_data_block as u64,
        );
    }
    let expected_fdb = u32::from(g.block_size == EXT_MIN_BLOCK_SIZE);
    if g.block_size != 0 && !bigalloc && g.first_data_block != expected_fdb {
        rep.soft(
            "GEO.FIRST_DATA",
            "first_data_block",
            format!("== {expected_fdb} for {}-byte blocks", g.block_size),
            g.first_data_block as u64,
        );
    }

    if let Some(groups) = g.group_count() {
        if g.total_blocks != 0 && g.inodes_per_group != 0 {
            let expected = (g.inodes_per_group as u64).checked_mul(groups);
            if expected != Some(g.inode_count as u64) {
                rep.hard(
                    "GEO.INODES",
                    "inode_count",
                    format!("== inodes_per_group * group_count ({groups} groups)"),
                    g.inode_count as u64,
                );
            }
        }
    }

    if sb.rev_level >= EXT_DYNAMIC_REV {
        let isz = g.inode_size;
        let max = (g.block_size as u64).max(EXT_GOOD_OLD_INODE_SIZE as u64);
        if !(isz.is_power_of_two() && isz >= EXT_GOOD_OLD_INODE_SIZE && isz as u64 <= max) {
            rep.hard(
                "GEO.INODE_SIZE",
                "inode_size",
                "power of two in 128..=block_size",
                isz as u64,
            );
        }
    }

    if sb.is_64bit() {
        let d = g.desc_size;
        if !(d.is_power_of_two() && (EXT_MIN_DESC_SIZE_64BIT..=EXT_MAX_DESC_SIZE).contains(&d)) {
            rep.hard(
                "GEO.DESC_SIZE",
                "desc_size",
                "power of two in 64..=1024 with 64bit",
                d as u64,
            );
        }
    }
}

fn check_accounting(sb: &Superblock, rep: &mut AnomalyReport) {
    let g = &sb.geometry;
    if sb.free_blocks > g.total_blocks {
        rep.hard("ACCT.FREE_BLOCKS", "free_blocks", "<= total_blocks", sb.free_blocks);
    }
    if sb.free_inodes > g.inode_count {
        rep.hard(
            "ACCT.FREE_INODES",
            "free_inodes",
            "<= inode_count",
            sb.free_inodes as u64,
        );
    }
    if sb.reserved_blocks > g.total_blocks {
        rep.hard(
            "ACCT.RESERVED",
            "reserved_blocks",
            "<= total_blocks",
            sb.reserved_blocks,
        );
    }
}

fn check_device_fit(sb: &Superblock, device_len: Option<u64>, rep: &mut AnomalyReport) {
    let Some(device_len) = device_len else {
        return;
    };
    match sb.total_bytes() {
        Some(bytes) if bytes <= device_len => {}
        Some(bytes) => rep.hard(
            "DEV.SIZE",
            "total_blocks",
            format!("total_blocks * block_size <= device length ({device_len})"),
            bytes / (sb.geometry.block_size as u64).max(1),
        ),
        None => rep.hard(
            "DEV.SIZE",
            "total_blocks",
            "total_blocks * block_size representable",
            sb.geometry.total_blocks,
        ),
    }
}

fn check_state(sb: &Superblock, rep: &mut AnomalyReport) {
    let raw = sb.state.bits() as u64;
    if !sb.state.contains(StateFlags::VALID) {
        rep.soft("STATE.DIRTY", "state", "cleanly unmounted", raw);
    }
    if sb.state.contains(StateFlags::ERROR) {
        rep.soft("STATE.ERRORS", "state", "no errors recorded", raw);
    }
    if sb.state.contains(StateFlags::ORPHAN) {
        rep.soft("STATE.ORPHANS", "state", "no orphan recovery pending", raw);
    }
    if !matches!(
        sb.errors_behavior,
        EXT_ERRORS_CONTINUE | EXT_ERRORS_RO | EXT_ERRORS_PANIC
    ) {
        rep.soft(
            "STATE.ERRORS_POLICY",
            "errors_behavior",
            "continue, remount-ro or panic (1..=3)",
            sb.errors_behavior as u64,
        );
    }
    if sb.max_mount_count > 0 && sb.mount_count >= sb.max_mount_count as u16 {
        rep.soft(
            "STATE.MOUNT_COUNT",
            "mount_count",
            format!("< max_mount_count ({})", sb.max_mount_count),
            sb.mount_count as u64,
        );
    }
}

fn check_features(sb: &Superblock, rep: &mut AnomalyReport) {
    if sb.rev_level > EXT_DYNAMIC_REV {
        rep.soft("FEAT.REVISION", "rev_level", "<= 1", sb.rev_level as u64);
    }
    let f = &sb.features;
    if f.unknown_incompat() != 0 {
        rep.soft(
            "FEAT.INCOMPAT",
            "feature_incompat",
            "no unknown incompatible bits",
            f.unknown_incompat() as u64,
        );
    }
    if f.unknown_ro_compat() != 0 {
        rep.soft(
            "FEAT.RO_COMPAT",
            "feature_ro_compat",
            "no unknown read-only compatible bits",
            f.unknown_ro_compat() as u64,
        );
    }
    if let Some(csum) = sb.checksum {
        if let ChecksumKind::Unknown(t) = csum.kind {
            rep.soft(
                "FEAT.CSUM_TYPE",
                "checksum_type",
                "== 1 (crc32c)",
                t as u64,
            );
        }
    }
}

fn check_timestamps(sb: &Superblock, ctx: &CheckContext, rep: &mut AnomalyReport) {
    let t = &sb.timestamps;
    let now = ctx.reference_time;

    if t.mount > now {
        rep.soft(
            "TIME.FUTURE_MOUNT",
            "mount_time",
            format!("<= reference time ({now})"),
            t.mount as u64,
        );
    }
    if t.write > now {
        rep.soft(
            "TIME.FUTURE_WRITE",
            "write_time",
            format!("<= reference time ({now})"),
            t.write as u64,
        );
    }
    if t.mount != 0 && t.mkfs != 0 && t.mount < t.mkfs {
        rep.soft(
            "TIME.MOUNT_BEFORE_MKFS",
            "mount_time",
            format!(">= mkfs_time ({})", t.mkfs),
            t.mount as u64,
        );
    }
    if t.mount != 0 && now.saturating_sub(t.mount) > ctx.stale_mount_age {
        rep.soft(
            "TIME.STALE_MOUNT",
            "mount_time",
            format!("within {}s of reference time", ctx.stale_mount_age),
            t.mount as u64,
        );
    }
}

fn check_origin(sb: &Superblock, rep: &mut AnomalyReport) {
    if sb.origin.is_backup && sb.block_group_nr as u64 != sb.origin.group {
        rep.soft(
            "ORIGIN.GROUP",
            "block_group_nr",
            format!("== group read from ({})", sb.origin.group),
            sb.block_group_nr as u64,
        );
    }
}

/// ext2, ext3 or ext4, the way blkid tells them apart.
pub fn flavor(sb: &Superblock) -> &'static str {
    let f = &sb.features;
    let ext4_incompat = IncompatFeatures::EXTENTS
        | IncompatFeatures::IS_64BIT
        | IncompatFeatures::FLEX_BG
        | IncompatFeatures::MMP
        | IncompatFeatures::CSUM_SEED
        | IncompatFeatures::INLINE_DATA;
    let ext4_ro = RoCompatFeatures::HUGE_FILE
        | RoCompatFeatures::GDT_CSUM
        | RoCompatFeatures::DIR_NLINK
        | RoCompatFeatures::EXTRA_ISIZE
        | RoCompatFeatures::METADATA_CSUM;

    if f.incompat.intersects(ext4_incompat) || f.ro_compat.intersects(ext4_ro) {
        "ext4"
    } else if f.compat.contains(CompatFeatures::HAS_JOURNAL) {
        "ext3"
    } else {
        "ext2"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::anomaly::{ConfidenceVerdict, Severity};
    use crate::format::CandidateOrigin;
    use crate::fs::ext::builder::ExtImageBuilder;
    use crate::fs::ext::parser::parse_region;

    const NOW: i64 = 1_750_000_000;

    fn ctx(device_len: Option<u64>) -> CheckContext {
        CheckContext {
            phases: ValidatePhases::ALL,
            device_len,
            reference_time: NOW,
            stale_mount_age: 5 * 365 * 86_400,
        }
    }

    fn run(raw: &[u8], origin: CandidateOrigin, device_len: Option<u64>) -> ConfidenceVerdict {
        let sb = parse_region(raw, origin).unwrap();
        let mut rep = AnomalyReport::default();
        check_superblock(&sb, &ctx(device_len), &mut rep);
        rep.into_verdict()
    }

    fn set_u32(raw: &mut [u8], off: usize, v: u32) {
        raw[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn codes(v: &ConfidenceVerdict) -> Vec<&'static str> {
        v.anomalies().iter().map(|a| a.code).collect()
    }

    #[test]
    fn test_consistent_superblock_is_valid() {
        for b in [
            ExtImageBuilder::new(1024, 65536),
            ExtImageBuilder::new(4096, 100_000).with_64bit().with_flex_bg(4),
            ExtImageBuilder::new(4096, 100_000).with_metadata_csum(),
            ExtImageBuilder::new(2048, 50_000).with_gdt_csum(),
        ] {
            let raw = b.superblock_bytes(0);
            let v = run(&raw, CandidateOrigin::primary(1024), Some(b.image_len()));
            assert_eq!(v, ConfidenceVerdict::Valid);
        }
    }

    #[test]
    fn test_free_blocks_over_total_is_corrupt() {
        let mut raw = ExtImageBuilder::new(1024, 65536).superblock_bytes(0);
        set_u32(&mut raw, 0x0C, 70_000);
        let v = run(&raw, CandidateOrigin::primary(1024), None);
        assert!(v.is_corrupt());
        let a = v
            .anomalies()
            .iter()
            .find(|a| a.field == "free_blocks")
            .unwrap();
        assert_eq!(a.constraint, "<= total_blocks");
        assert_eq!(a.observed, 70_000);
        assert_eq!(a.severity, Severity::Error);
    }

    #[test]
    fn test_checksum_mismatch_is_hard() {
        let b = ExtImageBuilder::new(4096, 100_000).with_metadata_csum();
        let mut raw = b.superblock_bytes(0);
        raw[0x78] = b'X'; // volume label, covered by the checksum
        let v = run(&raw, CandidateOrigin::primary(1024), None);
        assert_eq!(codes(&v), vec!["SB.CSUM"]);
        assert!(v.is_corrupt());
    }

    #[test]
    fn test_unknown_checksum_type_is_soft() {
        let mut raw = ExtImageBuilder::new(4096, 100_000).with_metadata_csum().superblock_bytes(0);
        raw[0x175] = 7;
        let v = run(&raw, CandidateOrigin::primary(1024), None);
        assert_eq!(codes(&v), vec!["FEAT.CSUM_TYPE"]);
    }

    #[test]
    fn test_geometry_hard_checks() {
        let b = ExtImageBuilder::new(1024, 65536);

        let mut raw = b.superblock_bytes(0);
        set_u32(&mut raw, 0x20, 0); // blocks_per_group
        assert!(codes(&run(&raw, CandidateOrigin::primary(1024), None)).contains(&"GEO.BPG"));

        let mut raw = b.superblock_bytes(0);
        set_u32(&mut raw, 0x18, 7); // 128 KiB blocks
        let v = run(&raw, CandidateOrigin::primary(1024), None);
        assert!(codes(&v).contains(&"GEO.BLOCK_SIZE"));

        let mut raw = b.superblock_bytes(0);
        set_u32(&mut raw, 0x18, 40); // unrepresentable
        let v = run(&raw, CandidateOrigin::primary(1024), None);
        assert!(v.is_corrupt());
        assert!(codes(&v).contains(&"GEO.BLOCK_SIZE"));

        let mut raw = b.superblock_bytes(0);
        set_u32(&mut raw, 0x00, 20_000); // inode count
        assert_eq!(codes(&run(&raw, CandidateOrigin::primary(1024), None)), vec!["GEO.INODES"]);

        let mut raw = b.superblock_bytes(0);
        raw[0x58..0x5A].copy_from_slice(&100u16.to_le_bytes());
        assert_eq!(
            codes(&run(&raw, CandidateOrigin::primary(1024), None)),
            vec!["GEO.INODE_SIZE"]
        );
    }

    #[test]
    fn test_device_too_small() {
        let b = ExtImageBuilder::new(1024, 65536);
        let raw = b.superblock_bytes(0);
        let v = run(&raw, CandidateOrigin::primary(1024), Some(1 << 20));
        assert_eq!(codes(&v), vec!["DEV.SIZE"]);
        assert_eq!(v.anomalies()[0].observed, 65536);
    }

    #[test]
    fn test_state_and_time_are_soft() {
        let b = ExtImageBuilder::new(1024, 65536)
            .state(0x0002)
            .mount_time(NOW as u32 + 100)
            .mount_counts(30, 20);
        let raw = b.superblock_bytes(0);
        let v = run(&raw, CandidateOrigin::primary(1024), None);
        assert!(matches!(v, ConfidenceVerdict::ValidWithWarnings(_)));
        let c = codes(&v);
        assert!(c.contains(&"STATE.DIRTY"));
        assert!(c.contains(&"STATE.ERRORS"));
        assert!(c.contains(&"STATE.MOUNT_COUNT"));
        assert!(c.contains(&"TIME.FUTURE_MOUNT"));
    }

    #[test]
    fn test_errors_policy_range() {
        let b = ExtImageBuilder::new(1024, 65536);
        let mut raw = b.superblock_bytes(0);
        raw[0x3C..0x3E].copy_from_slice(&EXT_ERRORS_PANIC.to_le_bytes());
        assert!(codes(&run(&raw, CandidateOrigin::primary(1024), None)).is_empty());

        raw[0x3C..0x3E].copy_from_slice(&9u16.to_le_bytes());
        let v = run(&raw, CandidateOrigin::primary(1024), None);
        assert!(matches!(v, ConfidenceVerdict::ValidWithWarnings(_)));
        assert_eq!(codes(&v), vec!["STATE.ERRORS_POLICY"]);
        assert_eq!(v.anomalies()[0].observed, 9);
    }

    #[test]
    fn test_stale_and_inverted_mount() {
        let raw = ExtImageBuilder::new(1024, 65536)
            .mount_time(1_000_000_000)
            .superblock_bytes(0);
        let c = codes(&run(&raw, CandidateOrigin::primary(1024), None));
        assert_eq!(c, vec!["TIME.MOUNT_BEFORE_MKFS", "TIME.STALE_MOUNT"]);
    }

    #[test]
    fn test_unknown_features_are_soft() {
        let mut raw = ExtImageBuilder::new(1024, 65536).superblock_bytes(0);
        set_u32(&mut raw, 0x60, 0x0000_0002 | 0x0100_0000);
        set_u32(&mut raw, 0x4C, 3);
        let c = codes(&run(&raw, CandidateOrigin::primary(1024), None));
        assert_eq!(c, vec!["FEAT.REVISION", "FEAT.INCOMPAT"]);
    }

    #[test]
    fn test_backup_in_wrong_group() {
        let b = ExtImageBuilder::new(1024, 65536);
        let raw = b.superblock_bytes(3);
        let ok = run(&raw, CandidateOrigin::backup(24577 * 1024, 3), None);
        assert!(ok.is_valid());
        let moved = run(&raw, CandidateOrigin::backup(8193 * 1024, 1), None);
        assert_eq!(codes(&moved), vec!["ORIGIN.GROUP"]);
    }

    #[test]
    fn test_phases_can_be_disabled() {
        let mut raw = ExtImageBuilder::new(1024, 65536).superblock_bytes(0);
        set_u32(&mut raw, 0x0C, 70_000);
        let sb = parse_region(&raw, CandidateOrigin::primary(1024)).unwrap();
        let mut c = ctx(None);
        c.phases.remove(ValidatePhases::ACCOUNTING);
        let mut rep = AnomalyReport::default();
        check_superblock(&sb, &c, &mut rep);
        assert!(rep.is_empty());
    }

    #[test]
    fn test_flavor() {
        let raw = ExtImageBuilder::new(1024, 8192).superblock_bytes(0);
        let sb = parse_region(&raw, CandidateOrigin::primary(1024)).unwrap();
        assert_eq!(flavor(&sb), "ext2");
        let raw = ExtImageBuilder::new(1024, 8192).with_journal().superblock_bytes(0);
        let sb = parse_region(&raw, CandidateOrigin::primary(1024)).unwrap();
        assert_eq!(flavor(&sb), "ext3");
        let raw = ExtImageBuilder::new(4096, 8192).with_64bit().superblock_bytes(0);
        let sb = parse_region(&raw, CandidateOrigin::primary(1024)).unwrap();
        assert_eq!(flavor(&sb), "ext4");
    }
}
