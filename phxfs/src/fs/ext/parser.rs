// SPDX-License-Identifier: MIT

use tracing::trace;
use zerocopy::FromBytes;

use crate::core::errors::*;
use crate::format::{CandidateOrigin, FsFamily, SuperblockCandidate};
use crate::fs::ext::checksum::stored_superblock_checksum;
use crate::fs::ext::constant::*;
use crate::fs::ext::features::{FeatureSet, StateFlags};
use crate::fs::ext::types::ExtSuperblockRaw;
use crate::superblock::{Checksum, ChecksumKind, Geometry, Superblock, Timestamps};

/// Magic at 0x38, nothing else.
pub fn detect(bytes: &[u8]) -> bool {
    matches!(
        bytes.get(EXT_MAGIC_OFFSET..EXT_MAGIC_OFFSET + 2),
        Some(m) if u16::from_le_bytes([m[0], m[1]]) == EXT_SUPERBLOCK_MAGIC
    )
}

pub fn parse(candidate: &SuperblockCandidate) -> DecodeResult<Superblock> {
    parse_region(&candidate.raw[..], candidate.origin())
}

/// Decodes a superblock region.
///
/// Only structure is checked here (length and magic). Field values are taken
/// as they are and graded later.
pub fn parse_region(bytes: &[u8], origin: CandidateOrigin) -> DecodeResult<Superblock> {
    let (raw, _) = ExtSuperblockRaw::read_from_prefix(bytes).map_err(|_| DecodeError::TooShort {
        needed: EXT_SUPERBLOCK_SIZE,
        actual: bytes.len(),
    })?;

    let magic = raw.s_magic.get();
    if magic != EXT_SUPERBLOCK_MAGIC {
        return Err(DecodeError::BadMagic {
            expected: EXT_SUPERBLOCK_MAGIC as u64,
            found: magic as u64,
        });
    }

    let features = FeatureSet::from_raw(
        raw.s_feature_compat.get(),
        raw.s_feature_incompat.get(),
        raw.s_feature_ro_compat.get(),
    );
    let wide = features.is_64bit();
    let join = |lo: u32, hi: u32| -> u64 {
        if wide {
            lo as u64 | (hi as u64) << 32
        } else {
            lo as u64
        }
    };

    let rev_level = raw.s_rev_level.get();
    let log_block_size = raw.s_log_block_size.get();

    let geometry = Geometry {
        block_size: block_size_from_log(log_block_size),
        log_block_size,
        log_cluster_size: raw.s_log_cluster_size.get(),
        total_blocks: join(raw.s_blocks_count_lo.get(), raw.s_blocks_count_hi.get()),
        first_data_block: raw.s_first_data_block.get(),
        blocks_per_group: raw.s_blocks_per_group.get(),
        clusters_per_group: raw.s_clusters_per_group.get(),
        inodes_per_group: raw.s_inodes_per_group.get(),
        inode_count: raw.s_inodes_count.get(),
        // Revision 0 has no s_inode_size and fixed 128-byte inodes
        inode_size: if rev_level == EXT_GOOD_OLD_REV {
            EXT_GOOD_OLD_INODE_SIZE
        } else {
            raw.s_inode_size.get()
        },
        desc_size: raw.s_desc_size.get(),
    };

    let timestamps = Timestamps {
        mkfs: widen_time(raw.s_mkfs_time.get(), raw.s_mkfs_time_hi),
        mount: widen_time(raw.s_mtime.get(), raw.s_mtime_hi),
        write: widen_time(raw.s_wtime.get(), raw.s_wtime_hi),
        last_check: widen_time(raw.s_lastcheck.get(), raw.s_lastcheck_hi),
    };

    let checksum_type = raw.s_checksum_type;
    let checksum = features.has_metadata_csum().then(|| Checksum {
        kind: match checksum_type {
            EXT_CHECKSUM_TYPE_CRC32C => ChecksumKind::Crc32c,
            other => ChecksumKind::Unknown(other),
        },
        stored: stored_superblock_checksum(bytes).unwrap_or(raw.s_checksum.get()),
    });

    let sb = Superblock {
        family: FsFamily::Ext,
        origin,
        magic,
        geometry,
        free_blocks: join(raw.s_free_blocks_count_lo.get(), raw.s_free_blocks_count_hi.get()),
        reserved_blocks: join(raw.s_r_blocks_count_lo.get(), raw.s_r_blocks_count_hi.get()),
        free_inodes: raw.s_free_inodes_count.get(),
        features,
        timestamps,
        state: StateFlags::from_bits_retain(raw.s_state.get()),
        errors_behavior: raw.s_errors.get(),
        mount_count: raw.s_mnt_count.get(),
        max_mount_count: raw.s_max_mnt_count.get(),
        rev_level,
        minor_rev_level: raw.s_minor_rev_level.get(),
        creator_os: raw.s_creator_os.get(),
        block_group_nr: raw.s_block_group_nr.get(),
        uuid: raw.s_uuid,
        volume_label: decode_str(&raw.s_volume_name),
        last_mounted: decode_str(&raw.s_last_mounted),
        backup_groups: [raw.s_backup_bgs[0].get(), raw.s_backup_bgs[1].get()],
        reserved_gdt_blocks: raw.s_reserved_gdt_blocks.get(),
        first_meta_bg: raw.s_first_meta_bg.get(),
        log_groups_per_flex: raw.s_log_groups_per_flex,
        checksum_type,
        checksum_seed: raw.s_checksum_seed.get(),
        checksum,
        raw: bytes[..EXT_SUPERBLOCK_SIZE].to_vec(),
    };

    trace!(
        offset = origin.offset,
        block_size = sb.geometry.block_size,
        total_blocks = sb.geometry.total_blocks,
        "ext superblock decoded"
    );
    Ok(sb)
}

/// 1024 << log, or 0 when the result would not fit.
pub fn block_size_from_log(log: u32) -> u32 {
    if log > EXT_MAX_REPRESENTABLE_LOG {
        0
    } else {
        EXT_MIN_BLOCK_SIZE << log
    }
}

fn widen_time(lo: u32, hi: u8) -> i64 {
    lo as i64 | (hi as i64) << 32
}

/// Fixed-width string: cut at the first NUL, invalid UTF-8 replaced.
pub fn decode_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ext::builder::ExtImageBuilder;

    #[test]
    fn test_short_buffers_never_panic() {
        let full = ExtImageBuilder::new(1024, 8192).superblock_bytes(0);
        for len in [0usize, 1, 0x38, 0x3A, 512, 1023] {
            let err = parse_region(&full[..len], CandidateOrigin::primary(1024)).unwrap_err();
            assert_eq!(
                err,
                DecodeError::TooShort {
                    needed: 1024,
                    actual: len
                }
            );
        }
    }

    #[test]
    fn test_bad_magic() {
        let mut raw = ExtImageBuilder::new(1024, 8192).superblock_bytes(0);
        raw[0x38] = 0x34;
        raw[0x39] = 0x12;
        assert!(!detect(&raw));
        assert_eq!(
            parse_region(&raw, CandidateOrigin::primary(1024)),
            Err(DecodeError::BadMagic {
                expected: 0xEF53,
                found: 0x1234
            })
        );
    }

    #[test]
    fn test_round_trip_fields() {
        let b = ExtImageBuilder::new(4096, 40_000)
            .label("recovery-test")
            .last_mounted("/mnt/data")
            .uuid([0xAB; 16])
            .inodes_per_group(1024);
        let raw = b.superblock_bytes(0);
        let sb = parse_region(&raw, CandidateOrigin::primary(1024)).unwrap();

        assert_eq!(sb.geometry.block_size, 4096);
        assert_eq!(sb.geometry.total_blocks, 40_000);
        assert_eq!(sb.geometry.first_data_block, 0);
        assert_eq!(sb.geometry.blocks_per_group, 32_768);
        assert_eq!(sb.geometry.inodes_per_group, 1024);
        assert_eq!(sb.geometry.inode_count, 2 * 1024);
        assert_eq!(sb.free_blocks, b.free_blocks_total());
        assert_eq!(sb.volume_label, "recovery-test");
        assert_eq!(sb.last_mounted, "/mnt/data");
        assert_eq!(sb.uuid, [0xAB; 16]);
        assert_eq!(sb.state, StateFlags::VALID);
        assert_eq!(sb.raw, raw.to_vec());
    }

    #[test]
    fn test_64bit_counts_join_hi_words() {
        let mut raw = ExtImageBuilder::new(4096, 40_000).with_64bit().superblock_bytes(0);
        raw[0x150..0x154].copy_from_slice(&1u32.to_le_bytes());
        let sb = parse_region(&raw, CandidateOrigin::primary(1024)).unwrap();
        assert_eq!(sb.geometry.total_blocks, (1u64 << 32) | 40_000);
        assert_eq!(sb.descriptor_size(), 64);
    }

    #[test]
    fn test_hi_words_ignored_without_64bit() {
        let mut raw = ExtImageBuilder::new(4096, 40_000).superblock_bytes(0);
        raw[0x150..0x154].copy_from_slice(&1u32.to_le_bytes());
        let sb = parse_region(&raw, CandidateOrigin::primary(1024)).unwrap();
        assert_eq!(sb.geometry.total_blocks, 40_000);
        assert_eq!(sb.descriptor_size(), 32);
    }

    #[test]
    fn test_unrepresentable_block_size() {
        assert_eq!(block_size_from_log(0), 1024);
        assert_eq!(block_size_from_log(6), 65536);
        assert_eq!(block_size_from_log(21), 1 << 31);
        assert_eq!(block_size_from_log(22), 0);
        assert_eq!(block_size_from_log(u32::MAX), 0);
    }

    #[test]
    fn test_decode_str() {
        assert_eq!(decode_str(b"abc\0def"), "abc");
        assert_eq!(decode_str(b"full"), "full");
        assert_eq!(decode_str(&[0xFF, b'x', 0]), "\u{FFFD}x");
    }

    #[test]
    fn test_widened_timestamps() {
        let mut raw = ExtImageBuilder::new(1024, 8192).superblock_bytes(0);
        raw[0x274] = 1; // s_wtime_hi
        let sb = parse_region(&raw, CandidateOrigin::primary(1024)).unwrap();
        assert_eq!(sb.timestamps.write, (1i64 << 32) | 1_700_000_000);
    }
}
