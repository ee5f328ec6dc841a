// SPDX-License-Identifier: MIT
//! Metadata checksums: crc32c (`metadata_csum`) and crc16 (`gdt_csum`).

use crate::fs::ext::constant::*;
use crate::fs::ext::features::{FeatureSet, IncompatFeatures};

/// Raw crc32c as the kernel computes it: caller-supplied seed, no final xor.
#[inline]
pub fn crc32c_raw(seed: u32, data: &[u8]) -> u32 {
    !crc32c::crc32c_append(!seed, data)
}

/// Checksum stored in `s_checksum`, over the first 0x3FC bytes.
///
/// Returns `None` when `raw` is shorter than a superblock.
pub fn superblock_checksum(raw: &[u8]) -> Option<u32> {
    let covered = raw.get(..EXT_SB_CHECKSUM_OFFSET)?;
    (raw.len() >= EXT_SUPERBLOCK_SIZE).then(|| crc32c_raw(!0, covered))
}

/// Stored `s_checksum` field of a raw superblock.
pub fn stored_superblock_checksum(raw: &[u8]) -> Option<u32> {
    let b = raw.get(EXT_SB_CHECKSUM_OFFSET..EXT_SUPERBLOCK_SIZE)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Seed for every metadata_csum checksum except the superblock's own.
pub fn csum_seed(features: &FeatureSet, uuid: &[u8; 16], s_checksum_seed: u32) -> u32 {
    if features.incompat.contains(IncompatFeatures::CSUM_SEED) {
        s_checksum_seed
    } else {
        crc32c_raw(!0, uuid)
    }
}

/// metadata_csum descriptor checksum: crc32c over (group, descriptor with
/// bg_checksum zeroed), truncated to 16 bits.
pub fn group_desc_crc32c(seed: u32, group: u32, desc: &[u8]) -> u16 {
    let split = EXT_BG_CHECKSUM_OFFSET.min(desc.len());
    let resume = (EXT_BG_CHECKSUM_OFFSET + 2).min(desc.len());

    let mut crc = crc32c_raw(seed, &group.to_le_bytes());
    crc = crc32c_raw(crc, &desc[..split]);
    crc = crc32c_raw(crc, &[0u8; 2][..resume - split]);
    crc = crc32c_raw(crc, &desc[resume..]);
    (crc & 0xFFFF) as u16
}

/// gdt_csum descriptor checksum: crc16 over (uuid, group, descriptor minus
/// bg_checksum).
pub fn group_desc_crc16(uuid: &[u8; 16], group: u32, desc: &[u8]) -> u16 {
    let split = EXT_BG_CHECKSUM_OFFSET.min(desc.len());
    let resume = (EXT_BG_CHECKSUM_OFFSET + 2).min(desc.len());

    let mut crc = crc16(!0, uuid);
    crc = crc16(crc, &group.to_le_bytes());
    crc = crc16(crc, &desc[..split]);
    crc16(crc, &desc[resume..])
}

/// CRC-16/ARC (reflected 0x8005), no final xor, caller-supplied seed.
pub fn crc16(mut crc: u16, data: &[u8]) -> u16 {
    for &b in data {
        crc ^= b as u16;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32c_raw_matches_standard() {
        // Standard crc32c = raw(!0) followed by a final inversion.
        assert_eq!(!crc32c_raw(!0, b"123456789"), 0xE306_9283);
        // Chaining is equivalent to one pass.
        let whole = crc32c_raw(0x1234_5678, b"hello world");
        let split = crc32c_raw(crc32c_raw(0x1234_5678, b"hello "), b"world");
        assert_eq!(whole, split);
    }

    #[test]
    fn test_crc16_check_value() {
        // CRC-16/ARC check value uses a zero seed.
        assert_eq!(crc16(0, b"123456789"), 0xBB3D);
    }

    #[test]
    fn test_superblock_checksum_short_input() {
        assert_eq!(superblock_checksum(&[0u8; 100]), None);
        assert_eq!(stored_superblock_checksum(&[0u8; 1023]), None);

        let mut raw = [0u8; EXT_SUPERBLOCK_SIZE];
        raw[EXT_SB_CHECKSUM_OFFSET..].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        assert_eq!(stored_superblock_checksum(&raw), Some(0xDEAD_BEEF));
        // The checksum field itself is not covered.
        let a = superblock_checksum(&raw);
        raw[EXT_SB_CHECKSUM_OFFSET] = 0;
        assert_eq!(a, superblock_checksum(&raw));
    }

    #[test]
    fn test_group_desc_checksum_ignores_stored_field() {
        let mut desc = [0x5Au8; 64];
        let a = group_desc_crc32c(7, 3, &desc);
        let b = group_desc_crc16(&[1; 16], 3, &desc);
        desc[EXT_BG_CHECKSUM_OFFSET] = 0;
        desc[EXT_BG_CHECKSUM_OFFSET + 1] = 0;
        assert_eq!(a, group_desc_crc32c(7, 3, &desc));
        assert_eq!(b, group_desc_crc16(&[1; 16], 3, &desc));
        // Group number is covered.
        assert_ne!(a, group_desc_crc32c(7, 4, &desc));
    }

    #[test]
    fn test_csum_seed_selection() {
        let uuid = [9u8; 16];
        let plain = FeatureSet::from_raw(0, 0, 0x400);
        assert_eq!(csum_seed(&plain, &uuid, 42), crc32c_raw(!0, &uuid));
        let seeded = FeatureSet::from_raw(0, 0x2000, 0x400);
        assert_eq!(csum_seed(&seeded, &uuid, 42), 42);
    }
}
