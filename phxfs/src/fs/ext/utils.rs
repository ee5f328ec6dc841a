// SPDX-License-Identifier: MIT

use crate::fs::ext::features::{CompatFeatures, FeatureSet, IncompatFeatures, RoCompatFeatures};

/// Groups 0, 1 and powers of 3, 5 and 7.
pub fn is_sparse_super_group(group_id: u64) -> bool {
    if group_id <= 1 {
        return true;
    }

    for base in [3u64, 5, 7] {
        let mut p = base;
        while p < group_id {
            match p.checked_mul(base) {
                Some(next) => p = next,
                None => break,
            }
        }
        if p == group_id {
            return true;
        }
    }

    false
}

/// Whether `group` carries a superblock backup (and a GDT copy outside
/// meta_bg) under the given feature set.
pub fn group_has_super(group: u64, features: &FeatureSet, backup_bgs: [u32; 2]) -> bool {
    if group == 0 {
        return true;
    }
    if features.compat.contains(CompatFeatures::SPARSE_SUPER2) {
        return backup_bgs.iter().any(|&g| g != 0 && g as u64 == group);
    }
    if group <= 1 || !features.ro_compat.contains(RoCompatFeatures::SPARSE_SUPER) {
        return true;
    }
    // Only odd groups can be powers of 3, 5 or 7
    group & 1 == 1 && is_sparse_super_group(group)
}

/// Groups expected to hold a backup superblock, ascending, group 0 excluded.
///
/// `limit` caps the output; the iteration itself is bounded by
/// `group_count`.
pub fn backup_groups(
    group_count: u64,
    features: &FeatureSet,
    backup_bgs: [u32; 2],
    limit: usize,
) -> Vec<u64> {
    let mut out = Vec::new();
    if limit == 0 {
        return out;
    }

    if features.compat.contains(CompatFeatures::SPARSE_SUPER2) {
        let mut bgs: Vec<u64> = backup_bgs
            .iter()
            .map(|&g| g as u64)
            .filter(|&g| g != 0 && g < group_count)
            .collect();
        bgs.sort_unstable();
        bgs.dedup();
        bgs.truncate(limit);
        return bgs;
    }

    if !features.ro_compat.contains(RoCompatFeatures::SPARSE_SUPER) {
        return (1..group_count).take(limit).collect();
    }

    // Merge the three power series without walking every group.
    let mut powers = vec![1u64];
    for base in [3u64, 5, 7] {
        let mut p = base;
        while p < group_count {
            powers.push(p);
            match p.checked_mul(base) {
                Some(next) => p = next,
                None => break,
            }
        }
    }
    powers.sort_unstable();
    powers.dedup();
    out.extend(powers.into_iter().filter(|&g| g < group_count).take(limit));
    out
}

/// Descriptor size actually used on disk.
pub fn descriptor_size(features: &FeatureSet, s_desc_size: u16) -> u16 {
    if features.incompat.contains(IncompatFeatures::IS_64BIT) {
        s_desc_size
    } else {
        crate::fs::ext::constant::EXT_MIN_DESC_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_groups() {
        let sparse: Vec<u64> = (0..60).filter(|&g| is_sparse_super_group(g)).collect();
        assert_eq!(sparse, vec![0, 1, 3, 5, 7, 9, 25, 27, 49]);
    }

    #[test]
    fn test_backup_groups_sparse_super() {
        let f = FeatureSet::from_raw(0, 0, RoCompatFeatures::SPARSE_SUPER.bits());
        assert_eq!(backup_groups(8, &f, [0, 0], 16), vec![1, 3, 5, 7]);
        assert_eq!(backup_groups(50, &f, [0, 0], 3), vec![1, 3, 5]);
        assert_eq!(backup_groups(1, &f, [0, 0], 16), Vec::<u64>::new());
        for g in backup_groups(1000, &f, [0, 0], usize::MAX) {
            assert!(group_has_super(g, &f, [0, 0]));
        }
    }

    #[test]
    fn test_backup_groups_without_sparse() {
        let f = FeatureSet::empty();
        assert_eq!(backup_groups(4, &f, [0, 0], 16), vec![1, 2, 3]);
        assert!(group_has_super(2, &f, [0, 0]));
    }

    #[test]
    fn test_backup_groups_sparse_super2() {
        let f = FeatureSet::from_raw(CompatFeatures::SPARSE_SUPER2.bits(), 0, 1);
        assert_eq!(backup_groups(100, &f, [63, 1], 16), vec![1, 63]);
        assert_eq!(backup_groups(10, &f, [63, 1], 16), vec![1]);
        assert!(group_has_super(63, &f, [63, 1]));
        assert!(!group_has_super(3, &f, [63, 1]));
    }

    #[test]
    fn test_descriptor_size() {
        let f64 = FeatureSet::from_raw(0, IncompatFeatures::IS_64BIT.bits(), 0);
        assert_eq!(descriptor_size(&f64, 64), 64);
        assert_eq!(descriptor_size(&FeatureSet::empty(), 64), 32);
    }
}
