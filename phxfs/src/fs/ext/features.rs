// SPDX-License-Identifier: MIT
//! Feature, state and group flag sets.
//!
//! Unknown bits are retained (`from_bits_retain`): a recovery tool must be
//! able to report flags it does not understand.

use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// s_feature_compat
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    #[serde(transparent)]
    pub struct CompatFeatures: u32 {
        const DIR_PREALLOC   = 0x0001;
        const IMAGIC_INODES  = 0x0002;
        const HAS_JOURNAL    = 0x0004;
        const EXT_ATTR       = 0x0008;
        const RESIZE_INODE   = 0x0010;
        const DIR_INDEX      = 0x0020;
        const LAZY_BG        = 0x0040;
        const EXCLUDE_BITMAP = 0x0100;
        const SPARSE_SUPER2  = 0x0200;
        const FAST_COMMIT    = 0x0400;
        const STABLE_INODES  = 0x0800;
        const ORPHAN_FILE    = 0x1000;
    }
}

bitflags! {
    /// s_feature_incompat
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    #[serde(transparent)]
    pub struct IncompatFeatures: u32 {
        const COMPRESSION = 0x0001;
        const FILETYPE    = 0x0002;
        const RECOVER     = 0x0004;
        const JOURNAL_DEV = 0x0008;
        const META_BG     = 0x0010;
        const EXTENTS     = 0x0040;
        const IS_64BIT    = 0x0080;
        const MMP         = 0x0100;
        const FLEX_BG     = 0x0200;
        const EA_INODE    = 0x0400;
        const DIRDATA     = 0x1000;
        const CSUM_SEED   = 0x2000;
        const LARGEDIR    = 0x4000;
        const INLINE_DATA = 0x8000;
        const ENCRYPT     = 0x10000;
        const CASEFOLD    = 0x20000;
    }
}

bitflags! {
    /// s_feature_ro_compat
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    #[serde(transparent)]
    pub struct RoCompatFeatures: u32 {
        const SPARSE_SUPER   = 0x0001;
        const LARGE_FILE     = 0x0002;
        const BTREE_DIR      = 0x0004;
        const HUGE_FILE      = 0x0008;
        const GDT_CSUM       = 0x0010;
        const DIR_NLINK      = 0x0020;
        const EXTRA_ISIZE    = 0x0040;
        const HAS_SNAPSHOT   = 0x0080;
        const QUOTA          = 0x0100;
        const BIGALLOC       = 0x0200;
        const METADATA_CSUM  = 0x0400;
        const REPLICA        = 0x0800;
        const READONLY       = 0x1000;
        const PROJECT        = 0x2000;
        const SHARED_BLOCKS  = 0x4000;
        const VERITY         = 0x8000;
        const ORPHAN_PRESENT = 0x10000;
    }
}

bitflags! {
    /// s_state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    #[serde(transparent)]
    pub struct StateFlags: u16 {
        /// Cleanly unmounted
        const VALID  = 0x0001;
        /// Errors detected
        const ERROR  = 0x0002;
        /// Orphans being recovered
        const ORPHAN = 0x0004;
    }
}

bitflags! {
    /// bg_flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    #[serde(transparent)]
    pub struct GroupFlags: u16 {
        const INODE_UNINIT = 0x0001;
        const BLOCK_UNINIT = 0x0002;
        const INODE_ZEROED = 0x0004;
    }
}

/// The three feature words of one superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureSet {
    pub compat: CompatFeatures,
    pub incompat: IncompatFeatures,
    pub ro_compat: RoCompatFeatures,
}

impl FeatureSet {
    pub fn from_raw(compat: u32, incompat: u32, ro_compat: u32) -> Self {
        Self {
            compat: CompatFeatures::from_bits_retain(compat),
            incompat: IncompatFeatures::from_bits_retain(incompat),
            ro_compat: RoCompatFeatures::from_bits_retain(ro_compat),
        }
    }

    pub fn empty() -> Self {
        Self::from_raw(0, 0, 0)
    }

    pub fn unknown_compat(&self) -> u32 {
        self.compat.bits() & !CompatFeatures::all().bits()
    }

    pub fn unknown_incompat(&self) -> u32 {
        self.incompat.bits() & !IncompatFeatures::all().bits()
    }

    pub fn unknown_ro_compat(&self) -> u32 {
        self.ro_compat.bits() & !RoCompatFeatures::all().bits()
    }

    #[inline]
    pub fn is_64bit(&self) -> bool {
        self.incompat.contains(IncompatFeatures::IS_64BIT)
    }

    #[inline]
    pub fn has_metadata_csum(&self) -> bool {
        self.ro_compat.contains(RoCompatFeatures::METADATA_CSUM)
    }

    /// Lower-case names of every set bit, in compat / incompat / ro_compat
    /// order, with unknown bits as `"<word>:0x..."`.
    pub fn names(&self) -> Vec<String> {
        let mut out = Vec::new();
        out.extend(self.compat.iter_names().map(|(n, _)| feature_name(n)));
        out.extend(self.incompat.iter_names().map(|(n, _)| feature_name(n)));
        out.extend(self.ro_compat.iter_names().map(|(n, _)| feature_name(n)));

        for (word, bits) in [
            ("compat", self.unknown_compat()),
            ("incompat", self.unknown_incompat()),
            ("ro_compat", self.unknown_ro_compat()),
        ] {
            if bits != 0 {
                out.push(format!("{word}:{bits:#x}"));
            }
        }
        out
    }
}

// Names as printed by dumpe2fs
fn feature_name(flag: &str) -> String {
    match flag {
        "IS_64BIT" => "64bit".to_string(),
        other => other.to_ascii_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_bits_retained() {
        let f = FeatureSet::from_raw(0x0004, 0x0080 | 0x8000_0000, 0x0400 | 0x0100_0000);
        assert!(f.is_64bit());
        assert!(f.has_metadata_csum());
        assert_eq!(f.unknown_compat(), 0);
        assert_eq!(f.unknown_incompat(), 0x8000_0000);
        assert_eq!(f.unknown_ro_compat(), 0x0100_0000);
        assert_eq!(f.incompat.bits(), 0x8000_0080);
    }

    #[test]
    fn test_names() {
        let f = FeatureSet::from_raw(0x0024, 0x0082, 0x0001 | 0x8000_0000);
        assert_eq!(
            f.names(),
            vec![
                "has_journal",
                "dir_index",
                "filetype",
                "64bit",
                "sparse_super",
                "ro_compat:0x80000000"
            ]
        );
    }
}
