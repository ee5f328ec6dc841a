// SPDX-License-Identifier: MIT

use bitflags::bitflags;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::core::anomaly::{Anomaly, AnomalyReport, ConfidenceVerdict};
use crate::superblock::Superblock;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ValidatePhases: u32 {
        const SIGNATURE  = 1 << 0;
        const GEOMETRY   = 1 << 1;
        const ACCOUNTING = 1 << 2;
        const DEVICE     = 1 << 3;
        const STATE      = 1 << 4;
        const FEATURES   = 1 << 5;
        const TIMESTAMPS = 1 << 6;
        const ORIGIN     = 1 << 7;
        const ALL        = u32::MAX;
    }
}

/// Five years, in seconds.
pub const DEFAULT_STALE_MOUNT_AGE: i64 = 5 * 365 * 86_400;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidateOptions {
    pub phases: ValidatePhases,
    /// "Now" for timestamp checks, Unix seconds. `None` uses the clock at
    /// validator construction.
    pub reference_time: Option<i64>,
    /// A last mount older than this (seconds) is reported.
    pub stale_mount_age: i64,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            phases: ValidatePhases::ALL,
            reference_time: None,
            stale_mount_age: DEFAULT_STALE_MOUNT_AGE,
        }
    }
}

impl ValidateOptions {
    pub fn with_reference_time(mut self, unix_secs: i64) -> Self {
        self.reference_time = Some(unix_secs);
        self
    }

    pub fn with_stale_mount_age(mut self, secs: i64) -> Self {
        self.stale_mount_age = secs;
        self
    }

    pub fn with_phases(mut self, phases: ValidatePhases) -> Self {
        self.phases = phases;
        self
    }
}

/// Everything a family checker needs besides the superblock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckContext {
    pub phases: ValidatePhases,
    pub device_len: Option<u64>,
    pub reference_time: i64,
    pub stale_mount_age: i64,
}

/// How the chosen superblock was picked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Selection {
    /// At least one copy passed validation.
    Confident,
    /// Every copy is corrupt; the least damaged one is used.
    BestEffort,
}

/// Grades decoded superblocks.
#[derive(Clone, Debug)]
pub struct IntegrityValidator {
    ctx: CheckContext,
}

impl IntegrityValidator {
    pub fn new(opts: &ValidateOptions, device_len: Option<u64>) -> Self {
        let reference_time = opts
            .reference_time
            .unwrap_or_else(|| OffsetDateTime::now_utc().unix_timestamp());
        Self {
            ctx: CheckContext {
                phases: opts.phases,
                device_len,
                reference_time,
                stale_mount_age: opts.stale_mount_age,
            },
        }
    }

    #[inline]
    pub fn context(&self) -> &CheckContext {
        &self.ctx
    }

    /// Independent checks, in order; the verdict keeps every anomaly.
    pub fn validate(&self, sb: &Superblock) -> ConfidenceVerdict {
        let mut rep = AnomalyReport::default();
        sb.family.check(sb, &self.ctx, &mut rep);
        let verdict = rep.into_verdict();

        if verdict.is_corrupt() {
            warn!(
                offset = sb.origin.offset,
                group = sb.origin.group,
                hard = verdict.hard_count(),
                "corrupt superblock copy"
            );
        } else {
            debug!(
                offset = sb.origin.offset,
                group = sb.origin.group,
                verdict = verdict.label(),
                "superblock copy graded"
            );
        }
        verdict
    }
}

/// Picks the most trustworthy copy.
///
/// Highest verdict first, then primary over backups, then lowest offset.
/// When every copy is corrupt, fewest hard anomalies wins and the selection
/// is `BestEffort`. Returns `None` for an empty slice.
pub fn select(graded: &[(Superblock, ConfidenceVerdict)]) -> Option<(usize, Selection)> {
    let key = |(sb, v): &(Superblock, ConfidenceVerdict)| {
        (
            core::cmp::Reverse(v.rank()),
            v.hard_count(),
            sb.origin.is_backup,
            sb.origin.offset,
        )
    };

    let (idx, (_, verdict)) = graded
        .iter()
        .enumerate()
        .min_by_key(|(_, entry)| key(entry))?;

    let selection = if verdict.is_corrupt() {
        Selection::BestEffort
    } else {
        Selection::Confident
    };
    Some((idx, selection))
}

/// Compares the chosen copy's identity and geometry with another copy.
///
/// Each divergence is a soft anomaly; `observed` is the other copy's value.
pub fn cross_check(chosen: &Superblock, other: &Superblock) -> Vec<Anomaly> {
    let mut rep = AnomalyReport::default();
    let a = &chosen.geometry;
    let b = &other.geometry;

    let mut diff = |field: &'static str, mine: u64, theirs: u64| {
        if mine != theirs {
            rep.soft(
                "XCOPY.MISMATCH",
                field,
                format!("== {mine} (chosen copy)"),
                theirs,
            );
        }
    };
    diff("block_size", a.block_size as u64, b.block_size as u64);
    diff("total_blocks", a.total_blocks, b.total_blocks);
    diff("blocks_per_group", a.blocks_per_group as u64, b.blocks_per_group as u64);
    diff("inodes_per_group", a.inodes_per_group as u64, b.inodes_per_group as u64);
    diff("inode_count", a.inode_count as u64, b.inode_count as u64);
    diff("first_data_block", a.first_data_block as u64, b.first_data_block as u64);
    diff(
        "feature_compat",
        chosen.features.compat.bits() as u64,
        other.features.compat.bits() as u64,
    );
    diff(
        "feature_incompat",
        chosen.features.incompat.bits() as u64,
        other.features.incompat.bits() as u64,
    );
    diff(
        "feature_ro_compat",
        chosen.features.ro_compat.bits() as u64,
        other.features.ro_compat.bits() as u64,
    );

    if chosen.uuid != other.uuid {
        rep.soft(
            "XCOPY.UUID",
            "uuid",
            format!("== {} (chosen copy)", chosen.uuid_string()),
            u64::from_be_bytes([
                other.uuid[0],
                other.uuid[1],
                other.uuid[2],
                other.uuid[3],
                other.uuid[4],
                other.uuid[5],
                other.uuid[6],
                other.uuid[7],
            ]),
        );
    }
    rep.anomalies
}
