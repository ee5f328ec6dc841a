// SPDX-License-Identifier: MIT
//! Aggregate view handed to reporting code.

use serde::Serialize;

use crate::core::anomaly::{Anomaly, ConfidenceVerdict};
use crate::core::errors::DecodeError;
use crate::format::FsFamily;
use crate::groups::{GroupDescriptor, GroupDescriptorTable};
use crate::superblock::{Geometry, Superblock};
use crate::validator::Selection;

/// What happened to one examined candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CandidateOutcome {
    Parsed { verdict: ConfidenceVerdict },
    Undecodable { error: DecodeError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateReport {
    pub offset: u64,
    pub group: u64,
    pub is_backup: bool,
    pub family: FsFamily,
    pub outcome: CandidateOutcome,
}

impl CandidateReport {
    pub fn verdict(&self) -> Option<&ConfidenceVerdict> {
        match &self.outcome {
            CandidateOutcome::Parsed { verdict } => Some(verdict),
            CandidateOutcome::Undecodable { .. } => None,
        }
    }
}

/// Where an anomaly was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnomalySource {
    /// Validation of the superblock copy at this offset.
    Candidate { offset: u64 },
    /// Divergence between the chosen copy and the one at this offset.
    CrossCopy { offset: u64 },
    /// The descriptor table as a whole.
    GroupTable,
    /// One descriptor entry.
    Group { index: u64 },
    /// Superblock counters against descriptor sums.
    Accounting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourcedAnomaly {
    pub source: AnomalySource,
    pub anomaly: Anomaly,
}

/// Read-only result of one analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilesystemModel {
    superblock: Superblock,
    verdict: ConfidenceVerdict,
    selection: Selection,
    groups: GroupDescriptorTable,
    candidates: Vec<CandidateReport>,
    cross_copy: Vec<SourcedAnomaly>,
    accounting: Vec<Anomaly>,
}

impl FilesystemModel {
    pub fn new(
        superblock: Superblock,
        verdict: ConfidenceVerdict,
        selection: Selection,
        groups: GroupDescriptorTable,
        candidates: Vec<CandidateReport>,
        cross_copy: Vec<SourcedAnomaly>,
    ) -> Self {
        let accounting = accounting_anomalies(&superblock, &groups);
        Self {
            superblock,
            verdict,
            selection,
            groups,
            candidates,
            cross_copy,
            accounting,
        }
    }

    #[inline]
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    #[inline]
    pub fn verdict(&self) -> &ConfidenceVerdict {
        &self.verdict
    }

    #[inline]
    pub fn selection(&self) -> Selection {
        self.selection
    }

    #[inline]
    pub fn geometry(&self) -> &Geometry {
        &self.superblock.geometry
    }

    pub fn group_count(&self) -> Option<u64> {
        self.superblock.group_count()
    }

    #[inline]
    pub fn groups(&self) -> &GroupDescriptorTable {
        &self.groups
    }

    pub fn degraded_groups(&self) -> impl Iterator<Item = &GroupDescriptor> {
        self.groups.degraded()
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.superblock.total_bytes()
    }

    /// Free space per the superblock, clamped to the filesystem size.
    pub fn free_bytes(&self) -> Option<u64> {
        let free = self.superblock.free_bytes()?;
        Some(free.min(self.total_bytes()?))
    }

    pub fn used_bytes(&self) -> Option<u64> {
        Some(self.total_bytes()? - self.free_bytes()?)
    }

    /// Sum of per-group free blocks over the descriptors read.
    pub fn group_free_blocks(&self) -> u64 {
        self.groups.free_blocks_sum()
    }

    /// Superblock free blocks minus the descriptor sum. `None` unless the
    /// whole table was read.
    pub fn free_space_drift(&self) -> Option<i64> {
        if !self.groups.is_complete() || self.groups.entries.is_empty() {
            return None;
        }
        let sb = i64::try_from(self.superblock.free_blocks).ok()?;
        let sum = i64::try_from(self.group_free_blocks()).ok()?;
        sb.checked_sub(sum)
    }

    pub fn feature_summary(&self) -> Vec<String> {
        self.superblock.features.names()
    }

    pub fn flavor(&self) -> &'static str {
        self.superblock.family.flavor(&self.superblock)
    }

    pub fn creator_os(&self) -> &'static str {
        self.superblock.family.creator_os(&self.superblock)
    }

    #[inline]
    pub fn candidates(&self) -> &[CandidateReport] {
        &self.candidates
    }

    #[inline]
    pub fn cross_copy(&self) -> &[SourcedAnomaly] {
        &self.cross_copy
    }

    /// Every anomaly in the model: candidate verdicts in scan order, then
    /// cross-copy findings, the descriptor table, its entries and the
    /// accounting comparison.
    pub fn anomalies(&self) -> Vec<SourcedAnomaly> {
        let mut out = Vec::new();
        for c in &self.candidates {
            if let Some(v) = c.verdict() {
                out.extend(v.anomalies().iter().map(|a| SourcedAnomaly {
                    source: AnomalySource::Candidate { offset: c.offset },
                    anomaly: a.clone(),
                }));
            }
        }
        out.extend(self.cross_copy.iter().cloned());
        out.extend(self.groups.anomalies.iter().map(|a| SourcedAnomaly {
            source: AnomalySource::GroupTable,
            anomaly: a.clone(),
        }));
        for e in self.groups.degraded() {
            out.extend(e.anomalies().iter().map(|a| SourcedAnomaly {
                source: AnomalySource::Group { index: e.group_index },
                anomaly: a.clone(),
            }));
        }
        out.extend(self.accounting.iter().map(|a| SourcedAnomaly {
            source: AnomalySource::Accounting,
            anomaly: a.clone(),
        }));
        out
    }
}

fn accounting_anomalies(sb: &Superblock, groups: &GroupDescriptorTable) -> Vec<Anomaly> {
    let mut out = Vec::new();
    if !groups.is_complete() || groups.entries.is_empty() {
        return out;
    }
    let blocks = groups.free_blocks_sum();
    if blocks != sb.free_blocks {
        out.push(Anomaly::warn(
            "ACCT.GROUP_FREE_BLOCKS",
            "free_blocks",
            format!("== sum of group free blocks ({blocks})"),
            sb.free_blocks,
        ));
    }
    let inodes = groups.free_inodes_sum();
    if inodes != sb.free_inodes as u64 {
        out.push(Anomaly::warn(
            "ACCT.GROUP_FREE_INODES",
            "free_inodes",
            format!("== sum of group free inodes ({inodes})"),
            sb.free_inodes as u64,
        ));
    }
    out
}
