// SPDX-License-Identifier: MIT
//! One analysis run over one device.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use phxio::BlockIO;
use phxio::prelude::{DeviceBlockIO, IoCounter, ReaderOptions};

use crate::core::anomaly::ConfidenceVerdict;
use crate::core::errors::*;
use crate::format::SuperblockCandidate;
use crate::groups::{self, GroupReadOptions};
use crate::locator::{LocateOptions, locate};
use crate::model::*;
use crate::superblock::Superblock;
use crate::validator::{IntegrityValidator, Selection, ValidateOptions, cross_check, select};

/// Options for every stage of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnalyzeOptions {
    pub reader: ReaderOptions,
    pub locate: LocateOptions,
    pub validate: ValidateOptions,
    pub groups: GroupReadOptions,
}

impl AnalyzeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reader(mut self, reader: ReaderOptions) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_locate(mut self, locate: LocateOptions) -> Self {
        self.locate = locate;
        self
    }

    pub fn with_validate(mut self, validate: ValidateOptions) -> Self {
        self.validate = validate;
        self
    }

    pub fn with_groups(mut self, groups: GroupReadOptions) -> Self {
        self.groups = groups;
        self
    }
}

/// Cooperative cancellation, checked before each stage starts.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AnalysisOutcome {
    Found(FilesystemModel),
    /// No known signature at any probed location.
    NoSignature { probed: usize },
}

impl AnalysisOutcome {
    pub fn model(&self) -> Option<&FilesystemModel> {
        match self {
            AnalysisOutcome::Found(m) => Some(m),
            AnalysisOutcome::NoSignature { .. } => None,
        }
    }

    pub fn into_model(self) -> Option<FilesystemModel> {
        match self {
            AnalysisOutcome::Found(m) => Some(m),
            AnalysisOutcome::NoSignature { .. } => None,
        }
    }
}

/// Drives locate, decode, validate, group read and model assembly over one
/// device. The device is closed when the analyzer is dropped.
pub struct Analyzer<IO: BlockIO> {
    io: IO,
    opts: AnalyzeOptions,
    cancel: CancelToken,
}

impl Analyzer<DeviceBlockIO> {
    pub fn open(path: impl AsRef<Path>, opts: AnalyzeOptions) -> AnalyzeResult<Self> {
        let io = DeviceBlockIO::open(path, &opts.reader)?;
        Ok(Self::new(io, opts))
    }
}

impl<IO: BlockIO> Analyzer<IO> {
    /// Pins the validation reference time so repeated runs agree.
    pub fn new(io: IO, mut opts: AnalyzeOptions) -> Self {
        if opts.validate.reference_time.is_none() {
            opts.validate.reference_time = Some(OffsetDateTime::now_utc().unix_timestamp());
        }
        Self {
            io,
            opts,
            cancel: CancelToken::default(),
        }
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    #[inline]
    pub fn options(&self) -> &AnalyzeOptions {
        &self.opts
    }

    pub fn close(&mut self) {
        self.io.close();
    }

    /// Runs the whole pipeline. Each call re-reads the device.
    pub fn analyze(&mut self) -> AnalyzeResult<AnalysisOutcome> {
        let device_len = self.io.device_len();
        info!(?device_len, "analysis started");

        checkpoint(&self.cancel, Stage::Locate)?;
        let opts = self.opts;
        let cancel = self.cancel.clone();
        let mut io = IoCounter::new(&mut self.io);

        let result = run(&mut io, &opts, &cancel, device_len);
        io.snapshot().log();

        match &result {
            Ok(AnalysisOutcome::Found(m)) => info!(
                verdict = m.verdict().label(),
                selection = ?m.selection(),
                offset = m.superblock().origin.offset,
                groups = m.groups().entries.len(),
                degraded = m.degraded_groups().count(),
                "analysis complete"
            ),
            Ok(AnalysisOutcome::NoSignature { probed }) => {
                info!(probed, "no filesystem signature found")
            }
            Err(e) => warn!(error = %e, "analysis failed"),
        }
        result
    }
}

impl<IO: BlockIO> Drop for Analyzer<IO> {
    fn drop(&mut self) {
        self.io.close();
    }
}

fn checkpoint(cancel: &CancelToken, stage: Stage) -> AnalyzeResult<()> {
    if cancel.is_cancelled() {
        info!(%stage, "analysis cancelled");
        return Err(AnalyzeError::Cancelled { stage });
    }
    Ok(())
}

fn run<IO: BlockIO + ?Sized>(
    io: &mut IO,
    opts: &AnalyzeOptions,
    cancel: &CancelToken,
    device_len: Option<u64>,
) -> AnalyzeResult<AnalysisOutcome> {
    let mut found = Vec::new();
    let mut scan = locate(&mut *io, opts.locate);
    for candidate in scan.by_ref() {
        found.push(candidate?);
    }
    let probed = scan.probed();
    drop(scan);

    if found.is_empty() {
        return Ok(AnalysisOutcome::NoSignature { probed });
    }
    debug!(candidates = found.len(), probed, "scan finished");

    checkpoint(cancel, Stage::Validate)?;
    let validator = IntegrityValidator::new(&opts.validate, device_len);
    let graded = grade(&validator, found)?;

    checkpoint(cancel, Stage::GroupDescriptors)?;
    let groups = groups::read(io, &graded.chosen, &opts.groups)?;

    checkpoint(cancel, Stage::Model)?;
    Ok(AnalysisOutcome::Found(FilesystemModel::new(
        graded.chosen,
        graded.verdict,
        graded.selection,
        groups,
        graded.reports,
        graded.cross_copy,
    )))
}

/// Decode, validation and selection over every candidate.
pub(crate) struct Graded {
    pub chosen: Superblock,
    pub verdict: ConfidenceVerdict,
    pub selection: Selection,
    pub reports: Vec<CandidateReport>,
    pub cross_copy: Vec<SourcedAnomaly>,
}

pub(crate) fn grade(
    validator: &IntegrityValidator,
    candidates: Vec<SuperblockCandidate>,
) -> AnalyzeResult<Graded> {
    let mut reports = Vec::with_capacity(candidates.len());
    let mut graded = Vec::new();
    let mut rejected = Vec::new();

    for c in &candidates {
        let outcome = match c.format.parse(c) {
            Ok(sb) => {
                let verdict = validator.validate(&sb);
                let outcome = CandidateOutcome::Parsed {
                    verdict: verdict.clone(),
                };
                graded.push((sb, verdict));
                outcome
            }
            Err(error) => {
                debug!(offset = c.offset, %error, "candidate undecodable");
                rejected.push((c.offset, error.clone()));
                CandidateOutcome::Undecodable { error }
            }
        };
        reports.push(CandidateReport {
            offset: c.offset,
            group: c.group,
            is_backup: c.is_backup,
            family: c.format,
            outcome,
        });
    }

    let Some((idx, selection)) = select(&graded) else {
        warn!(rejected = rejected.len(), "no candidate could be decoded");
        return Err(AnalyzeError::NoDecodableSuperblock { rejected });
    };
    let (chosen, verdict) = graded.swap_remove(idx);

    let cross_copy = graded
        .iter()
        .flat_map(|(other, _)| {
            cross_check(&chosen, other).into_iter().map(|anomaly| SourcedAnomaly {
                source: AnomalySource::CrossCopy {
                    offset: other.origin.offset,
                },
                anomaly,
            })
        })
        .collect::<Vec<_>>();

    info!(
        offset = chosen.origin.offset,
        group = chosen.origin.group,
        verdict = verdict.label(),
        selection = ?selection,
        "superblock selected"
    );

    Ok(Graded {
        chosen,
        verdict,
        selection,
        reports,
        cross_copy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CANDIDATE_SIZE, FsFamily};
    use crate::fs::ext::builder::ExtImageBuilder;
    use phxio::prelude::*;

    fn validator() -> IntegrityValidator {
        IntegrityValidator::new(
            &ValidateOptions::default().with_reference_time(1_750_000_000),
            None,
        )
    }

    fn candidate(raw: [u8; CANDIDATE_SIZE], offset: u64, group: u64) -> SuperblockCandidate {
        SuperblockCandidate {
            offset,
            raw: Box::new(raw),
            format: FsFamily::Ext,
            is_backup: group != 0,
            group,
        }
    }

    #[test]
    fn test_no_decodable_superblock() {
        // A region no family decodes: signature cleared after capture.
        let mut raw = ExtImageBuilder::new(1024, 65536).superblock_bytes(0);
        raw[0x38] = 0;
        let err = grade(&validator(), vec![candidate(raw, 1024, 0)]).err();
        assert_eq!(
            err,
            Some(AnalyzeError::NoDecodableSuperblock {
                rejected: vec![(
                    1024,
                    DecodeError::BadMagic {
                        expected: 0xEF53,
                        found: 0xEF00
                    }
                )]
            })
        );
    }

    #[test]
    fn test_grade_reports_every_candidate() {
        let b = ExtImageBuilder::new(1024, 65536);
        let mut bad = b.superblock_bytes(0);
        bad[0x38] = 0;
        let mut other = b.superblock_bytes(3);
        other[0x04..0x08].copy_from_slice(&60_000u32.to_le_bytes());

        let g = grade(
            &validator(),
            vec![
                candidate(bad, 1024, 0),
                candidate(b.superblock_bytes(1), 8193 * 1024, 1),
                candidate(other, 24577 * 1024, 3),
            ],
        )
        .unwrap();
        assert_eq!(g.chosen.origin.group, 1);
        assert_eq!(g.selection, Selection::Confident);
        assert_eq!(g.reports.len(), 3);
        assert!(matches!(
            g.reports[0].outcome,
            CandidateOutcome::Undecodable { .. }
        ));
        assert!(g.cross_copy.iter().all(|a| a.source
            == AnomalySource::CrossCopy {
                offset: 24577 * 1024
            }));
        assert!(g.cross_copy.iter().any(|a| a.anomaly.field == "total_blocks"));
    }

    #[test]
    fn test_cancel_before_start() {
        let img = ExtImageBuilder::new(1024, 65536).build();
        let token = CancelToken::new();
        token.cancel();
        let mut a = Analyzer::new(MemBlockIO::new(&img), AnalyzeOptions::default())
            .with_cancel_token(token);
        assert_eq!(
            a.analyze(),
            Err(AnalyzeError::Cancelled {
                stage: Stage::Locate
            })
        );
    }

    #[test]
    fn test_outcome_serializes() {
        let json = serde_json::to_string(&AnalysisOutcome::NoSignature { probed: 3 }).unwrap();
        assert_eq!(json, r#"{"NoSignature":{"probed":3}}"#);

        let img = ExtImageBuilder::new(1024, 65536).label("json").build();
        let mut a = Analyzer::new(MemBlockIO::new(&img), AnalyzeOptions::default());
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&a.analyze().unwrap()).unwrap()).unwrap();
        assert_eq!(value["Found"]["superblock"]["volume_label"], "json");
    }

    #[test]
    fn test_reference_time_is_pinned() {
        let img = [0u8; 4096];
        let a = Analyzer::new(MemBlockIO::new(&img), AnalyzeOptions::default());
        assert!(a.options().validate.reference_time.is_some());
    }
}
