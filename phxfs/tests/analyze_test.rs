// SPDX-License-Identifier: MIT

use std::io::Write;

use phxfs::fs::ext::builder::ExtImageBuilder;
use phxfs::prelude::*;

const REFERENCE_TIME: i64 = 1_750_000_000;

fn options() -> AnalyzeOptions {
    AnalyzeOptions::new()
        .with_validate(ValidateOptions::default().with_reference_time(REFERENCE_TIME))
}

fn analyze_bytes(img: &[u8], opts: AnalyzeOptions) -> AnalyzeResult<AnalysisOutcome> {
    Analyzer::new(MemBlockIO::new(img), opts).analyze()
}

fn patch_u32(img: &mut [u8], offset: usize, v: u32) {
    img[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
}

#[test]
fn test_clean_image_is_valid() {
    let b = ExtImageBuilder::new(1024, 65536).label("clean");
    let img = b.build();

    let outcome = analyze_bytes(&img, options()).expect("analyze failed");
    let m = outcome.model().expect("no model");

    assert_eq!(m.verdict(), &ConfidenceVerdict::Valid);
    assert_eq!(m.selection(), Selection::Confident);
    assert_eq!(m.superblock().origin.offset, 1024);
    assert_eq!(m.superblock().volume_label, "clean");
    assert_eq!(m.group_count(), Some(8));
    assert_eq!(m.groups().entries.len(), 8);
    assert!(m.groups().is_complete());
    assert_eq!(m.free_space_drift(), Some(0));
    assert_eq!(m.candidates().len(), 5);
    assert!(m.candidates().iter().all(|c| c.verdict() == Some(&ConfidenceVerdict::Valid)));
    assert!(m.anomalies().is_empty(), "{:?}", m.anomalies());
}

#[test]
fn test_corrupt_primary_falls_back_to_backup() {
    let b = ExtImageBuilder::new(1024, 65536);
    let mut img = b.build();
    // s_free_blocks_count of the primary, beyond s_blocks_count
    patch_u32(&mut img, 1024 + 0x0C, 70_000);

    let outcome = analyze_bytes(&img, options()).expect("analyze failed");
    let m = outcome.model().expect("no model");

    assert_eq!(m.superblock().origin.offset, 8193 * 1024);
    assert!(m.superblock().origin.is_backup);
    assert_eq!(m.verdict(), &ConfidenceVerdict::Valid);
    assert_eq!(m.selection(), Selection::Confident);

    let primary = &m.candidates()[0];
    assert_eq!(primary.offset, 1024);
    let verdict = primary.verdict().expect("primary not parsed");
    assert!(verdict.is_corrupt());
    let a = verdict
        .anomalies()
        .iter()
        .find(|a| a.field == "free_blocks")
        .expect("free_blocks anomaly missing");
    assert_eq!(a.constraint, "<= total_blocks");
    assert_eq!(a.observed, 70_000);
    assert!(a.is_hard());

    // Descriptors come from the table next to the chosen copy.
    assert_eq!(m.groups().location, Some(8194 * 1024));
    assert_eq!(m.free_space_drift(), Some(0));
    assert!(
        m.anomalies()
            .iter()
            .all(|s| s.source == AnomalySource::Candidate { offset: 1024 })
    );
}

#[test]
fn test_every_copy_corrupt_is_best_effort() {
    let b = ExtImageBuilder::new(1024, 65536);
    let img = b.build();
    // Only the primary survives and the device is far shorter than it claims.
    let short = &img[..3 * 1024];

    let outcome = analyze_bytes(short, options()).expect("analyze failed");
    let m = outcome.model().expect("no model");
    assert_eq!(m.selection(), Selection::BestEffort);
    assert!(m.verdict().is_corrupt());
    assert_eq!(m.candidates().len(), 1);

    // The primary table block survives in full.
    let t = m.groups();
    assert_eq!(t.entries.len(), 8);
    assert!(t.is_complete());
}

#[test]
fn test_zeroed_device_has_no_signature() {
    let img = vec![0u8; 1 << 20];
    let outcome = analyze_bytes(&img, options()).expect("analyze failed");
    assert_eq!(outcome, AnalysisOutcome::NoSignature { probed: 1 });
    assert!(outcome.into_model().is_none());
}

#[test]
fn test_repeated_runs_are_identical() {
    let b = ExtImageBuilder::new(4096, 4096)
        .blocks_per_group(1024)
        .inodes_per_group(256)
        .with_64bit()
        .with_metadata_csum()
        .with_flex_bg(4)
        .mount_time(1_740_000_000)
        .state(0);
    let img = b.build();

    let mut a = Analyzer::new(MemBlockIO::new(&img), options());
    let first = serde_json::to_string(&a.analyze().unwrap()).unwrap();
    let second = serde_json::to_string(&a.analyze().unwrap()).unwrap();
    assert_eq!(first, second);

    let third = serde_json::to_string(&analyze_bytes(&img, options()).unwrap()).unwrap();
    assert_eq!(first, third);

    // The dirty state shows up, and nothing else does.
    let m = analyze_bytes(&img, options()).unwrap().into_model().unwrap();
    assert_eq!(m.flavor(), "ext4");
    let codes: Vec<_> = m.anomalies().iter().map(|s| s.anomaly.code).collect();
    assert!(codes.iter().all(|c| *c == "STATE.DIRTY"), "{codes:?}");
}

#[test]
fn test_single_degraded_group() {
    let b = ExtImageBuilder::new(1024, 65536);
    let mut img = b.build();
    // bg_inode_table of group 3 in the primary table
    patch_u32(&mut img, 2048 + 3 * 32 + 8, 1_000_000);

    let m = analyze_bytes(&img, options()).unwrap().into_model().unwrap();
    assert_eq!(m.verdict(), &ConfidenceVerdict::Valid);
    assert_eq!(m.groups().entries.len(), 8);

    let degraded: Vec<_> = m.degraded_groups().map(|g| g.group_index).collect();
    assert_eq!(degraded, vec![3]);
    for e in m.groups().entries.iter().filter(|e| e.group_index != 3) {
        assert_eq!(e.status, EntryStatus::Ok);
    }
    assert!(
        m.anomalies()
            .iter()
            .all(|s| s.source == AnomalySource::Group { index: 3 })
    );
}

#[test]
fn test_group_cap_truncates_table() {
    let img = ExtImageBuilder::new(1024, 65536).build();
    let opts = options().with_groups(GroupReadOptions::default().with_max_groups(3));

    let m = analyze_bytes(&img, opts).unwrap().into_model().unwrap();
    let t = m.groups();
    assert_eq!(t.entries.len(), 3);
    assert_eq!(t.expected, 8);
    assert_eq!(
        t.truncated,
        Some(Truncation {
            reason: TruncationReason::GroupCap,
            readable: 3
        })
    );
    // Partial tables are not compared against the superblock counters.
    assert_eq!(m.free_space_drift(), None);
    assert!(m.anomalies().iter().all(|s| s.source == AnomalySource::GroupTable));
}

#[test]
fn test_wiped_primary_uses_fallback_probe() {
    let b = ExtImageBuilder::new(1024, 65536);
    let mut img = b.build();
    img[1024..2048].fill(0);

    let m = analyze_bytes(&img, options()).unwrap().into_model().unwrap();
    assert_eq!(m.superblock().origin.offset, 8193 * 1024);
    assert_eq!(m.candidates().len(), 1);
    assert_eq!(m.verdict(), &ConfidenceVerdict::Valid);
    assert_eq!(m.groups().entries.len(), 8);

    let none = options().with_locate(LocateOptions::new().no_fallback());
    assert!(matches!(
        analyze_bytes(&img, none),
        Ok(AnalysisOutcome::NoSignature { .. })
    ));
}

#[test]
fn test_corrupt_primary_geometry_recovers_backup() {
    let b = ExtImageBuilder::new(1024, 65536);
    let mut img = b.build();
    // s_blocks_per_group of the primary: every backup it implies is wrong
    patch_u32(&mut img, 1024 + 0x20, 4096);

    let m = analyze_bytes(&img, options()).unwrap().into_model().unwrap();
    assert_eq!(m.superblock().origin.offset, 8193 * 1024);
    assert_eq!(m.superblock().geometry.blocks_per_group, 8192);
    assert_eq!(m.selection(), Selection::Confident);
    assert_eq!(m.verdict(), &ConfidenceVerdict::Valid);

    assert_eq!(m.candidates().len(), 2);
    let primary = m.candidates()[0].verdict().expect("primary not parsed");
    assert!(primary.is_corrupt());

    assert_eq!(m.groups().location, Some(8194 * 1024));
    assert_eq!(m.groups().entries.len(), 8);
    assert_eq!(m.free_space_drift(), Some(0));
}

#[test]
fn test_diverging_backup_is_cross_checked() {
    let b = ExtImageBuilder::new(1024, 65536);
    let mut img = b.build();
    // s_inodes_per_group of the group 3 copy
    patch_u32(&mut img, 24577 * 1024 + 0x28, 4096);

    let m = analyze_bytes(&img, options()).unwrap().into_model().unwrap();
    assert_eq!(m.superblock().origin.offset, 1024);
    let x: Vec<_> = m
        .cross_copy()
        .iter()
        .filter(|s| s.source == AnomalySource::CrossCopy { offset: 24577 * 1024 })
        .map(|s| s.anomaly.field)
        .collect();
    assert!(x.contains(&"inodes_per_group"), "{x:?}");
}

#[test]
fn test_image_file_session() {
    let b = ExtImageBuilder::new(2048, 6000)
        .blocks_per_group(2048)
        .inodes_per_group(512)
        .with_gdt_csum()
        .with_journal();
    let img = b.build();

    let mut file = tempfile::NamedTempFile::new().expect("tempfile failed");
    file.write_all(&img).expect("write failed");
    file.flush().expect("flush failed");

    let opts = options().with_reader(ReaderOptions::default().buffered().shared());
    let mut a = Analyzer::open(file.path(), opts).expect("open failed");
    let m = a.analyze().expect("analyze failed").into_model().expect("no model");

    assert_eq!(m.verdict(), &ConfidenceVerdict::Valid);
    assert_eq!(m.total_bytes(), Some(6000 * 2048));
    assert_eq!(m.groups().entries.len() as u64, b.group_count());
    assert_eq!(m.group_free_blocks(), b.free_blocks_total());
    assert_eq!(m.flavor(), "ext4");

    a.close();
    assert_eq!(a.analyze(), Err(AnalyzeError::Read(DeviceReadError::Closed)));
}

#[test]
fn test_open_missing_path() {
    let dir = tempfile::tempdir().expect("tempdir failed");
    let path = dir.path().join("absent.img");
    assert!(matches!(
        Analyzer::open(&path, options()),
        Err(AnalyzeError::Open(DeviceOpenError::NotFound { .. }))
    ));
}

/// Cancels the session on the first device read.
struct CancelOnRead<'a> {
    inner: MemBlockIO<'a>,
    token: CancelToken,
}

impl BlockIO for CancelOnRead<'_> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        self.token.cancel();
        self.inner.read_at(offset, buf)
    }

    fn device_len(&self) -> Option<u64> {
        self.inner.device_len()
    }
}

#[test]
fn test_cancel_between_stages() {
    let img = ExtImageBuilder::new(1024, 65536).build();
    let token = CancelToken::new();
    let io = CancelOnRead {
        inner: MemBlockIO::new(&img),
        token: token.clone(),
    };
    let mut a = Analyzer::new(io, options()).with_cancel_token(token);
    assert_eq!(
        a.analyze(),
        Err(AnalyzeError::Cancelled {
            stage: Stage::Validate
        })
    );
}
