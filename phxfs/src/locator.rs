// SPDX-License-Identifier: MIT
//! Superblock candidate scan.
//!
//! The primary location comes first. When it decodes with walkable geometry,
//! the backup copies it implies follow. When none of those holds a
//! signature, the fallback table is probed, one group-1 copy per block size,
//! the way e2fsck looks for a backup when the primary is unusable.
//!
//! Only a failed read of the primary location ends the scan. Backup and
//! fallback locations are guesses, so a failed read there skips the probe.

use std::collections::{BTreeSet, VecDeque};

use tracing::{debug, trace, warn};

use phxio::{BlockIO, BlockIOExt};

use crate::core::errors::DeviceReadError;
use crate::format::{CANDIDATE_SIZE, CandidateOrigin, FsFamily, SuperblockCandidate};

pub const DEFAULT_MAX_BACKUPS: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocateOptions {
    /// Backup copies derived from the primary, at most.
    pub max_backups: usize,
    /// Probe the fallback table when the primary is unusable.
    pub probe_fallback: bool,
}

impl Default for LocateOptions {
    fn default() -> Self {
        Self {
            max_backups: DEFAULT_MAX_BACKUPS,
            probe_fallback: true,
        }
    }
}

impl LocateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_backups(mut self, n: usize) -> Self {
        self.max_backups = n;
        self
    }

    pub fn no_fallback(mut self) -> Self {
        self.probe_fallback = false;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProbeKind {
    Primary,
    /// Implied by the primary's geometry.
    Derived,
    Fallback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Probe {
    offset: u64,
    kind: ProbeKind,
    group: u64,
}

impl Probe {
    #[inline]
    fn is_backup(&self) -> bool {
        self.kind != ProbeKind::Primary
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Primary,
    Derived,
    Fallback,
    Done,
}

/// Lazy scan over the candidate locations of one device.
///
/// Yields a candidate for every location whose bytes match a known family
/// signature. A device read failure is yielded as an error; the scan can be
/// resumed but callers usually stop there.
pub struct CandidateScan<'io, IO: BlockIO + ?Sized> {
    io: &'io mut IO,
    opts: LocateOptions,
    phase: Phase,
    queue: VecDeque<Probe>,
    seen: BTreeSet<u64>,
    /// Whether a derived backup location held a signature.
    derived: bool,
    probed: usize,
}

/// Starts a scan. Nothing is read until the first `next()`.
pub fn locate<'io, IO: BlockIO + ?Sized>(
    io: &'io mut IO,
    opts: LocateOptions,
) -> CandidateScan<'io, IO> {
    CandidateScan {
        io,
        opts,
        phase: Phase::Primary,
        queue: VecDeque::new(),
        seen: BTreeSet::new(),
        derived: false,
        probed: 0,
    }
}

impl<'io, IO: BlockIO + ?Sized> CandidateScan<'io, IO> {
    /// Locations actually read so far.
    #[inline]
    pub fn probed(&self) -> usize {
        self.probed
    }

    /// Queues the next batch of probes. Returns false once exhausted.
    fn advance(&mut self) -> bool {
        match self.phase {
            Phase::Primary => {
                for family in FsFamily::ALL {
                    self.queue.push_back(Probe {
                        offset: family.layout().primary_offset,
                        kind: ProbeKind::Primary,
                        group: 0,
                    });
                }
                self.phase = Phase::Derived;
            }
            // Derived copies are queued as soon as the primary is read, so
            // they have all been probed once the queue first drains.
            Phase::Derived => self.phase = Phase::Fallback,
            Phase::Fallback => {
                if self.opts.probe_fallback && !self.derived && self.io.device_len().is_some() {
                    for family in FsFamily::ALL {
                        for (group, offset) in family.fallback_probes() {
                            self.queue.push_back(Probe {
                                offset,
                                kind: ProbeKind::Fallback,
                                group,
                            });
                        }
                    }
                }
                self.phase = Phase::Done;
            }
            Phase::Done => return false,
        }
        true
    }

    /// Queues the backups implied by a decodable primary.
    fn derive_backups(&mut self, family: FsFamily, raw: &[u8]) {
        let origin = CandidateOrigin::primary(family.layout().primary_offset);
        let Ok(sb) = family.parse_region(raw, origin) else {
            return;
        };
        if !sb.geometry.is_walkable() {
            debug!("primary geometry unusable, no backups derived");
            return;
        }
        let backups = family.backup_offsets(&sb, self.opts.max_backups);
        debug!(count = backups.len(), "backup locations derived from primary");
        for (group, offset) in backups {
            self.queue.push_back(Probe {
                offset,
                kind: ProbeKind::Derived,
                group,
            });
        }
    }
}

impl<'io, IO: BlockIO + ?Sized> Iterator for CandidateScan<'io, IO> {
    type Item = Result<SuperblockCandidate, DeviceReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(probe) = self.queue.pop_front() else {
                if self.advance() {
                    continue;
                }
                return None;
            };

            if !self.seen.insert(probe.offset) {
                continue;
            }
            if !self.io.fits(probe.offset, CANDIDATE_SIZE as u64) {
                trace!(offset = probe.offset, "probe beyond device end, skipped");
                continue;
            }

            self.probed += 1;
            let raw = match self.io.read_struct::<[u8; CANDIDATE_SIZE]>(probe.offset) {
                Ok(raw) => Box::new(raw),
                Err(e) if probe.is_backup() => {
                    warn!(
                        offset = probe.offset,
                        group = probe.group,
                        error = %e,
                        "backup location unreadable, skipped"
                    );
                    continue;
                }
                Err(e) => return Some(Err(e)),
            };

            let Some(family) = FsFamily::detect_any(&raw[..]) else {
                debug!(offset = probe.offset, group = probe.group, "no signature");
                continue;
            };
            debug!(
                offset = probe.offset,
                group = probe.group,
                backup = probe.is_backup(),
                family = family.layout().name,
                "signature found"
            );

            match probe.kind {
                ProbeKind::Primary => self.derive_backups(family, &raw[..]),
                ProbeKind::Derived => self.derived = true,
                ProbeKind::Fallback => {}
            }

            return Some(Ok(SuperblockCandidate {
                offset: probe.offset,
                raw,
                format: family,
                is_backup: probe.is_backup(),
                group: probe.group,
            }));
        }
    }
}
