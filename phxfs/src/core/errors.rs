// SPDX-License-Identifier: MIT

use core::fmt;

use serde::Serialize;
use thiserror::Error;

pub use phxio::errors::*;

/// A candidate region that cannot be decoded as any supported layout.
///
/// This is about structure, not values: a decodable superblock with absurd
/// geometry still parses and is graded by the validator instead.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum DecodeError {
    #[error("region too short: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },

    #[error("bad magic: expected {expected:#x}, found {found:#x}")]
    BadMagic { expected: u64, found: u64 },
}

pub type DecodeResult<T> = core::result::Result<T, DecodeError>;

/// Pipeline stage, used to report where a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Locate,
    Validate,
    GroupDescriptors,
    Model,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Locate => "superblock location",
            Stage::Validate => "validation",
            Stage::GroupDescriptors => "group descriptor read",
            Stage::Model => "model assembly",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Session-level failure.
///
/// Device faults abort the session. Damaged metadata never shows up here: it
/// is reported through verdicts and anomalies on a successful outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalyzeError {
    #[error("cannot open device: {0}")]
    Open(#[from] DeviceOpenError),

    #[error("device read failed: {0}")]
    Read(#[from] DeviceReadError),

    #[error("{} superblock candidate(s) found but none could be decoded", .rejected.len())]
    NoDecodableSuperblock { rejected: Vec<(u64, DecodeError)> },

    #[error("analysis cancelled before {stage}")]
    Cancelled { stage: Stage },
}

pub type AnalyzeResult<T> = core::result::Result<T, AnalyzeError>;
