// SPDX-License-Identifier: MIT

use core::fmt;

use serde::Serialize;

/// Anomaly severity. `Warn` is soft, `Error` is hard.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Warn,
    Error,
}

/// One violated expectation, structured for reporting.
///
/// `constraint` states what was expected (`"<= total_blocks"`), `observed`
/// is the raw value that broke it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Anomaly {
    pub code: &'static str,
    pub field: &'static str,
    pub constraint: String,
    pub observed: u64,
    pub severity: Severity,
}

impl Anomaly {
    pub fn warn(
        code: &'static str,
        field: &'static str,
        constraint: impl Into<String>,
        observed: u64,
    ) -> Self {
        Self {
            code,
            field,
            constraint: constraint.into(),
            observed,
            severity: Severity::Warn,
        }
    }

    pub fn error(
        code: &'static str,
        field: &'static str,
        constraint: impl Into<String>,
        observed: u64,
    ) -> Self {
        Self {
            code,
            field,
            constraint: constraint.into(),
            observed,
            severity: Severity::Error,
        }
    }

    #[inline]
    pub fn is_hard(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Warn => "WARN",
            Severity::Error => "ERR ",
        };
        write!(
            f,
            "{tag}: {:<20} {} {} (observed {})",
            self.code, self.field, self.constraint, self.observed
        )
    }
}

/// Accumulates anomalies while a set of checks runs.
#[derive(Clone, Debug, Default)]
pub struct AnomalyReport {
    pub anomalies: Vec<Anomaly>,
}

impl AnomalyReport {
    #[inline]
    pub fn push(&mut self, a: Anomaly) {
        self.anomalies.push(a)
    }

    pub fn hard(
        &mut self,
        code: &'static str,
        field: &'static str,
        constraint: impl Into<String>,
        observed: u64,
    ) {
        self.push(Anomaly::error(code, field, constraint, observed))
    }

    pub fn soft(
        &mut self,
        code: &'static str,
        field: &'static str,
        constraint: impl Into<String>,
        observed: u64,
    ) {
        self.push(Anomaly::warn(code, field, constraint, observed))
    }

    pub fn has_error(&self) -> bool {
        self.anomalies.iter().any(Anomaly::is_hard)
    }

    pub fn count(&self, s: Severity) -> usize {
        self.anomalies.iter().filter(|a| a.severity == s).count()
    }

    pub fn is_empty(&self) -> bool {
        self.anomalies.is_empty()
    }

    pub fn into_verdict(self) -> ConfidenceVerdict {
        ConfidenceVerdict::from_anomalies(self.anomalies)
    }
}

/// Graded trust in one decoded superblock.
///
/// `Corrupt` keeps every anomaly, soft ones included, so nothing found during
/// validation is ever dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ConfidenceVerdict {
    Valid,
    ValidWithWarnings(Vec<Anomaly>),
    Corrupt(Vec<Anomaly>),
}

impl ConfidenceVerdict {
    pub fn from_anomalies(anomalies: Vec<Anomaly>) -> Self {
        if anomalies.is_empty() {
            ConfidenceVerdict::Valid
        } else if anomalies.iter().any(Anomaly::is_hard) {
            ConfidenceVerdict::Corrupt(anomalies)
        } else {
            ConfidenceVerdict::ValidWithWarnings(anomalies)
        }
    }

    /// Ordering key: higher is more trustworthy.
    #[inline]
    pub fn rank(&self) -> u8 {
        match self {
            ConfidenceVerdict::Valid => 2,
            ConfidenceVerdict::ValidWithWarnings(_) => 1,
            ConfidenceVerdict::Corrupt(_) => 0,
        }
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        match self {
            ConfidenceVerdict::Valid => &[],
            ConfidenceVerdict::ValidWithWarnings(a) | ConfidenceVerdict::Corrupt(a) => a,
        }
    }

    pub fn hard_count(&self) -> usize {
        self.anomalies().iter().filter(|a| a.is_hard()).count()
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        matches!(self, ConfidenceVerdict::Valid)
    }

    #[inline]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, ConfidenceVerdict::Corrupt(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceVerdict::Valid => "valid",
            ConfidenceVerdict::ValidWithWarnings(_) => "valid-with-warnings",
            ConfidenceVerdict::Corrupt(_) => "corrupt",
        }
    }
}

impl fmt::Display for ConfidenceVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())?;
        for a in self.anomalies() {
            write!(f, "\n  {a}")?;
        }
        Ok(())
    }
}
