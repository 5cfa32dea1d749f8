//! Result lines, severity levels, and report aggregation.
//!
//! Shared by the run summary printed after an orchestrated run and by the
//! offline trace verifier.

use std::fmt;

use serde::Serialize;

/// Severity of a single report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Nothing to flag.
    Pass,
    /// Unusual but not wrong (loops, ceilings, perturbed transitions).
    Warning,
    /// Broken (failed workers, malformed traces).
    Failure,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Pass => "PASS",
            Severity::Warning => "WARN",
            Severity::Failure => "FAIL",
        })
    }
}

/// One line of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    /// What the line is about, e.g. a worker or a trace file.
    pub subject: String,
    /// Human-readable outcome.
    pub message: String,
    /// Severity.
    pub severity: Severity,
    /// Additional detail lines.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl Finding {
    fn new(subject: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            subject: subject.into(),
            message: message.into(),
            severity,
            details: Vec::new(),
        }
    }

    /// A passing line.
    pub fn pass(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(subject, message, Severity::Pass)
    }

    /// A warning line.
    pub fn warn(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(subject, message, Severity::Warning)
    }

    /// A failure line.
    pub fn fail(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(subject, message, Severity::Failure)
    }

    /// Attaches detail lines.
    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    /// Returns true for [`Severity::Failure`].
    pub fn is_failure(&self) -> bool {
        self.severity == Severity::Failure
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.subject, self.message)?;
        for detail in &self.details {
            write!(f, "\n       {detail}")?;
        }
        Ok(())
    }
}

/// Ordered collection of findings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    /// All findings in insertion order.
    pub findings: Vec<Finding>,
}

impl Report {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a finding.
    pub fn push(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    /// Appends every finding of `other`.
    pub fn extend(&mut self, other: Report) {
        self.findings.extend(other.findings);
    }

    /// Number of findings with `severity`.
    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    /// Number of failures.
    pub fn failure_count(&self) -> usize {
        self.count(Severity::Failure)
    }

    /// Returns true if nothing failed.
    pub fn all_passed(&self) -> bool {
        self.failure_count() == 0
    }

    /// Worst severity present, `Pass` for an empty report.
    pub fn worst(&self) -> Severity {
        self.findings
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(Severity::Pass)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for finding in &self.findings {
            writeln!(f, "{finding}")?;
        }
        write!(
            f,
            "{} passed, {} warnings, {} failed",
            self.count(Severity::Pass),
            self.count(Severity::Warning),
            self.failure_count()
        )
    }
}
