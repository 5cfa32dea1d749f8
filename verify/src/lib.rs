//! Trace-replay verifier for persisted vcpu execution traces.
//!
//! A trace is verified by replaying it from its recorded start value, without
//! running the engine: every event is checked against the state the replay
//! has reconstructed so far.
//!
//! # Checks
//!
//! | Check | Severity on violation |
//! |-------|-----------------------|
//! | Events carry the trace's worker | Failure |
//! | Step indices count up from 1, other events carry the current count | Failure |
//! | Exactly one `Halt`, as the last event | Failure |
//! | No `Step` value is produced twice | Failure |
//! | A `CacheHit` repeats an earlier recorded transition | Failure |
//! | A `Converged` halt ends at 1, a `LoopDetected` halt names a produced value | Failure |
//! | A `Step` is the canonical reduction of the previous value | Warning (perturbed transition) |
//!
//! # Entry Point
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! let report = vcpu_verify::verify_paths(&[PathBuf::from("traces")]);
//! assert!(report.all_passed());
//! ```

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    missing_docs,
    clippy::missing_errors_doc
)]

mod load;
mod replay;

pub use load::{discover_traces, is_trace_file, load_trace, TraceError};
pub use replay::verify_trace;

use std::path::{Path, PathBuf};

use vcpu_engine::{Finding, Report};

/// Loads and verifies one trace file.
///
/// A file that cannot be loaded yields a single failure line.
pub fn verify_file(path: &Path) -> Report {
    match load_trace(path) {
        Ok(trace) => {
            let mut report = verify_trace(&trace);
            let label = path.display().to_string();
            for finding in &mut report.findings {
                finding.subject = format!("{label} ({})", finding.subject);
            }
            report
        }
        Err(err) => {
            let mut report = Report::new();
            report.push(Finding::fail(path.display().to_string(), err.to_string()));
            report
        }
    }
}

/// Verifies every given file, and every trace file below every given
/// directory.
pub fn verify_paths(paths: &[PathBuf]) -> Report {
    let mut report = Report::new();
    for path in paths {
        if path.is_dir() {
            match discover_traces(path) {
                Ok(files) if files.is_empty() => {
                    report.push(Finding::warn(path.display().to_string(), "no trace files found"));
                }
                Ok(files) => {
                    for file in files {
                        report.extend(verify_file(&file));
                    }
                }
                Err(err) => report.push(Finding::fail(path.display().to_string(), err.to_string())),
            }
        } else {
            report.extend(verify_file(path));
        }
    }
    report
}
