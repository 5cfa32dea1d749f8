use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tracing::debug;
use vcpu_engine::ExecutionTrace;
use walkdir::WalkDir;

/// Errors raised while finding or reading trace files.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// The file could not be opened or read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid trace document.
    #[error("malformed trace {}: {source}", path.display())]
    Json {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Directory traversal failed.
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

/// Reads one persisted trace.
///
/// # Errors
///
/// Returns [`TraceError::Io`] if the file cannot be read, or
/// [`TraceError::Json`] if it does not hold a trace.
pub fn load_trace(path: &Path) -> Result<ExecutionTrace, TraceError> {
    let file = File::open(path).map_err(|source| TraceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| TraceError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Returns true for names of the form `cpu_<id>_execution.json`.
pub fn is_trace_file(name: &str) -> bool {
    name.strip_prefix("cpu_")
        .and_then(|rest| rest.strip_suffix("_execution.json"))
        .is_some_and(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
}

/// Finds every trace file below `dir`, sorted by path.
///
/// # Errors
///
/// Returns [`TraceError::Walk`] if the directory cannot be traversed.
pub fn discover_traces(dir: &Path) -> Result<Vec<PathBuf>, TraceError> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() && entry.file_name().to_str().is_some_and(is_trace_file) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    debug!(dir = %dir.display(), count = found.len(), "discovered traces");
    Ok(found)
}
