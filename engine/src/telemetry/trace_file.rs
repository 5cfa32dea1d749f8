use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use super::TelemetrySink;
use crate::error::SinkError;
use crate::event::{ExecutionEvent, ExecutionTrace, RunSummary, WorkerId};

/// Persists each worker's trace as `cpu_<id>_execution.json` in a directory.
///
/// Nothing is written while a worker runs. At finalize the whole trace is
/// serialized to a temp file in the target directory and renamed over the
/// final path, so a reader sees either no file or a complete one.
#[derive(Debug, Clone)]
pub struct TraceFileSink {
    dir: PathBuf,
}

impl TraceFileSink {
    /// Creates the sink, creating `dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Target directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final path of `worker`'s trace.
    pub fn path_for(&self, worker: WorkerId) -> PathBuf {
        self.dir.join(file_name(worker))
    }
}

/// File name used for a worker's trace.
pub fn file_name(worker: WorkerId) -> String {
    format!("cpu_{}_execution.json", worker.0)
}

impl TelemetrySink for TraceFileSink {
    fn name(&self) -> &str {
        "trace-file"
    }

    fn emit(&self, _event: &ExecutionEvent) -> Result<(), SinkError> {
        Ok(())
    }

    fn finalize(&self, summary: &RunSummary, trace: &ExecutionTrace) -> Result<(), SinkError> {
        if trace.worker != summary.worker {
            return Err(SinkError::Rejected(format!(
                "trace of {} finalized with summary of {}",
                trace.worker, summary.worker
            )));
        }
        let path = self.path_for(trace.worker);
        let tmp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, trace)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|err| SinkError::Persist {
            path: path.clone(),
            reason: err.error.to_string(),
        })?;
        debug!(path = %path.display(), events = trace.len(), "trace persisted");
        Ok(())
    }
}
