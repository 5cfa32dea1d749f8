use tracing::{debug, info, warn};

use super::{render_event, render_notice, render_summary, TelemetrySink};
use crate::error::SinkError;
use crate::event::{EventKind, ExecutionEvent, ExecutionTrace, Notice, RunSummary, WorkerId};

/// Writes telemetry as `tracing` events under the `vcpu::telemetry` target.
///
/// Per-step lines go out at `debug` unless the sink is [`LogSink::verbose`],
/// in which case they go out at `info` like everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink {
    verbose: bool,
}

impl LogSink {
    /// Step lines at `debug`.
    pub fn new() -> Self {
        Self { verbose: false }
    }

    /// Step lines at `info`.
    pub fn verbose() -> Self {
        Self { verbose: true }
    }
}

impl TelemetrySink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn emit(&self, event: &ExecutionEvent) -> Result<(), SinkError> {
        let line = render_event(event);
        match event.kind {
            EventKind::Halt => info!(target: "vcpu::telemetry", worker = event.worker.0, "{line}"),
            _ if self.verbose => info!(target: "vcpu::telemetry", worker = event.worker.0, "{line}"),
            _ => debug!(target: "vcpu::telemetry", worker = event.worker.0, "{line}"),
        }
        Ok(())
    }

    fn notice(&self, worker: WorkerId, notice: &Notice) -> Result<(), SinkError> {
        let line = render_notice(worker, notice);
        match notice {
            Notice::PredictorUnavailable { .. } | Notice::Degraded { .. } => {
                warn!(target: "vcpu::telemetry", worker = worker.0, "{line}")
            }
            _ => info!(target: "vcpu::telemetry", worker = worker.0, "{line}"),
        }
        Ok(())
    }

    fn finalize(&self, summary: &RunSummary, _trace: &ExecutionTrace) -> Result<(), SinkError> {
        info!(
            target: "vcpu::telemetry",
            worker = summary.worker.0,
            steps = summary.steps,
            halt = %summary.halt,
            "{}",
            render_summary(summary)
        );
        Ok(())
    }
}
