//! Telemetry sinks and their fan-out.
//!
//! The engine reports through a single [`FanOut`], which forwards every call
//! to each registered [`TelemetrySink`] in registration order. A failing or
//! panicking sink is logged and counted; it never reaches the engine and
//! never stops the remaining sinks.
//!
//! | Sink | Medium |
//! |------|--------|
//! | [`LogSink`] | `tracing` events (console) |
//! | [`BufferSink`] | bounded in-memory buffer polled by a UI |
//! | [`TraceFileSink`] | one JSON trace per worker, written at finalize |
//! | [`FeedSink`] | push feed over a channel to a remote consumer |
//!
//! Sinks shared by concurrently running workers must serialize their own
//! writes. Ordering is only guaranteed within one worker's stream.

mod buffer;
mod feed;
mod log;
mod trace_file;

pub use buffer::{BufferSink, BufferedLine};
pub use feed::{FeedMessage, FeedSink};
pub use log::LogSink;
pub use trace_file::{file_name as trace_file_name, TraceFileSink};

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::error::SinkError;
use crate::event::{EventKind, ExecutionEvent, ExecutionTrace, HaltReason, Notice, RunSummary, WorkerId};

/// Capability interface for telemetry destinations.
pub trait TelemetrySink: Send + Sync {
    /// Short name used when logging failures.
    fn name(&self) -> &str;

    /// Receives one execution event.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the medium rejects the event.
    fn emit(&self, event: &ExecutionEvent) -> Result<(), SinkError>;

    /// Receives an out-of-band notice. Ignored by default.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the medium rejects the notice.
    fn notice(&self, _worker: WorkerId, _notice: &Notice) -> Result<(), SinkError> {
        Ok(())
    }

    /// Receives the run summary and the complete trace once the worker halts.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the medium rejects the summary or trace.
    fn finalize(&self, summary: &RunSummary, trace: &ExecutionTrace) -> Result<(), SinkError>;
}

/// Ordered set of sinks with per-sink failure isolation.
#[derive(Default)]
pub struct FanOut {
    sinks: Vec<Arc<dyn TelemetrySink>>,
    failures: AtomicU64,
}

impl FanOut {
    /// Creates a fan-out with no sinks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink, builder style.
    pub fn with(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Adds an already shared sink, builder style.
    pub fn with_shared(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Adds a sink.
    pub fn push(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.sinks.push(sink);
    }

    /// Number of registered sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true if no sink is registered.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Sink failures (errors and panics) observed so far.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Forwards an event to every sink.
    pub fn broadcast_event(&self, event: &ExecutionEvent) {
        for sink in &self.sinks {
            self.guarded(sink.as_ref(), "emit", || sink.emit(event));
        }
    }

    /// Forwards a notice to every sink.
    pub fn broadcast_notice(&self, worker: WorkerId, notice: &Notice) {
        for sink in &self.sinks {
            self.guarded(sink.as_ref(), "notice", || sink.notice(worker, notice));
        }
    }

    /// Forwards the finish summary and trace to every sink.
    pub fn broadcast_finish(&self, summary: &RunSummary, trace: &ExecutionTrace) {
        for sink in &self.sinks {
            self.guarded(sink.as_ref(), "finalize", || sink.finalize(summary, trace));
        }
    }

    fn guarded<F>(&self, sink: &dyn TelemetrySink, op: &str, call: F)
    where
        F: FnOnce() -> Result<(), SinkError>,
    {
        match panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(sink = sink.name(), op, error = %err, "telemetry sink failed");
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(sink = sink.name(), op, "telemetry sink panicked");
            }
        }
    }
}

impl std::fmt::Debug for FanOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("FanOut")
            .field("sinks", &names)
            .field("failures", &self.failures())
            .finish()
    }
}

impl TelemetrySink for FanOut {
    fn name(&self) -> &str {
        "fan-out"
    }

    fn emit(&self, event: &ExecutionEvent) -> Result<(), SinkError> {
        self.broadcast_event(event);
        Ok(())
    }

    fn notice(&self, worker: WorkerId, notice: &Notice) -> Result<(), SinkError> {
        self.broadcast_notice(worker, notice);
        Ok(())
    }

    fn finalize(&self, summary: &RunSummary, trace: &ExecutionTrace) -> Result<(), SinkError> {
        self.broadcast_finish(summary, trace);
        Ok(())
    }
}

/// Renders an event as a console line.
pub fn render_event(event: &ExecutionEvent) -> String {
    match (event.kind, event.halt) {
        (EventKind::CacheHit, _) => {
            format!("{}: Cache Hit! ACC = {}", event.worker, event.value)
        }
        (EventKind::Step, _) => {
            format!("{}: Step {} -> ACC = {}", event.worker, event.step, event.value)
        }
        (EventKind::Halt, Some(HaltReason::LoopDetected)) => {
            format!("{}: Loop detected! Breaking.", event.worker)
        }
        (EventKind::Halt, reason) => format!(
            "{}: halted ({}) at step {} with ACC = {}",
            event.worker,
            reason.map(|r| r.to_string()).unwrap_or_else(|| "unknown".into()),
            event.step,
            event.value
        ),
    }
}

/// Renders a notice as a console line.
pub fn render_notice(worker: WorkerId, notice: &Notice) -> String {
    match notice {
        Notice::Loaded { start } => format!("{worker}: Loaded number {start} into ACC"),
        Notice::Prediction { estimate } => {
            format!("{worker}: Predicted Steps = {}", estimate.round() as i64)
        }
        Notice::PredictorUnavailable { reason } => {
            format!("{worker}: Predicted Steps unavailable ({reason})")
        }
        Notice::Perturbed { gate, after, .. } => {
            format!("{worker}: Applied Quantum Gate-{gate} -> ACC = {after}")
        }
        Notice::Degraded { gate, value, reason } => {
            format!("{worker}: Quantum Gate-{gate} degraded ({reason}), ACC stays {value}")
        }
    }
}

/// Renders a run summary as a console line.
pub fn render_summary(summary: &RunSummary) -> String {
    format!(
        "{}: Collatz Conjecture {} in {} steps. Time Taken: {:.5} sec",
        summary.worker,
        match summary.halt {
            HaltReason::Converged => "solved",
            HaltReason::LoopDetected => "stopped on loop",
            HaltReason::TimeoutExceeded => "timed out",
            HaltReason::Cancelled => "cancelled",
        },
        summary.steps,
        summary.elapsed.as_secs_f64()
    )
}
