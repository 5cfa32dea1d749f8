//! Execution events, traces, halt reasons and run summaries.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifier of one worker. Rendered as `CPU-<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU-{}", self.0)
    }
}

/// What an [`ExecutionEvent`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// The current value was resolved from the transition cache.
    CacheHit,
    /// A reduction step produced a fresh value.
    Step,
    /// The worker stopped. Always the last event of a trace.
    Halt,
}

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HaltReason {
    /// The register reached 1.
    Converged,
    /// A value recurred.
    LoopDetected,
    /// The step or wall-clock ceiling was reached.
    TimeoutExceeded,
    /// The run was cancelled from outside.
    Cancelled,
}

impl HaltReason {
    /// All halt reasons, in declaration order.
    pub const ALL: [HaltReason; 4] = [
        HaltReason::Converged,
        HaltReason::LoopDetected,
        HaltReason::TimeoutExceeded,
        HaltReason::Cancelled,
    ];
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HaltReason::Converged => "converged",
            HaltReason::LoopDetected => "loop detected",
            HaltReason::TimeoutExceeded => "timeout exceeded",
            HaltReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One immutable record of a worker's progress.
///
/// `step` is the number of completed reduction steps when the event fires,
/// so a `Step` event carries the new count and `CacheHit`/`Halt` carry the
/// count so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Emitting worker.
    pub worker: WorkerId,
    /// Completed step count.
    pub step: u64,
    /// Value involved (new ACC for `Step`, resolved value for `CacheHit`,
    /// final or offending value for `Halt`).
    pub value: u64,
    /// Event kind.
    pub kind: EventKind,
    /// Halt reason; present only on `Halt` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt: Option<HaltReason>,
}

impl ExecutionEvent {
    /// A `Step` event.
    pub const fn step(worker: WorkerId, step: u64, value: u64) -> Self {
        Self {
            worker,
            step,
            value,
            kind: EventKind::Step,
            halt: None,
        }
    }

    /// A `CacheHit` event.
    pub const fn cache_hit(worker: WorkerId, step: u64, value: u64) -> Self {
        Self {
            worker,
            step,
            value,
            kind: EventKind::CacheHit,
            halt: None,
        }
    }

    /// A `Halt` event.
    pub const fn halt(worker: WorkerId, step: u64, value: u64, reason: HaltReason) -> Self {
        Self {
            worker,
            step,
            value,
            kind: EventKind::Halt,
            halt: Some(reason),
        }
    }
}

/// Ordered events of one worker run. This is the artifact persisted at halt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Owning worker.
    pub worker: WorkerId,
    /// Value loaded into the register before the first step.
    pub start: u64,
    /// Events in emission order.
    pub events: Vec<ExecutionEvent>,
}

impl ExecutionTrace {
    /// Creates an empty trace.
    pub fn new(worker: WorkerId, start: u64) -> Self {
        Self {
            worker,
            start,
            events: Vec::new(),
        }
    }

    /// Appends an event.
    pub fn push(&mut self, event: ExecutionEvent) {
        self.events.push(event);
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true when no event was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Values of `Step` events, in order.
    pub fn step_values(&self) -> Vec<u64> {
        self.events
            .iter()
            .filter(|e| e.kind == EventKind::Step)
            .map(|e| e.value)
            .collect()
    }

    /// The full value sequence starting with `start` (`Step` values only).
    pub fn sequence(&self) -> Vec<u64> {
        std::iter::once(self.start)
            .chain(self.step_values())
            .collect()
    }

    /// Halt reason of the terminal event, if the trace is finished.
    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.events.last().and_then(|e| e.halt)
    }
}

/// Out-of-band telemetry that is not part of the execution trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notice {
    /// The start value was loaded into the register.
    Loaded {
        /// Loaded value.
        start: u64,
    },
    /// The predictor's estimate for this worker.
    Prediction {
        /// Estimated step count.
        estimate: f64,
    },
    /// The predictor could not produce an estimate.
    PredictorUnavailable {
        /// Rendered predictor error.
        reason: String,
    },
    /// A gate fired and changed the value.
    Perturbed {
        /// Gate index.
        gate: u32,
        /// Value before the gate.
        before: u64,
        /// Value after the gate.
        after: u64,
    },
    /// A gate failed and the value passed through unchanged.
    Degraded {
        /// Gate index.
        gate: u32,
        /// Value that passed through.
        value: u64,
        /// Rendered perturbation error.
        reason: String,
    },
}

/// Final figures of one worker run, handed to sinks at finalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Worker.
    pub worker: WorkerId,
    /// Start value.
    pub start: u64,
    /// Completed reduction steps.
    pub steps: u64,
    /// Register contents at halt.
    pub final_value: u64,
    /// Why the run stopped.
    pub halt: HaltReason,
    /// Wall time spent in the loop.
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    /// Cache hits.
    pub cache_hits: u64,
    /// Gates that changed the value.
    pub perturbations: u64,
    /// Gates that failed and degraded to identity.
    pub degraded: u64,
    /// Advisory estimate, when the predictor answered.
    pub predicted_steps: Option<f64>,
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
