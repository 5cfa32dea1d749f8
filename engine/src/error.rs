//! Error taxonomy for the engine and its collaborators.
//!
//! Only contract violations are errors. `LoopDetected`, `TimeoutExceeded` and
//! `Cancelled` are ordinary halt reasons (see [`crate::HaltReason`]) and never
//! travel through these types.

use std::path::PathBuf;

/// Errors that stop a worker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The start value is not a positive integer. Raised before any work.
    #[error("invalid start value {start}: must be a positive integer")]
    InvalidInput {
        /// The rejected start value.
        start: i64,
    },

    /// `3n + 1` left the `u64` domain.
    #[error("value {value} overflows the register at step {step}")]
    Overflow {
        /// The odd value whose successor does not fit.
        value: u64,
        /// Step index at which the overflow happened.
        step: u64,
    },

    /// A cache key was about to be rewritten with a different value.
    #[error("cache key {key} already maps to {existing}, refusing {attempted}")]
    CacheConflict {
        /// The cache key.
        key: u64,
        /// The value already stored.
        existing: u64,
        /// The value that would have replaced it.
        attempted: u64,
    },
}

/// Errors raised while loading or validating a [`crate::SimulationConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML document is malformed or has the wrong shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field holds a value the engine cannot run with.
    #[error("invalid config field `{field}`: {reason}")]
    Invalid {
        /// Dotted field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Failure inside a single telemetry sink.
///
/// Sink failures are caught by [`crate::telemetry::FanOut`] and never reach
/// the engine.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Writing to the sink's medium failed.
    #[error("sink i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing a record failed.
    #[error("sink serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Persisting a temp file over its final path failed.
    #[error("failed to persist trace {path}: {reason}")]
    Persist {
        /// Final trace path.
        path: PathBuf,
        /// Error reported by the rename.
        reason: String,
    },

    /// The receiving side of a push feed went away.
    #[error("feed receiver disconnected")]
    Disconnected,

    /// The sink rejected the record for a sink-specific reason.
    #[error("{0}")]
    Rejected(String),
}

/// Failure of a [`crate::PerturbationSource`]. Treated as identity by the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PerturbationError {
    /// The drawn gate index lies outside `[0, gates)`.
    #[error("gate {gate} outside gate table of size {gates}")]
    GateOutOfRange {
        /// Requested gate index.
        gate: u32,
        /// Size of the gate table.
        gates: u32,
    },

    /// The transform would leave the positive integers.
    #[error("gate {gate} maps {value} to zero")]
    Degenerate {
        /// Input value.
        value: u64,
        /// Gate that was applied.
        gate: u32,
    },
}

/// Failure of a [`crate::Predictor`]. Degrades telemetry only.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictorError {
    /// No predictor is available.
    #[error("predictor unavailable")]
    Unavailable,

    /// The model has not been fitted, or was fitted on a degenerate range.
    #[error("predictor model is not fitted")]
    NotFitted,

    /// The model produced NaN or an infinite estimate.
    #[error("predictor produced a non-finite estimate for {start}")]
    NonFinite {
        /// Start value that was queried.
        start: u64,
    },
}

/// Errors that prevent the orchestrator from running at all.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The simulation config is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The trace directory could not be prepared.
    #[error("cannot prepare trace directory {}: {source}", path.display())]
    TraceDir {
        /// Directory from the config.
        path: PathBuf,
        /// Underlying sink error.
        #[source]
        source: SinkError,
    },

    /// Two plans of one run name the same worker.
    #[error("worker {worker} appears in more than one plan")]
    DuplicateWorker {
        /// The repeated worker.
        worker: crate::event::WorkerId,
    },

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Why one worker of an orchestrated run produced no outcome.
///
/// Contained per worker: the remaining workers keep running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerFailure {
    /// The engine returned an error.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The worker panicked.
    #[error("worker panicked: {0}")]
    Panicked(String),
}
