//! Virtual CPU running memoized Collatz reductions.
//!
//! Each worker loads a start value into its accumulator and repeatedly
//! applies the reduction `n -> n / 2` (even) or `n -> 3n + 1` (odd) until it
//! reaches 1. A step is decoded into a short pipeline of micro-ops, its
//! result may be rewritten by a randomly selected gate, and every produced
//! value is remembered so that a revisited value halts the worker instead of
//! cycling forever.
//!
//! # Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`pipeline`] | Micro-op decoding and the reference reduction |
//! | [`state`] | Register, memory and write-once successor cache |
//! | [`perturbation`] | Gate tables and the gate draw |
//! | [`engine`] | The per-worker state machine |
//! | [`orchestrator`] | Concurrent workers, plans and aggregation |
//! | [`telemetry`] | Sinks and the failure-isolating fan-out |
//! | [`predictor`] | Advisory step-count estimates |
//! | [`config`] | TOML configuration and validation |
//! | [`report`] | Severity-graded result lines |
//!
//! # Halting
//!
//! ```text
//! Converged        value reached 1
//! LoopDetected     a value was produced twice
//! TimeoutExceeded  step or wall-clock ceiling reached
//! Cancelled        the cancel token was tripped
//! ```
//!
//! # Entry Point
//!
//! ```no_run
//! use vcpu_engine::{FanOut, LogSink, Orchestrator, SimulationConfig};
//!
//! let config = SimulationConfig::default();
//! let orchestrator = Orchestrator::new(config, FanOut::new().with(LogSink::new()))?;
//! let aggregate = orchestrator.run_all()?;
//! println!("{}", aggregate.report());
//! # Ok::<(), vcpu_engine::OrchestratorError>(())
//! ```

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    missing_docs,
    clippy::missing_errors_doc
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod logging;
pub mod orchestrator;
pub mod perturbation;
pub mod pipeline;
pub mod predictor;
pub mod report;
pub mod state;
pub mod telemetry;

pub use config::{PerturbationConfig, SimulationConfig};
pub use engine::{CancelToken, RunOutcome, SequenceEngine};
pub use error::{
    ConfigError, EngineError, OrchestratorError, PerturbationError, PredictorError, SinkError,
    WorkerFailure,
};
pub use event::{EventKind, ExecutionEvent, ExecutionTrace, HaltReason, Notice, RunSummary, WorkerId};
pub use logging::init_tracing;
pub use orchestrator::{Aggregate, Orchestrator, WorkerOutcome, WorkerPlan};
pub use perturbation::{FnSource, PerturbationSource, XorShiftGate};
pub use pipeline::{reduce, reference_steps, MicroOp, Pipeline};
pub use predictor::{LinearPredictor, Predictor, ReferencePredictor, UnavailablePredictor};
pub use report::{Finding, Report, Severity};
pub use state::{Cache, Memory, Register};
pub use telemetry::{BufferSink, FanOut, FeedMessage, FeedSink, LogSink, TelemetrySink, TraceFileSink};
