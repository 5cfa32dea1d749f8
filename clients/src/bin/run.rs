//! `vcpu-run`: Runs a batch of virtual CPU workers and reports their outcomes.
//!
//! Settings come from an optional TOML file and are overridden by flags.
//!
//! **Usage:**
//! ```
//! vcpu-run [--config <file>] [--workers <n>] [--start <v>]... [--seed <x>] [--trace-dir <dir>]
//! ```
//!
//! Exits non-zero if any worker failed.

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    missing_docs,
    clippy::missing_errors_doc
)]

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use vcpu_engine::{init_tracing, FanOut, LinearPredictor, LogSink, Orchestrator, SimulationConfig};

/// Run virtual CPU workers over memoized Collatz reductions.
#[derive(Parser)]
#[command(name = "vcpu-run", about = "Run virtual CPU workers and report their outcomes")]
struct Args {
    /// TOML config file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of workers (ignored when --start is given).
    #[arg(long)]
    workers: Option<u32>,

    /// Smallest generated start value.
    #[arg(long)]
    start_min: Option<u64>,

    /// Largest generated start value.
    #[arg(long)]
    start_max: Option<u64>,

    /// Simulated clock cycle in milliseconds.
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Gate probability per step.
    #[arg(long)]
    probability: Option<f64>,

    /// Size of the gate table.
    #[arg(long)]
    gates: Option<u32>,

    /// Per-worker step ceiling; 0 disables it.
    #[arg(long)]
    max_steps: Option<u64>,

    /// Per-worker wall-clock ceiling in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Master seed for start values and gate draws.
    #[arg(long)]
    seed: Option<u64>,

    /// Maximum worker threads.
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Directory for `cpu_<id>_execution.json` traces.
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Explicit start value; repeat for one worker each.
    #[arg(long = "start", allow_negative_numbers = true)]
    starts: Vec<i64>,

    /// Skip the step-count predictor.
    #[arg(long)]
    no_predictor: bool,

    /// Log every step at info level.
    #[arg(long, short)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<(SimulationConfig, Vec<i64>, bool, bool)> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => SimulationConfig::default(),
        };
        if let Some(v) = self.workers {
            config.workers = v;
        }
        if let Some(v) = self.start_min {
            config.start_min = v;
        }
        if let Some(v) = self.start_max {
            config.start_max = v;
        }
        if let Some(v) = self.delay_ms {
            config.clock_delay_ms = v;
        }
        if let Some(v) = self.probability {
            config.perturbation.probability = v;
        }
        if let Some(v) = self.gates {
            config.perturbation.gates = v;
        }
        if let Some(v) = self.max_steps {
            config.max_steps = Some(v);
        }
        if self.timeout_ms.is_some() {
            config.timeout_ms = self.timeout_ms;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.max_concurrency.is_some() {
            config.max_concurrency = self.max_concurrency;
        }
        if self.trace_dir.is_some() {
            config.trace_dir = self.trace_dir;
        }
        if let Ok(count) = u32::try_from(self.starts.len()) {
            if count > 0 {
                config.workers = count;
            }
        }
        Ok((config, self.starts, !self.no_predictor, self.verbose))
    }
}

fn main() -> Result<()> {
    init_tracing();
    let (config, starts, use_predictor, verbose) = Args::parse().into_config()?;

    let sink = if verbose { LogSink::verbose() } else { LogSink::new() };
    let mut orchestrator = Orchestrator::new(config, FanOut::new().with(sink))?;
    if use_predictor {
        orchestrator = orchestrator.with_predictor(Arc::new(LinearPredictor::fit_default()));
    }

    let aggregate = if starts.is_empty() {
        orchestrator.run_all()?
    } else {
        orchestrator.run_plans(orchestrator.plan_starts(&starts))?
    };
    info!(total_steps = aggregate.total_steps(), "run complete");

    let report = aggregate.report();
    println!("vcpu Run Report");
    println!("===============");
    println!();
    println!("{report}");

    if let Some(dir) = &orchestrator.config().trace_dir {
        println!("Traces written to {}", dir.display());
    }

    let failed = report.failure_count();
    if failed > 0 {
        eprintln!("{failed} worker(s) failed.");
        process::exit(1);
    }
    Ok(())
}
