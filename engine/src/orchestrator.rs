//! Runs many workers concurrently and collects their outcomes.
//!
//! Workers share nothing but the telemetry fan-out and the cancel token.
//! Each worker gets its own engine, RNG seed, register, memory and cache; a
//! worker that fails or panics is recorded as failed without disturbing the
//! others.
//!
//! Plans go through a queue drained by a fixed set of named threads, so
//! `max_concurrency` bounds the threads, not the workers.
//!
//! The cancel token lives as long as the orchestrator. Tripping it stops the
//! run in progress, or the next run if none is active; the flag is cleared
//! once that run's workers have finished.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::SimulationConfig;
use crate::engine::{CancelToken, RunOutcome, SequenceEngine};
use crate::error::{OrchestratorError, WorkerFailure};
use crate::event::{HaltReason, WorkerId};
use crate::perturbation::{PerturbationSource, XorShiftGate};
use crate::predictor::Predictor;
use crate::report::{Finding, Report};
use crate::telemetry::{FanOut, TraceFileSink};

/// Start value and RNG seed assigned to one worker.
///
/// Running the same plans twice with perturbation disabled, or with the same
/// seeds, reproduces every trace exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPlan {
    /// Worker identity.
    pub worker: WorkerId,
    /// Start value. Non-positive values fail that worker only.
    pub start: i64,
    /// Gate RNG seed.
    pub seed: u64,
}

/// What one worker produced.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutcome {
    /// The plan the worker ran.
    pub plan: WorkerPlan,
    /// Finished run, or why there is none.
    pub result: Result<RunOutcome, WorkerFailure>,
}

/// Outcomes of an orchestrated run, keyed by worker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    outcomes: BTreeMap<WorkerId, WorkerOutcome>,
}

impl Aggregate {
    /// Number of workers.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns true if no worker ran.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Outcome of `worker`.
    pub fn get(&self, worker: WorkerId) -> Option<&WorkerOutcome> {
        self.outcomes.get(&worker)
    }

    /// Outcomes in worker order.
    pub fn iter(&self) -> impl Iterator<Item = &WorkerOutcome> + '_ {
        self.outcomes.values()
    }

    /// Finished runs in worker order.
    pub fn completed(&self) -> impl Iterator<Item = &RunOutcome> + '_ {
        self.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// Failed workers in worker order.
    pub fn failed(&self) -> impl Iterator<Item = (WorkerId, &WorkerFailure)> + '_ {
        self.iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.plan.worker, e)))
    }

    /// Number of finished runs that halted with `reason`.
    pub fn halted_with(&self, reason: HaltReason) -> usize {
        self.completed().filter(|o| o.halt() == reason).count()
    }

    /// Steps summed over finished runs.
    pub fn total_steps(&self) -> u64 {
        self.completed().map(RunOutcome::steps).sum()
    }

    /// The plans, in worker order, for [`Orchestrator::replay`].
    pub fn plans(&self) -> Vec<WorkerPlan> {
        self.iter().map(|o| o.plan).collect()
    }

    /// One line per worker: converged passes, other halts warn, failures fail.
    pub fn report(&self) -> Report {
        let mut report = Report::new();
        for outcome in self.iter() {
            let subject = outcome.plan.worker.to_string();
            let finding = match &outcome.result {
                Ok(run) => {
                    let message = format!(
                        "start {} {} after {} steps (final ACC = {})",
                        run.summary.start,
                        run.halt(),
                        run.steps(),
                        run.final_value()
                    );
                    if run.halt() == HaltReason::Converged {
                        Finding::pass(subject, message)
                    } else {
                        Finding::warn(subject, message)
                    }
                }
                Err(err) => Finding::fail(subject, format!("start {}: {err}", outcome.plan.start)),
            };
            report.push(finding);
        }
        report
    }

    fn insert(&mut self, outcome: WorkerOutcome) {
        self.outcomes.insert(outcome.plan.worker, outcome);
    }
}

/// Spawns and supervises workers.
pub struct Orchestrator {
    config: SimulationConfig,
    perturbation: Arc<dyn PerturbationSource>,
    predictor: Option<Arc<dyn Predictor>>,
    telemetry: Arc<FanOut>,
    cancel: CancelToken,
}

impl Orchestrator {
    /// Validates `config` and prepares a run reporting to `telemetry`.
    ///
    /// When `config.trace_dir` is set, a [`TraceFileSink`] for it is appended
    /// to `telemetry`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Config`] if the config is invalid, or
    /// [`OrchestratorError::TraceDir`] if the trace directory cannot be
    /// created.
    pub fn new(config: SimulationConfig, mut telemetry: FanOut) -> Result<Self, OrchestratorError> {
        config.validate()?;
        if let Some(dir) = &config.trace_dir {
            let sink = TraceFileSink::new(dir.clone()).map_err(|source| OrchestratorError::TraceDir {
                path: dir.clone(),
                source,
            })?;
            telemetry.push(Arc::new(sink));
        }
        let p = &config.perturbation;
        let perturbation = Arc::new(XorShiftGate::new(p.gates, p.mask_bits));
        Ok(Self {
            config,
            perturbation,
            predictor: None,
            telemetry: Arc::new(telemetry),
            cancel: CancelToken::new(),
        })
    }

    /// Replaces the default gate table.
    pub fn with_perturbation(mut self, source: Arc<dyn PerturbationSource>) -> Self {
        self.perturbation = source;
        self
    }

    /// Consults `predictor` once per worker.
    pub fn with_predictor(mut self, predictor: Arc<dyn Predictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// The validated configuration.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// The shared telemetry fan-out.
    pub fn telemetry(&self) -> &Arc<FanOut> {
        &self.telemetry
    }

    /// Token that cancels every running worker when tripped.
    ///
    /// A cancellation applies to the run in progress, or to the next run if
    /// none is. The flag is cleared when that run returns, so later runs on
    /// the same orchestrator start uncancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Draws `count` plans with starts uniform in `[start_min, start_max]`.
    ///
    /// Workers are numbered from 1. With a configured seed the plans are
    /// reproducible.
    pub fn plan(&self, count: u32) -> Vec<WorkerPlan> {
        let mut rng = self.master_rng();
        (1..=count)
            .map(|id| {
                let start = rng.gen_range(self.config.start_min..=self.config.start_max);
                WorkerPlan {
                    worker: WorkerId(id),
                    // validate() caps start_max at i64::MAX
                    start: i64::try_from(start).unwrap_or(i64::MAX),
                    seed: rng.gen(),
                }
            })
            .collect()
    }

    /// Builds plans for explicit start values, numbered from 1.
    pub fn plan_starts(&self, starts: &[i64]) -> Vec<WorkerPlan> {
        let mut rng = self.master_rng();
        (1..)
            .zip(starts)
            .map(|(id, &start)| WorkerPlan {
                worker: WorkerId(id),
                start,
                seed: rng.gen(),
            })
            .collect()
    }

    /// Plans `config.workers` workers and runs them.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Spawn`] if no worker thread could start.
    pub fn run_all(&self) -> Result<Aggregate, OrchestratorError> {
        self.run_plans(self.plan(self.config.workers))
    }

    /// Runs previously recorded plans again.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Spawn`] if no worker thread could start.
    pub fn replay(&self, plans: &[WorkerPlan]) -> Result<Aggregate, OrchestratorError> {
        self.run_plans(plans.to_vec())
    }

    /// Runs `plans` on at most `max_concurrency` threads and waits for all.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::DuplicateWorker`] before any work starts
    /// if two plans share a worker, or [`OrchestratorError::Spawn`] if no
    /// worker thread could start. If only some threads start, the started
    /// ones drain the whole queue.
    pub fn run_plans(&self, plans: Vec<WorkerPlan>) -> Result<Aggregate, OrchestratorError> {
        let mut aggregate = Aggregate::default();
        if plans.is_empty() {
            return Ok(aggregate);
        }
        let mut workers = BTreeSet::new();
        if let Some(plan) = plans.iter().find(|p| !workers.insert(p.worker)) {
            return Err(OrchestratorError::DuplicateWorker {
                worker: plan.worker,
            });
        }
        let threads = self.config.thread_count(plans.len());
        info!(workers = plans.len(), threads, "starting workers");

        let (job_tx, job_rx) = unbounded::<WorkerPlan>();
        let (result_tx, result_rx) = unbounded::<WorkerOutcome>();
        for plan in plans {
            // receiver is alive until the end of this function
            let _ = job_tx.send(plan);
        }
        drop(job_tx);

        let spawn_error = thread::scope(|scope| {
            let mut spawned = 0usize;
            let mut last_error = None;
            for index in 0..threads {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                let spawned_thread = thread::Builder::new()
                    .name(format!("vcpu-worker-{index}"))
                    .spawn_scoped(scope, move || {
                        while let Ok(plan) = jobs.recv() {
                            if results.send(self.run_one(plan)).is_err() {
                                break;
                            }
                        }
                    });
                match spawned_thread {
                    Ok(_) => spawned += 1,
                    Err(err) => {
                        warn!(index, error = %err, "failed to spawn worker thread");
                        last_error = Some(err);
                    }
                }
            }
            if spawned == 0 {
                last_error
            } else {
                None
            }
        });
        if self.cancel.reset() {
            info!("run was cancelled; token cleared for the next run");
        }
        if let Some(err) = spawn_error {
            return Err(OrchestratorError::Spawn(err));
        }
        drop(result_tx);

        for outcome in result_rx.try_iter() {
            aggregate.insert(outcome);
        }
        info!(
            completed = aggregate.completed().count(),
            failed = aggregate.failed().count(),
            total_steps = aggregate.total_steps(),
            sink_failures = self.telemetry.failures(),
            "all workers finished"
        );
        Ok(aggregate)
    }

    fn run_one(&self, plan: WorkerPlan) -> WorkerOutcome {
        let mut engine = SequenceEngine::new(plan.worker)
            .with_perturbation(
                Arc::clone(&self.perturbation),
                self.config.perturbation.probability,
            )
            .with_seed(plan.seed)
            .with_clock_delay(self.config.clock_delay())
            .with_step_ceiling(self.config.step_ceiling())
            .with_time_ceiling(self.config.time_ceiling())
            .with_cancel(self.cancel.clone())
            .with_telemetry(Arc::clone(&self.telemetry));
        if let Some(predictor) = &self.predictor {
            engine = engine.with_predictor(Arc::clone(predictor));
        }
        debug!(worker = %plan.worker, start = plan.start, seed = plan.seed, "running plan");

        let result = match panic::catch_unwind(AssertUnwindSafe(|| engine.run(plan.start))) {
            Ok(Ok(run)) => Ok(run),
            Ok(Err(err)) => {
                error!(worker = %plan.worker, start = plan.start, error = %err, "worker failed");
                Err(WorkerFailure::Engine(err))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(worker = %plan.worker, start = plan.start, %message, "worker panicked");
                Err(WorkerFailure::Panicked(message))
            }
        };
        WorkerOutcome { plan, result }
    }

    fn master_rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("perturbation", &self.perturbation)
            .field("predictor", &self.predictor.is_some())
            .field("telemetry", &self.telemetry)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PerturbationConfig;
    use crate::perturbation::FnSource;

    fn quiet_config(workers: u32) -> SimulationConfig {
        SimulationConfig {
            workers,
            clock_delay_ms: 0,
            perturbation: PerturbationConfig::disabled(),
            seed: Some(7),
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn plans_are_seeded_and_in_range() {
        let orch = Orchestrator::new(quiet_config(6), FanOut::new()).unwrap();
        let a = orch.plan(6);
        assert_eq!(a, orch.plan(6));
        assert_eq!(a.len(), 6);
        assert_eq!(a[0].worker, WorkerId(1));
        assert!(a.iter().all(|p| (10..=100).contains(&p.start)));
    }

    #[test]
    fn invalid_start_fails_only_that_worker() {
        let orch = Orchestrator::new(quiet_config(4), FanOut::new()).unwrap();
        let plans = orch.plan_starts(&[27, 0, 6, 97]);
        let agg = orch.run_plans(plans).unwrap();
        assert_eq!(agg.len(), 4);
        assert_eq!(agg.halted_with(HaltReason::Converged), 3);
        let failed: Vec<WorkerId> = agg.failed().map(|(w, _)| w).collect();
        assert_eq!(failed, vec![WorkerId(2)]);
        assert_eq!(agg.total_steps(), 111 + 8 + 118);
        assert_eq!(agg.report().failure_count(), 1);
    }

    #[test]
    fn panicking_gate_is_contained() {
        let orch = Orchestrator::new(
            SimulationConfig {
                perturbation: PerturbationConfig {
                    probability: 1.0,
                    ..PerturbationConfig::default()
                },
                ..quiet_config(2)
            },
            FanOut::new(),
        )
        .unwrap()
        .with_perturbation(Arc::new(FnSource::new(1, |v, _g| {
            if v == 16 {
                panic!("gate blew up")
            }
            Ok(v)
        })));
        let agg = orch.run_plans(orch.plan_starts(&[5, 3])).unwrap();
        let failures: Vec<&WorkerFailure> = agg.failed().map(|(_, e)| e).collect();
        assert_eq!(failures.len(), 2);
        assert!(matches!(failures[0], WorkerFailure::Panicked(m) if m.contains("gate blew up")));
    }

    #[test]
    fn bounded_concurrency_runs_every_plan() {
        let orch = Orchestrator::new(
            SimulationConfig {
                max_concurrency: Some(2),
                ..quiet_config(9)
            },
            FanOut::new(),
        )
        .unwrap();
        let agg = orch.run_all().unwrap();
        assert_eq!(agg.len(), 9);
        assert_eq!(agg.halted_with(HaltReason::Converged), 9);
    }

    #[test]
    fn cancelled_run_reports_cancelled_workers() {
        let orch = Orchestrator::new(quiet_config(3), FanOut::new()).unwrap();
        orch.cancel_token().cancel();
        let agg = orch.run_all().unwrap();
        assert_eq!(agg.halted_with(HaltReason::Cancelled), 3);
        assert_eq!(agg.total_steps(), 0);
    }

    #[test]
    fn cancellation_is_cleared_after_the_run() {
        let orch = Orchestrator::new(quiet_config(3), FanOut::new()).unwrap();
        let token = orch.cancel_token();
        token.cancel();
        assert_eq!(orch.run_all().unwrap().halted_with(HaltReason::Cancelled), 3);
        assert!(!token.is_cancelled());

        let again = orch.run_all().unwrap();
        assert_eq!(again.halted_with(HaltReason::Converged), 3);
        assert_eq!(again.halted_with(HaltReason::Cancelled), 0);
    }

    #[test]
    fn duplicate_worker_is_rejected_before_running() {
        let orch = Orchestrator::new(quiet_config(2), FanOut::new()).unwrap();
        let plans = [
            WorkerPlan { worker: WorkerId(1), start: 27, seed: 1 },
            WorkerPlan { worker: WorkerId(1), start: 6, seed: 2 },
        ];
        let err = orch.replay(&plans).unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateWorker { worker } if worker == WorkerId(1)));
    }

    #[test]
    fn empty_plan_list_is_an_empty_aggregate() {
        let orch = Orchestrator::new(quiet_config(1), FanOut::new()).unwrap();
        assert!(orch.run_plans(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = Orchestrator::new(quiet_config(0), FanOut::new()).unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }
}
