//! The per-worker sequence state machine.
//!
//! # Iteration
//!
//! ```text
//! top:    n == 1            -> halt Converged
//!         cancelled         -> halt Cancelled
//!         ceiling reached   -> halt TimeoutExceeded
//!         sleep one clock cycle
//! cache:  n in Cache        -> n' = Cache[n], emit CacheHit
//!                              n' in Memory -> halt LoopDetected
//!                              else n = n', next iteration
//! step:   m  = drain(Pipeline::for_value(n))
//!         m' = gate(m) with probability p, else m
//!         m' in Memory      -> halt LoopDetected
//!         Memory[m'] = step, Cache[n] = m', ACC = m', emit Step
//! ```
//!
//! A cache hit goes through the same memory check as a computed step, so a
//! resolved value is treated exactly like the value the pipeline would have
//! produced. Since every cached successor is also in memory, a cache hit can
//! only happen when a gate sends the sequence back to its start value, and it
//! always ends the run one event later.
//!
//! # Start value
//!
//! Memory holds produced values only; the start value is not recorded. A
//! gate that maps back to the start therefore emits one `Step` carrying the
//! start value before the loop is caught: the next iteration finds the start
//! in the cache, its cached successor is in memory, and the run halts with
//! `LoopDetected`. The start is never reduced a second time. Recording the
//! start in memory instead would halt one event earlier but leave the cache
//! unreachable within a run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::event::{ExecutionEvent, ExecutionTrace, HaltReason, Notice, RunSummary, WorkerId};
use crate::perturbation::{draw_gate, PerturbationSource, XorShiftGate};
use crate::pipeline::Pipeline;
use crate::predictor::Predictor;
use crate::state::{Cache, Memory, Register};
use crate::telemetry::FanOut;

/// Cooperative cancellation flag shared between a controller and workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an untripped token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Workers stop at the top of their next iteration.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clears a pending cancellation. Returns true if one was pending.
    pub fn reset(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Result of one engine run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Final figures.
    pub summary: RunSummary,
    /// Complete ordered trace, ending with the `Halt` event.
    pub trace: ExecutionTrace,
}

impl RunOutcome {
    /// Completed reduction steps.
    pub fn steps(&self) -> u64 {
        self.summary.steps
    }

    /// Why the run stopped.
    pub fn halt(&self) -> HaltReason {
        self.summary.halt
    }

    /// Register contents at halt.
    pub fn final_value(&self) -> u64 {
        self.summary.final_value
    }
}

/// One worker's reduction engine.
///
/// The engine itself is immutable configuration; every [`run`](Self::run)
/// builds fresh register, memory, cache and RNG state and drops them at halt.
pub struct SequenceEngine {
    worker: WorkerId,
    perturbation: Arc<dyn PerturbationSource>,
    probability: f64,
    seed: Option<u64>,
    clock_delay: Duration,
    max_steps: Option<u64>,
    timeout: Option<Duration>,
    cancel: CancelToken,
    predictor: Option<Arc<dyn Predictor>>,
    telemetry: Arc<FanOut>,
}

impl SequenceEngine {
    /// Creates an unperturbed, undelayed engine with no ceilings and no sinks.
    pub fn new(worker: WorkerId) -> Self {
        Self {
            worker,
            perturbation: Arc::new(XorShiftGate::default()),
            probability: 0.0,
            seed: None,
            clock_delay: Duration::ZERO,
            max_steps: None,
            timeout: None,
            cancel: CancelToken::new(),
            predictor: None,
            telemetry: Arc::new(FanOut::new()),
        }
    }

    /// Uses `source` for gates fired with probability `probability`.
    pub fn with_perturbation(mut self, source: Arc<dyn PerturbationSource>, probability: f64) -> Self {
        self.perturbation = source;
        self.probability = probability;
        self
    }

    /// Seeds the gate RNG. Every run restarts the stream from this seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sleeps `delay` at the top of every iteration.
    pub fn with_clock_delay(mut self, delay: Duration) -> Self {
        self.clock_delay = delay;
        self
    }

    /// Halts with `TimeoutExceeded` after `max_steps` steps.
    pub fn with_step_ceiling(mut self, max_steps: Option<u64>) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Halts with `TimeoutExceeded` once `timeout` of wall time has passed.
    pub fn with_time_ceiling(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Observes `cancel` at the top of every iteration.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Consults `predictor` once before each run.
    pub fn with_predictor(mut self, predictor: Arc<dyn Predictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// Reports to `telemetry`.
    pub fn with_telemetry(mut self, telemetry: Arc<FanOut>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// This engine's worker.
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Runs the reduction from `start` until a halt condition.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidInput`] if `start < 1`; nothing is emitted.
    /// - [`EngineError::Overflow`] if `3n + 1` leaves the `u64` domain.
    /// - [`EngineError::CacheConflict`] if the write-once cache invariant
    ///   would be broken.
    pub fn run(&self, start: i64) -> Result<RunOutcome, EngineError> {
        let start = u64::try_from(start)
            .ok()
            .filter(|&s| s > 0)
            .ok_or(EngineError::InvalidInput { start })?;

        let worker = self.worker;
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut register = Register::new(start);
        let mut memory = Memory::new();
        let mut cache = Cache::new();
        let mut trace = ExecutionTrace::new(worker, start);

        self.telemetry
            .broadcast_notice(worker, &Notice::Loaded { start });
        let predicted_steps = self.consult_predictor(start);
        debug!(%worker, start, probability = self.probability, "worker started");

        let began = Instant::now();
        let gates = self.perturbation.gates();
        let mut steps = 0u64;
        let mut perturbations = 0u64;
        let mut degraded = 0u64;
        let mut n = start;

        let (halt, halt_value) = loop {
            if n == 1 {
                break (HaltReason::Converged, n);
            }
            if self.cancel.is_cancelled() {
                break (HaltReason::Cancelled, n);
            }
            if self.max_steps.is_some_and(|max| steps >= max)
                || self.timeout.is_some_and(|t| began.elapsed() >= t)
            {
                break (HaltReason::TimeoutExceeded, n);
            }
            if !self.clock_delay.is_zero() {
                thread::sleep(self.clock_delay);
            }

            if let Some(next) = cache.lookup(n) {
                self.record(&mut trace, ExecutionEvent::cache_hit(worker, steps, next));
                if memory.contains(next) {
                    break (HaltReason::LoopDetected, next);
                }
                n = next;
                continue;
            }

            let reduced = Pipeline::for_value(n).drain(n, steps)?;
            let value = match draw_gate(&mut rng, self.probability, gates) {
                None => reduced,
                Some(gate) => match self.perturbation.apply(reduced, gate) {
                    Ok(out) => {
                        if out != reduced {
                            perturbations += 1;
                            self.telemetry.broadcast_notice(
                                worker,
                                &Notice::Perturbed {
                                    gate,
                                    before: reduced,
                                    after: out,
                                },
                            );
                        }
                        out
                    }
                    Err(err) => {
                        degraded += 1;
                        warn!(%worker, gate, value = reduced, error = %err, "gate degraded to identity");
                        self.telemetry.broadcast_notice(
                            worker,
                            &Notice::Degraded {
                                gate,
                                value: reduced,
                                reason: err.to_string(),
                            },
                        );
                        reduced
                    }
                },
            };

            if memory.contains(value) {
                break (HaltReason::LoopDetected, value);
            }
            memory.record(value, steps);
            cache.insert(n, value)?;
            register.load(value);
            steps += 1;
            self.record(&mut trace, ExecutionEvent::step(worker, steps, value));
            n = value;
        };

        let elapsed = began.elapsed();
        self.record(
            &mut trace,
            ExecutionEvent::halt(worker, steps, halt_value, halt),
        );

        let summary = RunSummary {
            worker,
            start,
            steps,
            final_value: register.get(),
            halt,
            elapsed,
            cache_hits: cache.hits(),
            perturbations,
            degraded,
            predicted_steps,
        };
        self.telemetry.broadcast_finish(&summary, &trace);
        info!(%worker, start, steps, %halt, final_value = summary.final_value, "worker halted");

        Ok(RunOutcome { summary, trace })
    }

    fn record(&self, trace: &mut ExecutionTrace, event: ExecutionEvent) {
        trace.push(event);
        self.telemetry.broadcast_event(&event);
    }

    fn consult_predictor(&self, start: u64) -> Option<f64> {
        let predictor = self.predictor.as_ref()?;
        match predictor.predict(start) {
            Ok(estimate) => {
                self.telemetry
                    .broadcast_notice(self.worker, &Notice::Prediction { estimate });
                Some(estimate)
            }
            Err(err) => {
                warn!(worker = %self.worker, error = %err, "predictor unavailable");
                self.telemetry.broadcast_notice(
                    self.worker,
                    &Notice::PredictorUnavailable {
                        reason: err.to_string(),
                    },
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for SequenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceEngine")
            .field("worker", &self.worker)
            .field("probability", &self.probability)
            .field("seed", &self.seed)
            .field("clock_delay", &self.clock_delay)
            .field("max_steps", &self.max_steps)
            .field("timeout", &self.timeout)
            .field("telemetry", &self.telemetry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PerturbationError;
    use crate::event::EventKind;
    use crate::perturbation::FnSource;
    use crate::telemetry::FeedSink;

    fn engine() -> SequenceEngine {
        SequenceEngine::new(WorkerId(1))
    }

    #[test]
    fn six_converges_in_eight_steps() {
        let out = engine().run(6).unwrap();
        assert_eq!(out.halt(), HaltReason::Converged);
        assert_eq!(out.steps(), 8);
        assert_eq!(out.trace.sequence(), vec![6, 3, 10, 5, 16, 8, 4, 2, 1]);
        assert_eq!(out.final_value(), 1);
    }

    #[test]
    fn twenty_seven_converges_in_111_steps() {
        let out = engine().run(27).unwrap();
        assert_eq!(out.halt(), HaltReason::Converged);
        assert_eq!(out.steps(), 111);
        assert_eq!(out.final_value(), 1);
    }

    #[test]
    fn one_is_already_converged() {
        let out = engine().run(1).unwrap();
        assert_eq!(out.steps(), 0);
        assert_eq!(out.trace.len(), 1);
        assert_eq!(out.trace.events[0].kind, EventKind::Halt);
    }

    #[test]
    fn non_positive_start_is_rejected_before_any_telemetry() {
        let (sink, rx) = FeedSink::unbounded();
        let e = engine().with_telemetry(Arc::new(FanOut::new().with(sink)));
        assert_eq!(e.run(0).unwrap_err(), EngineError::InvalidInput { start: 0 });
        assert_eq!(e.run(-4).unwrap_err(), EngineError::InvalidInput { start: -4 });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn gate_back_into_memory_detects_loop() {
        // every gate maps its input to 3, which step 1 already produced
        let back_to_three = Arc::new(FnSource::new(1, |_v, _g| Ok(3)));
        let out = engine()
            .with_perturbation(back_to_three, 1.0)
            .with_seed(1)
            .run(6)
            .unwrap();
        assert_eq!(out.halt(), HaltReason::LoopDetected);
        assert_eq!(out.steps(), 1);
        let last = out.trace.events.last().copied().unwrap();
        assert_eq!(last.value, 3);
        assert_eq!(last.halt, Some(HaltReason::LoopDetected));
    }

    #[test]
    fn return_to_start_goes_through_cache_and_halts() {
        // 6 -> 3, then the gate sends 10 back to 6, whose successor is cached
        let back_to_start = Arc::new(FnSource::new(1, |v, _g| Ok(if v == 10 { 6 } else { v })));
        let out = engine()
            .with_perturbation(back_to_start, 1.0)
            .with_seed(9)
            .run(6)
            .unwrap();
        let kinds: Vec<EventKind> = out.trace.events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Step, EventKind::Step, EventKind::CacheHit, EventKind::Halt]
        );
        assert_eq!(out.halt(), HaltReason::LoopDetected);
        assert_eq!(out.summary.cache_hits, 1);
        // the start is not in memory, so it is emitted once as a produced value
        assert_eq!(out.trace.sequence(), vec![6, 3, 6]);
        assert_eq!(out.steps(), 2);
    }

    #[test]
    fn reset_clears_a_pending_cancel() {
        let token = CancelToken::new();
        assert!(!token.reset());
        token.cancel();
        assert!(token.reset());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn failing_gate_degrades_to_identity() {
        let broken = Arc::new(FnSource::new(4, |value, gate| {
            Err(PerturbationError::Degenerate { value, gate })
        }));
        let out = engine().with_perturbation(broken, 1.0).with_seed(3).run(27).unwrap();
        assert_eq!(out.halt(), HaltReason::Converged);
        assert_eq!(out.steps(), 111);
        assert_eq!(out.summary.degraded, 111);
        assert_eq!(out.summary.perturbations, 0);
    }

    #[test]
    fn step_ceiling_halts_with_timeout() {
        let out = engine().with_step_ceiling(Some(10)).run(27).unwrap();
        assert_eq!(out.halt(), HaltReason::TimeoutExceeded);
        assert_eq!(out.steps(), 10);
    }

    #[test]
    fn ceiling_equal_to_length_still_converges() {
        let out = engine().with_step_ceiling(Some(8)).run(6).unwrap();
        assert_eq!(out.halt(), HaltReason::Converged);
    }

    #[test]
    fn cancelled_token_halts_with_partial_trace() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let out = engine().with_cancel(cancel).run(27).unwrap();
        assert_eq!(out.halt(), HaltReason::Cancelled);
        assert_eq!(out.steps(), 0);
        assert_eq!(out.final_value(), 27);
        assert_eq!(out.trace.len(), 1);
    }

    #[test]
    fn wall_clock_ceiling_halts_with_timeout() {
        let out = engine()
            .with_clock_delay(Duration::from_millis(5))
            .with_time_ceiling(Some(Duration::from_millis(20)))
            .run(27)
            .unwrap();
        assert_eq!(out.halt(), HaltReason::TimeoutExceeded);
        assert!(out.steps() < 111);
    }

    #[test]
    fn overflow_is_an_error() {
        // i64::MAX is odd and 3n + 1 exceeds u64::MAX
        let err = engine().run(i64::MAX).unwrap_err();
        assert!(matches!(err, EngineError::Overflow { step: 0, .. }));
    }

    #[test]
    fn predictor_failure_only_touches_telemetry() {
        let (sink, rx) = FeedSink::unbounded();
        let out = engine()
            .with_predictor(Arc::new(crate::predictor::UnavailablePredictor))
            .with_telemetry(Arc::new(FanOut::new().with(sink)))
            .run(6)
            .unwrap();
        assert_eq!(out.steps(), 8);
        assert_eq!(out.summary.predicted_steps, None);
        let unavailable = rx.try_iter().any(|m| {
            matches!(
                m,
                crate::telemetry::FeedMessage::Notice {
                    notice: Notice::PredictorUnavailable { .. },
                    ..
                }
            )
        });
        assert!(unavailable);
    }

    #[test]
    fn seeded_runs_are_identical() {
        let e = engine()
            .with_perturbation(Arc::new(XorShiftGate::default()), 0.2)
            .with_seed(42);
        let a = e.run(97).unwrap();
        let b = e.run(97).unwrap();
        assert_eq!(a.trace, b.trace);
    }
}
