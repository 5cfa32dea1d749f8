//! Verifies traces written by real orchestrated runs.

use std::path::PathBuf;

use proptest::prelude::*;
use vcpu_engine::{
    EventKind, ExecutionTrace, FanOut, Orchestrator, PerturbationConfig, SequenceEngine,
    Severity, SimulationConfig, WorkerId, XorShiftGate,
};
use vcpu_verify::{discover_traces, load_trace, verify_paths, verify_trace};

fn run_into(dir: &std::path::Path, probability: f64) -> usize {
    let config = SimulationConfig {
        workers: 4,
        clock_delay_ms: 0,
        perturbation: PerturbationConfig {
            probability,
            ..PerturbationConfig::default()
        },
        seed: Some(11),
        trace_dir: Some(dir.to_path_buf()),
        ..SimulationConfig::default()
    };
    let orch = Orchestrator::new(config, FanOut::new()).unwrap();
    orch.run_all().unwrap().completed().count()
}

// =============================================================================
// Persisted traces
// =============================================================================

#[test]
fn unperturbed_run_verifies_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(run_into(dir.path(), 0.0), 4);

    let files = discover_traces(dir.path()).unwrap();
    assert_eq!(files.len(), 4);

    let report = verify_paths(&[dir.path().to_path_buf()]);
    assert_eq!(report.count(Severity::Pass), 4);
    assert_eq!(report.worst(), Severity::Pass);
}

#[test]
fn perturbed_run_never_fails_verification() {
    let dir = tempfile::tempdir().unwrap();
    run_into(dir.path(), 1.0);
    let report = verify_paths(&[dir.path().to_path_buf()]);
    assert!(report.all_passed(), "{report}");
    assert_eq!(report.worst(), Severity::Warning);
}

#[test]
fn tampered_trace_fails() {
    let dir = tempfile::tempdir().unwrap();
    run_into(dir.path(), 0.0);
    let path = discover_traces(dir.path()).unwrap().remove(0);

    let mut trace = load_trace(&path).unwrap();
    let first_step = trace
        .events
        .iter_mut()
        .find(|e| e.kind == EventKind::Step)
        .unwrap();
    first_step.step += 5;
    std::fs::write(&path, serde_json::to_vec_pretty(&trace).unwrap()).unwrap();

    let report = verify_paths(&[path]);
    assert_eq!(report.failure_count(), 1);
}

#[test]
fn unreadable_inputs_are_failures() {
    let dir = tempfile::tempdir().unwrap();
    let garbage = dir.path().join("cpu_1_execution.json");
    std::fs::write(&garbage, "not json").unwrap();

    let report = verify_paths(&[garbage, PathBuf::from("/definitely/not/here.json")]);
    assert_eq!(report.failure_count(), 2);
}

#[test]
fn empty_directory_warns() {
    let dir = tempfile::tempdir().unwrap();
    let report = verify_paths(&[dir.path().to_path_buf()]);
    assert!(report.all_passed());
    assert_eq!(report.worst(), Severity::Warning);
}

// =============================================================================
// Engine traces always replay
// =============================================================================

fn engine_trace(start: u64, probability: f64, seed: u64) -> ExecutionTrace {
    SequenceEngine::new(WorkerId(1))
        .with_perturbation(std::sync::Arc::new(XorShiftGate::default()), probability)
        .with_seed(seed)
        .run(start as i64)
        .unwrap()
        .trace
}

proptest! {
    #[test]
    fn prop_engine_traces_replay(start in 1u64..=50_000, p in 0.0f64..=1.0, seed: u64) {
        let report = verify_trace(&engine_trace(start, p, seed));
        prop_assert!(report.all_passed(), "{}", report);
    }

    #[test]
    fn prop_unperturbed_traces_are_clean(start in 1u64..=50_000) {
        let report = verify_trace(&engine_trace(start, 0.0, 0));
        prop_assert_eq!(report.worst(), Severity::Pass);
    }
}
