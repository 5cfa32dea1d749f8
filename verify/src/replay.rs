use std::collections::HashSet;

use vcpu_engine::{reduce, EventKind, ExecutionTrace, Finding, HaltReason, Report};

/// Replays `trace` from its start value and grades it.
///
/// The report holds one pass or failure line for the trace, plus one warning
/// line listing perturbed transitions if there were any.
pub fn verify_trace(trace: &ExecutionTrace) -> Report {
    let subject = trace.worker.to_string();
    let mut violations = Vec::new();
    let mut perturbed = Vec::new();

    // start followed by every produced value, in order
    let mut sequence = vec![trace.start];
    let mut produced = HashSet::new();
    let mut current = trace.start;
    let mut steps = 0u64;
    let mut halt = None;

    if trace.start == 0 {
        violations.push("start value is 0".to_string());
    }

    for (index, event) in trace.events.iter().enumerate() {
        if event.worker != trace.worker {
            violations.push(format!(
                "event {index}: belongs to {} in a trace of {}",
                event.worker, trace.worker
            ));
        }
        if halt.is_some() {
            violations.push(format!("event {index}: follows the halt event"));
        }

        match event.kind {
            EventKind::Step => {
                if event.step != steps + 1 {
                    violations.push(format!(
                        "event {index}: step index {} after step {steps}",
                        event.step
                    ));
                }
                steps += 1;
                match reduce(current) {
                    Some(canonical) if canonical == event.value => {}
                    Some(canonical) => perturbed.push(format!(
                        "step {}: {current} -> {} (canonical {canonical})",
                        event.step, event.value
                    )),
                    None => violations.push(format!(
                        "event {index}: {current} has no successor in range"
                    )),
                }
                if event.value == 0 {
                    violations.push(format!("event {index}: produced 0"));
                }
                if !produced.insert(event.value) {
                    violations.push(format!(
                        "event {index}: value {} produced twice without a loop halt",
                        event.value
                    ));
                }
                sequence.push(event.value);
                current = event.value;
            }
            EventKind::CacheHit => {
                if event.step != steps {
                    violations.push(format!(
                        "event {index}: cache hit at step {} after step {steps}",
                        event.step
                    ));
                }
                let recorded = sequence
                    .windows(2)
                    .any(|pair| pair[0] == current && pair[1] == event.value);
                if !recorded {
                    violations.push(format!(
                        "event {index}: cache hit {current} -> {} was never computed",
                        event.value
                    ));
                }
                current = event.value;
            }
            EventKind::Halt => {
                if event.step != steps {
                    violations.push(format!(
                        "event {index}: halt at step {} after step {steps}",
                        event.step
                    ));
                }
                match event.halt {
                    None => violations.push(format!("event {index}: halt without a reason")),
                    Some(HaltReason::Converged) if event.value != 1 => violations.push(format!(
                        "event {index}: converged at {} instead of 1",
                        event.value
                    )),
                    Some(HaltReason::LoopDetected) if !produced.contains(&event.value) => {
                        violations.push(format!(
                            "event {index}: loop on {} which was never produced",
                            event.value
                        ))
                    }
                    Some(HaltReason::TimeoutExceeded | HaltReason::Cancelled)
                        if event.value != current =>
                    {
                        violations.push(format!(
                            "event {index}: halted on {} while holding {current}",
                            event.value
                        ))
                    }
                    Some(_) => {}
                }
                halt = Some(event.halt);
            }
        }
    }

    let reason = match halt {
        Some(reason) => reason,
        None => {
            violations.push("trace has no halt event".to_string());
            None
        }
    };

    let mut report = Report::new();
    if violations.is_empty() {
        let reason = reason.map_or_else(|| "unknown".to_string(), |r| r.to_string());
        report.push(Finding::pass(
            subject.clone(),
            format!("start {}: {reason} after {steps} steps", trace.start),
        ));
    } else {
        report.push(
            Finding::fail(
                subject.clone(),
                format!("{} violations in {} events", violations.len(), trace.len()),
            )
            .with_details(violations),
        );
    }
    if !perturbed.is_empty() {
        report.push(
            Finding::warn(subject, format!("{} perturbed transitions", perturbed.len()))
                .with_details(perturbed),
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcpu_engine::{ExecutionEvent, Severity, WorkerId};

    const W: WorkerId = WorkerId(1);

    fn canonical(start: u64) -> ExecutionTrace {
        let mut trace = ExecutionTrace::new(W, start);
        let (mut n, mut step) = (start, 0);
        while n != 1 {
            n = reduce(n).unwrap();
            step += 1;
            trace.push(ExecutionEvent::step(W, step, n));
        }
        trace.push(ExecutionEvent::halt(W, step, 1, HaltReason::Converged));
        trace
    }

    #[test]
    fn canonical_trace_passes() {
        let report = verify_trace(&canonical(27));
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.worst(), Severity::Pass);
        assert!(report.findings[0].message.contains("111 steps"));
    }

    #[test]
    fn perturbed_step_is_a_warning() {
        let mut trace = ExecutionTrace::new(W, 6);
        trace.push(ExecutionEvent::step(W, 1, 3));
        trace.push(ExecutionEvent::step(W, 2, 4)); // canonical 10
        trace.push(ExecutionEvent::step(W, 3, 2));
        trace.push(ExecutionEvent::step(W, 4, 1));
        trace.push(ExecutionEvent::halt(W, 4, 1, HaltReason::Converged));
        let report = verify_trace(&trace);
        assert!(report.all_passed());
        assert_eq!(report.worst(), Severity::Warning);
    }

    #[test]
    fn missing_halt_fails() {
        let mut trace = canonical(6);
        trace.events.pop();
        assert_eq!(verify_trace(&trace).failure_count(), 1);
    }

    #[test]
    fn converged_must_end_at_one() {
        let mut trace = ExecutionTrace::new(W, 6);
        trace.push(ExecutionEvent::step(W, 1, 3));
        trace.push(ExecutionEvent::halt(W, 1, 3, HaltReason::Converged));
        assert!(!verify_trace(&trace).all_passed());
    }

    #[test]
    fn repeated_value_fails() {
        let mut trace = ExecutionTrace::new(W, 6);
        trace.push(ExecutionEvent::step(W, 1, 3));
        trace.push(ExecutionEvent::step(W, 2, 3));
        trace.push(ExecutionEvent::halt(W, 2, 3, HaltReason::LoopDetected));
        let report = verify_trace(&trace);
        assert_eq!(report.failure_count(), 1);
        assert!(report.findings[0].details.iter().any(|d| d.contains("produced twice")));
    }

    #[test]
    fn loop_halt_on_produced_value_passes() {
        let mut trace = ExecutionTrace::new(W, 6);
        trace.push(ExecutionEvent::step(W, 1, 3));
        trace.push(ExecutionEvent::halt(W, 1, 3, HaltReason::LoopDetected));
        assert!(verify_trace(&trace).all_passed());
    }

    #[test]
    fn unknown_cache_hit_fails() {
        let mut trace = ExecutionTrace::new(W, 6);
        trace.push(ExecutionEvent::step(W, 1, 3));
        trace.push(ExecutionEvent::cache_hit(W, 1, 7));
        trace.push(ExecutionEvent::halt(W, 1, 7, HaltReason::Cancelled));
        assert!(!verify_trace(&trace).all_passed());
    }

    #[test]
    fn foreign_worker_fails() {
        let mut trace = canonical(4);
        trace.events[0].worker = WorkerId(9);
        assert!(!verify_trace(&trace).all_passed());
    }

    #[test]
    fn events_after_halt_fail() {
        let mut trace = canonical(4);
        trace.push(ExecutionEvent::step(W, 3, 4));
        assert!(!verify_trace(&trace).all_passed());
    }
}
