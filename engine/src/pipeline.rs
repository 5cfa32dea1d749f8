//! Micro-operation pipeline for one reduction step.
//!
//! A reduction step is decomposed into micro-ops and drained in order
//! against a scratch accumulator:
//!
//! ```text
//! even n:  [Div(2)]
//! odd  n:  [Mul(3), Add(1)]
//! ```
//!
//! The pipeline lives for exactly one iteration. It is built, drained and
//! dropped inside [`crate::SequenceEngine`]'s loop; nothing survives into the
//! next step.
//!
//! ```
//! use vcpu_engine::pipeline::{MicroOp, Pipeline};
//!
//! let mut pipeline = Pipeline::for_value(7);
//! assert_eq!(pipeline.ops(), &[MicroOp::Mul(3), MicroOp::Add(1)]);
//! assert_eq!(pipeline.drain(7, 0), Ok(22));
//! assert!(pipeline.is_empty());
//! ```

use crate::error::EngineError;

/// A single arithmetic micro-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MicroOp {
    /// `acc = acc / k` (exact for the reduction rule's even inputs).
    Div(u64),
    /// `acc = acc * k`
    Mul(u64),
    /// `acc = acc + k`
    Add(u64),
}

impl MicroOp {
    /// Applies the op to `acc`, returning `None` on overflow or division by zero.
    #[inline]
    pub fn apply(self, acc: u64) -> Option<u64> {
        match self {
            MicroOp::Div(k) => acc.checked_div(k),
            MicroOp::Mul(k) => acc.checked_mul(k),
            MicroOp::Add(k) => acc.checked_add(k),
        }
    }

    /// Short mnemonic used in debug logs.
    pub fn mnemonic(self) -> &'static str {
        match self {
            MicroOp::Div(_) => "DIV",
            MicroOp::Mul(_) => "MUL",
            MicroOp::Add(_) => "ADD",
        }
    }
}

/// Ordered queue of micro-ops realizing one reduction step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    ops: Vec<MicroOp>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self {
            ops: Vec::with_capacity(2),
        }
    }

    /// Builds the pipeline for one reduction of `n`.
    pub fn for_value(n: u64) -> Self {
        let mut pipeline = Self::new();
        if n % 2 == 0 {
            pipeline.push(MicroOp::Div(2));
        } else {
            pipeline.push(MicroOp::Mul(3));
            pipeline.push(MicroOp::Add(1));
        }
        pipeline
    }

    /// Queues an op at the back.
    #[inline]
    pub fn push(&mut self, op: MicroOp) {
        self.ops.push(op);
    }

    /// Queued ops, front first.
    pub fn ops(&self) -> &[MicroOp] {
        &self.ops
    }

    /// Number of queued ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Drains every op in order starting from `input`.
    ///
    /// The queue is empty afterwards even when an op fails.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Overflow`] if an op leaves the `u64` domain.
    pub fn drain(&mut self, input: u64, step: u64) -> Result<u64, EngineError> {
        let mut acc = input;
        for op in self.ops.drain(..) {
            acc = op
                .apply(acc)
                .ok_or(EngineError::Overflow { value: input, step })?;
        }
        Ok(acc)
    }
}

/// One canonical reduction of `n`, without going through a pipeline.
///
/// Returns `None` when `3n + 1` overflows.
#[inline]
pub fn reduce(n: u64) -> Option<u64> {
    if n % 2 == 0 {
        Some(n / 2)
    } else {
        n.checked_mul(3)?.checked_add(1)
    }
}

/// Reference step count for `n` under the canonical rule.
///
/// Returns `None` for `n = 0` or if an intermediate value overflows.
pub fn reference_steps(n: u64) -> Option<u64> {
    if n == 0 {
        return None;
    }
    let mut n = n;
    let mut steps = 0u64;
    while n != 1 {
        n = reduce(n)?;
        steps += 1;
    }
    Some(steps)
}
