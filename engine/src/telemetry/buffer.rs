use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;

use super::{render_event, render_notice, render_summary, TelemetrySink};
use crate::error::SinkError;
use crate::event::{ExecutionEvent, ExecutionTrace, Notice, RunSummary, WorkerId};

/// One rendered line held by a [`BufferSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferedLine {
    /// Monotonic position; never reused, survives eviction and `clear`.
    pub cursor: u64,
    /// Worker that produced the line.
    pub worker: WorkerId,
    /// Rendered message.
    pub message: String,
}

struct BufferState {
    lines: VecDeque<BufferedLine>,
    next_cursor: u64,
}

/// Bounded in-memory log that a UI polls.
///
/// Appends from all workers go through one mutex, so concurrent writers are
/// serialized. When full the oldest line is evicted.
pub struct BufferSink {
    capacity: usize,
    state: Mutex<BufferState>,
}

impl BufferSink {
    /// Default number of retained lines.
    pub const DEFAULT_CAPACITY: usize = 4096;

    /// Creates a buffer holding at most `capacity` lines (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(BufferState {
                lines: VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY)),
                next_cursor: 0,
            }),
        }
    }

    /// Every retained line, oldest first.
    pub fn snapshot(&self) -> Vec<BufferedLine> {
        self.state.lock().lines.iter().cloned().collect()
    }

    /// Retained lines with `cursor >= from`, oldest first.
    pub fn since(&self, from: u64) -> Vec<BufferedLine> {
        self.state
            .lock()
            .lines
            .iter()
            .filter(|l| l.cursor >= from)
            .cloned()
            .collect()
    }

    /// Cursor the next appended line will receive.
    pub fn next_cursor(&self) -> u64 {
        self.state.lock().next_cursor
    }

    /// Number of retained lines.
    pub fn len(&self) -> usize {
        self.state.lock().lines.len()
    }

    /// Returns true when nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.state.lock().lines.is_empty()
    }

    /// Drops every retained line. Cursors keep increasing.
    pub fn clear(&self) {
        self.state.lock().lines.clear();
    }

    fn append(&self, worker: WorkerId, message: String) {
        let mut state = self.state.lock();
        if state.lines.len() == self.capacity {
            state.lines.pop_front();
        }
        let cursor = state.next_cursor;
        state.next_cursor += 1;
        state.lines.push_back(BufferedLine {
            cursor,
            worker,
            message,
        });
    }
}

impl Default for BufferSink {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl TelemetrySink for BufferSink {
    fn name(&self) -> &str {
        "buffer"
    }

    fn emit(&self, event: &ExecutionEvent) -> Result<(), SinkError> {
        self.append(event.worker, render_event(event));
        Ok(())
    }

    fn notice(&self, worker: WorkerId, notice: &Notice) -> Result<(), SinkError> {
        self.append(worker, render_notice(worker, notice));
        Ok(())
    }

    fn finalize(&self, summary: &RunSummary, _trace: &ExecutionTrace) -> Result<(), SinkError> {
        self.append(summary.worker, render_summary(summary));
        Ok(())
    }
}
