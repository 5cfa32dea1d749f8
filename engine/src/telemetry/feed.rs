use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use super::TelemetrySink;
use crate::error::SinkError;
use crate::event::{ExecutionEvent, ExecutionTrace, Notice, RunSummary, WorkerId};

/// One message pushed to a live feed consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// An execution event.
    Event(ExecutionEvent),
    /// An out-of-band notice.
    Notice {
        /// Worker the notice concerns.
        worker: WorkerId,
        /// The notice.
        notice: Notice,
    },
    /// A worker finished.
    Finished(RunSummary),
}

impl FeedMessage {
    /// Worker the message concerns.
    pub fn worker(&self) -> WorkerId {
        match self {
            FeedMessage::Event(e) => e.worker,
            FeedMessage::Notice { worker, .. } => *worker,
            FeedMessage::Finished(s) => s.worker,
        }
    }

    /// Serializes as one JSON line (no trailing newline), the wire format of
    /// a remote feed client.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Serialize`] if serialization fails.
    pub fn to_json_line(&self) -> Result<String, SinkError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Pushes telemetry into a channel for a live consumer.
///
/// The channel is the queue that serializes concurrent workers. A bounded
/// feed never blocks the engine: when the consumer lags, the message is
/// dropped and the call fails with [`SinkError::Rejected`].
#[derive(Debug, Clone)]
pub struct FeedSink {
    tx: Sender<FeedMessage>,
}

impl FeedSink {
    /// Unbounded feed.
    pub fn unbounded() -> (Self, Receiver<FeedMessage>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    /// Feed holding at most `capacity` undelivered messages.
    pub fn bounded(capacity: usize) -> (Self, Receiver<FeedMessage>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }

    fn push(&self, message: FeedMessage) -> Result<(), SinkError> {
        self.tx.try_send(message).map_err(|err| match err {
            TrySendError::Full(_) => SinkError::Rejected("feed full, message dropped".into()),
            TrySendError::Disconnected(_) => SinkError::Disconnected,
        })
    }
}

impl TelemetrySink for FeedSink {
    fn name(&self) -> &str {
        "feed"
    }

    fn emit(&self, event: &ExecutionEvent) -> Result<(), SinkError> {
        self.push(FeedMessage::Event(*event))
    }

    fn notice(&self, worker: WorkerId, notice: &Notice) -> Result<(), SinkError> {
        self.push(FeedMessage::Notice {
            worker,
            notice: notice.clone(),
        })
    }

    fn finalize(&self, summary: &RunSummary, _trace: &ExecutionTrace) -> Result<(), SinkError> {
        self.push(FeedMessage::Finished(summary.clone()))
    }
}
