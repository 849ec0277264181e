//! Progress protocol events and the single-consumer stream.
//!
//! One unbounded FIFO channel carries every event a request produces. Two
//! producers write into it concurrently: the stage-sequence runner and a
//! heartbeat ticker that fires every 20 seconds until cancelled. Exactly
//! one consumer reads until it observes the first terminal event
//! (`complete` or `error`); observing it cancels the heartbeat task and
//! awaits its termination, so nothing keeps emitting after the consumer is
//! done. Non-heartbeat events preserve publication order relative to each
//! other; heartbeats may interleave anywhere before the terminal event.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codemap::FileMap;

/// Interval between heartbeat events on an open stream.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// One unit of progress reported to the stream consumer. Serialized as a
/// JSON object tagged by `status`, one object per line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressEvent {
    ReadingPaper { message: String },
    GeneratingPlan { message: String },
    ImplementingCode { message: String },
    AnalyzingCode { message: String },
    ImprovingCode { message: String },
    WritingFiles { message: String },
    Heartbeat {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Complete {
        message: String,
        project_id: String,
        files: FileMap,
    },
    Error { message: String },
}

impl ProgressEvent {
    /// Terminal events end the stream: the consumer stops after the first.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. } | ProgressEvent::Error { .. }
        )
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, ProgressEvent::Heartbeat { .. })
    }

    /// The human-readable message carried by any event variant.
    pub fn message(&self) -> &str {
        match self {
            ProgressEvent::ReadingPaper { message }
            | ProgressEvent::GeneratingPlan { message }
            | ProgressEvent::ImplementingCode { message }
            | ProgressEvent::AnalyzingCode { message }
            | ProgressEvent::ImprovingCode { message }
            | ProgressEvent::WritingFiles { message }
            | ProgressEvent::Heartbeat { message, .. }
            | ProgressEvent::Complete { message, .. }
            | ProgressEvent::Error { message } => message,
        }
    }

    /// Serialize as one line of the newline-delimited JSON wire protocol.
    pub fn to_json_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("{}\n", json),
            Err(e) => format!(
                "{{\"status\":\"error\",\"message\":\"failed to serialize event: {}\"}}\n",
                e
            ),
        }
    }
}

/// Producer half of a progress stream. Cheap to clone; sends never block
/// and are silently dropped once the consumer has gone away.
#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSender {
    pub fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Consumer half of a progress stream. Owns the heartbeat task.
pub struct ProgressReceiver {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    heartbeat: Option<JoinHandle<()>>,
    done: bool,
}

/// Factory for the paired producer/consumer handles.
pub struct ProgressStream;

impl ProgressStream {
    /// Open a stream with the production heartbeat cadence.
    pub fn open() -> (ProgressSender, ProgressReceiver) {
        Self::with_heartbeat(HEARTBEAT_INTERVAL)
    }

    /// Open a stream with a custom heartbeat period (tests drive this in
    /// milliseconds).
    pub fn with_heartbeat(period: Duration) -> (ProgressSender, ProgressReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();

        let heartbeat_tx = tx.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // interval fires immediately on the first tick; skip it so the
            // first heartbeat lands one full period in.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let event = ProgressEvent::Heartbeat {
                    message: "Still processing...".to_string(),
                    timestamp: Utc::now(),
                };
                if heartbeat_tx.send(event).is_err() {
                    break;
                }
            }
        });

        (
            ProgressSender { tx },
            ProgressReceiver {
                rx,
                heartbeat: Some(heartbeat),
                done: false,
            },
        )
    }
}

impl ProgressReceiver {
    /// The next event, in publication order. Returns `None` once a terminal
    /// event has been observed (or every producer is gone). The first
    /// terminal event cancels the heartbeat task and awaits its termination
    /// before being handed to the caller.
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        if self.done {
            return None;
        }
        match self.rx.recv().await {
            Some(event) => {
                if event.is_terminal() {
                    self.done = true;
                    self.stop_heartbeat().await;
                }
                Some(event)
            }
            None => {
                self.done = true;
                self.stop_heartbeat().await;
                None
            }
        }
    }

    async fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressReceiver {
    fn drop(&mut self) {
        // Consumer disconnect without a terminal event still cancels the
        // heartbeat; awaiting it is not possible in Drop, abort is.
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}
