//! Job event sink and broadcaster for real-time queue observation.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::worker::job::JobStatus;

/// Terminal result of a run episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn succeeded(output_dir: PathBuf) -> Self {
        Self {
            success: true,
            output_dir: Some(output_dir),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output_dir: None,
            error: Some(error.into()),
        }
    }
}

/// Receives queue notifications. Implementations must not block; the
/// queue calls them inline while supervising a job.
///
/// No queue lock is held during a call, so a sink may read the queue
/// (`get_job`, `get_queue`) or enqueue more work from inside it. A job's
/// `queued` event always precedes its `running` event.
pub trait EventSink: Send + Sync {
    /// Status or progress changed. `progress` is `None` when only the
    /// status moved.
    fn status(&self, job_id: &str, status: JobStatus, progress: Option<u8>);

    /// One raw output line from the external process.
    fn progress(&self, job_id: &str, line: &str);

    /// Emitted exactly once per run episode, after the terminal status.
    fn completed(&self, job_id: &str, outcome: &JobOutcome);
}

/// Event as delivered to broadcast subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QueueEvent {
    #[serde(rename_all = "camelCase")]
    Status {
        job_id: String,
        status: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<u8>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Progress {
        job_id: String,
        line: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        job_id: String,
        #[serde(flatten)]
        outcome: JobOutcome,
        timestamp: DateTime<Utc>,
    },
}

impl QueueEvent {
    pub fn job_id(&self) -> &str {
        match self {
            QueueEvent::Status { job_id, .. }
            | QueueEvent::Progress { job_id, .. }
            | QueueEvent::Completed { job_id, .. } => job_id,
        }
    }
}

/// Broadcasts queue events to any number of subscribers.
///
/// Slow subscribers lag and lose the oldest events; senders never wait.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<QueueEvent>>,
}

impl JobEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: QueueEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for JobEventBroadcaster {
    fn status(&self, job_id: &str, status: JobStatus, progress: Option<u8>) {
        self.send(QueueEvent::Status {
            job_id: job_id.to_string(),
            status,
            progress,
            timestamp: Utc::now(),
        });
    }

    fn progress(&self, job_id: &str, line: &str) {
        self.send(QueueEvent::Progress {
            job_id: job_id.to_string(),
            line: line.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn completed(&self, job_id: &str, outcome: &JobOutcome) {
        self.send(QueueEvent::Completed {
            job_id: job_id.to_string(),
            outcome: outcome.clone(),
            timestamp: Utc::now(),
        });
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl EventSink for NoopEvents {
    fn status(&self, _job_id: &str, _status: JobStatus, _progress: Option<u8>) {}
    fn progress(&self, _job_id: &str, _line: &str) {}
    fn completed(&self, _job_id: &str, _outcome: &JobOutcome) {}
}
