use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::job::JobId;

/// Snapshot of overall completion as shown to the user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub message: String,
    /// 0.0 ..= 100.0
    pub percent: f32,
}

/// Items that failed one batch of work, reported once per batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub job_id: JobId,
    pub message: String,
    pub items: Vec<String>,
    pub reported_at: DateTime<Utc>,
}

impl FailureNotice {
    pub fn new(job_id: JobId, message: impl Into<String>, items: Vec<String>) -> Self {
        Self {
            job_id,
            message: message.into(),
            items,
            reported_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PipelineEvent {
    Progress(ProgressUpdate),
    /// Both stages ran out of outstanding work.
    Drained,
    /// The grace delay after draining passed without new work.
    Idle,
    Failure(FailureNotice),
}

/// In-process fan-out of pipeline notifications. Publishing without
/// subscribers is not an error.
pub struct PipelineEventBus {
    sender: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl fmt::Debug for PipelineEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl PipelineEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, capacity }
    }

    pub fn publish(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}
