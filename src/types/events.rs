use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;

/// Best-effort notification emitted by the service.
///
/// Delivery is fire-and-forget over a broadcast channel: a full or
/// subscriber-less channel never fails the operation that produced the
/// event. The protocol is deliberately minimal; workers discover work by
/// polling, not by push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    /// A job was enqueued
    Enqueued {
        job_id: JobId,
        queue: String,
        at: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
        }
    }

    /// Get the job ID from any event
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Enqueued { job_id, .. } => job_id,
        }
    }
}
