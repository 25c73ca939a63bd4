use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::JobId;

/// Job status lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued and waiting to be claimed (possibly delayed via `available_at`)
    Pending,

    /// Claimed by exactly one worker and currently executing
    Working,

    /// Completed successfully (terminal)
    Done,

    /// Dead-lettered after exhausting retry attempts (terminal under automatic flow)
    Failed,
}

impl JobStatus {
    /// Check if the status is terminal under normal flow.
    ///
    /// Only a manual retry or the stuck-job sweep moves a job out of a
    /// terminal or in-flight state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Get the status name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Working => "working",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parse a status from its label (case-insensitive)
    pub fn parse(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "working" => Some(Self::Working),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable job row.
///
/// The payload is an opaque JSON blob; the queue never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,

    /// Queue name partitioning the work space; jobs in different queues
    /// never compete for claims
    pub queue: String,

    /// Opaque serialized payload
    pub payload: Value,

    /// Current job status
    pub status: JobStatus,

    /// Claim counter, incremented exactly once per successful claim
    pub attempts: u32,

    /// Last failure diagnostic (if any)
    pub error: Option<String>,

    /// Earliest instant the job is eligible for claim; used for backoff delay
    pub available_at: Option<DateTime<Utc>>,

    /// When the job was created
    pub created_at: DateTime<Utc>,

    /// When the job was last updated
    pub updated_at: DateTime<Utc>,

    /// When the job was last claimed; consulted by the stuck-job sweep
    pub processed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job
    pub fn new(queue: impl Into<String>, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            queue: queue.into(),
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            error: None,
            available_at: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    /// Check whether the job is eligible for claim right now.
    ///
    /// Eligible means pending, with retry budget left, and not delayed into
    /// the future by a backoff timestamp.
    pub fn is_claimable(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        self.status == JobStatus::Pending
            && self.attempts < max_attempts
            && self.available_at.map_or(true, |at| at <= now)
    }

    /// Transition into `Working` as part of a claim
    pub fn begin_work(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Working;
        self.attempts += 1;
        self.processed_at = Some(now);
        self.updated_at = now;
    }

    /// Mark the job done
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Done;
        self.updated_at = now;
    }

    /// Put the job back into `Pending` with a backoff delay after a failure
    pub fn reschedule(&mut self, available_at: DateTime<Utc>, error: String, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.available_at = Some(available_at);
        self.error = Some(error);
        self.updated_at = now;
    }

    /// Dead-letter the job after its retry budget is exhausted
    pub fn dead_letter(&mut self, error: String, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.updated_at = now;
    }

    /// Reset an abandoned `Working` job back to `Pending`.
    ///
    /// Attempts are deliberately left untouched: a recovered job is the same
    /// distance from the dead-letter threshold as before.
    pub fn reset_stuck(&mut self, marker: String, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.error = Some(marker);
        self.updated_at = now;
    }
}

/// A job handed to a worker by a successful claim
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// The claimed job's identifier
    pub id: JobId,

    /// Queue the job was claimed from
    pub queue: String,

    /// Opaque payload for the handler
    pub payload: Value,

    /// Attempt count after the claim (claim increments it)
    pub attempts: u32,
}

/// Immutable copy of a job's final shape, written once at archival time.
///
/// Deliberately carries no id coupling to the live table; archive rows are
/// pure history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedJob {
    pub queue: String,
    pub payload: Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub available_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

impl ArchivedJob {
    /// Snapshot a live row for the archive.
    ///
    /// `processed_at` falls back to `updated_at` for rows that were never
    /// claimed.
    pub fn from_job(job: &Job) -> Self {
        Self {
            queue: job.queue.clone(),
            payload: job.payload.clone(),
            status: job.status,
            attempts: job.attempts,
            error: job.error.clone(),
            created_at: job.created_at,
            available_at: job.available_at,
            updated_at: job.updated_at,
            processed_at: job.processed_at.unwrap_or(job.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_labels_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Working,
            JobStatus::Done,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("WORKING"), Some(JobStatus::Working));
        assert_eq!(JobStatus::parse("unknown"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Working.is_terminal());
    }

    #[test]
    fn claimable_respects_eligibility_predicate() {
        let now = Utc::now();
        let mut job = Job::new("emails", json!({"to": "a@x.com"}));
        assert!(job.is_claimable(now, 5));

        // Delayed into the future
        job.available_at = Some(now + chrono::Duration::seconds(30));
        assert!(!job.is_claimable(now, 5));

        // Delay elapsed
        job.available_at = Some(now - chrono::Duration::seconds(1));
        assert!(job.is_claimable(now, 5));

        // Retry budget exhausted
        job.attempts = 5;
        assert!(!job.is_claimable(now, 5));

        // Wrong status
        job.attempts = 0;
        job.status = JobStatus::Working;
        assert!(!job.is_claimable(now, 5));
    }

    #[test]
    fn begin_work_increments_attempts_once() {
        let mut job = Job::new("emails", json!({}));
        let now = Utc::now();
        job.begin_work(now);

        assert_eq!(job.status, JobStatus::Working);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.processed_at, Some(now));
        assert_eq!(job.updated_at, now);
    }

    #[test]
    fn reset_stuck_preserves_attempts() {
        let mut job = Job::new("emails", json!({}));
        let now = Utc::now();
        job.begin_work(now);
        job.reset_stuck("[STUCK] Reset after 30 minutes of no response".into(), now);

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert!(job.error.as_deref().unwrap().starts_with("[STUCK]"));
    }

    #[test]
    fn archive_snapshot_falls_back_to_updated_at() {
        let mut job = Job::new("emails", json!({"n": 1}));
        job.complete(Utc::now());
        let archived = ArchivedJob::from_job(&job);

        assert_eq!(archived.processed_at, job.updated_at);
        assert_eq!(archived.payload, job.payload);
        assert_eq!(archived.status, JobStatus::Done);
    }
}
