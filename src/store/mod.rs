pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    ClaimedJob, Job, JobId, JobStatus, ListQuery, Page, QueueResult, QueueStats,
};

/// Storage trait for queue primitives.
///
/// Implementations map the claim operation onto whatever the underlying
/// store offers: a lock-skipping locked read (`FOR UPDATE SKIP LOCKED`),
/// an atomic conditional update, or a single critical section for in-memory
/// storage. The one hard requirement is mutual exclusion: no two concurrent
/// `claim` calls may ever return the same job.
///
/// Retry, backoff, and dead-letter policy live in [`QueueService`]; stores
/// only execute primitive transitions.
///
/// [`QueueService`]: crate::QueueService
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job row. Must not block on any other job's lock.
    async fn insert(&self, job: Job) -> QueueResult<JobId>;

    /// Atomically claim the oldest eligible job for `queue`.
    ///
    /// Eligible means pending, `attempts < max_attempts`, and not delayed
    /// into the future. Ordering is FIFO by creation time within the queue.
    /// On claim the row becomes `Working` with `attempts` incremented and
    /// `processed_at` set. Rows locked by another in-flight claim are
    /// skipped, not waited on.
    async fn claim(&self, queue: &str, max_attempts: u32) -> QueueResult<Option<ClaimedJob>>;

    /// Fetch a job by id
    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>>;

    /// Mark a job `Done`. Returns false for an unknown id; repeated calls
    /// leave the row `Done`.
    async fn mark_done(&self, id: &JobId) -> QueueResult<bool>;

    /// Put a job back into `Pending` with a delay and an error diagnostic
    /// (the retry branch of the failure transition)
    async fn reschedule(
        &self,
        id: &JobId,
        available_at: DateTime<Utc>,
        error: String,
    ) -> QueueResult<bool>;

    /// Move a job to `Failed` with a dead-letter diagnostic
    async fn dead_letter(&self, id: &JobId, error: String) -> QueueResult<bool>;

    /// Transition a job from `Failed` back to `Pending`, clearing its error.
    ///
    /// The update is conditional on the current status; returns false when
    /// the job is missing or not currently `Failed`. Attempts are not reset.
    async fn retry(&self, id: &JobId) -> QueueResult<bool>;

    /// Hard-delete a job regardless of status
    async fn delete(&self, id: &JobId) -> QueueResult<bool>;

    /// Filtered, paginated listing for administrative inspection
    async fn list(&self, query: &ListQuery) -> QueueResult<Page<Job>>;

    /// Per-status counts and distinct queue count
    async fn stats(&self) -> QueueResult<QueueStats>;

    /// Distinct queue names, ascending
    async fn queue_names(&self) -> QueueResult<Vec<String>>;

    /// Reset `Working` rows whose `processed_at` is older than `cutoff`
    /// back to `Pending`, stamping `marker` into their error field.
    /// Returns the number of rows reset; attempts are left untouched.
    async fn reclaim_stuck(&self, cutoff: DateTime<Utc>, marker: &str) -> QueueResult<u64>;

    /// Atomically copy `Done` rows with `updated_at` older than `cutoff`
    /// into the archive and delete them from the live store. Returns the
    /// number of rows moved. Failures must roll back and propagate.
    async fn archive_done(&self, cutoff: DateTime<Utc>) -> QueueResult<u64>;

    /// Hard-delete rows matching `status` with `created_at` older than
    /// `cutoff`. No archive copy is kept.
    async fn purge(&self, status: JobStatus, cutoff: DateTime<Utc>) -> QueueResult<u64>;
}
