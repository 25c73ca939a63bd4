use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    store::JobStore, ClaimedJob, Job, JobId, JobStatus, ListQuery, Page, QueueEvent, QueueResult,
    QueueStats,
};

/// Retry policy configuration.
///
/// Held by the service rather than hidden in module state, so one process
/// can run several independently configured queues.
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    /// Claims allowed before a failing job is dead-lettered
    pub max_attempts: u32,

    /// Base delay for exponential backoff (doubles per attempt)
    pub backoff_base: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
        }
    }
}

/// Durable queue service over a [`JobStore`].
///
/// Owns the retry/backoff/dead-letter policy and the best-effort enqueue
/// notifier; the store only executes primitive transitions. Cheap to clone;
/// clones share the store and notifier.
pub struct QueueService<S: JobStore> {
    store: Arc<S>,
    policy: QueuePolicy,
    events: broadcast::Sender<QueueEvent>,
}

impl<S: JobStore> QueueService<S> {
    /// Create a service with the default policy
    pub fn new(store: S) -> Self {
        Self::with_policy(store, QueuePolicy::default())
    }

    /// Create a service with a custom policy
    pub fn with_policy(store: S, policy: QueuePolicy) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            store: Arc::new(store),
            policy,
            events,
        }
    }

    /// Get the underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configured policy
    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    /// Subscribe to best-effort queue notifications
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Enqueue a new job on `queue`.
    ///
    /// The payload is serialized to an opaque JSON blob and never
    /// interpreted. Emits a fire-and-forget enqueue notification; a notifier
    /// failure never fails the enqueue. Duplicate submissions are the
    /// caller's responsibility.
    pub async fn enqueue(&self, queue: &str, payload: impl Serialize) -> QueueResult<JobId> {
        let payload = serde_json::to_value(payload)?;
        let job = Job::new(queue, payload);
        let id = self.store.insert(job).await?;

        let _ = self.events.send(QueueEvent::Enqueued {
            job_id: id.clone(),
            queue: queue.to_string(),
            at: Utc::now(),
        });

        info!("enqueued job {} on '{}'", id, queue);
        Ok(id)
    }

    /// Claim the oldest eligible job on `queue`.
    ///
    /// A store error during claim is logged and reported as "no job
    /// available" so a polling worker never dies from a momentary hiccup.
    pub async fn claim(&self, queue: &str, max_attempts: u32) -> Option<ClaimedJob> {
        match self.store.claim(queue, max_attempts).await {
            Ok(job) => job,
            Err(err) => {
                error!("queue claim failed: {}", err);
                None
            }
        }
    }

    /// Mark a job done. Returns false for an unknown id; repeated calls
    /// leave the row done.
    pub async fn mark_done(&self, id: &JobId) -> QueueResult<bool> {
        let updated = self.store.mark_done(id).await?;
        if updated {
            debug!("queue job {} done", id);
        }
        Ok(updated)
    }

    /// Resolve a job failure: reschedule with exponential backoff while
    /// retry budget remains, dead-letter otherwise.
    ///
    /// `attempts` was already incremented by the claim, so the backoff
    /// sequence for the default base is 5s, 10s, 20s, 40s, 80s.
    pub async fn mark_failed(
        &self,
        id: &JobId,
        reason: &str,
        max_attempts: u32,
    ) -> QueueResult<bool> {
        let Some(job) = self.store.get(id).await? else {
            return Ok(false);
        };

        let attempts = job.attempts;
        if attempts < max_attempts {
            let delay = self.retry_backoff(attempts);
            let available_at = Utc::now() + chrono::Duration::seconds(delay.as_secs() as i64);
            let updated = self
                .store
                .reschedule(id, available_at, reason.to_string())
                .await?;
            if updated {
                warn!(
                    "queue job {} attempt {}/{} failed, retrying in {}s: {}",
                    id,
                    attempts,
                    max_attempts,
                    delay.as_secs(),
                    reason
                );
            }
            Ok(updated)
        } else {
            let error = format!(
                "[DEAD LETTER] Max attempts ({max_attempts}) exceeded. Last error: {reason}"
            );
            let updated = self.store.dead_letter(id, error).await?;
            if updated {
                error!(
                    "queue job {} moved to dead letter after {} attempts: {}",
                    id, max_attempts, reason
                );
            }
            Ok(updated)
        }
    }

    /// Backoff delay before the next retry after `attempts` claims
    pub fn retry_backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.max(1) - 1;
        let factor = 2u64.saturating_pow(exponent);
        Duration::from_secs(self.policy.backoff_base.as_secs().saturating_mul(factor))
    }

    /// Manually move a dead-lettered job back to pending, clearing its
    /// error. Returns false unless the job is currently failed. Attempts are
    /// not reset: the retry budget already spent stays spent.
    pub async fn retry(&self, id: &JobId) -> QueueResult<bool> {
        let updated = self.store.retry(id).await?;
        if updated {
            info!("queue job {} manually retried", id);
        }
        Ok(updated)
    }

    /// Hard-delete a job regardless of status
    pub async fn delete(&self, id: &JobId) -> QueueResult<bool> {
        self.store.delete(id).await
    }

    /// Fetch a job by id
    pub async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        self.store.get(id).await
    }

    /// Filtered, paginated listing for administrative inspection
    pub async fn list(&self, query: &ListQuery) -> QueueResult<Page<Job>> {
        self.store.list(query).await
    }

    /// Per-status counts and distinct queue count
    pub async fn stats(&self) -> QueueResult<QueueStats> {
        self.store.stats().await
    }

    /// Distinct queue names, ascending
    pub async fn queue_names(&self) -> QueueResult<Vec<String>> {
        self.store.queue_names().await
    }

    /// Reset jobs stuck in `Working` longer than `threshold` back to
    /// pending. Returns the number of jobs reset.
    ///
    /// Recovery is at-least-once: a slow-but-alive worker may have its job
    /// reclaimed and reprocessed concurrently, so handlers must tolerate
    /// duplicate execution.
    pub async fn reclaim_stuck(&self, threshold: Duration) -> QueueResult<u64> {
        let minutes = threshold.as_secs() / 60;
        let marker = format!("[STUCK] Reset after {minutes} minutes of no response");
        let cutoff = Utc::now() - chrono::Duration::seconds(threshold.as_secs() as i64);

        let count = self.store.reclaim_stuck(cutoff, &marker).await?;
        if count > 0 {
            warn!(
                "queue maintenance: reset {} stuck jobs (working > {} min)",
                count, minutes
            );
        }
        Ok(count)
    }

    /// Move completed jobs older than the safety window into the archive.
    ///
    /// The window keeps the archiver from racing a worker or observer still
    /// touching a row that was just marked done; it is a heuristic, not a
    /// strict guarantee under clock skew or long transactions. Archiver
    /// failures propagate so the scheduled caller knows the batch did not
    /// complete.
    pub async fn archive_completed(&self, safety_window: Duration) -> QueueResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::seconds(safety_window.as_secs() as i64);
        let count = self.store.archive_done(cutoff).await?;
        if count > 0 {
            info!("queue maintenance: archived {} completed jobs", count);
        }
        Ok(count)
    }

    /// Hard-delete jobs of `status` created more than `older_than_days`
    /// days ago. Irreversible: no archive copy is kept.
    pub async fn purge(&self, status: JobStatus, older_than_days: u32) -> QueueResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days as i64);
        self.store.purge(status, cutoff).await
    }
}

impl<S: JobStore> Clone for QueueService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            policy: self.policy.clone(),
            events: self.events.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::QueueError;
    use async_trait::async_trait;
    use chrono::DateTime;
    use proptest::prelude::*;
    use serde_json::json;

    fn service() -> QueueService<MemoryStore> {
        QueueService::new(MemoryStore::new())
    }

    #[test]
    fn backoff_sequence() {
        let service = service();
        let seconds: Vec<u64> = (1..=5)
            .map(|a| service.retry_backoff(a).as_secs())
            .collect();
        assert_eq!(seconds, vec![5, 10, 20, 40, 80]);
        // Attempt zero is treated like attempt one
        assert_eq!(service.retry_backoff(0).as_secs(), 5);
    }

    proptest! {
        #[test]
        fn backoff_follows_formula(attempts in 0u32..20) {
            let service = QueueService::new(MemoryStore::new());
            let expected = 5u64 * 2u64.pow(attempts.max(1) - 1);
            prop_assert_eq!(service.retry_backoff(attempts).as_secs(), expected);
        }
    }

    #[tokio::test]
    async fn enqueue_then_claim_preserves_payload() {
        let service = service();
        let id = service
            .enqueue("emails", json!({"to": "a@x.com"}))
            .await
            .unwrap();

        let claimed = service.claim("emails", 5).await.unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.payload, json!({"to": "a@x.com"}));
    }

    #[tokio::test]
    async fn enqueue_notifies_subscribers_best_effort() {
        let service = service();

        // No subscribers: the notification is dropped, the enqueue succeeds
        service.enqueue("emails", json!({})).await.unwrap();

        let mut events = service.subscribe();
        let id = service.enqueue("emails", json!({})).await.unwrap();
        let event = events.recv().await.unwrap();
        match event {
            QueueEvent::Enqueued { job_id, queue, .. } => {
                assert_eq!(job_id, id);
                assert_eq!(queue, "emails");
            }
        }
    }

    #[tokio::test]
    async fn mark_failed_reschedules_with_backoff() {
        let service = service();
        let id = service.enqueue("emails", json!({})).await.unwrap();
        service.claim("emails", 5).await.unwrap();

        let before = Utc::now();
        assert!(service.mark_failed(&id, "smtp down", 5).await.unwrap());

        let job = service.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.error.as_deref(), Some("smtp down"));

        // First failure: five second delay, with some slack for test timing
        let available_at = job.available_at.unwrap();
        let delay = (available_at - before).num_seconds();
        assert!((4..=7).contains(&delay), "unexpected delay: {delay}s");
    }

    #[tokio::test]
    async fn mark_failed_on_never_claimed_job_delays_by_base() {
        let service = service();
        let id = service.enqueue("emails", json!({})).await.unwrap();

        let before = Utc::now();
        assert!(service.mark_failed(&id, "smtp down", 5).await.unwrap());

        let job = service.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        let delay = (job.available_at.unwrap() - before).num_seconds();
        assert!((4..=7).contains(&delay), "unexpected delay: {delay}s");
    }

    #[tokio::test]
    async fn mark_failed_dead_letters_at_threshold() {
        let service = service();
        let id = service.enqueue("emails", json!({})).await.unwrap();
        service.store().force_attempts(&id, 5);

        assert!(service.mark_failed(&id, "smtp down", 5).await.unwrap());

        let job = service.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job
            .error
            .as_deref()
            .unwrap()
            .starts_with("[DEAD LETTER] Max attempts (5) exceeded. Last error: smtp down"));
    }

    #[tokio::test]
    async fn mark_failed_on_unknown_id_is_a_no_op() {
        let service = service();
        assert!(!service.mark_failed(&JobId::new(), "boom", 5).await.unwrap());
    }

    #[tokio::test]
    async fn manual_retry_requires_failed_and_keeps_attempts() {
        let service = service();
        let id = service.enqueue("emails", json!({})).await.unwrap();
        assert!(!service.retry(&id).await.unwrap());

        service.claim("emails", 5).await.unwrap();
        service.store().force_attempts(&id, 5);
        service.mark_failed(&id, "smtp down", 5).await.unwrap();

        assert!(service.retry(&id).await.unwrap());
        let job = service.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error.is_none());
        assert_eq!(job.attempts, 5);
    }

    #[tokio::test]
    async fn reclaim_stuck_stamps_marker() {
        let service = service();
        let id = service.enqueue("emails", json!({})).await.unwrap();
        service.claim("emails", 5).await.unwrap();
        service
            .store()
            .force_processed_at(&id, Utc::now() - chrono::Duration::minutes(31));

        let count = service
            .reclaim_stuck(Duration::from_secs(30 * 60))
            .await
            .unwrap();
        assert_eq!(count, 1);

        let job = service.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(
            job.error.as_deref(),
            Some("[STUCK] Reset after 30 minutes of no response")
        );
    }

    #[tokio::test]
    async fn archive_respects_safety_window() {
        let service = service();
        let old = service.enqueue("emails", json!({})).await.unwrap();
        service.mark_done(&old).await.unwrap();
        service
            .store()
            .force_updated_at(&old, Utc::now() - chrono::Duration::seconds(30));

        let fresh = service.enqueue("emails", json!({})).await.unwrap();
        service.mark_done(&fresh).await.unwrap();

        let count = service
            .archive_completed(Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(service.get(&old).await.unwrap().is_none());
        assert!(service.get(&fresh).await.unwrap().is_some());
    }

    /// Store stub whose claim always fails, to exercise the transient-error
    /// path.
    struct FailingStore;

    #[async_trait]
    impl crate::store::JobStore for FailingStore {
        async fn insert(&self, _job: Job) -> QueueResult<JobId> {
            Err(QueueError::Storage("connection refused".into()))
        }
        async fn claim(&self, _queue: &str, _max: u32) -> QueueResult<Option<ClaimedJob>> {
            Err(QueueError::Storage("connection refused".into()))
        }
        async fn get(&self, _id: &JobId) -> QueueResult<Option<Job>> {
            Err(QueueError::Storage("connection refused".into()))
        }
        async fn mark_done(&self, _id: &JobId) -> QueueResult<bool> {
            Err(QueueError::Storage("connection refused".into()))
        }
        async fn reschedule(
            &self,
            _id: &JobId,
            _at: DateTime<Utc>,
            _error: String,
        ) -> QueueResult<bool> {
            Err(QueueError::Storage("connection refused".into()))
        }
        async fn dead_letter(&self, _id: &JobId, _error: String) -> QueueResult<bool> {
            Err(QueueError::Storage("connection refused".into()))
        }
        async fn retry(&self, _id: &JobId) -> QueueResult<bool> {
            Err(QueueError::Storage("connection refused".into()))
        }
        async fn delete(&self, _id: &JobId) -> QueueResult<bool> {
            Err(QueueError::Storage("connection refused".into()))
        }
        async fn list(&self, _query: &ListQuery) -> QueueResult<Page<Job>> {
            Err(QueueError::Storage("connection refused".into()))
        }
        async fn stats(&self) -> QueueResult<QueueStats> {
            Err(QueueError::Storage("connection refused".into()))
        }
        async fn queue_names(&self) -> QueueResult<Vec<String>> {
            Err(QueueError::Storage("connection refused".into()))
        }
        async fn reclaim_stuck(&self, _cutoff: DateTime<Utc>, _marker: &str) -> QueueResult<u64> {
            Err(QueueError::Storage("connection refused".into()))
        }
        async fn archive_done(&self, _cutoff: DateTime<Utc>) -> QueueResult<u64> {
            Err(QueueError::Storage("connection refused".into()))
        }
        async fn purge(&self, _status: JobStatus, _cutoff: DateTime<Utc>) -> QueueResult<u64> {
            Err(QueueError::Storage("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn claim_swallows_store_errors() {
        let service = QueueService::new(FailingStore);
        assert!(service.claim("emails", 5).await.is_none());
    }

    #[tokio::test]
    async fn archive_errors_propagate() {
        let service = QueueService::new(FailingStore);
        let result = service.archive_completed(Duration::from_secs(10)).await;
        assert!(matches!(result, Err(QueueError::Storage(_))));
    }
}
