use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{
    store::JobStore, ArchivedJob, ClaimedJob, Job, JobId, JobStatus, ListQuery, Page, QueueResult,
    QueueStats, SortKey, SortOrder,
};

/// In-memory store for testing and development.
///
/// Every mutation runs inside one `parking_lot` write-lock critical section,
/// so the claim operation is trivially lock-skipping: no other claimant can
/// hold a row while the section runs, and concurrent claimants serialize on
/// the table lock instead of blocking on individual rows.
pub struct MemoryStore {
    /// Live job rows indexed by job id
    pub(crate) jobs: Arc<RwLock<HashMap<JobId, Job>>>,

    /// Append-only archive mirror
    pub(crate) archive: Arc<RwLock<Vec<ArchivedJob>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            archive: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Snapshot of the archive mirror, oldest first
    pub fn archived(&self) -> Vec<ArchivedJob> {
        self.archive.read().clone()
    }

    fn matches(job: &Job, query: &ListQuery) -> bool {
        if let Some(ref queue) = query.queue {
            if &job.queue != queue {
                return false;
            }
        }
        if let Some(status) = query.status {
            if job.status != status {
                return false;
            }
        }
        if let Some(ref search) = query.search {
            let in_queue = job.queue.contains(search.as_str());
            let in_error = job
                .error
                .as_deref()
                .map_or(false, |e| e.contains(search.as_str()));
            if !in_queue && !in_error {
                return false;
            }
        }
        true
    }

    fn compare(a: &Job, b: &Job, key: SortKey) -> Ordering {
        match key {
            SortKey::Id => a.id.as_str().cmp(b.id.as_str()),
            SortKey::Queue => a.queue.cmp(&b.queue),
            SortKey::Status => a.status.as_str().cmp(b.status.as_str()),
            SortKey::Attempts => a.attempts.cmp(&b.attempts),
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortKey::ProcessedAt => a.processed_at.cmp(&b.processed_at),
            SortKey::AvailableAt => a.available_at.cmp(&b.available_at),
        }
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, job: Job) -> QueueResult<JobId> {
        let id = job.id.clone();
        self.jobs.write().insert(id.clone(), job);
        Ok(id)
    }

    async fn claim(&self, queue: &str, max_attempts: u32) -> QueueResult<Option<ClaimedJob>> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();

        // Oldest eligible row for the queue; id breaks created_at ties so
        // concurrent enqueues at the same instant still claim deterministically.
        let picked = jobs
            .values()
            .filter(|job| job.queue == queue && job.is_claimable(now, max_attempts))
            .min_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.as_str().cmp(b.id.as_str()))
            })
            .map(|job| job.id.clone());

        let Some(id) = picked else {
            return Ok(None);
        };

        if let Some(job) = jobs.get_mut(&id) {
            job.begin_work(now);
            return Ok(Some(ClaimedJob {
                id: job.id.clone(),
                queue: job.queue.clone(),
                payload: job.payload.clone(),
                attempts: job.attempts,
            }));
        }

        Ok(None)
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        Ok(self.jobs.read().get(id).cloned())
    }

    async fn mark_done(&self, id: &JobId) -> QueueResult<bool> {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(id) {
            job.complete(Utc::now());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn reschedule(
        &self,
        id: &JobId,
        available_at: DateTime<Utc>,
        error: String,
    ) -> QueueResult<bool> {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(id) {
            job.reschedule(available_at, error, Utc::now());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn dead_letter(&self, id: &JobId, error: String) -> QueueResult<bool> {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(id) {
            job.dead_letter(error, Utc::now());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn retry(&self, id: &JobId) -> QueueResult<bool> {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(id) {
            Some(job) if job.status == JobStatus::Failed => {
                job.status = JobStatus::Pending;
                job.error = None;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: &JobId) -> QueueResult<bool> {
        Ok(self.jobs.write().remove(id).is_some())
    }

    async fn list(&self, query: &ListQuery) -> QueueResult<Page<Job>> {
        let jobs = self.jobs.read();
        let mut matched: Vec<Job> = jobs
            .values()
            .filter(|job| Self::matches(job, query))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            let ordering = Self::compare(a, b, query.sort);
            match query.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        let total = matched.len() as u64;
        let items: Vec<Job> = matched
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect();

        Ok(Page {
            items,
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let jobs = self.jobs.read();
        let mut stats = QueueStats::default();
        let mut queues = std::collections::HashSet::new();

        for job in jobs.values() {
            stats.total += 1;
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Working => stats.working += 1,
                JobStatus::Done => stats.done += 1,
                JobStatus::Failed => stats.failed += 1,
            }
            queues.insert(job.queue.clone());
        }
        stats.queues = queues.len() as u64;

        Ok(stats)
    }

    async fn queue_names(&self) -> QueueResult<Vec<String>> {
        let jobs = self.jobs.read();
        let mut names: Vec<String> = jobs
            .values()
            .map(|job| job.queue.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn reclaim_stuck(&self, cutoff: DateTime<Utc>, marker: &str) -> QueueResult<u64> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();
        let mut count = 0u64;

        for job in jobs.values_mut() {
            let abandoned = job.status == JobStatus::Working
                && job.processed_at.map_or(false, |at| at < cutoff);
            if abandoned {
                job.reset_stuck(marker.to_string(), now);
                count += 1;
            }
        }

        Ok(count)
    }

    async fn archive_done(&self, cutoff: DateTime<Utc>) -> QueueResult<u64> {
        // Copy and delete under a single write lock; the lock stands in for
        // the multi-statement transaction a SQL store would use.
        let mut jobs = self.jobs.write();
        let mut archive = self.archive.write();

        let eligible: Vec<JobId> = jobs
            .values()
            .filter(|job| job.status == JobStatus::Done && job.updated_at < cutoff)
            .map(|job| job.id.clone())
            .collect();

        for id in &eligible {
            if let Some(job) = jobs.remove(id) {
                archive.push(ArchivedJob::from_job(&job));
            }
        }

        Ok(eligible.len() as u64)
    }

    async fn purge(&self, status: JobStatus, cutoff: DateTime<Utc>) -> QueueResult<u64> {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status == status && job.created_at < cutoff));
        Ok((before - jobs.len()) as u64)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
            archive: self.archive.clone(),
        }
    }
}

/// Test helpers for deterministic timestamp control
impl MemoryStore {
    /// Backdate a job's creation time (test helper)
    pub fn force_created_at(&self, id: &JobId, at: DateTime<Utc>) {
        if let Some(job) = self.jobs.write().get_mut(id) {
            job.created_at = at;
        }
    }

    /// Backdate a job's last update time (test helper)
    pub fn force_updated_at(&self, id: &JobId, at: DateTime<Utc>) {
        if let Some(job) = self.jobs.write().get_mut(id) {
            job.updated_at = at;
        }
    }

    /// Backdate a job's claim time (test helper)
    pub fn force_processed_at(&self, id: &JobId, at: DateTime<Utc>) {
        if let Some(job) = self.jobs.write().get_mut(id) {
            job.processed_at = Some(at);
        }
    }

    /// Override a job's eligibility delay (test helper)
    pub fn force_available_at(&self, id: &JobId, at: Option<DateTime<Utc>>) {
        if let Some(job) = self.jobs.write().get_mut(id) {
            job.available_at = at;
        }
    }

    /// Override a job's attempt counter (test helper)
    pub fn force_attempts(&self, id: &JobId, attempts: u32) {
        if let Some(job) = self.jobs.write().get_mut(id) {
            job.attempts = attempts;
        }
    }
}
