use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{
    shutdown::{shutdown_channel, ShutdownHandle, ShutdownToken},
    store::JobStore,
    HandlerError, QueueError, QueueResult, QueueService,
};

/// Job handler invoked by the worker loop.
///
/// Delivery is at-least-once: a job reclaimed from a slow worker by the
/// stuck-job sweep may execute twice, so handlers must be idempotent. A
/// returned error becomes the job's failure reason; panics are not caught.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, payload: Value) -> Result<(), HandlerError>;
}

/// Configuration for a worker loop
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue to consume from
    pub queue: String,

    /// Idle sleep between polls when no job is available
    pub poll_interval: Duration,

    /// Override for the service's max-attempts policy
    pub max_attempts: Option<u32>,
}

impl WorkerConfig {
    /// Configure a worker for `queue` with a one second poll interval
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            poll_interval: Duration::from_secs(1),
            max_attempts: None,
        }
    }

    /// Set the idle poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the service's max-attempts policy for this worker
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Single-job-at-a-time queue consumer.
///
/// Scale out by running several independent workers against the same store;
/// mutual exclusion is enforced entirely by the claim operation, not by any
/// coordination between loops.
pub struct Worker<S: JobStore> {
    service: QueueService<S>,
    config: WorkerConfig,
    handler: Arc<dyn JobHandler>,
}

impl<S: JobStore + 'static> Worker<S> {
    pub fn new(service: QueueService<S>, config: WorkerConfig, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            service,
            config,
            handler,
        }
    }

    /// Run the worker loop until shutdown is requested.
    ///
    /// Cancellation is cooperative: the token is checked between iterations
    /// (and interrupts the idle sleep), never mid-handler. Handler errors
    /// are converted into failure transitions and never escape the loop.
    pub async fn run(self, mut token: ShutdownToken) {
        let max_attempts = self
            .config
            .max_attempts
            .unwrap_or(self.service.policy().max_attempts);

        info!(
            "queue worker started for '{}' (max_attempts={})",
            self.config.queue, max_attempts
        );

        loop {
            if token.is_requested() {
                break;
            }

            let Some(job) = self.service.claim(&self.config.queue, max_attempts).await else {
                tokio::select! {
                    _ = token.requested() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            };

            match self.handler.handle(job.payload).await {
                Ok(()) => {
                    if let Err(err) = self.service.mark_done(&job.id).await {
                        error!("failed to mark job {} done: {}", job.id, err);
                    }
                }
                Err(failure) => {
                    if let Err(err) = self
                        .service
                        .mark_failed(&job.id, failure.message(), max_attempts)
                        .await
                    {
                        error!("failed to record failure for job {}: {}", job.id, err);
                    }
                }
            }
        }

        info!(
            "queue worker for '{}' shut down gracefully",
            self.config.queue
        );
    }

    /// Spawn the worker onto the runtime and return a handle for graceful
    /// shutdown
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown, token) = shutdown_channel();
        let join_handle = tokio::spawn(self.run(token));
        WorkerHandle {
            shutdown,
            join_handle,
        }
    }
}

/// Handle for managing a spawned worker's lifecycle
pub struct WorkerHandle {
    shutdown: ShutdownHandle,
    join_handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Request shutdown and wait for the loop to finish its current job
    pub async fn shutdown(self) -> QueueResult<()> {
        self.shutdown.request();
        self.join_handle
            .await
            .map_err(|err| QueueError::Internal(format!("worker join error: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::JobStatus;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _payload: Value) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl JobHandler for FailingHandler {
        async fn handle(&self, _payload: Value) -> Result<(), HandlerError> {
            Err(HandlerError::msg("smtp down"))
        }
    }

    fn fast_config(queue: &str) -> WorkerConfig {
        WorkerConfig::new(queue).with_poll_interval(Duration::from_millis(10))
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn worker_processes_jobs_and_shuts_down() {
        let service = QueueService::new(MemoryStore::new());
        let id = service.enqueue("emails", json!({"n": 1})).await.unwrap();

        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
        });
        let worker = Worker::new(service.clone(), fast_config("emails"), handler.clone());
        let handle = worker.spawn();

        wait_for(|| handler.calls.load(Ordering::SeqCst) == 1).await;
        handle.shutdown().await.unwrap();

        let job = service.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn handler_failure_becomes_a_retry_with_reason() {
        let service = QueueService::new(MemoryStore::new());
        let id = service.enqueue("emails", json!({})).await.unwrap();

        let worker = Worker::new(service.clone(), fast_config("emails"), Arc::new(FailingHandler));
        let handle = worker.spawn();

        let probe = service.clone();
        let probe_id = id.clone();
        wait_for(move || status_of(&probe, &probe_id) == Some(JobStatus::Pending)).await;
        handle.shutdown().await.unwrap();

        let job = service.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.error.as_deref(), Some("smtp down"));
        assert_eq!(job.attempts, 1);
        assert!(job.available_at.is_some());
    }

    // Synchronous status probe against the memory store, usable inside a
    // non-async wait condition.
    fn status_of(service: &QueueService<MemoryStore>, id: &crate::JobId) -> Option<JobStatus> {
        service.store().jobs.read().get(id).map(|job| job.status)
    }

    #[tokio::test]
    async fn shutdown_is_honored_while_idle() {
        let service: QueueService<MemoryStore> = QueueService::new(MemoryStore::new());
        let worker = Worker::new(
            service,
            WorkerConfig::new("empty").with_poll_interval(Duration::from_secs(60)),
            Arc::new(FailingHandler),
        );
        let handle = worker.spawn();

        // The long idle sleep must not delay shutdown
        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("shutdown timed out")
            .unwrap();
    }
}
