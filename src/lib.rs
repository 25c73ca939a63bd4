//! # relayq: durable job queue engine
//!
//! A persistent work queue with the guarantees background jobs actually
//! need in production:
//!
//! - **Atomic claims**: each job is handed to exactly one concurrent worker
//!   via a lock-skipping claim, so claimants never block on each other's rows
//! - **Retry with backoff**: failed jobs are rescheduled with exponential
//!   backoff (5s, 10s, 20s, ...) until their attempt budget runs out
//! - **Dead-lettering**: jobs that fail too often are quarantined with a
//!   diagnostic preserved for postmortem inspection
//! - **Stuck-job recovery**: work abandoned by crashed or hung workers is
//!   reset to pending by a scheduled sweep
//! - **Archive & purge**: completed jobs age out into an append-only
//!   archive; retention-expired rows can be hard-deleted
//! - **Graceful shutdown**: workers honor a cooperative cancellation token
//!   between iterations, never mid-handler
//!
//! Delivery is at-least-once; handlers must be idempotent. Ordering is FIFO
//! by creation time within a single queue only.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use relayq::{HandlerError, JobHandler, MemoryStore, QueueService, Worker, WorkerConfig};
//!
//! struct SendEmail;
//!
//! #[async_trait]
//! impl JobHandler for SendEmail {
//!     async fn handle(&self, payload: Value) -> Result<(), HandlerError> {
//!         println!("sending {payload}");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = QueueService::new(MemoryStore::new());
//!     service.enqueue("emails", json!({"to": "a@x.com"})).await?;
//!
//!     let worker = Worker::new(
//!         service.clone(),
//!         WorkerConfig::new("emails").with_poll_interval(Duration::from_secs(1)),
//!         Arc::new(SendEmail),
//!     );
//!     let handle = worker.spawn();
//!
//!     // ... on termination:
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! Horizontal scale-out is just more worker loops (or more processes)
//! against the same store; mutual exclusion lives entirely in the claim
//! operation. The `postgres` feature provides a SQL-backed store using
//! `FOR UPDATE SKIP LOCKED`; the in-memory store covers tests and
//! development.

pub mod error;
pub mod maintenance;
pub mod service;
pub mod shutdown;
pub mod store;
pub mod types;
pub mod worker;

// Core API exports
pub use error::{HandlerError, QueueError, QueueResult};
pub use maintenance::{MaintenanceConfig, MaintenanceRunner, SweepOutcome};
pub use service::{QueuePolicy, QueueService};
pub use shutdown::{shutdown_channel, ShutdownHandle, ShutdownToken};
pub use store::{memory::MemoryStore, JobStore};
pub use types::{
    ArchivedJob, ClaimedJob, Job, JobId, JobStatus, ListQuery, Page, QueueEvent, QueueStats,
    SortKey, SortOrder,
};
pub use worker::{JobHandler, Worker, WorkerConfig, WorkerHandle};

// Backend implementations
#[cfg(feature = "postgres")]
pub use store::postgres::PostgresStore;

/// Commonly used types for queue producers and consumers
pub mod prelude {
    pub use crate::{
        HandlerError, JobHandler, JobId, JobStatus, JobStore, ListQuery, MemoryStore, QueuePolicy,
        QueueResult, QueueService, ShutdownToken, Worker, WorkerConfig,
    };

    pub use async_trait::async_trait;
}
