pub mod events;
pub mod ids;
pub mod job;
pub mod query;

pub use events::QueueEvent;
pub use ids::JobId;
pub use job::{ArchivedJob, ClaimedJob, Job, JobStatus};
pub use query::{ListQuery, Page, QueueStats, SortKey, SortOrder};
