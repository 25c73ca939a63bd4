use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::{
    store::JobStore, ClaimedJob, Job, JobId, JobStatus, ListQuery, Page, QueueError, QueueResult,
    QueueStats,
};

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// PostgreSQL store.
///
/// The claim operation is a single atomic statement: the inner select takes
/// row locks with `FOR UPDATE SKIP LOCKED`, so concurrent claimants skip
/// rows held by another in-flight claim instead of blocking on them.
pub struct PostgresStore {
    pool: PgPool,
}

const JOB_COLUMNS: &str =
    "id, queue, payload, status, attempts, error, available_at, created_at, updated_at, processed_at";

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the live and archive tables plus the claim index if they do
    /// not exist yet
    pub async fn migrate(&self) -> QueueResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queues (
                id TEXT PRIMARY KEY,
                queue TEXT NOT NULL,
                payload JSONB NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                available_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                processed_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_queues_claim
             ON queues (queue, status, available_at, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queues_archive (
                queue TEXT NOT NULL,
                payload JSONB NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                error TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                available_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL,
                processed_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_job(row: &PgRow) -> QueueResult<Job> {
        let status: String = row.try_get("status")?;
        let status = JobStatus::parse(&status)
            .ok_or_else(|| QueueError::Storage(format!("unknown job status: {status}")))?;
        let attempts: i32 = row.try_get("attempts")?;

        Ok(Job {
            id: JobId::from_string(row.try_get("id")?),
            queue: row.try_get("queue")?,
            payload: row.try_get("payload")?,
            status,
            attempts: attempts as u32,
            error: row.try_get("error")?,
            available_at: row.try_get("available_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            processed_at: row.try_get("processed_at")?,
        })
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &ListQuery) {
        if let Some(ref queue) = query.queue {
            builder.push(" AND queue = ").push_bind(queue.clone());
        }
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(ref search) = query.search {
            let pattern = format!("%{search}%");
            builder
                .push(" AND (queue LIKE ")
                .push_bind(pattern.clone())
                .push(" OR error LIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }
}

#[async_trait]
impl JobStore for PostgresStore {
    async fn insert(&self, job: Job) -> QueueResult<JobId> {
        sqlx::query(
            r#"
            INSERT INTO queues
                (id, queue, payload, status, attempts, error, available_at, created_at, updated_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id.as_str())
        .bind(&job.queue)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(job.attempts as i32)
        .bind(&job.error)
        .bind(job.available_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.processed_at)
        .execute(&self.pool)
        .await?;

        Ok(job.id)
    }

    async fn claim(&self, queue: &str, max_attempts: u32) -> QueueResult<Option<ClaimedJob>> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            UPDATE queues
            SET status = $1, attempts = attempts + 1, processed_at = $2, updated_at = $2
            WHERE id = (
                SELECT id FROM queues
                WHERE queue = $3
                  AND status = $4
                  AND attempts < $5
                  AND (available_at IS NULL OR available_at <= $2)
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, queue, payload, attempts
            "#,
        )
        .bind(JobStatus::Working.as_str())
        .bind(now)
        .bind(queue)
        .bind(JobStatus::Pending.as_str())
        .bind(max_attempts as i32)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let attempts: i32 = row.try_get("attempts")?;
                Ok(Some(ClaimedJob {
                    id: JobId::from_string(row.try_get("id")?),
                    queue: row.try_get("queue")?,
                    payload: row.try_get("payload")?,
                    attempts: attempts as u32,
                }))
            }
            None => Ok(None),
        }
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM queues WHERE id = $1 LIMIT 1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_job(&row)).transpose()
    }

    async fn mark_done(&self, id: &JobId) -> QueueResult<bool> {
        let result = sqlx::query("UPDATE queues SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(JobStatus::Done.as_str())
            .bind(Utc::now())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reschedule(
        &self,
        id: &JobId,
        available_at: DateTime<Utc>,
        error: String,
    ) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE queues SET status = $1, error = $2, available_at = $3, updated_at = $4 WHERE id = $5",
        )
        .bind(JobStatus::Pending.as_str())
        .bind(error)
        .bind(available_at)
        .bind(Utc::now())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn dead_letter(&self, id: &JobId, error: String) -> QueueResult<bool> {
        let result =
            sqlx::query("UPDATE queues SET status = $1, error = $2, updated_at = $3 WHERE id = $4")
                .bind(JobStatus::Failed.as_str())
                .bind(error)
                .bind(Utc::now())
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn retry(&self, id: &JobId) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE queues SET status = $1, error = NULL, updated_at = $2 WHERE id = $3 AND status = $4",
        )
        .bind(JobStatus::Pending.as_str())
        .bind(Utc::now())
        .bind(id.as_str())
        .bind(JobStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &JobId) -> QueueResult<bool> {
        let result = sqlx::query("DELETE FROM queues WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, query: &ListQuery) -> QueueResult<Page<Job>> {
        let mut count_builder =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM queues WHERE 1=1");
        Self::push_filters(&mut count_builder, query);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {JOB_COLUMNS} FROM queues WHERE 1=1"
        ));
        Self::push_filters(&mut builder, query);
        // Sort column and direction come from allow-listed enums, never from
        // caller-supplied strings.
        builder
            .push(" ORDER BY ")
            .push(query.sort.as_str())
            .push(" ")
            .push(query.order.as_str())
            .push(" LIMIT ")
            .push_bind(query.limit as i64)
            .push(" OFFSET ")
            .push_bind(query.offset as i64);

        let rows = builder.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(Self::row_to_job)
            .collect::<QueueResult<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total as u64,
            limit: query.limit,
            offset: query.offset,
        })
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status = $1) AS pending,
                   COUNT(*) FILTER (WHERE status = $2) AS working,
                   COUNT(*) FILTER (WHERE status = $3) AS done,
                   COUNT(*) FILTER (WHERE status = $4) AS failed,
                   COUNT(DISTINCT queue) AS queues
            FROM queues
            "#,
        )
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Working.as_str())
        .bind(JobStatus::Done.as_str())
        .bind(JobStatus::Failed.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            total: row.try_get::<i64, _>("total")? as u64,
            pending: row.try_get::<i64, _>("pending")? as u64,
            working: row.try_get::<i64, _>("working")? as u64,
            done: row.try_get::<i64, _>("done")? as u64,
            failed: row.try_get::<i64, _>("failed")? as u64,
            queues: row.try_get::<i64, _>("queues")? as u64,
        })
    }

    async fn queue_names(&self) -> QueueResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT queue FROM queues ORDER BY queue ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("queue").map_err(QueueError::from))
            .collect()
    }

    async fn reclaim_stuck(&self, cutoff: DateTime<Utc>, marker: &str) -> QueueResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE queues
            SET status = $1, error = $2, updated_at = $3
            WHERE status = $4 AND processed_at < $5
            "#,
        )
        .bind(JobStatus::Pending.as_str())
        .bind(marker)
        .bind(Utc::now())
        .bind(JobStatus::Working.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn archive_done(&self, cutoff: DateTime<Utc>) -> QueueResult<u64> {
        // Copy then delete under one transaction; any failure rolls back and
        // propagates so the scheduled caller knows the batch did not complete.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO queues_archive
                (queue, payload, status, attempts, error, created_at, available_at, updated_at, processed_at)
            SELECT queue, payload, status, attempts, error, created_at, available_at, updated_at,
                   COALESCE(processed_at, updated_at)
            FROM queues
            WHERE status = $1 AND updated_at < $2
            "#,
        )
        .bind(JobStatus::Done.as_str())
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM queues WHERE status = $1 AND updated_at < $2")
            .bind(JobStatus::Done.as_str())
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted.rows_affected())
    }

    async fn purge(&self, status: JobStatus, cutoff: DateTime<Utc>) -> QueueResult<u64> {
        let result = sqlx::query("DELETE FROM queues WHERE status = $1 AND created_at < $2")
            .bind(status.as_str())
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
