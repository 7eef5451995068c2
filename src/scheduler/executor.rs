//! In-process fixed-delay jobs and their cross-node audit table.
//!
//! Executor jobs run on the leader's tokio runtime, not in PostgreSQL. The
//! `executor_scheduled_job` table only exists so other nodes can observe
//! what the current leader is running; it is advisory, never authoritative.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use sqlx::PgPool;
use uuid::Uuid;

/// Fixed-rate schedule for an in-process job: first run after
/// `initial_delay`, then every `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    pub initial_delay: Duration,
    pub period: Duration,
}

impl FixedDelay {
    /// Panics if `period` is zero.
    pub fn new(initial_delay: Duration, period: Duration) -> Self {
        assert!(!period.is_zero(), "period must be greater than zero");
        Self {
            initial_delay,
            period,
        }
    }

    /// A schedule that first fires after one full period.
    pub fn every(period: Duration) -> Self {
        Self::new(period, period)
    }
}

/// The effectful operation an executor job runs on every tick.
pub type JobTask = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// An in-process job executed at a fixed rate while this node is leader.
///
/// Identity is the logical `name`; registering a second job with the same
/// name is ignored. Errors returned by the task are logged and swallowed —
/// the next tick still runs.
#[derive(Clone)]
pub struct ExecutorJob {
    pub name: String,
    pub fixed_delay: FixedDelay,
    task: JobTask,
}

impl ExecutorJob {
    pub fn new<F, Fut>(name: impl Into<String>, fixed_delay: FixedDelay, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            fixed_delay,
            task: Arc::new(move || task().boxed()),
        }
    }

    pub(crate) fn task(&self) -> JobTask {
        Arc::clone(&self.task)
    }
}

impl fmt::Debug for ExecutorJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorJob")
            .field("name", &self.name)
            .field("fixed_delay", &self.fixed_delay)
            .finish_non_exhaustive()
    }
}

/// A row of the `executor_scheduled_job` audit table. `scheduler_id`
/// identifies the scheduler instance that wrote the row, so successive
/// leadership cycles on the same host remain distinguishable.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExecutorJobEntry {
    pub name: String,
    pub initial_delay_ms: i64,
    pub period_ms: i64,
    pub last_started_at: DateTime<Utc>,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub host: String,
    pub scheduler_id: Uuid,
}

/// Repository over the audit table. Written only by the current leader;
/// readers on other nodes may see stale rows.
#[derive(Clone)]
pub struct ExecutorScheduledJobRepository {
    pool: PgPool,
}

impl ExecutorScheduledJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Installs the audit table if missing.
    pub async fn ensure_table(&self) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executor_scheduled_job (
                name             TEXT PRIMARY KEY,
                initial_delay_ms BIGINT NOT NULL,
                period_ms        BIGINT NOT NULL,
                last_started_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
                next_fire_at     TIMESTAMPTZ,
                host             TEXT NOT NULL,
                scheduler_id     UUID NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records an installed job under its instance-suffixed `name`.
    pub async fn insert(
        &self,
        name: &str,
        job: &ExecutorJob,
        host: &str,
        scheduler_id: Uuid,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO executor_scheduled_job
                (name, initial_delay_ms, period_ms, last_started_at, next_fire_at, host, scheduler_id)
            VALUES ($1, $2, $3, now(), now() + $4 * interval '1 millisecond', $5, $6)
            ON CONFLICT (name) DO UPDATE SET
                initial_delay_ms = EXCLUDED.initial_delay_ms,
                period_ms        = EXCLUDED.period_ms,
                last_started_at  = EXCLUDED.last_started_at,
                next_fire_at     = EXCLUDED.next_fire_at,
                host             = EXCLUDED.host,
                scheduler_id     = EXCLUDED.scheduler_id
            "#,
        )
        .bind(name)
        .bind(job.fixed_delay.initial_delay.as_millis() as i64)
        .bind(job.fixed_delay.period.as_millis() as i64)
        .bind(job.fixed_delay.initial_delay.as_millis() as i64)
        .bind(host)
        .bind(scheduler_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Refreshes `last_started_at`/`next_fire_at` at the start of a tick.
    pub async fn mark_tick(&self, name: &str) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE executor_scheduled_job
            SET last_started_at = now(),
                next_fire_at    = now() + period_ms * interval '1 millisecond'
            WHERE name = $1
            "#,
        )
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn exists_by_name(&self, name: &str) -> sqlx::Result<bool> {
        sqlx::query_scalar("SELECT exists(SELECT 1 FROM executor_scheduled_job WHERE name = $1)")
            .bind(name)
            .fetch_one(&self.pool)
            .await
    }

    /// Deletes the row for `name`; returns whether a row was removed.
    pub async fn delete_by_name(&self, name: &str) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM executor_scheduled_job WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Purges all rows whose name ends with `instance_id`.
    pub async fn delete_by_name_ending_with_instance_id(
        &self,
        instance_id: &str,
    ) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM executor_scheduled_job WHERE name LIKE '%' || $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_all(&self) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM executor_scheduled_job")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn fetch_executor_job_entries(
        &self,
        offset: i64,
        limit: i64,
    ) -> sqlx::Result<Vec<ExecutorJobEntry>> {
        sqlx::query_as::<_, ExecutorJobEntry>(
            r#"
            SELECT name, initial_delay_ms, period_ms, last_started_at, next_fire_at, host,
                   scheduler_id
            FROM executor_scheduled_job
            ORDER BY name
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_total_executor_job_entries(&self) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT count(*) FROM executor_scheduled_job")
            .fetch_one(&self.pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_uses_period_as_initial_delay() {
        let fd = FixedDelay::every(Duration::from_secs(30));
        assert_eq!(fd.initial_delay, Duration::from_secs(30));
        assert_eq!(fd.period, Duration::from_secs(30));
    }

    #[test]
    #[should_panic(expected = "period")]
    fn zero_period_is_rejected() {
        let _ = FixedDelay::new(Duration::ZERO, Duration::ZERO);
    }

    #[tokio::test]
    async fn job_task_is_shared_and_callable() {
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let task_counter = Arc::clone(&counter);
        let job = ExecutorJob::new(
            "count-up",
            FixedDelay::every(Duration::from_secs(1)),
            move || {
                let task_counter = Arc::clone(&task_counter);
                async move {
                    task_counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                }
            },
        );
        (job.task())().await.unwrap();
        (job.task())().await.unwrap();
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
