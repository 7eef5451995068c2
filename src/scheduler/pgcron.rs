//! Data access over the `pg_cron` extension schema.
//!
//! Jobs are rows in `cron.job`; execution history is `cron.job_run_details`.
//! Both tables are owned by the extension, so everything here is plain
//! DML/`cron.*` function calls against them.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::debug;

use crate::postgres;

use super::{SchedulerError, SchedulerResult};

/// A job to be installed through `cron.schedule`.
///
/// `name` is the logical job name; the scheduler suffixes it with the
/// node's instance id before it becomes a `cron.job.jobname`.
/// `function_name` must satisfy
/// [`postgres::is_valid_function_name`] — it is inlined into the scheduled
/// command. The arguments are rendered as SQL literals; derive them only
/// from trusted sources.
#[derive(Debug, Clone, PartialEq)]
pub struct PgCronJob {
    pub name: String,
    pub function_name: String,
    pub args: Vec<Value>,
    pub cron_expression: String,
}

impl PgCronJob {
    pub fn new(
        name: impl Into<String>,
        function_name: impl Into<String>,
        args: Vec<Value>,
        cron_expression: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            function_name: function_name.into(),
            args,
            cron_expression: cron_expression.into(),
        }
    }

    /// The SQL command stored in `cron.job.command`:
    /// `SELECT <function>(<args>)`.
    pub(crate) fn command(&self) -> SchedulerResult<String> {
        if !postgres::is_valid_function_name(&self.function_name) {
            return Err(SchedulerError::InvalidFunctionName(
                self.function_name.clone(),
            ));
        }
        let args = self
            .args
            .iter()
            .map(render_sql_literal)
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("SELECT {}({})", self.function_name, args))
    }
}

/// Renders a JSON value as a SQL literal for inclusion in the stored cron
/// command. String content is escaped by doubling single quotes.
fn render_sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'::jsonb", other.to_string().replace('\'', "''")),
    }
}

/// A row of `cron.job`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PgCronEntry {
    pub jobid: i64,
    pub schedule: String,
    pub command: String,
    pub nodename: String,
    pub nodeport: i32,
    pub database: String,
    pub username: String,
    pub active: bool,
    pub jobname: Option<String>,
}

/// A row of `cron.job_run_details`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PgCronJobRunDetails {
    pub jobid: Option<i64>,
    pub runid: i64,
    pub job_pid: Option<i32>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub command: Option<String>,
    pub status: Option<String>,
    pub return_message: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Thin repository over the `cron` schema.
#[derive(Clone)]
pub struct PgCronRepository {
    pool: PgPool,
}

impl PgCronRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Installs `job` under `jobname` and returns the `cron.job` id.
    ///
    /// Fails with [`SchedulerError::InvalidFunctionName`] before touching
    /// the database when the function name does not validate. A database
    /// error whose message names `shared_preload_libraries` means the
    /// extension is installed but not preloaded; classify it with
    /// [`postgres::is_extension_not_loaded_error`].
    pub async fn schedule(&self, job: &PgCronJob, jobname: &str) -> SchedulerResult<i64> {
        let command = job.command()?;
        debug!(jobname, schedule = %job.cron_expression, command = %command, "scheduling pg_cron job");
        let job_id = sqlx::query_scalar::<_, i64>("SELECT cron.schedule($1, $2, $3)")
            .bind(jobname)
            .bind(&job.cron_expression)
            .bind(&command)
            .fetch_one(&self.pool)
            .await?;
        Ok(job_id)
    }

    /// Removes the job with the given id. Best-effort: the job may already
    /// be gone.
    pub async fn unschedule(&self, job_id: i64) -> sqlx::Result<()> {
        sqlx::query_scalar::<_, bool>("SELECT cron.unschedule($1)")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// The job id for `jobname`, if such a job exists.
    pub async fn does_job_exist(&self, jobname: &str) -> sqlx::Result<Option<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT jobid FROM cron.job WHERE jobname = $1")
            .bind(jobname)
            .fetch_optional(&self.pool)
            .await
    }

    /// Unschedules every job whose name ends with `instance_id`, returning
    /// how many were removed. Used to purge residue left by a crashed
    /// process on the same host.
    pub async fn delete_jobs_by_name_ending_with_instance_id(
        &self,
        instance_id: &str,
    ) -> sqlx::Result<u64> {
        let job_ids: Vec<i64> =
            sqlx::query_scalar("SELECT jobid FROM cron.job WHERE jobname LIKE '%' || $1")
                .bind(instance_id)
                .fetch_all(&self.pool)
                .await?;
        let mut removed = 0;
        for job_id in job_ids {
            self.unschedule(job_id).await?;
            removed += 1;
        }
        Ok(removed)
    }

    pub async fn fetch_pg_cron_entries(
        &self,
        offset: i64,
        limit: i64,
    ) -> sqlx::Result<Vec<PgCronEntry>> {
        sqlx::query_as::<_, PgCronEntry>(
            r#"
            SELECT jobid, schedule, command, nodename, nodeport, database, username, active, jobname
            FROM cron.job
            ORDER BY jobid
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_total_pg_cron_entries(&self) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT count(*) FROM cron.job")
            .fetch_one(&self.pool)
            .await
    }

    pub async fn fetch_pg_cron_job_run_details(
        &self,
        job_id: i64,
        offset: i64,
        limit: i64,
    ) -> sqlx::Result<Vec<PgCronJobRunDetails>> {
        sqlx::query_as::<_, PgCronJobRunDetails>(
            r#"
            SELECT jobid, runid, job_pid, database, username, command, status,
                   return_message, start_time, end_time
            FROM cron.job_run_details
            WHERE jobid = $1
            ORDER BY runid DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(job_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_total_pg_cron_job_run_details(&self, job_id: i64) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT count(*) FROM cron.job_run_details WHERE jobid = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn command_renders_zero_args() {
        let job = PgCronJob::new("cleanup", "purge_expired", vec![], "*/10 * * * * *");
        assert_eq!(job.command().unwrap(), "SELECT purge_expired()");
    }

    #[test]
    fn command_renders_mixed_args() {
        let job = PgCronJob::new(
            "cleanup",
            "audit.purge_expired",
            vec![json!("orders"), json!(42), json!(true), json!(null)],
            "10 seconds",
        );
        assert_eq!(
            job.command().unwrap(),
            "SELECT audit.purge_expired('orders', 42, true, NULL)"
        );
    }

    #[test]
    fn command_escapes_single_quotes_in_string_args() {
        let job = PgCronJob::new(
            "cleanup",
            "purge_expired",
            vec![json!("o'brien")],
            "10 seconds",
        );
        assert_eq!(job.command().unwrap(), "SELECT purge_expired('o''brien')");
    }

    #[test]
    fn command_rejects_invalid_function_names() {
        for bad in ["select", "purge_expired(); DROP TABLE t; --", "a.b.c", ""] {
            let job = PgCronJob::new("cleanup", bad, vec![], "10 seconds");
            assert!(
                matches!(job.command(), Err(SchedulerError::InvalidFunctionName(_))),
                "{bad} should be rejected"
            );
        }
    }
}
