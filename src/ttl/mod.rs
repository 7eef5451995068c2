//! Time-to-live jobs: periodic DELETE-by-predicate against user tables.
//!
//! The manager installs a single generic PL/pgSQL delete function once at
//! startup and registers one scheduler job per TTL definition. With
//! `pg_cron` available and a cron schedule, the delete runs inside
//! PostgreSQL; otherwise it runs in-process on a fixed-delay fallback.
//!
//! # Security
//!
//! Only the table name is validated (as a first line of defense against
//! SQL injection). The `where_clause` and `full_delete_sql` of a
//! [`DefaultTtlJobAction`] are executed verbatim: they MUST come from a
//! controlled, trusted source, never from external input.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::network;
use crate::postgres;
use crate::scheduler::{
    ExecutorJob, FixedDelay, PgCronJob, Scheduler, SchedulerError, SchedulerResult,
};

/// Name of the PL/pgSQL function installed by [`TtlManager::start`] unless
/// overridden.
pub const DEFAULT_TTL_FUNCTION_NAME: &str = "pgbeat_ttl_delete";

/// When and how a TTL job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleConfiguration {
    /// A cron schedule, handed to `pg_cron` verbatim when available. The
    /// optional `fixed_delay` is the fallback used when `pg_cron` is not
    /// available; without one the period is derived from the expression.
    Cron {
        expression: String,
        fixed_delay: Option<FixedDelay>,
    },
    /// Always run in-process at a fixed rate.
    FixedDelay(FixedDelay),
}

impl ScheduleConfiguration {
    pub fn cron(expression: impl Into<String>) -> Self {
        Self::Cron {
            expression: expression.into(),
            fixed_delay: None,
        }
    }

    pub fn cron_with_fallback(expression: impl Into<String>, fixed_delay: FixedDelay) -> Self {
        Self::Cron {
            expression: expression.into(),
            fixed_delay: Some(fixed_delay),
        }
    }

    pub fn fixed_delay(fixed_delay: FixedDelay) -> Self {
        Self::FixedDelay(fixed_delay)
    }

    /// The fixed-delay rendition of this configuration, used when the job
    /// cannot run through `pg_cron`.
    pub fn to_fixed_delay(&self) -> SchedulerResult<FixedDelay> {
        match self {
            Self::FixedDelay(fixed_delay) => Ok(*fixed_delay),
            Self::Cron {
                fixed_delay: Some(fixed_delay),
                ..
            } => Ok(*fixed_delay),
            Self::Cron { expression, .. } => {
                let period = derive_period(expression)?;
                Ok(FixedDelay::every(period))
            }
        }
    }
}

/// Derives a fixed period from a cron expression: the gap between its next
/// two occurrences. Accepts pg_cron's `N seconds` interval syntax directly.
fn derive_period(expression: &str) -> SchedulerResult<Duration> {
    let trimmed = expression.trim();
    if let Some(seconds) = trimmed
        .strip_suffix("seconds")
        .or_else(|| trimmed.strip_suffix("second"))
        .and_then(|n| n.trim().parse::<u64>().ok())
    {
        return Ok(Duration::from_secs(seconds.max(1)));
    }

    let schedule = cron::Schedule::from_str(&normalize_cron_expression(trimmed)).map_err(|err| {
        SchedulerError::InvalidScheduleConfiguration(format!(
            "cannot derive a fixed delay from cron expression '{expression}': {err}"
        ))
    })?;
    let mut upcoming = schedule.upcoming(Utc);
    match (upcoming.next(), upcoming.next()) {
        (Some(first), Some(second)) => (second - first).to_std().map_err(|_| {
            SchedulerError::InvalidScheduleConfiguration(format!(
                "cron expression '{expression}' does not produce an increasing schedule"
            ))
        }),
        _ => Err(SchedulerError::InvalidScheduleConfiguration(format!(
            "cron expression '{expression}' has no upcoming occurrences"
        ))),
    }
}

/// The `cron` crate wants 6 fields (with seconds); standard Unix cron uses
/// 5. Prepend second 0 for 5-field expressions.
fn normalize_cron_expression(expression: &str) -> String {
    if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

/// The SQL function invocation a TTL action dispatches through `pg_cron`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub function_name: String,
    pub args: Vec<serde_json::Value>,
}

/// The work performed by a TTL job, in both scheduling modes.
#[async_trait]
pub trait TtlJobAction: Send + Sync {
    /// Logical job name; also the dedup key for definitions.
    fn job_name(&self) -> &str;

    /// The function call installed as the cron command (cron mode).
    fn function_call(&self) -> FunctionCall;

    /// Re-checks the action's identifiers before scheduling.
    fn validate(&self) -> SchedulerResult<()>;

    /// Performs the delete directly (fixed-delay mode), inside a
    /// transaction.
    async fn execute_directly(&self, pool: &PgPool) -> anyhow::Result<()>;
}

/// Deletes rows of `table_name` matching `where_clause`, or runs
/// `full_delete_sql` verbatim when set.
#[derive(Debug, Clone)]
pub struct DefaultTtlJobAction {
    table_name: String,
    where_clause: String,
    full_delete_sql: Option<String>,
    function_name: String,
    job_name: String,
}

impl DefaultTtlJobAction {
    /// Fails when `table_name` is not a valid identifier. `where_clause`
    /// is NOT validated; see the module security note.
    pub fn new(
        table_name: impl Into<String>,
        where_clause: impl Into<String>,
    ) -> SchedulerResult<Self> {
        let table_name = table_name.into();
        let where_clause = where_clause.into();
        postgres::check_is_valid_table_or_column_name(&table_name, Some("TTL job table name"))?;
        let job_name = format!(
            "ttl-{}-{}",
            table_name,
            network::short_hash(&format!("{table_name} WHERE {where_clause}"))
        );
        Ok(Self {
            table_name,
            where_clause,
            full_delete_sql: None,
            function_name: DEFAULT_TTL_FUNCTION_NAME.to_string(),
            job_name,
        })
    }

    /// Replaces the generated DELETE with a fully spelled-out statement,
    /// executed verbatim in fixed-delay mode.
    pub fn with_full_delete_sql(mut self, sql: impl Into<String>) -> Self {
        self.full_delete_sql = Some(sql.into());
        self
    }

    /// Points the cron-mode dispatch at a different delete function.
    pub fn with_function_name(mut self, function_name: impl Into<String>) -> SchedulerResult<Self> {
        let function_name = function_name.into();
        if !postgres::is_valid_function_name(&function_name) {
            return Err(SchedulerError::InvalidFunctionName(function_name));
        }
        self.function_name = function_name;
        Ok(self)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn delete_sql(&self) -> String {
        self.full_delete_sql.clone().unwrap_or_else(|| {
            format!(
                "DELETE FROM {} WHERE {}",
                self.table_name, self.where_clause
            )
        })
    }
}

#[async_trait]
impl TtlJobAction for DefaultTtlJobAction {
    fn job_name(&self) -> &str {
        &self.job_name
    }

    fn function_call(&self) -> FunctionCall {
        FunctionCall {
            function_name: self.function_name.clone(),
            args: vec![json!(self.table_name), json!(self.where_clause)],
        }
    }

    fn validate(&self) -> SchedulerResult<()> {
        postgres::check_is_valid_table_or_column_name(
            &self.table_name,
            Some("TTL job table name"),
        )?;
        if !postgres::is_valid_function_name(&self.function_name) {
            return Err(SchedulerError::InvalidFunctionName(
                self.function_name.clone(),
            ));
        }
        Ok(())
    }

    async fn execute_directly(&self, pool: &PgPool) -> anyhow::Result<()> {
        let sql = self.delete_sql();
        let mut tx = pool.begin().await?;
        let result = sqlx::query(&sql).execute(&mut *tx).await?;
        tx.commit().await?;
        debug!(
            job = %self.job_name,
            table = %self.table_name,
            rows_deleted = result.rows_affected(),
            "ttl delete executed"
        );
        Ok(())
    }
}

/// A TTL job: what to delete and when.
#[derive(Clone)]
pub struct TtlJobDefinition {
    pub action: Arc<dyn TtlJobAction>,
    pub schedule: ScheduleConfiguration,
}

impl TtlJobDefinition {
    pub fn new(action: Arc<dyn TtlJobAction>, schedule: ScheduleConfiguration) -> Self {
        Self { action, schedule }
    }
}

/// Manages TTL jobs: installs the delete function, then schedules each
/// definition through the [`Scheduler`].
pub struct TtlManager {
    scheduler: Scheduler,
    pool: PgPool,
    function_name: String,
    definitions: Mutex<Vec<TtlJobDefinition>>,
    started: AtomicBool,
}

impl TtlManager {
    pub fn new(scheduler: Scheduler, pool: PgPool) -> Self {
        Self {
            scheduler,
            pool,
            function_name: DEFAULT_TTL_FUNCTION_NAME.to_string(),
            definitions: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Overrides the installed function name. Fails when the name is not a
    /// valid function identifier.
    pub fn with_function_name(mut self, function_name: impl Into<String>) -> SchedulerResult<Self> {
        let function_name = function_name.into();
        if !postgres::is_valid_function_name(&function_name) {
            return Err(SchedulerError::InvalidFunctionName(function_name));
        }
        self.function_name = function_name;
        Ok(self)
    }

    /// Registers a TTL job. Scheduled immediately when the manager is
    /// started; queued until [`start`](TtlManager::start) otherwise.
    /// Definitions with an already-registered job name are ignored.
    pub async fn schedule_ttl_job(&self, definition: TtlJobDefinition) -> SchedulerResult<()> {
        {
            let mut definitions = self.definitions.lock().expect("ttl definitions poisoned");
            if definitions
                .iter()
                .any(|existing| existing.action.job_name() == definition.action.job_name())
            {
                info!(job = %definition.action.job_name(), "ttl job already registered");
                return Ok(());
            }
            debug!(job = %definition.action.job_name(), "registering ttl job");
            definitions.push(definition.clone());
        }

        if self.started.load(Ordering::SeqCst) {
            self.schedule_job(&definition).await
        } else {
            info!(
                job = %definition.action.job_name(),
                "manager not started; ttl job will be scheduled on start"
            );
            Ok(())
        }
    }

    /// Starts the manager: installs the delete function idempotently, then
    /// schedules every queued definition. Idempotent.
    pub async fn start(&self) -> SchedulerResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(function = %self.function_name, "starting ttl manager");

        if let Err(err) = self.initialize_ttl_function().await {
            self.started.store(false, Ordering::SeqCst);
            return Err(err);
        }

        let definitions = self
            .definitions
            .lock()
            .expect("ttl definitions poisoned")
            .clone();
        info!(count = definitions.len(), "scheduling ttl job definitions");
        for definition in &definitions {
            // One bad definition must not block the rest.
            if let Err(err) = self.schedule_job(definition).await {
                warn!(
                    job = %definition.action.job_name(),
                    error = %err,
                    "failed to schedule ttl job"
                );
            }
        }
        Ok(())
    }

    pub fn stop(&self) {
        if self.started.swap(false, Ordering::SeqCst) {
            info!("stopped ttl manager");
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    async fn schedule_job(&self, definition: &TtlJobDefinition) -> SchedulerResult<()> {
        definition.action.validate()?;

        if let ScheduleConfiguration::Cron { expression, .. } = &definition.schedule {
            if self.scheduler.is_pg_cron_available() {
                let call = definition.action.function_call();
                self.scheduler
                    .schedule_pg_cron_job(PgCronJob::new(
                        definition.action.job_name(),
                        call.function_name,
                        call.args,
                        expression.clone(),
                    ))
                    .await;
                return Ok(());
            }
            warn!(
                job = %definition.action.job_name(),
                "pg_cron not available; falling back to fixed-delay scheduling"
            );
        }

        let fixed_delay = definition.schedule.to_fixed_delay()?;
        let action = Arc::clone(&definition.action);
        let pool = self.pool.clone();
        let job = ExecutorJob::new(definition.action.job_name(), fixed_delay, move || {
            let action = Arc::clone(&action);
            let pool = pool.clone();
            async move { action.execute_directly(&pool).await }
        });
        self.scheduler.schedule_executor_job(job).await;
        Ok(())
    }

    /// Installs the generic delete function. `%I` quotes the table
    /// identifier; the predicate is spliced verbatim by `%s` and is the
    /// caller's responsibility.
    async fn initialize_ttl_function(&self) -> SchedulerResult<()> {
        if !postgres::is_valid_function_name(&self.function_name) {
            return Err(SchedulerError::InvalidFunctionName(
                self.function_name.clone(),
            ));
        }
        let sql = format!(
            r#"
            CREATE OR REPLACE FUNCTION {function_name}(p_table_name text, p_delete_statement text)
            RETURNS void AS $$
            BEGIN
                EXECUTE format('DELETE FROM %I WHERE %s', p_table_name, p_delete_statement);
            END;
            $$ LANGUAGE plpgsql
            "#,
            function_name = self.function_name
        );
        let mut tx = self.pool.begin().await?;
        sqlx::query(&sql).execute(&mut *tx).await?;
        tx.commit().await?;
        debug!(function = %self.function_name, "ttl delete function installed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_configuration_is_returned_as_is() {
        let fd = FixedDelay::every(Duration::from_secs(60));
        let config = ScheduleConfiguration::fixed_delay(fd);
        assert_eq!(config.to_fixed_delay().unwrap(), fd);
    }

    #[test]
    fn cron_fallback_wins_over_derivation() {
        let fd = FixedDelay::new(Duration::from_secs(5), Duration::from_secs(30));
        let config = ScheduleConfiguration::cron_with_fallback("*/1 * * * *", fd);
        assert_eq!(config.to_fixed_delay().unwrap(), fd);
    }

    #[test]
    fn derives_period_from_five_field_cron() {
        let config = ScheduleConfiguration::cron("*/1 * * * *");
        let fd = config.to_fixed_delay().unwrap();
        assert_eq!(fd.period, Duration::from_secs(60));
    }

    #[test]
    fn derives_period_from_six_field_cron() {
        let config = ScheduleConfiguration::cron("*/10 * * * * *");
        let fd = config.to_fixed_delay().unwrap();
        assert_eq!(fd.period, Duration::from_secs(10));
    }

    #[test]
    fn derives_period_from_pg_cron_interval_syntax() {
        let config = ScheduleConfiguration::cron("10 seconds");
        assert_eq!(
            config.to_fixed_delay().unwrap().period,
            Duration::from_secs(10)
        );
        let config = ScheduleConfiguration::cron("1 second");
        assert_eq!(
            config.to_fixed_delay().unwrap().period,
            Duration::from_secs(1)
        );
    }

    #[test]
    fn rejects_underivable_expressions() {
        let config = ScheduleConfiguration::cron("not a cron expression");
        assert!(matches!(
            config.to_fixed_delay(),
            Err(SchedulerError::InvalidScheduleConfiguration(_))
        ));
    }

    #[test]
    fn action_rejects_invalid_table_names() {
        assert!(DefaultTtlJobAction::new("orders; DROP TABLE x", "true").is_err());
        assert!(DefaultTtlJobAction::new("select", "true").is_err());
        assert!(DefaultTtlJobAction::new("", "true").is_err());
    }

    #[test]
    fn action_job_name_is_stable_and_table_scoped() {
        let a = DefaultTtlJobAction::new("orders", "expired < now()").unwrap();
        let b = DefaultTtlJobAction::new("orders", "expired < now()").unwrap();
        let c = DefaultTtlJobAction::new("orders", "archived < now()").unwrap();
        assert_eq!(a.job_name(), b.job_name());
        assert_ne!(a.job_name(), c.job_name());
        assert!(a.job_name().starts_with("ttl-orders-"));
    }

    #[test]
    fn function_call_carries_table_and_predicate() {
        let action = DefaultTtlJobAction::new("orders", "expired < now()").unwrap();
        let call = action.function_call();
        assert_eq!(call.function_name, DEFAULT_TTL_FUNCTION_NAME);
        assert_eq!(
            call.args,
            vec![json!("orders"), json!("expired < now()")]
        );
    }

    #[test]
    fn full_delete_sql_overrides_generated_statement() {
        let action = DefaultTtlJobAction::new("orders", "expired < now()")
            .unwrap()
            .with_full_delete_sql("DELETE FROM orders WHERE id IN (SELECT id FROM expired_orders)");
        assert!(action.delete_sql().contains("expired_orders"));
    }

    #[test]
    fn invalid_function_name_is_rejected() {
        let action = DefaultTtlJobAction::new("orders", "true").unwrap();
        assert!(action.with_function_name("drop table").is_err());
    }
}
