//! Cluster-coordinated job scheduler.
//!
//! One scheduler instance runs per node; a fenced lock elects a single
//! leader per lock name, and only the leader installs and runs jobs. Two
//! job classes are managed:
//!
//! - [`PgCronJob`]: installed as rows in `cron.job` through the `pg_cron`
//!   extension, executed by PostgreSQL itself.
//! - [`ExecutorJob`]: executed in-process at a fixed rate on the leader,
//!   mirrored into the `executor_scheduled_job` audit table so other nodes
//!   can observe them.
//!
//! Installed job names carry the node's instance-id suffix; on startup and
//! on every leadership change the scheduler purges rows bearing its own
//! suffix, so residue from a crashed predecessor on the same host cannot
//! accumulate.
//!
//! This is not a general-purpose scheduler. Cron expressions are handed to
//! `pg_cron` verbatim, there is no calendar arithmetic, and jobs are meant
//! to be registered by infrastructure components, not end users.

pub mod executor;
pub mod pgcron;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DEFAULT_LOCK_NAME;
use crate::lock::{FencedLockManager, LockEvent, LockName};
use crate::network;
use crate::postgres::{self, InvalidTableOrColumnName};

pub use executor::{
    ExecutorJob, ExecutorJobEntry, ExecutorScheduledJobRepository, FixedDelay, JobTask,
};
pub use pgcron::{PgCronEntry, PgCronJob, PgCronJobRunDetails, PgCronRepository};

const PG_CRON_EXTENSION: &str = "pg_cron";
const PROBE_JOB_NAME: &str = "pgbeat-probe";
const PROBE_FUNCTION_NAME: &str = "pgbeat_probe_noop";
/// pg_cron interval syntax; the probe job is unscheduled before it can fire.
const PROBE_SCHEDULE: &str = "1 seconds";

/// Errors surfaced to callers of the scheduler and its repositories.
/// Runtime scheduling faults on background paths are logged, never
/// returned.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid function name: '{0}'")]
    InvalidFunctionName(String),

    #[error("invalid schedule configuration: {0}")]
    InvalidScheduleConfiguration(String),

    #[error(transparent)]
    InvalidTableOrColumnName(#[from] InvalidTableOrColumnName),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Configuration for a scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently executing job bodies; ticks beyond it
    /// queue. Must be at least 1.
    pub workers: usize,
    /// Lock name under which instances elect a leader.
    pub lock_name: LockName,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            lock_name: LockName::new(DEFAULT_LOCK_NAME),
        }
    }
}

/// The cluster-coordinated scheduler.
///
/// Cheap to clone; all clones share the same state. Jobs may be registered
/// before or after [`start`](Scheduler::start): registrations made while
/// not leader are queued and installed during the next acquired-leadership
/// sweep.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    pool: PgPool,
    lock_manager: Arc<dyn FencedLockManager>,
    config: SchedulerConfig,
    pg_cron: PgCronRepository,
    executor_repo: ExecutorScheduledJobRepository,
    // Identifies this scheduler instance in audit rows; the instance-id
    // suffix only distinguishes hosts, not successive instances on one.
    scheduler_id: Uuid,

    started: AtomicBool,
    lock_acquired: AtomicBool,
    pg_cron_available: AtomicBool,

    // Registration lists: append on register, remove on cancel. Iterated
    // via snapshot clones; guards are never held across an await.
    pg_cron_jobs: Mutex<Vec<PgCronJob>>,
    executor_jobs: Mutex<Vec<ExecutorJob>>,

    // Installed state, mutated only by the leader sweep and stop/release
    // paths. Keys are instance-suffixed job names.
    pg_cron_job_ids: Mutex<HashMap<String, i64>>,
    executor_job_handles: Mutex<HashMap<String, JoinHandle<()>>>,

    // Recreated on every start cycle; closed on stop to cancel pending
    // ticks cooperatively.
    tick_permits: Mutex<Option<Arc<Semaphore>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        pool: PgPool,
        lock_manager: Arc<dyn FencedLockManager>,
        config: SchedulerConfig,
    ) -> Self {
        assert!(config.workers > 0, "workers must be greater than 0");
        Self {
            inner: Arc::new(SchedulerInner {
                pg_cron: PgCronRepository::new(pool.clone()),
                executor_repo: ExecutorScheduledJobRepository::new(pool.clone()),
                pool,
                lock_manager,
                config,
                scheduler_id: Uuid::new_v4(),
                started: AtomicBool::new(false),
                lock_acquired: AtomicBool::new(false),
                pg_cron_available: AtomicBool::new(false),
                pg_cron_jobs: Mutex::new(Vec::new()),
                executor_jobs: Mutex::new(Vec::new()),
                pg_cron_job_ids: Mutex::new(HashMap::new()),
                executor_job_handles: Mutex::new(HashMap::new()),
                tick_permits: Mutex::new(None),
                event_loop: Mutex::new(None),
            }),
        }
    }

    /// Starts the scheduler: probes `pg_cron`, purges this node's residue,
    /// and enters leader election. Idempotent.
    ///
    /// Failure to install the audit table is returned (nothing can work
    /// without it); everything else, including the extension probe, is
    /// absorbed.
    pub async fn start(&self) -> SchedulerResult<()> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        *inner.tick_permits.lock().expect("tick permits poisoned") =
            Some(Arc::new(Semaphore::new(inner.config.workers)));

        if let Err(err) = inner.executor_repo.ensure_table().await {
            inner.started.store(false, Ordering::SeqCst);
            return Err(err.into());
        }

        let available = inner.probe_pg_cron().await;
        inner.pg_cron_available.store(available, Ordering::SeqCst);
        info!(
            scheduler_id = %inner.scheduler_id,
            pg_cron_available = available,
            workers = inner.config.workers,
            lock = %inner.config.lock_name,
            "starting scheduler"
        );

        inner.delete_jobs_with_instance_id().await;

        let (events_tx, mut events_rx) = mpsc::channel::<LockEvent>(8);
        let event_inner = Arc::clone(inner);
        let event_loop = tokio::spawn(async move {
            // Single consumer: sweeps are linearized here no matter which
            // task the lock driver delivered from.
            while let Some(event) = events_rx.recv().await {
                match event {
                    LockEvent::Acquired => {
                        SchedulerInner::on_lock_acquired(&event_inner).await;
                    }
                    LockEvent::Released => event_inner.on_lock_released().await,
                }
            }
            debug!("scheduler leadership event loop exited");
        });
        *inner.event_loop.lock().expect("event loop poisoned") = Some(event_loop);

        inner
            .lock_manager
            .acquire_lock_async(&inner.config.lock_name, events_tx)
            .await;
        Ok(())
    }

    /// Stops the scheduler: cancels leader election, unschedules installed
    /// jobs, purges this node's audit rows, and shuts the tick workers
    /// down. Idempotent.
    pub async fn stop(&self) {
        let inner = &self.inner;
        if !inner.started.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(
            pg_cron_available = inner.pg_cron_available.load(Ordering::SeqCst),
            "stopping scheduler"
        );

        if inner.lock_acquired.load(Ordering::SeqCst) {
            // Advisory table only; a successor leader repopulates it. This
            // may race with that successor's own sweep.
            if let Err(err) = inner.executor_repo.delete_all().await {
                log_absorbed(&err, "failed to clear executor audit rows during stop");
            }
        }

        inner
            .lock_manager
            .cancel_async_lock_acquiring(&inner.config.lock_name)
            .await;
        inner.lock_acquired.store(false, Ordering::SeqCst);

        inner.unschedule_pg_cron_jobs().await;
        inner.unschedule_executor_jobs().await;

        if let Some(permits) = inner
            .tick_permits
            .lock()
            .expect("tick permits poisoned")
            .take()
        {
            permits.close();
        }
        if let Some(handle) = inner.event_loop.lock().expect("event loop poisoned").take() {
            handle.abort();
        }
        info!("stopped scheduler");
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Whether `pg_cron` was found installed AND preloaded during the last
    /// start. Fixed for the lifetime of a start cycle.
    pub fn is_pg_cron_available(&self) -> bool {
        self.inner.pg_cron_available.load(Ordering::SeqCst)
    }

    /// Whether this instance currently believes it is the leader.
    pub fn is_lock_acquired(&self) -> bool {
        self.inner.lock_acquired.load(Ordering::SeqCst)
    }

    pub fn lock_name(&self) -> &LockName {
        &self.inner.config.lock_name
    }

    /// Identity of this scheduler instance, as stamped into audit rows.
    pub fn scheduler_id(&self) -> Uuid {
        self.inner.scheduler_id
    }

    /// Registers a pg_cron job. Installed immediately when this node is
    /// leader and `pg_cron` is available; queued otherwise. Duplicate names
    /// are ignored.
    ///
    /// The job's function name, cron expression, and arguments end up
    /// inlined in the stored cron command (the function name is validated
    /// as a first line of defense); derive them only from trusted sources.
    pub async fn schedule_pg_cron_job(&self, job: PgCronJob) {
        let inner = &self.inner;
        {
            let mut jobs = inner.pg_cron_jobs.lock().expect("pg_cron jobs poisoned");
            if jobs.iter().any(|existing| existing.name == job.name) {
                info!(job = %job.name, "pg_cron job already registered");
                return;
            }
            debug!(job = %job.name, "registering pg_cron job");
            jobs.push(job.clone());
        }

        let started = inner.started.load(Ordering::SeqCst);
        let available = inner.pg_cron_available.load(Ordering::SeqCst);
        let leader = inner.lock_acquired.load(Ordering::SeqCst);
        if started && available && leader {
            inner.schedule_pg_cron_job_internal(&job).await;
        } else if started && !available {
            warn!(job = %job.name, "cannot schedule job: scheduler is started but pg_cron is not available");
        } else {
            info!(
                job = %job.name,
                started,
                pg_cron_available = available,
                lock_acquired = leader,
                "job queued until this node becomes leader"
            );
        }
    }

    /// Registers an in-process job. Installed immediately when this node is
    /// leader; queued otherwise. Duplicate names are ignored.
    pub async fn schedule_executor_job(&self, job: ExecutorJob) {
        let inner = &self.inner;
        {
            let mut jobs = inner.executor_jobs.lock().expect("executor jobs poisoned");
            if jobs.iter().any(|existing| existing.name == job.name) {
                info!(job = %job.name, "executor job already registered");
                return;
            }
            debug!(job = %job.name, "registering executor job");
            jobs.push(job.clone());
        }

        let started = inner.started.load(Ordering::SeqCst);
        let leader = inner.lock_acquired.load(Ordering::SeqCst);
        if started && leader {
            SchedulerInner::schedule_executor_job_internal(inner, &job).await;
        } else {
            info!(
                job = %job.name,
                started,
                lock_acquired = leader,
                "job queued until this node becomes leader"
            );
        }
    }

    /// Best-effort cancellation of an installed pg_cron job by its
    /// `cron.job` id. Returns whether the job was unscheduled.
    pub async fn cancel_pg_cron_job(&self, job_id: i64) -> bool {
        let inner = &self.inner;
        debug!(job_id, "cancelling pg_cron job");
        match inner.pg_cron.unschedule(job_id).await {
            Ok(()) => {
                let removed_name = {
                    let mut ids = inner.pg_cron_job_ids.lock().expect("pg_cron ids poisoned");
                    let name = ids
                        .iter()
                        .find(|(_, id)| **id == job_id)
                        .map(|(name, _)| name.clone());
                    if let Some(name) = &name {
                        ids.remove(name);
                    }
                    name
                };
                if let Some(installed_name) = removed_name {
                    let logical = strip_instance_suffix(&installed_name);
                    inner
                        .pg_cron_jobs
                        .lock()
                        .expect("pg_cron jobs poisoned")
                        .retain(|job| job.name != logical);
                }
                true
            }
            Err(err) => {
                warn!(job_id, error = %err, "failed to unschedule pg_cron job");
                false
            }
        }
    }

    /// Best-effort cancellation of an installed executor job by its logical
    /// name. Returns whether an audit row was removed.
    pub async fn cancel_executor_job(&self, name: &str) -> bool {
        let inner = &self.inner;
        debug!(job = name, "cancelling executor job");
        let installed_name = instance_suffixed(name);
        match inner.executor_repo.delete_by_name(&installed_name).await {
            Ok(true) => {
                if let Some(handle) = inner
                    .executor_job_handles
                    .lock()
                    .expect("executor handles poisoned")
                    .remove(&installed_name)
                {
                    handle.abort();
                }
                inner
                    .executor_jobs
                    .lock()
                    .expect("executor jobs poisoned")
                    .retain(|job| job.name != name);
                true
            }
            Ok(false) => false,
            Err(err) => {
                warn!(job = name, error = %err, "failed to cancel executor job");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Observability reads. No lock required; results may lag the leader.
    // ------------------------------------------------------------------

    pub async fn fetch_pg_cron_entries(
        &self,
        offset: i64,
        limit: i64,
    ) -> SchedulerResult<Vec<PgCronEntry>> {
        if !self.is_pg_cron_available() {
            return Ok(Vec::new());
        }
        Ok(self.inner.pg_cron.fetch_pg_cron_entries(offset, limit).await?)
    }

    pub async fn get_total_pg_cron_entries(&self) -> SchedulerResult<i64> {
        if !self.is_pg_cron_available() {
            return Ok(0);
        }
        Ok(self.inner.pg_cron.get_total_pg_cron_entries().await?)
    }

    pub async fn fetch_pg_cron_job_run_details(
        &self,
        job_id: i64,
        offset: i64,
        limit: i64,
    ) -> SchedulerResult<Vec<PgCronJobRunDetails>> {
        if !self.is_pg_cron_available() {
            return Ok(Vec::new());
        }
        Ok(self
            .inner
            .pg_cron
            .fetch_pg_cron_job_run_details(job_id, offset, limit)
            .await?)
    }

    pub async fn get_total_pg_cron_job_run_details(&self, job_id: i64) -> SchedulerResult<i64> {
        if !self.is_pg_cron_available() {
            return Ok(0);
        }
        Ok(self
            .inner
            .pg_cron
            .get_total_pg_cron_job_run_details(job_id)
            .await?)
    }

    pub async fn fetch_executor_job_entries(
        &self,
        offset: i64,
        limit: i64,
    ) -> SchedulerResult<Vec<ExecutorJobEntry>> {
        Ok(self
            .inner
            .executor_repo
            .fetch_executor_job_entries(offset, limit)
            .await?)
    }

    pub async fn get_total_executor_job_entries(&self) -> SchedulerResult<i64> {
        Ok(self.inner.executor_repo.get_total_executor_job_entries().await?)
    }
}

impl SchedulerInner {
    /// Whether pg_cron is usable: extension installed AND a probe
    /// schedule/unschedule round trip succeeds without a not-loaded error.
    /// Never fails the caller; any fault degrades to `false`.
    async fn probe_pg_cron(&self) -> bool {
        let available = match postgres::is_extension_available(&self.pool, PG_CRON_EXTENSION).await
        {
            Ok(available) => available,
            Err(err) => {
                warn!(error = %err, "failed to determine pg_cron availability");
                return false;
            }
        };
        if !available {
            return false;
        }
        if let Err(err) = sqlx::query("CREATE EXTENSION IF NOT EXISTS pg_cron")
            .execute(&self.pool)
            .await
        {
            warn!(error = %err, "failed to ensure pg_cron extension");
            return false;
        }

        let probe = PgCronJob::new(PROBE_JOB_NAME, PROBE_FUNCTION_NAME, vec![], PROBE_SCHEDULE);
        let jobname = instance_suffixed(PROBE_JOB_NAME);
        match self.pg_cron.schedule(&probe, &jobname).await {
            Ok(job_id) => {
                if let Err(err) = self.pg_cron.unschedule(job_id).await {
                    debug!(error = %err, "failed to unschedule pg_cron probe job");
                }
                true
            }
            Err(SchedulerError::Sqlx(err)) if postgres::is_extension_not_loaded_error(&err) => {
                warn!(
                    "pg_cron is installed but not listed in shared_preload_libraries; disabling pg_cron support"
                );
                false
            }
            Err(err) => {
                warn!(error = %err, "failed to determine if pg_cron is loaded");
                false
            }
        }
    }

    async fn on_lock_acquired(this: &Arc<Self>) {
        info!(
            lock = %this.config.lock_name,
            "lock acquired; purging stale entries, then scheduling all jobs"
        );

        this.delete_jobs_with_instance_id().await;

        if this.pg_cron_available.load(Ordering::SeqCst) {
            let jobs = this
                .pg_cron_jobs
                .lock()
                .expect("pg_cron jobs poisoned")
                .clone();
            info!(count = jobs.len(), "scheduling pg_cron jobs");
            for job in &jobs {
                this.schedule_pg_cron_job_internal(job).await;
            }
        }

        let jobs = this
            .executor_jobs
            .lock()
            .expect("executor jobs poisoned")
            .clone();
        info!(count = jobs.len(), "scheduling executor jobs");
        for job in &jobs {
            SchedulerInner::schedule_executor_job_internal(this, job).await;
        }

        // Set last: registrations racing the sweep observe not-leader and
        // stay queued instead of double-installing.
        this.lock_acquired.store(true, Ordering::SeqCst);
    }

    async fn on_lock_released(&self) {
        info!(
            lock = %self.config.lock_name,
            "lock released; unscheduling all pg_cron and executor jobs"
        );
        self.lock_acquired.store(false, Ordering::SeqCst);

        self.unschedule_pg_cron_jobs().await;
        self.unschedule_executor_jobs().await;

        if let Err(err) = self.executor_repo.delete_all().await {
            log_absorbed(&err, "failed to clear executor audit rows on lock release");
        }
    }

    /// Purges rows (cron and audit) whose names end with this node's
    /// instance id. Runs on start AND again on every acquired sweep: the
    /// start-time purge can race a dying predecessor, the sweep one cannot.
    async fn delete_jobs_with_instance_id(&self) {
        let instance_id = network::instance_id();

        if self.pg_cron_available.load(Ordering::SeqCst) {
            if let Err(err) = self
                .pg_cron
                .delete_jobs_by_name_ending_with_instance_id(instance_id)
                .await
            {
                log_absorbed(&err, "failed to purge stale pg_cron jobs");
            }
        }

        if let Err(err) = self
            .executor_repo
            .delete_by_name_ending_with_instance_id(instance_id)
            .await
        {
            log_absorbed(&err, "failed to purge stale executor audit rows");
        }
    }

    async fn schedule_pg_cron_job_internal(&self, job: &PgCronJob) {
        let jobname = instance_suffixed(&job.name);
        match self.pg_cron.does_job_exist(&jobname).await {
            Ok(Some(_)) => {
                warn!(job = %job.name, "pg_cron job already installed");
            }
            Ok(None) => match self.pg_cron.schedule(job, &jobname).await {
                Ok(job_id) => {
                    info!(job = %job.name, job_id, "added pg_cron job");
                    self.pg_cron_job_ids
                        .lock()
                        .expect("pg_cron ids poisoned")
                        .insert(jobname, job_id);
                }
                // One job failing to install must not stop the sweep.
                Err(err) => {
                    warn!(job = %job.name, error = %err, "failed to schedule pg_cron job");
                }
            },
            Err(err) => {
                log_absorbed(&err, "failed to check for an existing pg_cron job");
            }
        }
    }

    async fn schedule_executor_job_internal(this: &Arc<Self>, job: &ExecutorJob) {
        let installed_name = instance_suffixed(&job.name);
        match this.executor_repo.exists_by_name(&installed_name).await {
            Ok(true) => {
                warn!(job = %job.name, "executor job already installed");
                return;
            }
            Ok(false) => {}
            Err(err) => {
                log_absorbed(&err, "failed to check for an existing executor job");
                return;
            }
        }

        let Some(permits) = this
            .tick_permits
            .lock()
            .expect("tick permits poisoned")
            .clone()
        else {
            // stop() raced us; the job stays registered for the next cycle.
            return;
        };

        let tick_inner = Arc::clone(this);
        let tick_job = job.clone();
        let tick_name = installed_name.clone();
        let handle = tokio::spawn(async move {
            run_tick_loop(tick_inner, tick_job, tick_name, permits).await;
        });
        this.executor_job_handles
            .lock()
            .expect("executor handles poisoned")
            .insert(installed_name.clone(), handle);

        if let Err(err) = this
            .executor_repo
            .insert(&installed_name, job, &network::host_name(), this.scheduler_id)
            .await
        {
            log_absorbed(&err, "failed to insert executor audit row");
        }
        info!(job = %job.name, "added executor job");
    }

    /// Unschedules every installed pg_cron job: by captured id first, then
    /// a purge by instance suffix in case an id was lost along the way.
    async fn unschedule_pg_cron_jobs(&self) {
        if !self.pg_cron_available.load(Ordering::SeqCst) {
            return;
        }
        let ids: Vec<(String, i64)> = {
            let mut map = self.pg_cron_job_ids.lock().expect("pg_cron ids poisoned");
            map.drain().collect()
        };
        for (jobname, job_id) in ids {
            if let Err(err) = self.pg_cron.unschedule(job_id).await {
                if postgres::is_io_error(&err) {
                    debug!(job = %jobname, job_id, error = %err, "failed to unschedule pg_cron job");
                } else {
                    warn!(job = %jobname, job_id, error = %err, "failed to unschedule pg_cron job");
                }
            }
        }
        if let Err(err) = self
            .pg_cron
            .delete_jobs_by_name_ending_with_instance_id(network::instance_id())
            .await
        {
            log_absorbed(&err, "failed to purge pg_cron jobs for this instance");
        }
    }

    /// Aborts all tick tasks, then purges this node's audit rows. Abort
    /// happens first so a cancelled tick cannot write a row back after the
    /// purge.
    async fn unschedule_executor_jobs(&self) {
        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut map = self
                .executor_job_handles
                .lock()
                .expect("executor handles poisoned");
            map.drain().collect()
        };
        for (name, handle) in handles {
            debug!(job = %name, "cancelling executor job tick loop");
            handle.abort();
        }
        if let Err(err) = self
            .executor_repo
            .delete_by_name_ending_with_instance_id(network::instance_id())
            .await
        {
            log_absorbed(&err, "failed to purge executor audit rows for this instance");
        }
    }
}

/// Fixed-rate tick loop for one executor job. Ticks are serialized per job;
/// overruns queue behind the previous tick. Ends when the permit pool is
/// closed (stop) or the task is aborted (lock release).
async fn run_tick_loop(
    inner: Arc<SchedulerInner>,
    job: ExecutorJob,
    installed_name: String,
    permits: Arc<Semaphore>,
) {
    tokio::time::sleep(job.fixed_delay.initial_delay).await;
    let mut ticker = tokio::time::interval(job.fixed_delay.period);
    loop {
        ticker.tick().await;
        let _permit = match permits.acquire().await {
            Ok(permit) => permit,
            // Permit pool closed: the scheduler is stopping.
            Err(_) => break,
        };
        if let Err(err) = inner.executor_repo.mark_tick(&installed_name).await {
            debug!(job = %job.name, error = %err, "failed to refresh executor audit row");
        }
        if let Err(err) = (job.task())().await {
            warn!(job = %job.name, error = ?err, "executor job failed; will run again on next tick");
        }
    }
    debug!(job = %job.name, "executor job tick loop exited");
}

/// `{name}-{instance_id}`: the form under which a job is installed by this
/// node.
fn instance_suffixed(name: &str) -> String {
    format!("{}-{}", name, network::instance_id())
}

/// Inverse of [`instance_suffixed`], tolerant of foreign names.
fn strip_instance_suffix(installed_name: &str) -> String {
    installed_name
        .strip_suffix(&format!("-{}", network::instance_id()))
        .unwrap_or(installed_name)
        .to_string()
}

fn log_absorbed(err: &sqlx::Error, what: &str) {
    if postgres::is_io_error(err) {
        debug!(error = %err, "{what}");
    } else {
        warn!(error = %err, "{what}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_suffix_round_trips() {
        let installed = instance_suffixed("ttl-orders");
        assert!(installed.starts_with("ttl-orders-"));
        assert!(installed.ends_with(network::instance_id()));
        assert_eq!(strip_instance_suffix(&installed), "ttl-orders");
    }

    #[test]
    fn strip_leaves_foreign_names_alone() {
        assert_eq!(
            strip_instance_suffix("ttl-orders-otherhost-deadbeef"),
            "ttl-orders-otherhost-deadbeef"
        );
    }

    #[test]
    fn default_config_has_at_least_one_worker() {
        let config = SchedulerConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.lock_name.as_str(), DEFAULT_LOCK_NAME);
    }
}
