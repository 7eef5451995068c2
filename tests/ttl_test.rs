//! Integration tests for the TTL manager.
//!
//! Skip unless `PGBEAT_TEST_DATABASE_URL` is set.


use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use sqlx::PgPool;

use harness::{connect_test_database, wait_until_async, LockRegistry};
use pgbeat::{
    DefaultTtlJobAction, FixedDelay, ScheduleConfiguration, Scheduler, SchedulerConfig,
    TtlJobAction, TtlJobDefinition, TtlManager, DEFAULT_TTL_FUNCTION_NAME,
};

async fn cleanup(pool: &PgPool) {
    sqlx::query("DROP TABLE IF EXISTS executor_scheduled_job")
        .execute(pool)
        .await
        .expect("drop audit table");
    sqlx::query("DROP TABLE IF EXISTS ttl_rows")
        .execute(pool)
        .await
        .expect("drop ttl_rows");
}

async fn seed_ttl_rows(pool: &PgPool) {
    sqlx::query("CREATE TABLE ttl_rows (id BIGSERIAL PRIMARY KEY, created_at TIMESTAMPTZ NOT NULL)")
        .execute(pool)
        .await
        .expect("create ttl_rows");
    // 3 expired, 2 fresh.
    sqlx::query(
        "INSERT INTO ttl_rows (created_at) SELECT now() - interval '2 hours' FROM generate_series(1, 3)",
    )
    .execute(pool)
    .await
    .expect("seed expired rows");
    sqlx::query("INSERT INTO ttl_rows (created_at) SELECT now() FROM generate_series(1, 2)")
        .execute(pool)
        .await
        .expect("seed fresh rows");
}

async fn start_scheduler(pool: &PgPool, lock_name: &str) -> Scheduler {
    let registry = LockRegistry::new();
    let scheduler = Scheduler::new(
        pool.clone(),
        LockRegistry::manager(&registry),
        SchedulerConfig {
            workers: 2,
            lock_name: lock_name.into(),
        },
    );
    scheduler.start().await.expect("start scheduler");
    wait_until_async(Duration::from_secs(5), || {
        let scheduler = scheduler.clone();
        async move { scheduler.is_lock_acquired() }
    })
    .await;
    scheduler
}

#[tokio::test]
#[serial]
async fn ttl_job_deletes_only_expired_rows() {
    let Some(pool) = connect_test_database().await else {
        return;
    };
    cleanup(&pool).await;
    seed_ttl_rows(&pool).await;

    let scheduler = start_scheduler(&pool, "ttl-fixed-delay").await;
    let manager = TtlManager::new(scheduler.clone(), pool.clone());

    let action = DefaultTtlJobAction::new("ttl_rows", "created_at < now() - interval '1 hour'")
        .expect("valid ttl action");
    manager
        .schedule_ttl_job(TtlJobDefinition::new(
            Arc::new(action),
            ScheduleConfiguration::fixed_delay(FixedDelay::new(
                Duration::from_millis(200),
                Duration::from_millis(500),
            )),
        ))
        .await
        .expect("register ttl job");
    manager.start().await.expect("start ttl manager");

    let count_pool = pool.clone();
    wait_until_async(Duration::from_secs(15), move || {
        let pool = count_pool.clone();
        async move {
            let count: i64 = sqlx::query_scalar("SELECT count(*) FROM ttl_rows")
                .fetch_one(&pool)
                .await
                .expect("count ttl rows");
            count == 2
        }
    })
    .await;

    // Only the fresh rows survive, and they keep surviving further ticks.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM ttl_rows")
        .fetch_one(&pool)
        .await
        .expect("count ttl rows");
    assert_eq!(count, 2);

    manager.stop();
    scheduler.stop().await;
}

#[tokio::test]
#[serial]
async fn start_installs_the_delete_function() {
    let Some(pool) = connect_test_database().await else {
        return;
    };
    cleanup(&pool).await;

    let scheduler = start_scheduler(&pool, "ttl-function").await;
    let manager = TtlManager::new(scheduler.clone(), pool.clone());
    manager.start().await.expect("start ttl manager");

    let installed: bool =
        sqlx::query_scalar("SELECT exists(SELECT 1 FROM pg_proc WHERE proname = $1)")
            .bind(DEFAULT_TTL_FUNCTION_NAME)
            .fetch_one(&pool)
            .await
            .expect("check function");
    assert!(installed);

    // Idempotent: a second start (or re-install) is fine.
    manager.stop();
    manager.start().await.expect("restart ttl manager");

    scheduler.stop().await;
}

#[tokio::test]
#[serial]
async fn cron_schedule_falls_back_to_fixed_delay_without_pg_cron() {
    let Some(pool) = connect_test_database().await else {
        return;
    };
    cleanup(&pool).await;

    let scheduler = start_scheduler(&pool, "ttl-fallback").await;
    if scheduler.is_pg_cron_available() {
        eprintln!("skipping test: pg_cron is available, fallback path not reachable");
        scheduler.stop().await;
        return;
    }
    seed_ttl_rows(&pool).await;

    let manager = TtlManager::new(scheduler.clone(), pool.clone());
    let action = DefaultTtlJobAction::new("ttl_rows", "created_at < now() - interval '1 hour'")
        .expect("valid ttl action");
    let job_name = action.job_name().to_string();
    manager
        .schedule_ttl_job(TtlJobDefinition::new(
            Arc::new(action),
            // Cron schedule with a fast fallback: without pg_cron the job
            // must run in-process on the fallback period.
            ScheduleConfiguration::cron_with_fallback(
                "*/1 * * * *",
                FixedDelay::new(Duration::from_millis(200), Duration::from_millis(500)),
            ),
        ))
        .await
        .expect("register ttl job");
    manager.start().await.expect("start ttl manager");

    let count_pool = pool.clone();
    wait_until_async(Duration::from_secs(15), move || {
        let pool = count_pool.clone();
        async move {
            let count: i64 = sqlx::query_scalar("SELECT count(*) FROM ttl_rows")
                .fetch_one(&pool)
                .await
                .expect("count ttl rows");
            count == 2
        }
    })
    .await;

    // The fallback runs as an executor job audited under this instance.
    let entries = scheduler
        .fetch_executor_job_entries(0, 10)
        .await
        .expect("fetch audit rows");
    assert_eq!(entries.len(), 1);
    assert!(entries[0].name.starts_with(&job_name));
    assert!(entries[0].name.ends_with(pgbeat::network::instance_id()));

    manager.stop();
    scheduler.stop().await;
}
