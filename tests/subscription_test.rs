//! Integration tests for durable subscriptions.
//!
//! Skip unless `PGBEAT_TEST_DATABASE_URL` is set. Events come from the
//! harness's in-memory polling store; durability of the resume point is
//! exercised against the real `durable_subscription_resume_points` table.


use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serial_test::serial;
use sqlx::PgPool;

use harness::{connect_test_database, test_event, wait_until, InMemoryEventStore};
use pgbeat::{
    AggregateType, BatchedEventHandler, BatchedSubscription, DurableSubscriptionRepository,
    EventStoreSubscription, GlobalEventOrder, PersistedEvent,
    PostgresDurableSubscriptionRepository, RetryBackoff, SubscriberId, SubscriptionConfig,
};

async fn cleanup(pool: &PgPool) {
    sqlx::query("DROP TABLE IF EXISTS durable_subscription_resume_points")
        .execute(pool)
        .await
        .expect("drop resume point table");
}

struct CollectingHandler {
    orders: StdMutex<Vec<i64>>,
    resets: AtomicUsize,
}

impl CollectingHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            orders: StdMutex::new(Vec::new()),
            resets: AtomicUsize::new(0),
        })
    }

    fn orders(&self) -> Vec<i64> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchedEventHandler for CollectingHandler {
    async fn handle_batch(&self, events: &[PersistedEvent]) -> anyhow::Result<()> {
        self.orders
            .lock()
            .unwrap()
            .extend(events.iter().map(|event| event.global_order.value()));
        Ok(())
    }

    async fn on_reset_from(&self, _order: GlobalEventOrder) -> anyhow::Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn quick_config() -> SubscriptionConfig {
    SubscriptionConfig {
        max_batch_size: 10,
        max_latency: Duration::from_millis(25),
        poll_batch_size: 25,
        poll_interval: Duration::from_millis(10),
        retry: RetryBackoff::no_retry(),
    }
}

async fn persisted_order(pool: &PgPool, subscriber_id: &str) -> Option<i64> {
    sqlx::query_scalar(
        r#"
        SELECT resume_from_and_including_global_order
        FROM durable_subscription_resume_points
        WHERE subscriber_id = $1
        "#,
    )
    .bind(subscriber_id)
    .fetch_optional(pool)
    .await
    .expect("read resume point")
}

#[tokio::test]
#[serial]
async fn resume_point_repository_creates_once_and_updates_on_save() {
    let Some(pool) = connect_test_database().await else {
        return;
    };
    cleanup(&pool).await;

    let repository = PostgresDurableSubscriptionRepository::new(pool.clone());
    repository.ensure_table().await.expect("ensure table");

    let subscriber = SubscriberId::new("repo-test");
    let aggregate = AggregateType::new("Orders");

    let created = repository
        .get_or_create_resume_point(&subscriber, &aggregate, GlobalEventOrder(10))
        .await
        .expect("create resume point");
    assert_eq!(created.resume_from_and_including, GlobalEventOrder(10));

    // A later initial order does not disturb the existing row.
    let fetched = repository
        .get_or_create_resume_point(&subscriber, &aggregate, GlobalEventOrder(999))
        .await
        .expect("fetch resume point");
    assert_eq!(fetched.resume_from_and_including, GlobalEventOrder(10));

    let mut updated = fetched;
    updated.resume_from_and_including = GlobalEventOrder(42);
    repository
        .save_resume_point(&updated)
        .await
        .expect("save resume point");
    assert_eq!(persisted_order(&pool, "repo-test").await, Some(42));
}

#[tokio::test]
#[serial]
async fn subscription_resumes_and_resets_against_durable_storage() {
    let Some(pool) = connect_test_database().await else {
        return;
    };
    cleanup(&pool).await;

    let repository = Arc::new(PostgresDurableSubscriptionRepository::new(pool.clone()));
    repository.ensure_table().await.expect("ensure table");

    let (store, events) = InMemoryEventStore::new();
    let handler = CollectingHandler::new();
    let subscription = BatchedSubscription::new(
        Arc::new(store),
        Arc::clone(&repository) as Arc<dyn DurableSubscriptionRepository>,
        AggregateType::new("Orders"),
        SubscriberId::new("durable-projector"),
        GlobalEventOrder::FIRST,
        quick_config(),
        Arc::clone(&handler) as Arc<dyn BatchedEventHandler>,
    );

    // Deliver 1..=50, stop: persisted resume point is 51.
    events.lock().unwrap().extend((1..=50).map(test_event));
    subscription.start().await.expect("start subscription");
    {
        let handler = Arc::clone(&handler);
        wait_until(Duration::from_secs(10), move || {
            handler.orders().len() == 50
        })
        .await;
    }
    subscription.stop().await;
    assert_eq!(persisted_order(&pool, "durable-projector").await, Some(51));

    // Restart: nothing re-delivered; new events 51..=60 flow.
    subscription.start().await.expect("restart subscription");
    events.lock().unwrap().extend((51..=60).map(test_event));
    {
        let handler = Arc::clone(&handler);
        wait_until(Duration::from_secs(10), move || {
            handler.orders().len() == 60
        })
        .await;
    }
    assert_eq!(handler.orders(), (1..=60).collect::<Vec<_>>());

    // Reset to 25: handler notified, 25..=60 re-delivered.
    subscription
        .reset_from(GlobalEventOrder(25), Box::new(|_| {}))
        .await
        .expect("reset subscription");
    assert_eq!(persisted_order(&pool, "durable-projector").await, Some(25));
    assert_eq!(handler.resets.load(Ordering::SeqCst), 1);
    {
        let handler = Arc::clone(&handler);
        wait_until(Duration::from_secs(10), move || {
            handler.orders().len() == 96
        })
        .await;
    }
    assert_eq!(&handler.orders()[60..], (25..=60).collect::<Vec<_>>().as_slice());

    subscription.stop().await;
    assert_eq!(persisted_order(&pool, "durable-projector").await, Some(61));
}
