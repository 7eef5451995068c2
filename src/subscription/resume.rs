//! Durable resume points for catch-up subscriptions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use crate::eventstore::{AggregateType, GlobalEventOrder, SubscriberId};

use super::SubscriptionResult;

/// Where a subscriber resumes reading a stream: the next event delivered is
/// the one at `resume_from_and_including`.
///
/// Created on first subscribe from a caller-provided initial order; mutated
/// only by the subscription that owns it; monotonic nondecreasing except
/// through an explicit reset.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionResumePoint {
    pub subscriber_id: SubscriberId,
    pub aggregate_type: AggregateType,
    pub resume_from_and_including: GlobalEventOrder,
    pub last_updated: DateTime<Utc>,
}

/// Storage for [`SubscriptionResumePoint`]s, keyed by
/// (subscriber id, aggregate type).
#[async_trait]
pub trait DurableSubscriptionRepository: Send + Sync {
    /// Fetches the resume point, creating it at `on_first_subscribe_from`
    /// if this subscriber has never been seen.
    async fn get_or_create_resume_point(
        &self,
        subscriber_id: &SubscriberId,
        aggregate_type: &AggregateType,
        on_first_subscribe_from: GlobalEventOrder,
    ) -> SubscriptionResult<SubscriptionResumePoint>;

    async fn save_resume_point(
        &self,
        resume_point: &SubscriptionResumePoint,
    ) -> SubscriptionResult<()>;
}

/// Postgres-backed repository over `durable_subscription_resume_points`.
#[derive(Clone)]
pub struct PostgresDurableSubscriptionRepository {
    pool: PgPool,
}

impl PostgresDurableSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Installs the resume-point table if missing.
    pub async fn ensure_table(&self) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS durable_subscription_resume_points (
                subscriber_id                          TEXT NOT NULL,
                aggregate_type                         TEXT NOT NULL,
                resume_from_and_including_global_order BIGINT NOT NULL,
                last_updated                           TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (subscriber_id, aggregate_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DurableSubscriptionRepository for PostgresDurableSubscriptionRepository {
    async fn get_or_create_resume_point(
        &self,
        subscriber_id: &SubscriberId,
        aggregate_type: &AggregateType,
        on_first_subscribe_from: GlobalEventOrder,
    ) -> SubscriptionResult<SubscriptionResumePoint> {
        // Insert-if-absent then read back; concurrent creators converge on
        // whichever row won.
        sqlx::query(
            r#"
            INSERT INTO durable_subscription_resume_points
                (subscriber_id, aggregate_type, resume_from_and_including_global_order)
            VALUES ($1, $2, $3)
            ON CONFLICT (subscriber_id, aggregate_type) DO NOTHING
            "#,
        )
        .bind(subscriber_id.as_str())
        .bind(aggregate_type.as_str())
        .bind(on_first_subscribe_from.value())
        .execute(&self.pool)
        .await?;

        let (order, last_updated): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            SELECT resume_from_and_including_global_order, last_updated
            FROM durable_subscription_resume_points
            WHERE subscriber_id = $1 AND aggregate_type = $2
            "#,
        )
        .bind(subscriber_id.as_str())
        .bind(aggregate_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(SubscriptionResumePoint {
            subscriber_id: subscriber_id.clone(),
            aggregate_type: aggregate_type.clone(),
            resume_from_and_including: GlobalEventOrder(order),
            last_updated,
        })
    }

    async fn save_resume_point(
        &self,
        resume_point: &SubscriptionResumePoint,
    ) -> SubscriptionResult<()> {
        debug!(
            subscriber = %resume_point.subscriber_id,
            aggregate = %resume_point.aggregate_type,
            resume_from = %resume_point.resume_from_and_including,
            "saving resume point"
        );
        sqlx::query(
            r#"
            INSERT INTO durable_subscription_resume_points
                (subscriber_id, aggregate_type, resume_from_and_including_global_order, last_updated)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (subscriber_id, aggregate_type) DO UPDATE SET
                resume_from_and_including_global_order = EXCLUDED.resume_from_and_including_global_order,
                last_updated                           = now()
            "#,
        )
        .bind(resume_point.subscriber_id.as_str())
        .bind(resume_point.aggregate_type.as_str())
        .bind(resume_point.resume_from_and_including.value())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
