//! Durable catch-up subscriptions over the event store.
//!
//! A subscription consumes an aggregate type's event stream from a
//! persisted resume point, delivering events to a handler and advancing
//! the resume point as batches are acknowledged. Delivery is at-least-once:
//! the resume point is persisted on stop and on reset, so a crash without a
//! clean stop re-delivers from the last persisted position.

mod batched;
mod resume;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::eventstore::{AggregateType, GlobalEventOrder, PersistedEvent, SubscriberId, Tenant};
use crate::retry::RetryBackoff;

pub use batched::BatchedSubscription;
pub use resume::{
    DurableSubscriptionRepository, PostgresDurableSubscriptionRepository, SubscriptionResumePoint,
};

/// Errors surfaced to subscription callers. Per-batch handler failures are
/// not errors at this level; they are retried and ultimately skipped.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

/// Receives events in groups of up to `max_batch_size` collected within
/// `max_latency`.
#[async_trait]
pub trait BatchedEventHandler: Send + Sync {
    /// Handles one batch. An error triggers the subscription's retry
    /// policy; once exhausted the batch is skipped.
    async fn handle_batch(&self, events: &[PersistedEvent]) -> anyhow::Result<()>;

    /// Called when the subscription's resume point is reset, before
    /// consumption restarts. Errors are logged, never propagated.
    async fn on_reset_from(&self, _order: GlobalEventOrder) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Called when a subscription unsubscribes, so an owning manager can drop
/// its registration.
pub type UnsubscribeCallback = Arc<dyn Fn(&SubscriberId, &AggregateType) + Send + Sync>;

/// Tuning for a batched subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Largest batch handed to the handler. Must be greater than 0.
    pub max_batch_size: usize,
    /// Ceiling on how long the first event of a pending batch waits before
    /// the batch is delivered regardless of size.
    pub max_latency: Duration,
    /// Events fetched from the store per poll round trip.
    pub poll_batch_size: usize,
    /// How long the store waits between polls at the stream head.
    pub poll_interval: Duration,
    /// Retry policy for failed batch deliveries.
    pub retry: RetryBackoff,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_latency: Duration::from_millis(250),
            poll_batch_size: 100,
            poll_interval: Duration::from_millis(100),
            retry: RetryBackoff::default(),
        }
    }
}

/// Common surface of event store subscriptions.
#[async_trait]
pub trait EventStoreSubscription: Send + Sync {
    fn subscriber_id(&self) -> &SubscriberId;

    fn aggregate_type(&self) -> &AggregateType;

    fn only_include_events_for_tenant(&self) -> Option<&Tenant>;

    fn is_started(&self) -> bool;

    /// Whether the subscription is consuming right now. For non-exclusive
    /// subscriptions this equals [`is_started`](Self::is_started).
    fn is_active(&self) -> bool;

    /// Whether this subscription requires exclusive (locked) access to the
    /// stream.
    fn is_exclusive(&self) -> bool;

    /// Whether event handling joins a surrounding transaction.
    fn is_in_transaction(&self) -> bool;

    async fn start(&self) -> SubscriptionResult<()>;

    async fn stop(&self);

    /// Rewinds (or fast-forwards) the subscription to `order`. When
    /// started, consumption is stopped, the resume point overridden and
    /// persisted, `processor` invoked, and consumption restarted; when
    /// stopped, the same minus the lifecycle.
    async fn reset_from(
        &self,
        order: GlobalEventOrder,
        processor: Box<dyn FnOnce(GlobalEventOrder) + Send>,
    ) -> SubscriptionResult<()>;

    async fn current_resume_point(&self) -> Option<SubscriptionResumePoint>;

    fn unsubscribe(&self);
}
