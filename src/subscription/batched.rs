//! Non-exclusive batched asynchronous subscription.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::eventstore::{
    AggregateType, EventStore, GlobalEventOrder, PersistedEvent, SubscriberId, Tenant,
};
use crate::retry::RetryBackoff;

use super::{
    BatchedEventHandler, DurableSubscriptionRepository, EventStoreSubscription,
    SubscriptionConfig, SubscriptionResult, SubscriptionResumePoint, UnsubscribeCallback,
};

/// How long `stop` waits for in-flight batch callbacks to settle before
/// persisting the resume point.
const STOP_DRAIN_WINDOW: Duration = Duration::from_millis(500);

struct PullLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// A non-exclusive, batched, asynchronous catch-up subscription.
///
/// Events are pulled from the store's polling stream and buffered until
/// either `max_batch_size` events are pending or `max_latency` has elapsed
/// since the first pending event, whichever comes first; the batch is then
/// handed to the [`BatchedEventHandler`]. The resume cursor tracks the
/// highest acknowledged order plus one and is persisted on stop and reset
/// only — delivery is at-least-once after a crash.
///
/// Multiple instances may consume the same stream independently; nothing
/// here takes an exclusive lock.
pub struct BatchedSubscription {
    event_store: Arc<dyn EventStore>,
    repository: Arc<dyn DurableSubscriptionRepository>,
    aggregate_type: AggregateType,
    subscriber_id: SubscriberId,
    on_first_subscribe_from: GlobalEventOrder,
    only_include_events_for_tenant: Option<Tenant>,
    config: SubscriptionConfig,
    handler: Arc<dyn BatchedEventHandler>,
    unsubscribe_callback: Option<UnsubscribeCallback>,

    started: AtomicBool,
    /// Next order to resume from; shared with the pull loop.
    next_resume: Arc<AtomicI64>,
    resume_point: Mutex<Option<SubscriptionResumePoint>>,
    pull_loop: Mutex<Option<PullLoop>>,
}

impl BatchedSubscription {
    /// Panics if `config.max_batch_size` is 0.
    pub fn new(
        event_store: Arc<dyn EventStore>,
        repository: Arc<dyn DurableSubscriptionRepository>,
        aggregate_type: AggregateType,
        subscriber_id: SubscriberId,
        on_first_subscribe_from: GlobalEventOrder,
        config: SubscriptionConfig,
        handler: Arc<dyn BatchedEventHandler>,
    ) -> Self {
        assert!(
            config.max_batch_size > 0,
            "max_batch_size must be greater than 0"
        );
        Self {
            event_store,
            repository,
            aggregate_type,
            subscriber_id,
            on_first_subscribe_from,
            only_include_events_for_tenant: None,
            config,
            handler,
            unsubscribe_callback: None,
            started: AtomicBool::new(false),
            next_resume: Arc::new(AtomicI64::new(0)),
            resume_point: Mutex::new(None),
            pull_loop: Mutex::new(None),
        }
    }

    /// Restricts the subscription to events of one tenant.
    pub fn with_tenant_filter(mut self, tenant: Tenant) -> Self {
        self.only_include_events_for_tenant = Some(tenant);
        self
    }

    pub fn with_unsubscribe_callback(mut self, callback: UnsubscribeCallback) -> Self {
        self.unsubscribe_callback = Some(callback);
        self
    }

    async fn override_resume_point(&self, order: GlobalEventOrder) -> SubscriptionResult<()> {
        info!(
            subscriber = %self.subscriber_id,
            aggregate = %self.aggregate_type,
            resume_from = %order,
            "overriding resume point"
        );
        let resume_point = {
            let mut guard = self.resume_point.lock().await;
            let resume_point = match guard.as_mut() {
                Some(resume_point) => {
                    resume_point.resume_from_and_including = order;
                    resume_point.last_updated = chrono::Utc::now();
                    resume_point.clone()
                }
                None => {
                    let mut resume_point = self
                        .repository
                        .get_or_create_resume_point(
                            &self.subscriber_id,
                            &self.aggregate_type,
                            order,
                        )
                        .await?;
                    resume_point.resume_from_and_including = order;
                    *guard = Some(resume_point.clone());
                    resume_point
                }
            };
            self.next_resume.store(order.value(), Ordering::SeqCst);
            resume_point
        };
        self.repository.save_resume_point(&resume_point).await?;
        if let Err(err) = self.handler.on_reset_from(order).await {
            info!(
                subscriber = %self.subscriber_id,
                error = ?err,
                "handler failed to process reset notification"
            );
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventStoreSubscription for BatchedSubscription {
    fn subscriber_id(&self) -> &SubscriberId {
        &self.subscriber_id
    }

    fn aggregate_type(&self) -> &AggregateType {
        &self.aggregate_type
    }

    fn only_include_events_for_tenant(&self) -> Option<&Tenant> {
        self.only_include_events_for_tenant.as_ref()
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn is_active(&self) -> bool {
        self.is_started()
    }

    fn is_exclusive(&self) -> bool {
        false
    }

    fn is_in_transaction(&self) -> bool {
        false
    }

    async fn start(&self) -> SubscriptionResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(
                subscriber = %self.subscriber_id,
                aggregate = %self.aggregate_type,
                "subscription already started"
            );
            return Ok(());
        }

        info!(
            subscriber = %self.subscriber_id,
            aggregate = %self.aggregate_type,
            "looking up subscription resume point"
        );
        let resume_point = match self
            .repository
            .get_or_create_resume_point(
                &self.subscriber_id,
                &self.aggregate_type,
                self.on_first_subscribe_from,
            )
            .await
        {
            Ok(resume_point) => resume_point,
            Err(err) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };
        info!(
            subscriber = %self.subscriber_id,
            aggregate = %self.aggregate_type,
            resume_from = %resume_point.resume_from_and_including,
            "starting subscription"
        );

        self.next_resume
            .store(resume_point.resume_from_and_including.value(), Ordering::SeqCst);
        let stream = self.event_store.poll_events(
            &self.aggregate_type,
            resume_point.resume_from_and_including,
            self.config.poll_batch_size,
            self.config.poll_interval,
            self.only_include_events_for_tenant.as_ref(),
            &self.subscriber_id,
        );
        *self.resume_point.lock().await = Some(resume_point);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_pull_loop(
            stream,
            Arc::clone(&self.handler),
            self.config.max_batch_size,
            self.config.max_latency,
            self.config.retry,
            Arc::clone(&self.next_resume),
            shutdown_rx,
            self.subscriber_id.clone(),
            self.aggregate_type.clone(),
        ));
        *self.pull_loop.lock().await = Some(PullLoop {
            shutdown: shutdown_tx,
            handle,
        });
        Ok(())
    }

    async fn stop(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        info!(
            subscriber = %self.subscriber_id,
            aggregate = %self.aggregate_type,
            "stopping subscription"
        );

        if let Some(pull_loop) = self.pull_loop.lock().await.take() {
            let _ = pull_loop.shutdown.send(true);
            // Let in-flight callbacks settle; a loop that does not exit in
            // time is abandoned rather than waited on.
            let mut handle = pull_loop.handle;
            if tokio::time::timeout(STOP_DRAIN_WINDOW, &mut handle)
                .await
                .is_err()
            {
                debug!(
                    subscriber = %self.subscriber_id,
                    "pull loop did not settle within the drain window"
                );
                handle.abort();
            }
        }

        let mut guard = self.resume_point.lock().await;
        if let Some(resume_point) = guard.as_mut() {
            resume_point.resume_from_and_including =
                GlobalEventOrder(self.next_resume.load(Ordering::SeqCst));
            resume_point.last_updated = chrono::Utc::now();
            debug!(
                subscriber = %self.subscriber_id,
                resume_from = %resume_point.resume_from_and_including,
                "storing resume point"
            );
            if let Err(err) = self.repository.save_resume_point(resume_point).await {
                error!(
                    subscriber = %self.subscriber_id,
                    error = %err,
                    "failed to persist resume point during stop"
                );
            }
        }
        drop(guard);

        self.started.store(false, Ordering::SeqCst);
        info!(
            subscriber = %self.subscriber_id,
            aggregate = %self.aggregate_type,
            "stopped subscription"
        );
    }

    async fn reset_from(
        &self,
        order: GlobalEventOrder,
        processor: Box<dyn FnOnce(GlobalEventOrder) + Send>,
    ) -> SubscriptionResult<()> {
        let was_started = self.started.load(Ordering::SeqCst);
        if was_started {
            info!(
                subscriber = %self.subscriber_id,
                aggregate = %self.aggregate_type,
                resume_from = %order,
                "resetting resume point and restarting the subscriber"
            );
            self.stop().await;
        }
        self.override_resume_point(order).await?;
        processor(order);
        if was_started {
            self.start().await?;
        }
        Ok(())
    }

    async fn current_resume_point(&self) -> Option<SubscriptionResumePoint> {
        self.resume_point.lock().await.clone()
    }

    fn unsubscribe(&self) {
        info!(
            subscriber = %self.subscriber_id,
            aggregate = %self.aggregate_type,
            "initiating unsubscription"
        );
        if let Some(callback) = &self.unsubscribe_callback {
            callback(&self.subscriber_id, &self.aggregate_type);
        }
    }
}

/// Consumes the polling stream, batching by size or latency, and advances
/// the shared resume cursor as batches are acknowledged.
#[allow(clippy::too_many_arguments)]
async fn run_pull_loop(
    mut stream: BoxStream<'static, PersistedEvent>,
    handler: Arc<dyn BatchedEventHandler>,
    max_batch_size: usize,
    max_latency: Duration,
    retry: RetryBackoff,
    next_resume: Arc<AtomicI64>,
    mut shutdown: watch::Receiver<bool>,
    subscriber_id: SubscriberId,
    aggregate_type: AggregateType,
) {
    let mut pending: Vec<PersistedEvent> = Vec::with_capacity(max_batch_size);
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    deliver(&handler, &retry, &next_resume, &subscriber_id, &aggregate_type, &mut pending).await;
                    break;
                }
            }
            maybe_event = stream.next() => match maybe_event {
                Some(event) => {
                    if pending.is_empty() {
                        deadline = Some(Instant::now() + max_latency);
                    }
                    pending.push(event);
                    if pending.len() >= max_batch_size {
                        deliver(&handler, &retry, &next_resume, &subscriber_id, &aggregate_type, &mut pending).await;
                        deadline = None;
                    }
                }
                None => {
                    deliver(&handler, &retry, &next_resume, &subscriber_id, &aggregate_type, &mut pending).await;
                    break;
                }
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deliver(&handler, &retry, &next_resume, &subscriber_id, &aggregate_type, &mut pending).await;
                deadline = None;
            }
        }
    }
    debug!(
        subscriber = %subscriber_id,
        aggregate = %aggregate_type,
        "subscription pull loop exited"
    );
}

/// Delivers the pending batch, retrying per policy. A batch that exhausts
/// its retries is skipped: the cursor still advances past it, restoring
/// demand for the events after it.
async fn deliver(
    handler: &Arc<dyn BatchedEventHandler>,
    retry: &RetryBackoff,
    next_resume: &AtomicI64,
    subscriber_id: &SubscriberId,
    aggregate_type: &AggregateType,
    pending: &mut Vec<PersistedEvent>,
) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::take(pending);
    let mut attempt = 1u32;
    loop {
        match handler.handle_batch(&batch).await {
            Ok(()) => {
                trace!(
                    subscriber = %subscriber_id,
                    count = batch.len(),
                    "batch delivered"
                );
                break;
            }
            Err(err) => match retry.delay_after(attempt) {
                Some(delay) => {
                    warn!(
                        subscriber = %subscriber_id,
                        aggregate = %aggregate_type,
                        attempt,
                        error = ?err,
                        "batch delivery failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    error!(
                        subscriber = %subscriber_id,
                        aggregate = %aggregate_type,
                        count = batch.len(),
                        first_order = %batch[0].global_order,
                        error = ?err,
                        "skipping event batch after exhausting retries"
                    );
                    break;
                }
            },
        }
    }
    if let Some(max_order) = batch.iter().map(|event| event.global_order.value()).max() {
        next_resume.store(max_order + 1, Ordering::SeqCst);
    }
}
