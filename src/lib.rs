//! pgbeat - PostgreSQL-backed scheduling and durable subscription primitives
//!
//! This crate provides the infrastructure layer shared by higher-level
//! event-sourcing and messaging components. The key pieces are:
//!
//! ## Scheduling
//!
//! - [`Scheduler`]: cluster-coordinated job scheduler. A fenced lock elects
//!   one leader per lock name; only the leader installs and runs jobs,
//!   either as `pg_cron` rows or as in-process fixed-rate tasks.
//! - [`TtlManager`]: periodic DELETE-by-predicate jobs against user
//!   tables, built on the scheduler.
//!
//! ## Subscriptions
//!
//! - [`BatchedSubscription`]: non-exclusive batched catch-up subscription
//!   over an event store, with a durable resume point and in-place reset.
//!
//! ## Foundation
//!
//! - [`postgres`]: identifier validation (first line of defense against
//!   SQL injection in identifier positions) and error classification.
//! - [`lock`]: the fenced-lock interface the scheduler consumes.
//! - [`config`]: environment-based configuration.

pub mod config;
pub mod eventstore;
pub mod lock;
pub mod network;
pub mod postgres;
pub mod retry;
pub mod scheduler;
pub mod subscription;
pub mod ttl;

// Configuration
pub use config::{Config, DEFAULT_LOCK_NAME};

// Leader election
pub use lock::{FencedLockManager, LockEvent, LockName};

// Scheduler
pub use scheduler::{
    ExecutorJob, ExecutorJobEntry, ExecutorScheduledJobRepository, FixedDelay, PgCronEntry,
    PgCronJob, PgCronJobRunDetails, PgCronRepository, Scheduler, SchedulerConfig, SchedulerError,
    SchedulerResult,
};

// TTL
pub use ttl::{
    DefaultTtlJobAction, FunctionCall, ScheduleConfiguration, TtlJobAction, TtlJobDefinition,
    TtlManager, DEFAULT_TTL_FUNCTION_NAME,
};

// Event store interface
pub use eventstore::{
    AggregateType, EventStore, GlobalEventOrder, PersistedEvent, SubscriberId, Tenant,
};

// Subscriptions
pub use subscription::{
    BatchedEventHandler, BatchedSubscription, DurableSubscriptionRepository,
    EventStoreSubscription, PostgresDurableSubscriptionRepository, SubscriptionConfig,
    SubscriptionError, SubscriptionResult, SubscriptionResumePoint, UnsubscribeCallback,
};

// Retry policies
pub use retry::{Backoff, RetryBackoff};
