//! Event store interface consumed by subscriptions.
//!
//! The store itself (persistence, polling SQL, back-pressure) lives
//! elsewhere; subscriptions only need a cold, demand-driven stream of
//! [`PersistedEvent`]s ordered by [`GlobalEventOrder`].

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Monotonically increasing position of a persisted event in the global
/// event stream for an aggregate type. Totally ordered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GlobalEventOrder(pub i64);

impl GlobalEventOrder {
    /// Order of the first event ever persisted.
    pub const FIRST: GlobalEventOrder = GlobalEventOrder(1);

    pub fn value(self) -> i64 {
        self.0
    }

    /// The order immediately after this one.
    pub fn next(self) -> GlobalEventOrder {
        GlobalEventOrder(self.0 + 1)
    }
}

impl fmt::Display for GlobalEventOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! string_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

string_newtype! {
    /// Logical stream an event belongs to (e.g. `Orders`).
    AggregateType
}

string_newtype! {
    /// Identity of a subscriber; combined with [`AggregateType`] it keys a
    /// durable resume point.
    SubscriberId
}

string_newtype! {
    /// Tenant discriminator for multi-tenant stores.
    Tenant
}

/// An event as persisted in the store, positioned by its global order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEvent {
    pub global_order: GlobalEventOrder,
    pub aggregate_type: AggregateType,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub tenant: Option<Tenant>,
    pub occurred_at: DateTime<Utc>,
}

/// Polling access to the global event stream.
pub trait EventStore: Send + Sync {
    /// Returns a cold stream of events for `aggregate_type` starting at
    /// `from_and_including`, in ascending global order.
    ///
    /// The stream polls forever: when it reaches the head it waits
    /// `poll_interval` and polls again, fetching at most `poll_batch_size`
    /// events per round trip. When `only_include_events_for_tenant` is set,
    /// events for other tenants are filtered out (their orders are simply
    /// absent from the stream). `subscriber_id` is passed through for
    /// store-side bookkeeping; this crate attaches no meaning to it.
    #[allow(clippy::too_many_arguments)]
    fn poll_events(
        &self,
        aggregate_type: &AggregateType,
        from_and_including: GlobalEventOrder,
        poll_batch_size: usize,
        poll_interval: Duration,
        only_include_events_for_tenant: Option<&Tenant>,
        subscriber_id: &SubscriberId,
    ) -> BoxStream<'static, PersistedEvent>;
}
