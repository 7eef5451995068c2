//! Distributed single-leader election interface.
//!
//! The scheduler does not implement fenced locking itself; it consumes an
//! implementation through [`FencedLockManager`]. Leadership transitions are
//! delivered as [`LockEvent`]s on an mpsc channel owned by the consumer,
//! which linearizes them on a single task regardless of which thread the
//! lock driver produced them on.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Name of a distributed lock. Exactly one holder exists per name across
/// the cluster at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockName(String);

impl LockName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LockName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Leadership transition for an asynchronously contended lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEvent {
    /// This contender now holds the lock.
    Acquired,
    /// This contender no longer holds the lock (IO fault, eviction, or
    /// explicit cancellation).
    Released,
}

/// Asynchronous single-leader election keyed by lock name.
///
/// Contract:
/// - `acquire_lock_async` starts a background contender that keeps
///   competing for the lock until cancelled. Every transition is reported
///   on `events`; `Acquired`/`Released` may interleave any number of times
///   over a contender's lifetime.
/// - Exactly one contender across all processes holds a given lock name at
///   any instant.
/// - Events may be produced from any task or thread; consumers must not
///   assume same-task delivery.
/// - `cancel_async_lock_acquiring` withdraws the contender, releasing the
///   lock (with a final `Released` event) if currently held, and drops the
///   event sender.
#[async_trait]
pub trait FencedLockManager: Send + Sync {
    async fn acquire_lock_async(&self, lock_name: &LockName, events: mpsc::Sender<LockEvent>);

    async fn cancel_async_lock_acquiring(&self, lock_name: &LockName);
}
