//! Broadcast core
//!
//! The fanout routes byte chunks from the single upstream producer to every
//! downstream session. Each subscriber owns a private bounded queue; publish
//! never waits on any of them.
//!
//! # Architecture
//!
//! ```text
//!                    Fanout (Arc<Inner>)
//!              ┌──────────────────────────────┐
//!              │ subscribers: Mutex<HashMap<  │
//!              │   SubscriberId,              │
//!              │   mpsc::Sender<Bytes>,       │
//!              │ >>                           │
//!              └──────────────┬───────────────┘
//!                             │ try_send (never blocks)
//!         ┌───────────────────┼───────────────────┐
//!         ▼                   ▼                   ▼
//!   [Subscription]      [Subscription]      [Subscription]
//!    rx.recv()           rx.recv()           queue full → evicted
//!         │                   │
//!         └──► session ──► TCP write
//! ```
//!
//! # Slow subscribers
//!
//! The stream carries no framing, so a subscriber that misses a chunk cannot
//! resynchronise. A subscriber whose queue is full is therefore evicted, not
//! skipped: its sender is dropped, its receiver drains what was already queued
//! and then observes termination.
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` is reference counted, so every queue holds a handle to the
//! same allocation made by the upstream read.

mod subscription;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::stats::RelayStats;

pub use subscription::{SubscriberId, Subscription};

/// Default per-subscriber queue capacity, in chunks
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Broadcast hub shared by the upstream client and all downstream sessions
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Clone)]
pub struct Fanout {
    inner: Arc<Inner>,
}

struct Inner {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Bytes>>>,
    next_id: AtomicU64,
    capacity: usize,
    stats: Arc<RelayStats>,
}

impl Fanout {
    /// Create a fanout with the default queue capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY, Arc::new(RelayStats::new()))
    }

    /// Create a fanout with a custom queue capacity, reporting into `stats`
    pub fn with_capacity(capacity: usize, stats: Arc<RelayStats>) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                stats,
            }),
        }
    }

    /// Per-subscriber queue capacity
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Statistics this fanout reports into
    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.inner.stats
    }

    /// Register a new subscriber
    ///
    /// The subscription observes only chunks published after this call returns.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.capacity);

        let count = {
            let mut subs = self.lock();
            subs.insert(id, tx);
            subs.len()
        };

        tracing::debug!(subscriber = %id, subscribers = count, "Subscriber added");

        Subscription::new(id, rx, self.clone())
    }

    /// Deregister a subscriber
    ///
    /// Idempotent. Returns `true` if the subscriber was still registered.
    /// A receiver blocked on the subscription wakes up with termination once
    /// it has drained already queued chunks.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = %id, "Subscriber removed");
        }
        removed
    }

    /// Deliver `chunk` to every current subscriber
    ///
    /// Never waits: a subscriber whose queue is full is evicted. Returns the
    /// number of subscribers the chunk was queued for.
    pub fn publish(&self, chunk: Bytes) -> usize {
        let mut delivered = 0;
        let mut full = Vec::new();
        let mut closed = Vec::new();

        let mut subs = self.lock();
        for (id, tx) in subs.iter() {
            match tx.try_send(chunk.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => full.push(*id),
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in full.iter().chain(&closed) {
            subs.remove(id);
        }
        drop(subs);

        for id in &full {
            tracing::warn!(
                subscriber = %id,
                capacity = self.inner.capacity,
                "Subscriber queue full, evicting"
            );
            self.inner.stats.record_eviction();
        }

        self.inner.stats.record_published();
        delivered
    }

    /// Number of currently registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<Bytes>>> {
        // The map holds no invariant a panicking holder could break
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Fanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fanout")
            .field("capacity", &self.inner.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
