//! Relay-wide statistics
//!
//! Counters are plain atomics updated on the hot path with relaxed ordering;
//! readers take a [`StatsSnapshot`] which is only approximately consistent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Live counters shared by every component of one relay
#[derive(Debug)]
pub struct RelayStats {
    started_at: Instant,
    upstream_connects: AtomicU64,
    upstream_dial_failures: AtomicU64,
    bytes_received: AtomicU64,
    chunks_published: AtomicU64,
    evictions: AtomicU64,
    sessions_accepted: AtomicU64,
    sessions_active: AtomicU64,
    bytes_sent: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            upstream_connects: AtomicU64::new(0),
            upstream_dial_failures: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            chunks_published: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            sessions_accepted: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_connect(&self) {
        self.upstream_connects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dial_failure(&self) {
        self.upstream_dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self) {
        self.chunks_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a new session as active until the returned guard is dropped
    pub(crate) fn session_opened(self: &Arc<Self>) -> ActiveSession {
        self.sessions_accepted.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
        ActiveSession(Arc::clone(self))
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.started_at.elapsed(),
            upstream_connects: self.upstream_connects.load(Ordering::Relaxed),
            upstream_dial_failures: self.upstream_dial_failures.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            chunks_published: self.chunks_published.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            sessions_accepted: self.sessions_accepted.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one session counted as active; aborted sessions are released too
#[derive(Debug)]
pub(crate) struct ActiveSession(Arc<RelayStats>);

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub upstream_connects: u64,
    pub upstream_dial_failures: u64,
    pub bytes_received: u64,
    pub chunks_published: u64,
    pub evictions: u64,
    pub sessions_accepted: u64,
    pub sessions_active: u64,
    pub bytes_sent: u64,
}

impl StatsSnapshot {
    /// Average inbound bitrate in bits per second
    pub fn inbound_bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "uptime_seconds {}", self.uptime.as_secs())?;
        writeln!(f, "upstream_connects {}", self.upstream_connects)?;
        writeln!(f, "upstream_dial_failures {}", self.upstream_dial_failures)?;
        writeln!(f, "bytes_received {}", self.bytes_received)?;
        writeln!(f, "inbound_bitrate {}", self.inbound_bitrate())?;
        writeln!(f, "chunks_published {}", self.chunks_published)?;
        writeln!(f, "evictions {}", self.evictions)?;
        writeln!(f, "sessions_accepted {}", self.sessions_accepted)?;
        writeln!(f, "sessions_active {}", self.sessions_active)?;
        writeln!(f, "bytes_sent {}", self.bytes_sent)
    }
}
