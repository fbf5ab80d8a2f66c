use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Why a stream ended, at the granularity metrics care about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseCause {
    /// Client went away or a write to it failed.
    Client,
    /// Broker connection ended, was lost, or delivered bad data.
    Broker,
    /// Process shutdown.
    Shutdown,
}

/// Process-wide stream counters. Lock-free; shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    streams_opened: AtomicU64,
    streams_active: AtomicU64,
    streams_rejected: AtomicU64,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    closed_by_client: AtomicU64,
    closed_by_broker: AtomicU64,
    closed_by_shutdown: AtomicU64,
    publishes: AtomicU64,
    publish_failures: AtomicU64,
}

/// Point-in-time copy of [`StreamMetrics`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub streams_opened: u64,
    pub streams_active: u64,
    pub streams_rejected: u64,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub closed_by_client: u64,
    pub closed_by_broker: u64,
    pub closed_by_shutdown: u64,
    pub publishes: u64,
    pub publish_failures: u64,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_open(&self) {
        let _ = self.streams_opened.fetch_add(1, Ordering::Relaxed);
        let _ = self.streams_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close(&self, cause: CloseCause) {
        let _ = self
            .streams_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        let counter = match cause {
            CloseCause::Client => &self.closed_by_client,
            CloseCause::Broker => &self.closed_by_broker,
            CloseCause::Shutdown => &self.closed_by_shutdown,
        };
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }

    /// A stream request that never got past negotiation or priming.
    pub fn record_rejected(&self) {
        let _ = self.streams_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame(&self, len: usize) {
        let _ = self.frames_sent.fetch_add(1, Ordering::Relaxed);
        let _ = self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_publish(&self, ok: bool) {
        let counter = if ok { &self.publishes } else { &self.publish_failures };
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_streams(&self) -> u64 {
        self.streams_active.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            streams_active: self.streams_active.load(Ordering::Relaxed),
            streams_rejected: self.streams_rejected.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            closed_by_client: self.closed_by_client.load(Ordering::Relaxed),
            closed_by_broker: self.closed_by_broker.load(Ordering::Relaxed),
            closed_by_shutdown: self.closed_by_shutdown.load(Ordering::Relaxed),
            publishes: self.publishes.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}
