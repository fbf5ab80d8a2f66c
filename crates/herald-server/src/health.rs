//! `/health` endpoint.

use std::time::Instant;

use chrono::{DateTime, Utc};
use herald_broker::BrokerStats;
use herald_telemetry::MetricsSnapshot;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"degraded"` while the broker is unreachable.
    pub status: String,
    pub started_at: DateTime<Utc>,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Streams currently forwarding events.
    pub active_streams: u64,
    /// Broker subscription handles not yet released.
    pub broker_open_handles: usize,
    pub channels: Vec<String>,
    pub broker: BrokerStats,
    pub metrics: MetricsSnapshot,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status == "ok"
    }
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    started_at: DateTime<Utc>,
    broker_available: bool,
    broker: BrokerStats,
    metrics: MetricsSnapshot,
    channels: Vec<String>,
) -> HealthResponse {
    HealthResponse {
        status: if broker_available { "ok" } else { "degraded" }.into(),
        started_at,
        uptime_secs: start_time.elapsed().as_secs(),
        active_streams: metrics.streams_active,
        broker_open_handles: broker.open_handles,
        channels,
        broker,
        metrics,
    }
}
