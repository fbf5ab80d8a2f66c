use async_trait::async_trait;
use herald_core::{Channel, Result};
use serde::{Deserialize, Serialize};

use crate::source::EventSource;

/// Broker connection configuration, passed explicitly at construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Messages buffered per subscriber connection before the bus drops
    /// that connection.
    pub subscriber_buffer: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 1024,
        }
    }
}

/// Live counters reported by a broker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// Successful `subscribe` calls since start.
    pub subscribe_calls: u64,
    /// Subscription handles acquired and not yet released.
    pub open_handles: usize,
    /// Subscription handles released since start.
    pub released_handles: u64,
    /// Messages accepted by `publish` since start.
    pub published: u64,
}

/// Connection to the shared publish/subscribe bus.
///
/// Implementations must be safe to call concurrently from many producers
/// and sessions, and must deliver messages published on one channel to all
/// of that channel's subscribers in the same order.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `payload` on `channel`. Fire-and-forget: returns how many
    /// subscriber connections the message was handed to.
    ///
    /// Fails with `BrokerUnavailable` if the bus cannot be reached and with
    /// `InvalidPayload` if the payload cannot be framed. Never retried here.
    async fn publish(&self, channel: &Channel, payload: &str) -> Result<usize>;

    /// Open a dedicated receive handle for exactly `channels`.
    async fn subscribe(&self, channels: &[Channel]) -> Result<EventSource>;

    /// Whether the bus currently accepts publishes and subscriptions.
    fn is_available(&self) -> bool;

    fn stats(&self) -> BrokerStats;
}
