use std::sync::Arc;

use herald_broker::{Broker, BrokerMessage, EventSource};
use herald_core::event::validate_payload;
use herald_core::ids::SubscriberId;
use herald_core::{Channel, ChannelRegistry, Event, NotifyError, Result};

/// One subscriber's live subscription.
///
/// Owns the broker handle exclusively and numbers the events it hands out
/// `1, 2, 3, …` for as long as it lives.
#[derive(Debug)]
pub struct SubscriptionSession {
    subscriber: SubscriberId,
    channels: Vec<Channel>,
    registry: Arc<ChannelRegistry>,
    source: EventSource,
    next_sequence_id: u64,
}

impl SubscriptionSession {
    /// Resolve `channels` against the registry, then subscribe.
    ///
    /// An unknown channel fails with `InvalidChannel` before the broker is
    /// touched, so no handle is ever opened for a bad request.
    pub async fn open<S: AsRef<str>>(
        broker: &dyn Broker,
        registry: Arc<ChannelRegistry>,
        subscriber: SubscriberId,
        channels: &[S],
    ) -> Result<Self> {
        if channels.is_empty() {
            return Err(NotifyError::InvalidChannel("no channels requested".into()));
        }
        let channels = registry.resolve_all(channels)?;
        let source = broker.subscribe(&channels).await?;

        tracing::debug!(
            subscriber = %subscriber,
            handle = source.handle_id(),
            channels = ?channels.iter().map(Channel::as_str).collect::<Vec<_>>(),
            "subscription session opened"
        );

        Ok(Self {
            subscriber,
            channels,
            registry,
            source,
            next_sequence_id: 1,
        })
    }

    /// Wait for the next event.
    ///
    /// `Ok(None)` means the broker closed the connection. Cancel-safe: a
    /// dropped call never consumes a sequence id.
    pub async fn next_event(&mut self) -> Result<Option<Event>> {
        let Some(message) = self.source.next_message().await? else {
            return Ok(None);
        };
        self.decode(message).map(Some)
    }

    fn decode(&mut self, message: BrokerMessage) -> Result<Event> {
        let name = std::str::from_utf8(&message.channel)
            .map_err(|e| NotifyError::MalformedMessage(format!("channel is not UTF-8: {e}")))?;
        let channel = self
            .registry
            .resolve(name)
            .ok()
            .filter(|c| self.channels.contains(c))
            .ok_or_else(|| NotifyError::MalformedMessage(format!("unexpected channel {name}")))?;

        let payload = String::from_utf8(message.payload.to_vec())
            .map_err(|e| NotifyError::MalformedMessage(format!("payload is not UTF-8: {e}")))?;
        validate_payload(&payload).map_err(|e| NotifyError::MalformedMessage(e.to_string()))?;

        let sequence_id = self.next_sequence_id;
        self.next_sequence_id += 1;
        Ok(Event::new(channel, payload, sequence_id))
    }

    /// Release the broker handle. Idempotent; returns `true` only for the
    /// call that released it.
    pub fn close(&mut self) -> bool {
        let released = self.source.close();
        if released {
            tracing::debug!(
                subscriber = %self.subscriber,
                handle = self.source.handle_id(),
                "subscription session closed"
            );
        }
        released
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_closed()
    }

    pub fn subscriber(&self) -> &SubscriberId {
        &self.subscriber
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Number of events handed out so far.
    pub fn delivered(&self) -> u64 {
        self.next_sequence_id - 1
    }
}
