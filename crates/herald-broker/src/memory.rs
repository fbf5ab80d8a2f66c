//! Shared in-process publish/subscribe bus.
//!
//! Every subscriber connection owns a bounded queue. Publishing on a channel
//! holds that channel's lock while fanning out, so concurrent publishers on
//! the same channel are seen in one order by all of its subscribers.
//!
//! A connection whose queue is full is dropped by the bus: its source fails
//! with `BrokerConnectionLost` instead of silently skipping messages.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use herald_core::event::validate_payload;
use herald_core::{Channel, NotifyError, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, BrokerConfig, BrokerStats};
use crate::message::RawMessage;
use crate::source::{EventSource, SubscriptionHandle};

#[derive(Clone)]
struct Subscriber {
    connection: u64,
    tx: mpsc::Sender<RawMessage>,
    lost: CancellationToken,
}

#[derive(Default)]
struct ChannelSlot {
    subscribers: Mutex<Vec<Subscriber>>,
}

struct Connection {
    channels: Vec<Channel>,
    lost: CancellationToken,
}

struct Inner {
    config: BrokerConfig,
    running: AtomicBool,
    channels: DashMap<Channel, Arc<ChannelSlot>>,
    connections: DashMap<u64, Connection>,
    next_connection: AtomicU64,
    subscribe_calls: AtomicU64,
    released: AtomicU64,
    published: AtomicU64,
}

impl Inner {
    fn detach(&self, connection: u64, channels: &[Channel]) {
        for channel in channels {
            if let Some(slot) = self.channels.get(channel) {
                slot.subscribers.lock().retain(|s| s.connection != connection);
            }
        }
    }

    fn release(&self, connection: u64) {
        if let Some((_, conn)) = self.connections.remove(&connection) {
            self.detach(connection, &conn.channels);
            let _ = self.released.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(connection, "broker subscription released");
        }
    }
}

/// In-process implementation of [`Broker`]. Cheap to clone; clones share
/// the same bus.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl MemoryBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                running: AtomicBool::new(true),
                channels: DashMap::new(),
                connections: DashMap::new(),
                next_connection: AtomicU64::new(1),
                subscribe_calls: AtomicU64::new(0),
                released: AtomicU64::new(0),
                published: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Number of live connections subscribed to `channel`.
    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        self.inner
            .channels
            .get(channel)
            .map_or(0, |slot| slot.subscribers.lock().len())
    }

    /// Close the bus. Every open source ends, and later publishes and
    /// subscriptions fail with `BrokerUnavailable`.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for slot in self.inner.channels.iter() {
            slot.subscribers.lock().clear();
        }
        tracing::info!(
            open_handles = self.inner.connections.len(),
            "broker shut down"
        );
    }

    /// Drop every subscriber connection as if the bus had failed. Open
    /// sources fail with `BrokerConnectionLost`; the bus stays available.
    pub fn disconnect_all(&self) {
        let mut dropped = 0usize;
        for conn in self.inner.connections.iter() {
            conn.lost.cancel();
            self.inner.detach(*conn.key(), &conn.channels);
            dropped += 1;
        }
        tracing::warn!(dropped, "broker dropped all subscriber connections");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(NotifyError::BrokerUnavailable("bus is shut down".into()))
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &Channel, payload: &str) -> Result<usize> {
        self.ensure_running()?;
        validate_payload(payload)?;
        let _ = self.inner.published.fetch_add(1, Ordering::Relaxed);

        let Some(slot) = self.inner.channels.get(channel).map(|s| Arc::clone(s.value())) else {
            return Ok(0);
        };

        let message = RawMessage::message(channel.as_str().to_owned(), payload.to_owned());
        let mut delivered = 0usize;
        let mut subscribers = slot.subscribers.lock();
        subscribers.retain(|sub| match sub.tx.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    connection = sub.connection,
                    channel = %channel,
                    "subscriber buffer full, dropping connection"
                );
                sub.lost.cancel();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        drop(subscribers);

        tracing::trace!(channel = %channel, delivered, "published");
        Ok(delivered)
    }

    async fn subscribe(&self, channels: &[Channel]) -> Result<EventSource> {
        self.ensure_running()?;

        let connection = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        let capacity = self.inner.config.subscriber_buffer.max(channels.len() + 1);
        let (tx, rx) = mpsc::channel(capacity);
        let lost = CancellationToken::new();

        for (idx, channel) in channels.iter().enumerate() {
            let _ = tx.try_send(RawMessage::subscribe_ack(channel.as_str().to_owned(), idx + 1));
        }

        let _ = self.inner.connections.insert(
            connection,
            Connection {
                channels: channels.to_vec(),
                lost: lost.clone(),
            },
        );
        for channel in channels {
            let slot = Arc::clone(self.inner.channels.entry(channel.clone()).or_default().value());
            slot.subscribers.lock().push(Subscriber {
                connection,
                tx: tx.clone(),
                lost: lost.clone(),
            });
        }
        drop(tx);

        // A shutdown that raced the registration above may have cleared the
        // slots before this connection was pushed.
        if let Err(err) = self.ensure_running() {
            if let Some((_, conn)) = self.inner.connections.remove(&connection) {
                self.inner.detach(connection, &conn.channels);
            }
            return Err(err);
        }
        let _ = self.inner.subscribe_calls.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection, channels = channels.len(), "broker subscription opened");

        let state = (rx, lost, false);
        let stream = futures::stream::unfold(state, |(mut rx, lost, failed)| async move {
            if failed {
                return None;
            }
            tokio::select! {
                biased;
                () = lost.cancelled() => Some((
                    Err(NotifyError::BrokerConnectionLost("connection dropped by bus".into())),
                    (rx, lost, true),
                )),
                msg = rx.recv() => msg.map(|m| (Ok(m), (rx, lost, false))),
            }
        })
        .boxed();

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = SubscriptionHandle::new(connection, move || {
            if let Some(inner) = weak.upgrade() {
                inner.release(connection);
            }
        });

        Ok(EventSource::new(stream, handle))
    }

    fn is_available(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn stats(&self) -> BrokerStats {
        BrokerStats {
            subscribe_calls: self.inner.subscribe_calls.load(Ordering::Relaxed),
            open_handles: self.inner.connections.len(),
            released_handles: self.inner.released.load(Ordering::Relaxed),
            published: self.inner.published.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use herald_core::ChannelRegistry;

    use super::*;

    fn channels() -> (Channel, Channel) {
        let registry = ChannelRegistry::default();
        (
            registry.resolve("avatar").unwrap(),
            registry.resolve("profile").unwrap(),
        )
    }

    #[tokio::test]
    async fn publish_reaches_subscriber_without_acks() {
        let broker = MemoryBroker::default();
        let (avatar, profile) = channels();
        let mut source = broker.subscribe(&[avatar.clone(), profile.clone()]).await.unwrap();

        assert_eq!(broker.publish(&profile, "42").await.unwrap(), 1);
        assert_eq!(broker.publish(&avatar, "7").await.unwrap(), 1);

        let first = source.next_message().await.unwrap().unwrap();
        assert_eq!(&first.channel[..], b"profile");
        assert_eq!(&first.payload[..], b"42");
        let second = source.next_message().await.unwrap().unwrap();
        assert_eq!(&second.channel[..], b"avatar");
        assert_eq!(&second.payload[..], b"7");
        assert_eq!(source.suppressed(), 2);
    }

    #[tokio::test]
    async fn subscriber_only_sees_its_channels() {
        let broker = MemoryBroker::default();
        let (avatar, profile) = channels();
        let mut source = broker.subscribe(std::slice::from_ref(&avatar)).await.unwrap();

        assert_eq!(broker.publish(&profile, "1").await.unwrap(), 0);
        assert_eq!(broker.publish(&avatar, "2").await.unwrap(), 1);

        let msg = source.next_message().await.unwrap().unwrap();
        assert_eq!(&msg.payload[..], b"2");
    }

    #[tokio::test]
    async fn fan_out_to_every_subscriber() {
        let broker = MemoryBroker::default();
        let (avatar, _) = channels();
        let mut a = broker.subscribe(std::slice::from_ref(&avatar)).await.unwrap();
        let mut b = broker.subscribe(std::slice::from_ref(&avatar)).await.unwrap();

        assert_eq!(broker.publish(&avatar, "x").await.unwrap(), 2);
        assert_eq!(&a.next_message().await.unwrap().unwrap().payload[..], b"x");
        assert_eq!(&b.next_message().await.unwrap().unwrap().payload[..], b"x");
    }

    #[tokio::test]
    async fn concurrent_publishers_keep_one_order_per_channel() {
        let broker = MemoryBroker::default();
        let (avatar, _) = channels();
        let mut a = broker.subscribe(std::slice::from_ref(&avatar)).await.unwrap();
        let mut b = broker.subscribe(std::slice::from_ref(&avatar)).await.unwrap();

        let mut tasks = Vec::new();
        for producer in 0..4 {
            let broker = broker.clone();
            let avatar = avatar.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..50 {
                    broker.publish(&avatar, &format!("{producer}-{i}")).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut seen_a = Vec::new();
        let mut seen_b = Vec::new();
        for _ in 0..200 {
            seen_a.push(a.next_message().await.unwrap().unwrap().payload);
            seen_b.push(b.next_message().await.unwrap().unwrap().payload);
        }
        assert_eq!(seen_a, seen_b);
    }

    #[tokio::test]
    async fn release_detaches_and_counts_once() {
        let broker = MemoryBroker::default();
        let (avatar, profile) = channels();
        let mut source = broker.subscribe(&[avatar.clone(), profile]).await.unwrap();
        assert_eq!(broker.stats().open_handles, 1);
        assert_eq!(broker.subscriber_count(&avatar), 1);

        assert!(source.close());
        assert!(!source.close());

        let stats = broker.stats();
        assert_eq!(stats.open_handles, 0);
        assert_eq!(stats.released_handles, 1);
        assert_eq!(broker.subscriber_count(&avatar), 0);
        assert_eq!(broker.publish(&avatar, "late").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn shutdown_ends_sources_and_rejects_new_work() {
        let broker = MemoryBroker::default();
        let (avatar, _) = channels();
        let mut source = broker.subscribe(std::slice::from_ref(&avatar)).await.unwrap();

        broker.shutdown();
        assert!(!broker.is_available());
        assert!(source.next_message().await.unwrap().is_none());

        let err = broker.publish(&avatar, "x").await.unwrap_err();
        assert!(matches!(err, NotifyError::BrokerUnavailable(_)));
        let err = broker.subscribe(std::slice::from_ref(&avatar)).await.unwrap_err();
        assert!(matches!(err, NotifyError::BrokerUnavailable(_)));
    }

    #[tokio::test]
    async fn disconnect_all_fails_sources() {
        let broker = MemoryBroker::default();
        let (avatar, _) = channels();
        let mut source = broker.subscribe(std::slice::from_ref(&avatar)).await.unwrap();

        broker.disconnect_all();
        let err = source.next_message().await.unwrap_err();
        assert!(matches!(err, NotifyError::BrokerConnectionLost(_)));

        // The handle stays open until the source is drained or closed.
        assert_eq!(broker.stats().open_handles, 1);
        assert!(source.next_message().await.unwrap().is_none());
        assert!(source.is_closed());
        assert!(!source.close());
        assert_eq!(broker.stats().open_handles, 0);
        assert_eq!(broker.stats().released_handles, 1);
        assert!(broker.is_available());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn subscribe_racing_shutdown_never_outlives_the_bus() {
        let (avatar, profile) = channels();
        for _ in 0..200 {
            let broker = MemoryBroker::default();
            let subscriber = {
                let broker = broker.clone();
                let channels = [avatar.clone(), profile.clone()];
                tokio::spawn(async move { broker.subscribe(&channels).await })
            };
            let closer = {
                let broker = broker.clone();
                tokio::spawn(async move { broker.shutdown() })
            };
            closer.await.unwrap();

            match subscriber.await.unwrap() {
                Ok(mut source) => {
                    let end = tokio::time::timeout(Duration::from_secs(1), source.next_message())
                        .await
                        .unwrap();
                    assert!(end.unwrap().is_none());
                }
                Err(err) => assert!(matches!(err, NotifyError::BrokerUnavailable(_))),
            }
            assert_eq!(broker.stats().open_handles, 0);
            assert_eq!(broker.subscriber_count(&avatar), 0);
        }
    }

    #[tokio::test]
    async fn overflowing_subscriber_is_dropped() {
        let broker = MemoryBroker::new(BrokerConfig { subscriber_buffer: 4 });
        let (avatar, _) = channels();
        let mut slow = broker.subscribe(std::slice::from_ref(&avatar)).await.unwrap();

        // One slot is taken by the subscribe acknowledgement.
        for i in 0..3 {
            assert_eq!(broker.publish(&avatar, &i.to_string()).await.unwrap(), 1);
        }
        assert_eq!(broker.publish(&avatar, "overflow").await.unwrap(), 0);

        let err = slow.next_message().await.unwrap_err();
        assert!(matches!(err, NotifyError::BrokerConnectionLost(_)));
    }

    #[tokio::test]
    async fn rejects_unframeable_payload() {
        let broker = MemoryBroker::default();
        let (avatar, _) = channels();
        let err = broker.publish(&avatar, "a\n\nb").await.unwrap_err();
        assert!(matches!(err, NotifyError::InvalidPayload(_)));
        assert_eq!(broker.stats().published, 0);
    }

    #[tokio::test]
    async fn pending_wait_is_cancel_safe() {
        let broker = MemoryBroker::default();
        let (avatar, _) = channels();
        let mut source = broker.subscribe(std::slice::from_ref(&avatar)).await.unwrap();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), source.next_message()).await;
        assert!(timed_out.is_err());

        broker.publish(&avatar, "after").await.unwrap();
        let msg = source.next_message().await.unwrap().unwrap();
        assert_eq!(&msg.payload[..], b"after");
    }
}
