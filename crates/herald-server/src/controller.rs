//! Lifecycle of one client-facing notification stream.
//!
//! ```text
//! Negotiating ──accepts SSE──► Priming ──session open, priming frame──► Streaming
//!      │                          │                                        │
//!      └─► Rejected               └──────────────► Closing ◄───────────────┘
//! ```
//!
//! Everything within one controller runs sequentially; the only wait is on
//! the session, and it races client disconnect and process shutdown.

use std::sync::Arc;

use herald_broker::Broker;
use herald_core::ids::{ConnectionId, SubscriberId};
use herald_core::sse::{self, EVENT_STREAM_MEDIA_TYPE};
use herald_core::{Channel, ChannelRegistry, Frame, NotifyError, Result};
use herald_telemetry::{CloseCause, StreamMetrics};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::SubscriptionSession;
use crate::sink::FrameSink;

/// Controller state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Negotiating,
    Priming,
    Streaming,
    Closing,
    Rejected,
}

/// Why a stream reached Closing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    ClientDisconnected,
    BrokerClosed,
    BrokerLost,
    MalformedMessage,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientDisconnected => "client_disconnected",
            Self::BrokerClosed => "broker_closed",
            Self::BrokerLost => "broker_lost",
            Self::MalformedMessage => "malformed_message",
            Self::Shutdown => "shutdown",
        }
    }

    fn cause(self) -> CloseCause {
        match self {
            Self::ClientDisconnected => CloseCause::Client,
            Self::BrokerClosed | Self::BrokerLost | Self::MalformedMessage => CloseCause::Broker,
            Self::Shutdown => CloseCause::Shutdown,
        }
    }
}

/// Whether an `Accept` header value admits the event-stream media type.
///
/// Matches the bare type in any comma-separated entry, ignoring parameters
/// and case. Wildcards do not count.
pub fn accepts_event_stream(accept: Option<&str>) -> bool {
    accept.is_some_and(|value| {
        value.split(',').any(|range| {
            range
                .split(';')
                .next()
                .is_some_and(|media| media.trim().eq_ignore_ascii_case(EVENT_STREAM_MEDIA_TYPE))
        })
    })
}

/// Drives one stream from negotiation to teardown.
pub struct StreamController {
    connection_id: ConnectionId,
    state: StreamState,
    metrics: Arc<StreamMetrics>,
    shutdown: CancellationToken,
}

impl StreamController {
    pub fn new(metrics: Arc<StreamMetrics>, shutdown: CancellationToken) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            state: StreamState::Negotiating,
            metrics,
            shutdown,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    fn transition(&mut self, next: StreamState) {
        debug!(
            connection_id = %self.connection_id,
            from = ?self.state,
            to = ?next,
            "stream state change"
        );
        self.state = next;
    }

    /// Negotiating → Priming, or → Rejected with `NotAcceptable`.
    pub fn negotiate(&mut self, accept: Option<&str>) -> Result<()> {
        if self.state != StreamState::Negotiating {
            return Err(NotifyError::NotAcceptable);
        }
        if accepts_event_stream(accept) {
            self.transition(StreamState::Priming);
            Ok(())
        } else {
            self.transition(StreamState::Rejected);
            self.metrics.record_rejected();
            debug!(connection_id = %self.connection_id, accept = ?accept, "stream rejected");
            Err(NotifyError::NotAcceptable)
        }
    }

    /// Refuse a negotiated stream before any session exists (e.g. no
    /// subscriber identity).
    pub fn reject(&mut self, err: NotifyError) -> NotifyError {
        self.transition(StreamState::Rejected);
        self.metrics.record_rejected();
        debug!(connection_id = %self.connection_id, error = %err, "stream rejected");
        err
    }

    /// Priming, first half: open a session on every registered channel.
    ///
    /// On failure the controller moves to Closing and nothing stays open.
    pub async fn open_session(
        &mut self,
        subscriber: SubscriberId,
        broker: &dyn Broker,
        registry: &Arc<ChannelRegistry>,
    ) -> Result<SubscriptionSession> {
        if self.state != StreamState::Priming {
            return Err(NotifyError::NotAcceptable);
        }
        let names: Vec<&str> = registry.all_channels().iter().map(Channel::as_str).collect();
        let opened =
            SubscriptionSession::open(broker, Arc::clone(registry), subscriber.clone(), &names)
                .await;
        match opened {
            Ok(session) => {
                self.metrics.record_open();
                info!(
                    connection_id = %self.connection_id,
                    subscriber = %subscriber,
                    channels = session.channels().len(),
                    "stream opened"
                );
                Ok(session)
            }
            Err(err) => {
                self.transition(StreamState::Closing);
                self.metrics.record_rejected();
                warn!(
                    connection_id = %self.connection_id,
                    subscriber = %subscriber,
                    error = %err,
                    "failed to open subscription session"
                );
                Err(err)
            }
        }
    }

    /// Priming, second half, then Streaming until something ends the
    /// stream. Always leaves the session closed.
    pub async fn run<S: FrameSink>(
        &mut self,
        mut session: SubscriptionSession,
        mut sink: S,
    ) -> CloseReason {
        let reason = match sink.write_frame(Frame::priming()).await {
            Ok(()) => {
                self.transition(StreamState::Streaming);
                self.forward(&mut session, &mut sink).await
            }
            Err(_) => CloseReason::ClientDisconnected,
        };

        self.transition(StreamState::Closing);
        let released = session.close();
        self.metrics.record_close(reason.cause());
        info!(
            connection_id = %self.connection_id,
            subscriber = %session.subscriber(),
            reason = reason.as_str(),
            delivered = session.delivered(),
            released,
            "stream closed"
        );
        reason
    }

    async fn forward<S: FrameSink>(
        &mut self,
        session: &mut SubscriptionSession,
        sink: &mut S,
    ) -> CloseReason {
        loop {
            let next = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return CloseReason::Shutdown,
                () = sink.closed() => return CloseReason::ClientDisconnected,
                next = session.next_event() => next,
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => return CloseReason::BrokerClosed,
                Err(NotifyError::BrokerConnectionLost(detail)) => {
                    warn!(
                        connection_id = %self.connection_id,
                        detail = %detail,
                        "broker connection lost"
                    );
                    return CloseReason::BrokerLost;
                }
                Err(err) => {
                    warn!(
                        connection_id = %self.connection_id,
                        error = %err,
                        "dropping stream on bad broker data"
                    );
                    return CloseReason::MalformedMessage;
                }
            };

            let frame = sse::encode(&event);
            let len = frame.len();
            let written = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return CloseReason::Shutdown,
                written = sink.write_frame(frame) => written,
            };
            if written.is_err() {
                debug!(
                    connection_id = %self.connection_id,
                    sequence_id = event.sequence_id,
                    "client write failed"
                );
                return CloseReason::ClientDisconnected;
            }
            self.metrics.record_frame(len);
            tracing::trace!(
                connection_id = %self.connection_id,
                sequence_id = event.sequence_id,
                channel = %event.channel,
                "frame sent"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use futures::StreamExt;
    use herald_broker::MemoryBroker;

    use super::*;
    use crate::sink::{channel_sink, BodyStream};

    struct Fixture {
        broker: MemoryBroker,
        registry: Arc<ChannelRegistry>,
        metrics: Arc<StreamMetrics>,
        shutdown: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                broker: MemoryBroker::default(),
                registry: Arc::new(ChannelRegistry::default()),
                metrics: Arc::new(StreamMetrics::new()),
                shutdown: CancellationToken::new(),
            }
        }

        fn controller(&self) -> StreamController {
            StreamController::new(Arc::clone(&self.metrics), self.shutdown.clone())
        }

        async fn publish(&self, channel: &str, payload: &str) {
            let channel = self.registry.resolve(channel).unwrap();
            self.broker.publish(&channel, payload).await.unwrap();
        }

        /// Negotiate, open, and spawn the streaming loop.
        async fn start(
            &self,
        ) -> (tokio::task::JoinHandle<(CloseReason, StreamState)>, BodyStream) {
            let mut controller = self.controller();
            controller.negotiate(Some(EVENT_STREAM_MEDIA_TYPE)).unwrap();
            let session = controller
                .open_session(SubscriberId::from_raw("user-1"), &self.broker, &self.registry)
                .await
                .unwrap();
            let (sink, body) = channel_sink();
            let task = tokio::spawn(async move {
                let reason = controller.run(session, sink).await;
                (reason, controller.state())
            });
            (task, body)
        }
    }

    async fn next_chunk(body: &mut BodyStream) -> Bytes {
        tokio::time::timeout(Duration::from_secs(1), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    #[test]
    fn accept_header_matching() {
        assert!(accepts_event_stream(Some("text/event-stream")));
        assert!(accepts_event_stream(Some("Text/Event-Stream")));
        assert!(accepts_event_stream(Some("text/html, text/event-stream;q=0.9")));
        assert!(!accepts_event_stream(Some("application/json")));
        assert!(!accepts_event_stream(Some("*/*")));
        assert!(!accepts_event_stream(Some("")));
        assert!(!accepts_event_stream(None));
    }

    #[tokio::test]
    async fn rejection_never_subscribes() {
        let fx = Fixture::new();
        let mut controller = fx.controller();

        let err = controller.negotiate(Some("application/json")).unwrap_err();
        assert_eq!(err, NotifyError::NotAcceptable);
        assert_eq!(controller.state(), StreamState::Rejected);

        let err = controller
            .open_session(SubscriberId::from_raw("user-1"), &fx.broker, &fx.registry)
            .await
            .unwrap_err();
        assert_eq!(err, NotifyError::NotAcceptable);
        assert_eq!(fx.broker.stats().subscribe_calls, 0);
        assert_eq!(fx.metrics.snapshot().streams_rejected, 1);
    }

    #[tokio::test]
    async fn end_to_end_frames_in_order() {
        let fx = Fixture::new();
        let (task, mut body) = fx.start().await;

        let priming = next_chunk(&mut body).await;
        assert!(priming.is_empty());

        fx.publish("profile", "42").await;
        fx.publish("avatar", "7").await;

        assert_eq!(&next_chunk(&mut body).await[..], b"id: 1\nevent: profile\ndata: 42\n\n");
        assert_eq!(&next_chunk(&mut body).await[..], b"id: 2\nevent: avatar\ndata: 7\n\n");

        drop(body);
        let (reason, state) = task.await.unwrap();
        assert_eq!(reason, CloseReason::ClientDisconnected);
        assert_eq!(state, StreamState::Closing);
        assert_eq!(fx.broker.stats().open_handles, 0);

        let snap = fx.metrics.snapshot();
        assert_eq!(snap.frames_sent, 2);
        assert_eq!(snap.closed_by_client, 1);
        assert_eq!(snap.streams_active, 0);
    }

    #[tokio::test]
    async fn two_streams_number_independently() {
        let fx = Fixture::new();
        let (_a_task, mut a) = fx.start().await;
        assert!(next_chunk(&mut a).await.is_empty());

        fx.publish("avatar", "1").await;
        fx.publish("avatar", "2").await;
        assert!(next_chunk(&mut a).await.starts_with(b"id: 1\n"));
        assert!(next_chunk(&mut a).await.starts_with(b"id: 2\n"));

        let (_b_task, mut b) = fx.start().await;
        assert!(next_chunk(&mut b).await.is_empty());

        fx.publish("avatar", "3").await;
        assert_eq!(&next_chunk(&mut a).await[..], b"id: 3\nevent: avatar\ndata: 3\n\n");
        assert_eq!(&next_chunk(&mut b).await[..], b"id: 1\nevent: avatar\ndata: 3\n\n");
    }

    #[tokio::test]
    async fn broker_loss_closes_cleanly() {
        let fx = Fixture::new();
        let (task, mut body) = fx.start().await;
        assert!(next_chunk(&mut body).await.is_empty());

        fx.broker.disconnect_all();
        let (reason, state) = task.await.unwrap();
        assert_eq!(reason, CloseReason::BrokerLost);
        assert_eq!(state, StreamState::Closing);

        let stats = fx.broker.stats();
        assert_eq!(stats.open_handles, 0);
        assert_eq!(stats.released_handles, 1);

        // No error frame: the body simply ends.
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn broker_shutdown_ends_stream() {
        let fx = Fixture::new();
        let (task, mut body) = fx.start().await;
        assert!(next_chunk(&mut body).await.is_empty());

        fx.broker.shutdown();
        let (reason, _) = task.await.unwrap();
        assert_eq!(reason, CloseReason::BrokerClosed);
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_unblocks_idle_wait() {
        let fx = Fixture::new();
        let (task, mut body) = fx.start().await;
        assert!(next_chunk(&mut body).await.is_empty());

        fx.shutdown.cancel();
        let (reason, state) = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::Shutdown);
        assert_eq!(state, StreamState::Closing);
        assert_eq!(fx.broker.stats().open_handles, 0);
        assert_eq!(fx.metrics.snapshot().closed_by_shutdown, 1);
    }

    #[tokio::test]
    async fn client_disconnect_unblocks_idle_wait() {
        let fx = Fixture::new();
        let (task, mut body) = fx.start().await;
        assert!(next_chunk(&mut body).await.is_empty());

        drop(body);
        let (reason, _) = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::ClientDisconnected);
        assert_eq!(fx.broker.stats().open_handles, 0);
    }

    #[tokio::test]
    async fn unavailable_broker_fails_priming() {
        let fx = Fixture::new();
        fx.broker.shutdown();

        let mut controller = fx.controller();
        controller.negotiate(Some(EVENT_STREAM_MEDIA_TYPE)).unwrap();
        let err = controller
            .open_session(SubscriberId::from_raw("user-1"), &fx.broker, &fx.registry)
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::BrokerUnavailable(_)));
        assert_eq!(controller.state(), StreamState::Closing);
        assert_eq!(fx.broker.stats().open_handles, 0);
        assert_eq!(fx.metrics.active_streams(), 0);
    }

    #[tokio::test]
    async fn client_gone_before_priming() {
        let fx = Fixture::new();
        let mut controller = fx.controller();
        controller.negotiate(Some(EVENT_STREAM_MEDIA_TYPE)).unwrap();
        let session = controller
            .open_session(SubscriberId::from_raw("user-1"), &fx.broker, &fx.registry)
            .await
            .unwrap();
        let (sink, body) = channel_sink();
        drop(body);

        let reason = controller.run(session, sink).await;
        assert_eq!(reason, CloseReason::ClientDisconnected);
        assert_eq!(controller.state(), StreamState::Closing);
        assert_eq!(fx.broker.stats().open_handles, 0);
    }
}
