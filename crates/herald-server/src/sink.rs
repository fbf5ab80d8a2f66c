use std::convert::Infallible;

use async_trait::async_trait;
use bytes::Bytes;
use herald_core::Frame;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// The client transport went away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkClosed;

/// Client-facing transport a stream controller writes frames to.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Hand one frame to the transport. A failed write is final.
    async fn write_frame(&mut self, frame: Frame) -> Result<(), SinkClosed>;

    /// Resolves once the client side of the transport is gone.
    async fn closed(&self);
}

/// Body chunks as consumed by the HTTP response.
pub type BodyStream = ReceiverStream<Result<Bytes, Infallible>>;

/// Sink backed by a one-slot channel feeding an HTTP response body, so at
/// most one frame is ever waiting to be flushed.
pub struct ChannelSink {
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
}

/// Create a sink and the body stream it feeds.
pub fn channel_sink() -> (ChannelSink, BodyStream) {
    let (tx, rx) = mpsc::channel(1);
    (ChannelSink { tx }, ReceiverStream::new(rx))
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), SinkClosed> {
        self.tx
            .send(Ok(frame.into_bytes()))
            .await
            .map_err(|_| SinkClosed)
    }

    async fn closed(&self) {
        self.tx.closed().await;
    }
}
