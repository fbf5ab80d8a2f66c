use std::fmt;

use futures::stream::BoxStream;
use futures::StreamExt;
use herald_core::Result;

use crate::message::{BrokerMessage, RawMessage};

/// Everything a broker connection delivers, control traffic included.
pub type RawStream = BoxStream<'static, Result<RawMessage>>;

/// Exclusive claim on one broker subscription.
///
/// Released exactly once: on the first [`release`](Self::release) call or on
/// drop, whichever comes first.
pub struct SubscriptionHandle {
    id: u64,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    pub fn new(id: u64, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns `true` if this call performed the release.
    pub fn release(&mut self) -> bool {
        match self.release.take() {
            Some(release) => {
                release();
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Lazy, non-restartable sequence of data messages from one subscription.
///
/// Subscribe/unsubscribe acknowledgements and every other non-data message
/// are dropped here; callers only ever see [`BrokerMessage`]s.
pub struct EventSource {
    inner: Option<RawStream>,
    handle: SubscriptionHandle,
    suppressed: u64,
}

impl EventSource {
    pub fn new(inner: RawStream, handle: SubscriptionHandle) -> Self {
        Self {
            inner: Some(inner),
            handle,
            suppressed: 0,
        }
    }

    /// Next data message, `Ok(None)` once the connection has closed, or the
    /// connection error.
    ///
    /// Cancel-safe: dropping the returned future never loses a data message.
    pub async fn next_message(&mut self) -> Result<Option<BrokerMessage>> {
        loop {
            let next = match self.inner.as_mut() {
                Some(inner) => inner.next().await,
                None => return Ok(None),
            };
            match next {
                Some(Ok(raw)) if raw.kind.is_data() => {
                    return Ok(Some(BrokerMessage {
                        channel: raw.channel,
                        payload: raw.data,
                    }));
                }
                Some(Ok(raw)) => {
                    self.suppressed += 1;
                    tracing::trace!(
                        handle = self.handle.id(),
                        kind = raw.kind.as_str(),
                        "suppressed broker control message"
                    );
                }
                Some(Err(err)) => return Err(err),
                None => {
                    tracing::debug!(handle = self.handle.id(), "broker connection closed");
                    let _ = self.close();
                    return Ok(None);
                }
            }
        }
    }

    /// Drop the connection and release the handle. Idempotent; returns
    /// `true` only for the call that actually released.
    pub fn close(&mut self) -> bool {
        self.inner = None;
        self.handle.release()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_released()
    }

    pub fn handle_id(&self) -> u64 {
        self.handle.id()
    }

    /// Control messages filtered out so far.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("handle", &self.handle)
            .field("suppressed", &self.suppressed)
            .finish()
    }
}
