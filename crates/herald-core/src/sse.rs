//! Server-Sent Events framing.
//!
//! Each [`Event`] becomes exactly one frame:
//!
//! ```text
//! id: <sequence_id>\nevent: <channel>\ndata: <payload>\n\n
//! ```
//!
//! The stream opens with an empty priming frame that carries no fields.

use std::fmt::Write as _;

use bytes::Bytes;

use crate::event::Event;

/// Media type of the notification stream.
pub const EVENT_STREAM_MEDIA_TYPE: &str = "text/event-stream";

/// One wire-encoded unit of the client-facing stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    /// The empty frame written first on every stream to force headers out.
    pub fn priming() -> Self {
        Self(Bytes::new())
    }

    pub fn is_priming(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Frame> for Bytes {
    fn from(frame: Frame) -> Self {
        frame.0
    }
}

/// Encode one event. Pure and deterministic; payload is copied verbatim.
pub fn encode(event: &Event) -> Frame {
    let channel = event.channel.as_str();
    let mut out = String::with_capacity(32 + channel.len() + event.payload.len());
    // Writing to a String cannot fail.
    let _ = write!(
        out,
        "id: {}\nevent: {}\ndata: {}\n\n",
        event.sequence_id, channel, event.payload
    );
    Frame(Bytes::from(out))
}
