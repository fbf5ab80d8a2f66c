use bytes::Bytes;

/// Kind of message delivered on a broker connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Acknowledges a channel subscription; `data` holds the connection's
    /// subscription count.
    Subscribe,
    /// Acknowledges a channel unsubscription.
    Unsubscribe,
    /// A published payload.
    Message,
    /// Liveness reply from the bus.
    Pong,
}

impl MessageKind {
    pub fn is_data(self) -> bool {
        matches!(self, Self::Message)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Message => "message",
            Self::Pong => "pong",
        }
    }
}

/// A message as the bus puts it on the wire: undecoded bytes plus its kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    pub kind: MessageKind,
    pub channel: Bytes,
    pub data: Bytes,
}

impl RawMessage {
    pub fn message(channel: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Message,
            channel: channel.into(),
            data: data.into(),
        }
    }

    pub fn subscribe_ack(channel: impl Into<Bytes>, count: usize) -> Self {
        Self {
            kind: MessageKind::Subscribe,
            channel: channel.into(),
            data: Bytes::from(count.to_string()),
        }
    }

    pub fn unsubscribe_ack(channel: impl Into<Bytes>, count: usize) -> Self {
        Self {
            kind: MessageKind::Unsubscribe,
            channel: channel.into(),
            data: Bytes::from(count.to_string()),
        }
    }

    pub fn pong() -> Self {
        Self {
            kind: MessageKind::Pong,
            channel: Bytes::new(),
            data: Bytes::new(),
        }
    }
}

/// A data message that survived control-traffic filtering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerMessage {
    pub channel: Bytes,
    pub payload: Bytes,
}
