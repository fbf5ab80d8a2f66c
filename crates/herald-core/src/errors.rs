/// Typed error hierarchy for the notification fan-out.
///
/// Classifies errors by the stage at which they can occur: subscribe time
/// (`InvalidChannel`), stream establishment (`NotAcceptable`,
/// `Unauthenticated`, `BrokerUnavailable`), producer boundary
/// (`InvalidPayload`) and mid-stream (`BrokerConnectionLost`,
/// `MalformedMessage`).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid channel: {0}")]
    InvalidChannel(String),
    #[error("this endpoint is only for use with server-sent events (SSE)")]
    NotAcceptable,
    #[error("subscriber identity missing")]
    Unauthenticated,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),
    #[error("broker connection lost: {0}")]
    BrokerConnectionLost(String),
    #[error("malformed broker message: {0}")]
    MalformedMessage(String),
}

pub type Result<T> = std::result::Result<T, NotifyError>;

impl NotifyError {
    /// Errors raised by the broker connection itself, as opposed to a bad
    /// request from a client or producer.
    pub fn is_broker_fault(&self) -> bool {
        matches!(
            self,
            Self::BrokerUnavailable(_) | Self::BrokerConnectionLost(_) | Self::MalformedMessage(_)
        )
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidChannel(_) => "invalid_channel",
            Self::NotAcceptable => "not_acceptable",
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::BrokerUnavailable(_) => "broker_unavailable",
            Self::BrokerConnectionLost(_) => "broker_connection_lost",
            Self::MalformedMessage(_) => "malformed_message",
        }
    }

    /// HTTP status code this error maps to when surfaced to a client.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidChannel(_) => 400,
            Self::Unauthenticated => 401,
            Self::NotAcceptable => 406,
            Self::InvalidPayload(_) => 422,
            Self::BrokerConnectionLost(_) | Self::MalformedMessage(_) => 502,
            Self::BrokerUnavailable(_) => 503,
        }
    }
}
