use serde::Serialize;

use crate::channel::Channel;
use crate::errors::{NotifyError, Result};

/// One change notification as seen by a single subscription session.
///
/// `sequence_id` is local to the session that produced the event: it starts
/// at 1 and grows by one per event for the lifetime of that session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Event {
    pub channel: Channel,
    pub payload: String,
    pub sequence_id: u64,
}

impl Event {
    pub fn new(channel: Channel, payload: impl Into<String>, sequence_id: u64) -> Self {
        Self {
            channel,
            payload: payload.into(),
            sequence_id,
        }
    }
}

/// Check that a payload can travel inside a single `data:` line.
///
/// Any line break would end the line early and let the remainder be read as
/// another field or as the frame terminator.
pub fn validate_payload(payload: &str) -> Result<()> {
    match payload.find(['\n', '\r']) {
        Some(pos) => Err(NotifyError::InvalidPayload(format!(
            "line break at byte {pos}"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelRegistry;

    #[test]
    fn new_event_fields() {
        let channel = ChannelRegistry::default().resolve("avatar").unwrap();
        let event = Event::new(channel.clone(), "7", 1);
        assert_eq!(event.channel, channel);
        assert_eq!(event.payload, "7");
        assert_eq!(event.sequence_id, 1);
    }

    #[test]
    fn plain_payloads_are_valid() {
        assert!(validate_payload("42").is_ok());
        assert!(validate_payload("").is_ok());
        assert!(validate_payload("{\"id\": 42, \"note\": \"tab\there\"}").is_ok());
    }

    #[test]
    fn terminator_is_rejected() {
        let err = validate_payload("42\n\nid: 99").unwrap_err();
        assert!(matches!(err, NotifyError::InvalidPayload(_)));
    }

    #[test]
    fn single_line_breaks_are_rejected() {
        assert!(validate_payload("a\nb").is_err());
        assert!(validate_payload("a\rb").is_err());
        assert!(validate_payload("trailing\r\n").is_err());
    }
}
