//! Control messages from the foreground application.

use serde_json::{json, Value as JsonValue};

/// A recognized control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// `{ "type": "SKIP_WAITING" }`: activate the waiting generation now.
    SkipWaiting,
}

impl ControlMessage {
    const SKIP_WAITING: &'static str = "SKIP_WAITING";

    /// Recognize a message; anything else is `None`.
    pub fn parse(message: &JsonValue) -> Option<Self> {
        match message.get("type").and_then(JsonValue::as_str) {
            Some(Self::SKIP_WAITING) => Some(Self::SkipWaiting),
            _ => None,
        }
    }

    /// Wire form of the message.
    pub fn to_json(self) -> JsonValue {
        match self {
            Self::SkipWaiting => json!({ "type": Self::SKIP_WAITING }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skip_waiting() {
        assert_eq!(
            ControlMessage::parse(&json!({ "type": "SKIP_WAITING" })),
            Some(ControlMessage::SkipWaiting)
        );
        assert_eq!(
            ControlMessage::parse(&json!({ "type": "SKIP_WAITING", "extra": 1 })),
            Some(ControlMessage::SkipWaiting)
        );
    }

    #[test]
    fn test_unrecognized_messages() {
        for message in [
            json!({ "type": "skip_waiting" }),
            json!({ "type": "CLAIM" }),
            json!({ "kind": "SKIP_WAITING" }),
            json!("SKIP_WAITING"),
            json!(null),
        ] {
            assert_eq!(ControlMessage::parse(&message), None, "{message}");
        }
    }

    #[test]
    fn test_wire_form_round_trips() {
        let wire = ControlMessage::SkipWaiting.to_json();
        assert_eq!(wire, json!({ "type": "SKIP_WAITING" }));
        assert_eq!(ControlMessage::parse(&wire), Some(ControlMessage::SkipWaiting));
    }
}
