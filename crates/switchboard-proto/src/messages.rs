//! Frame and message definitions.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{generate_id, now_millis, Priority};

/// A frame as it travels over the socket, in either direction.
///
/// Serialized as UTF-8 JSON text:
/// `{"id", "type", "payload", "timestamp", "retry"?, "priority"?}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    /// Sender-generated identifier.
    #[serde(default)]
    pub id: String,
    /// Logical message type used for routing.
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary structured payload.
    #[serde(default)]
    pub payload: Value,
    /// Send time in epoch milliseconds.
    #[serde(default)]
    pub timestamp: i64,
    /// Number of times the message was re-sent after a failed write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
    /// Priority the sender queued the message with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl Frame {
    /// Create a frame with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: generate_id(),
            kind: kind.into(),
            payload,
            timestamp: now_millis(),
            retry: None,
            priority: None,
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, crate::ProtoError> {
        serde_json::to_string(self).map_err(|e| crate::ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid frame.
    pub fn from_json(json: &str) -> Result<Self, crate::ProtoError> {
        let frame: Self =
            serde_json::from_str(json).map_err(|e| crate::ProtoError::Decoding(e.to_string()))?;
        if frame.kind.is_empty() {
            return Err(crate::ProtoError::InvalidFrame("empty type".to_string()));
        }
        Ok(frame)
    }

    /// Deserialize from a binary frame carrying UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not UTF-8 or not a valid frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::ProtoError> {
        let text = std::str::from_utf8(bytes)?;
        Self::from_json(text)
    }

    /// Look up a string field in an object payload.
    #[must_use]
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }
}

/// An outbound message created by `send()` or `request()`.
///
/// The id is fixed at creation so a message keeps its identity when it is
/// queued, flushed and requeued.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Unique id of this logical send.
    pub id: String,
    /// Logical message type.
    pub kind: String,
    /// Structured payload.
    pub payload: Value,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Queue lane.
    pub priority: Priority,
    /// How many times transmission was retried.
    pub retry_count: u32,
}

impl Message {
    /// Create a normal-priority message.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: generate_id(),
            kind: kind.into(),
            payload,
            timestamp: Utc::now(),
            priority: Priority::Normal,
            retry_count: 0,
        }
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Replace the generated id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Build the wire frame for this message.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame {
            id: self.id.clone(),
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            timestamp: self.timestamp.timestamp_millis(),
            retry: (self.retry_count > 0).then_some(self.retry_count),
            priority: Some(self.priority),
        }
    }

    /// Serialize the wire frame to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, crate::ProtoError> {
        self.to_frame().to_json()
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        let timestamp = Utc
            .timestamp_millis_opt(frame.timestamp)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            id: if frame.id.is_empty() { generate_id() } else { frame.id },
            kind: frame.kind,
            payload: frame.payload,
            timestamp,
            priority: frame.priority.unwrap_or_default(),
            retry_count: frame.retry.unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_frame_wire_shape() {
        let msg = Message::new("typing", json!({"conversationId": "c1"}))
            .with_priority(Priority::Low);
        let json = msg.to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "typing");
        assert_eq!(value["id"], msg.id.as_str());
        assert_eq!(value["payload"]["conversationId"], "c1");
        assert_eq!(value["priority"], "low");
        assert!(value["timestamp"].as_i64().unwrap() > 0);
        // retry is omitted until a retry happens
        assert!(value.get("retry").is_none());
    }

    #[test]
    fn test_retry_count_is_carried_on_the_wire() {
        let mut msg = Message::new("presence", Value::Null);
        msg.retry_count = 2;
        assert_eq!(msg.to_frame().retry, Some(2));
    }

    #[test]
    fn test_frame_from_json_minimal() {
        let frame = Frame::from_json(r#"{"type":"read_receipt"}"#).unwrap();
        assert_eq!(frame.kind, "read_receipt");
        assert_eq!(frame.payload, Value::Null);
        assert!(frame.id.is_empty());
        assert!(frame.priority.is_none());
    }

    #[test]
    fn test_frame_from_json_rejects_missing_type() {
        assert!(Frame::from_json(r#"{"id":"x","payload":{}}"#).is_err());
    }

    #[test]
    fn test_frame_from_json_rejects_empty_type() {
        assert!(matches!(
            Frame::from_json(r#"{"type":""}"#),
            Err(crate::ProtoError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_frame_from_json_rejects_garbage() {
        assert!(matches!(
            Frame::from_json("not json"),
            Err(crate::ProtoError::Decoding(_))
        ));
    }

    #[test]
    fn test_frame_from_bytes() {
        let frame = Frame::from_bytes(br#"{"type":"call_incoming","payload":{"from":"+15550100"}}"#)
            .unwrap();
        assert_eq!(frame.kind, "call_incoming");
        assert_eq!(frame.payload_str("from"), Some("+15550100"));
    }

    #[test]
    fn test_frame_from_bytes_invalid_utf8() {
        assert!(matches!(
            Frame::from_bytes(&[0xff, 0xfe, 0x00]),
            Err(crate::ProtoError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_message_from_frame_keeps_identity() {
        let frame = Frame {
            id: "abc-123".to_string(),
            kind: "sms_received".to_string(),
            payload: json!({"body": "hi"}),
            timestamp: 1_700_000_000_000,
            retry: Some(1),
            priority: Some(Priority::High),
        };
        let msg = Message::from(frame);
        assert_eq!(msg.id, "abc-123");
        assert_eq!(msg.priority, Priority::High);
        assert_eq!(msg.retry_count, 1);
        assert_eq!(msg.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    fn priority_strategy() -> impl Strategy<Value = Option<Priority>> {
        prop_oneof![
            Just(None),
            Just(Some(Priority::High)),
            Just(Some(Priority::Normal)),
            Just(Some(Priority::Low)),
        ]
    }

    proptest! {
        #[test]
        fn prop_frame_survives_the_wire(
            kind in "[a-z_.]{1,24}",
            text in ".*",
            timestamp in 0i64..=4_102_444_800_000,
            retry in proptest::option::of(0u32..16),
            priority in priority_strategy(),
        ) {
            let frame = Frame {
                id: generate_id(),
                kind,
                payload: json!({"text": text}),
                timestamp,
                retry,
                priority,
            };
            let decoded = Frame::from_bytes(frame.to_json().unwrap().as_bytes()).unwrap();
            prop_assert_eq!(decoded, frame);
        }

        #[test]
        fn prop_arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = Frame::from_bytes(&bytes);
        }
    }
}
