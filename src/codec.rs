// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame encode/decode (spec.md §4.1). Decode tries the binary packed
//! format (MessagePack) first and falls back to text-JSON on structural
//! failure; encode picks per caller preference.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shared wire envelope for every message direction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    /// Count of samples dropped for this session's queue since the last
    /// delivered message on this (robot, topic) pair (spec.md §4.5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropped: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl Envelope {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            topic: None,
            robot_id: None,
            user_id: None,
            ts: crate::time::wall_now_ms(),
            payload: None,
            error: None,
            dropped: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ErrorPayload { code: code.into(), message: message.into() });
        self
    }

    pub fn with_robot_id(mut self, robot_id: impl Into<String>) -> Self {
        self.robot_id = Some(robot_id.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_dropped(mut self, dropped: u64) -> Self {
        if dropped > 0 {
            self.dropped = Some(dropped);
        }
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Tries binary packed decode first; on any structural failure, falls back
/// to JSON. A frame that is neither is reported as malformed, not panicked
/// on — the session layer turns this into an `error(BAD_REQUEST)`.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    if let Ok(envelope) = rmp_serde::from_slice::<Envelope>(bytes) {
        return Ok(envelope);
    }
    serde_json::from_slice::<Envelope>(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// `prefer_binary` selects the wire format; callers pin this to `false` for
/// the lifetime of a session once it was authenticated over a text frame,
/// preserving round-trippability (spec.md §4.1).
pub fn encode(envelope: &Envelope, prefer_binary: bool) -> Result<Vec<u8>, CodecError> {
    if prefer_binary {
        rmp_serde::to_vec_named(envelope).map_err(|e| CodecError::Malformed(e.to_string()))
    } else {
        serde_json::to_vec(envelope).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn json_round_trip() {
        let envelope = Envelope::new("ping").with_payload(json!({"a": 1, "b": "two"}));
        let bytes = encode(&envelope, false).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn binary_round_trip() {
        let envelope = Envelope::new("pong").with_robot_id("r1").with_topic("pose");
        let bytes = encode(&envelope, true).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn absent_and_null_fields_are_equivalent() {
        let without = r#"{"type":"ping","ts":1}"#;
        let with_null = r#"{"type":"ping","ts":1,"topic":null,"robot_id":null}"#;
        let a = decode(without.as_bytes()).unwrap();
        let b = decode(with_null.as_bytes()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_type_still_decodes() {
        let bytes = br#"{"type":"not_a_real_type","ts":1}"#;
        let decoded = decode(bytes).unwrap();
        assert_eq!(decoded.kind, "not_a_real_type");
    }

    #[test]
    fn malformed_frame_is_rejected() {
        let bytes = b"\xff\xfenot a valid frame at all";
        assert!(decode(bytes).is_err());
    }

    fn arb_envelope() -> impl Strategy<Value = Envelope> {
        (
            "[a-z_]{1,16}",
            proptest::option::of("[a-z0-9]{1,8}"),
            proptest::option::of("[a-z0-9]{1,8}"),
            proptest::option::of("[a-z0-9]{1,8}"),
            any::<i64>(),
            proptest::option::of(0u64..50),
        )
            .prop_map(|(kind, topic, robot_id, user_id, ts, dropped)| {
                let mut envelope = Envelope::new(kind);
                envelope.topic = topic;
                envelope.robot_id = robot_id;
                envelope.user_id = user_id;
                envelope.ts = ts;
                envelope.payload = Some(json!({"a": ts, "b": envelope.kind.clone()}));
                if let Some(n) = dropped {
                    envelope = envelope.with_dropped(n);
                }
                envelope
            })
    }

    proptest! {
        /// encode/decode round-trips for both wire formats, for any
        /// generated envelope (spec.md §8 R1).
        #[test]
        fn encode_decode_round_trips_json(envelope in arb_envelope()) {
            let bytes = encode(&envelope, false).unwrap();
            let decoded = decode(&bytes).unwrap();
            prop_assert_eq!(decoded, envelope);
        }

        #[test]
        fn encode_decode_round_trips_binary(envelope in arb_envelope()) {
            let bytes = encode(&envelope, true).unwrap();
            let decoded = decode(&bytes).unwrap();
            prop_assert_eq!(decoded, envelope);
        }
    }
}
