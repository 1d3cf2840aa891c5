//! The wire envelope: the single message shape that carries commands,
//! responses, and unsolicited events between every hop (router ↔
//! extension). See the envelope contract for field-presence rules per
//! frame type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{OriginId, SessionId, TabId, WireId};

/// An opaque error returned by the extension for a command it could not
/// complete (e.g. "element not found"). The router never interprets this;
/// it is forwarded to the caller verbatim as `DOWNSTREAM_ERROR`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionError {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for ExtensionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "extension error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ExtensionError {}

/// A single frame on the extension link.
///
/// Internally tagged on `type` so the wire shape matches
/// `{type: command|response|event|cancel, ...}` exactly. Unrecognized
/// fields on an incoming frame are ignored rather than rejected, so newer
/// extension builds can add fields without breaking older routers. A
/// frame that fails to deserialize at all (missing a field its `type`
/// requires) is malformed and is dropped by the link, not propagated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Outbound only: a command dispatched to the extension.
    Command {
        #[serde(rename = "wireId")]
        wire_id: WireId,
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "originId", default, skip_serializing_if = "Option::is_none")]
        origin_id: Option<OriginId>,
        name: String,
        #[serde(default)]
        payload: Value,
        /// Absent means: use the session's current tab, creating one if
        /// none exists yet.
        #[serde(rename = "tabId", default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
    },
    /// Inbound only: the extension's reply to a prior `Command`. Carries
    /// exactly one of `payload` or `error`.
    Response {
        #[serde(rename = "wireId")]
        wire_id: WireId,
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ExtensionError>,
    },
    /// Inbound only: an unsolicited notification from the extension
    /// (e.g. a tab closing, a DOM mutation). Fanned out to the owning
    /// session's event sink.
    Event {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        name: String,
        #[serde(rename = "tabId", default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
        #[serde(default)]
        payload: Value,
    },
    /// Outbound only: a best-effort request to abandon a command the
    /// router has already given up on. The extension may ignore it or
    /// reply anyway; replies to a cancelled `wireId` are dropped silently.
    Cancel {
        #[serde(rename = "wireId")]
        wire_id: WireId,
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    /// Outbound keepalive. Carries no session — it addresses the link
    /// itself, not any one session's conversation.
    Ping,
    /// Inbound keepalive acknowledgement.
    Pong,
}

impl Frame {
    /// The wire id a frame carries, if any. `Event`, `Ping`, and `Pong`
    /// frames have none.
    pub fn wire_id(&self) -> Option<WireId> {
        match self {
            Frame::Command { wire_id, .. }
            | Frame::Response { wire_id, .. }
            | Frame::Cancel { wire_id, .. } => Some(*wire_id),
            Frame::Event { .. } | Frame::Ping | Frame::Pong => None,
        }
    }

    /// The session id a frame carries, if any. `Ping`/`Pong` address the
    /// link itself and carry no session.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Frame::Command { session_id, .. }
            | Frame::Response { session_id, .. }
            | Frame::Event { session_id, .. }
            | Frame::Cancel { session_id, .. } => Some(*session_id),
            Frame::Ping | Frame::Pong => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serializes_with_lowercase_tag() {
        let frame = Frame::Command {
            wire_id: WireId::new(),
            session_id: SessionId::new(),
            origin_id: None,
            name: "navigate".into(),
            payload: serde_json::json!({"url": "https://example.com"}),
            tab_id: None,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "command");
        assert!(value.get("tabId").is_none());
    }

    #[test]
    fn response_round_trips_payload_xor_error() {
        let wire_id = WireId::new();
        let session_id = SessionId::new();
        let frame = Frame::Response {
            wire_id,
            session_id,
            payload: Some(serde_json::json!({"ok": true})),
            error: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: Frame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.wire_id(), Some(wire_id));
        assert_eq!(back.session_id(), Some(session_id));
    }

    #[test]
    fn unrecognized_fields_are_ignored() {
        let json = serde_json::json!({
            "type": "event",
            "sessionId": SessionId::new(),
            "name": "tabClosed",
            "futureField": "ignored",
        });
        let frame: Frame = serde_json::from_value(json).unwrap();
        assert!(matches!(frame, Frame::Event { .. }));
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let json = serde_json::json!({
            "type": "response",
            "sessionId": SessionId::new(),
            // missing wireId
        });
        assert!(serde_json::from_value::<Frame>(json).is_err());
    }

    #[test]
    fn ping_and_pong_round_trip_with_no_session_or_wire_id() {
        let ping_json = serde_json::to_value(Frame::Ping).unwrap();
        assert_eq!(ping_json["type"], "ping");
        let ping: Frame = serde_json::from_value(ping_json).unwrap();
        assert_eq!(ping.wire_id(), None);
        assert_eq!(ping.session_id(), None);

        let pong_json = serde_json::to_value(Frame::Pong).unwrap();
        assert_eq!(pong_json["type"], "pong");
        let pong: Frame = serde_json::from_value(pong_json).unwrap();
        assert_eq!(pong.wire_id(), None);
        assert_eq!(pong.session_id(), None);
    }
}
