//! Wire envelope for every frame exchanged over a session connection.
//!
//! ```json
//! {"type": "user-joined", "data": {...}, "meetingId": "m1", "userId": "u1", "timestamp": "..."}
//! ```

use crate::models::ParticipantRecord;
use chrono::{DateTime, Utc};
use common::types::{MeetingId, UserId};
use serde::de::{value::StrDeserializer, IntoDeserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

/// Envelope `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    UserJoined,
    UserLeft,
    Offer,
    Answer,
    IceCandidate,
    ParticipantUpdate,
    ChatMessage,
    HandRaised,
    HandLowered,
    ScreenShareStarted,
    ScreenShareEnded,
    Error,
}

impl MessageType {
    /// Wire name, also used as a bounded metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MessageType::UserJoined => "user-joined",
            MessageType::UserLeft => "user-left",
            MessageType::Offer => "offer",
            MessageType::Answer => "answer",
            MessageType::IceCandidate => "ice-candidate",
            MessageType::ParticipantUpdate => "participant-update",
            MessageType::ChatMessage => "chat-message",
            MessageType::HandRaised => "hand-raised",
            MessageType::HandLowered => "hand-lowered",
            MessageType::ScreenShareStarted => "screen-share-started",
            MessageType::ScreenShareEnded => "screen-share-ended",
            MessageType::Error => "error",
        }
    }

    /// Offer, answer and ICE candidates are relayed verbatim to one peer.
    #[must_use]
    pub const fn is_signaling(&self) -> bool {
        matches!(
            self,
            MessageType::Offer | MessageType::Answer | MessageType::IceCandidate
        )
    }

    /// Types only the coordinator may emit.
    #[must_use]
    pub const fn is_server_only(&self) -> bool {
        matches!(
            self,
            MessageType::UserJoined | MessageType::UserLeft | MessageType::Error
        )
    }
}

/// Parses the wire name through the serde derive, so the two never drift.
impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let de: StrDeserializer<'_, serde::de::value::Error> = s.into_deserializer();
        Self::deserialize(de).map_err(|_| s.to_string())
    }
}

/// Structured envelope.
///
/// `meetingId`, `userId` and `timestamp` on outbound frames are always
/// stamped by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<MeetingId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

/// Payload of `user-joined` and `user-left`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceData {
    pub user_id: String,
    pub peer_id: String,
    pub user_name: String,
}

/// Payload of `error` notices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: String,
    pub message: String,
}

impl Envelope {
    /// Envelope attributed to one participant of one meeting.
    #[must_use]
    pub fn from_participant(
        kind: MessageType,
        record: &ParticipantRecord,
        data: Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            data,
            meeting_id: Some(record.meeting_id.clone()),
            user_id: Some(record.user_id.clone()),
            timestamp,
        }
    }

    /// `user-joined` / `user-left` for `record`.
    #[must_use]
    pub fn presence(kind: MessageType, record: &ParticipantRecord) -> Self {
        let data = PresenceData {
            user_id: record.user_id.to_string(),
            peer_id: record.peer_id.to_string(),
            user_name: record.user_name.clone(),
        };
        Self::from_participant(
            kind,
            record,
            serde_json::to_value(data).unwrap_or(Value::Null),
            Utc::now(),
        )
    }

    /// Informational `error` notice sent back to one connection.
    #[must_use]
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        let data = ErrorData {
            code: code.to_string(),
            message: message.into(),
        };
        Self {
            kind: MessageType::Error,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
            meeting_id: None,
            user_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Serialize once into a shareable frame.
    ///
    /// # Errors
    ///
    /// Returns the serde error if the payload cannot be encoded.
    pub fn to_frame(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{ConnectionStatus, ParticipantRole};
    use common::types::PeerId;

    const ALL: [MessageType; 12] = [
        MessageType::UserJoined,
        MessageType::UserLeft,
        MessageType::Offer,
        MessageType::Answer,
        MessageType::IceCandidate,
        MessageType::ParticipantUpdate,
        MessageType::ChatMessage,
        MessageType::HandRaised,
        MessageType::HandLowered,
        MessageType::ScreenShareStarted,
        MessageType::ScreenShareEnded,
        MessageType::Error,
    ];

    #[test]
    fn test_wire_names_match_serde() {
        for kind in ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.as_str().parse::<MessageType>().unwrap(), kind);
        }
        assert!("renegotiate".parse::<MessageType>().is_err());
        assert!("Offer".parse::<MessageType>().is_err());
        assert_eq!("hand_raised".parse::<MessageType>().unwrap_err(), "hand_raised");
    }

    #[test]
    fn test_classification() {
        assert!(MessageType::Offer.is_signaling());
        assert!(MessageType::IceCandidate.is_signaling());
        assert!(!MessageType::ChatMessage.is_signaling());
        assert!(MessageType::UserLeft.is_server_only());
        assert!(MessageType::Error.is_server_only());
        assert!(!MessageType::HandRaised.is_server_only());
    }

    #[test]
    fn test_presence_envelope_shape() {
        let record = ParticipantRecord::new(
            MeetingId::parse("m1").unwrap(),
            UserId::parse("u1").unwrap(),
            "Alice".to_string(),
            PeerId::parse("peer-a").unwrap(),
            ParticipantRole::Host,
            ConnectionStatus::Connected,
            Utc::now(),
        );
        let frame = Envelope::presence(MessageType::UserJoined, &record)
            .to_frame()
            .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(value["type"], "user-joined");
        assert_eq!(value["meetingId"], "m1");
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["data"]["peerId"], "peer-a");
        assert_eq!(value["data"]["userName"], "Alice");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_error_envelope_omits_identity() {
        let frame = Envelope::error("PEER_UNAVAILABLE", "gone").to_frame().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["code"], "PEER_UNAVAILABLE");
        assert!(value.get("meetingId").is_none());
        assert!(value.get("userId").is_none());
    }
}
