//! Inbound frame decoding for the signaling relay.
//!
//! Every frame read from a connection goes through [`decode`] exactly once
//! and comes out as an [`InboundMessage`]. The hub routes the result:
//! signaling messages go verbatim to one peer, and control events update
//! the sender's record and fan out to the room.
//!
//! The relay never interprets SDP or ICE payloads. It reads only `type`
//! and, for signaling, `data.toPeerId`.

use super::envelope::{Envelope, MessageType};
use crate::models::{ParticipantPatch, ParticipantRecord};
use chrono::{DateTime, Utc};
use common::types::PeerId;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

/// Longest chat message accepted, in characters.
pub const MAX_CHAT_MESSAGE_CHARS: usize = 4096;

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Offer, answer or ICE candidate for one peer in the same room.
    Signal { kind: MessageType, target: PeerId },
    /// State change or chat, fanned out to the room.
    Control(ControlEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    ParticipantUpdate(ParticipantPatch),
    Chat { message: String },
    HandRaised,
    HandLowered,
    ScreenShareStarted,
    ScreenShareEnded,
}

/// Why a frame could not be routed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not a JSON envelope at all. Treated as a transport error.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Well-formed envelope with a type clients may not send.
    #[error("unsupported message type: {0}")]
    UnsupportedType(String),

    /// Known type with unusable data.
    #[error("invalid message: {0}")]
    Invalid(String),
}

impl DecodeError {
    /// Malformed frames end the connection; the rest get a notice.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, DecodeError::Malformed(_))
    }

    /// Code carried by the `error` notice sent back to the sender.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            DecodeError::Malformed(_) | DecodeError::Invalid(_) => "INVALID_MESSAGE",
            DecodeError::UnsupportedType(_) => "UNSUPPORTED_TYPE",
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignalTarget {
    to_peer_id: String,
}

#[derive(Deserialize)]
struct ChatData {
    message: String,
}

/// Decode one client frame.
///
/// # Errors
///
/// - `Malformed` if the frame is not a JSON object with a string `type`
/// - `UnsupportedType` for unknown or server-only types
/// - `Invalid` for a missing target, bad update flags, or bad chat text
pub fn decode(frame: &str) -> Result<InboundMessage, DecodeError> {
    let raw: RawEnvelope =
        serde_json::from_str(frame).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let kind: MessageType = raw
        .kind
        .parse()
        .map_err(DecodeError::UnsupportedType)?;

    if kind.is_server_only() {
        return Err(DecodeError::UnsupportedType(kind.as_str().to_string()));
    }

    if kind.is_signaling() {
        let target: SignalTarget = serde_json::from_value(raw.data)
            .map_err(|_| DecodeError::Invalid("signaling message requires data.toPeerId".to_string()))?;
        let target = PeerId::parse(target.to_peer_id)
            .map_err(|e| DecodeError::Invalid(e.to_string()))?;
        return Ok(InboundMessage::Signal { kind, target });
    }

    let event = match kind {
        MessageType::ParticipantUpdate => {
            let patch: ParticipantPatch = serde_json::from_value(raw.data)
                .map_err(|e| DecodeError::Invalid(format!("participant-update: {e}")))?;
            ControlEvent::ParticipantUpdate(patch)
        }
        MessageType::ChatMessage => {
            let chat: ChatData = serde_json::from_value(raw.data)
                .map_err(|_| DecodeError::Invalid("chat-message requires data.message".to_string()))?;
            let message = chat.message.trim().to_string();
            if message.is_empty() {
                return Err(DecodeError::Invalid("chat message is empty".to_string()));
            }
            if message.chars().count() > MAX_CHAT_MESSAGE_CHARS {
                return Err(DecodeError::Invalid(format!(
                    "chat message exceeds {MAX_CHAT_MESSAGE_CHARS} characters"
                )));
            }
            ControlEvent::Chat { message }
        }
        MessageType::HandRaised => ControlEvent::HandRaised,
        MessageType::HandLowered => ControlEvent::HandLowered,
        MessageType::ScreenShareStarted => ControlEvent::ScreenShareStarted,
        MessageType::ScreenShareEnded => ControlEvent::ScreenShareEnded,
        // Signaling and server-only types returned above.
        other => return Err(DecodeError::UnsupportedType(other.as_str().to_string())),
    };

    Ok(InboundMessage::Control(event))
}

impl ControlEvent {
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            ControlEvent::ParticipantUpdate(_) => MessageType::ParticipantUpdate,
            ControlEvent::Chat { .. } => MessageType::ChatMessage,
            ControlEvent::HandRaised => MessageType::HandRaised,
            ControlEvent::HandLowered => MessageType::HandLowered,
            ControlEvent::ScreenShareStarted => MessageType::ScreenShareStarted,
            ControlEvent::ScreenShareEnded => MessageType::ScreenShareEnded,
        }
    }

    /// Flags this event changes on the sender's record. Chat changes none.
    #[must_use]
    pub fn patch(&self) -> Option<ParticipantPatch> {
        let patch = match self {
            ControlEvent::ParticipantUpdate(patch) => patch.clone(),
            ControlEvent::Chat { .. } => return None,
            ControlEvent::HandRaised | ControlEvent::HandLowered => ParticipantPatch {
                is_hand_raised: Some(matches!(self, ControlEvent::HandRaised)),
                ..ParticipantPatch::default()
            },
            ControlEvent::ScreenShareStarted | ControlEvent::ScreenShareEnded => {
                ParticipantPatch {
                    is_screen_sharing: Some(matches!(self, ControlEvent::ScreenShareStarted)),
                    ..ParticipantPatch::default()
                }
            }
        };
        Some(patch)
    }

    /// Envelope fanned out to the room once `record` reflects this event.
    #[must_use]
    pub fn outbound(&self, record: &ParticipantRecord, now: DateTime<Utc>) -> Envelope {
        let data = match self {
            ControlEvent::Chat { message } => json!({
                "id": Uuid::new_v4().to_string(),
                "message": message,
                "userName": record.user_name,
                "peerId": record.peer_id,
                "timestamp": now,
            }),
            _ => serde_json::to_value(record).unwrap_or(Value::Null),
        };
        Envelope::from_participant(self.message_type(), record, data, now)
    }
}
