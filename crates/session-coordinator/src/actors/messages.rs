//! Message types for actor communication.
//!
//! Request-reply uses `tokio::sync::oneshot`; fire-and-forget messages carry
//! no reply channel.

use crate::errors::SessionError;
use crate::models::{ParticipantPatch, ParticipantRecord, ParticipantRole};
use crate::signaling::Envelope;

use chrono::{DateTime, Utc};
use common::types::{ConnectionId, MeetingId, PeerId, UserId};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Everything the hub needs to admit one connection.
///
/// Built by the WebSocket handler after auth and the meeting access check.
#[derive(Debug)]
pub struct JoinRequest {
    pub connection_id: ConnectionId,
    pub meeting_id: MeetingId,
    pub user_id: UserId,
    pub user_name: String,
    pub peer_id: PeerId,
    pub role: ParticipantRole,
    /// Effective capacity of the meeting at join time.
    pub capacity: usize,
    pub outbound: mpsc::Sender<Arc<str>>,
    pub cancel_token: CancellationToken,
}

/// Result of an admitted join.
#[derive(Debug, Clone)]
pub struct JoinAdmission {
    pub record: ParticipantRecord,
    /// Members already in the room, oldest first.
    pub participants: Vec<ParticipantRecord>,
}

/// Why a connection is leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    ClientClosed,
    TransportError,
    MalformedFrame,
    IdleTimeout,
    UpgradeFailed,
    Shutdown,
}

impl LeaveReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LeaveReason::ClientClosed => "client_closed",
            LeaveReason::TransportError => "transport_error",
            LeaveReason::MalformedFrame => "malformed_frame",
            LeaveReason::IdleTimeout => "idle_timeout",
            LeaveReason::UpgradeFailed => "upgrade_failed",
            LeaveReason::Shutdown => "shutdown",
        }
    }

    /// Whether the removal counts as an eviction rather than a departure.
    #[must_use]
    pub const fn is_eviction(&self) -> bool {
        matches!(self, LeaveReason::MalformedFrame | LeaveReason::IdleTimeout)
    }
}

/// Registry size, for the stats endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStatus {
    pub connections: usize,
    pub rooms: usize,
}

/// Messages sent to the hub actor.
#[derive(Debug)]
pub enum HubMessage {
    /// Admit a connection into its meeting's room.
    Join {
        request: JoinRequest,
        respond_to: oneshot::Sender<Result<JoinAdmission, SessionError>>,
    },

    /// Remove a connection. Idempotent.
    Leave {
        connection_id: ConnectionId,
        reason: LeaveReason,
    },

    /// A text frame read from a connection.
    Inbound {
        connection_id: ConnectionId,
        frame: String,
    },

    /// Keepalive pong or other transport-level activity.
    Touch { connection_id: ConnectionId },

    /// Explicit flag update from the REST surface.
    UpdateParticipant {
        meeting_id: MeetingId,
        user_id: UserId,
        patch: ParticipantPatch,
        at: DateTime<Utc>,
        respond_to: oneshot::Sender<Option<ParticipantRecord>>,
    },

    /// Live records of one room.
    RoomSnapshot {
        meeting_id: MeetingId,
        respond_to: oneshot::Sender<Vec<ParticipantRecord>>,
    },

    /// Server-originated broadcast.
    Broadcast {
        meeting_id: MeetingId,
        envelope: Envelope,
        exclude: Option<ConnectionId>,
    },

    Status {
        respond_to: oneshot::Sender<HubStatus>,
    },

    /// Close every connection and stop.
    Shutdown { respond_to: oneshot::Sender<()> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leave_reason_labels() {
        assert_eq!(LeaveReason::ClientClosed.as_str(), "client_closed");
        assert_eq!(LeaveReason::UpgradeFailed.as_str(), "upgrade_failed");
        assert!(LeaveReason::IdleTimeout.is_eviction());
        assert!(LeaveReason::MalformedFrame.is_eviction());
        assert!(!LeaveReason::TransportError.is_eviction());
    }
}
