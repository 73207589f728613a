//! Data models shared by the hub, the storage collaborators and the
//! HTTP handlers.

use chrono::{DateTime, Utc};
use common::types::{MeetingId, ParticipantId, PeerId, UserId};
use serde::{Deserialize, Serialize};

/// Capacity used when a meeting does not set one.
pub const DEFAULT_MEETING_CAPACITY: u32 = 50;

/// Hard upper bound on any meeting's capacity.
pub const MAX_MEETING_CAPACITY: u32 = 100;

/// Meeting metadata, owned by the storage collaborator.
///
/// The coordinator reads it only to authorize joins and enforce capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    pub id: MeetingId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub created_by: UserId,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub max_participants: u32,
}

fn default_true() -> bool {
    true
}

impl Meeting {
    /// Capacity enforced by the hub: `max_participants` clamped to
    /// `1..=100`, with 0 meaning the default of 50.
    #[must_use]
    pub fn effective_capacity(&self) -> usize {
        let capacity = match self.max_participants {
            0 => DEFAULT_MEETING_CAPACITY,
            n => n.min(MAX_MEETING_CAPACITY),
        };
        capacity as usize
    }

    /// Whether `user_id` may join at all. Private meetings admit only
    /// their creator.
    #[must_use]
    pub fn admits(&self, user_id: &UserId) -> bool {
        !self.is_private || &self.created_by == user_id
    }

    /// Role assigned to `user_id` on join.
    #[must_use]
    pub fn role_for(&self, user_id: &UserId) -> ParticipantRole {
        if &self.created_by == user_id {
            ParticipantRole::Host
        } else {
            ParticipantRole::Participant
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParticipantRole {
    Host,
    CoHost,
    Participant,
}

impl ParticipantRole {
    /// Host and co-host both carry the host flag.
    #[must_use]
    pub const fn is_host(self) -> bool {
        matches!(self, ParticipantRole::Host | ParticipantRole::CoHost)
    }
}

/// Connection status as mirrored into storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

/// Conferencing state of one participant in one meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    pub id: ParticipantId,
    pub meeting_id: MeetingId,
    pub user_id: UserId,
    pub user_name: String,
    pub peer_id: PeerId,
    pub role: ParticipantRole,
    pub is_host: bool,
    pub is_audio_enabled: bool,
    pub is_video_enabled: bool,
    pub is_screen_sharing: bool,
    pub is_hand_raised: bool,
    pub status: ConnectionStatus,
    pub joined_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl ParticipantRecord {
    /// A fresh record: audio and video on, screen-share and hand down.
    #[must_use]
    pub fn new(
        meeting_id: MeetingId,
        user_id: UserId,
        user_name: String,
        peer_id: PeerId,
        role: ParticipantRole,
        status: ConnectionStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ParticipantId::new(),
            meeting_id,
            user_id,
            user_name,
            peer_id,
            role,
            is_host: role.is_host(),
            is_audio_enabled: true,
            is_video_enabled: true,
            is_screen_sharing: false,
            is_hand_raised: false,
            status,
            joined_at: now,
            last_active: now,
        }
    }

    /// Overwrite the fields present in `patch` and refresh `last_active`.
    pub fn apply(&mut self, patch: &ParticipantPatch, now: DateTime<Utc>) {
        if let Some(v) = patch.is_audio_enabled {
            self.is_audio_enabled = v;
        }
        if let Some(v) = patch.is_video_enabled {
            self.is_video_enabled = v;
        }
        if let Some(v) = patch.is_screen_sharing {
            self.is_screen_sharing = v;
        }
        if let Some(v) = patch.is_hand_raised {
            self.is_hand_raised = v;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        self.last_active = now;
    }
}

/// Partial update of a participant record. Absent fields keep their value.
///
/// `status` is server-controlled and never read from client JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_audio_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_video_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_screen_sharing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_hand_raised: Option<bool>,
    #[serde(skip)]
    pub status: Option<ConnectionStatus>,
}

impl ParticipantPatch {
    /// Patch that only changes the connection status.
    #[must_use]
    pub fn status(status: ConnectionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.is_audio_enabled.is_none()
            && self.is_video_enabled.is_none()
            && self.is_screen_sharing.is_none()
            && self.is_hand_raised.is_none()
            && self.status.is_none()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn meeting(max_participants: u32, is_private: bool) -> Meeting {
        Meeting {
            id: MeetingId::parse("m1").unwrap(),
            title: "Standup".to_string(),
            description: String::new(),
            created_by: UserId::parse("u1").unwrap(),
            scheduled_for: None,
            created_at: Utc::now(),
            is_private,
            is_active: true,
            max_participants,
        }
    }

    fn record() -> ParticipantRecord {
        ParticipantRecord::new(
            MeetingId::parse("m1").unwrap(),
            UserId::parse("u2").unwrap(),
            "Bob".to_string(),
            PeerId::parse("p2").unwrap(),
            ParticipantRole::Participant,
            ConnectionStatus::Connected,
            Utc::now(),
        )
    }

    #[test]
    fn test_effective_capacity() {
        assert_eq!(meeting(0, false).effective_capacity(), 50);
        assert_eq!(meeting(2, false).effective_capacity(), 2);
        assert_eq!(meeting(100, false).effective_capacity(), 100);
        assert_eq!(meeting(5000, false).effective_capacity(), 100);
    }

    #[test]
    fn test_private_meeting_admits_only_creator() {
        let private = meeting(10, true);
        assert!(private.admits(&UserId::parse("u1").unwrap()));
        assert!(!private.admits(&UserId::parse("u2").unwrap()));

        let public = meeting(10, false);
        assert!(public.admits(&UserId::parse("u2").unwrap()));
    }

    #[test]
    fn test_creator_joins_as_host() {
        let m = meeting(10, false);
        assert_eq!(
            m.role_for(&UserId::parse("u1").unwrap()),
            ParticipantRole::Host
        );
        assert_eq!(
            m.role_for(&UserId::parse("u2").unwrap()),
            ParticipantRole::Participant
        );
        assert!(ParticipantRole::CoHost.is_host());
    }

    #[test]
    fn test_meeting_deserializes_with_defaults() {
        let json = r#"{
            "id": "m9",
            "title": "Retro",
            "createdBy": "u1",
            "createdAt": "2026-01-01T00:00:00Z"
        }"#;
        let m: Meeting = serde_json::from_str(json).unwrap();
        assert!(m.is_active);
        assert!(!m.is_private);
        assert_eq!(m.effective_capacity(), 50);
    }

    #[test]
    fn test_new_record_defaults() {
        let r = record();
        assert!(r.is_audio_enabled);
        assert!(r.is_video_enabled);
        assert!(!r.is_screen_sharing);
        assert!(!r.is_hand_raised);
        assert!(!r.is_host);
        assert_eq!(r.joined_at, r.last_active);
    }

    #[test]
    fn test_apply_patch_overwrites_present_fields_only() {
        let mut r = record();
        let later = r.last_active + Duration::seconds(30);
        let patch = ParticipantPatch {
            is_audio_enabled: Some(false),
            is_hand_raised: Some(true),
            ..ParticipantPatch::default()
        };

        r.apply(&patch, later);

        assert!(!r.is_audio_enabled);
        assert!(r.is_video_enabled);
        assert!(r.is_hand_raised);
        assert_eq!(r.last_active, later);
        assert_eq!(r.status, ConnectionStatus::Connected);
    }

    #[test]
    fn test_patch_status_is_not_client_settable() {
        let patch: ParticipantPatch =
            serde_json::from_str(r#"{"isVideoEnabled": false, "status": "disconnected"}"#)
                .unwrap();
        assert_eq!(patch.is_video_enabled, Some(false));
        assert!(patch.status.is_none());
        assert!(!patch.is_empty());
        assert!(ParticipantPatch::default().is_empty());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let value = serde_json::to_value(record()).unwrap();
        assert_eq!(value["userName"], "Bob");
        assert_eq!(value["peerId"], "p2");
        assert_eq!(value["isAudioEnabled"], true);
        assert_eq!(value["role"], "participant");
        assert_eq!(value["status"], "connected");
    }
}
