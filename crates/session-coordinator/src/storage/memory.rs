//! In-process store.

use super::{MeetingStore, ParticipantStore, StoreError};
use crate::models::{Meeting, ParticipantPatch, ParticipantRecord};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{MeetingId, UserId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Meetings and participant records in `RwLock`ed maps.
///
/// Cheap to share behind an `Arc`. Meetings are seeded with
/// [`insert_meeting`](Self::insert_meeting).
#[derive(Debug, Default)]
pub struct MemoryStore {
    meetings: RwLock<HashMap<MeetingId, Meeting>>,
    participants: RwLock<HashMap<(MeetingId, UserId), ParticipantRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_meeting(&self, meeting: Meeting) {
        self.meetings
            .write()
            .await
            .insert(meeting.id.clone(), meeting);
    }

    pub async fn participant_count(&self) -> usize {
        self.participants.read().await.len()
    }
}

#[async_trait]
impl MeetingStore for MemoryStore {
    async fn find_meeting(&self, meeting_id: &MeetingId) -> Result<Option<Meeting>, StoreError> {
        Ok(self.meetings.read().await.get(meeting_id).cloned())
    }
}

#[async_trait]
impl ParticipantStore for MemoryStore {
    async fn insert_participant(&self, record: &ParticipantRecord) -> Result<(), StoreError> {
        self.participants.write().await.insert(
            (record.meeting_id.clone(), record.user_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn update_participant(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
        patch: &ParticipantPatch,
        at: DateTime<Utc>,
    ) -> Result<Option<ParticipantRecord>, StoreError> {
        let mut participants = self.participants.write().await;
        let key = (meeting_id.clone(), user_id.clone());
        Ok(participants.get_mut(&key).map(|record| {
            record.apply(patch, at);
            record.clone()
        }))
    }

    async fn find_participant(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<Option<ParticipantRecord>, StoreError> {
        let key = (meeting_id.clone(), user_id.clone());
        Ok(self.participants.read().await.get(&key).cloned())
    }

    async fn list_participants(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Vec<ParticipantRecord>, StoreError> {
        let mut records: Vec<ParticipantRecord> = self
            .participants
            .read()
            .await
            .values()
            .filter(|record| &record.meeting_id == meeting_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(records)
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut participants = self.participants.write().await;
        let before = participants.len();
        participants.retain(|_, record| record.last_active >= cutoff);
        Ok((before - participants.len()) as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::models::{ConnectionStatus, ParticipantRole};
    use chrono::Duration;
    use common::types::PeerId;

    fn record(meeting: &str, user: &str, at: DateTime<Utc>) -> ParticipantRecord {
        ParticipantRecord::new(
            MeetingId::parse(meeting).unwrap(),
            UserId::parse(user).unwrap(),
            user.to_string(),
            PeerId::parse(format!("peer-{user}")).unwrap(),
            ParticipantRole::Participant,
            ConnectionStatus::Connected,
            at,
        )
    }

    #[tokio::test]
    async fn test_insert_is_upsert_per_user() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_participant(&record("m1", "u1", now)).await.unwrap();
        store.insert_participant(&record("m1", "u1", now)).await.unwrap();
        store.insert_participant(&record("m1", "u2", now)).await.unwrap();
        store.insert_participant(&record("m2", "u1", now)).await.unwrap();

        let m1 = MeetingId::parse("m1").unwrap();
        assert_eq!(store.list_participants(&m1).await.unwrap().len(), 2);
        assert_eq!(store.participant_count().await, 3);
    }

    #[tokio::test]
    async fn test_update_applies_patch() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_participant(&record("m1", "u1", now)).await.unwrap();

        let later = now + Duration::seconds(5);
        let patch = ParticipantPatch {
            is_video_enabled: Some(false),
            ..ParticipantPatch::default()
        };
        let m1 = MeetingId::parse("m1").unwrap();
        let u1 = UserId::parse("u1").unwrap();
        let updated = store
            .update_participant(&m1, &u1, &patch, later)
            .await
            .unwrap()
            .unwrap();

        assert!(!updated.is_video_enabled);
        assert_eq!(updated.last_active, later);
        assert_eq!(
            store.find_participant(&m1, &u1).await.unwrap().unwrap(),
            updated
        );

        let missing = UserId::parse("nobody").unwrap();
        assert!(store
            .update_participant(&m1, &missing, &patch, later)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_purge_expired_removes_only_stale() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert_participant(&record("m1", "old", now - Duration::hours(25)))
            .await
            .unwrap();
        store.insert_participant(&record("m1", "fresh", now)).await.unwrap();

        let purged = store.purge_expired(now - Duration::hours(24)).await.unwrap();
        assert_eq!(purged, 1);

        let remaining = store
            .list_participants(&MeetingId::parse("m1").unwrap())
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].user_id.as_str(), "fresh");
    }

    #[tokio::test]
    async fn test_find_meeting() {
        let store = MemoryStore::new();
        let id = MeetingId::parse("m1").unwrap();
        assert!(store.find_meeting(&id).await.unwrap().is_none());

        store
            .insert_meeting(Meeting {
                id: id.clone(),
                title: "Planning".to_string(),
                description: String::new(),
                created_by: UserId::parse("u1").unwrap(),
                scheduled_for: None,
                created_at: Utc::now(),
                is_private: false,
                is_active: true,
                max_participants: 0,
            })
            .await;
        assert_eq!(
            store.find_meeting(&id).await.unwrap().unwrap().title,
            "Planning"
        );
    }
}
