//! A store that fails participant writes on demand.
//!
//! Wraps a [`MemoryStore`]. Reads always succeed; the next `n` writes
//! (inserts and updates) fail with a backend error after
//! [`FlakyStore::fail_next_writes`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{MeetingId, UserId};
use session_coordinator::models::{Meeting, ParticipantPatch, ParticipantRecord};
use session_coordinator::storage::{MeetingStore, MemoryStore, ParticipantStore, StoreError};
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pending_failures: AtomicU32,
    write_attempts: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail.
    pub fn fail_next_writes(&self, n: u32) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Writes attempted so far, failed ones included.
    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub async fn insert_meeting(&self, meeting: Meeting) {
        self.inner.insert_meeting(meeting).await;
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn attempt_write(&self) -> Result<(), StoreError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Backend("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MeetingStore for FlakyStore {
    async fn find_meeting(&self, meeting_id: &MeetingId) -> Result<Option<Meeting>, StoreError> {
        self.inner.find_meeting(meeting_id).await
    }
}

#[async_trait]
impl ParticipantStore for FlakyStore {
    async fn insert_participant(&self, record: &ParticipantRecord) -> Result<(), StoreError> {
        self.attempt_write()?;
        self.inner.insert_participant(record).await
    }

    async fn update_participant(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
        patch: &ParticipantPatch,
        at: DateTime<Utc>,
    ) -> Result<Option<ParticipantRecord>, StoreError> {
        self.attempt_write()?;
        self.inner
            .update_participant(meeting_id, user_id, patch, at)
            .await
    }

    async fn find_participant(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<Option<ParticipantRecord>, StoreError> {
        self.inner.find_participant(meeting_id, user_id).await
    }

    async fn list_participants(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Vec<ParticipantRecord>, StoreError> {
        self.inner.list_participants(meeting_id).await
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.purge_expired(cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::PeerId;
    use session_coordinator::models::{ConnectionStatus, ParticipantRole};

    fn record() -> ParticipantRecord {
        ParticipantRecord::new(
            MeetingId::parse("m1").unwrap(),
            UserId::parse("u1").unwrap(),
            "Alice".to_string(),
            PeerId::parse("p1").unwrap(),
            ParticipantRole::Participant,
            ConnectionStatus::Connected,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_fails_exactly_n_writes() {
        let store = FlakyStore::new();
        store.fail_next_writes(2);

        assert!(store.insert_participant(&record()).await.is_err());
        assert!(store.insert_participant(&record()).await.is_err());
        assert!(store.insert_participant(&record()).await.is_ok());
        assert_eq!(store.write_attempts(), 3);
        assert_eq!(store.inner().participant_count().await, 1);
    }
}
